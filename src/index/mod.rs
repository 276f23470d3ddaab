pub mod embedder;
pub mod place_index;
pub mod seed;

pub use place_index::{PlaceIndex, PlaceRecord};
