pub mod event_venue;
pub mod geocode;

pub use event_venue::EventVenueCache;
pub use geocode::{GeocodeCache, Geocoder, NominatimGeocoder};
