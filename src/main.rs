mod api;
mod cache;
mod config;
mod db;
mod error;
mod fetcher;
mod index;
mod pipeline;
mod resolver;
mod runs;
mod store;
mod types;

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::{router, ApiState};
use crate::cache::{EventVenueCache, GeocodeCache, NominatimGeocoder};
use crate::config::{Config, EMBED_DIM};
use crate::error::Result;
use crate::index::seed::seed_places;
use crate::index::PlaceIndex;
use crate::pipeline::Pipeline;
use crate::resolver::{heuristics, CandidateResolver};
use crate::runs::RunTracker;
use crate::store::LocationStore;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let pool = db::connect(&cfg.db_path).await?;

    // Place index: load the artifact, or bootstrap one from the built-in
    // gazetteer on first start.
    let index = Arc::new(PlaceIndex::load_or_build(
        Path::new(&cfg.index_dir),
        seed_places(),
        EMBED_DIM,
    )?);
    info!(places = index.len(), "Place index ready");

    let rules = heuristics::load_rules(cfg.heuristic_rules_path.as_deref())?;
    info!(rules = rules.len(), "Heuristic rules loaded");

    let store = LocationStore::new(pool.clone());
    let resolver = Arc::new(CandidateResolver::new(Arc::clone(&index), rules));
    let geocoder = Arc::new(NominatimGeocoder::new(cfg.nominatim_url.clone())?);
    let geocode = Arc::new(GeocodeCache::new(pool.clone(), geocoder));
    let venues = Arc::new(EventVenueCache::new(pool.clone()));
    let tracker = RunTracker::new(pool.clone());

    // Pipeline scheduler: first run fires immediately, then every interval.
    let pipeline = Arc::new(Pipeline::new(
        cfg.clone(),
        store.clone(),
        resolver,
        geocode,
        venues,
        tracker.clone(),
    ));
    tokio::spawn(pipeline.run_forever());

    // HTTP API server
    let api_state = ApiState { store, runs: tracker };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
