use crate::error::{AppError, Result};

pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";
pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";
pub const NOMINATIM_USER_AGENT: &str = "polymarket-geo-pipeline/0.1";

/// Geocode cache entries are fresh for this long after fetch.
pub const GEOCODE_CACHE_TTL_SECS: i64 = 30 * 24 * 3600;

/// Event venue cache uses a shorter TTL: venues for recurring events change
/// year over year and are announced close to the event.
pub const EVENT_VENUE_TTL_SECS: i64 = 7 * 24 * 3600;

/// A pipeline_runs row stuck in 'running' longer than this is reconciled to
/// 'failed' at the start of the next run (crashed process left no finalizer).
pub const RUN_STALE_AFTER_SECS: i64 = 6 * 3600;

/// A run is marked failed when more than this fraction of attempted markets
/// errored, even if the run itself completed.
pub const RUN_FAILURE_RATIO: f64 = 0.5;

/// Bounded deadline for external geocoder / venue-source HTTP calls.
pub const EXTERNAL_CALL_TIMEOUT_SECS: u64 = 10;

/// Candidates below this confidence are dropped before persistence.
pub const MIN_CANDIDATE_CONFIDENCE: f64 = 0.15;

/// Maximum candidates persisted per market per version.
pub const MAX_CANDIDATES_PER_MARKET: usize = 5;

/// Default embedding dimension for the place index artifact.
pub const EMBED_DIM: usize = 256;

#[derive(Debug, Clone)]
pub struct Config {
    pub gamma_api_url: String,
    pub nominatim_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Directory holding the place index artifact (INDEX_DIR).
    pub index_dir: String,
    /// Optional JSON file overriding the built-in heuristic rule table.
    pub heuristic_rules_path: Option<String>,
    /// Current inference-logic version; bump to re-process markets (GEO_VERSION).
    pub geo_version: i64,
    /// Markets processed per pipeline run (PIPELINE_BATCH_SIZE).
    pub batch_size: i64,
    /// Concurrent per-market inference tasks (PIPELINE_WORKERS).
    pub worker_concurrency: usize,
    /// Seconds between scheduled pipeline runs (PIPELINE_INTERVAL_SECS).
    pub pipeline_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            gamma_api_url: std::env::var("GAMMA_API_URL")
                .unwrap_or_else(|_| GAMMA_API_URL.to_string()),
            nominatim_url: std::env::var("NOMINATIM_URL")
                .unwrap_or_else(|_| NOMINATIM_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "geo.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            index_dir: std::env::var("INDEX_DIR").unwrap_or_else(|_| "data/index".to_string()),
            heuristic_rules_path: std::env::var("HEURISTIC_RULES_PATH").ok(),
            geo_version: std::env::var("GEO_VERSION")
                .unwrap_or_else(|_| "1".to_string())
                .parse::<i64>()
                .map_err(|_| AppError::Config("GEO_VERSION must be an integer".to_string()))?,
            batch_size: std::env::var("PIPELINE_BATCH_SIZE")
                .unwrap_or_else(|_| "500".to_string())
                .parse::<i64>()
                .unwrap_or(500),
            worker_concurrency: std::env::var("PIPELINE_WORKERS")
                .unwrap_or_else(|_| "8".to_string())
                .parse::<usize>()
                .unwrap_or(8),
            pipeline_interval_secs: std::env::var("PIPELINE_INTERVAL_SECS")
                .unwrap_or_else(|_| "900".to_string())
                .parse::<u64>()
                .unwrap_or(900),
        })
    }
}
