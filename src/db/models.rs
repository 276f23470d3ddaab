use serde::Serialize;

/// A persisted location candidate row, as served by the API.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MarketLocationRow {
    pub id: i64,
    pub market_id: i64,
    pub location_name: String,
    pub location_type: String,
    pub confidence: f64,
    pub reason: String,
    pub inference_method: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub geocoded: bool,
    pub geocode_source: Option<String>,
    pub geo_version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PipelineRunRow {
    pub id: i64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub status: String,
    pub markets_fetched: i64,
    pub markets_new: i64,
    pub markets_updated: i64,
    pub markets_attempted: i64,
    pub markets_failed: i64,
    pub locations_inferred: i64,
    pub locations_geocoded: i64,
    pub geocode_cache_hits: i64,
    pub geocode_cache_misses: i64,
    pub avg_confidence: Option<f64>,
    pub error_message: Option<String>,
    /// JSON blob of run context, e.g. the inference version.
    pub metadata: Option<String>,
}

/// A market matched by the nearby spatial query, with its distance from the
/// query point.
#[derive(Debug, Clone, Serialize)]
pub struct NearbyMarket {
    pub condition_id: String,
    pub question: String,
    pub location_name: String,
    pub confidence: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
}

/// A market matched by the text search query.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MarketSearchRow {
    pub condition_id: String,
    pub question: String,
    pub location_name: String,
    pub location_type: String,
    pub confidence: f64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Aggregates behind the health endpoint.
#[derive(Debug, Clone, Serialize, Default, sqlx::FromRow)]
pub struct CoverageStats {
    pub markets_total: i64,
    pub markets_processed: i64,
    pub markets_with_location: i64,
    pub avg_confidence: Option<f64>,
    pub low_confidence_locations: i64,
}
