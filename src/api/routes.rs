use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::models::{MarketLocationRow, MarketSearchRow, NearbyMarket, PipelineRunRow};
use crate::error::AppError;
use crate::runs::RunTracker;
use crate::store::LocationStore;

#[derive(Clone)]
pub struct ApiState {
    pub store: LocationStore,
    pub runs: RunTracker,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/markets/:condition_id/locations", get(get_market_locations))
        .route("/markets/:condition_id/best-location", get(get_best_location))
        .route("/nearby", get(get_nearby_markets))
        .route("/search", get(search_markets))
        .route("/runs/recent", get(get_recent_runs))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RecentRunsQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lon: f64,
    pub radius_km: Option<f64>,
    pub min_confidence: Option<f64>,
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub markets_total: i64,
    pub markets_processed: i64,
    pub processed_pct: f64,
    pub markets_with_location: i64,
    pub avg_confidence: Option<f64>,
    pub low_confidence_locations: i64,
    pub last_run: Option<PipelineRunRow>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    let stats = state.store.coverage_stats().await?;
    let last_run = state.runs.recent(1).await?.into_iter().next();

    let processed_pct = if stats.markets_total > 0 {
        stats.markets_processed as f64 / stats.markets_total as f64 * 100.0
    } else {
        0.0
    };

    Ok(Json(HealthResponse {
        status: "ok",
        markets_total: stats.markets_total,
        markets_processed: stats.markets_processed,
        processed_pct,
        markets_with_location: stats.markets_with_location,
        avg_confidence: stats.avg_confidence,
        low_confidence_locations: stats.low_confidence_locations,
        last_run,
    }))
}

async fn get_market_locations(
    State(state): State<ApiState>,
    Path(condition_id): Path<String>,
) -> Result<Json<Vec<MarketLocationRow>>, AppError> {
    let rows = state.store.locations_for(&condition_id).await?;
    Ok(Json(rows))
}

async fn get_best_location(
    State(state): State<ApiState>,
    Path(condition_id): Path<String>,
) -> Result<Json<MarketLocationRow>, AppError> {
    match state.store.best_location(&condition_id).await? {
        Some(row) => Ok(Json(row)),
        None => Err(AppError::NoCandidates),
    }
}

async fn get_nearby_markets(
    State(state): State<ApiState>,
    Query(params): Query<NearbyQuery>,
) -> Result<Json<Vec<NearbyMarket>>, AppError> {
    let radius_km = params.radius_km.unwrap_or(50.0);
    let min_confidence = params.min_confidence.unwrap_or(0.0);
    let limit = params.limit.unwrap_or(100).clamp(1, 500);
    let hits = state
        .store
        .nearby_markets(params.lat, params.lon, radius_km, min_confidence, limit)
        .await?;
    Ok(Json(hits))
}

async fn search_markets(
    State(state): State<ApiState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<MarketSearchRow>>, AppError> {
    let limit = params.limit.unwrap_or(100).clamp(1, 500);
    let rows = state.store.search_markets(&params.q, limit).await?;
    Ok(Json(rows))
}

async fn get_recent_runs(
    State(state): State<ApiState>,
    Query(params): Query<RecentRunsQuery>,
) -> Result<Json<Vec<PipelineRunRow>>, AppError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 200);
    let rows = state.runs.recent(limit).await?;
    Ok(Json(rows))
}
