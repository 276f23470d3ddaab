use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::debug;

use crate::db::models::{CoverageStats, MarketLocationRow, MarketSearchRow, NearbyMarket};
use crate::error::{AppError, Result};
use crate::types::{now_secs, LocationCandidate, Market, PendingMarket};

const EARTH_RADIUS_KM: f64 = 6371.0;
const KM_PER_DEGREE_LAT: f64 = 111.0;

/// Great-circle distance between two points, in kilometers.
fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_KM * 2.0 * a.sqrt().asin()
}

#[derive(sqlx::FromRow)]
struct GeocodedLocation {
    condition_id: String,
    question: String,
    location_name: String,
    confidence: f64,
    latitude: f64,
    longitude: f64,
}

/// Outcome of a market upsert during ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(i64),
    Updated(i64),
}

impl UpsertOutcome {
    pub fn market_id(&self) -> i64 {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Updated(id) => *id,
        }
    }
}

/// Versioned persistence for markets and their inferred locations.
///
/// Location rows are keyed by (market_id, location_name, geo_version):
/// re-running the same version replaces rows in place, while a version bump
/// writes a parallel generation and leaves earlier rows untouched.
#[derive(Clone)]
pub struct LocationStore {
    pool: SqlitePool,
}

impl LocationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -- ingestion ----------------------------------------------------------

    /// Insert or refresh a market row keyed by condition_id. Updates never
    /// touch the geo_* columns; reprocessing is driven by version bumps.
    pub async fn upsert_market(&self, market: &Market) -> Result<UpsertOutcome> {
        let now = now_secs();
        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM markets WHERE condition_id = ?")
                .bind(&market.condition_id)
                .fetch_optional(&self.pool)
                .await?;

        let tags = serde_json::to_string(&market.tags)?;
        let raw = market.raw_payload.to_string();

        match existing {
            Some(id) => {
                sqlx::query(
                    "UPDATE markets SET
                        question = ?, description = ?, market_slug = ?, category = ?,
                        end_date_iso = ?, active = ?, closed = ?, volume = ?,
                        liquidity = ?, tags = ?, raw_payload = ?, updated_at = ?
                     WHERE id = ?",
                )
                .bind(&market.question)
                .bind(&market.description)
                .bind(&market.market_slug)
                .bind(&market.category)
                .bind(&market.end_date_iso)
                .bind(market.active)
                .bind(market.closed)
                .bind(market.volume)
                .bind(market.liquidity)
                .bind(&tags)
                .bind(&raw)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?;
                Ok(UpsertOutcome::Updated(id))
            }
            None => {
                let result = sqlx::query(
                    "INSERT INTO markets
                        (condition_id, question, description, market_slug, category,
                         end_date_iso, active, closed, volume, liquidity, tags,
                         raw_payload, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&market.condition_id)
                .bind(&market.question)
                .bind(&market.description)
                .bind(&market.market_slug)
                .bind(&market.category)
                .bind(&market.end_date_iso)
                .bind(market.active)
                .bind(market.closed)
                .bind(market.volume)
                .bind(market.liquidity)
                .bind(&tags)
                .bind(&raw)
                .bind(now)
                .bind(now)
                .execute(&self.pool)
                .await?;
                Ok(UpsertOutcome::Inserted(result.last_insert_rowid()))
            }
        }
    }

    /// Markets that have never been processed, or were processed under an
    /// older inference version. Oldest first so backlogs drain fairly.
    pub async fn unprocessed_markets(&self, geo_version: i64, limit: i64) -> Result<Vec<PendingMarket>> {
        let rows = sqlx::query_as::<_, PendingMarket>(
            "SELECT id AS market_id, condition_id, question, description
             FROM markets
             WHERE geo_processed = 0 OR geo_version < ?
             ORDER BY id ASC
             LIMIT ?",
        )
        .bind(geo_version)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -- persistence --------------------------------------------------------

    /// Persist a market's candidates for one version and mark the market
    /// processed, atomically. Candidates are validated before any write; a
    /// bad confidence aborts the whole batch.
    pub async fn persist(
        &self,
        market_id: i64,
        geo_version: i64,
        candidates: &[LocationCandidate],
    ) -> Result<()> {
        for candidate in candidates {
            if !candidate.confidence.is_finite()
                || !(0.0..=1.0).contains(&candidate.confidence)
            {
                return Err(AppError::Validation(format!(
                    "confidence {} out of range for '{}'",
                    candidate.confidence, candidate.location_name
                )));
            }
            if candidate.location_name.trim().is_empty() {
                return Err(AppError::Validation("empty location name".to_string()));
            }
        }

        let now = now_secs();
        let mut tx = self.pool.begin().await?;

        for candidate in candidates {
            sqlx::query(
                "INSERT INTO market_locations
                    (market_id, location_name, location_type, confidence, reason,
                     inference_method, latitude, longitude, geocoded, geocode_source,
                     geo_version, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(market_id, location_name, geo_version) DO UPDATE SET
                    location_type = excluded.location_type,
                    confidence = excluded.confidence,
                    reason = excluded.reason,
                    inference_method = excluded.inference_method,
                    latitude = excluded.latitude,
                    longitude = excluded.longitude,
                    geocoded = excluded.geocoded,
                    geocode_source = excluded.geocode_source,
                    updated_at = excluded.updated_at",
            )
            .bind(market_id)
            .bind(&candidate.location_name)
            .bind(candidate.location_type.as_str())
            .bind(candidate.confidence)
            .bind(&candidate.reason)
            .bind(candidate.inference_method.as_str())
            .bind(candidate.latitude)
            .bind(candidate.longitude)
            .bind(candidate.geocoded())
            .bind(&candidate.geocode_source)
            .bind(geo_version)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE markets SET geo_processed = 1, geo_processed_at = ?, geo_version = ?
             WHERE id = ?",
        )
        .bind(now)
        .bind(geo_version)
        .bind(market_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(market_id, geo_version, count = candidates.len(), "Persisted candidates");
        Ok(())
    }

    // -- queries ------------------------------------------------------------

    /// All location rows for a market, best first, newest version first.
    pub async fn locations_for(&self, condition_id: &str) -> Result<Vec<MarketLocationRow>> {
        let rows = sqlx::query_as::<_, MarketLocationRow>(
            "SELECT ml.* FROM market_locations ml
             JOIN markets m ON m.id = ml.market_id
             WHERE m.condition_id = ?
             ORDER BY ml.geo_version DESC, ml.confidence DESC, ml.location_name ASC",
        )
        .bind(condition_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// The single best geocoded location for a market: highest confidence,
    /// ties broken by newest version then most recent update.
    pub async fn best_location(&self, condition_id: &str) -> Result<Option<MarketLocationRow>> {
        let row = sqlx::query_as::<_, MarketLocationRow>(
            "SELECT ml.* FROM market_locations ml
             JOIN markets m ON m.id = ml.market_id
             WHERE m.condition_id = ? AND ml.geocoded = 1
             ORDER BY ml.confidence DESC, ml.geo_version DESC, ml.updated_at DESC
             LIMIT 1",
        )
        .bind(condition_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Geocoded markets within `radius_km` of a point, nearest first with
    /// confidence as the tie-break. One row per market (its nearest
    /// qualifying location). A bounding box narrows the SQL scan; exact
    /// distances are haversine.
    pub async fn nearby_markets(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        min_confidence: f64,
        limit: i64,
    ) -> Result<Vec<NearbyMarket>> {
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(AppError::Validation(format!(
                "invalid query point ({latitude}, {longitude})"
            )));
        }
        if !radius_km.is_finite() || radius_km <= 0.0 {
            return Err(AppError::Validation(format!("invalid radius {radius_km} km")));
        }

        let lat_delta = radius_km / KM_PER_DEGREE_LAT;
        let lon_delta =
            radius_km / (KM_PER_DEGREE_LAT * latitude.to_radians().cos().abs().max(0.01));

        let rows = sqlx::query_as::<_, GeocodedLocation>(
            "SELECT m.condition_id, m.question, ml.location_name, ml.confidence,
                    ml.latitude, ml.longitude
             FROM market_locations ml
             JOIN markets m ON m.id = ml.market_id
             WHERE ml.geocoded = 1
               AND ml.confidence >= ?
               AND ml.latitude BETWEEN ? AND ?
               AND ml.longitude BETWEEN ? AND ?",
        )
        .bind(min_confidence)
        .bind(latitude - lat_delta)
        .bind(latitude + lat_delta)
        .bind(longitude - lon_delta)
        .bind(longitude + lon_delta)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<NearbyMarket> = rows
            .into_iter()
            .filter_map(|r| {
                let distance_km = haversine_km(latitude, longitude, r.latitude, r.longitude);
                (distance_km <= radius_km).then_some(NearbyMarket {
                    condition_id: r.condition_id,
                    question: r.question,
                    location_name: r.location_name,
                    confidence: r.confidence,
                    latitude: r.latitude,
                    longitude: r.longitude,
                    distance_km,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance_km
                .partial_cmp(&b.distance_km)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });

        let mut seen = std::collections::HashSet::new();
        hits.retain(|h| seen.insert(h.condition_id.clone()));
        hits.truncate(limit.max(0) as usize);
        Ok(hits)
    }

    /// Markets whose question or inferred location name matches `query`,
    /// best-confidence first, one row per market.
    pub async fn search_markets(&self, query: &str, limit: i64) -> Result<Vec<MarketSearchRow>> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation("empty search query".to_string()));
        }
        let pattern = format!("%{trimmed}%");

        let rows = sqlx::query_as::<_, MarketSearchRow>(
            "SELECT m.condition_id, m.question, ml.location_name, ml.location_type,
                    ml.confidence, ml.latitude, ml.longitude
             FROM market_locations ml
             JOIN markets m ON m.id = ml.market_id
             WHERE m.question LIKE ? OR ml.location_name LIKE ?
             ORDER BY ml.confidence DESC, ml.geo_version DESC",
        )
        .bind(&pattern)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;

        let mut seen = std::collections::HashSet::new();
        let mut out: Vec<MarketSearchRow> = rows
            .into_iter()
            .filter(|r| seen.insert(r.condition_id.clone()))
            .collect();
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    /// Coverage aggregates for the health endpoint.
    pub async fn coverage_stats(&self) -> Result<CoverageStats> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM markets) AS markets_total,
                (SELECT COUNT(*) FROM markets WHERE geo_processed = 1) AS markets_processed,
                (SELECT COUNT(DISTINCT market_id) FROM market_locations) AS markets_with_location,
                (SELECT AVG(confidence) FROM market_locations) AS avg_confidence,
                (SELECT COUNT(*) FROM market_locations WHERE confidence < 0.5)
                    AS low_confidence_locations",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CoverageStats {
            markets_total: row.get("markets_total"),
            markets_processed: row.get("markets_processed"),
            markets_with_location: row.get("markets_with_location"),
            avg_confidence: row.get("avg_confidence"),
            low_confidence_locations: row.get("low_confidence_locations"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::geocode::tests::test_pool;
    use crate::types::{InferenceMethod, LocationType};

    fn market(condition_id: &str, question: &str) -> Market {
        Market {
            condition_id: condition_id.to_string(),
            question: question.to_string(),
            description: None,
            market_slug: None,
            category: Some("Politics".to_string()),
            end_date_iso: None,
            active: true,
            closed: false,
            volume: Some(1000.0),
            liquidity: None,
            tags: vec!["politics".to_string()],
            raw_payload: serde_json::json!({"conditionId": condition_id}),
        }
    }

    fn candidate(name: &str, confidence: f64, geocoded: bool) -> LocationCandidate {
        LocationCandidate {
            location_name: name.to_string(),
            location_type: LocationType::City,
            confidence,
            reason: "test".to_string(),
            inference_method: InferenceMethod::SemanticMatch,
            latitude: geocoded.then_some(1.0),
            longitude: geocoded.then_some(2.0),
            geocode_source: geocoded.then(|| "mock".to_string()),
        }
    }

    async fn store() -> LocationStore {
        LocationStore::new(test_pool().await)
    }

    #[tokio::test]
    async fn upsert_market_inserts_then_updates() {
        let store = store().await;
        let first = store.upsert_market(&market("0xa", "Question v1?")).await.unwrap();
        assert!(matches!(first, UpsertOutcome::Inserted(_)));

        let second = store.upsert_market(&market("0xa", "Question v2?")).await.unwrap();
        assert!(matches!(second, UpsertOutcome::Updated(_)));
        assert_eq!(first.market_id(), second.market_id());

        let pending = store.unprocessed_markets(1, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].question, "Question v2?");
    }

    #[tokio::test]
    async fn persist_is_idempotent_per_version() {
        let store = store().await;
        let id = store.upsert_market(&market("0xa", "q")).await.unwrap().market_id();

        store.persist(id, 1, &[candidate("Atlanta, GA", 0.8, true)]).await.unwrap();
        store.persist(id, 1, &[candidate("Atlanta, GA", 0.9, true)]).await.unwrap();

        let rows = store.locations_for("0xa").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn version_bump_writes_parallel_rows() {
        let store = store().await;
        let id = store.upsert_market(&market("0xa", "q")).await.unwrap().market_id();

        store.persist(id, 1, &[candidate("Atlanta, GA", 0.8, true)]).await.unwrap();
        store.persist(id, 2, &[candidate("Atlanta, GA", 0.7, true)]).await.unwrap();

        let rows = store.locations_for("0xa").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].geo_version, 2);
        assert_eq!(rows[1].geo_version, 1);

        // Version 2 markets are no longer pending at version 2.
        assert!(store.unprocessed_markets(2, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_confidence_rejects_whole_batch() {
        let store = store().await;
        let id = store.upsert_market(&market("0xa", "q")).await.unwrap().market_id();

        let err = store
            .persist(id, 1, &[candidate("Paris, France", 0.5, true), candidate("Oslo", 1.7, true)])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(store.locations_for("0xa").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn best_location_prefers_confidence_then_version() {
        let store = store().await;
        let id = store.upsert_market(&market("0xa", "q")).await.unwrap().market_id();

        store
            .persist(
                id,
                1,
                &[candidate("Atlanta, GA", 0.9, true), candidate("Georgia", 0.6, true)],
            )
            .await
            .unwrap();
        store.persist(id, 2, &[candidate("Atlanta, GA", 0.9, true)]).await.unwrap();

        let best = store.best_location("0xa").await.unwrap().unwrap();
        assert_eq!(best.location_name, "Atlanta, GA");
        assert_eq!(best.geo_version, 2);
    }

    #[tokio::test]
    async fn best_location_skips_ungeocoded_rows() {
        let store = store().await;
        let id = store.upsert_market(&market("0xa", "q")).await.unwrap().market_id();

        store
            .persist(
                id,
                1,
                &[candidate("Somewhere", 0.95, false), candidate("Atlanta, GA", 0.7, true)],
            )
            .await
            .unwrap();

        let best = store.best_location("0xa").await.unwrap().unwrap();
        assert_eq!(best.location_name, "Atlanta, GA");
    }

    #[tokio::test]
    async fn version_bump_requeues_processed_markets() {
        let store = store().await;
        let id = store.upsert_market(&market("0xa", "q")).await.unwrap().market_id();

        store.persist(id, 1, &[candidate("Atlanta, GA", 0.8, true)]).await.unwrap();
        assert!(store.unprocessed_markets(1, 10).await.unwrap().is_empty());
        // A bump re-queues it.
        assert_eq!(store.unprocessed_markets(2, 10).await.unwrap().len(), 1);
    }

    fn placed(name: &str, confidence: f64, lat: f64, lon: f64) -> LocationCandidate {
        LocationCandidate {
            latitude: Some(lat),
            longitude: Some(lon),
            geocode_source: Some("mock".to_string()),
            ..candidate(name, confidence, true)
        }
    }

    #[tokio::test]
    async fn nearby_finds_markets_within_radius() {
        let store = store().await;
        let a = store.upsert_market(&market("0xatl", "Atlanta market")).await.unwrap().market_id();
        let b = store.upsert_market(&market("0xtok", "Tokyo market")).await.unwrap().market_id();

        store.persist(a, 1, &[placed("Atlanta, GA", 0.9, 33.749, -84.388)]).await.unwrap();
        store.persist(b, 1, &[placed("Tokyo, Japan", 0.9, 35.677, 139.650)]).await.unwrap();

        // Query point in downtown Atlanta.
        let hits = store.nearby_markets(33.75, -84.39, 50.0, 0.0, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].condition_id, "0xatl");
        assert!(hits[0].distance_km < 5.0, "distance={}", hits[0].distance_km);
    }

    #[tokio::test]
    async fn nearby_orders_by_distance_and_dedups_markets() {
        let store = store().await;
        let a = store.upsert_market(&market("0xatl", "Atlanta market")).await.unwrap().market_id();
        let b = store.upsert_market(&market("0xbos", "Boston market")).await.unwrap().market_id();

        // Two locations for the same market; only the nearest should surface.
        store
            .persist(
                a,
                1,
                &[
                    placed("Atlanta, GA", 0.9, 33.749, -84.388),
                    placed("Georgia", 0.5, 32.166, -82.900),
                ],
            )
            .await
            .unwrap();
        store.persist(b, 1, &[placed("Boston, MA", 0.9, 42.360, -71.059)]).await.unwrap();

        let hits = store.nearby_markets(33.75, -84.39, 2000.0, 0.0, 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].condition_id, "0xatl");
        assert_eq!(hits[0].location_name, "Atlanta, GA");
        assert_eq!(hits[1].condition_id, "0xbos");
        assert!(hits[0].distance_km < hits[1].distance_km);
    }

    #[tokio::test]
    async fn nearby_respects_min_confidence_and_rejects_bad_input() {
        let store = store().await;
        let a = store.upsert_market(&market("0xatl", "q")).await.unwrap().market_id();
        store.persist(a, 1, &[placed("Atlanta, GA", 0.3, 33.749, -84.388)]).await.unwrap();

        let hits = store.nearby_markets(33.75, -84.39, 50.0, 0.5, 10).await.unwrap();
        assert!(hits.is_empty());

        let err = store.nearby_markets(91.0, 0.0, 50.0, 0.0, 10).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = store.nearby_markets(0.0, 0.0, -1.0, 0.0, 10).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn search_matches_question_and_location_name() {
        let store = store().await;
        let a = store
            .upsert_market(&market("0xatl", "Will it snow in Atlanta?"))
            .await
            .unwrap()
            .market_id();
        let b = store
            .upsert_market(&market("0xfed", "Will the Fed cut rates?"))
            .await
            .unwrap()
            .market_id();
        store.persist(a, 1, &[candidate("Atlanta, GA", 0.9, true)]).await.unwrap();
        store.persist(b, 1, &[candidate("Washington, DC", 0.7, true)]).await.unwrap();

        // Matches the question text.
        let by_question = store.search_markets("snow", 10).await.unwrap();
        assert_eq!(by_question.len(), 1);
        assert_eq!(by_question[0].condition_id, "0xatl");

        // Matches the inferred location name.
        let by_location = store.search_markets("washington", 10).await.unwrap();
        assert_eq!(by_location.len(), 1);
        assert_eq!(by_location[0].condition_id, "0xfed");

        let err = store.search_markets("   ", 10).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn coverage_stats_aggregate() {
        let store = store().await;
        let a = store.upsert_market(&market("0xa", "q1")).await.unwrap().market_id();
        store.upsert_market(&market("0xb", "q2")).await.unwrap();

        store
            .persist(a, 1, &[candidate("Atlanta, GA", 0.9, true), candidate("Georgia", 0.3, true)])
            .await
            .unwrap();

        let stats = store.coverage_stats().await.unwrap();
        assert_eq!(stats.markets_total, 2);
        assert_eq!(stats.markets_processed, 1);
        assert_eq!(stats.markets_with_location, 1);
        assert_eq!(stats.low_confidence_locations, 1);
        assert!((stats.avg_confidence.unwrap() - 0.6).abs() < 1e-9);
    }
}
