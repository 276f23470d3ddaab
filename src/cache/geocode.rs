use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{EXTERNAL_CALL_TIMEOUT_SECS, GEOCODE_CACHE_TTL_SECS, NOMINATIM_USER_AGENT};
use crate::error::{AppError, Result};
use crate::types::{now_secs, GeocodeLookup};

/// Canonical cache key: trimmed, lowercased, runs of whitespace collapsed.
/// "Atlanta, GA" and " atlanta,  ga " hit the same row.
pub fn normalize_query(query: &str) -> String {
    query
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// External forward-geocoding provider, mockable in tests.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, query: &str) -> Result<Option<GeocodeHit>>;

    fn source(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct GeocodeHit {
    pub latitude: f64,
    pub longitude: f64,
    pub display_name: Option<String>,
    pub raw_payload: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Nominatim
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NominatimResult {
    lat: String,
    lon: String,
    display_name: Option<String>,
}

pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimGeocoder {
    pub fn new(base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(NOMINATIM_USER_AGENT)
            .timeout(Duration::from_secs(EXTERNAL_CALL_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<GeocodeHit>> {
        let url = format!("{}/search", self.base_url);
        let call = self
            .client
            .get(&url)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send();

        let response = tokio::time::timeout(Duration::from_secs(EXTERNAL_CALL_TIMEOUT_SECS), call)
            .await
            .map_err(|_| AppError::ExternalTimeout(format!("geocode '{query}'")))??
            .error_for_status()?;

        let results: Vec<serde_json::Value> = response.json().await?;
        let Some(first) = results.into_iter().next() else {
            return Ok(None);
        };
        let parsed: NominatimResult = serde_json::from_value(first.clone())?;
        let latitude = parsed
            .lat
            .parse::<f64>()
            .map_err(|_| AppError::GeocodeUnresolved(query.to_string()))?;
        let longitude = parsed
            .lon
            .parse::<f64>()
            .map_err(|_| AppError::GeocodeUnresolved(query.to_string()))?;

        Ok(Some(GeocodeHit {
            latitude,
            longitude,
            display_name: parsed.display_name,
            raw_payload: Some(first),
        }))
    }

    fn source(&self) -> &str {
        "nominatim"
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Cache-first geocode lookups over the `geocode_cache` table.
///
/// Misses go to the external provider under a per-key single-flight lock, so
/// concurrent workers asking for the same place produce one upstream call.
/// No-match responses are cached too (negative caching) and keep surfacing
/// as `GeocodeUnresolved` until the row expires.
pub struct GeocodeCache {
    pool: SqlitePool,
    geocoder: Arc<dyn Geocoder>,
    inflight: DashMap<String, Arc<Mutex<()>>>,
    ttl_secs: i64,
}

impl GeocodeCache {
    pub fn new(pool: SqlitePool, geocoder: Arc<dyn Geocoder>) -> Self {
        Self {
            pool,
            geocoder,
            inflight: DashMap::new(),
            ttl_secs: GEOCODE_CACHE_TTL_SECS,
        }
    }

    #[cfg(test)]
    fn with_ttl(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Resolve a location name to coordinates, cache-first.
    pub async fn lookup(&self, query: &str) -> Result<GeocodeLookup> {
        let key = normalize_query(query);
        if key.is_empty() {
            return Err(AppError::EmptyQuery);
        }

        if let Some(hit) = self.cached(&key).await? {
            return hit;
        }

        // Single-flight: one fetch per key, late arrivals re-check the cache.
        let lock = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(hit) = self.cached(&key).await? {
            self.inflight.remove(&key);
            return hit;
        }

        let result = self.fetch_and_store(&key).await;
        self.inflight.remove(&key);
        result
    }

    /// Fresh cache row for `key`, if any. Returns the lookup outcome wrapped
    /// so a cached no-match still short-circuits as `GeocodeUnresolved`.
    async fn cached(&self, key: &str) -> Result<Option<Result<GeocodeLookup>>> {
        let row = sqlx::query(
            "SELECT latitude, longitude, display_name, source, expires_at
             FROM geocode_cache WHERE query_normalized = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let expires_at: i64 = row.get("expires_at");
        if expires_at <= now_secs() {
            // Expired rows behave as misses; the refresh overwrites in place.
            return Ok(None);
        }

        sqlx::query(
            "UPDATE geocode_cache SET hit_count = hit_count + 1 WHERE query_normalized = ?",
        )
        .bind(key)
        .execute(&self.pool)
        .await?;

        let latitude: Option<f64> = row.get("latitude");
        let longitude: Option<f64> = row.get("longitude");
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => Ok(Some(Ok(GeocodeLookup {
                query_normalized: key.to_string(),
                latitude: lat,
                longitude: lon,
                display_name: row.get("display_name"),
                source: row.get("source"),
                from_cache: true,
            }))),
            // Negative entry: remembered no-match.
            _ => Ok(Some(Err(AppError::GeocodeUnresolved(key.to_string())))),
        }
    }

    async fn fetch_and_store(&self, key: &str) -> Result<GeocodeLookup> {
        let fetched = match self.geocoder.geocode(key).await {
            Ok(hit) => hit,
            Err(AppError::ExternalTimeout(what)) => {
                // Timeouts are not cached; the next run retries.
                warn!(query = key, "Geocoder timed out: {what}");
                return Err(AppError::GeocodeUnresolved(key.to_string()));
            }
            Err(AppError::Http(e)) => {
                warn!(query = key, "Geocoder request failed: {e}");
                return Err(AppError::GeocodeUnresolved(key.to_string()));
            }
            Err(e) => return Err(e),
        };

        let now = now_secs();
        let expires = now + self.ttl_secs;
        let source = self.geocoder.source().to_string();

        match fetched {
            Some(hit) => {
                // Refresh resets hit_count; the counter tracks the current entry.
                sqlx::query(
                    "INSERT INTO geocode_cache
                        (query_normalized, latitude, longitude, display_name, source,
                         raw_payload, fetched_at, expires_at, hit_count)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0)
                     ON CONFLICT(query_normalized) DO UPDATE SET
                        latitude = excluded.latitude,
                        longitude = excluded.longitude,
                        display_name = excluded.display_name,
                        source = excluded.source,
                        raw_payload = excluded.raw_payload,
                        fetched_at = excluded.fetched_at,
                        expires_at = excluded.expires_at,
                        hit_count = 0",
                )
                .bind(key)
                .bind(hit.latitude)
                .bind(hit.longitude)
                .bind(&hit.display_name)
                .bind(&source)
                .bind(hit.raw_payload.as_ref().map(|p| p.to_string()))
                .bind(now)
                .bind(expires)
                .execute(&self.pool)
                .await?;

                debug!(query = key, source = %source, "Geocoded and cached");
                Ok(GeocodeLookup {
                    query_normalized: key.to_string(),
                    latitude: hit.latitude,
                    longitude: hit.longitude,
                    display_name: hit.display_name,
                    source,
                    from_cache: false,
                })
            }
            None => {
                sqlx::query(
                    "INSERT INTO geocode_cache
                        (query_normalized, latitude, longitude, display_name, source,
                         raw_payload, fetched_at, expires_at, hit_count)
                     VALUES (?, NULL, NULL, NULL, ?, NULL, ?, ?, 0)
                     ON CONFLICT(query_normalized) DO UPDATE SET
                        latitude = NULL,
                        longitude = NULL,
                        display_name = NULL,
                        source = excluded.source,
                        raw_payload = NULL,
                        fetched_at = excluded.fetched_at,
                        expires_at = excluded.expires_at,
                        hit_count = 0",
                )
                .bind(key)
                .bind(&source)
                .bind(now)
                .bind(expires)
                .execute(&self.pool)
                .await?;

                debug!(query = key, "No geocode match, cached negative entry");
                Err(AppError::GeocodeUnresolved(key.to_string()))
            }
        }
    }
}
