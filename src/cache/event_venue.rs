use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::debug;

use crate::config::EVENT_VENUE_TTL_SECS;
use crate::error::Result;
use crate::types::{now_secs, EventVenueRecord, VenueStatus};

/// Venue answers for recurring events, keyed by (event_key, event_year).
///
/// Unlike the geocode cache this stores a tri-state answer: a venue can be
/// confirmed, uncertain, or known-unannounced, and "unannounced" is itself
/// worth remembering so every run does not re-ask. Expiry is checked at
/// read time; expired rows read as misses and are overwritten in place.
pub struct EventVenueCache {
    pool: SqlitePool,
    ttl_secs: i64,
}

impl EventVenueCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, ttl_secs: EVENT_VENUE_TTL_SECS }
    }

    #[cfg(test)]
    fn with_ttl(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Fresh cached record, or None on miss/expiry.
    pub async fn lookup(&self, event_key: &str, event_year: i64) -> Result<Option<EventVenueRecord>> {
        let row = sqlx::query(
            "SELECT status, venue_name, city, country, latitude, longitude,
                    confidence, reason, source_url, source_type, expires_at
             FROM event_venue_cache WHERE event_key = ? AND event_year = ?",
        )
        .bind(event_key)
        .bind(event_year)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let expires_at: i64 = row.get("expires_at");
        if expires_at <= now_secs() {
            return Ok(None);
        }

        let status: String = row.get("status");
        let reason: Option<String> = row.get("reason");
        Ok(Some(EventVenueRecord {
            event_key: event_key.to_string(),
            event_year,
            status: VenueStatus::parse(&status),
            venue_name: row.get("venue_name"),
            city: row.get("city"),
            country: row.get("country"),
            latitude: row.get("latitude"),
            longitude: row.get("longitude"),
            confidence: row.get("confidence"),
            reason: reason.unwrap_or_default(),
            source_url: row.get("source_url"),
            source_type: row.get("source_type"),
        }))
    }

    /// Upsert a venue record with a fresh TTL window.
    pub async fn store(&self, record: &EventVenueRecord) -> Result<()> {
        let now = now_secs();
        sqlx::query(
            "INSERT INTO event_venue_cache
                (event_key, event_year, status, venue_name, city, country,
                 latitude, longitude, confidence, reason, source_url, source_type,
                 fetched_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(event_key, event_year) DO UPDATE SET
                status = excluded.status,
                venue_name = excluded.venue_name,
                city = excluded.city,
                country = excluded.country,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                confidence = excluded.confidence,
                reason = excluded.reason,
                source_url = excluded.source_url,
                source_type = excluded.source_type,
                fetched_at = excluded.fetched_at,
                expires_at = excluded.expires_at",
        )
        .bind(&record.event_key)
        .bind(record.event_year)
        .bind(record.status.as_str())
        .bind(&record.venue_name)
        .bind(&record.city)
        .bind(&record.country)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(record.confidence)
        .bind(&record.reason)
        .bind(&record.source_url)
        .bind(&record.source_type)
        .bind(now)
        .bind(now + self.ttl_secs)
        .execute(&self.pool)
        .await?;

        debug!(
            event_key = %record.event_key,
            event_year = record.event_year,
            status = %record.status,
            "Stored event venue record"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::geocode::tests::test_pool;

    fn record(status: VenueStatus) -> EventVenueRecord {
        EventVenueRecord {
            event_key: "oscars".to_string(),
            event_year: 2026,
            status,
            venue_name: Some("Dolby Theatre".to_string()),
            city: Some("Los Angeles".to_string()),
            country: Some("United States".to_string()),
            latitude: Some(34.103),
            longitude: Some(-118.34),
            confidence: 0.95,
            reason: "official announcement".to_string(),
            source_url: Some("https://example.com/press".to_string()),
            source_type: Some("official".to_string()),
        }
    }

    #[tokio::test]
    async fn store_and_lookup_round_trip() {
        let cache = EventVenueCache::new(test_pool().await);
        cache.store(&record(VenueStatus::Confirmed)).await.unwrap();

        let found = cache.lookup("oscars", 2026).await.unwrap().unwrap();
        assert_eq!(found.status, VenueStatus::Confirmed);
        assert_eq!(found.venue_name.as_deref(), Some("Dolby Theatre"));
        assert_eq!(found.location_name().as_deref(), Some("Los Angeles, United States"));
    }

    #[tokio::test]
    async fn miss_on_unknown_key_or_year() {
        let cache = EventVenueCache::new(test_pool().await);
        cache.store(&record(VenueStatus::Confirmed)).await.unwrap();

        assert!(cache.lookup("grammys", 2026).await.unwrap().is_none());
        assert!(cache.lookup("oscars", 2027).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_row_reads_as_miss() {
        let cache = EventVenueCache::new(test_pool().await).with_ttl(-1);
        cache.store(&record(VenueStatus::Confirmed)).await.unwrap();
        assert!(cache.lookup("oscars", 2026).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn not_available_is_a_cacheable_answer() {
        let cache = EventVenueCache::new(test_pool().await);
        let mut rec = record(VenueStatus::NotAvailable);
        rec.venue_name = None;
        rec.city = None;
        rec.country = None;
        rec.latitude = None;
        rec.longitude = None;
        rec.confidence = 0.0;
        rec.reason = "venue not announced".to_string();
        cache.store(&rec).await.unwrap();

        let found = cache.lookup("oscars", 2026).await.unwrap().unwrap();
        assert_eq!(found.status, VenueStatus::NotAvailable);
        assert!(found.location_name().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_in_place() {
        let cache = EventVenueCache::new(test_pool().await);
        let mut rec = record(VenueStatus::Uncertain);
        rec.confidence = 0.4;
        cache.store(&rec).await.unwrap();
        cache.store(&record(VenueStatus::Confirmed)).await.unwrap();

        let found = cache.lookup("oscars", 2026).await.unwrap().unwrap();
        assert_eq!(found.status, VenueStatus::Confirmed);
        assert!((found.confidence - 0.95).abs() < 1e-9);
    }
}
