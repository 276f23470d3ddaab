use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Utc};
use futures_util::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::cache::{EventVenueCache, GeocodeCache};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::fetcher;
use crate::resolver::CandidateResolver;
use crate::runs::RunTracker;
use crate::store::{LocationStore, UpsertOutcome};
use crate::types::{PendingMarket, RunCounters};

/// Orchestrates one pipeline run: ingest, infer, geocode, persist, finalize.
///
/// Per-market failures are counted and skipped; only infrastructure errors
/// (index, database) abort a run. All shared pieces are immutable or
/// internally synchronized, so per-market work fans out freely.
pub struct Pipeline {
    cfg: Config,
    store: LocationStore,
    resolver: Arc<CandidateResolver>,
    geocode: Arc<GeocodeCache>,
    venues: Arc<EventVenueCache>,
    runs: RunTracker,
}

impl Pipeline {
    pub fn new(
        cfg: Config,
        store: LocationStore,
        resolver: Arc<CandidateResolver>,
        geocode: Arc<GeocodeCache>,
        venues: Arc<EventVenueCache>,
        runs: RunTracker,
    ) -> Self {
        Self { cfg, store, resolver, geocode, venues, runs }
    }

    /// Execute one full run, recording it in `pipeline_runs` either way.
    pub async fn run_once(&self) -> Result<()> {
        let run_id = self.runs.start(self.cfg.geo_version).await?;
        let mut counters = RunCounters::default();

        match self.execute(&mut counters).await {
            Ok(()) => self.runs.finish(run_id, &counters).await,
            Err(e) => {
                error!(run_id, "Pipeline run aborted: {e}");
                self.runs.fail(run_id, &counters, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn execute(&self, counters: &mut RunCounters) -> Result<()> {
        self.ingest(counters).await;

        let pending = self
            .store
            .unprocessed_markets(self.cfg.geo_version, self.cfg.batch_size)
            .await?;
        if pending.is_empty() {
            info!("No markets pending inference");
            return Ok(());
        }
        info!(pending = pending.len(), geo_version = self.cfg.geo_version, "Inferring locations");

        let mut results = stream::iter(pending)
            .map(|market| self.process_market(market))
            .buffer_unordered(self.cfg.worker_concurrency);

        while let Some(result) = results.next().await {
            match result {
                Ok(delta) => counters.merge(&delta),
                Err(e) if e.is_fatal_for_run() => return Err(e),
                Err(e) => {
                    warn!("Market processing failed: {e}");
                    counters.markets_failed += 1;
                    counters.markets_attempted += 1;
                }
            }
        }
        Ok(())
    }

    /// Fetch and upsert the latest markets. Ingest trouble degrades the run
    /// to backlog-only instead of aborting it.
    async fn ingest(&self, counters: &mut RunCounters) {
        let max = self.cfg.batch_size.max(0) as usize;
        match fetcher::fetch_markets(&self.cfg, max).await {
            Ok((markets, stats)) => {
                counters.markets_fetched += stats.qualified as i64;
                for market in &markets {
                    match self.store.upsert_market(market).await {
                        Ok(UpsertOutcome::Inserted(_)) => counters.markets_new += 1,
                        Ok(UpsertOutcome::Updated(_)) => counters.markets_updated += 1,
                        Err(e) => warn!(condition_id = %market.condition_id, "Upsert failed: {e}"),
                    }
                }
            }
            Err(e) => warn!("Ingest failed, processing existing backlog only: {e}"),
        }
    }

    /// Infer, geocode, and persist one market. Returns the counter delta;
    /// errors escape only when fatal for the whole run.
    async fn process_market(&self, market: PendingMarket) -> Result<RunCounters> {
        let mut delta = RunCounters { markets_attempted: 1, ..Default::default() };

        let venue = match self.resolver.event_intent(&market, i64::from(Utc::now().year())) {
            Some(intent) => {
                self.venues
                    .lookup(&intent.event_key, intent.event_year)
                    .await?
            }
            None => None,
        };

        let mut candidates = match self.resolver.resolve(&market, venue.as_ref()) {
            Ok(c) => c,
            Err(AppError::NoCandidates) => {
                // Non-fatal: the market stays unprocessed for this version
                // and is picked up again next run.
                debug!(condition_id = %market.condition_id, "No location candidates");
                return Ok(delta);
            }
            Err(e) if e.is_fatal_for_run() => return Err(e),
            Err(e) => {
                warn!(condition_id = %market.condition_id, "Inference failed: {e}");
                delta.markets_failed += 1;
                return Ok(delta);
            }
        };

        for candidate in &mut candidates {
            if candidate.geocoded() {
                delta.locations_geocoded += 1;
                continue;
            }
            match self.geocode.lookup(&candidate.location_name).await {
                Ok(lookup) => {
                    if lookup.from_cache {
                        delta.geocode_cache_hits += 1;
                    } else {
                        delta.geocode_cache_misses += 1;
                    }
                    candidate.latitude = Some(lookup.latitude);
                    candidate.longitude = Some(lookup.longitude);
                    candidate.geocode_source = Some(lookup.source);
                    delta.locations_geocoded += 1;
                }
                // Unresolvable names persist ungeocoded; the run goes on.
                Err(AppError::GeocodeUnresolved(_)) | Err(AppError::EmptyQuery) => {}
                Err(e) if e.is_fatal_for_run() => return Err(e),
                Err(e) => {
                    warn!(
                        condition_id = %market.condition_id,
                        location = %candidate.location_name,
                        "Geocode failed: {e}"
                    );
                }
            }
        }

        self.store
            .persist(market.market_id, self.cfg.geo_version, &candidates)
            .await?;

        delta.locations_inferred += candidates.len() as i64;
        for candidate in &candidates {
            delta.confidence_sum += candidate.confidence;
            delta.confidence_count += 1;
        }
        Ok(delta)
    }

    /// Scheduler loop: one run per interval, forever. Failed runs log and
    /// wait for the next tick.
    pub async fn run_forever(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.cfg.pipeline_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = self.run_once().await {
                error!("Scheduled pipeline run failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::geocode::tests::{test_pool, MockGeocoder};
    use crate::config::EMBED_DIM;
    use crate::index::seed::seed_places;
    use crate::index::PlaceIndex;
    use crate::resolver::heuristics;
    use crate::types::{EventVenueRecord, Market, VenueStatus};

    async fn pipeline_with(geocoder: Arc<MockGeocoder>) -> (Pipeline, LocationStore) {
        let pool = test_pool().await;
        let store = LocationStore::new(pool.clone());
        let index = Arc::new(PlaceIndex::build(seed_places(), EMBED_DIM));
        let resolver = Arc::new(CandidateResolver::new(index, heuristics::builtin_rules()));
        let cfg = Config {
            // The ingest stage hits this URL; pointing it at a closed port
            // makes ingest fail fast and the run proceed backlog-only.
            gamma_api_url: "http://127.0.0.1:9".to_string(),
            nominatim_url: "http://127.0.0.1:9".to_string(),
            log_level: "info".to_string(),
            db_path: ":memory:".to_string(),
            api_port: 0,
            index_dir: "unused".to_string(),
            heuristic_rules_path: None,
            geo_version: 1,
            batch_size: 100,
            worker_concurrency: 4,
            pipeline_interval_secs: 900,
        };
        let pipeline = Pipeline::new(
            cfg,
            store.clone(),
            resolver,
            Arc::new(GeocodeCache::new(pool.clone(), geocoder)),
            Arc::new(EventVenueCache::new(pool.clone())),
            RunTracker::new(pool),
        );
        (pipeline, store)
    }

    fn market(condition_id: &str, question: &str) -> Market {
        Market {
            condition_id: condition_id.to_string(),
            question: question.to_string(),
            description: None,
            market_slug: None,
            category: None,
            end_date_iso: None,
            active: true,
            closed: false,
            volume: None,
            liquidity: None,
            tags: Vec::new(),
            raw_payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn run_processes_backlog_end_to_end() {
        let (pipeline, store) = pipeline_with(Arc::new(MockGeocoder::hit(33.7, -84.4))).await;
        store.upsert_market(&market("0xhawks", "Will the Hawks win the title?")).await.unwrap();
        store.upsert_market(&market("0xbtc", "Will BTC close above 100k?")).await.unwrap();

        pipeline.run_once().await.unwrap();

        let best = store.best_location("0xhawks").await.unwrap().unwrap();
        assert_eq!(best.location_name, "Atlanta, GA");
        assert!(best.geocoded);

        // The signal-free market gets no rows and stays unprocessed.
        assert!(store.locations_for("0xbtc").await.unwrap().is_empty());
        let pending = store.unprocessed_markets(1, 10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].condition_id, "0xbtc");

        let runs = pipeline.runs.recent(1).await.unwrap();
        assert_eq!(runs[0].status, "completed");
        assert_eq!(runs[0].markets_attempted, 2);
        assert_eq!(runs[0].markets_failed, 0);
        assert!(runs[0].locations_inferred >= 1);
    }

    #[tokio::test]
    async fn confirmed_venue_drives_single_candidate() {
        let (pipeline, store) = pipeline_with(Arc::new(MockGeocoder::miss())).await;
        pipeline
            .venues
            .store(&EventVenueRecord {
                event_key: "oscars".to_string(),
                event_year: 2027,
                status: VenueStatus::Confirmed,
                venue_name: Some("Dolby Theatre".to_string()),
                city: Some("Los Angeles".to_string()),
                country: Some("United States".to_string()),
                latitude: Some(34.103),
                longitude: Some(-118.34),
                confidence: 0.95,
                reason: "official announcement".to_string(),
                source_url: None,
                source_type: Some("official".to_string()),
            })
            .await
            .unwrap();
        store
            .upsert_market(&market("0xoscars", "Who wins Best Picture at the 2027 Oscars?"))
            .await
            .unwrap();

        pipeline.run_once().await.unwrap();

        let rows = store.locations_for("0xoscars").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].location_name, "Dolby Theatre");
        assert!(rows[0].geocoded);
    }

    #[tokio::test]
    async fn unresolved_geocode_keeps_candidate_ungeocoded() {
        let (pipeline, store) = pipeline_with(Arc::new(MockGeocoder::miss())).await;
        store.upsert_market(&market("0xhawks", "Will the Hawks win it all?")).await.unwrap();

        pipeline.run_once().await.unwrap();

        let rows = store.locations_for("0xhawks").await.unwrap();
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|r| !r.geocoded));
        // Ungeocoded rows never surface as "best".
        assert!(store.best_location("0xhawks").await.unwrap().is_none());

        let runs = pipeline.runs.recent(1).await.unwrap();
        assert_eq!(runs[0].status, "completed");
    }

    #[tokio::test]
    async fn repeated_runs_are_idempotent() {
        let (pipeline, store) = pipeline_with(Arc::new(MockGeocoder::hit(33.7, -84.4))).await;
        store.upsert_market(&market("0xhawks", "Will the Hawks win?")).await.unwrap();

        pipeline.run_once().await.unwrap();
        let first = store.locations_for("0xhawks").await.unwrap();
        pipeline.run_once().await.unwrap();
        let second = store.locations_for("0xhawks").await.unwrap();
        assert_eq!(first.len(), second.len());

        // Second run found nothing pending.
        let runs = pipeline.runs.recent(2).await.unwrap();
        assert_eq!(runs[0].markets_attempted, 0);
    }
}
