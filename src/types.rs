use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

/// A prediction market as parsed from the Gamma API. `condition_id` is the
/// immutable external identifier; everything else may change between fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub condition_id: String,
    pub question: String,
    pub description: Option<String>,
    pub market_slug: Option<String>,
    pub category: Option<String>,
    pub end_date_iso: Option<String>,
    pub active: bool,
    pub closed: bool,
    pub volume: Option<f64>,
    pub liquidity: Option<f64>,
    pub tags: Vec<String>,
    /// Full raw API payload, persisted for reprocessing.
    pub raw_payload: serde_json::Value,
}

/// The slice of a market the resolver needs: id, db row id, and text.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingMarket {
    pub market_id: i64,
    pub condition_id: String,
    pub question: String,
    pub description: Option<String>,
}

impl PendingMarket {
    /// Question plus description, the text inference runs over.
    pub fn full_text(&self) -> String {
        match &self.description {
            Some(d) if !d.is_empty() => format!("{} {}", self.question, d),
            _ => self.question.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Location enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationType {
    City,
    State,
    Country,
    Building,
    Arena,
    Global,
}

impl LocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationType::City => "city",
            LocationType::State => "state",
            LocationType::Country => "country",
            LocationType::Building => "building",
            LocationType::Arena => "arena",
            LocationType::Global => "global",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "city" => LocationType::City,
            "state" => LocationType::State,
            "country" => LocationType::Country,
            "building" => LocationType::Building,
            "arena" => LocationType::Arena,
            _ => LocationType::Global,
        }
    }
}

impl std::fmt::Display for LocationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMethod {
    /// Semantic similarity against the place index.
    SemanticMatch,
    /// A heuristic rule fired (team → home city, institution → HQ, ...).
    Heuristic,
    /// Produced by an external model collaborator.
    ExternalModel,
    Manual,
}

impl InferenceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceMethod::SemanticMatch => "semantic_match",
            InferenceMethod::Heuristic => "heuristic",
            InferenceMethod::ExternalModel => "external_model",
            InferenceMethod::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "heuristic" => InferenceMethod::Heuristic,
            "external_model" => InferenceMethod::ExternalModel,
            "manual" => InferenceMethod::Manual,
            _ => InferenceMethod::SemanticMatch,
        }
    }
}

impl std::fmt::Display for InferenceMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// An inferred, not-yet-necessarily-geocoded location association for a market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationCandidate {
    pub location_name: String,
    pub location_type: LocationType,
    /// Certainty in [0,1]; validated again at persist time.
    pub confidence: f64,
    pub reason: String,
    pub inference_method: InferenceMethod,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub geocode_source: Option<String>,
}

impl LocationCandidate {
    pub fn geocoded(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }
}

// ---------------------------------------------------------------------------
// Entity mentions (entity-extractor collaborator output)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMention {
    pub text: String,
    /// Extractor label, e.g. "place", "organization", "facility".
    pub label: String,
}

// ---------------------------------------------------------------------------
// Geocoding
// ---------------------------------------------------------------------------

/// Result of a geocode cache lookup. Coordinates are always present; a
/// no-match surfaces as `AppError::GeocodeUnresolved` instead.
#[derive(Debug, Clone)]
pub struct GeocodeLookup {
    pub query_normalized: String,
    pub latitude: f64,
    pub longitude: f64,
    pub display_name: Option<String>,
    pub source: String,
    pub from_cache: bool,
}

// ---------------------------------------------------------------------------
// Event venues
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueStatus {
    /// Venue publicly confirmed: emit a single high-confidence candidate.
    Confirmed,
    /// Venue likely but unconfirmed: include among other candidates.
    Uncertain,
    /// Venue not announced: fall back to semantic/heuristic resolution.
    NotAvailable,
}

impl VenueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueStatus::Confirmed => "confirmed",
            VenueStatus::Uncertain => "uncertain",
            VenueStatus::NotAvailable => "not_available",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "confirmed" => VenueStatus::Confirmed,
            "uncertain" => VenueStatus::Uncertain,
            _ => VenueStatus::NotAvailable,
        }
    }
}

impl std::fmt::Display for VenueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct EventVenueRecord {
    pub event_key: String,
    pub event_year: i64,
    pub status: VenueStatus,
    pub venue_name: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub confidence: f64,
    pub reason: String,
    pub source_url: Option<String>,
    pub source_type: Option<String>,
}

impl EventVenueRecord {
    /// "City, Country" (or just city) for candidate naming.
    pub fn location_name(&self) -> Option<String> {
        let city = self.city.as_deref()?;
        Some(match self.country.as_deref() {
            Some(country) => format!("{city}, {country}"),
            None => city.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Run counters
// ---------------------------------------------------------------------------

/// Explicit per-run accumulator. Each per-market task returns a delta which
/// the orchestrator merges, with no ambient mutable state.
#[derive(Debug, Clone, Default)]
pub struct RunCounters {
    pub markets_fetched: i64,
    pub markets_new: i64,
    pub markets_updated: i64,
    pub markets_failed: i64,
    pub markets_attempted: i64,
    pub locations_inferred: i64,
    pub locations_geocoded: i64,
    pub geocode_cache_hits: i64,
    pub geocode_cache_misses: i64,
    /// Sum/count of persisted candidate confidences; the average is computed
    /// once at finalization.
    pub confidence_sum: f64,
    pub confidence_count: i64,
}

impl RunCounters {
    pub fn merge(&mut self, other: &RunCounters) {
        self.markets_fetched += other.markets_fetched;
        self.markets_new += other.markets_new;
        self.markets_updated += other.markets_updated;
        self.markets_failed += other.markets_failed;
        self.markets_attempted += other.markets_attempted;
        self.locations_inferred += other.locations_inferred;
        self.locations_geocoded += other.locations_geocoded;
        self.geocode_cache_hits += other.geocode_cache_hits;
        self.geocode_cache_misses += other.geocode_cache_misses;
        self.confidence_sum += other.confidence_sum;
        self.confidence_count += other.confidence_count;
    }

    pub fn avg_confidence(&self) -> Option<f64> {
        if self.confidence_count > 0 {
            Some(self.confidence_sum / self.confidence_count as f64)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
