pub mod extract;
pub mod heuristics;

use std::sync::Arc;

use tracing::debug;

use crate::config::{MAX_CANDIDATES_PER_MARKET, MIN_CANDIDATE_CONFIDENCE};
use crate::error::{AppError, Result};
use crate::index::PlaceIndex;
use crate::types::{
    EventVenueRecord, InferenceMethod, LocationCandidate, LocationType, PendingMarket,
    VenueStatus,
};

use extract::{EntityExtractor, RuleBasedExtractor};
use heuristics::{contains_word, detect_event, EventIntent, HeuristicRule};

/// How far the semantic pass looks into the index per query.
const SEMANTIC_TOP_K: usize = 5;

/// Explicit entity mentions are stronger evidence than whole-text similarity.
const MENTION_BOOST: f64 = 0.10;

fn type_prior(t: LocationType) -> f64 {
    match t {
        LocationType::City => 1.0,
        LocationType::State => 0.95,
        LocationType::Building | LocationType::Arena => 0.90,
        // Countries match too eagerly via demonyms; damp them below cities.
        LocationType::Country => 0.85,
        LocationType::Global => 0.50,
    }
}

/// Turns market text into ranked location candidates.
///
/// Resolution order per market: confirmed event venue short-circuits
/// everything, then heuristic rules and semantic index matches are merged
/// and deduplicated. Stateless across markets, safe to share between
/// worker tasks.
pub struct CandidateResolver {
    index: Arc<PlaceIndex>,
    rules: Vec<HeuristicRule>,
    extractor: Box<dyn EntityExtractor>,
}

impl CandidateResolver {
    pub fn new(index: Arc<PlaceIndex>, rules: Vec<HeuristicRule>) -> Self {
        Self {
            index,
            rules,
            extractor: Box::new(RuleBasedExtractor),
        }
    }

    pub fn with_extractor(mut self, extractor: Box<dyn EntityExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Recurring-event reference in the market text, if any. The caller uses
    /// this to consult the venue cache before resolving.
    pub fn event_intent(&self, market: &PendingMarket, default_year: i64) -> Option<EventIntent> {
        detect_event(&market.full_text().to_lowercase(), default_year)
    }

    /// Resolve a market into at most `MAX_CANDIDATES_PER_MARKET` candidates,
    /// best first. `venue` is the cached venue record for a detected event
    /// reference, when one exists.
    pub fn resolve(
        &self,
        market: &PendingMarket,
        venue: Option<&EventVenueRecord>,
    ) -> Result<Vec<LocationCandidate>> {
        let text = market.full_text();
        let text_lower = text.to_lowercase();

        // A confirmed venue answers the question outright.
        if let Some(record) = venue {
            if record.status == VenueStatus::Confirmed {
                if let Some(candidate) = venue_candidate(record) {
                    debug!(
                        condition_id = %market.condition_id,
                        event_key = %record.event_key,
                        "Confirmed venue short-circuits inference"
                    );
                    return Ok(vec![candidate]);
                }
            }
        }

        let mut candidates = Vec::new();

        // An uncertain venue competes at its stored confidence.
        if let Some(record) = venue {
            if record.status == VenueStatus::Uncertain {
                if let Some(candidate) = venue_candidate(record) {
                    candidates.push(candidate);
                }
            }
        }

        for rule in &self.rules {
            if contains_word(&text_lower, &rule.pattern) {
                candidates.push(LocationCandidate {
                    location_name: rule.location_name.clone(),
                    location_type: rule.location_type,
                    confidence: rule.confidence.clamp(0.0, 1.0),
                    reason: format!("matched '{}'", rule.pattern),
                    inference_method: InferenceMethod::Heuristic,
                    latitude: rule.latitude,
                    longitude: rule.longitude,
                    geocode_source: rule
                        .latitude
                        .and(rule.longitude)
                        .map(|_| "rules".to_string()),
                });
            }
        }

        candidates.extend(self.semantic_candidates(&text)?);

        let merged = merge_candidates(candidates);
        if merged.is_empty() {
            return Err(AppError::NoCandidates);
        }
        Ok(merged)
    }

    fn semantic_candidates(&self, text: &str) -> Result<Vec<LocationCandidate>> {
        let mut out = Vec::new();

        // Whole-text pass. An untokenizable text is fine here; heuristics or
        // the venue path may still have produced candidates.
        match self.index.resolve(text, SEMANTIC_TOP_K) {
            Ok(hits) => {
                for (place, score) in hits {
                    push_semantic(
                        &mut out,
                        place.name,
                        place.place_type,
                        score,
                        "index match on market text",
                        place.latitude,
                        place.longitude,
                        0.0,
                    );
                }
            }
            Err(AppError::EmptyQuery) => {}
            Err(e) => return Err(e),
        }

        for mention in self.extractor.extract(text) {
            match self.index.resolve(&mention.text, 3) {
                Ok(hits) => {
                    for (place, score) in hits {
                        push_semantic(
                            &mut out,
                            place.name,
                            place.place_type,
                            score,
                            &format!("index match on mention '{}'", mention.text),
                            place.latitude,
                            place.longitude,
                            MENTION_BOOST,
                        );
                    }
                }
                Err(AppError::EmptyQuery) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(out)
    }
}

#[allow(clippy::too_many_arguments)]
fn push_semantic(
    out: &mut Vec<LocationCandidate>,
    name: String,
    place_type: LocationType,
    score: f64,
    reason: &str,
    lat: f64,
    lon: f64,
    boost: f64,
) {
    let confidence = ((score * type_prior(place_type)) + boost).clamp(0.0, 1.0);
    if confidence < MIN_CANDIDATE_CONFIDENCE {
        return;
    }
    out.push(LocationCandidate {
        location_name: name,
        location_type: place_type,
        confidence,
        reason: reason.to_string(),
        inference_method: InferenceMethod::SemanticMatch,
        latitude: Some(lat),
        longitude: Some(lon),
        geocode_source: Some("index".to_string()),
    });
}

fn venue_candidate(record: &EventVenueRecord) -> Option<LocationCandidate> {
    let (name, location_type) = match (&record.venue_name, record.location_name()) {
        (Some(venue), _) => (venue.clone(), LocationType::Arena),
        (None, Some(city)) => (city, LocationType::City),
        (None, None) => return None,
    };
    Some(LocationCandidate {
        location_name: name,
        location_type,
        confidence: record.confidence.clamp(0.0, 1.0),
        reason: format!(
            "{} {} venue ({})",
            record.event_key, record.event_year, record.reason
        ),
        inference_method: InferenceMethod::ExternalModel,
        latitude: record.latitude,
        longitude: record.longitude,
        geocode_source: record
            .latitude
            .and(record.longitude)
            .map(|_| "event_venue".to_string()),
    })
}

/// Deduplicate by case-insensitive location name: keep the highest
/// confidence, concatenate distinct reasons, and prefer whichever variant
/// carries coordinates. Output is sorted best-first and truncated.
fn merge_candidates(candidates: Vec<LocationCandidate>) -> Vec<LocationCandidate> {
    let mut merged: Vec<LocationCandidate> = Vec::new();

    for candidate in candidates {
        let key = candidate.location_name.to_lowercase();
        match merged
            .iter_mut()
            .find(|c| c.location_name.to_lowercase() == key)
        {
            Some(existing) => {
                if candidate.confidence > existing.confidence {
                    existing.confidence = candidate.confidence;
                    existing.inference_method = candidate.inference_method;
                    existing.location_type = candidate.location_type;
                }
                if !existing.reason.contains(&candidate.reason) {
                    existing.reason = format!("{}; {}", existing.reason, candidate.reason);
                }
                if !existing.geocoded() && candidate.geocoded() {
                    existing.latitude = candidate.latitude;
                    existing.longitude = candidate.longitude;
                    existing.geocode_source = candidate.geocode_source;
                }
            }
            None => merged.push(candidate),
        }
    }

    merged.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.location_name.cmp(&b.location_name))
    });
    merged.truncate(MAX_CANDIDATES_PER_MARKET);
    merged
}
