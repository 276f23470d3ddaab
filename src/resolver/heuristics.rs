use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::LocationType;

// ---------------------------------------------------------------------------
// Heuristic rules
// ---------------------------------------------------------------------------

/// A static mapping from a known non-geographic surface form (sports
/// franchise, institution, landmark) to a location. Loaded once per run as
/// immutable configuration, never derived at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicRule {
    /// Lowercase surface form matched on word boundaries.
    pub pattern: String,
    pub location_name: String,
    pub location_type: LocationType,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Confidence assigned when the rule fires.
    pub confidence: f64,
}

fn rule(pattern: &str, name: &str, t: LocationType, confidence: f64) -> HeuristicRule {
    HeuristicRule {
        pattern: pattern.to_string(),
        location_name: name.to_string(),
        location_type: t,
        latitude: None,
        longitude: None,
        confidence,
    }
}

fn pinned(pattern: &str, name: &str, t: LocationType, lat: f64, lon: f64, confidence: f64) -> HeuristicRule {
    HeuristicRule {
        latitude: Some(lat),
        longitude: Some(lon),
        ..rule(pattern, name, t, confidence)
    }
}

/// Built-in rule table: major-league franchises, institutions, and landmark
/// buildings with known coordinates.
pub fn builtin_rules() -> Vec<HeuristicRule> {
    use LocationType::*;
    let mut rules = Vec::new();

    // Sports franchises → home city
    for (pattern, city) in [
        ("hawks", "Atlanta, GA"),
        ("celtics", "Boston, MA"),
        ("knicks", "New York, NY"),
        ("lakers", "Los Angeles, CA"),
        ("warriors", "San Francisco, CA"),
        ("bulls", "Chicago, IL"),
        ("heat", "Miami, FL"),
        ("76ers", "Philadelphia, PA"),
        ("mavericks", "Dallas, TX"),
        ("nuggets", "Denver, CO"),
        ("falcons", "Atlanta, GA"),
        ("cowboys", "Dallas, TX"),
        ("packers", "Green Bay, WI"),
        ("chiefs", "Kansas City, MO"),
        ("eagles", "Philadelphia, PA"),
        ("49ers", "San Francisco, CA"),
        ("braves", "Atlanta, GA"),
        ("yankees", "New York, NY"),
        ("mets", "New York, NY"),
        ("dodgers", "Los Angeles, CA"),
        ("red sox", "Boston, MA"),
        ("cubs", "Chicago, IL"),
        ("astros", "Houston, TX"),
    ] {
        rules.push(rule(pattern, city, City, 0.82));
    }

    // Football clubs
    for (pattern, city) in [
        ("manchester united", "Manchester, United Kingdom"),
        ("manchester city", "Manchester, United Kingdom"),
        ("liverpool", "Liverpool, United Kingdom"),
        ("arsenal", "London, United Kingdom"),
        ("chelsea", "London, United Kingdom"),
        ("real madrid", "Madrid, Spain"),
        ("barcelona", "Barcelona, Spain"),
        ("bayern munich", "Munich, Germany"),
        ("psg", "Paris, France"),
    ] {
        rules.push(rule(pattern, city, City, 0.80));
    }

    // Institutions → headquarters
    for (pattern, name) in [
        ("federal reserve", "Washington, DC"),
        ("fomc", "Washington, DC"),
        ("congress", "Washington, DC"),
        ("senate", "Washington, DC"),
        ("supreme court", "Washington, DC"),
        ("scotus", "Washington, DC"),
        ("pentagon", "Arlington, VA"),
        ("fda", "Silver Spring, MD"),
        ("ecb", "Frankfurt, Germany"),
        ("bank of england", "London, United Kingdom"),
        ("united nations", "New York, NY"),
        ("nato", "Brussels, Belgium"),
        ("european union", "Brussels, Belgium"),
    ] {
        rules.push(rule(pattern, name, Building, 0.68));
    }

    // Landmark buildings with fixed coordinates
    rules.push(pinned("mar-a-lago", "Palm Beach, FL", Building, 26.6774, -80.0368, 0.90));
    rules.push(pinned("mar a lago", "Palm Beach, FL", Building, 26.6774, -80.0368, 0.90));
    rules.push(pinned("white house", "Washington, DC", Building, 38.8977, -77.0365, 0.90));
    rules.push(pinned("kremlin", "Moscow, Russia", Building, 55.7520, 37.6175, 0.90));
    rules.push(pinned("downing street", "London, United Kingdom", Building, 51.5034, -0.1276, 0.90));
    rules.push(pinned("wall street", "New York, NY", Building, 40.7060, -74.0088, 0.85));

    rules
}

/// Load rules from a JSON file, falling back to the built-in table when no
/// path is configured.
pub fn load_rules(path: Option<&str>) -> Result<Vec<HeuristicRule>> {
    match path {
        Some(p) => {
            let raw = std::fs::read_to_string(p)?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(builtin_rules()),
    }
}

/// Word-boundary containment check on pre-lowercased text. Avoids matching
/// "us" inside "houston".
pub fn contains_word(text_lower: &str, pattern: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = text_lower[start..].find(pattern) {
        let abs = start + pos;
        let end = abs + pattern.len();
        let left_ok = abs == 0
            || !text_lower[..abs]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let right_ok = end == text_lower.len()
            || !text_lower[end..].chars().next().is_some_and(|c| c.is_alphanumeric());
        if left_ok && right_ok {
            return true;
        }
        start = abs + pattern.len().max(1);
        if start >= text_lower.len() {
            break;
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Event detection
// ---------------------------------------------------------------------------

/// A recurring event mentioned in market text, keyed for the venue cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventIntent {
    pub event_key: String,
    pub event_year: i64,
}

const EVENT_PATTERNS: &[(&str, &[&str])] = &[
    ("oscars", &["oscars", "academy awards"]),
    ("grammys", &["grammys", "grammy awards"]),
    ("golden_globes", &["golden globes", "golden globe awards"]),
    ("emmys", &["emmys", "emmy awards"]),
    ("cannes", &["cannes", "palme d'or"]),
    ("met_gala", &["met gala"]),
    ("super_bowl", &["super bowl"]),
    ("world_cup", &["world cup", "fifa world cup"]),
    ("olympics", &["olympics", "olympic games"]),
];

/// Detect a recurring event reference and its year. Without an explicit year
/// in the text, `default_year` (normally the current year) is used.
pub fn detect_event(text_lower: &str, default_year: i64) -> Option<EventIntent> {
    for (key, aliases) in EVENT_PATTERNS {
        if aliases.iter().any(|a| text_lower.contains(a)) {
            return Some(EventIntent {
                event_key: key.to_string(),
                event_year: extract_year(text_lower).unwrap_or(default_year),
            });
        }
    }
    None
}

/// First 4-digit year of the form 20xx in the text.
pub fn extract_year(text: &str) -> Option<i64> {
    let bytes = text.as_bytes();
    for i in 0..bytes.len().saturating_sub(3) {
        if bytes[i] == b'2' && bytes[i + 1] == b'0' {
            // get() rather than slicing: i+4 may land inside a multibyte char.
            let Some(window) = text.get(i..i + 4) else { continue };
            if window.chars().all(|c| c.is_ascii_digit()) {
                let left_ok = i == 0 || !bytes[i - 1].is_ascii_digit();
                let right_ok = i + 4 == bytes.len() || !bytes[i + 4].is_ascii_digit();
                if left_ok && right_ok {
                    return window.parse().ok();
                }
            }
        }
    }
    None
}
