use crate::types::LocationType;

use super::place_index::PlaceRecord;

fn place(
    id: &str,
    name: &str,
    place_type: LocationType,
    lat: f64,
    lon: f64,
    aliases: &[&str],
    importance: f64,
) -> PlaceRecord {
    PlaceRecord {
        place_id: id.to_string(),
        name: name.to_string(),
        place_type,
        latitude: lat,
        longitude: lon,
        aliases: aliases.iter().map(|s| s.to_string()).collect(),
        importance,
    }
}

/// Built-in seed gazetteer: countries (with demonyms), capitals, major US
/// cities, and a few landmark venues. Enough to bootstrap an index artifact
/// when no externally-built one is provided.
pub fn seed_places() -> Vec<PlaceRecord> {
    use LocationType::*;
    vec![
        // US cities
        place("us-atl", "Atlanta, GA", City, 33.749, -84.388, &["atlanta", "atl"], 0.80),
        place("us-nyc", "New York, NY", City, 40.713, -74.006, &["new york", "nyc", "manhattan", "brooklyn"], 0.98),
        place("us-lax", "Los Angeles, CA", City, 34.052, -118.244, &["los angeles", "la", "hollywood"], 0.95),
        place("us-chi", "Chicago, IL", City, 41.878, -87.630, &["chicago"], 0.90),
        place("us-hou", "Houston, TX", City, 29.760, -95.370, &["houston"], 0.82),
        place("us-phi", "Philadelphia, PA", City, 39.953, -75.165, &["philadelphia", "philly"], 0.80),
        place("us-sfo", "San Francisco, CA", City, 37.775, -122.419, &["san francisco", "sf", "bay area"], 0.90),
        place("us-sea", "Seattle, WA", City, 47.606, -122.332, &["seattle"], 0.80),
        place("us-bos", "Boston, MA", City, 42.360, -71.059, &["boston"], 0.82),
        place("us-mia", "Miami, FL", City, 25.762, -80.192, &["miami"], 0.82),
        place("us-dal", "Dallas, TX", City, 32.777, -96.797, &["dallas"], 0.78),
        place("us-den", "Denver, CO", City, 39.739, -104.990, &["denver"], 0.75),
        place("us-lv", "Las Vegas, NV", City, 36.170, -115.140, &["las vegas", "vegas"], 0.80),
        place("us-dc", "Washington, DC", City, 38.907, -77.037, &["washington", "dc", "district of columbia"], 0.95),
        place("us-nol", "New Orleans, LA", City, 29.951, -90.072, &["new orleans"], 0.72),
        // US states
        place("us-ca", "California", State, 36.778, -119.418, &["california", "californian"], 0.85),
        place("us-tx", "Texas", State, 31.969, -99.902, &["texas", "texan"], 0.82),
        place("us-fl", "Florida", State, 27.665, -81.516, &["florida", "floridian"], 0.80),
        place("us-ga", "Georgia", State, 32.166, -82.900, &["georgia"], 0.70),
        // Countries + demonyms + capitals
        place("us", "United States", Country, 37.090, -95.713, &["united states", "usa", "us", "america", "american"], 0.99),
        place("uk", "United Kingdom", Country, 55.378, -3.436, &["united kingdom", "uk", "britain", "british"], 0.92),
        place("uk-lon", "London, United Kingdom", City, 51.507, -0.128, &["london"], 0.95),
        place("fr", "France", Country, 46.228, 2.214, &["france", "french"], 0.90),
        place("fr-par", "Paris, France", City, 48.857, 2.352, &["paris"], 0.93),
        place("de", "Germany", Country, 51.166, 10.452, &["germany", "german"], 0.90),
        place("de-ber", "Berlin, Germany", City, 52.520, 13.405, &["berlin"], 0.85),
        place("it", "Italy", Country, 41.872, 12.567, &["italy", "italian"], 0.85),
        place("es", "Spain", Country, 40.464, -3.749, &["spain", "spanish"], 0.85),
        place("es-mad", "Madrid, Spain", City, 40.417, -3.704, &["madrid"], 0.80),
        place("jp", "Japan", Country, 36.205, 138.253, &["japan", "japanese"], 0.90),
        place("jp-tok", "Tokyo, Japan", City, 35.677, 139.650, &["tokyo"], 0.92),
        place("cn", "China", Country, 35.861, 104.195, &["china", "chinese"], 0.92),
        place("cn-bei", "Beijing, China", City, 39.904, 116.407, &["beijing"], 0.88),
        place("in", "India", Country, 20.594, 78.963, &["india", "indian"], 0.90),
        place("in-del", "New Delhi, India", City, 28.614, 77.209, &["new delhi", "delhi"], 0.85),
        place("ru", "Russia", Country, 61.524, 105.319, &["russia", "russian"], 0.88),
        place("ru-mos", "Moscow, Russia", City, 55.756, 37.617, &["moscow"], 0.85),
        place("ua", "Ukraine", Country, 48.379, 31.166, &["ukraine", "ukrainian"], 0.80),
        place("ua-kyi", "Kyiv, Ukraine", City, 50.450, 30.523, &["kyiv", "kiev"], 0.78),
        place("ca", "Canada", Country, 56.130, -106.347, &["canada", "canadian"], 0.85),
        place("ca-tor", "Toronto, ON, Canada", City, 43.651, -79.383, &["toronto"], 0.80),
        place("ca-ott", "Ottawa, Canada", City, 45.421, -75.697, &["ottawa"], 0.70),
        place("br", "Brazil", Country, -14.235, -51.925, &["brazil", "brazilian"], 0.85),
        place("mx", "Mexico", Country, 23.635, -102.553, &["mexico", "mexican"], 0.82),
        place("au", "Australia", Country, -25.274, 133.775, &["australia", "australian", "aussie"], 0.82),
        place("il", "Israel", Country, 31.046, 34.852, &["israel", "israeli"], 0.78),
        place("il-jer", "Jerusalem, Israel", City, 31.769, 35.216, &["jerusalem"], 0.72),
        place("ir", "Iran", Country, 32.428, 53.688, &["iran", "iranian"], 0.76),
        place("kr", "South Korea", Country, 35.908, 127.767, &["south korea", "korean"], 0.80),
        place("kp", "North Korea", Country, 40.340, 127.510, &["north korea", "pyongyang"], 0.70),
        place("ch", "Switzerland", Country, 46.818, 8.228, &["switzerland", "swiss", "geneva", "zurich"], 0.75),
        place("be-bru", "Brussels, Belgium", City, 50.850, 4.352, &["brussels"], 0.72),
        place("gr", "Greece", Country, 39.074, 21.824, &["greece", "greek", "athens"], 0.70),
        place("tr", "Turkey", Country, 38.964, 35.243, &["turkey", "turkish", "ankara", "istanbul"], 0.75),
        // Landmark venues
        place("v-mal", "Mar-a-Lago, Palm Beach, FL", Building, 26.677, -80.037, &["mar-a-lago", "mar a lago", "palm beach"], 0.60),
        place("v-wh", "White House, Washington, DC", Building, 38.898, -77.037, &["white house"], 0.70),
        place("v-kre", "Kremlin, Moscow, Russia", Building, 55.752, 37.618, &["kremlin"], 0.60),
        place("v-msg", "Madison Square Garden, New York, NY", Arena, 40.751, -73.994, &["madison square garden", "msg"], 0.55),
        place("v-dol", "Dolby Theatre, Los Angeles, CA", Arena, 34.103, -118.340, &["dolby theatre", "dolby theater"], 0.50),
        place("v-wem", "Wembley Stadium, London, United Kingdom", Arena, 51.556, -0.280, &["wembley"], 0.55),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_ids_are_unique() {
        let places = seed_places();
        let mut ids: Vec<_> = places.iter().map(|p| p.place_id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), places.len());
    }

    #[test]
    fn importance_is_bounded() {
        for p in seed_places() {
            assert!((0.0..=1.0).contains(&p.importance), "{}", p.place_id);
        }
    }
}
