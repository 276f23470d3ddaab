use crate::types::EntityMention;

/// Pluggable entity-extractor collaborator. The default implementation is
/// rule-based; a model-backed extractor can be swapped in behind this trait.
pub trait EntityExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Vec<EntityMention>;
}

/// Capitalization-based extractor: runs of capitalized words that are not
/// sentence-initial stopwords become "place" mentions. Crude but cheap, and
/// the semantic index tolerates noisy mentions.
pub struct RuleBasedExtractor;

const STOPWORDS: &[&str] = &[
    "will", "the", "a", "an", "in", "on", "by", "at", "of", "for", "to", "and",
    "or", "is", "are", "be", "was", "were", "this", "that", "before", "after",
    "who", "what", "when", "where", "how", "yes", "no", "if", "than", "more",
];

fn is_stopword(word: &str) -> bool {
    let lower = word.to_lowercase();
    STOPWORDS.contains(&lower.as_str())
}

fn is_capitalized(word: &str) -> bool {
    word.chars().next().is_some_and(|c| c.is_uppercase())
}

impl EntityExtractor for RuleBasedExtractor {
    fn extract(&self, text: &str) -> Vec<EntityMention> {
        let mut mentions = Vec::new();
        let mut current: Vec<&str> = Vec::new();

        let flush = |current: &mut Vec<&str>, mentions: &mut Vec<EntityMention>| {
            if !current.is_empty() {
                mentions.push(EntityMention {
                    text: current.join(" "),
                    label: "place".to_string(),
                });
                current.clear();
            }
        };

        for raw in text.split_whitespace() {
            let word: &str = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '-');
            if word.is_empty() {
                flush(&mut current, &mut mentions);
                continue;
            }
            if is_capitalized(word) && !is_stopword(word) {
                current.push(word);
            } else {
                flush(&mut current, &mut mentions);
            }
            // Sentence punctuation ends a phrase even mid-capitalization.
            if raw.ends_with(['.', '?', '!', ',', ';', ':']) {
                flush(&mut current, &mut mentions);
            }
        }
        flush(&mut current, &mut mentions);

        mentions.dedup_by(|a, b| a.text == b.text);
        mentions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_multiword_place_phrases() {
        let mentions = RuleBasedExtractor.extract("Will New York City ban e-bikes in 2026?");
        let texts: Vec<_> = mentions.iter().map(|m| m.text.as_str()).collect();
        assert!(texts.contains(&"New York City"), "{texts:?}");
    }

    #[test]
    fn sentence_initial_stopword_is_dropped() {
        let mentions = RuleBasedExtractor.extract("Will it rain tomorrow?");
        assert!(mentions.is_empty(), "{mentions:?}");
    }

    #[test]
    fn punctuation_splits_phrases() {
        let mentions = RuleBasedExtractor.extract("Hawks vs Celtics, Atlanta hosting");
        let texts: Vec<_> = mentions.iter().map(|m| m.text.as_str()).collect();
        assert!(texts.contains(&"Celtics"));
        assert!(texts.contains(&"Atlanta"));
        assert!(!texts.iter().any(|t| t.contains("Celtics, Atlanta")));
    }
}
