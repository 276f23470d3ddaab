use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Deterministic offline text embedder.
///
/// Projects hashed tokens and token bigrams into a dense L2-normalized
/// vector. No model artifact or network needed, and the same text always
/// produces the same vector, so index builds are reproducible.
#[derive(Debug, Clone)]
pub struct Embedder {
    dim: usize,
}

impl Embedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dim];
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return vec;
        }

        for tok in &tokens {
            vec[bucket(tok, self.dim)] += 1.0;
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{}_{}", pair[0], pair[1]);
            vec[bucket(&bigram, self.dim)] += 0.7;
        }

        let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vec {
                *v /= norm;
            }
        }
        vec
    }

    pub fn embed_many(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Cosine similarity, clamped to [-1, 1].
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(-1.0, 1.0)
}

fn bucket(token: &str, dim: usize) -> usize {
    // DefaultHasher with default keys is stable within a toolchain, which is
    // enough: the artifact stores its vectors, queries re-embed per process.
    let mut h = DefaultHasher::new();
    token.hash(&mut h);
    (h.finish() as usize) % dim
}

/// Case-fold, strip punctuation, and emit both raw and lightly-stemmed tokens
/// so "elections" matches "election".
pub fn tokenize(text: &str) -> Vec<String> {
    let folded = text.to_lowercase().replace("u.s.a.", " usa ").replace("u.s.", " us ");
    let cleaned: String = folded
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();

    let mut out = Vec::new();
    for tok in cleaned.split_whitespace() {
        if let Some(stem) = stem(tok) {
            out.push(stem);
        }
        out.push(tok.to_string());
    }
    out
}

fn stem(tok: &str) -> Option<String> {
    if let Some(base) = tok.strip_suffix("ation") {
        return Some(base.to_string());
    }
    if tok.len() > 5 {
        if let Some(base) = tok.strip_suffix("ing") {
            return Some(base.to_string());
        }
    }
    if tok.len() > 4 {
        if let Some(base) = tok.strip_suffix('s') {
            return Some(base.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic_and_normalized() {
        let e = Embedder::new(64);
        let a = e.embed("Atlanta Georgia");
        let b = e.embed("Atlanta Georgia");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4, "norm={norm}");
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let e = Embedder::new(32);
        let v = e.embed("  ??!  ");
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn similar_text_scores_higher_than_unrelated() {
        let e = Embedder::new(256);
        let atlanta = e.embed("Atlanta, Georgia, United States");
        let query = e.embed("Atlanta");
        let tokyo = e.embed("Tokyo, Japan");
        assert!(cosine(&query, &atlanta) > cosine(&query, &tokyo));
    }

    #[test]
    fn cosine_bounds() {
        let e = Embedder::new(64);
        let a = e.embed("paris france");
        assert!((cosine(&a, &a) - 1.0).abs() < 1e-4);
        assert_eq!(cosine(&a, &vec![0.0; 64]), 0.0);
    }
}
