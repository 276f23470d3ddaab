use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AppError, Result};
use crate::index::embedder::{cosine, tokenize, Embedder};
use crate::types::LocationType;

/// A canonical place in the reference index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceRecord {
    pub place_id: String,
    /// Human-readable canonical name, e.g. "Atlanta, GA".
    pub name: String,
    pub place_type: LocationType,
    pub latitude: f64,
    pub longitude: f64,
    /// Surface forms that should match this place ("atl", "georgian", ...).
    pub aliases: Vec<String>,
    /// Population/importance weight in [0,1], used as a tie-break.
    pub importance: f64,
}

impl PlaceRecord {
    fn searchable_text(&self) -> String {
        if self.aliases.is_empty() {
            self.name.clone()
        } else {
            format!("{} {}", self.name, self.aliases.join(" "))
        }
    }
}

/// On-disk artifact: records paired with their embedding vectors, loadable
/// without re-computing embeddings.
#[derive(Debug, Serialize, Deserialize)]
struct IndexArtifact {
    dim: usize,
    records: Vec<PlaceRecord>,
    vectors: Vec<Vec<f32>>,
}

const ARTIFACT_FILE: &str = "place_index.json";

/// Semantic index over canonical places. Read-only after load; one loaded
/// instance is held for the duration of a pipeline run.
#[derive(Debug)]
pub struct PlaceIndex {
    embedder: Embedder,
    records: Vec<PlaceRecord>,
    vectors: Vec<Vec<f32>>,
    /// Token sets per record, derived from searchable text at load time.
    /// A record only scores against a query it shares a token with, which
    /// keeps hash-bucket collisions out of the ranking.
    tokens: Vec<HashSet<String>>,
}

fn token_sets(records: &[PlaceRecord]) -> Vec<HashSet<String>> {
    records
        .iter()
        .map(|r| tokenize(&r.searchable_text()).into_iter().collect())
        .collect()
}

impl PlaceIndex {
    /// Build an index in memory by embedding each record's searchable text.
    pub fn build(records: Vec<PlaceRecord>, dim: usize) -> Self {
        let embedder = Embedder::new(dim);
        let texts: Vec<String> = records.iter().map(|r| r.searchable_text()).collect();
        let vectors = embedder.embed_many(&texts);
        let tokens = token_sets(&records);
        Self { embedder, records, vectors, tokens }
    }

    /// Load a previously-saved artifact. Missing or corrupt artifacts are
    /// `IndexUnavailable`; the run cannot proceed without an index.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(ARTIFACT_FILE);
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| AppError::IndexUnavailable(format!("{}: {e}", path.display())))?;
        let artifact: IndexArtifact = serde_json::from_str(&raw)
            .map_err(|e| AppError::IndexUnavailable(format!("corrupt artifact: {e}")))?;

        if artifact.records.len() != artifact.vectors.len()
            || artifact.vectors.iter().any(|v| v.len() != artifact.dim)
        {
            return Err(AppError::IndexUnavailable(
                "artifact record/vector shape mismatch".to_string(),
            ));
        }

        let tokens = token_sets(&artifact.records);
        Ok(Self {
            embedder: Embedder::new(artifact.dim),
            records: artifact.records,
            vectors: artifact.vectors,
            tokens,
        })
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(ARTIFACT_FILE);
        let artifact = IndexArtifact {
            dim: self.embedder.dim(),
            records: self.records.clone(),
            vectors: self.vectors.clone(),
        };
        std::fs::write(&path, serde_json::to_vec(&artifact)?)?;
        Ok(path)
    }

    /// Load the artifact if present, otherwise build from `seed`, persist,
    /// and return the fresh index.
    pub fn load_or_build(dir: &Path, seed: Vec<PlaceRecord>, dim: usize) -> Result<Self> {
        match Self::load(dir) {
            Ok(index) => Ok(index),
            Err(AppError::IndexUnavailable(_)) => {
                let index = Self::build(seed, dim);
                let path = index.save(dir)?;
                info!(records = index.records.len(), "Built place index artifact at {}", path.display());
                Ok(index)
            }
            Err(e) => Err(e),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Top-k places by cosine similarity to `text`.
    ///
    /// Deterministic for a fixed artifact: ties break by descending
    /// importance, then canonical name. Similarity is cosine in [-1, 1].
    pub fn resolve(&self, text: &str, k: usize) -> Result<Vec<(PlaceRecord, f64)>> {
        if text.trim().is_empty() {
            return Err(AppError::EmptyQuery);
        }
        let query_tokens: HashSet<String> = tokenize(text).into_iter().collect();
        if query_tokens.is_empty() {
            // Nothing tokenizable (punctuation only) behaves like empty input.
            return Err(AppError::EmptyQuery);
        }
        let query = self.embedder.embed(text);

        let mut scored: Vec<(usize, f64)> = self
            .vectors
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.tokens[*i].is_disjoint(&query_tokens))
            .map(|(i, v)| (i, cosine(&query, v) as f64))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ra = &self.records[a.0];
                    let rb = &self.records[b.0];
                    rb.importance
                        .partial_cmp(&ra.importance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| ra.name.cmp(&rb.name))
                })
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(i, score)| (self.records[i].clone(), score))
            .collect())
    }
}
