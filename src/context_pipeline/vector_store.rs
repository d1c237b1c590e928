//! In-memory nearest-neighbour index over embedded contexts — spec §4.6.
//!
//! Grounded on the teacher's `context::embeddings::VectorStore`
//! (`find_similar` via brute-force cosine similarity), trimmed to just what
//! the context pipeline and event semantic search need: no chunking, no
//! on-disk persistence.

use std::collections::HashMap;
use std::sync::RwLock;

struct Entry {
    vector: Vec<f32>,
    collection: String,
}

/// Thread-safe, brute-force cosine-similarity index keyed by document id.
pub struct VectorStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn upsert(&self, document_id: &str, collection: &str, vector: Vec<f32>) {
        self.entries.write().unwrap().insert(
            document_id.to_string(),
            Entry {
                vector,
                collection: collection.to_string(),
            },
        );
    }

    pub fn remove(&self, document_id: &str) {
        self.entries.write().unwrap().remove(document_id);
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top `limit` document ids in `collection` scoring at or above
    /// `threshold`, most similar first.
    pub fn search(&self, collection: &str, query: &[f32], threshold: f32, limit: usize) -> Vec<(String, f32)> {
        let entries = self.entries.read().unwrap();
        let mut scored: Vec<(String, f32)> = entries
            .iter()
            .filter(|(_, e)| e.collection == collection)
            .map(|(id, e)| (id.clone(), cosine_similarity(query, &e.vector)))
            .filter(|(_, score)| *score >= threshold)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }
}

impl Default for VectorStore {
    fn default() -> Self {
        Self::new()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
