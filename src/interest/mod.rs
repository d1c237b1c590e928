//! Interest registration and glob matching — spec §3.4 / §4.7.
//!
//! [`InterestManager`] is a flat, non-`Store`-backed registry (interests
//! have no spec/status split, see [`crate::resources::interest::Interest`]
//! docs) of what each agent wants to hear about. Pattern matching uses
//! `globset` for its native `**` recursive-segment support, which the
//! simpler `wildmatch` crate elsewhere in the corpus lacks. `All`-level
//! interests additionally match by proximity — same directory as a
//! pattern's literal parent — even without a full glob hit.

use crate::resources::event::{Event, EventType};
use crate::resources::interest::{Interest, InterestLevel};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashMap;
use std::sync::RwLock;

struct Entry {
    interest: Interest,
    patterns: GlobSet,
}

/// The literal (non-glob) leading path segments of a pattern, treated as its
/// parent directory for proximity matching.
fn pattern_parent(pattern: &str) -> String {
    pattern
        .split('/')
        .take_while(|seg| !seg.contains(['*', '?', '[']))
        .collect::<Vec<_>>()
        .join("/")
}

/// True if `path`'s directory equals the literal parent directory of any of
/// `patterns` — the `All`-level proximity fallback from spec §4.7, additional
/// to (not a replacement for) the full glob match.
fn proximity_match(patterns: &[String], path: &str) -> bool {
    let path_parent = std::path::Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    patterns.iter().any(|p| pattern_parent(p) == path_parent)
}

fn build_patterns(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        if let Ok(glob) = Glob::new(p) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap())
}

/// Registered interests for one project, keyed by opaque interest id.
pub struct InterestManager {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InterestManager {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, interest: Interest) -> String {
        let id = interest.id.clone();
        let patterns = build_patterns(&interest.patterns);
        self.entries.write().unwrap().insert(id.clone(), Entry { interest, patterns });
        id
    }

    pub fn deregister(&self, id: &str) {
        self.entries.write().unwrap().remove(id);
    }

    pub fn get(&self, id: &str) -> Option<Interest> {
        self.entries.read().unwrap().get(id).map(|e| e.interest.clone())
    }

    /// Drop interests whose `expires_at` has passed. Returns how many were
    /// removed, for callers that log it.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().unwrap();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.interest.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            entries.remove(id);
        }
        expired.len()
    }

    /// Agent ids whose registered interest matches `event`, per level rules:
    /// `None` never matches; `LocksOnly` narrows a `Direct`-style pattern
    /// match down to lock-related event types only (both conditions
    /// required, not either); `Direct` requires the event's `file_path` to
    /// match a registered glob; `All` matches on glob OR, when
    /// `event.embedding` and the interest carry no glob hit, is left to the
    /// caller's semantic search (this function only does structural
    /// matching).
    pub fn matching_agents(&self, event: &Event) -> Vec<String> {
        let now = Utc::now();
        let entries = self.entries.read().unwrap();
        entries
            .values()
            .filter(|e| !e.interest.is_expired(now))
            .filter(|e| self.level_matches(e, event))
            .map(|e| e.interest.agent_id.clone())
            .collect()
    }

    fn level_matches(&self, entry: &Entry, event: &Event) -> bool {
        match entry.interest.level {
            InterestLevel::None => false,
            InterestLevel::LocksOnly => {
                event.type_.is_lock_related()
                    && match &event.file_path {
                        Some(path) => entry.patterns.is_match(path),
                        None => false,
                    }
            }
            InterestLevel::Direct => match &event.file_path {
                Some(path) => entry.patterns.is_match(path),
                None => false,
            },
            InterestLevel::All => match &event.file_path {
                Some(path) => entry.patterns.is_match(path) || proximity_match(&entry.interest.patterns, path),
                None => false,
            },
        }
    }

    /// Distinct agent ids with any non-expired interest registered,
    /// regardless of level — the recipient set for a broadcast event (spec
    /// §4.7: "all local subscribers receive it", unfiltered by level).
    pub fn all_agent_ids(&self) -> Vec<String> {
        let now = Utc::now();
        let entries = self.entries.read().unwrap();
        let mut ids: Vec<String> = entries
            .values()
            .filter(|e| !e.interest.is_expired(now))
            .map(|e| e.interest.agent_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

impl Default for InterestManager {
    fn default() -> Self {
        Self::new()
    }
}
