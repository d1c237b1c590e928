//! The `Lock` resource — spec §3.1 / §4.4.

use crate::meta::{ConditionSet, ObjectMeta, Resource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum LockTarget {
    File {
        file_path: String,
    },
    Function {
        file_path: String,
        function_name: String,
    },
    LineRange {
        file_path: String,
        start_line: u32,
        end_line: u32,
    },
    Symbol {
        file_path: String,
        symbol: String,
    },
}

impl LockTarget {
    pub fn file_path(&self) -> &str {
        match self {
            LockTarget::File { file_path }
            | LockTarget::Function { file_path, .. }
            | LockTarget::LineRange { file_path, .. }
            | LockTarget::Symbol { file_path, .. } => file_path,
        }
    }

    pub fn line_range(&self) -> Option<(u32, u32)> {
        match self {
            LockTarget::LineRange {
                start_line,
                end_line,
                ..
            } => Some((*start_line, *end_line)),
            _ => None,
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        match self {
            LockTarget::Symbol { symbol, .. } => Some(symbol),
            _ => None,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, LockTarget::File { .. })
    }
}

/// True iff `a` and `b` target overlapping ranges of the same file, per
/// spec §4.4: same file, and (either side is whole-file, or line ranges
/// intersect inclusively, or both are the same symbol).
pub fn targets_overlap(a: &LockTarget, b: &LockTarget) -> bool {
    if a.file_path() != b.file_path() {
        return false;
    }
    if a.is_file() || b.is_file() {
        return true;
    }
    if let (Some((a0, a1)), Some((b0, b1))) = (a.line_range(), b.line_range()) {
        if a0 <= b1 && b0 <= a1 {
            return true;
        }
    }
    if let (Some(sa), Some(sb)) = (a.symbol(), b.symbol()) {
        if sa == sb {
            return true;
        }
    }
    false
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockSpec {
    pub target: LockTarget,
    pub holder_id: String,
    #[serde(default)]
    pub intention: String,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub exclusive: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockPhase {
    Pending,
    Negotiating,
    Active,
    Releasing,
    Released,
    Expired,
    Failed,
}

impl LockPhase {
    /// Terminal phases no longer reconcile, per spec §3.1 lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, LockPhase::Released | LockPhase::Expired | LockPhase::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictingLock {
    pub name: String,
    pub holder: String,
    pub target: LockTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LockStatus {
    pub phase: Option<LockPhase>,
    pub fencing_token: u64,
    pub acquired_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_renewed_at: Option<DateTime<Utc>>,
    pub conflicting_locks: Vec<ConflictingLock>,
    pub message: String,
    pub conditions: ConditionSet,
}

impl Default for LockPhase {
    fn default() -> Self {
        LockPhase::Pending
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lock {
    pub meta: ObjectMeta,
    pub spec: LockSpec,
    #[serde(default)]
    pub status: LockStatus,
}

impl Lock {
    pub fn new(name: impl Into<String>, spec: LockSpec) -> Self {
        Self {
            meta: ObjectMeta::new(name),
            spec,
            status: LockStatus {
                phase: Some(LockPhase::Pending),
                ..Default::default()
            },
        }
    }
}

impl Resource for Lock {
    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }
    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}

/// Pub/sub payloads on `/agent-collab/{project}/lock/{verb}`, spec §4.4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockIntent {
    pub lock_name: String,
    pub holder_id: String,
    pub target: LockTarget,
    pub intention: String,
    pub priority: i32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockAcquisition {
    pub lock_name: String,
    pub holder_id: String,
    pub target: LockTarget,
    pub fencing_token: u64,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRelease {
    pub lock_name: String,
    pub holder_id: String,
    pub released_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(p: &str) -> LockTarget {
        LockTarget::File {
            file_path: p.to_string(),
        }
    }

    fn range(p: &str, s: u32, e: u32) -> LockTarget {
        LockTarget::LineRange {
            file_path: p.to_string(),
            start_line: s,
            end_line: e,
        }
    }

    #[test]
    fn file_target_overlaps_any_range_in_same_file() {
        assert!(targets_overlap(&file("a.rs"), &range("a.rs", 1, 10)));
    }

    #[test]
    fn different_files_never_overlap() {
        assert!(!targets_overlap(&file("a.rs"), &file("b.rs")));
    }

    #[test]
    fn overlapping_ranges_intersect_inclusively() {
        assert!(targets_overlap(&range("a.rs", 1, 10), &range("a.rs", 10, 20)));
        assert!(!targets_overlap(&range("a.rs", 1, 9), &range("a.rs", 10, 20)));
    }

    #[test]
    fn same_symbol_overlaps() {
        let a = LockTarget::Symbol {
            file_path: "a.rs".into(),
            symbol: "foo".into(),
        };
        let b = LockTarget::Symbol {
            file_path: "a.rs".into(),
            symbol: "foo".into(),
        };
        assert!(targets_overlap(&a, &b));
    }
}
