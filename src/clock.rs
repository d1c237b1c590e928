//! Vector clocks for establishing happens-before / concurrent relationships
//! between deltas and contexts produced by different peers.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;

/// A `{node: counter}` map. Serializes as a plain JSON object of integers,
/// per spec §6's serialized field rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VectorClock(pub HashMap<String, u64>);

/// Result of comparing two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    Equal,
    Before,
    After,
    Concurrent,
}

impl VectorClock {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn increment(&mut self, node: &str) {
        *self.0.entry(node.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, node: &str) -> u64 {
        self.0.get(node).copied().unwrap_or(0)
    }

    /// Merge another clock in, taking the pointwise maximum (used when a
    /// peer's context/delta is accepted into local state).
    pub fn merge(&mut self, other: &VectorClock) {
        for (node, &count) in &other.0 {
            let entry = self.0.entry(node.clone()).or_insert(0);
            if count > *entry {
                *entry = count;
            }
        }
    }

    /// Compare `self` against `other`.
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut self_greater = false;
        let mut other_greater = false;

        let mut nodes: std::collections::HashSet<&String> = self.0.keys().collect();
        nodes.extend(other.0.keys());

        for node in nodes {
            let a = self.get(node);
            let b = other.get(node);
            match a.cmp(&b) {
                CmpOrdering::Greater => self_greater = true,
                CmpOrdering::Less => other_greater = true,
                CmpOrdering::Equal => {}
            }
        }

        match (self_greater, other_greater) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::After,
            (false, true) => ClockOrdering::Before,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    pub fn happens_after(&self, other: &VectorClock) -> bool {
        matches!(self.compare(other), ClockOrdering::After)
    }

    pub fn is_concurrent_with(&self, other: &VectorClock) -> bool {
        matches!(self.compare(other), ClockOrdering::Concurrent)
    }
}
