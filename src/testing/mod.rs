//! Testing utilities shared across this crate's controller and pipeline
//! tests, and by the integration tests under `tests/`.
//!
//! Grounded on the teacher's `testing::TestEnvironment` (a struct bundling
//! the handles a test needs, built once per test rather than repeating
//! setup), retargeted from a temp-dir workspace to a bundle of stores and an
//! in-process pub/sub.

pub mod fixtures;
pub mod mocks;
pub mod test_utils;

pub use test_utils::*;

use crate::pubsub::{LocalPubSub, PubSub};
use crate::resources::{Agent, Context, Lock};
use crate::store::Store;
use std::sync::Arc;

/// One store per resource kind plus a shared pub/sub, wired the way
/// `main` would wire them in a real node but without any controllers
/// running — tests start only the reconcilers/listeners they're exercising.
pub struct TestEnvironment {
    pub locks: Arc<Store<Lock>>,
    pub agents: Arc<Store<Agent>>,
    pub contexts: Arc<Store<Context>>,
    pub pubsub: Arc<dyn PubSub>,
    pub project: String,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self::with_project("test-project")
    }

    pub fn with_project(project: &str) -> Self {
        Self {
            locks: Store::new(),
            agents: Store::new(),
            contexts: Store::new(),
            pubsub: LocalPubSub::new(),
            project: project.to_string(),
        }
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_environment_has_empty_stores() {
        let env = TestEnvironment::new();
        assert!(env.locks.list(&Default::default()).await.unwrap().is_empty());
        assert!(env.agents.list(&Default::default()).await.unwrap().is_empty());
        assert!(env.contexts.list(&Default::default()).await.unwrap().is_empty());
    }
}
