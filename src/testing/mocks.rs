//! Test doubles for the pub/sub and embedding seams.
//!
//! Grounded on the teacher's `testing::mocks` (mock objects recording calls
//! behind an `Arc<Mutex<_>>` rather than asserting inline), retargeted from
//! agent/task mocks to this crate's `PubSub` and `EmbeddingService` traits.

use crate::context_pipeline::embeddings::{EmbeddingError, EmbeddingOutput, EmbeddingService};
use crate::error::{CoreError, CoreResult};
use crate::pubsub::{PubSub, Subscription};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Records every publish passed through it while still delegating to a real
/// [`crate::pubsub::LocalPubSub`] underneath, so subscribers started before
/// the mock was built keep receiving messages.
pub struct RecordingPubSub {
    inner: Arc<dyn PubSub>,
    published: Mutex<Vec<(String, Value)>>,
}

impl RecordingPubSub {
    pub fn new(inner: Arc<dyn PubSub>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            published: Mutex::new(Vec::new()),
        })
    }

    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_on(&self, topic: &str) -> Vec<Value> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

#[async_trait]
impl PubSub for RecordingPubSub {
    async fn publish(&self, topic: &str, payload: Value) -> CoreResult<()> {
        self.published.lock().unwrap().push((topic.to_string(), payload.clone()));
        self.inner.publish(topic, payload).await
    }

    async fn subscribe(&self, topic: &str) -> CoreResult<Subscription> {
        self.inner.subscribe(topic).await
    }
}

/// An [`EmbeddingService`] that returns a fixed vector, or fails once
/// `fail_next` is armed, without ever hashing real content. Useful for
/// asserting reconcile behavior on the embedding outcome rather than on
/// `LocalEmbeddingService`'s actual hash.
pub struct MockEmbeddingService {
    vector: Vec<f32>,
    fail_next: Mutex<bool>,
    calls: Mutex<Vec<String>>,
}

impl MockEmbeddingService {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            fail_next: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn arm_failure(&self) {
        *self.fail_next.lock().unwrap() = true;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl EmbeddingService for MockEmbeddingService {
    async fn embed(&self, text: &str) -> Result<EmbeddingOutput, EmbeddingError> {
        self.calls.lock().unwrap().push(text.to_string());
        let mut fail_next = self.fail_next.lock().unwrap();
        if *fail_next {
            *fail_next = false;
            return Err(EmbeddingError::Unavailable("mock embedding service armed to fail".to_string()));
        }
        Ok(EmbeddingOutput {
            vector: self.vector.clone(),
            provider: "mock".to_string(),
            model: "mock-fixed-vector".to_string(),
            dimensions: self.vector.len(),
        })
    }
}

/// A [`PubSub`] whose `publish` always fails, for exercising controller
/// error paths that must not panic when the transport is unavailable.
pub struct FailingPubSub;

#[async_trait]
impl PubSub for FailingPubSub {
    async fn publish(&self, _topic: &str, _payload: Value) -> CoreResult<()> {
        Err(CoreError::Internal("mock pubsub publish failure".to_string()))
    }

    async fn subscribe(&self, _topic: &str) -> CoreResult<Subscription> {
        Err(CoreError::Internal("mock pubsub subscribe failure".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::LocalPubSub;

    #[tokio::test]
    async fn recording_pubsub_captures_published_payloads_and_still_delivers() {
        let recorder = RecordingPubSub::new(LocalPubSub::new());
        let mut sub = recorder.subscribe("topic").await.unwrap();
        recorder.publish("topic", serde_json::json!({"a": 1})).await.unwrap();

        assert_eq!(recorder.published_on("topic").len(), 1);
        assert_eq!(sub.next().await, Some(serde_json::json!({"a": 1})));
    }

    #[tokio::test]
    async fn mock_embedding_service_fails_exactly_once_when_armed() {
        let service = MockEmbeddingService::new(vec![0.1, 0.2, 0.3]);
        service.arm_failure();
        assert!(service.embed("hello").await.is_err());
        assert!(service.embed("hello").await.is_ok());
        assert_eq!(service.call_count(), 2);
    }
}
