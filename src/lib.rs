//! `agent-collab-core`: a distributed coordination runtime for concurrent AI
//! coding agents working against a shared codebase.
//!
//! The runtime is a set of Kubernetes-controller-shaped reconcile loops
//! (store, queue, controller) driving three resource kinds — `Lock`,
//! `Agent`, `Context` — plus the supporting subsystems that route events and
//! audit state between peers: interest-gated routing, an append-only delta
//! log, and pub/sub over named topics. See `DESIGN.md` for how each module
//! maps onto the production codebase this crate was generalized from.

pub mod agent;
pub mod audit;
pub mod clock;
pub mod config;
pub mod context_pipeline;
pub mod controller;
pub mod error;
pub mod event;
pub mod interest;
pub mod lock;
pub mod logging;
pub mod meta;
pub mod pubsub;
pub mod queue;
pub mod resources;
pub mod store;

#[cfg(test)]
pub mod testing;

pub use agent::AgentPresenceController;
pub use audit::{AsyncDeltaLog, DeltaLog};
pub use clock::{ClockOrdering, VectorClock};
pub use config::{Config, ConfigError};
pub use context_pipeline::ContextPipelineController;
pub use controller::{Controller, ControllerOptions, ReconcileResult, Reconciler};
pub use error::{CoreError, CoreResult};
pub use event::{EventLog, EventRouter};
pub use interest::InterestManager;
pub use lock::LockController;
pub use logging::{init_logging, LogConfig, LogFormat, LoggingError};
pub use meta::{ConditionSet, ObjectMeta, Resource};
pub use pubsub::{LocalPubSub, PubSub};
pub use queue::WorkQueue;
pub use resources::{Agent, Context, Interest, Lock};
pub use store::Store;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
