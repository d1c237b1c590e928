//! Typed resource kinds stored in [`crate::store::Store`] and driven by the
//! controllers under [`crate::lock`], [`crate::agent`], and
//! [`crate::context_pipeline`]. See spec §3 for the shared data model.

pub mod agent;
pub mod context;
pub mod delta;
pub mod event;
pub mod interest;
pub mod lock;

pub use agent::{Agent, AgentPhase, AgentSpec, AgentStatus, Capability, HeartbeatMessage};
pub use context::{
    Context, ContextAck, ContextDelta, ContextPhase, ContextSpec, ContextStatus, ContextSyncMessage,
    ContextType, DeltaOperation, EmbeddingInfo,
};
pub use delta::Delta;
pub use event::{Event, EventQuery, EventStatus, EventType};
pub use interest::{Interest, InterestLevel};
pub use lock::{
    targets_overlap, ConflictingLock, Lock, LockAcquisition, LockIntent, LockPhase, LockRelease,
    LockSpec, LockStatus, LockTarget,
};
