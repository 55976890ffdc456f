//! Execution state and event emission for FlowPilot.
//!
//! [`ExecutionStatusRegistry`] is the only place execution statuses change; every change and every
//! node-level notification becomes an [`EventEnvelope`] on a per-execution stream and on the
//! process-wide bus. Snapshots are persisted best-effort through an [`ExecutionStore`].

pub mod errors;
pub mod events;
pub mod record;
pub mod registry;
pub mod store;

pub use errors::StateError;
pub use events::{EventEnvelope, EventPayload, ExecutionEvent, LogLevel};
pub use record::{ExecutionLogEntry, ExecutionRecord};
pub use registry::{ExecutionHandle, ExecutionStatusRegistry};
pub use store::{ExecutionStore, FsExecutionStore, InMemoryExecutionStore};
pub use flowpilot_event_bus::Subscription;
