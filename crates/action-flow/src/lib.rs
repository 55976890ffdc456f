//! Flow Orchestration Layer
//!
//! Walks a flow's node/edge graph and drives the node dispatcher one node at a time, with
//! conditional routing, array loops, terminal responses and mid-flight cancellation.

pub mod cancellation;
pub mod context;
pub mod definition;
pub mod errors;
pub mod executor;
pub mod graph;
pub mod metrics;

pub use cancellation::CancellationRegistry;
pub use context::ExecutionContext;
pub use definition::{
    ApiAuth, ApiConfig, Finding, FlowDefinition, FlowEdge, ParameterBinding, ParameterSource,
    RateLimitConfig, Severity, ValidationReport,
};
pub use errors::FlowError;
pub use executor::{EngineLimits, FlowEngine, LOOP_ITERATION_ACTION};
pub use graph::FlowGraph;
