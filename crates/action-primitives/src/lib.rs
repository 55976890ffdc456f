//! Node action dispatcher - typed node actions executed against a browser page
//!
//! This crate turns one flow node into one browser interaction:
//! - `node` parses the node's action kind and raw config into a typed `NodeAction`
//! - `primitives` holds the per-action executors
//! - `dispatcher` runs a node and normalizes every outcome into a `NodeResult`
//! - `interpolate` and `conditions` implement `{{variable}}` templates and branch tests

pub mod conditions;
pub mod dispatcher;
pub mod errors;
pub mod interpolate;
mod lenient;
pub mod metrics;
pub mod node;
mod primitives;
pub mod types;

pub use conditions::{compare, evaluate_variable_condition, is_truthy};
pub use dispatcher::{DefaultNodeDispatcher, NodeDispatch};
pub use errors::*;
pub use interpolate::{interpolate, interpolate_value, stringify, Interpolated};
pub use node::{is_known_action, FlowNode, NodeAction, ACTION_KINDS};
pub use primitives::*;
pub use types::*;
