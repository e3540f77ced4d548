//! Bidirectional flow tracking.
//!
//! The tracker owns the active-flow table and is mutated by exactly one
//! thread. Idle eviction is driven by a deadline heap rather than a table
//! scan, so the per-packet cost does not depend on the number of flows.

mod expiry;
mod key;
mod tracker;

pub use key::{Endpoint, FlowKey};
pub use tracker::{FlowState, FlowTracker};
