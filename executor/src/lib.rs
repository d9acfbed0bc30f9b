//! Execution Coordinator (§4.6): drives backend execution of a compiled
//! query unit group, wiring the connection view's transaction state
//! machine to a leased backend connection.

pub mod coordinator;

pub use coordinator::{execute_group, ExecutionOutcome};
