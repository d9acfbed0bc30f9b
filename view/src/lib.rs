//! Per-connection session state and transaction-frame state machine
//! (§4.4): everything a `ConnectionView` tracks between a handshake and
//! its matching `Terminate`.

pub mod state;
pub mod transaction;
pub mod view;

pub use state::SessionState;
pub use transaction::{Savepoint, TransactionFrame};
pub use view::{ConnectionView, TxState};
