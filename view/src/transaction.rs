//! The transaction frame a `ConnectionView` carries while `InTx`/`InTxError`
//! (§4.4): a named savepoint stack plus the pending schema/config mutations
//! a COMMIT would publish.

use crate::state::SessionState;

/// One entry on the savepoint stack.
#[derive(Debug, Clone)]
pub struct Savepoint {
    pub name: String,
    /// Session state as of the `DECLARE SAVEPOINT`, restored on rollback.
    pub state_snapshot: SessionState,
}

/// Pending schema-mutation bookkeeping accumulated while `InTx`, applied
/// to the database on a successful COMMIT.
#[derive(Debug, Clone, Default)]
pub struct SchemaMutation {
    pub new_types: Vec<[u8; 16]>,
    pub config_ops: Vec<registry::model::ConfigOp>,
}

/// The implicit or explicit transaction in progress on a connection view.
#[derive(Debug, Clone)]
pub struct TransactionFrame {
    pub txid: u64,
    pub explicit: bool,
    pub base_state: SessionState,
    pub state: SessionState,
    pub savepoints: Vec<Savepoint>,
    pub schema_mutation: SchemaMutation,
    pub with_ddl: bool,
    pub with_role_ddl: bool,
    pub with_sysconfig: bool,
    pub with_dbconfig: bool,
    pub with_set: bool,
    pub tx_error: bool,
}

impl TransactionFrame {
    pub fn begin(txid: u64, explicit: bool, base_state: SessionState) -> Self {
        TransactionFrame {
            txid,
            explicit,
            state: base_state.clone(),
            base_state,
            savepoints: Vec::new(),
            schema_mutation: SchemaMutation::default(),
            with_ddl: false,
            with_role_ddl: false,
            with_sysconfig: false,
            with_dbconfig: false,
            with_set: false,
            tx_error: false,
        }
    }

    pub fn declare_savepoint(&mut self, name: impl Into<String>) {
        self.savepoints.push(Savepoint {
            name: name.into(),
            state_snapshot: self.state.clone(),
        });
    }

    /// Pops savepoints above and including `name`, restoring the state
    /// snapshot it was declared with, and clears `tx_error` (§4.4 table:
    /// `InTxError` + ROLLBACK TO SP -> InTx).
    pub fn rollback_to_savepoint(&mut self, name: &str) -> bool {
        let Some(idx) = self.savepoints.iter().rposition(|sp| sp.name == name) else {
            return false;
        };
        let restored = self.savepoints[idx].state_snapshot.clone();
        self.savepoints.truncate(idx);
        self.state = restored;
        self.tx_error = false;
        true
    }

    pub fn in_tx_with_ddl(&self) -> bool {
        self.with_ddl
    }
}
