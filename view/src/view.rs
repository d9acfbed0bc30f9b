//! The Connection View (§4.4): per-connection session state, the
//! transaction-frame state machine, and a private compiled-query cache.

use cache::StatementsCache;
use common::err::{CResult, CoreError};
use common::fingerprint::Fingerprint;
use registry::database::Database;
use registry::model::{CompiledQuery, QueryUnit, SideEffects};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::SessionState;
use crate::transaction::TransactionFrame;

/// A compiled query plus the `dbver` in force when it was compiled — the
/// view drops the entry on lookup if the database's current `dbver` has
/// since moved on (§4.2, §4.3: "sibling views... must drop or revalidate
/// any cached handles they hold").
#[derive(Debug, Clone)]
struct CacheEntry {
    query: CompiledQuery,
    dbver: u64,
}

/// Which transaction state a view is in, derived from whether a frame is
/// present and whether it has errored (§4.4 state table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    InTx,
    InTxError,
}

pub struct ConnectionView {
    pub id: Uuid,
    pub protocol_major: u16,
    pub protocol_minor: u16,
    pub capability_mask: u64,
    pub non_tx_state: SessionState,
    frame: Option<TransactionFrame>,
    next_txid: u64,
    cache: StatementsCache<Fingerprint, CacheEntry>,
}

impl ConnectionView {
    pub fn new(protocol_major: u16, protocol_minor: u16, capability_mask: u64, cache_maxsize: usize) -> Self {
        ConnectionView {
            id: Uuid::new_v4(),
            protocol_major,
            protocol_minor,
            capability_mask,
            non_tx_state: SessionState::default(),
            frame: None,
            next_txid: 1,
            cache: StatementsCache::new(cache_maxsize),
        }
    }

    pub fn tx_state(&self) -> TxState {
        match &self.frame {
            None => TxState::Idle,
            Some(f) if f.tx_error => TxState::InTxError,
            Some(_) => TxState::InTx,
        }
    }

    pub fn in_tx(&self) -> bool {
        self.frame.is_some()
    }

    pub fn in_tx_with_ddl(&self) -> bool {
        self.frame.as_ref().is_some_and(|f| f.with_ddl)
    }

    /// `start(unit)` — begins an implicit frame if Idle, or folds the
    /// unit's markers into the current explicit frame if already `InTx`.
    /// A unit with `tx_savepoint_rollback` set, or any execution error
    /// surfaced later via `on_error`, flips `tx_error`.
    pub fn start(&mut self, unit: &QueryUnit) -> CResult<()> {
        if let TxState::InTxError = self.tx_state() {
            let is_rollback = unit.tx.rollback_tx || unit.tx.tx_savepoint_rollback.is_some();
            if !is_rollback {
                return Err(CoreError::TransactionError(
                    "current transaction is aborted, commands ignored until end of transaction block".into(),
                ));
            }
        }

        if self.frame.is_none() {
            let txid = self.next_txid;
            self.next_txid += 1;
            self.frame = Some(TransactionFrame::begin(txid, unit.tx.begin_tx, self.non_tx_state.clone()));
        }

        let frame = self.frame.as_mut().expect("frame just ensured present");
        let first_ddl_in_frame = unit.is_ddl() && !frame.with_ddl;
        if unit.is_ddl() {
            frame.with_ddl = true;
            if unit.ddl.create_db.is_some() || unit.ddl.drop_db.is_some() {
                frame.with_role_ddl = true;
            }
        }
        if !unit.system_config.is_empty() {
            frame.with_sysconfig = true;
        }
        if !unit.config_ops.is_empty() {
            frame.with_dbconfig = true;
            frame.with_set = true;
        }
        if let Some(sp) = &unit.tx.tx_savepoint_declare {
            frame.declare_savepoint(sp.clone());
        }
        if let Some(sp) = &unit.tx.tx_savepoint_rollback {
            frame.tx_error = true;
            frame.rollback_to_savepoint(sp);
        }

        // §4.2: the first DDL unit in a frame marks every entry already in
        // this view's cache for eviction at the DDL's commit boundary —
        // they were compiled against a schema this DDL may change. Lookups
        // are bypassed entirely while `in_tx_with_ddl()` (see
        // `lookup_compiled_query`), so nothing stale is served meanwhile;
        // `on_success` drives the actual eviction via `cleanup_on_ddl`.
        if first_ddl_in_frame {
            let pending: Vec<Fingerprint> = self.cache.keys().copied().collect();
            for fp in pending {
                self.cache.add_to_remove_on_ddl(fp);
            }
        }

        Ok(())
    }

    /// `on_success(unit, new_types)` — publishes mutations upward on
    /// commit (explicit `COMMIT` or end of an implicit frame) and
    /// returns which kinds of shared state were touched.
    pub fn on_success(&mut self, unit: &QueryUnit, new_types: &[Uuid], db: &Database) -> SideEffects {
        let mut effects = SideEffects::empty();
        let is_explicit_commit = unit.tx.commit_tx;
        let is_implicit_end = !self.frame.as_ref().is_some_and(|f| f.explicit);

        let should_publish = is_explicit_commit || is_implicit_end;
        if !should_publish {
            return effects;
        }

        let Some(frame) = self.frame.take() else {
            return effects;
        };

        if frame.with_ddl {
            db.bump_dbver();
            effects |= SideEffects::SCHEMA_CHANGES;
            if frame.with_role_ddl {
                effects |= SideEffects::ROLE_CHANGES;
            }
            // Evict the entries `start()` marked when this frame's first
            // DDL unit began (§4.2 "evicted on the next DDL commit
            // boundary"), rather than relying solely on the dbver stamp
            // every other cache entry is lazily checked against below.
            self.cache.cleanup_on_ddl();
        }
        if frame.with_dbconfig {
            effects |= SideEffects::DATABASE_CONFIG_CHANGES;
        }
        if frame.with_sysconfig {
            effects |= SideEffects::INSTANCE_CONFIG_CHANGES;
        }
        if !new_types.is_empty() {
            effects |= SideEffects::GLOBAL_SCHEMA_CHANGES;
        }

        self.non_tx_state = frame.state;
        debug!(view_id = %self.id, ?effects, "transaction committed");
        effects
    }

    /// `on_error()` — marks the current frame errored. If the backend has
    /// already left the transaction (no frame to recover into), this is a
    /// no-op since there is nothing left to mark.
    pub fn on_error(&mut self) {
        if let Some(frame) = self.frame.as_mut() {
            frame.tx_error = true;
        } else {
            warn!("on_error called with no active transaction frame");
        }
    }

    /// Discards the current frame unconditionally — used when the
    /// backend connection itself reports it has left the transaction.
    pub fn abort_tx(&mut self) {
        self.frame = None;
    }

    /// `rollback_tx_to_savepoint(name)` — pops savepoints above and
    /// including `name`, preserving the frame and clearing `tx_error`.
    pub fn rollback_tx_to_savepoint(&mut self, name: &str) -> CResult<()> {
        let Some(frame) = self.frame.as_mut() else {
            return Err(CoreError::TransactionError("no transaction in progress".into()));
        };
        if !frame.rollback_to_savepoint(name) {
            return Err(CoreError::TransactionError(format!("no such savepoint: {name}")));
        }
        Ok(())
    }

    /// Discards the whole frame — ROLLBACK with no savepoint target.
    pub fn rollback_tx(&mut self) {
        self.frame = None;
    }

    /// `lookup_compiled_query(req)` — bypassed while `in_tx_with_ddl`
    /// (compilation must observe uncommitted schema), and dropped if
    /// stale against the database's current `dbver`.
    pub fn lookup_compiled_query(&mut self, fp: &Fingerprint, db: &Database) -> Option<CompiledQuery> {
        if self.in_tx_with_ddl() {
            return None;
        }
        let current_dbver = db.dbver();
        match self.cache.get(fp) {
            Some(entry) if entry.dbver == current_dbver => Some(entry.query.clone()),
            Some(_) => {
                self.cache.remove(fp);
                None
            }
            None => None,
        }
    }

    pub fn cache_compiled_query(&mut self, fp: Fingerprint, query: CompiledQuery, db: &Database) {
        if self.in_tx_with_ddl() {
            return;
        }
        self.cache.put(fp, CacheEntry { query, dbver: db.dbver() });
    }

    pub fn evict_compiled_query(&mut self, fp: &Fingerprint) {
        self.cache.remove(fp);
    }

    /// `serialize_state()` — opaque, stable-for-equal-state byte blob;
    /// the active frame's state shadows `non_tx_state` while `InTx`.
    pub fn serialize_state(&self) -> Vec<u8> {
        match &self.frame {
            Some(frame) => frame.state.serialize(),
            None => self.non_tx_state.serialize(),
        }
    }

    pub fn current_state(&self) -> &SessionState {
        match &self.frame {
            Some(frame) => &frame.state,
            None => &self.non_tx_state,
        }
    }
}
