//! The registry's view of a physical backend connection. Concrete
//! transport (e.g. a pooled Postgres connection) is out of scope for this
//! crate; callers supply an implementation and the registry only ever
//! talks to the trait object.

use async_trait::async_trait;
use common::err::CResult;

/// One executable statement against the backend, plus its bound-args
/// blob (the single opaque `lp_bytes` block the wire protocol carries
/// per `Execute`/`OptimisticExecute` frame, not one blob per argument).
#[derive(Debug, Clone)]
pub struct BackendStatement {
    pub sql: String,
    pub args: Vec<u8>,
}

/// Raw tuple data returned from a backend execution, in column order.
#[derive(Debug, Clone, Default)]
pub struct BackendRows {
    pub rows: Vec<Vec<u8>>,
    pub rows_affected: u64,
}

/// A leased backend connection, generalizing whatever the executor
/// talks to (process-local test fake, pooled SQL connection, …).
///
/// `last_state` lets the executor skip re-sending session state (search
/// path, role, session config) when the backend already reflects the
/// connection view's current serialized state — see §4.6.
#[async_trait]
pub trait BackendConnection: Send {
    async fn sql_execute(&mut self, stmt: &BackendStatement) -> CResult<BackendRows>;

    async fn run_ddl(&mut self, sql: &str) -> CResult<()>;

    /// Executes a statement expected to return a single JSON-encoded
    /// column (used for system-config and introspection units).
    async fn parse_execute_json(&mut self, stmt: &BackendStatement) -> CResult<Vec<u8>>;

    async fn restore_state(&mut self, serialized: &[u8]) -> CResult<()>;

    fn last_state(&self) -> Option<&[u8]>;

    async fn cancel(&mut self) -> CResult<()>;

    /// Streams a full schema+data dump of the connection's database as a
    /// sequence of opaque blocks, terminated by `None`. Exact wire format
    /// is a backend concern; the engine only relays whatever comes back.
    async fn dump_block(&mut self, seq: u32) -> CResult<Option<Vec<u8>>>;

    /// Begins a restore from a dump header previously produced by
    /// `dump_block`.
    async fn restore_begin(&mut self, header: &[u8]) -> CResult<()>;

    async fn restore_block(&mut self, block: &[u8]) -> CResult<()>;

    async fn restore_commit(&mut self) -> CResult<()>;
}

/// An in-memory fake for tests: records every statement it was asked to
/// run and plays back canned results.
#[derive(Debug, Default)]
pub struct FakeBackendConnection {
    pub executed: Vec<String>,
    pub last_state: Option<Vec<u8>>,
    pub ddl_count: u32,
    pub cancelled: bool,
    pub dump_blocks: Vec<Vec<u8>>,
    pub restore_header: Option<Vec<u8>>,
    pub restore_blocks: Vec<Vec<u8>>,
    pub restore_committed: bool,
}

#[async_trait]
impl BackendConnection for FakeBackendConnection {
    async fn sql_execute(&mut self, stmt: &BackendStatement) -> CResult<BackendRows> {
        self.executed.push(stmt.sql.clone());
        Ok(BackendRows::default())
    }

    async fn run_ddl(&mut self, sql: &str) -> CResult<()> {
        self.executed.push(sql.to_string());
        self.ddl_count += 1;
        Ok(())
    }

    async fn parse_execute_json(&mut self, stmt: &BackendStatement) -> CResult<Vec<u8>> {
        self.executed.push(stmt.sql.clone());
        Ok(b"{}".to_vec())
    }

    async fn restore_state(&mut self, serialized: &[u8]) -> CResult<()> {
        self.last_state = Some(serialized.to_vec());
        Ok(())
    }

    fn last_state(&self) -> Option<&[u8]> {
        self.last_state.as_deref()
    }

    async fn cancel(&mut self) -> CResult<()> {
        self.cancelled = true;
        Ok(())
    }

    async fn dump_block(&mut self, seq: u32) -> CResult<Option<Vec<u8>>> {
        Ok(self.dump_blocks.get(seq as usize).cloned())
    }

    async fn restore_begin(&mut self, header: &[u8]) -> CResult<()> {
        self.restore_header = Some(header.to_vec());
        Ok(())
    }

    async fn restore_block(&mut self, block: &[u8]) -> CResult<()> {
        self.restore_blocks.push(block.to_vec());
        Ok(())
    }

    async fn restore_commit(&mut self) -> CResult<()> {
        self.restore_committed = true;
        Ok(())
    }
}
