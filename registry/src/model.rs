//! The compiler's atomic execution record and its ordered bundle (§3),
//! plus the `SideEffects` a committed unit can have on shared state.

use bitflags::bitflags;
use common::fingerprint::Fingerprint;
use uuid::Uuid;

bitflags! {
    /// Reported by `ConnectionView::on_success` so observers (the
    /// protocol engine, the registry's sibling-view notification) know
    /// which shared state a committed unit touched.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SideEffects: u8 {
        const SCHEMA_CHANGES            = 0b0000_0001;
        const DATABASE_CONFIG_CHANGES   = 0b0000_0010;
        const INSTANCE_CONFIG_CHANGES   = 0b0000_0100;
        const ROLE_CHANGES              = 0b0000_1000;
        const GLOBAL_SCHEMA_CHANGES     = 0b0001_0000;
    }
}

/// Output cardinality of a query unit's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    NoResult,
    AtMostOne,
    One,
    Many,
}

/// Where a `ConfigOp` applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigScope {
    Session,
    Database,
    Instance,
}

#[derive(Debug, Clone)]
pub struct ConfigOp {
    pub scope: ConfigScope,
    pub name: String,
    pub value: Option<String>,
}

/// DDL bookkeeping markers carried on a `QueryUnit`. `drop_db`/`drop_ns`
/// each get their own independently-guarded hook rather than a shared
/// before/after branch.
#[derive(Debug, Clone, Default)]
pub struct DdlMarkers {
    pub ddl_stmt_id: Option<String>,
    pub create_db: Option<String>,
    pub drop_db: Option<String>,
    pub create_ns: Option<String>,
    pub drop_ns: Option<String>,
}

/// Transaction markers carried on a `QueryUnit`.
#[derive(Debug, Clone, Default)]
pub struct TxMarkers {
    pub begin_tx: bool,
    pub commit_tx: bool,
    pub rollback_tx: bool,
    pub tx_savepoint_declare: Option<String>,
    pub tx_savepoint_rollback: Option<String>,
    pub tx_rollback: bool,
    pub sp_name: Option<String>,
}

/// One atomic backend step — the compiler's smallest unit of execution.
#[derive(Debug, Clone)]
pub struct QueryUnit {
    pub sql: Vec<String>,
    pub status: Vec<u8>,
    pub capabilities: u64,
    pub in_type_id: Uuid,
    pub in_type_data: Vec<u8>,
    pub out_type_id: Uuid,
    pub out_type_data: Vec<u8>,
    pub cardinality: Cardinality,
    pub ddl: DdlMarkers,
    pub tx: TxMarkers,
    pub system_config: Vec<ConfigOp>,
    pub config_ops: Vec<ConfigOp>,
    pub is_transactional: bool,
    pub sql_hash: [u8; 32],
}

impl QueryUnit {
    pub fn is_ddl(&self) -> bool {
        self.ddl.ddl_stmt_id.is_some()
    }
}

/// An ordered, non-empty bundle of `QueryUnit`s sharing a capability
/// union; supplies the outward type description (of `units[0]`) and its
/// cardinality.
#[derive(Debug, Clone)]
pub struct QueryUnitGroup {
    pub units: Vec<QueryUnit>,
    pub capabilities: u64,
}

impl QueryUnitGroup {
    pub fn new(units: Vec<QueryUnit>) -> Self {
        debug_assert!(!units.is_empty(), "a query unit group must not be empty");
        let capabilities = units.iter().fold(0u64, |acc, u| acc | u.capabilities);
        QueryUnitGroup { units, capabilities }
    }

    pub fn outward_type(&self) -> (Uuid, Uuid, Cardinality) {
        let first = &self.units[0];
        (first.in_type_id, first.out_type_id, first.cardinality)
    }
}

/// Argument-embedding metadata for a compiled query (§3).
#[derive(Debug, Clone, Default)]
pub struct ExtraBlobs {
    pub first_extra: Option<u16>,
    pub extra_counts: Vec<u32>,
    pub extra_blobs: Vec<Vec<u8>>,
}

/// Immutable once published: borrowed by many executions, never mutated.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub group: QueryUnitGroup,
    pub extra: ExtraBlobs,
}

/// The normalized request a fingerprint is computed over, retained
/// alongside the compiled query so `Database::compile_or_get` can
/// single-flight identical concurrent requests.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub fingerprint: Fingerprint,
    pub source: String,
    pub module: Option<String>,
    pub namespace: Option<String>,
}
