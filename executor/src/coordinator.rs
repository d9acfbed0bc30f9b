//! Drives backend execution of a compiled query unit group against a
//! leased backend connection, coordinating with the connection view's
//! transaction state machine (§4.6).

use common::err::{CResult, CoreError};
use registry::backend::{BackendConnection, BackendRows, BackendStatement};
use registry::model::{CompiledQuery, QueryUnit};
use tracing::warn;
use uuid::Uuid;
use view::{ConnectionView, TxState};

/// Outcome of executing one `QueryUnitGroup`: the rows/affected-count of
/// the last unit (the group's "real" result) and the side effects
/// reported by `view.on_success`.
#[derive(Debug, Default)]
pub struct ExecutionOutcome {
    pub rows: BackendRows,
    pub side_effects: registry::model::SideEffects,
}

/// `(compiled, bind_args, view, conn, use_prep_stmt)` from §4.6. Only the
/// final unit in the group receives `bind_args`; earlier units are
/// compiler-generated housekeeping (savepoint declarations, implicit
/// BEGIN) and always run with no arguments.
pub async fn execute_group(
    compiled: &CompiledQuery,
    bind_args: &[u8],
    view: &mut ConnectionView,
    db: &registry::Database,
    conn: &mut dyn BackendConnection,
    use_prep_stmt: bool,
) -> CResult<ExecutionOutcome> {
    let _ = use_prep_stmt;
    let units = &compiled.group.units;
    let last_index = units.len() - 1;
    let mut outcome = ExecutionOutcome::default();

    for (idx, unit) in units.iter().enumerate() {
        let is_rollback = unit.tx.rollback_tx || unit.tx.tx_savepoint_rollback.is_some();
        if matches!(view.tx_state(), TxState::InTxError) && !is_rollback {
            return Err(CoreError::TransactionError(
                "current transaction is aborted, commands ignored until end of transaction block".into(),
            ));
        }

        view.start(unit)?;

        let needs_state = conn.last_state() != Some(view.serialize_state().as_slice());
        let args: &[u8] = if idx == last_index { bind_args } else { &[] };

        let result = run_unit(unit, &args, view, conn, needs_state).await;

        match result {
            Ok((rows, new_types)) => {
                if idx == last_index {
                    outcome.rows = rows;
                }
                // §4.4: `InTxError | ROLLBACK | Idle | discard frame`. A bare
                // ROLLBACK (no savepoint target) always discards the whole
                // frame rather than publishing it — `on_success` only
                // publishes on `commit_tx`/implicit-end, so it would
                // otherwise leave `tx_error` set forever. Savepoint rollback
                // is handled separately in `view.start()`, which already
                // truncates the savepoint stack and clears `tx_error` while
                // keeping the frame alive.
                if unit.tx.rollback_tx && unit.tx.tx_savepoint_rollback.is_none() {
                    view.rollback_tx();
                } else {
                    let effects = view.on_success(unit, &new_types, db);
                    outcome.side_effects |= effects;
                }
            }
            Err(err) => {
                view.on_error();
                // §4.4 state table: `InTx | COMMIT errors | Idle | discard
                // frame`. An ordinary statement failure leaves the backend
                // in an aborted-transaction state awaiting ROLLBACK, so the
                // frame (and its `tx_error` flag) is kept — only a failed
                // COMMIT itself means the backend has already left the
                // transaction.
                if unit.tx.commit_tx && view.in_tx() {
                    view.abort_tx();
                }
                return Err(err);
            }
        }
    }

    if !view.in_tx() {
        conn.restore_state(view.serialize_state().as_slice()).await?;
    }

    Ok(outcome)
}

async fn run_unit(
    unit: &QueryUnit,
    args: &[u8],
    view: &mut ConnectionView,
    conn: &mut dyn BackendConnection,
    needs_state: bool,
) -> CResult<(BackendRows, Vec<Uuid>)> {
    if needs_state {
        conn.restore_state(view.serialize_state().as_slice()).await?;
    }

    run_before_ddl_hooks(unit, conn).await?;

    if !unit.system_config.is_empty() {
        run_system_config(unit, conn).await?;
    }

    let rows = if unit.is_ddl() {
        for sql in &unit.sql {
            conn.run_ddl(sql).await?;
        }
        BackendRows::default()
    } else if unit.is_transactional {
        let stmt = BackendStatement {
            sql: unit.sql.join(";"),
            args: args.to_vec(),
        };
        conn.sql_execute(&stmt).await?
    } else {
        let mut last = BackendRows::default();
        for sql in &unit.sql {
            let stmt = BackendStatement {
                sql: sql.clone(),
                args: args.to_vec(),
            };
            last = conn.sql_execute(&stmt).await?;
        }
        last
    };

    run_after_ddl_hooks(unit, conn).await?;

    let new_types = if unit.out_type_id.is_nil() { Vec::new() } else { vec![unit.out_type_id] };
    Ok((rows, new_types))
}

/// `create_db`/`create_ns` run before the unit's SQL; `drop_db`/`drop_ns`
/// run after. Each of the four hooks is independently guarded on its own
/// marker field rather than sharing one before/after branch, so a unit
/// that only drops a namespace never fires the database hook and vice
/// versa.
async fn run_before_ddl_hooks(unit: &QueryUnit, conn: &mut dyn BackendConnection) -> CResult<()> {
    if let Some(name) = &unit.ddl.create_db {
        conn.run_ddl(&format!("-- on_after_create_db: {name}")).await?;
    }
    if let Some(name) = &unit.ddl.create_ns {
        conn.run_ddl(&format!("-- on_after_create_ns: {name}")).await?;
    }
    Ok(())
}

async fn run_after_ddl_hooks(unit: &QueryUnit, conn: &mut dyn BackendConnection) -> CResult<()> {
    if let Some(name) = &unit.ddl.drop_db {
        conn.run_ddl(&format!("-- on_after_drop_db: {name}")).await?;
    }
    if let Some(name) = &unit.ddl.drop_ns {
        conn.run_ddl(&format!("-- on_after_drop_ns: {name}")).await?;
    }
    Ok(())
}

async fn run_system_config(unit: &QueryUnit, conn: &mut dyn BackendConnection) -> CResult<()> {
    for op in &unit.system_config {
        let sql = match &op.value {
            Some(v) => format!("SET {} = {}", op.name, v),
            None => format!("RESET {}", op.name),
        };
        let stmt = BackendStatement { sql, args: vec![] };
        if let Err(err) = conn.parse_execute_json(&stmt).await {
            warn!(name = %op.name, "system config op failed");
            return Err(err);
        }
    }
    Ok(())
}
