//! End-to-end tests driving `ProtocolEngine` over an in-memory duplex
//! stream, exercising the scenarios of spec §8 against the real framed
//! codec, handshake negotiation, and dispatch loop rather than unit-level
//! pieces in isolation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::err::{CResult, CoreError};
use engine::auth::Trust;
use engine::handshake::{ProtocolRange, ProtocolVersion};
use engine::session::ProtocolEngine;
use protocol::headers::{HeaderKey, Headers};
use protocol::tags::{client, server};
use protocol::{ReadBuffer, WriteBuffer};
use registry::backend::{BackendConnection, BackendRows, BackendStatement};
use registry::compiler::FakeCompiler;
use registry::model::{Cardinality, DdlMarkers, QueryUnit, QueryUnitGroup, TxMarkers};
use registry::DatabaseRegistry;
use tokio::io::DuplexStream;
use uuid::Uuid;

fn plain_unit(sql: &str) -> QueryUnit {
    QueryUnit {
        sql: vec![sql.to_string()],
        status: Vec::new(),
        capabilities: 0,
        in_type_id: Uuid::nil(),
        in_type_data: Vec::new(),
        out_type_id: Uuid::nil(),
        out_type_data: Vec::new(),
        cardinality: Cardinality::Many,
        ddl: DdlMarkers::default(),
        tx: TxMarkers::default(),
        system_config: Vec::new(),
        config_ops: Vec::new(),
        is_transactional: false,
        sql_hash: [0u8; 32],
    }
}

/// A backend that fails any statement containing `1/0`, mimicking a
/// division-by-zero error raised mid-script (§8 scenario 4).
#[derive(Debug, Default)]
struct ScriptedBackend {
    last_state: Option<Vec<u8>>,
}

#[async_trait]
impl BackendConnection for ScriptedBackend {
    async fn sql_execute(&mut self, stmt: &BackendStatement) -> CResult<BackendRows> {
        if stmt.sql.contains("1/0") {
            return Err(CoreError::BackendError("division by zero".to_string()));
        }
        Ok(BackendRows::default())
    }

    async fn run_ddl(&mut self, _sql: &str) -> CResult<()> {
        Ok(())
    }

    async fn parse_execute_json(&mut self, _stmt: &BackendStatement) -> CResult<Vec<u8>> {
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
        Ok(())
    }

    async fn dump_block(&mut self, _seq: u32) -> CResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn restore_begin(&mut self, _header: &[u8]) -> CResult<()> {
        Ok(())
    }

    async fn restore_block(&mut self, _block: &[u8]) -> CResult<()> {
        Ok(())
    }

    async fn restore_commit(&mut self) -> CResult<()> {
        Ok(())
    }
}

fn write_handshake(major: u16, minor: u16, user: &str, database: &str) -> Vec<u8> {
    let mut wb = WriteBuffer::new();
    wb.new_message(client::CLIENT_HANDSHAKE).unwrap();
    wb.write_uint16(major);
    wb.write_uint16(minor);
    wb.write_len_prefixed_utf8(user);
    wb.write_len_prefixed_utf8(database);
    wb.write_len_prefixed_bytes(&[]);
    if (major, minor) <= engine::handshake::MAX_LEGACY_PROTOCOL {
        wb.write_len_prefixed_bytes(&[]);
    }
    wb.end_message().unwrap();
    wb.take()
}

fn write_parse(command_text: &str) -> Vec<u8> {
    let mut wb = WriteBuffer::new();
    wb.new_message(client::PARSE).unwrap();
    wb.write_uint16(0); // empty headers block
    wb.write_byte(0); // output_format
    wb.write_byte(0); // expect_one
    wb.write_uint64(0); // implicit_limit
    wb.write_len_prefixed_utf8(command_text);
    wb.end_message().unwrap();
    wb.take()
}

fn write_sync() -> Vec<u8> {
    let mut wb = WriteBuffer::new();
    wb.new_message(client::SYNC).unwrap();
    wb.end_message().unwrap();
    wb.take()
}

fn write_simple_query(script: &str) -> Vec<u8> {
    let mut wb = WriteBuffer::new();
    wb.new_message(client::SIMPLE_QUERY).unwrap();
    wb.write_len_prefixed_utf8(script);
    wb.end_message().unwrap();
    wb.take()
}

/// Shared payload shape of `Execute`/`OptimisticExecute` (§4.1): headers
/// block, output format, expect-one, implicit limit, command text, claimed
/// `(in_tid, out_tid)`, argument block.
fn write_execute_like(tag: u8, command_text: &str, headers: &Headers, in_tid: Uuid, out_tid: Uuid) -> Vec<u8> {
    let mut wb = WriteBuffer::new();
    wb.new_message(tag).unwrap();
    headers.write(&mut wb);
    wb.write_byte(0); // output_format
    wb.write_byte(0); // expect_one
    wb.write_uint64(0); // implicit_limit
    wb.write_len_prefixed_utf8(command_text);
    wb.write_uuid(&in_tid);
    wb.write_uuid(&out_tid);
    wb.write_len_prefixed_bytes(&[]); // arguments
    wb.end_message().unwrap();
    wb.take()
}

fn write_fast_query(command_text: &str, bind_args: &[u8]) -> Vec<u8> {
    let mut wb = WriteBuffer::new();
    wb.new_message(client::FAST_QUERY).unwrap();
    wb.write_len_prefixed_utf8(command_text);
    wb.write_len_prefixed_bytes(bind_args);
    wb.end_message().unwrap();
    wb.take()
}

/// Reads exactly one frame's worth of bytes off `stream` into `rb` and
/// returns its tag, without consuming the payload cursor (caller decides
/// how much of the payload to read before `finish_message`).
async fn read_one_frame(stream: &mut DuplexStream, rb: &mut ReadBuffer) -> u8 {
    use tokio::io::AsyncReadExt;
    loop {
        if rb.take_message() {
            return rb.tag().unwrap();
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.expect("stream closed unexpectedly");
        assert!(n > 0, "stream closed before a full frame arrived");
        rb.feed(&chunk[..n]);
    }
}

fn spawn_engine(
    compiler: Arc<FakeCompiler<impl Fn(&registry::CompileRequest) -> CResult<QueryUnitGroup> + Send + Sync + 'static>>,
    backend: Box<dyn BackendConnection>,
    protocol_range: ProtocolRange,
) -> DuplexStream {
    let (client_side, server_side) = tokio::io::duplex(64 * 1024);
    let registry = Arc::new(DatabaseRegistry::new());
    let auth = Arc::new(Trust);
    let cancelled = Arc::new(AtomicBool::new(false));

    tokio::spawn(async move {
        let mut engine = ProtocolEngine::new(
            server_side,
            registry,
            compiler,
            backend,
            auth,
            protocol_range,
            cancelled,
            16,
        );
        if engine.handshake().await.is_err() {
            return;
        }
        let _ = engine.run().await;
    });

    client_side
}

#[tokio::test]
async fn handshake_requested_version_below_range_is_negotiated_down() {
    let compiler = Arc::new(FakeCompiler::new(|req| Ok(QueryUnitGroup::new(vec![plain_unit(&req.source)]))));
    let range = ProtocolRange {
        min: ProtocolVersion::new(1, 0),
        max: ProtocolVersion::new(2, 0),
    };
    let mut client = spawn_engine(compiler, Box::new(ScriptedBackend::default()), range);

    use tokio::io::AsyncWriteExt;
    client.write_all(&write_handshake(0, 5, "alice", "main")).await.unwrap();

    let mut rb = ReadBuffer::new();
    let tag = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(tag, server::NEGOTIATE_PROTOCOL_VERSION);
    let major = rb.read_uint16().unwrap();
    let minor = rb.read_uint16().unwrap();
    rb.finish_message().unwrap();
    assert_eq!((major, minor), (1, 0));

    let tag = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(tag, server::AUTHENTICATION);
}

#[tokio::test]
async fn handshake_requested_version_in_range_is_unchanged() {
    let compiler = Arc::new(FakeCompiler::new(|req| Ok(QueryUnitGroup::new(vec![plain_unit(&req.source)]))));
    let range = ProtocolRange {
        min: ProtocolVersion::new(1, 0),
        max: ProtocolVersion::new(2, 0),
    };
    let mut client = spawn_engine(compiler, Box::new(ScriptedBackend::default()), range);

    use tokio::io::AsyncWriteExt;
    client.write_all(&write_handshake(1, 5, "alice", "main")).await.unwrap();

    let mut rb = ReadBuffer::new();
    let tag = read_one_frame(&mut client, &mut rb).await;
    // No negotiation needed: straight to AuthenticationOk.
    assert_eq!(tag, server::AUTHENTICATION);
}

#[tokio::test]
async fn handshake_rejects_system_database() {
    let compiler = Arc::new(FakeCompiler::new(|req| Ok(QueryUnitGroup::new(vec![plain_unit(&req.source)]))));
    let range = ProtocolRange {
        min: ProtocolVersion::new(1, 0),
        max: ProtocolVersion::new(2, 0),
    };
    let mut client = spawn_engine(compiler, Box::new(ScriptedBackend::default()), range);

    use tokio::io::AsyncWriteExt;
    client.write_all(&write_handshake(1, 5, "alice", "edgedb")).await.unwrap();

    let mut rb = ReadBuffer::new();
    let tag = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(tag, server::ERROR_RESPONSE);
}

/// §8 scenario 2: an empty `Parse` query is a protocol error, and the
/// connection stays in its recovery sub-loop (no `ReadyForQuery`) until a
/// `Sync` arrives.
#[tokio::test]
async fn empty_parse_query_errors_and_recovers_on_sync() {
    let compiler = Arc::new(FakeCompiler::new(|req| Ok(QueryUnitGroup::new(vec![plain_unit(&req.source)]))));
    let range = ProtocolRange {
        min: ProtocolVersion::new(1, 0),
        max: ProtocolVersion::new(2, 0),
    };
    let mut client = spawn_engine(compiler, Box::new(ScriptedBackend::default()), range);

    use tokio::io::AsyncWriteExt;
    client.write_all(&write_handshake(1, 5, "alice", "main")).await.unwrap();

    let mut rb = ReadBuffer::new();
    let tag = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(tag, server::AUTHENTICATION);
    rb.finish_message().unwrap();
    // drain the rest of the auth sequence: BackendKeyData, ParameterStatus, ReadyForQuery
    for _ in 0..3 {
        let tag = read_one_frame(&mut client, &mut rb).await;
        skip_frame(&mut rb, tag);
    }

    client.write_all(&write_parse("")).await.unwrap();
    let tag = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(tag, server::ERROR_RESPONSE);
    skip_frame(&mut rb, tag);

    client.write_all(&write_sync()).await.unwrap();
    let tag = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(tag, server::READY_FOR_QUERY);
}

/// §8 scenario 4: `BEGIN; SELECT 1/0; SELECT 1` — the third statement must
/// fail with a transaction error because the second one left the view's
/// transaction frame in `InTxError`.
#[tokio::test]
async fn simple_query_script_propagates_transaction_error_after_mid_script_failure() {
    let compiler = Arc::new(FakeCompiler::new(|req| {
        let mut unit = plain_unit(&req.source);
        match req.source.trim() {
            "BEGIN" => unit.tx.begin_tx = true,
            "ROLLBACK" => unit.tx.rollback_tx = true,
            _ => {}
        }
        Ok(QueryUnitGroup::new(vec![unit]))
    }));
    let range = ProtocolRange {
        min: ProtocolVersion::new(1, 0),
        max: ProtocolVersion::new(2, 0),
    };
    let mut client = spawn_engine(compiler, Box::new(ScriptedBackend::default()), range);

    use tokio::io::AsyncWriteExt;
    client.write_all(&write_handshake(1, 5, "alice", "main")).await.unwrap();

    let mut rb = ReadBuffer::new();
    for _ in 0..4 {
        let tag = read_one_frame(&mut client, &mut rb).await;
        skip_frame(&mut rb, tag);
    }

    client.write_all(&write_simple_query("BEGIN; SELECT 1/0; SELECT 1")).await.unwrap();

    let first = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(first, server::COMMAND_COMPLETE, "BEGIN should commit its implicit-looking unit as CommandComplete");
    skip_frame(&mut rb, first);

    let second = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(second, server::ERROR_RESPONSE);
    skip_frame(&mut rb, second);

    let third = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(third, server::ERROR_RESPONSE);
    let code = read_len_prefixed_utf8_from(&mut rb);
    assert_eq!(code, "transaction_error");
    skip_message_remainder(&mut rb);

    let ready = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(ready, server::READY_FOR_QUERY);

    // §8 scenario 4: "after explicit ROLLBACK in the same script,
    // subsequent scripts succeed" — an explicit ROLLBACK must discard the
    // aborted frame so the connection can recover.
    client.write_all(&write_simple_query("ROLLBACK")).await.unwrap();
    let rollback_complete = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(rollback_complete, server::COMMAND_COMPLETE);
    skip_frame(&mut rb, rollback_complete);
    let rollback_ready = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(rollback_ready, server::READY_FOR_QUERY);

    client.write_all(&write_simple_query("SELECT 1")).await.unwrap();
    let recovered = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(recovered, server::COMMAND_COMPLETE, "a fresh script must succeed once the aborted frame is gone");
    skip_frame(&mut rb, recovered);
    let recovered_ready = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(recovered_ready, server::READY_FOR_QUERY);
}

/// §8 scenario 3: `O` with stale (all-zero) claimed type ids against a
/// query whose compiled ids are nonzero emits only the description frame;
/// the statement itself never runs.
#[tokio::test]
async fn optimistic_execute_with_stale_type_ids_only_emits_description() {
    let in_tid = Uuid::from_u128(1);
    let out_tid = Uuid::from_u128(2);
    let compiler = Arc::new(FakeCompiler::new(move |req| {
        let mut unit = plain_unit(&req.source);
        unit.in_type_id = in_tid;
        unit.out_type_id = out_tid;
        Ok(QueryUnitGroup::new(vec![unit]))
    }));
    let range = ProtocolRange {
        min: ProtocolVersion::new(1, 0),
        max: ProtocolVersion::new(2, 0),
    };
    let mut client = spawn_engine(compiler, Box::new(ScriptedBackend::default()), range);

    use tokio::io::AsyncWriteExt;
    client.write_all(&write_handshake(1, 5, "alice", "main")).await.unwrap();

    let mut rb = ReadBuffer::new();
    for _ in 0..4 {
        let tag = read_one_frame(&mut client, &mut rb).await;
        skip_frame(&mut rb, tag);
    }

    let headers = Headers::new();
    client
        .write_all(&write_execute_like(client::OPTIMISTIC_EXECUTE, "SELECT 1", &headers, Uuid::nil(), Uuid::nil()))
        .await
        .unwrap();

    let tag = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(tag, server::COMMAND_DATA_DESCRIPTION);
    skip_frame(&mut rb, tag);

    // No CommandComplete was queued for the rejected execute: a Sync goes
    // straight to ReadyForQuery.
    client.write_all(&write_sync()).await.unwrap();
    let tag = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(tag, server::READY_FOR_QUERY);
}

/// §8 scenario 6: `F` carrying a non-empty bind-args block is rejected
/// outright, since Fast Query is defined as a bind-argument-free path.
#[tokio::test]
async fn fast_query_with_bind_args_is_unsupported() {
    let compiler = Arc::new(FakeCompiler::new(|req| Ok(QueryUnitGroup::new(vec![plain_unit(&req.source)]))));
    let range = ProtocolRange {
        min: ProtocolVersion::new(1, 0),
        max: ProtocolVersion::new(2, 0),
    };
    let mut client = spawn_engine(compiler, Box::new(ScriptedBackend::default()), range);

    use tokio::io::AsyncWriteExt;
    client.write_all(&write_handshake(1, 5, "alice", "main")).await.unwrap();

    let mut rb = ReadBuffer::new();
    for _ in 0..4 {
        let tag = read_one_frame(&mut client, &mut rb).await;
        skip_frame(&mut rb, tag);
    }

    client.write_all(&write_fast_query("SELECT 1", &[0xAB])).await.unwrap();
    let tag = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(tag, server::ERROR_RESPONSE);
    let code = read_len_prefixed_utf8_from(&mut rb);
    assert_eq!(code, "unsupported_feature_error");
}

/// §8 scenario 7: the client's `AllowCapabilities` header lacks
/// `TRANSACTION` but the compiled unit requires it — execution is refused
/// before the backend is ever touched.
#[tokio::test]
async fn execute_with_disabled_capability_is_refused() {
    const TRANSACTION: u64 = 0b0000_0100;
    let compiler = Arc::new(FakeCompiler::new(|req| {
        let mut unit = plain_unit(&req.source);
        unit.capabilities = TRANSACTION;
        Ok(QueryUnitGroup::new(vec![unit]))
    }));
    let range = ProtocolRange {
        min: ProtocolVersion::new(1, 0),
        max: ProtocolVersion::new(2, 0),
    };
    let mut client = spawn_engine(compiler, Box::new(ScriptedBackend::default()), range);

    use tokio::io::AsyncWriteExt;
    client.write_all(&write_handshake(1, 5, "alice", "main")).await.unwrap();

    let mut rb = ReadBuffer::new();
    for _ in 0..4 {
        let tag = read_one_frame(&mut client, &mut rb).await;
        skip_frame(&mut rb, tag);
    }

    let mut headers = Headers::new();
    headers.insert(HeaderKey::AllowCapabilities, 0u64.to_be_bytes().to_vec());
    client
        .write_all(&write_execute_like(client::EXECUTE, "ROLLBACK", &headers, Uuid::nil(), Uuid::nil()))
        .await
        .unwrap();

    let tag = read_one_frame(&mut client, &mut rb).await;
    assert_eq!(tag, server::ERROR_RESPONSE);
    let code = read_len_prefixed_utf8_from(&mut rb);
    assert_eq!(code, "disabled_capability_error");
}

fn read_len_prefixed_utf8_from(rb: &mut ReadBuffer) -> String {
    rb.read_len_prefixed_utf8().unwrap()
}

fn skip_message_remainder(rb: &mut ReadBuffer) {
    while rb.read_byte().is_ok() {}
    let _ = rb.finish_message();
}

/// Consumes and discards the rest of the currently-parked frame's payload,
/// regardless of shape, so the test can move on to the next frame.
fn skip_frame(rb: &mut ReadBuffer, _tag: u8) {
    while rb.read_byte().is_ok() {}
    let _ = rb.finish_message();
}
