//! Process entry point: loads a `ServerConfig`, binds a listener, and
//! spawns one `ProtocolEngine` task per accepted connection (§5: one
//! `tokio::task` per connection, suspension points exactly at `.await`).
//!
//! The compiler and backend SQL driver are out-of-scope collaborators
//! (§1); this binary wires in the in-memory fakes from `registry` as a
//! stand-in so the server is runnable end to end, the same way the
//! workspace's own tests exercise the engine. A real deployment swaps
//! `build_compiler`/`build_backend` for a compiler-pool client and a
//! pooled SQL connection.

mod cli;

use std::sync::Arc;

use clap::Parser;
use common::config::{read_config, ServerConfig};
use common::err::CResult;
use common::log::tracing_factory::TracingFactory;
use common::server::ShutdownHandle;
use engine::auth::Trust;
use engine::handshake::{ProtocolRange, ProtocolVersion};
use engine::session::ProtocolEngine;
use registry::backend::FakeBackendConnection;
use registry::compiler::FakeCompiler;
use registry::model::{Cardinality, DdlMarkers, QueryUnit, QueryUnitGroup, TxMarkers};
use registry::DatabaseRegistry;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

#[tokio::main]
async fn main() -> CResult<()> {
    let args = cli::CliArgs::parse();
    TracingFactory::init_log(args.debug);

    let config = load_config(&args)?;
    let bind = args
        .bind
        .clone()
        .unwrap_or_else(|| format!("{}:{}", config.bind.host, config.bind.port));

    let protocol_range = ProtocolRange {
        min: ProtocolVersion::new(config.protocol.min_major, config.protocol.min_minor),
        max: ProtocolVersion::new(config.protocol.max_major, config.protocol.max_minor),
    };
    let cache_maxsize = config.cache.maxsize;

    let listener = TcpListener::bind(&bind).await?;
    let registry = Arc::new(DatabaseRegistry::new());
    let shutdown = ShutdownHandle::new();
    info!(%bind, "protocol core listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let registry = registry.clone();
        let cancelled = shutdown.flag();
        tokio::spawn(async move {
            info!(%peer, "accepted connection");

            let compiler = Arc::new(FakeCompiler::new(|req| Ok(QueryUnitGroup::new(vec![echo_unit(&req.source)]))));
            let backend = Box::new(FakeBackendConnection::default());
            let auth = Arc::new(Trust);

            let mut engine = ProtocolEngine::new(
                stream,
                registry,
                compiler,
                backend,
                auth,
                protocol_range,
                cancelled,
                cache_maxsize,
            );

            if let Err(err) = engine.handshake().await {
                error!(%peer, %err, "handshake failed");
                return;
            }
            if let Err(err) = engine.run().await {
                if !matches!(err, common::err::CoreError::ConnectionAbortedError) {
                    error!(%peer, %err, "connection loop ended with error");
                }
            }
            info!(%peer, "connection closed");
        });
    }
}

fn load_config(args: &cli::CliArgs) -> CResult<ServerConfig> {
    match &args.config {
        Some(path) => read_config(path),
        None => Ok(ServerConfig::default()),
    }
}

/// Stand-in for the real compiler: wraps `source` in a single
/// non-transactional, read-only `QueryUnit` so the engine's parse/execute
/// handlers have something to dispatch to before a real compiler pool is
/// wired in.
fn echo_unit(source: &str) -> QueryUnit {
    QueryUnit {
        sql: vec![source.to_string()],
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
