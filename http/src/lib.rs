//! The thin HTTP/JSON adapter (§6): `POST /{db}/edgeql` and a matching
//! `GET`, translating a JSON request body (or query string) into the same
//! compile-then-execute path the binary protocol's `Parse`+`Execute` pair
//! drives — no separate execution logic, just a different front door onto
//! `registry`/`view`/`executor`.
//!
//! Full JSON/HTTP framing (content negotiation, streaming, pagination) is
//! out of scope (§1); this crate only implements the one documented route.

use std::sync::Arc;

use actix_web::{get, post, web, HttpResponse, Responder};
use common::err::CoreError;
use common::fingerprint::{Fingerprint, FingerprintInput};
use executor::execute_group;
use registry::backend::BackendConnection;
use registry::model::{Cardinality, DdlMarkers, QueryUnit, QueryUnitGroup, TxMarkers};
use registry::{CompileRequest, Compiler, DatabaseRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use view::ConnectionView;

/// Builds a fresh backend connection per request; the HTTP adapter holds
/// no persistent session, so every call gets its own leased connection
/// (§5: "backend connections are exclusive per in-flight unit group").
pub trait BackendFactory: Send + Sync {
    fn open(&self) -> Box<dyn BackendConnection>;
}

impl<F> BackendFactory for F
where
    F: Fn() -> Box<dyn BackendConnection> + Send + Sync,
{
    fn open(&self) -> Box<dyn BackendConnection> {
        (self)()
    }
}

pub struct AppState {
    pub registry: Arc<DatabaseRegistry>,
    pub compiler: Arc<dyn Compiler>,
    pub backend_factory: Arc<dyn BackendFactory>,
}

impl AppState {
    pub fn new(registry: Arc<DatabaseRegistry>, compiler: Arc<dyn Compiler>, backend_factory: Arc<dyn BackendFactory>) -> Self {
        AppState {
            registry,
            compiler,
            backend_factory,
        }
    }
}

/// `{query, variables?, globals?, module?, namespace?, limit?}` (§6).
#[derive(Debug, Clone, Deserialize)]
pub struct EdgeqlRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Value,
    #[serde(default)]
    pub globals: Value,
    pub module: Option<String>,
    pub namespace: Option<String>,
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    kind: &'static str,
    code: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum EdgeqlResponse {
    Ok { data: Value },
    Err { error: ErrorBody },
}

fn error_kind(err: &CoreError) -> &'static str {
    match err {
        CoreError::ProtocolError(_) => "ProtocolError",
        CoreError::UnsupportedFeatureError(_) => "UnsupportedFeatureError",
        CoreError::AuthenticationError(_) => "AuthenticationError",
        CoreError::AccessError(_) => "AccessError",
        CoreError::DisabledCapabilityError(_) => "DisabledCapabilityError",
        CoreError::TypeSpecNotFoundError(_) => "TypeSpecNotFoundError",
        CoreError::TransactionError(_) => "TransactionError",
        CoreError::BackendError(_) => "BackendError",
        CoreError::BackendQueryCancelledError => "BackendQueryCancelledError",
        CoreError::ConnectionAbortedError => "ConnectionAbortedError",
        CoreError::InternalServerError(_) => "InternalServerError",
        CoreError::Io(_) => "InternalServerError",
        CoreError::Json(_) => "InternalServerError",
    }
}

fn error_code(err: &CoreError) -> &'static str {
    match err {
        CoreError::ProtocolError(_) => "protocol_error",
        CoreError::UnsupportedFeatureError(_) => "unsupported_feature_error",
        CoreError::AuthenticationError(_) => "authentication_error",
        CoreError::AccessError(_) => "access_error",
        CoreError::DisabledCapabilityError(_) => "disabled_capability_error",
        CoreError::TypeSpecNotFoundError(_) => "type_spec_not_found_error",
        CoreError::TransactionError(_) => "transaction_error",
        CoreError::BackendError(_) => "backend_error",
        CoreError::BackendQueryCancelledError => "backend_query_cancelled_error",
        CoreError::ConnectionAbortedError => "connection_aborted_error",
        CoreError::InternalServerError(_) => "internal_server_error",
        CoreError::Io(_) => "internal_server_error",
        CoreError::Json(_) => "internal_server_error",
    }
}

/// Stand-in query unit for the echoed request, same shape the `server`
/// binary's placeholder compiler produces — the real EdgeQL compiler is
/// an out-of-scope collaborator (§1).
fn echo_unit(source: &str, read_only: bool) -> QueryUnit {
    QueryUnit {
        sql: vec![source.to_string()],
        status: Vec::new(),
        capabilities: if read_only { 0 } else { u64::MAX },
        in_type_id: uuid::Uuid::nil(),
        in_type_data: Vec::new(),
        out_type_id: uuid::Uuid::nil(),
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

/// Compiles via the view's and database's normal cache/single-flight path
/// (§4.2–§4.3), the same logic `ProtocolEngine::compile_or_get` drives for
/// the binary protocol, just without a persistent `ConnectionView` cache
/// to consult first (every HTTP request is its own ephemeral view).
async fn compile(
    state: &AppState,
    db: &registry::Database,
    source: &str,
    module: Option<String>,
    namespace: Option<String>,
    read_only: bool,
) -> Result<registry::model::CompiledQuery, CoreError> {
    let fp = Fingerprint::compute(&FingerprintInput {
        tokenized_source: source,
        protocol_major: 2,
        protocol_minor: 0,
        output_format: 0,
        expect_one: false,
        implicit_limit: 0,
        inline_typeids: false,
        inline_typenames: false,
        inline_objectids: false,
        allow_capabilities: u64::MAX,
        module: module.as_deref(),
        namespace: namespace.as_deref(),
        read_only,
    });

    if let Some(published) = db.published_compile(&fp) {
        return Ok(published);
    }
    if let Some(notify) = db.begin_compile(&fp) {
        notify.notified().await;
        if let Some(published) = db.published_compile(&fp) {
            return Ok(published);
        }
    }

    let request = CompileRequest {
        fingerprint: fp,
        source: source.to_string(),
        module,
        namespace,
    };
    match state.compiler.compile(&request, db.dbver()).await {
        Ok(group) => {
            let compiled = registry::model::CompiledQuery {
                group,
                extra: Default::default(),
            };
            db.finish_compile(fp, compiled.clone());
            Ok(compiled)
        }
        Err(err) => {
            db.abort_compile(&fp);
            Err(err)
        }
    }
}

async fn run_query(state: &AppState, db_name: &str, req: EdgeqlRequest, read_only: bool) -> Result<Value, CoreError> {
    let db = state.registry.get_or_create(db_name);

    let compiled = compile(state, &db, &req.query, req.module.clone(), req.namespace.clone(), read_only).await?;

    if read_only && compiled.group.capabilities != 0 {
        return Err(CoreError::DisabledCapabilityError(compiled.group.capabilities));
    }

    let mut view = ConnectionView::new(2, 0, u64::MAX, 1);
    let mut backend = state.backend_factory.open();
    let outcome = execute_group(&compiled, &[], &mut view, &db, backend.as_mut(), false).await?;

    Ok(serde_json::json!({ "rows_affected": outcome.rows.rows_affected }))
}

#[post("/{db}/edgeql")]
pub async fn edgeql_post(path: web::Path<String>, state: web::Data<AppState>, body: web::Json<EdgeqlRequest>) -> impl Responder {
    let db_name = path.into_inner();
    let result = run_query(&state, &db_name, body.into_inner(), false).await;
    respond(result)
}

#[derive(Debug, Deserialize)]
pub struct EdgeqlQueryString {
    pub query: String,
    pub module: Option<String>,
    pub namespace: Option<String>,
    pub limit: Option<u64>,
}

/// `GET` form: the query travels in the query string and is always
/// treated as read-only (§6: "path `query` is read-only").
#[get("/{db}/edgeql")]
pub async fn edgeql_get(path: web::Path<String>, state: web::Data<AppState>, query: web::Query<EdgeqlQueryString>) -> impl Responder {
    let db_name = path.into_inner();
    let q = query.into_inner();
    let req = EdgeqlRequest {
        query: q.query,
        variables: Value::Null,
        globals: Value::Null,
        module: q.module,
        namespace: q.namespace,
        limit: q.limit,
    };
    let result = run_query(&state, &db_name, req, true).await;
    respond(result)
}

/// §6: `{"data": …}` with HTTP 200 on success, `{"error": {...}}` with
/// HTTP 400 on failure.
fn respond(result: Result<Value, CoreError>) -> HttpResponse {
    match result {
        Ok(data) => HttpResponse::Ok().json(EdgeqlResponse::Ok { data }),
        Err(err) => HttpResponse::BadRequest().json(EdgeqlResponse::Err {
            error: ErrorBody {
                message: err.to_string(),
                kind: error_kind(&err),
                code: error_code(&err),
            },
        }),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(edgeql_post).service(edgeql_get);
}
