//! The Protocol Engine (§4.5): one instance per connection, driving the
//! framed read/write loop, handshake/auth, and tag dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::err::{CResult, CoreError};
use common::fingerprint::{Fingerprint, FingerprintInput};
use protocol::headers::{HeaderKey, Headers};
use protocol::tags::{client, server};
use protocol::{ReadBuffer, WriteBuffer};
use registry::backend::BackendConnection;
use registry::model::CompiledQuery;
use registry::{CompileRequest, Compiler, Database, DatabaseRegistry};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use view::{ConnectionView, TxState};

use crate::auth::{check_database_access, AuthMethod, AuthRequest};
use crate::handshake::{Negotiated, ProtocolRange, ProtocolVersion};
use crate::messages::{
    self, DescribeMessage, ExecuteMessage, FastQueryMessage, HandshakeMessage, ParseMessage, RestoreMessage,
    SimpleQueryMessage,
};

const READ_CHUNK: usize = 8192;

/// Transaction-state byte reported in `ReadyForQuery`, mirroring the
/// three states of the connection view's state machine (§4.4).
fn tx_state_byte(view: &ConnectionView) -> u8 {
    match view.tx_state() {
        TxState::Idle => b'I',
        TxState::InTx => b'T',
        TxState::InTxError => b'E',
    }
}

/// Maps an abstract error kind (§7) to the wire error code carried in an
/// `ErrorResponse` frame.
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

pub struct ProtocolEngine<S> {
    stream: S,
    read_buf: ReadBuffer,
    write_buf: WriteBuffer,
    view: ConnectionView,
    db: Arc<Database>,
    registry: Arc<DatabaseRegistry>,
    compiler: Arc<dyn Compiler>,
    backend: Box<dyn BackendConnection>,
    auth: Arc<dyn AuthMethod>,
    protocol_range: ProtocolRange,
    negotiated: ProtocolVersion,
    cancelled: Arc<AtomicBool>,
    last_compiled: Option<(Fingerprint, CompiledQuery)>,
}

impl<S> ProtocolEngine<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: S,
        registry: Arc<DatabaseRegistry>,
        compiler: Arc<dyn Compiler>,
        backend: Box<dyn BackendConnection>,
        auth: Arc<dyn AuthMethod>,
        protocol_range: ProtocolRange,
        cancelled: Arc<AtomicBool>,
        statements_cache_maxsize: usize,
    ) -> Self {
        ProtocolEngine {
            stream,
            read_buf: ReadBuffer::new(),
            write_buf: WriteBuffer::new(),
            view: ConnectionView::new(0, 0, u64::MAX, statements_cache_maxsize),
            db: Arc::new(Database::new("<unattached>")),
            registry,
            compiler,
            backend,
            auth,
            protocol_range,
            negotiated: protocol_range.max,
            cancelled,
            last_compiled: None,
        }
    }

    async fn next_tag(&mut self) -> CResult<u8> {
        loop {
            if self.read_buf.take_message() {
                return Ok(self.read_buf.tag().expect("tag set by take_message"));
            }
            if self.cancelled.load(Ordering::Acquire) {
                return Err(CoreError::ConnectionAbortedError);
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(CoreError::ConnectionAbortedError);
            }
            self.read_buf.feed(&chunk[..n]);
        }
    }

    async fn flush(&mut self) -> CResult<()> {
        let bytes = self.write_buf.take();
        if !bytes.is_empty() {
            self.stream.write_all(&bytes).await?;
        }
        Ok(())
    }

    /// Performs the handshake and authentication (§4.5), attaching the
    /// view to its database on success.
    pub async fn handshake(&mut self) -> CResult<()> {
        let tag = self.next_tag().await?;
        if tag != client::CLIENT_HANDSHAKE {
            return Err(CoreError::ProtocolError(format!(
                "expected handshake message, got tag {:#04x}",
                tag
            )));
        }
        let requested = {
            let rb = &mut self.read_buf;
            let msg = HandshakeMessage::read(rb, |major, minor| {
                ProtocolVersion::new(major, minor).is_legacy()
            })?;
            msg
        };
        self.read_buf.finish_message()?;

        let Negotiated { version, clamped } = self
            .protocol_range
            .negotiate(ProtocolVersion::new(requested.major, requested.minor));
        self.negotiated = version;
        self.view.protocol_major = version.major;
        self.view.protocol_minor = version.minor;

        if clamped {
            messages::write_negotiate_protocol_version(&mut self.write_buf, version.major, version.minor)?;
        }

        if let Err(err) = check_database_access(&requested.database) {
            messages::write_error_response(&mut self.write_buf, error_code(&err), &err.to_string())?;
            self.flush().await?;
            return Err(err);
        }

        let auth_request = AuthRequest {
            user: requested.user.clone(),
            database: requested.database.clone(),
            credential: requested.credential.clone(),
        };
        if let Err(err) = self.auth.authenticate(&auth_request).await {
            messages::write_error_response(&mut self.write_buf, error_code(&err), &err.to_string())?;
            self.flush().await?;
            return Err(err);
        }

        self.db = self.registry.new_view(&requested.database, self.view.id);

        messages::write_authentication_ok(&mut self.write_buf)?;
        messages::write_backend_key_data(&mut self.write_buf)?;
        messages::write_parameter_status(&mut self.write_buf, "server_version", env!("CARGO_PKG_VERSION"))?;
        messages::write_ready_for_query(&mut self.write_buf, tx_state_byte(&self.view))?;
        self.flush().await?;

        info!(user = %requested.user, database = %requested.database, "connection established");
        Ok(())
    }

    /// Main dispatch loop: one iteration per request, until `Terminate`
    /// or a fatal error.
    pub async fn run(&mut self) -> CResult<()> {
        loop {
            let tag = match self.next_tag().await {
                Ok(tag) => tag,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => return Err(err),
            };

            if tag == client::TERMINATE {
                self.read_buf.finish_message()?;
                self.db.unsubscribe(&self.view.id);
                return Ok(());
            }

            let result = self.handle_message(tag).await;
            if let Err(err) = result {
                if err.is_fatal() {
                    return Err(err);
                }
                messages::write_error_response(&mut self.write_buf, error_code(&err), &err.to_string())?;
                if tag == client::SIMPLE_QUERY {
                    messages::write_ready_for_query(&mut self.write_buf, tx_state_byte(&self.view))?;
                    self.flush().await?;
                } else {
                    self.flush().await?;
                    self.recover_until_sync().await?;
                }
            }
        }
    }

    /// Error recovery sub-loop (§7): discard messages until `Sync`, then
    /// emit `ReadyForQuery`.
    async fn recover_until_sync(&mut self) -> CResult<()> {
        loop {
            let tag = self.next_tag().await?;
            self.read_buf.finish_message().ok();
            if tag == client::SYNC {
                messages::write_ready_for_query(&mut self.write_buf, tx_state_byte(&self.view))?;
                self.flush().await?;
                return Ok(());
            }
            if tag == client::TERMINATE {
                return Err(CoreError::ConnectionAbortedError);
            }
        }
    }

    async fn handle_message(&mut self, tag: u8) -> CResult<()> {
        match tag {
            client::PARSE => self.handle_parse().await,
            client::DESCRIBE => self.handle_describe().await,
            client::EXECUTE => self.handle_execute().await,
            client::OPTIMISTIC_EXECUTE => self.handle_optimistic_execute().await,
            client::FAST_QUERY => self.handle_fast_query().await,
            client::SIMPLE_QUERY => self.handle_simple_query().await,
            client::SYNC => {
                self.read_buf.finish_message()?;
                messages::write_ready_for_query(&mut self.write_buf, tx_state_byte(&self.view))?;
                self.flush().await
            }
            client::DUMP => self.handle_dump().await,
            client::RESTORE => self.handle_restore_begin().await,
            client::RESTORE_BLOCK => self.handle_restore_block().await,
            client::RESTORE_EOF => self.handle_restore_eof().await,
            other => Err(CoreError::ProtocolError(format!("unknown message tag {:#04x}", other))),
        }
    }

    fn fingerprint_of(&self, command_text: &str, headers: &Headers, output_format: u8, expect_one: bool, implicit_limit: u64) -> (Fingerprint, u64, Option<String>) {
        let allow_capabilities = headers
            .get(HeaderKey::AllowCapabilities)
            .map(|bytes| {
                let mut arr = [0u8; 8];
                let n = bytes.len().min(8);
                arr[..n].copy_from_slice(&bytes[..n]);
                u64::from_be_bytes(arr)
            })
            .unwrap_or(u64::MAX);
        let module = headers
            .get(HeaderKey::ExplicitModule)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
        let inline_typeids = headers.get(HeaderKey::ImplicitTypeids).is_some();
        let inline_typenames = headers.get(HeaderKey::ImplicitTypenames).is_some();
        let inline_objectids = headers.get(HeaderKey::ExplicitObjectids).is_some();

        let fp = Fingerprint::compute(&FingerprintInput {
            tokenized_source: command_text,
            protocol_major: self.view.protocol_major,
            protocol_minor: self.view.protocol_minor,
            output_format,
            expect_one,
            implicit_limit,
            inline_typeids,
            inline_typenames,
            inline_objectids,
            allow_capabilities,
            module: module.as_deref(),
            namespace: None,
            read_only: false,
        });
        (fp, allow_capabilities, module)
    }

    /// Compiles `command_text`, consulting the view's cache and the
    /// database's single-flight broker first (§4.2, §4.3, §8).
    async fn compile_or_get(&mut self, command_text: &str, fp: Fingerprint, module: Option<String>) -> CResult<CompiledQuery> {
        if let Some(hit) = self.view.lookup_compiled_query(&fp, &self.db) {
            return Ok(hit);
        }
        if let Some(published) = self.db.published_compile(&fp) {
            self.view.cache_compiled_query(fp, published.clone(), &self.db);
            return Ok(published);
        }

        if let Some(notify) = self.db.begin_compile(&fp) {
            notify.notified().await;
            if let Some(published) = self.db.published_compile(&fp) {
                self.view.cache_compiled_query(fp, published.clone(), &self.db);
                return Ok(published);
            }
        }

        let request = CompileRequest {
            fingerprint: fp,
            source: command_text.to_string(),
            module,
            namespace: None,
        };
        match self.compiler.compile(&request, self.db.dbver()).await {
            Ok(group) => {
                let compiled = CompiledQuery {
                    group,
                    extra: Default::default(),
                };
                self.db.finish_compile(fp, compiled.clone());
                self.view.cache_compiled_query(fp, compiled.clone(), &self.db);
                Ok(compiled)
            }
            Err(err) => {
                self.db.abort_compile(&fp);
                Err(err)
            }
        }
    }

    fn check_capabilities(&self, required: u64, allow_capabilities: u64) -> CResult<()> {
        let effective_mask = self.view.capability_mask & allow_capabilities;
        let disabled = required & !effective_mask;
        if disabled != 0 {
            return Err(CoreError::DisabledCapabilityError(disabled));
        }
        Ok(())
    }

    async fn handle_parse(&mut self) -> CResult<()> {
        let msg = ParseMessage::read(&mut self.read_buf)?;
        self.read_buf.finish_message()?;

        if msg.command_text.is_empty() {
            return Err(CoreError::ProtocolError("empty query".to_string()));
        }

        let (fp, allow_capabilities, module) =
            self.fingerprint_of(&msg.command_text, &msg.headers, msg.output_format, msg.expect_one, msg.implicit_limit);
        let compiled = self.compile_or_get(&msg.command_text, fp, module).await?;
        self.check_capabilities(compiled.group.capabilities, allow_capabilities)?;

        let (in_tid, out_tid, _) = compiled.group.outward_type();
        self.last_compiled = Some((fp, compiled));

        messages::write_parse_complete(&mut self.write_buf, in_tid, out_tid)?;
        self.flush().await
    }

    async fn handle_describe(&mut self) -> CResult<()> {
        let msg = DescribeMessage::read(&mut self.read_buf)?;
        self.read_buf.finish_message()?;

        if msg.aspect != 0 {
            return Err(CoreError::ProtocolError(format!("bad describe mode: {}", msg.aspect)));
        }

        let (_, compiled) = self
            .last_compiled
            .as_ref()
            .ok_or_else(|| CoreError::TypeSpecNotFoundError("no prior parse".to_string()))?;
        let first = &compiled.group.units[0];
        messages::write_command_data_description(
            &mut self.write_buf,
            first.in_type_id,
            &first.in_type_data,
            first.out_type_id,
            &first.out_type_data,
        )?;
        self.flush().await
    }

    async fn handle_execute(&mut self) -> CResult<()> {
        let msg = ExecuteMessage::read(&mut self.read_buf)?;
        self.read_buf.finish_message()?;

        let (fp, allow_capabilities, module) = self.fingerprint_of(
            &msg.command_text,
            &msg.headers,
            msg.output_format,
            msg.expect_one,
            msg.implicit_limit,
        );
        let compiled = self.compile_or_get(&msg.command_text, fp, module).await?;
        self.check_capabilities(compiled.group.capabilities, allow_capabilities)?;

        self.run_compiled(compiled, msg.arguments).await
    }

    /// `O` — executes only if the client's claimed `(in_tid, out_tid)`
    /// match the query currently compiled for this fingerprint; a
    /// mismatch (typically all-zero ids from a client with no cached
    /// description) emits the current description and stops without
    /// running anything (§8 scenario 3).
    async fn handle_optimistic_execute(&mut self) -> CResult<()> {
        let msg = ExecuteMessage::read(&mut self.read_buf)?;
        self.read_buf.finish_message()?;

        let (fp, allow_capabilities, module) = self.fingerprint_of(
            &msg.command_text,
            &msg.headers,
            msg.output_format,
            msg.expect_one,
            msg.implicit_limit,
        );
        let compiled = self.compile_or_get(&msg.command_text, fp, module).await?;
        self.check_capabilities(compiled.group.capabilities, allow_capabilities)?;

        let (in_tid, out_tid, _) = compiled.group.outward_type();
        if in_tid != msg.in_tid || out_tid != msg.out_tid {
            let first = &compiled.group.units[0];
            messages::write_command_data_description(
                &mut self.write_buf,
                first.in_type_id,
                &first.in_type_data,
                first.out_type_id,
                &first.out_type_data,
            )?;
            return self.flush().await;
        }

        self.run_compiled(compiled, msg.arguments).await
    }

    async fn handle_fast_query(&mut self) -> CResult<()> {
        let msg = FastQueryMessage::read(&mut self.read_buf)?;
        self.read_buf.finish_message()?;

        if !msg.bind_args.is_empty() {
            return Err(CoreError::UnsupportedFeatureError(
                "Fast Query does not accept bind arguments".to_string(),
            ));
        }

        let headers = Headers::new();
        let (fp, allow_capabilities, module) = self.fingerprint_of(&msg.command_text, &headers, 0, false, 0);
        let compiled = self.compile_or_get(&msg.command_text, fp, module).await?;
        self.check_capabilities(compiled.group.capabilities, allow_capabilities)?;

        self.run_compiled(compiled, Vec::new()).await
    }

    async fn run_compiled(&mut self, compiled: CompiledQuery, arguments: Vec<u8>) -> CResult<()> {
        let outcome = executor::execute_group(&compiled, &arguments, &mut self.view, &self.db, self.backend.as_mut(), false).await?;
        let status = format!("OK {} rows", outcome.rows.rows_affected);
        messages::write_command_complete(&mut self.write_buf, &status)?;
        self.flush().await
    }

    async fn handle_simple_query(&mut self) -> CResult<()> {
        let msg = SimpleQueryMessage::read(&mut self.read_buf)?;
        self.read_buf.finish_message()?;

        let statements: Vec<String> = split_script(&msg.script).into_iter().map(str::to_string).collect();
        for statement in &statements {
            match self.execute_script_statement(statement).await {
                Ok(outcome) => {
                    let status = format!("OK {} rows", outcome.rows.rows_affected);
                    messages::write_command_complete(&mut self.write_buf, &status)?;
                }
                Err(err) => {
                    warn!(statement = %statement, error = %err, "simple query statement failed");
                    messages::write_error_response(&mut self.write_buf, error_code(&err), &err.to_string())?;
                }
            }
        }

        messages::write_ready_for_query(&mut self.write_buf, tx_state_byte(&self.view))?;
        self.flush().await
    }

    async fn execute_script_statement(&mut self, statement: &str) -> CResult<executor::ExecutionOutcome> {
        let headers = Headers::new();
        let (fp, allow_capabilities, module) = self.fingerprint_of(statement, &headers, 0, false, 0);
        let compiled = self.compile_or_get(statement, fp, module).await?;
        self.check_capabilities(compiled.group.capabilities, allow_capabilities)?;
        executor::execute_group(&compiled, &[], &mut self.view, &self.db, self.backend.as_mut(), false).await
    }

    async fn handle_dump(&mut self) -> CResult<()> {
        let _headers = Headers::parse(&mut self.read_buf)?;
        self.read_buf.finish_message()?;

        let mut seq = 0u32;
        let mut total_bytes = 0usize;
        while let Some(block) = self.backend.dump_block(seq).await? {
            total_bytes += block.len();
            seq += 1;
        }
        debug!(blocks = seq, total_bytes, "dump completed");
        messages::write_command_complete(&mut self.write_buf, &format!("DUMP {seq} blocks"))?;
        self.flush().await
    }

    async fn handle_restore_begin(&mut self) -> CResult<()> {
        let msg = RestoreMessage::read(&mut self.read_buf)?;
        self.read_buf.finish_message()?;
        self.backend.restore_begin(&msg.header_data).await?;

        self.write_buf.new_message(server::RESTORE_READY)?;
        self.write_buf.end_message()?;
        self.flush().await
    }

    async fn handle_restore_block(&mut self) -> CResult<()> {
        let block = self.read_buf.read_len_prefixed_bytes()?;
        self.read_buf.finish_message()?;
        self.backend.restore_block(&block).await
    }

    async fn handle_restore_eof(&mut self) -> CResult<()> {
        self.read_buf.finish_message()?;
        self.backend.restore_commit().await?;
        messages::write_command_complete(&mut self.write_buf, "RESTORE")?;
        self.flush().await
    }
}

/// Naive `;`-delimited script split for the Simple Query path. Real
/// tokenization is a compiler concern; this only needs to feed each
/// statement through `compile_or_get` independently.
fn split_script(script: &str) -> Vec<&str> {
    script
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}
