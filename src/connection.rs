//! PostgreSQL connection implementation.
//!
//! This module provides the main connection type that handles:
//! - Startup, SSL negotiation, and authentication
//! - Simple and extended query protocols
//! - Transaction state tracking and cancellation
//! - Prepared statement management

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::config::{Notification, NotificationSink, PgConfig, ServerNotice, SslMode};
use crate::error::{PgError, PgResult, ServerFields};
use crate::protocol::*;
use crate::row::{Row, RowDescription};
use crate::scram::ScramClient;
use crate::statement::{PreparedStatement, StatementCache};
use crate::transport::Transport;
use crate::types::{Format, Oid, PgValue};

// ============================================================================
// Query Result
// ============================================================================

/// An opaque COPY protocol frame, surfaced to the caller as-is.
#[derive(Debug, Clone)]
pub enum CopyFrame {
    /// CopyInResponse / CopyOutResponse / CopyBothResponse
    Begin {
        out: bool,
        binary: bool,
        column_formats: Vec<Format>,
    },
    Data(Bytes),
    Done,
}

/// Result of one statement's execution.
#[derive(Debug)]
pub struct QueryResult {
    /// Column descriptions, shared with every row of this result
    pub columns: Arc<RowDescription>,
    /// Raw rows; decode through `Row::get` or a `RowReader`
    pub rows: Vec<Row>,
    /// Command tag (e.g. "SELECT 5" or "INSERT 0 1")
    pub command_tag: String,
    /// COPY frames observed while this result was open
    pub copy: Vec<CopyFrame>,
}

impl QueryResult {
    fn new() -> Self {
        Self {
            columns: RowDescription::empty(),
            rows: Vec::new(),
            command_tag: String::new(),
            copy: Vec::new(),
        }
    }

    /// Rows affected according to the command tag
    /// (e.g. "INSERT 0 5" -> 5, "UPDATE 3" -> 3).
    pub fn rows_affected(&self) -> u64 {
        let parts: Vec<&str> = self.command_tag.split_whitespace().collect();
        match parts.as_slice() {
            ["INSERT", _, n] | ["UPDATE", n] | ["DELETE", n] | ["SELECT", n] | ["COPY", n] => {
                n.parse().unwrap_or(0)
            }
            _ => 0,
        }
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Key for cancelling this connection's outstanding query from elsewhere.
#[derive(Debug, Clone, Copy)]
pub struct CancelToken {
    pub process_id: i32,
    pub secret_key: i32,
}

impl CancelToken {
    /// Open a side transport, fire CancelRequest, and close it. The primary
    /// connection observes the cancellation as an ErrorResponse with
    /// SQLSTATE 57014 at its next read.
    pub async fn cancel(&self, config: &PgConfig) -> PgResult<()> {
        let mut transport =
            Transport::connect(&config.host, config.port, config.io_timeout).await?;
        let msg = CancelRequest {
            process_id: self.process_id,
            secret_key: self.secret_key,
        };
        transport.write_full(&msg.encode()).await?;
        transport.close().await;
        Ok(())
    }
}

// ============================================================================
// Connection
// ============================================================================

/// High-level protocol phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Startup finished; between commands
    Ready,
    /// Unrecoverable transport or protocol failure
    Fatal,
    /// Terminated by us
    Closed,
}

/// A PostgreSQL connection: one transport plus the protocol state machine.
///
/// One operation runs at a time; each method drives the exchange to its
/// synchronization point before returning.
pub struct PgConnection {
    transport: Transport,
    /// Incoming frames accumulate here until a full message is buffered
    read_buf: BytesMut,
    /// Outgoing messages assemble here and are flushed atomically
    write_buf: BytesMut,
    config: PgConfig,
    statement_cache: StatementCache,
    transaction_status: TransactionStatus,
    backend_pid: i32,
    backend_secret_key: i32,
    /// ParameterStatus values received from the server
    parameters: HashMap<String, String>,
    /// Per-channel LISTEN/NOTIFY subscribers
    subscriptions: HashMap<String, NotificationSink>,
    closed: bool,
    fatal: bool,
}

impl fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConnection")
            .field("backend_pid", &self.backend_pid)
            .field("phase", &self.phase())
            .field("transaction_status", &self.transaction_status)
            .field("closed", &self.closed)
            .field("fatal", &self.fatal)
            .finish()
    }
}

impl PgConnection {
    /// Connect to a PostgreSQL server by URL.
    pub async fn connect(url: &str) -> PgResult<Self> {
        let config = PgConfig::from_url(url)?;
        Self::connect_with_config(config).await
    }

    /// Connect with explicit configuration.
    pub async fn connect_with_config(config: PgConfig) -> PgResult<Self> {
        let transport =
            Transport::connect(&config.host, config.port, config.io_timeout).await?;
        let transport = negotiate_ssl(transport, &config).await?;
        Self::connect_with_transport(transport, config).await
    }

    /// Run startup and authentication over an already-established transport.
    ///
    /// SSL negotiation is the caller's business here; this is also the entry
    /// point for in-memory transports in tests.
    pub async fn connect_with_transport(transport: Transport, config: PgConfig) -> PgResult<Self> {
        let mut conn = Self {
            transport,
            read_buf: BytesMut::with_capacity(32768),
            write_buf: BytesMut::with_capacity(8192),
            statement_cache: StatementCache::new(config.statement_cache_capacity),
            config,
            transaction_status: TransactionStatus::Idle,
            backend_pid: 0,
            backend_secret_key: 0,
            parameters: HashMap::new(),
            subscriptions: HashMap::new(),
            closed: false,
            fatal: false,
        };

        conn.startup().await?;
        Ok(conn)
    }

    /// Perform the startup handshake and authentication.
    async fn startup(&mut self) -> PgResult<()> {
        let mut options = vec![("client_encoding".to_string(), "UTF8".to_string())];
        options.push(("DateStyle".to_string(), "ISO".to_string()));
        if let Some(name) = &self.config.application_name {
            options.push(("application_name".to_string(), name.clone()));
        }
        if let Some(tz) = &self.config.timezone {
            options.push(("TimeZone".to_string(), tz.clone()));
        }
        options.extend(self.config.additional_startup_params.iter().cloned());

        let startup = StartupMessage {
            user: self.config.user.clone(),
            database: self.config.effective_database().to_string(),
            options,
        };
        self.send_message(&startup).await?;

        loop {
            let msg = self.receive_message().await?;

            match msg {
                BackendMessage::AuthenticationOk => {
                    // Continue to ReadyForQuery
                }
                BackendMessage::AuthenticationCleartextPassword => {
                    let password = self.require_password()?.to_string();
                    self.send_message(&PasswordMessage { password }).await?;
                }
                BackendMessage::AuthenticationMD5Password { salt } => {
                    let password = self.require_password()?;
                    let hash = md5_password(&self.config.user, password, &salt);
                    self.send_message(&PasswordMessage { password: hash })
                        .await?;
                }
                BackendMessage::AuthenticationSASL { mechanisms } => {
                    if !mechanisms.iter().any(|m| m == "SCRAM-SHA-256") {
                        return Err(PgError::UnsupportedAuth(format!(
                            "SASL mechanisms offered: {:?}",
                            mechanisms
                        )));
                    }
                    self.authenticate_scram().await?;
                }
                BackendMessage::AuthenticationUnsupported { method } => {
                    return Err(PgError::UnsupportedAuth(format!(
                        "authentication method {}",
                        method
                    )));
                }
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    debug!(pid = self.backend_pid, "connection ready");
                    return Ok(());
                }
                BackendMessage::ErrorResponse { fields } => {
                    return Err(PgError::AuthFailed(fields));
                }
                _ => {
                    // Ignore anything else during startup
                }
            }
        }
    }

    /// Run the SCRAM-SHA-256 exchange after the server offered it.
    async fn authenticate_scram(&mut self) -> PgResult<()> {
        let password = self.require_password()?;
        let mut scram = ScramClient::new(&self.config.user, password);

        let initial = SaslInitialResponseMessage {
            mechanism: "SCRAM-SHA-256".to_string(),
            data: scram.client_first_message(),
        };
        self.send_message(&initial).await?;

        loop {
            match self.receive_message().await? {
                BackendMessage::AuthenticationSASLContinue { data } => {
                    let client_final = scram
                        .process_server_first(&data)
                        .map_err(|e| PgError::UnsupportedAuth(e.to_string()))?;
                    self.send_message(&SaslResponseMessage { data: client_final })
                        .await?;
                }
                BackendMessage::AuthenticationSASLFinal { data } => {
                    scram
                        .verify_server_final(&data)
                        .map_err(|e| PgError::UnsupportedAuth(e.to_string()))?;
                    return Ok(());
                }
                BackendMessage::ErrorResponse { fields } => {
                    return Err(PgError::AuthFailed(fields));
                }
                _ => {
                    // Keep waiting for SASL messages
                }
            }
        }
    }

    fn require_password(&self) -> PgResult<&str> {
        self.config
            .password
            .as_deref()
            .ok_or_else(|| PgError::AuthFailed(ServerFields::new()))
    }

    // ========================================================================
    // Simple query protocol
    // ========================================================================

    /// Execute one or more SQL statements with the simple (text) protocol.
    ///
    /// Each statement produces one result set, in order. A server error for
    /// any statement does not abort message consumption; the stream is
    /// consumed through ReadyForQuery and the error is then surfaced.
    pub async fn simple_query(&mut self, query: &str) -> PgResult<Vec<QueryResult>> {
        self.ensure_usable()?;

        self.send_message(&QueryMessage {
            query: query.to_string(),
        })
        .await?;

        let mut results = Vec::new();
        let mut current = QueryResult::new();
        let mut description: Option<Arc<RowDescription>> = None;
        let mut error: Option<ServerFields> = None;

        loop {
            match self.receive_message().await? {
                BackendMessage::RowDescription { columns } => {
                    let desc = Arc::new(RowDescription::new(columns));
                    current.columns = Arc::clone(&desc);
                    description = Some(desc);
                }
                BackendMessage::DataRow { values } => {
                    current.rows.push(Row::new(description.clone(), values));
                }
                BackendMessage::CommandComplete { tag } => {
                    current.command_tag = tag;
                    results.push(std::mem::replace(&mut current, QueryResult::new()));
                    description = None;
                }
                BackendMessage::EmptyQueryResponse => {
                    results.push(std::mem::replace(&mut current, QueryResult::new()));
                    description = None;
                }
                BackendMessage::CopyInResponse {
                    binary,
                    column_formats,
                } => {
                    current.copy.push(CopyFrame::Begin {
                        out: false,
                        binary,
                        column_formats,
                    });
                    // Payload semantics are passthrough; without a producer
                    // the COPY must be refused so the stream reaches
                    // ReadyForQuery again
                    self.send_message(&CopyFailMessage {
                        message: "COPY IN has no data producer".to_string(),
                    })
                    .await?;
                }
                BackendMessage::CopyOutResponse {
                    binary,
                    column_formats,
                }
                | BackendMessage::CopyBothResponse {
                    binary,
                    column_formats,
                } => {
                    current.copy.push(CopyFrame::Begin {
                        out: true,
                        binary,
                        column_formats,
                    });
                }
                BackendMessage::CopyData { data } => {
                    current.copy.push(CopyFrame::Data(data));
                }
                BackendMessage::CopyDone => {
                    current.copy.push(CopyFrame::Done);
                }
                BackendMessage::ErrorResponse { fields } => {
                    // Flag the outstanding result set as failed but keep
                    // consuming until ReadyForQuery
                    error.get_or_insert(fields);
                }
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    return match error {
                        Some(fields) => Err(PgError::from_server_fields(&fields)),
                        None => Ok(results),
                    };
                }
                _ => {}
            }
        }
    }

    /// Execute BEGIN using the simple query protocol.
    pub async fn begin(&mut self) -> PgResult<()> {
        self.simple_query("BEGIN").await?;
        Ok(())
    }

    /// Execute COMMIT using the simple query protocol.
    pub async fn commit(&mut self) -> PgResult<()> {
        self.simple_query("COMMIT").await?;
        Ok(())
    }

    /// Execute ROLLBACK using the simple query protocol.
    pub async fn rollback(&mut self) -> PgResult<()> {
        self.simple_query("ROLLBACK").await?;
        Ok(())
    }

    // ========================================================================
    // Extended query protocol
    // ========================================================================

    /// Execute a query with the extended protocol.
    ///
    /// Statements are prepared on first use and cached per connection.
    pub async fn query(&mut self, query: &str, params: &[PgValue]) -> PgResult<QueryResult> {
        self.query_internal(query, params, true).await
    }

    /// Execute a query without the terminating Sync, pipelining further
    /// round-trips.
    ///
    /// The caller must finish the pipeline with `sync()`.
    pub async fn query_no_sync(
        &mut self,
        query: &str,
        params: &[PgValue],
    ) -> PgResult<QueryResult> {
        self.query_internal(query, params, false).await
    }

    async fn query_internal(
        &mut self,
        query: &str,
        params: &[PgValue],
        sync: bool,
    ) -> PgResult<QueryResult> {
        self.ensure_usable()?;

        let stmt = if let Some(cached) = self.statement_cache.get_and_touch(query) {
            cached
        } else {
            let param_types: Vec<Oid> = params.iter().map(|p| p.type_oid()).collect();
            self.prepare(query, &param_types).await?
        };

        self.execute_internal(&stmt, params, sync).await
    }

    /// Prepare a statement explicitly: Parse + Describe(statement) + Sync.
    pub async fn prepare(
        &mut self,
        query: &str,
        param_types: &[Oid],
    ) -> PgResult<Arc<PreparedStatement>> {
        self.ensure_usable()?;

        let name = self.statement_cache.next_statement_name();

        self.buffer_message(&ParseMessage {
            name: name.clone(),
            query: query.to_string(),
            param_types: param_types.to_vec(),
        });
        self.buffer_message(&DescribeMessage {
            kind: b'S',
            name: name.clone(),
        });
        self.buffer_message(&SyncMessage);
        self.flush().await?;

        let mut stmt = PreparedStatement::new(name, query.to_string());
        stmt.set_param_types(param_types.to_vec());

        loop {
            match self.receive_message().await? {
                BackendMessage::ParseComplete => {}
                BackendMessage::ParameterDescription { type_oids } => {
                    stmt.set_param_types(type_oids);
                }
                BackendMessage::RowDescription { columns } => {
                    stmt.set_columns(Arc::new(RowDescription::new(columns)));
                }
                BackendMessage::NoData => {
                    // Statement returns no rows
                }
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    let stmt = Arc::new(stmt);
                    self.cache_statement(query, Arc::clone(&stmt));
                    return Ok(stmt);
                }
                BackendMessage::ErrorResponse { fields } => {
                    self.drain_until_ready().await?;
                    return Err(PgError::from_server_fields(&fields));
                }
                _ => {}
            }
        }
    }

    /// Execute a prepared statement: Bind + Describe(portal) + Execute + Sync.
    pub async fn execute(
        &mut self,
        stmt: &PreparedStatement,
        params: &[PgValue],
    ) -> PgResult<QueryResult> {
        self.execute_internal(stmt, params, true).await
    }

    /// Execute without the terminating Sync (for pipelining); finish the
    /// pipeline with `sync()`.
    pub async fn execute_no_sync(
        &mut self,
        stmt: &PreparedStatement,
        params: &[PgValue],
    ) -> PgResult<QueryResult> {
        self.execute_internal(stmt, params, false).await
    }

    async fn execute_internal(
        &mut self,
        stmt: &PreparedStatement,
        params: &[PgValue],
        sync: bool,
    ) -> PgResult<QueryResult> {
        self.ensure_usable()?;

        self.buffer_message(&BindMessage {
            portal: String::new(),
            statement: stmt.name.clone(),
            params: params.to_vec(),
            result_formats: vec![Format::Binary],
        });
        self.buffer_message(&DescribeMessage {
            kind: b'P',
            name: String::new(),
        });
        self.buffer_message(&ExecuteMessage {
            portal: String::new(),
            max_rows: 0,
        });
        if sync {
            self.buffer_message(&SyncMessage);
        } else {
            self.buffer_message(&FlushMessage);
        }
        self.flush().await?;

        let mut result = QueryResult::new();
        result.columns = Arc::clone(&stmt.columns);
        let mut description = if stmt.columns.is_empty() {
            None
        } else {
            Some(Arc::clone(&stmt.columns))
        };

        loop {
            match self.receive_message().await? {
                BackendMessage::BindComplete => {}
                BackendMessage::RowDescription { columns } => {
                    // Portal description supersedes the statement's cached
                    // one (result formats may differ)
                    let desc = Arc::new(RowDescription::new(columns));
                    result.columns = Arc::clone(&desc);
                    description = Some(desc);
                }
                BackendMessage::NoData => {}
                BackendMessage::DataRow { values } => {
                    result.rows.push(Row::new(description.clone(), values));
                }
                BackendMessage::CommandComplete { tag } => {
                    result.command_tag = tag;
                    if !sync {
                        return Ok(result);
                    }
                }
                BackendMessage::EmptyQueryResponse | BackendMessage::PortalSuspended => {
                    if !sync {
                        return Ok(result);
                    }
                }
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    return Ok(result);
                }
                BackendMessage::ErrorResponse { fields } => {
                    // The backend discards until Sync; flush correspondingly
                    if sync {
                        self.drain_until_ready().await?;
                    }
                    return Err(PgError::from_server_fields(&fields));
                }
                _ => {}
            }
        }
    }

    /// Send Sync and wait for ReadyForQuery, completing a pipeline.
    pub async fn sync(&mut self) -> PgResult<()> {
        self.ensure_usable()?;

        self.send_message(&SyncMessage).await?;

        loop {
            match self.receive_message().await? {
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    return Ok(());
                }
                BackendMessage::ErrorResponse { fields } => {
                    self.drain_until_ready().await?;
                    return Err(PgError::from_server_fields(&fields));
                }
                _ => {}
            }
        }
    }

    /// Insert into the statement cache, closing any statement the insert
    /// evicts so the server-side object does not leak.
    fn cache_statement(&mut self, query: &str, stmt: Arc<PreparedStatement>) {
        if let Some(evicted) = self.statement_cache.insert(query.to_string(), stmt) {
            self.buffer_message(&CloseMessage {
                kind: b'S',
                name: evicted,
            });
            // CloseComplete is consumed by whichever response loop runs next
        }
    }

    // ========================================================================
    // COPY passthrough
    // ========================================================================

    /// Send one chunk of COPY IN payload; semantics are the caller's.
    pub async fn copy_data(&mut self, data: Bytes) -> PgResult<()> {
        self.ensure_usable()?;
        self.send_message(&CopyDataMessage { data }).await
    }

    /// Finish a COPY IN stream.
    pub async fn copy_done(&mut self) -> PgResult<()> {
        self.ensure_usable()?;
        self.send_message(&CopyDoneMessage).await
    }

    /// Abort a COPY IN stream.
    pub async fn copy_fail(&mut self, message: &str) -> PgResult<()> {
        self.ensure_usable()?;
        self.send_message(&CopyFailMessage {
            message: message.to_string(),
        })
        .await
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Close the connection: best-effort Terminate, then drop the transport.
    /// Idempotent.
    pub async fn close(&mut self) -> PgResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.fatal {
            let _ = self.send_message(&TerminateMessage).await;
        }
        self.transport.close().await;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    pub fn phase(&self) -> Phase {
        if self.closed {
            Phase::Closed
        } else if self.fatal {
            Phase::Fatal
        } else {
            Phase::Ready
        }
    }

    /// Current transaction status, from the last ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    pub fn backend_pid(&self) -> i32 {
        self.backend_pid
    }

    /// Key for out-of-band cancellation of this connection's current query.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            process_id: self.backend_pid,
            secret_key: self.backend_secret_key,
        }
    }

    /// Get a server parameter (e.g. server_version, TimeZone).
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(|s| s.as_str())
    }

    pub fn statement_cache(&self) -> &StatementCache {
        &self.statement_cache
    }

    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    /// Subscribe a sink for notifications on a channel (LISTEN is the
    /// caller's SQL to issue).
    pub fn subscribe(&mut self, channel: &str, sink: NotificationSink) {
        self.subscriptions.insert(channel.to_string(), sink);
    }

    pub fn unsubscribe(&mut self, channel: &str) {
        self.subscriptions.remove(channel);
    }

    fn ensure_usable(&self) -> PgResult<()> {
        if self.closed || self.fatal {
            Err(PgError::ConnectionLost)
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Message pump
    // ========================================================================

    /// Buffer a frontend message without flushing (for pipelining).
    fn buffer_message<M: FrontendMessage>(&mut self, msg: &M) {
        self.write_buf.extend_from_slice(&msg.encode());
    }

    /// Flush all buffered messages in one transport write.
    async fn flush(&mut self) -> PgResult<()> {
        if self.write_buf.is_empty() {
            return Ok(());
        }
        let buf = self.write_buf.split();
        let result = self.transport.write_full(&buf).await;
        self.note_fatal(result)
    }

    /// Buffer and flush one message.
    async fn send_message<M: FrontendMessage>(&mut self, msg: &M) -> PgResult<()> {
        self.buffer_message(msg);
        self.flush().await
    }

    /// Read one framed message: tag byte, big-endian length including
    /// itself, payload. Suspends until a full frame is buffered.
    async fn receive_raw(&mut self) -> PgResult<(u8, Bytes)> {
        loop {
            if self.read_buf.len() >= 5 {
                let length = i32::from_be_bytes([
                    self.read_buf[1],
                    self.read_buf[2],
                    self.read_buf[3],
                    self.read_buf[4],
                ]);
                if length < 4 {
                    self.fatal = true;
                    return Err(PgError::ProtocolViolation(format!(
                        "invalid message length {}",
                        length
                    )));
                }
                let total = 1 + length as usize;
                if self.read_buf.len() >= total {
                    let tag = self.read_buf[0];
                    let mut frame = self.read_buf.split_to(total).freeze();
                    frame.advance(5);
                    return Ok((tag, frame));
                }
                // Grow towards the frame we are mid-way through
                self.read_buf.reserve(total - self.read_buf.len());
            }

            let read = self.transport.read_into(&mut self.read_buf).await;
            let n = self.note_fatal(read)?;
            if n == 0 {
                self.fatal = true;
                return Err(PgError::TransportClosed);
            }
        }
    }

    /// Receive the next message relevant to the current operation.
    ///
    /// Asynchronous backend messages (ParameterStatus, BackendKeyData,
    /// NoticeResponse, NotificationResponse) can arrive at any point,
    /// including mid-result-set; they are routed here and never returned.
    async fn receive_message(&mut self) -> PgResult<BackendMessage> {
        loop {
            let (tag, body) = self.receive_raw().await?;
            let decoded = BackendMessage::decode(tag, body);
            let msg = self.note_fatal(decoded)?;
            match msg {
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.backend_pid = process_id;
                    self.backend_secret_key = secret_key;
                }
                BackendMessage::NoticeResponse { fields } => {
                    self.dispatch_notice(fields);
                }
                BackendMessage::NotificationResponse {
                    process_id,
                    channel,
                    payload,
                } => {
                    self.dispatch_notification(Notification {
                        process_id,
                        channel,
                        payload,
                    });
                }
                other => return Ok(other),
            }
        }
    }

    /// Drain messages until ReadyForQuery (after an error mid-exchange).
    async fn drain_until_ready(&mut self) -> PgResult<()> {
        loop {
            if let BackendMessage::ReadyForQuery { status } = self.receive_message().await? {
                self.transaction_status = status;
                return Ok(());
            }
        }
    }

    fn dispatch_notice(&self, fields: ServerFields) {
        let notice = ServerNotice { fields };
        match &self.config.notice_sink {
            Some(sink) => sink(&notice),
            None => info!(
                severity = notice.severity(),
                message = notice.message(),
                "server notice"
            ),
        }
    }

    fn dispatch_notification(&self, notification: Notification) {
        if let Some(sink) = self.subscriptions.get(&notification.channel) {
            sink(&notification);
        } else if let Some(sink) = &self.config.notification_handler {
            sink(&notification);
        } else {
            warn!(
                channel = notification.channel.as_str(),
                "dropping notification without a subscriber"
            );
        }
    }

    /// Record fatality for transport/protocol failures before propagating.
    fn note_fatal<T>(&mut self, result: PgResult<T>) -> PgResult<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.fatal = true;
            }
        }
        result
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Issue the SSLRequest handshake per the configured policy, handing the
/// stream to the TLS upgrader if the server accepts.
async fn negotiate_ssl(mut transport: Transport, config: &PgConfig) -> PgResult<Transport> {
    let attempt = match config.ssl {
        SslMode::Disable => false,
        SslMode::Prefer => config.tls.is_some(),
        SslMode::Require => true,
    };
    if !attempt {
        return Ok(transport);
    }

    transport.write_full(&SslRequest.encode()).await?;
    let mut response = [0u8; 1];
    transport.read_exact(&mut response).await?;

    match response[0] {
        b'S' => {
            let upgrader = config
                .tls
                .as_ref()
                .ok_or_else(|| PgError::Tls("no TLS upgrader configured".to_string()))?;
            let io_timeout = transport.io_timeout();
            let upgraded = upgrader
                .upgrade(transport.into_stream(), &config.host)
                .await
                .map_err(|e| PgError::Tls(e.to_string()))?;
            Ok(Transport::from_stream(upgraded, io_timeout))
        }
        b'N' => {
            if config.ssl == SslMode::Require {
                return Err(PgError::Tls("server refused SSL".to_string()));
            }
            Ok(transport)
        }
        other => Err(PgError::ProtocolViolation(format!(
            "unexpected SSLRequest response: {}",
            other as char
        ))),
    }
}

/// Compute the MD5 password hash:
/// `"md5" || hex(md5(hex(md5(password || user)) || salt))`.
fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let inner = format!("{}{}", password, user);
    let inner_hash = md5::compute(inner.as_bytes());

    let inner_hex = format!("{:x}", inner_hash);
    let mut outer_input = inner_hex.into_bytes();
    outer_input.extend_from_slice(salt);

    let outer_hash = md5::compute(&outer_input);
    format!("md5{:x}", outer_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_password_known_vector() {
        // md5(md5("secretbob") + salt) with a fixed salt
        let hash = md5_password("bob", "secret", &[0x01, 0x02, 0x03, 0x04]);
        assert!(hash.starts_with("md5"));
        assert_eq!(hash.len(), 35);
        // Deterministic for fixed inputs
        assert_eq!(hash, md5_password("bob", "secret", &[0x01, 0x02, 0x03, 0x04]));
        assert_ne!(hash, md5_password("bob", "secret", &[0x04, 0x03, 0x02, 0x01]));
    }

    #[test]
    fn rows_affected_parses_command_tags() {
        let mut result = QueryResult::new();
        for (tag, expected) in [
            ("INSERT 0 5", 5),
            ("UPDATE 3", 3),
            ("DELETE 2", 2),
            ("SELECT 10", 10),
            ("COPY 7", 7),
            ("CREATE TABLE", 0),
        ] {
            result.command_tag = tag.to_string();
            assert_eq!(result.rows_affected(), expected, "tag {}", tag);
        }
    }
}
