//! Connection: handshake, read loop, single writer, failure draining.
//!
//! ```text
//!             ┌────────────┐   OutboundFrame   ┌─────────────┐
//!  facade ───►│ mpsc queue │ ────────────────► │ write loop  │──► transport
//!  plugins ──►└────────────┘                   └─────────────┘
//!
//!  transport ──► read loop ──► FrameDecoder ──► dispatch ──► tables / plugins
//! ```
//!
//! Every outbound record goes through one bounded queue drained by one
//! task, so records are never interleaved on the wire. The read loop
//! decodes and dispatches in wire order.

use crate::dispatch::dispatch;
use crate::domain::config::ClientConfig;
use crate::domain::error::{ClientError, ConnectionFailure};
use crate::domain::lifecycle::{ConnectionState, Lifecycle};
use crate::domain::pending::{CorrelationTables, PendingCounts};
use crate::domain::stats::{ConnectionStats, StatsSnapshot};
use crate::transport::{self, AsyncStream, AuthKey, ServerUrl};
use nodetree_proto::{encode, FrameDecoder, Message, PROTO_VERSION};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, trace};

/// An encoded record waiting for the writer.
#[derive(Debug)]
pub(crate) struct OutboundFrame {
    tag: &'static str,
    bytes: Vec<u8>,
}

/// Identity the server announced in `connected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub proto_version: u16,
    pub name: String,
    pub version: String,
}

struct Shared {
    config: ClientConfig,
    lifecycle: Lifecycle,
    tables: Mutex<CorrelationTables>,
    outbound: mpsc::Sender<OutboundFrame>,
    stats: Arc<ConnectionStats>,
    tasks: Mutex<Vec<AbortHandle>>,
    server: Mutex<Option<ServerInfo>>,
}

/// Handle to one client connection. Cheap to clone.
///
/// Call [`Connection::close`] when done: the background tasks keep the
/// connection alive until the transport ends.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Parse `url`, dial it and complete the handshake.
    pub async fn connect(url: &str, config: ClientConfig) -> Result<Self, ClientError> {
        let url = ServerUrl::parse(url)?;
        let stream = transport::dial(&url).await?;
        Self::establish(stream, &url.auth_key, config).await
    }

    /// Run the handshake over an established stream and wait for `Active`.
    ///
    /// Fails with [`ConnectionFailure::HandshakeTimeout`] if `connected`
    /// does not arrive within `handshake_timeout_ms`.
    pub async fn establish<S: AsyncStream>(
        stream: S,
        auth_key: &AuthKey,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let conn = Self::start(stream, auth_key, config).await?;
        let timeout = conn.shared.config.handshake_timeout();

        match tokio::time::timeout(timeout, conn.shared.lifecycle.wait_active()).await {
            Ok(Ok(())) => Ok(conn),
            Ok(Err(failure)) => Err(failure.into()),
            Err(_) => {
                let failure =
                    ConnectionFailure::HandshakeTimeout(conn.shared.config.handshake_timeout_ms);
                conn.fail(failure.clone());
                Err(failure.into())
            }
        }
    }

    /// Write the credential and `connect`, then start the I/O tasks.
    ///
    /// Returns while still `Authenticating`; calls made on the handle wait
    /// for `Active` before anything is sent.
    pub async fn start<S: AsyncStream>(
        mut stream: S,
        auth_key: &AuthKey,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        config.validate()?;

        let lifecycle = Lifecycle::new();
        lifecycle.begin_authentication();

        let hello = encode(&Message::Connect {
            proto_version: PROTO_VERSION,
            client_name: Some(config.client_name.clone()),
            client_version: Some(config.client_version.clone()),
            client_description: Some(config.client_description.clone()),
            client_type: Some(config.client_type.clone()),
        })
        .map_err(ClientError::Codec)?;

        let handshake: std::io::Result<()> = async {
            stream.write_all(auth_key.credential()).await?;
            stream.write_all(&hello).await?;
            stream.flush().await
        }
        .await;
        handshake.map_err(|e| ConnectionFailure::TransportLost(e.to_string()))?;

        debug!(
            client_name = %config.client_name,
            proto_version = PROTO_VERSION,
            "Sent credential and connect"
        );

        let (reader, writer) = tokio::io::split(stream);
        let (outbound, queue) = mpsc::channel(config.outbound_queue_capacity);
        let stats = Arc::new(ConnectionStats::default());
        ConnectionStats::incr(&stats.messages_sent);

        let conn = Connection {
            shared: Arc::new(Shared {
                config,
                lifecycle,
                tables: Mutex::new(CorrelationTables::new()),
                outbound,
                stats,
                tasks: Mutex::new(Vec::new()),
                server: Mutex::new(None),
            }),
        };

        let write_task = tokio::spawn(write_loop(conn.clone(), writer, queue));
        let read_task = tokio::spawn(read_loop(conn.clone(), reader));
        conn.track_tasks([write_task.abort_handle(), read_task.abort_handle()]);

        Ok(conn)
    }

    fn track_tasks(&self, handles: [AbortHandle; 2]) {
        let mut tasks = self.shared.tasks.lock();
        if self.shared.lifecycle.state().is_terminal() {
            handles.iter().for_each(AbortHandle::abort);
        } else {
            tasks.extend(handles);
        }
    }

    /// Shut down: `Closed`, every waiter gets [`ConnectionFailure::Closed`].
    pub fn close(&self) {
        self.fail(ConnectionFailure::Closed);
    }

    /// Terminate the connection and drain all correlation state.
    /// Only the first call has any effect.
    pub(crate) fn fail(&self, failure: ConnectionFailure) {
        if !self.shared.lifecycle.terminate(&failure) {
            return;
        }

        match &failure {
            ConnectionFailure::Closed => info!("Connection closed"),
            other => error!(kind = other.kind(), error = %other, "Connection failed"),
        }

        let drained = self.shared.tables.lock().drain(&failure);
        ConnectionStats::add(&self.shared.stats.operations_failed, drained.failed as u64);
        if drained.failed > 0 {
            debug!(failed = drained.failed, "Failed outstanding operations");
        }
        // Handlers may own subscriptions; drop them with the lock released.
        drop(drained.handlers);

        for handle in self.shared.tasks.lock().drain(..) {
            handle.abort();
        }
    }

    /// Encode and queue one record for the writer.
    pub(crate) async fn send(&self, msg: &Message) -> Result<(), ClientError> {
        if self.shared.lifecycle.state().is_terminal() {
            return Err(self.failure_error());
        }
        let bytes = encode(msg).map_err(ClientError::Codec)?;
        let frame = OutboundFrame {
            tag: msg.tag(),
            bytes,
        };
        self.shared
            .outbound
            .send(frame)
            .await
            .map_err(|_| self.failure_error())
    }

    /// The error handed to callers once the connection is gone.
    pub(crate) fn failure_error(&self) -> ClientError {
        ClientError::Connection(
            self.shared
                .lifecycle
                .state()
                .failure()
                .unwrap_or(ConnectionFailure::Closed),
        )
    }

    /// Wait until `Active`; fails if the connection terminates first.
    pub async fn wait_active(&self) -> Result<(), ClientError> {
        self.shared
            .lifecycle
            .wait_active()
            .await
            .map_err(ClientError::from)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lifecycle.state()
    }

    /// Observe lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.lifecycle.subscribe()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.shared.server.lock().clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Current size of every correlation table.
    pub fn pending_counts(&self) -> PendingCounts {
        self.shared.tables.lock().counts()
    }

    pub(crate) fn lifecycle(&self) -> &Lifecycle {
        &self.shared.lifecycle
    }

    pub(crate) fn stats_handle(&self) -> Arc<ConnectionStats> {
        self.shared.stats.clone()
    }

    /// Run `f` with exclusive access to the tables. Must not await.
    pub(crate) fn with_tables<R>(&self, f: impl FnOnce(&mut CorrelationTables) -> R) -> R {
        f(&mut self.shared.tables.lock())
    }

    pub(crate) fn set_server_info(&self, proto_version: u16, name: String, version: String) {
        *self.shared.server.lock() = Some(ServerInfo {
            proto_version,
            name,
            version,
        });
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("pending", &self.pending_counts())
            .finish()
    }
}

async fn write_loop<W>(conn: Connection, mut writer: W, mut queue: mpsc::Receiver<OutboundFrame>)
where
    W: AsyncWrite + Unpin,
{
    let stats = conn.stats_handle();
    while let Some(frame) = queue.recv().await {
        let written: std::io::Result<()> = async {
            writer.write_all(&frame.bytes).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            conn.fail(ConnectionFailure::TransportLost(e.to_string()));
            return;
        }
        ConnectionStats::incr(&stats.messages_sent);
        trace!(tag = frame.tag, bytes = frame.bytes.len(), "Wrote message");
    }
}

async fn read_loop<R>(conn: Connection, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let config = conn.config().clone();
    let stats = conn.stats_handle();
    let mut decoder = FrameDecoder::with_limit(config.max_message_size);
    let mut buf = vec![0u8; config.read_buffer_size];

    loop {
        loop {
            match decoder.decode_next() {
                Ok(Some(msg)) => {
                    ConnectionStats::incr(&stats.messages_received);
                    if let Err(failure) = dispatch(&conn, msg) {
                        conn.fail(failure);
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    conn.fail(e.into());
                    return;
                }
            }
        }

        match reader.read(&mut buf).await {
            Ok(0) => {
                conn.fail(ConnectionFailure::TransportLost(
                    "connection closed by peer".into(),
                ));
                return;
            }
            Ok(n) => decoder.feed(&buf[..n]),
            Err(e) => {
                conn.fail(ConnectionFailure::TransportLost(e.to_string()));
                return;
            }
        }
    }
}
