//! Byte-stream transport to a debug adapter.
//!
//! A `Transport` owns either a spawned adapter process (DAP over stdio) or a TCP
//! stream. Outgoing bodies are framed with `Content-Length`; incoming bytes are
//! decoded by a background reader task. Everything the transport observes after
//! `connect()` (messages, read errors, disconnection) is delivered as a
//! `TransportEvent` on an ordered channel instead of being returned to whichever
//! call happens to be running.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::TransportConfig;
use crate::framing::{encode_frame, FrameDecoder};
use crate::{BridgeError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;
const CHILD_REAP_TIMEOUT: Duration = Duration::from_millis(500);
const TCP_INITIAL_RETRY_DELAY: Duration = Duration::from_millis(50);
const TCP_MAX_RETRY_DELAY: Duration = Duration::from_millis(1000);
const MAX_CONNECTION_REFUSED: u32 = 5;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// How the adapter side of a transport went away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Message(String),
    Error(String),
    Disconnected(ExitInfo),
}

struct Shared {
    events: mpsc::UnboundedSender<TransportEvent>,
    attached: AtomicBool,
    connected: AtomicBool,
    disconnect_reported: AtomicBool,
    child: Mutex<Option<Child>>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        // Receiver gone means nobody cares about this connection anymore.
        let _ = self.events.send(event);
    }

    fn report_disconnect(&self, info: ExitInfo) {
        self.connected.store(false, Ordering::SeqCst);
        if self.attached.load(Ordering::SeqCst)
            && !self.disconnect_reported.swap(true, Ordering::SeqCst)
        {
            info!(code = ?info.code, signal = ?info.signal, "Debug adapter disconnected");
            self.emit(TransportEvent::Disconnected(info));
        }
    }

    async fn reap_child(&self, kill: bool) -> ExitInfo {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return ExitInfo::default();
        };
        if kill {
            let _ = child.start_kill();
        }
        match tokio::time::timeout(CHILD_REAP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => ExitInfo::from_status(status),
            Ok(Err(e)) => {
                warn!("Failed to collect adapter exit status: {}", e);
                ExitInfo::default()
            }
            Err(_) => {
                // Still running after its stdout closed; make sure it goes away.
                let _ = child.start_kill();
                ExitInfo::default()
            }
        }
    }
}

pub struct Transport {
    config: Option<TransportConfig>,
    connect_timeout: Duration,
    shared: Arc<Shared>,
    writer: Mutex<Option<BoxedWriter>>,
    reader_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    /// Create an unconnected transport for `config`; call `connect()` next.
    pub fn new(
        config: TransportConfig,
        connect_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        Self::build(Some(config), connect_timeout)
    }

    /// Wrap an already-open stream pair. The transport is connected on return.
    pub fn from_streams<R, W>(reader: R, writer: W) -> (Self, mpsc::UnboundedReceiver<TransportEvent>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (transport, rx) = Self::build(None, Duration::ZERO);
        transport.attach_sync(Box::new(reader), Box::new(writer));
        (transport, rx)
    }

    fn build(
        config: Option<TransportConfig>,
        connect_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            config,
            connect_timeout,
            shared: Arc::new(Shared {
                events,
                attached: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                disconnect_reported: AtomicBool::new(false),
                child: Mutex::new(None),
            }),
            writer: Mutex::new(None),
            reader_task: std::sync::Mutex::new(None),
        };
        (transport, rx)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        if self.shared.disconnect_reported.load(Ordering::SeqCst) {
            return Err(BridgeError::Connection(
                "transport already closed; create a new one".to_string(),
            ));
        }
        let config = self.config.as_ref().ok_or_else(|| {
            BridgeError::Connection("transport has no connection target".to_string())
        })?;

        let (reader, writer) = match config {
            TransportConfig::Spawn {
                command,
                args,
                cwd,
                env,
            } => {
                info!("Launching debug adapter: {}", config.describe());
                let mut cmd = Command::new(command);
                cmd.args(args)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .kill_on_drop(true);
                if let Some(cwd) = cwd {
                    cmd.current_dir(cwd);
                }
                cmd.envs(env);

                let mut child = cmd.spawn().map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        BridgeError::Connection(format!(
                            "Debug adapter executable '{command}' not found"
                        ))
                    } else {
                        BridgeError::Connection(format!(
                            "Failed to spawn debug adapter '{command}': {e}"
                        ))
                    }
                })?;

                if let Some(status) = child.try_wait()? {
                    return Err(BridgeError::Connection(format!(
                        "Debug adapter exited during startup with status: {status}"
                    )));
                }

                let stdin = child.stdin.take().ok_or_else(|| {
                    BridgeError::Connection("Adapter spawn failed: missing stdin pipe".to_string())
                })?;
                let stdout = child.stdout.take().ok_or_else(|| {
                    BridgeError::Connection("Adapter spawn failed: missing stdout pipe".to_string())
                })?;

                *self.shared.child.lock().await = Some(child);
                (Box::new(stdout) as BoxedReader, Box::new(stdin) as BoxedWriter)
            }
            TransportConfig::Tcp { host, port } => {
                let stream = connect_tcp(host, *port, self.connect_timeout).await?;
                info!("Connected to debug adapter at {}:{}", host, port);
                let (reader, writer) = stream.into_split();
                (Box::new(reader) as BoxedReader, Box::new(writer) as BoxedWriter)
            }
        };

        *self.writer.lock().await = Some(writer);
        self.start_reader(reader);
        Ok(())
    }

    fn attach_sync(&self, reader: BoxedReader, writer: BoxedWriter) {
        if let Ok(mut slot) = self.writer.try_lock() {
            *slot = Some(writer);
        }
        self.start_reader(reader);
    }

    fn start_reader(&self, reader: BoxedReader) {
        self.shared.attached.store(true, Ordering::SeqCst);
        self.shared.connected.store(true, Ordering::SeqCst);
        self.shared.emit(TransportEvent::Connected);

        let handle = tokio::spawn(read_loop(reader, self.shared.clone()));
        if let Ok(mut slot) = self.reader_task.lock() {
            *slot = Some(handle);
        }
    }

    /// Frame and write one message body.
    pub async fn send(&self, body: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(BridgeError::Connection("transport is not connected".to_string()));
        }

        let framed = encode_frame(body);
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| BridgeError::Connection("transport is not connected".to_string()))?;

        let written = async {
            writer.write_all(&framed).await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = written {
            let message = format!("Failed to write to debug adapter: {e}");
            self.shared.emit(TransportEvent::Error(message.clone()));
            return Err(BridgeError::Connection(message));
        }

        trace!(body, "-> adapter");
        Ok(())
    }

    /// Tear the channel down. Safe to call any number of times.
    pub async fn close(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        let reader = self.reader_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = reader {
            handle.abort();
        }

        let info = self.shared.reap_child(true).await;
        self.shared.report_disconnect(info);
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader_task.lock().ok().and_then(|mut slot| slot.take()) {
            handle.abort();
        }
    }
}

async fn read_loop(mut reader: BoxedReader, shared: Arc<Shared>) {
    debug!("Transport reader started");
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0_u8; READ_CHUNK_SIZE];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                debug!("Debug adapter stream closed (EOF)");
                break;
            }
            Ok(n) => {
                decoder.push(&chunk[..n]);
                loop {
                    let decoded = decoder.decode();
                    for message in decoded.messages {
                        trace!(body = %message, "<- adapter");
                        shared.emit(TransportEvent::Message(message));
                    }
                    if !decoded.more_buffered {
                        break;
                    }
                    // Let other sessions run before extracting the rest.
                    tokio::task::yield_now().await;
                }
            }
            Err(e) => {
                shared.emit(TransportEvent::Error(format!(
                    "Failed to read from debug adapter: {e}"
                )));
                break;
            }
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    let info = shared.reap_child(false).await;
    shared.report_disconnect(info);
}

async fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let address = format!("{host}:{port}");
    let started = Instant::now();
    let mut delay = TCP_INITIAL_RETRY_DELAY;
    let mut refused = 0_u32;
    let mut attempt = 0_u32;

    loop {
        attempt += 1;
        let remaining = timeout.saturating_sub(started.elapsed());
        match tokio::time::timeout(remaining, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY: {}", e);
                }
                return Ok(stream);
            }
            Ok(Err(e)) => {
                if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    refused += 1;
                    if refused >= MAX_CONNECTION_REFUSED {
                        return Err(BridgeError::Connection(format!(
                            "No debug adapter listening on {address} (connection refused {refused} times)"
                        )));
                    }
                } else {
                    refused = 0;
                }

                if started.elapsed() + delay >= timeout {
                    return Err(BridgeError::Connection(format!(
                        "Timed out connecting to debug adapter at {address} after {attempt} attempts: {e}"
                    )));
                }

                trace!(attempt, ?delay, "TCP connect failed, retrying: {}", e);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(TCP_MAX_RETRY_DELAY);
            }
            Err(_) => {
                return Err(BridgeError::Connection(format!(
                    "Timed out connecting to debug adapter at {address} after {timeout:?}"
                )));
            }
        }
    }
}
