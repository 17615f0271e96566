//! Control plane transport - JSON-RPC peers over TCP
//!
//! `ControlServer` accepts control peers and runs one task per connection.
//! Framing is newline-delimited: one JSON-RPC 2.0 document per line in
//! both directions. Sessions carry no state beyond the socket; requests
//! are forwarded to the coordinator via [`ControlHandler`], and responses
//! and notifications go out through a small per-peer queue.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError};

/// Per-peer outbound queue capacity (lines)
const LINE_QUEUE_SIZE: usize = 64;

/// A control line longer than this is a broken peer
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Counter for unique control session ids
static CONTROL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Upcall a control session makes into the coordinator
pub trait ControlHandler: Send + Sync + 'static {
    /// One received line (without the trailing newline)
    fn on_control_message(&self, session: &Arc<ControlSession>, line: &str);
}

/// One connected control peer
#[derive(Debug)]
pub struct ControlSession {
    id: u64,
    peer: SocketAddr,
    sender: mpsc::Sender<String>,
}

impl ControlSession {
    /// Remote address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Enqueue one response or notification line; never blocks
    ///
    /// The control plane is low-rate; a peer that falls a full queue
    /// behind loses messages rather than stalling the server.
    pub fn send(&self, msg: impl Into<String>) {
        match self.sender.try_send(msg.into()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(peer = %self.peer, "control peer not draining, dropping message");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Whether the peer's writer is still around
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Accepts control peers and fans notifications out to them
pub struct ControlServer {
    port: u16,
    sessions: Mutex<Vec<Arc<ControlSession>>>,
    cancel: CancellationToken,
    local_addr: OnceLock<SocketAddr>,
}

impl ControlServer {
    /// Create a control server for `port` (not yet bound)
    pub fn new(port: u16) -> Self {
        Self {
            port,
            sessions: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            local_addr: OnceLock::new(),
        }
    }

    /// Bind the listener and start accepting peers
    pub async fn start(self: &Arc<Self>, handler: Arc<dyn ControlHandler>) -> Result<()> {
        let addr = (Ipv4Addr::UNSPECIFIED, self.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::bind(format!("0.0.0.0:{}", self.port), e))?;

        let local = listener.local_addr()?;
        let _ = self.local_addr.set(local);
        info!(address = %local, "control server listening");

        tokio::spawn(Arc::clone(self).accept_loop(listener, handler));
        Ok(())
    }

    /// The bound address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Send a line to every connected peer, dropping closed ones
    pub fn broadcast(&self, msg: &str) {
        let mut sessions = self.sessions.lock();
        sessions.retain(|s| s.is_connected());
        for session in sessions.iter() {
            session.send(msg);
        }
    }

    /// Number of connected peers
    pub fn peer_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Stop accepting and disconnect every peer; idempotent
    pub fn stop(&self) {
        self.cancel.cancel();
        self.sessions.lock().clear();
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, handler: Arc<dyn ControlHandler>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        let (sender, queue_rx) = mpsc::channel(LINE_QUEUE_SIZE);
                        let session = Arc::new(ControlSession {
                            id: CONTROL_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                            peer,
                            sender,
                        });
                        info!(peer = %peer, "control peer connected");

                        self.sessions.lock().push(Arc::clone(&session));
                        tokio::spawn(Arc::clone(&self).handle_peer(
                            stream,
                            session,
                            queue_rx,
                            Arc::clone(&handler),
                        ));
                    }
                    Err(e) => {
                        warn!(error = %e, "control accept error");
                    }
                },
            }
        }
        debug!("control accept loop stopped");
    }

    async fn handle_peer(
        self: Arc<Self>,
        stream: TcpStream,
        session: Arc<ControlSession>,
        mut queue_rx: mpsc::Receiver<String>,
        handler: Arc<dyn ControlHandler>,
    ) {
        let (mut read_half, mut write_half) = stream.into_split();
        let mut buf = BytesMut::with_capacity(8192);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                msg = queue_rx.recv() => match msg {
                    Some(mut line) => {
                        line.push('\n');
                        if let Err(e) = write_half.write_all(line.as_bytes()).await {
                            debug!(peer = %session.peer, error = %e, "control write failed");
                            break;
                        }
                    }
                    None => break,
                },

                result = read_half.read_buf(&mut buf) => match result {
                    Ok(0) => break,
                    Ok(_) => {
                        if !self.drain_lines(&mut buf, &session, &handler) {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(peer = %session.peer, error = %e, "control read failed");
                        break;
                    }
                },
            }
        }

        self.sessions.lock().retain(|s| s.id != session.id);
        info!(peer = %session.peer, "control peer disconnected");
    }

    /// Dispatch every complete line in `buf`; false means the peer is broken
    fn drain_lines(
        &self,
        buf: &mut BytesMut,
        session: &Arc<ControlSession>,
        handler: &Arc<dyn ControlHandler>,
    ) -> bool {
        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line = buf.split_to(pos + 1);
            match std::str::from_utf8(&line[..pos]) {
                Ok(text) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        handler.on_control_message(session, text);
                    }
                }
                Err(_) => {
                    warn!(peer = %session.peer, "control peer sent invalid UTF-8");
                    return false;
                }
            }
        }

        if buf.remaining() > MAX_LINE_BYTES {
            warn!(peer = %session.peer, "control line too long");
            return false;
        }
        true
    }
}
