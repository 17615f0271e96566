//! Client session - one per connected playback client
//!
//! A session owns one TCP connection and two tasks: a reader that decodes
//! inbound frames and hands them to the coordinator, and a sender that
//! drains the bounded outbound queue onto the socket. Every socket read
//! and write is wrapped in a 5 s timeout; a timeout or I/O error flips the
//! session inactive, and the coordinator reaps inactive sessions on the
//! next broadcast.
//!
//! Ordering: frames leave the socket in the order they were enqueued.
//! Unicast replies and broadcast chunks share the same queue, so a reply
//! never overtakes an already-queued chunk.
//!
//! State machine: `PreHello → Identified → Streaming → Closed`. The MAC is
//! bound on Hello (`Identified`); PCM chunks flow only after the
//! `startStream` command (`Streaming`). Requests are answered even before
//! identification.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use chorus_protocol::{ENVELOPE_SIZE, Envelope, Frame};

use crate::error::Result;

/// Socket read/write timeout; exceeding it means the session is dead
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound queue capacity in frames
///
/// At the default 20 ms chunk interval this is over 5 s of audio - a
/// client that far behind has already hit the socket timeout.
const OUTBOUND_QUEUE_SIZE: usize = 256;

/// Counter for unique session ids
static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Upcalls a session makes into the coordinator
pub trait SessionHandler: Send + Sync + 'static {
    /// A frame arrived: envelope plus undecoded payload bytes
    fn on_message(&self, session: &Arc<ClientSession>, envelope: Envelope, payload: Bytes);

    /// The session terminated; called exactly once per session
    fn on_disconnect(&self, session: &Arc<ClientSession>);
}

/// Socket halves and queue receiver, held until `start` claims them
struct Startup {
    read: OwnedReadHalf,
    write: OwnedWriteHalf,
    queue_rx: mpsc::Receiver<Arc<Frame>>,
}

/// One connected playback client
pub struct ClientSession {
    /// Unique session id (distinct from the MAC: a client may reconnect
    /// while its old session is still being reaped)
    id: u64,
    /// Remote address
    peer: SocketAddr,
    /// Client identity, bound by the Hello message
    mac: RwLock<Option<String>>,
    /// False once an I/O error or timeout has been observed
    active: AtomicBool,
    /// PCM chunks are enqueued only while true
    stream_active: AtomicBool,
    /// Buffering target stamped into this session's settings
    buffer_ms: AtomicU32,
    /// Guards the one-shot disconnect upcall
    disconnect_reported: AtomicBool,
    /// Outbound queue
    queue_tx: mpsc::Sender<Arc<Frame>>,
    /// Taken by `start`
    startup: Mutex<Option<Startup>>,
    /// Cancels both tasks
    cancel: CancellationToken,
}

impl ClientSession {
    /// Wrap an accepted connection
    pub fn new(stream: TcpStream) -> Result<Arc<Self>> {
        let peer = stream.peer_addr()?;
        let (read, write) = stream.into_split();
        let (queue_tx, queue_rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);

        Ok(Arc::new(Self {
            id: SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            peer,
            mac: RwLock::new(None),
            active: AtomicBool::new(true),
            stream_active: AtomicBool::new(false),
            buffer_ms: AtomicU32::new(0),
            disconnect_reported: AtomicBool::new(false),
            queue_tx,
            startup: Mutex::new(Some(Startup {
                read,
                write,
                queue_rx,
            })),
            cancel: CancellationToken::new(),
        }))
    }

    /// Spawn the reader and sender tasks
    pub fn start(self: &Arc<Self>, handler: Arc<dyn SessionHandler>) {
        let Some(startup) = self.startup.lock().take() else {
            return;
        };

        tokio::spawn(Arc::clone(self).read_loop(startup.read, handler));
        tokio::spawn(Arc::clone(self).send_loop(startup.write, startup.queue_rx));
    }

    /// Unique session id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote IP as a string
    pub fn ip(&self) -> String {
        self.peer.ip().to_string()
    }

    /// Remote address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The bound MAC, if the Hello has been received
    pub fn mac(&self) -> Option<String> {
        self.mac.read().clone()
    }

    /// Bind the client identity
    pub fn set_mac(&self, mac: impl Into<String>) {
        *self.mac.write() = Some(mac.into());
    }

    /// False once the session has observed an unrecoverable error
    pub fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Gate PCM chunk delivery
    pub fn set_stream_active(&self, active: bool) {
        self.stream_active.store(active, Ordering::Release);
    }

    /// Whether PCM chunks are currently delivered
    pub fn stream_active(&self) -> bool {
        self.stream_active.load(Ordering::Acquire)
    }

    /// Buffering target for this session
    pub fn buffer_ms(&self) -> u32 {
        self.buffer_ms.load(Ordering::Relaxed)
    }

    /// Set the buffering target
    pub fn set_buffer_ms(&self, ms: u32) {
        self.buffer_ms.store(ms, Ordering::Relaxed);
    }

    /// Enqueue a shared frame; never blocks
    ///
    /// A full queue means the sender has been stuck long enough to fall a
    /// whole queue behind - the session is marked dead rather than letting
    /// the producer wait or frames arrive out of order.
    pub fn add(&self, frame: Arc<Frame>) {
        match self.queue_tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session = self.id, peer = %self.peer, "outbound queue full, marking session inactive");
                self.active.store(false, Ordering::Release);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.active.store(false, Ordering::Release);
            }
        }
    }

    /// Enqueue a PCM chunk; dropped unless the client started the stream
    pub fn add_chunk(&self, frame: Arc<Frame>) {
        if self.stream_active() {
            self.add(frame);
        }
    }

    /// Enqueue a unicast frame (replies and settings pushes)
    pub fn send(&self, frame: Frame) {
        self.add(Arc::new(frame));
    }

    /// Tear the session down: cancel both tasks and let the socket close
    ///
    /// Never blocks; safe to call from a detached reaper task or multiple
    /// times.
    pub fn stop(&self) {
        self.active.store(false, Ordering::Release);
        self.cancel.cancel();
    }

    async fn read_loop(self: Arc<Self>, mut read: OwnedReadHalf, handler: Arc<dyn SessionHandler>) {
        let mut header = [0u8; ENVELOPE_SIZE];

        loop {
            if !Self::read_frame(&self, &mut read, &mut header, &handler).await {
                break;
            }
        }

        self.active.store(false, Ordering::Release);
        self.cancel.cancel();

        if !self.disconnect_reported.swap(true, Ordering::AcqRel) {
            handler.on_disconnect(&self);
        }
    }

    /// Read and dispatch one frame; false ends the session
    async fn read_frame(
        session: &Arc<Self>,
        read: &mut OwnedReadHalf,
        header: &mut [u8; ENVELOPE_SIZE],
        handler: &Arc<dyn SessionHandler>,
    ) -> bool {
        let res = tokio::select! {
            _ = session.cancel.cancelled() => return false,
            r = timeout(SOCKET_TIMEOUT, read.read_exact(header)) => r,
        };
        match res {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                debug!(session = session.id, peer = %session.peer, error = %e, "read failed");
                return false;
            }
            Err(_) => {
                debug!(session = session.id, peer = %session.peer, "read timed out");
                return false;
            }
        }

        let envelope = match Envelope::decode(&mut Bytes::copy_from_slice(header)) {
            Ok(env) => env,
            Err(e) => {
                warn!(session = session.id, peer = %session.peer, error = %e, "closing session");
                return false;
            }
        };

        let mut payload = BytesMut::zeroed(envelope.size as usize);
        if !payload.is_empty() {
            let res = tokio::select! {
                _ = session.cancel.cancelled() => return false,
                r = timeout(SOCKET_TIMEOUT, read.read_exact(&mut payload)) => r,
            };
            match res {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    debug!(session = session.id, error = %e, "payload read failed");
                    return false;
                }
                Err(_) => {
                    debug!(session = session.id, "payload read timed out");
                    return false;
                }
            }
        }

        handler.on_message(session, envelope, payload.freeze());
        true
    }

    async fn send_loop(
        self: Arc<Self>,
        mut write: OwnedWriteHalf,
        mut queue_rx: mpsc::Receiver<Arc<Frame>>,
    ) {
        let mut next_id: u16 = 0;
        let mut header = BytesMut::with_capacity(ENVELOPE_SIZE);

        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break,
                f = queue_rx.recv() => match f {
                    Some(f) => f,
                    None => break,
                },
            };

            next_id = next_id.wrapping_add(1);
            header.clear();
            frame.envelope(next_id).encode(&mut header);

            // Envelope and payload are written separately so the shared
            // payload bytes are never copied per session.
            let res = timeout(SOCKET_TIMEOUT, async {
                write.write_all(&header).await?;
                write.write_all(&frame.payload).await
            })
            .await;

            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(session = self.id, peer = %self.peer, error = %e, "write failed");
                    break;
                }
                Err(_) => {
                    warn!(session = self.id, peer = %self.peer, "write timed out");
                    break;
                }
            }
        }

        self.active.store(false, Ordering::Release);
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
