//! StreamServer - the coordinator
//!
//! Owns the session roster and the producer → fan-out path, and hosts both
//! dispatchers: the binary protocol for playback clients and JSON-RPC for
//! control peers. It implements the three upcall capabilities its
//! collaborators need - [`ChunkSink`] for the pipe reader,
//! [`SessionHandler`] for client sessions, [`ControlHandler`] for control
//! sessions - so each of them depends only on its own interface.
//!
//! # Locking
//!
//! The roster is guarded by one coarse mutex. It is held only for the
//! reap-and-enqueue sequence of a broadcast and for roster edits; session
//! teardown is offloaded to a detached task that never re-enters the lock.
//! The client registry carries its own internal lock; the only cross-
//! component wait direction is coordinator → session / control, so there
//! is no ordering cycle.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::OnceLock;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use chorus_config::{ClientInfo, ClientRegistry, Settings};
use chorus_protocol::{
    Ack, Command, Envelope, Frame, Hello, MessageKind, PcmChunk, Request, RequestKind,
    SampleFormat, ServerSettings, Time, TimeVal,
};

use crate::control::{ControlHandler, ControlServer, ControlSession};
use crate::error::{Result, ServerError};
use crate::jsonrpc::{self, RpcError, RpcRequest};
use crate::pipe::{ChunkSink, PipeReader};
use crate::session::{ClientSession, SessionHandler};

/// The result of a dispatched JSON-RPC method
#[derive(Debug)]
pub(crate) struct RpcOutcome {
    /// Value for the response's `result` field
    pub result: Value,
    /// The mutated client record, when the method was a `Client.Set*`
    pub updated: Option<ClientInfo>,
}

/// The stream server coordinator
pub struct StreamServer {
    port: u16,
    buffer_ms: u32,
    sample_format: SampleFormat,
    registry: Arc<ClientRegistry>,
    /// The roster; this mutex is the coordinator lock
    sessions: Mutex<Vec<Arc<ClientSession>>>,
    control: Arc<ControlServer>,
    pipe: Arc<PipeReader>,
    cancel: CancellationToken,
    local_addr: OnceLock<SocketAddr>,
    /// Runtime handle for detached teardown tasks spawned off-runtime
    /// (chunk broadcasts arrive on the pipe reader's thread)
    runtime: OnceLock<Handle>,
}

impl StreamServer {
    /// Build a server from settings; nothing is bound or spawned yet
    pub fn new(settings: &Settings, registry: Arc<ClientRegistry>) -> Result<Arc<Self>> {
        let sample_format = settings.sample_format()?;
        let pipe = Arc::new(PipeReader::new(
            &settings.source.fifo,
            &settings.source.codec,
            sample_format,
            settings.source.read_interval_ms,
        )?);

        Ok(Arc::new(Self {
            port: settings.stream.port,
            buffer_ms: settings.stream.buffer_ms,
            sample_format,
            registry,
            sessions: Mutex::new(Vec::new()),
            control: Arc::new(ControlServer::new(settings.control.port)),
            pipe,
            cancel: CancellationToken::new(),
            local_addr: OnceLock::new(),
            runtime: OnceLock::new(),
        }))
    }

    /// Bring the server up: control server, pipe reader, stream acceptor
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let _ = self.runtime.set(Handle::current());

        let control_handler: Arc<dyn ControlHandler> = Arc::clone(self) as Arc<dyn ControlHandler>;
        self.control.start(control_handler).await?;

        let sink: Arc<dyn ChunkSink> = Arc::clone(self) as Arc<dyn ChunkSink>;
        self.pipe.start(sink);

        let addr = (Ipv4Addr::UNSPECIFIED, self.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::bind(format!("0.0.0.0:{}", self.port), e))?;

        let local = listener.local_addr()?;
        let _ = self.local_addr.set(local);
        info!(address = %local, buffer_ms = self.buffer_ms, format = %self.sample_format, "stream server listening");

        tokio::spawn(Arc::clone(self).accept_loop(listener));
        Ok(())
    }

    /// Tear everything down in reverse start order; idempotent
    pub fn stop(&self) {
        info!("stream server stopping");
        self.control.stop();
        self.cancel.cancel();
        self.pipe.stop();

        let sessions = self.sessions.lock();
        for session in sessions.iter() {
            session.stop();
        }
    }

    /// The bound stream address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// The bound control address, once started
    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.control.local_addr()
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = listener.accept() => match result {
                    Ok((stream, peer)) => self.handle_accept(stream, peer),
                    Err(e) => {
                        warn!(error = %e, "stream accept error");
                    }
                },
            }
        }
        debug!("stream accept loop stopped");
    }

    fn handle_accept(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let _ = stream.set_nodelay(true);
        let session = match ClientSession::new(stream) {
            Ok(session) => session,
            Err(e) => {
                warn!(peer = %peer, error = %e, "failed to set up session");
                return;
            }
        };

        info!(peer = %peer, "new client connection");
        session.set_buffer_ms(self.buffer_ms);

        let handler: Arc<dyn SessionHandler> = Arc::clone(self) as Arc<dyn SessionHandler>;
        let mut sessions = self.sessions.lock();
        session.start(handler);
        sessions.push(session);
    }

    /// Broadcast one chunk frame to the roster
    ///
    /// Under the roster lock: sweep inactive sessions first - each gets a
    /// detached teardown task and a `Client gone` control message - then
    /// enqueue a shared reference on every survivor. `add` never blocks,
    /// so the producer is back within one lock hold.
    fn broadcast_chunk(&self, frame: Frame) {
        let frame = Arc::new(frame);
        let mut sessions = self.sessions.lock();

        sessions.retain(|session| {
            if session.active() {
                return true;
            }
            let mac = session.mac().unwrap_or_default();
            warn!(session = session.id(), mac = %mac, "session inactive, removing");
            self.control.broadcast(&format!("Client gone: {mac}"));

            // stop() is cheap today, but teardown stays off this lock.
            let reaped = Arc::clone(session);
            match self.runtime.get() {
                Some(handle) => {
                    handle.spawn(async move { reaped.stop() });
                }
                None => reaped.stop(),
            }
            false
        });

        for session in sessions.iter() {
            session.add_chunk(Arc::clone(&frame));
        }
    }

    /// The session for `mac`, preferring the most recently identified one
    ///
    /// Duplicate MACs happen when a client reconnects before its old
    /// session is reaped; the roster is in accept order, so the last match
    /// is the newest.
    fn find_session(&self, mac: &str) -> Option<Arc<ClientSession>> {
        self.sessions
            .lock()
            .iter()
            .rev()
            .find(|s| s.active() && s.mac().as_deref() == Some(mac))
            .cloned()
    }

    /// Settings frame for one client record
    fn settings_frame(&self, info: &ClientInfo, buffer_ms: u32) -> Frame {
        ServerSettings {
            buffer_ms,
            latency: info.latency,
            volume: info.volume.percent,
            muted: info.volume.muted,
        }
        .to_frame()
    }

    // ------------------------------------------------------------------
    // Binary dispatch
    // ------------------------------------------------------------------

    fn handle_hello(&self, session: &Arc<ClientSession>, hello: Hello) {
        info!(
            mac = %hello.mac,
            host = %hello.hostname,
            version = %hello.version,
            "hello from client"
        );
        session.set_mac(&hello.mac);

        self.registry.get_or_insert(&hello.mac);
        let info = self.registry.update(&hello.mac, |c| {
            c.ip = session.ip();
            c.host = hello.hostname.clone();
            c.version = hello.version.clone();
            c.connected = true;
            c.last_seen = TimeVal::now();
        });

        if let Err(e) = self.registry.save() {
            warn!(error = %e, "failed to persist client registry");
        }
        if let Some(info) = info {
            self.control
                .broadcast(&jsonrpc::notification("Client.OnConnect", client_json(&info)));
        }
    }

    fn handle_request(&self, session: &Arc<ClientSession>, envelope: &Envelope, request: Request) {
        match request.kind {
            RequestKind::Time => {
                let latency = envelope.received.diff_secs(envelope.sent);
                session.send(Time { latency }.to_frame().replying_to(envelope.id));
            }
            RequestKind::ServerSettings => {
                // Served even before Hello; an unidentified session gets
                // the defaults a fresh record would have.
                let info = session
                    .mac()
                    .map(|mac| self.registry.get_or_insert(&mac))
                    .unwrap_or_default();
                session.send(
                    self.settings_frame(&info, session.buffer_ms())
                        .replying_to(envelope.id),
                );
            }
            RequestKind::SampleFormat => {
                session.send(self.sample_format.to_frame().replying_to(envelope.id));
            }
            RequestKind::Header => {
                session.send(self.pipe.header().to_frame().replying_to(envelope.id));
            }
        }
    }

    fn handle_command(&self, session: &Arc<ClientSession>, envelope: &Envelope, command: Command) {
        if command.command == "startStream" {
            session.send(Ack.to_frame().replying_to(envelope.id));
            session.set_stream_active(true);
            info!(session = session.id(), mac = ?session.mac(), "stream started");
        } else {
            debug!(command = %command.command, "ignoring unknown command");
        }
    }

    // ------------------------------------------------------------------
    // JSON-RPC dispatch
    // ------------------------------------------------------------------

    /// Execute one method; mutations are validated before any state changes
    pub(crate) fn dispatch_rpc(&self, request: &RpcRequest) -> std::result::Result<RpcOutcome, RpcError> {
        if request.method == "System.GetStatus" {
            return Ok(RpcOutcome {
                result: self.status_json(request.opt_str_param("client")),
                updated: None,
            });
        }

        if !request.method.starts_with("Client.Set") {
            return Err(RpcError::method_not_found());
        }

        let mac = request.str_param("client")?.to_string();
        if self.registry.get(&mac).is_none() {
            return Err(RpcError::internal("Client not found"));
        }

        let (result, updated) = match request.method.as_str() {
            "Client.SetVolume" => {
                let volume = request.int_param("volume", 0, 100)?;
                let info = self.registry.update(&mac, |c| c.volume.percent = volume as u16);
                (json!(volume), info)
            }
            "Client.SetMute" => {
                let muted = request.bool_param("mute")?;
                let info = self.registry.update(&mac, |c| c.volume.muted = muted);
                (json!(muted), info)
            }
            "Client.SetLatency" => {
                let latency = request.int_param("latency", -10_000, self.buffer_ms as i64)?;
                let info = self.registry.update(&mac, |c| c.latency = latency as i32);
                (json!(latency), info)
            }
            "Client.SetName" => {
                let name = request.str_param("name")?.to_string();
                let info = self.registry.update(&mac, |c| c.name = name.clone());
                (json!(name), info)
            }
            _ => return Err(RpcError::method_not_found()),
        };

        let info = updated.ok_or_else(|| RpcError::internal("Client not found"))?;
        Ok(RpcOutcome {
            result,
            updated: Some(info),
        })
    }

    /// The `System.GetStatus` result
    fn status_json(&self, mac: Option<&str>) -> Value {
        let clients = match mac {
            Some(mac) => self.registry.get(mac).into_iter().collect(),
            None => self.registry.all(),
        };
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();

        json!({
            "server": {
                "host": host,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "clients": clients.iter().map(client_json).collect::<Vec<_>>(),
        })
    }
}

/// ClientInfo as a JSON-RPC params/result value
fn client_json(info: &ClientInfo) -> Value {
    serde_json::to_value(info).unwrap_or(Value::Null)
}

impl SessionHandler for StreamServer {
    fn on_message(&self, session: &Arc<ClientSession>, envelope: Envelope, payload: Bytes) {
        let mut payload = payload;
        trace!(
            session = session.id(),
            kind = ?envelope.kind,
            id = envelope.id,
            size = envelope.size,
            "client message"
        );

        let result = match envelope.kind {
            MessageKind::Hello => Hello::decode(&mut payload).map(|h| self.handle_hello(session, h)),
            MessageKind::Request => {
                Request::decode(&mut payload).map(|r| self.handle_request(session, &envelope, r))
            }
            MessageKind::Command => {
                Command::decode(&mut payload).map(|c| self.handle_command(session, &envelope, c))
            }
            other => {
                debug!(kind = ?other, "ignoring unexpected client message");
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(session = session.id(), error = %e, "closing session on protocol error");
            session.stop();
        }
    }

    fn on_disconnect(&self, session: &Arc<ClientSession>) {
        debug!(session = session.id(), peer = %session.peer(), "client disconnected");
        let Some(mac) = session.mac() else {
            return;
        };

        // A reconnect may already have a newer session for this MAC; the
        // record stays connected until the last one goes.
        let has_other = self.sessions.lock().iter().any(|s| {
            s.id() != session.id() && s.active() && s.mac().as_deref() == Some(mac.as_str())
        });
        if has_other {
            debug!(mac = %mac, "newer session still live, keeping client connected");
            return;
        }

        let Some(info) = self.registry.update(&mac, |c| {
            c.connected = false;
            c.last_seen = TimeVal::now();
        }) else {
            return;
        };

        if let Err(e) = self.registry.save() {
            warn!(error = %e, "failed to persist client registry");
        }
        self.control
            .broadcast(&jsonrpc::notification("Client.OnDisconnect", client_json(&info)));
    }
}

impl ControlHandler for StreamServer {
    fn on_control_message(&self, session: &Arc<ControlSession>, line: &str) {
        let request = match RpcRequest::parse(line) {
            Ok(request) => request,
            Err(e) => {
                session.send(jsonrpc::error_response(None, &e));
                return;
            }
        };
        debug!(method = %request.method, "rpc request");

        match self.dispatch_rpc(&request) {
            Ok(outcome) => {
                if let Some(info) = &outcome.updated {
                    // Push the fresh settings to the live session, persist,
                    // then tell every control peer about the change.
                    if let Some(target) = self.find_session(&info.mac) {
                        target.send(self.settings_frame(info, target.buffer_ms()));
                    }
                    if let Err(e) = self.registry.save() {
                        warn!(error = %e, "failed to persist client registry");
                    }
                    self.control
                        .broadcast(&jsonrpc::notification("Client.OnUpdate", client_json(info)));
                }
                session.send(jsonrpc::response(&request.id, outcome.result));
            }
            Err(e) => {
                session.send(jsonrpc::error_response(Some(&request.id), &e));
            }
        }
    }
}

impl ChunkSink for StreamServer {
    fn on_chunk(&self, chunk: PcmChunk, duration_ms: f64) {
        trace!(duration_ms, bytes = chunk.payload.len(), "chunk read");
        self.broadcast_chunk(chunk.to_frame());
    }

    fn on_resync(&self, ms: f64) {
        info!(ms, "pipe reader resync");
    }
}

#[cfg(test)]
#[path = "stream_server_test.rs"]
mod tests;
