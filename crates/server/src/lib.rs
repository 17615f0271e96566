//! Chorus stream server core
//!
//! Fans a single PCM source out to every connected playback client in near
//! real time, and exposes a JSON-RPC control surface for querying and
//! mutating per-client state.
//!
//! # Architecture
//!
//! ```text
//! PipeReader (FIFO producer)
//!     │ on_chunk
//!     ▼
//! StreamServer ── roster lock ──► ClientSession (queue + sender task) ──► clients
//!     ▲ on_message / on_disconnect            │
//!     │                                       ▼
//! ControlServer ◄── notifications        TCP sockets
//!     │ on_control_message
//!     ▼
//! JSON-RPC dispatch ──► ClientRegistry (persisted)
//! ```
//!
//! The coordinator ([`StreamServer`]) implements three narrow upcall
//! interfaces - [`ChunkSink`] for the producer, [`SessionHandler`] for
//! client sessions, [`ControlHandler`] for control sessions - so each
//! collaborator depends only on the capability it needs.

mod control;
mod error;
pub mod jsonrpc;
mod pipe;
mod session;
mod stream_server;

pub use control::{ControlHandler, ControlServer, ControlSession};
pub use error::{Result, ServerError};
pub use pipe::{ChunkSink, PipeReader};
pub use session::{ClientSession, SessionHandler};
pub use stream_server::StreamServer;
