//! Chorus wire protocol - binary client/server message codec
//!
//! Defines the message envelope and typed payloads exchanged between the
//! stream server and playback clients over TCP. Uses a simple fixed-layout
//! binary format for cross-language client compatibility (not Rust-specific
//! like bincode).
//!
//! # Wire Format
//!
//! Every frame starts with a 26-byte little-endian envelope:
//!
//! ```text
//! ┌──────┬──────┬──────────┬──────────────┬──────────────┬──────┐
//! │ type │ id   │ refersTo │ sent         │ received     │ size │
//! │ u16  │ u16  │ u16      │ i32 s, i32 µs│ i32 s, i32 µs│ u32  │
//! └──────┴──────┴──────────┴──────────────┴──────────────┴──────┘
//! ```
//!
//! followed by `size` payload bytes. Strings and blobs inside payloads are
//! `u32` length-prefixed.
//!
//! # Message Types
//!
//! - `Hello` (client → server): client identity (MAC), host, version
//! - `Request` (client → server): ask for Time / ServerSettings / SampleFormat / Header
//! - `Command` (client → server): verb, e.g. `startStream`
//! - `Ack` (server → client): acknowledges a `refersTo` id
//! - `Time` (server → client): one-way latency estimate in seconds
//! - `SampleFormat` (server → client): rate / bits / channels
//! - `ServerSettings` (server → client): buffering target and per-client volume state
//! - `Header` (server → client): codec initialization blob
//! - `PcmChunk` (server → client): timestamped PCM payload

mod envelope;
mod error;
mod payload;
mod time;

pub use envelope::{ENVELOPE_SIZE, Envelope, MAX_PAYLOAD_SIZE, MessageKind};
pub use error::{ProtocolError, Result};
pub use payload::{
    Ack, CodecHeader, Command, Frame, Hello, PcmChunk, Request, RequestKind, SampleFormat,
    ServerSettings, Time,
};
pub use time::TimeVal;
