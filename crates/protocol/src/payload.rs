//! Typed payloads and the outbound frame unit
//!
//! Each payload type encodes into / decodes from the bytes that follow the
//! envelope. Outbound traffic is wrapped in [`Frame`]: payload bytes are
//! encoded once, then shared by reference across every session queue; the
//! per-session envelope (frame id, send timestamp) is stamped by the
//! session's sender task at write time.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::envelope::{Envelope, MessageKind};
use crate::error::{ProtocolError, Result};
use crate::time::TimeVal;

/// An outbound message: type tag, reply reference, pre-encoded payload
///
/// The payload `Bytes` are refcounted; cloning a frame or sharing it via
/// `Arc` never copies payload memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Message type
    pub kind: MessageKind,
    /// Id of the frame this one replies to (0 when unsolicited)
    pub refers_to: u16,
    /// Encoded payload bytes
    pub payload: Bytes,
}

impl Frame {
    /// Wrap an encoded payload
    pub fn new(kind: MessageKind, payload: Bytes) -> Self {
        Self {
            kind,
            refers_to: 0,
            payload,
        }
    }

    /// Mark this frame as a reply to `id`
    pub fn replying_to(mut self, id: u16) -> Self {
        self.refers_to = id;
        self
    }

    /// Build the envelope for this frame, stamping the send time now
    pub fn envelope(&self, id: u16) -> Envelope {
        Envelope {
            kind: self.kind,
            id,
            refers_to: self.refers_to,
            sent: TimeVal::now(),
            received: TimeVal::default(),
            size: self.payload.len() as u32,
        }
    }
}

fn encode_string(s: &str, buf: &mut BytesMut) {
    let bytes = s.as_bytes();
    buf.put_u32_le(bytes.len() as u32);
    buf.put_slice(bytes);
}

fn decode_string(buf: &mut Bytes) -> Result<String> {
    let bytes = decode_blob(buf)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| ProtocolError::malformed(format!("invalid UTF-8: {e}")))
}

fn decode_blob(buf: &mut Bytes) -> Result<Bytes> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::ShortRead);
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::ShortRead);
    }
    Ok(buf.split_to(len))
}

/// Client identity announcement (client → server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Stable client identity
    pub mac: String,
    /// Client host name
    pub hostname: String,
    /// Client software version
    pub version: String,
}

impl Hello {
    /// Encode into an outbound frame
    pub fn to_frame(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(64);
        encode_string(&self.mac, &mut buf);
        encode_string(&self.hostname, &mut buf);
        encode_string(&self.version, &mut buf);
        Frame::new(MessageKind::Hello, buf.freeze())
    }

    /// Decode from payload bytes
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            mac: decode_string(buf)?,
            hostname: decode_string(buf)?,
            version: decode_string(buf)?,
        })
    }
}

/// What a client may ask the server to send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Time sync exchange
    Time,
    /// Per-client server settings
    ServerSettings,
    /// The stream's sample format
    SampleFormat,
    /// The codec initialization header
    Header,
}

impl RequestKind {
    /// The wire tag of a request kind is the tag of the message it requests
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Time => MessageKind::Time as u16,
            Self::ServerSettings => MessageKind::ServerSettings as u16,
            Self::SampleFormat => MessageKind::SampleFormat as u16,
            Self::Header => MessageKind::Header as u16,
        }
    }

    /// Map a wire tag back to a request kind
    pub fn from_u16(tag: u16) -> Option<Self> {
        match MessageKind::from_u16(tag)? {
            MessageKind::Time => Some(Self::Time),
            MessageKind::ServerSettings => Some(Self::ServerSettings),
            MessageKind::SampleFormat => Some(Self::SampleFormat),
            MessageKind::Header => Some(Self::Header),
            _ => None,
        }
    }
}

/// Client request for a server-owned message (client → server)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// What is being requested
    pub kind: RequestKind,
}

impl Request {
    /// Encode into an outbound frame
    pub fn to_frame(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(2);
        buf.put_u16_le(self.kind.to_u16());
        Frame::new(MessageKind::Request, buf.freeze())
    }

    /// Decode from payload bytes
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(ProtocolError::ShortRead);
        }
        let tag = buf.get_u16_le();
        let kind = RequestKind::from_u16(tag)
            .ok_or_else(|| ProtocolError::malformed(format!("unknown request kind: {tag}")))?;
        Ok(Self { kind })
    }
}

/// Client command verb (client → server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The verb, e.g. `startStream`
    pub command: String,
}

impl Command {
    /// Encode into an outbound frame
    pub fn to_frame(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(16);
        encode_string(&self.command, &mut buf);
        Frame::new(MessageKind::Command, buf.freeze())
    }

    /// Decode from payload bytes
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            command: decode_string(buf)?,
        })
    }
}

/// Command acknowledgement (server → client); empty payload, the envelope's
/// `refersTo` carries the reference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ack;

impl Ack {
    /// Encode into an outbound frame
    pub fn to_frame(&self) -> Frame {
        Frame::new(MessageKind::Ack, Bytes::new())
    }
}

/// Latency estimate reply (server → client)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Time {
    /// `received - sent` of the originating request, in seconds
    pub latency: f64,
}

impl Time {
    /// Encode into an outbound frame
    pub fn to_frame(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_f64_le(self.latency);
        Frame::new(MessageKind::Time, buf.freeze())
    }

    /// Decode from payload bytes
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 8 {
            return Err(ProtocolError::ShortRead);
        }
        Ok(Self {
            latency: buf.get_f64_le(),
        })
    }
}

/// PCM stream parameters
///
/// Parses from and displays as `"rate:bits:channels"`, e.g. `48000:16:2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFormat {
    /// Sample rate in Hz
    pub rate: u32,
    /// Bits per sample
    pub bits: u16,
    /// Channel count
    pub channels: u16,
}

impl SampleFormat {
    /// Bytes per multi-channel frame
    pub fn frame_size(&self) -> usize {
        self.channels as usize * (self.bits as usize / 8)
    }

    /// Bytes of PCM covering `ms` milliseconds
    pub fn bytes_per_ms(&self, ms: u32) -> usize {
        self.frame_size() * (self.rate as usize * ms as usize / 1000)
    }

    /// Encode into an outbound frame
    pub fn to_frame(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u32_le(self.rate);
        buf.put_u16_le(self.bits);
        buf.put_u16_le(self.channels);
        Frame::new(MessageKind::SampleFormat, buf.freeze())
    }

    /// Decode from payload bytes
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 8 {
            return Err(ProtocolError::ShortRead);
        }
        Ok(Self {
            rate: buf.get_u32_le(),
            bits: buf.get_u16_le(),
            channels: buf.get_u16_le(),
        })
    }
}

impl FromStr for SampleFormat {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(':');
        let mut next = |field: &str| {
            parts
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .filter(|&v| v > 0)
                .ok_or_else(|| ProtocolError::malformed(format!("bad sample format {field}: {s}")))
        };
        let rate = next("rate")?;
        let bits = next("bits")?;
        let channels = next("channels")?;
        if parts.next().is_some() || bits % 8 != 0 || bits > 32 || channels > u16::MAX as u32 {
            return Err(ProtocolError::malformed(format!("bad sample format: {s}")));
        }
        Ok(Self {
            rate,
            bits: bits as u16,
            channels: channels as u16,
        })
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.rate, self.bits, self.channels)
    }
}

/// Per-client server settings (server → client)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Whole-pipeline target buffering in milliseconds
    pub buffer_ms: u32,
    /// Per-client latency trim in milliseconds
    pub latency: i32,
    /// Volume percent, 0..=100
    pub volume: u16,
    /// Mute flag
    pub muted: bool,
}

impl ServerSettings {
    /// Encode into an outbound frame
    pub fn to_frame(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(11);
        buf.put_u32_le(self.buffer_ms);
        buf.put_i32_le(self.latency);
        buf.put_u16_le(self.volume);
        buf.put_u8(self.muted as u8);
        Frame::new(MessageKind::ServerSettings, buf.freeze())
    }

    /// Decode from payload bytes
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 11 {
            return Err(ProtocolError::ShortRead);
        }
        Ok(Self {
            buffer_ms: buf.get_u32_le(),
            latency: buf.get_i32_le(),
            volume: buf.get_u16_le(),
            muted: buf.get_u8() != 0,
        })
    }
}

/// Codec initialization blob (server → client)
#[derive(Debug, Clone, PartialEq)]
pub struct CodecHeader {
    /// Codec name, e.g. `pcm`
    pub codec: String,
    /// Codec-specific initialization bytes
    pub blob: Bytes,
}

impl CodecHeader {
    /// Encode into an outbound frame
    pub fn to_frame(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(8 + self.codec.len() + self.blob.len());
        encode_string(&self.codec, &mut buf);
        buf.put_u32_le(self.blob.len() as u32);
        buf.put_slice(&self.blob);
        Frame::new(MessageKind::Header, buf.freeze())
    }

    /// Decode from payload bytes
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            codec: decode_string(buf)?,
            blob: decode_blob(buf)?,
        })
    }
}

/// Timestamped PCM payload (server → client)
#[derive(Debug, Clone, PartialEq)]
pub struct PcmChunk {
    /// Stream timestamp of the first sample
    pub timestamp: TimeVal,
    /// Raw PCM bytes
    pub payload: Bytes,
}

impl PcmChunk {
    /// Playback duration in milliseconds for the given format
    pub fn duration_ms(&self, format: &SampleFormat) -> f64 {
        let frames = self.payload.len() / format.frame_size().max(1);
        frames as f64 * 1e3 / format.rate as f64
    }

    /// Encode into an outbound frame
    ///
    /// The chunk payload is contiguous with the length prefix, so the
    /// encoded frame copies it once; the resulting frame is then shared
    /// by every session.
    pub fn to_frame(&self) -> Frame {
        let mut buf = BytesMut::with_capacity(12 + self.payload.len());
        buf.put_i32_le(self.timestamp.sec);
        buf.put_i32_le(self.timestamp.usec);
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        Frame::new(MessageKind::PcmChunk, buf.freeze())
    }

    /// Decode from payload bytes
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < 8 {
            return Err(ProtocolError::ShortRead);
        }
        let timestamp = TimeVal::new(buf.get_i32_le(), buf.get_i32_le());
        Ok(Self {
            timestamp,
            payload: decode_blob(buf)?,
        })
    }
}

#[cfg(test)]
#[path = "payload_test.rs"]
mod tests;
