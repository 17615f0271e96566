//! Message envelope - the fixed 26-byte frame header
//!
//! Every frame on the wire starts with this envelope; `size` payload bytes
//! follow. All fields are little-endian. The receive timestamp is stamped
//! the moment the envelope is parsed, so latency math on request/reply
//! pairs works without a separate clock exchange.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::time::TimeVal;

/// Size of the envelope in bytes
pub const ENVELOPE_SIZE: usize = 26;

/// Maximum accepted payload size (4 MiB)
///
/// PCM chunks are a few KiB; anything near this limit is a corrupt or
/// hostile frame.
pub const MAX_PAYLOAD_SIZE: u32 = 4 * 1024 * 1024;

/// Message type discriminants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    /// Codec initialization blob
    Header = 1,
    /// Timestamped PCM payload
    PcmChunk = 2,
    /// Sample rate / bit depth / channel count
    SampleFormat = 3,
    /// Buffering target and per-client volume state
    ServerSettings = 4,
    /// Latency estimate reply
    Time = 5,
    /// Client request for one of the server-owned messages
    Request = 6,
    /// Acknowledgement of a command
    Ack = 7,
    /// Client command verb
    Command = 8,
    /// Client identity announcement
    Hello = 9,
}

impl MessageKind {
    /// Map a wire tag back to a message kind
    pub fn from_u16(tag: u16) -> Option<Self> {
        match tag {
            1 => Some(Self::Header),
            2 => Some(Self::PcmChunk),
            3 => Some(Self::SampleFormat),
            4 => Some(Self::ServerSettings),
            5 => Some(Self::Time),
            6 => Some(Self::Request),
            7 => Some(Self::Ack),
            8 => Some(Self::Command),
            9 => Some(Self::Hello),
            _ => None,
        }
    }
}

/// The frame header preceding every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    /// Message type
    pub kind: MessageKind,
    /// Monotonic sender-assigned frame id
    pub id: u16,
    /// Id of the frame this one replies to (0 when unsolicited)
    pub refers_to: u16,
    /// Send time as observed by the sender
    pub sent: TimeVal,
    /// Receive time, stamped when the envelope is parsed
    pub received: TimeVal,
    /// Payload size in bytes
    pub size: u32,
}

impl Envelope {
    /// Encode the envelope into `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(ENVELOPE_SIZE);
        buf.put_u16_le(self.kind as u16);
        buf.put_u16_le(self.id);
        buf.put_u16_le(self.refers_to);
        buf.put_i32_le(self.sent.sec);
        buf.put_i32_le(self.sent.usec);
        buf.put_i32_le(self.received.sec);
        buf.put_i32_le(self.received.usec);
        buf.put_u32_le(self.size);
    }

    /// Decode an envelope, stamping `received` with the current time
    ///
    /// The sender leaves `received` zeroed; whatever it put there is
    /// discarded here.
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        if buf.remaining() < ENVELOPE_SIZE {
            return Err(ProtocolError::ShortRead);
        }

        let tag = buf.get_u16_le();
        let kind = MessageKind::from_u16(tag)
            .ok_or_else(|| ProtocolError::malformed(format!("unknown message type: {tag}")))?;

        let id = buf.get_u16_le();
        let refers_to = buf.get_u16_le();
        let sent = TimeVal::new(buf.get_i32_le(), buf.get_i32_le());
        let _wire_received = TimeVal::new(buf.get_i32_le(), buf.get_i32_le());
        let size = buf.get_u32_le();

        if size > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::malformed(format!(
                "payload size {size} exceeds limit {MAX_PAYLOAD_SIZE}"
            )));
        }

        Ok(Self {
            kind,
            id,
            refers_to,
            sent,
            received: TimeVal::now(),
            size,
        })
    }
}

#[cfg(test)]
#[path = "envelope_test.rs"]
mod tests;
