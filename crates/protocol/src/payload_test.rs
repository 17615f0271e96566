//! Tests for typed payloads

use super::*;
use bytes::BytesMut;

// ============================================================================
// Hello
// ============================================================================

#[test]
fn test_hello_roundtrip() {
    let hello = Hello {
        mac: "00:11:22:33:44:55".into(),
        hostname: "pi".into(),
        version: "0.10".into(),
    };
    let frame = hello.to_frame();
    assert_eq!(frame.kind, MessageKind::Hello);

    let decoded = Hello::decode(&mut frame.payload.clone()).unwrap();
    assert_eq!(decoded, hello);
}

#[test]
fn test_hello_truncated() {
    let hello = Hello {
        mac: "aa:bb:cc:dd:ee:ff".into(),
        hostname: "host".into(),
        version: "1".into(),
    };
    let frame = hello.to_frame();
    let mut short = frame.payload.slice(..frame.payload.len() - 1);

    assert!(matches!(
        Hello::decode(&mut short),
        Err(ProtocolError::ShortRead)
    ));
}

#[test]
fn test_hello_invalid_utf8() {
    let mut buf = BytesMut::new();
    buf.put_u32_le(2);
    buf.put_slice(&[0xFF, 0xFE]);

    let err = Hello::decode(&mut buf.freeze()).unwrap_err();
    assert!(err.to_string().contains("invalid UTF-8"));
}

// ============================================================================
// Request
// ============================================================================

#[test]
fn test_request_kind_tags_match_requested_messages() {
    assert_eq!(RequestKind::Time.to_u16(), MessageKind::Time as u16);
    assert_eq!(
        RequestKind::ServerSettings.to_u16(),
        MessageKind::ServerSettings as u16
    );
    assert_eq!(
        RequestKind::SampleFormat.to_u16(),
        MessageKind::SampleFormat as u16
    );
    assert_eq!(RequestKind::Header.to_u16(), MessageKind::Header as u16);
}

#[test]
fn test_request_roundtrip() {
    for kind in [
        RequestKind::Time,
        RequestKind::ServerSettings,
        RequestKind::SampleFormat,
        RequestKind::Header,
    ] {
        let frame = Request { kind }.to_frame();
        let decoded = Request::decode(&mut frame.payload.clone()).unwrap();
        assert_eq!(decoded.kind, kind);
    }
}

#[test]
fn test_request_rejects_non_requestable_kind() {
    let mut buf = BytesMut::new();
    buf.put_u16_le(MessageKind::Hello as u16);

    let err = Request::decode(&mut buf.freeze()).unwrap_err();
    assert!(err.to_string().contains("unknown request kind"));
}

// ============================================================================
// Command / Ack / Time
// ============================================================================

#[test]
fn test_command_roundtrip() {
    let cmd = Command {
        command: "startStream".into(),
    };
    let frame = cmd.to_frame();
    let decoded = Command::decode(&mut frame.payload.clone()).unwrap();
    assert_eq!(decoded.command, "startStream");
}

#[test]
fn test_ack_has_empty_payload() {
    let frame = Ack.to_frame();
    assert_eq!(frame.kind, MessageKind::Ack);
    assert!(frame.payload.is_empty());
}

#[test]
fn test_time_roundtrip() {
    let frame = Time { latency: 0.0125 }.to_frame();
    let decoded = Time::decode(&mut frame.payload.clone()).unwrap();
    assert!((decoded.latency - 0.0125).abs() < 1e-12);
}

// ============================================================================
// SampleFormat
// ============================================================================

#[test]
fn test_sample_format_parse() {
    let f: SampleFormat = "48000:16:2".parse().unwrap();
    assert_eq!(f.rate, 48_000);
    assert_eq!(f.bits, 16);
    assert_eq!(f.channels, 2);
    assert_eq!(f.to_string(), "48000:16:2");
    assert_eq!(f.frame_size(), 4);
    assert_eq!(f.bytes_per_ms(20), 48_000 / 50 * 4);
}

#[test]
fn test_sample_format_parse_errors() {
    for bad in ["", "48000:16", "48000:16:2:9", "0:16:2", "48000:12:2", "x:16:2"] {
        assert!(bad.parse::<SampleFormat>().is_err(), "accepted {bad:?}");
    }
}

#[test]
fn test_sample_format_wire_roundtrip() {
    let f = SampleFormat {
        rate: 44_100,
        bits: 24,
        channels: 2,
    };
    let frame = f.to_frame();
    assert_eq!(SampleFormat::decode(&mut frame.payload.clone()).unwrap(), f);
}

// ============================================================================
// ServerSettings
// ============================================================================

#[test]
fn test_server_settings_roundtrip() {
    let settings = ServerSettings {
        buffer_ms: 1000,
        latency: -40,
        volume: 42,
        muted: true,
    };
    let frame = settings.to_frame();
    let decoded = ServerSettings::decode(&mut frame.payload.clone()).unwrap();
    assert_eq!(decoded, settings);
}

// ============================================================================
// CodecHeader / PcmChunk
// ============================================================================

#[test]
fn test_codec_header_roundtrip() {
    let header = CodecHeader {
        codec: "pcm".into(),
        blob: Bytes::from_static(b"RIFF....WAVE"),
    };
    let frame = header.to_frame();
    let decoded = CodecHeader::decode(&mut frame.payload.clone()).unwrap();
    assert_eq!(decoded, header);
}

#[test]
fn test_pcm_chunk_roundtrip() {
    let chunk = PcmChunk {
        timestamp: TimeVal::new(1234, 567_890),
        payload: Bytes::from(vec![0x7Fu8; 3840]),
    };
    let frame = chunk.to_frame();
    assert_eq!(frame.kind, MessageKind::PcmChunk);

    let decoded = PcmChunk::decode(&mut frame.payload.clone()).unwrap();
    assert_eq!(decoded.timestamp, chunk.timestamp);
    assert_eq!(decoded.payload.len(), 3840);
}

#[test]
fn test_pcm_chunk_duration() {
    let format: SampleFormat = "48000:16:2".parse().unwrap();
    let chunk = PcmChunk {
        timestamp: TimeVal::default(),
        // 20 ms at 48 kHz stereo 16-bit
        payload: Bytes::from(vec![0u8; format.bytes_per_ms(20)]),
    };
    assert!((chunk.duration_ms(&format) - 20.0).abs() < 1e-9);
}

// ============================================================================
// Frame
// ============================================================================

#[test]
fn test_frame_reply_and_envelope() {
    let frame = Time { latency: 0.5 }.to_frame().replying_to(7);
    assert_eq!(frame.refers_to, 7);

    let env = frame.envelope(3);
    assert_eq!(env.kind, MessageKind::Time);
    assert_eq!(env.id, 3);
    assert_eq!(env.refers_to, 7);
    assert_eq!(env.size, frame.payload.len() as u32);
    assert!(env.sent.sec > 0);
}

#[test]
fn test_frame_clone_shares_payload() {
    let chunk = PcmChunk {
        timestamp: TimeVal::default(),
        payload: Bytes::from(vec![1u8; 1024]),
    };
    let frame = chunk.to_frame();
    let clone = frame.clone();

    // Bytes clones are refcounted views over the same allocation.
    assert_eq!(frame.payload.as_ptr(), clone.payload.as_ptr());
}
