//! Tests for the client session

use super::*;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

use chorus_protocol::{Ack, Hello, MessageKind, PcmChunk, SampleFormat, Time, TimeVal};

/// Handler that records upcalls
#[derive(Default)]
struct RecordingHandler {
    messages: Mutex<Vec<(Envelope, Bytes)>>,
    disconnects: AtomicUsize,
}

impl SessionHandler for RecordingHandler {
    fn on_message(&self, _session: &Arc<ClientSession>, envelope: Envelope, payload: Bytes) {
        self.messages.lock().push((envelope, payload));
    }

    fn on_disconnect(&self, _session: &Arc<ClientSession>) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// A session wired to a loopback socket, plus the client end
async fn session_pair() -> (Arc<ClientSession>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server_side, _) = listener.accept().await.unwrap();
    (ClientSession::new(server_side).unwrap(), client)
}

/// Read one frame from the client end
async fn read_frame(stream: &mut TcpStream) -> (Envelope, Bytes) {
    let mut header = [0u8; ENVELOPE_SIZE];
    stream.read_exact(&mut header).await.unwrap();
    let envelope = Envelope::decode(&mut Bytes::copy_from_slice(&header)).unwrap();

    let mut payload = vec![0u8; envelope.size as usize];
    stream.read_exact(&mut payload).await.unwrap();
    (envelope, Bytes::from(payload))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ============================================================================
// Delivery and ordering
// ============================================================================

#[tokio::test]
async fn test_frames_delivered_in_enqueue_order() {
    let (session, mut client) = session_pair().await;
    session.start(Arc::new(RecordingHandler::default()));

    session.send(Time { latency: 0.5 }.to_frame().replying_to(1));
    session.send(Ack.to_frame().replying_to(2));
    session.send(
        SampleFormat {
            rate: 48_000,
            bits: 16,
            channels: 2,
        }
        .to_frame(),
    );

    let (first, _) = read_frame(&mut client).await;
    let (second, _) = read_frame(&mut client).await;
    let (third, _) = read_frame(&mut client).await;

    assert_eq!(first.kind, MessageKind::Time);
    assert_eq!(first.refers_to, 1);
    assert_eq!(second.kind, MessageKind::Ack);
    assert_eq!(second.refers_to, 2);
    assert_eq!(third.kind, MessageKind::SampleFormat);

    // Sender-assigned ids are monotonic within the session.
    assert!(first.id < second.id && second.id < third.id);

    session.stop();
}

#[tokio::test]
async fn test_chunks_gated_until_stream_active() {
    let (session, mut client) = session_pair().await;
    session.start(Arc::new(RecordingHandler::default()));

    let chunk = PcmChunk {
        timestamp: TimeVal::new(1, 0),
        payload: Bytes::from_static(&[0u8; 64]),
    };

    session.add_chunk(Arc::new(chunk.to_frame()));
    let mut probe = [0u8; 1];
    let silent =
        tokio::time::timeout(Duration::from_millis(200), client.read_exact(&mut probe)).await;
    assert!(silent.is_err(), "chunk delivered before startStream");

    session.set_stream_active(true);
    session.add_chunk(Arc::new(chunk.to_frame()));

    let (envelope, payload) = read_frame(&mut client).await;
    assert_eq!(envelope.kind, MessageKind::PcmChunk);
    let decoded = PcmChunk::decode(&mut payload.clone()).unwrap();
    assert_eq!(decoded.timestamp, TimeVal::new(1, 0));

    session.stop();
}

// ============================================================================
// Inbound dispatch
// ============================================================================

#[tokio::test]
async fn test_reader_dispatches_hello() {
    use tokio::io::AsyncWriteExt;

    let (session, mut client) = session_pair().await;
    let handler = Arc::new(RecordingHandler::default());
    session.start(handler.clone());

    let hello = Hello {
        mac: "00:11:22:33:44:55".into(),
        hostname: "pi".into(),
        version: "0.10".into(),
    };
    let frame = hello.to_frame();
    let mut wire = BytesMut::new();
    frame.envelope(7).encode(&mut wire);
    wire.extend_from_slice(&frame.payload);
    client.write_all(&wire).await.unwrap();

    wait_until(|| !handler.messages.lock().is_empty()).await;

    let (envelope, mut payload) = handler.messages.lock().remove(0);
    assert_eq!(envelope.kind, MessageKind::Hello);
    assert_eq!(envelope.id, 7);
    assert_eq!(Hello::decode(&mut payload).unwrap(), hello);

    session.stop();
}

// ============================================================================
// Liveness
// ============================================================================

#[tokio::test]
async fn test_disconnect_reported_once() {
    let (session, client) = session_pair().await;
    let handler = Arc::new(RecordingHandler::default());
    session.start(handler.clone());
    assert!(session.active());

    drop(client);
    wait_until(|| !session.active()).await;
    wait_until(|| handler.disconnects.load(Ordering::SeqCst) > 0).await;

    // stop() after the fact must not produce a second upcall.
    session.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handler.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_full_queue_marks_session_inactive() {
    // Never started: nothing drains the queue.
    let (session, _client) = session_pair().await;
    let frame = Arc::new(Ack.to_frame());

    for _ in 0..300 {
        session.add(Arc::clone(&frame));
    }
    assert!(!session.active());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (session, _client) = session_pair().await;
    session.start(Arc::new(RecordingHandler::default()));

    session.stop();
    session.stop();
    assert!(!session.active());
}

#[tokio::test]
async fn test_mac_binding() {
    let (session, _client) = session_pair().await;
    assert_eq!(session.mac(), None);

    session.set_mac("aa:bb:cc:dd:ee:ff");
    assert_eq!(session.mac().as_deref(), Some("aa:bb:cc:dd:ee:ff"));
}
