//! End-to-end tests of the event-driven client against a scripted peer.

#![cfg(feature = "async-tokio")]

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use wsclient::protocol::{CloseCode, Frame, HandshakeKey, HandshakeRequest, OpCode};
use wsclient::{Client, ClientFactory, Config, ConnectionState, Engine, Event, EventReceiver};

const KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const RESPONSE: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
    Sec-WebSocket-Protocol: chat\r\n\r\n";

/// Server end of an in-memory connection.
struct Peer {
    io: DuplexStream,
}

impl Peer {
    async fn read_request(&mut self) -> String {
        let mut request = Vec::new();
        let mut byte = [0u8; 1];
        while !request.ends_with(b"\r\n\r\n") {
            self.io.read_exact(&mut byte).await.unwrap();
            request.push(byte[0]);
        }
        String::from_utf8(request).unwrap()
    }

    async fn accept(&mut self) -> String {
        let request = self.read_request().await;
        self.io.write_all(RESPONSE).await.unwrap();
        request
    }

    async fn send(&mut self, frame: Frame) {
        self.io.write_all(&frame.encode()).await.unwrap();
    }

    async fn recv(&mut self) -> Frame {
        let mut head = [0u8; 2];
        self.io.read_exact(&mut head).await.unwrap();
        let extra = match head[1] & 0x7F {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let mut wire = head.to_vec();
        let mut ext = vec![0u8; extra];
        self.io.read_exact(&mut ext).await.unwrap();
        wire.extend_from_slice(&ext);
        let len = match extra {
            2 => usize::from(u16::from_be_bytes([ext[0], ext[1]])),
            8 => usize::try_from(u64::from_be_bytes(ext.try_into().unwrap())).unwrap(),
            _ => usize::from(head[1] & 0x7F),
        };
        let mask = if head[1] & 0x80 != 0 { 4 } else { 0 };
        let mut rest = vec![0u8; mask + len];
        self.io.read_exact(&mut rest).await.unwrap();
        wire.extend(rest);
        Frame::decode(&wire).unwrap()
    }
}

async fn open(config: Config) -> (Client<DuplexStream>, EventReceiver, Peer) {
    let (client_io, server_io) = duplex(1 << 20);
    let mut peer = Peer { io: server_io };
    let engine = Engine::with_key(
        1,
        HandshakeRequest::new("example.com", "/chat").with_protocol("chat"),
        HandshakeKey::from_key(KEY),
        config,
    );
    let (connect, request) = tokio::join!(Client::connect_engine(client_io, engine), peer.accept());
    assert!(request.starts_with("GET /chat HTTP/1.1\r\n"));
    let (client, events) = connect.unwrap();
    (client, events, peer)
}

/// Collect events, skipping the per-frame notifications.
async fn next_event(events: &mut EventReceiver) -> Event {
    loop {
        match events.recv().await.unwrap() {
            Event::DataFrameReceived(_) => continue,
            event => return event,
        }
    }
}

#[tokio::test]
async fn test_handshake_exposes_response() {
    let (client, _events, _peer) = open(Config::default()).await;
    assert_eq!(client.state(), ConnectionState::Open);
    assert_eq!(client.response_status(), Some(101));
    let headers = client.response_headers().unwrap();
    assert_eq!(headers.get("sec-websocket-protocol").map(String::as_str), Some("chat"));
}

#[tokio::test]
async fn test_fragmented_text_with_interleaved_ping() {
    let (client, mut events, mut peer) = open(Config::default()).await;

    peer.send(Frame::new(false, OpCode::Text, "Hello")).await;
    peer.send(Frame::new(true, OpCode::Ping, "beat")).await;
    peer.send(Frame::new(false, OpCode::Continuation, ", Wor")).await;
    peer.send(Frame::new(true, OpCode::Continuation, "ld!")).await;

    let pong = peer.recv().await;
    assert_eq!(pong.opcode, OpCode::Pong);
    assert!(pong.mask);
    assert_eq!(pong.application_data(), b"beat");

    match next_event(&mut events).await {
        Event::PingReceived(ping) => assert_eq!(ping.data, b"beat"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(
        next_event(&mut events).await,
        Event::TextMessage("Hello, World!".into())
    );
    assert_eq!(client.state(), ConnectionState::Open);
}

#[tokio::test]
async fn test_every_frame_reported_before_dispatch() {
    let (_client, mut events, mut peer) = open(Config::default()).await;
    peer.send(Frame::binary(vec![1, 2, 3])).await;

    match events.recv().await.unwrap() {
        Event::DataFrameReceived(frame) => assert_eq!(frame.opcode, OpCode::Binary),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(events.recv().await, Some(Event::BinaryMessage(vec![1, 2, 3])));
}

#[tokio::test]
async fn test_sends_are_masked_and_fragmented() {
    let (client, _events, mut peer) = open(Config::default()).await;

    client.send_text_fragmented("Hello, World!", 5).await.unwrap();
    let parts = [
        (OpCode::Text, false, "Hello"),
        (OpCode::Continuation, false, ", Wor"),
        (OpCode::Continuation, true, "ld!"),
    ];
    for (opcode, fin, text) in parts {
        let frame = peer.recv().await;
        assert!(frame.mask);
        assert_eq!(frame.opcode, opcode);
        assert_eq!(frame.fin, fin);
        assert_eq!(frame.application_data(), text.as_bytes());
    }

    client.send_binary(&[0u8; 70_000]).await.unwrap();
    let frame = peer.recv().await;
    assert_eq!(frame.application_data().len(), 70_000);
    assert!(frame.fin);
}

#[tokio::test]
async fn test_concurrent_sends_do_not_interleave() {
    let (client, _events, mut peer) = open(Config::default()).await;
    let client = std::sync::Arc::new(client);

    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let client = std::sync::Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            client.send_binary_fragmented(&[i; 300], 100).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for _ in 0..8 {
        let first = peer.recv().await;
        assert_eq!(first.opcode, OpCode::Binary);
        let fill = first.application_data()[0];
        for expected_fin in [false, true] {
            let next = peer.recv().await;
            assert_eq!(next.opcode, OpCode::Continuation);
            assert_eq!(next.fin, expected_fin);
            assert!(next.application_data().iter().all(|b| *b == fill));
        }
    }
}

#[tokio::test]
async fn test_server_close_is_echoed() {
    let (client, mut events, mut peer) = open(Config::default()).await;
    peer.send(Frame::new(true, OpCode::Close, vec![0x03, 0xE9, b'b', b'y', b'e']))
        .await;

    let echo = peer.recv().await;
    assert_eq!(echo.opcode, OpCode::Close);
    assert_eq!(echo.application_data(), &[0x03, 0xE9, b'b', b'y', b'e']);

    match next_event(&mut events).await {
        Event::Closed(Some(close)) => {
            assert_eq!(close.code, CloseCode::GoingAway);
            assert_eq!(close.reason, b"bye");
        }
        other => panic!("unexpected {other:?}"),
    }
    let mut states = client.state_changes();
    states
        .wait_for(|state| *state == ConnectionState::Closed)
        .await
        .unwrap();
    assert!(client.has_received_close());
    assert!(client.has_sent_close());
}

#[tokio::test]
async fn test_protocol_error_sends_1002() {
    let (client, mut events, mut peer) = open(Config::default()).await;
    // Masked frames are forbidden from a server.
    peer.send(Frame::text("sneaky").with_mask_key([1, 2, 3, 4])).await;

    assert_eq!(
        next_event(&mut events).await,
        Event::Errored(wsclient::Error::MaskedServerFrame)
    );
    let close = peer.recv().await;
    assert_eq!(close.opcode, OpCode::Close);
    assert_eq!(&close.application_data()[..2], &1002u16.to_be_bytes());
    assert_eq!(client.state(), ConnectionState::Closing);

    // Answering the close completes the handshake.
    peer.send(Frame::new(true, OpCode::Close, 1002u16.to_be_bytes().to_vec()))
        .await;
    assert!(matches!(next_event(&mut events).await, Event::Closed(Some(_))));
    client.join().await;
}

#[tokio::test]
async fn test_close_normal_sends_1000() {
    let (client, mut events, mut peer) = open(Config::default()).await;
    let server = async {
        let close = peer.recv().await;
        assert_eq!(close.opcode, OpCode::Close);
        assert!(close.mask);
        assert_eq!(close.application_data(), &1000u16.to_be_bytes());
        peer.send(Frame::new(true, OpCode::Close, close.application_data().to_vec()))
            .await;
    };
    let (closed, ()) = tokio::join!(client.close_normal(), server);
    closed.unwrap();

    assert_eq!(client.state(), ConnectionState::Closed);
    match next_event(&mut events).await {
        Event::Closed(Some(close)) => assert_eq!(close.code, CloseCode::Normal),
        other => panic!("unexpected {other:?}"),
    }
    assert!(client.has_sent_close());
}

#[tokio::test]
async fn test_server_eof_reports_closed() {
    let (client, mut events, peer) = open(Config::default()).await;
    drop(peer);

    assert_eq!(next_event(&mut events).await, Event::Closed(None));
    let mut states = client.state_changes();
    states
        .wait_for(|state| *state == ConnectionState::Closed)
        .await
        .unwrap();
    assert!(client.closed_by_server());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_protocol_error_close_times_out() {
    let config = Config::default().with_close_timeout(Duration::from_secs(2));
    let (client, mut events, mut peer) = open(config).await;
    peer.send(Frame::text("x").with_rsv(4)).await;

    assert_eq!(
        next_event(&mut events).await,
        Event::Errored(wsclient::Error::ReservedBitsSet(4))
    );
    assert_eq!(next_event(&mut events).await, Event::Closed(None));
    assert_eq!(client.state(), ConnectionState::Closed);
    drop(peer);
}

#[tokio::test]
async fn test_disconnect_stops_reading() {
    let (client, mut events, _peer) = open(Config::default()).await;
    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(events.recv().await, Some(Event::Closed(None)));
    assert!(client.send_text("late").await.is_err());
    client.join().await;
}

#[tokio::test]
async fn test_factory_assigns_ids() {
    let factory = ClientFactory::starting_at(Config::default(), 40);
    let (first_io, mut first_peer) = duplex(4096);
    let (second_io, mut second_peer) = duplex(4096);

    // The factory generates random keys, so the peer computes the accept.
    async fn accept_any(io: &mut DuplexStream) {
        let mut request = Vec::new();
        let mut byte = [0u8; 1];
        while !request.ends_with(b"\r\n\r\n") {
            io.read_exact(&mut byte).await.unwrap();
            request.push(byte[0]);
        }
        let text = String::from_utf8(request).unwrap();
        let key = text
            .lines()
            .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: "))
            .unwrap();
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
             Connection: upgrade\r\nSec-WebSocket-Accept: {}\r\n\r\n",
            wsclient::compute_accept_key(key)
        );
        io.write_all(response.as_bytes()).await.unwrap();
    }

    let request = || HandshakeRequest::new("example.com", "/");
    let (first, _) = tokio::join!(factory.connect(first_io, request()), accept_any(&mut first_peer));
    let (second, _) = tokio::join!(factory.connect(second_io, request()), accept_any(&mut second_peer));

    assert_eq!(first.unwrap().0.id(), 40);
    assert_eq!(second.unwrap().0.id(), 41);
}
