//! End-to-end relay tests over real TCP sockets

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use rtmp_relay::amf::AmfValue;
use rtmp_relay::protocol::constants::*;
use rtmp_relay::protocol::{
    ChunkDecoder, ChunkEncoder, Command, DataMessage, RtmpChunk, RtmpMessage, UserControlEvent,
};
use rtmp_relay::session::MAX_MESSAGE_STREAMS;
use rtmp_relay::{RegistryEvent, RelayServer, ServerConfig, StreamEvent, StreamKey};

const WAIT: Duration = Duration::from_secs(5);

const AVC_CONFIG: &[u8] = &[
    0x17, 0x00, 0x00, 0x00, 0x00, 0x01, 0x42, 0x00, 0x1E, 0xFF, 0xE1, 0x00, 0x02, 0x67, 0x42,
    0x01, 0x00, 0x02, 0x68, 0xCE,
];
const AAC_CONFIG: &[u8] = &[0xAF, 0x00, 0x12, 0x10];
const KEYFRAME: &[u8] = &[0x17, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x65, 0x88];
const INTERFRAME: &[u8] = &[0x27, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x41, 0x9A];

struct TestServer {
    addr: SocketAddr,
    server: Arc<RelayServer>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<rtmp_relay::Result<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(RelayServer::new(ServerConfig::default()));
        let (stop, stop_rx) = oneshot::channel::<()>();

        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                server
                    .serve_until(listener, async {
                        let _ = stop_rx.await;
                    })
                    .await
            })
        };

        Self {
            addr,
            server,
            stop: Some(stop),
            task,
        }
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        assert!(self.task.await.unwrap().is_ok());
    }
}

/// Minimal RTMP client speaking just enough of the protocol for the tests
struct TestClient {
    socket: TcpStream,
    buf: BytesMut,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
    next_transaction: f64,
}

impl TestClient {
    async fn connect(addr: SocketAddr, app: &str) -> Self {
        let mut client = Self::handshake(addr).await;

        let mut connect = client.command(CMD_CONNECT);
        connect.command_object = AmfValue::object([
            ("app", AmfValue::from(app)),
            ("tcUrl", AmfValue::from(format!("rtmp://{}/{}", addr, app))),
            ("flashVer", AmfValue::from("FMLE/3.0")),
        ]);
        let tid = connect.transaction_id;
        client.send_command(0, connect).await;

        let reply = client.recv_command().await;
        assert_eq!(reply.name, CMD_RESULT);
        assert_eq!(reply.transaction_id, tid);
        assert_eq!(reply.status_code(), Some(NC_CONNECT_SUCCESS));
        client
    }

    /// Complete the handshake only
    async fn handshake(addr: SocketAddr) -> Self {
        let mut socket = TcpStream::connect(addr).await.unwrap();

        let mut c0c1 = vec![RTMP_VERSION];
        c0c1.extend((0..HANDSHAKE_SIZE).map(|i| (i % 253) as u8));
        socket.write_all(&c0c1).await.unwrap();

        let mut s0s1 = vec![0u8; 1 + HANDSHAKE_SIZE];
        socket.read_exact(&mut s0s1).await.unwrap();
        assert_eq!(s0s1[0], RTMP_VERSION);
        socket.write_all(&s0s1[1..]).await.unwrap();

        let mut s2 = vec![0u8; HANDSHAKE_SIZE];
        socket.read_exact(&mut s2).await.unwrap();
        assert_eq!(&s2[..], &c0c1[1..]);

        Self {
            socket,
            buf: BytesMut::new(),
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            next_transaction: 1.0,
        }
    }

    fn command(&mut self, name: &str) -> Command {
        let cmd = Command::new(name, self.next_transaction);
        self.next_transaction += 1.0;
        cmd
    }

    async fn send(&mut self, csid: u32, stream_id: u32, timestamp: u32, message: RtmpMessage) {
        let (message_type, payload) = message.encode();
        let chunk = RtmpChunk::new(csid, timestamp, message_type, stream_id, payload);
        let mut out = BytesMut::new();
        self.encoder.encode(&chunk, &mut out);
        self.socket.write_all(&out).await.unwrap();
    }

    async fn send_command(&mut self, stream_id: u32, mut cmd: Command) {
        cmd.stream_id = stream_id;
        self.send(CSID_COMMAND, stream_id, 0, RtmpMessage::Command(cmd))
            .await;
    }

    async fn send_video(&mut self, stream_id: u32, timestamp: u32, data: &'static [u8]) {
        let message = RtmpMessage::Video {
            timestamp,
            data: Bytes::from_static(data),
        };
        self.send(CSID_VIDEO, stream_id, timestamp, message).await;
    }

    async fn send_audio(&mut self, stream_id: u32, timestamp: u32, data: &'static [u8]) {
        let message = RtmpMessage::Audio {
            timestamp,
            data: Bytes::from_static(data),
        };
        self.send(CSID_AUDIO, stream_id, timestamp, message).await;
    }

    /// Next message from the server; chunk size changes are applied and
    /// passed through
    async fn recv(&mut self) -> RtmpMessage {
        tokio::time::timeout(WAIT, async {
            loop {
                if let Some(chunk) = self.decoder.decode(&mut self.buf) {
                    let message = RtmpMessage::from_chunk(&chunk).unwrap();
                    if let RtmpMessage::SetChunkSize(size) = message {
                        self.decoder.set_chunk_size(size);
                    }
                    return message;
                }
                let n = self.socket.read_buf(&mut self.buf).await.unwrap();
                assert!(n > 0, "server closed the connection");
            }
        })
        .await
        .expect("timed out waiting for a message")
    }

    async fn recv_command(&mut self) -> Command {
        loop {
            if let RtmpMessage::Command(cmd) = self.recv().await {
                return cmd;
            }
        }
    }

    /// Next message that carries media or metadata
    async fn recv_media(&mut self) -> RtmpMessage {
        loop {
            match self.recv().await {
                message @ (RtmpMessage::Video { .. }
                | RtmpMessage::Audio { .. }
                | RtmpMessage::Data(_)) => return message,
                _ => continue,
            }
        }
    }

    async fn create_stream(&mut self) -> u32 {
        let cmd = self.command(CMD_CREATE_STREAM);
        let tid = cmd.transaction_id;
        self.send_command(0, cmd).await;

        let reply = self.recv_command().await;
        assert_eq!(reply.name, CMD_RESULT);
        assert_eq!(reply.transaction_id, tid);
        reply.arguments[0].as_number().unwrap() as u32
    }

    /// Send publish and return the status code of the reply
    async fn publish(&mut self, stream_id: u32, name: &str) -> String {
        let mut cmd = Command::new(CMD_PUBLISH, 0.0);
        cmd.arguments = vec![AmfValue::from(name), AmfValue::from("live")];
        self.send_command(stream_id, cmd).await;
        self.recv_status().await
    }

    /// Send play and return the first status code other than Play.Reset
    async fn play(&mut self, stream_id: u32, name: &str) -> String {
        let mut cmd = Command::new(CMD_PLAY, 0.0);
        cmd.arguments = vec![AmfValue::from(name)];
        self.send_command(stream_id, cmd).await;

        loop {
            let code = self.recv_status().await;
            if code != NS_PLAY_RESET {
                return code;
            }
        }
    }

    async fn recv_status(&mut self) -> String {
        loop {
            let cmd = self.recv_command().await;
            if cmd.name == CMD_ON_STATUS {
                return cmd.status_code().unwrap_or_default().to_string();
            }
        }
    }
}

fn metadata(stream_id: u32) -> RtmpMessage {
    RtmpMessage::Data(DataMessage {
        name: DATA_SET_DATA_FRAME.to_string(),
        values: vec![
            AmfValue::from(DATA_ON_METADATA),
            AmfValue::object([
                ("width", AmfValue::Number(1280.0)),
                ("height", AmfValue::Number(720.0)),
                ("framerate", AmfValue::Number(30.0)),
            ]),
        ],
        stream_id,
    })
}

#[tokio::test]
async fn late_joiner_gets_cached_state_then_live_frames() {
    let server = TestServer::start().await;
    let key = StreamKey::from_parts("live", "cam");

    let mut publisher = TestClient::connect(server.addr, "live").await;
    let pub_stream = publisher.create_stream().await;
    assert_eq!(publisher.publish(pub_stream, "cam").await, NS_PUBLISH_START);

    // Observe the stream from inside the registry to know when the keyframe landed
    let (_, mut watcher) = server
        .server
        .registry()
        .subscribe_channel(&key)
        .await
        .unwrap();

    publisher.send(CSID_DATA, pub_stream, 0, metadata(pub_stream)).await;
    publisher.send_video(pub_stream, 0, AVC_CONFIG).await;
    publisher.send_audio(pub_stream, 0, AAC_CONFIG).await;
    publisher.send_video(pub_stream, 40, KEYFRAME).await;

    tokio::time::timeout(WAIT, async {
        while let Some(event) = watcher.recv().await {
            if matches!(event, StreamEvent::Video(ref frame) if frame.is_keyframe) {
                break;
            }
        }
    })
    .await
    .unwrap();

    let mut player = TestClient::connect(server.addr, "live").await;
    let play_stream = player.create_stream().await;
    assert_eq!(player.play(play_stream, "cam").await, NS_PLAY_START);

    match player.recv_media().await {
        RtmpMessage::Data(data) => {
            assert_eq!(data.name, DATA_ON_METADATA);
            let props = data.metadata().unwrap();
            assert_eq!(props.get_number("width"), Some(1280.0));
        }
        other => panic!("expected metadata, got {:?}", other),
    }
    match player.recv_media().await {
        RtmpMessage::Video { data, .. } => assert_eq!(&data[..], AVC_CONFIG),
        other => panic!("expected video config, got {:?}", other),
    }
    match player.recv_media().await {
        RtmpMessage::Audio { data, .. } => assert_eq!(&data[..], AAC_CONFIG),
        other => panic!("expected audio config, got {:?}", other),
    }
    match player.recv_media().await {
        RtmpMessage::Video { timestamp, data } => {
            assert_eq!(timestamp, 40);
            assert_eq!(&data[..], KEYFRAME);
        }
        other => panic!("expected keyframe, got {:?}", other),
    }

    publisher.send_video(pub_stream, 80, INTERFRAME).await;
    match player.recv_media().await {
        RtmpMessage::Video { timestamp, data } => {
            assert_eq!(timestamp, 80);
            assert_eq!(&data[..], INTERFRAME);
        }
        other => panic!("expected live frame, got {:?}", other),
    }

    let stats = server.server.registry().stats().await;
    assert_eq!(stats.active_streams, 1);

    // Publisher leaves: the player hears about it
    drop(publisher);
    let mut saw_eof = false;
    loop {
        match player.recv().await {
            RtmpMessage::UserControl(UserControlEvent::StreamEof(id)) => {
                assert_eq!(id, play_stream);
                saw_eof = true;
            }
            RtmpMessage::Command(cmd) if cmd.name == CMD_ON_STATUS => {
                assert_eq!(cmd.status_code(), Some(NS_PLAY_STOP));
                break;
            }
            _ => {}
        }
    }
    assert!(saw_eof);

    server.stop().await;
}

#[tokio::test]
async fn second_publisher_is_rejected_and_stays_connected() {
    let server = TestServer::start().await;
    let mut events = server.server.registry().events();

    let mut first = TestClient::connect(server.addr, "live").await;
    let stream = first.create_stream().await;
    assert_eq!(first.publish(stream, "cam").await, NS_PUBLISH_START);

    let mut second = TestClient::connect(server.addr, "live").await;
    let stream2 = second.create_stream().await;
    assert_eq!(second.publish(stream2, "cam").await, NS_PUBLISH_BAD_NAME);

    // Still usable after the rejection
    let stream3 = second.create_stream().await;
    assert!(stream3 > stream2);

    // Once the first publisher is gone the name is free again
    drop(first);
    tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(RegistryEvent::PublishStopped { .. }) = events.recv().await {
                break;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(second.publish(stream3, "cam").await, NS_PUBLISH_START);

    server.stop().await;
}

#[tokio::test]
async fn play_unknown_stream_is_not_found() {
    let server = TestServer::start().await;

    let mut player = TestClient::connect(server.addr, "live").await;
    let stream = player.create_stream().await;
    assert_eq!(player.play(stream, "nobody").await, NS_PLAY_STREAM_NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn create_stream_before_connect_gets_error() {
    let server = TestServer::start().await;
    let mut client = TestClient::handshake(server.addr).await;

    let cmd = client.command(CMD_CREATE_STREAM);
    let tid = cmd.transaction_id;
    client.send_command(0, cmd).await;

    let reply = client.recv_command().await;
    assert_eq!(reply.name, CMD_ERROR);
    assert_eq!(reply.transaction_id, tid);
    assert_eq!(reply.status_code(), Some(NC_CALL_FAILED));

    // Still usable once connected properly
    drop(client);
    let mut client = TestClient::connect(server.addr, "live").await;
    assert_eq!(client.create_stream().await, 1);

    server.stop().await;
}

#[tokio::test]
async fn create_stream_is_capped_per_connection() {
    let server = TestServer::start().await;
    let mut client = TestClient::connect(server.addr, "live").await;

    for _ in 0..MAX_MESSAGE_STREAMS {
        client.create_stream().await;
    }

    let cmd = client.command(CMD_CREATE_STREAM);
    let tid = cmd.transaction_id;
    client.send_command(0, cmd).await;

    let reply = client.recv_command().await;
    assert_eq!(reply.name, CMD_ERROR);
    assert_eq!(reply.transaction_id, tid);
    assert_eq!(reply.status_code(), Some(NC_CALL_FAILED));

    server.stop().await;
}

#[tokio::test]
async fn ping_is_answered() {
    let server = TestServer::start().await;

    let mut client = TestClient::connect(server.addr, "live").await;
    client
        .send(
            CSID_PROTOCOL_CONTROL,
            0,
            0,
            RtmpMessage::UserControl(UserControlEvent::PingRequest(1234)),
        )
        .await;

    loop {
        if let RtmpMessage::UserControl(UserControlEvent::PingResponse(ts)) = client.recv().await {
            assert_eq!(ts, 1234);
            break;
        }
    }

    server.stop().await;
}

#[tokio::test]
async fn server_shutdown_ends_publish_sessions() {
    let server = TestServer::start().await;
    let mut events = server.server.registry().events();

    let mut publisher = TestClient::connect(server.addr, "live").await;
    let stream = publisher.create_stream().await;
    assert_eq!(publisher.publish(stream, "cam").await, NS_PUBLISH_START);

    assert!(matches!(
        events.recv().await.unwrap(),
        RegistryEvent::PublishStarted { .. }
    ));

    let registry = Arc::clone(server.server.registry());
    server.stop().await;

    assert!(matches!(
        events.recv().await.unwrap(),
        RegistryEvent::PublishStopped { .. }
    ));
    assert_eq!(registry.stats().await.total_streams, 0);
}
