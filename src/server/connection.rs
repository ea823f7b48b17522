//! Per-connection RTMP handler
//!
//! Manages the lifecycle of a single RTMP connection:
//! 1. Handshake
//! 2. Connect command
//! 3. Stream commands (publish/play)
//! 4. Media routing through the registry
//! 5. Teardown, which releases the registry role exactly once

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use crate::amf::AmfValue;
use crate::error::{Error, HandshakeError, Result};
use crate::media;
use crate::protocol::chunk::{ChunkDecoder, ChunkEncoder, RtmpChunk};
use crate::protocol::constants::*;
use crate::protocol::handshake::{HandshakeEngine, HandshakeState};
use crate::protocol::message::{Command, ConnectParams, DataMessage, RtmpMessage, UserControlEvent};
use crate::registry::{
    AudioFrame, StreamEvent, StreamKey, StreamMetadata, StreamRegistry, Subscriber, VideoFrame,
};
use crate::server::config::ServerConfig;
use crate::session::{SessionRole, SessionState, MAX_MESSAGE_STREAMS};

/// What woke the message loop
enum Wakeup {
    Shutdown,
    Event(Option<StreamEvent>),
    Read(std::result::Result<std::io::Result<usize>, tokio::time::error::Elapsed>),
}

/// Per-connection handler
pub struct Connection<S> {
    /// Session state
    state: SessionState,

    reader: ReadHalf<S>,
    writer: BufWriter<WriteHalf<S>>,

    /// Inbound bytes not yet consumed by the handshake or the demuxer
    read_buf: BytesMut,

    /// Scratch buffer for outgoing chunks
    write_buf: BytesMut,

    chunk_decoder: ChunkDecoder,
    chunk_encoder: ChunkEncoder,

    config: ServerConfig,

    /// Stream registry for pub/sub routing
    registry: Arc<StreamRegistry>,

    /// Server-wide stop signal
    shutdown: watch::Receiver<bool>,

    /// Queue fed by the registry while playing
    frame_rx: Option<mpsc::Receiver<StreamEvent>>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a new connection handler
    pub fn new(
        session_id: u64,
        socket: S,
        peer_addr: SocketAddr,
        config: ServerConfig,
        registry: Arc<StreamRegistry>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(socket);

        Self {
            state: SessionState::new(session_id, peer_addr),
            reader: read_half,
            writer: BufWriter::with_capacity(config.write_buffer_size, write_half),
            read_buf: BytesMut::with_capacity(config.read_buffer_size),
            write_buf: BytesMut::with_capacity(config.write_buffer_size),
            chunk_decoder: ChunkDecoder::new().with_max_message_size(config.max_message_size),
            chunk_encoder: ChunkEncoder::new(),
            config,
            registry,
            shutdown,
            frame_rx: None,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.state.id
    }

    /// Run the connection until the peer leaves, an I/O error occurs or
    /// the server shuts down
    pub async fn run(&mut self) -> Result<()> {
        let result = self.run_inner().await;
        self.teardown(result.is_err()).await;

        tracing::debug!(
            session_id = self.state.id,
            bytes_in = self.state.bytes_received,
            bytes_out = self.state.bytes_sent,
            framing_errors = self.chunk_decoder.framing_errors(),
            duration_ms = self.state.duration().as_millis() as u64,
            "Session finished"
        );
        result
    }

    async fn run_inner(&mut self) -> Result<()> {
        self.do_handshake().await?;

        // Set our chunk size
        self.send_set_chunk_size(self.config.chunk_size).await?;
        self.writer.flush().await?;

        self.message_loop().await
    }

    /// Serve messages and subscriber events after the handshake
    ///
    /// Socket reads are polled before queued events, so a player with a
    /// full queue still gets its pings and control messages handled.
    async fn message_loop(&mut self) -> Result<()> {
        let idle_timeout = self.config.idle_timeout;
        loop {
            // Bytes that arrived with the handshake or with the last read
            while let Some(chunk) = self.chunk_decoder.decode(&mut self.read_buf) {
                self.handle_chunk(chunk).await?;
            }
            self.writer.flush().await?;

            if *self.shutdown.borrow() {
                tracing::debug!(session_id = self.state.id, "Closing for server shutdown");
                return Ok(());
            }

            let wakeup = tokio::select! {
                biased;

                _ = self.shutdown.changed() => Wakeup::Shutdown,
                read = timeout(idle_timeout, self.reader.read_buf(&mut self.read_buf)) => Wakeup::Read(read),
                event = next_event(&mut self.frame_rx) => Wakeup::Event(event),
            };

            match wakeup {
                Wakeup::Shutdown => {
                    tracing::debug!(session_id = self.state.id, "Closing for server shutdown");
                    return Ok(());
                }
                Wakeup::Event(Some(event)) => self.send_event(event).await?,
                Wakeup::Event(None) => {
                    // Registry dropped us: queue overflow or registry shutdown
                    tracing::info!(session_id = self.state.id, "Subscription closed by registry");
                    return Ok(());
                }
                Wakeup::Read(Err(_)) => {
                    tracing::debug!(session_id = self.state.id, "Idle timeout");
                    return Err(Error::Timeout);
                }
                Wakeup::Read(Ok(Ok(0))) => {
                    tracing::debug!(session_id = self.state.id, "Peer closed connection");
                    return Ok(());
                }
                Wakeup::Read(Ok(Ok(n))) => {
                    if self.state.add_bytes_received(n as u64) {
                        self.send_acknowledgement().await?;
                    }
                }
                Wakeup::Read(Ok(Err(e))) => return Err(e.into()),
            }
        }
    }

    /// Release the registry role held by this connection, if any
    ///
    /// The role is taken out of the session state, so this and
    /// [`release_stream`](Self::release_stream) can only act on it once.
    async fn teardown(&mut self, failed: bool) {
        self.state.close();
        self.frame_rx = None;

        match self.state.take_role() {
            Some(SessionRole::Publisher { key, .. }) => {
                let stopped = if failed {
                    self.registry.abort_publishing(&key, self.state.id).await
                } else {
                    self.registry.stop_publishing(&key, self.state.id).await
                };
                tracing::debug!(
                    session_id = self.state.id,
                    stream = %key,
                    stopped,
                    "Released publisher on disconnect"
                );
            }
            Some(SessionRole::Subscriber {
                key, subscriber_id, ..
            }) => {
                self.registry.unsubscribe(&key, subscriber_id).await;
                tracing::debug!(
                    session_id = self.state.id,
                    stream = %key,
                    "Unsubscribed on disconnect"
                );
            }
            None => {}
        }
    }

    /// Perform RTMP handshake
    async fn do_handshake(&mut self) -> Result<()> {
        let mut handshake = HandshakeEngine::new();

        let result = timeout(self.config.handshake_timeout, async {
            while !handshake.is_established() {
                if let Some(response) = handshake.process(&mut self.read_buf)? {
                    self.writer.write_all(&response).await?;
                    self.writer.flush().await?;
                    self.state.bytes_sent += response.len() as u64;
                    continue;
                }

                let n = self.reader.read_buf(&mut self.read_buf).await?;
                if n == 0 {
                    let stage = match handshake.state() {
                        HandshakeState::AwaitingC0C1 => "C0C1",
                        _ => "C2",
                    };
                    return Err(HandshakeError::Incomplete {
                        stage,
                        received: self.read_buf.len(),
                    }
                    .into());
                }
                self.state.bytes_received += n as u64;
            }
            Ok::<_, Error>(())
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(session_id = self.state.id, error = %e, "Handshake failed");
                return Err(e);
            }
            Err(_) => {
                tracing::debug!(session_id = self.state.id, "Handshake timed out");
                return Err(HandshakeError::Timeout.into());
            }
        }

        self.state.complete_handshake();
        tracing::debug!(
            session_id = self.state.id,
            peer = %self.state.peer_addr,
            "Handshake complete"
        );
        Ok(())
    }

    /// Handle a reassembled message
    async fn handle_chunk(&mut self, chunk: RtmpChunk) -> Result<()> {
        let message = match RtmpMessage::from_chunk(&chunk) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    session_id = self.state.id,
                    message_type = chunk.message_type,
                    error = %e,
                    "Dropping malformed message"
                );
                return Ok(());
            }
        };

        match message {
            RtmpMessage::SetChunkSize(size) => {
                tracing::debug!(size = size, "Peer set chunk size");
                self.chunk_decoder.set_chunk_size(size);
                self.state.in_chunk_size = self.chunk_decoder.chunk_size();
            }

            RtmpMessage::Abort { csid } => {
                self.chunk_decoder.abort(csid);
            }

            RtmpMessage::Acknowledgement { sequence } => {
                tracing::trace!(sequence = sequence, "Peer acknowledged");
            }

            RtmpMessage::WindowAckSize(size) => {
                self.state.window_ack_size = size;
            }

            RtmpMessage::UserControl(UserControlEvent::PingRequest(timestamp)) => {
                self.send_user_control(UserControlEvent::PingResponse(timestamp))
                    .await?;
            }

            RtmpMessage::Command(cmd) => {
                self.handle_command(cmd).await?;
            }

            RtmpMessage::Data(data) => {
                self.handle_data(data).await;
            }

            RtmpMessage::Audio { timestamp, data } => {
                if !data.is_empty() {
                    let frame = AudioFrame::new(timestamp, data);
                    self.handle_audio(frame).await;
                }
            }

            RtmpMessage::Video { timestamp, data } => {
                if !data.is_empty() {
                    self.handle_video(timestamp, data).await;
                }
            }

            other => {
                tracing::trace!(message = ?other, "Unhandled message");
            }
        }

        Ok(())
    }

    /// Handle command message
    async fn handle_command(&mut self, cmd: Command) -> Result<()> {
        match cmd.name.as_str() {
            CMD_CONNECT => self.handle_connect(cmd).await?,
            CMD_CREATE_STREAM => self.handle_create_stream(cmd).await?,
            CMD_PUBLISH => self.handle_publish(cmd).await?,
            CMD_PLAY => self.handle_play(cmd).await?,
            CMD_FC_UNPUBLISH => self.handle_fc_unpublish(cmd).await?,
            CMD_DELETE_STREAM => {
                let stream_id = cmd
                    .arguments
                    .first()
                    .and_then(AmfValue::as_number)
                    .unwrap_or(0.0) as u32;
                self.release_stream(stream_id).await;
                self.state.remove_stream(stream_id);
            }
            CMD_CLOSE_STREAM => {
                self.release_stream(cmd.stream_id).await;
            }
            CMD_RELEASE_STREAM | CMD_FC_PUBLISH => {
                // Announcements ahead of publish; nothing to reserve
                tracing::trace!(command = %cmd.name, stream = ?cmd.first_string_arg(), "Ignored");
            }
            _ => {
                tracing::trace!(command = %cmd.name, "Unknown command");
            }
        }
        Ok(())
    }

    /// Handle connect command
    async fn handle_connect(&mut self, cmd: Command) -> Result<()> {
        let params = ConnectParams::from_amf(&cmd.command_object);
        tracing::info!(
            session_id = self.state.id,
            app = %params.app,
            flash_ver = params.flash_ver.as_deref().unwrap_or(""),
            "Connected"
        );
        self.state.on_connect(params);

        self.send_message(
            CSID_PROTOCOL_CONTROL,
            0,
            0,
            &RtmpMessage::WindowAckSize(self.config.window_ack_size),
        )
        .await?;
        self.send_message(
            CSID_PROTOCOL_CONTROL,
            0,
            0,
            &RtmpMessage::SetPeerBandwidth {
                size: self.config.peer_bandwidth,
                limit_type: BANDWIDTH_LIMIT_DYNAMIC,
            },
        )
        .await?;
        self.send_user_control(UserControlEvent::StreamBegin(0)).await?;

        let properties = AmfValue::object([
            ("fmsVer", AmfValue::from("FMS/3,5,7,7009")),
            ("capabilities", AmfValue::Number(31.0)),
            ("mode", AmfValue::Number(1.0)),
        ]);
        let info = AmfValue::object([
            ("level", AmfValue::from("status")),
            ("code", AmfValue::from(NC_CONNECT_SUCCESS)),
            ("description", AmfValue::from("Connection succeeded")),
            ("objectEncoding", AmfValue::Number(0.0)),
        ]);
        self.send_command(0, Command::result(cmd.transaction_id, properties, info))
            .await
    }

    /// Handle createStream command
    ///
    /// Refused with `_error` before `connect` or once the session holds
    /// [`MAX_MESSAGE_STREAMS`] streams.
    async fn handle_create_stream(&mut self, cmd: Command) -> Result<()> {
        let refusal = if !self.state.is_active() {
            Some("createStream before connect")
        } else if self.state.streams.len() >= MAX_MESSAGE_STREAMS {
            Some("Too many streams on this connection")
        } else {
            None
        };
        if let Some(description) = refusal {
            tracing::debug!(session_id = self.state.id, reason = description, "createStream refused");
            let info = AmfValue::object([
                ("level", AmfValue::from("error")),
                ("code", AmfValue::from(NC_CALL_FAILED)),
                ("description", AmfValue::from(description)),
            ]);
            let error = Command::error(cmd.transaction_id, AmfValue::Null, info);
            return self.send_command(0, error).await;
        }

        let stream_id = self.state.allocate_stream_id();
        let result = Command::result(
            cmd.transaction_id,
            AmfValue::Null,
            AmfValue::Number(stream_id as f64),
        );
        self.send_command(0, result).await?;

        tracing::debug!(session_id = self.state.id, stream_id = stream_id, "Stream created");
        Ok(())
    }

    /// Handle publish command
    ///
    /// A rejected publish is answered with `NetStream.Publish.BadName` and
    /// leaves the connection open.
    async fn handle_publish(&mut self, cmd: Command) -> Result<()> {
        let stream_id = cmd.stream_id;
        let name = cmd.first_string_arg().unwrap_or("").to_string();
        let publish_type = cmd
            .arguments
            .get(1)
            .and_then(AmfValue::as_str)
            .unwrap_or("live")
            .to_string();

        if name.is_empty() || self.state.role().is_some() {
            let reason = if name.is_empty() {
                "Missing stream name"
            } else {
                "Connection is already bound to a stream"
            };
            let status = Command::on_status(stream_id, "error", NS_PUBLISH_BAD_NAME, reason);
            return self.send_command(stream_id, status).await;
        }

        let key = StreamKey::from_parts(self.state.app(), &name);
        if let Err(e) = self
            .registry
            .start_publishing(&key, self.state.id, StreamMetadata::default())
            .await
        {
            tracing::warn!(
                session_id = self.state.id,
                stream = %key,
                error = %e,
                "Publish rejected"
            );
            let status =
                Command::on_status(stream_id, "error", NS_PUBLISH_BAD_NAME, &e.to_string());
            return self.send_command(stream_id, status).await;
        }

        self.state.set_role(SessionRole::Publisher {
            key: key.clone(),
            stream_id,
        });
        self.state
            .stream_mut(stream_id)
            .start_publish(name.clone(), publish_type);

        self.send_user_control(UserControlEvent::StreamBegin(stream_id))
            .await?;
        let status = Command::on_status(
            stream_id,
            "status",
            NS_PUBLISH_START,
            &format!("{} is now published", name),
        );
        self.send_command(stream_id, status).await?;

        tracing::info!(session_id = self.state.id, stream = %key, "Publishing started");
        Ok(())
    }

    /// Handle play command
    async fn handle_play(&mut self, cmd: Command) -> Result<()> {
        let stream_id = cmd.stream_id;
        let name = cmd.first_string_arg().unwrap_or("").to_string();
        let reset = cmd.arguments.get(3).and_then(AmfValue::as_bool).unwrap_or(true);

        let key = StreamKey::from_parts(self.state.app(), &name);
        if name.is_empty() || self.state.role().is_some() {
            let status = Command::on_status(
                stream_id,
                "error",
                NS_PLAY_STREAM_NOT_FOUND,
                "Connection is already bound or stream name is missing",
            );
            return self.send_command(stream_id, status).await;
        }

        let subscriber_id = self.registry.allocate_subscriber_id();
        let (subscriber, rx) =
            Subscriber::channel(subscriber_id, self.registry.config().subscriber_queue_capacity);

        // Catch-up events queue in `rx` and go out after the status replies
        if !self.registry.subscribe(&key, subscriber).await {
            tracing::debug!(session_id = self.state.id, stream = %key, "Stream not found for play");
            let status = Command::on_status(
                stream_id,
                "error",
                NS_PLAY_STREAM_NOT_FOUND,
                &format!("Stream not found: {}", name),
            );
            return self.send_command(stream_id, status).await;
        }

        self.state.set_role(SessionRole::Subscriber {
            key: key.clone(),
            stream_id,
            subscriber_id,
        });
        self.frame_rx = Some(rx);
        self.state.stream_mut(stream_id).start_play(name.clone());

        self.send_user_control(UserControlEvent::StreamBegin(stream_id))
            .await?;
        if reset {
            let status =
                Command::on_status(stream_id, "status", NS_PLAY_RESET, "Playing and resetting");
            self.send_command(stream_id, status).await?;
        }
        let status = Command::on_status(
            stream_id,
            "status",
            NS_PLAY_START,
            &format!("Started playing {}", name),
        );
        self.send_command(stream_id, status).await?;

        tracing::info!(session_id = self.state.id, stream = %key, "Playing started");
        Ok(())
    }

    /// Handle FCUnpublish command
    async fn handle_fc_unpublish(&mut self, _cmd: Command) -> Result<()> {
        let stream_id = match self.state.role() {
            Some(SessionRole::Publisher { stream_id, .. }) => *stream_id,
            _ => return Ok(()),
        };

        if self.release_stream(stream_id).await {
            let status = Command::on_status(
                stream_id,
                "status",
                NS_UNPUBLISH_SUCCESS,
                "Stream is now unpublished",
            );
            self.send_command(stream_id, status).await?;
        }
        Ok(())
    }

    /// End publishing or playback on `stream_id`; true if a role was released
    async fn release_stream(&mut self, stream_id: u32) -> bool {
        if self.state.role().map(SessionRole::stream_id) != Some(stream_id) {
            return false;
        }

        match self.state.take_role() {
            Some(SessionRole::Publisher { key, .. }) => {
                self.registry.stop_publishing(&key, self.state.id).await;
                tracing::info!(session_id = self.state.id, stream = %key, "Publishing stopped");
            }
            Some(SessionRole::Subscriber {
                key, subscriber_id, ..
            }) => {
                self.frame_rx = None;
                self.registry.unsubscribe(&key, subscriber_id).await;
                tracing::info!(session_id = self.state.id, stream = %key, "Playing stopped");
            }
            None => return false,
        }

        if let Some(stream) = self.state.streams.get_mut(&stream_id) {
            stream.stop();
        }
        true
    }

    /// Handle data message
    async fn handle_data(&mut self, data: DataMessage) {
        let Some(properties) = data.metadata() else {
            tracing::trace!(name = %data.name, "Unknown data message");
            return;
        };
        let Some((key, stream_id)) = self.publishing() else {
            return;
        };

        let metadata = StreamMetadata::from_amf(properties);
        tracing::debug!(
            session_id = self.state.id,
            stream = %key,
            width = metadata.width,
            height = metadata.height,
            fps = metadata.fps,
            "Metadata received"
        );
        if let Some(stream) = self.state.get_stream_mut(stream_id) {
            stream.on_metadata();
        }

        if let Err(e) = self
            .registry
            .update_metadata(&key, self.state.id, metadata)
            .await
        {
            tracing::debug!(session_id = self.state.id, error = %e, "Metadata not applied");
        }
    }

    /// Handle audio message
    async fn handle_audio(&mut self, frame: AudioFrame) {
        let Some((key, stream_id)) = self.publishing() else {
            tracing::trace!(session_id = self.state.id, "Audio from a non-publisher ignored");
            return;
        };

        if let Some(stream) = self.state.get_stream_mut(stream_id) {
            stream.on_audio(frame.timestamp, frame.is_config(), frame.data.len());
        }
        self.registry.publish_audio_frame(&key, frame).await;
    }

    /// Handle video message
    async fn handle_video(&mut self, timestamp: u32, data: bytes::Bytes) {
        let Some((key, stream_id)) = self.publishing() else {
            tracing::trace!(session_id = self.state.id, "Video from a non-publisher ignored");
            return;
        };
        let nalu_length_size = self
            .state
            .get_stream(stream_id)
            .map_or(media::DEFAULT_NALU_LENGTH_SIZE, |stream| stream.nalu_length_size);
        let frame = VideoFrame::with_nalu_length_size(timestamp, data, nalu_length_size);

        if let Some(stream) = self.state.get_stream_mut(stream_id) {
            // Later NAL units are framed by the length size the record announces
            if let Some(record) = &frame.config_record {
                if let Ok(config) = media::parse_video_config(record) {
                    stream.nalu_length_size = config.nalu_length_size;
                }
            }
            stream.on_video(timestamp, frame.is_keyframe, frame.is_config(), frame.data.len());
        }

        self.registry.publish_video_frame(&key, frame).await;
    }

    /// Stream key and message stream of the publish this session holds
    ///
    /// Media is accounted to that stream whatever message stream id the
    /// peer puts in the chunk header.
    fn publishing(&self) -> Option<(StreamKey, u32)> {
        match self.state.role() {
            Some(SessionRole::Publisher { key, stream_id }) => Some((key.clone(), *stream_id)),
            _ => None,
        }
    }

    // === Message sending helpers ===

    async fn send_message(
        &mut self,
        csid: u32,
        stream_id: u32,
        timestamp: u32,
        message: &RtmpMessage,
    ) -> Result<()> {
        let (message_type, payload) = message.encode();
        let chunk = RtmpChunk::new(csid, timestamp, message_type, stream_id, payload);

        self.write_buf.clear();
        self.chunk_encoder.encode(&chunk, &mut self.write_buf);
        self.writer.write_all(&self.write_buf).await?;
        self.state.bytes_sent += self.write_buf.len() as u64;
        Ok(())
    }

    async fn send_command(&mut self, stream_id: u32, mut cmd: Command) -> Result<()> {
        cmd.stream_id = stream_id;
        self.send_message(CSID_COMMAND, stream_id, 0, &RtmpMessage::Command(cmd))
            .await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn send_user_control(&mut self, event: UserControlEvent) -> Result<()> {
        self.send_message(CSID_PROTOCOL_CONTROL, 0, 0, &RtmpMessage::UserControl(event))
            .await
    }

    async fn send_set_chunk_size(&mut self, size: u32) -> Result<()> {
        self.send_message(CSID_PROTOCOL_CONTROL, 0, 0, &RtmpMessage::SetChunkSize(size))
            .await?;
        // Only chunks after the announcement may use the new size
        self.chunk_encoder.set_chunk_size(size);
        self.state.out_chunk_size = self.chunk_encoder.chunk_size();
        Ok(())
    }

    async fn send_acknowledgement(&mut self) -> Result<()> {
        let sequence = self.state.mark_ack_sent();
        self.send_message(
            CSID_PROTOCOL_CONTROL,
            0,
            0,
            &RtmpMessage::Acknowledgement { sequence },
        )
        .await
    }

    /// Re-chunk one registry event for the player
    async fn send_event(&mut self, event: StreamEvent) -> Result<()> {
        let stream_id = match self.state.role() {
            Some(SessionRole::Subscriber { stream_id, .. }) => *stream_id,
            _ => return Ok(()),
        };

        match event {
            StreamEvent::Metadata(metadata) => {
                let data = DataMessage::on_metadata(stream_id, metadata.to_amf());
                self.send_message(CSID_DATA, stream_id, 0, &RtmpMessage::Data(data))
                    .await
            }
            StreamEvent::Video(frame) => {
                let message = RtmpMessage::Video {
                    timestamp: frame.timestamp,
                    data: frame.data,
                };
                self.send_message(CSID_VIDEO, stream_id, frame.timestamp, &message)
                    .await
            }
            StreamEvent::Audio(frame) => {
                let message = RtmpMessage::Audio {
                    timestamp: frame.timestamp,
                    data: frame.data,
                };
                self.send_message(CSID_AUDIO, stream_id, frame.timestamp, &message)
                    .await
            }
            StreamEvent::StreamEnd => {
                self.send_user_control(UserControlEvent::StreamEof(stream_id))
                    .await?;
                let status = Command::on_status(stream_id, "status", NS_PLAY_STOP, "Stream ended");
                self.send_command(stream_id, status).await?;
                tracing::info!(session_id = self.state.id, "Stream ended, notified player");
                Ok(())
            }
        }
    }
}

/// Next registry event, or never when not subscribed
async fn next_event(rx: &mut Option<mpsc::Receiver<StreamEvent>>) -> Option<StreamEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
