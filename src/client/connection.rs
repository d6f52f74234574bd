//! Sans-io client connection
//!
//! [`Connection`] holds all protocol state for one RTMP connection and
//! never touches a socket. The embedder feeds received bytes into
//! [`Connection::handle_input`], writes out what [`Connection::poll_transmit`]
//! returns, calls [`Connection::on_timer`] at [`Connection::next_timer_deadline`]
//! and drains [`Connection::poll_event`]. Every method runs to completion;
//! incomplete input is buffered and picked up on the next call.
//!
//! Outbound chunks are taken round-robin from the registered channels: the
//! search starts after the channel that last produced a chunk, so no
//! channel can starve another.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::amf::{AmfObject, AmfValue};
use crate::client::config::{ClientConfig, ParsedUrl};
use crate::client::control::{ControlAction, ControlChannel};
use crate::client::stream::{NetStream, StreamHandle};
use crate::clock::Clock;
use crate::error::{Error, ProtocolError, Result};
use crate::media::MediaKind;
use crate::playout::{DecodedFrame, PlayoutEvent, TimerQueue};
use crate::protocol::channel::{Channel, ChunkRead, Message};
use crate::protocol::constants::*;
use crate::protocol::handshake::Handshake;
use crate::protocol::header::peek_basic_header;
use crate::protocol::message::{ControlMessage, DataMessage, StatusInfo, UserControlEvent};
use crate::rpc::{CallRegistry, Inbound, PendingCall, Reply, ReplyTarget, Responder, RpcEngine};

/// Events surfaced to the embedder
#[derive(Debug)]
pub enum ConnectionEvent {
    /// connect was accepted
    Connected,
    /// onStatus notification (or a status carried by a reply)
    Status {
        stream: Option<StreamHandle>,
        info: StatusInfo,
    },
    /// Call or data message with no registered handler
    Call {
        stream: Option<StreamHandle>,
        name: String,
        args: Vec<AmfValue>,
    },
    /// createStream succeeded; the stream can play or publish
    StreamCreated {
        stream: StreamHandle,
        stream_id: u32,
    },
    /// Stream-level user control event (StreamBegin, StreamEOF, ...)
    StreamEvent {
        stream: StreamHandle,
        event: UserControlEvent,
    },
    /// Decoded media ready for presentation
    Frame {
        stream: StreamHandle,
        frame: DecodedFrame,
    },
    PlaybackStarted {
        stream: StreamHandle,
        kind: MediaKind,
    },
    PlaybackStopped {
        stream: StreamHandle,
        kind: MediaKind,
    },
    /// Terminal; nothing follows. `None` for an orderly close.
    Closed { error: Option<Error> },
}

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// C0C1 sent, waiting for S0S1S2
    Handshaking,
    /// Handshake done, connect call pending
    Connecting,
    Connected,
    Closed,
}

/// One client connection
pub struct Connection {
    config: ClientConfig,
    url: ParsedUrl,
    clock: Arc<dyn Clock>,
    state: ConnectionState,
    /// Present until the handshake is validated or abandoned
    handshake: Option<Handshake>,
    /// Handshake bytes to send ahead of any chunk
    handshake_out: BytesMut,
    /// Output written out by `close`, handed over once after closing
    closing_out: BytesMut,
    recv_buf: BytesMut,
    /// Every channel with state, registered or not
    channels: HashMap<u32, Channel>,
    /// Registered channel IDs in round-robin order
    order: Vec<u32>,
    /// Index into `order` of the channel that produced the last chunk
    cursor: Option<usize>,
    in_chunk_size: u32,
    out_chunk_size: u32,
    control: ControlChannel,
    rpc: RpcEngine,
    handlers: CallRegistry,
    /// Streams keyed by their channel ID
    streams: HashMap<u32, NetStream>,
    timers: TimerQueue,
    events: VecDeque<ConnectionEvent>,
}

impl Connection {
    /// Start a connection: validate the URL, produce C0C1 and queue connect
    ///
    /// Fails synchronously, before any I/O, for unsupported schemes and
    /// malformed URLs.
    pub fn connect(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let url = config.validate()?;

        let mut handshake = Handshake::new();
        let mut handshake_out = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
        if let Some(c0c1) = handshake.generate_initial(&clock) {
            handshake_out.extend_from_slice(&c0c1);
        }
        tracing::debug!(host = %url.host, port = url.port, app = %url.app, "Handshake started");

        let mut conn = Self {
            timers: TimerQueue::new(Arc::clone(&clock)),
            config,
            url,
            clock,
            state: ConnectionState::Handshaking,
            handshake: Some(handshake),
            handshake_out,
            closing_out: BytesMut::new(),
            recv_buf: BytesMut::with_capacity(HANDSHAKE_REPLY_SIZE),
            channels: HashMap::new(),
            order: Vec::new(),
            cursor: None,
            in_chunk_size: DEFAULT_CHUNK_SIZE,
            out_chunk_size: DEFAULT_CHUNK_SIZE,
            control: ControlChannel::new(),
            rpc: RpcEngine::new(),
            handlers: CallRegistry::new(),
            streams: HashMap::new(),
            events: VecDeque::new(),
        };

        conn.register_channel(CHANNEL_CONTROL, 0);
        conn.register_channel(CHANNEL_COMMAND, 0);

        let command_object = conn.connect_object();
        let (_, payload) = conn.rpc.call(
            CHANNEL_COMMAND,
            CMD_CONNECT,
            Some(ReplyTarget::Connect),
            command_object,
            vec![],
        )?;
        conn.enqueue(CHANNEL_COMMAND, MSG_COMMAND_AMF0, payload);

        Ok(conn)
    }

    fn connect_object(&self) -> AmfValue {
        let optional = |v: &Option<String>| match v {
            Some(s) => AmfValue::String(s.clone()),
            None => AmfValue::Undefined,
        };
        AmfValue::Object(
            AmfObject::new()
                .with("app", self.url.app.as_str())
                .with("flashVer", self.config.flash_ver.as_str())
                .with("tcUrl", self.url.tc_url())
                .with("swfUrl", optional(&self.config.swf_url))
                .with("pageUrl", optional(&self.config.page_url))
                .with("fpad", false)
                .with("capabilities", 15.0)
                .with("audioCodecs", 3191.0)
                .with("videoCodecs", 252.0)
                .with("videoFunction", 1.0)
                .with("objectEncoding", 0.0),
        )
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    pub fn url(&self) -> &ParsedUrl {
        &self.url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn in_chunk_size(&self) -> u32 {
        self.in_chunk_size
    }

    pub fn out_chunk_size(&self) -> u32 {
        self.out_chunk_size
    }

    pub fn stream(&self, handle: StreamHandle) -> Option<&NetStream> {
        self.streams.get(&handle.0)
    }

    /// Registered channel IDs in round-robin order
    pub fn channel_order(&self) -> &[u32] {
        &self.order
    }

    pub fn pending_calls(&self) -> usize {
        self.rpc.pending_count()
    }

    // ------------------------------------------------------------------
    // Channel registry
    // ------------------------------------------------------------------

    /// Add a channel to the round-robin set, creating it if needed
    ///
    /// Messages queued on the channel before registration become sendable now.
    fn register_channel(&mut self, id: u32, stream_id: u32) {
        let channel = self
            .channels
            .entry(id)
            .or_insert_with(|| Channel::new(id, stream_id));
        channel.set_stream_id(stream_id);
        if !self.order.contains(&id) {
            self.order.push(id);
            tracing::trace!(channel = id, stream_id, "Channel registered");
        }
    }

    /// Remove a channel from the round-robin set and drop what it had queued
    ///
    /// The peer picks its own chunk stream IDs and may keep using this one,
    /// so the receive side is left alone.
    fn unregister_channel(&mut self, id: u32) {
        if let Some(idx) = self.order.iter().position(|&c| c == id) {
            self.order.remove(idx);
            self.cursor = match self.cursor {
                // Step back so the search resumes at whatever took its place
                Some(c) if c == idx => match idx {
                    0 if self.order.is_empty() => None,
                    0 => Some(self.order.len() - 1),
                    _ => Some(idx - 1),
                },
                Some(c) if c > idx => Some(c - 1),
                other => other,
            };
        }
        if let Some(channel) = self.channels.get_mut(&id) {
            channel.reset_send(0);
        }
        tracing::trace!(channel = id, "Channel unregistered");
    }

    /// Queue a message stamped with the connection clock
    fn enqueue(&mut self, channel: u32, message_type: u8, payload: Bytes) {
        let timestamp = self.clock.now_ms();
        self.enqueue_at(channel, message_type, timestamp, payload);
    }

    fn enqueue_at(&mut self, channel: u32, message_type: u8, timestamp: u32, payload: Bytes) {
        let stream_id = 0;
        self.channels
            .entry(channel)
            .or_insert_with(|| Channel::new(channel, stream_id))
            .enqueue(message_type, timestamp, payload);
    }

    fn send_control(&mut self, message: ControlMessage, timestamp: u32) {
        let (message_type, payload) = message.encode();
        self.enqueue_at(CHANNEL_CONTROL, message_type, timestamp, payload);
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    /// Next bytes to write to the transport
    ///
    /// Handshake bytes come first. Chunks flow only once the handshake is
    /// validated; a batch holds at most `transmit_batch` chunks.
    pub fn poll_transmit(&mut self) -> Option<Bytes> {
        if self.state == ConnectionState::Closed {
            return match self.closing_out.is_empty() {
                true => None,
                false => Some(self.closing_out.split().freeze()),
            };
        }
        let mut out = self.handshake_out.split();
        if self.handshake.is_none() {
            for _ in 0..self.config.transmit_batch {
                if !self.poll_chunk(&mut out) {
                    break;
                }
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out.freeze())
        }
    }

    /// Write one chunk from the next channel in round-robin order
    ///
    /// Returns false when no registered channel has anything to send.
    pub fn poll_chunk(&mut self, out: &mut BytesMut) -> bool {
        if self.handshake.is_some() || self.state == ConnectionState::Closed {
            return false;
        }
        let n = self.order.len();
        let start = self.cursor.map(|c| c + 1).unwrap_or(0);

        for step in 0..n {
            let idx = (start + step) % n;
            let id = self.order[idx];
            let channel = match self.channels.get_mut(&id) {
                Some(channel) => channel,
                None => continue,
            };
            if let Some(written) = channel.write_chunk(self.out_chunk_size, out) {
                self.cursor = Some(idx);
                if let Some(message) = written.completed {
                    self.on_message_sent(&message);
                }
                return true;
            }
        }
        false
    }

    /// Whether any registered channel has queued output
    pub fn has_pending_output(&self) -> bool {
        !self.closing_out.is_empty()
            || !self.handshake_out.is_empty()
            || (self.handshake.is_none()
                && self
                    .order
                    .iter()
                    .any(|id| self.channels.get(id).map(|c| c.has_pending()).unwrap_or(false)))
    }

    fn on_message_sent(&mut self, message: &Message) {
        let header = &message.header;
        if header.channel == CHANNEL_CONTROL && header.message_type == MSG_SET_CHUNK_SIZE {
            // Later chunks use the size we just announced
            if let Ok(ControlMessage::SetChunkSize(size)) =
                ControlMessage::parse(MSG_SET_CHUNK_SIZE, &message.payload)
            {
                tracing::debug!(size, "Outbound chunk size changed");
                self.out_chunk_size = size.clamp(1, MAX_CHUNK_SIZE);
            }
        }
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    /// Consume bytes read from the transport
    pub fn handle_input(&mut self, data: &[u8]) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.recv_buf.extend_from_slice(data);
        if let Some(ack) = self.control.on_bytes_received(data.len()) {
            let now = self.clock.now_ms();
            self.send_control(ack, now);
        }

        if let Err(e) = self.process_input() {
            self.fail(e);
        }
        self.drain_playout();
    }

    /// The transport reached end of stream
    pub fn handle_eof(&mut self) {
        self.fail(Error::ConnectionClosed);
    }

    /// The transport failed
    pub fn handle_transport_error(&mut self, error: Error) {
        self.fail(error);
    }

    fn process_input(&mut self) -> Result<()> {
        if let Some(handshake) = self.handshake.as_mut() {
            match handshake.process(&mut self.recv_buf) {
                Ok(None) => return Ok(()),
                Ok(Some(c2)) => {
                    tracing::info!(host = %self.url.host, "Handshake validated");
                    self.handshake_out.extend_from_slice(&c2);
                    self.handshake = None;
                    self.state = ConnectionState::Connecting;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Handshake failed");
                    return Err(e.into());
                }
            }
        }

        while self.state != ConnectionState::Closed {
            let basic = match peek_basic_header(&self.recv_buf) {
                Some(basic) => basic,
                None => break,
            };
            let chunk_size = self.in_chunk_size;
            let channel = self
                .channels
                .entry(basic.channel)
                .or_insert_with(|| Channel::new(basic.channel, 0));

            match channel.read_chunk(&mut self.recv_buf, chunk_size)? {
                None => break,
                Some(ChunkRead::Partial) => {}
                Some(ChunkRead::Dropped(e)) => {
                    tracing::warn!(channel = basic.channel, error = %e, "Protocol violation, chunk dropped");
                }
                Some(ChunkRead::Abandoned(header)) => {
                    tracing::debug!(channel = header.channel, stream_id = header.stream_id, "Dropped message for closed stream");
                }
                Some(ChunkRead::Complete(message)) => self.dispatch(message)?,
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, message: Message) -> Result<()> {
        let message_type = message.header.message_type;
        tracing::trace!(
            channel = message.header.channel,
            message_type,
            stream_id = message.header.stream_id,
            size = message.payload.len(),
            "Message received"
        );

        if ControlMessage::is_control_type(message_type) {
            self.on_control(message);
            return Ok(());
        }
        match message_type {
            MSG_COMMAND_AMF0 => self.on_command(message),
            MSG_DATA_AMF0 => {
                self.on_data(message);
                Ok(())
            }
            MSG_AUDIO | MSG_VIDEO => {
                self.on_media(message);
                Ok(())
            }
            other => {
                tracing::debug!(message_type = other, "Ignoring unsupported message type");
                Ok(())
            }
        }
    }

    fn on_control(&mut self, message: Message) {
        let control = match ControlMessage::parse(message.header.message_type, &message.payload) {
            Ok(control) => control,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed control message");
                return;
            }
        };

        let now = self.clock.now_ms();
        match self.control.handle(&message.header, control, now) {
            ControlAction::None => {}
            ControlAction::SetInboundChunkSize(size) => self.in_chunk_size = size,
            ControlAction::Abort { channel } => {
                if let Some(channel) = self.channels.get_mut(&channel) {
                    channel.abort_inbound();
                }
            }
            ControlAction::Reply { message, timestamp } => self.send_control(message, timestamp),
            ControlAction::StreamEvent(event) => {
                let stream = event.stream_id().and_then(|id| self.stream_by_id(id));
                match stream {
                    Some(stream) => {
                        tracing::debug!(channel = stream.0, event = event.name(), "Stream event");
                        self.emit(ConnectionEvent::StreamEvent { stream, event });
                    }
                    None => tracing::debug!(event = event.name(), "Event for unknown stream"),
                }
            }
        }
    }

    fn on_command(&mut self, message: Message) -> Result<()> {
        let stream = self.stream_by_id(message.header.stream_id);

        let inbound = match self.rpc.on_receive(&message.payload) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::warn!(channel = message.header.channel, error = %e, "Dropping undecodable command");
                return Ok(());
            }
        };

        match inbound {
            Inbound::Stale(_) => Ok(()),
            Inbound::Reply { id, call, reply } => self.on_reply(id, call, reply),
            Inbound::Call(cmd) => {
                let id = cmd.id();
                let mut args = cmd.arguments;
                if !cmd.command_object.is_null_or_undefined() {
                    args.insert(0, cmd.command_object);
                }
                self.on_call(stream, message.header.channel, id, cmd.name, args);
                Ok(())
            }
        }
    }

    fn on_reply(&mut self, id: u32, call: PendingCall, reply: Reply) -> Result<()> {
        tracing::debug!(id, name = %call.name, error = reply.is_error(), "Reply received");
        match call.target {
            ReplyTarget::External(responder) => {
                responder.on_reply(reply);
                Ok(())
            }
            ReplyTarget::Connect => self.on_connect_reply(reply),
            ReplyTarget::CreateStream { channel } => {
                self.on_create_stream_reply(channel, reply);
                Ok(())
            }
        }
    }

    fn on_connect_reply(&mut self, reply: Reply) -> Result<()> {
        let info = reply.status().unwrap_or_else(|| StatusInfo {
            level: "error".into(),
            code: NC_CONNECT_FAILED.into(),
            description: "No status in connect reply".into(),
        });

        if reply.is_error() || info.code != NC_CONNECT_SUCCESS {
            tracing::warn!(code = %info.code, description = %info.description, "Connect rejected");
            let code = info.code.clone();
            self.emit(ConnectionEvent::Status { stream: None, info });
            return Err(Error::Rejected(code));
        }

        tracing::info!(app = %self.url.app, "Connected");
        self.state = ConnectionState::Connected;
        if let Some(size) = self.config.chunk_size {
            self.set_chunk_size(size)?;
        }
        self.emit(ConnectionEvent::Connected);
        Ok(())
    }

    fn on_create_stream_reply(&mut self, channel: u32, reply: Reply) {
        let stream_id = match (&reply, reply.value().and_then(|v| v.as_number())) {
            (Reply::Result(_), Some(id)) if id >= 0.0 && id <= u32::MAX as f64 => id as u32,
            _ => {
                let info = reply.status().unwrap_or_else(|| StatusInfo {
                    level: "error".into(),
                    code: "NetStream.Create.Failed".into(),
                    description: "createStream failed".into(),
                });
                tracing::warn!(channel, code = %info.code, "createStream failed");
                self.remove_stream(channel);
                self.emit(ConnectionEvent::Status {
                    stream: Some(StreamHandle(channel)),
                    info,
                });
                return;
            }
        };

        let stream = match self.streams.get_mut(&channel) {
            Some(stream) => stream,
            None => return,
        };
        stream.set_created(stream_id);
        let handle = stream.handle();
        tracing::debug!(channel, stream_id, "Stream created");

        // Calls queued while creating go out from here on
        self.register_channel(channel, stream_id);
        let buffer = ControlChannel::buffer_length_message(stream_id, self.config.buffer_length);
        let now = self.clock.now_ms();
        self.send_control(buffer, now);
        self.emit(ConnectionEvent::StreamCreated {
            stream: handle,
            stream_id,
        });
    }

    fn on_call(
        &mut self,
        stream: Option<StreamHandle>,
        channel: u32,
        id: u32,
        name: String,
        args: Vec<AmfValue>,
    ) {
        let registry = match stream {
            Some(handle) => match self.streams.get_mut(&handle.0) {
                Some(s) => s.handlers(),
                None => &mut self.handlers,
            },
            None => &mut self.handlers,
        };

        if let Some(result) = registry.dispatch(&name, &args) {
            if id != 0 {
                let payload = RpcEngine::reply_payload(id, result);
                let reply_channel = stream.map(|s| s.0).unwrap_or(CHANNEL_COMMAND);
                self.enqueue(reply_channel, MSG_COMMAND_AMF0, payload);
            }
            return;
        }

        if name == CMD_ON_STATUS {
            if let Some(info) = StatusInfo::from_args(&args) {
                tracing::debug!(channel, code = %info.code, "Status");
                if let Some(handle) = stream {
                    self.on_stream_status(handle, &info);
                }
                self.emit(ConnectionEvent::Status { stream, info });
                return;
            }
        }

        if stream.is_none() && name == CMD_CLOSE {
            tracing::info!("Server closed the connection");
            self.finish(None);
            return;
        }

        tracing::debug!(channel, id, name = %name, "Unhandled call");
        self.emit(ConnectionEvent::Call { stream, name, args });
    }

    fn on_stream_status(&mut self, handle: StreamHandle, info: &StatusInfo) {
        if info.code == NS_PLAY_STOP {
            if let Some(stream) = self.streams.get_mut(&handle.0) {
                stream.set_paused(true);
            }
        }
    }

    fn on_data(&mut self, message: Message) {
        let data = match DataMessage::decode(&message.payload) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(channel = message.header.channel, error = %e, "Dropping undecodable data message");
                return;
            }
        };

        let (name, mut values) = (data.name, data.values);
        let name = if name == CMD_SET_DATA_FRAME && !values.is_empty() {
            match values.remove(0) {
                AmfValue::String(inner) => inner,
                other => {
                    values.insert(0, other);
                    name
                }
            }
        } else {
            name
        };

        let stream = self.stream_by_id(message.header.stream_id);
        self.on_call(stream, message.header.channel, 0, name, values);
    }

    fn on_media(&mut self, message: Message) {
        let kind = match MediaKind::from_message_type(message.header.message_type) {
            Some(kind) => kind,
            None => return,
        };
        let handle = match self.stream_by_id(message.header.stream_id) {
            Some(handle) => handle,
            None => {
                tracing::debug!(stream_id = message.header.stream_id, "Media for unknown stream");
                return;
            }
        };
        let now = self.clock.now();
        if let Some(stream) = self.streams.get_mut(&handle.0) {
            if let Err(e) = stream.push_media(
                kind,
                message.header.timestamp,
                message.payload,
                now,
                &mut self.timers,
            ) {
                tracing::debug!(channel = handle.0, %kind, error = %e, "Dropping media packet");
            }
        }
    }

    fn stream_by_id(&self, stream_id: u32) -> Option<StreamHandle> {
        if stream_id == 0 {
            return None;
        }
        self.streams
            .values()
            .find(|s| s.stream_id() == Some(stream_id))
            .map(|s| s.handle())
    }

    // ------------------------------------------------------------------
    // Timers and events
    // ------------------------------------------------------------------

    /// Earliest playout deadline, as an offset on the connection clock
    pub fn next_timer_deadline(&self) -> Option<Duration> {
        if self.state == ConnectionState::Closed {
            return None;
        }
        self.timers.next_deadline()
    }

    /// Fire every timer due at `now`
    pub fn on_timer(&mut self, now: Duration) {
        if self.state == ConnectionState::Closed {
            return;
        }
        for handle in self.timers.expired(now) {
            for stream in self.streams.values_mut() {
                if stream.on_timer(handle, now, &mut self.timers) {
                    break;
                }
            }
        }
        self.drain_playout();
    }

    pub fn poll_event(&mut self) -> Option<ConnectionEvent> {
        self.events.pop_front()
    }

    fn drain_playout(&mut self) {
        let mut pending = Vec::new();
        for stream in self.streams.values_mut() {
            let handle = stream.handle();
            while let Some((kind, event)) = stream.poll_playout() {
                pending.push(match event {
                    PlayoutEvent::Started => ConnectionEvent::PlaybackStarted { stream: handle, kind },
                    PlayoutEvent::Frame(frame) => ConnectionEvent::Frame { stream: handle, frame },
                    PlayoutEvent::Stopped => ConnectionEvent::PlaybackStopped { stream: handle, kind },
                });
            }
        }
        for event in pending {
            self.emit(event);
        }
    }

    fn emit(&mut self, event: ConnectionEvent) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.events.push_back(event);
    }

    // ------------------------------------------------------------------
    // Upward interface
    // ------------------------------------------------------------------

    fn ensure_open(&self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    /// Register a handler for inbound calls on stream 0
    pub fn register_handler<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: FnMut(&[AmfValue]) -> AmfValue + Send + 'static,
    {
        self.handlers.register(name, handler);
    }

    /// Register a handler for inbound calls on one stream
    pub fn register_stream_handler<F>(
        &mut self,
        stream: StreamHandle,
        name: impl Into<String>,
        handler: F,
    ) -> Result<()>
    where
        F: FnMut(&[AmfValue]) -> AmfValue + Send + 'static,
    {
        let stream = self.stream_mut(stream)?;
        stream.handlers().register(name, handler);
        Ok(())
    }

    /// Call a remote method on the connection
    ///
    /// With a responder the call gets a fresh invoke ID, which is returned;
    /// without one it is sent with ID 0.
    pub fn call(
        &mut self,
        name: &str,
        args: Vec<AmfValue>,
        responder: Option<Box<dyn Responder>>,
    ) -> Result<u32> {
        self.ensure_open()?;
        self.call_on(CHANNEL_COMMAND, name, args, responder.map(ReplyTarget::External))
    }

    /// Call a remote method on a stream
    pub fn stream_call(
        &mut self,
        stream: StreamHandle,
        name: &str,
        args: Vec<AmfValue>,
        responder: Option<Box<dyn Responder>>,
    ) -> Result<u32> {
        self.ensure_open()?;
        self.stream_mut(stream)?;
        self.call_on(stream.0, name, args, responder.map(ReplyTarget::External))
    }

    fn call_on(&mut self, channel: u32, name: &str, args: Vec<AmfValue>, target: Option<ReplyTarget>) -> Result<u32> {
        let (id, payload) = self.rpc.call(channel, name, target, AmfValue::Null, args)?;
        self.enqueue(channel, MSG_COMMAND_AMF0, payload);
        Ok(id)
    }

    /// Announce a new outbound chunk size
    ///
    /// Takes effect for chunks written after the announcement itself.
    pub fn set_chunk_size(&mut self, size: u32) -> Result<()> {
        self.ensure_open()?;
        if size == 0 || size > MAX_CHUNK_SIZE {
            return Err(Error::Config(format!("chunk size {} out of range", size)));
        }
        let now = self.clock.now_ms();
        self.send_control(ControlChannel::chunk_size_message(size), now);
        Ok(())
    }

    /// Tell the server how much media the client buffers for a stream
    pub fn set_buffer_length(&mut self, stream: StreamHandle, buffer_ms: u32) -> Result<()> {
        self.ensure_open()?;
        let stream_id = self
            .stream_mut(stream)?
            .stream_id()
            .ok_or(ProtocolError::StreamNotFound(stream.0))?;
        let now = self.clock.now_ms();
        self.send_control(ControlChannel::buffer_length_message(stream_id, buffer_ms), now);
        Ok(())
    }

    /// Create a stream; usable once `StreamCreated` arrives, calls made
    /// before that are queued
    pub fn create_stream(&mut self) -> Result<StreamHandle> {
        self.ensure_open()?;
        let channel = (FIRST_STREAM_CHANNEL..=MAX_SHORT_CHANNEL)
            .find(|id| !self.streams.contains_key(id) && !self.order.contains(id))
            .ok_or(ProtocolError::ChannelsExhausted)?;

        self.call_on(
            CHANNEL_COMMAND,
            CMD_CREATE_STREAM,
            vec![],
            Some(ReplyTarget::CreateStream { channel }),
        )?;

        // The peer may already be sending on this ID; keep its receive state
        self.channels
            .entry(channel)
            .or_insert_with(|| Channel::new(channel, 0))
            .reset_send(0);
        self.streams.insert(
            channel,
            NetStream::new(
                channel,
                self.config.playout_threshold,
                Arc::clone(&self.config.decoder_factory),
            ),
        );
        tracing::debug!(channel, "Creating stream");
        Ok(StreamHandle(channel))
    }

    /// Start playback; `start` is -2 for live-or-recorded, -1 live, >= 0 a position in ms
    pub fn play(&mut self, stream: StreamHandle, name: &str, start: f64) -> Result<()> {
        self.ensure_open()?;
        self.stream_mut(stream)?.set_playing(name);
        self.call_on(
            stream.0,
            CMD_PLAY,
            vec![AmfValue::from(name), AmfValue::Number(start)],
            None,
        )?;
        Ok(())
    }

    /// Start publishing; `kind` is "live", "record" or "append"
    pub fn publish(&mut self, stream: StreamHandle, name: &str, kind: &str) -> Result<()> {
        self.ensure_open()?;
        self.stream_mut(stream)?.set_publishing(name);
        self.call_on(
            stream.0,
            CMD_PUBLISH,
            vec![AmfValue::from(name), AmfValue::from(kind)],
            None,
        )?;
        Ok(())
    }

    pub fn pause(&mut self, stream: StreamHandle, paused: bool) -> Result<()> {
        self.ensure_open()?;
        let s = self.stream_mut(stream)?;
        s.set_paused(paused);
        let position = s.position();
        self.call_on(
            stream.0,
            CMD_PAUSE,
            vec![AmfValue::Boolean(paused), AmfValue::from(position)],
            None,
        )?;
        Ok(())
    }

    /// Seek to `position_ms`; buffered media is dropped
    pub fn seek(&mut self, stream: StreamHandle, position_ms: f64) -> Result<()> {
        self.ensure_open()?;
        let s = self.streams.get_mut(&stream.0).ok_or(ProtocolError::StreamNotFound(stream.0))?;
        s.clear_playout(&mut self.timers);
        self.call_on(stream.0, CMD_SEEK, vec![AmfValue::Number(position_ms)], None)?;
        self.drain_playout();
        Ok(())
    }

    pub fn receive_audio(&mut self, stream: StreamHandle, enabled: bool) -> Result<()> {
        self.set_receive(stream, MediaKind::Audio, CMD_RECEIVE_AUDIO, enabled)
    }

    pub fn receive_video(&mut self, stream: StreamHandle, enabled: bool) -> Result<()> {
        self.set_receive(stream, MediaKind::Video, CMD_RECEIVE_VIDEO, enabled)
    }

    fn set_receive(&mut self, stream: StreamHandle, kind: MediaKind, command: &str, enabled: bool) -> Result<()> {
        self.ensure_open()?;
        self.stream_mut(stream)?.set_receive(kind, enabled);
        self.call_on(stream.0, command, vec![AmfValue::Boolean(enabled)], None)?;
        Ok(())
    }

    /// Queue an audio or video message on a publishing stream
    pub fn send_media(&mut self, stream: StreamHandle, kind: MediaKind, timestamp: u32, payload: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.stream_mut(stream)?;
        self.enqueue_at(stream.0, kind.message_type(), timestamp, payload);
        Ok(())
    }

    /// Queue a data message (e.g. `@setDataFrame`/`onMetaData`) on a stream
    pub fn send_data(&mut self, stream: StreamHandle, name: &str, values: Vec<AmfValue>) -> Result<()> {
        self.ensure_open()?;
        self.stream_mut(stream)?;
        let payload = DataMessage {
            name: name.to_string(),
            values,
        }
        .encode();
        self.enqueue(stream.0, MSG_DATA_AMF0, payload);
        Ok(())
    }

    /// Close a stream
    ///
    /// deleteStream is queued on the command channel, then the stream's
    /// channel leaves the round-robin set, its pending calls are dropped
    /// and its playout timers cancelled before its state is released.
    pub fn close_stream(&mut self, stream: StreamHandle) -> Result<()> {
        self.ensure_open()?;
        let stream_id = self.stream_mut(stream)?.stream_id();
        if let Some(stream_id) = stream_id {
            self.call_on(
                CHANNEL_COMMAND,
                CMD_DELETE_STREAM,
                vec![AmfValue::from(stream_id)],
                None,
            )?;
        }
        self.remove_stream(stream.0);
        Ok(())
    }

    fn remove_stream(&mut self, channel: u32) {
        self.unregister_channel(channel);
        self.rpc.cancel_channel(channel);
        // Partial messages for the stream may sit on any chunk stream
        if let Some(stream_id) = self.streams.get(&channel).and_then(|s| s.stream_id()) {
            for ch in self.channels.values_mut() {
                if ch.abandon_inbound(stream_id) {
                    tracing::debug!(channel = ch.id(), stream_id, "Abandoned partial message");
                }
            }
        }
        if let Some(mut stream) = self.streams.remove(&channel) {
            stream.close(&mut self.timers);
            tracing::debug!(channel, state = ?stream.state(), "Stream closed");
        }
    }

    fn stream_mut(&mut self, stream: StreamHandle) -> Result<&mut NetStream> {
        self.streams
            .get_mut(&stream.0)
            .ok_or_else(|| ProtocolError::StreamNotFound(stream.0).into())
    }

    /// Close the connection; emits `Closed { error: None }`
    ///
    /// Everything already queued is written out first and handed over by
    /// `poll_transmit` after the connection is closed. Before the handshake
    /// completes there is nothing worth sending.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        let out = if self.handshake.is_some() {
            BytesMut::new()
        } else {
            let mut out = self.handshake_out.split();
            while self.poll_chunk(&mut out) {}
            out
        };
        self.finish(None);
        self.closing_out = out;
    }

    fn fail(&mut self, error: Error) {
        tracing::warn!(error = %error, "Connection failed");
        self.finish(Some(error));
    }

    /// Tear everything down and emit the terminal event, once
    fn finish(&mut self, error: Option<Error>) {
        if self.state == ConnectionState::Closed {
            return;
        }
        if let Some(mut handshake) = self.handshake.take() {
            handshake.abandon();
        }
        self.handshake_out.clear();

        let channels: Vec<u32> = self.streams.keys().copied().collect();
        for channel in channels {
            self.remove_stream(channel);
        }
        self.rpc.clear();
        self.timers.clear();
        self.channels.clear();
        self.order.clear();
        self.cursor = None;
        self.recv_buf.clear();

        self.events.push_back(ConnectionEvent::Closed { error });
        self.state = ConnectionState::Closed;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("order", &self.order)
            .field("cursor", &self.cursor)
            .field("in_chunk_size", &self.in_chunk_size)
            .field("out_chunk_size", &self.out_chunk_size)
            .field("streams", &self.streams.len())
            .finish_non_exhaustive()
    }
}
