//! Protocol housekeeping on the control channel
//!
//! Control messages never reach the embedder. Each one either adjusts
//! connection state or produces a reply queued on channel 2.

use crate::protocol::constants::MAX_CHUNK_SIZE;
use crate::protocol::header::Header;
use crate::protocol::message::{ControlMessage, UserControlEvent};

/// What the connection must do after a control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    /// Nothing beyond logging
    None,
    /// Use this chunk size for everything received from now on
    SetInboundChunkSize(u32),
    /// Throw away the partial message on this channel
    Abort { channel: u32 },
    /// Queue a reply with the given header timestamp
    Reply { message: ControlMessage, timestamp: u32 },
    /// Stream lifecycle event for the stream it names
    StreamEvent(UserControlEvent),
}

/// Flow control state of one connection
#[derive(Debug, Default)]
pub struct ControlChannel {
    /// Acknowledgement window announced by the server
    window: Option<u32>,
    /// Peer bandwidth limit announced by the server
    peer_bandwidth: Option<u32>,
    /// Total bytes received, handshake included
    received: u64,
    /// `received` when the last acknowledgement was queued
    acked: u64,
}

impl ControlChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window(&self) -> Option<u32> {
        self.window
    }

    pub fn peer_bandwidth(&self) -> Option<u32> {
        self.peer_bandwidth
    }

    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    /// Count received bytes; returns an acknowledgement once a window's worth arrived
    pub fn on_bytes_received(&mut self, n: usize) -> Option<ControlMessage> {
        self.received += n as u64;
        let window = self.window? as u64;
        if window == 0 || self.received - self.acked < window {
            return None;
        }
        self.acked = self.received;
        Some(ControlMessage::Acknowledgement {
            // Sequence number wraps at 32 bits
            sequence: self.received as u32,
        })
    }

    /// Handle one inbound control message
    ///
    /// `now_ms` is the connection clock in RTMP milliseconds.
    pub fn handle(&mut self, header: &Header, message: ControlMessage, now_ms: u32) -> ControlAction {
        match message {
            ControlMessage::SetChunkSize(size) => {
                let clamped = size.clamp(1, MAX_CHUNK_SIZE);
                if clamped != size {
                    tracing::warn!(requested = size, used = clamped, "Peer chunk size out of range");
                }
                tracing::debug!(size = clamped, "Inbound chunk size changed");
                ControlAction::SetInboundChunkSize(clamped)
            }
            ControlMessage::Abort { channel } => {
                tracing::debug!(channel, "Peer aborted message");
                ControlAction::Abort { channel }
            }
            ControlMessage::Acknowledgement { sequence } => {
                tracing::trace!(sequence, "Peer acknowledgement");
                ControlAction::None
            }
            ControlMessage::UserControl(UserControlEvent::PingRequest(value)) => {
                tracing::trace!(value, "Ping");
                ControlAction::Reply {
                    message: ControlMessage::UserControl(UserControlEvent::PingResponse(value)),
                    timestamp: now_ms,
                }
            }
            ControlMessage::UserControl(UserControlEvent::PingResponse(value)) => {
                tracing::trace!(value, "Ping response");
                ControlAction::None
            }
            ControlMessage::UserControl(UserControlEvent::Unknown { event_type, .. }) => {
                tracing::debug!(event_type, "Ignoring unknown user control event");
                ControlAction::None
            }
            ControlMessage::UserControl(event) => ControlAction::StreamEvent(event),
            ControlMessage::ServerBandwidth(size) => {
                tracing::debug!(size, "Server bandwidth");
                self.window = Some(size);
                // Echo the value back, stamped with the time since the request
                ControlAction::Reply {
                    message: ControlMessage::ClientBandwidth {
                        size,
                        limit_type: None,
                    },
                    timestamp: now_ms.wrapping_sub(header.timestamp),
                }
            }
            ControlMessage::ClientBandwidth { size, limit_type } => {
                tracing::debug!(size, ?limit_type, "Client bandwidth");
                self.peer_bandwidth = Some(size);
                ControlAction::None
            }
        }
    }

    /// SetChunkSize announcing our outbound chunk size
    pub fn chunk_size_message(size: u32) -> ControlMessage {
        ControlMessage::SetChunkSize(size)
    }

    /// SetBufferLength for a playing stream
    pub fn buffer_length_message(stream_id: u32, buffer_ms: u32) -> ControlMessage {
        ControlMessage::UserControl(UserControlEvent::SetBufferLength {
            stream_id,
            buffer_ms,
        })
    }
}
