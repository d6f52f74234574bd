//! Invoke ID allocation and reply correlation

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;

use crate::amf::AmfValue;
use crate::error::{AmfError, ProtocolError};
use crate::protocol::message::{Command, StatusInfo};

/// Reply delivered to a call target
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `_result`: command object followed by the reply values
    Result(Vec<AmfValue>),
    /// `_error`: command object followed by the error values
    Error(Vec<AmfValue>),
}

impl Reply {
    pub fn values(&self) -> &[AmfValue] {
        match self {
            Reply::Result(v) | Reply::Error(v) => v,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// First value that is not null, e.g. the stream ID of a createStream reply
    pub fn value(&self) -> Option<&AmfValue> {
        self.values().iter().find(|v| !v.is_null_or_undefined())
    }

    /// Status info object, if the reply carries one
    pub fn status(&self) -> Option<StatusInfo> {
        StatusInfo::from_args(self.values())
    }
}

/// Receives the reply of one call
pub trait Responder: Send {
    fn on_reply(self: Box<Self>, reply: Reply);
}

impl<F> Responder for F
where
    F: FnOnce(Reply) + Send,
{
    fn on_reply(self: Box<Self>, reply: Reply) {
        (*self)(reply)
    }
}

/// Where a reply goes once it arrives
pub enum ReplyTarget {
    /// Embedder supplied callback
    External(Box<dyn Responder>),
    /// createStream issued for the stream on this channel
    CreateStream { channel: u32 },
    /// The connect call
    Connect,
}

impl ReplyTarget {
    pub fn external(responder: impl Responder + 'static) -> Self {
        ReplyTarget::External(Box::new(responder))
    }

    /// Whether this target belongs to the stream on `channel`
    fn references(&self, channel: u32) -> bool {
        matches!(self, ReplyTarget::CreateStream { channel: c } if *c == channel)
    }
}

impl fmt::Debug for ReplyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplyTarget::External(_) => f.write_str("External"),
            ReplyTarget::CreateStream { channel } => {
                f.debug_struct("CreateStream").field("channel", channel).finish()
            }
            ReplyTarget::Connect => f.write_str("Connect"),
        }
    }
}

/// A call waiting for its reply
#[derive(Debug)]
pub struct PendingCall {
    /// Channel the call went out on
    pub channel: u32,
    pub name: String,
    pub target: ReplyTarget,
}

/// Classified inbound command message
#[derive(Debug)]
pub enum Inbound {
    /// Reply matched to a pending call
    Reply {
        id: u32,
        call: PendingCall,
        reply: Reply,
    },
    /// Reply whose ID is not pending; already logged
    Stale(u32),
    /// Call from the peer
    Call(Command),
}

/// Connection-wide call state
#[derive(Debug)]
pub struct RpcEngine {
    /// `None` once every ID has been handed out
    next_id: Option<u32>,
    pending: HashMap<u32, PendingCall>,
}

impl RpcEngine {
    pub fn new() -> Self {
        Self {
            next_id: Some(1),
            pending: HashMap::new(),
        }
    }

    /// Encode a call, registering `target` under a fresh ID if present
    ///
    /// Returns the ID used (0 when no reply is wanted) and the payload to
    /// queue on `channel`. IDs are never reused, so a call wanting a reply
    /// fails once they run out.
    pub fn call(
        &mut self,
        channel: u32,
        name: &str,
        target: Option<ReplyTarget>,
        command_object: AmfValue,
        args: Vec<AmfValue>,
    ) -> Result<(u32, Bytes), ProtocolError> {
        let id = match target {
            Some(target) => {
                let id = self.next_id.ok_or(ProtocolError::InvokeIdsExhausted)?;
                self.next_id = id.checked_add(1);
                self.pending.insert(
                    id,
                    PendingCall {
                        channel,
                        name: name.to_string(),
                        target,
                    },
                );
                id
            }
            None => 0,
        };

        tracing::trace!(channel, id, name, "Encoding call");
        let payload = Command::new(name, id, args)
            .with_command_object(command_object)
            .encode();
        Ok((id, payload))
    }

    /// Classify a command message payload
    ///
    /// A malformed payload fails as a whole and leaves the pending map
    /// untouched.
    pub fn on_receive(&mut self, payload: &Bytes) -> Result<Inbound, AmfError> {
        let cmd = Command::decode(payload)?;

        if !cmd.is_reply() {
            return Ok(Inbound::Call(cmd));
        }

        let id = cmd.id();
        let call = match self.pending.remove(&id) {
            Some(call) => call,
            None => {
                tracing::warn!(id, name = %cmd.name, "Dropping reply with no pending call");
                return Ok(Inbound::Stale(id));
            }
        };

        let mut values = Vec::with_capacity(cmd.arguments.len() + 1);
        values.push(cmd.command_object);
        values.extend(cmd.arguments);
        let reply = if cmd.name == crate::protocol::constants::CMD_ERROR {
            Reply::Error(values)
        } else {
            Reply::Result(values)
        };

        Ok(Inbound::Reply { id, call, reply })
    }

    /// Payload answering an inbound call
    pub fn reply_payload(id: u32, value: AmfValue) -> Bytes {
        Command::result(id, value).encode()
    }

    /// Drop every pending call issued on or targeting `channel`
    pub fn cancel_channel(&mut self, channel: u32) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, call| call.channel != channel && !call.target.references(channel));
        let dropped = before - self.pending.len();
        if dropped > 0 {
            tracing::debug!(channel, dropped, "Cancelled pending calls");
        }
        dropped
    }

    /// Drop all pending calls
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: u32) -> bool {
        self.pending.contains_key(&id)
    }
}

impl Default for RpcEngine {
    fn default() -> Self {
        Self::new()
    }
}
