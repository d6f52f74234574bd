//! RTMP message payloads
//!
//! Messages the client understands are classified into:
//! - Protocol Control Messages (types 1-6): chunk/flow control and ping
//! - Command Messages (type 20): AMF0-encoded remote calls and replies
//! - Data Messages (type 18): metadata
//! - Audio/Video Messages (types 8, 9): media, passed through untouched
//!
//! Reference: RTMP Specification Section 5.4

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::amf::{Amf0Decoder, Amf0Encoder, AmfObject, AmfValue};
use crate::error::{AmfError, ProtocolError};
use crate::protocol::constants::*;

/// Protocol control message (stream 0, types 1-6)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Set Chunk Size (type 1)
    SetChunkSize(u32),

    /// Abort Message (type 2)
    Abort { channel: u32 },

    /// Acknowledgement (type 3)
    Acknowledgement { sequence: u32 },

    /// User Control Message (type 4)
    UserControl(UserControlEvent),

    /// Server bandwidth / window acknowledgement size (type 5)
    ServerBandwidth(u32),

    /// Client bandwidth / set peer bandwidth (type 6)
    ClientBandwidth { size: u32, limit_type: Option<u8> },
}

/// User Control Event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
    Unknown { event_type: u16, data: Bytes },
}

impl UserControlEvent {
    /// Message stream the event refers to, for stream-scoped events
    pub fn stream_id(&self) -> Option<u32> {
        match self {
            UserControlEvent::StreamBegin(id)
            | UserControlEvent::StreamEof(id)
            | UserControlEvent::StreamDry(id)
            | UserControlEvent::StreamIsRecorded(id) => Some(*id),
            UserControlEvent::SetBufferLength { stream_id, .. } => Some(*stream_id),
            _ => None,
        }
    }

    /// Human readable name, used for stream status events
    pub fn name(&self) -> &'static str {
        match self {
            UserControlEvent::StreamBegin(_) => "StreamBegin",
            UserControlEvent::StreamEof(_) => "StreamEOF",
            UserControlEvent::StreamDry(_) => "StreamDry",
            UserControlEvent::SetBufferLength { .. } => "SetBufferLength",
            UserControlEvent::StreamIsRecorded(_) => "StreamIsRecorded",
            UserControlEvent::PingRequest(_) => "PingRequest",
            UserControlEvent::PingResponse(_) => "PingResponse",
            UserControlEvent::Unknown { .. } => "Unknown",
        }
    }
}

impl ControlMessage {
    /// Whether a message type is handled by [`ControlMessage::parse`]
    pub fn is_control_type(message_type: u8) -> bool {
        (MSG_SET_CHUNK_SIZE..=MSG_CLIENT_BANDWIDTH).contains(&message_type)
    }

    /// Parse a control message payload
    pub fn parse(message_type: u8, payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut payload = payload;

        match message_type {
            MSG_SET_CHUNK_SIZE => {
                let size = read_u32(&mut payload, "set chunk size")? & 0x7FFFFFFF; // Ignore MSB
                Ok(ControlMessage::SetChunkSize(size))
            }
            MSG_ABORT => Ok(ControlMessage::Abort {
                channel: read_u32(&mut payload, "abort")?,
            }),
            MSG_ACKNOWLEDGEMENT => Ok(ControlMessage::Acknowledgement {
                sequence: read_u32(&mut payload, "acknowledgement")?,
            }),
            MSG_USER_CONTROL => Self::parse_user_control(payload),
            MSG_SERVER_BANDWIDTH => Ok(ControlMessage::ServerBandwidth(read_u32(
                &mut payload,
                "server bandwidth",
            )?)),
            MSG_CLIENT_BANDWIDTH => {
                let size = read_u32(&mut payload, "client bandwidth")?;
                // Flag is informational; some servers omit it
                let limit_type = if payload.has_remaining() {
                    Some(payload.get_u8())
                } else {
                    None
                };
                Ok(ControlMessage::ClientBandwidth { size, limit_type })
            }
            other => Err(ProtocolError::UnexpectedMessage(format!(
                "type {} is not a control message",
                other
            ))),
        }
    }

    fn parse_user_control(mut payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < 2 {
            return Err(ProtocolError::Truncated("user control"));
        }
        let event_type = payload.get_u16();

        let event = match event_type {
            UC_STREAM_BEGIN => UserControlEvent::StreamBegin(read_u32(&mut payload, "stream begin")?),
            UC_STREAM_EOF => UserControlEvent::StreamEof(read_u32(&mut payload, "stream eof")?),
            UC_STREAM_DRY => UserControlEvent::StreamDry(read_u32(&mut payload, "stream dry")?),
            UC_SET_BUFFER_LENGTH => {
                let stream_id = read_u32(&mut payload, "set buffer length")?;
                let buffer_ms = read_u32(&mut payload, "set buffer length")?;
                UserControlEvent::SetBufferLength { stream_id, buffer_ms }
            }
            UC_STREAM_IS_RECORDED => {
                UserControlEvent::StreamIsRecorded(read_u32(&mut payload, "stream is recorded")?)
            }
            UC_PING_REQUEST => UserControlEvent::PingRequest(read_u32(&mut payload, "ping")?),
            UC_PING_RESPONSE => UserControlEvent::PingResponse(read_u32(&mut payload, "ping")?),
            _ => UserControlEvent::Unknown {
                event_type,
                data: Bytes::copy_from_slice(payload),
            },
        };

        Ok(ControlMessage::UserControl(event))
    }

    /// Encode to (message type, payload)
    pub fn encode(&self) -> (u8, Bytes) {
        let mut buf = BytesMut::with_capacity(10);
        let message_type = match self {
            ControlMessage::SetChunkSize(size) => {
                buf.put_u32(*size & 0x7FFFFFFF);
                MSG_SET_CHUNK_SIZE
            }
            ControlMessage::Abort { channel } => {
                buf.put_u32(*channel);
                MSG_ABORT
            }
            ControlMessage::Acknowledgement { sequence } => {
                buf.put_u32(*sequence);
                MSG_ACKNOWLEDGEMENT
            }
            ControlMessage::ServerBandwidth(size) => {
                buf.put_u32(*size);
                MSG_SERVER_BANDWIDTH
            }
            ControlMessage::ClientBandwidth { size, limit_type } => {
                buf.put_u32(*size);
                if let Some(limit) = limit_type {
                    buf.put_u8(*limit);
                }
                MSG_CLIENT_BANDWIDTH
            }
            ControlMessage::UserControl(event) => {
                match event {
                    UserControlEvent::StreamBegin(id) => {
                        buf.put_u16(UC_STREAM_BEGIN);
                        buf.put_u32(*id);
                    }
                    UserControlEvent::StreamEof(id) => {
                        buf.put_u16(UC_STREAM_EOF);
                        buf.put_u32(*id);
                    }
                    UserControlEvent::StreamDry(id) => {
                        buf.put_u16(UC_STREAM_DRY);
                        buf.put_u32(*id);
                    }
                    UserControlEvent::SetBufferLength { stream_id, buffer_ms } => {
                        buf.put_u16(UC_SET_BUFFER_LENGTH);
                        buf.put_u32(*stream_id);
                        buf.put_u32(*buffer_ms);
                    }
                    UserControlEvent::StreamIsRecorded(id) => {
                        buf.put_u16(UC_STREAM_IS_RECORDED);
                        buf.put_u32(*id);
                    }
                    UserControlEvent::PingRequest(ts) => {
                        buf.put_u16(UC_PING_REQUEST);
                        buf.put_u32(*ts);
                    }
                    UserControlEvent::PingResponse(ts) => {
                        buf.put_u16(UC_PING_RESPONSE);
                        buf.put_u32(*ts);
                    }
                    UserControlEvent::Unknown { event_type, data } => {
                        buf.put_u16(*event_type);
                        buf.put_slice(data);
                    }
                }
                MSG_USER_CONTROL
            }
        };
        (message_type, buf.freeze())
    }
}

fn read_u32(payload: &mut &[u8], what: &'static str) -> Result<u32, ProtocolError> {
    if payload.remaining() < 4 {
        return Err(ProtocolError::Truncated(what));
    }
    Ok(payload.get_u32())
}

/// AMF0 command: `[name, transaction id, command object, args...]`
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Command name
    pub name: String,
    /// Transaction ID (0 = no reply wanted)
    pub transaction_id: f64,
    /// Command object (null for most calls and replies)
    pub command_object: AmfValue,
    /// Additional arguments
    pub arguments: Vec<AmfValue>,
}

impl Command {
    pub fn new(name: impl Into<String>, transaction_id: u32, arguments: Vec<AmfValue>) -> Self {
        Command {
            name: name.into(),
            transaction_id: transaction_id as f64,
            command_object: AmfValue::Null,
            arguments,
        }
    }

    pub fn with_command_object(mut self, object: AmfValue) -> Self {
        self.command_object = object;
        self
    }

    /// A `_result` reply carrying one value
    pub fn result(transaction_id: u32, value: AmfValue) -> Self {
        Command::new(CMD_RESULT, transaction_id, vec![value])
    }

    /// An `_error` reply carrying one value
    pub fn error(transaction_id: u32, value: AmfValue) -> Self {
        Command::new(CMD_ERROR, transaction_id, vec![value])
    }

    /// Transaction ID as an integer; anything that is not a whole number
    /// in range maps to 0, which never matches a pending call
    pub fn id(&self) -> u32 {
        let id = self.transaction_id;
        if id.is_finite() && id.fract() == 0.0 && id >= 0.0 && id <= u32::MAX as f64 {
            id as u32
        } else {
            0
        }
    }

    pub fn is_reply(&self) -> bool {
        self.name == CMD_RESULT || self.name == CMD_ERROR
    }

    /// Decode a whole command payload
    ///
    /// Any malformed value fails the whole command; nothing is returned
    /// partially.
    pub fn decode(payload: &Bytes) -> Result<Self, AmfError> {
        let mut payload = payload.clone();
        let mut decoder = Amf0Decoder::new();

        let name = decoder.decode_string_value(&mut payload)?;
        let transaction_id = decoder.decode_number_value(&mut payload)?;
        let command_object = if payload.has_remaining() {
            decoder.decode(&mut payload)?
        } else {
            AmfValue::Null
        };
        let arguments = decoder.decode_all(&mut payload)?;

        Ok(Command {
            name,
            transaction_id,
            command_object,
            arguments,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut encoder = Amf0Encoder::new();
        encoder.encode(&AmfValue::String(self.name.clone()));
        encoder.encode(&AmfValue::Number(self.transaction_id));
        encoder.encode(&self.command_object);
        encoder.encode_all(&self.arguments);
        encoder.finish()
    }
}

/// Data message (onMetaData, @setDataFrame, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    /// Handler name
    pub name: String,
    /// Data values
    pub values: Vec<AmfValue>,
}

impl DataMessage {
    pub fn decode(payload: &Bytes) -> Result<Self, AmfError> {
        let mut payload = payload.clone();
        let mut decoder = Amf0Decoder::new();
        let name = decoder.decode_string_value(&mut payload)?;
        let values = decoder.decode_all(&mut payload)?;
        Ok(DataMessage { name, values })
    }

    pub fn encode(&self) -> Bytes {
        let mut encoder = Amf0Encoder::new();
        encoder.encode(&AmfValue::String(self.name.clone()));
        encoder.encode_all(&self.values);
        encoder.finish()
    }
}

/// Status info object (`level`, `code`, `description`)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusInfo {
    pub level: String,
    pub code: String,
    pub description: String,
}

impl StatusInfo {
    /// Pull the status fields out of the first object in `args` carrying a code
    pub fn from_args(args: &[AmfValue]) -> Option<Self> {
        let obj = args
            .iter()
            .filter_map(|v| v.as_object())
            .find(|obj| obj.contains_key("code"))?;
        Some(StatusInfo {
            level: obj.get("level").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            code: obj.get("code").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            description: obj
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        })
    }

    pub fn is_error(&self) -> bool {
        self.level == "error"
    }

    pub fn to_amf(&self) -> AmfValue {
        AmfValue::Object(
            AmfObject::new()
                .with("level", self.level.as_str())
                .with("code", self.code.as_str())
                .with("description", self.description.as_str()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_roundtrip() {
        let messages = [
            ControlMessage::SetChunkSize(4096),
            ControlMessage::Abort { channel: 5 },
            ControlMessage::Acknowledgement { sequence: 2_500_000 },
            ControlMessage::ServerBandwidth(2_500_000),
            ControlMessage::ClientBandwidth { size: 2_500_000, limit_type: Some(2) },
            ControlMessage::UserControl(UserControlEvent::StreamBegin(1)),
            ControlMessage::UserControl(UserControlEvent::SetBufferLength {
                stream_id: 1,
                buffer_ms: 3000,
            }),
            ControlMessage::UserControl(UserControlEvent::PingRequest(123456)),
        ];
        for msg in messages {
            let (message_type, payload) = msg.encode();
            assert_eq!(ControlMessage::parse(message_type, &payload).unwrap(), msg);
        }
    }

    #[test]
    fn test_chunk_size_ignores_msb() {
        let msg = ControlMessage::parse(MSG_SET_CHUNK_SIZE, &[0x80, 0x00, 0x10, 0x00]).unwrap();
        assert_eq!(msg, ControlMessage::SetChunkSize(4096));
    }

    #[test]
    fn test_ping_wire_format() {
        let (message_type, payload) =
            ControlMessage::UserControl(UserControlEvent::PingResponse(0x01020304)).encode();
        assert_eq!(message_type, MSG_USER_CONTROL);
        assert_eq!(&payload[..], &[0x00, 0x07, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_client_bandwidth_without_flag() {
        let msg = ControlMessage::parse(MSG_CLIENT_BANDWIDTH, &[0, 0, 0x10, 0]).unwrap();
        assert_eq!(msg, ControlMessage::ClientBandwidth { size: 4096, limit_type: None });
    }

    #[test]
    fn test_truncated_control() {
        assert_eq!(
            ControlMessage::parse(MSG_SERVER_BANDWIDTH, &[0, 1]),
            Err(ProtocolError::Truncated("server bandwidth"))
        );
        assert_eq!(
            ControlMessage::parse(MSG_USER_CONTROL, &[0, 6, 0]),
            Err(ProtocolError::Truncated("ping"))
        );
        assert!(ControlMessage::parse(MSG_AUDIO, &[]).is_err());
    }

    #[test]
    fn test_command_roundtrip() {
        let cmd = Command::new(CMD_CONNECT, 1, vec![AmfValue::String("test".into())])
            .with_command_object(AmfValue::Object(AmfObject::new().with("app", "live")));

        let parsed = Command::decode(&cmd.encode()).unwrap();
        assert_eq!(parsed, cmd);
        assert_eq!(parsed.id(), 1);
        assert!(!parsed.is_reply());
    }

    #[test]
    fn test_result_layout() {
        let payload = Command::result(7, AmfValue::Number(1.0)).encode();
        let values = crate::amf::amf0::decode_all(&payload).unwrap();
        assert_eq!(
            values,
            vec![
                AmfValue::String(CMD_RESULT.into()),
                AmfValue::Number(7.0),
                AmfValue::Null,
                AmfValue::Number(1.0),
            ]
        );
    }

    #[test]
    fn test_malformed_command_is_rejected_whole() {
        let mut payload = Command::new("onStatus", 0, vec![AmfValue::Number(1.0)])
            .encode()
            .to_vec();
        payload.truncate(payload.len() - 3);
        assert_eq!(
            Command::decode(&Bytes::from(payload)),
            Err(AmfError::UnexpectedEof)
        );

        // Name must be a string
        let payload = crate::amf::amf0::encode(&AmfValue::Number(3.0));
        assert!(Command::decode(&payload).is_err());
    }

    #[test]
    fn test_odd_transaction_ids() {
        let mut cmd = Command::new("x", 0, vec![]);
        cmd.transaction_id = -1.0;
        assert_eq!(cmd.id(), 0);
        cmd.transaction_id = f64::NAN;
        assert_eq!(cmd.id(), 0);
        cmd.transaction_id = 1.5;
        assert_eq!(cmd.id(), 0);
        cmd.transaction_id = 42.0;
        assert_eq!(cmd.id(), 42);
    }

    #[test]
    fn test_status_info() {
        let info = StatusInfo {
            level: "status".into(),
            code: NS_PLAY_START.into(),
            description: "Started playing".into(),
        };
        let props = AmfValue::Object(AmfObject::new().with("fmsVer", "FMS/3,0,1,123"));
        let args = vec![props, info.to_amf()];
        assert_eq!(StatusInfo::from_args(&args), Some(info));
        assert_eq!(StatusInfo::from_args(&[AmfValue::Null]), None);
    }

    #[test]
    fn test_data_message_roundtrip() {
        let data = DataMessage {
            name: CMD_ON_METADATA.into(),
            values: vec![AmfValue::EcmaArray(AmfObject::new().with("duration", 12.5))],
        };
        assert_eq!(DataMessage::decode(&data.encode()).unwrap(), data);
    }
}
