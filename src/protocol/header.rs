//! Chunk header codec
//!
//! Every chunk starts with a header that is compressed against the last
//! header seen on the same channel. The sender compresses against what it
//! last sent, the receiver expands against what it last received.
//!
//! ```text
//! +-------------+---------------------------+------------------+
//! | Basic Header| Message Header            | Ext. timestamp   |
//! | fmt(2)+id(6)| 11 / 7 / 3 / 0 bytes      | 0 or 4 bytes     |
//! +-------------+---------------------------+------------------+
//!
//! Full         (12): timestamp(3) size(3) type(1) stream_id(4, LE)
//! Medium        (8): timestamp_delta(3) size(3) type(1)
//! Small         (4): timestamp_delta(3)
//! Continuation  (1): nothing
//! ```
//!
//! Channel IDs 64 and above use the two and three byte basic header forms.

use bytes::{BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::constants::*;

/// Logical message header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Channel (chunk stream) ID
    pub channel: u32,
    /// Absolute message timestamp in milliseconds
    pub timestamp: u32,
    /// Payload size in bytes
    pub size: u32,
    /// Message type ID
    pub message_type: u8,
    /// Message stream ID
    pub stream_id: u32,
}

impl Header {
    pub fn new(channel: u32, stream_id: u32, message_type: u8, timestamp: u32, size: u32) -> Self {
        Self {
            channel,
            timestamp,
            size,
            message_type,
            stream_id,
        }
    }
}

/// Header size class, smallest last
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HeaderClass {
    /// Everything, 12 bytes on the wire
    Full,
    /// Timestamp, size and type, 8 bytes
    Medium,
    /// Timestamp only, 4 bytes
    Small,
    /// Basic header only, 1 byte
    Continuation,
}

impl HeaderClass {
    pub fn from_fmt(fmt: u8) -> Self {
        match fmt & 0x03 {
            CHUNK_FMT_0 => HeaderClass::Full,
            CHUNK_FMT_1 => HeaderClass::Medium,
            CHUNK_FMT_2 => HeaderClass::Small,
            _ => HeaderClass::Continuation,
        }
    }

    pub fn fmt(self) -> u8 {
        match self {
            HeaderClass::Full => CHUNK_FMT_0,
            HeaderClass::Medium => CHUNK_FMT_1,
            HeaderClass::Small => CHUNK_FMT_2,
            HeaderClass::Continuation => CHUNK_FMT_3,
        }
    }

    /// Bytes following the basic header (excluding extended timestamp)
    pub fn message_header_len(self) -> usize {
        match self {
            HeaderClass::Full => 11,
            HeaderClass::Medium => 7,
            HeaderClass::Small => 3,
            HeaderClass::Continuation => 0,
        }
    }

    /// Total header size for a channel with a one-byte basic header
    pub fn wire_len(self) -> usize {
        1 + self.message_header_len()
    }
}

/// Basic header: class, channel ID and its own length in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicHeader {
    pub class: HeaderClass,
    pub channel: u32,
    pub len: usize,
}

/// Peek the basic header without consuming anything
///
/// Returns `None` if more bytes are needed.
pub fn peek_basic_header(buf: &[u8]) -> Option<BasicHeader> {
    let first = *buf.first()?;
    let class = HeaderClass::from_fmt(first >> 6);

    match first & 0x3F {
        0 => {
            // 2-byte header: id = 64 + second byte
            let second = *buf.get(1)?;
            Some(BasicHeader {
                class,
                channel: 64 + second as u32,
                len: 2,
            })
        }
        1 => {
            // 3-byte header: id = 64 + second + third*256
            if buf.len() < 3 {
                return None;
            }
            Some(BasicHeader {
                class,
                channel: 64 + buf[1] as u32 + (buf[2] as u32) * 256,
                len: 3,
            })
        }
        id => Some(BasicHeader {
            class,
            channel: id as u32,
            len: 1,
        }),
    }
}

/// Write basic header
pub fn write_basic_header(channel: u32, class: HeaderClass, buf: &mut BytesMut) {
    let fmt = class.fmt() << 6;
    if channel >= 64 + 256 {
        let offset = channel - 64;
        buf.put_u8(fmt | 1);
        buf.put_u8((offset & 0xFF) as u8);
        buf.put_u8(((offset >> 8) & 0xFF) as u8);
    } else if channel >= 64 {
        buf.put_u8(fmt);
        buf.put_u8((channel - 64) as u8);
    } else {
        buf.put_u8(fmt | (channel as u8));
    }
}

/// A header decoded from the wire, not yet committed to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedHeader {
    pub header: Header,
    pub class: HeaderClass,
    /// Raw timestamp field (absolute for Full, delta otherwise)
    pub ts_field: u32,
    /// Bytes the header occupies, basic header included
    pub len: usize,
}

/// Last header sent or received on one channel
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderCache {
    last: Option<Header>,
    /// Last raw timestamp field; reused by 1-byte headers that start a new message
    ts_field: u32,
}

impl HeaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&Header> {
        self.last.as_ref()
    }

    /// Whether headers on this channel carry the 4-byte extended timestamp
    pub fn extended(&self) -> bool {
        self.ts_field >= EXTENDED_TIMESTAMP_THRESHOLD
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Pick the smallest class that reproduces `cur` against this cache
    pub fn diff(&self, cur: &Header) -> HeaderClass {
        let prev = match &self.last {
            Some(prev) => prev,
            None => return HeaderClass::Full,
        };

        if prev.channel != cur.channel || prev.stream_id != cur.stream_id {
            HeaderClass::Full
        } else if prev.size != cur.size || prev.message_type != cur.message_type {
            HeaderClass::Medium
        } else if self.extended() || cur.timestamp != prev.timestamp.wrapping_add(self.ts_field) {
            HeaderClass::Small
        } else {
            HeaderClass::Continuation
        }
    }

    /// Write `cur` in the given class and remember it as the last header
    ///
    /// The caller is responsible for choosing a class that is valid for
    /// this cache (normally via [`diff`](Self::diff)).
    pub fn encode(&mut self, cur: &Header, class: HeaderClass, buf: &mut BytesMut) {
        let prev_ts = self.last.map(|h| h.timestamp).unwrap_or(0);
        let ts_field = match class {
            HeaderClass::Full => cur.timestamp,
            HeaderClass::Medium | HeaderClass::Small => cur.timestamp.wrapping_sub(prev_ts),
            HeaderClass::Continuation => self.ts_field,
        };
        let wire_ts = ts_field.min(EXTENDED_TIMESTAMP_THRESHOLD);

        write_basic_header(cur.channel, class, buf);
        match class {
            HeaderClass::Full => {
                write_u24(wire_ts, buf);
                write_u24(cur.size, buf);
                buf.put_u8(cur.message_type);
                buf.put_u32_le(cur.stream_id); // Stream ID is little-endian!
            }
            HeaderClass::Medium => {
                write_u24(wire_ts, buf);
                write_u24(cur.size, buf);
                buf.put_u8(cur.message_type);
            }
            HeaderClass::Small => {
                write_u24(wire_ts, buf);
            }
            HeaderClass::Continuation => {}
        }
        if ts_field >= EXTENDED_TIMESTAMP_THRESHOLD {
            buf.put_u32(ts_field);
        }

        self.last = Some(*cur);
        self.ts_field = ts_field;
    }

    /// Write the 1-byte header for a further chunk of the current message
    pub fn encode_continuation(&self, channel: u32, buf: &mut BytesMut) {
        write_basic_header(channel, HeaderClass::Continuation, buf);
        if self.extended() {
            buf.put_u32(self.ts_field);
        }
    }

    /// Decode a header against this cache without changing it
    ///
    /// `in_flight` tells whether a message is being reassembled on this
    /// channel, which is what makes a 1-byte header a continuation rather
    /// than the start of a new message. Returns `Ok(None)` if `buf` does
    /// not yet hold the whole header.
    pub fn decode(&self, buf: &[u8], in_flight: bool) -> Result<Option<DecodedHeader>, ProtocolError> {
        let basic = match peek_basic_header(buf) {
            Some(b) => b,
            None => return Ok(None),
        };
        let class = basic.class;
        let fixed_len = basic.len + class.message_header_len();
        if buf.len() < fixed_len {
            return Ok(None);
        }

        let prev = match (&self.last, class) {
            (Some(prev), _) => *prev,
            (None, HeaderClass::Full | HeaderClass::Medium) => Header {
                channel: basic.channel,
                ..Header::default()
            },
            (None, _) => return Err(ProtocolError::MissingHeaderContext(basic.channel)),
        };

        let fields = &buf[basic.len..fixed_len];
        let raw_ts = match class {
            HeaderClass::Continuation => self.ts_field.min(EXTENDED_TIMESTAMP_THRESHOLD),
            _ => read_u24(&fields[0..3]),
        };

        let has_extended = raw_ts >= EXTENDED_TIMESTAMP_THRESHOLD;
        let len = fixed_len + if has_extended { 4 } else { 0 };
        if buf.len() < len {
            return Ok(None);
        }
        let ts_field = if has_extended {
            read_u32(&buf[fixed_len..len])
        } else {
            raw_ts
        };

        let mut header = prev;
        header.channel = basic.channel;
        match class {
            HeaderClass::Full => {
                header.timestamp = ts_field;
                header.size = read_u24(&fields[3..6]);
                header.message_type = fields[6];
                header.stream_id = u32::from_le_bytes([fields[7], fields[8], fields[9], fields[10]]);
            }
            HeaderClass::Medium => {
                header.timestamp = prev.timestamp.wrapping_add(ts_field);
                header.size = read_u24(&fields[3..6]);
                header.message_type = fields[6];
            }
            HeaderClass::Small => {
                header.timestamp = prev.timestamp.wrapping_add(ts_field);
            }
            HeaderClass::Continuation if in_flight => {
                // Same message, nothing advances
            }
            HeaderClass::Continuation => {
                header.timestamp = prev.timestamp.wrapping_add(ts_field);
            }
        }

        Ok(Some(DecodedHeader {
            header,
            class,
            ts_field,
            len,
        }))
    }

    /// Remember a decoded header as the last one received
    pub fn commit(&mut self, decoded: &DecodedHeader) {
        self.last = Some(decoded.header);
        self.ts_field = decoded.ts_field;
    }
}

/// Write 24-bit big-endian value
fn write_u24(value: u32, buf: &mut BytesMut) {
    buf.put_u8(((value >> 16) & 0xFF) as u8);
    buf.put_u8(((value >> 8) & 0xFF) as u8);
    buf.put_u8((value & 0xFF) as u8);
}

fn read_u24(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | (b[2] as u32)
}

fn read_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(prev: Option<Header>, cur: Header) -> HeaderClass {
        let mut send = HeaderCache::new();
        let mut recv = HeaderCache::new();
        if let Some(prev) = prev {
            let mut scratch = BytesMut::new();
            send.encode(&prev, HeaderClass::Full, &mut scratch);
            let decoded = recv.decode(&scratch, false).unwrap().unwrap();
            recv.commit(&decoded);
        }

        let class = send.diff(&cur);
        let mut buf = BytesMut::new();
        send.encode(&cur, class, &mut buf);

        let decoded = recv.decode(&buf, false).unwrap().unwrap();
        assert_eq!(decoded.header, cur, "class {:?}", class);
        assert_eq!(decoded.len, buf.len());
        class
    }

    #[test]
    fn test_basic_header_parsing() {
        assert_eq!(
            peek_basic_header(&[0x03]),
            Some(BasicHeader { class: HeaderClass::Full, channel: 3, len: 1 })
        );
        assert_eq!(
            peek_basic_header(&[0xC0, 0x00]),
            Some(BasicHeader { class: HeaderClass::Continuation, channel: 64, len: 2 })
        );
        assert_eq!(
            peek_basic_header(&[0x41, 0x00, 0x01]),
            Some(BasicHeader { class: HeaderClass::Medium, channel: 320, len: 3 })
        );
        assert_eq!(peek_basic_header(&[0x00]), None);
        assert_eq!(peek_basic_header(&[]), None);
    }

    #[test]
    fn test_wire_sizes() {
        assert_eq!(HeaderClass::Full.wire_len(), 12);
        assert_eq!(HeaderClass::Medium.wire_len(), 8);
        assert_eq!(HeaderClass::Small.wire_len(), 4);
        assert_eq!(HeaderClass::Continuation.wire_len(), 1);
    }

    #[test]
    fn test_diff_picks_smallest_class() {
        let base = Header::new(5, 1, MSG_VIDEO, 1000, 300);

        assert_eq!(roundtrip(None, base), HeaderClass::Full);

        let other_stream = Header { stream_id: 2, ..base };
        assert_eq!(roundtrip(Some(base), other_stream), HeaderClass::Full);

        let other_size = Header { size: 301, timestamp: 1040, ..base };
        assert_eq!(roundtrip(Some(base), other_size), HeaderClass::Medium);

        let other_type = Header { message_type: MSG_AUDIO, ..base };
        assert_eq!(roundtrip(Some(base), other_type), HeaderClass::Medium);

        let later = Header { timestamp: 1033, ..base };
        assert_eq!(roundtrip(Some(base), later), HeaderClass::Small);
    }

    #[test]
    fn test_continuation_repeats_last_delta() {
        let mut send = HeaderCache::new();
        let mut recv = HeaderCache::new();
        let mut buf = BytesMut::new();

        let headers = [
            Header::new(4, 1, MSG_AUDIO, 0, 10),
            Header::new(4, 1, MSG_AUDIO, 23, 10),
            Header::new(4, 1, MSG_AUDIO, 46, 10),
            Header::new(4, 1, MSG_AUDIO, 69, 10),
        ];
        let mut classes = Vec::new();
        for h in &headers {
            let class = send.diff(h);
            classes.push(class);
            send.encode(h, class, &mut buf);
        }
        assert_eq!(
            classes,
            [HeaderClass::Full, HeaderClass::Small, HeaderClass::Continuation, HeaderClass::Continuation]
        );

        for expected in &headers {
            let decoded = recv.decode(&buf, false).unwrap().unwrap();
            assert_eq!(decoded.header, *expected);
            recv.commit(&decoded);
            let _ = buf.split_to(decoded.len);
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_equal_header_is_one_byte_after_zero_delta() {
        let base = Header::new(3, 0, MSG_COMMAND_AMF0, 0, 40);
        assert_eq!(roundtrip(Some(base), base), HeaderClass::Continuation);
    }

    #[test]
    fn test_in_flight_continuation_keeps_timestamp() {
        let mut recv = HeaderCache::new();
        let mut buf = BytesMut::new();
        let mut send = HeaderCache::new();
        send.encode(&Header::new(6, 1, MSG_VIDEO, 500, 400), HeaderClass::Full, &mut buf);
        let first = recv.decode(&buf, false).unwrap().unwrap();
        recv.commit(&first);

        let decoded = recv.decode(&[0xC6], true).unwrap().unwrap();
        assert_eq!(decoded.header.timestamp, 500);
        assert_eq!(decoded.len, 1);
    }

    #[test]
    fn test_extended_timestamp() {
        let cur = Header::new(4, 1, MSG_VIDEO, 0x0100_0000, 10);
        let mut send = HeaderCache::new();
        let mut buf = BytesMut::new();
        send.encode(&cur, HeaderClass::Full, &mut buf);
        assert_eq!(buf.len(), 12 + 4);
        assert_eq!(&buf[1..4], &[0xFF, 0xFF, 0xFF]);

        let mut cont = BytesMut::new();
        send.encode_continuation(4, &mut cont);
        assert_eq!(cont.len(), 5);

        let mut recv = HeaderCache::new();
        let decoded = recv.decode(&buf, false).unwrap().unwrap();
        assert_eq!(decoded.header, cur);
        recv.commit(&decoded);

        let decoded = recv.decode(&cont, true).unwrap().unwrap();
        assert_eq!(decoded.len, 5);
        assert_eq!(decoded.header.timestamp, 0x0100_0000);

        // Extended channels never collapse to the 1-byte class
        assert_eq!(send.diff(&Header { timestamp: 0x0200_0000, ..cur }), HeaderClass::Small);
    }

    #[test]
    fn test_extended_channel_ids() {
        for channel in [64u32, 319, 320, 65599] {
            let cur = Header::new(channel, 1, MSG_AUDIO, 5, 3);
            assert_eq!(roundtrip(None, cur), HeaderClass::Full);
        }
    }

    #[test]
    fn test_short_input_waits() {
        let mut send = HeaderCache::new();
        let mut buf = BytesMut::new();
        send.encode(&Header::new(3, 0, MSG_COMMAND_AMF0, 7, 99), HeaderClass::Full, &mut buf);

        let recv = HeaderCache::new();
        for cut in 0..buf.len() {
            assert_eq!(recv.decode(&buf[..cut], false), Ok(None));
        }
    }

    #[test]
    fn test_compressed_header_without_context() {
        let recv = HeaderCache::new();
        assert_eq!(
            recv.decode(&[0x85, 0, 0, 1], false),
            Err(ProtocolError::MissingHeaderContext(5))
        );
        assert_eq!(
            recv.decode(&[0xC5], false),
            Err(ProtocolError::MissingHeaderContext(5))
        );
    }

    #[test]
    fn test_timestamp_wraps() {
        let prev = Header::new(4, 1, MSG_AUDIO, 0xFFFF_FFF0, 10);
        let cur = Header { timestamp: 0x10, ..prev };
        // Absolute 0xFFFFFFF0 needs the extended field, which rules out 1 byte
        assert_eq!(roundtrip(Some(prev), cur), HeaderClass::Small);
    }
}
