//! Logical channels multiplexed over one connection
//!
//! A channel owns both header caches for its ID, the queue of messages
//! waiting to go out and at most one partially received message.

use std::collections::VecDeque;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::protocol::constants::MAX_MESSAGE_SIZE;
use crate::protocol::header::{peek_basic_header, Header, HeaderCache, HeaderClass};

/// A complete message (reassembled from chunks, or queued for sending)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub payload: Bytes,
}

/// Message waiting in the outbound queue
///
/// The header is only built when the first chunk goes out, so messages
/// queued before the channel learns its stream ID carry the final one.
#[derive(Debug)]
struct OutboundMessage {
    message_type: u8,
    timestamp: u32,
    payload: Bytes,
    /// Bytes of the payload already written
    offset: usize,
    /// Header used for the first chunk, set once sending started
    header: Option<Header>,
}

/// Message being reassembled
#[derive(Debug)]
struct InboundMessage {
    header: Header,
    payload: BytesMut,
    /// Payload bytes read so far, kept or not
    received: usize,
    /// Remaining chunks are consumed but their payload thrown away
    abandoned: bool,
}

/// Result of writing one chunk
#[derive(Debug)]
pub struct ChunkWritten {
    /// Payload bytes carried by the chunk
    pub payload_len: usize,
    /// The message, if this chunk was its last
    pub completed: Option<Message>,
}

/// Result of reading one chunk
#[derive(Debug)]
pub enum ChunkRead {
    /// Chunk consumed, message still incomplete
    Partial,
    /// Chunk completed a message
    Complete(Message),
    /// Chunk consumed and thrown away
    Dropped(ProtocolError),
    /// Chunk finished a message that was abandoned mid-way
    Abandoned(Header),
}

/// One chunk stream
#[derive(Debug)]
pub struct Channel {
    id: u32,
    stream_id: u32,
    send_cache: HeaderCache,
    recv_cache: HeaderCache,
    outbound: VecDeque<OutboundMessage>,
    in_flight: Option<InboundMessage>,
}

impl Channel {
    pub fn new(id: u32, stream_id: u32) -> Self {
        Self {
            id,
            stream_id,
            send_cache: HeaderCache::new(),
            recv_cache: HeaderCache::new(),
            outbound: VecDeque::new(),
            in_flight: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    pub fn set_stream_id(&mut self, stream_id: u32) {
        self.stream_id = stream_id;
    }

    /// Queue a message for sending
    pub fn enqueue(&mut self, message_type: u8, timestamp: u32, payload: Bytes) {
        self.outbound.push_back(OutboundMessage {
            message_type,
            timestamp,
            payload,
            offset: 0,
            header: None,
        });
    }

    pub fn has_pending(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Payload bytes still waiting to be written
    pub fn queued_bytes(&self) -> usize {
        self.outbound
            .iter()
            .map(|m| m.payload.len() - m.offset)
            .sum()
    }

    pub fn has_partial_inbound(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Write the next chunk of the head message, if any
    ///
    /// The first chunk of a message carries a header of at least 4 bytes
    /// chosen against the send cache; later chunks use the 1-byte form.
    pub fn write_chunk(&mut self, chunk_size: u32, out: &mut BytesMut) -> Option<ChunkWritten> {
        let msg = self.outbound.front_mut()?;

        match msg.header {
            None => {
                let header = Header::new(
                    self.id,
                    self.stream_id,
                    msg.message_type,
                    msg.timestamp,
                    msg.payload.len() as u32,
                );
                let class = self.send_cache.diff(&header).min(HeaderClass::Small);
                self.send_cache.encode(&header, class, out);
                msg.header = Some(header);
            }
            Some(_) => self.send_cache.encode_continuation(self.id, out),
        }

        let take = (msg.payload.len() - msg.offset).min(chunk_size as usize);
        out.put_slice(&msg.payload[msg.offset..msg.offset + take]);
        msg.offset += take;

        let completed = if msg.offset == msg.payload.len() {
            self.outbound.pop_front().and_then(|m| {
                m.header.map(|header| Message {
                    header,
                    payload: m.payload,
                })
            })
        } else {
            None
        };

        Some(ChunkWritten {
            payload_len: take,
            completed,
        })
    }

    /// Read one chunk addressed to this channel from the front of `buf`
    ///
    /// Nothing is consumed until the header and the chunk's payload bytes
    /// are all present; `Ok(None)` means more bytes are needed. Errors are
    /// fatal for the connection.
    pub fn read_chunk(
        &mut self,
        buf: &mut BytesMut,
        chunk_size: u32,
    ) -> Result<Option<ChunkRead>, ProtocolError> {
        let in_flight = self.in_flight.is_some();
        let decoded = match self.recv_cache.decode(buf, in_flight) {
            Ok(Some(d)) => d,
            Ok(None) => return Ok(None),
            Err(ProtocolError::MissingHeaderContext(channel)) => {
                // No way to know the payload length; skip just the header
                let skip = match peek_basic_header(buf) {
                    Some(b) => b.len + b.class.message_header_len(),
                    None => return Ok(None),
                };
                buf.advance(skip);
                return Ok(Some(ChunkRead::Dropped(
                    ProtocolError::MissingHeaderContext(channel),
                )));
            }
            Err(e) => return Err(e),
        };

        if decoded.header.size > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: decoded.header.size,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let continues = in_flight && decoded.class == HeaderClass::Continuation;
        let received = match (&self.in_flight, continues) {
            (Some(partial), true) => partial.received,
            _ => 0,
        };
        let remaining = decoded.header.size as usize - received;
        let take = remaining.min(chunk_size as usize);
        if buf.len() < decoded.len + take {
            return Ok(None);
        }

        if in_flight && !continues {
            if let Some(stale) = self.in_flight.take() {
                tracing::warn!(
                    channel = self.id,
                    received = stale.received,
                    declared = stale.header.size,
                    "New header mid-message, discarding partial message"
                );
            }
        }

        self.recv_cache.commit(&decoded);
        buf.advance(decoded.len);
        let chunk = buf.split_to(take);

        let partial = self.in_flight.get_or_insert_with(|| InboundMessage {
            header: decoded.header,
            payload: BytesMut::with_capacity(decoded.header.size as usize),
            received: 0,
            abandoned: false,
        });
        partial.received += take;
        if !partial.abandoned {
            partial.payload.put_slice(&chunk);
        }

        if partial.received == partial.header.size as usize {
            let done = self.in_flight.take();
            Ok(done.map(|m| match m.abandoned {
                true => ChunkRead::Abandoned(m.header),
                false => ChunkRead::Complete(Message {
                    header: m.header,
                    payload: m.payload.freeze(),
                }),
            }))
        } else {
            Ok(Some(ChunkRead::Partial))
        }
    }

    /// Drop the partially received message (Abort message)
    pub fn abort_inbound(&mut self) {
        self.in_flight = None;
    }

    /// Give up on a partial message belonging to `stream_id`
    ///
    /// The peer still sends the rest of it, so the chunks keep being
    /// consumed against the receive cache; only the payload is dropped.
    /// Returns whether a message was abandoned.
    pub fn abandon_inbound(&mut self, stream_id: u32) -> bool {
        match self.in_flight.as_mut() {
            Some(partial) if partial.header.stream_id == stream_id && !partial.abandoned => {
                partial.abandoned = true;
                partial.payload = BytesMut::new();
                true
            }
            _ => false,
        }
    }

    /// Forget everything on the sending side: queued messages and the
    /// send header cache. Receive state belongs to the peer and stays.
    pub fn reset_send(&mut self, stream_id: u32) {
        self.outbound.clear();
        self.send_cache = HeaderCache::new();
        self.stream_id = stream_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;

    fn drain(channel: &mut Channel, chunk_size: u32) -> (BytesMut, Vec<usize>) {
        let mut out = BytesMut::new();
        let mut sizes = Vec::new();
        while let Some(w) = channel.write_chunk(chunk_size, &mut out) {
            sizes.push(w.payload_len);
        }
        (out, sizes)
    }

    #[test]
    fn test_split_and_reassemble() {
        for chunk_size in [1u32, 7, 64, 128, 4096] {
            for len in [0usize, 1, 63, 64, 65, 200, 1000] {
                let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
                let mut tx = Channel::new(5, 1);
                tx.enqueue(MSG_VIDEO, 40, Bytes::from(payload.clone()));

                let (mut wire, sizes) = drain(&mut tx, chunk_size);
                let expected_chunks = if len == 0 { 1 } else { (len + chunk_size as usize - 1) / chunk_size as usize };
                assert_eq!(sizes.len(), expected_chunks);

                let mut rx = Channel::new(5, 1);
                let mut complete = None;
                while !wire.is_empty() {
                    match rx.read_chunk(&mut wire, chunk_size).unwrap().unwrap() {
                        ChunkRead::Complete(m) => complete = Some(m),
                        ChunkRead::Partial => {}
                        ChunkRead::Dropped(e) => panic!("dropped: {}", e),
                        ChunkRead::Abandoned(h) => panic!("abandoned: {:?}", h),
                    }
                }
                let msg = complete.expect("message completes");
                assert_eq!(&msg.payload[..], &payload[..]);
                assert_eq!(msg.header.timestamp, 40);
                assert_eq!(msg.header.stream_id, 1);
            }
        }
    }

    #[test]
    fn test_only_first_chunk_has_full_header() {
        let mut tx = Channel::new(4, 1);
        tx.enqueue(MSG_COMMAND_AMF0, 0, Bytes::from(vec![0xAB; 200]));
        let (wire, sizes) = drain(&mut tx, 64);
        assert_eq!(sizes, [64, 64, 64, 8]);
        // 12 + 64, then 1 + 64 three times (last carrying 8)
        assert_eq!(wire.len(), 12 + 64 + (1 + 64) * 2 + 1 + 8);
        assert_eq!(wire[0] >> 6, 0);
        assert_eq!(wire[12 + 64], 0xC4);
    }

    #[test]
    fn test_second_message_never_uses_one_byte_header() {
        let mut tx = Channel::new(3, 0);
        tx.enqueue(MSG_COMMAND_AMF0, 0, Bytes::from_static(b"abc"));
        tx.enqueue(MSG_COMMAND_AMF0, 0, Bytes::from_static(b"abc"));
        let (wire, _) = drain(&mut tx, 128);
        // Second header compresses to the 4-byte class
        assert_eq!(wire.len(), (12 + 3) + (4 + 3));
        assert_eq!(wire[15] >> 6, 2);
    }

    #[test]
    fn test_stream_id_assigned_after_enqueue() {
        let mut tx = Channel::new(8, 0);
        tx.enqueue(MSG_COMMAND_AMF0, 0, Bytes::from_static(b"x"));
        tx.set_stream_id(7);
        let mut out = BytesMut::new();
        let written = tx.write_chunk(128, &mut out).unwrap();
        assert_eq!(written.completed.unwrap().header.stream_id, 7);
    }

    #[test]
    fn test_waits_for_whole_chunk() {
        let mut tx = Channel::new(4, 1);
        tx.enqueue(MSG_AUDIO, 0, Bytes::from(vec![1u8; 50]));
        let (wire, _) = drain(&mut tx, 128);

        let mut rx = Channel::new(4, 1);
        for cut in 0..wire.len() {
            let mut partial = BytesMut::from(&wire[..cut]);
            assert!(rx.read_chunk(&mut partial, 128).unwrap().is_none());
            assert_eq!(partial.len(), cut, "nothing consumed");
        }
        assert!(!rx.has_partial_inbound());
    }

    #[test]
    fn test_new_header_mid_message_discards_partial() {
        let mut tx = Channel::new(4, 1);
        tx.enqueue(MSG_VIDEO, 0, Bytes::from(vec![1u8; 300]));
        let mut wire = BytesMut::new();
        tx.write_chunk(128, &mut wire).unwrap();

        let mut rx = Channel::new(4, 1);
        assert!(matches!(
            rx.read_chunk(&mut wire, 128).unwrap(),
            Some(ChunkRead::Partial)
        ));
        assert!(rx.has_partial_inbound());

        // Fresh full header for a small message on the same channel
        let mut other = Channel::new(4, 1);
        other.enqueue(MSG_AUDIO, 10, Bytes::from_static(b"hi"));
        let mut wire = BytesMut::new();
        other.write_chunk(128, &mut wire).unwrap();

        match rx.read_chunk(&mut wire, 128).unwrap() {
            Some(ChunkRead::Complete(m)) => {
                assert_eq!(m.header.message_type, MSG_AUDIO);
                assert_eq!(&m.payload[..], b"hi");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!rx.has_partial_inbound());
    }

    #[test]
    fn test_oversized_message_is_fatal() {
        let mut wire = BytesMut::new();
        let mut cache = HeaderCache::new();
        cache.encode(
            &Header::new(4, 1, MSG_VIDEO, 0, 0xFF_FFFF),
            HeaderClass::Full,
            &mut wire,
        );
        let mut rx = Channel::new(4, 1);
        assert!(matches!(
            rx.read_chunk(&mut wire, 128),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_header_without_context_is_skipped() {
        let mut wire = BytesMut::from(&[0x84u8, 0x00, 0x00, 0x05, 0x03][..]);
        let mut rx = Channel::new(4, 1);
        assert!(matches!(
            rx.read_chunk(&mut wire, 128).unwrap(),
            Some(ChunkRead::Dropped(ProtocolError::MissingHeaderContext(4)))
        ));
        assert_eq!(&wire[..], &[0x03]);
    }

    #[test]
    fn test_reset_send_keeps_receive_cache() {
        let mut peer = Channel::new(5, 1);
        peer.enqueue(MSG_COMMAND_AMF0, 0, Bytes::from_static(b"first"));
        peer.enqueue(MSG_COMMAND_AMF0, 0, Bytes::from_static(b"other"));
        let (mut wire, _) = drain(&mut peer, 128);

        let mut ch = Channel::new(5, 1);
        assert!(matches!(ch.read_chunk(&mut wire, 128).unwrap(), Some(ChunkRead::Complete(_))));

        ch.enqueue(MSG_AUDIO, 0, Bytes::from_static(b"abc"));
        assert_eq!(ch.queued_bytes(), 3);
        ch.reset_send(0);
        assert!(!ch.has_pending());
        assert_eq!(ch.stream_id(), 0);

        // The second message arrives with a compressed header
        assert_ne!(peek_basic_header(&wire).unwrap().class, HeaderClass::Full);
        match ch.read_chunk(&mut wire, 128).unwrap() {
            Some(ChunkRead::Complete(m)) => assert_eq!(&m.payload[..], b"other"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_abandoned_message_is_consumed_but_not_delivered() {
        let mut tx = Channel::new(6, 1);
        tx.enqueue(MSG_VIDEO, 0, Bytes::from(vec![7u8; 300]));
        tx.enqueue(MSG_VIDEO, 40, Bytes::from_static(b"next"));
        let (mut wire, _) = drain(&mut tx, 128);

        let mut rx = Channel::new(6, 0);
        assert!(matches!(rx.read_chunk(&mut wire, 128).unwrap(), Some(ChunkRead::Partial)));
        assert!(!rx.abandon_inbound(2));
        assert!(rx.abandon_inbound(1));

        assert!(matches!(rx.read_chunk(&mut wire, 128).unwrap(), Some(ChunkRead::Partial)));
        match rx.read_chunk(&mut wire, 128).unwrap() {
            Some(ChunkRead::Abandoned(header)) => assert_eq!(header.size, 300),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!rx.has_partial_inbound());

        // Framing survived: the following message decodes normally
        match rx.read_chunk(&mut wire, 128).unwrap() {
            Some(ChunkRead::Complete(m)) => {
                assert_eq!(m.header.timestamp, 40);
                assert_eq!(&m.payload[..], b"next");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(wire.is_empty());
    }
}
