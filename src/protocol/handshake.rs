//! RTMP client handshake
//!
//! ```text
//! Client                                   Server
//!   |                                        |
//!   |------- C0 (1 byte: version) --------->|
//!   |------- C1 (1536 bytes: time+random) ->|
//!   |                                        |
//!   |<------ S0 (1 byte: version) ----------|
//!   |<------ S1 (1536 bytes: time+random) --|
//!   |<------ S2 (1536 bytes: echo C1) ------|
//!   |                                        |
//!   |------- C2 (1536 bytes: echo S1) ----->|
//!   |                                        |
//!   |          [Handshake Complete]          |
//! ```
//!
//! Only the "simple" handshake is spoken (no HMAC digest). The check is
//! strict: S0 must carry version 3 and S2 must reproduce C1 byte for byte.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::clock::Clock;
use crate::error::HandshakeError;
use crate::protocol::constants::{HANDSHAKE_REPLY_SIZE, HANDSHAKE_SIZE, RTMP_VERSION};

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent yet
    Start,
    /// C0C1 produced, waiting for S0S1S2
    SentInitial,
    /// S2 matched, C2 produced
    Validated,
    /// Bad version or echo mismatch
    Failed,
}

/// Client side handshake engine
#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    /// Our C1 packet, kept for comparison with S2
    sent: Option<Box<[u8; HANDSHAKE_SIZE]>>,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Start,
            sent: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == HandshakeState::Validated
    }

    /// Bytes that must be buffered before [`process`](Self::process) can move on
    pub fn bytes_needed(&self) -> usize {
        match self.state {
            HandshakeState::SentInitial => HANDSHAKE_REPLY_SIZE,
            _ => 0,
        }
    }

    /// Produce C0 + C1
    ///
    /// The time field is read from the connection clock and seeds the
    /// filler bytes, so the packet is reproducible for a given clock.
    pub fn generate_initial(&mut self, clock: &Arc<dyn Clock>) -> Option<Bytes> {
        if self.state != HandshakeState::Start {
            return None;
        }

        let c1 = generate_packet(clock.now_ms());
        let mut buf = BytesMut::with_capacity(1 + HANDSHAKE_SIZE);
        buf.put_u8(RTMP_VERSION);
        buf.put_slice(&c1[..]);

        self.sent = Some(c1);
        self.state = HandshakeState::SentInitial;
        tracing::debug!(time = clock.now_ms(), "Handshake C0C1 generated");
        Some(buf.freeze())
    }

    /// Check S0S1S2 from the front of `data`
    ///
    /// Returns `Ok(None)` until the whole reply is buffered; nothing is
    /// consumed in that case. On success the reply is consumed, C2 is
    /// returned and the retained C1 is released.
    pub fn process(&mut self, data: &mut BytesMut) -> Result<Option<Bytes>, HandshakeError> {
        if self.state != HandshakeState::SentInitial {
            return Err(HandshakeError::InvalidState);
        }
        if data.len() < HANDSHAKE_REPLY_SIZE {
            return Ok(None);
        }

        let version = data.get_u8();
        if version != RTMP_VERSION {
            self.fail();
            return Err(HandshakeError::InvalidVersion(version));
        }

        // C2 is S1 echoed verbatim
        let c2 = data.split_to(HANDSHAKE_SIZE).freeze();
        let s2 = data.split_to(HANDSHAKE_SIZE);

        let matches = self
            .sent
            .as_ref()
            .map(|c1| c1[..] == s2[..])
            .unwrap_or(false);
        if !matches {
            self.fail();
            return Err(HandshakeError::EchoMismatch);
        }

        self.sent = None;
        self.state = HandshakeState::Validated;
        Ok(Some(c2))
    }

    /// Release retained buffers without completing
    pub fn abandon(&mut self) {
        self.sent = None;
        if self.state != HandshakeState::Validated {
            self.state = HandshakeState::Failed;
        }
    }

    fn fail(&mut self) {
        self.sent = None;
        self.state = HandshakeState::Failed;
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a C1 packet
///
/// Format (1536 bytes):
/// - Bytes 0-3: Time (32-bit, big-endian)
/// - Bytes 4-7: Zero
/// - Bytes 8-1535: Filler from an LCG seeded with the time
fn generate_packet(time: u32) -> Box<[u8; HANDSHAKE_SIZE]> {
    let mut packet = Box::new([0u8; HANDSHAKE_SIZE]);
    packet[0..4].copy_from_slice(&time.to_be_bytes());

    let mut seed = time as u64;
    for chunk in packet[8..].chunks_mut(8) {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = seed.to_le_bytes();
        let len = chunk.len();
        chunk.copy_from_slice(&bytes[..len]);
    }

    packet
}
