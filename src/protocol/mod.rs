//! RTMP wire protocol implementation
//!
//! This module handles the low-level protocol details:
//! - Handshake (C0C1/S0S1S2/C2 exchange)
//! - Chunk header compression
//! - Channel multiplexing and reassembly
//! - Control and command message framing

pub mod channel;
pub mod constants;
pub mod handshake;
pub mod header;
pub mod message;

pub use channel::{Channel, ChunkRead, ChunkWritten, Message};
pub use handshake::{Handshake, HandshakeState};
pub use header::{Header, HeaderCache, HeaderClass};
pub use message::{Command, ControlMessage, DataMessage, StatusInfo, UserControlEvent};
