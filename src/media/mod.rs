//! Media payload helpers
//!
//! The client does not decode media itself; it only reads enough of each
//! FLV-style tag body to route it to the right decoder.

pub mod flv;

pub use flv::{AudioFormat, CodecTag, MediaKind, MediaPacket, VideoCodec, VideoFrameType};
