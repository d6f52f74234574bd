//! AMF (Action Message Format) implementation
//!
//! AMF0 is the binary serialization format used in RTMP for encoding
//! command parameters and metadata. Only AMF0 is implemented; values that
//! switch to AMF3 are rejected as unknown markers.

pub mod amf0;
pub mod value;

pub use amf0::{Amf0Decoder, Amf0Encoder};
pub use value::{AmfObject, AmfValue};
