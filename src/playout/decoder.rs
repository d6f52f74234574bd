//! Decoder seam
//!
//! Actual audio/video decoding lives outside this crate. A decoder takes
//! one coded payload and may produce one decoded buffer.

use bytes::Bytes;

use crate::error::MediaError;
use crate::media::CodecTag;

/// Decodes payloads of one codec
pub trait MediaDecoder: Send {
    /// Decode one payload; `Ok(None)` means no output yet (e.g. configuration data)
    fn decode(&mut self, payload: &Bytes) -> Result<Option<Bytes>, MediaError>;
}

/// Creates decoders when the codec of a stream changes
pub trait DecoderFactory: Send + Sync {
    fn create(&self, codec: CodecTag) -> Result<Box<dyn MediaDecoder>, MediaError>;
}

/// Hands every payload through unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDecoder;

impl MediaDecoder for PassthroughDecoder {
    fn decode(&mut self, payload: &Bytes) -> Result<Option<Bytes>, MediaError> {
        Ok(Some(payload.clone()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDecoderFactory;

impl DecoderFactory for PassthroughDecoderFactory {
    fn create(&self, _codec: CodecTag) -> Result<Box<dyn MediaDecoder>, MediaError> {
        Ok(Box::new(PassthroughDecoder))
    }
}
