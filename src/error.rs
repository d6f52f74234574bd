//! Unified error types for rtmp-play

use std::io;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all client operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error on the transport
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Wire protocol violation
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// AMF encoding/decoding error
    #[error("AMF error: {0}")]
    Amf(#[from] AmfError),

    /// Handshake failure
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Media decoding error
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// The target URL uses a scheme this client cannot speak
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// The target URL is malformed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Connection rejected by the server
    #[error("Connection rejected: {0}")]
    Rejected(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Connection was closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Protocol-level errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid chunk header")]
    InvalidChunkHeader,
    #[error("Truncated {0} payload")]
    Truncated(&'static str),
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: u32, max: u32 },
    #[error("Invalid chunk stream ID: {0}")]
    InvalidChunkStreamId(u32),
    #[error("Compressed header on channel {0} with no cached header")]
    MissingHeaderContext(u32),
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),
    #[error("Stale reply for invoke id {0}")]
    StaleReply(u32),
    #[error("Stream not found: {0}")]
    StreamNotFound(u32),
    #[error("No free channel IDs")]
    ChannelsExhausted,
    #[error("No invoke IDs left on this connection")]
    InvokeIdsExhausted,
}

/// AMF encoding/decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmfError {
    #[error("Unknown AMF marker: 0x{0:02x}")]
    UnknownMarker(u8),
    #[error("Unexpected end of AMF data")]
    UnexpectedEof,
    #[error("Invalid UTF-8 in AMF string")]
    InvalidUtf8,
    #[error("Invalid AMF reference: {0}")]
    InvalidReference(u16),
    #[error("AMF nesting too deep")]
    NestingTooDeep,
    #[error("Invalid object end marker")]
    InvalidObjectEnd,
    #[error("Expected {expected}, found {found}")]
    UnexpectedType {
        expected: &'static str,
        found: &'static str,
    },
}

/// Handshake-specific errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("Invalid RTMP version: {0}")]
    InvalidVersion(u8),
    #[error("Handshake echo mismatch")]
    EchoMismatch,
    #[error("Invalid handshake state")]
    InvalidState,
}

/// Media decoding errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("Empty media packet")]
    EmptyPacket,
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("Decoder failure: {0}")]
    DecoderFailure(String),
}

impl Error {
    /// Whether this error ends the connection it occurred on
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Amf(_) | Error::Media(_) => false,
            Error::Protocol(e) => matches!(
                e,
                ProtocolError::MessageTooLarge { .. } | ProtocolError::InvalidChunkStreamId(_)
            ),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn test_error_display() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("I/O error"));

        let err = Error::Protocol(ProtocolError::InvalidChunkHeader);
        assert!(err.to_string().contains("Protocol error"));
        assert!(err.to_string().contains("Invalid chunk header"));

        let err = Error::Amf(AmfError::UnknownMarker(0xFF));
        assert!(err.to_string().contains("0xff"));

        let err = Error::Handshake(HandshakeError::InvalidVersion(5));
        assert!(err.to_string().contains("Handshake error"));
        assert!(err.to_string().contains('5'));

        let err = Error::UnsupportedScheme("rtmpt".into());
        assert!(err.to_string().contains("Unsupported scheme"));
        assert!(err.to_string().contains("rtmpt"));
    }

    #[test]
    fn test_error_source() {
        let err = Error::Io(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(StdError::source(&err).is_some());

        let err = Error::Timeout;
        assert!(StdError::source(&err).is_none());
    }

    #[test]
    fn test_from_conversions() {
        let err: Error = ProtocolError::MessageTooLarge { size: 100, max: 50 }.into();
        assert!(matches!(err, Error::Protocol(_)));

        let err: Error = AmfError::UnexpectedEof.into();
        assert!(matches!(err, Error::Amf(_)));

        let err: Error = HandshakeError::EchoMismatch.into();
        assert!(matches!(err, Error::Handshake(_)));
    }

    #[test]
    fn test_fatality() {
        assert!(Error::Handshake(HandshakeError::EchoMismatch).is_fatal());
        assert!(!Error::Amf(AmfError::UnexpectedEof).is_fatal());
        assert!(!Error::Protocol(ProtocolError::StaleReply(4)).is_fatal());
        assert!(Error::Protocol(ProtocolError::MessageTooLarge { size: 1, max: 0 }).is_fatal());
    }
}
