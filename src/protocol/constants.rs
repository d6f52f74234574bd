//! RTMP protocol constants
//!
//! Reference: Adobe RTMP Specification (December 2012)

/// RTMP version number (always 3 for plain RTMP)
pub const RTMP_VERSION: u8 = 3;

/// Default RTMP port
pub const RTMP_PORT: u16 = 1935;

/// Handshake packet size (C1/S1/C2/S2)
pub const HANDSHAKE_SIZE: usize = 1536;

/// Bytes that must be buffered before the server reply can be checked:
/// S0 + S1 + S2
pub const HANDSHAKE_REPLY_SIZE: usize = 1 + HANDSHAKE_SIZE * 2;

/// Default chunk size before either side negotiates one
pub const DEFAULT_CHUNK_SIZE: u32 = 128;

/// Maximum chunk size allowed
pub const MAX_CHUNK_SIZE: u32 = 0xFFFFFF;

/// Maximum message size (sanity limit, below the 24-bit wire maximum)
pub const MAX_MESSAGE_SIZE: u32 = 8 * 1024 * 1024; // 8MB

/// Timestamps >= this value are carried in an extended timestamp field
pub const EXTENDED_TIMESTAMP_THRESHOLD: u32 = 0xFFFFFF;

// ============================================================================
// Channel IDs (chunk stream IDs)
// ============================================================================

/// Protocol control messages (chunk size, bandwidth, ping)
pub const CHANNEL_CONTROL: u32 = 2;

/// Connection-level remote calls (connect, createStream, ...)
pub const CHANNEL_COMMAND: u32 = 3;

/// First channel ID handed out to streams
pub const FIRST_STREAM_CHANNEL: u32 = 4;

/// Largest channel ID that fits the one-byte basic header
pub const MAX_SHORT_CHANNEL: u32 = 63;

/// Largest channel ID expressible at all (three-byte basic header)
pub const MAX_CHANNEL: u32 = 65599;

// ============================================================================
// Message Type IDs
// ============================================================================

/// Set Chunk Size (1)
pub const MSG_SET_CHUNK_SIZE: u8 = 1;

/// Abort Message (2)
pub const MSG_ABORT: u8 = 2;

/// Acknowledgement (3)
pub const MSG_ACKNOWLEDGEMENT: u8 = 3;

/// User Control / ping (4)
pub const MSG_USER_CONTROL: u8 = 4;

/// Server bandwidth, a.k.a. Window Acknowledgement Size (5)
pub const MSG_SERVER_BANDWIDTH: u8 = 5;

/// Client bandwidth, a.k.a. Set Peer Bandwidth (6)
pub const MSG_CLIENT_BANDWIDTH: u8 = 6;

/// Audio Message (8)
pub const MSG_AUDIO: u8 = 8;

/// Video Message (9)
pub const MSG_VIDEO: u8 = 9;

/// AMF0 Data Message (18) - onMetaData and friends
pub const MSG_DATA_AMF0: u8 = 18;

/// AMF0 Command Message (20) - remote calls and replies
pub const MSG_COMMAND_AMF0: u8 = 20;

// ============================================================================
// User Control Event Types
// ============================================================================

pub const UC_STREAM_BEGIN: u16 = 0;
pub const UC_STREAM_EOF: u16 = 1;
pub const UC_STREAM_DRY: u16 = 2;
pub const UC_SET_BUFFER_LENGTH: u16 = 3;
pub const UC_STREAM_IS_RECORDED: u16 = 4;
pub const UC_PING_REQUEST: u16 = 6;
pub const UC_PING_RESPONSE: u16 = 7;

// ============================================================================
// Command Names
// ============================================================================

pub const CMD_CONNECT: &str = "connect";
pub const CMD_CLOSE: &str = "close";
pub const CMD_CREATE_STREAM: &str = "createStream";
pub const CMD_DELETE_STREAM: &str = "deleteStream";
pub const CMD_CLOSE_STREAM: &str = "closeStream";
pub const CMD_PLAY: &str = "play";
pub const CMD_PUBLISH: &str = "publish";
pub const CMD_PAUSE: &str = "pause";
pub const CMD_SEEK: &str = "seek";
pub const CMD_RECEIVE_AUDIO: &str = "receiveAudio";
pub const CMD_RECEIVE_VIDEO: &str = "receiveVideo";

/// Reply markers
pub const CMD_RESULT: &str = "_result";
pub const CMD_ERROR: &str = "_error";

/// Status notification
pub const CMD_ON_STATUS: &str = "onStatus";

/// Data handler names
pub const CMD_ON_METADATA: &str = "onMetaData";
pub const CMD_SET_DATA_FRAME: &str = "@setDataFrame";

// ============================================================================
// Status Codes
// ============================================================================

pub const NC_CONNECT_SUCCESS: &str = "NetConnection.Connect.Success";
pub const NC_CONNECT_REJECTED: &str = "NetConnection.Connect.Rejected";
pub const NC_CONNECT_FAILED: &str = "NetConnection.Connect.Failed";
pub const NC_CONNECT_CLOSED: &str = "NetConnection.Connect.Closed";

pub const NS_PLAY_START: &str = "NetStream.Play.Start";
pub const NS_PLAY_STOP: &str = "NetStream.Play.Stop";
pub const NS_SEEK_NOTIFY: &str = "NetStream.Seek.Notify";
pub const NS_BUFFER_EMPTY: &str = "NetStream.Buffer.Empty";
pub const NS_BUFFER_FULL: &str = "NetStream.Buffer.Full";

// ============================================================================
// Client defaults
// ============================================================================

/// Default flash version string sent with connect
pub const DEFAULT_FLASH_VER: &str = "LNX 9,0,124,2";

/// Default buffer length reported to the server, in milliseconds
pub const DEFAULT_BUFFER_LENGTH: u32 = 1000;

/// Default playout buffer threshold in milliseconds
pub const DEFAULT_PLAYOUT_THRESHOLD_MS: u64 = 100;

// ============================================================================
// Chunk Header Format Types (fmt field)
// ============================================================================

/// Type 0: Full header - timestamp, length, type, stream ID
pub const CHUNK_FMT_0: u8 = 0;

/// Type 1: No stream ID - timestamp delta, length, type
pub const CHUNK_FMT_1: u8 = 1;

/// Type 2: Timestamp delta only
pub const CHUNK_FMT_2: u8 = 2;

/// Type 3: No header - use previous chunk's values
pub const CHUNK_FMT_3: u8 = 3;
