//! FLV-style audio/video payload headers
//!
//! Each RTMP audio/video message body is an FLV tag body: its first byte
//! names the codec, which is all the client needs to pick a decoder.
//!
//! RTMP Video Data:
//! ```text
//! +----------+----------+
//! | FrameType| CodecID  | CodecData...
//! | (4 bits) | (4 bits) |
//! +----------+----------+
//! ```
//!
//! RTMP Audio Data:
//! ```text
//! +----------+----------+----------+----------+
//! |SoundFormat|SoundRate|SoundSize |SoundType | AudioData...
//! | (4 bits)  | (2 bits)| (1 bit)  | (1 bit)  |
//! +----------+----------+----------+----------+
//! ```

use std::fmt;

use bytes::Bytes;

use crate::error::MediaError;
use crate::protocol::constants::{MSG_AUDIO, MSG_VIDEO};

/// Which half of a stream a packet belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn from_message_type(message_type: u8) -> Option<Self> {
        match message_type {
            MSG_AUDIO => Some(MediaKind::Audio),
            MSG_VIDEO => Some(MediaKind::Video),
            _ => None,
        }
    }

    pub fn message_type(self) -> u8 {
        match self {
            MediaKind::Audio => MSG_AUDIO,
            MediaKind::Video => MSG_VIDEO,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// Video frame type (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoFrameType {
    /// Keyframe (for AVC, a seekable frame)
    Keyframe = 1,
    /// Inter frame (for AVC, a non-seekable frame)
    InterFrame = 2,
    /// Disposable inter frame (H.263 only)
    DisposableInterFrame = 3,
    /// Generated keyframe (reserved for server use)
    GeneratedKeyframe = 4,
    /// Video info/command frame
    VideoInfoFrame = 5,
}

impl VideoFrameType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            1 => Some(VideoFrameType::Keyframe),
            2 => Some(VideoFrameType::InterFrame),
            3 => Some(VideoFrameType::DisposableInterFrame),
            4 => Some(VideoFrameType::GeneratedKeyframe),
            5 => Some(VideoFrameType::VideoInfoFrame),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, VideoFrameType::Keyframe | VideoFrameType::GeneratedKeyframe)
    }
}

/// Video codec ID (lower 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    /// Sorenson H.263
    SorensonH263 = 2,
    /// Screen video
    ScreenVideo = 3,
    /// VP6
    Vp6 = 4,
    /// VP6 with alpha
    Vp6Alpha = 5,
    /// Screen video v2
    ScreenVideoV2 = 6,
    /// AVC (H.264)
    Avc = 7,
}

impl VideoCodec {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x0F {
            2 => Some(VideoCodec::SorensonH263),
            3 => Some(VideoCodec::ScreenVideo),
            4 => Some(VideoCodec::Vp6),
            5 => Some(VideoCodec::Vp6Alpha),
            6 => Some(VideoCodec::ScreenVideoV2),
            7 => Some(VideoCodec::Avc),
            _ => None,
        }
    }
}

/// Audio format (upper 4 bits of first byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// Linear PCM, platform endian
    LinearPcmPlatform = 0,
    /// ADPCM
    Adpcm = 1,
    /// MP3
    Mp3 = 2,
    /// Linear PCM, little endian
    LinearPcmLe = 3,
    /// Nellymoser 16kHz mono
    Nellymoser16kMono = 4,
    /// Nellymoser 8kHz mono
    Nellymoser8kMono = 5,
    /// Nellymoser
    Nellymoser = 6,
    /// G.711 A-law
    G711ALaw = 7,
    /// G.711 mu-law
    G711MuLaw = 8,
    /// AAC
    Aac = 10,
    /// Speex
    Speex = 11,
    /// MP3 8kHz
    Mp38k = 14,
    /// Device-specific sound
    DeviceSpecific = 15,
}

impl AudioFormat {
    pub fn from_byte(b: u8) -> Option<Self> {
        match (b >> 4) & 0x0F {
            0 => Some(AudioFormat::LinearPcmPlatform),
            1 => Some(AudioFormat::Adpcm),
            2 => Some(AudioFormat::Mp3),
            3 => Some(AudioFormat::LinearPcmLe),
            4 => Some(AudioFormat::Nellymoser16kMono),
            5 => Some(AudioFormat::Nellymoser8kMono),
            6 => Some(AudioFormat::Nellymoser),
            7 => Some(AudioFormat::G711ALaw),
            8 => Some(AudioFormat::G711MuLaw),
            10 => Some(AudioFormat::Aac),
            11 => Some(AudioFormat::Speex),
            14 => Some(AudioFormat::Mp38k),
            15 => Some(AudioFormat::DeviceSpecific),
            _ => None,
        }
    }
}

/// Audio sample rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSampleRate {
    Rate5512 = 0,
    Rate11025 = 1,
    Rate22050 = 2,
    Rate44100 = 3,
}

impl AudioSampleRate {
    pub fn from_byte(b: u8) -> Self {
        match (b >> 2) & 0x03 {
            0 => AudioSampleRate::Rate5512,
            1 => AudioSampleRate::Rate11025,
            2 => AudioSampleRate::Rate22050,
            _ => AudioSampleRate::Rate44100,
        }
    }

    pub fn to_hz(&self) -> u32 {
        match self {
            AudioSampleRate::Rate5512 => 5512,
            AudioSampleRate::Rate11025 => 11025,
            AudioSampleRate::Rate22050 => 22050,
            AudioSampleRate::Rate44100 => 44100,
        }
    }
}

/// Codec identity of a packet: kind plus the 4-bit codec/format ID
///
/// Two packets need the same decoder exactly when their tags are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodecTag {
    pub kind: MediaKind,
    pub id: u8,
}

impl CodecTag {
    /// Read the tag from the first payload byte
    pub fn from_payload(kind: MediaKind, data: &[u8]) -> Result<Self, MediaError> {
        let first = *data.first().ok_or(MediaError::EmptyPacket)?;
        let id = match kind {
            MediaKind::Audio => (first >> 4) & 0x0F,
            MediaKind::Video => first & 0x0F,
        };
        Ok(CodecTag { kind, id })
    }

    pub fn video_codec(&self) -> Option<VideoCodec> {
        match self.kind {
            MediaKind::Video => VideoCodec::from_byte(self.id),
            MediaKind::Audio => None,
        }
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        match self.kind {
            MediaKind::Audio => AudioFormat::from_byte(self.id << 4),
            MediaKind::Video => None,
        }
    }
}

impl fmt::Display for CodecTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.video_codec(), self.audio_format()) {
            (Some(codec), _) => write!(f, "{:?}", codec),
            (_, Some(format)) => write!(f, "{:?}", format),
            _ => write!(f, "{}#{}", self.kind, self.id),
        }
    }
}

/// One audio or video message body with its timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    pub kind: MediaKind,
    /// Timestamp in milliseconds
    pub timestamp: u32,
    /// Tag body (codec headers included)
    pub data: Bytes,
}

impl MediaPacket {
    pub fn new(kind: MediaKind, timestamp: u32, data: Bytes) -> Self {
        Self {
            kind,
            timestamp,
            data,
        }
    }

    pub fn codec(&self) -> Result<CodecTag, MediaError> {
        CodecTag::from_payload(self.kind, &self.data)
    }

    /// For video packets, get the frame type
    pub fn video_frame_type(&self) -> Option<VideoFrameType> {
        match (self.kind, self.data.first()) {
            (MediaKind::Video, Some(&b)) => VideoFrameType::from_byte(b),
            _ => None,
        }
    }

    pub fn is_keyframe(&self) -> bool {
        self.video_frame_type()
            .map(|ft| ft.is_keyframe())
            .unwrap_or(false)
    }

    /// AVC or AAC sequence header (decoder configuration, not a frame)
    pub fn is_sequence_header(&self) -> bool {
        if self.data.len() < 2 || self.data[1] != 0 {
            return false;
        }
        match self.kind {
            MediaKind::Video => VideoCodec::from_byte(self.data[0]) == Some(VideoCodec::Avc),
            MediaKind::Audio => AudioFormat::from_byte(self.data[0]) == Some(AudioFormat::Aac),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_frame_type() {
        // Keyframe + AVC
        assert_eq!(VideoFrameType::from_byte(0x17), Some(VideoFrameType::Keyframe));
        assert_eq!(VideoCodec::from_byte(0x17), Some(VideoCodec::Avc));

        // Inter frame + AVC
        assert_eq!(VideoFrameType::from_byte(0x27), Some(VideoFrameType::InterFrame));
    }

    #[test]
    fn test_codec_tags() {
        let avc = CodecTag::from_payload(MediaKind::Video, &[0x17, 0x01]).unwrap();
        assert_eq!(avc, CodecTag { kind: MediaKind::Video, id: 7 });
        assert_eq!(avc.video_codec(), Some(VideoCodec::Avc));
        assert_eq!(avc.audio_format(), None);

        let aac = CodecTag::from_payload(MediaKind::Audio, &[0xAF, 0x01]).unwrap();
        assert_eq!(aac.audio_format(), Some(AudioFormat::Aac));
        assert_eq!(aac.to_string(), "Aac");

        let vp6 = CodecTag::from_payload(MediaKind::Video, &[0x24]).unwrap();
        assert_ne!(avc, vp6);

        assert_eq!(
            CodecTag::from_payload(MediaKind::Audio, &[]),
            Err(MediaError::EmptyPacket)
        );
    }

    #[test]
    fn test_sequence_headers() {
        let header = MediaPacket::new(MediaKind::Video, 0, Bytes::from_static(&[0x17, 0x00, 0x00]));
        assert!(header.is_sequence_header());
        assert!(header.is_keyframe());

        let frame = MediaPacket::new(MediaKind::Video, 0, Bytes::from_static(&[0x27, 0x01, 0x00]));
        assert!(!frame.is_sequence_header());
        assert!(!frame.is_keyframe());

        let aac = MediaPacket::new(MediaKind::Audio, 0, Bytes::from_static(&[0xAF, 0x00, 0x12, 0x10]));
        assert!(aac.is_sequence_header());
        assert_eq!(aac.video_frame_type(), None);
    }

    #[test]
    fn test_sample_rate() {
        assert_eq!(AudioSampleRate::from_byte(0xAF).to_hz(), 44100);
        assert_eq!(AudioSampleRate::from_byte(0x22).to_hz(), 5512);
    }

    #[test]
    fn test_kind_message_types() {
        assert_eq!(MediaKind::from_message_type(MSG_AUDIO), Some(MediaKind::Audio));
        assert_eq!(MediaKind::from_message_type(MSG_VIDEO), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_message_type(20), None);
        assert_eq!(MediaKind::Video.message_type(), MSG_VIDEO);
    }
}
