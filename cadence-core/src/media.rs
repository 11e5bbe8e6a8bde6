//! Stream descriptors shared by demuxers, decoders and the prober.

use serde::{Deserialize, Serialize};

use crate::time_base::Rational;

// ============================================================================
// Stream Kinds / Codecs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
    Data,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecId {
    // Video
    H264,
    H265,
    Vp8,
    Vp9,
    Av1,
    // Audio
    Aac,
    Mp3,
    Flac,
    Vorbis,
    Opus,
    Alac,
    Ac3,
    Eac3,
    Pcm { format: SampleFormat, big_endian: bool },
    /// Anything the demuxer could name but nothing here understands.
    Other(String),
}

impl std::fmt::Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecId::Pcm { format, big_endian } => {
                write!(f, "pcm_{:?}{}", format, if *big_endian { "be" } else { "le" })
            }
            CodecId::Other(name) => write!(f, "{}", name),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Sample storage format of decoded or raw audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    S16,
    S24,
    S32,
    F32,
    F64,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> u16 {
        match self {
            Self::U8 => 1,
            Self::S16 => 2,
            Self::S24 => 3,
            Self::S32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

// ============================================================================
// Stream Info
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    /// Frames per second as a rational; `0/1` when unknown.
    pub frame_rate: Rational,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    pub bits_per_sample: Option<u32>,
    /// Needed by raw PCM decoders to size their output.
    pub max_frames_per_packet: Option<u64>,
}

/// One elementary stream as reported by a demuxer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: u32,
    pub kind: MediaKind,
    pub codec: CodecId,
    pub time_base: Rational,
    /// Duration in `time_base` ticks.
    pub duration: Option<i64>,
    pub video: Option<VideoParams>,
    pub audio: Option<AudioParams>,
    /// Codec-specific init data (avcC, AudioSpecificConfig, FLAC STREAMINFO...).
    #[serde(skip)]
    pub extra_data: Vec<u8>,
}

impl StreamInfo {
    pub fn duration_ms(&self) -> i64 {
        self.duration
            .map(|d| self.time_base.to_millis(d))
            .unwrap_or(0)
    }

    pub fn frame_rate(&self) -> f64 {
        self.video
            .as_ref()
            .map(|v| v.frame_rate.as_f64())
            .unwrap_or(0.0)
    }
}
