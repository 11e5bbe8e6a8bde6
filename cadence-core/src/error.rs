//! Error taxonomy for the engine and its collaborators.
//!
//! `EngineError` is what the host sees. Prepare errors are terminal for the
//! context (only `release` is valid afterwards); decode errors are per call
//! and leave the context usable; seek errors report a failed container
//! reposition. End of stream is not an error, see [`crate::decode::Decoded`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("prepare failed: {0}")]
    Prepare(#[from] PrepareError),
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("seek failed: {0}")]
    Seek(#[from] SeekError),
    #[error("engine is not prepared")]
    NotPrepared,
}

impl EngineError {
    /// True for failures that leave the context usable for another call.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EngineError::Decode(_) | EngineError::Seek(_))
    }
}

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("cannot open container: {0}")]
    Open(#[source] DemuxError),
    #[error("container exposes no stream information")]
    NoStreamInfo,
    #[error("no decoder available for audio codec {codec}")]
    MissingAudioDecoder { codec: String },
    #[error("cannot open {kind} decoder: {source}")]
    DecoderOpen {
        kind: &'static str,
        #[source]
        source: DecodeError,
    },
    #[error("neither an audio nor a video stream was found")]
    NoStreams,
    #[error("audio resampler setup failed: {0}")]
    Resampler(String),
    #[error("engine already holds a prepared context")]
    AlreadyPrepared,
    #[error("engine has been released")]
    Released,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    /// The decoder has no frame yet and wants another packet.
    #[error("decoder needs more input")]
    NeedMoreData,
    /// The decoder has been drained completely.
    #[error("decoder reached end of stream")]
    EndOfStream,
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("packet belongs to unselected stream {0}")]
    UnselectedStream(u32),
    #[error("audio packet produced no frames")]
    NoAudioFrames,
    #[error("decoder rejected data: {0}")]
    Failed(String),
    #[error("pixel conversion failed: {0}")]
    Scale(String),
    #[error("audio resampling failed: {0}")]
    Resample(String),
    #[error("container read failed: {0}")]
    Demux(#[from] DemuxError),
}

#[derive(Debug, Error)]
pub enum SeekError {
    #[error("container seek failed: {0}")]
    Container(#[source] DemuxError),
    #[error("no stream available to seek")]
    NoStream,
    #[error("decode during seek failed: {0}")]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed container: {0}")]
    Malformed(String),
    #[error("unsupported container: {0}")]
    Unsupported(String),
    #[error("stream {0} does not exist")]
    NoSuchStream(u32),
    #[error("{0}")]
    Backend(String),
}

impl DemuxError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}
