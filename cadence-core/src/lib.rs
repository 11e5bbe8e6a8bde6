//! # Cadence Core
//!
//! Decode-and-synchronize engine for audio/video containers. A host opens a
//! file with [`MediaEngine::prepare`], pulls frames with
//! [`MediaEngine::decode`] (delivered through its [`BufferHost`]), repositions
//! with [`MediaEngine::seek_to`] and tears down with [`MediaEngine::release`].
//!
//! Containers and codecs are reached through the [`backend`] traits;
//! [`NativeBackend`] is the pure Rust default.

// ============================================================================
// Primitives
// ============================================================================
pub mod time_base;
pub mod error;
pub mod config;
pub mod media;
pub mod packet;
pub mod frame;

// ============================================================================
// Conversion
// ============================================================================
pub mod pixel;
pub mod resample;

// ============================================================================
// Host exchange
// ============================================================================
pub mod buffer;
pub mod pool;

// ============================================================================
// Containers / Codecs
// ============================================================================
pub mod backend;
pub mod backends;

// ============================================================================
// Engine
// ============================================================================
pub mod probe;
pub mod context;
pub mod decode;
pub mod seek;
pub mod engine;
pub mod frame_loader;

#[cfg(test)]
pub(crate) mod test_support;

pub use backend::{AudioDecoder, Demuxer, MediaBackend, VideoDecoder};
pub use backends::NativeBackend;
pub use buffer::{AudioPayload, BufferKind, DecodeBuffer, DecodeResult, VideoPayload};
pub use config::{EngineConfig, VideoOutput};
pub use decode::Decoded;
pub use engine::MediaEngine;
pub use error::{DecodeError, DemuxError, EngineError, PrepareError, Result, SeekError};
pub use frame_loader::FrameLoader;
pub use pixel::PixelFormat;
pub use pool::{BufferHost, BufferPool, PoolStats};
pub use probe::{AudioInfo, MediaInfo, VideoInfo};
pub use seek::{Landing, SeekOptions, SeekReport};
pub use time_base::Rational;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
