//! Built-in codec library.
//!
//! Pure Rust collaborators behind the [`crate::backend`] traits:
//! - `mp4` - ISO-BMFF demuxer (MP4, MOV, M4A, M4V)
//! - `symphonia` - audio-only containers and all audio decoding
//! - `openh264` - software H.264
//!
//! [`NativeBackend`] picks between them per file and per stream.

pub mod h264;
pub mod mp4;
mod native;

#[cfg(feature = "software-decode")]
pub mod openh264;

#[cfg(feature = "audio")]
pub mod symphonia;

pub use native::NativeBackend;
