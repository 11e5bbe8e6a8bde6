//! # Codec Library Capabilities
//!
//! The engine does not parse containers or decode bitstreams itself. It
//! drives whatever implements these traits, in the familiar send/receive
//! style:
//!
//! 1. `Demuxer::read_packet` fills the scratch packet
//! 2. `send_packet` hands it to the stream's decoder
//! 3. `receive_frame` either yields a frame or reports
//!    [`DecodeError::NeedMoreData`] / [`DecodeError::EndOfStream`]
//!
//! [`crate::backends::NativeBackend`] is the built-in implementation.

use std::path::Path;

use crate::error::{DecodeError, DemuxError};
use crate::frame::{AudioFrame, VideoFrame};
use crate::media::StreamInfo;
use crate::packet::Packet;

/// An open container.
pub trait Demuxer: Send {
    /// All streams, ordered by index.
    fn streams(&self) -> &[StreamInfo];

    /// Fill `packet` with the next packet in container order.
    /// Returns `Ok(false)` once the container is exhausted.
    fn read_packet(&mut self, packet: &mut Packet) -> Result<bool, DemuxError>;

    /// Reposition so the next packets of `stream_index` start at or (with
    /// `backward`) before `timestamp`, expressed in that stream's time base.
    fn seek(&mut self, stream_index: u32, timestamp: i64, backward: bool) -> Result<(), DemuxError>;

    /// Container-level text tags as `(key, value)`, keys lowercase
    /// (`title`, `artist`, `date`, ...).
    fn tags(&self) -> &[(String, String)] {
        &[]
    }

    /// Short name for logging.
    fn format_name(&self) -> &str;
}

pub trait VideoDecoder: Send {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError>;

    /// Move the next decoded picture into `frame`.
    fn receive_frame(&mut self, frame: &mut VideoFrame) -> Result<(), DecodeError>;

    /// Discard all buffered input and output (after a seek).
    fn flush(&mut self);

    fn name(&self) -> &str;
}

pub trait AudioDecoder: Send {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError>;

    /// Move the next decoded block of samples into `frame`.
    fn receive_frame(&mut self, frame: &mut AudioFrame) -> Result<(), DecodeError>;

    fn flush(&mut self);

    fn name(&self) -> &str;
}

/// Entry point of a codec library: opens containers and builds decoders.
pub trait MediaBackend: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn Demuxer>, DemuxError>;

    /// `Ok(None)` means no decoder exists for the stream's codec.
    fn video_decoder(
        &self,
        stream: &StreamInfo,
        request_hardware: bool,
    ) -> Result<Option<Box<dyn VideoDecoder>>, DecodeError>;

    /// `Ok(None)` means no decoder exists for the stream's codec.
    fn audio_decoder(&self, stream: &StreamInfo) -> Result<Option<Box<dyn AudioDecoder>>, DecodeError>;
}
