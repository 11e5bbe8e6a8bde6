use std::path::Path;

use tracing::{debug, error, info};

use super::mp4::Mp4Demuxer;
use crate::backend::{AudioDecoder, Demuxer, MediaBackend, VideoDecoder};
use crate::error::{DecodeError, DemuxError};
use crate::media::{CodecId, StreamInfo};

/// File extensions routed to the MP4 demuxer.
const MP4_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "m4a", "3gp"];

/// Default codec library: MP4 parsing in-crate, OpenH264 for video and
/// Symphonia for everything audio.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeBackend;

impl NativeBackend {
    pub fn new() -> Self {
        Self
    }

    /// Decoders this build can create, for logging and `info` output.
    pub fn available_decoders() -> Vec<&'static str> {
        let mut list = Vec::new();
        if cfg!(feature = "software-decode") {
            list.push("OpenH264");
        }
        if cfg!(feature = "audio") {
            list.push("Symphonia");
        }
        list
    }
}

fn is_mp4_family(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MP4_EXTENSIONS.iter().any(|m| e.eq_ignore_ascii_case(m)))
        .unwrap_or(false)
}

impl MediaBackend for NativeBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn Demuxer>, DemuxError> {
        if is_mp4_family(path) {
            debug!("Opening {} with the MP4 demuxer", path.display());
            return Ok(Box::new(Mp4Demuxer::open(path)?));
        }

        #[cfg(feature = "audio")]
        {
            debug!("Opening {} with Symphonia", path.display());
            Ok(Box::new(super::symphonia::SymphoniaDemuxer::open(path)?))
        }

        #[cfg(not(feature = "audio"))]
        {
            Err(DemuxError::Unsupported(format!(
                "{}: only MP4 family files are supported in this build",
                path.display()
            )))
        }
    }

    fn video_decoder(
        &self,
        stream: &StreamInfo,
        request_hardware: bool,
    ) -> Result<Option<Box<dyn VideoDecoder>>, DecodeError> {
        if request_hardware {
            info!(
                "Hardware decode requested for stream {} ({}); no hardware decoder in this backend, using software",
                stream.index, stream.codec
            );
        }

        match &stream.codec {
            CodecId::H264 => {
                #[cfg(feature = "software-decode")]
                {
                    let decoder = super::openh264::OpenH264Decoder::new(stream)?;
                    return Ok(Some(Box::new(decoder)));
                }
                #[cfg(not(feature = "software-decode"))]
                {
                    error!("Built without software-decode; H.264 stream {} not decodable", stream.index);
                    Ok(None)
                }
            }
            other => {
                error!("No video decoder for codec {} (stream {})", other, stream.index);
                Ok(None)
            }
        }
    }

    fn audio_decoder(&self, stream: &StreamInfo) -> Result<Option<Box<dyn AudioDecoder>>, DecodeError> {
        #[cfg(feature = "audio")]
        {
            let decoder = super::symphonia::SymphoniaAudioDecoder::new(stream)?;
            Ok(decoder.map(|d| Box::new(d) as Box<dyn AudioDecoder>))
        }

        #[cfg(not(feature = "audio"))]
        {
            error!("Built without audio; codec {} not decodable", stream.codec);
            Ok(None)
        }
    }
}
