//! Single-frame extraction for thumbnails and scrub previews.
//!
//! Opens only the video stream; audio is never selected or decoded. Every
//! frame comes out as RGBA regardless of the configured output.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::backend::MediaBackend;
use crate::buffer::{DecodeBuffer, VideoPayload};
use crate::config::{EngineConfig, VideoOutput};
use crate::context::MediaContext;
use crate::error::{EngineError, PrepareError, Result};
use crate::probe::{probe_video, MediaInfo};
use crate::seek::Landing;

pub struct FrameLoader {
    backend: Arc<dyn MediaBackend>,
    config: EngineConfig,
    context: Option<MediaContext>,
    buffer: DecodeBuffer,
    last_pts_ms: Option<i64>,
}

impl FrameLoader {
    pub fn new(backend: Arc<dyn MediaBackend>, config: EngineConfig) -> Self {
        Self {
            backend,
            config: EngineConfig {
                video_output: VideoOutput::Rgba,
                ..config
            },
            context: None,
            buffer: DecodeBuffer::video(),
            last_pts_ms: None,
        }
    }

    /// Open `path` for frame extraction. Fails unless the file has a video
    /// stream that can be decoded.
    pub fn prepare(&mut self, path: impl AsRef<Path>) -> Result<&MediaInfo> {
        self.release_context();
        let path = path.as_ref();
        let ctx = probe_video(self.backend.as_ref(), path, false, &self.config)?;
        if !ctx.has_video() {
            error!("{} has no decodable video stream", path.display());
            ctx.close();
            return Err(PrepareError::NoStreams.into());
        }
        Ok(self.context.insert(ctx).info())
    }

    /// Decode the picture at `position_ms`.
    ///
    /// With `need_real_time` the decoder runs forward from the keyframe to
    /// the exact position, bounded by the configured cycle budget. Otherwise
    /// the keyframe at or before the position is returned. `None` when the
    /// position lies past the last frame.
    pub fn get_frame(&mut self, position_ms: i64, need_real_time: bool) -> Result<Option<&VideoPayload>> {
        let ctx = self.context.as_mut().ok_or(EngineError::NotPrepared)?;
        let mut scratch_audio = DecodeBuffer::audio();

        let mut options = ctx.seek_options(&self.config);
        options.skip_audio = true;
        if !need_real_time {
            options.min_video_step_ms = f64::INFINITY;
        }
        let report = ctx.seek_with_options(position_ms, &mut self.buffer, &mut scratch_audio, true, &options)?;

        self.last_pts_ms = match report.video {
            Landing::Landed { pts_ms } | Landing::CycleLimit { pts_ms: Some(pts_ms) } => Some(pts_ms),
            Landing::CycleLimit { pts_ms: None } | Landing::EndOfStream | Landing::Skipped => None,
        };
        debug!(
            "Frame at {} ms: {:?} after {} cycle(s)",
            position_ms, report.video, report.video_cycles
        );
        Ok(self.last_pts_ms.and_then(|_| self.buffer.video_payload()))
    }

    /// Presentation time of the frame last returned by [`get_frame`](Self::get_frame).
    pub fn frame_pts_ms(&self) -> Option<i64> {
        self.last_pts_ms
    }

    pub fn media_info(&self) -> Option<&MediaInfo> {
        self.context.as_ref().map(MediaContext::info)
    }

    /// Close the file and free the frame buffer.
    pub fn release(&mut self) {
        if self.release_context() {
            info!("Frame loader released");
        }
        self.buffer = DecodeBuffer::video();
        self.last_pts_ms = None;
    }

    fn release_context(&mut self) -> bool {
        match self.context.take() {
            Some(ctx) => {
                ctx.close();
                true
            }
            None => false,
        }
    }
}

impl Drop for FrameLoader {
    fn drop(&mut self) {
        self.release();
    }
}
