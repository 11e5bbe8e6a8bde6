//! # Media Context
//!
//! Single owner of everything native an open file needs: the demuxer, the
//! selected tracks with their decoders and converters, and the scratch
//! packet/frames reused by every decode call. Built by the prober, consumed
//! by [`MediaContext::close`].

use tracing::{debug, info};

use crate::backend::{AudioDecoder, Demuxer, VideoDecoder};
use crate::frame::{AudioFrame, VideoFrame};
use crate::packet::Packet;
use crate::pixel::PixelConverter;
use crate::probe::MediaInfo;
use crate::resample::AudioResampler;
use crate::time_base::Rational;

/// The selected video stream. Only exists when its decoder opened.
pub struct VideoTrack {
    pub index: u32,
    pub time_base: Rational,
    pub decoder: Box<dyn VideoDecoder>,
    pub converter: PixelConverter,
    /// One frame interval in ms, the seek tolerance.
    pub min_step_ms: f64,
}

/// The selected audio stream. Only exists when its decoder opened.
pub struct AudioTrack {
    pub index: u32,
    pub time_base: Rational,
    pub decoder: Box<dyn AudioDecoder>,
    pub resampler: AudioResampler,
    pub sample_rate: u32,
    /// Duration of the most recently decoded frame.
    pub last_frame_ms: Option<f64>,
}

impl AudioTrack {
    /// Seek tolerance: the last frame's span, or a nominal 1024-sample frame.
    pub fn min_step_ms(&self) -> f64 {
        match self.last_frame_ms {
            Some(ms) if ms > 0.0 => ms,
            _ if self.sample_rate > 0 => 1024.0 * 1000.0 / self.sample_rate as f64,
            _ => 0.0,
        }
    }
}

pub struct MediaContext {
    pub(crate) demuxer: Box<dyn Demuxer>,
    pub(crate) video: Option<VideoTrack>,
    pub(crate) audio: Option<AudioTrack>,
    pub(crate) packet: Packet,
    pub(crate) video_frame: VideoFrame,
    pub(crate) audio_frame: AudioFrame,
    pub(crate) info: MediaInfo,
    /// End-of-stream marker already handed to the host in this pass.
    pub(crate) eos_signalled: bool,
    /// The scratch packet was refused until output is drained; the next
    /// read hands it out again instead of advancing.
    pub(crate) resend_packet: bool,
    pub(crate) packet_resends: u32,
}

impl MediaContext {
    pub fn new(
        demuxer: Box<dyn Demuxer>,
        video: Option<VideoTrack>,
        audio: Option<AudioTrack>,
        info: MediaInfo,
    ) -> Self {
        Self {
            demuxer,
            video,
            audio,
            packet: Packet::new(),
            video_frame: VideoFrame::new(),
            audio_frame: AudioFrame::new(),
            info,
            eos_signalled: false,
            resend_packet: false,
            packet_resends: 0,
        }
    }

    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Stream index and time base seeks are expressed in: video when it is
    /// decoded, audio otherwise.
    pub(crate) fn primary_stream(&self) -> Option<(u32, Rational)> {
        self.video
            .as_ref()
            .map(|v| (v.index, v.time_base))
            .or_else(|| self.audio.as_ref().map(|a| (a.index, a.time_base)))
    }

    /// Drop all in-flight state after the read cursor moved.
    pub(crate) fn flush(&mut self) {
        self.packet.unref();
        self.video_frame.unref();
        self.audio_frame.unref();
        if let Some(video) = self.video.as_mut() {
            video.decoder.flush();
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.decoder.flush();
            audio.resampler.flush();
        }
        self.eos_signalled = false;
        self.resend_packet = false;
        self.packet_resends = 0;
    }

    /// Tear everything down. Decoders are flushed before they are dropped,
    /// the demuxer goes last.
    pub fn close(mut self) {
        self.packet.unref();
        self.video_frame.unref();
        self.audio_frame.unref();

        if let Some(mut video) = self.video.take() {
            video.decoder.flush();
            debug!("Closed video decoder {}", video.decoder.name());
        }
        if let Some(mut audio) = self.audio.take() {
            audio.decoder.flush();
            audio.resampler.flush();
            debug!("Closed audio decoder {}", audio.decoder.name());
        }
        info!("Closed {} ({})", self.info.path, self.demuxer.format_name());
    }
}
