//! # Decode Pipeline
//!
//! One call = one packet routed to its decoder, with buffers flowing
//! through the host:
//!
//! ```text
//! read_packet ──► video? ──► send ─► receive ─► convert ─► enqueue video
//!      │              └── needs more input: read the next packet (bounded)
//!      ├────────► audio? ──► send ─► drain all frames ─► resample ─► enqueue audio (each)
//!      │              └── decoder full: packet kept and resent on the next read
//!      ├────────► other stream: discarded
//!      └── none left: end of stream (marker buffer once per pass)
//! ```

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::buffer::{BufferKind, DecodeBuffer, DecodeResult};
use crate::config::EngineConfig;
use crate::context::{AudioTrack, MediaContext, VideoTrack};
use crate::error::DecodeError;
use crate::frame::{AudioFrame, VideoFrame};
use crate::pool::BufferHost;

/// Consecutive times one packet is offered again before it is dropped.
const MAX_PACKET_RESENDS: u32 = 8;

/// Outcome of a successful [`crate::MediaEngine::decode`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decoded {
    /// One video buffer was enqueued.
    Video { pts_ms: i64 },
    /// `frames` audio buffers were enqueued; `pts_ms` is the first one's.
    /// A packet whose samples all stay buffered in the rate converter ends
    /// in [`DecodeError::NoAudioFrames`] instead.
    Audio { pts_ms: i64, frames: usize },
    /// The container has no more packets.
    EndOfStream,
}

impl MediaContext {
    /// Unreference the scratch packet and read the next one, unless the
    /// current one is held for a resend.
    pub(crate) fn read_packet(&mut self) -> Result<bool, DecodeError> {
        if std::mem::take(&mut self.resend_packet) {
            return Ok(true);
        }
        self.packet_resends = 0;
        self.packet.unref();
        Ok(self.demuxer.read_packet(&mut self.packet)?)
    }

    /// Keep the scratch packet for the next read after its decoder asked
    /// for output to be drained first.
    pub(crate) fn hold_packet(&mut self) {
        if self.packet_resends >= MAX_PACKET_RESENDS {
            warn!(
                "Decoder refused packet of stream {} {} times, dropping it",
                self.packet.stream_index, self.packet_resends
            );
            self.packet_resends = 0;
            return;
        }
        self.packet_resends += 1;
        self.resend_packet = true;
        trace!("Holding packet of stream {} for resend", self.packet.stream_index);
    }

    pub(crate) fn decode_next(
        &mut self,
        host: &dyn BufferHost,
        config: &EngineConfig,
    ) -> Result<Decoded, DecodeError> {
        let attempts = config.max_need_input_retries.max(1);
        for _ in 0..attempts {
            if !self.read_packet()? {
                self.signal_end_of_stream(host);
                return Ok(Decoded::EndOfStream);
            }

            let index = self.packet.stream_index;
            if self.video.as_ref().is_some_and(|v| v.index == index) {
                if self.decode_video_packet()? {
                    return self.emit_video(host);
                }
                trace!("Video decoder needs more input");
                continue;
            }
            if self.audio.as_ref().is_some_and(|a| a.index == index) {
                match self.decode_audio_packet(host) {
                    Err(DecodeError::NoAudioFrames) if self.resend_packet => continue,
                    other => return other,
                }
            }

            debug!("Discarding packet of unselected stream {}", index);
            return Err(DecodeError::UnselectedStream(index));
        }

        warn!("Video decoder still needs input after {} packets", attempts);
        Err(DecodeError::NeedMoreData)
    }

    /// Feed the scratch packet to the video decoder and try to pull a frame
    /// into the scratch frame. False when the decoder wants more input; the
    /// scratch frame then still holds the previous picture.
    pub(crate) fn decode_video_packet(&mut self) -> Result<bool, DecodeError> {
        let Some(track) = self.video.as_mut() else {
            return Ok(false);
        };
        let refused = refused(track.decoder.send_packet(&self.packet))?;
        let produced = match track.decoder.receive_frame(&mut self.video_frame) {
            Ok(()) => {
                if self.video_frame.pts.is_none() {
                    self.video_frame.pts = self.packet.timestamp();
                }
                true
            }
            Err(DecodeError::NeedMoreData) => false,
            Err(e) => return Err(e),
        };
        if refused {
            self.hold_packet();
        }
        Ok(produced)
    }

    /// Convert the scratch frame into a host buffer and enqueue it.
    fn emit_video(&mut self, host: &dyn BufferHost) -> Result<Decoded, DecodeError> {
        let Some(track) = self.video.as_ref() else {
            return Err(DecodeError::UnselectedStream(self.packet.stream_index));
        };
        let mut buffer = host.request_video_buffer();
        buffer.reset();
        match write_video(track, &self.video_frame, &mut buffer) {
            Ok(pts_ms) => {
                debug!("Video frame pts {} ms", pts_ms);
                host.enqueue_video_buffer(buffer);
                Ok(Decoded::Video { pts_ms })
            }
            Err(e) => {
                warn!("Video conversion failed: {}", e);
                buffer.result = DecodeResult::Fail;
                host.enqueue_video_buffer(buffer);
                Err(e)
            }
        }
    }

    fn decode_audio_packet(&mut self, host: &dyn BufferHost) -> Result<Decoded, DecodeError> {
        let Some(track) = self.audio.as_mut() else {
            return Err(DecodeError::UnselectedStream(self.packet.stream_index));
        };
        let refused = refused(track.decoder.send_packet(&self.packet))?;

        let mut first_pts = None;
        let mut frames = 0usize;
        while receive_audio(track, &mut self.audio_frame, self.packet.timestamp())? {
            let mut buffer = host.request_audio_buffer();
            buffer.reset();
            match write_audio(track, &self.audio_frame, &mut buffer) {
                Ok(Some(pts_ms)) => {
                    host.enqueue_audio_buffer(buffer);
                    first_pts.get_or_insert(pts_ms);
                    frames += 1;
                }
                Ok(None) => {
                    trace!("Resampler buffering, nothing to enqueue");
                    host.return_buffer(buffer);
                }
                Err(e) => {
                    warn!("Audio conversion failed: {}", e);
                    buffer.result = DecodeResult::Fail;
                    host.enqueue_audio_buffer(buffer);
                    return Err(e);
                }
            }
        }

        if refused {
            self.hold_packet();
        }

        match first_pts {
            Some(pts_ms) => {
                debug!("Audio pts {} ms, {} frame(s)", pts_ms, frames);
                Ok(Decoded::Audio { pts_ms, frames })
            }
            None => Err(DecodeError::NoAudioFrames),
        }
    }

    /// Hand the host one end-of-stream marker per linear pass.
    fn signal_end_of_stream(&mut self, host: &dyn BufferHost) {
        if self.eos_signalled {
            return;
        }
        self.eos_signalled = true;

        let kind = if self.video.is_some() || self.audio.is_none() {
            BufferKind::Video
        } else {
            BufferKind::Audio
        };
        let mut buffer = match kind {
            BufferKind::Video => host.request_video_buffer(),
            BufferKind::Audio => host.request_audio_buffer(),
        };
        buffer.reset();
        buffer.mark_end_of_stream();
        buffer.pts_ms = self.info.duration_ms;
        debug!("End of stream, {:?} marker enqueued", kind);
        match kind {
            BufferKind::Video => host.enqueue_video_buffer(buffer),
            BufferKind::Audio => host.enqueue_audio_buffer(buffer),
        }
    }
}

/// Whether a send was turned away until output is drained. The packet was
/// not consumed in that case.
pub(crate) fn refused(sent: Result<(), DecodeError>) -> Result<bool, DecodeError> {
    match sent {
        Ok(()) => Ok(false),
        Err(DecodeError::NeedMoreData) => Ok(true),
        Err(e) => Err(e),
    }
}

/// Pull the next decoded audio frame into `frame`. Frames without a pts
/// inherit the packet's.
pub(crate) fn receive_audio(
    track: &mut AudioTrack,
    frame: &mut AudioFrame,
    packet_pts: Option<i64>,
) -> Result<bool, DecodeError> {
    frame.unref();
    match track.decoder.receive_frame(frame) {
        Ok(()) => {
            if frame.pts.is_none() {
                frame.pts = packet_pts;
            }
            track.last_frame_ms = Some(frame.duration_ms());
            Ok(true)
        }
        Err(DecodeError::NeedMoreData) | Err(DecodeError::EndOfStream) => Ok(false),
        Err(e) => Err(e),
    }
}

pub(crate) fn video_pts_ms(track: &VideoTrack, frame: &VideoFrame) -> i64 {
    track.time_base.to_millis(frame.pts.unwrap_or(0))
}

pub(crate) fn audio_pts_ms(track: &AudioTrack, frame: &AudioFrame) -> i64 {
    track.time_base.to_millis(frame.pts.unwrap_or(0))
}

/// Scale `frame` into `buffer`; returns the pts written.
pub(crate) fn write_video(
    track: &VideoTrack,
    frame: &VideoFrame,
    buffer: &mut DecodeBuffer,
) -> Result<i64, DecodeError> {
    let pts_ms = video_pts_ms(track, frame);
    track.converter.convert(frame, buffer.video_mut())?;
    buffer.pts_ms = pts_ms;
    buffer.result = DecodeResult::Success;
    Ok(pts_ms)
}

/// Resample `frame` into `buffer` as S16 PCM; returns the pts of the PCM
/// written, `None` while the rate converter is still filling a block.
pub(crate) fn write_audio(
    track: &mut AudioTrack,
    frame: &AudioFrame,
    buffer: &mut DecodeBuffer,
) -> Result<Option<i64>, DecodeError> {
    let written = track.resampler.convert(frame, buffer.audio_mut())?;
    if written == 0 {
        return Ok(None);
    }
    let seconds_per_tick = track.time_base.as_f64();
    let lead_ticks = if seconds_per_tick > 0.0 {
        (track.resampler.lead_ms() / 1000.0 / seconds_per_tick).round() as i64
    } else {
        0
    };
    let pts_ms = track.time_base.to_millis(frame.pts.unwrap_or(0) + lead_ticks);
    buffer.pts_ms = pts_ms;
    buffer.result = DecodeResult::Success;
    Ok(Some(pts_ms))
}
