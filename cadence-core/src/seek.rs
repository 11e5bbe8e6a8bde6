//! # Seek & Resync
//!
//! A seek is a backward container seek to the keyframe at or before the
//! target, followed by decoding forward until each stream is close enough:
//!
//! ```text
//! target ──► demuxer.seek(primary, backward) ──► flush ──► decode_for_seek
//!                                                          ├─ video: discard while target - pts > step,
//!                                                          │         stop after max_video_cycles packets
//!                                                          └─ audio: discard while target - pts > step
//! ```
//!
//! Streams converge independently. Whatever lands is written into the
//! caller's buffers, not enqueued.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::buffer::DecodeBuffer;
use crate::config::EngineConfig;
use crate::context::MediaContext;
use crate::decode::{audio_pts_ms, receive_audio, refused, video_pts_ms, write_audio, write_video};
use crate::error::{DecodeError, SeekError};
use crate::probe::MediaInfo;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeekOptions {
    /// Video lands once `target - pts <= min_video_step_ms`.
    pub min_video_step_ms: f64,
    pub min_audio_step_ms: f64,
    pub skip_video: bool,
    pub skip_audio: bool,
    /// Video packets submitted before giving up on convergence.
    pub max_video_cycles: u32,
}

impl SeekOptions {
    /// Tolerances derived from the stream rates.
    pub fn for_media(info: &MediaInfo, config: &EngineConfig) -> Self {
        let fps = info.fps();
        let min_video_step_ms = if fps > 0.0 {
            1000.0 / fps
        } else {
            config.video_min_step_fallback_ms
        };
        let rate = info.audio_sample_rate();
        let min_audio_step_ms = if rate > 0 {
            1024.0 * 1000.0 / rate as f64
        } else {
            0.0
        };
        Self {
            min_video_step_ms,
            min_audio_step_ms,
            skip_video: !info.has_decodable_video(),
            skip_audio: info.audio.is_none(),
            max_video_cycles: config.max_video_seek_cycles,
        }
    }
}

/// Where one stream ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Landing {
    /// A frame within tolerance was written to the caller's buffer.
    Landed { pts_ms: i64 },
    /// The stream ran out before reaching the target.
    EndOfStream,
    /// Video only: the cycle budget ran out. The last decoded frame, if any,
    /// was written.
    CycleLimit { pts_ms: Option<i64> },
    /// Not requested, or no such stream.
    Skipped,
}

impl Landing {
    pub fn pts_ms(&self) -> Option<i64> {
        match self {
            Landing::Landed { pts_ms } => Some(*pts_ms),
            Landing::CycleLimit { pts_ms } => *pts_ms,
            Landing::EndOfStream | Landing::Skipped => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeekReport {
    pub target_ms: i64,
    pub video: Landing,
    pub audio: Landing,
    /// Video packets submitted while converging.
    pub video_cycles: u32,
    pub discarded_video_frames: u32,
    pub discarded_audio_frames: u32,
}

impl SeekReport {
    fn skipped(target_ms: i64) -> Self {
        Self {
            target_ms,
            video: Landing::Skipped,
            audio: Landing::Skipped,
            video_cycles: 0,
            discarded_video_frames: 0,
            discarded_audio_frames: 0,
        }
    }
}

impl MediaContext {
    /// Rewind every selected stream to the start and drop in-flight state.
    pub(crate) fn reset_decode_progress(&mut self) -> Result<(), SeekError> {
        let streams: Vec<u32> = self
            .video
            .iter()
            .map(|v| v.index)
            .chain(self.audio.iter().map(|a| a.index))
            .collect();
        if streams.is_empty() {
            return Err(SeekError::NoStream);
        }
        for index in streams {
            self.demuxer
                .seek(index, 0, true)
                .map_err(SeekError::Container)?;
        }
        self.flush();
        debug!("Decode progress reset to 0");
        Ok(())
    }

    /// Seek tolerances for the open streams: [`SeekOptions::for_media`]
    /// with the audio step taken from the decoder's frame size.
    pub(crate) fn seek_options(&self, config: &EngineConfig) -> SeekOptions {
        let mut options = SeekOptions::for_media(&self.info, config);
        if let Some(audio) = &self.audio {
            options.min_audio_step_ms = audio.min_step_ms();
        }
        options
    }

    pub(crate) fn seek_to(
        &mut self,
        target_ms: i64,
        video_buf: &mut DecodeBuffer,
        audio_buf: &mut DecodeBuffer,
        perform_decode: bool,
        config: &EngineConfig,
    ) -> Result<SeekReport, SeekError> {
        let options = self.seek_options(config);
        self.seek_with_options(target_ms, video_buf, audio_buf, perform_decode, &options)
    }

    pub(crate) fn seek_with_options(
        &mut self,
        target_ms: i64,
        video_buf: &mut DecodeBuffer,
        audio_buf: &mut DecodeBuffer,
        perform_decode: bool,
        options: &SeekOptions,
    ) -> Result<SeekReport, SeekError> {
        let target_ms = target_ms.max(0);
        let (index, time_base) = self.primary_stream().ok_or(SeekError::NoStream)?;
        let timestamp = time_base.from_millis(target_ms);

        self.demuxer
            .seek(index, timestamp, true)
            .map_err(SeekError::Container)?;
        self.flush();
        debug!("Seek to {} ms: stream {} at {} ticks", target_ms, index, timestamp);

        if !perform_decode {
            return Ok(SeekReport::skipped(target_ms));
        }

        let report = self.decode_for_seek(target_ms, video_buf, audio_buf, options)?;
        info!(
            "Seek to {} ms: video {:?}, audio {:?} after {} video cycle(s)",
            target_ms, report.video, report.audio, report.video_cycles
        );
        Ok(report)
    }

    /// Decode forward from the current position until each requested stream
    /// lands on `target_ms`, runs out, or (video) exhausts its cycle budget.
    pub(crate) fn decode_for_seek(
        &mut self,
        target_ms: i64,
        video_buf: &mut DecodeBuffer,
        audio_buf: &mut DecodeBuffer,
        options: &SeekOptions,
    ) -> Result<SeekReport, DecodeError> {
        let mut report = SeekReport::skipped(target_ms);
        let mut video_done = options.skip_video || self.video.is_none();
        let mut audio_done = options.skip_audio || self.audio.is_none();
        let mut last_video_pts: Option<i64> = None;

        if !video_done && options.max_video_cycles == 0 {
            report.video = Landing::CycleLimit { pts_ms: None };
            video_done = true;
        }

        while !(video_done && audio_done) {
            if !self.read_packet()? {
                if !video_done {
                    video_buf.reset();
                    video_buf.video_mut();
                    video_buf.mark_end_of_stream();
                    video_buf.pts_ms = last_video_pts.unwrap_or(target_ms);
                    report.video = Landing::EndOfStream;
                }
                if !audio_done {
                    audio_buf.reset();
                    audio_buf.audio_mut();
                    audio_buf.mark_end_of_stream();
                    audio_buf.pts_ms = target_ms;
                    report.audio = Landing::EndOfStream;
                }
                break;
            }
            let index = self.packet.stream_index;

            if !video_done && self.video.as_ref().is_some_and(|v| v.index == index) {
                report.video_cycles += 1;
                match self.decode_video_packet() {
                    Ok(true) => {
                        let Some(track) = self.video.as_ref() else {
                            break;
                        };
                        let pts_ms = video_pts_ms(track, &self.video_frame);
                        if (target_ms - pts_ms) as f64 <= options.min_video_step_ms {
                            video_buf.reset();
                            write_video(track, &self.video_frame, video_buf)?;
                            report.video = Landing::Landed { pts_ms };
                            video_done = true;
                        } else {
                            last_video_pts = Some(pts_ms);
                            report.discarded_video_frames += 1;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Skipping undecodable video packet during seek: {}", e),
                }

                if !video_done && report.video_cycles >= options.max_video_cycles {
                    if let (Some(pts_ms), Some(track)) = (last_video_pts, self.video.as_ref()) {
                        video_buf.reset();
                        write_video(track, &self.video_frame, video_buf)?;
                        video_buf.pts_ms = pts_ms;
                    }
                    warn!(
                        "Video seek gave up after {} cycles at {:?} ms (target {} ms)",
                        report.video_cycles, last_video_pts, target_ms
                    );
                    report.video = Landing::CycleLimit { pts_ms: last_video_pts };
                    video_done = true;
                }
                continue;
            }

            if !audio_done && self.audio.as_ref().is_some_and(|a| a.index == index) {
                let Some(track) = self.audio.as_mut() else {
                    break;
                };
                let refused = match refused(track.decoder.send_packet(&self.packet)) {
                    Ok(refused) => refused,
                    Err(e) => {
                        warn!("Skipping undecodable audio packet during seek: {}", e);
                        continue;
                    }
                };
                let packet_pts = self.packet.timestamp();
                while receive_audio(track, &mut self.audio_frame, packet_pts)? {
                    if audio_done {
                        // rest of a packet that already landed
                        continue;
                    }
                    let pts_ms = audio_pts_ms(track, &self.audio_frame);
                    let step = self
                        .audio_frame
                        .duration_ms()
                        .max(options.min_audio_step_ms);
                    if (target_ms - pts_ms) as f64 <= step {
                        audio_buf.reset();
                        // a rate converter still filling up lands on a later frame
                        if let Some(pts_ms) = write_audio(track, &self.audio_frame, audio_buf)? {
                            report.audio = Landing::Landed { pts_ms };
                            audio_done = true;
                        }
                    } else {
                        report.discarded_audio_frames += 1;
                    }
                }
                if refused {
                    self.hold_packet();
                }
                continue;
            }

            // packet of a stream that already converged, or was never selected
        }

        Ok(report)
    }
}
