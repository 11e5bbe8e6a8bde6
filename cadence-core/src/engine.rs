//! # Media Engine
//!
//! Host-facing boundary. One engine owns at most one open file:
//!
//! ```text
//! Idle ──prepare ok──► Prepared ──release──► Released
//!   │                     ▲
//!   └──prepare err──► Failed ──prepare──┘  (release valid from any state)
//! ```
//!
//! Every call takes `&mut self`; the engine moves between threads but never
//! decodes concurrently. Decoded buffers go to the injected [`BufferHost`].

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::backend::MediaBackend;
use crate::buffer::DecodeBuffer;
use crate::config::EngineConfig;
use crate::context::MediaContext;
use crate::decode::Decoded;
use crate::error::{EngineError, PrepareError, Result};
use crate::pool::BufferHost;
use crate::probe::{probe, MediaInfo};
use crate::seek::{SeekOptions, SeekReport};

enum EngineState {
    Idle,
    Prepared(MediaContext),
    Failed,
    Released,
}

pub struct MediaEngine {
    backend: Arc<dyn MediaBackend>,
    host: Arc<dyn BufferHost>,
    config: EngineConfig,
    state: EngineState,
}

impl MediaEngine {
    pub fn new(backend: Arc<dyn MediaBackend>, host: Arc<dyn BufferHost>, config: EngineConfig) -> Self {
        Self {
            backend,
            host,
            config,
            state: EngineState::Idle,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open `file_path`, select its streams and open their decoders.
    ///
    /// On failure everything opened so far is released again and only
    /// [`release`](Self::release) or another `prepare` are meaningful.
    pub fn prepare(
        &mut self,
        file_path: impl AsRef<Path>,
        request_hardware_accel: bool,
        target_audio_channels: u16,
    ) -> Result<&MediaInfo> {
        match self.state {
            EngineState::Prepared(_) => return Err(PrepareError::AlreadyPrepared.into()),
            EngineState::Released => return Err(PrepareError::Released.into()),
            EngineState::Idle | EngineState::Failed => {}
        }

        let path = file_path.as_ref();
        match probe(
            self.backend.as_ref(),
            path,
            request_hardware_accel,
            target_audio_channels,
            &self.config,
        ) {
            Ok(ctx) => {
                debug!("Engine prepared");
                self.state = EngineState::Prepared(ctx);
                match &self.state {
                    EngineState::Prepared(ctx) => Ok(ctx.info()),
                    _ => Err(EngineError::NotPrepared),
                }
            }
            Err(e) => {
                error!("Prepare of {} failed: {}", path.display(), e);
                self.state = EngineState::Failed;
                Err(e.into())
            }
        }
    }

    /// Rewind to the start of the file.
    pub fn reset_decode_progress(&mut self) -> Result<()> {
        self.context_mut()?.reset_decode_progress()?;
        Ok(())
    }

    /// Decode the next packet. Frames are enqueued on the host; the return
    /// value says what was produced.
    pub fn decode(&mut self) -> Result<Decoded> {
        let EngineState::Prepared(ctx) = &mut self.state else {
            return Err(EngineError::NotPrepared);
        };
        Ok(ctx.decode_next(self.host.as_ref(), &self.config)?)
    }

    /// Reposition to `target_pts_ms`. With `perform_decode` the frames each
    /// stream lands on are written into the given buffers.
    pub fn seek_to(
        &mut self,
        target_pts_ms: i64,
        video_buffer: &mut DecodeBuffer,
        audio_buffer: &mut DecodeBuffer,
        perform_decode: bool,
    ) -> Result<SeekReport> {
        let EngineState::Prepared(ctx) = &mut self.state else {
            return Err(EngineError::NotPrepared);
        };
        Ok(ctx.seek_to(target_pts_ms, video_buffer, audio_buffer, perform_decode, &self.config)?)
    }

    /// [`seek_to`](Self::seek_to) with caller-chosen tolerances, e.g. to
    /// resync audio alone after a track switch. Start from
    /// [`seek_options`](Self::seek_options) and adjust.
    pub fn seek_to_with_options(
        &mut self,
        target_pts_ms: i64,
        video_buffer: &mut DecodeBuffer,
        audio_buffer: &mut DecodeBuffer,
        perform_decode: bool,
        options: SeekOptions,
    ) -> Result<SeekReport> {
        let ctx = self.context_mut()?;
        Ok(ctx.seek_with_options(target_pts_ms, video_buffer, audio_buffer, perform_decode, &options)?)
    }

    /// Tolerances [`seek_to`](Self::seek_to) would use for the open file.
    pub fn seek_options(&self) -> Option<SeekOptions> {
        self.context().map(|ctx| ctx.seek_options(&self.config))
    }

    /// Tear down every native resource. Safe to call repeatedly and after a
    /// failed prepare.
    pub fn release(&mut self) {
        match std::mem::replace(&mut self.state, EngineState::Released) {
            EngineState::Prepared(ctx) => {
                ctx.close();
                info!("Engine released");
            }
            EngineState::Idle | EngineState::Failed => info!("Engine released (nothing open)"),
            EngineState::Released => {}
        }
    }

    fn context(&self) -> Option<&MediaContext> {
        match &self.state {
            EngineState::Prepared(ctx) => Some(ctx),
            _ => None,
        }
    }

    fn context_mut(&mut self) -> Result<&mut MediaContext> {
        match &mut self.state {
            EngineState::Prepared(ctx) => Ok(ctx),
            _ => Err(EngineError::NotPrepared),
        }
    }

    // ========================================================================
    // Read-only accessors (zero until prepared)
    // ========================================================================

    pub fn is_prepared(&self) -> bool {
        self.context().is_some()
    }

    pub fn media_info(&self) -> Option<&MediaInfo> {
        self.context().map(MediaContext::info)
    }

    pub fn video_width(&self) -> u32 {
        self.media_info().map(MediaInfo::width).unwrap_or(0)
    }

    pub fn video_height(&self) -> u32 {
        self.media_info().map(MediaInfo::height).unwrap_or(0)
    }

    pub fn video_fps(&self) -> f64 {
        self.media_info().map(MediaInfo::fps).unwrap_or(0.0)
    }

    pub fn duration_ms(&self) -> i64 {
        self.media_info().map(|i| i.duration_ms).unwrap_or(0)
    }

    pub fn audio_channels(&self) -> u16 {
        self.media_info().map(MediaInfo::audio_channels).unwrap_or(0)
    }

    pub fn audio_sample_rate(&self) -> u32 {
        self.media_info().map(MediaInfo::audio_sample_rate).unwrap_or(0)
    }

    pub fn audio_bytes_per_sample(&self) -> u16 {
        self.media_info().map(MediaInfo::audio_bytes_per_sample).unwrap_or(0)
    }
}

impl Drop for MediaEngine {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferKind, DecodeResult};
    use crate::error::{DecodeError, SeekError};
    use crate::pool::BufferPool;
    use crate::seek::Landing;
    use crate::test_support::{LiveHandles, ScriptedBackend, ScriptedMedia};

    fn engine_with(media: ScriptedMedia, config: EngineConfig) -> (MediaEngine, Arc<BufferPool>, LiveHandles) {
        let backend = ScriptedBackend::new(media);
        let live = backend.live();
        let pool = Arc::new(BufferPool::new());
        let engine = MediaEngine::new(Arc::new(backend), pool.clone(), config);
        (engine, pool, live)
    }

    fn engine(media: ScriptedMedia) -> (MediaEngine, Arc<BufferPool>) {
        let (engine, pool, _) = engine_with(media, EngineConfig::default());
        (engine, pool)
    }

    fn next_video_pts(engine: &mut MediaEngine) -> i64 {
        loop {
            match engine.decode().unwrap() {
                Decoded::Video { pts_ms } => return pts_ms,
                Decoded::Audio { .. } => {}
                Decoded::EndOfStream => panic!("no more video"),
            }
        }
    }

    #[test]
    fn engine_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<MediaEngine>();
    }

    #[test]
    fn ten_second_clip_decodes_at_frame_rate() {
        let (mut engine, _pool) = engine(ScriptedMedia::av_clip());
        let info = engine.prepare("clip.mp4", false, 2).unwrap();
        // audio runs past the last video frame
        assert_eq!(info.duration_ms, 10_005);

        assert_eq!((engine.video_width(), engine.video_height()), (32, 16));
        assert!((engine.video_fps() - 30.0).abs() < 1e-9);
        assert_eq!(engine.audio_channels(), 2);
        assert_eq!(engine.audio_sample_rate(), 48_000);
        assert_eq!(engine.audio_bytes_per_sample(), 4);

        let pts: Vec<i64> = (0..4).map(|_| next_video_pts(&mut engine)).collect();
        assert_eq!(pts, vec![0, 33, 66, 100]);

        let mut video = DecodeBuffer::video();
        let mut audio = DecodeBuffer::audio();
        let report = engine.seek_to(5000, &mut video, &mut audio, true).unwrap();
        let landed = report.video.pts_ms().unwrap();
        assert!((5000 - landed) as f64 <= 1000.0 / 30.0);
        assert_eq!(video.pts_ms, landed);
        let audio_pts = report.audio.pts_ms().unwrap();
        assert!((5000 - audio_pts) as f64 <= 1024.0 * 1000.0 / 48_000.0);
    }

    #[test]
    fn linear_decode_ends_with_ordered_pts() {
        let (mut engine, pool) = engine(ScriptedMedia::av_clip());
        engine.prepare("clip.mp4", false, 2).unwrap();

        let mut last_video = -1;
        let mut last_audio = -1;
        loop {
            match engine.decode().unwrap() {
                Decoded::Video { pts_ms } => {
                    assert!(pts_ms >= last_video);
                    last_video = pts_ms;
                }
                Decoded::Audio { pts_ms, .. } => {
                    assert!(pts_ms >= last_audio);
                    last_audio = pts_ms;
                }
                Decoded::EndOfStream => break,
            }
            while let Some(buffer) = pool.pop_video() {
                pool.recycle(buffer);
            }
            while let Some(buffer) = pool.pop_audio() {
                pool.recycle(buffer);
            }
        }
        assert_eq!(last_video, 9966);
        assert_eq!(engine.decode().unwrap(), Decoded::EndOfStream);

        let marker = pool.pop_video().unwrap();
        assert!(marker.is_last_frame);
        assert_eq!(marker.result, DecodeResult::EndOfStream);
        assert_eq!(marker.pts_ms, 10_005);
        assert!(pool.pop_video().is_none());
    }

    #[test]
    fn audio_buffers_carry_pcm() {
        let (mut engine, pool) = engine(ScriptedMedia::audio_only(48_000, 2, 8));
        engine.prepare("song.flac", false, 1).unwrap();
        assert_eq!(engine.audio_channels(), 2);
        assert_eq!(engine.video_width(), 0);

        assert_eq!(engine.decode().unwrap(), Decoded::Audio { pts_ms: 0, frames: 1 });
        let buffer = pool.pop_audio().unwrap();
        assert_eq!(buffer.kind, BufferKind::Audio);
        let pcm = buffer.audio_payload().unwrap();
        assert_eq!(pcm.channels, 1);
        assert_eq!(pcm.pcm.len(), 1024 * 2);
    }

    #[test]
    fn reset_reproduces_first_frame() {
        let (mut engine, _pool) = engine(ScriptedMedia::av_clip());
        engine.prepare("clip.mp4", false, 2).unwrap();
        let first = engine.decode().unwrap();
        for _ in 0..25 {
            engine.decode().unwrap();
        }
        engine.reset_decode_progress().unwrap();
        assert_eq!(engine.decode().unwrap(), first);
        assert_eq!(first, Decoded::Video { pts_ms: 0 });
    }

    #[test]
    fn end_of_stream_marker_once_per_pass() {
        let (mut engine, pool) = engine(ScriptedMedia::video_only(30, 5));
        engine.prepare("clip.mp4", false, 2).unwrap();
        let markers = |engine: &mut MediaEngine| {
            while engine.decode().unwrap() != Decoded::EndOfStream {}
            engine.decode().unwrap();
            std::iter::from_fn(|| pool.pop_video())
                .filter(|b| b.is_last_frame)
                .count()
        };
        assert_eq!(markers(&mut engine), 1);
        engine.reset_decode_progress().unwrap();
        assert_eq!(markers(&mut engine), 1);
    }

    #[test]
    fn seek_convergence_respects_cycle_budget() {
        let mut media = ScriptedMedia::video_only(30, 300);
        if let Some(video) = media.video.as_mut() {
            video.gop = 1000;
        }
        let config = EngineConfig {
            max_video_seek_cycles: 10,
            ..EngineConfig::default()
        };
        let (mut engine, _pool, _) = engine_with(media, config);
        engine.prepare("clip.mp4", false, 2).unwrap();

        let mut video = DecodeBuffer::video();
        let mut audio = DecodeBuffer::audio();
        let report = engine.seek_to(5000, &mut video, &mut audio, true).unwrap();
        assert_eq!(report.video_cycles, 10);
        assert_eq!(report.video, Landing::CycleLimit { pts_ms: Some(300) });
    }

    #[test]
    fn seek_variants() {
        let (mut engine, _pool) = engine(ScriptedMedia::av_clip());
        engine.prepare("clip.mp4", false, 2).unwrap();
        let mut video = DecodeBuffer::video();
        let mut audio = DecodeBuffer::audio();

        let past = engine.seek_to(60_000, &mut video, &mut audio, true).unwrap();
        assert_eq!(past.video, Landing::EndOfStream);
        assert!(video.is_last_frame);

        let quiet = engine.seek_to(2000, &mut video, &mut audio, false).unwrap();
        assert_eq!((quiet.video, quiet.audio), (Landing::Skipped, Landing::Skipped));

        let clamped = engine.seek_to(-500, &mut video, &mut audio, true).unwrap();
        assert_eq!(clamped.target_ms, 0);
        assert_eq!(clamped.video, Landing::Landed { pts_ms: 0 });
    }

    #[test]
    fn audio_only_resync_leaves_video_alone() {
        let (mut engine, pool) = engine(ScriptedMedia::av_clip());
        assert!(engine.seek_options().is_none());
        engine.prepare("clip.mp4", false, 2).unwrap();

        let mut options = engine.seek_options().unwrap();
        assert!((options.min_audio_step_ms - 1024.0 * 1000.0 / 48_000.0).abs() < 1e-9);
        options.skip_video = true;

        let mut video = DecodeBuffer::video();
        let mut audio = DecodeBuffer::audio();
        let report = engine
            .seek_to_with_options(3000, &mut video, &mut audio, true, options)
            .unwrap();
        assert_eq!(report.video, Landing::Skipped);
        assert_eq!(report.video_cycles, 0);
        assert!(video.video_payload().map_or(true, |p| p.rgba.is_empty()));

        let audio_pts = report.audio.pts_ms().unwrap();
        assert!((3000 - audio_pts) as f64 <= 1024.0 * 1000.0 / 48_000.0);
        assert_eq!(audio.pts_ms, audio_pts);
        assert!(audio.audio_payload().is_some_and(|p| !p.pcm.is_empty()));
        assert!(pool.pop_audio().is_none());

        engine.release();
        assert!(matches!(
            engine.seek_to_with_options(0, &mut video, &mut audio, true, options),
            Err(EngineError::NotPrepared)
        ));
    }

    #[test]
    fn container_seek_failure_is_reported() {
        let media = ScriptedMedia {
            fail_seek: true,
            ..ScriptedMedia::av_clip()
        };
        let (mut engine, _pool) = engine(media);
        engine.prepare("clip.mp4", false, 2).unwrap();
        let mut video = DecodeBuffer::video();
        let mut audio = DecodeBuffer::audio();
        let err = engine.seek_to(1000, &mut video, &mut audio, true).unwrap_err();
        assert!(matches!(err, EngineError::Seek(SeekError::Container(_))));
        assert!(err.is_recoverable());
        // decoding carries on from where it was
        assert!(engine.decode().is_ok());
    }

    #[test]
    fn calls_before_prepare_are_rejected() {
        let (mut engine, _pool) = engine(ScriptedMedia::av_clip());
        assert!(matches!(engine.decode(), Err(EngineError::NotPrepared)));
        assert!(matches!(engine.reset_decode_progress(), Err(EngineError::NotPrepared)));
        assert!(engine.media_info().is_none());
        assert_eq!(engine.duration_ms(), 0);
    }

    #[test]
    fn prepare_twice_is_rejected() {
        let (mut engine, _pool) = engine(ScriptedMedia::av_clip());
        engine.prepare("clip.mp4", false, 2).unwrap();
        assert!(matches!(
            engine.prepare("clip.mp4", false, 2),
            Err(EngineError::Prepare(PrepareError::AlreadyPrepared))
        ));
    }

    #[test]
    fn release_after_failed_prepare_leaks_nothing() {
        let mut media = ScriptedMedia::av_clip();
        if let Some(audio) = media.audio.as_mut() {
            audio.has_decoder = false;
        }
        let (mut engine, _pool, live) = engine_with(media, EngineConfig::default());

        let err = engine.prepare("clip.mp4", false, 2).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Prepare(PrepareError::MissingAudioDecoder { .. })
        ));
        assert!(!engine.is_prepared());
        assert_eq!(live.total(), 0);
        assert!(live.opened() > 0);

        engine.release();
        engine.release();
        assert_eq!(live.total(), 0);
        assert!(matches!(
            engine.prepare("clip.mp4", false, 2),
            Err(EngineError::Prepare(PrepareError::Released))
        ));
        assert!(matches!(engine.decode(), Err(EngineError::NotPrepared)));
    }

    #[test]
    fn release_and_drop_close_the_context() {
        let (mut engine, _pool, live) = engine_with(ScriptedMedia::av_clip(), EngineConfig::default());
        engine.prepare("clip.mp4", false, 2).unwrap();
        assert_eq!(live.total(), 3);
        engine.release();
        assert_eq!(live.total(), 0);

        let (mut engine, _pool, live) = engine_with(ScriptedMedia::av_clip(), EngineConfig::default());
        engine.prepare("clip.mp4", false, 2).unwrap();
        drop(engine);
        assert_eq!(live.total(), 0);
    }

    #[test]
    fn decode_errors_leave_the_engine_usable() {
        let mut media = ScriptedMedia::video_only(30, 4);
        if let Some(video) = media.video.as_mut() {
            video.corrupt = vec![0];
        }
        let (mut engine, _pool) = engine(media);
        engine.prepare("clip.mp4", false, 2).unwrap();
        let err = engine.decode().unwrap_err();
        assert!(matches!(err, EngineError::Decode(DecodeError::Failed(_))));
        assert!(err.is_recoverable());
        assert_eq!(engine.decode().unwrap(), Decoded::Video { pts_ms: 33 });
    }

    #[cfg(feature = "audio")]
    #[test]
    fn native_backend_decodes_pcm_mp4() {
        use crate::backends::NativeBackend;
        use crate::test_support::mp4::{build_mp4, sowt_entry, FixtureSample, FixtureTrack};

        let track = FixtureTrack {
            handler: *b"soun",
            timescale: 48_000,
            sample_entry: sowt_entry(48_000, 2),
            samples: (0..4)
                .map(|_| FixtureSample::new(vec![0u8; 1024 * 2 * 2], 1024, true))
                .collect(),
            media_time: None,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.m4a");
        std::fs::write(&path, build_mp4(&[track])).unwrap();

        let pool = Arc::new(BufferPool::new());
        let mut engine = MediaEngine::new(Arc::new(NativeBackend::new()), pool.clone(), EngineConfig::default());
        let info = engine.prepare(&path, false, 2).unwrap();
        assert!(info.video.is_none());
        assert_eq!(engine.audio_sample_rate(), 48_000);

        assert_eq!(engine.decode().unwrap(), Decoded::Audio { pts_ms: 0, frames: 1 });
        let buffer = pool.pop_audio().unwrap();
        assert_eq!(buffer.audio_payload().map(|p| p.pcm.len()), Some(1024 * 2 * 2));
        engine.release();
    }

    #[cfg(feature = "software-decode")]
    #[test]
    fn native_backend_decodes_h264_mp4() {
        use crate::backends::NativeBackend;
        use crate::test_support::h264;
        use crate::test_support::mp4::{avc1_entry, build_mp4, FixtureSample, FixtureTrack};

        let pictures = h264::encode(64, 48, 60, 12);
        let track = FixtureTrack {
            handler: *b"vide",
            timescale: 90_000,
            sample_entry: avc1_entry(64, 48, &h264::avcc_record(&pictures[0])),
            samples: pictures
                .iter()
                .map(|p| FixtureSample::new(h264::avcc_sample(p), 3000, p.keyframe))
                .collect(),
            media_time: None,
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, build_mp4(&[track])).unwrap();

        let pool = Arc::new(BufferPool::new());
        let mut engine = MediaEngine::new(Arc::new(NativeBackend::new()), pool.clone(), EngineConfig::default());
        let info = engine.prepare(&path, false, 2).unwrap();
        assert!(info.audio.is_none());
        assert_eq!(info.duration_ms, 2000);
        assert_eq!((engine.video_width(), engine.video_height()), (64, 48));
        assert!((engine.video_fps() - 30.0).abs() < 1e-9);

        let pts: Vec<i64> = (0..4).map(|_| next_video_pts(&mut engine)).collect();
        assert_eq!(pts, vec![0, 33, 66, 100]);
        let frame = pool.pop_video().unwrap();
        assert_eq!(frame.result, DecodeResult::Success);
        assert_eq!(frame.video_payload().map(|p| (p.width, p.height)), Some((64, 48)));

        let mut video = DecodeBuffer::video();
        let mut audio = DecodeBuffer::audio();
        let report = engine.seek_to(1000, &mut video, &mut audio, true).unwrap();
        let landed = report.video.pts_ms().unwrap();
        assert!((1000 - landed) as f64 <= 1000.0 / 30.0, "landed at {}", landed);
        assert_eq!(video.pts_ms, landed);
        assert_eq!(report.audio, Landing::Skipped);
        // keyframe 24 (800 ms) is the seek anchor
        assert!(report.discarded_video_frames >= 5);

        assert_eq!(next_video_pts(&mut engine), 1033);
        engine.release();
    }
}
