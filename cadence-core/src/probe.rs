//! # Stream Prober
//!
//! Opens a container, picks the first video and the first audio stream, opens
//! their decoders and derives everything the host reads back after prepare.
//!
//! Decoder policy is deliberately asymmetric:
//! - video without a decoder is logged and left undecoded
//! - audio without a decoder fails the whole prepare

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::backend::{Demuxer, MediaBackend};
use crate::config::EngineConfig;
use crate::context::{AudioTrack, MediaContext, VideoTrack};
use crate::error::PrepareError;
use crate::media::{MediaKind, SampleFormat, StreamInfo};
use crate::pixel::{ColorSpace, PixelConverter};
use crate::resample::AudioResampler;
use crate::time_base::Rational;

/// Everything known about an open file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MediaInfo {
    pub path: String,
    pub container: String,
    /// Longest of the selected streams, in ms.
    pub duration_ms: i64,
    pub video: Option<VideoInfo>,
    pub audio: Option<AudioInfo>,
    /// Streams present in the file but not selected.
    pub ignored_streams: Vec<u32>,
    /// Container tags such as `title` or `artist`.
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoInfo {
    pub stream_index: u32,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub time_base: Rational,
    pub duration_ms: i64,
    /// False when no decoder could be found; the stream is then skipped.
    pub decodable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioInfo {
    pub stream_index: u32,
    pub codec: String,
    pub channels: u16,
    pub sample_rate: u32,
    pub sample_format: SampleFormat,
    pub bytes_per_sample: u16,
    pub time_base: Rational,
    pub duration_ms: i64,
    /// PCM layout handed to the host.
    pub output_sample_rate: u32,
    pub output_channels: u16,
}

impl MediaInfo {
    pub fn width(&self) -> u32 {
        self.video.as_ref().map(|v| v.width).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.video.as_ref().map(|v| v.height).unwrap_or(0)
    }

    pub fn fps(&self) -> f64 {
        self.video.as_ref().map(|v| v.fps).unwrap_or(0.0)
    }

    pub fn audio_channels(&self) -> u16 {
        self.audio.as_ref().map(|a| a.channels).unwrap_or(0)
    }

    pub fn audio_sample_rate(&self) -> u32 {
        self.audio.as_ref().map(|a| a.sample_rate).unwrap_or(0)
    }

    pub fn audio_bytes_per_sample(&self) -> u16 {
        self.audio.as_ref().map(|a| a.bytes_per_sample).unwrap_or(0)
    }

    pub fn has_decodable_video(&self) -> bool {
        self.video.as_ref().is_some_and(|v| v.decodable)
    }

    fn describe_video(stream: &StreamInfo, decodable: bool) -> VideoInfo {
        let (width, height) = stream
            .video
            .as_ref()
            .map(|v| (v.width, v.height))
            .unwrap_or((0, 0));
        VideoInfo {
            stream_index: stream.index,
            codec: stream.codec.to_string(),
            width,
            height,
            fps: stream.frame_rate(),
            time_base: stream.time_base,
            duration_ms: stream.duration_ms(),
            decodable,
        }
    }

    fn describe_audio(stream: &StreamInfo, output_sample_rate: u32, output_channels: u16) -> AudioInfo {
        let params = stream.audio.as_ref();
        let sample_format = params.map(|a| a.sample_format).unwrap_or(SampleFormat::F32);
        AudioInfo {
            stream_index: stream.index,
            codec: stream.codec.to_string(),
            channels: params.map(|a| a.channels).unwrap_or(0),
            sample_rate: params.map(|a| a.sample_rate).unwrap_or(0),
            sample_format,
            bytes_per_sample: sample_format.bytes_per_sample(),
            time_base: stream.time_base,
            duration_ms: stream.duration_ms(),
            output_sample_rate,
            output_channels,
        }
    }
}

/// Open `path` and build a ready-to-decode context.
///
/// `target_audio_channels` of 0 selects the configured default; anything
/// else is clamped to mono or stereo.
pub fn probe(
    backend: &dyn MediaBackend,
    path: &Path,
    request_hardware: bool,
    target_audio_channels: u16,
    config: &EngineConfig,
) -> Result<MediaContext, PrepareError> {
    open_context(backend, path, request_hardware, Some(target_audio_channels), config)
}

/// Like [`probe`] but never selects or decodes audio.
pub fn probe_video(
    backend: &dyn MediaBackend,
    path: &Path,
    request_hardware: bool,
    config: &EngineConfig,
) -> Result<MediaContext, PrepareError> {
    open_context(backend, path, request_hardware, None, config)
}

fn open_context(
    backend: &dyn MediaBackend,
    path: &Path,
    request_hardware: bool,
    audio_channels: Option<u16>,
    config: &EngineConfig,
) -> Result<MediaContext, PrepareError> {
    info!("Preparing {}", path.display());

    let demuxer = backend.open(path).map_err(|e| {
        error!("Cannot open {}: {}", path.display(), e);
        PrepareError::Open(e)
    })?;

    let (video_stream, audio_stream, ignored) = select_streams(demuxer.as_ref(), audio_channels.is_some())?;

    let video = match &video_stream {
        Some(stream) => open_video(backend, stream, request_hardware, config)?,
        None => None,
    };

    let audio = match (&audio_stream, audio_channels) {
        (Some(stream), Some(requested)) => Some(open_audio(backend, stream, requested, config)?),
        _ => None,
    };

    let mut info = MediaInfo {
        path: path.display().to_string(),
        container: demuxer.format_name().to_string(),
        ignored_streams: ignored,
        tags: demuxer.tags().iter().cloned().collect(),
        ..MediaInfo::default()
    };
    info.video = video_stream
        .as_ref()
        .map(|s| MediaInfo::describe_video(s, video.is_some()));
    info.audio = match (&audio_stream, &audio) {
        (Some(stream), Some(track)) => Some(MediaInfo::describe_audio(
            stream,
            track.resampler.out_rate(),
            track.resampler.out_channels(),
        )),
        _ => None,
    };
    let video_ms = info.video.as_ref().map(|v| v.duration_ms).unwrap_or(0);
    let audio_ms = info.audio.as_ref().map(|a| a.duration_ms).unwrap_or(0);
    info.duration_ms = video_ms.max(audio_ms);

    info!(
        "Prepared {} ({}): video {}x{} @ {:.3} fps{}, audio {} Hz x{}, duration {} ms",
        path.display(),
        info.container,
        info.width(),
        info.height(),
        info.fps(),
        if info.video.is_some() && video.is_none() {
            " (not decodable)"
        } else {
            ""
        },
        info.audio_sample_rate(),
        info.audio_channels(),
        info.duration_ms
    );

    Ok(MediaContext::new(demuxer, video, audio, info))
}

/// First video and first audio stream by index order, plus the indices left out.
fn select_streams(
    demuxer: &dyn Demuxer,
    want_audio: bool,
) -> Result<(Option<StreamInfo>, Option<StreamInfo>, Vec<u32>), PrepareError> {
    let streams = demuxer.streams();
    if streams.is_empty() {
        error!("{}: container reports no streams", demuxer.format_name());
        return Err(PrepareError::NoStreamInfo);
    }

    let mut video: Option<StreamInfo> = None;
    let mut audio: Option<StreamInfo> = None;
    let mut ignored = Vec::new();
    for stream in streams {
        match stream.kind {
            MediaKind::Video if video.is_none() => video = Some(stream.clone()),
            MediaKind::Audio if want_audio && audio.is_none() => audio = Some(stream.clone()),
            kind => {
                debug!("Ignoring stream {} ({:?}, {})", stream.index, kind, stream.codec);
                ignored.push(stream.index);
            }
        }
    }

    if video.is_none() && audio.is_none() {
        error!("No audio or video stream among {} stream(s)", streams.len());
        return Err(PrepareError::NoStreams);
    }
    Ok((video, audio, ignored))
}

fn open_video(
    backend: &dyn MediaBackend,
    stream: &StreamInfo,
    request_hardware: bool,
    config: &EngineConfig,
) -> Result<Option<VideoTrack>, PrepareError> {
    let decoder = backend
        .video_decoder(stream, request_hardware)
        .map_err(|source| PrepareError::DecoderOpen { kind: "video", source })?;

    let Some(decoder) = decoder else {
        error!(
            "No decoder for video stream {} ({}); video will not be decoded",
            stream.index, stream.codec
        );
        return Ok(None);
    };

    let (width, height) = stream
        .video
        .as_ref()
        .map(|v| (v.width, v.height))
        .unwrap_or((0, 0));
    let converter = PixelConverter::new(width, height, config.video_output, ColorSpace::for_height(height));

    let fps = stream.frame_rate();
    let min_step_ms = if fps > 0.0 {
        1000.0 / fps
    } else {
        config.video_min_step_fallback_ms
    };

    debug!(
        "Video stream {}: {} {}x{}, decoder {}",
        stream.index,
        stream.codec,
        width,
        height,
        decoder.name()
    );
    Ok(Some(VideoTrack {
        index: stream.index,
        time_base: stream.time_base,
        decoder,
        converter,
        min_step_ms,
    }))
}

fn open_audio(
    backend: &dyn MediaBackend,
    stream: &StreamInfo,
    requested_channels: u16,
    config: &EngineConfig,
) -> Result<AudioTrack, PrepareError> {
    let decoder = backend
        .audio_decoder(stream)
        .map_err(|source| PrepareError::DecoderOpen { kind: "audio", source })?
        .ok_or_else(|| {
            error!("No decoder for audio stream {} ({})", stream.index, stream.codec);
            PrepareError::MissingAudioDecoder {
                codec: stream.codec.to_string(),
            }
        })?;

    let channels = config.output_channels(requested_channels);
    let resampler = AudioResampler::new(config.audio_output_sample_rate, channels)
        .map_err(PrepareError::Resampler)?;

    let sample_rate = stream.audio.as_ref().map(|a| a.sample_rate).unwrap_or(0);
    debug!(
        "Audio stream {}: {} {} Hz -> {} Hz x{}, decoder {}",
        stream.index,
        stream.codec,
        sample_rate,
        config.audio_output_sample_rate,
        channels,
        decoder.name()
    );
    Ok(AudioTrack {
        index: stream.index,
        time_base: stream.time_base,
        decoder,
        resampler,
        sample_rate,
        last_frame_ms: None,
    })
}
