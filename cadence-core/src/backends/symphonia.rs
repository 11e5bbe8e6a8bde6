// SYMPHONIA - audio containers and audio codecs
//
// Two roles:
// - demuxer for audio-only containers (WAV, FLAC, MP3, OGG, MKV audio...)
// - audio decoder for any stream whose codec Symphonia knows, whichever
//   demuxer produced it; codec parameters are rebuilt from `StreamInfo`

use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;

use ::symphonia::core::audio::{Channels, SampleBuffer, SignalSpec};
use ::symphonia::core::codecs::{self as sym_codecs, CodecParameters, CodecType, DecoderOptions};
use ::symphonia::core::errors::Error as SymphoniaError;
use ::symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use ::symphonia::core::io::MediaSourceStream;
use ::symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey, Tag};
use ::symphonia::core::probe::Hint;
use ::symphonia::core::units::TimeBase;
use tracing::{debug, info, warn};

use crate::backend::{AudioDecoder, Demuxer};
use crate::error::{DecodeError, DemuxError};
use crate::frame::AudioFrame;
use crate::media::{AudioParams, CodecId, MediaKind, SampleFormat, StreamInfo};
use crate::packet::Packet;
use crate::time_base::Rational;

// ============================================================================
// Codec mapping
// ============================================================================

/// Symphonia codec type for one of our codec ids.
pub fn codec_type_for(codec: &CodecId) -> Option<CodecType> {
    use SampleFormat::*;
    let ty = match codec {
        CodecId::Aac => sym_codecs::CODEC_TYPE_AAC,
        CodecId::Mp3 => sym_codecs::CODEC_TYPE_MP3,
        CodecId::Flac => sym_codecs::CODEC_TYPE_FLAC,
        CodecId::Vorbis => sym_codecs::CODEC_TYPE_VORBIS,
        CodecId::Opus => sym_codecs::CODEC_TYPE_OPUS,
        CodecId::Alac => sym_codecs::CODEC_TYPE_ALAC,
        // symphonia 0.5 has a single Dolby Digital codec type
        CodecId::Ac3 | CodecId::Eac3 => sym_codecs::CODEC_TYPE_EAC3,
        CodecId::Pcm { format, big_endian } => match (format, big_endian) {
            (U8, _) => sym_codecs::CODEC_TYPE_PCM_U8,
            (S16, false) => sym_codecs::CODEC_TYPE_PCM_S16LE,
            (S16, true) => sym_codecs::CODEC_TYPE_PCM_S16BE,
            (S24, false) => sym_codecs::CODEC_TYPE_PCM_S24LE,
            (S24, true) => sym_codecs::CODEC_TYPE_PCM_S24BE,
            (S32, false) => sym_codecs::CODEC_TYPE_PCM_S32LE,
            (S32, true) => sym_codecs::CODEC_TYPE_PCM_S32BE,
            (F32, false) => sym_codecs::CODEC_TYPE_PCM_F32LE,
            (F32, true) => sym_codecs::CODEC_TYPE_PCM_F32BE,
            (F64, false) => sym_codecs::CODEC_TYPE_PCM_F64LE,
            (F64, true) => sym_codecs::CODEC_TYPE_PCM_F64BE,
        },
        _ => return None,
    };
    Some(ty)
}

fn codec_id_for(ty: CodecType) -> CodecId {
    let pcm = |format, big_endian| CodecId::Pcm { format, big_endian };
    match ty {
        sym_codecs::CODEC_TYPE_AAC => CodecId::Aac,
        sym_codecs::CODEC_TYPE_MP3 => CodecId::Mp3,
        sym_codecs::CODEC_TYPE_FLAC => CodecId::Flac,
        sym_codecs::CODEC_TYPE_VORBIS => CodecId::Vorbis,
        sym_codecs::CODEC_TYPE_OPUS => CodecId::Opus,
        sym_codecs::CODEC_TYPE_ALAC => CodecId::Alac,
        sym_codecs::CODEC_TYPE_EAC3 => CodecId::Eac3,
        sym_codecs::CODEC_TYPE_PCM_U8 => pcm(SampleFormat::U8, false),
        sym_codecs::CODEC_TYPE_PCM_S16LE => pcm(SampleFormat::S16, false),
        sym_codecs::CODEC_TYPE_PCM_S16BE => pcm(SampleFormat::S16, true),
        sym_codecs::CODEC_TYPE_PCM_S24LE => pcm(SampleFormat::S24, false),
        sym_codecs::CODEC_TYPE_PCM_S24BE => pcm(SampleFormat::S24, true),
        sym_codecs::CODEC_TYPE_PCM_S32LE => pcm(SampleFormat::S32, false),
        sym_codecs::CODEC_TYPE_PCM_S32BE => pcm(SampleFormat::S32, true),
        sym_codecs::CODEC_TYPE_PCM_F32LE => pcm(SampleFormat::F32, false),
        sym_codecs::CODEC_TYPE_PCM_F32BE => pcm(SampleFormat::F32, true),
        sym_codecs::CODEC_TYPE_PCM_F64LE => pcm(SampleFormat::F64, false),
        sym_codecs::CODEC_TYPE_PCM_F64BE => pcm(SampleFormat::F64, true),
        other => CodecId::Other(
            ::symphonia::default::get_codecs()
                .get_codec(other)
                .map(|d| d.short_name.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        ),
    }
}

fn sample_format_for(params: &CodecParameters, codec: &CodecId) -> SampleFormat {
    use ::symphonia::core::sample::SampleFormat as Sym;
    if let CodecId::Pcm { format, .. } = codec {
        return *format;
    }
    match params.sample_format {
        Some(Sym::U8) => SampleFormat::U8,
        Some(Sym::S16) => SampleFormat::S16,
        Some(Sym::S24) => SampleFormat::S24,
        Some(Sym::S32) => SampleFormat::S32,
        Some(Sym::F64) => SampleFormat::F64,
        _ => SampleFormat::F32,
    }
}

// ============================================================================
// Demuxer
// ============================================================================

pub struct SymphoniaDemuxer {
    format: Box<dyn FormatReader>,
    streams: Vec<StreamInfo>,
    track_ids: Vec<u32>,
    tags: Vec<(String, String)>,
}

impl SymphoniaDemuxer {
    pub fn open(path: &Path) -> Result<Self, DemuxError> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let mut probed = ::symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DemuxError::Unsupported(format!("{}: {}", path.display(), e)))?;

        // Tags ahead of the container (ID3v2) first, then the container's own
        let mut tags = Vec::new();
        if let Some(mut metadata) = probed.metadata.get() {
            collect_tags(metadata.skip_to_latest(), &mut tags);
        }
        let mut format = probed.format;
        collect_tags(format.metadata().skip_to_latest(), &mut tags);

        let mut streams = Vec::new();
        let mut track_ids = Vec::new();
        for track in format.tracks() {
            let index = streams.len() as u32;
            streams.push(stream_from_params(index, &track.codec_params));
            track_ids.push(track.id);
        }
        info!(
            "Symphonia opened {} with {} track(s), {} tag(s)",
            path.display(),
            streams.len(),
            tags.len()
        );

        Ok(Self {
            format,
            streams,
            track_ids,
            tags,
        })
    }
}

fn tag_name(tag: &Tag) -> String {
    let name = match tag.std_key {
        Some(StandardTagKey::TrackTitle) => "title",
        Some(StandardTagKey::Artist) => "artist",
        Some(StandardTagKey::AlbumArtist) => "album_artist",
        Some(StandardTagKey::Album) => "album",
        Some(StandardTagKey::Date) | Some(StandardTagKey::ReleaseDate) => "date",
        Some(StandardTagKey::Genre) => "genre",
        Some(StandardTagKey::Comment) => "comment",
        Some(StandardTagKey::Encoder) => "encoder",
        Some(StandardTagKey::Composer) => "composer",
        Some(StandardTagKey::Description) => "description",
        Some(StandardTagKey::Copyright) => "copyright",
        _ => return tag.key.to_lowercase(),
    };
    name.to_string()
}

/// Later tags with the same name replace earlier ones.
fn collect_tags(revision: Option<&MetadataRevision>, tags: &mut Vec<(String, String)>) {
    let Some(revision) = revision else {
        return;
    };
    for tag in revision.tags() {
        // RIFF INFO strings keep their terminator
        let value = tag.value.to_string().trim_end_matches('\0').to_string();
        if value.is_empty() {
            continue;
        }
        let name = tag_name(tag);
        match tags.iter_mut().find(|(key, _)| *key == name) {
            Some(existing) => existing.1 = value,
            None => tags.push((name, value)),
        }
    }
}

fn stream_from_params(index: u32, params: &CodecParameters) -> StreamInfo {
    let rate = params.sample_rate.unwrap_or(0);
    let time_base = params
        .time_base
        .map(|tb| Rational::new(tb.numer as i64, tb.denom as i64))
        .unwrap_or_else(|| Rational::per_second(rate.max(1) as i64));

    // n_frames counts samples; express it in time_base ticks
    let duration = params.n_frames.filter(|_| rate > 0).map(|frames| {
        let ticks = frames as i128 * time_base.den as i128 / (rate as i128 * time_base.num.max(1) as i128);
        ticks as i64
    });

    let codec = codec_id_for(params.codec);
    let kind = if params.codec == sym_codecs::CODEC_TYPE_NULL {
        MediaKind::Unknown
    } else {
        MediaKind::Audio
    };
    let audio = (kind == MediaKind::Audio).then(|| AudioParams {
        sample_rate: rate,
        channels: params.channels.map(|c| c.count() as u16).unwrap_or(0),
        sample_format: sample_format_for(params, &codec),
        bits_per_sample: params.bits_per_coded_sample.or(params.bits_per_sample),
        max_frames_per_packet: params.max_frames_per_packet,
    });

    StreamInfo {
        index,
        kind,
        codec,
        time_base,
        duration,
        video: None,
        audio,
        extra_data: params.extra_data.as_deref().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

impl Demuxer for SymphoniaDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self, packet: &mut Packet) -> Result<bool, DemuxError> {
        loop {
            let next = match self.format.next_packet() {
                Ok(p) => p,
                // Symphonia signals end of stream as an I/O error
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(false);
                }
                Err(SymphoniaError::IoError(e)) => return Err(DemuxError::Io(e)),
                Err(SymphoniaError::ResetRequired) => {
                    warn!("Symphonia stream requires reset; treating as end of stream");
                    return Ok(false);
                }
                Err(e) => return Err(DemuxError::Backend(format!("symphonia: {}", e))),
            };

            let Some(index) = self.track_ids.iter().position(|&id| id == next.track_id()) else {
                continue;
            };

            packet.stream_index = index as u32;
            packet.pts = Some(next.ts() as i64);
            packet.dts = Some(next.ts() as i64);
            packet.duration = next.dur() as i64;
            packet.keyframe = true;
            packet.data.clear();
            packet.data.extend_from_slice(next.buf());
            return Ok(true);
        }
    }

    fn seek(&mut self, stream_index: u32, timestamp: i64, backward: bool) -> Result<(), DemuxError> {
        let track_id = *self
            .track_ids
            .get(stream_index as usize)
            .ok_or(DemuxError::NoSuchStream(stream_index))?;
        let mode = if backward {
            SeekMode::Accurate
        } else {
            SeekMode::Coarse
        };
        let seeked = self
            .format
            .seek(
                mode,
                SeekTo::TimeStamp {
                    ts: timestamp.max(0) as u64,
                    track_id,
                },
            )
            .map_err(|e| DemuxError::Backend(format!("symphonia seek: {}", e)))?;
        debug!(
            "Symphonia seek track {}: required {} actual {}",
            track_id, seeked.required_ts, seeked.actual_ts
        );
        Ok(())
    }

    fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    fn format_name(&self) -> &str {
        "symphonia"
    }
}

// ============================================================================
// Audio decoder
// ============================================================================

pub struct SymphoniaAudioDecoder {
    decoder: Box<dyn sym_codecs::Decoder>,
    sample_buf: Option<(SignalSpec, SampleBuffer<f32>)>,
    ready: VecDeque<AudioFrame>,
    spare: Vec<AudioFrame>,
    name: String,
}

impl SymphoniaAudioDecoder {
    /// `Ok(None)` when Symphonia has no decoder for the stream's codec.
    pub fn new(stream: &StreamInfo) -> Result<Option<Self>, DecodeError> {
        let Some(codec) = codec_type_for(&stream.codec) else {
            return Ok(None);
        };
        let registry = ::symphonia::default::get_codecs();
        let Some(descriptor) = registry.get_codec(codec) else {
            return Ok(None);
        };

        let params = codec_parameters(stream, codec);
        let decoder = registry
            .make(&params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Failed(format!("{} init failed: {}", descriptor.short_name, e)))?;

        Ok(Some(Self {
            decoder,
            sample_buf: None,
            ready: VecDeque::new(),
            spare: Vec::new(),
            name: format!("symphonia/{}", descriptor.short_name),
        }))
    }
}

fn codec_parameters(stream: &StreamInfo, codec: CodecType) -> CodecParameters {
    let mut params = CodecParameters::new();
    params.for_codec(codec);

    if let Some(audio) = &stream.audio {
        if audio.sample_rate > 0 {
            params.with_sample_rate(audio.sample_rate);
        }
        if audio.channels > 0 && audio.channels <= 32 {
            let mask = if audio.channels == 32 {
                u32::MAX
            } else {
                (1u32 << audio.channels) - 1
            };
            params.with_channels(Channels::from_bits_truncate(mask));
        }
        let bits = audio
            .bits_per_sample
            .unwrap_or(audio.sample_format.bytes_per_sample() as u32 * 8);
        params.with_bits_per_sample(bits);
        params.with_bits_per_coded_sample(bits);
        if let Some(frames) = audio.max_frames_per_packet {
            params.with_max_frames_per_packet(frames);
        }
    }
    if stream.time_base.is_valid() && stream.time_base.num <= u32::MAX as i64 && stream.time_base.den <= u32::MAX as i64 {
        params.with_time_base(TimeBase::new(stream.time_base.num as u32, stream.time_base.den as u32));
    }
    if !stream.extra_data.is_empty() {
        params.with_extra_data(stream.extra_data.clone().into_boxed_slice());
    }
    params
}

impl AudioDecoder for SymphoniaAudioDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError> {
        let ts = packet.timestamp().unwrap_or(0).max(0) as u64;
        let sym_packet = ::symphonia::core::formats::Packet::new_from_slice(
            0,
            ts,
            packet.duration.max(0) as u64,
            &packet.data,
        );

        let failure = match self.decoder.decode(&sym_packet) {
            Ok(decoded) => {
                if decoded.frames() > 0 {
                    let spec = *decoded.spec();
                    let fits = matches!(
                        &self.sample_buf,
                        Some((current, buf)) if *current == spec
                            && buf.capacity() >= decoded.capacity() * spec.channels.count()
                    );
                    if !fits {
                        self.sample_buf = Some((spec, SampleBuffer::new(decoded.capacity() as u64, spec)));
                    }
                    if let Some((_, buf)) = self.sample_buf.as_mut() {
                        buf.copy_interleaved_ref(decoded);

                        let mut frame = self.spare.pop().unwrap_or_default();
                        frame.unref();
                        frame.sample_rate = spec.rate;
                        frame.channels = spec.channels.count() as u16;
                        frame.samples.extend_from_slice(buf.samples());
                        frame.pts = packet.timestamp();
                        self.ready.push_back(frame);
                    }
                }
                return Ok(());
            }
            Err(e) => e,
        };

        if matches!(failure, SymphoniaError::ResetRequired) {
            self.decoder.reset();
        }
        Err(DecodeError::Failed(format!("{}: {}", self.name, failure)))
    }

    fn receive_frame(&mut self, frame: &mut AudioFrame) -> Result<(), DecodeError> {
        let mut staged = self.ready.pop_front().ok_or(DecodeError::NeedMoreData)?;
        std::mem::swap(frame, &mut staged);
        self.spare.push(staged);
        Ok(())
    }

    fn flush(&mut self) {
        self.decoder.reset();
        while let Some(frame) = self.ready.pop_front() {
            self.spare.push(frame);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
