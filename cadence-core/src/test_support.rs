//! Fixtures shared by the unit tests: an in-memory scripted codec library
//! with live-handle counters, an MP4 writer, a WAV writer and real H.264
//! pictures from OpenH264.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::backend::{AudioDecoder, Demuxer, MediaBackend, VideoDecoder};
use crate::error::{DecodeError, DemuxError};
use crate::frame::{AudioFrame, VideoFrame};
use crate::media::{AudioParams, CodecId, MediaKind, SampleFormat, StreamInfo, VideoParams};
use crate::packet::Packet;
use crate::pixel::PixelFormat;
use crate::time_base::Rational;

pub const VIDEO_TIMESCALE: i64 = 90_000;

// ============================================================================
// Scripted media
// ============================================================================

#[derive(Debug, Clone)]
pub struct VideoScript {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frames: u32,
    /// Keyframe every `gop` frames.
    pub gop: u32,
    /// Frames held back by the decoder before the first output.
    pub delay: usize,
    pub has_decoder: bool,
    /// Frame numbers the decoder rejects.
    pub corrupt: Vec<u32>,
    /// Frame numbers turned away with `NeedMoreData` the first time they
    /// are sent, as a decoder with full output would.
    pub refuse_once: Vec<u32>,
}

impl VideoScript {
    pub fn new(fps: u32, frames: u32) -> Self {
        Self {
            width: 32,
            height: 16,
            fps,
            frames,
            gop: 12,
            delay: 0,
            has_decoder: true,
            corrupt: Vec::new(),
            refuse_once: Vec::new(),
        }
    }

    fn ticks_per_frame(&self) -> i64 {
        VIDEO_TIMESCALE / self.fps as i64
    }
}

#[derive(Debug, Clone)]
pub struct AudioScript {
    pub sample_rate: u32,
    pub channels: u16,
    pub packet_samples: u32,
    pub packets: u32,
    /// Frames the decoder splits each packet into.
    pub frames_per_packet: u32,
    pub has_decoder: bool,
    /// Packet numbers that decode to nothing.
    pub silent: Vec<u32>,
    pub refuse_once: Vec<u32>,
}

impl AudioScript {
    pub fn new(sample_rate: u32, channels: u16, packets: u32) -> Self {
        Self {
            sample_rate,
            channels,
            packet_samples: 1024,
            packets,
            frames_per_packet: 1,
            has_decoder: true,
            silent: Vec::new(),
            refuse_once: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedMedia {
    pub video: Option<VideoScript>,
    pub audio: Option<AudioScript>,
    /// Adds a timed-metadata stream after the audio/video streams.
    pub data_stream: bool,
    /// `open` fails as if the file did not exist.
    pub missing: bool,
    pub fail_seek: bool,
    /// Container tags reported by the demuxer.
    pub tags: Vec<(String, String)>,
}

impl ScriptedMedia {
    /// Ten seconds of 30 fps video with 48 kHz stereo audio.
    pub fn av_clip() -> Self {
        Self {
            video: Some(VideoScript::new(30, 300)),
            audio: Some(AudioScript::new(48_000, 2, 469)),
            ..Self::default()
        }
    }

    pub fn video_only(fps: u32, frames: u32) -> Self {
        Self {
            video: Some(VideoScript::new(fps, frames)),
            ..Self::default()
        }
    }

    pub fn audio_only(sample_rate: u32, channels: u16, packets: u32) -> Self {
        Self {
            audio: Some(AudioScript::new(sample_rate, channels, packets)),
            ..Self::default()
        }
    }

    fn streams(&self) -> Vec<StreamInfo> {
        let mut streams = Vec::new();
        if let Some(video) = &self.video {
            streams.push(StreamInfo {
                index: streams.len() as u32,
                kind: MediaKind::Video,
                codec: CodecId::H264,
                time_base: Rational::per_second(VIDEO_TIMESCALE),
                duration: Some(video.frames as i64 * video.ticks_per_frame()),
                video: Some(VideoParams {
                    width: video.width,
                    height: video.height,
                    frame_rate: Rational::new(video.fps as i64, 1),
                }),
                audio: None,
                extra_data: Vec::new(),
            });
        }
        if let Some(audio) = &self.audio {
            streams.push(StreamInfo {
                index: streams.len() as u32,
                kind: MediaKind::Audio,
                codec: CodecId::Aac,
                time_base: Rational::per_second(audio.sample_rate as i64),
                duration: Some(audio.packets as i64 * audio.packet_samples as i64),
                video: None,
                audio: Some(AudioParams {
                    sample_rate: audio.sample_rate,
                    channels: audio.channels,
                    sample_format: SampleFormat::F32,
                    bits_per_sample: None,
                    max_frames_per_packet: Some(audio.packet_samples as u64),
                }),
                extra_data: Vec::new(),
            });
        }
        if self.data_stream {
            streams.push(StreamInfo {
                index: streams.len() as u32,
                kind: MediaKind::Data,
                codec: CodecId::Other("tmcd".into()),
                time_base: Rational::MILLIS,
                duration: Some(1000),
                video: None,
                audio: None,
                extra_data: Vec::new(),
            });
        }
        streams
    }

    /// Every packet of the file in container order.
    fn packets(&self, streams: &[StreamInfo]) -> Vec<ScriptedPacket> {
        let mut packets = Vec::new();
        let mut index = 0u32;
        if let Some(video) = &self.video {
            let step = video.ticks_per_frame();
            packets.extend((0..video.frames).map(|n| ScriptedPacket {
                stream: index,
                number: n,
                pts: n as i64 * step,
                duration: step,
                keyframe: n % video.gop.max(1) == 0,
            }));
            index += 1;
        }
        if let Some(audio) = &self.audio {
            let step = audio.packet_samples as i64;
            packets.extend((0..audio.packets).map(|n| ScriptedPacket {
                stream: index,
                number: n,
                pts: n as i64 * step,
                duration: step,
                keyframe: true,
            }));
            index += 1;
        }
        if self.data_stream {
            packets.extend((0..4).map(|n| ScriptedPacket {
                stream: index,
                number: n,
                pts: n as i64 * 250,
                duration: 250,
                keyframe: true,
            }));
        }

        let micros = |p: &ScriptedPacket| {
            let tb = streams[p.stream as usize].time_base;
            p.pts as i128 * 1_000_000 * tb.num as i128 / tb.den as i128
        };
        packets.sort_by_key(|p| (micros(p), p.stream));
        packets
    }
}

#[derive(Debug, Clone, Copy)]
struct ScriptedPacket {
    stream: u32,
    number: u32,
    pts: i64,
    duration: i64,
    keyframe: bool,
}

/// Handles currently alive, per kind. All zero once everything is closed.
#[derive(Debug, Clone, Default)]
pub struct LiveHandles {
    pub demuxers: Arc<AtomicUsize>,
    pub video_decoders: Arc<AtomicUsize>,
    pub audio_decoders: Arc<AtomicUsize>,
    pub opened: Arc<AtomicUsize>,
}

impl LiveHandles {
    pub fn total(&self) -> usize {
        self.demuxers.load(Ordering::SeqCst)
            + self.video_decoders.load(Ordering::SeqCst)
            + self.audio_decoders.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ScriptedBackend {
    media: ScriptedMedia,
    live: LiveHandles,
}

impl ScriptedBackend {
    pub fn new(media: ScriptedMedia) -> Self {
        Self {
            media,
            live: LiveHandles::default(),
        }
    }

    pub fn live(&self) -> LiveHandles {
        self.live.clone()
    }
}

impl MediaBackend for ScriptedBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn Demuxer>, DemuxError> {
        if self.media.missing {
            return Err(DemuxError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )));
        }
        self.live.opened.fetch_add(1, Ordering::SeqCst);
        let streams = self.media.streams();
        let packets = self.media.packets(&streams);
        Ok(Box::new(ScriptedDemuxer {
            streams,
            packets,
            cursor: 0,
            fail_seek: self.media.fail_seek,
            tags: self.media.tags.clone(),
            _live: LiveGuard::new(&self.live.demuxers),
        }))
    }

    fn video_decoder(
        &self,
        _stream: &StreamInfo,
        _request_hardware: bool,
    ) -> Result<Option<Box<dyn VideoDecoder>>, DecodeError> {
        let Some(script) = self.media.video.clone().filter(|v| v.has_decoder) else {
            return Ok(None);
        };
        Ok(Some(Box::new(ScriptedVideoDecoder {
            script,
            queue: VecDeque::new(),
            refused: Vec::new(),
            _live: LiveGuard::new(&self.live.video_decoders),
        })))
    }

    fn audio_decoder(&self, _stream: &StreamInfo) -> Result<Option<Box<dyn AudioDecoder>>, DecodeError> {
        let Some(script) = self.media.audio.clone().filter(|a| a.has_decoder) else {
            return Ok(None);
        };
        Ok(Some(Box::new(ScriptedAudioDecoder {
            script,
            ready: VecDeque::new(),
            refused: Vec::new(),
            _live: LiveGuard::new(&self.live.audio_decoders),
        })))
    }
}

struct ScriptedDemuxer {
    streams: Vec<StreamInfo>,
    packets: Vec<ScriptedPacket>,
    cursor: usize,
    fail_seek: bool,
    tags: Vec<(String, String)>,
    _live: LiveGuard,
}

impl Demuxer for ScriptedDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self, packet: &mut Packet) -> Result<bool, DemuxError> {
        let Some(next) = self.packets.get(self.cursor) else {
            return Ok(false);
        };
        self.cursor += 1;
        packet.stream_index = next.stream;
        packet.pts = Some(next.pts);
        packet.dts = Some(next.pts);
        packet.duration = next.duration;
        packet.keyframe = next.keyframe;
        packet.data.clear();
        packet.data.extend_from_slice(&next.number.to_le_bytes());
        Ok(true)
    }

    fn seek(&mut self, stream_index: u32, timestamp: i64, backward: bool) -> Result<(), DemuxError> {
        if self.fail_seek {
            return Err(DemuxError::Backend("scripted seek failure".into()));
        }
        let tb = self
            .streams
            .get(stream_index as usize)
            .ok_or(DemuxError::NoSuchStream(stream_index))?
            .time_base;

        let keyframes: Vec<&ScriptedPacket> = self
            .packets
            .iter()
            .filter(|p| p.stream == stream_index && p.keyframe)
            .collect();
        let chosen = if backward {
            keyframes
                .iter()
                .rev()
                .find(|p| p.pts <= timestamp)
                .or_else(|| keyframes.first())
        } else {
            keyframes
                .iter()
                .find(|p| p.pts >= timestamp)
                .or_else(|| keyframes.last())
        };
        let Some(chosen) = chosen else {
            self.cursor = 0;
            return Ok(());
        };

        // Resume at the earliest packet of any stream at the chosen time
        let anchor_ms = tb.to_millis(chosen.pts);
        self.cursor = self
            .packets
            .iter()
            .position(|p| self.streams[p.stream as usize].time_base.to_millis(p.pts) >= anchor_ms)
            .unwrap_or(self.packets.len());
        Ok(())
    }

    fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    fn format_name(&self) -> &str {
        "scripted"
    }
}

fn packet_number(packet: &Packet) -> u32 {
    let mut bytes = [0u8; 4];
    let n = packet.data.len().min(4);
    bytes[..n].copy_from_slice(&packet.data[..n]);
    u32::from_le_bytes(bytes)
}

fn refuse_first_offer(script: &[u32], refused: &mut Vec<u32>, number: u32) -> bool {
    if script.contains(&number) && !refused.contains(&number) {
        refused.push(number);
        return true;
    }
    false
}

struct ScriptedVideoDecoder {
    script: VideoScript,
    queue: VecDeque<(u32, Option<i64>, bool)>,
    refused: Vec<u32>,
    _live: LiveGuard,
}

impl VideoDecoder for ScriptedVideoDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError> {
        let number = packet_number(packet);
        if self.script.corrupt.contains(&number) {
            return Err(DecodeError::Failed(format!("corrupt frame {}", number)));
        }
        if refuse_first_offer(&self.script.refuse_once, &mut self.refused, number) {
            return Err(DecodeError::NeedMoreData);
        }
        self.queue.push_back((number, packet.pts, packet.keyframe));
        Ok(())
    }

    fn receive_frame(&mut self, frame: &mut VideoFrame) -> Result<(), DecodeError> {
        if self.queue.len() <= self.script.delay {
            return Err(DecodeError::NeedMoreData);
        }
        let Some((number, pts, keyframe)) = self.queue.pop_front() else {
            return Err(DecodeError::NeedMoreData);
        };
        let (w, h) = (self.script.width as usize, self.script.height as usize);
        frame.width = self.script.width;
        frame.height = self.script.height;
        frame.format = PixelFormat::Yuv420p;
        frame.planes[0].clear();
        frame.planes[0].resize(w * h, 16 + (number % 200) as u8);
        for plane in &mut frame.planes[1..] {
            plane.clear();
            plane.resize((w / 2) * (h / 2), 128);
        }
        frame.strides = [w, w / 2, w / 2];
        frame.pts = pts;
        frame.keyframe = keyframe;
        Ok(())
    }

    fn flush(&mut self) {
        self.queue.clear();
    }

    fn name(&self) -> &str {
        "scripted-video"
    }
}

struct ScriptedAudioDecoder {
    script: AudioScript,
    ready: VecDeque<AudioFrame>,
    refused: Vec<u32>,
    _live: LiveGuard,
}

impl AudioDecoder for ScriptedAudioDecoder {
    fn send_packet(&mut self, packet: &Packet) -> Result<(), DecodeError> {
        let number = packet_number(packet);
        if refuse_first_offer(&self.script.refuse_once, &mut self.refused, number) {
            return Err(DecodeError::NeedMoreData);
        }
        if self.script.silent.contains(&number) {
            return Ok(());
        }
        let parts = self.script.frames_per_packet.max(1) as i64;
        let chunk = packet.duration / parts;
        let base = packet.pts.unwrap_or(0);
        for part in 0..parts {
            self.ready.push_back(AudioFrame {
                sample_rate: self.script.sample_rate,
                channels: self.script.channels,
                samples: vec![0.25; chunk as usize * self.script.channels as usize],
                pts: Some(base + part * chunk),
            });
        }
        Ok(())
    }

    fn receive_frame(&mut self, frame: &mut AudioFrame) -> Result<(), DecodeError> {
        let next = self.ready.pop_front().ok_or(DecodeError::NeedMoreData)?;
        *frame = next;
        Ok(())
    }

    fn flush(&mut self) {
        self.ready.clear();
    }

    fn name(&self) -> &str {
        "scripted-audio"
    }
}

// ============================================================================
// WAV writer
// ============================================================================

/// Write 16-bit PCM samples (interleaved) as a canonical WAV file.
pub fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
    write_wav_with_info(path, sample_rate, channels, samples, &[]);
}

/// [`write_wav`] with a `LIST/INFO` chunk of NUL-terminated strings ahead of `data`.
pub fn write_wav_with_info(
    path: &Path,
    sample_rate: u32,
    channels: u16,
    samples: &[i16],
    info: &[(&[u8; 4], &str)],
) {
    let mut list = Vec::new();
    if !info.is_empty() {
        let mut body = b"INFO".to_vec();
        for (id, text) in info {
            let mut value = text.as_bytes().to_vec();
            value.push(0);
            if value.len() % 2 == 1 {
                value.push(0);
            }
            body.extend_from_slice(*id);
            body.extend_from_slice(&(value.len() as u32).to_le_bytes());
            body.extend_from_slice(&value);
        }
        list.extend_from_slice(b"LIST");
        list.extend_from_slice(&(body.len() as u32).to_le_bytes());
        list.extend_from_slice(&body);
    }

    let data_len = (samples.len() * 2) as u32;
    let block_align = channels * 2;
    let mut out = Vec::with_capacity(44 + list.len() + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + list.len() as u32 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(&list);
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    std::fs::write(path, out).expect("write wav fixture");
}

// ============================================================================
// MP4 writer
// ============================================================================

pub mod mp4 {
    //! Minimal ISO-BMFF writer: one sample per chunk, everything in `mdat`
    //! ahead of `moov`.

    #[derive(Debug, Clone)]
    pub struct FixtureSample {
        pub data: Vec<u8>,
        pub duration: u32,
        pub keyframe: bool,
        pub cts: i32,
    }

    impl FixtureSample {
        pub fn new(data: Vec<u8>, duration: u32, keyframe: bool) -> Self {
            Self {
                data,
                duration,
                keyframe,
                cts: 0,
            }
        }

        pub fn with_cts(mut self, cts: i32) -> Self {
            self.cts = cts;
            self
        }
    }

    #[derive(Debug, Clone)]
    pub struct FixtureTrack {
        pub handler: [u8; 4],
        pub timescale: u32,
        /// Complete sample entry box (see the `*_entry` helpers).
        pub sample_entry: Vec<u8>,
        pub samples: Vec<FixtureSample>,
        /// Media time of a single edit, if any.
        pub media_time: Option<i64>,
    }

    fn boxed(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(body.len() + 8);
        out.extend_from_slice(&(body.len() as u32 + 8).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(body);
        out
    }

    fn full_boxed(kind: &[u8; 4], version: u8, body: &[u8]) -> Vec<u8> {
        let mut full = vec![version, 0, 0, 0];
        full.extend_from_slice(body);
        boxed(kind, &full)
    }

    fn be32(out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&v.to_be_bytes());
    }

    fn be16(out: &mut Vec<u8>, v: u16) {
        out.extend_from_slice(&v.to_be_bytes());
    }

    pub fn avc1_entry(width: u16, height: u16, avcc: &[u8]) -> Vec<u8> {
        let mut body = vec![0u8; 6];
        be16(&mut body, 1); // data_reference_index
        body.extend_from_slice(&[0u8; 16]);
        be16(&mut body, width);
        be16(&mut body, height);
        be32(&mut body, 0x0048_0000);
        be32(&mut body, 0x0048_0000);
        be32(&mut body, 0);
        be16(&mut body, 1); // frame_count
        body.extend_from_slice(&[0u8; 32]);
        be16(&mut body, 0x0018);
        body.extend_from_slice(&[0xFF, 0xFF]);
        body.extend_from_slice(&boxed(b"avcC", avcc));
        boxed(b"avc1", &body)
    }

    fn audio_entry_body(sample_rate: u32, channels: u16, bits: u16) -> Vec<u8> {
        let mut body = vec![0u8; 6];
        be16(&mut body, 1);
        be16(&mut body, 0); // version
        body.extend_from_slice(&[0u8; 6]); // revision, vendor
        be16(&mut body, channels);
        be16(&mut body, bits);
        be32(&mut body, 0); // compression_id, packet_size
        be32(&mut body, sample_rate << 16);
        body
    }

    /// Little-endian 16-bit PCM.
    pub fn sowt_entry(sample_rate: u32, channels: u16) -> Vec<u8> {
        boxed(b"sowt", &audio_entry_body(sample_rate, channels, 16))
    }

    /// AAC with the given AudioSpecificConfig.
    pub fn mp4a_entry(sample_rate: u32, channels: u16, asc: &[u8]) -> Vec<u8> {
        let mut dsi = vec![0x05, asc.len() as u8];
        dsi.extend_from_slice(asc);

        let mut dcd = vec![0x04, (13 + dsi.len()) as u8, 0x40, 0x15];
        dcd.extend_from_slice(&[0u8; 11]);
        dcd.extend_from_slice(&dsi);

        let mut es = vec![0x03, (3 + dcd.len() + 3) as u8, 0, 1, 0];
        es.extend_from_slice(&dcd);
        es.extend_from_slice(&[0x06, 0x01, 0x02]);

        let mut body = audio_entry_body(sample_rate, channels, 16);
        body.extend_from_slice(&full_boxed(b"esds", 0, &es));
        boxed(b"mp4a", &body)
    }

    pub fn build_mp4(tracks: &[FixtureTrack]) -> Vec<u8> {
        build_mp4_with_udta(tracks, &[])
    }

    /// `udta` box holding an iTunes `ilst` with one UTF-8 `data` per item.
    pub fn udta_tags(items: &[(&[u8; 4], &str)]) -> Vec<u8> {
        let mut hdlr = vec![0u8; 4];
        hdlr.extend_from_slice(b"mdir");
        hdlr.extend_from_slice(&[0u8; 13]);

        let mut ilst = Vec::new();
        for (kind, text) in items {
            let mut data = Vec::new();
            be32(&mut data, 1);
            be32(&mut data, 0);
            data.extend_from_slice(text.as_bytes());
            ilst.extend_from_slice(&boxed(kind, &boxed(b"data", &data)));
        }

        let mut meta = full_boxed(b"hdlr", 0, &hdlr);
        meta.extend_from_slice(&boxed(b"ilst", &ilst));
        boxed(b"udta", &full_boxed(b"meta", 0, &meta))
    }

    /// Like [`build_mp4`], with `udta` appended to `moov` verbatim.
    pub fn build_mp4_with_udta(tracks: &[FixtureTrack], udta: &[u8]) -> Vec<u8> {
        let mut ftyp_body = b"isom".to_vec();
        be32(&mut ftyp_body, 0x200);
        ftyp_body.extend_from_slice(b"isommp41");
        let ftyp = boxed(b"ftyp", &ftyp_body);

        let mut payload = Vec::new();
        let mut offsets: Vec<Vec<u32>> = Vec::new();
        for track in tracks {
            let mut track_offsets = Vec::new();
            for sample in &track.samples {
                track_offsets.push((ftyp.len() + 8 + payload.len()) as u32);
                payload.extend_from_slice(&sample.data);
            }
            offsets.push(track_offsets);
        }
        let mdat = boxed(b"mdat", &payload);

        let mut mvhd = Vec::new();
        be32(&mut mvhd, 0);
        be32(&mut mvhd, 0);
        be32(&mut mvhd, 1000);
        be32(&mut mvhd, 0);
        be32(&mut mvhd, 0x0001_0000);
        be16(&mut mvhd, 0x0100);
        mvhd.extend_from_slice(&[0u8; 10 + 36 + 24]);
        be32(&mut mvhd, tracks.len() as u32 + 1);

        let mut moov_body = full_boxed(b"mvhd", 0, &mvhd);
        for (i, (track, offsets)) in tracks.iter().zip(&offsets).enumerate() {
            moov_body.extend_from_slice(&trak(i as u32 + 1, track, offsets));
        }
        moov_body.extend_from_slice(udta);
        let moov = boxed(b"moov", &moov_body);

        [ftyp, mdat, moov].concat()
    }

    fn trak(track_id: u32, track: &FixtureTrack, offsets: &[u32]) -> Vec<u8> {
        let total: u32 = track.samples.iter().map(|s| s.duration).sum();

        let mut tkhd = vec![0u8; 8];
        be32(&mut tkhd, track_id);
        tkhd.extend_from_slice(&[0u8; 68]);
        let mut body = full_boxed(b"tkhd", 0, &tkhd);

        if let Some(media_time) = track.media_time {
            let mut elst = Vec::new();
            be32(&mut elst, 1);
            be32(&mut elst, total);
            be32(&mut elst, media_time as i32 as u32);
            be32(&mut elst, 0x0001_0000);
            body.extend_from_slice(&boxed(b"edts", &full_boxed(b"elst", 0, &elst)));
        }

        let mut mdhd = Vec::new();
        be32(&mut mdhd, 0);
        be32(&mut mdhd, 0);
        be32(&mut mdhd, track.timescale);
        be32(&mut mdhd, total);
        be16(&mut mdhd, 0x55C4); // "und"
        be16(&mut mdhd, 0);

        let mut hdlr = vec![0u8; 4];
        hdlr.extend_from_slice(&track.handler);
        hdlr.extend_from_slice(&[0u8; 13]);

        let mut mdia = full_boxed(b"mdhd", 0, &mdhd);
        mdia.extend_from_slice(&full_boxed(b"hdlr", 0, &hdlr));
        mdia.extend_from_slice(&boxed(b"minf", &boxed(b"stbl", &stbl(track, offsets))));

        body.extend_from_slice(&boxed(b"mdia", &mdia));
        boxed(b"trak", &body)
    }

    fn stbl(track: &FixtureTrack, offsets: &[u32]) -> Vec<u8> {
        let samples = &track.samples;

        let mut stsd = Vec::new();
        be32(&mut stsd, 1);
        stsd.extend_from_slice(&track.sample_entry);
        let mut out = full_boxed(b"stsd", 0, &stsd);

        let mut runs: Vec<(u32, u32)> = Vec::new();
        for sample in samples {
            match runs.last_mut() {
                Some((count, delta)) if *delta == sample.duration => *count += 1,
                _ => runs.push((1, sample.duration)),
            }
        }
        let mut stts = Vec::new();
        be32(&mut stts, runs.len() as u32);
        for (count, delta) in runs {
            be32(&mut stts, count);
            be32(&mut stts, delta);
        }
        out.extend_from_slice(&full_boxed(b"stts", 0, &stts));

        if samples.iter().any(|s| s.cts != 0) {
            let mut ctts = Vec::new();
            be32(&mut ctts, samples.len() as u32);
            for sample in samples {
                be32(&mut ctts, 1);
                be32(&mut ctts, sample.cts as u32);
            }
            out.extend_from_slice(&full_boxed(b"ctts", 0, &ctts));
        }

        let mut stsc = Vec::new();
        be32(&mut stsc, 1);
        be32(&mut stsc, 1);
        be32(&mut stsc, 1);
        be32(&mut stsc, 1);
        out.extend_from_slice(&full_boxed(b"stsc", 0, &stsc));

        let mut stsz = Vec::new();
        be32(&mut stsz, 0);
        be32(&mut stsz, samples.len() as u32);
        for sample in samples {
            be32(&mut stsz, sample.data.len() as u32);
        }
        out.extend_from_slice(&full_boxed(b"stsz", 0, &stsz));

        let mut stco = Vec::new();
        be32(&mut stco, offsets.len() as u32);
        for &offset in offsets {
            be32(&mut stco, offset);
        }
        out.extend_from_slice(&full_boxed(b"stco", 0, &stco));

        if samples.iter().any(|s| !s.keyframe) {
            let keys: Vec<u32> = samples
                .iter()
                .enumerate()
                .filter(|(_, s)| s.keyframe)
                .map(|(i, _)| i as u32 + 1)
                .collect();
            let mut stss = Vec::new();
            be32(&mut stss, keys.len() as u32);
            for key in keys {
                be32(&mut stss, key);
            }
            out.extend_from_slice(&full_boxed(b"stss", 0, &stss));
        }
        out
    }
}

// ============================================================================
// H.264 fixtures
// ============================================================================

#[cfg(feature = "software-decode")]
pub mod h264 {
    //! Real H.264 pictures from the OpenH264 encoder, split into the pieces an
    //! MP4 track stores: an `avcC` record plus length-prefixed samples.

    use openh264::encoder::{Encoder, EncoderConfig, FrameType};
    use openh264::formats::YUVBuffer;
    use openh264::OpenH264API;

    const NAL_SPS: u8 = 7;
    const NAL_PPS: u8 = 8;

    #[derive(Debug, Clone)]
    pub struct EncodedPicture {
        /// Everything the encoder emitted, start codes included.
        pub annexb: Vec<u8>,
        pub keyframe: bool,
    }

    /// Encode `count` flat pictures, forcing an IDR every `gop` pictures.
    pub fn encode(width: usize, height: usize, count: usize, gop: usize) -> Vec<EncodedPicture> {
        let config = EncoderConfig::new().enable_skip_frame(false);
        let mut encoder =
            Encoder::with_api_config(OpenH264API::from_source(), config).expect("openh264 encoder");

        (0..count)
            .map(|n| {
                let luma = width * height;
                let mut yuv = vec![128u8; luma * 3 / 2];
                yuv[..luma].fill(16 + (n * 7 % 200) as u8);
                let picture = YUVBuffer::from_vec(yuv, width, height);

                if n % gop.max(1) == 0 {
                    encoder.force_intra_frame();
                }
                let bitstream = encoder.encode(&picture).expect("encode picture");
                EncodedPicture {
                    keyframe: matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I),
                    annexb: bitstream.to_vec(),
                }
            })
            .collect()
    }

    /// NAL units of an Annex B stream, start codes stripped.
    pub fn nal_units(annexb: &[u8]) -> Vec<&[u8]> {
        openh264::nal_units(annexb)
            .filter_map(|unit| {
                let body = unit.iter().position(|&b| b == 1).map(|i| &unit[i + 1..])?;
                // a 4-byte start code leaves its leading zero on the unit before
                let end = body.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                Some(&body[..end])
            })
            .filter(|unit| !unit.is_empty())
            .collect()
    }

    fn nal_type(unit: &[u8]) -> u8 {
        unit.first().map(|b| b & 0x1F).unwrap_or(0)
    }

    /// `avcC` record from the first picture's parameter sets.
    pub fn avcc_record(first: &EncodedPicture) -> Vec<u8> {
        let units = nal_units(&first.annexb);
        let sps = units.iter().find(|u| nal_type(u) == NAL_SPS).expect("sps");
        let pps = units.iter().find(|u| nal_type(u) == NAL_PPS).expect("pps");

        let mut record = vec![1, sps[1], sps[2], sps[3], 0xFF, 0xE1];
        record.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        record.extend_from_slice(sps);
        record.push(1);
        record.extend_from_slice(&(pps.len() as u16).to_be_bytes());
        record.extend_from_slice(pps);
        record
    }

    /// Picture data as 4-byte length-prefixed NAL units, parameter sets dropped.
    pub fn avcc_sample(picture: &EncodedPicture) -> Vec<u8> {
        let mut sample = Vec::with_capacity(picture.annexb.len());
        for unit in nal_units(&picture.annexb) {
            if matches!(nal_type(unit), NAL_SPS | NAL_PPS) {
                continue;
            }
            sample.extend_from_slice(&(unit.len() as u32).to_be_bytes());
            sample.extend_from_slice(unit);
        }
        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_packets_are_time_ordered() {
        let media = ScriptedMedia::av_clip();
        let streams = media.streams();
        let packets = media.packets(&streams);
        assert_eq!(packets.len(), 300 + 469);
        assert_eq!((packets[0].stream, packets[1].stream), (0, 1));
    }

    #[test]
    fn live_handles_follow_drops() {
        let backend = ScriptedBackend::new(ScriptedMedia::av_clip());
        let live = backend.live();
        let demuxer = backend.open(Path::new("clip.mp4")).unwrap();
        let decoder = backend.video_decoder(&demuxer.streams()[0], false).unwrap();
        assert_eq!(live.total(), 2);
        drop(decoder);
        drop(demuxer);
        assert_eq!(live.total(), 0);
        assert_eq!(live.opened(), 1);
    }
}
