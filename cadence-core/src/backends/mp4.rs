// MP4 DEMUX - ISO base media files (MP4 / MOV / M4A / M4V)
//
// The whole `moov` box is read into memory and parsed once. Each track's
// sample table is expanded into a flat list, so packet reads are a seek plus a
// read, and seeking is a search over that list. `mdat` is never scanned; the
// chunk offsets point straight into it.

mod boxes;
mod esds;
mod metadata;
mod sample_table;

pub use sample_table::{Sample, SampleTable};

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Buf;
use tracing::{debug, info, warn};

use self::boxes::{children, ensure, find_child, fourcc, full_box_header, read_box_header, skip};
use crate::backend::Demuxer;
use crate::error::DemuxError;
use crate::media::{AudioParams, CodecId, MediaKind, SampleFormat, StreamInfo, VideoParams};
use crate::packet::Packet;
use crate::time_base::Rational;

/// Largest sample we are willing to allocate for.
const MAX_SAMPLE_SIZE: u32 = 256 * 1024 * 1024;

pub struct Mp4Demuxer<R: Read + Seek> {
    reader: R,
    brand: String,
    streams: Vec<StreamInfo>,
    tracks: Vec<Track>,
    tags: Vec<(String, String)>,
}

struct Track {
    timescale: u32,
    samples: Vec<Sample>,
    next: usize,
}

#[derive(Debug, Default)]
struct TrackBuilder {
    timescale: u32,
    duration: u64,
    handler: [u8; 4],
    entry: Option<SampleEntry>,
    table: SampleTable,
    media_time: i64,
}

#[derive(Debug)]
struct SampleEntry {
    codec: CodecId,
    width: u32,
    height: u32,
    sample_rate: u32,
    channels: u16,
    bits: u16,
    extra_data: Vec<u8>,
}

impl SampleEntry {
    fn new(codec: CodecId) -> Self {
        Self {
            codec,
            width: 0,
            height: 0,
            sample_rate: 0,
            channels: 0,
            bits: 0,
            extra_data: Vec::new(),
        }
    }
}

impl Mp4Demuxer<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, DemuxError> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read + Seek> Mp4Demuxer<R> {
    pub fn new(mut reader: R) -> Result<Self, DemuxError> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut brand = String::new();
        let mut moov = None;
        let mut pos = 0u64;
        while pos + 8 <= file_size {
            reader.seek(SeekFrom::Start(pos))?;
            let header = read_box_header(&mut reader)?;
            let size = if header.size == 0 {
                file_size - pos
            } else {
                header.size
            };
            if pos + size > file_size {
                // Truncated tail (often an unfinished mdat); keep what we have
                warn!(
                    "Box '{}' at {} runs past end of file",
                    fourcc(&header.box_type),
                    pos
                );
                if &header.box_type != b"moov" {
                    break;
                }
                return Err(DemuxError::malformed("moov box is truncated"));
            }

            match &header.box_type {
                b"ftyp" => {
                    let mut major = [0u8; 4];
                    reader.read_exact(&mut major)?;
                    brand = fourcc(&major);
                }
                b"moov" => {
                    let mut body = vec![0u8; (size - header.header_size) as usize];
                    reader.read_exact(&mut body)?;
                    moov = Some(body);
                }
                _ => {}
            }
            pos += size;
        }

        let moov = moov.ok_or_else(|| DemuxError::malformed("no moov box"))?;

        let mut streams = Vec::new();
        let mut tracks = Vec::new();
        let mut tags = Vec::new();
        for child in children(&moov) {
            let (kind, body) = child?;
            if &kind == b"udta" {
                // tags are optional; a damaged ilst must not cost the tracks
                match metadata::parse_udta(body) {
                    Ok(found) => tags = found,
                    Err(e) => warn!("Ignoring unreadable udta: {}", e),
                }
                continue;
            }
            if &kind != b"trak" {
                continue;
            }
            let builder = parse_trak(body, file_size)?;
            let index = streams.len() as u32;
            if let Some((stream, track)) = finish_track(index, builder)? {
                streams.push(stream);
                tracks.push(track);
            }
        }

        info!(
            "MP4 opened: brand '{}', {} stream(s), {} tag(s)",
            brand.trim(),
            streams.len(),
            tags.len()
        );

        Ok(Self {
            reader,
            brand,
            streams,
            tracks,
            tags,
        })
    }

    pub fn brand(&self) -> &str {
        &self.brand
    }

    /// Expanded sample list of a track.
    pub fn samples(&self, stream_index: u32) -> Option<&[Sample]> {
        self.tracks.get(stream_index as usize).map(|t| t.samples.as_slice())
    }

    fn keyframe_index(samples: &[Sample], timestamp: i64, backward: bool) -> usize {
        let keyframes = samples.iter().enumerate().filter(|(_, s)| s.keyframe);
        if backward {
            keyframes
                .filter(|(_, s)| s.pts <= timestamp)
                .map(|(i, _)| i)
                .last()
                .or_else(|| samples.iter().position(|s| s.keyframe))
                .unwrap_or(0)
        } else {
            let mut last = 0;
            for (i, s) in keyframes {
                last = i;
                if s.pts >= timestamp {
                    return i;
                }
            }
            last
        }
    }
}

impl<R: Read + Seek + Send> Demuxer for Mp4Demuxer<R> {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self, packet: &mut Packet) -> Result<bool, DemuxError> {
        // Track whose next sample has the earliest decode time
        let mut best: Option<(usize, Sample)> = None;
        for (index, track) in self.tracks.iter().enumerate() {
            let Some(&sample) = track.samples.get(track.next) else {
                continue;
            };
            let earlier = match best {
                None => true,
                Some((b, bs)) => {
                    let other = &self.tracks[b];
                    (sample.dts as i128) * (other.timescale as i128)
                        < (bs.dts as i128) * (track.timescale as i128)
                }
            };
            if earlier {
                best = Some((index, sample));
            }
        }

        let Some((index, sample)) = best else {
            return Ok(false);
        };
        self.tracks[index].next += 1;

        if sample.size > MAX_SAMPLE_SIZE {
            return Err(DemuxError::malformed(format!(
                "sample of {} bytes in stream {}",
                sample.size, index
            )));
        }
        self.reader.seek(SeekFrom::Start(sample.offset))?;
        packet.data.resize(sample.size as usize, 0);
        self.reader.read_exact(&mut packet.data)?;

        packet.stream_index = index as u32;
        packet.pts = Some(sample.pts);
        packet.dts = Some(sample.dts);
        packet.duration = sample.duration as i64;
        packet.keyframe = sample.keyframe;
        Ok(true)
    }

    fn seek(&mut self, stream_index: u32, timestamp: i64, backward: bool) -> Result<(), DemuxError> {
        let reference = self
            .tracks
            .get_mut(stream_index as usize)
            .ok_or(DemuxError::NoSuchStream(stream_index))?;
        if reference.samples.is_empty() {
            return Ok(());
        }

        let chosen = Self::keyframe_index(&reference.samples, timestamp, backward);
        reference.next = chosen;
        let anchor = reference.samples[chosen].pts;
        let anchor_scale = reference.timescale as i128;
        debug!(
            "MP4 seek stream {} to {} -> sample {} (pts {})",
            stream_index, timestamp, chosen, anchor
        );

        // Other tracks resume at the sample covering the anchor time
        for (index, track) in self.tracks.iter_mut().enumerate() {
            if index == stream_index as usize {
                continue;
            }
            let scale = track.timescale as i128;
            let covered = track
                .samples
                .partition_point(|s| (s.dts as i128) * anchor_scale <= (anchor as i128) * scale);
            track.next = covered.saturating_sub(1);
        }
        Ok(())
    }

    fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    fn format_name(&self) -> &str {
        "mp4"
    }
}

// ============================================================================
// moov parsing
// ============================================================================

fn parse_trak(body: &[u8], file_size: u64) -> Result<TrackBuilder, DemuxError> {
    let mut track = TrackBuilder::default();
    for child in children(body) {
        let (kind, body) = child?;
        match &kind {
            b"mdia" => parse_mdia(body, &mut track, file_size)?,
            b"edts" => {
                if let Some(elst) = find_child(body, b"elst")? {
                    track.media_time = parse_elst(elst)?;
                }
            }
            _ => {}
        }
    }
    Ok(track)
}

fn parse_mdia(body: &[u8], track: &mut TrackBuilder, file_size: u64) -> Result<(), DemuxError> {
    if let Some(mdhd) = find_child(body, b"mdhd")? {
        let mut buf = mdhd;
        let (version, _) = full_box_header(&mut buf, "mdhd")?;
        if version == 1 {
            ensure(buf, 28, "mdhd")?;
            buf.advance(16);
            track.timescale = buf.get_u32();
            track.duration = buf.get_u64();
        } else {
            ensure(buf, 16, "mdhd")?;
            buf.advance(8);
            track.timescale = buf.get_u32();
            track.duration = buf.get_u32() as u64;
        }
    }

    if let Some(hdlr) = find_child(body, b"hdlr")? {
        let mut buf = hdlr;
        full_box_header(&mut buf, "hdlr")?;
        ensure(buf, 8, "hdlr")?;
        buf.advance(4); // pre_defined
        buf.copy_to_slice(&mut track.handler);
    }

    if let Some(minf) = find_child(body, b"minf")? {
        if let Some(stbl) = find_child(minf, b"stbl")? {
            for child in children(stbl) {
                let (kind, body) = child?;
                if &kind == b"stsd" {
                    track.entry = parse_stsd(body, &track.handler)?;
                } else if !track.table.parse_box(&kind, body, file_size)? {
                    debug!("Skipping stbl child '{}'", fourcc(&kind));
                }
            }
        }
    }
    Ok(())
}

/// Media time of the first non-empty edit, in media timescale units.
fn parse_elst(body: &[u8]) -> Result<i64, DemuxError> {
    let mut buf = body;
    let (version, _) = full_box_header(&mut buf, "elst")?;
    ensure(buf, 4, "elst")?;
    let count = buf.get_u32();
    for _ in 0..count {
        let media_time = if version == 1 {
            ensure(buf, 20, "elst")?;
            buf.advance(8);
            buf.get_i64()
        } else {
            ensure(buf, 12, "elst")?;
            buf.advance(4);
            buf.get_i32() as i64
        };
        buf.advance(4); // media_rate
        if media_time >= 0 {
            return Ok(media_time);
        }
    }
    Ok(0)
}

fn parse_stsd(body: &[u8], handler: &[u8; 4]) -> Result<Option<SampleEntry>, DemuxError> {
    let mut buf = body;
    full_box_header(&mut buf, "stsd")?;
    ensure(buf, 4, "stsd")?;
    let count = buf.get_u32();
    if count == 0 {
        return Ok(None);
    }
    let Some(first) = children(buf).next() else {
        return Ok(None);
    };
    let (format, entry) = first?;

    let parsed = match handler {
        b"vide" => parse_visual_entry(&format, entry)?,
        b"soun" => parse_audio_entry(&format, entry)?,
        _ => SampleEntry::new(CodecId::Other(fourcc(&format))),
    };
    Ok(Some(parsed))
}

fn parse_visual_entry(format: &[u8; 4], entry: &[u8]) -> Result<SampleEntry, DemuxError> {
    let codec = match format {
        b"avc1" | b"avc3" => CodecId::H264,
        b"hvc1" | b"hev1" => CodecId::H265,
        b"vp08" => CodecId::Vp8,
        b"vp09" => CodecId::Vp9,
        b"av01" => CodecId::Av1,
        other => CodecId::Other(fourcc(other)),
    };
    let mut sample = SampleEntry::new(codec);

    let mut buf = entry;
    ensure(buf, 78, "visual sample entry")?;
    buf.advance(24); // reserved, data_reference_index, pre_defined
    sample.width = buf.get_u16() as u32;
    sample.height = buf.get_u16() as u32;
    buf.advance(50);

    for child in children(buf) {
        let (kind, body) = child?;
        if matches!(&kind, b"avcC" | b"hvcC" | b"vpcC" | b"av1C") {
            sample.extra_data = body.to_vec();
        }
    }
    Ok(sample)
}

fn parse_audio_entry(format: &[u8; 4], entry: &[u8]) -> Result<SampleEntry, DemuxError> {
    let mut buf = entry;
    ensure(buf, 28, "audio sample entry")?;
    buf.advance(8); // reserved, data_reference_index
    let version = buf.get_u16();
    buf.advance(6); // revision, vendor
    let mut channels = buf.get_u16();
    let bits = buf.get_u16();
    buf.advance(4); // compression_id, packet_size
    let mut sample_rate = buf.get_u32() >> 16;

    match version {
        1 => skip(&mut buf, 16, "audio sample entry v1")?,
        2 => {
            ensure(buf, 36, "audio sample entry v2")?;
            buf.advance(4);
            sample_rate = buf.get_f64().round() as u32;
            channels = buf.get_u32() as u16;
            buf.advance(20);
        }
        _ => {}
    }

    let pcm = |format: SampleFormat, big_endian: bool| CodecId::Pcm { format, big_endian };
    let by_bits = |bits: u16| match bits {
        8 => SampleFormat::U8,
        24 => SampleFormat::S24,
        32 => SampleFormat::S32,
        _ => SampleFormat::S16,
    };
    let codec = match format {
        b"mp4a" => CodecId::Aac,
        b".mp3" => CodecId::Mp3,
        b"fLaC" => CodecId::Flac,
        b"Opus" => CodecId::Opus,
        b"alac" => CodecId::Alac,
        b"ac-3" => CodecId::Ac3,
        b"ec-3" => CodecId::Eac3,
        b"sowt" | b"lpcm" => pcm(by_bits(bits), false),
        b"twos" => pcm(by_bits(bits), true),
        b"in24" => pcm(SampleFormat::S24, true),
        b"in32" => pcm(SampleFormat::S32, true),
        b"fl32" => pcm(SampleFormat::F32, true),
        b"fl64" => pcm(SampleFormat::F64, true),
        b"raw " => pcm(SampleFormat::U8, false),
        other => CodecId::Other(fourcc(other)),
    };

    let mut sample = SampleEntry::new(codec);
    sample.sample_rate = sample_rate;
    sample.channels = channels;
    sample.bits = bits;

    for child in children(buf) {
        let (kind, body) = child?;
        match &kind {
            b"esds" => {
                let es = esds::parse_esds(body)?;
                if matches!(es.object_type, 0x69 | 0x6B) {
                    sample.codec = CodecId::Mp3;
                }
                if let Some((rate, ch)) = esds::aac_config(&es.decoder_specific) {
                    if rate > 0 && sample.codec == CodecId::Aac {
                        sample.sample_rate = rate;
                    }
                    if ch > 0 && sample.codec == CodecId::Aac {
                        sample.channels = ch;
                    }
                }
                sample.extra_data = es.decoder_specific;
            }
            // FLAC: full box header, metadata block header, STREAMINFO
            b"dfLa" if body.len() >= 8 + 34 => sample.extra_data = body[8..8 + 34].to_vec(),
            b"alac" if body.len() > 4 => sample.extra_data = body[4..].to_vec(),
            b"dOps" => sample.extra_data = body.to_vec(),
            _ => {}
        }
    }
    Ok(sample)
}

fn finish_track(index: u32, builder: TrackBuilder) -> Result<Option<(StreamInfo, Track)>, DemuxError> {
    let Some(entry) = builder.entry else {
        warn!("Track {} has no sample description, skipped", index);
        return Ok(None);
    };
    if builder.timescale == 0 {
        warn!("Track {} has a zero timescale, skipped", index);
        return Ok(None);
    }

    let mut samples = builder.table.build()?;
    if builder.media_time > 0 {
        for sample in &mut samples {
            sample.pts -= builder.media_time;
            sample.dts -= builder.media_time;
        }
    }

    let kind = match &builder.handler {
        b"vide" => MediaKind::Video,
        b"soun" => MediaKind::Audio,
        b"text" | b"subt" | b"sbtl" => MediaKind::Subtitle,
        b"meta" | b"hint" | b"tmcd" => MediaKind::Data,
        _ => MediaKind::Unknown,
    };

    let duration = if builder.duration > 0 {
        builder.duration as i64
    } else {
        builder.table.total_duration()
    };

    let video = (kind == MediaKind::Video).then(|| VideoParams {
        width: entry.width,
        height: entry.height,
        frame_rate: builder
            .table
            .most_common_delta()
            .map(|delta| Rational::new(builder.timescale as i64, delta as i64))
            .unwrap_or(Rational::new(0, 1)),
    });

    let audio = (kind == MediaKind::Audio).then(|| {
        let sample_format = match &entry.codec {
            CodecId::Pcm { format, .. } => *format,
            _ => SampleFormat::F32,
        };
        AudioParams {
            sample_rate: entry.sample_rate,
            channels: entry.channels,
            sample_format,
            bits_per_sample: (entry.bits > 0).then_some(entry.bits as u32),
            max_frames_per_packet: samples.iter().map(|s| s.duration as u64).max(),
        }
    });

    debug!(
        "Track {}: {:?} {} timescale {} with {} samples",
        index,
        kind,
        entry.codec,
        builder.timescale,
        samples.len()
    );

    let stream = StreamInfo {
        index,
        kind,
        codec: entry.codec,
        time_base: Rational::per_second(builder.timescale as i64),
        duration: Some(duration),
        video,
        audio,
        extra_data: entry.extra_data,
    };
    let track = Track {
        timescale: builder.timescale,
        samples,
        next: 0,
    };
    Ok(Some((stream, track)))
}
