//! Output slots exchanged with the host.
//!
//! A [`DecodeBuffer`] is owned by the host's pool. The engine borrows one per
//! decoded frame, writes it and hands it back through
//! [`crate::pool::BufferHost`]. Payload vectors keep their allocation between
//! uses; only `resize`/`clear` are applied to them.

use serde::{Deserialize, Serialize};

use crate::pixel::PixelFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeResult {
    Success,
    EndOfStream,
    Fail,
}

/// Pixels of one frame. Which planes are populated depends on `format`:
/// `rgba` for RGBA, `y`/`u`/`v` for YUV420P, `y`/`uv` for NV12 and NV21.
#[derive(Debug, Clone)]
pub struct VideoPayload {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub rgba: Vec<u8>,
    pub y: Vec<u8>,
    pub u: Vec<u8>,
    pub v: Vec<u8>,
    pub uv: Vec<u8>,
}

impl Default for VideoPayload {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            format: PixelFormat::Rgba,
            rgba: Vec::new(),
            y: Vec::new(),
            u: Vec::new(),
            v: Vec::new(),
            uv: Vec::new(),
        }
    }
}

impl VideoPayload {
    pub fn clear_planes(&mut self) {
        self.rgba.clear();
        self.y.clear();
        self.u.clear();
        self.v.clear();
        self.uv.clear();
    }

    /// Bytes currently held across all planes.
    pub fn byte_size(&self) -> usize {
        self.rgba.len() + self.y.len() + self.u.len() + self.v.len() + self.uv.len()
    }
}

/// Interleaved signed 16-bit little-endian PCM.
#[derive(Debug, Clone, Default)]
pub struct AudioPayload {
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioPayload {
    /// Samples per channel.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.pcm.len() / (2 * self.channels as usize)
        }
    }

    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames() as f64 * 1000.0 / self.sample_rate as f64
        }
    }
}

#[derive(Debug, Clone)]
pub enum Payload {
    Video(VideoPayload),
    Audio(AudioPayload),
}

#[derive(Debug, Clone)]
pub struct DecodeBuffer {
    pub kind: BufferKind,
    pub result: DecodeResult,
    pub pts_ms: i64,
    pub is_last_frame: bool,
    pub payload: Payload,
}

impl DecodeBuffer {
    pub fn video() -> Self {
        Self {
            kind: BufferKind::Video,
            result: DecodeResult::Success,
            pts_ms: 0,
            is_last_frame: false,
            payload: Payload::Video(VideoPayload::default()),
        }
    }

    pub fn audio() -> Self {
        Self {
            kind: BufferKind::Audio,
            result: DecodeResult::Success,
            pts_ms: 0,
            is_last_frame: false,
            payload: Payload::Audio(AudioPayload::default()),
        }
    }

    /// Reset the header fields before the buffer is written again.
    pub fn reset(&mut self) {
        self.result = DecodeResult::Success;
        self.pts_ms = 0;
        self.is_last_frame = false;
    }

    /// Stamp this buffer as the end-of-stream marker.
    pub fn mark_end_of_stream(&mut self) {
        self.result = DecodeResult::EndOfStream;
        self.is_last_frame = true;
    }

    pub fn video_payload(&self) -> Option<&VideoPayload> {
        match &self.payload {
            Payload::Video(v) => Some(v),
            Payload::Audio(_) => None,
        }
    }

    pub fn audio_payload(&self) -> Option<&AudioPayload> {
        match &self.payload {
            Payload::Audio(a) => Some(a),
            Payload::Video(_) => None,
        }
    }

    /// Video payload for writing; a buffer of the other kind is retyped.
    pub fn video_mut(&mut self) -> &mut VideoPayload {
        if !matches!(self.payload, Payload::Video(_)) {
            self.payload = Payload::Video(VideoPayload::default());
        }
        self.kind = BufferKind::Video;
        match &mut self.payload {
            Payload::Video(v) => v,
            Payload::Audio(_) => unreachable!(),
        }
    }

    /// Audio payload for writing; a buffer of the other kind is retyped.
    pub fn audio_mut(&mut self) -> &mut AudioPayload {
        if !matches!(self.payload, Payload::Audio(_)) {
            self.payload = Payload::Audio(AudioPayload::default());
        }
        self.kind = BufferKind::Audio;
        match &mut self.payload {
            Payload::Audio(a) => a,
            Payload::Video(_) => unreachable!(),
        }
    }
}
