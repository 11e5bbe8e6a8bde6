//! Raw decoded frames.
//!
//! Like [`crate::packet::Packet`], these are scratch state: the engine holds
//! one video frame and one audio frame, decoders fill them in place, and they
//! are unreferenced (not reallocated) between calls.

use crate::pixel::PixelFormat;

/// Decoded pixels, up to three planes, each tightly described by its stride.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: [Vec<u8>; 3],
    pub strides: [usize; 3],
    /// Presentation timestamp in stream ticks.
    pub pts: Option<i64>,
    pub keyframe: bool,
}

impl Default for VideoFrame {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            format: PixelFormat::Yuv420p,
            planes: [Vec::new(), Vec::new(), Vec::new()],
            strides: [0; 3],
            pts: None,
            keyframe: false,
        }
    }
}

impl VideoFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unref(&mut self) {
        for plane in &mut self.planes {
            plane.clear();
        }
        self.strides = [0; 3];
        self.pts = None;
        self.keyframe = false;
    }

    pub fn plane(&self, index: usize) -> &[u8] {
        self.planes.get(index).map(|p| p.as_slice()).unwrap_or(&[])
    }

    /// Copy `rows` rows of `row_bytes` each out of a strided source plane,
    /// dropping the padding so the stored stride equals `row_bytes`.
    pub fn fill_plane(
        &mut self,
        index: usize,
        src: &[u8],
        src_stride: usize,
        row_bytes: usize,
        rows: usize,
    ) {
        let plane = &mut self.planes[index];
        plane.clear();
        plane.reserve(row_bytes * rows);
        for row in 0..rows {
            let start = row * src_stride;
            let end = start + row_bytes;
            if end > src.len() {
                break;
            }
            plane.extend_from_slice(&src[start..end]);
        }
        self.strides[index] = row_bytes;
    }

    pub fn is_empty(&self) -> bool {
        self.planes[0].is_empty()
    }
}

/// Decoded PCM as interleaved `f32`, whatever the codec's native layout.
#[derive(Debug, Clone, Default)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
    /// Presentation timestamp in stream ticks.
    pub pts: Option<i64>,
}

impl AudioFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unref(&mut self) {
        self.samples.clear();
        self.pts = None;
    }

    /// Samples per channel.
    pub fn nb_samples(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.nb_samples() as f64 * 1000.0 / self.sample_rate as f64
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
