// PIXEL - Decoder output to host payload conversion
//
// Decoders hand back YUV (planar or semi-planar). Hosts want either packed
// RGBA or the planes as-is. The converter is sized once at prepare time to
// the video geometry and reused for every frame.

use serde::{Deserialize, Serialize};

use crate::buffer::VideoPayload;
use crate::config::VideoOutput;
use crate::error::DecodeError;
use crate::frame::VideoFrame;

// ============================================================================
// Pixel Formats
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Yuv420p, // Y plane, U plane (quarter size), V plane (quarter size)
    Nv12,    // Y plane, interleaved UV plane
    Nv21,    // Y plane, interleaved VU plane
    Rgba,    // 8-bit per channel + alpha, packed
}

impl PixelFormat {
    /// Calculate buffer size needed
    pub fn buffer_size(&self, width: usize, height: usize) -> usize {
        let chroma = ((width + 1) / 2) * ((height + 1) / 2);
        match self {
            Self::Yuv420p | Self::Nv12 | Self::Nv21 => width * height + chroma * 2,
            Self::Rgba => width * height * 4,
        }
    }

    pub fn is_yuv(&self) -> bool {
        !matches!(self, Self::Rgba)
    }
}

// ============================================================================
// Color Spaces
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSpace {
    BT601,  // SD (NTSC/PAL)
    BT709,  // HD
    BT2020, // UHD/HDR
}

impl ColorSpace {
    /// Best guess when the stream does not say: HD and up is BT.709.
    pub fn for_height(height: u32) -> Self {
        if height >= 720 {
            Self::BT709
        } else {
            Self::BT601
        }
    }

    /// Returns (Wr, Wb) where Wg = 1 - Wr - Wb
    pub fn coefficients(&self) -> (f32, f32) {
        match self {
            Self::BT601 => (0.299, 0.114),
            Self::BT709 => (0.2126, 0.0722),
            Self::BT2020 => (0.2627, 0.0593),
        }
    }

    pub fn yuv_to_rgb_matrix(&self) -> [[f32; 3]; 3] {
        let (wr, wb) = self.coefficients();
        let wg = 1.0 - wr - wb;

        // R = Y + 2*(1-Wr)*Cr
        // G = Y - 2*Wb*(1-Wb)/Wg*Cb - 2*Wr*(1-Wr)/Wg*Cr
        // B = Y + 2*(1-Wb)*Cb
        let cr_r = 2.0 * (1.0 - wr);
        let cb_g = -2.0 * wb * (1.0 - wb) / wg;
        let cr_g = -2.0 * wr * (1.0 - wr) / wg;
        let cb_b = 2.0 * (1.0 - wb);

        [[1.0, 0.0, cr_r], [1.0, cb_g, cr_g], [1.0, cb_b, 0.0]]
    }
}

// ============================================================================
// Converter
// ============================================================================

pub struct PixelConverter {
    width: usize,
    height: usize,
    output: VideoOutput,
    color_space: ColorSpace,
    // Pre-computed lookup tables
    y_table: [i32; 256],
    u_table_g: [i32; 256],
    u_table_b: [i32; 256],
    v_table_r: [i32; 256],
    v_table_g: [i32; 256],
}

impl PixelConverter {
    pub fn new(width: u32, height: u32, output: VideoOutput, color_space: ColorSpace) -> Self {
        let mut converter = Self {
            width: width as usize,
            height: height as usize,
            output,
            color_space,
            y_table: [0; 256],
            u_table_g: [0; 256],
            u_table_b: [0; 256],
            v_table_r: [0; 256],
            v_table_g: [0; 256],
        };
        converter.build_tables();
        converter
    }

    fn build_tables(&mut self) {
        let matrix = self.color_space.yuv_to_rgb_matrix();

        for i in 0..256 {
            let y = (i as i32) - 16; // Y range: 16-235
            let uv = (i as i32) - 128; // U/V centered at 128

            self.y_table[i] = (y * 298) >> 8; // 298/256 ≈ 1.164

            self.u_table_g[i] = (uv as f32 * matrix[1][1] * 256.0) as i32;
            self.u_table_b[i] = (uv as f32 * matrix[2][1] * 256.0) as i32;
            self.v_table_r[i] = (uv as f32 * matrix[0][2] * 256.0) as i32;
            self.v_table_g[i] = (uv as f32 * matrix[1][2] * 256.0) as i32;
        }
    }

    pub fn width(&self) -> u32 {
        self.width as u32
    }

    pub fn height(&self) -> u32 {
        self.height as u32
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    /// Format the payload will carry for a frame of `src` format.
    pub fn output_format(&self, src: PixelFormat) -> PixelFormat {
        match self.output {
            VideoOutput::Native if src.is_yuv() => src,
            _ => PixelFormat::Rgba,
        }
    }

    /// Convert one decoded frame into the payload, reusing its storage.
    pub fn convert(&self, src: &VideoFrame, dst: &mut VideoPayload) -> Result<(), DecodeError> {
        if src.width as usize != self.width || src.height as usize != self.height {
            return Err(DecodeError::Scale(format!(
                "frame is {}x{}, converter sized for {}x{}",
                src.width, src.height, self.width, self.height
            )));
        }
        self.check_planes(src)?;

        let format = self.output_format(src.format);
        dst.width = src.width;
        dst.height = src.height;
        dst.format = format;
        dst.clear_planes();

        match (src.format, format) {
            (PixelFormat::Rgba, _) => self.copy_rgba(src, &mut dst.rgba),
            (PixelFormat::Yuv420p, PixelFormat::Rgba) => self.yuv420p_to_rgba(src, &mut dst.rgba),
            (PixelFormat::Nv12, PixelFormat::Rgba) => self.semi_planar_to_rgba(src, &mut dst.rgba, false),
            (PixelFormat::Nv21, PixelFormat::Rgba) => self.semi_planar_to_rgba(src, &mut dst.rgba, true),
            (PixelFormat::Yuv420p, _) => {
                let (cw, ch) = self.chroma_size();
                copy_plane(src, 0, self.width, self.height, &mut dst.y);
                copy_plane(src, 1, cw, ch, &mut dst.u);
                copy_plane(src, 2, cw, ch, &mut dst.v);
            }
            (PixelFormat::Nv12 | PixelFormat::Nv21, _) => {
                let (cw, ch) = self.chroma_size();
                copy_plane(src, 0, self.width, self.height, &mut dst.y);
                copy_plane(src, 1, cw * 2, ch, &mut dst.uv);
            }
        }
        Ok(())
    }

    fn chroma_size(&self) -> (usize, usize) {
        ((self.width + 1) / 2, (self.height + 1) / 2)
    }

    fn check_planes(&self, src: &VideoFrame) -> Result<(), DecodeError> {
        let (cw, ch) = self.chroma_size();
        let needed: &[(usize, usize)] = match src.format {
            PixelFormat::Yuv420p => &[(self.width, self.height), (cw, ch), (cw, ch)],
            PixelFormat::Nv12 | PixelFormat::Nv21 => &[(self.width, self.height), (cw * 2, ch)],
            PixelFormat::Rgba => &[(self.width * 4, self.height)],
        };
        for (index, &(row_bytes, rows)) in needed.iter().enumerate() {
            let stride = src.strides[index];
            let len = src.plane(index).len();
            let required = if rows == 0 { 0 } else { stride * (rows - 1) + row_bytes };
            if stride < row_bytes || len < required {
                return Err(DecodeError::Scale(format!(
                    "plane {} holds {} bytes (stride {}), need {}",
                    index, len, stride, required
                )));
            }
        }
        Ok(())
    }

    #[inline]
    fn write_pixel(&self, out: &mut [u8], y_val: u8, u_val: u8, v_val: u8) {
        let (y_val, u_val, v_val) = (y_val as usize, u_val as usize, v_val as usize);
        let y_contrib = self.y_table[y_val];
        out[0] = (y_contrib + (self.v_table_r[v_val] >> 8)).clamp(0, 255) as u8;
        out[1] = (y_contrib + (self.u_table_g[u_val] >> 8) + (self.v_table_g[v_val] >> 8))
            .clamp(0, 255) as u8;
        out[2] = (y_contrib + (self.u_table_b[u_val] >> 8)).clamp(0, 255) as u8;
        out[3] = 255;
    }

    fn yuv420p_to_rgba(&self, src: &VideoFrame, rgba: &mut Vec<u8>) {
        let (y_plane, u_plane, v_plane) = (src.plane(0), src.plane(1), src.plane(2));
        let (y_stride, u_stride, v_stride) = (src.strides[0], src.strides[1], src.strides[2]);
        rgba.resize(self.width * self.height * 4, 0);

        for y in 0..self.height {
            let y_row = y * y_stride;
            let u_row = (y / 2) * u_stride;
            let v_row = (y / 2) * v_stride;
            let dst_row = y * self.width * 4;

            for x in 0..self.width {
                let dst_idx = dst_row + x * 4;
                self.write_pixel(
                    &mut rgba[dst_idx..dst_idx + 4],
                    y_plane[y_row + x],
                    u_plane[u_row + x / 2],
                    v_plane[v_row + x / 2],
                );
            }
        }
    }

    fn semi_planar_to_rgba(&self, src: &VideoFrame, rgba: &mut Vec<u8>, v_first: bool) {
        let (y_plane, uv_plane) = (src.plane(0), src.plane(1));
        let (y_stride, uv_stride) = (src.strides[0], src.strides[1]);
        rgba.resize(self.width * self.height * 4, 0);

        for y in 0..self.height {
            let y_row = y * y_stride;
            let uv_row = (y / 2) * uv_stride;
            let dst_row = y * self.width * 4;

            for x in 0..self.width {
                let uv_idx = uv_row + (x / 2) * 2;
                let (a, b) = (uv_plane[uv_idx], uv_plane[uv_idx + 1]);
                let (u_val, v_val) = if v_first { (b, a) } else { (a, b) };
                let dst_idx = dst_row + x * 4;
                self.write_pixel(&mut rgba[dst_idx..dst_idx + 4], y_plane[y_row + x], u_val, v_val);
            }
        }
    }

    fn copy_rgba(&self, src: &VideoFrame, rgba: &mut Vec<u8>) {
        let row_bytes = self.width * 4;
        let plane = src.plane(0);
        for row in 0..self.height {
            let start = row * src.strides[0];
            rgba.extend_from_slice(&plane[start..start + row_bytes]);
        }
    }
}

fn copy_plane(src: &VideoFrame, index: usize, row_bytes: usize, rows: usize, out: &mut Vec<u8>) {
    let plane = src.plane(index);
    let stride = src.strides[index];
    out.reserve(row_bytes * rows);
    for row in 0..rows {
        let start = row * stride;
        out.extend_from_slice(&plane[start..start + row_bytes]);
    }
}
