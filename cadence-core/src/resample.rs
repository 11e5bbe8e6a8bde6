//! Audio output conversion.
//!
//! Decoded audio arrives as interleaved `f32` at the codec's rate and channel
//! layout. Hosts get interleaved S16LE at the configured output rate with 1 or
//! 2 channels. Rate conversion is done with a sinc resampler fed in fixed
//! blocks, so output lags input by up to one block.

use std::f32::consts::FRAC_1_SQRT_2;

use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};
use tracing::debug;

use crate::buffer::AudioPayload;
use crate::error::DecodeError;
use crate::frame::AudioFrame;

/// Source frames fed to the sinc resampler per `process()` call.
const RESAMPLE_CHUNK_FRAMES: usize = 1024;

pub struct AudioResampler {
    out_rate: u32,
    out_channels: u16,
    src_rate: u32,
    resampler: Option<SincFixedIn<f32>>,
    // Per output channel, source-rate samples waiting for a full block
    pending: Vec<Vec<f32>>,
    block: Vec<Vec<f32>>,
    remixed: Vec<Vec<f32>>,
    // Downmix matrix for the last multichannel layout seen
    gains: Vec<(f32, f32)>,
    // Start of the last output relative to its input frame's start
    lead_ms: f64,
}

impl AudioResampler {
    pub fn new(out_rate: u32, out_channels: u16) -> Result<Self, String> {
        if out_rate == 0 {
            return Err("output sample rate must be non-zero".to_string());
        }
        if !(1..=2).contains(&out_channels) {
            return Err(format!("unsupported output channel count {}", out_channels));
        }
        let lanes = out_channels as usize;
        Ok(Self {
            out_rate,
            out_channels,
            src_rate: 0,
            resampler: None,
            pending: vec![Vec::new(); lanes],
            block: vec![Vec::new(); lanes],
            remixed: vec![Vec::new(); lanes],
            gains: Vec::new(),
            lead_ms: 0.0,
        })
    }

    pub fn out_rate(&self) -> u32 {
        self.out_rate
    }

    pub fn out_channels(&self) -> u16 {
        self.out_channels
    }

    /// Where the PCM written by the last [`convert`](Self::convert) starts,
    /// relative to the pts of the frame passed in. Zero without rate
    /// conversion; negative when blocks buffered from earlier frames came out.
    pub fn lead_ms(&self) -> f64 {
        self.lead_ms
    }

    /// Convert one decoded frame into `out`, replacing its PCM.
    /// Returns the number of output frames written, zero while the rate
    /// converter is still filling a block.
    pub fn convert(&mut self, frame: &AudioFrame, out: &mut AudioPayload) -> Result<usize, DecodeError> {
        if frame.channels == 0 || frame.sample_rate == 0 {
            return Err(DecodeError::Resample(format!(
                "frame has {} channels at {} Hz",
                frame.channels, frame.sample_rate
            )));
        }

        out.pcm.clear();
        out.sample_rate = self.out_rate;
        out.channels = self.out_channels;
        self.lead_ms = 0.0;

        self.remix(frame);
        let input_frames = self.remixed[0].len();

        if frame.sample_rate == self.out_rate {
            write_s16(&self.remixed, &mut out.pcm);
            return Ok(input_frames);
        }

        self.ensure_resampler(frame.sample_rate)?;
        for (pending, remixed) in self.pending.iter_mut().zip(&self.remixed) {
            pending.extend_from_slice(remixed);
        }

        let mut written = 0;
        let mut consumed = 0;
        while let Some(rs) = self.resampler.as_mut() {
            let in_max = rs.input_frames_max();
            if self.pending[0].len() < in_max {
                break;
            }
            consumed += in_max;
            for (block, pending) in self.block.iter_mut().zip(self.pending.iter_mut()) {
                block.clear();
                block.extend(pending.drain(..in_max));
            }
            let resampled = rs
                .process(&self.block, None)
                .map_err(|e| DecodeError::Resample(e.to_string()))?;
            written += resampled.first().map(|c| c.len()).unwrap_or(0);
            write_s16(&resampled, &mut out.pcm);
        }

        // consumed input ends where the still-pending input begins
        let first_source_frame = input_frames as i64 - self.pending[0].len() as i64 - consumed as i64;
        self.lead_ms = first_source_frame as f64 * 1000.0 / frame.sample_rate as f64;
        Ok(written)
    }

    /// Drop buffered input, e.g. after a seek.
    pub fn flush(&mut self) {
        for pending in &mut self.pending {
            pending.clear();
        }
        if let Some(rs) = self.resampler.as_mut() {
            rs.reset();
        }
    }

    fn ensure_resampler(&mut self, src_rate: u32) -> Result<(), DecodeError> {
        if self.resampler.is_some() && self.src_rate == src_rate {
            return Ok(());
        }
        debug!("Audio resampler {} Hz -> {} Hz", src_rate, self.out_rate);

        let rs = SincFixedIn::<f32>::new(
            self.out_rate as f64 / src_rate as f64,
            2.0,
            SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            },
            RESAMPLE_CHUNK_FRAMES,
            self.out_channels as usize,
        )
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

        for pending in &mut self.pending {
            pending.clear();
        }
        self.resampler = Some(rs);
        self.src_rate = src_rate;
        Ok(())
    }

    /// Split interleaved input into one lane per output channel.
    fn remix(&mut self, frame: &AudioFrame) {
        let src_channels = frame.channels as usize;
        for lane in &mut self.remixed {
            lane.clear();
        }
        if src_channels > 2 && self.gains.len() != src_channels {
            self.gains = stereo_gains(src_channels);
            debug!("Downmixing {} channels to {}", src_channels, self.out_channels);
        }

        for sample in frame.samples.chunks_exact(src_channels) {
            match (self.out_channels, src_channels) {
                (_, 1) => {
                    for lane in &mut self.remixed {
                        lane.push(sample[0]);
                    }
                }
                (1, 2) => self.remixed[0].push((sample[0] + sample[1]) / 2.0),
                (_, 2) => {
                    self.remixed[0].push(sample[0]);
                    self.remixed[1].push(sample[1]);
                }
                (out, _) => {
                    let (left, right) = sample
                        .iter()
                        .zip(&self.gains)
                        .fold((0.0, 0.0), |(l, r), (s, (gl, gr))| (l + s * gl, r + s * gr));
                    if out == 1 {
                        self.remixed[0].push((left + right) / 2.0);
                    } else {
                        self.remixed[0].push(left);
                        self.remixed[1].push(right);
                    }
                }
            }
        }
    }
}

/// Left/right gain of each source channel when folding a multichannel
/// layout down to stereo. Channels are taken in the usual interleaved order
/// (FL FR FC LFE, then back/side pairs); LFE is dropped. Each side is
/// normalized so a full-scale input cannot clip.
fn stereo_gains(channels: usize) -> Vec<(f32, f32)> {
    const FL: (f32, f32) = (1.0, 0.0);
    const FR: (f32, f32) = (0.0, 1.0);
    const FC: (f32, f32) = (FRAC_1_SQRT_2, FRAC_1_SQRT_2);
    const LFE: (f32, f32) = (0.0, 0.0);
    const SL: (f32, f32) = (FRAC_1_SQRT_2, 0.0);
    const SR: (f32, f32) = (0.0, FRAC_1_SQRT_2);
    const BC: (f32, f32) = (0.5, 0.5);

    let mut gains = match channels {
        3 => vec![FL, FR, FC],
        4 => vec![FL, FR, SL, SR],
        5 => vec![FL, FR, FC, SL, SR],
        6 => vec![FL, FR, FC, LFE, SL, SR],
        7 => vec![FL, FR, FC, LFE, BC, SL, SR],
        8 => vec![FL, FR, FC, LFE, SL, SR, SL, SR],
        n => {
            let mut gains = vec![FL, FR];
            gains.resize(n, BC);
            gains
        }
    };

    let left: f32 = gains.iter().map(|g| g.0).sum();
    let right: f32 = gains.iter().map(|g| g.1).sum();
    for gain in &mut gains {
        gain.0 /= left;
        gain.1 /= right;
    }
    gains
}

/// Interleave planar lanes into S16LE bytes.
fn write_s16(lanes: &[Vec<f32>], pcm: &mut Vec<u8>) {
    let frames = lanes.first().map(|l| l.len()).unwrap_or(0);
    pcm.reserve(frames * lanes.len() * 2);
    for i in 0..frames {
        for lane in lanes {
            let s = (lane[i].clamp(-1.0, 1.0) * 32767.0) as i16;
            pcm.extend_from_slice(&s.to_le_bytes());
        }
    }
}
