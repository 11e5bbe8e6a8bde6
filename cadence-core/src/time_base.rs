//! Time base normalization.
//!
//! Containers express timestamps in stream-native rational units
//! (`1/90000` for most video, `1/sample_rate` for audio, the `mdhd` timescale
//! for MP4). Everything above the demuxer speaks milliseconds, so every pts,
//! duration and seek target crosses this module exactly once.

use serde::{Deserialize, Serialize};

/// A rational time unit: one tick is `num / den` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const MILLIS: Rational = Rational { num: 1, den: 1000 };

    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    /// Tick unit for a stream whose timescale is `ticks_per_second`.
    pub const fn per_second(ticks_per_second: i64) -> Self {
        Self {
            num: 1,
            den: ticks_per_second,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    /// `pts * 1000 * num / den`, truncated toward zero.
    ///
    /// A zero denominator maps every timestamp to 0 rather than panicking.
    pub fn to_millis(&self, pts: i64) -> i64 {
        if self.den == 0 {
            return 0;
        }
        let wide = pts as i128 * 1000 * self.num as i128 / self.den as i128;
        clamp_i128(wide)
    }

    /// Inverse of [`Rational::to_millis`]: milliseconds to native ticks.
    pub fn from_millis(&self, millis: i64) -> i64 {
        if self.num == 0 {
            return 0;
        }
        let wide = millis as i128 * self.den as i128 / (1000 * self.num as i128);
        clamp_i128(wide)
    }

    /// Reciprocal, e.g. a frame rate from a frame duration.
    pub fn invert(&self) -> Self {
        Self {
            num: self.den,
            den: self.num,
        }
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::MILLIS
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

fn clamp_i128(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}
