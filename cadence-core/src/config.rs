//! Engine configuration.
//!
//! Every knob has a default that matches a typical playback host, so hosts
//! usually start from `EngineConfig::default()` and override a field or two,
//! or load a JSON file where missing keys fall back to the defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Layout of video payloads handed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoOutput {
    /// Always convert to packed RGBA.
    Rgba,
    /// Copy planar YUV420P / NV12 / NV21 through untouched, convert anything
    /// else to RGBA.
    Native,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub video_output: VideoOutput,
    /// PCM output rate; decoded audio is resampled when it differs.
    pub audio_output_sample_rate: u32,
    /// Channel count used when the host passes 0 as target channels.
    pub default_audio_channels: u16,
    /// Upper bound on video decode attempts while converging on a seek target.
    pub max_video_seek_cycles: u32,
    /// Upper bound on consecutive "needs more input" packets inside one decode call.
    pub max_need_input_retries: u32,
    /// Seek tolerance for video streams without a usable frame rate.
    pub video_min_step_fallback_ms: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            video_output: VideoOutput::Rgba,
            audio_output_sample_rate: 48_000,
            default_audio_channels: 2,
            max_video_seek_cycles: 500,
            max_need_input_retries: 64,
            video_min_step_fallback_ms: 40.0,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
        Self::from_json_str(&text)
            .map_err(|e| format!("Invalid config {}: {}", path.display(), e))
    }

    /// Channel count actually produced for a host request (1 or 2).
    pub fn output_channels(&self, requested: u16) -> u16 {
        let channels = if requested == 0 {
            self.default_audio_channels
        } else {
            requested
        };
        channels.clamp(1, 2)
    }
}
