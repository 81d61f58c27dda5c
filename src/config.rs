//! Configuration loading for the output stack
//!
//! Defaults can be overridden from a JSON file so output format, drain
//! timing and telemetry buffers can be tuned without recompiling.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::engine::backend::{BackendKind, OutputParams};
use crate::engine::encoding::Encoding;

/// Default config file looked up by [`AppConfig::load`].
pub const DEFAULT_CONFIG_FILE: &str = "pcm_speaker.json";

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub output: OutputConfig,
    pub speaker: SpeakerConfig,
    pub telemetry: TelemetryConfig,
}

/// Device selection and stream format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub backend: BackendKind,
    pub channels: u32,
    pub sample_rate: u32,
    pub encoding: Encoding,
    /// Backend-specific device selector (cpal device name, WAV path)
    pub device: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Null,
            channels: 2,
            sample_rate: 44_100,
            encoding: Encoding::Signed16,
            device: None,
        }
    }
}

impl OutputConfig {
    pub fn params(&self) -> OutputParams {
        OutputParams {
            channels: self.channels,
            sample_rate: self.sample_rate,
            encoding: self.encoding,
            device: self.device.clone(),
        }
    }
}

/// Speaker sink behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeakerConfig {
    /// Frames handed to the device per backend write
    pub samples_per_frame: usize,
    /// Wait between flush and close when ending a stream
    pub drain_delay_ms: u64,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            samples_per_frame: 1024,
            drain_delay_ms: 600,
        }
    }
}

/// Telemetry buffer sizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub channel_capacity: usize,
    pub history_capacity: usize,
    /// Writes averaged into each latency event
    pub latency_window: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            history_capacity: 64,
            latency_window: 32,
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file, falling back to defaults if the
    /// file is missing or malformed.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    pub fn load() -> Self {
        Self::load_from_file(DEFAULT_CONFIG_FILE)
    }
}
