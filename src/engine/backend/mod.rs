//! Backend abstractions for the output core.
//!
//! A concrete driver is split in two halves: an [`OutputModule`] describing
//! the driver as a whole (metadata, capability query, instance factory) and
//! an [`OutputBackend`] owning the state of one opened device. The core only
//! ever talks to these traits.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::engine::encoding::{Encoding, EncodingSet};

/// Parameters handed to a backend instance by `init_output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputParams {
    pub channels: u32,
    pub sample_rate: u32,
    pub encoding: Encoding,
    /// Backend-specific device selector; `None` selects the default device.
    pub device: Option<String>,
}

impl OutputParams {
    pub fn new(channels: u32, sample_rate: u32, encoding: Encoding) -> Self {
        Self {
            channels,
            sample_rate,
            encoding,
            device: None,
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Bytes in one interleaved frame (all channels).
    pub fn block_align(&self) -> usize {
        self.channels as usize * self.encoding.bytes_per_sample()
    }

    /// Bytes consumed by one second of audio.
    pub fn bytes_per_second(&self) -> u64 {
        self.block_align() as u64 * u64::from(self.sample_rate)
    }
}

/// Metadata reported by an output module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub api_version: i32,
    pub name: String,
    pub description: String,
    pub revision: String,
}

/// Failure status returned by a backend lifecycle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub code: i32,
    pub message: String,
}

impl BackendError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend status {}: {}", self.code, self.message)
    }
}

impl std::error::Error for BackendError {}

/// One instance of a concrete output driver.
///
/// Every method may block. The core calls `write` from a background worker
/// and never calls two methods of the same instance concurrently.
pub trait OutputBackend: Send {
    /// Module-level setup for this instance; stores the parameters.
    fn init_output(&mut self, params: &OutputParams) -> Result<(), BackendError>;

    /// Open the physical device configured by `init_output`.
    fn open(&mut self) -> Result<(), BackendError>;

    /// Blocking write of interleaved PCM bytes.
    ///
    /// Returns the number of bytes accepted, which may be short. Zero or a
    /// negative value signals a driver error and is passed to the caller
    /// untranslated.
    fn write(&mut self, buffer: &[u8]) -> isize;

    /// Drain audio that was accepted but not yet played.
    fn flush(&mut self);

    fn close(&mut self) -> Result<(), BackendError>;

    /// Optional final teardown. `None` means the driver has no deinit step.
    fn deinit(&mut self) -> Option<Result<(), BackendError>> {
        None
    }

    /// Encodings the opened device accepts.
    fn formats(&self) -> EncodingSet;
}

/// A concrete driver: metadata, capability query and instance factory.
pub trait OutputModule: Send + Sync {
    fn info(&self) -> ModuleInfo;

    /// Create a fresh, unopened backend instance.
    fn create(&self) -> Box<dyn OutputBackend>;

    /// Capability query.
    ///
    /// The default probes hardware with a startup-only open/close cycle at
    /// stereo, 44.1 kHz, signed 16-bit. Modules that can answer without a
    /// live device override this.
    fn formats(&self) -> Result<EncodingSet, BackendError> {
        let params = OutputParams::new(2, 44_100, Encoding::Signed16);
        let mut probe = self.create();
        probe.init_output(&params)?;
        if let Err(err) = probe.open() {
            if let Some(Err(deinit_err)) = probe.deinit() {
                log::warn!(
                    "[OutputModule] Format probe deinit after failed open failed: {}",
                    deinit_err
                );
            }
            return Err(err);
        }
        let formats = probe.formats();
        if let Err(err) = probe.close() {
            log::warn!("[OutputModule] Format probe close failed: {}", err);
        }
        if let Some(Err(err)) = probe.deinit() {
            log::warn!("[OutputModule] Format probe deinit failed: {}", err);
        }
        Ok(formats)
    }
}

/// Trait representing a monotonic time source used for write timings.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// Default time source backed by `Instant::now`.
#[derive(Default)]
pub struct SystemTimeSource {
    _unit: (),
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Drivers selectable at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Null,
    Wav,
    Cpal,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "null" => Ok(BackendKind::Null),
            "wav" => Ok(BackendKind::Wav),
            "cpal" => Ok(BackendKind::Cpal),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// Factory function to create the module for the selected driver.
pub fn create_module(kind: BackendKind) -> Result<Arc<dyn OutputModule>, BackendError> {
    match kind {
        BackendKind::Null => Ok(Arc::new(NullModule::realtime())),
        BackendKind::Wav => Ok(Arc::new(WavModule::default())),
        BackendKind::Cpal => {
            #[cfg(feature = "cpal_output")]
            {
                Ok(Arc::new(CpalModule::default()))
            }

            #[cfg(not(feature = "cpal_output"))]
            {
                Err(BackendError::new(
                    -1,
                    "cpal backend not compiled in (enable the cpal_output feature)",
                ))
            }
        }
    }
}

#[cfg(feature = "cpal_output")]
mod cpal;
#[cfg(feature = "cpal_output")]
pub use self::cpal::{CpalBackend, CpalModule};

mod stub;
pub use stub::{BackendCall, NullBackend, NullModule, NullScript, StubTimeSource};

mod wav;
pub use wav::{WavBackend, WavModule};
