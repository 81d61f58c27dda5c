//! OutputDevice: one opened backend plus its lifecycle.
//!
//! Sequences open → {write | flush}* → close, hands writes to the device's
//! background worker and exposes the progress derived from completed writes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::backend::{
    BackendError, OutputBackend, OutputModule, OutputParams, SystemTimeSource, TimeSource,
};
use crate::engine::encoding::{Encoding, EncodingSet};
use crate::engine::progress::{ProgressSnapshot, ProgressTracker};
use crate::engine::scheduler::{PendingWrite, SpawnError, WriteRequest, WriteWorker};
use crate::error::{log_output_error, OpenStage, OutputError, TeardownStage};
use crate::telemetry;

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a device handle.
///
/// `Created` only exists while `open` runs; callers observe `Opened` or
/// `Closed`. There is no transition out of `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    Opened,
    Closed,
}

impl LifecycleState {
    pub const fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Opened => "opened",
            LifecycleState::Closed => "closed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open parameters as supplied by an embedding caller.
///
/// The encoding is the raw `MPG123_ENC_*` integer; it is validated before
/// any backend call is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub channels: u32,
    pub sample_rate: u32,
    pub encoding: i32,
    pub device: Option<String>,
}

impl OpenRequest {
    pub fn new(channels: u32, sample_rate: u32, encoding: Encoding) -> Self {
        Self {
            channels,
            sample_rate,
            encoding: encoding.code(),
            device: None,
        }
    }

    /// Request carrying an unchecked encoding code.
    pub fn from_raw(channels: u32, sample_rate: u32, encoding: i32) -> Self {
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

    fn validate(self) -> Result<OutputParams, OutputError> {
        let encoding =
            Encoding::from_code(self.encoding).ok_or_else(|| OutputError::UnsupportedFormat {
                reason: format!("unrecognized encoding 0x{:x}", self.encoding),
            })?;
        if self.channels == 0 {
            return Err(OutputError::UnsupportedFormat {
                reason: "channel count must be positive".to_string(),
            });
        }
        if self.sample_rate == 0 {
            return Err(OutputError::UnsupportedFormat {
                reason: "sample rate must be positive".to_string(),
            });
        }

        Ok(OutputParams {
            channels: self.channels,
            sample_rate: self.sample_rate,
            encoding,
            device: self.device,
        })
    }
}

/// Handle to one opened output device.
///
/// Owns the backend instance (through its worker) and the progress
/// counters. Dropping an open device closes it.
pub struct OutputDevice {
    id: u64,
    params: OutputParams,
    state: LifecycleState,
    formats: EncodingSet,
    worker: Option<WriteWorker>,
    progress: Arc<ProgressTracker>,
}

impl OutputDevice {
    /// Validate the request, then initialize and open a fresh backend.
    pub fn open(module: &dyn OutputModule, request: OpenRequest) -> Result<Self, OutputError> {
        Self::open_with_time_source(module, request, Arc::new(SystemTimeSource::default()))
    }

    pub fn open_with_time_source(
        module: &dyn OutputModule,
        request: OpenRequest,
        time_source: Arc<dyn TimeSource>,
    ) -> Result<Self, OutputError> {
        let params = request.validate().map_err(|err| {
            log_output_error(&err, "open");
            err
        })?;

        let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);
        let backend = Self::init_and_open(module, &params).map_err(|err| {
            log_output_error(&err, "open");
            telemetry::hub().record_error(&err, "open");
            err
        })?;
        let formats = backend.formats();

        let progress = Arc::new(ProgressTracker::new(&params, time_source));
        let worker = match WriteWorker::spawn(id, backend, Arc::clone(&progress)) {
            Ok(worker) => worker,
            Err(failed) => return Err(release_unspawned(failed)),
        };

        log::info!(
            "[OutputDevice] Device {} opened via {}: {} ch, {} Hz, {} ({})",
            id,
            module.info().name,
            params.channels,
            params.sample_rate,
            params.encoding,
            params.device.as_deref().unwrap_or("default device")
        );
        telemetry::hub().record_opened(id, &params);

        Ok(Self {
            id,
            params,
            state: LifecycleState::Opened,
            formats,
            worker: Some(worker),
            progress,
        })
    }

    /// init_output then open; a failure at either step leaves nothing behind.
    fn init_and_open(
        module: &dyn OutputModule,
        params: &OutputParams,
    ) -> Result<Box<dyn OutputBackend>, OutputError> {
        let mut backend = module.create();

        backend
            .init_output(params)
            .map_err(|err| open_failed(OpenStage::Init, err))?;

        if let Err(err) = backend.open() {
            // release whatever init_output allocated
            if let Some(Err(deinit_err)) = backend.deinit() {
                log::warn!(
                    "[OutputDevice] deinit after failed open also failed: {}",
                    deinit_err
                );
            }
            return Err(open_failed(OpenStage::Open, err));
        }

        Ok(backend)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn params(&self) -> &OutputParams {
        &self.params
    }

    /// Encodings reported by the opened backend.
    pub fn formats(&self) -> EncodingSet {
        self.formats
    }

    fn worker(&self, operation: &'static str) -> Result<&WriteWorker, OutputError> {
        match (self.state, self.worker.as_ref()) {
            (LifecycleState::Opened, Some(worker)) => Ok(worker),
            (state, _) => Err(OutputError::InvalidState {
                operation,
                state: state.as_str(),
            }),
        }
    }

    /// Queue a write and return a future for the raw backend result.
    ///
    /// Fails synchronously with `InvalidState` or `InvalidBuffer`; otherwise
    /// the backend call happens on the worker thread. The buffer is copied
    /// (or moved) into the request before this returns.
    pub fn submit_write(&self, buffer: impl Into<Vec<u8>>) -> Result<PendingWrite, OutputError> {
        self.submit(WriteRequest::new(buffer))
    }

    pub fn submit(&self, request: WriteRequest) -> Result<PendingWrite, OutputError> {
        let worker = self.worker("write")?;
        request.validate()?;
        worker.submit(request)
    }

    /// Submit and await one write.
    pub async fn write(&self, buffer: impl Into<Vec<u8>>) -> Result<isize, OutputError> {
        self.submit_write(buffer)?.await
    }

    /// Drain buffered audio. Blocks the caller until the backend returns.
    pub fn flush(&self) -> Result<(), OutputError> {
        let worker = self.worker("flush")?;
        worker.flush()?;
        log::info!("[OutputDevice] Device {} flushed", self.id);
        telemetry::hub().record_flush(self.id);
        Ok(())
    }

    /// Close the backend, then deinit it if it has that step.
    ///
    /// The device is `Closed` afterwards whatever the outcome, and the
    /// backend instance has been released.
    pub fn close(&mut self) -> Result<(), OutputError> {
        if self.state != LifecycleState::Opened {
            return Err(OutputError::InvalidState {
                operation: "close",
                state: self.state.as_str(),
            });
        }
        self.state = LifecycleState::Closed;

        let result = match self.worker.take() {
            Some(worker) => worker.shutdown(),
            None => Ok(()),
        };
        self.params.device = None;

        match &result {
            Ok(()) => log::info!("[OutputDevice] Device {} closed", self.id),
            Err(err) => {
                log_output_error(err, "close");
                telemetry::hub().record_error(err, "close");
            }
        }
        telemetry::hub().record_closed(self.id, result.is_ok());
        result
    }

    /// Snapshot progress and reset the rolling timing epoch.
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Shared tracker, pollable from other tasks while writes are in flight.
    pub fn progress_tracker(&self) -> Arc<ProgressTracker> {
        Arc::clone(&self.progress)
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        if self.state == LifecycleState::Opened {
            log::warn!(
                "[OutputDevice] Device {} dropped while open; closing",
                self.id
            );
            let _ = self.close();
        }
    }
}

fn open_failed(stage: OpenStage, err: BackendError) -> OutputError {
    OutputError::OpenFailed {
        stage,
        code: err.code,
        reason: err.message,
    }
}

/// Close and deinit a backend whose worker never started.
fn release_unspawned(failed: SpawnError) -> OutputError {
    let SpawnError { error, mut backend } = failed;
    if let Err(teardown_err) = teardown(backend.as_mut()) {
        log::warn!(
            "[OutputDevice] teardown after failed worker spawn also failed: {}",
            teardown_err
        );
    }
    drop(backend);

    let err = OutputError::from(error);
    log_output_error(&err, "open");
    telemetry::hub().record_error(&err, "open");
    err
}

/// Best-effort teardown: close, then the optional deinit.
///
/// Both steps run even if the first fails; the first failure is returned.
pub(crate) fn teardown(backend: &mut dyn OutputBackend) -> Result<(), OutputError> {
    let closed = backend.close().map_err(|err| OutputError::CloseFailed {
        stage: TeardownStage::Close,
        code: err.code,
        reason: err.message,
    });

    let deinit = match backend.deinit() {
        Some(Err(err)) => Err(OutputError::CloseFailed {
            stage: TeardownStage::Deinit,
            code: err.code,
            reason: err.message,
        }),
        Some(Ok(())) | None => Ok(()),
    };

    closed.and(deinit)
}
