use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::engine::encoding::EncodingSet;

use super::{BackendError, ModuleInfo, OutputBackend, OutputModule, OutputParams, TimeSource};

/// Backend call recorded by [`NullBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Init,
    Open,
    Write(usize),
    Flush,
    Close,
    Deinit,
}

/// Scripted behaviour for [`NullBackend`] instances.
#[derive(Debug, Clone, Default)]
pub struct NullScript {
    /// Status returned by `init_output`.
    pub fail_init: Option<i32>,
    /// Status returned by `open`.
    pub fail_open: Option<i32>,
    /// Status returned by `close`.
    pub fail_close: Option<i32>,
    /// Status returned by `deinit`.
    pub fail_deinit: Option<i32>,
    /// Whether the driver exposes a deinit step at all.
    pub has_deinit: bool,
    /// Accept at most this many bytes per write.
    pub write_limit: Option<usize>,
    /// Return this value from every write instead of a byte count.
    pub write_result: Option<isize>,
    /// Extra time spent inside every write.
    pub write_delay: Duration,
    /// Time spent inside every flush.
    pub flush_delay: Duration,
    /// Sleep for the duration of the audio written, like a real device.
    pub realtime: bool,
    /// Capability mask reported by the opened device.
    pub formats: Option<EncodingSet>,
}

/// Output module that discards audio.
///
/// Used for deterministic testing and as the default CLI backend. All
/// instances created by one module share a call log and a live-instance
/// counter.
pub struct NullModule {
    script: NullScript,
    calls: Arc<Mutex<Vec<BackendCall>>>,
    live: Arc<AtomicUsize>,
}

impl NullModule {
    pub fn new() -> Self {
        Self::with_script(NullScript {
            has_deinit: true,
            ..NullScript::default()
        })
    }

    /// Null output paced at the speed of the audio it swallows.
    pub fn realtime() -> Self {
        Self::with_script(NullScript {
            has_deinit: true,
            realtime: true,
            ..NullScript::default()
        })
    }

    pub fn with_script(script: NullScript) -> Self {
        Self {
            script,
            calls: Arc::new(Mutex::new(Vec::new())),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every backend call made by instances of this module, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// Number of created instances that have not been dropped yet.
    pub fn live_instances(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl Default for NullModule {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputModule for NullModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            api_version: 2,
            name: "dummy".to_string(),
            description: "Dummy output that discards all audio".to_string(),
            revision: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn create(&self) -> Box<dyn OutputBackend> {
        self.live.fetch_add(1, Ordering::SeqCst);
        Box::new(NullBackend {
            script: self.script.clone(),
            calls: Arc::clone(&self.calls),
            live: Arc::clone(&self.live),
            params: None,
            opened: false,
        })
    }
}

/// Instance created by [`NullModule`].
pub struct NullBackend {
    script: NullScript,
    calls: Arc<Mutex<Vec<BackendCall>>>,
    live: Arc<AtomicUsize>,
    params: Option<OutputParams>,
    opened: bool,
}

impl NullBackend {
    fn record(&self, call: BackendCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn status(code: Option<i32>, step: &str) -> Result<(), BackendError> {
        match code {
            Some(code) => Err(BackendError::new(code, format!("scripted {} failure", step))),
            None => Ok(()),
        }
    }
}

impl OutputBackend for NullBackend {
    fn init_output(&mut self, params: &OutputParams) -> Result<(), BackendError> {
        self.record(BackendCall::Init);
        Self::status(self.script.fail_init, "init_output")?;
        self.params = Some(params.clone());
        Ok(())
    }

    fn open(&mut self) -> Result<(), BackendError> {
        self.record(BackendCall::Open);
        if self.params.is_none() {
            return Err(BackendError::new(-1, "open() before init_output()"));
        }
        Self::status(self.script.fail_open, "open")?;
        self.opened = true;
        Ok(())
    }

    fn write(&mut self, buffer: &[u8]) -> isize {
        self.record(BackendCall::Write(buffer.len()));
        if !self.opened {
            return -1;
        }
        if !self.script.write_delay.is_zero() {
            std::thread::sleep(self.script.write_delay);
        }
        if let Some(result) = self.script.write_result {
            return result;
        }

        let accepted = self
            .script
            .write_limit
            .map_or(buffer.len(), |limit| buffer.len().min(limit));

        if self.script.realtime {
            if let Some(params) = &self.params {
                let per_second = params.bytes_per_second();
                if per_second > 0 {
                    let micros = accepted as u64 * 1_000_000 / per_second;
                    std::thread::sleep(Duration::from_micros(micros));
                }
            }
        }

        accepted as isize
    }

    fn flush(&mut self) {
        self.record(BackendCall::Flush);
        if !self.script.flush_delay.is_zero() {
            std::thread::sleep(self.script.flush_delay);
        }
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.record(BackendCall::Close);
        self.opened = false;
        Self::status(self.script.fail_close, "close")
    }

    fn deinit(&mut self) -> Option<Result<(), BackendError>> {
        if !self.script.has_deinit {
            return None;
        }
        self.record(BackendCall::Deinit);
        self.params = None;
        Some(Self::status(self.script.fail_deinit, "deinit"))
    }

    fn formats(&self) -> EncodingSet {
        self.script.formats.unwrap_or_else(EncodingSet::all)
    }
}

impl Drop for NullBackend {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Deterministic time source for tests.
///
/// Each call to `now()` advances by a fixed 10ms to guarantee monotonic
/// timestamps even when no real audio stream is active.
pub struct StubTimeSource {
    start: Instant,
    offset_ms: AtomicU64,
}

impl StubTimeSource {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }
}

impl Default for StubTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for StubTimeSource {
    fn now(&self) -> Instant {
        let ms = self.offset_ms.fetch_add(10, Ordering::SeqCst);
        self.start + Duration::from_millis(ms)
    }
}
