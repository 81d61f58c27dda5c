//! Playback progress derived from completed writes.
//!
//! Counters only move when a write completes. Timing offsets are reported
//! relative to a rolling epoch that every snapshot resets, so repeated
//! polling yields small deltas.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::engine::backend::{OutputParams, TimeSource};

/// Point-in-time view of a device's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub writes_issued: u64,
    pub bytes_written_total: u64,
    /// Playback position implied by the bytes handed to the backend.
    pub presentation_timestamp_ms: u64,
    /// Last submission, relative to the previous epoch (negative if earlier).
    pub enqueue_ms: Option<f64>,
    /// Last backend call start, relative to the previous epoch.
    pub start_ms: Option<f64>,
    /// Last completion, relative to the previous epoch.
    pub finish_ms: Option<f64>,
    /// Time since the previous epoch; becomes the next epoch.
    pub now_ms: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Checkpoints {
    submitted_at: Option<Instant>,
    started_at: Option<Instant>,
    completed_at: Option<Instant>,
}

/// Accumulates write results for one device.
pub struct ProgressTracker {
    writes_issued: AtomicU64,
    bytes_written: AtomicU64,
    bytes_per_second: u64,
    checkpoints: Mutex<Checkpoints>,
    epoch: Mutex<Instant>,
    time_source: Arc<dyn TimeSource>,
}

impl ProgressTracker {
    pub fn new(params: &OutputParams, time_source: Arc<dyn TimeSource>) -> Self {
        let epoch = time_source.now();
        Self {
            writes_issued: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            bytes_per_second: params.bytes_per_second(),
            checkpoints: Mutex::new(Checkpoints::default()),
            epoch: Mutex::new(epoch),
            time_source,
        }
    }

    pub(crate) fn time_source(&self) -> &Arc<dyn TimeSource> {
        &self.time_source
    }

    pub(crate) fn record_submitted(&self, at: Instant) {
        if let Ok(mut checkpoints) = self.checkpoints.lock() {
            checkpoints.submitted_at = Some(at);
        }
    }

    pub(crate) fn record_started(&self, at: Instant) {
        if let Ok(mut checkpoints) = self.checkpoints.lock() {
            checkpoints.started_at = Some(at);
        }
    }

    /// Count one completed write. Negative results never reach the total.
    pub(crate) fn record_completed(&self, written: isize, at: Instant) {
        if let Ok(mut checkpoints) = self.checkpoints.lock() {
            checkpoints.completed_at = Some(at);
        }
        let accepted = written.max(0) as u64;
        self.bytes_written.fetch_add(accepted, Ordering::SeqCst);
        self.writes_issued.fetch_add(1, Ordering::SeqCst);
    }

    pub fn writes_issued(&self) -> u64 {
        self.writes_issued.load(Ordering::SeqCst)
    }

    pub fn bytes_written_total(&self) -> u64 {
        self.bytes_written.load(Ordering::SeqCst)
    }

    pub fn presentation_timestamp_ms(&self) -> u64 {
        presentation_ms(self.bytes_written_total(), self.bytes_per_second)
    }

    /// Produce a snapshot and reset the rolling epoch to "now".
    ///
    /// Concurrent pollers race on the epoch; the last one wins.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let now = self.time_source.now();
        let checkpoints = self
            .checkpoints
            .lock()
            .map(|guard| *guard)
            .unwrap_or_default();

        let epoch = match self.epoch.lock() {
            Ok(mut epoch) => std::mem::replace(&mut *epoch, now),
            Err(_) => now,
        };

        let bytes = self.bytes_written_total();
        ProgressSnapshot {
            writes_issued: self.writes_issued(),
            bytes_written_total: bytes,
            presentation_timestamp_ms: presentation_ms(bytes, self.bytes_per_second),
            enqueue_ms: checkpoints.submitted_at.map(|at| relative_ms(at, epoch)),
            start_ms: checkpoints.started_at.map(|at| relative_ms(at, epoch)),
            finish_ms: checkpoints.completed_at.map(|at| relative_ms(at, epoch)),
            now_ms: relative_ms(now, epoch),
        }
    }
}

/// `floor(bytes * 1000 / bytes_per_second)`, or 0 for a zero rate.
pub fn presentation_ms(bytes: u64, bytes_per_second: u64) -> u64 {
    debug_assert!(bytes_per_second > 0, "zero-width output format");
    if bytes_per_second == 0 {
        return 0;
    }
    (u128::from(bytes) * 1000 / u128::from(bytes_per_second)) as u64
}

fn relative_ms(at: Instant, epoch: Instant) -> f64 {
    if at >= epoch {
        at.duration_since(epoch).as_nanos() as f64 / 1_000_000.0
    } else {
        -(epoch.duration_since(at).as_nanos() as f64 / 1_000_000.0)
    }
}
