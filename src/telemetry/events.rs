//! Core telemetry event types describing output diagnostics exposed to the
//! CLI and to stream subscribers.

use serde::{Deserialize, Serialize};

use crate::engine::encoding::Encoding;

/// Rich metric events covering device lifecycle, write results and latency.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    DeviceOpened {
        device_id: u64,
        channels: u32,
        sample_rate: u32,
        encoding: Encoding,
        timestamp_ms: u64,
    },
    WriteCompleted {
        device_id: u64,
        requested: usize,
        written: isize,
    },
    WriteLatency {
        avg_ms: f32,
        max_ms: f32,
        sample_count: usize,
    },
    Flushed {
        device_id: u64,
    },
    DeviceClosed {
        device_id: u64,
        ok: bool,
        timestamp_ms: u64,
    },
    Error {
        code: i32,
        context: String,
    },
}
