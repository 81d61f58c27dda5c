//! Diagnostics telemetry hub and helpers.
//!
//! The hub multiplexes device lifecycle, write results and write
//! latency into a bounded history plus an async broadcast stream. Nothing in
//! the output path depends on it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::OnceCell;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::TelemetryConfig;
use crate::engine::backend::OutputParams;
use crate::engine::scheduler::WriteCompletion;
use crate::error::{ErrorCode, OutputError};

pub mod events;

pub use events::MetricEvent;

/// Global telemetry hub shared across the crate.
static HUB: OnceCell<TelemetryHub> = OnceCell::new();

/// Install the global hub sized from `config`.
///
/// Returns `false` when a hub already exists; the first one stays in place.
pub fn init(config: &TelemetryConfig) -> bool {
    install(&HUB, config)
}

fn install(slot: &OnceCell<TelemetryHub>, config: &TelemetryConfig) -> bool {
    let installed = slot.set(TelemetryHub::from_config(config)).is_ok();
    if !installed {
        log::debug!("[Telemetry] Hub already initialized; keeping existing settings");
    }
    installed
}

/// Access the global telemetry hub, creating a default one on first use.
pub fn hub() -> &'static TelemetryHub {
    HUB.get_or_init(TelemetryHub::default)
}

/// Snapshot of hub state for CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<MetricEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
}

/// Rolling window of submit-to-finish write latencies.
struct LatencyWindow {
    samples: VecDeque<f32>,
    capacity: usize,
    sum: f32,
}

impl LatencyWindow {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0.0,
        }
    }

    /// Add a sample; returns (avg, max, count) over the window.
    fn push(&mut self, latency_ms: f32) -> (f32, f32, usize) {
        if self.samples.len() == self.capacity {
            if let Some(oldest) = self.samples.pop_front() {
                self.sum -= oldest;
            }
        }
        let latency_ms = latency_ms.max(0.0);
        self.samples.push_back(latency_ms);
        self.sum += latency_ms;

        let count = self.samples.len();
        let max = self.samples.iter().copied().fold(0.0_f32, f32::max);
        (self.sum / count as f32, max, count)
    }
}

/// Broadcast fan-out of output events plus a bounded history.
pub struct TelemetryHub {
    tx: broadcast::Sender<MetricEvent>,
    history: Mutex<VecDeque<MetricEvent>>,
    history_capacity: usize,
    total_events: AtomicU64,
    evicted: AtomicU64,
    latency: Mutex<LatencyWindow>,
}

impl TelemetryHub {
    pub fn new(channel_capacity: usize, history_capacity: usize, latency_window: usize) -> Self {
        let (tx, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
            total_events: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            latency: Mutex::new(LatencyWindow::new(latency_window)),
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(
            config.channel_capacity,
            config.history_capacity,
            config.latency_window,
        )
    }

    fn publish(&self, event: MetricEvent) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if self.history_capacity > 0 {
            if let Ok(mut history) = self.history.lock() {
                if history.len() == self.history_capacity {
                    history.pop_front();
                    self.evicted.fetch_add(1, Ordering::Relaxed);
                }
                history.push_back(event.clone());
            }
        }

        // no subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let recent = self
            .history
            .lock()
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default();
        TelemetrySnapshot {
            recent,
            total_events: self.total_events.load(Ordering::Relaxed),
            dropped_events: self.evicted.load(Ordering::Relaxed),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a `Stream`; lagged receivers yield an error item.
    pub fn subscribe_stream(&self) -> BroadcastStream<MetricEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    pub fn record_opened(&self, device_id: u64, params: &OutputParams) {
        self.publish(MetricEvent::DeviceOpened {
            device_id,
            channels: params.channels,
            sample_rate: params.sample_rate,
            encoding: params.encoding,
            timestamp_ms: now_timestamp_ms(),
        });
    }

    /// Publish a write result plus the updated submit-to-finish latency.
    pub fn record_write(&self, device_id: u64, completion: &WriteCompletion) {
        self.publish(MetricEvent::WriteCompleted {
            device_id,
            requested: completion.requested,
            written: completion.written,
        });

        let latency_ms = completion
            .completed_at
            .saturating_duration_since(completion.submitted_at)
            .as_secs_f32()
            * 1000.0;
        let observed = self
            .latency
            .lock()
            .map(|mut window| window.push(latency_ms));

        if let Ok((avg, max, count)) = observed {
            self.publish(MetricEvent::WriteLatency {
                avg_ms: avg,
                max_ms: max,
                sample_count: count,
            });
        }
    }

    pub fn record_flush(&self, device_id: u64) {
        self.publish(MetricEvent::Flushed { device_id });
    }

    pub fn record_closed(&self, device_id: u64, ok: bool) {
        self.publish(MetricEvent::DeviceClosed {
            device_id,
            ok,
            timestamp_ms: now_timestamp_ms(),
        });
    }

    pub fn record_error(&self, err: &OutputError, context: impl Into<String>) {
        self.publish(MetricEvent::Error {
            code: err.code(),
            context: context.into(),
        });
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::from_config(&TelemetryConfig::default())
    }
}

fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use futures::StreamExt;

    use crate::engine::encoding::Encoding;

    fn completion(latency_ms: u64) -> WriteCompletion {
        let submitted_at = Instant::now();
        WriteCompletion {
            written: 64,
            requested: 64,
            submitted_at,
            started_at: submitted_at,
            completed_at: submitted_at + Duration::from_millis(latency_ms),
        }
    }

    #[test]
    fn hub_preserves_order_within_history() {
        let hub = TelemetryHub::new(8, 3, 4);
        hub.record_flush(1);
        hub.record_flush(2);
        hub.record_error(
            &OutputError::InvalidBuffer {
                reason: "empty".to_string(),
            },
            "write",
        );

        let snapshot = hub.snapshot();
        assert_eq!(snapshot.recent.len(), 3);
        assert_eq!(snapshot.recent[0], MetricEvent::Flushed { device_id: 1 });
        assert!(matches!(snapshot.recent[2], MetricEvent::Error { code: 3004, .. }));
    }

    #[test]
    fn hub_evicts_history_when_full() {
        let hub = TelemetryHub::new(8, 2, 4);
        for device_id in 0..3 {
            hub.record_flush(device_id);
        }

        let snapshot = hub.snapshot();
        assert_eq!(snapshot.recent.len(), 2);
        assert_eq!(snapshot.dropped_events, 1);
        assert_eq!(snapshot.total_events, 3);
        assert_eq!(snapshot.recent[0], MetricEvent::Flushed { device_id: 1 });
    }

    #[test]
    fn latency_window_rolls_over() {
        let mut window = LatencyWindow::new(2);
        window.push(10.0);
        window.push(20.0);
        let (avg, max, count) = window.push(40.0);
        assert_eq!(count, 2);
        assert!((avg - 30.0).abs() < f32::EPSILON);
        assert!((max - 40.0).abs() < f32::EPSILON);
    }

    #[test]
    fn install_uses_config_and_keeps_first_hub() {
        let slot = OnceCell::new();
        let config = TelemetryConfig {
            channel_capacity: 4,
            history_capacity: 1,
            latency_window: 2,
        };
        assert!(install(&slot, &config));
        assert!(!install(&slot, &TelemetryConfig::default()));

        let hub = slot.get().expect("hub installed");
        hub.record_flush(1);
        hub.record_flush(2);
        let snapshot = hub.snapshot();
        assert_eq!(snapshot.recent, vec![MetricEvent::Flushed { device_id: 2 }]);
        assert_eq!(snapshot.dropped_events, 1);
    }

    #[test]
    fn hub_emits_write_and_latency() {
        let hub = TelemetryHub::new(8, 8, 4);
        hub.record_write(7, &completion(10));
        hub.record_write(7, &completion(30));

        let snapshot = hub.snapshot();
        assert_eq!(snapshot.total_events, 4);
        let last = snapshot.recent.last().cloned();
        match last {
            Some(MetricEvent::WriteLatency {
                avg_ms,
                max_ms,
                sample_count,
            }) => {
                assert_eq!(sample_count, 2);
                assert!((avg_ms - 20.0).abs() < 0.5);
                assert!((max_ms - 30.0).abs() < 0.5);
            }
            other => panic!("expected latency event, got {:?}", other),
        }
    }

    #[test]
    fn hub_records_lifecycle() {
        let hub = TelemetryHub::new(8, 8, 4);
        hub.record_opened(1, &OutputParams::new(2, 44_100, Encoding::Signed16));
        hub.record_flush(1);
        hub.record_closed(1, true);

        let snapshot = hub.snapshot();
        assert!(matches!(
            snapshot.recent[0],
            MetricEvent::DeviceOpened { sample_rate: 44_100, .. }
        ));
        assert!(matches!(
            snapshot.recent[2],
            MetricEvent::DeviceClosed { ok: true, .. }
        ));
    }

    #[tokio::test]
    async fn stream_subscribers_receive_events() {
        let hub = TelemetryHub::new(8, 8, 4);
        let mut stream = hub.subscribe_stream();
        hub.record_flush(42);

        let event = stream.next().await.expect("stream open").expect("not lagged");
        assert_eq!(event, MetricEvent::Flushed { device_id: 42 });
    }
}
