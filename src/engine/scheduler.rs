//! Background write worker.
//!
//! Each opened device owns one worker thread, and the backend instance is
//! moved into it for the lifetime of the device. The control path only
//! sends commands; blocking device I/O happens on the worker. Commands are
//! executed strictly in submission order, so write completions for a
//! device are delivered in the order the writes were submitted.

use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::engine::backend::OutputBackend;
use crate::engine::core::teardown;
use crate::engine::progress::ProgressTracker;
use crate::error::OutputError;
use crate::telemetry;

/// One buffer handed to the backend.
///
/// The bytes are owned by the request, so the caller cannot mutate them
/// while the write is in flight.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    buffer: Vec<u8>,
    length: usize,
}

impl WriteRequest {
    pub fn new(buffer: impl Into<Vec<u8>>) -> Self {
        let buffer = buffer.into();
        let length = buffer.len();
        Self { buffer, length }
    }

    /// Request with an explicitly declared length, as passed by callers
    /// that hand over (pointer, length) pairs. Must equal the buffer size.
    pub fn with_length(buffer: impl Into<Vec<u8>>, length: usize) -> Self {
        Self {
            buffer: buffer.into(),
            length,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub(crate) fn validate(&self) -> Result<(), OutputError> {
        if self.buffer.is_empty() || self.length == 0 {
            return Err(OutputError::InvalidBuffer {
                reason: "zero-length buffer".to_string(),
            });
        }
        if self.length != self.buffer.len() {
            return Err(OutputError::InvalidBuffer {
                reason: format!(
                    "declared length {} does not match buffer size {}",
                    self.length,
                    self.buffer.len()
                ),
            });
        }
        Ok(())
    }
}

/// Result of one executed write, with its timing checkpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteCompletion {
    /// Raw backend result: bytes accepted, or a negative driver error.
    pub written: isize,
    pub requested: usize,
    pub submitted_at: Instant,
    pub started_at: Instant,
    pub completed_at: Instant,
}

/// Future resolving to the raw backend result of a submitted write.
///
/// Dropping it does not cancel the write; the worker still runs it to
/// completion and counts it.
#[must_use = "the write runs regardless, but its result is only observable by awaiting"]
pub struct PendingWrite {
    rx: oneshot::Receiver<WriteCompletion>,
}

impl PendingWrite {
    /// Await the full completion record instead of just the byte count.
    pub async fn completion(self) -> Result<WriteCompletion, OutputError> {
        self.rx.await.map_err(|_| worker_lost())
    }
}

impl Future for PendingWrite {
    type Output = Result<isize, OutputError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result
                .map(|completion| completion.written)
                .map_err(|_| worker_lost())
        })
    }
}

fn worker_lost() -> OutputError {
    OutputError::WorkerLost {
        reason: "write worker exited before completing the request".to_string(),
    }
}

pub(crate) enum Command {
    Write {
        request: WriteRequest,
        submitted_at: Instant,
        reply: oneshot::Sender<WriteCompletion>,
    },
    Flush {
        reply: mpsc::SyncSender<()>,
    },
    Close {
        reply: mpsc::SyncSender<Result<(), OutputError>>,
    },
}

/// A worker thread that could not be started, with the backend it was
/// meant to own.
pub(crate) struct SpawnError {
    pub(crate) error: std::io::Error,
    pub(crate) backend: Box<dyn OutputBackend>,
}

/// Handle to a device's worker thread.
pub(crate) struct WriteWorker {
    tx: mpsc::Sender<Command>,
    progress: Arc<ProgressTracker>,
    thread: Option<JoinHandle<()>>,
}

impl WriteWorker {
    /// Move `backend` onto a new worker thread.
    ///
    /// The backend is only handed over once the thread exists, so a failed
    /// spawn returns it to the caller for teardown.
    pub(crate) fn spawn(
        device_id: u64,
        backend: Box<dyn OutputBackend>,
        progress: Arc<ProgressTracker>,
    ) -> Result<Self, SpawnError> {
        let (tx, rx) = mpsc::channel();
        let (handoff, received) = mpsc::sync_channel::<Box<dyn OutputBackend>>(1);
        let worker_progress = Arc::clone(&progress);

        let spawned = std::thread::Builder::new()
            .name(format!("pcm-output-{}", device_id))
            .spawn(move || {
                if let Ok(backend) = received.recv() {
                    run(device_id, backend, worker_progress, rx);
                }
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(error) => return Err(SpawnError { error, backend }),
        };
        if let Err(mpsc::SendError(backend)) = handoff.send(backend) {
            let _ = thread.join();
            return Err(SpawnError {
                error: std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "worker thread exited before taking the backend",
                ),
                backend,
            });
        }

        Ok(Self {
            tx,
            progress,
            thread: Some(thread),
        })
    }

    /// Queue a validated request. Never blocks on device I/O.
    pub(crate) fn submit(&self, request: WriteRequest) -> Result<PendingWrite, OutputError> {
        let submitted_at = self.progress.time_source().now();

        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Write {
                request,
                submitted_at,
                reply,
            })
            .map_err(|_| worker_lost())?;
        self.progress.record_submitted(submitted_at);

        Ok(PendingWrite { rx })
    }

    /// Flush behind any queued writes and wait for it.
    pub(crate) fn flush(&self) -> Result<(), OutputError> {
        let (reply, done) = mpsc::sync_channel(1);
        self.tx
            .send(Command::Flush { reply })
            .map_err(|_| worker_lost())?;
        done.recv().map_err(|_| worker_lost())
    }

    /// Tear the backend down on the worker and join the thread.
    pub(crate) fn shutdown(mut self) -> Result<(), OutputError> {
        let (reply, done) = mpsc::sync_channel(1);
        let result = match self.tx.send(Command::Close { reply }) {
            Ok(()) => done.recv().unwrap_or_else(|_| Err(worker_lost())),
            Err(_) => Err(worker_lost()),
        };

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[WriteWorker] Worker thread panicked");
            }
        }

        result
    }
}

fn run(
    device_id: u64,
    mut backend: Box<dyn OutputBackend>,
    progress: Arc<ProgressTracker>,
    rx: mpsc::Receiver<Command>,
) {
    log::debug!("[WriteWorker] Device {} worker started", device_id);

    while let Ok(command) = rx.recv() {
        match command {
            Command::Write {
                request,
                submitted_at,
                reply,
            } => {
                let completion = execute(backend.as_mut(), &request, submitted_at, &progress);
                telemetry::hub().record_write(device_id, &completion);

                if reply.send(completion).is_err() {
                    log::trace!(
                        "[WriteWorker] Device {} completion dropped by caller",
                        device_id
                    );
                }
            }
            Command::Flush { reply } => {
                backend.flush();
                let _ = reply.send(());
            }
            Command::Close { reply } => {
                let result = teardown(backend.as_mut());
                drop(backend);
                let _ = reply.send(result);
                log::debug!("[WriteWorker] Device {} worker stopped", device_id);
                return;
            }
        }
    }

    // every handle went away without an explicit close
    log::warn!(
        "[WriteWorker] Device {} abandoned without close; tearing down",
        device_id
    );
    if let Err(err) = teardown(backend.as_mut()) {
        log::warn!("[WriteWorker] Implicit teardown failed: {}", err);
    }
}

fn execute(
    backend: &mut dyn OutputBackend,
    request: &WriteRequest,
    submitted_at: Instant,
    progress: &ProgressTracker,
) -> WriteCompletion {
    let started_at = progress.time_source().now();
    progress.record_started(started_at);

    let written = backend.write(&request.buffer);

    let completed_at = progress.time_source().now();
    progress.record_completed(written, completed_at);

    if written < 0 {
        log::debug!("[WriteWorker] Backend write returned error {}", written);
    } else if (written as usize) < request.len() {
        log::debug!(
            "[WriteWorker] Short write: {} of {} bytes",
            written,
            request.len()
        );
    } else {
        log::trace!("[WriteWorker] Wrote {} bytes", written);
    }

    WriteCompletion {
        written,
        requested: request.len(),
        submitted_at,
        started_at,
        completed_at,
    }
}
