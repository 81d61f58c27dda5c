//! CPAL-based output backend for desktop platforms (Linux, macOS, Windows).
//!
//! `write` pushes interleaved bytes into an rtrb ring; the cpal callback
//! decodes them to f32 on the audio thread. The stream lives on its own
//! thread because `cpal::Stream` is not `Send` on every host.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ::cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::engine::encoding::{Encoding, EncodingSet};

use super::{BackendError, ModuleInfo, OutputBackend, OutputModule, OutputParams};

/// Ring size in milliseconds of audio.
const RING_MS: u64 = 250;
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(2);

fn supported() -> EncodingSet {
    EncodingSet::from_encodings([Encoding::Signed16, Encoding::Float32])
}

/// Module for the system's default cpal host.
#[derive(Debug, Default)]
pub struct CpalModule;

impl OutputModule for CpalModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            api_version: 2,
            name: "cpal".to_string(),
            description: format!("cpal output ({:?} host)", ::cpal::default_host().id()),
            revision: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn create(&self) -> Box<dyn OutputBackend> {
        Box::new(CpalBackend::default())
    }

    fn formats(&self) -> Result<EncodingSet, BackendError> {
        Ok(supported())
    }
}

/// One cpal output stream.
#[derive(Default)]
pub struct CpalBackend {
    params: Option<OutputParams>,
    producer: Option<rtrb::Producer<u8>>,
    stop: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    stream_thread: Option<JoinHandle<()>>,
}

impl CpalBackend {
    fn stream_alive(&self) -> bool {
        !self.failed.load(Ordering::Relaxed)
            && self
                .stream_thread
                .as_ref()
                .is_some_and(|thread| !thread.is_finished())
    }
}

impl OutputBackend for CpalBackend {
    fn init_output(&mut self, params: &OutputParams) -> Result<(), BackendError> {
        if !supported().contains(params.encoding) {
            return Err(BackendError::new(
                -1,
                format!("cpal backend cannot play {}", params.encoding),
            ));
        }
        self.params = Some(params.clone());
        Ok(())
    }

    fn open(&mut self) -> Result<(), BackendError> {
        let params = self
            .params
            .clone()
            .ok_or_else(|| BackendError::new(-1, "open() before init_output()"))?;

        let capacity = (params.bytes_per_second() * RING_MS / 1000).max(4096) as usize;
        let (producer, consumer) = rtrb::RingBuffer::<u8>::new(capacity);

        self.stop.store(false, Ordering::Relaxed);
        self.failed.store(false, Ordering::Relaxed);
        let stop = Arc::clone(&self.stop);
        let failed = Arc::clone(&self.failed);
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let thread = std::thread::Builder::new()
            .name("pcm-cpal-stream".to_string())
            .spawn(move || run_stream(params, consumer, stop, failed, ready_tx))
            .map_err(|e| BackendError::new(-1, format!("failed to spawn stream thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.producer = Some(producer);
                self.stream_thread = Some(thread);
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(BackendError::new(-1, "stream thread exited during open"))
            }
        }
    }

    fn write(&mut self, buffer: &[u8]) -> isize {
        if !self.stream_alive() {
            return -1;
        }
        let Some(producer) = self.producer.as_mut() else {
            return -1;
        };

        let mut pushed = 0;
        while pushed < buffer.len() {
            let room = producer.slots();
            if room == 0 {
                if self.failed.load(Ordering::Relaxed) {
                    break;
                }
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
            let end = (pushed + room).min(buffer.len());
            for byte in &buffer[pushed..end] {
                if producer.push(*byte).is_err() {
                    break;
                }
                pushed += 1;
            }
        }

        if pushed == 0 {
            -2
        } else {
            pushed as isize
        }
    }

    fn flush(&mut self) {
        let Some(producer) = self.producer.as_ref() else {
            return;
        };
        let capacity = producer.buffer().capacity();
        let deadline = Instant::now() + FLUSH_TIMEOUT;
        while producer.slots() < capacity && Instant::now() < deadline {
            if self.failed.load(Ordering::Relaxed) {
                return;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        if producer.slots() < capacity {
            log::warn!("[CpalBackend] Flush timed out with audio still queued");
        }
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.stop.store(true, Ordering::Relaxed);
        self.producer = None;
        if let Some(thread) = self.stream_thread.take() {
            thread
                .join()
                .map_err(|_| BackendError::new(-1, "stream thread panicked"))?;
        }
        Ok(())
    }

    fn formats(&self) -> EncodingSet {
        supported()
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn select_device(host: &::cpal::Host, name: Option<&str>) -> Result<::cpal::Device, BackendError> {
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| BackendError::new(-1, "No default output device found")),
        Some(wanted) => host
            .output_devices()
            .map_err(|e| BackendError::new(-1, format!("Failed to enumerate devices: {}", e)))?
            .find(|device| device.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| BackendError::new(-1, format!("No output device named '{}'", wanted))),
    }
}

fn run_stream(
    params: OutputParams,
    mut consumer: rtrb::Consumer<u8>,
    stop: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    ready: mpsc::SyncSender<Result<(), BackendError>>,
) {
    let host = ::cpal::default_host();
    let device = match select_device(&host, params.device.as_deref()) {
        Ok(device) => device,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    let config = ::cpal::StreamConfig {
        channels: params.channels as u16,
        sample_rate: ::cpal::SampleRate(params.sample_rate),
        buffer_size: ::cpal::BufferSize::Default,
    };
    let encoding = params.encoding;
    let sample_bytes = encoding.bytes_per_sample();

    let error_flag = Arc::clone(&failed);
    let err_fn = move |err| {
        log::error!("[CpalBackend] Output stream error: {}", err);
        error_flag.store(true, Ordering::Relaxed);
    };

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &::cpal::OutputCallbackInfo| {
            let mut sample = [0u8; 4];
            for slot in data.iter_mut() {
                if consumer.slots() < sample_bytes {
                    // underrun
                    *slot = 0.0;
                    continue;
                }
                for byte in sample.iter_mut().take(sample_bytes) {
                    *byte = consumer.pop().unwrap_or(0);
                }
                *slot = decode(encoding, &sample);
            }
        },
        err_fn,
        None,
    );

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(BackendError::new(
                -1,
                format!("Failed to build output stream: {}", e),
            )));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(BackendError::new(-1, format!("Output start failed: {}", e))));
        return;
    }
    let _ = ready.send(Ok(()));

    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(10));
    }
    drop(stream);
    log::debug!("[CpalBackend] Stream stopped");
}

fn decode(encoding: Encoding, bytes: &[u8; 4]) -> f32 {
    match encoding {
        Encoding::Float32 => f32::from_le_bytes(*bytes),
        _ => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0,
    }
}
