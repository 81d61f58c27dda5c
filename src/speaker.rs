//! Speaker: a writable PCM sink on top of [`OutputDevice`].
//!
//! Resolves a (bit depth, signedness, float) description to an encoding,
//! opens the device on the first write, splits large chunks into
//! frame-sized backend writes and drains the device when the stream ends.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::engine::backend::OutputModule;
use crate::engine::core::{OpenRequest, OutputDevice};
use crate::engine::encoding::Encoding;
use crate::engine::progress::ProgressSnapshot;
use crate::error::{log_output_error, OutputError};

const EVENT_CAPACITY: usize = 16;

/// Stream format and chunking options.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerOptions {
    pub channels: u32,
    pub bit_depth: u32,
    pub sample_rate: u32,
    /// Defaults to `bit_depth != 8` when unset.
    pub signed: Option<bool>,
    pub float: bool,
    pub samples_per_frame: usize,
    /// Time allowed for buffered audio to play out before closing.
    pub drain_delay: Duration,
    pub device: Option<String>,
}

impl Default for SpeakerOptions {
    fn default() -> Self {
        Self {
            channels: 2,
            bit_depth: 16,
            sample_rate: 44_100,
            signed: None,
            float: false,
            samples_per_frame: 1024,
            drain_delay: Duration::from_millis(600),
            device: None,
        }
    }
}

impl SpeakerOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        let encoding = config.output.encoding;
        Self {
            channels: config.output.channels,
            bit_depth: encoding.bits(),
            sample_rate: config.output.sample_rate,
            signed: Some(encoding.is_signed()),
            float: encoding.is_float(),
            samples_per_frame: config.speaker.samples_per_frame,
            drain_delay: Duration::from_millis(config.speaker.drain_delay_ms),
            device: config.output.device.clone(),
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.bit_depth = encoding.bits();
        self.signed = Some(encoding.is_signed());
        self.float = encoding.is_float();
        self
    }

    /// Encoding described by these options.
    pub fn encoding(&self) -> Result<Encoding, OutputError> {
        let signed = self.signed.unwrap_or(self.bit_depth != 8);
        Encoding::from_format(self.bit_depth, signed, self.float).ok_or_else(|| {
            OutputError::UnsupportedFormat {
                reason: format!(
                    "no encoding for {}-bit {} {}",
                    self.bit_depth,
                    if signed { "signed" } else { "unsigned" },
                    if self.float { "float" } else { "integer" }
                ),
            }
        })
    }

    /// Bytes per interleaved frame.
    pub fn block_align(&self) -> usize {
        (self.bit_depth / 8) as usize * self.channels as usize
    }
}

/// Lifecycle notifications from a [`Speaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakerEvent {
    Open,
    Flush,
    Close,
}

/// Whether `module` can play `encoding`.
pub fn is_supported(module: &dyn OutputModule, encoding: Encoding) -> bool {
    match module.formats() {
        Ok(formats) => formats.contains(encoding),
        Err(err) => {
            log::warn!("[Speaker] Format query failed: {}", err);
            false
        }
    }
}

pub struct Speaker {
    module: Arc<dyn OutputModule>,
    options: SpeakerOptions,
    encoding: Encoding,
    device: Option<OutputDevice>,
    closed: bool,
    events: broadcast::Sender<SpeakerEvent>,
}

impl Speaker {
    pub fn new(module: Arc<dyn OutputModule>, options: SpeakerOptions) -> Result<Self, OutputError> {
        let encoding = options.encoding()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            module,
            options,
            encoding,
            device: None,
            closed: false,
            events,
        })
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn options(&self) -> &SpeakerOptions {
        &self.options
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeakerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SpeakerEvent) {
        let _ = self.events.send(event);
    }

    fn device(&mut self) -> Result<&OutputDevice, OutputError> {
        if self.closed {
            return Err(OutputError::InvalidState {
                operation: "write",
                state: "closed",
            });
        }

        if self.device.is_none() {
            let mut request =
                OpenRequest::new(self.options.channels, self.options.sample_rate, self.encoding);
            request.device = self.options.device.clone();
            let device = OutputDevice::open(self.module.as_ref(), request)?;
            log::debug!(
                "[Speaker] Opened {} ch {} Hz {}",
                self.options.channels,
                self.options.sample_rate,
                self.encoding
            );
            self.device = Some(device);
            self.emit(SpeakerEvent::Open);
        }

        self.device.as_ref().ok_or_else(|| OutputError::InvalidState {
            operation: "write",
            state: "created",
        })
    }

    /// Write a chunk of interleaved PCM, in frame-sized pieces.
    ///
    /// Every piece must be accepted in full; a short or failed backend write
    /// ends the call with [`OutputError::ShortWrite`].
    pub async fn write(&mut self, chunk: &[u8]) -> Result<usize, OutputError> {
        let piece_len = (self.options.samples_per_frame * self.options.block_align()).max(1);
        let device = self.device()?;

        for piece in chunk.chunks(piece_len) {
            log::trace!("[Speaker] Writing {} byte piece", piece.len());
            let written = device.write(piece).await?;
            if written != piece.len() as isize {
                let err = OutputError::ShortWrite {
                    expected: piece.len(),
                    written,
                };
                log_output_error(&err, "speaker write");
                return Err(err);
            }
        }

        Ok(chunk.len())
    }

    /// Flush, wait for buffered audio to play out, then close.
    ///
    /// The blocking flush runs on tokio's blocking pool, so other tasks keep
    /// running while the backend drains.
    pub async fn end(&mut self) -> Result<(), OutputError> {
        if self.closed {
            return Ok(());
        }

        if let Some(device) = self.device.take() {
            self.emit(SpeakerEvent::Flush);
            // flush blocks until the backend drains; keep it off the async workers
            let (device, flushed) = tokio::task::spawn_blocking(move || {
                let flushed = device.flush();
                (device, flushed)
            })
            .await
            .map_err(|err| OutputError::WorkerLost {
                reason: format!("flush task failed: {}", err),
            })?;
            self.device = Some(device);
            flushed?;
            // backends keep roughly half a second queued after flush returns
            tokio::time::sleep(self.options.drain_delay).await;
        }

        self.close()
    }

    /// Close the device immediately. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<(), OutputError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = match self.device.as_mut() {
            Some(device) => device.close(),
            None => Ok(()),
        };
        self.emit(SpeakerEvent::Close);
        result
    }

    /// Progress of the underlying device; `None` until the first write.
    pub fn progress(&self) -> Option<ProgressSnapshot> {
        self.device.as_ref().map(OutputDevice::progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::{BackendCall, NullModule, NullScript};

    fn quick() -> SpeakerOptions {
        SpeakerOptions {
            drain_delay: Duration::from_millis(1),
            ..SpeakerOptions::default()
        }
    }

    #[test]
    fn default_options_resolve_to_signed16() {
        assert_eq!(SpeakerOptions::default().encoding().unwrap(), Encoding::Signed16);
        assert_eq!(SpeakerOptions::default().block_align(), 4);
    }

    #[test]
    fn eight_bit_defaults_to_unsigned() {
        let options = SpeakerOptions {
            bit_depth: 8,
            ..SpeakerOptions::default()
        };
        assert_eq!(options.encoding().unwrap(), Encoding::Unsigned8);
    }

    #[test]
    fn unknown_format_is_unsupported() {
        let options = SpeakerOptions {
            bit_depth: 12,
            ..SpeakerOptions::default()
        };
        let err = Speaker::new(Arc::new(NullModule::new()), options).err().unwrap();
        assert!(matches!(err, OutputError::UnsupportedFormat { .. }));
    }

    #[tokio::test]
    async fn write_splits_into_frame_pieces() {
        let module = Arc::new(NullModule::new());
        let options = SpeakerOptions {
            samples_per_frame: 4,
            ..quick()
        };
        let mut speaker = Speaker::new(module.clone(), options).unwrap();

        // 4 frames * 4 bytes per piece
        assert_eq!(speaker.write(&[0u8; 40]).await.unwrap(), 40);

        let writes: Vec<_> = module
            .calls()
            .into_iter()
            .filter(|call| matches!(call, BackendCall::Write(_)))
            .collect();
        assert_eq!(
            writes,
            vec![
                BackendCall::Write(16),
                BackendCall::Write(16),
                BackendCall::Write(8)
            ]
        );
        assert_eq!(speaker.progress().unwrap().bytes_written_total, 40);
    }

    #[tokio::test]
    async fn short_piece_is_an_error() {
        let module = Arc::new(NullModule::with_script(NullScript {
            write_limit: Some(3),
            ..NullScript::default()
        }));
        let mut speaker = Speaker::new(module, quick()).unwrap();

        let err = speaker.write(&[0u8; 8]).await.unwrap_err();
        assert_eq!(
            err,
            OutputError::ShortWrite {
                expected: 8,
                written: 3
            }
        );
    }

    #[tokio::test]
    async fn end_emits_flush_then_close() {
        let module = Arc::new(NullModule::new());
        let mut speaker = Speaker::new(module.clone(), quick()).unwrap();
        let mut events = speaker.subscribe();

        speaker.write(&[0u8; 16]).await.unwrap();
        speaker.end().await.unwrap();

        assert_eq!(events.recv().await.unwrap(), SpeakerEvent::Open);
        assert_eq!(events.recv().await.unwrap(), SpeakerEvent::Flush);
        assert_eq!(events.recv().await.unwrap(), SpeakerEvent::Close);
        assert!(speaker.is_closed());
        assert_eq!(module.live_instances(), 0);
    }

    #[tokio::test]
    async fn end_does_not_stall_other_tasks() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let module = Arc::new(NullModule::with_script(NullScript {
            flush_delay: Duration::from_millis(100),
            has_deinit: true,
            ..NullScript::default()
        }));
        let mut speaker = Speaker::new(module.clone(), quick()).unwrap();
        speaker.write(&[0u8; 16]).await.unwrap();

        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker_ticks = Arc::clone(&ticks);
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                ticker_ticks.fetch_add(1, Ordering::Relaxed);
            }
        });

        // single-threaded runtime: the ticker only runs if end() yields
        speaker.end().await.unwrap();
        ticker.abort();

        assert!(ticks.load(Ordering::Relaxed) >= 5);
        assert_eq!(module.live_instances(), 0);
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let module = Arc::new(NullModule::new());
        let mut speaker = Speaker::new(module.clone(), quick()).unwrap();
        speaker.close().unwrap();
        speaker.close().unwrap();

        let err = speaker.write(&[0u8; 4]).await.unwrap_err();
        assert!(matches!(err, OutputError::InvalidState { .. }));
        assert!(module.calls().is_empty());
    }

    #[test]
    fn capability_query() {
        let module = NullModule::with_script(NullScript {
            formats: Some(crate::engine::encoding::EncodingSet::from_encodings([
                Encoding::Float32,
            ])),
            ..NullScript::default()
        });
        assert!(is_supported(&module, Encoding::Float32));
        assert!(!is_supported(&module, Encoding::Signed16));
    }
}
