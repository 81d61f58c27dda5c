//! WAV file output backend.
//!
//! Writes the PCM stream into a RIFF/WAVE file with `hound`. The device
//! selector is the output path.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use crate::engine::encoding::{Encoding, EncodingSet};

use super::{BackendError, ModuleInfo, OutputBackend, OutputModule, OutputParams};

const DEFAULT_PATH: &str = "out.wav";

const ERR_PARAMS: i32 = -1;
const ERR_FORMAT: i32 = -2;
const ERR_IO: i32 = -3;

/// Encodings that map onto a WAVE format tag hound can write.
fn supported() -> EncodingSet {
    EncodingSet::from_encodings([
        Encoding::Signed8,
        Encoding::Signed16,
        Encoding::Signed24,
        Encoding::Signed32,
        Encoding::Float32,
    ])
}

/// Module producing [`WavBackend`] instances.
#[derive(Debug, Clone, Default)]
pub struct WavModule {
    default_path: Option<PathBuf>,
}

impl WavModule {
    /// Module writing to `path` whenever no device selector is given.
    pub fn with_default_path(path: impl Into<PathBuf>) -> Self {
        Self {
            default_path: Some(path.into()),
        }
    }
}

impl OutputModule for WavModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            api_version: 2,
            name: "wav".to_string(),
            description: "RIFF/WAVE file writer".to_string(),
            revision: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn create(&self) -> Box<dyn OutputBackend> {
        Box::new(WavBackend {
            default_path: self
                .default_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PATH)),
            params: None,
            writer: None,
        })
    }

    fn formats(&self) -> Result<EncodingSet, BackendError> {
        Ok(supported())
    }
}

/// One WAV file being written.
pub struct WavBackend {
    default_path: PathBuf,
    params: Option<OutputParams>,
    writer: Option<hound::WavWriter<BufWriter<File>>>,
}

impl WavBackend {
    fn spec(params: &OutputParams) -> Result<hound::WavSpec, BackendError> {
        if !supported().contains(params.encoding) {
            return Err(BackendError::new(
                ERR_FORMAT,
                format!("WAV output cannot store {} samples", params.encoding),
            ));
        }
        let channels = u16::try_from(params.channels)
            .map_err(|_| BackendError::new(ERR_PARAMS, "too many channels"))?;
        let sample_format = if params.encoding.is_float() {
            hound::SampleFormat::Float
        } else {
            hound::SampleFormat::Int
        };

        Ok(hound::WavSpec {
            channels,
            sample_rate: params.sample_rate,
            bits_per_sample: params.encoding.bits() as u16,
            sample_format,
        })
    }

    fn write_samples(
        writer: &mut hound::WavWriter<BufWriter<File>>,
        encoding: Encoding,
        bytes: &[u8],
    ) -> hound::Result<()> {
        match encoding {
            Encoding::Signed8 => {
                for &b in bytes {
                    writer.write_sample(b as i8)?;
                }
            }
            Encoding::Signed16 => {
                for s in bytes.chunks_exact(2) {
                    writer.write_sample(i16::from_le_bytes([s[0], s[1]]))?;
                }
            }
            Encoding::Signed24 => {
                for s in bytes.chunks_exact(3) {
                    // sign-extend from the top byte
                    let value = i32::from_le_bytes([0, s[0], s[1], s[2]]) >> 8;
                    writer.write_sample(value)?;
                }
            }
            Encoding::Signed32 => {
                for s in bytes.chunks_exact(4) {
                    writer.write_sample(i32::from_le_bytes([s[0], s[1], s[2], s[3]]))?;
                }
            }
            Encoding::Float32 => {
                for s in bytes.chunks_exact(4) {
                    writer.write_sample(f32::from_le_bytes([s[0], s[1], s[2], s[3]]))?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl OutputBackend for WavBackend {
    fn init_output(&mut self, params: &OutputParams) -> Result<(), BackendError> {
        Self::spec(params)?;
        self.params = Some(params.clone());
        Ok(())
    }

    fn open(&mut self) -> Result<(), BackendError> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| BackendError::new(ERR_PARAMS, "open() before init_output()"))?;
        let spec = Self::spec(params)?;
        let path = params
            .device
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.default_path.clone());

        let writer = hound::WavWriter::create(&path, spec)
            .map_err(|err| BackendError::new(ERR_IO, format!("{}: {}", path.display(), err)))?;
        log::info!("[WavBackend] Writing {:?} to {}", spec, path.display());
        self.writer = Some(writer);
        Ok(())
    }

    fn write(&mut self, buffer: &[u8]) -> isize {
        let (Some(writer), Some(params)) = (self.writer.as_mut(), self.params.as_ref()) else {
            return -1;
        };

        // only whole samples are accepted; a trailing fragment is left to the caller
        let width = params.encoding.bytes_per_sample();
        let usable = buffer.len() - buffer.len() % width;

        match Self::write_samples(writer, params.encoding, &buffer[..usable]) {
            Ok(()) => usable as isize,
            Err(err) => {
                log::error!("[WavBackend] Write failed: {}", err);
                ERR_IO as isize
            }
        }
    }

    fn flush(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.flush() {
                log::warn!("[WavBackend] Flush failed: {}", err);
            }
        }
    }

    fn close(&mut self) -> Result<(), BackendError> {
        match self.writer.take() {
            Some(writer) => writer
                .finalize()
                .map_err(|err| BackendError::new(ERR_IO, err.to_string())),
            None => Ok(()),
        }
    }

    fn formats(&self) -> EncodingSet {
        supported()
    }
}
