use std::f64::consts::PI;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pcm_speaker::engine::backend::{create_module, BackendKind, OutputModule};
use pcm_speaker::engine::encoding::Encoding;
use pcm_speaker::speaker::{is_supported, Speaker, SpeakerOptions};
use pcm_speaker::telemetry;
use pcm_speaker::{init_logging, AppConfig};
use serde::Serialize;

/// Samples generated per sine write.
const SINE_FRAMES_PER_WRITE: usize = 4096;
const STDIN_READ_SIZE: usize = 64 * 1024;

#[derive(Parser, Debug)]
#[command(name = "pcm-speaker", about = "Play raw PCM through a pluggable output backend")]
struct Cli {
    /// Output backend (null, wav, cpal); overrides the config file
    #[arg(long, global = true)]
    backend: Option<BackendKind>,
    /// Backend-specific device selector (cpal device name or WAV path)
    #[arg(long, global = true)]
    device: Option<String>,
    /// JSON config file (defaults to ./pcm_speaker.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show backend metadata and supported encodings
    Info {
        #[arg(long)]
        json: bool,
    },
    /// Play a 16-bit stereo sine tone
    Sine {
        #[arg(long, default_value_t = 440.0)]
        freq: f64,
        /// Seconds of audio to generate
        #[arg(long, default_value_t = 2.0)]
        duration: f64,
    },
    /// Play a WAV file
    Wav { path: PathBuf },
    /// Stream raw interleaved PCM from stdin
    Stdin {
        #[arg(long)]
        channels: Option<u32>,
        #[arg(long)]
        sample_rate: Option<u32>,
        /// Encoding short name (s16, f32, u8, ...)
        #[arg(long)]
        encoding: Option<Encoding>,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::load(),
    };
    if let Some(backend) = cli.backend {
        config.output.backend = backend;
    }
    if cli.device.is_some() {
        config.output.device = cli.device.clone();
    }
    telemetry::init(&config.telemetry);

    let module = create_module(config.output.backend)
        .map_err(|err| anyhow::anyhow!("{}", err))
        .context("selecting output backend")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building async runtime")?;

    match cli.command {
        Commands::Info { json } => run_info(module.as_ref(), json),
        Commands::Sine { freq, duration } => {
            runtime.block_on(run_sine(module, &config, freq, duration))
        }
        Commands::Wav { path } => runtime.block_on(run_wav(module, &config, &path)),
        Commands::Stdin {
            channels,
            sample_rate,
            encoding,
        } => {
            if let Some(channels) = channels {
                config.output.channels = channels;
            }
            if let Some(sample_rate) = sample_rate {
                config.output.sample_rate = sample_rate;
            }
            if let Some(encoding) = encoding {
                config.output.encoding = encoding;
            }
            runtime.block_on(run_stdin(module, &config))
        }
    }
}

#[derive(Serialize)]
struct EncodingRow {
    name: &'static str,
    constant: &'static str,
    code: i32,
    supported: bool,
}

#[derive(Serialize)]
struct InfoPayload {
    api_version: i32,
    name: String,
    description: String,
    revision: String,
    formats: u32,
    encodings: Vec<EncodingRow>,
}

fn run_info(module: &dyn OutputModule, json: bool) -> Result<ExitCode> {
    let info = module.info();
    let formats = module
        .formats()
        .map_err(|err| anyhow::anyhow!("{}", err))
        .context("querying supported formats")?;

    let payload = InfoPayload {
        api_version: info.api_version,
        name: info.name,
        description: info.description,
        revision: info.revision,
        formats: formats.bits(),
        encodings: Encoding::ALL
            .into_iter()
            .map(|encoding| EncodingRow {
                name: encoding.short_name(),
                constant: encoding.constant_name(),
                code: encoding.code(),
                supported: formats.contains(encoding),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(ExitCode::from(0));
    }

    println!("module:      {} (api {})", payload.name, payload.api_version);
    println!("description: {}", payload.description);
    println!("revision:    {}", payload.revision);
    println!("formats:     0x{:x}", payload.formats);
    for row in &payload.encodings {
        println!(
            "  {:<4} {:<24} 0x{:04x} {}",
            row.name,
            row.constant,
            row.code,
            if row.supported { "yes" } else { "no" }
        );
    }
    Ok(ExitCode::from(0))
}

async fn run_sine(
    module: Arc<dyn OutputModule>,
    config: &AppConfig,
    freq: f64,
    duration: f64,
) -> Result<ExitCode> {
    if duration.is_nan() || freq.is_nan() || duration <= 0.0 || freq <= 0.0 {
        bail!("frequency and duration must be positive");
    }

    let options = SpeakerOptions {
        channels: 2,
        sample_rate: 44_100,
        ..SpeakerOptions::from_config(config)
    }
    .with_encoding(Encoding::Signed16);
    println!("generating a {}hz sine wave for {} seconds", freq, duration);

    let mut speaker = Speaker::new(module, options).context("creating speaker")?;
    let total_frames = (44_100.0 * duration) as usize;
    let step = 2.0 * PI * freq / 44_100.0;

    let mut frame = 0;
    while frame < total_frames {
        let count = SINE_FRAMES_PER_WRITE.min(total_frames - frame);
        let mut buffer = Vec::with_capacity(count * 4);
        for n in frame..frame + count {
            let value = (32_760.0 * (step * n as f64).sin()).round() as i16;
            let bytes = value.to_le_bytes();
            // both channels
            buffer.extend_from_slice(&bytes);
            buffer.extend_from_slice(&bytes);
        }
        speaker.write(&buffer).await?;
        frame += count;
    }

    finish(speaker).await
}

async fn run_wav(module: Arc<dyn OutputModule>, config: &AppConfig, path: &Path) -> Result<ExitCode> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let encoding = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, 32) => Encoding::Float32,
        (hound::SampleFormat::Int, 8) => Encoding::Signed8,
        (hound::SampleFormat::Int, 16) => Encoding::Signed16,
        (hound::SampleFormat::Int, 24) => Encoding::Signed24,
        (hound::SampleFormat::Int, 32) => Encoding::Signed32,
        (format, bits) => bail!("unsupported WAV format: {:?} {}-bit", format, bits),
    };

    if !is_supported(module.as_ref(), encoding) {
        log::warn!(
            "[pcm-speaker] Backend does not report {} support; trying anyway",
            encoding
        );
    }

    let options = SpeakerOptions {
        channels: u32::from(spec.channels),
        sample_rate: spec.sample_rate,
        ..SpeakerOptions::from_config(config)
    }
    .with_encoding(encoding);

    println!("Started playing {}", path.display());
    let mut speaker = Speaker::new(module, options).context("creating speaker")?;

    let width = encoding.bytes_per_sample();
    let mut buffer = Vec::with_capacity(STDIN_READ_SIZE);
    if encoding.is_float() {
        for sample in reader.samples::<f32>() {
            buffer.extend_from_slice(&sample?.to_le_bytes());
            if buffer.len() >= STDIN_READ_SIZE {
                speaker.write(&buffer).await?;
                buffer.clear();
            }
        }
    } else {
        for sample in reader.samples::<i32>() {
            buffer.extend_from_slice(&sample?.to_le_bytes()[..width]);
            if buffer.len() >= STDIN_READ_SIZE {
                speaker.write(&buffer).await?;
                buffer.clear();
            }
        }
    }
    if !buffer.is_empty() {
        speaker.write(&buffer).await?;
    }

    let code = finish(speaker).await?;
    println!("Done {}", path.display());
    Ok(code)
}

async fn run_stdin(module: Arc<dyn OutputModule>, config: &AppConfig) -> Result<ExitCode> {
    let options = SpeakerOptions::from_config(config);
    let block_align = options.block_align().max(1);
    let mut speaker = Speaker::new(module, options).context("creating speaker")?;

    let mut stdin = std::io::stdin().lock();
    let mut chunk = vec![0u8; STDIN_READ_SIZE];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let read = stdin.read(&mut chunk).context("reading stdin")?;
        if read == 0 {
            break;
        }
        pending.extend_from_slice(&chunk[..read]);

        // only whole frames go to the device
        let whole = pending.len() - pending.len() % block_align;
        if whole > 0 {
            speaker.write(&pending[..whole]).await?;
            pending.drain(..whole);
        }
    }
    if !pending.is_empty() {
        log::warn!(
            "[pcm-speaker] Dropping {} trailing bytes (incomplete frame)",
            pending.len()
        );
    }

    finish(speaker).await
}

async fn finish(mut speaker: Speaker) -> Result<ExitCode> {
    let progress = speaker.progress();
    speaker.end().await.context("closing output")?;

    match progress {
        Some(progress) => println!(
            "writes={} bytes={} presentation_ms={}",
            progress.writes_issued, progress.bytes_written_total, progress.presentation_timestamp_ms
        ),
        None => println!("writes=0 bytes=0 presentation_ms=0"),
    }
    Ok(ExitCode::from(0))
}
