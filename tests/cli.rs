use std::io::Write;
use std::process::{Command, Stdio};

use serde_json::Value;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_pcm-speaker"))
}

fn temp_path(name: &str) -> String {
    std::env::temp_dir()
        .join(format!("pcm-speaker-cli-{}-{}.wav", name, std::process::id()))
        .to_string_lossy()
        .into_owned()
}

#[test]
fn info_reports_json_payload() {
    let output = cli()
        .args(["info", "--json"])
        .output()
        .expect("failed to run pcm-speaker info");
    assert!(
        output.status.success(),
        "CLI exited with {:?}",
        output.status.code()
    );

    let stdout = String::from_utf8(output.stdout).expect("stdout UTF-8");
    let json: Value = serde_json::from_str(stdout.trim()).expect("info JSON payload");
    assert_eq!(json["name"], "dummy");
    assert_eq!(json["encodings"].as_array().map(Vec::len), Some(10));
    let s16 = json["encodings"]
        .as_array()
        .and_then(|rows| rows.iter().find(|row| row["name"] == "s16"))
        .expect("s16 row");
    assert_eq!(s16["code"], 0xd0);
    assert_eq!(s16["supported"], true);
}

#[test]
fn wav_backend_info_lists_formats() {
    let output = cli()
        .args(["--backend", "wav", "info"])
        .output()
        .expect("failed to run pcm-speaker info");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout UTF-8");
    assert!(stdout.contains("module:      wav"), "unexpected output: {stdout}");
    assert!(stdout.contains("MPG123_ENC_SIGNED_16"));
}

#[test]
fn sine_writes_wav_file() {
    let path = temp_path("sine");
    let output = cli()
        .args([
            "--backend",
            "wav",
            "--device",
            path.as_str(),
            "sine",
            "--freq",
            "880",
            "--duration",
            "0.25",
        ])
        .output()
        .expect("failed to run pcm-speaker sine");
    assert!(
        output.status.success(),
        "sine exited with {:?}: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout).expect("stdout UTF-8");
    // 0.25 s of 44.1 kHz stereo s16
    assert!(stdout.contains("bytes=44100"), "unexpected output: {stdout}");
    assert!(stdout.contains("presentation_ms=250"));

    let reader = hound::WavReader::open(&path).expect("sine output is a WAV file");
    assert_eq!(reader.spec().channels, 2);
    assert_eq!(reader.duration(), 11_025);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn wav_command_replays_file() {
    let source = temp_path("source");
    let copy = temp_path("copy");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&source, spec).unwrap();
    for n in 0..1_600i16 {
        writer.write_sample(n).unwrap();
    }
    writer.finalize().unwrap();

    let output = cli()
        .args(["--backend", "wav", "--device", copy.as_str(), "wav", source.as_str()])
        .output()
        .expect("failed to run pcm-speaker wav");
    assert!(
        output.status.success(),
        "wav exited with {:?}: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).expect("stdout UTF-8");
    assert!(stdout.contains("presentation_ms=100"), "unexpected output: {stdout}");

    let mut reader = hound::WavReader::open(&copy).expect("copy is a WAV file");
    assert_eq!(reader.spec(), spec);
    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(samples.len(), 1_600);
    assert_eq!(samples[1_599], 1_599);

    let _ = std::fs::remove_file(&source);
    let _ = std::fs::remove_file(&copy);
}

#[test]
fn stdin_streams_raw_pcm() {
    let mut child = cli()
        .args([
            "stdin",
            "--channels",
            "1",
            "--sample-rate",
            "8000",
            "--encoding",
            "u8",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn pcm-speaker stdin");

    {
        let mut stdin = child.stdin.take().expect("stdin piped");
        stdin.write_all(&[128u8; 800]).expect("write stdin");
    }

    let output = child.wait_with_output().expect("wait for pcm-speaker");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("stdout UTF-8");
    assert!(stdout.contains("bytes=800"), "unexpected output: {stdout}");
    assert!(stdout.contains("presentation_ms=100"));
}

#[test]
fn unknown_backend_is_rejected() {
    let output = cli()
        .args(["--backend", "alsa", "info"])
        .output()
        .expect("failed to run pcm-speaker");
    assert!(!output.status.success());
}
