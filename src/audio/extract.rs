use std::path::Path;
use std::process::Command as StdCommand;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{AutodubError, Result};

use super::{AudioMetadata, VideoAsset};

/// Sample rate of extracted source audio; what speech recognizers expect.
pub const EXTRACT_SAMPLE_RATE: u32 = 16_000;

/// Check if FFmpeg is installed and accessible.
pub fn check_ffmpeg() -> Result<()> {
    check_binary("ffmpeg")
}

/// Check if FFprobe is installed and accessible.
pub fn check_ffprobe() -> Result<()> {
    check_binary("ffprobe")
}

fn check_binary(name: &str) -> Result<()> {
    let output = StdCommand::new(name)
        .arg("-version")
        .output()
        .map_err(|e| {
            AutodubError::Media(format!(
                "{name} not found. Please install FFmpeg and ensure it's in your PATH. Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(AutodubError::Media(format!("{name} check failed")));
    }

    debug!("{} is available", name);
    Ok(())
}

async fn run_ffprobe(args: &[&str], input: &Path) -> Result<String> {
    let output = Command::new("ffprobe")
        .args(args)
        .arg(input)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| AutodubError::Media(format!("Failed to run FFprobe: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AutodubError::Media(format!("FFprobe failed: {}", stderr.trim())));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Get container duration using FFprobe.
pub async fn get_duration(input: &Path) -> Result<Duration> {
    let duration_str = run_ffprobe(
        &[
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ],
        input,
    )
    .await?;

    let duration_secs: f64 = duration_str.parse().map_err(|e| {
        AutodubError::Media(format!("Failed to parse duration '{}': {e}", duration_str))
    })?;

    if !duration_secs.is_finite() || duration_secs < 0.0 {
        return Err(AutodubError::Media(format!(
            "Invalid duration reported: {duration_secs}"
        )));
    }

    Ok(Duration::from_secs_f64(duration_secs))
}

/// Whether the container carries at least one audio stream.
pub async fn has_audio_stream(input: &Path) -> Result<bool> {
    let streams = run_ffprobe(
        &[
            "-v",
            "error",
            "-select_streams",
            "a",
            "-show_entries",
            "stream=index",
            "-of",
            "csv=p=0",
        ],
        input,
    )
    .await?;

    Ok(!streams.is_empty())
}

/// Probe a video file into a [`VideoAsset`].
pub async fn probe_video(input: &Path) -> Result<VideoAsset> {
    if !input.exists() {
        return Err(AutodubError::Media(format!(
            "Input file not found: {}",
            input.display()
        )));
    }

    let duration = get_duration(input).await?;
    let has_audio = has_audio_stream(input).await?;
    debug!(
        "Probed {}: {:.2}s, audio track: {}",
        input.display(),
        duration.as_secs_f64(),
        has_audio
    );

    Ok(VideoAsset {
        path: input.to_path_buf(),
        duration,
        has_audio,
    })
}

/// Extract the audio track of a video and convert to WAV.
///
/// The output is mono 16-bit PCM at 16kHz, which is optimal for speech recognition.
pub async fn extract_audio(input: &Path, output: &Path) -> Result<AudioMetadata> {
    info!("Extracting audio from {}", input.display());

    let result = Command::new("ffmpeg")
        .args(["-y", "-i"])
        .arg(input)
        .args(["-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1"])
        .arg(output)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| AutodubError::Media(format!("Failed to run FFmpeg: {e}")))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(AutodubError::Media(format!(
            "FFmpeg audio extraction failed: {}",
            last_lines(&stderr, 5)
        )));
    }

    if !output.exists() {
        return Err(AutodubError::Media(
            "Output file was not created".to_string(),
        ));
    }

    let duration = get_duration(output).await?;
    info!(
        "Audio extracted to {} ({:.1}s)",
        output.display(),
        duration.as_secs_f64()
    );

    Ok(AudioMetadata {
        duration,
        sample_rate: EXTRACT_SAMPLE_RATE,
        channels: 1,
    })
}

/// Keep the tail of FFmpeg's stderr; the banner above it is noise.
pub(crate) fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
