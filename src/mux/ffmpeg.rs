use crate::audio::extract::{extract_audio, last_lines, probe_video};
use crate::audio::{AudioMetadata, VideoAsset};
use crate::error::{AutodubError, Result};
use crate::mux::{ContainerMuxer, MuxRequest};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// [`ContainerMuxer`] backed by the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegContainer {
    video_codec: String,
    audio_codec: String,
    preset: String,
}

impl Default for FfmpegContainer {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            audio_codec: "aac".to_string(),
            preset: "veryfast".to_string(),
        }
    }
}

impl FfmpegContainer {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_args(&self, request: &MuxRequest, video: &Path, audio: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-i".to_string(),
            video.display().to_string(),
            "-i".to_string(),
            audio.display().to_string(),
            "-vf".to_string(),
            video_filter(request),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-c:v".to_string(),
            self.video_codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            "192k".to_string(),
            request.output.display().to_string(),
        ]
    }
}

/// Freeze-frame padding (if any) followed by burned-in captions.
///
/// The subtitle file is referenced by name only; ffmpeg runs in its directory
/// so the filter never has to escape an arbitrary path.
fn video_filter(request: &MuxRequest) -> String {
    let subtitles = request
        .subtitles
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let subtitles = escape_filter_value(&subtitles);

    match request.freeze_extension {
        Some(extra) => format!(
            "tpad=stop_mode=clone:stop_duration={:.3},subtitles={}",
            extra.as_secs_f64(),
            subtitles
        ),
        None => format!("subtitles={}", subtitles),
    }
}

/// `atempo` filter chain for `rate`; a single stage only accepts up to 2.0.
fn atempo_chain(rate: f64) -> String {
    let mut remaining = rate;
    let mut stages = Vec::new();
    while remaining > 2.0 {
        stages.push("atempo=2.0".to_string());
        remaining /= 2.0;
    }
    stages.push(format!("atempo={:.6}", remaining));
    stages.join(",")
}

fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ':' | '\'' | ',' | ';' | '[' | ']') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

async fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(tokio::fs::canonicalize(path).await?)
}

#[async_trait]
impl ContainerMuxer for FfmpegContainer {
    async fn probe(&self, path: &Path) -> Result<VideoAsset> {
        probe_video(path).await
    }

    async fn demux_audio(&self, video: &Path, output: &Path) -> Result<AudioMetadata> {
        extract_audio(video, output).await
    }

    async fn mux(&self, request: &MuxRequest) -> Result<()> {
        let video = absolute(&request.video).await?;
        let audio = absolute(&request.audio).await?;
        let work_dir = request
            .subtitles
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| AutodubError::Mux("Subtitle path has no directory".to_string()))?;

        let mut request = request.clone();
        if request.output.is_relative() {
            request.output = std::env::current_dir()?.join(&request.output);
        }

        let args = self.build_args(&request, &video, &audio);
        debug!("Running ffmpeg {:?} in {}", args, work_dir.display());
        info!("Muxing {}", request.output.display());

        let result = Command::new("ffmpeg")
            .args(&args)
            .current_dir(&work_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AutodubError::Mux(format!("Failed to run FFmpeg: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(AutodubError::Mux(format!(
                "FFmpeg mux failed: {}",
                last_lines(&stderr, 5)
            )));
        }

        Ok(())
    }

    async fn change_tempo(&self, input: &Path, output: &Path, rate: f64) -> Result<()> {
        let filter = atempo_chain(rate);
        debug!("Running ffmpeg {} on {}", filter, input.display());

        let result = Command::new("ffmpeg")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-filter:a", filter.as_str(), "-c:a", "pcm_s16le"])
            .arg(output)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AutodubError::Audio(format!("Failed to run FFmpeg: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(AutodubError::Audio(format!(
                "FFmpeg tempo change failed: {}",
                last_lines(&stderr, 5)
            )));
        }

        Ok(())
    }
}
