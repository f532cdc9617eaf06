pub mod ffmpeg;

pub use ffmpeg::FfmpegContainer;

use crate::align::AlignmentResult;
use crate::audio::{AudioMetadata, VideoAsset};
use crate::error::{AutodubError, Result, Stage};
use crate::subtitle::srt::write_srt;
use crate::subtitle::Transcript;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// Container demux/mux utility.
#[async_trait]
pub trait ContainerMuxer: Send + Sync {
    /// Read duration and audio-stream presence.
    async fn probe(&self, path: &Path) -> Result<VideoAsset>;

    /// Write the video's audio track to `output` as 16-bit PCM WAV.
    async fn demux_audio(&self, video: &Path, output: &Path) -> Result<AudioMetadata>;

    /// Replace the audio of `request.video`, burn in `request.subtitles`, and
    /// write `request.output`.
    async fn mux(&self, request: &MuxRequest) -> Result<()>;

    /// Write `input` played `rate` times faster to `output`, keeping pitch,
    /// sample rate and sample format.
    async fn change_tempo(&self, input: &Path, output: &Path, rate: f64) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxRequest {
    pub video: PathBuf,
    pub audio: PathBuf,
    pub subtitles: PathBuf,
    pub output: PathBuf,
    /// Hold the last frame this much longer so the video covers the audio.
    pub freeze_extension: Option<Duration>,
}

/// Files produced for one successfully translated language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifactSet {
    pub language: String,
    pub translated_video: PathBuf,
    pub translated_audio: PathBuf,
    /// Shared by every language of the run.
    pub original_srt: PathBuf,
    pub translated_srt: PathBuf,
}

/// Names of the files staged for one language.
const STAGED_SUBTITLES: &str = "captions.srt";
const STAGED_AUDIO: &str = "audio.wav";
const STAGED_VIDEO: &str = "video.mp4";

/// Produces the user-facing files of a run inside `output_dir`.
pub struct Muxer {
    container: Arc<dyn ContainerMuxer>,
    output_dir: PathBuf,
    stem: String,
}

impl Muxer {
    pub fn new(
        container: Arc<dyn ContainerMuxer>,
        output_dir: impl Into<PathBuf>,
        stem: impl Into<String>,
    ) -> Self {
        Self {
            container,
            output_dir: output_dir.into(),
            stem: stem.into(),
        }
    }

    pub fn original_srt_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}_original.srt", self.stem))
    }

    pub fn translated_srt_path(&self, language: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}_translated.srt", self.stem, language))
    }

    pub fn translated_audio_path(&self, language: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}_translated_audio.wav", self.stem, language))
    }

    pub fn translated_video_path(&self, language: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}_translated.mp4", self.stem, language))
    }

    /// Write the source-language SRT; called once per run.
    pub async fn write_original_srt(&self, transcript: &Transcript) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir).await?;
        let path = self.original_srt_path();
        write_srt(transcript.cues(), &path).await?;
        info!("Original subtitles written to {}", path.display());
        Ok(path)
    }

    /// Produce the translated video, audio and SRT for one language.
    ///
    /// Everything is staged in a hidden directory under the output directory and
    /// moved into place only once complete; on failure (or if this future is
    /// dropped) the staging directory is removed and nothing is left behind.
    pub async fn mux(
        &self,
        video: &VideoAsset,
        aligned: &AlignmentResult,
        original_srt: &Path,
    ) -> Result<OutputArtifactSet> {
        self.stage_and_mux(video, aligned, original_srt)
            .await
            .map_err(|e| e.in_stage(Stage::Muxing))
    }

    async fn stage_and_mux(
        &self,
        video: &VideoAsset,
        aligned: &AlignmentResult,
        original_srt: &Path,
    ) -> Result<OutputArtifactSet> {
        let language = aligned.transcript.target_language().to_string();
        fs::create_dir_all(&self.output_dir).await?;

        let staging = tempfile::Builder::new()
            .prefix(&format!(".autodub-{language}-"))
            .tempdir_in(&self.output_dir)?;
        debug!("[{}] Staging in {}", language, staging.path().display());

        let staged_srt = staging.path().join(STAGED_SUBTITLES);
        let staged_audio = staging.path().join(STAGED_AUDIO);
        let staged_video = staging.path().join(STAGED_VIDEO);

        write_srt(aligned.transcript.cues(), &staged_srt).await?;
        fs::copy(&aligned.audio.path, &staged_audio).await?;

        let freeze = freeze_extension(video.duration, aligned.audio.duration);
        if let Some(extra) = freeze {
            info!(
                "[{}] Audio outlasts video by {:.2}s, freezing last frame",
                language,
                extra.as_secs_f64()
            );
        }

        let request = MuxRequest {
            video: video.path.clone(),
            audio: staged_audio.clone(),
            subtitles: staged_srt.clone(),
            output: staged_video.clone(),
            freeze_extension: freeze,
        };
        self.container.mux(&request).await?;

        if !fs::try_exists(&staged_video).await.unwrap_or(false) {
            return Err(AutodubError::Mux(format!(
                "Muxer produced no video for {language}"
            )));
        }

        let artifacts = OutputArtifactSet {
            language: language.clone(),
            translated_video: self.translated_video_path(&language),
            translated_audio: self.translated_audio_path(&language),
            original_srt: original_srt.to_path_buf(),
            translated_srt: self.translated_srt_path(&language),
        };

        promote(&[
            (staged_srt, artifacts.translated_srt.clone()),
            (staged_audio, artifacts.translated_audio.clone()),
            (staged_video, artifacts.translated_video.clone()),
        ])
        .await?;

        info!(
            "[{}] Translated video written to {}",
            language,
            artifacts.translated_video.display()
        );
        Ok(artifacts)
    }
}

/// How much longer the last frame must be held for the video to cover the audio.
pub fn freeze_extension(video: Duration, audio: Duration) -> Option<Duration> {
    audio.checked_sub(video).filter(|extra| !extra.is_zero())
}

/// Move staged files to their final paths, all or nothing.
async fn promote(moves: &[(PathBuf, PathBuf)]) -> Result<()> {
    for (done, (from, to)) in moves.iter().enumerate() {
        if let Err(e) = fs::rename(from, to).await {
            for (_, placed) in &moves[..done] {
                if let Err(cleanup) = fs::remove_file(placed).await {
                    warn!("Failed to remove {}: {}", placed.display(), cleanup);
                }
            }
            return Err(e.into());
        }
    }
    Ok(())
}
