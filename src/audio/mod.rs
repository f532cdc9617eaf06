pub mod extract;
pub mod pcm;
pub mod vad;

pub use extract::{check_ffmpeg, check_ffprobe, extract_audio, get_duration, probe_video};
pub use pcm::{duration_of, samples_for, PcmAudio};
pub use vad::{has_signal, VadConfig};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{AutodubError, Result};
use crate::mux::ContainerMuxer;

/// Handle to an input video. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoAsset {
    pub path: PathBuf,
    pub duration: Duration,
    pub has_audio: bool,
}

impl VideoAsset {
    /// File stem used to name output artifacts.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string())
    }
}

/// Metadata about an audio file.
#[derive(Debug, Clone)]
pub struct AudioMetadata {
    pub duration: Duration,
    pub sample_rate: u32,
    pub channels: u16,
}

/// A full audio track on disk, tagged with its language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    pub path: PathBuf,
    pub duration: Duration,
    pub language: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Pulls the audio track out of the source video.
pub struct AudioExtractor {
    container: Arc<dyn ContainerMuxer>,
    vad: VadConfig,
}

impl AudioExtractor {
    pub fn new(container: Arc<dyn ContainerMuxer>) -> Self {
        Self {
            container,
            vad: VadConfig::default(),
        }
    }

    /// Extract the video's audio into `work_dir` as a WAV file.
    ///
    /// Fails with [`AutodubError::Media`] when the video has no audio stream,
    /// the container cannot be demuxed, or the extracted track is empty or silent.
    pub async fn extract(
        &self,
        video: &VideoAsset,
        work_dir: &Path,
        language: &str,
    ) -> Result<AudioSegment> {
        if !video.has_audio {
            return Err(AutodubError::Media(format!(
                "{} has no audio track",
                video.path.display()
            )));
        }

        let output = work_dir.join("source_audio.wav");
        let metadata = self
            .container
            .demux_audio(&video.path, &output)
            .await
            .map_err(|e| e.in_stage(crate::error::Stage::Extracting))?;

        if metadata.duration.is_zero() {
            return Err(AutodubError::Media(format!(
                "Audio track of {} is empty",
                video.path.display()
            )));
        }

        let pcm = PcmAudio::read_wav(&output).map_err(|e| {
            AutodubError::Media(format!("Extracted audio is unreadable: {}", e.reason()))
        })?;
        if !has_signal(&pcm, &self.vad) {
            return Err(AutodubError::Media(format!(
                "Audio track of {} is silent",
                video.path.display()
            )));
        }
        debug!("Source audio passes signal check");

        info!(
            "Extracted {:.1}s of {} audio",
            metadata.duration.as_secs_f64(),
            language
        );

        Ok(AudioSegment {
            path: output,
            duration: metadata.duration,
            language: language.to_string(),
            sample_rate: metadata.sample_rate,
            channels: metadata.channels,
        })
    }
}
