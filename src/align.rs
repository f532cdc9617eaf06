//! Reconciles synthesized speech with the caption timeline.

use crate::audio::{samples_for, AudioSegment, PcmAudio};
use crate::config::{AlignmentMode, Config};
use crate::error::{AutodubError, Result, Stage};
use crate::mux::ContainerMuxer;
use crate::subtitle::{SubtitleCue, TranslatedTranscript};
use crate::synthesize::SynthesizedSpeech;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What to do with a per-cue clip that is longer than its caption window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum AlignmentPolicy {
    /// Lengthen the cue and shift every later cue by the overrun.
    #[default]
    Extend,
    /// Speed the clip up (at most `max_rate`) and truncate whatever still overruns.
    Stretch { max_rate: f64 },
}

impl AlignmentPolicy {
    pub fn from_config(config: &Config) -> Self {
        match config.alignment {
            AlignmentMode::Extend => AlignmentPolicy::Extend,
            AlignmentMode::Stretch => AlignmentPolicy::Stretch {
                max_rate: config.max_stretch_rate,
            },
        }
    }
}

/// Where one cue's clip goes on the final track.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
    pub clip_duration: Duration,
    /// Playback speed-up applied to the clip; 1.0 means untouched.
    pub rate: f64,
    /// The clip is cut at `end` after speeding up.
    pub truncated: bool,
}

/// Decide where every clip goes. Pure: the same input always yields the same plan.
pub fn plan_placements(
    cues: &[SubtitleCue],
    clip_durations: &[Duration],
    policy: AlignmentPolicy,
) -> Result<Vec<Placement>> {
    if cues.len() != clip_durations.len() {
        return Err(AutodubError::Alignment(format!(
            "{} clips for {} cues",
            clip_durations.len(),
            cues.len()
        )));
    }

    let mut shift = Duration::ZERO;
    let placements = cues
        .iter()
        .zip(clip_durations)
        .map(|(cue, &clip)| {
            let window = cue.window();
            match policy {
                AlignmentPolicy::Extend => {
                    let start = cue.start + shift;
                    if clip <= window {
                        Placement {
                            index: cue.index,
                            start,
                            end: cue.end + shift,
                            clip_duration: clip,
                            rate: 1.0,
                            truncated: false,
                        }
                    } else {
                        shift += clip - window;
                        Placement {
                            index: cue.index,
                            start,
                            end: start + clip,
                            clip_duration: clip,
                            rate: 1.0,
                            truncated: false,
                        }
                    }
                }
                AlignmentPolicy::Stretch { max_rate } => {
                    let (rate, truncated) = if clip <= window {
                        (1.0, false)
                    } else {
                        let needed = clip.as_secs_f64() / window.as_secs_f64();
                        if needed <= max_rate {
                            (needed, false)
                        } else {
                            (max_rate, true)
                        }
                    };
                    Placement {
                        index: cue.index,
                        start: cue.start,
                        end: cue.end,
                        clip_duration: clip,
                        rate,
                        truncated,
                    }
                }
            }
        })
        .collect();

    Ok(placements)
}

/// The final audio for one language and the captions that match it.
#[derive(Debug, Clone)]
pub struct AlignmentResult {
    pub audio: AudioSegment,
    pub transcript: TranslatedTranscript,
}

pub struct TimeAligner {
    policy: AlignmentPolicy,
    container: Arc<dyn ContainerMuxer>,
    whole_track_tolerance: f64,
    max_duration_ratio: f64,
}

impl TimeAligner {
    /// `container` performs the pitch-preserving speed-up of stretched clips.
    pub fn new(policy: AlignmentPolicy, container: Arc<dyn ContainerMuxer>) -> Self {
        Self {
            policy,
            container,
            whole_track_tolerance: 0.10,
            max_duration_ratio: 3.0,
        }
    }

    pub fn from_config(config: &Config, container: Arc<dyn ContainerMuxer>) -> Self {
        Self::new(AlignmentPolicy::from_config(config), container)
            .with_whole_track_tolerance(config.whole_track_tolerance)
            .with_max_duration_ratio(config.max_duration_ratio)
    }

    pub fn with_whole_track_tolerance(mut self, tolerance: f64) -> Self {
        self.whole_track_tolerance = tolerance;
        self
    }

    pub fn with_max_duration_ratio(mut self, ratio: f64) -> Self {
        self.max_duration_ratio = ratio;
        self
    }

    /// Build the final track, write it to `output`, and return it with the
    /// captions retimed to match.
    ///
    /// The track is padded with silence up to `video_duration`. Sped-up clips
    /// are staged next to `output` while rendering.
    pub async fn align(
        &self,
        transcript: &TranslatedTranscript,
        speech: &SynthesizedSpeech,
        video_duration: Duration,
        output: &Path,
    ) -> Result<AlignmentResult> {
        let language = transcript.target_language();
        self.check_ceiling(speech, video_duration.max(transcript.transcript().end()))?;

        let scratch = output
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let (mut pcm, retimed) = match speech {
            SynthesizedSpeech::PerCue(clips) => {
                self.render_per_cue(transcript, clips, scratch).await?
            }
            SynthesizedSpeech::WholeTrack(clip) => {
                self.render_whole_track(transcript, clip, video_duration)?
            }
        };

        pcm.pad_to_len(samples_for(video_duration, pcm.sample_rate()));
        pcm.write_wav(output).map_err(|e| e.in_stage(Stage::Aligning))?;

        info!(
            "[{}] Aligned track: {:.2}s (video {:.2}s, captions end {:.2}s)",
            language,
            pcm.duration().as_secs_f64(),
            video_duration.as_secs_f64(),
            retimed.transcript().end().as_secs_f64()
        );

        Ok(AlignmentResult {
            audio: AudioSegment {
                path: output.to_path_buf(),
                duration: pcm.duration(),
                language: language.to_string(),
                sample_rate: pcm.sample_rate(),
                channels: 1,
            },
            transcript: retimed,
        })
    }

    fn check_ceiling(&self, speech: &SynthesizedSpeech, basis: Duration) -> Result<()> {
        let total = speech.total_duration();
        let ceiling = basis.mul_f64(self.max_duration_ratio);
        if total > ceiling {
            return Err(AutodubError::Alignment(format!(
                "Synthesized speech lasts {:.2}s, over the {:.2}s ceiling",
                total.as_secs_f64(),
                ceiling.as_secs_f64()
            )));
        }
        Ok(())
    }

    async fn render_per_cue(
        &self,
        transcript: &TranslatedTranscript,
        clips: &[PcmAudio],
        scratch: &Path,
    ) -> Result<(PcmAudio, TranslatedTranscript)> {
        let durations: Vec<Duration> = clips.iter().map(PcmAudio::duration).collect();
        let placements = plan_placements(transcript.cues(), &durations, self.policy)?;

        let sample_rate = clips
            .first()
            .map(PcmAudio::sample_rate)
            .ok_or_else(|| AutodubError::Alignment("No clips to align".to_string()))?;
        let mut track = PcmAudio::empty(sample_rate);

        for (placement, clip) in placements.iter().zip(clips) {
            let start = samples_for(placement.start, sample_rate);
            let end = samples_for(placement.end, sample_rate);
            // Leading gap, or the silent tail of the previous window
            track.pad_to_len(start);

            let appended = if placement.rate > 1.0 {
                if placement.truncated {
                    warn!(
                        "Cue {} still overruns at {:.2}x, truncating",
                        placement.index, placement.rate
                    );
                } else {
                    debug!("Cue {} sped up {:.2}x", placement.index, placement.rate);
                }
                let mut rendered = self
                    .speed_up(clip, placement.index, placement.rate, scratch)
                    .await
                    .map_err(|e| e.in_stage(Stage::Aligning))?;
                rendered.truncate_to_len(end.saturating_sub(start));
                track.append(&rendered)
            } else {
                track.append(clip)
            };
            appended.map_err(|e| e.in_stage(Stage::Aligning))?;
        }

        let timings: Vec<(Duration, Duration)> =
            placements.iter().map(|p| (p.start, p.end)).collect();
        let retimed = transcript
            .retimed(&timings)
            .map_err(|e| e.in_stage(Stage::Aligning))?;

        Ok((track, retimed))
    }

    /// Round-trip one clip through the container's tempo filter.
    async fn speed_up(
        &self,
        clip: &PcmAudio,
        index: usize,
        rate: f64,
        scratch: &Path,
    ) -> Result<PcmAudio> {
        let input = scratch.join(format!("cue_{index:04}.wav"));
        let output = scratch.join(format!("cue_{index:04}_x{rate:.3}.wav"));

        clip.write_wav(&input)?;
        let changed = self.container.change_tempo(&input, &output, rate).await;
        let rendered = changed.and_then(|_| PcmAudio::read_wav(&output));

        for path in [&input, &output] {
            if let Err(e) = tokio::fs::remove_file(path).await {
                debug!("Could not remove {}: {}", path.display(), e);
            }
        }

        let rendered = rendered?;
        if rendered.sample_rate() != clip.sample_rate() {
            return Err(AutodubError::Alignment(format!(
                "Tempo change for cue {} returned {} Hz audio, expected {} Hz",
                index,
                rendered.sample_rate(),
                clip.sample_rate()
            )));
        }
        Ok(rendered)
    }

    /// Keep the track as recorded; retime the captions by the ratio of speech
    /// to source length once that ratio leaves the tolerance band.
    fn render_whole_track(
        &self,
        transcript: &TranslatedTranscript,
        clip: &PcmAudio,
        source_duration: Duration,
    ) -> Result<(PcmAudio, TranslatedTranscript)> {
        let speech = clip.duration();
        if source_duration.is_zero() {
            return Ok((clip.clone(), transcript.clone()));
        }

        let factor = speech.as_secs_f64() / source_duration.as_secs_f64();
        let divergence = (factor - 1.0).abs();

        if divergence <= self.whole_track_tolerance {
            debug!("Whole-track speech within tolerance ({:.1}%)", divergence * 100.0);
            return Ok((clip.clone(), transcript.clone()));
        }

        info!(
            "[{}] Whole-track speech diverges {:.1}%, scaling captions by {:.3}",
            transcript.target_language(),
            divergence * 100.0,
            factor
        );

        let timings = scale_timings(transcript.cues(), factor);
        let retimed = transcript
            .retimed(&timings)
            .map_err(|e| e.in_stage(Stage::Aligning))?;
        Ok((clip.clone(), retimed))
    }
}

/// Multiply every cue boundary by `factor`, rounding to the nanosecond.
pub fn scale_timings(cues: &[SubtitleCue], factor: f64) -> Vec<(Duration, Duration)> {
    let scale = |d: Duration| Duration::from_nanos((d.as_nanos() as f64 * factor).round() as u64);
    cues.iter().map(|c| (scale(c.start), scale(c.end))).collect()
}
