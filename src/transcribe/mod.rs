pub mod whisper;

pub use whisper::{WhisperClient, WhisperModel};

use crate::audio::AudioSegment;
use crate::error::{AutodubError, Result, Stage};
use crate::subtitle::{clean_cue_text, SubtitleCue, Transcript};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One timed text segment as returned by a speech-to-text engine.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedSegment {
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

impl RecognizedSegment {
    pub fn new(start: Duration, end: Duration, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// Speech-to-text engine with segment-level timestamps.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn recognize(&self, audio: &AudioSegment) -> Result<Vec<RecognizedSegment>>;
    fn name(&self) -> &'static str;
}

/// Runs speech recognition once and normalizes the result into a [`Transcript`].
pub struct Transcriber {
    recognizer: Arc<dyn SpeechRecognizer>,
    timeout: Duration,
}

impl Transcriber {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, timeout: Duration) -> Self {
        Self {
            recognizer,
            timeout,
        }
    }

    /// Transcribe the source audio.
    ///
    /// Fails with [`AutodubError::Transcription`] on engine failure, timeout, or
    /// when no usable cue remains after normalization.
    pub async fn transcribe(&self, audio: &AudioSegment) -> Result<Transcript> {
        info!(
            "Transcribing {:.1}s of audio with {}",
            audio.duration.as_secs_f64(),
            self.recognizer.name()
        );

        let segments = tokio::time::timeout(self.timeout, self.recognizer.recognize(audio))
            .await
            .map_err(|_| {
                AutodubError::Transcription(format!(
                    "{} timed out after {}s",
                    self.recognizer.name(),
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| e.in_stage(Stage::Transcribing))?;

        debug!("{} returned {} raw segments", self.recognizer.name(), segments.len());

        let cues = normalize_segments(segments, audio.duration);
        if cues.is_empty() {
            return Err(AutodubError::Transcription(
                "No speech recognized in audio".to_string(),
            ));
        }

        let transcript = Transcript::new(audio.language.clone(), cues)
            .map_err(|e| e.in_stage(Stage::Transcribing))?;

        info!("Transcription complete: {} cues", transcript.len());
        Ok(transcript)
    }
}

/// Turn raw engine segments into cues that satisfy the transcript invariants.
///
/// Text is trimmed and empty segments dropped, segments are sorted by start,
/// overlaps are resolved by pulling the earlier cue's end back (or merging
/// cues that start together), and indices are renumbered `1..=N`. If text
/// survives but no segment has a usable window, one cue spans the whole track.
pub fn normalize_segments(
    segments: Vec<RecognizedSegment>,
    total_duration: Duration,
) -> Vec<SubtitleCue> {
    let mut texted: Vec<RecognizedSegment> = segments
        .into_iter()
        .map(|s| RecognizedSegment {
            text: clean_cue_text(&s.text),
            ..s
        })
        .filter(|s| !s.text.is_empty())
        .collect();

    if texted.is_empty() {
        return Vec::new();
    }

    texted.sort_by(|a, b| a.start.cmp(&b.start));

    let usable: Vec<RecognizedSegment> = texted
        .iter()
        .filter(|s| s.end > s.start)
        .cloned()
        .collect();

    if usable.is_empty() {
        if total_duration.is_zero() {
            return Vec::new();
        }
        warn!("No segment carried a usable window, spanning the whole track");
        let text = texted
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        return vec![SubtitleCue::new(1, Duration::ZERO, total_duration, text)];
    }

    let mut result: Vec<RecognizedSegment> = Vec::with_capacity(usable.len());
    for segment in usable {
        if let Some(last) = result.last_mut() {
            if segment.start <= last.start {
                // Starts together with the previous cue: fold into it
                last.end = last.end.max(segment.end);
                last.text = format!("{} {}", last.text, segment.text);
                continue;
            }
            if segment.start < last.end {
                last.end = segment.start;
            }
        }
        result.push(segment);
    }

    result
        .into_iter()
        .enumerate()
        .map(|(i, s)| SubtitleCue::new(i + 1, s.start, s.end, s.text))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn seg(start_ms: u64, end_ms: u64, text: &str) -> RecognizedSegment {
        RecognizedSegment::new(
            Duration::from_millis(start_ms),
            Duration::from_millis(end_ms),
            text,
        )
    }

    fn audio() -> AudioSegment {
        AudioSegment {
            path: PathBuf::from("/tmp/source_audio.wav"),
            duration: Duration::from_secs(6),
            language: "en".to_string(),
            sample_rate: 16_000,
            channels: 1,
        }
    }

    struct MockRecognizer {
        segments: Vec<RecognizedSegment>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl MockRecognizer {
        fn returning(segments: Vec<RecognizedSegment>) -> Self {
            Self {
                segments,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SpeechRecognizer for MockRecognizer {
        async fn recognize(&self, _audio: &AudioSegment) -> Result<Vec<RecognizedSegment>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.segments.clone())
        }

        fn name(&self) -> &'static str {
            "Mock"
        }
    }

    #[test]
    fn test_normalize_sorts_and_renumbers() {
        let cues = normalize_segments(
            vec![seg(2000, 4000, "second"), seg(0, 2000, " first ")],
            Duration::from_secs(4),
        );

        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].index, 1);
        assert_eq!(cues[0].text, "first");
        assert_eq!(cues[1].index, 2);
        assert_eq!(cues[1].start, Duration::from_millis(2000));
    }

    #[test]
    fn test_normalize_fixes_overlap() {
        let cues = normalize_segments(
            vec![seg(0, 3000, "First"), seg(2500, 5000, "Second")],
            Duration::from_secs(5),
        );

        assert_eq!(cues[0].end, Duration::from_millis(2500));
        assert_eq!(cues[1].start, Duration::from_millis(2500));
    }

    #[test]
    fn test_normalize_merges_same_start() {
        let cues = normalize_segments(
            vec![seg(1000, 2000, "Hello"), seg(1000, 2500, "again")],
            Duration::from_secs(3),
        );

        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "Hello again");
        assert_eq!(cues[0].end, Duration::from_millis(2500));
    }

    #[test]
    fn test_normalize_drops_empty_text() {
        let cues = normalize_segments(
            vec![seg(0, 1000, "  "), seg(1000, 2000, "Words")],
            Duration::from_secs(2),
        );
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].index, 1);
    }

    #[test]
    fn test_normalize_removes_blank_lines() {
        let cues = normalize_segments(
            vec![seg(0, 1000, " Hello\n\n there "), seg(1000, 2000, "\n \n")],
            Duration::from_secs(2),
        );
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].text, "Hello\nthere");
    }

    #[test]
    fn test_normalize_single_utterance_spans_track() {
        let cues = normalize_segments(vec![seg(0, 0, "One long sentence")], Duration::from_secs(6));
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].start, Duration::ZERO);
        assert_eq!(cues[0].end, Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_transcribe_produces_valid_transcript() {
        let recognizer = Arc::new(MockRecognizer::returning(vec![
            seg(0, 2000, "Hello there"),
            seg(2000, 4500, "How are you"),
            seg(4500, 6000, "Goodbye"),
        ]));
        let transcriber = Transcriber::new(recognizer.clone(), Duration::from_secs(5));

        let transcript = transcriber.transcribe(&audio()).await.unwrap();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript.language(), "en");
        assert_eq!(recognizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transcribe_zero_cues_is_error() {
        let transcriber = Transcriber::new(
            Arc::new(MockRecognizer::returning(vec![])),
            Duration::from_secs(5),
        );

        let result = transcriber.transcribe(&audio()).await;
        assert!(matches!(result, Err(AutodubError::Transcription(_))));
    }

    #[tokio::test]
    async fn test_transcribe_timeout_is_transcription_error() {
        let recognizer = MockRecognizer {
            segments: vec![seg(0, 1000, "late")],
            delay: Duration::from_millis(200),
            calls: AtomicUsize::new(0),
        };
        let transcriber = Transcriber::new(Arc::new(recognizer), Duration::from_millis(20));

        let result = transcriber.transcribe(&audio()).await;
        match result {
            Err(AutodubError::Transcription(msg)) => assert!(msg.contains("timed out")),
            other => panic!("Expected timeout, got {other:?}"),
        }
    }
}
