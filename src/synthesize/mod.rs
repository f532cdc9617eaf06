pub mod openai;

pub use openai::OpenAiSpeech;

use crate::audio::PcmAudio;
use crate::config::SynthesisMode;
use crate::error::{AutodubError, Result, Stage};
use crate::subtitle::TranslatedTranscript;
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info};

/// Text-to-speech engine producing mono 16-bit PCM.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, language: &str) -> Result<PcmAudio>;
    fn name(&self) -> &'static str;
}

/// Speech rendered for one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesizedSpeech {
    /// One clip per cue, in cue order.
    PerCue(Vec<PcmAudio>),
    /// A single clip for the whole script; its internal timing is not cue-aligned.
    WholeTrack(PcmAudio),
}

impl SynthesizedSpeech {
    /// Sum of all clip durations.
    pub fn total_duration(&self) -> Duration {
        match self {
            SynthesizedSpeech::PerCue(clips) => clips.iter().map(PcmAudio::duration).sum(),
            SynthesizedSpeech::WholeTrack(clip) => clip.duration(),
        }
    }
}

pub struct Synthesizer {
    engine: Arc<dyn SpeechSynthesizer>,
    mode: SynthesisMode,
    timeout: Duration,
}

impl Synthesizer {
    pub fn new(engine: Arc<dyn SpeechSynthesizer>, timeout: Duration) -> Self {
        Self {
            engine,
            mode: SynthesisMode::default(),
            timeout,
        }
    }

    pub fn with_mode(mut self, mode: SynthesisMode) -> Self {
        self.mode = mode;
        self
    }

    /// Render the translated transcript to speech.
    ///
    /// Per-cue clips are requested one after another. Engine failure, timeout,
    /// empty text and empty clips are all [`AutodubError::Synthesis`].
    pub async fn synthesize(&self, transcript: &TranslatedTranscript) -> Result<SynthesizedSpeech> {
        let language = transcript.target_language();
        info!(
            "[{}] Synthesizing {} cues with {} ({})",
            language,
            transcript.len(),
            self.engine.name(),
            self.mode
        );

        let speech = match self.mode {
            SynthesisMode::PerCue => {
                let mut clips = Vec::with_capacity(transcript.len());
                for cue in transcript.cues() {
                    let text = prepare_text_for_speech(&cue.text);
                    if text.is_empty() {
                        return Err(AutodubError::Synthesis(format!(
                            "Cue {} has no speakable text",
                            cue.index
                        )));
                    }
                    let clip = self.render(&text, language).await?;
                    debug!(
                        "[{}] Cue {}: {:.2}s clip for {:.2}s window",
                        language,
                        cue.index,
                        clip.duration().as_secs_f64(),
                        cue.window().as_secs_f64()
                    );
                    clips.push(clip);
                }
                SynthesizedSpeech::PerCue(clips)
            }
            SynthesisMode::WholeTrack => {
                let script = whole_track_script(transcript);
                if script.is_empty() {
                    return Err(AutodubError::Synthesis(
                        "Transcript has no speakable text".to_string(),
                    ));
                }
                SynthesizedSpeech::WholeTrack(self.render(&script, language).await?)
            }
        };

        info!(
            "[{}] Synthesized {:.2}s of speech",
            language,
            speech.total_duration().as_secs_f64()
        );
        Ok(speech)
    }

    async fn render(&self, text: &str, language: &str) -> Result<PcmAudio> {
        let clip = tokio::time::timeout(self.timeout, self.engine.synthesize(text, language))
            .await
            .map_err(|_| {
                AutodubError::Synthesis(format!(
                    "{} timed out after {:.1}s",
                    self.engine.name(),
                    self.timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| e.in_stage(Stage::Synthesizing))?;

        if clip.is_empty() {
            return Err(AutodubError::Synthesis(format!(
                "{} returned an empty clip",
                self.engine.name()
            )));
        }
        Ok(clip)
    }
}

/// All cue texts in order, each closed as a sentence.
fn whole_track_script(transcript: &TranslatedTranscript) -> String {
    transcript
        .cues()
        .iter()
        .map(|c| prepare_text_for_speech(&c.text))
        .filter(|t| !t.is_empty())
        .map(|t| {
            if t.ends_with(&['.', '!', '?', '…', '。', '！', '？'][..]) {
                t
            } else {
                format!("{t}.")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn html_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid HTML tag regex"))
}

/// Strip markup and entities, collapse whitespace.
pub fn prepare_text_for_speech(text: &str) -> String {
    let text = html_tag().replace_all(text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtitle::{SubtitleCue, Transcript};
    use std::sync::Mutex;

    const RATE: u32 = 24_000;

    /// 100 ms of audio per character; records every text it is given.
    #[derive(Default)]
    struct CharClock {
        texts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for CharClock {
        async fn synthesize(&self, text: &str, _language: &str) -> Result<PcmAudio> {
            self.texts.lock().unwrap().push(text.to_string());
            let duration = Duration::from_millis(100 * text.chars().count() as u64);
            Ok(PcmAudio::silence(duration, RATE))
        }

        fn name(&self) -> &'static str {
            "CharClock"
        }
    }

    struct Mute;

    #[async_trait]
    impl SpeechSynthesizer for Mute {
        async fn synthesize(&self, _text: &str, _language: &str) -> Result<PcmAudio> {
            Ok(PcmAudio::empty(RATE))
        }

        fn name(&self) -> &'static str {
            "Mute"
        }
    }

    fn translated() -> TranslatedTranscript {
        let source = Transcript::new(
            "en",
            vec![
                SubtitleCue::new(1, Duration::ZERO, Duration::from_secs(2), "Hello"),
                SubtitleCue::new(2, Duration::from_secs(2), Duration::from_secs(4), "Bye"),
            ],
        )
        .unwrap();
        TranslatedTranscript::from_source(
            &source,
            "vi",
            vec!["<i>Xin chào</i>".to_string(), "Tạm biệt!".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_prepare_text_for_speech() {
        assert_eq!(
            prepare_text_for_speech("<b>Hello</b>&nbsp;  there\nfriend &amp; co"),
            "Hello there friend & co"
        );
    }

    #[tokio::test]
    async fn test_per_cue_one_clip_per_cue() {
        let engine = Arc::new(CharClock::default());
        let synthesizer = Synthesizer::new(engine.clone(), Duration::from_secs(5));

        let speech = synthesizer.synthesize(&translated()).await.unwrap();
        match speech {
            SynthesizedSpeech::PerCue(clips) => {
                assert_eq!(clips.len(), 2);
                assert_eq!(clips[0].duration(), Duration::from_millis(800));
            }
            other => panic!("Expected per-cue speech, got {other:?}"),
        }
        assert_eq!(*engine.texts.lock().unwrap(), vec!["Xin chào", "Tạm biệt!"]);
    }

    #[tokio::test]
    async fn test_whole_track_joins_sentences() {
        let engine = Arc::new(CharClock::default());
        let synthesizer = Synthesizer::new(engine.clone(), Duration::from_secs(5))
            .with_mode(SynthesisMode::WholeTrack);

        let speech = synthesizer.synthesize(&translated()).await.unwrap();
        assert!(matches!(speech, SynthesizedSpeech::WholeTrack(_)));
        assert_eq!(*engine.texts.lock().unwrap(), vec!["Xin chào. Tạm biệt!"]);
    }

    #[tokio::test]
    async fn test_empty_clip_is_synthesis_error() {
        let synthesizer = Synthesizer::new(Arc::new(Mute), Duration::from_secs(5));
        let err = synthesizer.synthesize(&translated()).await.unwrap_err();
        assert_eq!(err.kind(), "SynthesisError");
    }

    #[tokio::test]
    async fn test_slow_engine_times_out() {
        struct Stalled;

        #[async_trait]
        impl SpeechSynthesizer for Stalled {
            async fn synthesize(&self, _text: &str, _language: &str) -> Result<PcmAudio> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(PcmAudio::silence(Duration::from_secs(1), RATE))
            }

            fn name(&self) -> &'static str {
                "Stalled"
            }
        }

        let synthesizer = Synthesizer::new(Arc::new(Stalled), Duration::from_millis(50));
        let started = std::time::Instant::now();
        let err = synthesizer.synthesize(&translated()).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(err.kind(), "SynthesisError");
        assert!(err.reason().contains("timed out"), "{}", err.reason());
    }
}
