//! End-to-end pipeline tests with in-process engines
//!
//! Every external engine is replaced by a deterministic fake, so these tests
//! exercise orchestration, alignment and artifact handling without ffmpeg or
//! network access.

use async_trait::async_trait;
use autodub::audio::{AudioMetadata, AudioSegment, PcmAudio, VideoAsset};
use autodub::config::{SynthesisMode, TranslationMode};
use autodub::mux::{ContainerMuxer, MuxRequest};
use autodub::subtitle::srt::parse_srt;
use autodub::synthesize::SpeechSynthesizer;
use autodub::transcribe::{RecognizedSegment, SpeechRecognizer};
use autodub::translate::{TextTranslator, TranslationRequest};
use autodub::{AutodubError, Config, LanguageOutcome, PipelineOrchestrator, Result, Stage};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const TTS_RATE: u32 = 24_000;

// ============================================================================
// Fakes
// ============================================================================

struct FakeRecognizer {
    segments: Vec<RecognizedSegment>,
    calls: AtomicUsize,
}

impl FakeRecognizer {
    fn scenario_a() -> Self {
        Self::with_segments(vec![
            RecognizedSegment::new(Duration::ZERO, Duration::from_secs(2), "Hello there"),
            RecognizedSegment::new(
                Duration::from_secs(2),
                Duration::from_millis(4500),
                "How are you",
            ),
            RecognizedSegment::new(
                Duration::from_millis(4500),
                Duration::from_secs(6),
                "Goodbye",
            ),
        ])
    }

    fn with_segments(segments: Vec<RecognizedSegment>) -> Self {
        Self {
            segments,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for FakeRecognizer {
    async fn recognize(&self, _audio: &AudioSegment) -> Result<Vec<RecognizedSegment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.segments.clone())
    }

    fn name(&self) -> &'static str {
        "fake recognizer"
    }
}

/// Upper-cases text; fails for `failing` and raises `cancel_after` once used.
/// With `delay`, each call sleeps first and raises `finished` afterwards.
#[derive(Default)]
struct FakeTranslator {
    failing: Option<&'static str>,
    cancel_after: Option<Arc<AtomicBool>>,
    delay: Option<Duration>,
    finished: Arc<AtomicBool>,
    single_calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

#[async_trait]
impl TextTranslator for FakeTranslator {
    async fn translate(&self, request: &TranslationRequest) -> Result<String> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
            self.finished.store(true, Ordering::SeqCst);
        }
        if self.failing == Some(request.target_lang.as_str()) {
            return Err(AutodubError::Translation(
                "engine rejected the request".to_string(),
            ));
        }
        if let Some(ref flag) = self.cancel_after {
            flag.store(true, Ordering::SeqCst);
        }
        Ok(request.text.to_uppercase())
    }

    async fn translate_batch(
        &self,
        texts: &[String],
        _source_lang: &str,
        _target_lang: &str,
    ) -> Result<Vec<String>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| t.to_uppercase()).collect())
    }

    fn name(&self) -> &'static str {
        "fake translator"
    }
}

/// Clip lengths chosen per line: 3.8s for "how are you", 1.5s for "goodbye".
struct FakeSynthesizer;

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str, _language: &str) -> Result<PcmAudio> {
        let lower = text.to_lowercase();
        let millis = if lower.contains("how are you") {
            3800
        } else if lower.contains("goodbye") {
            1500
        } else {
            1000
        };
        let samples = (millis * TTS_RATE as usize) / 1000;
        Ok(PcmAudio::new(vec![800; samples], TTS_RATE))
    }

    fn name(&self) -> &'static str {
        "fake synthesizer"
    }
}

/// Probes a fixed asset, writes a tone (or silence) on demux, and "muxes" by
/// copying the staged audio to the requested output.
struct FakeContainer {
    duration: Duration,
    has_audio: bool,
    silent: bool,
    fail_mux_for: Option<&'static str>,
    requests: Mutex<Vec<MuxRequest>>,
    tempo_rates: Mutex<Vec<f64>>,
}

impl FakeContainer {
    fn new() -> Self {
        Self {
            duration: Duration::from_secs(6),
            has_audio: true,
            silent: false,
            fail_mux_for: None,
            requests: Mutex::new(Vec::new()),
            tempo_rates: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<MuxRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerMuxer for FakeContainer {
    async fn probe(&self, path: &Path) -> Result<VideoAsset> {
        Ok(VideoAsset {
            path: path.to_path_buf(),
            duration: self.duration,
            has_audio: self.has_audio,
        })
    }

    async fn demux_audio(&self, _video: &Path, output: &Path) -> Result<AudioMetadata> {
        let rate = 16_000;
        let samples: Vec<i16> = (0..rate as usize * self.duration.as_secs() as usize)
            .map(|i| {
                if self.silent {
                    0
                } else if (i / 20) % 2 == 0 {
                    6000
                } else {
                    -6000
                }
            })
            .collect();
        PcmAudio::new(samples, rate).write_wav(output)?;
        Ok(AudioMetadata {
            duration: self.duration,
            sample_rate: rate,
            channels: 1,
        })
    }

    async fn mux(&self, request: &MuxRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(lang) = self.fail_mux_for {
            if request.output.to_string_lossy().contains(&format!(".autodub-{lang}-")) {
                return Err(AutodubError::Mux("encoder crashed".to_string()));
            }
        }
        tokio::fs::copy(&request.audio, &request.output).await?;
        Ok(())
    }

    /// Drops samples to play `rate` times faster.
    async fn change_tempo(&self, input: &Path, output: &Path, rate: f64) -> Result<()> {
        self.tempo_rates.lock().unwrap().push(rate);
        let clip = PcmAudio::read_wav(input)?;
        let len = (clip.len() as f64 / rate).round() as usize;
        let samples = (0..len)
            .map(|i| clip.samples()[((i as f64 * rate) as usize).min(clip.len() - 1)])
            .collect();
        PcmAudio::new(samples, clip.sample_rate()).write_wav(output)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn test_config() -> Config {
    Config {
        concurrency: 2,
        engine_timeout_secs: 5,
        ..Config::default()
    }
}

struct Harness {
    recognizer: Arc<FakeRecognizer>,
    translator: Arc<FakeTranslator>,
    container: Arc<FakeContainer>,
    orchestrator: PipelineOrchestrator,
    dir: TempDir,
}

impl Harness {
    fn new(recognizer: FakeRecognizer, translator: FakeTranslator, container: FakeContainer) -> Self {
        Self::with_config(test_config(), recognizer, translator, container)
    }

    fn with_config(
        config: Config,
        recognizer: FakeRecognizer,
        translator: FakeTranslator,
        container: FakeContainer,
    ) -> Self {
        let recognizer = Arc::new(recognizer);
        let translator = Arc::new(translator);
        let container = Arc::new(container);
        let orchestrator = PipelineOrchestrator::new(
            config,
            recognizer.clone(),
            translator.clone(),
            Arc::new(FakeSynthesizer),
            container.clone(),
        );
        Self {
            recognizer,
            translator,
            container,
            orchestrator,
            dir: TempDir::new().unwrap(),
        }
    }

    fn input(&self) -> PathBuf {
        self.dir.path().join("clip.mp4")
    }

    fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    async fn run(&self, targets: &[&str]) -> Result<autodub::RunReport> {
        self.run_with_flag(targets, Arc::new(AtomicBool::new(false)))
            .await
    }

    async fn run_with_flag(
        &self,
        targets: &[&str],
        cancelled: Arc<AtomicBool>,
    ) -> Result<autodub::RunReport> {
        let targets: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
        self.orchestrator
            .run(&self.input(), &targets, &self.output_dir(), cancelled)
            .await
    }

    fn output_names(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.output_dir())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_extend_policy_retimes_captions_and_freezes_video() {
    let h = Harness::new(
        FakeRecognizer::scenario_a(),
        FakeTranslator::default(),
        FakeContainer::new(),
    );

    let report = h.run(&["vi"]).await.unwrap();
    assert_eq!(report.cue_count, 3);
    assert_eq!(report.lines(), vec!["vi: succeeded"]);

    let artifacts = report.language("vi").and_then(|l| l.artifacts()).unwrap();
    let srt = std::fs::read_to_string(&artifacts.translated_srt).unwrap();
    let cues = parse_srt(&srt).unwrap();

    assert_eq!(cues.len(), 3);
    assert_eq!(cues[0].text, "HELLO THERE");
    assert_eq!(cues[0].start, Duration::ZERO);
    assert_eq!(cues[0].end, Duration::from_secs(2));
    assert_eq!(cues[1].start, Duration::from_secs(2));
    assert_eq!(cues[1].end, Duration::from_millis(5800));
    assert_eq!(cues[2].start, Duration::from_millis(5800));
    assert_eq!(cues[2].end, Duration::from_millis(7300));

    let audio = PcmAudio::read_wav(&artifacts.translated_audio).unwrap();
    assert_eq!(audio.duration(), Duration::from_millis(7300));

    let requests = h.container.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].video, h.input());
    assert_eq!(
        requests[0].freeze_extension,
        Some(Duration::from_millis(1300))
    );
}

#[tokio::test]
async fn test_stretch_policy_speeds_up_overrunning_clip() {
    let config = Config {
        alignment: autodub::config::AlignmentMode::Stretch,
        max_stretch_rate: 2.0,
        ..test_config()
    };
    let h = Harness::with_config(
        config,
        FakeRecognizer::scenario_a(),
        FakeTranslator::default(),
        FakeContainer::new(),
    );

    let report = h.run(&["vi"]).await.unwrap();
    let artifacts = report.language("vi").and_then(|l| l.artifacts()).unwrap();

    // 3.8s of speech squeezed into the 2.5s window of cue 2
    let rates = h.container.tempo_rates.lock().unwrap().clone();
    assert_eq!(rates.len(), 1);
    assert!((rates[0] - 1.52).abs() < 1e-9);

    let cues = parse_srt(&std::fs::read_to_string(&artifacts.translated_srt).unwrap()).unwrap();
    assert_eq!(cues[2].start, Duration::from_millis(4500));
    assert_eq!(cues[2].end, Duration::from_secs(6));

    let audio = PcmAudio::read_wav(&artifacts.translated_audio).unwrap();
    assert_eq!(audio.duration(), Duration::from_secs(6));
    assert_eq!(h.container.requests()[0].freeze_extension, None);
}

#[tokio::test]
async fn test_whole_track_batch_run_scales_captions() {
    let config = Config {
        synthesis_mode: SynthesisMode::WholeTrack,
        translation_mode: TranslationMode::Batch,
        ..test_config()
    };
    let h = Harness::with_config(
        config,
        FakeRecognizer::scenario_a(),
        FakeTranslator::default(),
        FakeContainer::new(),
    );

    let report = h.run(&["vi"]).await.unwrap();
    assert_eq!(report.lines(), vec!["vi: succeeded"]);
    assert_eq!(h.translator.batch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.translator.single_calls.load(Ordering::SeqCst), 0);

    let artifacts = report.language("vi").and_then(|l| l.artifacts()).unwrap();
    let cues = parse_srt(&std::fs::read_to_string(&artifacts.translated_srt).unwrap()).unwrap();
    assert_eq!(cues.len(), 3);
    assert_eq!(cues[1].text, "HOW ARE YOU");

    // 3.8s of speech for a 6s video: every boundary scales by 3.8 / 6
    let end = cues[2].end.as_millis() as i64;
    assert!((end - 3800).abs() <= 1, "last cue ends at {end}ms");
    let middle = cues[1].start.as_millis() as i64;
    assert!((middle - 1267).abs() <= 1, "second cue starts at {middle}ms");

    // Short speech is padded with silence, so the video is never frozen
    let audio = PcmAudio::read_wav(&artifacts.translated_audio).unwrap();
    assert_eq!(audio.duration(), Duration::from_secs(6));
    assert_eq!(h.container.requests()[0].freeze_extension, None);
    assert!(h.container.tempo_rates.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_original_srt_keeps_source_text_and_timing() {
    let h = Harness::new(
        FakeRecognizer::scenario_a(),
        FakeTranslator::default(),
        FakeContainer::new(),
    );

    let report = h.run(&["vi"]).await.unwrap();
    assert_eq!(report.original_srt, h.output_dir().join("clip_original.srt"));

    let srt = std::fs::read_to_string(&report.original_srt).unwrap();
    let cues = parse_srt(&srt).unwrap();
    assert_eq!(cues.len(), 3);
    assert_eq!(cues[1].text, "How are you");
    assert_eq!(cues[2].start, Duration::from_millis(4500));
    assert_eq!(cues[2].end, Duration::from_secs(6));
}

#[tokio::test]
async fn test_transcribes_once_for_many_languages() {
    let h = Harness::new(
        FakeRecognizer::scenario_a(),
        FakeTranslator::default(),
        FakeContainer::new(),
    );

    let report = h.run(&["ja", "VI", "fr-CA", "vi"]).await.unwrap();

    assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 1);
    let order: Vec<&str> = report.languages.iter().map(|l| l.language.as_str()).collect();
    assert_eq!(order, vec!["ja", "vi", "fr"]);
    assert_eq!(report.succeeded().count(), 3);
    assert_eq!(h.container.requests().len(), 3);
}

#[tokio::test]
async fn test_default_target_language_when_none_requested() {
    let h = Harness::new(
        FakeRecognizer::scenario_a(),
        FakeTranslator::default(),
        FakeContainer::new(),
    );

    let report = h.run(&[]).await.unwrap();
    assert_eq!(report.lines(), vec!["vi: succeeded"]);
}

#[tokio::test]
async fn test_successful_language_leaves_only_final_artifacts() {
    let h = Harness::new(
        FakeRecognizer::scenario_a(),
        FakeTranslator::default(),
        FakeContainer::new(),
    );

    h.run(&["vi"]).await.unwrap();

    assert_eq!(
        h.output_names(),
        vec![
            "clip_original.srt",
            "clip_vi_translated.mp4",
            "clip_vi_translated.srt",
            "clip_vi_translated_audio.wav",
        ]
    );
}

// ============================================================================
// Per-language failure isolation
// ============================================================================

#[tokio::test]
async fn test_failed_translation_does_not_affect_other_languages() {
    let h = Harness::new(
        FakeRecognizer::scenario_a(),
        FakeTranslator {
            failing: Some("es"),
            ..FakeTranslator::default()
        },
        FakeContainer::new(),
    );

    let report = h.run(&["vi", "es"]).await.unwrap();

    let lines = report.lines();
    assert_eq!(lines[0], "vi: succeeded");
    assert!(lines[1].starts_with("es: failed: TranslationError: "));

    let es = report.language("es").unwrap();
    match &es.outcome {
        LanguageOutcome::Failed { stage, kind, .. } => {
            assert_eq!(*stage, Some(Stage::Translating));
            assert_eq!(kind, "TranslationError");
        }
        other => panic!("expected failure, got {:?}", other),
    }

    assert!(report.original_srt.exists());
    let vi = report.language("vi").and_then(|l| l.artifacts()).unwrap();
    assert!(vi.translated_video.exists());
    assert!(vi.translated_audio.exists());
    assert!(!h.output_dir().join("clip_es_translated.mp4").exists());
    assert!(!h.output_dir().join("clip_es_translated_audio.wav").exists());
    assert!(!h.output_dir().join("clip_es_translated.srt").exists());
}

#[tokio::test]
async fn test_failed_mux_leaves_no_partial_files() {
    let container = FakeContainer {
        fail_mux_for: Some("es"),
        ..FakeContainer::new()
    };
    let h = Harness::new(
        FakeRecognizer::scenario_a(),
        FakeTranslator::default(),
        container,
    );

    let report = h.run(&["es", "vi"]).await.unwrap();

    let es = report.language("es").unwrap();
    assert!(matches!(
        es.outcome,
        LanguageOutcome::Failed {
            stage: Some(Stage::Muxing),
            ..
        }
    ));
    assert!(es.to_string().starts_with("es: failed: MuxError: "));
    assert!(report.language("vi").unwrap().succeeded());

    let names = h.output_names();
    assert!(names.iter().all(|n| !n.contains("_es_")));
    assert!(names.iter().all(|n| !n.starts_with(".autodub-")));
}

// ============================================================================
// Fatal failures
// ============================================================================

#[tokio::test]
async fn test_silent_audio_aborts_before_any_language() {
    let container = FakeContainer {
        silent: true,
        ..FakeContainer::new()
    };
    let h = Harness::new(
        FakeRecognizer::scenario_a(),
        FakeTranslator::default(),
        container,
    );

    let err = h.run(&["vi", "es"]).await.unwrap_err();
    assert_eq!(err.kind(), "MediaError");
    assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 0);
    assert!(h.container.requests().is_empty());
    assert!(h.output_names().is_empty());
}

#[tokio::test]
async fn test_missing_audio_track_is_media_error() {
    let container = FakeContainer {
        has_audio: false,
        ..FakeContainer::new()
    };
    let h = Harness::new(
        FakeRecognizer::scenario_a(),
        FakeTranslator::default(),
        container,
    );

    let err = h.run(&["vi"]).await.unwrap_err();
    assert_eq!(err.kind(), "MediaError");
    assert!(!h.output_dir().exists());
}

#[tokio::test]
async fn test_no_speech_is_transcription_error() {
    let h = Harness::new(
        FakeRecognizer::with_segments(vec![RecognizedSegment::new(
            Duration::ZERO,
            Duration::from_secs(1),
            "   ",
        )]),
        FakeTranslator::default(),
        FakeContainer::new(),
    );

    let err = h.run(&["vi"]).await.unwrap_err();
    assert_eq!(err.kind(), "TranscriptionError");
    assert!(!h.output_dir().exists());
}

#[tokio::test]
async fn test_unsafe_language_code_is_config_error() {
    let h = Harness::new(
        FakeRecognizer::scenario_a(),
        FakeTranslator::default(),
        FakeContainer::new(),
    );

    let err = h.run(&["vi", "../x"]).await.unwrap_err();
    assert_eq!(err.kind(), "ConfigError");
    assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 0);
    assert!(!h.output_dir().exists());
    assert!(!h.dir.path().join("x").exists());
}

#[tokio::test]
async fn test_zero_concurrency_is_rejected() {
    let orchestrator = PipelineOrchestrator::new(
        Config {
            concurrency: 0,
            ..Config::default()
        },
        Arc::new(FakeRecognizer::scenario_a()),
        Arc::new(FakeTranslator::default()),
        Arc::new(FakeSynthesizer),
        Arc::new(FakeContainer::new()),
    );
    let dir = TempDir::new().unwrap();

    let err = orchestrator
        .run(
            &dir.path().join("clip.mp4"),
            &["vi".to_string()],
            dir.path(),
            Arc::new(AtomicBool::new(false)),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ConfigError");
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancelled_before_start() {
    let h = Harness::new(
        FakeRecognizer::scenario_a(),
        FakeTranslator::default(),
        FakeContainer::new(),
    );

    let err = h
        .run_with_flag(&["vi"], Arc::new(AtomicBool::new(true)))
        .await
        .unwrap_err();
    assert!(matches!(err, AutodubError::Cancelled));
    assert_eq!(h.recognizer.calls.load(Ordering::SeqCst), 0);
    assert!(!h.output_dir().exists());
}

#[tokio::test]
async fn test_cancelled_between_language_stages() {
    let cancelled = Arc::new(AtomicBool::new(false));
    let h = Harness::new(
        FakeRecognizer::scenario_a(),
        FakeTranslator {
            cancel_after: Some(cancelled.clone()),
            ..FakeTranslator::default()
        },
        FakeContainer::new(),
    );

    let report = h.run_with_flag(&["vi"], cancelled).await.unwrap();

    let vi = report.language("vi").unwrap();
    assert_eq!(
        vi.outcome,
        LanguageOutcome::Cancelled {
            stage: Stage::Synthesizing
        }
    );
    assert_eq!(vi.to_string(), "vi: cancelled before synthesizing");
    assert!(h.container.requests().is_empty());
    assert_eq!(h.output_names(), vec!["clip_original.srt"]);
}

#[tokio::test]
async fn test_dropping_run_stops_language_tasks() {
    let h = Harness::new(
        FakeRecognizer::scenario_a(),
        FakeTranslator {
            delay: Some(Duration::from_secs(2)),
            ..FakeTranslator::default()
        },
        FakeContainer::new(),
    );

    let outcome = tokio::time::timeout(Duration::from_millis(500), h.run(&["vi", "es"])).await;
    assert!(outcome.is_err());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(h.translator.single_calls.load(Ordering::SeqCst) > 0);
    assert!(!h.translator.finished.load(Ordering::SeqCst));
    assert!(h.container.requests().is_empty());
}
