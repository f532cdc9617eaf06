use crate::align::TimeAligner;
use crate::audio::{check_ffmpeg, check_ffprobe, AudioExtractor, VideoAsset};
use crate::config::Config;
use crate::error::{AutodubError, Result, Stage};
use crate::mux::{ContainerMuxer, FfmpegContainer, Muxer, OutputArtifactSet};
use crate::subtitle::Transcript;
use crate::synthesize::{OpenAiSpeech, SpeechSynthesizer, Synthesizer};
use crate::transcribe::{SpeechRecognizer, Transcriber, WhisperClient, WhisperModel};
use crate::translate::{GeminiTranslator, TextTranslator, Translator};
use futures::future::join_all;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

/// Presentation options that do not change what a run produces.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Show spinners for each stage and language.
    pub show_progress: bool,
}

/// How one requested language ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LanguageOutcome {
    Succeeded(OutputArtifactSet),
    Failed {
        /// `None` when the language task died without reporting a stage.
        stage: Option<Stage>,
        kind: String,
        reason: String,
    },
    /// Stopped at a stage boundary after cancellation was requested.
    Cancelled { stage: Stage },
}

#[derive(Debug, Clone)]
pub struct LanguageReport {
    pub language: String,
    pub outcome: LanguageOutcome,
    pub elapsed: Duration,
    /// Time spent in every stage that completed.
    pub stage_times: Vec<(Stage, Duration)>,
}

impl LanguageReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, LanguageOutcome::Succeeded(_))
    }

    pub fn artifacts(&self) -> Option<&OutputArtifactSet> {
        match &self.outcome {
            LanguageOutcome::Succeeded(artifacts) => Some(artifacts),
            _ => None,
        }
    }
}

impl fmt::Display for LanguageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            LanguageOutcome::Succeeded(_) => write!(f, "{}: succeeded", self.language),
            LanguageOutcome::Failed { kind, reason, .. } => {
                write!(f, "{}: failed: {}: {}", self.language, kind, reason)
            }
            LanguageOutcome::Cancelled { stage } => {
                write!(f, "{}: cancelled before {}", self.language, stage)
            }
        }
    }
}

/// Summary of one pipeline run, in requested-language order.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub input: PathBuf,
    pub source_language: String,
    pub cue_count: usize,
    pub video_duration: Duration,
    /// Written once and shared by every language.
    pub original_srt: PathBuf,
    pub languages: Vec<LanguageReport>,
    pub extraction_time: Duration,
    pub transcription_time: Duration,
    pub total_time: Duration,
}

impl RunReport {
    pub fn language(&self, code: &str) -> Option<&LanguageReport> {
        self.languages.iter().find(|l| l.language == code)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &LanguageReport> {
        self.languages.iter().filter(|l| l.succeeded())
    }

    /// One `"<lang>: <status>"` line per requested language.
    pub fn lines(&self) -> Vec<String> {
        self.languages.iter().map(ToString::to_string).collect()
    }
}

/// Removes the private work directory when the run ends, however it ends.
struct TempCleanupGuard {
    temp_dir: Option<TempDir>,
    cancelled: Arc<AtomicBool>,
}

impl TempCleanupGuard {
    fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }
}

impl Drop for TempCleanupGuard {
    fn drop(&mut self) {
        if let Some(temp_dir) = self.temp_dir.take() {
            let path = temp_dir.path().to_path_buf();
            if self.cancelled.load(Ordering::Relaxed) {
                warn!("Pipeline cancelled, cleaning up temp files: {:?}", path);
            } else {
                debug!("Cleaning up temp directory: {:?}", path);
            }
        }
    }
}

/// Aborts language tasks that are still running when the run itself is dropped.
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Everything a language task needs, shared read-only across tasks.
struct LanguageContext {
    translator: Translator,
    synthesizer: Synthesizer,
    aligner: TimeAligner,
    muxer: Muxer,
    video: VideoAsset,
    transcript: Arc<Transcript>,
    original_srt: PathBuf,
    work_dir: PathBuf,
    cancelled: Arc<AtomicBool>,
}

/// Drives extraction and transcription once, then every language independently.
pub struct PipelineOrchestrator {
    config: Config,
    recognizer: Arc<dyn SpeechRecognizer>,
    translator: Arc<dyn TextTranslator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    container: Arc<dyn ContainerMuxer>,
    options: PipelineOptions,
}

impl PipelineOrchestrator {
    pub fn new(
        config: Config,
        recognizer: Arc<dyn SpeechRecognizer>,
        translator: Arc<dyn TextTranslator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        container: Arc<dyn ContainerMuxer>,
    ) -> Self {
        Self {
            config,
            recognizer,
            translator,
            synthesizer,
            container,
            options: PipelineOptions::default(),
        }
    }

    /// Wire up the hosted engines and ffmpeg from configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;

        check_ffmpeg().map_err(|_| {
            AutodubError::Media(
                "FFmpeg not found. Install it with: brew install ffmpeg (macOS) or apt install ffmpeg (Linux)".to_string()
            )
        })?;
        check_ffprobe()?;

        let openai_key = config.openai_api_key.clone().unwrap_or_default();
        let gemini_key = config.gemini_api_key.clone().unwrap_or_default();
        let whisper_model: WhisperModel = config.whisper_model.parse()?;

        let recognizer = WhisperClient::new(openai_key.clone()).with_model(whisper_model);
        let translator = GeminiTranslator::new(gemini_key).with_model(config.gemini_model.clone());
        let synthesizer = OpenAiSpeech::new(openai_key)
            .with_model(config.tts_model.clone())
            .with_voice(config.tts_voice.clone());

        Ok(Self::new(
            config,
            Arc::new(recognizer),
            Arc::new(translator),
            Arc::new(synthesizer),
            Arc::new(FfmpegContainer::new()),
        ))
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Translate `input` into every language of `targets`.
    ///
    /// Extraction and transcription failures abort the run and are returned as
    /// errors with nothing written. Any later failure is confined to its
    /// language and recorded in the report.
    pub async fn run(
        &self,
        input: &Path,
        targets: &[String],
        output_dir: &Path,
        cancelled: Arc<AtomicBool>,
    ) -> Result<RunReport> {
        let start_time = Instant::now();
        self.config.validate_settings()?;

        let languages = normalize_languages(targets, &self.config.default_target_language)?;
        if languages.is_empty() {
            return Err(AutodubError::Config(
                "No target language requested".to_string(),
            ));
        }
        info!("Target languages: {}", languages.join(", "));

        check_cancelled(&cancelled)?;

        let work_dir = TempDir::new().map_err(|e| {
            AutodubError::Io(std::io::Error::other(format!(
                "Failed to create temp directory: {}",
                e
            )))
        })?;
        let cleanup_guard = TempCleanupGuard {
            temp_dir: Some(work_dir),
            cancelled: cancelled.clone(),
        };
        let work_path = cleanup_guard
            .path()
            .map(Path::to_path_buf)
            .ok_or_else(|| AutodubError::Io(std::io::Error::other("Temp directory missing")))?;
        debug!("Using temp directory: {:?}", work_path);

        let multi_progress = self.options.show_progress.then(MultiProgress::new);

        // ═══════════════════════════════════════════════════════════════════════
        // Stage 1: Audio Extraction
        // ═══════════════════════════════════════════════════════════════════════
        info!("Stage 1/2: Extracting audio from {:?}", input);
        let extraction_start = Instant::now();
        let pb = spinner(multi_progress.as_ref(), "Extracting audio...");

        let video = self
            .container
            .probe(input)
            .await
            .map_err(|e| e.in_stage(Stage::Extracting))?;
        let audio = AudioExtractor::new(self.container.clone())
            .extract(&video, &work_path, &self.config.source_language)
            .await?;

        if let Some(pb) = pb {
            pb.finish_with_message(format!(
                "✓ Audio extracted ({:.1}s)",
                audio.duration.as_secs_f64()
            ));
        }
        let extraction_time = extraction_start.elapsed();

        check_cancelled(&cancelled)?;

        // ═══════════════════════════════════════════════════════════════════════
        // Stage 2: Transcription
        // ═══════════════════════════════════════════════════════════════════════
        info!("Stage 2/2: Transcribing with {}", self.recognizer.name());
        let transcription_start = Instant::now();
        let pb = spinner(multi_progress.as_ref(), "Transcribing...");

        let transcript = Transcriber::new(self.recognizer.clone(), self.config.engine_timeout())
            .transcribe(&audio)
            .await?;

        if let Some(pb) = pb {
            pb.finish_with_message(format!("✓ Transcribed {} cues", transcript.len()));
        }
        let transcription_time = transcription_start.elapsed();

        check_cancelled(&cancelled)?;

        let muxer = Muxer::new(self.container.clone(), output_dir, video.stem());
        let original_srt = muxer
            .write_original_srt(&transcript)
            .await
            .map_err(|e| e.in_stage(Stage::Muxing))?;

        // ═══════════════════════════════════════════════════════════════════════
        // Per-language: translate → synthesize → align → mux
        // ═══════════════════════════════════════════════════════════════════════
        let cue_count = transcript.len();
        let timeout = self.config.engine_timeout();
        let context = Arc::new(LanguageContext {
            translator: Translator::new(self.translator.clone(), timeout)
                .with_mode(self.config.translation_mode),
            synthesizer: Synthesizer::new(self.synthesizer.clone(), timeout)
                .with_mode(self.config.synthesis_mode),
            aligner: TimeAligner::from_config(&self.config, self.container.clone()),
            muxer,
            video: video.clone(),
            transcript: Arc::new(transcript),
            original_srt: original_srt.clone(),
            work_dir: work_path,
            cancelled: cancelled.clone(),
        });

        info!(
            "Processing {} languages (concurrency: {})",
            languages.len(),
            self.config.concurrency
        );
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));

        let handles: Vec<_> = languages
            .iter()
            .map(|language| {
                let context = context.clone();
                let semaphore = semaphore.clone();
                let language = language.clone();
                let pb = spinner(multi_progress.as_ref(), &format!("[{language}] waiting..."));
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    run_language(&context, &language, pb.as_ref()).await
                })
            })
            .collect();
        let _abort_guard = AbortOnDrop(handles.iter().map(JoinHandle::abort_handle).collect());

        let mut reports = Vec::with_capacity(languages.len());
        for (language, joined) in languages.iter().zip(join_all(handles).await) {
            let report = joined.unwrap_or_else(|e| {
                warn!("[{}] Language task died: {}", language, e);
                LanguageReport {
                    language: language.clone(),
                    outcome: LanguageOutcome::Failed {
                        stage: None,
                        kind: "InternalError".to_string(),
                        reason: e.to_string(),
                    },
                    elapsed: Duration::ZERO,
                    stage_times: Vec::new(),
                }
            });
            info!("{}", report);
            reports.push(report);
        }

        drop(cleanup_guard);

        Ok(RunReport {
            input: input.to_path_buf(),
            source_language: self.config.source_language.clone(),
            cue_count,
            video_duration: video.duration,
            original_srt,
            languages: reports,
            extraction_time,
            transcription_time,
            total_time: start_time.elapsed(),
        })
    }
}

fn check_cancelled(cancelled: &AtomicBool) -> Result<()> {
    if cancelled.load(Ordering::Relaxed) {
        return Err(AutodubError::Cancelled);
    }
    Ok(())
}

fn spinner(multi_progress: Option<&MultiProgress>, message: &str) -> Option<ProgressBar> {
    multi_progress.map(|mp| {
        let pb = mp.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    })
}

/// Why a language stopped before producing its artifacts.
enum Stop {
    Cancelled(Stage),
    Failed(Stage, AutodubError),
}

struct StageClock {
    stage_times: Vec<(Stage, Duration)>,
}

impl StageClock {
    fn enter(
        &self,
        context: &LanguageContext,
        language: &str,
        stage: Stage,
        pb: Option<&ProgressBar>,
    ) -> std::result::Result<Instant, Stop> {
        if context.cancelled.load(Ordering::Relaxed) {
            return Err(Stop::Cancelled(stage));
        }
        info!("[{}] {}", language, stage);
        if let Some(pb) = pb {
            pb.set_message(format!("[{language}] {stage}..."));
        }
        Ok(Instant::now())
    }

    fn leave(&mut self, stage: Stage, started: Instant) {
        self.stage_times.push((stage, started.elapsed()));
    }
}

async fn run_language(
    context: &LanguageContext,
    language: &str,
    pb: Option<&ProgressBar>,
) -> LanguageReport {
    let started = Instant::now();
    let mut clock = StageClock {
        stage_times: Vec::new(),
    };

    let outcome = match language_stages(context, language, pb, &mut clock).await {
        Ok(artifacts) => {
            if let Some(pb) = pb {
                pb.finish_with_message(format!("✓ [{language}] done"));
            }
            LanguageOutcome::Succeeded(artifacts)
        }
        Err(Stop::Cancelled(stage)) => {
            warn!("[{}] Cancelled before {}", language, stage);
            if let Some(pb) = pb {
                pb.abandon_with_message(format!("✗ [{language}] cancelled"));
            }
            LanguageOutcome::Cancelled { stage }
        }
        Err(Stop::Failed(stage, error)) => {
            warn!("[{}] Failed while {}: {}", language, stage, error);
            if let Some(pb) = pb {
                pb.abandon_with_message(format!("✗ [{language}] {}", error.kind()));
            }
            LanguageOutcome::Failed {
                stage: Some(stage),
                kind: error.kind().to_string(),
                reason: error.reason(),
            }
        }
    };

    LanguageReport {
        language: language.to_string(),
        outcome,
        elapsed: started.elapsed(),
        stage_times: clock.stage_times,
    }
}

async fn language_stages(
    context: &LanguageContext,
    language: &str,
    pb: Option<&ProgressBar>,
    clock: &mut StageClock,
) -> std::result::Result<OutputArtifactSet, Stop> {
    let fail = |stage: Stage| move |e: AutodubError| Stop::Failed(stage, e.in_stage(stage));

    let t = clock.enter(context, language, Stage::Translating, pb)?;
    let translated = context
        .translator
        .translate(&context.transcript, language)
        .await
        .map_err(fail(Stage::Translating))?;
    clock.leave(Stage::Translating, t);

    let t = clock.enter(context, language, Stage::Synthesizing, pb)?;
    let speech = context
        .synthesizer
        .synthesize(&translated)
        .await
        .map_err(fail(Stage::Synthesizing))?;
    clock.leave(Stage::Synthesizing, t);

    let t = clock.enter(context, language, Stage::Aligning, pb)?;
    let language_dir = context.work_dir.join(language);
    tokio::fs::create_dir_all(&language_dir)
        .await
        .map_err(AutodubError::from)
        .map_err(fail(Stage::Aligning))?;
    let aligned = context
        .aligner
        .align(
            &translated,
            &speech,
            context.video.duration,
            &language_dir.join("aligned.wav"),
        )
        .await
        .map_err(fail(Stage::Aligning))?;
    clock.leave(Stage::Aligning, t);

    let t = clock.enter(context, language, Stage::Muxing, pb)?;
    let artifacts = context
        .muxer
        .mux(&context.video, &aligned, &context.original_srt)
        .await
        .map_err(fail(Stage::Muxing))?;
    clock.leave(Stage::Muxing, t);

    Ok(artifacts)
}

/// Trim, lower-case and strip region suffixes (`pt-BR` → `pt`), dropping
/// duplicates. Falls back to `default` when nothing usable was requested.
///
/// Codes end up in file and directory names, so anything left that is not
/// ASCII letters and digits is a configuration error.
pub fn normalize_languages(requested: &[String], default: &str) -> Result<Vec<String>> {
    let normalize = |code: &str| {
        code.trim()
            .to_lowercase()
            .split(&['-', '_'][..])
            .next()
            .unwrap_or_default()
            .to_string()
    };

    let check = |code: String| {
        if code
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            Ok(code)
        } else {
            Err(AutodubError::Config(format!(
                "Invalid language code: {:?}",
                code
            )))
        }
    };

    let mut languages: Vec<String> = Vec::new();
    for code in requested.iter().map(|c| normalize(c)) {
        if !code.is_empty() && !languages.contains(&code) {
            languages.push(check(code)?);
        }
    }

    if languages.is_empty() {
        let fallback = normalize(default);
        if !fallback.is_empty() {
            languages.push(check(fallback)?);
        }
    }
    Ok(languages)
}

/// Print a summary of the run.
pub fn print_summary(report: &RunReport) {
    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("                      Video Translation Complete               ");
    println!("═══════════════════════════════════════════════════════════════");
    println!();
    println!("  Input:      {}", report.input.display());
    println!(
        "  Source:     {} ({} cues, {:.1}s video)",
        report.source_language,
        report.cue_count,
        report.video_duration.as_secs_f64()
    );
    println!("  Original:   {}", report.original_srt.display());
    println!();
    println!("  Languages:");
    for language in &report.languages {
        println!("    {}", language);
        if let Some(artifacts) = language.artifacts() {
            println!("      video:     {}", artifacts.translated_video.display());
            println!("      audio:     {}", artifacts.translated_audio.display());
            println!("      subtitles: {}", artifacts.translated_srt.display());
        }
    }
    println!();
    println!("  Timing:");
    println!("    Extract:     {:.2}s", report.extraction_time.as_secs_f64());
    println!(
        "    Transcribe:  {:.2}s",
        report.transcription_time.as_secs_f64()
    );
    for language in &report.languages {
        println!(
            "    [{}]:        {:.2}s",
            language.language,
            language.elapsed.as_secs_f64()
        );
    }
    println!("    Total:       {:.2}s", report.total_time.as_secs_f64());
    println!();
    println!("═══════════════════════════════════════════════════════════════");
}
