pub mod gemini;

pub use gemini::GeminiTranslator;

use crate::config::TranslationMode;
use crate::error::{AutodubError, Result, Stage};
use crate::subtitle::{Transcript, TranslatedTranscript};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// One cue's worth of text to translate, with its neighbours as context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
    pub context_before: Option<String>,
    pub context_after: Option<String>,
}

#[async_trait]
pub trait TextTranslator: Send + Sync {
    async fn translate(&self, request: &TranslationRequest) -> Result<String>;

    /// Translate several lines in one call; exactly one output per input.
    async fn translate_batch(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<String>>;

    fn name(&self) -> &'static str;
}

/// Maps a source transcript onto a target language, cue for cue.
pub struct Translator {
    engine: Arc<dyn TextTranslator>,
    mode: TranslationMode,
    timeout: Duration,
}

impl Translator {
    pub fn new(engine: Arc<dyn TextTranslator>, timeout: Duration) -> Self {
        Self {
            engine,
            mode: TranslationMode::default(),
            timeout,
        }
    }

    pub fn with_mode(mut self, mode: TranslationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Translate every cue into `target_lang`.
    ///
    /// Output cue count, indices and timings always equal the source's. Engine
    /// failure, timeout, empty text or a count mismatch is an
    /// [`AutodubError::Translation`].
    pub async fn translate(
        &self,
        transcript: &Transcript,
        target_lang: &str,
    ) -> Result<TranslatedTranscript> {
        info!(
            "[{}] Translating {} cues with {} ({})",
            target_lang,
            transcript.len(),
            self.engine.name(),
            self.mode
        );

        let texts = match self.mode {
            TranslationMode::PerCue => self.translate_per_cue(transcript, target_lang).await?,
            TranslationMode::Batch => self.translate_batch(transcript, target_lang).await?,
        };

        let translated = TranslatedTranscript::from_source(transcript, target_lang, texts)
            .map_err(|e| e.in_stage(Stage::Translating))?;

        debug!("[{}] Translation complete", target_lang);
        Ok(translated)
    }

    async fn translate_per_cue(
        &self,
        transcript: &Transcript,
        target_lang: &str,
    ) -> Result<Vec<String>> {
        let cues = transcript.cues();
        let mut texts = Vec::with_capacity(cues.len());

        for (i, cue) in cues.iter().enumerate() {
            let request = TranslationRequest {
                text: cue.text.clone(),
                source_lang: transcript.language().to_string(),
                target_lang: target_lang.to_string(),
                context_before: i.checked_sub(1).map(|p| cues[p].text.clone()),
                context_after: cues.get(i + 1).map(|n| n.text.clone()),
            };

            let text = self
                .bounded(format!("cue {}", cue.index), self.engine.translate(&request))
                .await?;
            if text.trim().is_empty() {
                return Err(AutodubError::Translation(format!(
                    "{} returned empty text for cue {}",
                    self.engine.name(),
                    cue.index
                )));
            }
            texts.push(text);
        }

        Ok(texts)
    }

    async fn translate_batch(
        &self,
        transcript: &Transcript,
        target_lang: &str,
    ) -> Result<Vec<String>> {
        let lines: Vec<String> = transcript.cues().iter().map(|c| c.text.clone()).collect();
        let texts = self
            .bounded(
                "batch".to_string(),
                self.engine
                    .translate_batch(&lines, transcript.language(), target_lang),
            )
            .await?;

        if texts.len() != lines.len() {
            return Err(AutodubError::Translation(format!(
                "{} returned {} lines for {} cues",
                self.engine.name(),
                texts.len(),
                lines.len()
            )));
        }
        Ok(texts)
    }

    async fn bounded<T>(&self, what: String, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                AutodubError::Translation(format!(
                    "{} timed out after {:.1}s ({what})",
                    self.engine.name(),
                    self.timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| e.in_stage(Stage::Translating))
    }
}
