use crate::audio::AudioSegment;
use crate::error::{AutodubError, Result};
use crate::transcribe::{RecognizedSegment, SpeechRecognizer};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

/// OpenAI API base; the transcription endpoint lives under it.
const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Maximum file size for Whisper API (25 MB).
const MAX_FILE_SIZE: u64 = 25 * 1024 * 1024;

/// Whisper model variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WhisperModel {
    #[default]
    Whisper1,
    Gpt4oTranscribe,
    Gpt4oMiniTranscribe,
}

impl WhisperModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhisperModel::Whisper1 => "whisper-1",
            WhisperModel::Gpt4oTranscribe => "gpt-4o-transcribe",
            WhisperModel::Gpt4oMiniTranscribe => "gpt-4o-mini-transcribe",
        }
    }
}

impl std::str::FromStr for WhisperModel {
    type Err = AutodubError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "whisper-1" => Ok(WhisperModel::Whisper1),
            "gpt-4o-transcribe" => Ok(WhisperModel::Gpt4oTranscribe),
            "gpt-4o-mini-transcribe" => Ok(WhisperModel::Gpt4oMiniTranscribe),
            other => Err(AutodubError::Config(format!(
                "Unknown transcription model: {other}"
            ))),
        }
    }
}

/// OpenAI Whisper API client.
pub struct WhisperClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: WhisperModel,
}

impl WhisperClient {
    /// Create a new Whisper client with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: OPENAI_API_BASE.to_string(),
            model: WhisperModel::default(),
        }
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: WhisperModel) -> Self {
        self.model = model;
        self
    }

    /// Point the client at a different API base (e.g. a proxy or a test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url)
    }

    /// Multipart upload for one audio track. The extractor always produces WAV.
    async fn upload_form(&self, audio: &AudioSegment) -> Result<Form> {
        let wav = fs::read(&audio.path).await?;
        let name = audio
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "source_audio.wav".to_string());

        let mut form = Form::new()
            .part("file", Part::bytes(wav).file_name(name).mime_str("audio/wav")?)
            .text("model", self.model.as_str())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment");

        if !audio.language.is_empty() {
            form = form.text("language", audio.language.clone());
        }
        Ok(form)
    }

    async fn post(&self, form: Form) -> Result<WhisperResponse> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AutodubError::Transcription(format!("Whisper request failed: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        debug!("Whisper replied {}: {}", status, truncate(&body, 500));

        if !status.is_success() {
            let reason = serde_json::from_str::<ApiErrorResponse>(&body)
                .map(|e| format!("{} ({})", e.error.message, e.error.r#type))
                .unwrap_or_else(|_| format!("{status}: {body}"));
            return Err(AutodubError::Transcription(format!(
                "Whisper API error: {reason}"
            )));
        }

        serde_json::from_str(&body).map_err(|e| {
            AutodubError::Transcription(format!("Unreadable Whisper response: {e}"))
        })
    }

    /// Convert a Whisper response into raw segments.
    ///
    /// Without segment timestamps the whole text becomes one segment spanning
    /// the full track.
    fn parse_response(&self, response: WhisperResponse, total: Duration) -> Vec<RecognizedSegment> {
        match response.segments {
            Some(api_segments) if !api_segments.is_empty() => api_segments
                .into_iter()
                .map(|seg| {
                    RecognizedSegment::new(
                        seconds(seg.start),
                        seconds(seg.end),
                        seg.text.trim(),
                    )
                })
                .collect(),
            _ => {
                let end = response.duration.map(seconds).unwrap_or(total);
                vec![RecognizedSegment::new(
                    Duration::ZERO,
                    if end.is_zero() { total } else { end },
                    response.text.trim(),
                )]
            }
        }
    }
}

/// Negative or non-finite engine times clamp to zero.
fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperClient {
    async fn recognize(&self, audio: &AudioSegment) -> Result<Vec<RecognizedSegment>> {
        debug!("Transcribing {:?} with Whisper", audio.path);

        let size = fs::metadata(&audio.path).await?.len();
        if size > MAX_FILE_SIZE {
            return Err(AutodubError::Transcription(format!(
                "{} is {size} bytes, over the {MAX_FILE_SIZE} byte upload limit",
                audio.path.display()
            )));
        }

        let form = self.upload_form(audio).await?;
        let response = self.post(form).await?;
        let segments = self.parse_response(response, audio.duration);

        debug!("Whisper returned {} segments", segments.len());
        Ok(segments)
    }

    fn name(&self) -> &'static str {
        "OpenAI Whisper"
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    segments: Option<Vec<WhisperSegment>>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    r#type: String,
}
