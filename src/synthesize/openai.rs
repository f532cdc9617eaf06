use crate::audio::PcmAudio;
use crate::error::{AutodubError, Result};
use crate::synthesize::SpeechSynthesizer;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// `response_format = "pcm"` is 24 kHz 16-bit little-endian mono.
pub const OPENAI_PCM_SAMPLE_RATE: u32 = 24_000;

/// The speech endpoint rejects longer inputs.
const MAX_INPUT_CHARS: usize = 4096;

/// OpenAI text-to-speech client.
pub struct OpenAiSpeech {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    voice: String,
}

impl OpenAiSpeech {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: OPENAI_API_BASE.to_string(),
            model: "tts-1".to_string(),
            voice: "nova".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/speech", self.base_url)
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str, language: &str) -> Result<PcmAudio> {
        if text.chars().count() > MAX_INPUT_CHARS {
            return Err(AutodubError::Synthesis(format!(
                "Input of {} characters exceeds the {} character limit",
                text.chars().count(),
                MAX_INPUT_CHARS
            )));
        }

        // The voice model infers the language from the text itself
        debug!("Requesting {} speech for {} characters", language, text.len());

        let request = SpeechRequest {
            model: &self.model,
            voice: &self.voice,
            input: text,
            response_format: "pcm",
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AutodubError::Synthesis(format!("Speech request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                return Err(AutodubError::Synthesis(format!(
                    "OpenAI speech error: {}",
                    api_error.error.message
                )));
            }
            return Err(AutodubError::Synthesis(format!(
                "OpenAI speech error ({}): {}",
                status, body
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AutodubError::Synthesis(format!("Failed to read audio: {}", e)))?;

        let audio = PcmAudio::from_le_bytes(&bytes, OPENAI_PCM_SAMPLE_RATE);
        debug!("Received {:.2}s of speech", audio.duration().as_secs_f64());
        Ok(audio)
    }

    fn name(&self) -> &'static str {
        "OpenAI TTS"
    }
}
