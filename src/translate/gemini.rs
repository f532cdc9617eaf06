//! Gemini-based translation using the Generative AI API.

use crate::error::{AutodubError, Result};
use crate::translate::{TextTranslator, TranslationRequest};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Translator using Google Gemini API.
pub struct GeminiTranslator {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiTranslator {
    /// Create a new Gemini translator with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: "gemini-1.5-flash".to_string(),
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    /// Set a different model (e.g., "gemini-1.5-pro").
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }

    /// Prompt for a single cue, with the surrounding cues for context only.
    fn build_prompt(&self, request: &TranslationRequest) -> String {
        let source = language_code_to_name(&request.source_lang);
        let target = language_code_to_name(&request.target_lang);

        let mut prompt = format!(
            "Translate the following subtitle line from {source} to {target}.\n\
             Return ONLY the translated line, nothing else.\n"
        );

        if request.context_before.is_some() || request.context_after.is_some() {
            prompt.push_str(
                "The neighbouring lines are given for context. Do not translate or include them.\n",
            );
            if let Some(ref before) = request.context_before {
                prompt.push_str(&format!("Previous line: {before}\n"));
            }
            if let Some(ref after) = request.context_after {
                prompt.push_str(&format!("Next line: {after}\n"));
            }
        }

        prompt.push_str(&format!("\nLine to translate:\n{}", request.text));
        prompt
    }

    fn build_batch_prompt(&self, texts: &[String], source_lang: &str, target_lang: &str) -> String {
        let source = language_code_to_name(source_lang);
        let target = language_code_to_name(target_lang);

        let numbered_texts: String = texts
            .iter()
            .enumerate()
            .map(|(i, t)| format!("[{}] {}", i + 1, t.replace('\n', " ")))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Translate each of the following numbered subtitle lines from {source} to {target}.\n\
             Return exactly {count} lines in the same numbered format, one translation per number. \
             Do not merge or split lines.\n\n\
             Lines to translate:\n{numbered_texts}",
            count = texts.len()
        )
    }

    async fn generate(&self, prompt: String) -> Result<String> {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| AutodubError::Translation(format!("Translation request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AutodubError::Translation(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(AutodubError::Translation(format!(
                "Translation API error ({}): {}",
                status, body
            )));
        }

        let gemini_response: GeminiResponse = serde_json::from_str(&body).map_err(|e| {
            AutodubError::Translation(format!("Failed to parse translation response: {}", e))
        })?;

        if let Some(error) = gemini_response.error {
            return Err(AutodubError::Translation(format!(
                "Gemini error: {}",
                error.message
            )));
        }

        let text = gemini_response
            .candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content)
            .and_then(|c| c.parts)
            .and_then(|p| p.into_iter().next())
            .and_then(|p| p.text)
            .unwrap_or_default();

        Ok(text.trim().to_string())
    }
}

fn numbered_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\[?(\d+)[\]\.\):]\s*(.*)$").expect("numbered line pattern is valid")
    })
}

/// Parse a numbered batch response into exactly `count` lines.
///
/// Unnumbered lines continue the previous numbered line. Missing, duplicate
/// or out-of-range numbers are a translation error; nothing is padded.
fn parse_batch_response(response: &str, count: usize) -> Result<Vec<String>> {
    let mut by_number: BTreeMap<usize, String> = BTreeMap::new();
    let mut current: Option<usize> = None;

    for line in response.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(caps) = numbered_line().captures(line) {
            let number: usize = caps[1].parse().map_err(|_| {
                AutodubError::Translation(format!("Bad line number in response: {line}"))
            })?;
            if number == 0 || number > count {
                return Err(AutodubError::Translation(format!(
                    "Response line number {number} outside 1..={count}"
                )));
            }
            if by_number.contains_key(&number) {
                return Err(AutodubError::Translation(format!(
                    "Response repeats line number {number}"
                )));
            }
            by_number.insert(number, caps[2].trim().to_string());
            current = Some(number);
        } else if let Some(n) = current {
            if let Some(text) = by_number.get_mut(&n) {
                text.push(' ');
                text.push_str(line.trim());
            }
        }
    }

    if by_number.len() != count {
        return Err(AutodubError::Translation(format!(
            "Expected {} numbered lines, got {}",
            count,
            by_number.len()
        )));
    }

    Ok(by_number.into_values().collect())
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Deserialize, Debug)]
struct GeminiResponseContent {
    parts: Option<Vec<GeminiResponsePart>>,
}

#[derive(Deserialize, Debug)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

#[async_trait]
impl TextTranslator for GeminiTranslator {
    async fn translate(&self, request: &TranslationRequest) -> Result<String> {
        debug!("Translating one line to {}", request.target_lang);

        let translated = self.generate(self.build_prompt(request)).await?;
        if translated.is_empty() {
            return Err(AutodubError::Translation(
                "Gemini returned an empty translation".to_string(),
            ));
        }
        Ok(translated)
    }

    async fn translate_batch(
        &self,
        texts: &[String],
        source_lang: &str,
        target_lang: &str,
    ) -> Result<Vec<String>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        debug!("Translating {} lines to {}", texts.len(), target_lang);

        let response = self
            .generate(self.build_batch_prompt(texts, source_lang, target_lang))
            .await?;
        parse_batch_response(&response, texts.len())
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

/// Convert language code to human-readable name for better prompting.
fn language_code_to_name(code: &str) -> &'static str {
    let lowercase = code.to_lowercase();
    let primary = lowercase.split('-').next().unwrap_or_default();
    match primary {
        "en" => "English",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "ja" => "Japanese",
        "ko" => "Korean",
        "zh" => "Chinese",
        "ar" => "Arabic",
        "hi" => "Hindi",
        "th" => "Thai",
        "vi" => "Vietnamese",
        "id" => "Indonesian",
        "ms" => "Malay",
        "tl" => "Tagalog",
        "nl" => "Dutch",
        "pl" => "Polish",
        "tr" => "Turkish",
        "uk" => "Ukrainian",
        "cs" => "Czech",
        "sv" => "Swedish",
        "da" => "Danish",
        "fi" => "Finnish",
        "no" => "Norwegian",
        "el" => "Greek",
        "he" => "Hebrew",
        "hu" => "Hungarian",
        "ro" => "Romanian",
        "bn" => "Bengali",
        _ => "the target language",
    }
}
