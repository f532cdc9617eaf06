use crate::error::{AutodubError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// How a synthesized clip that overruns its caption window is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlignmentMode {
    /// Push the cue's end (and every later cue) back by the overrun.
    #[default]
    Extend,
    /// Speed the clip up to fit, truncating past the rate bound.
    Stretch,
}

impl std::fmt::Display for AlignmentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlignmentMode::Extend => write!(f, "extend"),
            AlignmentMode::Stretch => write!(f, "stretch"),
        }
    }
}

impl std::str::FromStr for AlignmentMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "extend" => Ok(AlignmentMode::Extend),
            "stretch" => Ok(AlignmentMode::Stretch),
            _ => Err(format!(
                "Unknown alignment mode: {}. Use 'extend' or 'stretch'",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SynthesisMode {
    /// One clip per cue.
    #[default]
    PerCue,
    /// The whole translated script in a single clip.
    WholeTrack,
}

impl std::fmt::Display for SynthesisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SynthesisMode::PerCue => write!(f, "per-cue"),
            SynthesisMode::WholeTrack => write!(f, "whole-track"),
        }
    }
}

impl std::str::FromStr for SynthesisMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per-cue" | "percue" | "cue" => Ok(SynthesisMode::PerCue),
            "whole-track" | "wholetrack" | "track" => Ok(SynthesisMode::WholeTrack),
            _ => Err(format!(
                "Unknown synthesis mode: {}. Use 'per-cue' or 'whole-track'",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TranslationMode {
    /// One engine call per cue, with neighbouring cues as context.
    #[default]
    PerCue,
    /// One numbered engine call for the whole transcript.
    Batch,
}

impl std::fmt::Display for TranslationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranslationMode::PerCue => write!(f, "per-cue"),
            TranslationMode::Batch => write!(f, "batch"),
        }
    }
}

impl std::str::FromStr for TranslationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per-cue" | "percue" | "cue" => Ok(TranslationMode::PerCue),
            "batch" => Ok(TranslationMode::Batch),
            _ => Err(format!(
                "Unknown translation mode: {}. Use 'per-cue' or 'batch'",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    /// Gemini model used for translation.
    pub gemini_model: String,
    pub whisper_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub source_language: String,
    /// Used when no target language is requested.
    pub default_target_language: String,
    /// Maximum number of language blocks running at once.
    pub concurrency: usize,
    /// Bounded wait for every external engine call, in seconds.
    pub engine_timeout_secs: u64,
    pub translation_mode: TranslationMode,
    pub synthesis_mode: SynthesisMode,
    pub alignment: AlignmentMode,
    /// Fastest playback rate the stretch policy may apply.
    pub max_stretch_rate: f64,
    /// Relative divergence tolerated before whole-track cues are retimed.
    pub whole_track_tolerance: f64,
    /// Total speech longer than this multiple of the video is a malfunction.
    pub max_duration_ratio: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            gemini_api_key: None,
            gemini_model: "gemini-1.5-flash".to_string(),
            whisper_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "nova".to_string(),
            source_language: "en".to_string(),
            default_target_language: "vi".to_string(),
            concurrency: 4,
            engine_timeout_secs: 60,
            translation_mode: TranslationMode::default(),
            synthesis_mode: SynthesisMode::default(),
            alignment: AlignmentMode::default(),
            max_stretch_rate: 1.5,
            whole_track_tolerance: 0.10,
            max_duration_ratio: 3.0,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        // Load from config file if it exists
        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                config = toml::from_str::<Config>(&contents).map_err(|e| {
                    AutodubError::Config(format!(
                        "Failed to parse {}: {}",
                        config_path.display(),
                        e
                    ))
                })?;
            }
        }

        config.apply_env();
        Ok(config)
    }

    /// Override fields from environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.openai_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            self.gemini_api_key = Some(key);
        }
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            if !model.trim().is_empty() {
                self.gemini_model = model;
            }
        }
        if let Ok(lang) = std::env::var("TARGET_LANGUAGE") {
            if !lang.trim().is_empty() {
                self.default_target_language = lang;
            }
        }
        if let Ok(concurrency) = std::env::var("AUTODUB_CONCURRENCY") {
            if let Ok(c) = concurrency.parse() {
                self.concurrency = c;
            }
        }
        if let Ok(timeout) = std::env::var("AUTODUB_TIMEOUT_SECS") {
            if let Ok(t) = timeout.parse() {
                self.engine_timeout_secs = t;
            }
        }
        if let Ok(mode) = std::env::var("AUTODUB_ALIGNMENT") {
            if let Ok(m) = mode.parse() {
                self.alignment = m;
            }
        }
        if let Ok(mode) = std::env::var("AUTODUB_SYNTHESIS") {
            if let Ok(m) = mode.parse() {
                self.synthesis_mode = m;
            }
        }
        if let Ok(mode) = std::env::var("AUTODUB_TRANSLATION") {
            if let Ok(m) = mode.parse() {
                self.translation_mode = m;
            }
        }
    }

    /// Check tunables that every pipeline run depends on.
    pub fn validate_settings(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(AutodubError::Config(
                "Concurrency must be greater than 0".to_string(),
            ));
        }
        if self.engine_timeout_secs == 0 {
            return Err(AutodubError::Config(
                "Engine timeout must be greater than 0".to_string(),
            ));
        }
        if self.max_stretch_rate <= 1.0 {
            return Err(AutodubError::Config(format!(
                "max_stretch_rate must be above 1.0 (got {})",
                self.max_stretch_rate
            )));
        }
        if self.whole_track_tolerance < 0.0 {
            return Err(AutodubError::Config(
                "whole_track_tolerance must not be negative".to_string(),
            ));
        }
        if self.max_duration_ratio <= 1.0 {
            return Err(AutodubError::Config(format!(
                "max_duration_ratio must be above 1.0 (got {})",
                self.max_duration_ratio
            )));
        }
        if self.default_target_language.trim().is_empty() {
            return Err(AutodubError::Config(
                "Default target language must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Full validation for runs against the hosted engines.
    pub fn validate(&self) -> Result<()> {
        if self.openai_api_key.is_none() {
            return Err(AutodubError::Config(
                "OPENAI_API_KEY not set. Export it with: export OPENAI_API_KEY=sk-...".to_string(),
            ));
        }
        if self.gemini_api_key.is_none() {
            return Err(AutodubError::Config(
                "GEMINI_API_KEY not set. Get one at https://aistudio.google.com/apikey"
                    .to_string(),
            ));
        }
        self.validate_settings()
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("autodub").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_mode_parsing() {
        assert_eq!("extend".parse::<AlignmentMode>().unwrap(), AlignmentMode::Extend);
        assert_eq!("STRETCH".parse::<AlignmentMode>().unwrap(), AlignmentMode::Stretch);
        assert!("squash".parse::<AlignmentMode>().is_err());
    }

    #[test]
    fn test_synthesis_mode_parsing() {
        assert_eq!("per-cue".parse::<SynthesisMode>().unwrap(), SynthesisMode::PerCue);
        assert_eq!(
            "whole-track".parse::<SynthesisMode>().unwrap(),
            SynthesisMode::WholeTrack
        );
        assert!("chunked".parse::<SynthesisMode>().is_err());
    }

    #[test]
    fn test_translation_mode_parsing() {
        assert_eq!("batch".parse::<TranslationMode>().unwrap(), TranslationMode::Batch);
        assert_eq!("cue".parse::<TranslationMode>().unwrap(), TranslationMode::PerCue);
        assert!("blob".parse::<TranslationMode>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gemini_model, "gemini-1.5-flash");
        assert_eq!(config.default_target_language, "vi");
        assert_eq!(config.alignment, AlignmentMode::Extend);
        assert_eq!(config.synthesis_mode, SynthesisMode::PerCue);
        assert_eq!(config.engine_timeout(), Duration::from_secs(60));
        assert_eq!(config.concurrency, 4);
    }

    #[test]
    fn test_validate_missing_api_keys() {
        let mut config = Config::default();
        assert!(config.validate().is_err());

        config.openai_api_key = Some("sk-test".to_string());
        assert!(config.validate().is_err());

        config.gemini_api_key = Some("test-key".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_settings_rejects_bad_values() {
        let mut config = Config::default();
        config.concurrency = 0;
        assert!(config.validate_settings().is_err());

        let mut config = Config::default();
        config.max_stretch_rate = 1.0;
        assert!(config.validate_settings().is_err());

        let mut config = Config::default();
        config.engine_timeout_secs = 0;
        assert!(config.validate_settings().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            gemini_model = "gemini-2.0-flash"
            alignment = "stretch"
            synthesis_mode = "whole-track"
            "#,
        )
        .unwrap();
        assert_eq!(config.gemini_model, "gemini-2.0-flash");
        assert_eq!(config.alignment, AlignmentMode::Stretch);
        assert_eq!(config.synthesis_mode, SynthesisMode::WholeTrack);
        assert_eq!(config.default_target_language, "vi");
    }
}
