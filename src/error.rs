use std::fmt;
use thiserror::Error;

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Extracting,
    Transcribing,
    Translating,
    Synthesizing,
    Aligning,
    Muxing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extracting => write!(f, "extracting"),
            Stage::Transcribing => write!(f, "transcribing"),
            Stage::Translating => write!(f, "translating"),
            Stage::Synthesizing => write!(f, "synthesizing"),
            Stage::Aligning => write!(f, "aligning"),
            Stage::Muxing => write!(f, "muxing"),
        }
    }
}

#[derive(Error, Debug)]
pub enum AutodubError {
    #[error("Media error: {0}")]
    Media(String),

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Translation failed: {0}")]
    Translation(String),

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("Alignment failed: {0}")]
    Alignment(String),

    #[error("Mux failed: {0}")]
    Mux(String),

    #[error("Invalid transcript: {0}")]
    InvalidTranscript(String),

    #[error("Audio processing error: {0}")]
    Audio(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl AutodubError {
    /// Name of the error kind as shown in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            AutodubError::Media(_) => "MediaError",
            AutodubError::Transcription(_) => "TranscriptionError",
            AutodubError::Translation(_) => "TranslationError",
            AutodubError::Synthesis(_) => "SynthesisError",
            AutodubError::Alignment(_) => "AlignmentError",
            AutodubError::Mux(_) => "MuxError",
            AutodubError::InvalidTranscript(_) => "InvalidTranscript",
            AutodubError::Audio(_) => "AudioError",
            AutodubError::Config(_) => "ConfigError",
            AutodubError::Cancelled => "Cancelled",
            AutodubError::Io(_) => "IoError",
            AutodubError::Http(_) => "HttpError",
            AutodubError::Json(_) => "JsonError",
            AutodubError::Wav(_) => "WavError",
        }
    }

    /// The underlying reason without the kind prefix.
    pub fn reason(&self) -> String {
        match self {
            AutodubError::Media(msg)
            | AutodubError::Transcription(msg)
            | AutodubError::Translation(msg)
            | AutodubError::Synthesis(msg)
            | AutodubError::Alignment(msg)
            | AutodubError::Mux(msg)
            | AutodubError::InvalidTranscript(msg)
            | AutodubError::Audio(msg)
            | AutodubError::Config(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// Re-label an error raised while running `stage` with that stage's kind.
    ///
    /// Errors that already belong to the taxonomy, and cancellation, pass
    /// through untouched.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            AutodubError::Media(_)
            | AutodubError::Transcription(_)
            | AutodubError::Translation(_)
            | AutodubError::Synthesis(_)
            | AutodubError::Alignment(_)
            | AutodubError::Mux(_)
            | AutodubError::Cancelled => self,
            other => {
                let reason = other.to_string();
                match stage {
                    Stage::Extracting => AutodubError::Media(reason),
                    Stage::Transcribing => AutodubError::Transcription(reason),
                    Stage::Translating => AutodubError::Translation(reason),
                    Stage::Synthesizing => AutodubError::Synthesis(reason),
                    Stage::Aligning => AutodubError::Alignment(reason),
                    Stage::Muxing => AutodubError::Mux(reason),
                }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, AutodubError>;
