pub mod align;
pub mod audio;
pub mod config;
pub mod error;
pub mod mux;
pub mod pipeline;
pub mod subtitle;
pub mod synthesize;
pub mod transcribe;
pub mod translate;

pub use config::Config;
pub use error::{AutodubError, Result, Stage};
pub use pipeline::{
    normalize_languages, print_summary, LanguageOutcome, LanguageReport, PipelineOptions,
    PipelineOrchestrator, RunReport,
};
