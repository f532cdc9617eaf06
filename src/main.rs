use anyhow::{Context, Result};
use autodub::config::Config;
use autodub::pipeline::{print_summary, PipelineOptions, PipelineOrchestrator};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "autodub")]
#[command(version, about = "Translate and dub short videos using AI")]
#[command(
    long_about = "Transcribe a video with OpenAI Whisper, translate the captions with Google Gemini, \
synthesize translated speech with OpenAI TTS, and mux it back with burned-in subtitles."
)]
struct Cli {
    /// Input video file
    input: PathBuf,

    /// Target language code (e.g., vi, es, ja)
    #[arg(short = 't', long)]
    target_lang: Option<String>,

    /// Comma-separated target languages; takes precedence over --target-lang
    #[arg(long, value_delimiter = ',')]
    target_langs: Vec<String>,

    /// Directory for translated videos, audio and subtitles
    #[arg(short, long, default_value = "data/output")]
    output_dir: PathBuf,

    /// Gemini model used for translation
    #[arg(short, long)]
    model: Option<String>,

    /// Target language used when none is requested
    #[arg(long)]
    default_lang: Option<String>,

    /// Number of languages processed at once
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn targets(&self) -> Vec<String> {
        if !self.target_langs.is_empty() {
            self.target_langs.clone()
        } else {
            self.target_lang.iter().cloned().collect()
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if !cli.input.exists() {
        anyhow::bail!("Input file not found: {}", cli.input.display());
    }

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(ref model) = cli.model {
        config.gemini_model = model.clone();
    }
    if let Some(ref lang) = cli.default_lang {
        config.default_target_language = lang.clone();
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }

    let targets = cli.targets();
    info!("Input:      {}", cli.input.display());
    info!("Output dir: {}", cli.output_dir.display());
    info!("Model:      {}", config.gemini_model);
    info!("Alignment:  {}", config.alignment);

    let orchestrator = PipelineOrchestrator::from_config(config)
        .context("Configuration validation failed")?
        .with_options(PipelineOptions {
            show_progress: std::io::stdout().is_terminal(),
        });

    let cancelled = Arc::new(AtomicBool::new(false));
    let handler_flag = cancelled.clone();
    ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::Relaxed) {
            std::process::exit(130);
        }
        warn!("Cancellation requested, finishing current stage (press Ctrl+C again to abort)");
    })
    .context("Failed to install Ctrl+C handler")?;

    let report = orchestrator
        .run(&cli.input, &targets, &cli.output_dir, cancelled)
        .await
        .context("Video translation failed")?;

    print_summary(&report);

    for line in report.lines() {
        info!("{}", line);
    }

    Ok(())
}
