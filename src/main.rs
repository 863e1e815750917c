use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use po_translator::models::chat::{BatchTranslator, ChatTranslator};
use po_translator::models::mt::{DisabledTranslator, GoogleWebTranslator, MachineTranslator};
use po_translator::pipeline::trace::TraceWriter;
use po_translator::pipeline::{
    collect_inputs, init_default_config, Overrides, PipelineConfig, TranslatorPipeline,
};
use po_translator::progress::ConsoleProgress;

#[derive(Parser, Debug)]
#[command(name = "po-translator")]
#[command(about = "Batch-translate gettext .po catalogs with an LLM and a machine-translation fallback", long_about = None)]
struct Args {
    /// Catalogs to translate (default: every matching file in the input directory)
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Directory scanned for catalogs when no FILE is given (default: uploaded)
    #[arg(long, value_name = "DIR")]
    input_dir: Option<PathBuf>,

    /// File-name suffix of catalogs in the input directory (default: .txt)
    #[arg(long)]
    suffix: Option<String>,

    /// Config file path (default: search for po-translator.toml upwards, or PO_TRANSLATOR_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Chat model name
    #[arg(long)]
    model: Option<String>,

    /// OpenAI-compatible base URL (".../v1")
    #[arg(long)]
    base_url: Option<String>,

    /// Entries sent to the chat model per request
    #[arg(long)]
    batch_size: Option<usize>,

    /// Extra chat rounds for entries whose answer echoes the source
    #[arg(long)]
    max_retries: Option<u32>,

    /// Pause between retry rounds, in milliseconds
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Candidates at least this similar to the source are rejected (0..=1)
    #[arg(long)]
    similarity_threshold: Option<f32>,

    /// Translate at most N pending entries per file
    #[arg(long)]
    max_entries: Option<usize>,

    /// Disable the machine-translation fallback
    #[arg(long)]
    no_fallback: bool,

    /// Translate but do not write catalogs back
    #[arg(long)]
    dry_run: bool,

    /// Write request/response traces for every chat call
    #[arg(long)]
    trace: bool,

    /// Suppress the per-entry console audit
    #[arg(short, long)]
    quiet: bool,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,

    /// Generate default config + prompt files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files when used with --init-config
    #[arg(long)]
    force: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            config: self.config.clone(),
            input_dir: self.input_dir.clone(),
            suffix: self.suffix.clone(),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay_ms,
            similarity_threshold: self.similarity_threshold,
            max_entries: self.max_entries,
            no_fallback: self.no_fallback,
            trace: self.trace,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let cfg = PipelineConfig::from_env(&args.overrides()).context("build config")?;
    tracing::info!(
        config = %cfg.config_path.display(),
        model = %cfg.chat.model,
        batch_size = cfg.batch.size,
        max_retries = cfg.batch.max_retries,
        fallback = cfg.fallback.is_some(),
        "configuration loaded"
    );

    let files = if args.files.is_empty() {
        collect_inputs(&cfg.input_dir, &cfg.suffix)?
    } else {
        args.files.clone()
    };
    if files.is_empty() {
        tracing::warn!(dir = %cfg.input_dir.display(), suffix = %cfg.suffix, "no catalogs to translate");
        return Ok(());
    }

    let trace = TraceWriter::new(cfg.trace_dir.clone(), cfg.trace_enabled)?;
    let chat = ChatTranslator::new(cfg.chat.clone(), cfg.prompts.clone(), trace)?;
    let fallback: Box<dyn MachineTranslator> = match cfg.fallback.clone() {
        Some(settings) => Box::new(GoogleWebTranslator::new(settings)?),
        None => Box::new(DisabledTranslator),
    };
    let primary: &dyn BatchTranslator = &chat;

    let progress = ConsoleProgress::new(!args.quiet, cfg.log_max_chars);
    let pipeline = TranslatorPipeline::new(cfg.batch.clone(), primary, fallback.as_ref(), progress)
        .with_dry_run(args.dry_run);
    let summary = pipeline.run(&files)?;

    tracing::info!(
        files = summary.files,
        saved = summary.saved,
        pending = summary.stats.pending,
        primary = summary.stats.primary,
        fallback = summary.stats.fallback,
        unchanged = summary.stats.unchanged,
        failed_calls = summary.stats.failed_calls,
        "run complete"
    );
    Ok(())
}
