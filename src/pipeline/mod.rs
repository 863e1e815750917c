mod config;
pub mod prompts;
pub mod trace;
mod translator;

pub use config::{init_default_config, BatchSettings, Overrides, PipelineConfig};
pub use translator::{collect_inputs, Resolution, RunSummary, Tier, TranslationStats, TranslatorPipeline};
