use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};

use crate::config::{find_default_config, load_config, AppConfig, CONFIG_ENV, DEFAULT_CONFIG_FILENAME};
use crate::models::chat::ChatSettings;
use crate::models::mt::GoogleWebSettings;
use crate::pipeline::prompts::{default_prompt_files, PromptSet, DEFAULT_PROMPTS_DIR};
use crate::quality::DEFAULT_SIMILARITY_THRESHOLD;

pub const DEFAULT_INPUT_DIR: &str = "uploaded";
pub const DEFAULT_SUFFIX: &str = ".txt";
pub const DEFAULT_BASE_URL: &str = "https://api.siliconflow.cn/v1";
pub const DEFAULT_MODEL: &str = "Qwen/Qwen3-235B-A22B";
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const MODEL_ENV: &str = "PO_TRANSLATOR_MODEL";
pub const DEFAULT_TARGET_LANG: &str = "Simplified Chinese";
pub const DEFAULT_TONE: &str = "science-fiction game UI text";
pub const DEFAULT_FALLBACK_ENDPOINT: &str = "https://translate.googleapis.com/translate_a/single";

/// Knobs of the batch state machine.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchSettings {
    pub size: usize,
    /// Extra primary rounds after the first one.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub similarity_threshold: f32,
    pub max_entries: Option<usize>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            size: 10,
            max_retries: 2,
            retry_delay: Duration::from_millis(1000),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            max_entries: None,
        }
    }
}

/// Command-line values; each one beats the environment and the config file.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub input_dir: Option<PathBuf>,
    pub suffix: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub batch_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub similarity_threshold: Option<f32>,
    pub max_entries: Option<usize>,
    pub no_fallback: bool,
    pub trace: bool,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub config_path: PathBuf,
    pub input_dir: PathBuf,
    pub suffix: String,
    pub chat: ChatSettings,
    /// `None` when the fallback tier is disabled.
    pub fallback: Option<GoogleWebSettings>,
    pub batch: BatchSettings,
    pub prompts: PromptSet,
    pub trace_dir: PathBuf,
    pub trace_enabled: bool,
    pub log_max_chars: usize,
}

impl PipelineConfig {
    pub fn from_env(overrides: &Overrides) -> anyhow::Result<Self> {
        let cfg_file = overrides
            .config
            .clone()
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(DEFAULT_CONFIG_FILENAME));

        let mut file_cfg = AppConfig::default();
        if let Some(p) = cfg_file.as_ref() {
            if p.exists() {
                file_cfg = load_config(p)?;
            } else if overrides.config.is_some() {
                return Err(anyhow!("config file not found: {}", p.display()));
            }
        }
        let cfg_path = cfg_file.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));

        Self::resolve(&cfg_path, &file_cfg, overrides, |name| std::env::var(name).ok())
    }

    pub fn resolve(
        cfg_path: &Path,
        file_cfg: &AppConfig,
        overrides: &Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let config_dir = cfg_path.parent().unwrap_or_else(|| Path::new("."));
        let env_nonblank = |name: &str| env(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key_env = file_cfg
            .llm
            .api_key_env
            .clone()
            .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string());
        let api_key = env_nonblank(&api_key_env).ok_or_else(|| {
            anyhow!("missing API key: set the {api_key_env} environment variable")
        })?;

        let base_url = overrides
            .base_url
            .clone()
            .or_else(|| env_nonblank(BASE_URL_ENV))
            .or_else(|| file_cfg.llm.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = overrides
            .model
            .clone()
            .or_else(|| env_nonblank(MODEL_ENV))
            .or_else(|| file_cfg.llm.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let chat = ChatSettings {
            base_url,
            api_key,
            model,
            timeout: Duration::from_secs(file_cfg.llm.timeout_secs.unwrap_or(120).max(1)),
            temperature: file_cfg.llm.temperature,
            json_mode: file_cfg.llm.json_mode.unwrap_or(true),
            target_lang: file_cfg
                .style
                .target_lang
                .clone()
                .unwrap_or_else(|| DEFAULT_TARGET_LANG.to_string()),
            tone: file_cfg
                .style
                .tone
                .clone()
                .unwrap_or_else(|| DEFAULT_TONE.to_string()),
        };

        let fallback_enabled = !overrides.no_fallback && file_cfg.fallback.enabled.unwrap_or(true);
        let fallback = fallback_enabled.then(|| GoogleWebSettings {
            endpoint: file_cfg
                .fallback
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_FALLBACK_ENDPOINT.to_string()),
            source_lang: file_cfg
                .fallback
                .source_lang
                .clone()
                .unwrap_or_else(|| "en".to_string()),
            target_lang: file_cfg
                .fallback
                .target_lang
                .clone()
                .unwrap_or_else(|| "zh-CN".to_string()),
            timeout: Duration::from_secs(file_cfg.fallback.timeout_secs.unwrap_or(30).max(1)),
        });

        let defaults = BatchSettings::default();
        let size = overrides
            .batch_size
            .or(file_cfg.batch.size)
            .unwrap_or(defaults.size);
        if size == 0 {
            return Err(anyhow!("batch size must be at least 1"));
        }
        let similarity_threshold = overrides
            .similarity_threshold
            .or(file_cfg.batch.similarity_threshold)
            .unwrap_or(defaults.similarity_threshold);
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(anyhow!(
                "similarity threshold must be within 0..=1, got {similarity_threshold}"
            ));
        }
        let batch = BatchSettings {
            size,
            max_retries: overrides
                .max_retries
                .or(file_cfg.batch.max_retries)
                .unwrap_or(defaults.max_retries),
            retry_delay: overrides
                .retry_delay_ms
                .or(file_cfg.batch.retry_delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            similarity_threshold,
            max_entries: overrides
                .max_entries
                .or(file_cfg.batch.max_entries)
                .filter(|n| *n > 0),
        };

        let input_dir = match (overrides.input_dir.clone(), file_cfg.input.dir.clone()) {
            (Some(p), _) => p,
            (None, Some(p)) if p.is_relative() => config_dir.join(p),
            (None, Some(p)) => p,
            (None, None) => PathBuf::from(DEFAULT_INPUT_DIR),
        };
        let suffix = overrides
            .suffix
            .clone()
            .or_else(|| file_cfg.input.suffix.clone())
            .unwrap_or_else(|| DEFAULT_SUFFIX.to_string());

        let trace_dir = file_cfg
            .trace
            .dir
            .clone()
            .unwrap_or_else(|| "_trace".to_string());
        let trace_dir = if Path::new(&trace_dir).is_absolute() {
            PathBuf::from(trace_dir)
        } else {
            config_dir.join(trace_dir)
        };
        let trace_enabled = overrides.trace || file_cfg.trace.enabled.unwrap_or(false);
        let log_max_chars = file_cfg.trace.log_max_chars.unwrap_or(240);

        let prompts = PromptSet::load(cfg_path, file_cfg).context("load prompts")?;

        Ok(Self {
            config_path: cfg_path.to_path_buf(),
            input_dir,
            suffix,
            chat,
            fallback,
            batch,
            prompts,
            trace_dir,
            trace_enabled,
            log_max_chars,
        })
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(DEFAULT_CONFIG_FILENAME);

    let prompts_dir = dir.join(DEFAULT_PROMPTS_DIR);
    std::fs::create_dir_all(&prompts_dir)
        .with_context(|| format!("create prompts dir: {}", prompts_dir.display()))?;

    for (fname, body) in default_prompt_files() {
        let p = prompts_dir.join(fname);
        if p.exists() && !force {
            continue;
        }
        std::fs::write(&p, body).with_context(|| format!("write prompt: {}", p.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }
    std::fs::write(&cfg_path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

const DEFAULT_CONFIG_TOML: &str = r#"[input]
# Catalogs are picked up from this directory (relative to this file).
dir = "uploaded"
suffix = ".txt"

[llm]
base_url = "https://api.siliconflow.cn/v1"
model = "Qwen/Qwen3-235B-A22B"
# The key itself is never stored here.
api_key_env = "OPENAI_API_KEY"
timeout_secs = 120
# temperature = 0.3
json_mode = true

[style]
target_lang = "Simplified Chinese"
tone = "science-fiction game UI text"

[batch]
size = 10
# Extra rounds against the LLM before the fallback tier takes over.
max_retries = 2
retry_delay_ms = 1000
# Candidates at or above this similarity to the source count as echoes.
similarity_threshold = 0.8
# max_entries = 50

[fallback]
enabled = true
endpoint = "https://translate.googleapis.com/translate_a/single"
source_lang = "en"
target_lang = "zh-CN"
timeout_secs = 30

[prompts]
system = "prompts/system.txt"
user = "prompts/user.txt"

[trace]
dir = "_trace"
enabled = false
log_max_chars = 240
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_config, parse_config};

    fn env_with_key(name: &str) -> Option<String> {
        match name {
            DEFAULT_API_KEY_ENV => Some("sk-test".to_string()),
            _ => None,
        }
    }

    fn resolve(cfg: &AppConfig, overrides: &Overrides) -> anyhow::Result<PipelineConfig> {
        let dir = std::env::temp_dir();
        PipelineConfig::resolve(&dir.join("absent-po-translator.toml"), cfg, overrides, env_with_key)
    }

    #[test]
    fn defaults_apply() {
        let cfg = resolve(&AppConfig::default(), &Overrides::default()).expect("resolve");
        assert_eq!(cfg.chat.model, DEFAULT_MODEL);
        assert_eq!(cfg.chat.base_url, DEFAULT_BASE_URL);
        assert_eq!(cfg.chat.api_key, "sk-test");
        assert!(cfg.chat.json_mode);
        assert_eq!(cfg.batch, BatchSettings::default());
        assert_eq!(cfg.input_dir, PathBuf::from(DEFAULT_INPUT_DIR));
        assert_eq!(cfg.suffix, DEFAULT_SUFFIX);
        assert!(cfg.fallback.is_some());
        assert!(!cfg.trace_enabled);
    }

    #[test]
    fn missing_key_fails_fast_with_variable_name() {
        let err = PipelineConfig::resolve(
            Path::new("po-translator.toml"),
            &AppConfig::default(),
            &Overrides::default(),
            |_| None,
        )
        .expect_err("no key");
        assert!(err.to_string().contains("OPENAI_API_KEY"));

        let blank = PipelineConfig::resolve(
            Path::new("po-translator.toml"),
            &AppConfig::default(),
            &Overrides::default(),
            |_| Some("   ".to_string()),
        );
        assert!(blank.is_err());
    }

    #[test]
    fn custom_key_variable() {
        let cfg = parse_config("[llm]\napi_key_env = \"SF_KEY\"\n").expect("parse");
        let resolved = PipelineConfig::resolve(
            Path::new("po-translator.toml"),
            &cfg,
            &Overrides::default(),
            |name| (name == "SF_KEY").then(|| "sk-sf".to_string()),
        )
        .expect("resolve");
        assert_eq!(resolved.chat.api_key, "sk-sf");
    }

    #[test]
    fn precedence_cli_env_file() {
        let cfg = parse_config(
            "[llm]\nmodel = \"file-model\"\nbase_url = \"https://file.example/v1\"\n[batch]\nsize = 4\nmax_retries = 5\n",
        )
        .expect("parse");
        let overrides = Overrides {
            model: Some("cli-model".to_string()),
            batch_size: Some(3),
            ..Overrides::default()
        };
        let resolved = PipelineConfig::resolve(
            Path::new("po-translator.toml"),
            &cfg,
            &overrides,
            |name| match name {
                DEFAULT_API_KEY_ENV => Some("sk".to_string()),
                BASE_URL_ENV => Some("https://env.example/v1".to_string()),
                MODEL_ENV => Some("env-model".to_string()),
                _ => None,
            },
        )
        .expect("resolve");
        assert_eq!(resolved.chat.model, "cli-model");
        assert_eq!(resolved.chat.base_url, "https://env.example/v1");
        assert_eq!(resolved.batch.size, 3);
        assert_eq!(resolved.batch.max_retries, 5);
    }

    #[test]
    fn invalid_batch_values_are_rejected() {
        let zero = Overrides {
            batch_size: Some(0),
            ..Overrides::default()
        };
        assert!(resolve(&AppConfig::default(), &zero).is_err());
        let threshold = Overrides {
            similarity_threshold: Some(1.5),
            ..Overrides::default()
        };
        assert!(resolve(&AppConfig::default(), &threshold).is_err());
    }

    #[test]
    fn fallback_can_be_disabled() {
        let cli = Overrides {
            no_fallback: true,
            ..Overrides::default()
        };
        assert!(resolve(&AppConfig::default(), &cli).expect("resolve").fallback.is_none());
        let cfg = parse_config("[fallback]\nenabled = false\n").expect("parse");
        assert!(resolve(&cfg, &Overrides::default()).expect("resolve").fallback.is_none());
    }

    #[test]
    fn relative_input_dir_follows_config_file() {
        let cfg = parse_config("[input]\ndir = \"catalogs\"\n").expect("parse");
        let resolved = PipelineConfig::resolve(
            Path::new("/srv/l10n/po-translator.toml"),
            &cfg,
            &Overrides::default(),
            env_with_key,
        )
        .expect("resolve");
        assert_eq!(resolved.input_dir, PathBuf::from("/srv/l10n/catalogs"));
        assert_eq!(resolved.trace_dir, PathBuf::from("/srv/l10n/_trace"));
    }

    #[test]
    fn init_writes_loadable_config_and_prompts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = init_default_config(dir.path(), false).expect("init");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.batch.size, Some(10));
        assert_eq!(cfg.batch.similarity_threshold, Some(0.8));
        let resolved = PipelineConfig::resolve(&path, &cfg, &Overrides::default(), env_with_key)
            .expect("resolve");
        assert_eq!(resolved.prompts, PromptSet::default());

        std::fs::write(&path, "# edited\n").expect("edit");
        init_default_config(dir.path(), false).expect("init again");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "# edited\n");
        init_default_config(dir.path(), true).expect("force");
        assert_ne!(std::fs::read_to_string(&path).expect("read"), "# edited\n");
    }
}
