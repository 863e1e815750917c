use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILENAME: &str = "po-translator.toml";
pub const CONFIG_ENV: &str = "PO_TRANSLATOR_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub input: InputSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub style: StyleSection,
    #[serde(default)]
    pub batch: BatchSection,
    #[serde(default)]
    pub fallback: FallbackSection,
    #[serde(default)]
    pub prompts: PromptsSection,
    #[serde(default)]
    pub trace: TraceSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct InputSection {
    /// Directory scanned for catalogs when no files are given on the command line.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Only files whose name ends with this suffix are picked up.
    #[serde(default)]
    pub suffix: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct LlmSection {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Send `response_format = {"type": "json_object"}`. Some gateways reject it.
    #[serde(default)]
    pub json_mode: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct StyleSection {
    #[serde(default)]
    pub target_lang: Option<String>,
    /// Register the model should write in, e.g. "science-fiction game UI text".
    #[serde(default)]
    pub tone: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct BatchSection {
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub similarity_threshold: Option<f32>,
    /// Optional dev-only limiter: translate at most N pending entries per file.
    #[serde(default)]
    pub max_entries: Option<usize>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct FallbackSection {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub source_lang: Option<String>,
    #[serde(default)]
    pub target_lang: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PromptsSection {
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TraceSection {
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub log_max_chars: Option<usize>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 4) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    parse_config(&text).with_context(|| format!("parse config toml: {}", path.display()))
}

pub fn parse_config(text: &str) -> anyhow::Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(text)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_all_defaults() {
        let cfg = parse_config("").expect("parse");
        assert!(cfg.llm.model.is_none());
        assert!(cfg.batch.size.is_none());
        assert!(cfg.fallback.enabled.is_none());
    }

    #[test]
    fn sections_parse() {
        let cfg = parse_config(
            r#"
[input]
dir = "catalogs"
suffix = ".po"

[llm]
model = "Qwen/Qwen3-235B-A22B"
json_mode = false

[style]
tone = "pirate radio chatter"

[batch]
size = 5
max_retries = 3
similarity_threshold = 0.95

[fallback]
enabled = false
"#,
        )
        .expect("parse");
        assert_eq!(cfg.input.dir.as_deref(), Some(Path::new("catalogs")));
        assert_eq!(cfg.input.suffix.as_deref(), Some(".po"));
        assert_eq!(cfg.llm.json_mode, Some(false));
        assert_eq!(cfg.style.tone.as_deref(), Some("pirate radio chatter"));
        assert_eq!(cfg.batch.size, Some(5));
        assert_eq!(cfg.batch.max_retries, Some(3));
        assert_eq!(cfg.batch.similarity_threshold, Some(0.95));
        assert_eq!(cfg.fallback.enabled, Some(false));
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(parse_config("[batch]\nsize = \"ten\"\n").is_err());
    }

    #[test]
    fn finds_file_in_parent_dir() {
        let root = tempfile::tempdir().expect("tempdir");
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(root.path().join(DEFAULT_CONFIG_FILENAME), "").expect("write");
        let found = find_file_upwards(&nested, DEFAULT_CONFIG_FILENAME, 4).expect("found");
        assert_eq!(found, root.path().join(DEFAULT_CONFIG_FILENAME));
        assert!(find_file_upwards(&nested, DEFAULT_CONFIG_FILENAME, 0).is_none());
    }
}
