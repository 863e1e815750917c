use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::config::{AppConfig, PromptsSection};

pub const DEFAULT_PROMPTS_DIR: &str = "prompts";

pub const DEFAULT_SYSTEM: &str = "system.txt";
pub const DEFAULT_USER: &str = "user.txt";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptSet {
    pub system: String,
    pub user: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_TEXT.to_string(),
            user: DEFAULT_USER_TEXT.to_string(),
        }
    }
}

impl PromptSet {
    /// Explicitly configured prompt files must exist. Otherwise `prompts/<name>` next to the
    /// config file is used when present, and the built-in text when not.
    pub fn load(config_path: &Path, cfg: &AppConfig) -> anyhow::Result<Self> {
        let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
        let p = &cfg.prompts;
        Ok(Self {
            system: read_prompt(config_dir, p, "system", DEFAULT_SYSTEM, DEFAULT_SYSTEM_TEXT)?,
            user: read_prompt(config_dir, p, "user", DEFAULT_USER, DEFAULT_USER_TEXT)?,
        })
    }
}

fn read_prompt(
    config_dir: &Path,
    p: &PromptsSection,
    key: &str,
    default_filename: &str,
    builtin: &str,
) -> anyhow::Result<String> {
    let configured = match key {
        "system" => p.system.clone(),
        "user" => p.user.clone(),
        other => return Err(anyhow!("unknown prompt key: {other}")),
    };

    let explicit = configured.is_some();
    let mut path = PathBuf::from(
        configured.unwrap_or_else(|| format!("{DEFAULT_PROMPTS_DIR}/{default_filename}")),
    );
    if path.is_relative() {
        path = config_dir.join(&path);
    }
    if !path.exists() {
        if explicit {
            return Err(anyhow!(
                "prompt file not found for {key}: {} (run: po-translator --init-config)",
                path.display()
            ));
        }
        return Ok(builtin.to_string());
    }
    std::fs::read_to_string(&path).with_context(|| format!("read prompt: {}", path.display()))
}

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

pub fn default_prompt_files() -> Vec<(&'static str, &'static str)> {
    vec![
        (DEFAULT_SYSTEM, DEFAULT_SYSTEM_TEXT),
        (DEFAULT_USER, DEFAULT_USER_TEXT),
    ]
}

pub const DEFAULT_SYSTEM_TEXT: &str = r#"You are a professional localization translator. You translate English UI strings into fluent, natural {{target_lang}} that reads as if it were written by a native speaker and fits the context of {{tone}}.

Rules:
- Always answer in {{target_lang}}. Never return the English source unchanged unless it is a proper noun, a code identifier or a number.
- Keep formatting placeholders verbatim: %s, %d, %1$s, {name}, {{0}}, <tags>, and escape sequences such as \n, \t, \" and \\.
- Keep the tone consistent with {{tone}}.
- Reply with one JSON object only. No commentary, no Markdown."#;

pub const DEFAULT_USER_TEXT: &str = r#"不要思考: Translate the following English strings into {{target_lang}}. Respond only in JSON format, using exactly the same keys.
Input:
{{input_json}}

Output format:
{{example_json}}"#;
