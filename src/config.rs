//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `DIALOGRAPH_DATA_DIR` and `DIALOGRAPH_LOG_LEVEL` env
//! overrides. The engine API key comes from `ENGINE_API_KEY` only — never
//! from TOML.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

/// OpenAI / OpenAI-compatible provider configuration.
/// Populated from `[engine.openai]` in the TOML.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    /// Model name passed in the request body.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

/// Answering engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Which provider is active (e.g. `"dummy"`, `"openai"`).
    /// Maps to `default` in `[engine]` TOML — named `default` there to signal
    /// that other provider sections can coexist without being loaded.
    pub provider: String,
    /// How many prior turns are handed to the engine as context.
    pub context_turns: usize,
    /// Config for the OpenAI / OpenAI-compatible provider (`[engine.openai]`).
    pub openai: OpenAiConfig,
}

/// Fully-resolved application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the conversation database (already expanded, no `~`).
    pub data_dir: PathBuf,
    pub log_level: String,
    /// Entity catalog seed file (absolute, or relative to the working dir).
    pub entities_file: Option<PathBuf>,
    pub engine: EngineConfig,
    /// API key from `ENGINE_API_KEY` env var — `None` for keyless local models.
    pub engine_api_key: Option<String>,
}

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    store: RawStore,
    #[serde(default)]
    engine: RawEngine,
}

#[derive(Deserialize)]
struct RawStore {
    data_dir: String,
    log_level: String,
    #[serde(default)]
    entities_file: Option<String>,
}

#[derive(Deserialize)]
struct RawEngine {
    /// Maps to `default = "..."` in `[engine]`.
    #[serde(rename = "default", default = "default_engine_provider")]
    provider: String,
    #[serde(default = "default_context_turns")]
    context_turns: usize,
    #[serde(default)]
    openai: RawOpenAiConfig,
}

impl Default for RawEngine {
    fn default() -> Self {
        Self {
            provider: default_engine_provider(),
            context_turns: default_context_turns(),
            openai: RawOpenAiConfig::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_model")]
    model: String,
    #[serde(default = "default_openai_temperature")]
    temperature: f32,
    #[serde(default = "default_openai_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            model: default_openai_model(),
            temperature: default_openai_temperature(),
            timeout_seconds: default_openai_timeout_seconds(),
        }
    }
}

fn default_engine_provider() -> String { "dummy".to_string() }
fn default_context_turns() -> usize { 16 }
fn default_openai_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_openai_model() -> String { "gpt-4o-mini".to_string() }
fn default_openai_temperature() -> f32 { 0.2 }
fn default_openai_timeout_seconds() -> u64 { 60 }

/// Load config from `config/default.toml`, then apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    let data_dir_override = env::var("DIALOGRAPH_DATA_DIR").ok();
    let log_level_override = env::var("DIALOGRAPH_LOG_LEVEL").ok();
    load_from(
        Path::new("config/default.toml"),
        data_dir_override.as_deref(),
        log_level_override.as_deref(),
    )
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    data_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let s = parsed.store;

    let data_dir_str = data_dir_override.unwrap_or(&s.data_dir).to_string();
    let data_dir = expand_home(&data_dir_str);
    let log_level = log_level_override.unwrap_or(&s.log_level).to_string();
    let entities_file = s.entities_file.map(|p| expand_home(&p));

    Ok(Config {
        data_dir,
        log_level,
        entities_file,
        engine: EngineConfig {
            provider: parsed.engine.provider,
            context_turns: parsed.engine.context_turns,
            openai: OpenAiConfig {
                api_base_url: parsed.engine.openai.api_base_url,
                model: parsed.engine.openai.model,
                temperature: parsed.engine.openai.temperature,
                timeout_seconds: parsed.engine.openai.timeout_seconds,
            },
        },
        engine_api_key: env::var("ENGINE_API_KEY").ok(),
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Safe `Config` for unit tests — dummy engine, no API keys, no external calls.
#[cfg(test)]
impl Config {
    pub fn test_default(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            log_level: "info".into(),
            entities_file: None,
            engine: EngineConfig {
                provider: "dummy".into(),
                context_turns: default_context_turns(),
                openai: OpenAiConfig {
                    api_base_url: "http://localhost:0/v1/chat/completions".into(),
                    model: "test-model".into(),
                    temperature: 0.0,
                    timeout_seconds: 1,
                },
            },
            engine_api_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[store]
data_dir = "~/.dialograph"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_basic_config() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.engine.provider, "dummy");
    }

    #[test]
    fn engine_section_parses() {
        let f = write_toml(
            r#"
[store]
data_dir = "/tmp/dg"
log_level = "debug"

[engine]
default = "openai"
context_turns = 4

[engine.openai]
model = "local-model"
"#,
        );
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.engine.provider, "openai");
        assert_eq!(cfg.engine.context_turns, 4);
        assert_eq!(cfg.engine.openai.model, "local-model");
        // Unspecified fields fall back to defaults
        assert_eq!(cfg.engine.openai.timeout_seconds, 60);
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.dialograph");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".dialograph"));
    }

    #[test]
    fn absolute_path_unchanged() {
        let p = expand_home("/absolute/path");
        assert_eq!(p, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), None, None);
        assert!(result.is_err());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn env_data_dir_override() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("/tmp/test-override"), None).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/test-override"));
    }

    #[test]
    fn env_log_level_override() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, Some("debug")).unwrap();
        assert_eq!(cfg.log_level, "debug");
    }
}
