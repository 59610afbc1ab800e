use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use llm_repl_ai::{
    LlmError, ProviderKind, ServiceSettings, TransportConfig, DEFAULT_KEEP_RECENT,
    DEFAULT_MAX_TOKENS, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_MS, DEFAULT_SYSTEM_PROMPT,
    DEFAULT_TEMPERATURE, DEFAULT_TIMEOUT,
};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_HOME_DIR_NAME: &str = ".llm-repl";
pub const DEFAULT_CONFIG_FILE_NAME: &str = "config.toml";
pub const PROVIDER_ENV: &str = "LLM_PROVIDER";

const DEFAULT_HISTORY_FILE: &str = "~/.llm_repl_history";
const DEFAULT_MAX_HISTORY: usize = 100;
const DEFAULT_PROMPT_PREFIX: &str = "> ";
const DEFAULT_AI_PREFIX: &str = "AI: ";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_CONVERSATION_FILE: &str = "conversation.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {} failed: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("parse {} failed: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("{0}")]
    Provider(#[from] LlmError),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderSection>,
    #[serde(default)]
    pub repl: ReplSection,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSection {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReplSection {
    #[serde(default)]
    pub history_file: Option<String>,
    #[serde(default)]
    pub max_history: Option<usize>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub streaming: Option<bool>,
    #[serde(default)]
    pub prompt_prefix: Option<String>,
    #[serde(default)]
    pub ai_prefix: Option<String>,
    #[serde(default)]
    pub keep_recent: Option<usize>,
    #[serde(default)]
    pub context_token_limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportSection {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry_count: Option<usize>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogSection {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub stdout: Option<bool>,
}

/// Values given on the command line. They win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<usize>,
    pub no_stream: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplSettings {
    pub history_file: PathBuf,
    pub max_history: usize,
    pub streaming: bool,
    pub prompt_prefix: String,
    pub ai_prefix: String,
    pub keep_recent: usize,
    pub context_token_limit: Option<usize>,
    pub default_save_file: String,
    /// Target of `~` in `/save` and `/load` paths.
    pub home_dir: PathBuf,
    pub color: bool,
}

impl Default for ReplSettings {
    fn default() -> Self {
        Self {
            history_file: PathBuf::from(".llm_repl_history"),
            max_history: DEFAULT_MAX_HISTORY,
            streaming: true,
            prompt_prefix: DEFAULT_PROMPT_PREFIX.to_string(),
            ai_prefix: DEFAULT_AI_PREFIX.to_string(),
            keep_recent: DEFAULT_KEEP_RECENT,
            context_token_limit: None,
            default_save_file: DEFAULT_CONVERSATION_FILE.to_string(),
            home_dir: home_dir(),
            color: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub dir: PathBuf,
    pub level: String,
    pub stdout: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub service: ServiceSettings,
    pub repl: ReplSettings,
    pub log: LogSettings,
}

pub fn default_config_path() -> PathBuf {
    home_dir()
        .join(DEFAULT_HOME_DIR_NAME)
        .join(DEFAULT_CONFIG_FILE_NAME)
}

pub fn load_config(path: Option<&Path>, overrides: &CliOverrides) -> Result<AppConfig, ConfigError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    let file = read_toml_if_exists::<ConfigFile>(&path)?.unwrap_or_default();
    tracing::debug!(path = %path.display(), "configuration loaded");
    resolve_config(file, overrides, &|name: &str| std::env::var(name).ok())
}

#[cfg(test)]
fn parse_config_file(content: &str, path: &Path) -> Result<ConfigFile, ConfigError> {
    toml::from_str(content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Layers defaults, file, environment (through `env`) and CLI overrides.
pub fn resolve_config(
    file: ConfigFile,
    overrides: &CliOverrides,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<AppConfig, ConfigError> {
    let provider_name = non_empty(overrides.provider.clone())
        .or_else(|| non_empty(env(PROVIDER_ENV)))
        .or_else(|| non_empty(file.provider.clone()))
        .unwrap_or_else(|| ProviderKind::Groq.name().to_string());
    let provider: ProviderKind = provider_name.parse()?;
    let section = file
        .providers
        .get(provider.name())
        .cloned()
        .unwrap_or_default();

    let api_key = non_empty(overrides.api_key.clone())
        .or_else(|| non_empty(section.api_key.clone()))
        .or_else(|| non_empty(file.api_key.clone()))
        .or_else(|| {
            provider
                .profile()
                .api_key_env
                .and_then(|name| non_empty(env(name)))
        });

    let home = env("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let transport = TransportConfig {
        bearer_token: None,
        timeout: file
            .transport
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT),
        retry_count: file.transport.retry_count.unwrap_or(DEFAULT_RETRY_COUNT),
        retry_delay_ms: file
            .transport
            .retry_delay_ms
            .unwrap_or(DEFAULT_RETRY_DELAY_MS),
    };

    let service = ServiceSettings {
        provider,
        api_key,
        base_url: non_empty(section.api_url),
        model: non_empty(overrides.model.clone()).or_else(|| non_empty(section.model)),
        temperature: overrides
            .temperature
            .or(section.temperature)
            .unwrap_or(DEFAULT_TEMPERATURE),
        max_tokens: overrides
            .max_tokens
            .or(section.max_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS),
        system_prompt: file
            .repl
            .system_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        transport,
    };

    let repl = ReplSettings {
        history_file: expand_home_path(
            file.repl
                .history_file
                .as_deref()
                .unwrap_or(DEFAULT_HISTORY_FILE),
            &home,
        ),
        max_history: file.repl.max_history.unwrap_or(DEFAULT_MAX_HISTORY),
        streaming: !overrides.no_stream && file.repl.streaming.unwrap_or(true),
        prompt_prefix: file
            .repl
            .prompt_prefix
            .unwrap_or_else(|| DEFAULT_PROMPT_PREFIX.to_string()),
        ai_prefix: file
            .repl
            .ai_prefix
            .unwrap_or_else(|| DEFAULT_AI_PREFIX.to_string()),
        keep_recent: file.repl.keep_recent.unwrap_or(DEFAULT_KEEP_RECENT),
        context_token_limit: file.repl.context_token_limit,
        default_save_file: DEFAULT_CONVERSATION_FILE.to_string(),
        home_dir: home.clone(),
        color: false,
    };

    let log = LogSettings {
        dir: file
            .log
            .path
            .as_deref()
            .map(|path| expand_home_path(path, &home))
            .unwrap_or_else(|| home.join(DEFAULT_HOME_DIR_NAME).join("logs")),
        level: non_empty(file.log.level).unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        stdout: file.log.stdout.unwrap_or(false),
    };

    Ok(AppConfig { service, repl, log })
}

fn read_toml_if_exists<T>(path: &Path) -> Result<Option<T>, ConfigError>
where
    T: for<'de> Deserialize<'de>,
{
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = toml::from_str::<T>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(parsed))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn expand_home_path(path: &str, home: &Path) -> PathBuf {
    let trimmed = path.trim();
    if trimmed == "~" {
        return home.to_path_buf();
    }
    if let Some(suffix) = trimmed.strip_prefix("~/") {
        return home.join(suffix);
    }
    PathBuf::from(trimmed)
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
#[path = "../tests/unit/config_unit.rs"]
mod tests;
