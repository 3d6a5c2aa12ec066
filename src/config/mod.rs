use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::Cli;

pub const DEFAULT_ASSISTANT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CALCULATOR_ENDPOINT: &str =
    "https://sportstech.maurten.com/v1/simulationResults";
pub const DEFAULT_TEMPLATE_PATH: &str = "userInput.json";
pub const DEFAULT_LOG_FILE: &str = "fuelchat.log";
pub const DEFAULT_LOG_LEVEL: &str = "info";

pub const ENV_CONFIG: &str = "FUELCHAT_CONFIG";
pub const ENV_ASSISTANT_KEY: &str = "OPENAI_API_KEY";
pub const ENV_ASSISTANT_BASE_URL: &str = "OPENAI_BASE_URL";
pub const ENV_ASSISTANT_ID: &str = "FUELCHAT_ASSISTANT_ID";
pub const ENV_CALCULATOR_KEY: &str = "MAURTEN_API_KEY";
pub const ENV_PASSPHRASE: &str = "FUELCHAT_PASSPHRASE";
pub const ENV_TEMPLATE: &str = "FUELCHAT_TEMPLATE";
pub const ENV_LOG: &str = "FUELCHAT_LOG";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing {setting}: set {env} or `{key}` in config.toml")]
    Missing {
        setting: &'static str,
        env: &'static str,
        key: &'static str,
    },
    #[error("passphrase must not be empty")]
    EmptyPassphrase,
}

#[derive(Clone, PartialEq)]
pub struct AssistantConfig {
    pub base_url: String,
    pub assistant_id: String,
    pub api_key: String,
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Clone, PartialEq)]
pub struct CalculatorConfig {
    pub endpoint: String,
    pub api_key: String,
    pub template_path: PathBuf,
    /// Unset means the transport default (no explicit timeout).
    pub timeout_ms: Option<u64>,
}

#[derive(Clone, PartialEq)]
pub struct AppConfig {
    pub assistant: AssistantConfig,
    pub calculator: CalculatorConfig,
    pub passphrase: String,
    pub log_level: String,
    /// `None` logs to stderr.
    pub log_file: Option<PathBuf>,
    pub verify_assistant: bool,
    /// Config files that contributed, for the startup log.
    pub sources: Vec<PathBuf>,
}

// Secrets stay out of Debug output.
impl fmt::Debug for AssistantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssistantConfig")
            .field("base_url", &self.base_url)
            .field("assistant_id", &self.assistant_id)
            .field("api_key", &"<redacted>")
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

impl fmt::Debug for CalculatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalculatorConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("template_path", &self.template_path)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("assistant", &self.assistant)
            .field("calculator", &self.calculator)
            .field("passphrase", &"<redacted>")
            .field("log_level", &self.log_level)
            .field("log_file", &self.log_file)
            .field("verify_assistant", &self.verify_assistant)
            .field("sources", &self.sources)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FileConfig {
    pub passphrase: Option<String>,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
    pub assistant: Option<PartialAssistantConfig>,
    pub calculator: Option<PartialCalculatorConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialAssistantConfig {
    pub base_url: Option<String>,
    pub assistant_id: Option<String>,
    pub api_key: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialCalculatorConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub template_path: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
}

impl PartialAssistantConfig {
    fn or(self, other: Self) -> Self {
        Self {
            base_url: self.base_url.or(other.base_url),
            assistant_id: self.assistant_id.or(other.assistant_id),
            api_key: self.api_key.or(other.api_key),
            connect_timeout_ms: self.connect_timeout_ms.or(other.connect_timeout_ms),
            request_timeout_ms: self.request_timeout_ms.or(other.request_timeout_ms),
        }
    }
}

impl PartialCalculatorConfig {
    fn or(self, other: Self) -> Self {
        Self {
            endpoint: self.endpoint.or(other.endpoint),
            api_key: self.api_key.or(other.api_key),
            template_path: self.template_path.or(other.template_path),
            timeout_ms: self.timeout_ms.or(other.timeout_ms),
        }
    }
}

impl FileConfig {
    /// Field-wise merge; values in `self` win.
    pub fn or(self, other: FileConfig) -> FileConfig {
        FileConfig {
            passphrase: self.passphrase.or(other.passphrase),
            log_level: self.log_level.or(other.log_level),
            log_file: self.log_file.or(other.log_file),
            assistant: merge_section(self.assistant, other.assistant, PartialAssistantConfig::or),
            calculator: merge_section(
                self.calculator,
                other.calculator,
                PartialCalculatorConfig::or,
            ),
        }
    }
}

fn merge_section<T>(ours: Option<T>, theirs: Option<T>, merge: impl FnOnce(T, T) -> T) -> Option<T> {
    match (ours, theirs) {
        (Some(a), Some(b)) => Some(merge(a, b)),
        (a, b) => a.or(b),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let project_root = std::env::current_dir().context("resolve current dir")?;
        let (project_cfg, project_path) = load_project_config(&project_root)?;
        let (file_cfg, file_path) = load_file_config(cli.config.as_deref())?;

        let env = |key: &str| std::env::var(key).ok();
        let mut cfg = Self::resolve(cli, &env, project_cfg, file_cfg)?;
        cfg.sources = project_path.into_iter().chain(file_path).collect();
        Ok(cfg)
    }

    /// Precedence: CLI args, environment, project config, global config, defaults.
    pub fn resolve(
        cli: &Cli,
        env: &dyn Fn(&str) -> Option<String>,
        project_cfg: FileConfig,
        file_cfg: FileConfig,
    ) -> Result<Self, ConfigError> {
        let merged = project_cfg.or(file_cfg);
        let assistant_file = merged.assistant.unwrap_or_default();
        let calculator_file = merged.calculator.unwrap_or_default();

        let assistant = AssistantConfig {
            base_url: non_empty(cli.base_url.clone())
                .or_else(|| non_empty(env(ENV_ASSISTANT_BASE_URL)))
                .or(assistant_file.base_url)
                .unwrap_or_else(|| DEFAULT_ASSISTANT_BASE_URL.to_string()),
            assistant_id: non_empty(cli.assistant_id.clone())
                .or_else(|| non_empty(env(ENV_ASSISTANT_ID)))
                .or(non_empty(assistant_file.assistant_id))
                .ok_or(ConfigError::Missing {
                    setting: "assistant id",
                    env: ENV_ASSISTANT_ID,
                    key: "assistant.assistant_id",
                })?,
            api_key: non_empty(env(ENV_ASSISTANT_KEY))
                .or(non_empty(assistant_file.api_key))
                .ok_or(ConfigError::Missing {
                    setting: "assistant API key",
                    env: ENV_ASSISTANT_KEY,
                    key: "assistant.api_key",
                })?,
            connect_timeout_ms: assistant_file.connect_timeout_ms,
            request_timeout_ms: assistant_file.request_timeout_ms,
        };

        let calculator = CalculatorConfig {
            endpoint: calculator_file
                .endpoint
                .unwrap_or_else(|| DEFAULT_CALCULATOR_ENDPOINT.to_string()),
            api_key: non_empty(env(ENV_CALCULATOR_KEY))
                .or(non_empty(calculator_file.api_key))
                .ok_or(ConfigError::Missing {
                    setting: "calculator subscription key",
                    env: ENV_CALCULATOR_KEY,
                    key: "calculator.api_key",
                })?,
            template_path: cli
                .template
                .clone()
                .or_else(|| non_empty(env(ENV_TEMPLATE)).map(PathBuf::from))
                .or(calculator_file.template_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATE_PATH)),
            timeout_ms: calculator_file.timeout_ms,
        };

        let passphrase = env(ENV_PASSPHRASE)
            .or(merged.passphrase)
            .ok_or(ConfigError::Missing {
                setting: "passphrase",
                env: ENV_PASSPHRASE,
                key: "passphrase",
            })?;
        if passphrase.is_empty() {
            return Err(ConfigError::EmptyPassphrase);
        }

        let log_level = non_empty(cli.log_level.clone())
            .or_else(|| non_empty(env(ENV_LOG)))
            .or(merged.log_level)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        let log_file = if cli.log_stderr {
            None
        } else {
            Some(
                cli.log_file
                    .clone()
                    .or(merged.log_file)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            )
        };

        Ok(Self {
            assistant,
            calculator,
            passphrase,
            log_level,
            log_file,
            verify_assistant: !cli.skip_assistant_check,
            sources: Vec::new(),
        })
    }
}

fn read_config(path: &Path) -> Result<FileConfig> {
    let s = fs::read_to_string(path)
        .with_context(|| format!("read config file: {}", path.display()))?;
    toml::from_str::<FileConfig>(&s)
        .with_context(|| format!("parse config file: {}", path.display()))
}

/// Load the global configuration. An explicitly named file (`--config` or
/// `FUELCHAT_CONFIG`) must exist and parse; the default location is optional.
pub fn load_file_config(explicit: Option<&Path>) -> Result<(FileConfig, Option<PathBuf>)> {
    let explicit = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(ENV_CONFIG).ok().map(PathBuf::from));
    if let Some(p) = explicit {
        let cfg = read_config(&p)?;
        return Ok((cfg, Some(p)));
    }

    if let Some(p) = dirs::config_dir().map(|d| d.join("fuelchat").join("config.toml"))
        && p.exists()
    {
        let cfg = read_config(&p)?;
        return Ok((cfg, Some(p)));
    }
    Ok((FileConfig::default(), None))
}

/// Load project-specific configuration from .fuelchat/config.toml
pub fn load_project_config(project_root: &Path) -> Result<(FileConfig, Option<PathBuf>)> {
    let project_config_path = project_root.join(".fuelchat").join("config.toml");

    if project_config_path.exists() {
        let cfg = read_config(&project_config_path)?;
        Ok((cfg, Some(project_config_path)))
    } else {
        Ok((FileConfig::default(), None))
    }
}
