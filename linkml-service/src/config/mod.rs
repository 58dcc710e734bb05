use crate::services::{OpenAiSettings, ToolCommand};
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub common: core_config::Config,
    pub backend: CapabilityBackend,
    pub generator: ToolConfig,
    pub linter: ToolConfig,
    pub openai: OpenAiConfig,
    pub http: HttpConfig,
    /// Parent directory for per-request scratch directories.
    pub scratch_dir: PathBuf,
}

/// Where capability calls go: real tools and APIs, or in-process stand-ins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityBackend {
    Command,
    Mock,
}

#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: Option<Secret<String>>,
    pub thread_id: Option<String>,
    pub assistant_id: Option<String>,
    pub base_url: String,
    pub poll_interval: Duration,
    pub run_timeout: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub max_body_bytes: usize,
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
}

impl ServiceConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common_config = core_config::Config::load()?;
        Self::from_lookup(common_config, |key| env::var(key).ok())
    }

    /// Builds the service settings from `lookup`, which resolves variable names.
    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_prod = lookup("ENVIRONMENT").unwrap_or_else(|| "dev".to_string()) == "prod";
        let vars = Env { lookup, is_prod };

        Ok(ServiceConfig {
            common,
            backend: vars.get("CAPABILITY_BACKEND", Some("command"))?.parse()?,
            generator: ToolConfig {
                program: vars.get("GENERATOR_PROGRAM", Some("gen-pydantic"))?,
                args: vars.optional("GENERATOR_ARGS").map(|a| split_args(&a)).unwrap_or_default(),
                timeout: Duration::from_secs(vars.parse("GENERATOR_TIMEOUT_SECS", 60)?),
            },
            linter: ToolConfig {
                program: vars.get("LINTER_PROGRAM", Some("linkml-lint"))?,
                args: split_args(
                    &vars.optional("LINTER_ARGS")
                        .unwrap_or_else(|| "--format json".to_string()),
                ),
                timeout: Duration::from_secs(vars.parse("LINTER_TIMEOUT_SECS", 60)?),
            },
            openai: OpenAiConfig {
                api_key: vars.optional("OPENAI_API_KEY").map(Secret::new),
                thread_id: vars.optional("OPENAI_THREAD_ID"),
                assistant_id: vars.optional("OPENAI_ASSISTANT_ID"),
                base_url: vars.get("OPENAI_BASE_URL", Some(DEFAULT_OPENAI_BASE_URL))?,
                poll_interval: Duration::from_millis(vars.parse("OPENAI_POLL_INTERVAL_MS", 500)?),
                run_timeout: Duration::from_secs(vars.parse("OPENAI_RUN_TIMEOUT_SECS", 120)?),
                request_timeout: Duration::from_secs(vars.parse("OPENAI_REQUEST_TIMEOUT_SECS", 30)?),
            },
            http: HttpConfig {
                max_body_bytes: vars.parse("MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?,
                allowed_origins: vars
                    .optional("CORS_ALLOWED_ORIGINS")
                    .map(|origins| {
                        origins
                            .split(',')
                            .map(str::trim)
                            .filter(|o| !o.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            scratch_dir: vars
                .optional("SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir),
        })
    }
}

impl ToolConfig {
    pub fn command(&self) -> ToolCommand {
        ToolCommand::new(self.program.clone(), self.args.clone())
    }
}

impl OpenAiConfig {
    /// Client settings, or a message naming every credential that is absent.
    pub fn settings(&self) -> Result<OpenAiSettings, String> {
        match (&self.api_key, &self.thread_id, &self.assistant_id) {
            (Some(api_key), Some(thread_id), Some(assistant_id)) => Ok(OpenAiSettings {
                base_url: self.base_url.clone(),
                api_key: api_key.clone(),
                assistant_id: assistant_id.clone(),
                thread_id: thread_id.clone(),
                poll_interval: self.poll_interval,
                run_timeout: self.run_timeout,
                request_timeout: self.request_timeout,
                retry_window: self.request_timeout,
            }),
            _ => {
                let missing: Vec<&str> = [
                    ("OPENAI_API_KEY", self.api_key.is_none()),
                    ("OPENAI_THREAD_ID", self.thread_id.is_none()),
                    ("OPENAI_ASSISTANT_ID", self.assistant_id.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, absent)| absent.then_some(name))
                .collect();
                Err(format!(
                    "Missing OpenAI API key, thread ID, or assistant ID (unset: {})",
                    missing.join(", ")
                ))
            }
        }
    }
}

impl CapabilityBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            CapabilityBackend::Command => "command",
            CapabilityBackend::Mock => "mock",
        }
    }
}

impl FromStr for CapabilityBackend {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "command" => Ok(CapabilityBackend::Command),
            "mock" => Ok(CapabilityBackend::Mock),
            _ => Err(AppError::ConfigError(anyhow::anyhow!(
                "Invalid capability backend: {}",
                s
            ))),
        }
    }
}

fn split_args(args: &str) -> Vec<String> {
    args.split_whitespace().map(String::from).collect()
}

struct Env<F> {
    lookup: F,
    is_prod: bool,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Set and non-blank values only.
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn get(&self, key: &str, default: Option<&str>) -> Result<String, AppError> {
        match self.optional(key) {
            Some(val) => Ok(val),
            None => {
                if self.is_prod {
                    Err(AppError::ConfigError(anyhow::anyhow!(
                        "{} is required in production but not set",
                        key
                    )))
                } else if let Some(def) = default {
                    Ok(def.to_string())
                } else {
                    Err(AppError::ConfigError(anyhow::anyhow!(
                        "{} is required but not set",
                        key
                    )))
                }
            }
        }
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, AppError>
    where
        T: FromStr + ToString,
        T::Err: std::fmt::Display,
    {
        self.get(key, Some(&default.to_string()))?
            .trim()
            .parse()
            .map_err(|e: T::Err| {
                AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, e))
            })
    }
}
