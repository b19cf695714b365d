use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::client::RetryPolicy;

/// Environment variable overriding the generation endpoint.
pub const ENDPOINT_ENV: &str = "DECISIONSIM_ENDPOINT";
/// Environment variable overriding the model name.
pub const MODEL_ENV: &str = "DECISIONSIM_MODEL";

/// Top-level simulator configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct SimulatorConfig {
    /// Language-model endpoint settings.
    #[serde(default)]
    pub generation: GenerationSettings,
    /// Retry policy for transport failures.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Persistence location.
    #[serde(default)]
    pub storage: StorageSettings,
    /// Log and event sinks.
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl SimulatorConfig {
    /// Loads and validates a TOML file. Relative paths resolve against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading simulator config {}", path.display()))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::parse(&raw, &base_dir).with_context(|| format!("parsing {}", path.display()))
    }

    /// Parses and validates TOML text, resolving relative paths against `base_dir`.
    pub fn parse(raw: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.resolve_paths(base_dir);
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Applies overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|v| !v.trim().is_empty()) {
            self.generation.endpoint = endpoint;
        }
        if let Some(model) = lookup(MODEL_ENV).filter(|v| !v.trim().is_empty()) {
            self.generation.model = model;
        }
    }

    /// Rejects settings that cannot produce a working client.
    pub fn validate(&self) -> Result<()> {
        let generation = &self.generation;
        if generation.endpoint.trim().is_empty() {
            bail!("generation.endpoint must not be empty");
        }
        if generation.timeout_ms == 0 {
            bail!("generation.timeout_ms must be greater than zero");
        }
        if !(0.0..=2.0).contains(&generation.temperature) {
            bail!("generation.temperature must be within 0.0..=2.0");
        }
        let retry = &self.retry;
        if retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if retry.multiplier < 1.0 {
            bail!("retry.multiplier must be >= 1.0");
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            bail!("retry.jitter must be within 0.0..=1.0");
        }
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            bail!("retry.initial_backoff_ms exceeds retry.max_backoff_ms");
        }
        Ok(())
    }

    /// Reads the API key from the variable named by `generation.api_key_env`.
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        env::var(&self.generation.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }

    /// Per-attempt generation timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.generation.timeout_ms)
    }

    /// Retry policy described by `[retry]`.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            multiplier: self.retry.multiplier,
            jitter: self.retry.jitter,
        }
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        let resolve = |candidate: &mut PathBuf| {
            if candidate.is_relative() {
                *candidate = base_dir.join(&*candidate);
            }
        };
        resolve(&mut self.storage.data_dir);
        if let Some(path) = self.telemetry.log_path.as_mut() {
            resolve(path);
        }
        if let Some(path) = self.telemetry.event_log.as_mut() {
            resolve(path);
        }
    }
}

/// Wire format spoken by the generation endpoint.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WireProtocol {
    /// OpenAI-style chat completions (`messages` in, `choices` out).
    #[default]
    Chat,
    /// Plain generate endpoint (`prompt` in, `text` out).
    Generate,
}

/// Language-model endpoint settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GenerationSettings {
    /// Request/response format.
    #[serde(default)]
    pub protocol: WireProtocol,
    /// Full URL of the endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model name sent with chat requests.
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Token budget sent with generate requests.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Nucleus sampling sent with generate requests.
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            protocol: WireProtocol::default(),
            endpoint: default_endpoint(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
            timeout_ms: default_timeout_ms(),
            api_key_env: default_api_key_env(),
        }
    }
}

/// Retry settings for transport failures.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RetrySettings {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound for any delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Growth factor between retries.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Fraction of each delay randomized away.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

/// Persistence location.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct StorageSettings {
    /// Directory holding company and decision files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Log and event sinks. Both are optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct TelemetrySettings {
    /// JSON-lines log file.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// JSON-lines event file.
    #[serde(default)]
    pub event_log: Option<PathBuf>,
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

const fn default_temperature() -> f32 {
    0.2
}

const fn default_max_tokens() -> u32 {
    768
}

const fn default_top_p() -> f32 {
    0.9
}

const fn default_timeout_ms() -> u64 {
    60_000
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_max_backoff_ms() -> u64 {
    8_000
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_jitter() -> f64 {
    0.1
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
