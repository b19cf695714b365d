use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::{sleep, timeout};

use crate::{
    config::{GenerationSettings, WireProtocol},
    telemetry::SimulationTelemetry,
};

/// Failure reported by a generation backend before any text was produced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    /// Human-readable cause.
    pub message: String,
    /// HTTP status when the endpoint answered with an error.
    pub status: Option<u16>,
}

impl TransportError {
    /// Creates an error without status.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    /// Creates an error for a non-success HTTP status.
    #[must_use]
    pub fn status(status: u16, body: &str) -> Self {
        Self {
            message: format!("endpoint returned status {status}: {}", body.trim()),
            status: Some(status),
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

/// Errors surfaced by [`GenerationClient::invoke`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// The backend could not be reached or rejected the request.
    #[error("generation transport failed after {attempts} attempt(s): {source}")]
    Transport {
        /// Attempts made before giving up.
        attempts: u32,
        /// Last failure observed.
        source: TransportError,
    },
    /// An attempt exceeded the configured timeout.
    #[error("generation timed out after {after:?}")]
    Timeout {
        /// Configured per-attempt limit.
        after: Duration,
    },
    /// The backend answered with blank text.
    #[error("generation returned an empty response")]
    EmptyResponse,
}

/// Opaque text-generation capability.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Produces raw text for a prompt.
    async fn generate(&self, prompt: &str) -> Result<String, TransportError>;
}

/// Retry schedule for transport failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any delay.
    pub max_backoff: Duration,
    /// Growth factor between retries.
    pub multiplier: f64,
    /// Fraction of each delay randomized away (0 disables jitter).
    pub jitter: f64,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Only transport failures are worth another attempt.
    #[must_use]
    pub const fn is_retryable(error: &GenerationError) -> bool {
        matches!(error, GenerationError::Transport { .. })
    }

    /// Un-jittered delay before retry number `retry` (1-based).
    #[must_use]
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        if scaled.is_nan() || scaled <= 0.0 {
            return Duration::ZERO;
        }
        if scaled >= self.max_backoff.as_secs_f64() {
            return self.max_backoff;
        }
        Duration::from_secs_f64(scaled)
    }

    fn delay_before_retry(&self, retry: u32) -> Duration {
        let base = self.backoff_for(retry);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = 1.0 - rand::thread_rng().gen_range(0.0..=self.jitter.min(1.0));
        base.mul_f64(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Generation client owning timeout and retry policy around a backend.
#[derive(Clone)]
pub struct GenerationClient {
    backend: Arc<dyn GenerationBackend>,
    retry: RetryPolicy,
    timeout: Duration,
    telemetry: Option<SimulationTelemetry>,
}

impl fmt::Debug for GenerationClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationClient")
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl GenerationClient {
    /// Wraps a backend with the default policy.
    #[must_use]
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            telemetry: None,
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replaces the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attaches telemetry used to record retries.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: SimulationTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Active retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Sends the prompt and returns the raw text, unmodified.
    ///
    /// Transport failures are retried per policy. Timeouts and blank
    /// responses fail immediately.
    pub async fn invoke(&self, prompt: &str) -> Result<String, GenerationError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match timeout(self.timeout, self.backend.generate(prompt)).await {
                Err(_) => {
                    return Err(GenerationError::Timeout {
                        after: self.timeout,
                    })
                }
                Ok(Ok(text)) if text.trim().is_empty() => {
                    return Err(GenerationError::EmptyResponse)
                }
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(err)) if attempt >= max_attempts => {
                    return Err(GenerationError::Transport {
                        attempts: attempt,
                        source: err,
                    })
                }
                Ok(Err(err)) => {
                    let delay = self.retry.delay_before_retry(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        ?delay,
                        error = %err,
                        "generation transport failure, retrying"
                    );
                    if let Some(tel) = &self.telemetry {
                        if let Err(log_err) = tel.log(
                            shared_logging::LogLevel::Warn,
                            "generation.retry",
                            json!({
                                "attempt": attempt,
                                "max_attempts": max_attempts,
                                "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                "error": err.message,
                            }),
                        ) {
                            tracing::warn!(error = %log_err, "failed to write telemetry record");
                        }
                    }
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    text: String,
}

/// HTTP backend for chat-completions or plain generate endpoints.
#[derive(Clone)]
pub struct HttpGenerationBackend {
    client: Client,
    settings: GenerationSettings,
    api_key: Option<String>,
}

impl fmt::Debug for HttpGenerationBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpGenerationBackend")
            .field("endpoint", &self.settings.endpoint)
            .field("protocol", &self.settings.protocol)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpGenerationBackend {
    /// Builds the backend. Timeouts are enforced by [`GenerationClient`].
    pub fn new(settings: GenerationSettings, api_key: Option<String>) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("decisionsim/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            settings,
            api_key,
        })
    }

    /// Request body for the configured protocol.
    pub fn request_body(&self, prompt: &str) -> Result<Value, TransportError> {
        let settings = &self.settings;
        let body = match settings.protocol {
            WireProtocol::Chat => serde_json::to_value(ChatRequest {
                model: &settings.model,
                messages: [ChatMessage {
                    role: "user",
                    content: prompt,
                }],
                temperature: settings.temperature,
            }),
            WireProtocol::Generate => serde_json::to_value(GenerateRequest {
                prompt,
                max_tokens: settings.max_tokens,
                temperature: settings.temperature,
                top_p: settings.top_p,
            }),
        };
        body.map_err(|err| TransportError::new(format!("encoding request body: {err}")))
    }

    /// Pulls the generated text out of a response body.
    ///
    /// Missing text yields an empty string, which the client reports as an
    /// empty response.
    pub fn response_text(protocol: WireProtocol, body: Value) -> Result<String, TransportError> {
        match protocol {
            WireProtocol::Chat => {
                let content = body
                    .get("choices")
                    .and_then(Value::as_array)
                    .and_then(|choices| choices.first())
                    .and_then(|choice| choice.pointer("/message/content"));
                Ok(match content {
                    Some(Value::String(text)) => text.clone(),
                    // content-part arrays: [{"type":"text","text":"..."}]
                    Some(Value::Array(parts)) => parts
                        .iter()
                        .filter_map(|part| part.get("text").and_then(Value::as_str))
                        .collect(),
                    _ => String::new(),
                })
            }
            WireProtocol::Generate => serde_json::from_value::<GenerateResponse>(body)
                .map(|resp| resp.text)
                .map_err(|err| TransportError::new(format!("invalid generate response: {err}"))),
        }
    }
}

#[async_trait]
impl GenerationBackend for HttpGenerationBackend {
    async fn generate(&self, prompt: &str) -> Result<String, TransportError> {
        let mut request = self
            .client
            .post(&self.settings.endpoint)
            .json(&self.request_body(prompt)?);
        if let Some(key) = &self.api_key {
            request = match self.settings.protocol {
                WireProtocol::Chat => request.bearer_auth(key),
                WireProtocol::Generate => request.header("x-api-key", key),
            };
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::status(status.as_u16(), &body));
        }
        let body: Value = response.json().await?;
        Self::response_text(self.settings.protocol, body)
    }
}

/// Offline backend returning a fixed, well-formed assessment.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopbackGenerationBackend;

#[async_trait]
impl GenerationBackend for LoopbackGenerationBackend {
    async fn generate(&self, _prompt: &str) -> Result<String, TransportError> {
        Ok(json!({
            "risk_level": "Medium",
            "risk_summary": "Offline assessment generated without a language model.",
            "best_case_outcomes": ["The decision proceeds as planned."],
            "worst_case_risks": ["Assumptions were not reviewed by a model."],
            "second_order_effects": [],
            "recommendation": "Re-run the simulation with a configured endpoint.",
        })
        .to_string())
    }
}

/// Backend replaying a fixed script of outcomes, recording every prompt.
///
/// Once the script runs out every call fails with a transport error.
#[derive(Debug, Default)]
pub struct ScriptedGenerationBackend {
    script: Mutex<VecDeque<Result<String, TransportError>>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedGenerationBackend {
    /// Creates a backend replaying `script` in order.
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = Result<String, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleeps before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Prompts received so far.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Number of calls received so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedGenerationBackend {
    async fn generate(&self, prompt: &str) -> Result<String, TransportError> {
        self.prompts.lock().push(prompt.to_owned());
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::new("script exhausted")))
    }
}
