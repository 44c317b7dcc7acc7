use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use super::{ClaudeAdapter, OpenAiAdapter};
use crate::config::{ProviderConfig, ProviderKind};

/// One prompt, independent of which provider serves it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub system: String,
    pub user: String,
    pub max_output_tokens: u32,
    pub temperature: Option<f32>,
}

impl ProviderRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>, max_output_tokens: u32) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_output_tokens,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderReply {
    pub text: String,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Typed reason a provider call gave up. The `Display` form is the stable
/// wire spelling (`timeout`, `provider_error:<message>`, `malformed_response`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderFailure {
    #[error("timeout")]
    Timeout,

    #[error("provider_error:{message}")]
    ProviderError { message: String, rate_limited: bool },

    #[error("malformed_response")]
    MalformedResponse,
}

impl ProviderFailure {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderFailure::ProviderError { rate_limited: true, .. })
    }
}

/// Fixed mapping between a `ProviderRequest` and one provider's wire format.
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn model(&self) -> &str;

    fn endpoint(&self) -> String;

    fn headers(&self) -> Vec<(&'static str, String)>;

    fn to_wire(&self, request: &ProviderRequest) -> Value;

    /// Reply text, or `None` when the body carries no usable text.
    fn text_from(&self, body: &Value) -> Option<String>;

    fn error_message(&self, body: &Value) -> Option<String> {
        body.get("error")
            .and_then(|e| e.get("message").or(Some(e)))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

/// Attempt budget, timeouts and backoff for provider calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Randomized wait after a rate-limit or capacity error.
    pub rate_limit_backoff: (Duration, Duration),
    /// Per-attempt wait after a timeout or an empty reply.
    pub transient_step: Duration,
    /// Per-attempt wait after any other provider error.
    pub error_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            connect_timeout: Duration::from_secs(45),
            request_timeout: Duration::from_secs(240),
            rate_limit_backoff: (Duration::from_secs(10), Duration::from_secs(20)),
            transient_step: Duration::from_secs(2),
            error_step: Duration::from_secs(7),
        }
    }
}

impl RetryPolicy {
    /// Same budget with every wait set to zero.
    pub fn without_backoff(self) -> Self {
        Self {
            rate_limit_backoff: (Duration::ZERO, Duration::ZERO),
            transient_step: Duration::ZERO,
            error_step: Duration::ZERO,
            ..self
        }
    }

    fn backoff(&self, failure: &ProviderFailure, attempt: u32) -> Duration {
        if failure.is_rate_limited() {
            let (low, high) = self.rate_limit_backoff;
            let low_ms = low.as_millis() as u64;
            let high_ms = (high.as_millis() as u64).max(low_ms);
            return Duration::from_millis(rand::thread_rng().gen_range(low_ms..=high_ms));
        }
        match failure {
            ProviderFailure::ProviderError { .. } => self.error_step * attempt,
            _ => self.transient_step * attempt,
        }
    }
}

/// Anything that can turn a prompt into reply text. The orchestrator only
/// sees this seam.
#[async_trait]
pub trait Invoke: Send + Sync {
    async fn invoke(
        &self,
        request: &ProviderRequest,
        deadline: Option<Instant>,
    ) -> Result<ProviderReply, ProviderFailure>;
}

struct AttemptFailure {
    failure: ProviderFailure,
    retryable: bool,
}

impl From<ProviderFailure> for AttemptFailure {
    fn from(failure: ProviderFailure) -> Self {
        Self {
            failure,
            retryable: true,
        }
    }
}

pub struct ProviderClient {
    http: Client,
    adapter: Box<dyn ProviderAdapter>,
    retry: RetryPolicy,
}

impl ProviderClient {
    pub fn new(adapter: Box<dyn ProviderAdapter>, retry: RetryPolicy) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .connect_timeout(retry.connect_timeout)
            .timeout(retry.request_timeout)
            .build()?;

        Ok(Self {
            http,
            adapter,
            retry,
        })
    }

    pub fn from_config(config: &ProviderConfig, retry: RetryPolicy) -> Result<Self, reqwest::Error> {
        let adapter: Box<dyn ProviderAdapter> = match config.kind {
            ProviderKind::OpenAi => Box::new(OpenAiAdapter::new(
                config.api_key.clone(),
                config.model.clone(),
                config.base_url.clone(),
            )),
            ProviderKind::Anthropic => Box::new(ClaudeAdapter::new(
                config.api_key.clone(),
                config.model.clone(),
                config.base_url.clone(),
            )),
        };
        Self::new(adapter, retry)
    }

    pub fn provider_name(&self) -> &'static str {
        self.adapter.name()
    }

    pub fn model(&self) -> &str {
        self.adapter.model()
    }

    async fn call_with_retries(&self, request: &ProviderRequest) -> Result<ProviderReply, ProviderFailure> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            info!(
                "Calling {} model {} (attempt {}/{})",
                self.adapter.name(),
                self.adapter.model(),
                attempt,
                max_attempts
            );

            let err = match self.attempt(request).await {
                Ok(text) => {
                    info!("{} replied with {} chars", self.adapter.name(), text.len());
                    return Ok(ProviderReply {
                        text,
                        attempts: attempt,
                    });
                }
                Err(err) => err,
            };

            if !err.retryable {
                warn!("{} failed permanently: {}", self.adapter.name(), err.failure);
                return Err(err.failure);
            }
            if attempt >= max_attempts {
                warn!(
                    "{} failed after {} attempts: {}",
                    self.adapter.name(),
                    attempt,
                    err.failure
                );
                return Err(err.failure);
            }

            let wait = self.retry.backoff(&err.failure, attempt);
            warn!(
                "{} attempt {} failed ({}), retrying in {:?}",
                self.adapter.name(),
                attempt,
                err.failure,
                wait
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn attempt(&self, request: &ProviderRequest) -> Result<String, AttemptFailure> {
        let mut builder = self.http.post(self.adapter.endpoint());
        for (name, value) in self.adapter.headers() {
            builder = builder.header(name, value);
        }

        let response = builder
            .json(&self.adapter.to_wire(request))
            .send()
            .await
            .map_err(transport_failure)?;

        let status = response.status();
        let raw = response.text().await.map_err(transport_failure)?;
        let body: Option<Value> = serde_json::from_str(&raw).ok();

        if !status.is_success() {
            let detail = body
                .as_ref()
                .and_then(|b| self.adapter.error_message(b))
                .unwrap_or_else(|| raw.chars().take(200).collect());
            let lower = detail.to_lowercase();
            let rate_limited = matches!(status.as_u16(), 429 | 529)
                || ["rate limit", "too many requests", "capacity", "overloaded"]
                    .iter()
                    .any(|needle| lower.contains(needle));
            // Bad requests, credentials and unknown models will not recover on retry.
            let retryable = rate_limited || !matches!(status.as_u16(), 400 | 401 | 403 | 404);

            return Err(AttemptFailure {
                failure: ProviderFailure::ProviderError {
                    message: format!("HTTP {}: {}", status.as_u16(), detail),
                    rate_limited,
                },
                retryable,
            });
        }

        let body = body.ok_or(ProviderFailure::MalformedResponse)?;
        match self.adapter.text_from(&body) {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(ProviderFailure::MalformedResponse.into()),
        }
    }
}

fn transport_failure(err: reqwest::Error) -> AttemptFailure {
    if err.is_timeout() {
        ProviderFailure::Timeout.into()
    } else {
        ProviderFailure::ProviderError {
            message: err.to_string(),
            rate_limited: false,
        }
        .into()
    }
}

#[async_trait]
impl Invoke for ProviderClient {
    /// Runs the retry loop, abandoning it with `Timeout` once `deadline`
    /// passes.
    async fn invoke(
        &self,
        request: &ProviderRequest,
        deadline: Option<Instant>,
    ) -> Result<ProviderReply, ProviderFailure> {
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.call_with_retries(request))
                .await
                .unwrap_or_else(|_| {
                    warn!("Deadline reached while calling {}", self.adapter.name());
                    Err(ProviderFailure::Timeout)
                }),
            None => self.call_with_retries(request).await,
        }
    }
}
