//! Platform REST client
//!
//! Every call goes through one retry loop: 5xx responses, rate limits and
//! connection failures are retried with capped exponential backoff plus
//! jitter. Other 4xx responses map straight to typed errors. A POST that
//! timed out may already have been applied, so only its connect failures
//! are retried.

use chorus_core::BotToken;
use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::PlatformError;

/// Client configuration
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// REST API base, without trailing slash
    pub api_base: String,
    /// Media CDN base, without trailing slash
    pub cdn_base: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Attempts per call, including the first
    pub max_attempts: u32,
    /// First backoff delay
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling
    pub retry_max_delay_ms: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            api_base: "https://discord.com/api/v10".to_string(),
            cdn_base: "https://cdn.discordapp.com".to_string(),
            timeout_secs: 15,
            max_attempts: 5,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
        }
    }
}

/// User agent sent with every request
pub const USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/chorus-relay/chorus, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Header carrying the zero-based attempt number
pub const ATTEMPT_HEADER: &str = "x-chorus-attempt";

/// Method plus path (or absolute URL for CDN downloads)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub method: Method,
    pub path: String,
    pub query: Vec<(&'static str, String)>,
}

impl Route {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: &'static str, value: impl ToString) -> Self {
        self.query.push((key, value.to_string()));
        self
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// A file sent as a multipart part
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub filename: String,
    pub data: Vec<u8>,
    pub description: Option<String>,
    /// Voice message metadata
    pub duration_secs: Option<f64>,
    pub waveform: Option<String>,
}

impl FileUpload {
    pub fn is_voice_message(&self) -> bool {
        self.duration_secs.is_some() && self.waveform.is_some()
    }

    fn content_type(&self) -> &'static str {
        if self.is_voice_message() {
            "audio/ogg"
        } else {
            "application/octet-stream"
        }
    }

    /// Entry for the `attachments` array of the JSON payload
    pub fn descriptor(&self, index: usize) -> Value {
        serde_json::json!({
            "id": index,
            "filename": self.filename,
            "description": self.description,
            "duration_secs": self.duration_secs,
            "waveform": self.waveform,
        })
    }
}

/// Request body
#[derive(Debug, Clone, Copy)]
pub enum Body<'a> {
    Empty,
    Json(&'a Value),
    /// `payload_json` plus `files[n]` parts
    Multipart {
        payload: &'a Value,
        files: &'a [FileUpload],
    },
}

/// Delay before retry `attempt` (1-based): exponential, capped, half jittered.
/// A server-provided delay takes precedence but is still capped.
pub fn retry_delay(base_ms: u64, max_ms: u64, attempt: u32, retry_after: Option<Duration>) -> Duration {
    let cap = Duration::from_millis(max_ms);
    if let Some(after) = retry_after {
        return after.min(cap);
    }

    let exp = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
    let delay = exp.min(max_ms);
    let jittered = rand::thread_rng().gen_range(delay / 2..=delay.max(1));
    Duration::from_millis(jittered)
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_transport(method: &Method, error: &reqwest::Error) -> bool {
    if error.is_connect() {
        return true;
    }
    *method != Method::POST && (error.is_timeout() || (error.is_request() && !error.is_builder()))
}

/// Authenticated client for the platform REST API
#[derive(Debug, Clone)]
pub struct PlatformClient {
    http: Client,
    config: PlatformConfig,
}

impl PlatformClient {
    pub fn new(config: PlatformConfig) -> Result<Self, PlatformError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PlatformError::ClientBuild(e.to_string()))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    fn url(&self, route: &Route) -> String {
        if route.path.starts_with("https://") || route.path.starts_with("http://") {
            route.path.clone()
        } else {
            format!("{}{}", self.config.api_base, route.path)
        }
    }

    fn build(&self, route: &Route, token: Option<&BotToken>, body: Body<'_>, attempt: u32) -> RequestBuilder {
        let mut request = self
            .http
            .request(route.method.clone(), self.url(route))
            .header(ATTEMPT_HEADER, attempt.to_string());

        if !route.query.is_empty() {
            request = request.query(&route.query);
        }
        if let Some(token) = token {
            request = request.header("Authorization", format!("Bot {}", token.expose()));
        }

        match body {
            Body::Empty => request,
            Body::Json(value) => request.json(value),
            Body::Multipart { payload, files } => {
                let mut form = Form::new().text("payload_json", payload.to_string());
                for (index, file) in files.iter().enumerate() {
                    let part = Part::bytes(file.data.clone())
                        .file_name(file.filename.clone())
                        .mime_str(file.content_type())
                        .unwrap_or_else(|_| Part::bytes(file.data.clone()).file_name(file.filename.clone()));
                    form = form.part(format!("files[{index}]"), part);
                }
                request.multipart(form)
            }
        }
    }

    /// Send with retries; returns the first successful response
    pub async fn send(
        &self,
        route: &Route,
        token: Option<&BotToken>,
        body: Body<'_>,
    ) -> Result<Response, PlatformError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = self.build(route, token, body, attempt - 1).send().await;

            let response = match result {
                Ok(response) => response,
                Err(error) => {
                    if attempt < max_attempts && is_retryable_transport(&route.method, &error) {
                        warn!("{} transport error (attempt {}): {}", route, attempt, error);
                        tokio::time::sleep(self.delay(attempt, None)).await;
                        continue;
                    }
                    return Err(PlatformError::Transport {
                        route: route.to_string(),
                        source: error,
                    });
                }
            };

            let status = response.status().as_u16();
            if response.status().is_success() {
                debug!("{} -> {}", route, status);
                return Ok(response);
            }

            if is_retryable_status(response.status()) {
                if attempt < max_attempts {
                    let retry_after = parse_retry_after(response.headers());
                    warn!("{} returned {} (attempt {}), retrying", route, status, attempt);
                    tokio::time::sleep(self.delay(attempt, retry_after)).await;
                    continue;
                }
                return Err(if status == 429 {
                    PlatformError::RateLimited {
                        route: route.to_string(),
                        attempts: attempt,
                    }
                } else {
                    PlatformError::Server {
                        route: route.to_string(),
                        status,
                        attempts: attempt,
                    }
                });
            }

            let body = response.text().await.unwrap_or_default();
            debug!("{} -> {}: {}", route, status, body);
            return Err(PlatformError::from_status(route.to_string(), status, body));
        }
    }

    fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_delay(
            self.config.retry_base_delay_ms,
            self.config.retry_max_delay_ms,
            attempt,
            retry_after,
        )
    }

    /// Send and decode a JSON response. An empty body decodes as `null`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        route: Route,
        token: Option<&BotToken>,
        body: Body<'_>,
    ) -> Result<T, PlatformError> {
        let response = self.send(&route, token, body).await?;
        let bytes = response.bytes().await.map_err(|source| PlatformError::Transport {
            route: route.to_string(),
            source,
        })?;

        let raw: &[u8] = if bytes.is_empty() { b"null" } else { &bytes };
        serde_json::from_slice(raw).map_err(|source| PlatformError::Decode {
            route: route.to_string(),
            source,
        })
    }

    /// Send and discard the response body
    pub async fn call_empty(
        &self,
        route: Route,
        token: Option<&BotToken>,
        body: Body<'_>,
    ) -> Result<(), PlatformError> {
        self.send(&route, token, body).await.map(|_| ())
    }

    /// Fetch raw bytes, e.g. an attachment or emoji from the CDN
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, PlatformError> {
        let route = Route::get(url);
        let response = self.send(&route, None, Body::Empty).await?;
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|source| PlatformError::Transport {
                route: route.to_string(),
                source,
            })
    }
}
