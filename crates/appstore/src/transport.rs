use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use thiserror::Error;

/// Outbound request built by an application connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDto {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RequestDto {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serializes `payload` as the body and sets a JSON content type.
    pub fn with_json(self, payload: &Value) -> Self {
        self.with_header("content-type", "application/json")
            .with_body(payload.to_string())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDto {
    pub status: u16,
    pub body: String,
}

impl ResponseDto {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Failure to get any response at all. A non-2xx answer is not a transport error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection to {url} failed: {message}")]
    Connect { url: String, message: String },
    #[error("request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        request: RequestDto,
        timeout: Duration,
    ) -> Result<ResponseDto, TransportError>;
}

#[derive(Clone, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: RequestDto,
        timeout: Duration,
    ) -> Result<ResponseDto, TransportError> {
        let url = request.url.clone();
        let mut builder = self
            .http
            .request(request.method, request.url.as_str())
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|error| classify_error(&url, timeout, &error))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|error| classify_error(&url, timeout, &error))?;

        tracing::debug!(
            target: "appstore.transport",
            url = %url,
            status,
            "outbound request completed",
        );
        Ok(ResponseDto { status, body })
    }
}

fn classify_error(url: &str, timeout: Duration, error: &reqwest::Error) -> TransportError {
    if error.is_timeout() {
        return TransportError::Timeout {
            url: url.to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        };
    }
    if error.is_connect() {
        return TransportError::Connect {
            url: url.to_string(),
            message: error.to_string(),
        };
    }
    TransportError::Request {
        url: url.to_string(),
        message: error.to_string(),
    }
}
