mod http;
#[cfg(test)]
pub(crate) mod testing;

pub use http::ReqwestExchange;
pub use reqwest::Method;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{ Stream, StreamExt };
use log::{ debug, warn };
use serde::de::DeserializeOwned;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::ClientError;

/// Statuses that are worth another attempt.
pub const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ExchangeError>> + Send>>;

/// Failure of a single HTTP exchange, before any retry decision.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid request: {0}")]
    Request(String),
}

impl ExchangeError {
    /// Connection failures are always retried. A timeout is retried only for
    /// GET, since a POST may still be running on the server.
    fn is_transient(&self, method: &Method) -> bool {
        match self {
            ExchangeError::Connect(_) => true,
            ExchangeError::Timeout(_) => *method == Method::GET,
            ExchangeError::Request(_) => false,
        }
    }
}

impl From<ExchangeError> for ClientError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Connect(last) => ClientError::TransientNetwork { attempts: 1, last },
            ExchangeError::Timeout(after) => ClientError::Timeout { after },
            ExchangeError::Request(msg) => ClientError::InvalidConfig(msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub streaming: bool,
    pub timeout: Duration,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
            streaming: false,
            timeout,
        }
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value, timeout: Duration) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
            streaming: false,
            timeout,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }
}

pub struct ApiResponse {
    status: u16,
    retry_after: Option<Duration>,
    body: ByteStream,
}

impl std::fmt::Debug for ApiResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiResponse")
            .field("status", &self.status)
            .field("retry_after", &self.retry_after)
            .finish_non_exhaustive()
    }
}

impl ApiResponse {
    pub fn new(status: u16, retry_after: Option<Duration>, body: ByteStream) -> Self {
        Self { status, retry_after, body }
    }

    pub fn from_bytes(status: u16, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self::new(status, None, Box::pin(futures::stream::once(async move { Ok(body) })))
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn into_body(self) -> ByteStream {
        self.body
    }

    pub async fn text(self) -> Result<String, ClientError> {
        let mut body = self.body;
        let mut buf = Vec::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        let text = self.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Turns a non-success status into `PermanentRequest`, reading the body
    /// for the message.
    pub async fn error_for_status(self) -> Result<Self, ClientError> {
        if self.is_success() {
            return Ok(self);
        }
        let status = self.status;
        let body = self.text().await.unwrap_or_default();
        Err(ClientError::PermanentRequest { status, body })
    }
}

/// Performs exactly one HTTP exchange. The retry loop lives in [`Transport`].
#[async_trait]
pub trait HttpExchange: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ExchangeError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

pub fn is_transient_status(status: u16) -> bool {
    TRANSIENT_STATUSES.contains(&status)
}

/// HTTP access to the inference server with bounded retry on transient
/// conditions. Holds no state between calls.
#[derive(Clone)]
pub struct Transport {
    exchange: Arc<dyn HttpExchange>,
    policy: RetryPolicy,
}

impl Transport {
    pub fn new(exchange: Arc<dyn HttpExchange>, policy: RetryPolicy) -> Self {
        Self { exchange, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sends `request`, retrying connection failures, GET timeouts and the
    /// statuses in [`TRANSIENT_STATUSES`] up to the policy's attempt budget. Any other
    /// status, including 4xx, is returned as a response on the first try.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let (last, retry_after) = match self.exchange.execute(request).await {
                Ok(response) if is_transient_status(response.status()) => {
                    let status = response.status();
                    let retry_after = response.retry_after();
                    let body = response.text().await.unwrap_or_default();
                    (format!("status {} - {}", status, body.trim()), retry_after)
                }
                Ok(response) => {
                    if attempt > 1 {
                        debug!(
                            "{} {} succeeded on attempt {}/{}",
                            request.method,
                            request.path,
                            attempt,
                            max_attempts
                        );
                    }
                    return Ok(response);
                }
                Err(e) if e.is_transient(&request.method) => (e.to_string(), None),
                Err(e) => {
                    return Err(e.into());
                }
            };

            if attempt >= max_attempts {
                warn!(
                    "{} {} giving up after {} attempt(s): {}",
                    request.method,
                    request.path,
                    attempt,
                    last
                );
                return Err(ClientError::TransientNetwork { attempts: attempt, last });
            }

            let delay = self.policy.delay_after(attempt, retry_after);
            warn!(
                "{} {} attempt {}/{} failed ({}), retrying in {:?}",
                request.method,
                request.path,
                attempt,
                max_attempts,
                last,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedExchange;
    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    fn tags_request() -> ApiRequest {
        ApiRequest::get("/api/tags", Duration::from_secs(30))
    }

    #[tokio::test]
    async fn transient_failures_below_budget_then_success() {
        let exchange = Arc::new(
            ScriptedExchange::new(
                vec![
                    Err(ExchangeError::Connect("refused".into())),
                    Ok(ApiResponse::from_bytes(503, "loading")),
                    Ok(ApiResponse::from_bytes(200, "{\"models\":[]}"))
                ]
            )
        );
        let transport = Transport::new(exchange.clone(), fast_policy(4));

        let response = transport.send(&tags_request()).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(exchange.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_budget_reports_last_failure() {
        let exchange = Arc::new(
            ScriptedExchange::new(
                vec![
                    Ok(ApiResponse::from_bytes(502, "bad gateway")),
                    Ok(ApiResponse::from_bytes(500, "boom")),
                    Ok(ApiResponse::from_bytes(200, "never reached"))
                ]
            )
        );
        let transport = Transport::new(exchange.clone(), fast_policy(2));

        let err = transport.send(&tags_request()).await.unwrap_err();

        assert_eq!(exchange.calls(), 2);
        match err {
            ClientError::TransientNetwork { attempts, last } => {
                assert_eq!(attempts, 2);
                assert_eq!(last, "status 500 - boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn permanent_status_is_not_retried() {
        for status in [400, 404] {
            let exchange = Arc::new(
                ScriptedExchange::new(vec![Ok(ApiResponse::from_bytes(status, "nope"))])
            );
            let transport = Transport::new(exchange.clone(), fast_policy(4));

            let response = transport.send(&tags_request()).await.unwrap();

            assert_eq!(response.status(), status);
            assert_eq!(exchange.calls(), 1);
            let err = response.error_for_status().await.unwrap_err();
            assert!(matches!(err, ClientError::PermanentRequest { status: s, .. } if s == status));
        }
    }

    #[tokio::test]
    async fn invalid_request_is_not_retried() {
        let exchange = Arc::new(
            ScriptedExchange::new(vec![Err(ExchangeError::Request("bad url".into()))])
        );
        let transport = Transport::new(exchange.clone(), fast_policy(4));

        let err = transport.send(&tags_request()).await.unwrap_err();

        assert_eq!(exchange.calls(), 1);
        assert!(matches!(err, ClientError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn timed_out_post_is_not_resent() {
        let exchange = Arc::new(
            ScriptedExchange::new(
                vec![
                    Err(ExchangeError::Timeout(Duration::from_secs(1800))),
                    Ok(ApiResponse::from_bytes(200, "{\"status\":\"success\"}"))
                ]
            )
        );
        let transport = Transport::new(exchange.clone(), fast_policy(4));
        let pull = ApiRequest::post(
            "/api/pull",
            serde_json::json!({"model": "llama3.2", "stream": false}),
            Duration::from_secs(1800)
        );

        let err = transport.send(&pull).await.unwrap_err();

        assert_eq!(exchange.calls(), 1);
        assert!(matches!(err, ClientError::Timeout { after } if after == Duration::from_secs(1800)));
    }

    #[tokio::test]
    async fn refused_post_is_retried() {
        let exchange = Arc::new(
            ScriptedExchange::new(
                vec![
                    Err(ExchangeError::Connect("refused".into())),
                    Ok(ApiResponse::from_bytes(200, "{}"))
                ]
            )
        );
        let transport = Transport::new(exchange.clone(), fast_policy(4));
        let request = ApiRequest::post("/api/chat", serde_json::json!({}), Duration::from_secs(5));

        assert_eq!(transport.send(&request).await.unwrap().status(), 200);
        assert_eq!(exchange.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_grows_exponentially() {
        let exchange = Arc::new(
            ScriptedExchange::new(
                vec![
                    Err(ExchangeError::Timeout(Duration::from_secs(1))),
                    Err(ExchangeError::Timeout(Duration::from_secs(1))),
                    Ok(ApiResponse::from_bytes(200, "ok"))
                ]
            )
        );
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(10));
        let transport = Transport::new(exchange, policy);

        let started = tokio::time::Instant::now();
        transport.send(&tags_request()).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn retry_after_hint_is_capped() {
        let policy = RetryPolicy::new(4, Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(policy.delay_after(1, None), Duration::from_secs(1));
        assert_eq!(policy.delay_after(3, None), Duration::from_secs(4));
        assert_eq!(policy.delay_after(9, None), Duration::from_secs(10));
        assert_eq!(policy.delay_after(1, Some(Duration::from_secs(60))), Duration::from_secs(10));
        assert_eq!(policy.delay_after(1, Some(Duration::from_secs(2))), Duration::from_secs(2));
    }
}
