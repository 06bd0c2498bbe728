use async_trait::async_trait;
use futures::StreamExt;
use log::debug;
use reqwest::header::{ HeaderMap, RETRY_AFTER };
use reqwest::Client as HttpClient;
use std::time::Duration;
use url::Url;

use super::{ ApiRequest, ApiResponse, ExchangeError, HttpExchange };
use crate::error::ClientError;

/// [`HttpExchange`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestExchange {
    http: HttpClient,
    base_url: Url,
}

impl ReqwestExchange {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = Url::parse(base_url).map_err(|e|
            ClientError::InvalidConfig(format!("Invalid server URL '{}': {}", base_url, e))
        )?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidConfig(format!("Invalid server URL '{}'", base_url)));
        }
        let http = HttpClient::builder()
            .build()
            .map_err(|e| ClientError::InvalidConfig(format!("HTTP client: {}", e)))?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> Result<Url, ExchangeError> {
        self.base_url.join(path).map_err(|e| ExchangeError::Request(format!("{}: {}", path, e)))
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> ExchangeError {
    if err.is_builder() {
        ExchangeError::Request(err.to_string())
    } else if err.is_timeout() {
        ExchangeError::Timeout(timeout)
    } else {
        ExchangeError::Connect(err.to_string())
    }
}

/// Numeric `Retry-After` only; HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl HttpExchange for ReqwestExchange {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ExchangeError> {
        let url = self.url_for(&request.path)?;
        let timeout = request.timeout;
        debug!("{} {} (streaming={})", request.method, url, request.streaming);

        let mut builder = self.http.request(request.method.clone(), url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        // A total timeout would cut a long answer off mid-stream, so streaming
        // requests only bound the wait for the response head here. The
        // decoder bounds each body read.
        let response = if request.streaming {
            match tokio::time::timeout(timeout, builder.send()).await {
                Ok(result) => result.map_err(|e| classify(e, timeout))?,
                Err(_) => {
                    return Err(ExchangeError::Timeout(timeout));
                }
            }
        } else {
            builder
                .timeout(timeout)
                .send().await
                .map_err(|e| classify(e, timeout))?
        };

        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let body = response.bytes_stream().map(move |chunk| chunk.map_err(|e| classify(e, timeout)));

        Ok(ApiResponse::new(status, retry_after, Box::pin(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_api_paths_onto_base() {
        let exchange = ReqwestExchange::new("http://localhost:11434").unwrap();
        assert_eq!(
            exchange.url_for("/api/tags").unwrap().as_str(),
            "http://localhost:11434/api/tags"
        );
    }

    #[test]
    fn retry_after_accepts_whole_seconds_only() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, "-3".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn rejects_unparseable_base_url() {
        assert!(matches!(ReqwestExchange::new("not a url"), Err(ClientError::InvalidConfig(_))));
        assert!(matches!(ReqwestExchange::new("mailto:a@b.c"), Err(ClientError::InvalidConfig(_))));
    }
}
