use async_trait::async_trait;
use log::{ info, warn };
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio::process::Command;

use crate::error::ClientError;
use crate::models::ModelRef;
use crate::transport::{ ApiRequest, Transport };

/// Raw result of a pull: whether it worked, plus whatever it printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOutcome {
    pub success: bool,
    pub output: String,
}

impl PullOutcome {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self { success: true, output: output.into() }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self { success: false, output: output.into() }
    }
}

/// Downloads a model onto the server. Opaque and possibly slow.
#[async_trait]
pub trait PullAction: Send + Sync {
    async fn pull(&self, model: &ModelRef) -> PullOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullVia {
    Command,
    Api,
}

impl FromStr for PullVia {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "command" | "cli" => Ok(PullVia::Command),
            "api" => Ok(PullVia::Api),
            _ => Err(ClientError::InvalidConfig(format!("Unsupported pull method: {}", s))),
        }
    }
}

/// Runs `<program> pull <model>`, e.g. `ollama pull llama3.2`.
#[derive(Debug, Clone)]
pub struct CommandPull {
    program: String,
    host: Option<String>,
    models_dir: Option<PathBuf>,
}

impl CommandPull {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            host: None,
            models_dir: None,
        }
    }

    /// Points the command at the same server the client talks to.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_models_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.models_dir = dir;
        self
    }
}

#[async_trait]
impl PullAction for CommandPull {
    async fn pull(&self, model: &ModelRef) -> PullOutcome {
        info!("Pulling model: {}", model);
        let mut cmd = Command::new(&self.program);
        cmd.arg("pull").arg(model.as_str());
        if let Some(host) = &self.host {
            cmd.env("OLLAMA_HOST", host);
        }
        if let Some(dir) = &self.models_dir {
            cmd.env("OLLAMA_MODELS", dir);
        }

        match cmd.output().await {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                info!("Model pull successful for '{}'", model);
                PullOutcome::succeeded(stdout)
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                warn!("'{} pull {}' exited with {}: {}", self.program, model, output.status, stderr);
                PullOutcome::failed(stderr)
            }
            Err(e) => {
                warn!("Failed to run '{}': {}", self.program, e);
                PullOutcome::failed(format!("failed to run '{}': {}", self.program, e))
            }
        }
    }
}

#[derive(Deserialize)]
struct PullStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: Option<String>,
}

/// Pulls through `POST /api/pull` with streaming disabled.
#[derive(Clone)]
pub struct ApiPull {
    transport: Transport,
    timeout: Duration,
}

impl ApiPull {
    pub fn new(transport: Transport, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    async fn request_pull(&self, model: &ModelRef) -> Result<PullStatus, ClientError> {
        let body = json!({ "model": model.as_str(), "stream": false });
        let request = ApiRequest::post("/api/pull", body, self.timeout);
        let response = self.transport.send(&request).await?.error_for_status().await?;
        response.json::<PullStatus>().await
    }
}

#[async_trait]
impl PullAction for ApiPull {
    async fn pull(&self, model: &ModelRef) -> PullOutcome {
        info!("Pulling model via API: {}", model);
        match self.request_pull(model).await {
            Ok(PullStatus { error: Some(error), .. }) => PullOutcome::failed(error),
            Ok(PullStatus { status, .. }) if status == "success" => PullOutcome::succeeded(status),
            Ok(PullStatus { status, .. }) => PullOutcome::failed(format!("unexpected status '{}'", status)),
            Err(e) => PullOutcome::failed(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::ScriptedExchange;
    use crate::transport::{ ApiResponse, RetryPolicy };
    use std::sync::Arc;

    fn api_pull(response: ApiResponse) -> (ApiPull, Arc<ScriptedExchange>) {
        let exchange = Arc::new(ScriptedExchange::new(vec![Ok(response)]));
        let transport = Transport::new(exchange.clone(), RetryPolicy::no_retry());
        (ApiPull::new(transport, Duration::from_secs(5)), exchange)
    }

    #[tokio::test]
    async fn api_pull_success() {
        let (pull, exchange) = api_pull(ApiResponse::from_bytes(200, r#"{"status":"success"}"#));

        let outcome = pull.pull(&ModelRef::new("llama3.2")).await;

        assert_eq!(outcome, PullOutcome::succeeded("success"));
        let sent = exchange.requests();
        assert_eq!(sent[0].path, "/api/pull");
        assert_eq!(sent[0].body, Some(json!({"model": "llama3.2", "stream": false})));
    }

    #[tokio::test]
    async fn api_pull_reports_server_error() {
        let (pull, _) = api_pull(
            ApiResponse::from_bytes(500, r#"{"error":"pull model manifest: file does not exist"}"#)
        );

        let outcome = pull.pull(&ModelRef::new("nope")).await;

        assert!(!outcome.success);
        assert!(outcome.output.contains("file does not exist"));
    }

    #[tokio::test]
    async fn missing_program_is_a_failed_pull() {
        let pull = CommandPull::new("definitely-not-an-installed-binary-7f3a");

        let outcome = pull.pull(&ModelRef::new("llama3.2")).await;

        assert!(!outcome.success);
        assert!(outcome.output.contains("failed to run"));
    }

    #[test]
    fn parses_pull_method() {
        assert_eq!("API".parse::<PullVia>().unwrap(), PullVia::Api);
        assert_eq!("command".parse::<PullVia>().unwrap(), PullVia::Command);
        assert!("ftp".parse::<PullVia>().is_err());
    }
}
