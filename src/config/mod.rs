use log::info;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Args;
use crate::error::ClientError;
use crate::llm::{ ControlTokens, PollSettings, PullVia };
use crate::models::generation::clamp_temperature;
use crate::models::{ Endpoint, ModelRef };
use crate::session::ResponseStyle;
use crate::transport::RetryPolicy;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Client settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub models_dir: Option<PathBuf>,
    pub default_model: ModelRef,
    pub temperature: f32,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub list_timeout: Duration,
    pub pull_timeout: Duration,
    pub poll: PollSettings,
    pub pull_via: PullVia,
    pub ollama_bin: String,
    pub control_tokens: ControlTokens,
    pub style: ResponseStyle,
    pub endpoint: Endpoint,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            models_dir: None,
            default_model: ModelRef::new(DEFAULT_MODEL),
            temperature: 0.7,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(100),
            list_timeout: Duration::from_secs(30),
            pull_timeout: Duration::from_secs(1800),
            poll: PollSettings::default(),
            pull_via: PullVia::Command,
            ollama_bin: "ollama".to_string(),
            control_tokens: ControlTokens::default(),
            style: ResponseStyle::None,
            endpoint: Endpoint::Chat,
        }
    }
}

impl ClientConfig {
    pub fn from_args(args: &Args) -> Result<Self, ClientError> {
        let base_url = args.ollama_url.trim().trim_end_matches('/').to_string();
        url::Url
            ::parse(&base_url)
            .map_err(|e| ClientError::InvalidConfig(format!("--ollama-url '{}': {}", base_url, e)))?;

        let mut control_tokens = ControlTokens::default();
        for entry in &args.control_token {
            control_tokens.extend(entry.parse::<ControlTokens>()?);
        }

        let retry = RetryPolicy::new(
            args.max_attempts,
            Duration::from_millis(args.backoff_ms),
            Duration::from_millis(args.max_backoff_ms)
        );
        let poll = PollSettings::new(args.poll_attempts, Duration::from_millis(args.poll_interval_ms))?;

        let default_model = ModelRef::new(&args.model);
        if default_model.is_empty() {
            return Err(ClientError::InvalidConfig("--model must not be empty".into()));
        }

        Ok(Self {
            base_url,
            models_dir: args.models_dir.clone(),
            default_model,
            temperature: clamp_temperature(args.temperature),
            retry,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            list_timeout: Duration::from_secs(args.list_timeout_secs),
            pull_timeout: Duration::from_secs(args.pull_timeout_secs),
            poll,
            pull_via: args.pull_via.parse()?,
            ollama_bin: args.ollama_bin.clone(),
            control_tokens,
            style: args.style.parse()?,
            endpoint: args.endpoint.parse()?,
        })
    }

    pub fn log_summary(&self) {
        info!("--- Client Configuration ---");
        info!("Server URL: {}", self.base_url);
        info!(
            "Models Dir: {}",
            self.models_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "server default".into())
        );
        info!("Model: {}", self.default_model);
        info!("Endpoint: {}", self.endpoint.path());
        info!("Temperature: {}", self.temperature);
        info!(
            "Retry: {} attempt(s), backoff {:?} up to {:?}",
            self.retry.max_attempts,
            self.retry.base_delay,
            self.retry.max_delay
        );
        info!("Pull: {:?} (poll {} x {:?})", self.pull_via, self.poll.attempts(), self.poll.interval());
        info!("Control Tokens: {}", self.control_tokens.len());
        info!("----------------------------");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(extra: &[&str]) -> Result<ClientConfig, ClientError> {
        let mut argv = vec!["ollama-chat"];
        argv.extend_from_slice(extra);
        ClientConfig::from_args(&Args::parse_from(argv))
    }

    #[test]
    fn defaults_match_the_server_conventions() {
        let config = parse(&["--ollama-url", "http://localhost:11434/"]).unwrap();
        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.poll, PollSettings::default());
        assert_eq!(config.control_tokens.label("<think>"), Some("Thinking..."));
    }

    #[test]
    fn extra_control_tokens_are_merged() {
        let config = parse(&["--control-token", "<|thinking|>=Pondering"]).unwrap();
        assert_eq!(config.control_tokens.label("<|thinking|>"), Some("Pondering"));
        assert_eq!(config.control_tokens.label("<think>"), Some("Thinking..."));
    }

    #[test]
    fn rejects_unbounded_polling() {
        let err = parse(&["--poll-attempts", "20", "--poll-interval-ms", "5000"]).unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfig(_)));
    }

    #[test]
    fn temperature_is_clamped() {
        let config = parse(&["--temperature", "1.5"]).unwrap();
        assert_eq!(config.temperature, 1.0);
    }

    #[test]
    fn rejects_bad_url() {
        assert!(parse(&["--ollama-url", "localhost 11434"]).is_err());
    }
}
