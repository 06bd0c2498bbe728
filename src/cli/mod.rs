pub mod repl;

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Terminal chat front-end for a local Ollama server", long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Base URL of the Ollama API (e.g., http://localhost:11434)
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    pub ollama_url: String,

    /// Model storage path handed to the pull command
    #[arg(long, env = "OLLAMA_MODELS")]
    pub models_dir: Option<PathBuf>,

    // --- Generation Args ---
    /// Model to chat with (e.g., llama3.2, llama3.2-vision, deepseek-r1:7b)
    #[arg(long, env = "CHAT_MODEL", default_value = "llama3.2")]
    pub model: String,

    /// Sampling temperature, clamped to 0.0..=1.0
    #[arg(long, env = "CHAT_TEMPERATURE", default_value = "0.7")]
    pub temperature: f32,

    /// Endpoint used for answers (chat, generate)
    #[arg(long, env = "CHAT_ENDPOINT", default_value = "chat")]
    pub endpoint: String,

    /// Directive appended to every user message (detailed, concise, creative, none)
    #[arg(long, env = "CHAT_STYLE", default_value = "none")]
    pub style: String,

    /// Extra control marker as TOKEN=LABEL, shown as status instead of content. Repeatable.
    #[arg(long = "control-token", env = "CONTROL_TOKENS", value_delimiter = ',')]
    pub control_token: Vec<String>,

    // --- Retry Args ---
    /// Total attempts per request for transient failures (1 disables retry)
    #[arg(long, env = "MAX_ATTEMPTS", default_value = "4")]
    pub max_attempts: u32,

    /// Initial backoff between attempts in milliseconds; doubles each retry
    #[arg(long, env = "BACKOFF_MS", default_value = "1000")]
    pub backoff_ms: u64,

    /// Upper bound for a single backoff in milliseconds
    #[arg(long, env = "MAX_BACKOFF_MS", default_value = "10000")]
    pub max_backoff_ms: u64,

    /// Timeout for generation requests in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "100")]
    pub request_timeout_secs: u64,

    /// Timeout for listing installed models in seconds
    #[arg(long, env = "LIST_TIMEOUT_SECS", default_value = "30")]
    pub list_timeout_secs: u64,

    // --- Pull Args ---
    /// How models are pulled (command, api)
    #[arg(long, env = "PULL_VIA", default_value = "command")]
    pub pull_via: String,

    /// Ollama executable used when pulling via command
    #[arg(long, env = "OLLAMA_BIN", default_value = "ollama")]
    pub ollama_bin: String,

    /// Timeout for a pull through the API in seconds
    #[arg(long, env = "PULL_TIMEOUT_SECS", default_value = "1800")]
    pub pull_timeout_secs: u64,

    /// Registry checks after a successful pull before giving up
    #[arg(long, env = "POLL_ATTEMPTS", default_value = "3")]
    pub poll_attempts: u32,

    /// Delay between registry checks in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "2000")]
    pub poll_interval_ms: u64,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
