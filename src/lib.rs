pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod session;
pub mod transport;

pub use config::ClientConfig;
pub use error::ClientError;
pub use llm::OllamaClient;
pub use models::{ Message, ModelRef, Role, StreamChunk };
pub use session::{ ChatSession, DisplayUpdate, ResponseStyle, TurnState };

use cli::Args;
use log::{ info, warn };
use std::error::Error;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = ClientConfig::from_args(&args)?;
    config.log_summary();

    let client = OllamaClient::from_config(config)?;
    let models = client.list_models().await;
    if models.is_empty() {
        warn!("No models reported by {}", client.config().base_url);
    } else {
        info!("Available models: {:?}", models.iter().map(|m| m.as_str()).collect::<Vec<_>>());
    }

    let session = ChatSession::new(client);
    cli::repl::run_repl(session).await
}
