use log::info;
use serde::Deserialize;
use std::sync::Arc;

use super::provisioner::{ ModelProvisioner, PollSettings, Provisioned };
use super::pull::{ ApiPull, CommandPull, PullAction, PullVia };
use super::registry::{ availability, suggest, Availability, ModelCatalog, ModelRegistry };
use super::stream::{ ChunkStream, StreamDecoder };
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::models::{ GenerationRequest, ModelRef };
use crate::transport::{ ApiRequest, HttpExchange, ReqwestExchange, Transport };

/// Everything a session needs from the inference server: model listing,
/// provisioning and streamed generation. Cheap to clone; holds no
/// conversation state, so one instance can serve many sessions.
#[derive(Clone)]
pub struct OllamaClient {
    transport: Transport,
    registry: Arc<dyn ModelCatalog>,
    provisioner: ModelProvisioner,
    decoder: StreamDecoder,
    config: Arc<ClientConfig>,
}

#[derive(Deserialize)]
struct CompleteResponse {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    message: Option<CompleteMessage>,
}

#[derive(Deserialize)]
struct CompleteMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    pub fn from_config(config: ClientConfig) -> Result<Self, ClientError> {
        let exchange = Arc::new(ReqwestExchange::new(&config.base_url)?);
        let transport = Transport::new(exchange, config.retry);
        let puller: Arc<dyn PullAction> = match config.pull_via {
            PullVia::Command =>
                Arc::new(
                    CommandPull::new(config.ollama_bin.clone())
                        .with_host(config.base_url.clone())
                        .with_models_dir(config.models_dir.clone())
                ),
            PullVia::Api => Arc::new(ApiPull::new(transport.clone(), config.pull_timeout)),
        };
        Ok(Self::assemble(transport, puller, config))
    }

    /// Builds a client over a caller-supplied exchange and pull action.
    pub fn with_parts(
        config: ClientConfig,
        exchange: Arc<dyn HttpExchange>,
        puller: Arc<dyn PullAction>
    ) -> Self {
        let transport = Transport::new(exchange, config.retry);
        Self::assemble(transport, puller, config)
    }

    fn assemble(transport: Transport, puller: Arc<dyn PullAction>, config: ClientConfig) -> Self {
        let registry: Arc<dyn ModelCatalog> = Arc::new(
            ModelRegistry::new(transport.clone(), config.list_timeout)
        );
        let provisioner = ModelProvisioner::new(registry.clone(), puller);
        let decoder = StreamDecoder::new(
            transport.clone(),
            config.control_tokens.clone(),
            config.request_timeout
        );
        info!(
            "Ollama client configured: BaseURL={}, Retry={:?}, Poll={:?}",
            config.base_url,
            config.retry,
            config.poll
        );
        Self {
            transport,
            registry,
            provisioner,
            decoder,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn list_models(&self) -> Vec<ModelRef> {
        self.registry.list_models().await
    }

    pub async fn availability(&self, model: &ModelRef) -> Availability {
        availability(model, &self.registry.list_models().await)
    }

    pub async fn is_available(&self, model: &ModelRef) -> bool {
        self.registry.is_available(model).await
    }

    /// Installed models whose names resemble `model`.
    pub async fn suggestions(&self, model: &ModelRef) -> Vec<ModelRef> {
        suggest(model, &self.registry.list_models().await, 3)
    }

    pub async fn ensure_model(
        &self,
        model: &ModelRef,
        poll: Option<PollSettings>
    ) -> Result<Provisioned, ClientError> {
        self.provisioner.ensure_model(model, poll.unwrap_or(self.config.poll)).await
    }

    pub async fn ensure_available(&self, model: &ModelRef) -> Result<Provisioned, ClientError> {
        self.provisioner.ensure_available(model, self.config.poll).await
    }

    pub fn stream_generate(&self, request: &GenerationRequest) -> ChunkStream {
        self.decoder.stream_generate(request)
    }

    /// Non-streaming generation: one JSON object with the whole answer.
    pub async fn complete(&self, request: &GenerationRequest) -> Result<String, ClientError> {
        let body = request.to_json()?;
        let api_request = ApiRequest::post(
            request.endpoint().path(),
            body,
            self.config.request_timeout
        );
        let response = self.transport.send(&api_request).await?.error_for_status().await?;
        let parsed: CompleteResponse = response.json().await?;
        let text = parsed.response
            .or_else(|| parsed.message.map(|m| m.content))
            .unwrap_or_default();
        Ok(html_escape::decode_html_entities(&text).into_owned())
    }
}
