use serde::{ Deserialize, Serialize };
use std::str::FromStr;

use super::{ Message, ModelRef, Role };
use crate::error::ClientError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// `POST /api/chat` with the whole message list.
    Chat,
    /// `POST /api/generate` with the latest user text as `prompt`.
    Generate,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Chat => "/api/chat",
            Endpoint::Generate => "/api/generate",
        }
    }
}

impl FromStr for Endpoint {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chat" => Ok(Endpoint::Chat),
            "generate" => Ok(Endpoint::Generate),
            _ => Err(ClientError::InvalidConfig(format!("Unsupported endpoint: {}", s))),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
struct Options {
    temperature: f32,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
struct WireMessage {
    role: Role,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
struct ChatBody {
    model: ModelRef,
    messages: Vec<WireMessage>,
    stream: bool,
    options: Options,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
struct GenerateBody {
    model: ModelRef,
    prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    stream: bool,
    options: Options,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
enum Payload {
    Chat(ChatBody),
    Generate(GenerateBody),
}

/// One request to the inference server, built fresh for every turn.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    endpoint: Endpoint,
    payload: Payload,
}

impl GenerationRequest {
    pub fn prompt(model: &ModelRef, prompt: &str, temperature: f32, stream: bool) -> Self {
        Self {
            endpoint: Endpoint::Generate,
            payload: Payload::Generate(GenerateBody {
                model: model.clone(),
                prompt: prompt.trim().to_string(),
                images: Vec::new(),
                stream,
                options: Options { temperature: clamp_temperature(temperature) },
            }),
        }
    }

    /// Builds the request for `endpoint` from a conversation snapshot.
    ///
    /// The generate endpoint carries no history: it sends the most recent
    /// user message (and its attachment) as the prompt.
    pub fn from_conversation(
        endpoint: Endpoint,
        model: &ModelRef,
        messages: &[Message],
        temperature: f32,
        stream: bool
    ) -> Self {
        let options = Options { temperature: clamp_temperature(temperature) };
        let payload = match endpoint {
            Endpoint::Chat =>
                Payload::Chat(ChatBody {
                    model: model.clone(),
                    messages: messages.iter().map(to_wire).collect(),
                    stream,
                    options,
                }),
            Endpoint::Generate => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role() == Role::User);
                Payload::Generate(GenerateBody {
                    model: model.clone(),
                    prompt: last_user.map(|m| m.content().trim().to_string()).unwrap_or_default(),
                    images: last_user
                        .and_then(|m| m.attachment())
                        .map(|a| vec![a.encoded().to_string()])
                        .unwrap_or_default(),
                    stream,
                    options,
                })
            }
        };
        Self { endpoint, payload }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn model(&self) -> &ModelRef {
        match &self.payload {
            Payload::Chat(body) => &body.model,
            Payload::Generate(body) => &body.model,
        }
    }

    pub fn is_streaming(&self) -> bool {
        match &self.payload {
            Payload::Chat(body) => body.stream,
            Payload::Generate(body) => body.stream,
        }
    }

    pub fn temperature(&self) -> f32 {
        match &self.payload {
            Payload::Chat(body) => body.options.temperature,
            Payload::Generate(body) => body.options.temperature,
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, ClientError> {
        Ok(serde_json::to_value(&self.payload)?)
    }

    /// Payload description for logs; attachment bytes are never included.
    pub fn summary(&self) -> String {
        match &self.payload {
            Payload::Chat(body) =>
                format!(
                    "chat model={} messages={} attachments={} temperature={}",
                    body.model,
                    body.messages.len(),
                    body.messages
                        .iter()
                        .map(|m| m.images.len())
                        .sum::<usize>(),
                    body.options.temperature
                ),
            Payload::Generate(body) =>
                format!(
                    "generate model={} prompt_chars={} attachments={} temperature={}",
                    body.model,
                    body.prompt.chars().count(),
                    body.images.len(),
                    body.options.temperature
                ),
        }
    }
}

fn to_wire(message: &Message) -> WireMessage {
    WireMessage {
        role: message.role(),
        content: message.content().to_string(),
        images: message
            .attachment()
            .map(|a| vec![a.encoded().to_string()])
            .unwrap_or_default(),
    }
}

pub fn clamp_temperature(temperature: f32) -> f32 {
    if temperature.is_nan() { 0.0 } else { temperature.clamp(0.0, 1.0) }
}

/// Counters reported by the server on the final record of a stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct GenerationStats {
    #[serde(default)]
    pub total_duration: Option<u64>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub eval_duration: Option<u64>,
    #[serde(default)]
    pub done_reason: Option<String>,
}

impl GenerationStats {
    pub fn tokens_per_second(&self) -> Option<f64> {
        match (self.eval_count, self.eval_duration) {
            (Some(count), Some(nanos)) if nanos > 0 => Some((count as f64) / ((nanos as f64) / 1e9)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl From<ClientError> for StreamFailure {
    fn from(err: ClientError) -> Self {
        let status = match &err {
            ClientError::PermanentRequest { status, .. } => Some(*status),
            _ => None,
        };
        Self { status, message: err.to_string() }
    }
}

/// One decoded unit of a streamed answer.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamChunk {
    /// Text to append to the assistant message.
    Content(String),
    /// A recognised control token; shown as transient status, never stored.
    Control {
        token: String,
        label: String,
    },
    /// The server marked the stream done.
    Finished(GenerationStats),
    /// The stream could not start or broke off; always the last chunk.
    Error(StreamFailure),
}

impl StreamChunk {
    pub fn error(err: ClientError) -> Self {
        StreamChunk::Error(err.into())
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            StreamChunk::Content(text) => Some(text),
            _ => None,
        }
    }
}
