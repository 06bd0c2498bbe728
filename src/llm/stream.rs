use futures::{ Stream, StreamExt };
use log::{ debug, warn };
use serde::Deserialize;
use std::collections::{ HashMap, VecDeque };
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ClientError;
use crate::models::{ GenerationRequest, GenerationStats, StreamChunk, StreamFailure };
use crate::transport::{ ApiRequest, ByteStream, ExchangeError, Transport };

pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Reserved strings a model may emit to signal status rather than content,
/// each mapped to the label a front-end should show instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlTokens(HashMap<String, String>);

impl Default for ControlTokens {
    fn default() -> Self {
        let mut tokens = HashMap::new();
        tokens.insert("<think>".to_string(), "Thinking...".to_string());
        tokens.insert("</think>".to_string(), "Done thinking.".to_string());
        Self(tokens)
    }
}

impl ControlTokens {
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    pub fn insert(&mut self, token: impl Into<String>, label: impl Into<String>) {
        self.0.insert(token.into(), label.into());
    }

    pub fn label(&self, fragment: &str) -> Option<&str> {
        self.0.get(fragment.trim()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for ControlTokens {
    type Err = ClientError;

    /// Parses a single `TOKEN=LABEL` entry.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (token, label) = s
            .split_once('=')
            .ok_or_else(||
                ClientError::InvalidConfig(format!("control token '{}' is not TOKEN=LABEL", s))
            )?;
        if token.trim().is_empty() {
            return Err(ClientError::InvalidConfig(format!("control token '{}' is empty", s)));
        }
        let mut tokens = Self::empty();
        tokens.insert(token.trim(), label.trim());
        Ok(tokens)
    }
}

impl Extend<(String, String)> for ControlTokens {
    fn extend<T: IntoIterator<Item = (String, String)>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl IntoIterator for ControlTokens {
    type Item = (String, String);
    type IntoIter = std::collections::hash_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[derive(Deserialize, Default)]
struct ChatFragment {
    #[serde(default)]
    content: String,
}

/// One newline-delimited record from `/api/generate` or `/api/chat`.
#[derive(Deserialize)]
struct StreamRecord {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    message: Option<ChatFragment>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    stats: GenerationStats,
}

impl StreamRecord {
    fn fragment(&self) -> Option<&str> {
        self.response
            .as_deref()
            .or_else(|| self.message.as_ref().map(|m| m.content.as_str()))
    }
}

/// Reassembles newline-terminated records across network reads.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line).trim().to_string();
            if !text.is_empty() {
                lines.push(text);
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&std::mem::take(&mut self.pending)).trim().to_string();
        (!rest.is_empty()).then_some(rest)
    }
}

enum Phase {
    Request(Transport, ApiRequest),
    Body(ByteStream),
    Closed,
}

struct DecodeState {
    phase: Phase,
    lines: LineBuffer,
    ready: VecDeque<StreamChunk>,
    control: Arc<ControlTokens>,
    /// Longest wait for the next piece of the body.
    idle: Duration,
}

impl DecodeState {
    /// Decodes one record into `ready`. Returns true when the record ends
    /// the stream.
    fn decode_line(&mut self, line: &str) -> bool {
        let mut record = match serde_json::from_str::<StreamRecord>(line) {
            Ok(record) => record,
            Err(source) => {
                let err = ClientError::MalformedStreamRecord { line: line.to_string(), source };
                warn!("Skipping record: {}", err);
                return false;
            }
        };

        if let Some(message) = record.error.take() {
            self.ready.push_back(StreamChunk::Error(StreamFailure { status: None, message }));
            return true;
        }

        if let Some(fragment) = record.fragment() {
            if !fragment.is_empty() {
                let decoded = html_escape::decode_html_entities(fragment).into_owned();
                match self.control.label(&decoded) {
                    Some(label) => {
                        debug!("Control marker {:?}: {}", decoded.trim(), label);
                        self.ready.push_back(StreamChunk::Control {
                            token: decoded.trim().to_string(),
                            label: label.to_string(),
                        });
                    }
                    None => self.ready.push_back(StreamChunk::Content(decoded)),
                }
            }
        }

        if record.done {
            self.ready.push_back(StreamChunk::Finished(record.stats));
            return true;
        }
        false
    }

    fn fail(&mut self, err: ClientError) {
        self.ready.push_back(StreamChunk::error(err));
        self.phase = Phase::Closed;
    }

    async fn advance(&mut self) {
        match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Closed => {}
            Phase::Request(transport, request) =>
                match transport.send(&request).await {
                    Ok(response) if response.is_success() => {
                        self.phase = Phase::Body(response.into_body());
                    }
                    Ok(response) => {
                        let status = response.status();
                        let body = response.text().await.unwrap_or_default();
                        self.fail(ClientError::PermanentRequest { status, body });
                    }
                    Err(e) => self.fail(e),
                }
            Phase::Body(mut body) =>
                match tokio::time::timeout(self.idle, body.next()).await {
                    Err(_) => {
                        warn!("No data from server for {:?}; ending stream", self.idle);
                        self.fail(ExchangeError::Timeout(self.idle).into());
                    }
                    Ok(Some(Ok(bytes))) => {
                        for line in self.lines.push(&bytes) {
                            if self.decode_line(&line) {
                                return;
                            }
                        }
                        self.phase = Phase::Body(body);
                    }
                    Ok(Some(Err(e))) => {
                        warn!("Stream interrupted: {}", e);
                        self.fail(e.into());
                    }
                    Ok(None) => {
                        if let Some(line) = self.lines.finish() {
                            self.decode_line(&line);
                        }
                    }
                }
        }
    }
}

/// Issues streaming generation requests and turns the response body into
/// [`StreamChunk`]s.
#[derive(Clone)]
pub struct StreamDecoder {
    transport: Transport,
    control: Arc<ControlTokens>,
    timeout: Duration,
}

impl StreamDecoder {
    pub fn new(transport: Transport, control: ControlTokens, timeout: Duration) -> Self {
        Self {
            transport,
            control: Arc::new(control),
            timeout,
        }
    }

    pub fn control_tokens(&self) -> &ControlTokens {
        &self.control
    }

    /// Lazily streams the answer to `request`.
    ///
    /// Nothing is sent until the stream is first polled, and each poll reads
    /// only as much of the body as the next chunk needs. The request timeout
    /// bounds the wait for the response head and again for every body read.
    /// Failures arrive as a final [`StreamChunk::Error`]; the stream never
    /// yields after one.
    pub fn stream_generate(&self, request: &GenerationRequest) -> ChunkStream {
        let phase = match request.to_json() {
            Ok(body) => {
                debug!("Sending request to {}: {}", request.endpoint().path(), request.summary());
                Phase::Request(
                    self.transport.clone(),
                    ApiRequest::post(request.endpoint().path(), body, self.timeout).streaming()
                )
            }
            Err(e) => {
                let state = DecodeState {
                    phase: Phase::Closed,
                    lines: LineBuffer::default(),
                    ready: VecDeque::from([StreamChunk::error(e)]),
                    control: self.control.clone(),
                    idle: self.timeout,
                };
                return Self::drive(state);
            }
        };

        Self::drive(DecodeState {
            phase,
            lines: LineBuffer::default(),
            ready: VecDeque::new(),
            control: self.control.clone(),
            idle: self.timeout,
        })
    }

    fn drive(state: DecodeState) -> ChunkStream {
        Box::pin(
            futures::stream::unfold(state, |mut state| async move {
                loop {
                    if let Some(chunk) = state.ready.pop_front() {
                        return Some((chunk, state));
                    }
                    if matches!(state.phase, Phase::Closed) {
                        return None;
                    }
                    state.advance().await;
                }
            })
        )
    }
}
