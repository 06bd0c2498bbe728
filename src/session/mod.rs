mod conversation;
mod style;
mod turn;

pub use conversation::{ Conversation, RenderedTurn };
pub use style::ResponseStyle;
pub use turn::{ DisplayUpdate, Turn, TurnState };

use log::{ debug, info };
use uuid::Uuid;

use crate::error::ClientError;
use crate::llm::{ OllamaClient, PollSettings, Provisioned };
use crate::models::generation::clamp_temperature;
use crate::models::{ Attachment, Endpoint, GenerationRequest, Message, ModelRef, Role };

/// One conversation with one model, owned by whoever renders it.
///
/// The session is the only writer of its [`Conversation`]. Running a turn
/// borrows the session mutably, so there is never more than one request in
/// flight per session. Separate sessions share nothing but the client.
pub struct ChatSession {
    id: Uuid,
    client: OllamaClient,
    conversation: Conversation,
    model: ModelRef,
    temperature: f32,
    style: ResponseStyle,
    endpoint: Endpoint,
}

impl ChatSession {
    pub fn new(client: OllamaClient) -> Self {
        let config = client.config();
        let session = Self {
            id: Uuid::new_v4(),
            model: config.default_model.clone(),
            temperature: config.temperature,
            style: config.style,
            endpoint: config.endpoint,
            conversation: Conversation::new(),
            client,
        };
        info!("Session {} started with model '{}'", session.id, session.model);
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn model(&self) -> &ModelRef {
        &self.model
    }

    pub fn set_model(&mut self, model: ModelRef) {
        info!("Session {} switched model to '{}'", self.id, model);
        self.model = model;
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn set_temperature(&mut self, temperature: f32) {
        self.temperature = clamp_temperature(temperature);
    }

    pub fn style(&self) -> ResponseStyle {
        self.style
    }

    pub fn set_style(&mut self, style: ResponseStyle) {
        self.style = style;
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn client(&self) -> &OllamaClient {
        &self.client
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Adds the user's half of a turn. The active response style is appended
    /// to the text and the attachment is encoded here, once.
    pub fn append_user_turn(
        &mut self,
        text: &str,
        attachment: Option<&[u8]>
    ) -> Result<(), ClientError> {
        if text.trim().is_empty() && attachment.is_none() {
            return Err(ClientError::InvalidInput("Please provide either text or an image.".into()));
        }
        let content = self.style.apply(text);
        let attachment = attachment.map(Attachment::from_bytes);
        debug!(
            "Session {} user turn: {} chars, attachment={}",
            self.id,
            content.chars().count(),
            attachment.as_ref().map(|a| a.byte_len()).unwrap_or(0)
        );
        self.conversation.append(Message::user(content, attachment));
        Ok(())
    }

    /// Starts the assistant's half of the turn. The request is built from the
    /// conversation as it stands now and sent when the returned stream is
    /// first polled.
    pub fn run_turn(&mut self) -> Result<Turn<'_>, ClientError> {
        match self.conversation.last() {
            Some(message) if message.role() == Role::User => {}
            _ => {
                return Err(ClientError::InvalidInput("Nothing to answer: add a user message first.".into()));
            }
        }
        let request = GenerationRequest::from_conversation(
            self.endpoint,
            &self.model,
            self.conversation.messages(),
            self.temperature,
            true
        );
        let chunks = self.client.stream_generate(&request);
        Ok(Turn::new(&mut self.conversation, chunks))
    }

    /// Appends the user turn and runs it to completion in one call.
    pub async fn send(
        &mut self,
        text: &str,
        attachment: Option<&[u8]>
    ) -> Result<DisplayUpdate, ClientError> {
        self.append_user_turn(text, attachment)?;
        Ok(self.run_turn()?.complete().await)
    }

    pub async fn ensure_model(
        &self,
        model: &ModelRef,
        poll: Option<PollSettings>
    ) -> Result<Provisioned, ClientError> {
        self.client.ensure_model(model, poll).await
    }

    pub async fn list_models(&self) -> Vec<ModelRef> {
        self.client.list_models().await
    }

    pub fn reset(&mut self) {
        info!("Session {} history cleared", self.id);
        self.conversation.reset();
    }

    pub fn render(&self) -> Vec<RenderedTurn> {
        self.conversation.render()
    }
}
