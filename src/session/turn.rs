use futures::{ Stream, StreamExt };
use log::{ debug, warn };
use std::pin::Pin;
use std::task::{ Context, Poll };

use super::conversation::Conversation;
use crate::llm::ChunkStream;
use crate::models::{ GenerationStats, Message, StreamChunk, StreamFailure };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingResponse,
    Streaming,
    Committed,
    Failed,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnState::Committed | TurnState::Failed)
    }
}

/// What a front-end needs to redraw after each chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayUpdate {
    pub state: TurnState,
    /// Assistant text received so far.
    pub content: String,
    /// Text added by this update, if any.
    pub delta: Option<String>,
    /// Transient status from a control marker, e.g. "Thinking...".
    pub status: Option<String>,
    pub error: Option<String>,
    pub stats: Option<GenerationStats>,
}

/// One assistant reply in progress.
///
/// Yields a [`DisplayUpdate`] per decoded chunk, then a final update in a
/// terminal state once the reply has been committed. Whatever content has
/// arrived is appended as the assistant message, including when the stream
/// fails part-way or the turn is dropped early.
pub struct Turn<'a> {
    conversation: &'a mut Conversation,
    chunks: ChunkStream,
    content: String,
    status: Option<String>,
    failure: Option<StreamFailure>,
    stats: Option<GenerationStats>,
    state: TurnState,
}

impl<'a> Turn<'a> {
    pub(crate) fn new(conversation: &'a mut Conversation, chunks: ChunkStream) -> Self {
        Self {
            conversation,
            chunks,
            content: String::new(),
            status: None,
            failure: None,
            stats: None,
            state: TurnState::Idle,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Drives the turn to the end and returns the final update.
    pub async fn complete(mut self) -> DisplayUpdate {
        let mut last = self.snapshot(None);
        while let Some(update) = self.next().await {
            last = update;
        }
        last
    }

    fn apply(&mut self, chunk: StreamChunk) -> Option<String> {
        match chunk {
            StreamChunk::Content(text) => {
                self.state = TurnState::Streaming;
                self.status = None;
                self.content.push_str(&text);
                Some(text)
            }
            StreamChunk::Control { label, .. } => {
                self.state = TurnState::Streaming;
                self.status = Some(label);
                None
            }
            StreamChunk::Finished(stats) => {
                self.stats = Some(stats);
                None
            }
            StreamChunk::Error(failure) => {
                warn!("Turn failed: {}", failure.message);
                self.failure = Some(failure);
                None
            }
        }
    }

    fn commit(&mut self) {
        if !self.content.is_empty() {
            self.conversation.append(Message::assistant(self.content.clone()));
        }
        self.status = None;
        self.state = if self.failure.is_some() { TurnState::Failed } else { TurnState::Committed };
        debug!("Turn {:?} with {} chars", self.state, self.content.len());
    }

    fn snapshot(&self, delta: Option<String>) -> DisplayUpdate {
        DisplayUpdate {
            state: self.state,
            content: self.content.clone(),
            delta,
            status: self.status.clone(),
            error: self.failure.as_ref().map(|f| f.message.clone()),
            stats: self.stats.clone(),
        }
    }
}

impl Stream for Turn<'_> {
    type Item = DisplayUpdate;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.state.is_terminal() {
            return Poll::Ready(None);
        }
        if this.state == TurnState::Idle {
            // The decoder sends its request on the first poll.
            this.state = TurnState::AwaitingResponse;
        }
        match this.chunks.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(chunk)) => {
                let delta = this.apply(chunk);
                Poll::Ready(Some(this.snapshot(delta)))
            }
            Poll::Ready(None) => {
                this.commit();
                Poll::Ready(Some(this.snapshot(None)))
            }
        }
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        if !self.state.is_terminal() && !self.content.is_empty() {
            debug!("Turn abandoned after {} chars; keeping partial reply", self.content.len());
            self.conversation.append(Message::assistant(std::mem::take(&mut self.content)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn chunks(items: Vec<StreamChunk>) -> ChunkStream {
        Box::pin(futures::stream::iter(items))
    }

    fn with_user_message() -> Conversation {
        let mut conversation = Conversation::new();
        conversation.append(Message::user("hi", None));
        conversation
    }

    #[tokio::test]
    async fn commits_concatenated_content() {
        let mut conversation = with_user_message();
        let turn = Turn::new(
            &mut conversation,
            chunks(
                vec![
                    StreamChunk::Content("Hel".into()),
                    StreamChunk::Control { token: "<think>".into(), label: "Thinking...".into() },
                    StreamChunk::Content("lo".into()),
                    StreamChunk::Finished(GenerationStats::default())
                ]
            )
        );

        let updates: Vec<DisplayUpdate> = turn.collect().await;

        assert_eq!(updates[1].status.as_deref(), Some("Thinking..."));
        assert_eq!(updates[1].content, "Hel");
        let last = updates.last().unwrap();
        assert_eq!(last.state, TurnState::Committed);
        assert_eq!(last.content, "Hello");
        assert_eq!(conversation.last().unwrap().content(), "Hello");
        assert_eq!(conversation.last().unwrap().role(), Role::Assistant);
    }

    #[tokio::test]
    async fn failure_keeps_partial_content() {
        let mut conversation = with_user_message();
        let turn = Turn::new(
            &mut conversation,
            chunks(
                vec![
                    StreamChunk::Content("par".into()),
                    StreamChunk::Content("tial".into()),
                    StreamChunk::Error(StreamFailure { status: None, message: "reset".into() })
                ]
            )
        );

        let last = turn.complete().await;

        assert_eq!(last.state, TurnState::Failed);
        assert_eq!(last.error.as_deref(), Some("reset"));
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.last().unwrap().content(), "partial");
    }

    #[tokio::test]
    async fn failure_before_content_appends_nothing() {
        let mut conversation = with_user_message();
        let turn = Turn::new(
            &mut conversation,
            chunks(
                vec![
                    StreamChunk::Error(StreamFailure { status: Some(404), message: "missing".into() })
                ]
            )
        );

        assert_eq!(turn.complete().await.state, TurnState::Failed);
        assert_eq!(conversation.len(), 1);
    }

    #[tokio::test]
    async fn dropping_mid_stream_keeps_what_arrived() {
        let mut conversation = with_user_message();
        {
            let mut turn = Turn::new(
                &mut conversation,
                chunks(
                    vec![
                        StreamChunk::Content("one ".into()),
                        StreamChunk::Content("two".into()),
                        StreamChunk::Content(" three".into())
                    ]
                )
            );
            turn.next().await;
            turn.next().await;
            assert_eq!(turn.state(), TurnState::Streaming);
        }

        assert_eq!(conversation.last().unwrap().content(), "one two");
    }

    #[test]
    fn nothing_happens_before_the_first_poll() {
        let mut conversation = with_user_message();
        let turn = Turn::new(&mut conversation, chunks(vec![]));
        assert_eq!(turn.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn stream_ends_after_terminal_update() {
        let mut conversation = with_user_message();
        let mut turn = Turn::new(&mut conversation, chunks(vec![StreamChunk::Content("x".into())]));

        assert!(turn.next().await.is_some());
        assert_eq!(turn.next().await.unwrap().state, TurnState::Committed);
        assert!(turn.next().await.is_none());
        drop(turn);
        assert_eq!(conversation.len(), 2);
    }
}
