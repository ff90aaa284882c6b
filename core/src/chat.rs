//! Chat session controller: one independent conversational exchange at a
//! time, streamed, cancellable, with tool-call lifecycle tracking.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use replaycast_async_utils::CancelErr;
use replaycast_async_utils::OrCancelExt;
use replaycast_protocol::StreamEvent;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ChatBusyPolicy;
use crate::config::EngineConfig;
use crate::context::ChatContextBundle;
use crate::context::ExcerptLimits;
use crate::error::ReplayError;
use crate::error::Result;
use crate::error::StateError;
use crate::event_stream::EventSink;
use crate::event_stream::read_events;
use crate::names::NameResolver;
use crate::transport::EventTransport;

pub type MessageId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCall {
    pub name: String,
    pub status: ToolStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: ChatRole,
    pub content: String,
    pub streaming: bool,
    /// Arrival order, duplicates included.
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    fn user(text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: ChatRole::User,
            content: text.to_string(),
            streaming: false,
            tool_calls: Vec::new(),
        }
    }

    fn assistant_placeholder() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: ChatRole::Assistant,
            content: String::new(),
            streaming: true,
            tool_calls: Vec::new(),
        }
    }

    /// One entry per tool name in first-seen order; the latest status wins.
    pub fn rendered_tool_calls(&self) -> Vec<ToolCall> {
        let mut rendered: Vec<ToolCall> = Vec::new();
        for call in &self.tool_calls {
            match rendered.iter_mut().find(|r| r.name == call.name) {
                Some(existing) => existing.status = call.status,
                None => rendered.push(call.clone()),
            }
        }
        rendered
    }

    fn append_error(&mut self, message: &str) {
        if !self.content.is_empty() {
            self.content.push_str("\n\n");
        }
        self.content.push_str("**Error:** ");
        self.content.push_str(message);
    }
}

#[derive(Debug)]
struct InFlight {
    generation: u64,
    assistant_id: MessageId,
    cancel: CancellationToken,
}

/// Transcript plus the bookkeeping for the single in-flight response.
#[derive(Debug, Default)]
struct Transcript {
    messages: Vec<ChatMessage>,
    session_id: Option<String>,
    in_flight: Option<InFlight>,
    generation: u64,
}

impl Transcript {
    fn begin(&mut self, text: &str) -> (u64, MessageId, CancellationToken) {
        self.messages.push(ChatMessage::user(text));
        let assistant = ChatMessage::assistant_placeholder();
        let assistant_id = assistant.id;
        self.messages.push(assistant);

        self.generation += 1;
        let cancel = CancellationToken::new();
        self.in_flight = Some(InFlight {
            generation: self.generation,
            assistant_id,
            cancel: cancel.clone(),
        });
        (self.generation, assistant_id, cancel)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| f.generation == generation)
    }

    fn assistant_mut(&mut self, id: MessageId) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().rev().find(|m| m.id == id)
    }

    /// Apply one event from the stream tagged `generation`. Events from a
    /// stopped or superseded stream are dropped. Returns `true` when the
    /// transcript changed.
    fn apply(&mut self, generation: u64, event: StreamEvent) -> bool {
        let Some(assistant_id) = self
            .in_flight
            .as_ref()
            .filter(|f| f.generation == generation)
            .map(|f| f.assistant_id)
        else {
            tracing::debug!(kind = event.kind(), "dropping event from inactive chat stream");
            return false;
        };

        let mut finished = false;
        let mut new_session = None;
        {
            let Some(message) = self.assistant_mut(assistant_id) else {
                return false;
            };
            match event {
                StreamEvent::Text { content } => message.content.push_str(&content),
                StreamEvent::ToolStart { name, .. } => message.tool_calls.push(ToolCall {
                    name,
                    status: ToolStatus::Pending,
                }),
                StreamEvent::ToolResult { name, .. } => {
                    match message
                        .tool_calls
                        .iter_mut()
                        .rev()
                        .find(|c| c.name == name && c.status == ToolStatus::Pending)
                    {
                        Some(call) => call.status = ToolStatus::Complete,
                        None => tracing::warn!(tool = %name, "tool_result without pending tool_start"),
                    }
                }
                StreamEvent::Done { session_id } => {
                    message.streaming = false;
                    new_session = session_id;
                    finished = true;
                }
                StreamEvent::Error { message: text } => {
                    message.append_error(&ReplayError::protocol(text).user_message());
                    message.streaming = false;
                    finished = true;
                }
                StreamEvent::Moment(moment) => {
                    tracing::warn!(
                        moment_index = moment.moment_index,
                        "moment event on chat stream, ignoring"
                    );
                    return false;
                }
            }
        }

        if new_session.is_some() {
            self.session_id = new_session;
        }
        if finished {
            self.in_flight = None;
        }
        true
    }

    /// Close the in-flight response, optionally with an error suffix.
    fn finish(&mut self, generation: u64, error: Option<&str>) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        let Some(in_flight) = self.in_flight.take() else {
            return false;
        };
        if let Some(message) = self.assistant_mut(in_flight.assistant_id) {
            if let Some(text) = error {
                message.append_error(text);
            }
            message.streaming = false;
        }
        true
    }

    /// Cancel the transport and keep whatever text already arrived.
    fn stop(&mut self) -> bool {
        let Some(in_flight) = self.in_flight.take() else {
            return false;
        };
        in_flight.cancel.cancel();
        if let Some(message) = self.assistant_mut(in_flight.assistant_id) {
            message.streaming = false;
        }
        true
    }
}

struct ChatInner {
    transcript: Mutex<Transcript>,
    transport: Arc<dyn EventTransport>,
    config: Arc<EngineConfig>,
    resolver: NameResolver,
    updates: watch::Sender<Vec<ChatMessage>>,
}

impl ChatInner {
    fn lock(&self) -> MutexGuard<'_, Transcript> {
        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the display copy. Called with the transcript lock held so
    /// observers see updates in the order they were applied.
    fn publish(&self, transcript: &Transcript) {
        let display = transcript
            .messages
            .iter()
            .map(|m| ChatMessage {
                content: self.resolver.resolve(&m.content),
                ..m.clone()
            })
            .collect();
        self.updates.send_replace(display);
    }
}

/// One chat controller per view. Dropping it cancels any in-flight stream.
pub struct ChatSession {
    inner: Arc<ChatInner>,
}

impl ChatSession {
    pub fn new(
        transport: Arc<dyn EventTransport>,
        config: Arc<EngineConfig>,
        resolver: NameResolver,
    ) -> Self {
        let (updates, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(ChatInner {
                transcript: Mutex::new(Transcript::default()),
                transport,
                config,
                resolver,
                updates,
            }),
        }
    }

    /// Append the user message and an empty streaming assistant message,
    /// then open the chat stream in the background. Returns the id of the
    /// assistant message that will receive the response.
    ///
    /// Must be called from within a tokio runtime.
    pub fn send(&self, text: &str, context: &ChatContextBundle) -> Result<MessageId> {
        let mut transcript = self.inner.lock();

        if transcript.in_flight.is_some() {
            match self.inner.config.chat_busy_policy {
                ChatBusyPolicy::Reject => {
                    tracing::warn!("chat send rejected, previous response still streaming");
                    return Err(StateError::AlreadyStreaming.into());
                }
                ChatBusyPolicy::CancelPrevious => {
                    tracing::debug!("cancelling previous chat response");
                    transcript.stop();
                }
            }
        }

        let request = context.to_request(
            text,
            transcript.session_id.clone(),
            ExcerptLimits::from(self.inner.config.as_ref()),
        );
        let body = serde_json::to_value(&request)?;

        let (generation, assistant_id, cancel) = transcript.begin(text);
        self.inner.publish(&transcript);
        drop(transcript);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_chat_stream(inner, generation, body, cancel).await;
        });

        Ok(assistant_id)
    }

    /// Cancel the in-flight response. Partial content is kept.
    pub fn stop(&self) -> bool {
        let mut transcript = self.inner.lock();
        let stopped = transcript.stop();
        if stopped {
            self.inner.publish(&transcript);
        }
        stopped
    }

    /// Drop the whole transcript and the collaborator session id.
    pub fn clear(&self) {
        let mut transcript = self.inner.lock();
        transcript.stop();
        transcript.messages.clear();
        transcript.session_id = None;
        self.inner.publish(&transcript);
    }

    /// Raw transcript, names unresolved.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.lock().messages.clone()
    }

    /// Display transcript, republished on every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.inner.updates.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.lock().in_flight.is_some()
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.lock().session_id.clone()
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.inner.lock().stop();
    }
}

async fn run_chat_stream(
    inner: Arc<ChatInner>,
    generation: u64,
    body: serde_json::Value,
    cancel: CancellationToken,
) {
    let idle_timeout = inner.config.stream_idle_timeout();
    let opened = inner
        .transport
        .open(&inner.config.chat_url, body)
        .or_cancel_within(&cancel, idle_timeout)
        .await;

    let stream = match opened {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            ChatStreamSink { inner, generation }.on_error(e);
            return;
        }
        Err(CancelErr::Cancelled) => return,
        Err(CancelErr::DeadlineElapsed(limit)) => {
            ChatStreamSink { inner, generation }.on_error(ReplayError::Timeout(limit));
            return;
        }
    };

    let mut sink = ChatStreamSink {
        inner: Arc::clone(&inner),
        generation,
    };
    let outcome = read_events(stream, &mut sink, &cancel, idle_timeout).await;
    tracing::debug!(?outcome, generation, "chat stream closed");
}

struct ChatStreamSink {
    inner: Arc<ChatInner>,
    generation: u64,
}

impl EventSink for ChatStreamSink {
    fn on_event(&mut self, event: StreamEvent) {
        let mut transcript = self.inner.lock();
        tracing::trace!(kind = event.kind(), "chat event");
        if transcript.apply(self.generation, event) {
            self.inner.publish(&transcript);
        }
    }

    fn on_complete(&mut self) {
        let mut transcript = self.inner.lock();
        if transcript.finish(self.generation, None) {
            tracing::warn!("chat stream ended without a done event");
            self.inner.publish(&transcript);
        }
    }

    fn on_error(&mut self, error: ReplayError) {
        tracing::warn!(error = %error, "chat stream failed");
        let mut transcript = self.inner.lock();
        if transcript.finish(self.generation, Some(&error.user_message())) {
            self.inner.publish(&transcript);
        }
    }
}
