//! Language model streaming
//!
//! A [`LanguageModel`] pushes text into a [`StreamSink`] bound to one
//! generation. [`drive_stream`] wraps a model call so the receiver always
//! sees zero or more partials followed by exactly one end marker, with
//! failures turned into a spoken fallback.

mod history;
mod openai;
mod prompt;
mod tools;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use history::ChatHistory;
pub use openai::{OpenAiCompatible, SseDecoder, ThinkFilter};
pub use prompt::{answer_messages, translation_messages};
pub use tools::{ArtifactSlot, ImageGenerator, ToolBox};

use crate::Result;

/// Spoken when a response stream fails
pub const FALLBACK_UTTERANCE: &str = "Sorry, something went wrong. Please try again.";

/// A chat message in `OpenAI` wire format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `system`, `user`, `assistant` or `tool`
    pub role: String,
    /// Text content; absent on assistant tool-call messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool invocations requested by the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Which call a tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// System instruction
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::text("system", content)
    }

    /// User utterance
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::text("user", content)
    }

    /// Assistant reply
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text("assistant", content)
    }

    /// Assistant turn that only requests tools
    #[must_use]
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    /// Result of a tool call
    #[must_use]
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A function call requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

/// Name and JSON-encoded arguments of a tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// What a model stream reports back to the turn controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Answer text, in stream order
    Partial(String),
    /// Reasoning text, shown but never spoken
    Thinking(String),
    /// The call failed; whatever was streamed so far is void
    Failed,
    /// The stream is finished
    End,
}

type Emit = Box<dyn Fn(StreamEvent) + Send + Sync>;

/// Receives the output of one model call
///
/// Bound to the generation that issued the call. The shared guard holds the
/// generation that is currently live; once it moves on the sink reports
/// itself stale so the model can abandon the stream early.
pub struct StreamSink {
    generation: u64,
    live: Arc<AtomicU64>,
    emit: Emit,
}

impl std::fmt::Debug for StreamSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSink")
            .field("generation", &self.generation)
            .field("stale", &self.is_stale())
            .finish_non_exhaustive()
    }
}

impl StreamSink {
    /// Bind a sink to `generation`
    pub fn new(
        generation: u64,
        live: Arc<AtomicU64>,
        emit: impl Fn(StreamEvent) + Send + Sync + 'static,
    ) -> Self {
        Self {
            generation,
            live,
            emit: Box::new(emit),
        }
    }

    /// Generation this sink was issued under
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the controller has moved past this generation
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.live.load(Ordering::SeqCst) != self.generation
    }

    /// Forward answer text
    pub fn partial(&self, text: &str) {
        if !text.is_empty() {
            (self.emit)(StreamEvent::Partial(text.to_string()));
        }
    }

    /// Forward reasoning text
    pub fn thinking(&self, text: &str) {
        if !text.is_empty() {
            (self.emit)(StreamEvent::Thinking(text.to_string()));
        }
    }

    fn fail(&self) {
        (self.emit)(StreamEvent::Failed);
    }

    fn end(&self) {
        (self.emit)(StreamEvent::End);
    }
}

/// A streaming chat model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Stream a reply to `messages` into `sink`.
    ///
    /// Implementations emit partials in order and must not emit the end
    /// marker themselves. Tool rounds stay internal to one call.
    ///
    /// # Errors
    ///
    /// Returns error if the request or the stream fails
    async fn stream(&self, messages: &[ChatMessage], sink: &StreamSink) -> Result<()>;
}

/// Run one model call to completion, guaranteeing a single trailing
/// [`StreamEvent::End`]
///
/// A failure is reported as [`StreamEvent::Failed`] before the end marker,
/// unless the sink has gone stale. The receiver replaces the partial answer
/// with [`FALLBACK_UTTERANCE`].
pub async fn drive_stream(model: Arc<dyn LanguageModel>, messages: Vec<ChatMessage>, sink: StreamSink) {
    let generation = sink.generation();
    tracing::debug!(generation, messages = messages.len(), "response stream started");

    if let Err(e) = model.stream(&messages, &sink).await {
        tracing::warn!(error = %e, generation, "response stream failed");
        if !sink.is_stale() {
            sink.fail();
        }
    }

    sink.end();
    tracing::debug!(generation, "response stream ended");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::Error;

    struct Scripted(std::result::Result<Vec<&'static str>, &'static str>);

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn stream(&self, _messages: &[ChatMessage], sink: &StreamSink) -> Result<()> {
            match &self.0 {
                Ok(parts) => {
                    for part in parts {
                        sink.partial(part);
                    }
                    Ok(())
                }
                Err(e) => Err(Error::Llm((*e).to_string())),
            }
        }
    }

    fn recording_sink(generation: u64, live: u64) -> (StreamSink, Arc<Mutex<Vec<StreamEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        let sink = StreamSink::new(generation, Arc::new(AtomicU64::new(live)), move |e| {
            seen.lock().unwrap().push(e);
        });
        (sink, events)
    }

    #[tokio::test]
    async fn test_partials_then_single_end() {
        let (sink, events) = recording_sink(1, 1);
        drive_stream(Arc::new(Scripted(Ok(vec!["Hi", "", " there"]))), vec![], sink).await;

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                StreamEvent::Partial("Hi".into()),
                StreamEvent::Partial(" there".into()),
                StreamEvent::End,
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_reported_before_end() {
        let (sink, events) = recording_sink(2, 2);
        drive_stream(Arc::new(Scripted(Err("boom"))), vec![], sink).await;

        assert_eq!(*events.lock().unwrap(), vec![StreamEvent::Failed, StreamEvent::End]);
    }

    struct Interrupted;

    #[async_trait]
    impl LanguageModel for Interrupted {
        async fn stream(&self, _messages: &[ChatMessage], sink: &StreamSink) -> Result<()> {
            sink.partial("Once upon a time");
            Err(Error::Llm("connection reset".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failure_after_partials_is_flagged() {
        let (sink, events) = recording_sink(3, 3);
        drive_stream(Arc::new(Interrupted), vec![], sink).await;

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                StreamEvent::Partial("Once upon a time".into()),
                StreamEvent::Failed,
                StreamEvent::End,
            ]
        );
    }

    #[tokio::test]
    async fn test_stale_failure_only_ends() {
        let (sink, events) = recording_sink(2, 3);
        assert!(sink.is_stale());
        drive_stream(Arc::new(Scripted(Err("boom"))), vec![], sink).await;

        assert_eq!(*events.lock().unwrap(), vec![StreamEvent::End]);
    }

    #[test]
    fn test_tool_message_wire_format() {
        let json = serde_json::to_value(ChatMessage::tool("call_1", "done")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"role": "tool", "content": "done", "tool_call_id": "call_1"})
        );
    }
}
