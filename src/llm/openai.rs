//! `OpenAI`-compatible streaming chat client
//!
//! Works with any server implementing `/chat/completions` with SSE
//! streaming (`OpenAI`, Ollama, vLLM, llama.cpp server, ...).

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};

use super::{ChatMessage, FunctionCall, LanguageModel, StreamSink, ToolBox, ToolCall};
use crate::{Error, Result};

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Splits an SSE byte stream into `data:` payloads
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed raw bytes, returning the payload of every completed `data:` line
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);

            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
        }
        payloads
    }
}

/// Separates `<think>...</think>` blocks from answer text across tokens
#[derive(Debug, Default)]
pub struct ThinkFilter {
    pending: String,
    in_think: bool,
}

impl ThinkFilter {
    /// Feed a content delta; returns `(answer, thinking)` text now certain
    pub fn push(&mut self, text: &str) -> (String, String) {
        self.pending.push_str(text);
        let mut answer = String::new();
        let mut thinking = String::new();

        loop {
            let tag = if self.in_think { THINK_CLOSE } else { THINK_OPEN };
            let out = if self.in_think { &mut thinking } else { &mut answer };

            if let Some(pos) = self.pending.find(tag) {
                out.push_str(&self.pending[..pos]);
                self.pending.drain(..pos + tag.len());
                self.in_think = !self.in_think;
                continue;
            }

            // Hold back a suffix that could be the start of the tag
            let keep = (1..tag.len())
                .rev()
                .find(|&n| self.pending.ends_with(&tag[..n]))
                .unwrap_or(0);
            let emit = self.pending.len() - keep;
            out.push_str(&self.pending[..emit]);
            self.pending.drain(..emit);
            break;
        }

        (answer, thinking)
    }

    /// Release anything still held back
    pub fn finish(&mut self) -> (String, String) {
        let rest = std::mem::take(&mut self.pending);
        if self.in_think {
            (String::new(), rest)
        } else {
            (rest, String::new())
        }
    }
}

/// Tool call being assembled from streamed deltas
#[derive(Debug, Default, Clone)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
struct RoundOutcome {
    text: String,
    tool_calls: Vec<PendingToolCall>,
}

/// Streaming chat client with tool calling
pub struct OpenAiCompatible {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    max_tool_rounds: usize,
    tools: ToolBox,
}

impl std::fmt::Debug for OpenAiCompatible {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatible")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .finish_non_exhaustive()
    }
}

impl OpenAiCompatible {
    /// Create a client for `base_url` (e.g. `https://api.openai.com/v1`)
    #[must_use]
    pub fn new(
        base_url: &str,
        api_key: SecretString,
        model: String,
        max_tokens: u32,
        max_tool_rounds: usize,
        tools: ToolBox,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            max_tokens,
            max_tool_rounds: max_tool_rounds.max(1),
            tools,
        }
    }

    /// Tool definitions offered in `round`, `None` when the request carries
    /// no `tools` field
    fn round_tools(&self, round: usize) -> Option<Vec<serde_json::Value>> {
        // The final round gets no tools so the model has to answer
        let offer = !self.tools.is_empty() && round + 1 < self.max_tool_rounds;
        offer.then(|| self.tools.definitions())
    }

    fn request_body(&self, messages: &[ChatMessage], tools: Option<Vec<serde_json::Value>>) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "max_tokens": self.max_tokens,
        });
        if let Some(tools) = tools {
            body["tools"] = serde_json::Value::from(tools);
        }
        body
    }

    async fn stream_round(
        &self,
        messages: &[ChatMessage],
        round: usize,
        sink: &StreamSink,
    ) -> Result<RoundOutcome> {
        let body = self.request_body(messages, self.round_tools(round));

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if !self.api_key.expose_secret().is_empty() {
            request = request.bearer_auth(self.api_key.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("chat API error {status}: {body}")));
        }

        let mut bytes = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut think = ThinkFilter::default();
        let mut outcome = RoundOutcome::default();

        'stream: while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            for data in decoder.push(&chunk) {
                if data == "[DONE]" {
                    break 'stream;
                }
                if data.trim().is_empty() {
                    continue;
                }

                let value: serde_json::Value = serde_json::from_str(&data)?;
                if let Some(error) = value.get("error") {
                    return Err(Error::Llm(error.to_string()));
                }

                let delta = &value["choices"][0]["delta"];
                if let Some(reasoning) = delta["reasoning_content"]
                    .as_str()
                    .or_else(|| delta["reasoning"].as_str())
                {
                    sink.thinking(reasoning);
                }
                if let Some(content) = delta["content"].as_str() {
                    let (answer, thought) = think.push(content);
                    sink.thinking(&thought);
                    sink.partial(&answer);
                    outcome.text.push_str(&answer);
                }
                if let Some(calls) = delta["tool_calls"].as_array() {
                    accumulate_tool_calls(&mut outcome.tool_calls, calls);
                }
            }

            if sink.is_stale() {
                tracing::debug!(generation = sink.generation(), "abandoning stale stream");
                return Ok(outcome);
            }
        }

        let (answer, thought) = think.finish();
        sink.thinking(&thought);
        sink.partial(&answer);
        outcome.text.push_str(&answer);

        Ok(outcome)
    }
}

fn accumulate_tool_calls(pending: &mut Vec<PendingToolCall>, deltas: &[serde_json::Value]) {
    for delta in deltas {
        let index = delta["index"]
            .as_u64()
            .and_then(|i| usize::try_from(i).ok())
            .unwrap_or(pending.len().saturating_sub(1));
        if index >= pending.len() {
            pending.resize_with(index + 1, PendingToolCall::default);
        }

        let call = &mut pending[index];
        if let Some(id) = delta["id"].as_str() {
            call.id = id.to_string();
        }
        if let Some(name) = delta["function"]["name"].as_str() {
            call.name.push_str(name);
        }
        if let Some(arguments) = delta["function"]["arguments"].as_str() {
            call.arguments.push_str(arguments);
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatible {
    async fn stream(&self, messages: &[ChatMessage], sink: &StreamSink) -> Result<()> {
        let mut messages = messages.to_vec();

        for round in 0..self.max_tool_rounds {
            if sink.is_stale() {
                return Ok(());
            }

            let outcome = self.stream_round(&messages, round, sink).await?;

            let calls: Vec<ToolCall> = outcome
                .tool_calls
                .into_iter()
                .filter(|c| !c.name.is_empty())
                .map(|c| ToolCall {
                    id: c.id,
                    kind: "function".to_string(),
                    function: FunctionCall {
                        name: c.name,
                        arguments: c.arguments,
                    },
                })
                .collect();

            if calls.is_empty() {
                return Ok(());
            }

            tracing::info!(round, count = calls.len(), "model requested tools");
            let text = (!outcome.text.is_empty()).then_some(outcome.text);
            messages.push(ChatMessage::assistant_tool_calls(text, calls.clone()));

            for call in &calls {
                if sink.is_stale() {
                    return Ok(());
                }
                let output = self.tools.execute(call, sink.generation()).await;
                messages.push(ChatMessage::tool(&call.id, output));
            }
        }

        tracing::warn!(max = self.max_tool_rounds, "tool round limit reached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_lines_split_across_chunks() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert_eq!(decoder.push(b":1}\r\n\r\ndata:[DONE]\n"), vec!["{\"a\":1}", "[DONE]"]);
    }

    #[test]
    fn test_sse_ignores_comments_and_events() {
        let mut decoder = SseDecoder::default();
        let out = decoder.push(b": keep-alive\nevent: ping\ndata: x\n");
        assert_eq!(out, vec!["x"]);
    }

    #[test]
    fn test_sse_multibyte_split() {
        let mut decoder = SseDecoder::default();
        let text = "data: 你好\n".as_bytes();
        assert!(decoder.push(&text[..8]).is_empty());
        assert_eq!(decoder.push(&text[8..]), vec!["你好"]);
    }

    #[test]
    fn test_think_block_filtered() {
        let mut filter = ThinkFilter::default();
        let (answer, thinking) = filter.push("<think>hmm</think>Hello");
        assert_eq!(answer, "Hello");
        assert_eq!(thinking, "hmm");
    }

    #[test]
    fn test_think_tags_split_across_tokens() {
        let mut filter = ThinkFilter::default();
        let mut answer = String::new();
        let mut thinking = String::new();

        for token in ["Hi <th", "ink>let me ", "see</thi", "nk> there", " <"] {
            let (a, t) = filter.push(token);
            answer.push_str(&a);
            thinking.push_str(&t);
        }
        let (a, t) = filter.finish();
        answer.push_str(&a);
        thinking.push_str(&t);

        assert_eq!(answer, "Hi  there <");
        assert_eq!(thinking, "let me see");
    }

    #[test]
    fn test_tool_call_deltas_accumulate() {
        let mut pending = Vec::new();
        let deltas: Vec<serde_json::Value> = vec![
            serde_json::json!({"index": 0, "id": "call_1", "function": {"name": "generate_image", "arguments": ""}}),
            serde_json::json!({"index": 0, "function": {"arguments": "{\"prompt\":"}}),
            serde_json::json!({"index": 0, "function": {"arguments": "\"a cat\"}"}}),
        ];
        for delta in &deltas {
            accumulate_tool_calls(&mut pending, std::slice::from_ref(delta));
        }

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "call_1");
        assert_eq!(pending[0].name, "generate_image");
        assert_eq!(pending[0].arguments, "{\"prompt\":\"a cat\"}");
    }

    fn client(tools: ToolBox) -> OpenAiCompatible {
        OpenAiCompatible::new(
            "http://localhost:8080/v1/",
            SecretString::from(String::new()),
            "test-model".to_string(),
            256,
            3,
            tools,
        )
    }

    fn image_tools() -> ToolBox {
        let artifacts = crate::llm::ArtifactSlot::new();
        let images = crate::llm::ImageGenerator::new(
            "http://localhost:8080/v1",
            SecretString::from("sk-test".to_string()),
            "gpt-image-1".to_string(),
            std::env::temp_dir(),
        );
        ToolBox::with_images(images, artifacts)
    }

    #[test]
    fn test_tool_less_client_sends_no_tools() {
        let model = client(ToolBox::empty(crate::llm::ArtifactSlot::new()));
        let messages = vec![ChatMessage::user("hola")];

        for round in 0..3 {
            let body = model.request_body(&messages, model.round_tools(round));
            assert!(body.get("tools").is_none(), "round {round}");
        }
    }

    #[test]
    fn test_tools_withheld_on_final_round() {
        let model = client(image_tools());
        let messages = vec![ChatMessage::user("draw a cat")];

        let first = model.request_body(&messages, model.round_tools(0));
        assert_eq!(first["tools"][0]["function"]["name"], "generate_image");
        assert_eq!(first["stream"], true);

        let last = model.request_body(&messages, model.round_tools(2));
        assert!(last.get("tools").is_none());
    }
}
