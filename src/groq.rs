//! Groq chat-completions client
//!
//! OpenAI-compatible endpoint, used for both model round-trips: the
//! streaming tool-selection call (SSE) and the non-streaming caption call.
//! Uses a long-lived reqwest::Client for connection pooling.

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ChatError;
use crate::models::TranscriptMessage;
use crate::tools::ToolSpec;
use crate::Result;

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
const DEFAULT_MODEL: &str = "llama-3.1-70b-versatile";
const ENV_API_KEY: &str = "GROQ_API_KEY";
const ENV_MODEL: &str = "GROQ_MODEL";

/// Error text produced when no credential is configured. The orchestrator
/// matches this substring to rewrite the failure into a setup instruction.
pub const MISSING_KEY_MARKER: &str = "API key is missing.";

/// One retry for the tool-selection call, applied before any stream bytes
/// are consumed.
const MAX_RETRIES: u32 = 1;

/// Sender for incremental text deltas observed while streaming.
pub type DeltaSink = mpsc::UnboundedSender<String>;

/// Discriminated outcome of a tool-selection call.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelOutcome {
    /// The model answered in free text; deltas were already forwarded.
    Text(String),
    /// The model selected exactly one tool by name.
    ToolCall { name: String, arguments: Value },
}

/// Seam between the orchestrator and the remote model, so tests can script
/// outcomes without a network.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Streaming call with the tool registry declared. Text deltas are
    /// pushed through `deltas` as they arrive.
    async fn complete(
        &self,
        system: &str,
        transcript: &[TranscriptMessage],
        tools: &[ToolSpec],
        deltas: DeltaSink,
    ) -> Result<ModelOutcome>;

    /// Plain completion used for widget captions.
    async fn caption(&self, system: &str, transcript: &[TranscriptMessage]) -> Result<String>;
}

//
// ================= Wire types =================
//

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<TranscriptMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Streaming chunk from the SSE body (`data: {...}` lines).
#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Buffers raw SSE bytes and yields complete lines. Network chunks split at
/// arbitrary byte boundaries, so decoding happens per line, never mid-chunk,
/// keeping multi-byte UTF-8 sequences intact.
#[derive(Debug, Default)]
struct SseLineBuffer {
    bytes: Vec<u8>,
}

impl SseLineBuffer {
    /// Absorb one chunk; returns the complete lines it closed, trimmed.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.bytes.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(newline) = self.bytes.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.bytes.drain(..=newline).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }
}

/// Accumulates streamed fragments into either full text or one tool call.
#[derive(Debug, Default)]
struct StreamAccumulator {
    text: String,
    tool_name: String,
    tool_arguments: String,
}

impl StreamAccumulator {
    /// Absorb one chunk; returns a content delta to forward, if any.
    fn absorb(&mut self, chunk: StreamChunk) -> Option<String> {
        let choice = chunk.choices.into_iter().next()?;

        if let Some(calls) = choice.delta.tool_calls {
            for call in calls {
                if let Some(function) = call.function {
                    if let Some(name) = function.name {
                        self.tool_name.push_str(&name);
                    }
                    if let Some(fragment) = function.arguments {
                        self.tool_arguments.push_str(&fragment);
                    }
                }
            }
        }

        let content = choice.delta.content?;
        if content.is_empty() {
            return None;
        }
        self.text.push_str(&content);
        Some(content)
    }

    fn into_outcome(self) -> ModelOutcome {
        if !self.tool_name.is_empty() {
            let raw = self.tool_arguments.trim();
            let arguments = if raw.is_empty() {
                json!({})
            } else {
                match serde_json::from_str(raw) {
                    Ok(value) => value,
                    Err(error) => {
                        warn!(
                            "Malformed tool arguments from model, falling back to text: {}",
                            error
                        );
                        return ModelOutcome::Text(format!("{}({})", self.tool_name, raw));
                    }
                }
            };
            return ModelOutcome::ToolCall {
                name: self.tool_name,
                arguments,
            };
        }

        ModelOutcome::Text(self.text)
    }
}

//
// ================= Client =================
//

/// Reusable Groq client (connection-pooled)
pub struct GroqClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GroqClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: GROQ_API_URL.to_string(),
            model: env::var(ENV_MODEL).unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        }
    }

    /// Read the credential once at construction; an empty key surfaces as
    /// the missing-credential error on the first call.
    pub fn from_env() -> Self {
        Self::new(env::var(ENV_API_KEY).unwrap_or_default())
    }

    fn require_key(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(ChatError::LlmError(MISSING_KEY_MARKER.to_string()));
        }
        Ok(())
    }

    fn build_messages(
        system: &str,
        transcript: &[TranscriptMessage],
    ) -> Vec<TranscriptMessage> {
        let mut messages = Vec::with_capacity(transcript.len() + 1);
        messages.push(TranscriptMessage::text("system", system));
        messages.extend(transcript.iter().cloned());
        messages
    }

    /// Send the request, retrying once on transport or HTTP failure.
    async fn send_with_retry(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        let mut attempt = 0;

        loop {
            match self
                .client
                .post(&self.base_url)
                .bearer_auth(&self.api_key)
                .json(request)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    if attempt >= MAX_RETRIES {
                        return Err(ChatError::LlmError(format!(
                            "Groq API error ({}): {}",
                            status, body
                        )));
                    }
                    warn!("Groq API returned {}, retrying once: {}", status, body);
                }
                Err(error) => {
                    if attempt >= MAX_RETRIES {
                        return Err(ChatError::LlmError(format!(
                            "Groq API request failed: {}",
                            error
                        )));
                    }
                    warn!("Groq API request failed, retrying once: {}", error);
                }
            }
            attempt += 1;
        }
    }
}

#[async_trait]
impl ChatModel for GroqClient {
    async fn complete(
        &self,
        system: &str,
        transcript: &[TranscriptMessage],
        tools: &[ToolSpec],
        deltas: DeltaSink,
    ) -> Result<ModelOutcome> {
        self.require_key()?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: Self::build_messages(system, transcript),
            temperature: 0.3,
            stream: Some(true),
            tools: Some(tools.to_vec()),
            tool_choice: Some("auto"),
        };

        info!("Calling Groq tool-selection endpoint (streaming)");
        let response = self.send_with_retry(&request).await?;

        let mut stream = response.bytes_stream();
        let mut buffer = SseLineBuffer::default();
        let mut accumulator = StreamAccumulator::default();

        while let Some(bytes) = stream
            .try_next()
            .await
            .map_err(|e| ChatError::StreamError(format!("Groq stream failed: {}", e)))?
        {
            // Partial lines stay buffered until the closing newline arrives.
            for line in buffer.push(&bytes) {
                if line.is_empty() {
                    continue;
                }
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return Ok(accumulator.into_outcome());
                }

                match serde_json::from_str::<StreamChunk>(data) {
                    Ok(chunk) => {
                        if let Some(delta) = accumulator.absorb(chunk) {
                            // Receiver may be gone; streaming continues so
                            // the transcript still gets the full text.
                            let _ = deltas.send(delta);
                        }
                    }
                    Err(error) => {
                        debug!("Skipping unparseable SSE chunk: {} | data={}", error, data);
                    }
                }
            }
        }

        Ok(accumulator.into_outcome())
    }

    async fn caption(&self, system: &str, transcript: &[TranscriptMessage]) -> Result<String> {
        self.require_key()?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages: Self::build_messages(system, transcript),
            temperature: 0.7,
            stream: None,
            tools: None,
            tool_choice: None,
        };

        info!("Calling Groq caption endpoint");
        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChatError::LlmError(format!("Groq caption request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::LlmError(format!(
                "Groq caption error ({}): {}",
                status, body
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ChatError::LlmError(format!("Groq caption parse error: {}", e)))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConversationState;
    use crate::tools::{tool_specs, Widget};

    #[test]
    fn test_line_buffer_reassembles_utf8_split_across_chunks() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"sagte „ja“ dazu\"}}]}\n";
        let bytes = line.as_bytes();
        // Split one byte into the three-byte „ sequence.
        let mid = line.find('„').unwrap() + 1;

        let mut buffer = SseLineBuffer::default();
        assert!(buffer.push(&bytes[..mid]).is_empty());

        let lines = buffer.push(&bytes[mid..]);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("sagte „ja“ dazu"));
        assert!(!lines[0].contains('\u{FFFD}'));
    }

    #[test]
    fn test_line_buffer_holds_partial_lines() {
        let mut buffer = SseLineBuffer::default();
        assert!(buffer.push(b"data: [DO").is_empty());
        assert_eq!(buffer.push(b"NE]\n\ndata: x"), vec!["data: [DONE]", ""]);
        assert_eq!(buffer.push(b"\n"), vec!["data: x"]);
    }

    #[test]
    fn test_request_serialization() {
        let request = ChatRequest {
            model: DEFAULT_MODEL.to_string(),
            messages: vec![TranscriptMessage::text("user", "What is the price of AAPL?")],
            temperature: 0.3,
            stream: Some(true),
            tools: Some(tool_specs()),
            tool_choice: Some("auto"),
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("What is the price of AAPL?"));
        assert!(json.contains("showStockChart"));
        assert!(json.contains("\"stream\":true"));
    }

    #[test]
    fn test_request_replays_tool_exchange_with_structured_fields() {
        let mut state = ConversationState::new(uuid::Uuid::new_v4());
        state.append_user("price of AAPL");
        state.append_tool_exchange(Widget::StockPrice, Some("AAPL".to_string()));
        state.append_user("and a chart?");

        let request = ChatRequest {
            model: DEFAULT_MODEL.to_string(),
            messages: GroqClient::build_messages("system prompt", &state.wire_transcript()),
            temperature: 0.3,
            stream: Some(true),
            tools: Some(tool_specs()),
            tool_choice: Some("auto"),
        };

        // The follow-up request after a widget turn must carry the
        // chat-completions tool fields, or the endpoint rejects it.
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"tool_calls\""));
        assert!(json.contains("\"tool_call_id\""));
        assert!(json.contains("\"type\":\"function\""));
        assert!(!json.contains("\"role\":\"tool\",\"content\":\"{\\\"tool_result\\\""));
    }

    #[test]
    fn test_caption_request_omits_stream_and_tools() {
        let request = ChatRequest {
            model: DEFAULT_MODEL.to_string(),
            messages: vec![],
            temperature: 0.7,
            stream: None,
            tools: None,
            tool_choice: None,
        };

        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("stream"));
        assert!(!json.contains("tools"));
    }

    #[test]
    fn test_accumulator_collects_text_deltas() {
        let mut acc = StreamAccumulator::default();

        for data in [
            r#"{"choices":[{"delta":{"content":"The market "}}]}"#,
            r#"{"choices":[{"delta":{"content":"is open."}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
        ] {
            let chunk: StreamChunk = serde_json::from_str(data).unwrap();
            acc.absorb(chunk);
        }

        assert_eq!(
            acc.into_outcome(),
            ModelOutcome::Text("The market is open.".to_string())
        );
    }

    #[test]
    fn test_accumulator_assembles_tool_call_fragments() {
        let mut acc = StreamAccumulator::default();

        for data in [
            r#"{"choices":[{"delta":{"tool_calls":[{"id":"call_1","function":{"name":"showStockPrice","arguments":""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"function":{"arguments":"{\"symbol\":"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"function":{"arguments":"\"DOGEUSD\"}"}}]}}]}"#,
        ] {
            let chunk: StreamChunk = serde_json::from_str(data).unwrap();
            assert!(acc.absorb(chunk).is_none());
        }

        match acc.into_outcome() {
            ModelOutcome::ToolCall { name, arguments } => {
                assert_eq!(name, "showStockPrice");
                assert_eq!(arguments["symbol"], "DOGEUSD");
            }
            other => panic!("expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_arguments_fall_back_to_text() {
        let acc = StreamAccumulator {
            text: String::new(),
            tool_name: "showStockChart".to_string(),
            tool_arguments: "{not json".to_string(),
        };

        match acc.into_outcome() {
            ModelOutcome::Text(text) => assert!(text.contains("showStockChart")),
            other => panic!("expected text fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_arguments_become_empty_object() {
        let acc = StreamAccumulator {
            text: String::new(),
            tool_name: "showMarketHeatmap".to_string(),
            tool_arguments: String::new(),
        };

        match acc.into_outcome() {
            ModelOutcome::ToolCall { name, arguments } => {
                assert_eq!(name, "showMarketHeatmap");
                assert_eq!(arguments, json!({}));
            }
            other => panic!("expected tool call, got {:?}", other),
        }
    }
}
