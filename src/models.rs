//! Conversation data model
//!
//! Stores the per-session message transcript and the UI-bound payloads.
//! The transcript is append-only: messages are never edited, reordered, or
//! rolled back, and the whole state is discarded when the session ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::tools::Widget;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

/// Message payload variants
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    /// Assistant turn recording which tool the model invoked.
    ToolCall {
        call_id: Uuid,
        tool: Widget,
        symbol: Option<String>,
    },
    /// Tool turn confirming the invocation; always carries the call_id of
    /// the tool-call message immediately preceding it.
    ToolResult {
        call_id: Uuid,
        tool: Widget,
        symbol: Option<String>,
    },
}

/// A single message in the conversation transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Uuid,
    pub role: MessageRole,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: MessageRole, content: MessageContent) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            role,
            content,
            created_at: Utc::now(),
        }
    }

    /// Wire role string replayed to the model.
    pub fn wire_role(&self) -> &'static str {
        match self.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }

    /// Wire message replayed to the model. Tool turns must use the
    /// chat-completions structured fields: the assistant turn carries a
    /// `tool_calls` array and the tool turn echoes the call id through
    /// `tool_call_id`, otherwise the endpoint rejects the transcript.
    pub fn to_wire(&self) -> TranscriptMessage {
        match &self.content {
            MessageContent::Text { text } => TranscriptMessage::text(self.wire_role(), text),
            MessageContent::ToolCall {
                call_id,
                tool,
                symbol,
            } => TranscriptMessage {
                role: "assistant".to_string(),
                content: None,
                tool_calls: Some(vec![WireToolCall {
                    id: call_id.to_string(),
                    kind: "function".to_string(),
                    function: WireFunctionCall {
                        name: tool.name().to_string(),
                        arguments: symbol_object(symbol.as_deref()).to_string(),
                    },
                }]),
                tool_call_id: None,
            },
            MessageContent::ToolResult {
                call_id,
                tool,
                symbol,
            } => TranscriptMessage {
                role: "tool".to_string(),
                content: Some(
                    json!({
                        "toolName": tool.name(),
                        "result": symbol_object(symbol.as_deref()),
                    })
                    .to_string(),
                ),
                tool_calls: None,
                tool_call_id: Some(call_id.to_string()),
            },
        }
    }
}

fn symbol_object(symbol: Option<&str>) -> serde_json::Value {
    match symbol {
        Some(s) => json!({ "symbol": s }),
        None => json!({}),
    }
}

/// Transcript entry in the chat-completions wire shape. Plain turns carry
/// only `role` and `content`; tool turns fill the structured fields.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl TranscriptMessage {
    pub fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

/// One structured tool invocation on an assistant wire message.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: WireFunctionCall,
}

/// The contract wants `arguments` as a JSON-encoded string, not an object.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WireFunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Conversation state for one chat session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub chat_id: Uuid,
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new(chat_id: Uuid) -> Self {
        Self {
            chat_id,
            messages: Vec::new(),
        }
    }

    /// Append the user's turn. Happens before any remote call so a crash
    /// mid-call still leaves an accurate transcript.
    pub fn append_user(&mut self, text: &str) -> Uuid {
        let message = Message::new(
            MessageRole::User,
            MessageContent::Text {
                text: text.to_string(),
            },
        );
        let id = message.message_id;
        self.messages.push(message);
        id
    }

    /// Append the assistant's free-text turn.
    pub fn append_assistant_text(&mut self, text: String) -> Uuid {
        let message = Message::new(MessageRole::Assistant, MessageContent::Text { text });
        let id = message.message_id;
        self.messages.push(message);
        id
    }

    /// Append a tool-call/tool-result pair with a fresh shared call id.
    /// The two messages land adjacently so the model is never shown a
    /// dangling call.
    pub fn append_tool_exchange(&mut self, tool: Widget, symbol: Option<String>) -> Uuid {
        let call_id = Uuid::new_v4();

        self.messages.push(Message::new(
            MessageRole::Assistant,
            MessageContent::ToolCall {
                call_id,
                tool,
                symbol: symbol.clone(),
            },
        ));
        self.messages.push(Message::new(
            MessageRole::Tool,
            MessageContent::ToolResult {
                call_id,
                tool,
                symbol,
            },
        ));

        call_id
    }

    /// Iterate over all messages in conversation order
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Render the transcript as wire messages for the model.
    pub fn wire_transcript(&self) -> Vec<TranscriptMessage> {
        self.messages.iter().map(Message::to_wire).collect()
    }
}

//
// ================= UI payloads =================
//

/// Final UI-bound payload for one assistant turn. Write-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderUnit {
    pub id: Uuid,
    pub content: RenderContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderContent {
    /// Full text of a streamed assistant reply.
    Text { text: String },
    /// A widget reference plus its caption (may be empty when the caption
    /// call failed).
    Widget {
        widget: Widget,
        symbol: Option<String>,
        caption: String,
    },
    /// User-visible failure with a support link. The session stays usable.
    Error { message: String, support_url: String },
}

/// Incremental render instruction pushed to the UI channel.
///
/// The streaming-text branch emits `TextDelta`* then `TextSealed`; the tool
/// branch emits `Placeholder` then `Final` with the same id so the UI can
/// replace the pending container in place. Every submission ends with one
/// `Final`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UiEvent {
    TextDelta { id: Uuid, delta: String },
    TextSealed { id: Uuid },
    Placeholder { id: Uuid },
    Final(RenderUnit),
}

/// Sender half of the UI update channel.
pub type UiSink = tokio::sync::mpsc::UnboundedSender<UiEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_order_is_preserved() {
        let mut state = ConversationState::new(Uuid::new_v4());

        state.append_user("What is the price of AAPL?");
        state.append_tool_exchange(Widget::StockPrice, Some("AAPL".to_string()));
        state.append_user("And a chart?");

        let roles: Vec<MessageRole> = state.messages().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::Tool,
                MessageRole::User,
            ]
        );
    }

    #[test]
    fn test_tool_exchange_shares_call_id() {
        let mut state = ConversationState::new(Uuid::new_v4());
        let call_id = state.append_tool_exchange(Widget::StockChart, Some("TSLA".to_string()));

        let messages: Vec<&Message> = state.messages().collect();
        assert_eq!(messages.len(), 2);

        match (&messages[0].content, &messages[1].content) {
            (
                MessageContent::ToolCall {
                    call_id: call, tool, ..
                },
                MessageContent::ToolResult {
                    call_id: result, ..
                },
            ) => {
                assert_eq!(*call, call_id);
                assert_eq!(*result, call_id);
                assert_eq!(*tool, Widget::StockChart);
            }
            other => panic!("unexpected message pair: {:?}", other),
        }
    }

    #[test]
    fn test_wire_transcript_links_tool_turns_by_call_id() {
        let mut state = ConversationState::new(Uuid::new_v4());
        state.append_user("heatmap please");
        let call_id = state.append_tool_exchange(Widget::MarketHeatmap, None);

        let transcript = state.wire_transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[0].role, "user");
        assert_eq!(transcript[0].content.as_deref(), Some("heatmap please"));

        // Assistant turn: no content, one structured call.
        assert_eq!(transcript[1].role, "assistant");
        assert!(transcript[1].content.is_none());
        let calls = transcript[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, call_id.to_string());
        assert_eq!(calls[0].kind, "function");
        assert_eq!(calls[0].function.name, "showMarketHeatmap");
        assert_eq!(calls[0].function.arguments, "{}");

        // Tool turn: echoes the same call id.
        assert_eq!(transcript[2].role, "tool");
        assert_eq!(
            transcript[2].tool_call_id.as_deref(),
            Some(call_id.to_string().as_str())
        );
        assert!(transcript[2]
            .content
            .as_deref()
            .unwrap()
            .contains("showMarketHeatmap"));
    }

    #[test]
    fn test_wire_tool_turns_serialize_structured_fields() {
        let mut state = ConversationState::new(Uuid::new_v4());
        state.append_user("price of TSLA");
        state.append_tool_exchange(Widget::StockPrice, Some("TSLA".to_string()));

        let json = serde_json::to_string(&state.wire_transcript()).unwrap();
        assert!(json.contains("\"tool_calls\""));
        assert!(json.contains("\"tool_call_id\""));
        assert!(json.contains("\"type\":\"function\""));
        // Arguments travel as a JSON-encoded string.
        assert!(json.contains("\"arguments\":\"{\\\"symbol\\\":\\\"TSLA\\\"}\""));

        // Plain turns omit the structured fields entirely.
        let user = serde_json::to_string(&TranscriptMessage::text("user", "hi")).unwrap();
        assert!(!user.contains("tool_calls"));
        assert!(!user.contains("tool_call_id"));
    }

    #[test]
    fn test_message_count_monotone() {
        let mut state = ConversationState::new(Uuid::new_v4());
        let mut previous = 0;

        for i in 0..5 {
            state.append_user(&format!("question {}", i));
            state.append_assistant_text(format!("answer {}", i));
            assert!(state.message_count() > previous);
            previous = state.message_count();
        }
    }
}
