//! Conversation orchestrator
//!
//! Owns the per-session conversation state, routes each user submission
//! through the tool-selection model call, and resolves every outcome into a
//! renderable unit. One pass per submission: the user turn is appended, the
//! model either streams text or selects a widget tool, and the tool path
//! finishes with a second round-trip for the caption.

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ChatError;
use crate::groq::{ChatModel, ModelOutcome, MISSING_KEY_MARKER};
use crate::models::{ConversationState, RenderContent, RenderUnit, UiEvent, UiSink};
use crate::prompts::{caption_system_prompt, GENERIC_SYMBOL, TOOL_SYSTEM_PROMPT};
use crate::tools::{tool_specs, Widget};
use crate::Result;

/// Link shown alongside user-visible errors.
pub const SUPPORT_URL: &str = "https://github.com/stockchat/stockchat/issues";

/// User-facing rewrite of the provider's missing-credential error.
pub const MISSING_KEY_MESSAGE: &str = "Groq API key is missing. Pass it using the GROQ_API_KEY \
environment variable. Try restarting the application if you recently changed your environment \
variables.";

/// One chat session: exclusive owner of its conversation state.
///
/// Callers must serialize submissions per session (one in-flight `submit`
/// at a time); independent sessions share nothing and may run concurrently.
pub struct ChatSession {
    state: ConversationState,
    model: Arc<dyn ChatModel>,
}

impl ChatSession {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self::with_chat_id(Uuid::new_v4(), model)
    }

    pub fn with_chat_id(chat_id: Uuid, model: Arc<dyn ChatModel>) -> Self {
        Self {
            state: ConversationState::new(chat_id),
            model,
        }
    }

    pub fn chat_id(&self) -> Uuid {
        self.state.chat_id
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// Handle one user submission end to end.
    ///
    /// Remote failures resolve to an error `RenderUnit` rather than an `Err`;
    /// the only `Err` is rejected empty input. Every path pushes a final
    /// `UiEvent::Final` and returns the same unit.
    pub async fn submit(&mut self, text: &str, ui: &UiSink) -> Result<RenderUnit> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidInput(
                "user message must be non-empty".to_string(),
            ));
        }

        // User turn lands before the remote call so a failure mid-call still
        // leaves an accurate transcript.
        self.state.append_user(text);

        let transcript = self.state.wire_transcript();
        let specs = tool_specs();
        let unit_id = Uuid::new_v4();

        // Bridge model deltas onto the UI channel as they arrive.
        let (delta_tx, mut delta_rx) = mpsc::unbounded_channel::<String>();
        let forward_ui = ui.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(delta) = delta_rx.recv().await {
                let _ = forward_ui.send(UiEvent::TextDelta { id: unit_id, delta });
            }
        });

        let outcome = self
            .model
            .complete(TOOL_SYSTEM_PROMPT, &transcript, &specs, delta_tx)
            .await;
        // The sink was dropped by `complete`; wait for the bridge to drain.
        let _ = forwarder.await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!("Tool-selection call failed: {}", error);
                let unit = error_unit(unit_id, &error);
                let _ = ui.send(UiEvent::Final(unit.clone()));
                return Ok(unit);
            }
        };

        match outcome {
            ModelOutcome::Text(full) => Ok(self.seal_text(unit_id, full, ui)),
            ModelOutcome::ToolCall { name, arguments } => {
                match resolve_invocation(&name, &arguments) {
                    Ok((widget, symbol)) => self.render_widget(unit_id, widget, symbol, ui).await,
                    Err(reason) => {
                        // Unrecognized or malformed selection: the model's
                        // raw structured output falls through to text.
                        debug!("Tool selection rejected ({}), showing as text", reason);
                        let raw = json!({
                            "tool_call": {
                                "function": { "name": name },
                                "parameters": arguments,
                            }
                        })
                        .to_string();
                        let _ = ui.send(UiEvent::TextDelta {
                            id: unit_id,
                            delta: raw.clone(),
                        });
                        Ok(self.seal_text(unit_id, raw, ui))
                    }
                }
            }
        }
    }

    /// Close out the streaming-text branch: seal the live value, record the
    /// assistant turn, emit the final unit.
    fn seal_text(&mut self, unit_id: Uuid, full: String, ui: &UiSink) -> RenderUnit {
        let _ = ui.send(UiEvent::TextSealed { id: unit_id });
        self.state.append_assistant_text(full.clone());

        let unit = RenderUnit {
            id: unit_id,
            content: RenderContent::Text { text: full },
        };
        let _ = ui.send(UiEvent::Final(unit.clone()));
        unit
    }

    /// Tool branch: placeholder first, then the call/result pair, then the
    /// caption round-trip, then the final unit.
    async fn render_widget(
        &mut self,
        unit_id: Uuid,
        widget: Widget,
        symbol: Option<String>,
        ui: &UiSink,
    ) -> Result<RenderUnit> {
        let _ = ui.send(UiEvent::Placeholder { id: unit_id });

        let call_id = self.state.append_tool_exchange(widget, symbol.clone());
        debug!(%call_id, tool = widget.name(), "Recorded tool exchange");

        let caption_symbol = symbol.as_deref().unwrap_or(GENERIC_SYMBOL);
        let prompt = caption_system_prompt(widget, caption_symbol);
        let caption = match self
            .model
            .caption(&prompt, &self.state.wire_transcript())
            .await
        {
            Ok(caption) => caption,
            Err(error) => {
                // Never surfaced: the widget renders without a caption.
                warn!("Caption call failed, continuing without one: {}", error);
                String::new()
            }
        };

        let unit = RenderUnit {
            id: unit_id,
            content: RenderContent::Widget {
                widget,
                symbol,
                caption,
            },
        };
        let _ = ui.send(UiEvent::Final(unit.clone()));
        Ok(unit)
    }
}

/// Validate a model tool selection against the registry.
///
/// Returns the widget and its symbol, or the reason the selection must fall
/// back to the text branch. Symbols on tools that take none are dropped.
fn resolve_invocation(
    name: &str,
    arguments: &Value,
) -> std::result::Result<(Widget, Option<String>), String> {
    let Some(widget) = Widget::from_name(name) else {
        return Err(format!("unknown tool '{}'", name));
    };

    let symbol = arguments
        .get("symbol")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if widget.requires_symbol() {
        match symbol {
            Some(symbol) if !symbol.is_empty() => Ok((widget, Some(symbol))),
            _ => Err(format!("{} requires a symbol argument", name)),
        }
    } else {
        Ok((widget, None))
    }
}

fn error_unit(id: Uuid, error: &ChatError) -> RenderUnit {
    let raw = error.to_string();
    let message = if raw.contains(MISSING_KEY_MARKER) {
        MISSING_KEY_MESSAGE.to_string()
    } else {
        raw
    };

    RenderUnit {
        id,
        content: RenderContent::Error {
            message,
            support_url: SUPPORT_URL.to_string(),
        },
    }
}
