//! Stock Chat Orchestrator
//!
//! A conversational stock-market assistant that:
//! - Keeps an append-only, session-scoped conversation transcript
//! - Routes each user message through Groq's tool-calling endpoint
//! - Streams free-text answers to the UI channel delta by delta
//! - Resolves widget tool selections into render units with LLM captions
//!
//! TURN LOOP:
//! USER MESSAGE → MODEL → {STREAMED TEXT | TOOL + CAPTION} → RENDER UNIT

pub mod api;
pub mod error;
pub mod groq;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use models::{
    ConversationState, Message, MessageContent, MessageRole, RenderContent, RenderUnit, UiEvent,
    UiSink,
};
pub use orchestrator::ChatSession;
pub use tools::Widget;
