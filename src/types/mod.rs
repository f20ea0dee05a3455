// src/types/mod.rs
pub mod conversation;
pub mod fields;

pub use conversation::{latest_conversation, ChatMessage, ConversationSummary};
