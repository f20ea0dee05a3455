// src/types/conversation.rs
//! REST rows returned by the conversation endpoints

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::fields::{self, first_id, first_text, first_timestamp_ms};

const COUNTERPART_ID_FIELDS: &[&str] = &["counterpartId", "otherUserId", "userId", "companyId"];
const COUNTERPART_NAME_FIELDS: &[&str] = &["counterpartName", "fullName", "companyName", "name"];
const COUNTERPART_AVATAR_FIELDS: &[&str] = &["counterpartAvatar", "avatarUrl", "avatar", "logo"];
const LAST_MESSAGE_FIELDS: &[&str] = &["lastMessageText", "lastMessage", "messageText", "content"];
const LATEST_SENT_AT_FIELDS: &[&str] = &["sentAt", "lastMessageAt", "lastSentAt"];

/// One entry of `GET /conversations/{userId}/latest`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct ConversationSummary {
    pub counterpart_id: Option<String>,
    pub counterpart_name: Option<String>,
    pub counterpart_avatar: Option<String>,
    pub last_message_text: Option<String>,
    pub sent_at_ms: Option<i64>,
}

impl From<Map<String, Value>> for ConversationSummary {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            counterpart_id: first_id(&map, COUNTERPART_ID_FIELDS),
            counterpart_name: first_text(&map, COUNTERPART_NAME_FIELDS),
            counterpart_avatar: first_text(&map, COUNTERPART_AVATAR_FIELDS),
            last_message_text: first_text(&map, LAST_MESSAGE_FIELDS),
            sent_at_ms: first_timestamp_ms(&map, LATEST_SENT_AT_FIELDS),
        }
    }
}

/// One entry of `GET /messages/{userId}/{counterpartId}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>")]
pub struct ChatMessage {
    pub message_id: Option<String>,
    pub sender_id: Option<String>,
    pub receiver_id: Option<String>,
    pub text: Option<String>,
    pub sent_at_ms: Option<i64>,
}

impl From<Map<String, Value>> for ChatMessage {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            message_id: first_id(&map, fields::MESSAGE_ID_FIELDS)
                .or_else(|| first_id(&map, fields::FALLBACK_ID_FIELDS)),
            sender_id: first_id(&map, fields::SENDER_ID_FIELDS),
            receiver_id: first_id(&map, fields::RECEIVER_ID_FIELDS),
            text: first_text(&map, fields::MESSAGE_TEXT_FIELDS),
            sent_at_ms: first_timestamp_ms(&map, fields::SENT_AT_FIELDS),
        }
    }
}

/// Entry with the greatest `sent_at_ms`; entries without one are ignored
pub fn latest_conversation(entries: &[ConversationSummary]) -> Option<&ConversationSummary> {
    entries
        .iter()
        .filter(|entry| entry.sent_at_ms.is_some())
        .max_by_key(|entry| entry.sent_at_ms)
}
