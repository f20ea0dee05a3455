// src/router/event.rs
//! Inbound hub events and their normalized direction

use serde_json::{Map, Value};

use crate::error::{RealtimeError, RealtimeResult};
use crate::types::fields::{self, first_id, first_raw, first_text};

/// How an event reached the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRoute {
    /// Subscription on a known event name
    Named,
    /// Wildcard catch-all; payload schema not verified against a known name
    Fallback,
}

/// Raw message event, whatever shape the backend sent
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub method_name: String,
    pub route: EventRoute,
    pub payload: Map<String, Value>,
}

/// Who sent an event and to whom, as far as the payload tells
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedEvent {
    Resolved { sender: String, receiver: String },
    SenderOnly { sender: String },
    Unresolved,
}

impl NormalizedEvent {
    /// Direction filter: true only for messages from someone else to `me`
    pub fn is_incoming_for(&self, me: &str) -> bool {
        match self {
            NormalizedEvent::Resolved { sender, receiver } => sender != me && receiver == me,
            NormalizedEvent::SenderOnly { sender } => sender != me,
            NormalizedEvent::Unresolved => false,
        }
    }

    pub fn sender(&self) -> Option<&str> {
        match self {
            NormalizedEvent::Resolved { sender, .. } | NormalizedEvent::SenderOnly { sender } => {
                Some(sender)
            }
            NormalizedEvent::Unresolved => None,
        }
    }
}

impl InboundEvent {
    pub fn new(method_name: impl Into<String>, route: EventRoute, payload: Map<String, Value>) -> Self {
        Self {
            method_name: method_name.into(),
            route,
            payload,
        }
    }

    /// Build from hub invocation arguments.
    ///
    /// The payload is the first object argument, or the first string argument
    /// holding a serialized object.
    pub fn from_hub(
        method_name: &str,
        arguments: &[Value],
        route: EventRoute,
    ) -> RealtimeResult<Self> {
        let payload = arguments.iter().find_map(|arg| match arg {
            Value::Object(map) => Some(map.clone()),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            },
            _ => None,
        });

        payload
            .map(|payload| Self::new(method_name, route, payload))
            .ok_or_else(|| {
                RealtimeError::MalformedEvent(format!(
                    "'{}' carried no object payload ({} argument(s))",
                    method_name,
                    arguments.len()
                ))
            })
    }

    pub fn sender_id(&self) -> Option<String> {
        first_id(&self.payload, fields::SENDER_ID_FIELDS)
    }

    pub fn receiver_id(&self) -> Option<String> {
        first_id(&self.payload, fields::RECEIVER_ID_FIELDS)
    }

    pub fn message_id(&self) -> Option<String> {
        first_id(&self.payload, fields::MESSAGE_ID_FIELDS)
    }

    pub fn normalize(&self) -> NormalizedEvent {
        match (self.sender_id(), self.receiver_id()) {
            (Some(sender), Some(receiver)) => NormalizedEvent::Resolved { sender, receiver },
            (Some(sender), None) => NormalizedEvent::SenderOnly { sender },
            _ => NormalizedEvent::Unresolved,
        }
    }

    /// `messageId`, else `id`, else `sender-receiver-sentAt`
    pub fn dedup_key(&self, now_ms: i64) -> String {
        if let Some(id) = self.message_id() {
            return id;
        }
        if let Some(id) = first_id(&self.payload, fields::FALLBACK_ID_FIELDS) {
            return id;
        }
        let sent_at = first_raw(&self.payload, fields::SENT_AT_FIELDS)
            .unwrap_or_else(|| now_ms.to_string());
        format!(
            "{}-{}-{}",
            self.sender_id().unwrap_or_default(),
            self.receiver_id().unwrap_or_default(),
            sent_at
        )
    }

    pub fn display_name(&self) -> Option<String> {
        first_text(&self.payload, fields::DISPLAY_NAME_FIELDS)
    }

    pub fn text(&self) -> Option<String> {
        first_text(&self.payload, fields::MESSAGE_TEXT_FIELDS)
    }

    pub fn avatar(&self) -> Option<String> {
        first_text(&self.payload, fields::AVATAR_FIELDS)
    }

    /// Counterpart to navigate to: the sender unless that is `me`
    pub fn counterpart_id(&self, me: &str) -> Option<String> {
        match self.sender_id() {
            Some(sender) if sender != me => Some(sender),
            _ => first_id(&self.payload, fields::COUNTERPART_FALLBACK_FIELDS)
                .filter(|id| id != me),
        }
    }
}
