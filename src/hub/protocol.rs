// src/hub/protocol.rs
//! JSON hub protocol: record-separated frames over a WebSocket.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{RealtimeError, RealtimeResult};

pub const RECORD_SEPARATOR: char = '\u{1e}';

const TYPE_INVOCATION: u64 = 1;
const TYPE_COMPLETION: u64 = 3;
const TYPE_PING: u64 = 6;
const TYPE_CLOSE: u64 = 7;

/// Messages the client acts on; everything else parses to `Other`
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    Other(u64),
}

impl HubMessage {
    pub fn from_value(value: Value) -> RealtimeResult<Self> {
        let msg_type = value
            .get("type")
            .and_then(Value::as_u64)
            .ok_or_else(|| RealtimeError::Protocol(format!("frame without type: {}", value)))?;

        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);

        match msg_type {
            TYPE_INVOCATION => Ok(HubMessage::Invocation {
                invocation_id: text("invocationId"),
                target: text("target").ok_or_else(|| {
                    RealtimeError::Protocol("invocation without target".to_string())
                })?,
                arguments: value
                    .get("arguments")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            }),
            TYPE_COMPLETION => Ok(HubMessage::Completion {
                invocation_id: text("invocationId").ok_or_else(|| {
                    RealtimeError::Protocol("completion without invocationId".to_string())
                })?,
                result: value.get("result").cloned(),
                error: text("error"),
            }),
            TYPE_PING => Ok(HubMessage::Ping),
            TYPE_CLOSE => Ok(HubMessage::Close {
                error: text("error"),
                allow_reconnect: value
                    .get("allowReconnect")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            other => Ok(HubMessage::Other(other)),
        }
    }
}

/// Split a text frame into hub messages; bad records are returned as errors
/// without affecting their neighbours.
pub fn parse_frames(text: &str) -> Vec<RealtimeResult<HubMessage>> {
    text.split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
        .map(|record| {
            serde_json::from_str::<Value>(record)
                .map_err(RealtimeError::from)
                .and_then(HubMessage::from_value)
        })
        .collect()
}

fn frame(value: Value) -> String {
    let mut out = value.to_string();
    out.push(RECORD_SEPARATOR);
    out
}

pub fn handshake_request() -> String {
    frame(json!({"protocol": "json", "version": 1}))
}

/// Check the server's handshake reply; returns whatever trails it in the frame
pub fn parse_handshake_response(text: &str) -> RealtimeResult<&str> {
    let (head, rest) = text
        .split_once(RECORD_SEPARATOR)
        .ok_or_else(|| RealtimeError::Protocol("incomplete handshake response".to_string()))?;

    let value: Value = serde_json::from_str(head)?;
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Err(RealtimeError::Transport(format!("handshake rejected: {}", error)));
    }
    Ok(rest)
}

pub fn invocation(invocation_id: &str, target: &str, arguments: &[Value]) -> String {
    frame(json!({
        "type": TYPE_INVOCATION,
        "invocationId": invocation_id,
        "target": target,
        "arguments": arguments,
    }))
}

pub fn ping() -> String {
    frame(json!({"type": TYPE_PING}))
}

pub fn close() -> String {
    frame(json!({"type": TYPE_CLOSE}))
}

/// Body of `POST {hub}/negotiate?negotiateVersion=1`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    pub connection_id: Option<String>,
    pub connection_token: Option<String>,
    /// Redirect to another endpoint (hosted hub services)
    pub url: Option<String>,
    pub access_token: Option<String>,
    pub error: Option<String>,
}

impl NegotiateResponse {
    /// Token placed in the `id` query parameter of the socket URL
    pub fn socket_id(&self) -> Option<&str> {
        self.connection_token
            .as_deref()
            .or(self.connection_id.as_deref())
    }
}
