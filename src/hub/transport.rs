// src/hub/transport.rs
//! Seam between the connection manager and whatever speaks to the hub

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::RealtimeResult;

/// Requests from the manager to an open link
#[derive(Debug)]
pub enum HubCommand {
    Invoke {
        method: String,
        arguments: Vec<Value>,
        reply: oneshot::Sender<RealtimeResult<Value>>,
    },
    Close,
}

/// What an open link reports back
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Server-initiated call
    Invocation { target: String, arguments: Vec<Value> },
    /// Socket dropped; the transport is retrying on its own
    Reconnecting(Option<String>),
    /// Transport recovered, possibly under a new connection id
    Reconnected { connection_id: Option<String> },
    /// Gave up, or the server closed for good
    Closed(Option<String>),
}

/// An established hub connection
#[derive(Debug)]
pub struct HubLink {
    pub connection_id: Option<String>,
    pub commands: mpsc::Sender<HubCommand>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens hub connections.
///
/// One `open` call is one handshake attempt; retrying a failed handshake is
/// the connection manager's job. Recovering an established link after a
/// network drop is the transport's job.
#[async_trait]
pub trait HubTransport: Send + Sync + 'static {
    async fn open(&self, url: &str, access_token: &str) -> RealtimeResult<HubLink>;
}
