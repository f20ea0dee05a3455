// src/hub/mod.rs
pub mod connection;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use connection::{
    ConnectionManager, ConnectionState, HubConfig, HubEvent, RetryPolicy, Subscription,
    SubscriptionId,
};
pub use transport::{HubCommand, HubLink, HubTransport, TransportEvent};
pub use websocket::{WebSocketConfig, WebSocketTransport};
