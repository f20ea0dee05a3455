// src/lib.rs
//! Real-time chat and notification delivery for the job-search app:
//! hub connection, push event routing with dedup, and REST reconciliation.

pub mod auth;
pub mod cli;
pub mod clock;
pub mod core;
pub mod environment;
pub mod error;
pub mod hub;
pub mod poller;
pub mod router;
pub mod session;
pub mod sink;
pub mod types;

/// Crate-wide logging shorthand over `tracing`.
#[macro_export]
macro_rules! app_log {
    ($level:ident, $($arg:tt)+) => {
        ::tracing::$level!($($arg)+)
    };
}

pub use auth::{AuthProvider, SessionCredentials};
pub use clock::{Clock, SystemClock};
pub use core::{ConfigManager, ServiceClient};
pub use error::{RealtimeError, RealtimeResult};
pub use hub::{ConnectionManager, ConnectionState, HubTransport, WebSocketTransport};
pub use poller::{ConversationApi, ReconciliationPoller};
pub use router::{EventRouter, InboundEvent, NormalizedEvent};
pub use session::{ListenerSession, SessionContext};
pub use sink::{ChannelSink, NotificationDescriptor, PresentationSink, TracingSink};
