// src/sink.rs
//! Presentation boundary: where surviving notifications end up

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use crate::app_log;

/// Conversation to open when the notification is tapped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationTarget {
    pub counterpart_id: Option<String>,
    pub counterpart_name: String,
    pub counterpart_avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDescriptor {
    pub title: String,
    pub body: String,
    pub navigate_to: NavigationTarget,
}

/// Consumer of deduplicated "new message" notifications.
///
/// The core asks `is_ui_context_suppressed` before every alert; the sink is
/// the only party that knows which screen is showing.
pub trait PresentationSink: Send + Sync {
    fn present(&self, notification: NotificationDescriptor);

    fn is_ui_context_suppressed(&self) -> bool;

    /// A counterpart's conversation saw activity, alerted or not
    fn conversation_activity(&self, _counterpart_id: &str) {}
}

/// Logs notifications; used by the CLI
#[derive(Debug, Default)]
pub struct TracingSink;

impl PresentationSink for TracingSink {
    fn present(&self, notification: NotificationDescriptor) {
        app_log!(
            info,
            title = %notification.title,
            counterpart = ?notification.navigate_to.counterpart_id,
            "{}",
            notification.body
        );
    }

    fn is_ui_context_suppressed(&self) -> bool {
        false
    }

    fn conversation_activity(&self, counterpart_id: &str) {
        app_log!(debug, "Conversation activity from {}", counterpart_id);
    }
}

/// Sink events forwarded over a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Notification(NotificationDescriptor),
    Activity(String),
}

/// Forwards everything to an mpsc channel; the embedding app flips the
/// suppression flag when a chat screen gains or loses focus.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
    suppressed: AtomicBool,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                suppressed: AtomicBool::new(false),
            },
            rx,
        )
    }

    pub fn set_suppressed(&self, suppressed: bool) {
        self.suppressed.store(suppressed, Ordering::SeqCst);
    }
}

impl PresentationSink for ChannelSink {
    fn present(&self, notification: NotificationDescriptor) {
        if self.tx.send(SinkEvent::Notification(notification)).is_err() {
            app_log!(debug, "Notification receiver dropped");
        }
    }

    fn is_ui_context_suppressed(&self) -> bool {
        self.suppressed.load(Ordering::SeqCst)
    }

    fn conversation_activity(&self, counterpart_id: &str) {
        let _ = self.tx.send(SinkEvent::Activity(counterpart_id.to_string()));
    }
}
