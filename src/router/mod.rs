// src/router/mod.rs
//! Event routing: direction filter, context suppression, dedup, and
//! notification construction for push and poll deliveries alike.

pub mod dedup;
pub mod event;

pub use dedup::{DedupCursor, DEFAULT_QUIET_PERIOD_MS};
pub use event::{EventRoute, InboundEvent, NormalizedEvent};

use std::sync::Arc;

use crate::app_log;
use crate::clock::Clock;
use crate::sink::{NavigationTarget, NotificationDescriptor, PresentationSink};

pub const FALLBACK_DISPLAY_NAME: &str = "User";
pub const FALLBACK_MESSAGE_BODY: &str = "You have a new message";

/// Latest message recovered by a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedMessage {
    pub counterpart_id: String,
    pub counterpart_name: Option<String>,
    pub counterpart_avatar: Option<String>,
    pub text: Option<String>,
    pub sent_at_ms: i64,
}

/// What the router did with one delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Forwarded(NotificationDescriptor),
    /// Self-sent, addressed elsewhere, or direction unknown
    WrongDirection,
    /// A chat screen is showing; no alert
    Suppressed,
    Duplicate,
}

/// Consumer-side stage shared by the push and poll producers.
///
/// Owns the listener's `DedupCursor`; one router per listener session.
pub struct EventRouter {
    current_user_id: String,
    sink: Arc<dyn PresentationSink>,
    clock: Arc<dyn Clock>,
    cursor: DedupCursor,
}

impl EventRouter {
    pub fn new(
        current_user_id: impl Into<String>,
        sink: Arc<dyn PresentationSink>,
        clock: Arc<dyn Clock>,
        quiet_period_ms: i64,
    ) -> Self {
        Self {
            current_user_id: current_user_id.into(),
            sink,
            clock,
            cursor: DedupCursor::new(quiet_period_ms),
        }
    }

    pub fn cursor(&self) -> &DedupCursor {
        &self.cursor
    }

    /// Route a live push event
    pub fn route_push(&mut self, event: &InboundEvent) -> RouteDecision {
        let direction = event.normalize();
        if !direction.is_incoming_for(&self.current_user_id) {
            app_log!(
                trace,
                method = %event.method_name,
                "Dropping event not addressed to current user: {:?}",
                direction
            );
            return RouteDecision::WrongDirection;
        }

        let counterpart_id = event.counterpart_id(&self.current_user_id);
        if let Some(id) = &counterpart_id {
            self.sink.conversation_activity(id);
        }

        if self.sink.is_ui_context_suppressed() {
            app_log!(debug, "Chat screen visible, no alert for {}", event.method_name);
            return RouteDecision::Suppressed;
        }

        let now = self.clock.now_ms();
        let key = event.dedup_key(now);
        if !self.cursor.admits(&key, now) {
            app_log!(debug, route = ?event.route, "Duplicate notification {} suppressed", key);
            return RouteDecision::Duplicate;
        }
        self.cursor.record_keyed(key, now);

        let counterpart_name = event
            .display_name()
            .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string());
        let notification = NotificationDescriptor {
            title: notification_title(&counterpart_name),
            body: event
                .text()
                .unwrap_or_else(|| FALLBACK_MESSAGE_BODY.to_string()),
            navigate_to: NavigationTarget {
                counterpart_id,
                counterpart_name,
                counterpart_avatar: event.avatar(),
            },
        };

        self.forward(notification)
    }

    /// Route a message recovered by polling; quiet period only, no key
    pub fn route_synthesized(&mut self, message: &SynthesizedMessage) -> RouteDecision {
        self.sink.conversation_activity(&message.counterpart_id);

        if self.sink.is_ui_context_suppressed() {
            return RouteDecision::Suppressed;
        }

        let now = self.clock.now_ms();
        if self.cursor.in_quiet_period(now) {
            app_log!(
                debug,
                "Polled message from {} inside quiet period",
                message.counterpart_id
            );
            return RouteDecision::Duplicate;
        }
        self.cursor.record_unkeyed(now);

        let counterpart_name = message
            .counterpart_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string());
        let notification = NotificationDescriptor {
            title: notification_title(&counterpart_name),
            body: message
                .text
                .clone()
                .filter(|text| !text.trim().is_empty())
                .unwrap_or_else(|| FALLBACK_MESSAGE_BODY.to_string()),
            navigate_to: NavigationTarget {
                counterpart_id: Some(message.counterpart_id.clone()),
                counterpart_name,
                counterpart_avatar: message.counterpart_avatar.clone(),
            },
        };

        self.forward(notification)
    }

    fn forward(&self, notification: NotificationDescriptor) -> RouteDecision {
        app_log!(info, "Surfacing notification: {}", notification.title);
        self.sink.present(notification.clone());
        RouteDecision::Forwarded(notification)
    }
}

fn notification_title(counterpart_name: &str) -> String {
    format!("New message from {}", counterpart_name)
}
