// src/poller.rs
//! Reconciliation poller: REST snapshots that catch what the live channel missed

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::app_log;
use crate::auth::AuthProvider;
use crate::router::SynthesizedMessage;
use crate::types::{latest_conversation, ChatMessage, ConversationSummary};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// The two conversation endpoints the poller reads
#[async_trait]
pub trait ConversationApi: Send + Sync {
    async fn latest_conversations(&self, user_id: &str) -> anyhow::Result<Vec<ConversationSummary>>;

    /// Newest message of one conversation (page 1, size 1)
    async fn latest_message(
        &self,
        user_id: &str,
        counterpart_id: &str,
    ) -> anyhow::Result<Option<ChatMessage>>;
}

/// Newest server timestamp seen; never moves backwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationSnapshot {
    latest_server_timestamp_ms: i64,
}

impl ConversationSnapshot {
    pub fn starting_at(timestamp_ms: i64) -> Self {
        Self {
            latest_server_timestamp_ms: timestamp_ms,
        }
    }

    pub fn latest_server_timestamp_ms(&self) -> i64 {
        self.latest_server_timestamp_ms
    }

    pub fn is_newer(&self, timestamp_ms: i64) -> bool {
        timestamp_ms > self.latest_server_timestamp_ms
    }

    pub fn advance(&mut self, timestamp_ms: i64) {
        self.latest_server_timestamp_ms = self.latest_server_timestamp_ms.max(timestamp_ms);
    }
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// No token or no current user
    Inert,
    NoChange,
    /// Newest message was sent by the current user; snapshot left alone
    OwnMessage,
    Synthesized(SynthesizedMessage),
    Failed(String),
}

pub struct ReconciliationPoller {
    api: Arc<dyn ConversationApi>,
    auth: Arc<dyn AuthProvider>,
    snapshot: ConversationSnapshot,
    interval: Duration,
}

impl ReconciliationPoller {
    pub fn new(
        api: Arc<dyn ConversationApi>,
        auth: Arc<dyn AuthProvider>,
        started_at_ms: i64,
        interval: Duration,
    ) -> Self {
        Self {
            api,
            auth,
            snapshot: ConversationSnapshot::starting_at(started_at_ms),
            interval,
        }
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.snapshot
    }

    pub async fn reconcile_once(&mut self) -> PassOutcome {
        let (Some(_token), Some(me)) = (self.auth.stored_token(), self.auth.current_user_id())
        else {
            return PassOutcome::Inert;
        };

        let conversations = match self.api.latest_conversations(&me).await {
            Ok(conversations) => conversations,
            Err(e) => {
                app_log!(warn, "Conversation poll failed: {:#}", e);
                return PassOutcome::Failed(format!("{:#}", e));
            }
        };

        let Some(latest) = latest_conversation(&conversations) else {
            return PassOutcome::NoChange;
        };
        let Some(sent_at_ms) = latest.sent_at_ms else {
            return PassOutcome::NoChange;
        };
        if !self.snapshot.is_newer(sent_at_ms) {
            return PassOutcome::NoChange;
        }

        let Some(counterpart_id) = latest.counterpart_id.clone() else {
            app_log!(debug, "Latest conversation has no counterpart id, skipping");
            return PassOutcome::NoChange;
        };

        let message = match self.api.latest_message(&me, &counterpart_id).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                app_log!(debug, "No messages returned for conversation {}", counterpart_id);
                return PassOutcome::NoChange;
            }
            Err(e) => {
                app_log!(warn, "Latest message lookup failed: {:#}", e);
                return PassOutcome::Failed(format!("{:#}", e));
            }
        };

        if message.sender_id.as_deref() == Some(me.as_str()) {
            app_log!(trace, "Newest message in {} is our own", counterpart_id);
            return PassOutcome::OwnMessage;
        }

        self.snapshot.advance(sent_at_ms);
        app_log!(
            debug,
            snapshot = self.snapshot.latest_server_timestamp_ms(),
            "Poll found a new message from {}",
            counterpart_id
        );

        PassOutcome::Synthesized(SynthesizedMessage {
            counterpart_id,
            counterpart_name: latest.counterpart_name.clone(),
            counterpart_avatar: latest.counterpart_avatar.clone(),
            text: message.text.or_else(|| latest.last_message_text.clone()),
            sent_at_ms,
        })
    }

    /// Run passes on the interval (first one immediately) until the consumer goes away
    pub fn spawn(self, consumer: mpsc::Sender<SynthesizedMessage>) -> JoinHandle<()> {
        tokio::spawn(self.run(consumer))
    }

    async fn run(mut self, consumer: mpsc::Sender<SynthesizedMessage>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let PassOutcome::Synthesized(message) = self.reconcile_once().await {
                if consumer.send(message).await.is_err() {
                    app_log!(debug, "Poll consumer closed, stopping poller");
                    return;
                }
            }
            if consumer.is_closed() {
                return;
            }
        }
    }
}
