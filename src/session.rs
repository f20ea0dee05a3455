// src/session.rs
//! A running listener: subscriptions, poller, and the router that both feed.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::app_log;
use crate::auth::AuthProvider;
use crate::clock::Clock;
use crate::core::ListenerConfig;
use crate::hub::{ConnectionManager, Subscription, SubscriptionId};
use crate::poller::{ConversationApi, ReconciliationPoller};
use crate::router::{EventRouter, InboundEvent, SynthesizedMessage};
use crate::sink::PresentationSink;

const PUSH_BUFFER: usize = 256;
const POLL_BUFFER: usize = 16;

/// Collaborators a session is started with
#[derive(Clone)]
pub struct SessionContext {
    pub connection: ConnectionManager,
    pub auth: Arc<dyn AuthProvider>,
    pub api: Arc<dyn ConversationApi>,
    pub sink: Arc<dyn PresentationSink>,
    pub clock: Arc<dyn Clock>,
}

/// One active listener with its own dedup state.
///
/// Dropping the session stops it.
pub struct ListenerSession {
    id: Uuid,
    user_id: Option<String>,
    connection: ConnectionManager,
    subscriptions: Vec<SubscriptionId>,
    tasks: Vec<JoinHandle<()>>,
}

impl ListenerSession {
    pub async fn start(context: SessionContext, config: ListenerConfig) -> Self {
        let id = Uuid::new_v4();
        let SessionContext {
            connection,
            auth,
            api,
            sink,
            clock,
        } = context;

        let Some(user_id) = auth.current_user_id() else {
            app_log!(warn, session = %id, "No signed-in user, listener stays inert");
            return Self {
                id,
                user_id: None,
                connection,
                subscriptions: Vec::new(),
                tasks: Vec::new(),
            };
        };

        let (push_tx, push_rx) = mpsc::channel(PUSH_BUFFER);
        let (poll_tx, poll_rx) = mpsc::channel(POLL_BUFFER);
        let mut subscriptions = Vec::new();
        let mut tasks = Vec::new();

        // Subscribe before connecting so nothing delivered during the join is lost
        let named: HashSet<String> = config
            .push_events
            .iter()
            .map(|name| name.to_ascii_lowercase())
            .collect();
        for name in &config.push_events {
            let subscription = connection.on(name);
            subscriptions.push(subscription.id);
            tasks.push(spawn_forwarder(id, subscription, push_tx.clone(), HashSet::new()));
        }
        let wildcard = connection.on_any();
        subscriptions.push(wildcard.id);
        tasks.push(spawn_forwarder(id, wildcard, push_tx, named));

        // Polling runs from activation, independent of the hub handshake
        let activated_at_ms = clock.now_ms();
        let router = EventRouter::new(
            user_id.clone(),
            sink,
            Arc::clone(&clock),
            config.quiet_period_ms,
        );
        tasks.push(tokio::spawn(consume(id, router, push_rx, poll_rx)));

        let poller = ReconciliationPoller::new(api, auth, activated_at_ms, config.poll_interval);
        tasks.push(poller.spawn(poll_tx));

        match connection.connect().await {
            Ok(()) => match connection.join_group(&user_id).await {
                Ok(true) => {}
                Ok(false) => app_log!(warn, session = %id, "Group join skipped, connection not ready"),
                Err(e) => app_log!(warn, session = %id, "Group join failed: {}", e),
            },
            Err(e) => app_log!(
                warn,
                session = %id,
                "Hub unavailable, relying on polling: {}",
                e
            ),
        }

        app_log!(info, session = %id, user = %user_id, "Listener session started");
        Self {
            id,
            user_id: Some(user_id),
            connection,
            subscriptions,
            tasks,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn is_active(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Unregister handlers and stop polling; the hub connection stays up
    pub fn stop(&mut self) {
        if !self.is_active() && self.subscriptions.is_empty() {
            return;
        }
        for subscription in self.subscriptions.drain(..) {
            self.connection.off(subscription);
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        app_log!(info, session = %self.id, "Listener session stopped");
    }
}

impl Drop for ListenerSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Turn hub deliveries into router input; `skip` lists names a named
/// subscription already covers.
fn spawn_forwarder(
    session: Uuid,
    mut subscription: Subscription,
    push_tx: mpsc::Sender<InboundEvent>,
    skip: HashSet<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscription.events.recv().await {
            if skip.contains(&event.name.to_ascii_lowercase()) {
                continue;
            }
            match InboundEvent::from_hub(&event.name, &event.arguments, event.route) {
                Ok(inbound) => {
                    if push_tx.send(inbound).await.is_err() {
                        return;
                    }
                }
                Err(e) => app_log!(warn, session = %session, "Dropping hub event: {}", e),
            }
        }
    })
}

async fn consume(
    session: Uuid,
    mut router: EventRouter,
    mut push_rx: mpsc::Receiver<InboundEvent>,
    mut poll_rx: mpsc::Receiver<SynthesizedMessage>,
) {
    loop {
        let decision = tokio::select! {
            Some(event) = push_rx.recv() => router.route_push(&event),
            Some(message) = poll_rx.recv() => router.route_synthesized(&message),
            else => break,
        };
        app_log!(trace, session = %session, "Routed: {:?}", decision);
    }
    app_log!(debug, session = %session, "Router input closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionCredentials;
    use crate::clock::ManualClock;
    use crate::hub::connection::tests::{fast_config, FakeTransport};
    use crate::hub::connection::{HubConfig, RetryPolicy};
    use crate::hub::TransportEvent;
    use crate::poller::tests::FakeApi;
    use crate::sink::{ChannelSink, SinkEvent};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    const START_MS: i64 = 1_700_000_000_000;

    struct Fixture {
        transport: Arc<FakeTransport>,
        api: Arc<FakeApi>,
        context: SessionContext,
        rx: UnboundedReceiver<SinkEvent>,
    }

    fn fixture(fail_first: u32, user: Option<&str>) -> Fixture {
        fixture_with(fail_first, user, fast_config())
    }

    fn fixture_with(fail_first: u32, user: Option<&str>, hub: HubConfig) -> Fixture {
        let transport = Arc::new(FakeTransport::new(fail_first));
        let auth: Arc<dyn AuthProvider> = Arc::new(SessionCredentials::new(
            Some("token".into()),
            user.map(str::to_string),
        ));
        let api = Arc::new(FakeApi::default());
        *api.conversations.lock().unwrap() = Some(Vec::new());
        let (sink, rx) = ChannelSink::new();
        let context = SessionContext {
            connection: ConnectionManager::new(hub, transport.clone(), auth.clone()),
            auth,
            api: api.clone(),
            sink: Arc::new(sink),
            clock: Arc::new(ManualClock::new(START_MS)),
        };
        Fixture {
            transport,
            api,
            context,
            rx,
        }
    }

    fn listener_config() -> ListenerConfig {
        ListenerConfig {
            poll_interval: Duration::from_millis(10),
            ..ListenerConfig::default()
        }
    }

    async fn next(rx: &mut UnboundedReceiver<SinkEvent>) -> Option<SinkEvent> {
        tokio::time::timeout(Duration::from_millis(300), rx.recv())
            .await
            .ok()
            .flatten()
    }

    fn message(target: &str, payload: serde_json::Value) -> TransportEvent {
        TransportEvent::Invocation {
            target: target.into(),
            arguments: vec![payload],
        }
    }

    #[tokio::test]
    async fn test_inert_without_user() {
        let f = fixture(0, None);
        let session = ListenerSession::start(f.context, listener_config()).await;
        assert!(!session.is_active());
        assert_eq!(f.transport.opens(), 0);
    }

    #[tokio::test]
    async fn test_push_event_reaches_sink_once() {
        let mut f = fixture(0, Some("3"));
        let session = ListenerSession::start(f.context.clone(), listener_config()).await;
        assert!(session.is_active());
        assert_eq!(
            f.transport.invocations(),
            vec![("JoinGroup".to_string(), vec![json!("3")])]
        );

        f.transport
            .emit(message(
                "ReceiveMessage",
                json!({"messageId": "m1", "senderId": "7", "receiverId": "3", "messageText": "hi"}),
            ))
            .await;

        assert_eq!(next(&mut f.rx).await, Some(SinkEvent::Activity("7".into())));
        let Some(SinkEvent::Notification(n)) = next(&mut f.rx).await else {
            panic!("expected notification");
        };
        assert_eq!(n.body, "hi");
        assert!(next(&mut f.rx).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_event_name_uses_fallback() {
        let mut f = fixture(0, Some("3"));
        let _session = ListenerSession::start(f.context.clone(), listener_config()).await;

        f.transport
            .emit(message("MessageCreated", json!({"id": "x1", "fromUserId": 7})))
            .await;

        assert_eq!(next(&mut f.rx).await, Some(SinkEvent::Activity("7".into())));
        assert!(matches!(next(&mut f.rx).await, Some(SinkEvent::Notification(_))));
    }

    #[tokio::test]
    async fn test_malformed_event_does_not_stop_routing() {
        let mut f = fixture(0, Some("3"));
        let _session = ListenerSession::start(f.context.clone(), listener_config()).await;

        f.transport
            .emit(TransportEvent::Invocation {
                target: "ReceiveMessage".into(),
                arguments: vec![json!(42)],
            })
            .await;
        f.transport
            .emit(message("NewMessage", json!({"messageId": "m2", "senderId": "7"})))
            .await;

        assert_eq!(next(&mut f.rx).await, Some(SinkEvent::Activity("7".into())));
        assert!(matches!(next(&mut f.rx).await, Some(SinkEvent::Notification(_))));
    }

    #[tokio::test]
    async fn test_poller_covers_for_unavailable_hub() {
        let mut f = fixture(10, Some("3"));
        f.api.set_latest("7", START_MS + 5_000, "7");
        let session = ListenerSession::start(f.context.clone(), listener_config()).await;
        assert!(session.is_active());
        assert!(!f.context.connection.is_connected().await);

        assert_eq!(next(&mut f.rx).await, Some(SinkEvent::Activity("7".into())));
        let Some(SinkEvent::Notification(n)) = next(&mut f.rx).await else {
            panic!("expected notification");
        };
        assert_eq!(n.navigate_to.counterpart_id.as_deref(), Some("7"));
        assert!(next(&mut f.rx).await.is_none());
    }

    #[tokio::test]
    async fn test_poller_runs_while_hub_retries() {
        let slow = HubConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
            },
            ..fast_config()
        };
        let mut f = fixture_with(10, Some("3"), slow);
        f.api.set_latest("7", START_MS + 5_000, "7");

        let context = f.context.clone();
        let starting =
            tokio::spawn(async move { ListenerSession::start(context, listener_config()).await });

        assert_eq!(next(&mut f.rx).await, Some(SinkEvent::Activity("7".into())));
        assert!(matches!(next(&mut f.rx).await, Some(SinkEvent::Notification(_))));
        assert!(!starting.is_finished());

        let session = starting.await.unwrap();
        assert!(session.is_active());
        assert_eq!(f.transport.opens(), 3);
    }

    #[tokio::test]
    async fn test_stop_unregisters_handlers() {
        let mut f = fixture(0, Some("3"));
        let mut session = ListenerSession::start(f.context.clone(), listener_config()).await;
        session.stop();
        assert!(!session.is_active());
        session.stop();

        f.transport
            .emit(message("ReceiveMessage", json!({"messageId": "m3", "senderId": "7"})))
            .await;
        assert!(next(&mut f.rx).await.is_none());
        assert!(f.context.connection.is_connected().await);
    }
}
