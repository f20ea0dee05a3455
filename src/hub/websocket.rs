// src/hub/websocket.rs
//! WebSocket hub transport with automatic reconnection.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::protocol::{self, HubMessage, NegotiateResponse};
use super::transport::{HubCommand, HubLink, HubTransport, TransportEvent};
use crate::app_log;
use crate::error::{RealtimeError, RealtimeResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;
type PendingReply = (String, oneshot::Sender<RealtimeResult<Value>>);

const MAX_NEGOTIATE_REDIRECTS: usize = 5;

/// Transport timing
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Delay before each automatic reconnect attempt; the link closes once exhausted
    pub reconnect_delays: Vec<Duration>,
    pub keep_alive_interval: Duration,
    /// Drop the socket when nothing arrives for this long
    pub server_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            reconnect_delays: vec![
                Duration::from_secs(0),
                Duration::from_secs(2),
                Duration::from_secs(10),
                Duration::from_secs(30),
            ],
            keep_alive_interval: Duration::from_secs(15),
            server_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(15),
        }
    }
}

pub struct WebSocketTransport {
    http: reqwest::Client,
    config: WebSocketConfig,
}

impl WebSocketTransport {
    pub fn new(request_timeout: Duration, config: WebSocketConfig) -> RealtimeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RealtimeError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }
}

#[async_trait]
impl HubTransport for WebSocketTransport {
    async fn open(&self, url: &str, access_token: &str) -> RealtimeResult<HubLink> {
        let Established {
            ws,
            connection_id,
            backlog,
        } = establish(&self.http, url, access_token, self.config.handshake_timeout).await?;

        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(256);

        let driver = LinkDriver {
            http: self.http.clone(),
            url: url.to_string(),
            access_token: access_token.to_string(),
            config: self.config.clone(),
            commands: command_rx,
            events: event_tx,
            pending: HashMap::new(),
            next_invocation_id: 0,
        };
        tokio::spawn(driver.run(ws, backlog));

        Ok(HubLink {
            connection_id,
            commands: command_tx,
            events: event_rx,
        })
    }
}

/// Negotiate, then resolve the socket URL and connection id
async fn negotiate(
    http: &reqwest::Client,
    url: &str,
    access_token: &str,
) -> RealtimeResult<(reqwest::Url, Option<String>)> {
    let mut endpoint = url.to_string();
    let mut token = access_token.to_string();

    for _ in 0..MAX_NEGOTIATE_REDIRECTS {
        let base = reqwest::Url::parse(&endpoint)
            .map_err(|e| RealtimeError::Transport(format!("Invalid hub URL {}: {}", endpoint, e)))?;

        let mut negotiate_url = base.clone();
        negotiate_url.set_path(&format!("{}/negotiate", base.path().trim_end_matches('/')));
        negotiate_url
            .query_pairs_mut()
            .append_pair("negotiateVersion", "1");

        app_log!(debug, "Negotiating hub connection: {}", negotiate_url);

        let response = http.post(negotiate_url).bearer_auth(&token).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RealtimeError::Authentication(format!(
                "hub rejected credentials ({})",
                status
            )));
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RealtimeError::Transport(format!(
                "negotiate returned {}: {}",
                status, error_text
            )));
        }

        let mut body: NegotiateResponse = response.json().await?;
        if let Some(error) = body.error.take() {
            return Err(RealtimeError::Transport(format!("negotiate failed: {}", error)));
        }
        if let Some(redirect) = body.url.take() {
            endpoint = redirect;
            if let Some(redirect_token) = body.access_token.take() {
                token = redirect_token;
            }
            continue;
        }

        let mut socket_url = base;
        let scheme = if socket_url.scheme() == "https" { "wss" } else { "ws" };
        socket_url
            .set_scheme(scheme)
            .map_err(|_| RealtimeError::Transport(format!("Cannot use {} for WebSocket", endpoint)))?;
        {
            let mut query = socket_url.query_pairs_mut();
            if let Some(id) = body.socket_id() {
                query.append_pair("id", id);
            }
            query.append_pair("access_token", &token);
        }

        return Ok((socket_url, body.connection_id));
    }

    Err(RealtimeError::Transport("Too many negotiate redirects".to_string()))
}

/// An open socket past the handshake
struct Established {
    ws: WsStream,
    connection_id: Option<String>,
    /// Records that shared a frame with the handshake reply
    backlog: String,
}

/// Negotiate, open the socket and complete the protocol handshake
async fn establish(
    http: &reqwest::Client,
    url: &str,
    access_token: &str,
    handshake_timeout: Duration,
) -> RealtimeResult<Established> {
    let (socket_url, connection_id) = negotiate(http, url, access_token).await?;

    let (mut ws, _) = connect_async(socket_url.as_str()).await?;
    ws.send(Message::Text(protocol::handshake_request().into()))
        .await?;

    let reply = tokio::time::timeout(handshake_timeout, next_text(&mut ws))
        .await
        .map_err(|_| RealtimeError::Transport("Handshake timed out".to_string()))??;
    let backlog = protocol::parse_handshake_response(&reply)?.to_string();

    app_log!(info, connection_id = ?connection_id, "Hub handshake complete");
    Ok(Established {
        ws,
        connection_id,
        backlog,
    })
}

async fn next_text(ws: &mut WsStream) -> RealtimeResult<String> {
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => return Ok(text.to_string()),
            Message::Close(_) => {
                return Err(RealtimeError::Transport(
                    "Socket closed during handshake".to_string(),
                ))
            }
            _ => {}
        }
    }
    Err(RealtimeError::Transport("Socket ended during handshake".to_string()))
}

enum SessionEnd {
    /// Manager asked to close, or stopped listening
    Shutdown,
    /// Server closed and does not want a reconnect
    ServerClosed(Option<String>),
    Lost(Option<String>),
}

enum Reconnect {
    Recovered(Established),
    GaveUp,
    Shutdown,
}

/// Owns the socket of one link across reconnects
struct LinkDriver {
    http: reqwest::Client,
    url: String,
    access_token: String,
    config: WebSocketConfig,
    commands: mpsc::Receiver<HubCommand>,
    events: mpsc::Sender<TransportEvent>,
    pending: HashMap<String, PendingReply>,
    next_invocation_id: u64,
}

impl LinkDriver {
    async fn run(mut self, mut ws: WsStream, mut backlog: String) {
        loop {
            let reason = match self.drive(ws, std::mem::take(&mut backlog)).await {
                SessionEnd::Shutdown => {
                    self.fail_pending(|| RealtimeError::NotConnected);
                    app_log!(debug, "Hub link shut down");
                    return;
                }
                SessionEnd::ServerClosed(reason) => {
                    self.fail_pending(|| RealtimeError::NotConnected);
                    app_log!(warn, "Hub closed the connection: {:?}", reason);
                    let _ = self.events.send(TransportEvent::Closed(reason)).await;
                    return;
                }
                SessionEnd::Lost(reason) => reason,
            };

            app_log!(warn, "Hub connection lost: {:?}", reason);
            self.fail_pending(|| RealtimeError::NotConnected);
            if self
                .events
                .send(TransportEvent::Reconnecting(reason.clone()))
                .await
                .is_err()
            {
                return;
            }

            match self.reconnect().await {
                Reconnect::Recovered(established) => {
                    let connection_id = established.connection_id;
                    app_log!(info, connection_id = ?connection_id, "Hub connection recovered");
                    let _ = self
                        .events
                        .send(TransportEvent::Reconnected { connection_id })
                        .await;
                    ws = established.ws;
                    backlog = established.backlog;
                }
                Reconnect::GaveUp => {
                    let _ = self.events.send(TransportEvent::Closed(reason)).await;
                    return;
                }
                Reconnect::Shutdown => return,
            }
        }
    }

    async fn drive(&mut self, ws: WsStream, backlog: String) -> SessionEnd {
        let (mut write, mut read): (WsWrite, WsRead) = ws.split();
        let mut keep_alive = interval(self.config.keep_alive_interval);
        keep_alive.tick().await;
        let mut last_seen = Instant::now();

        if let Some(end) = self.handle_text(&backlog).await {
            return end;
        }

        loop {
            tokio::select! {
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        if let Some(end) = self.handle_text(&text).await {
                            return end;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return SessionEnd::Lost(frame.map(|f| f.reason.to_string()));
                    }
                    Some(Ok(_)) => last_seen = Instant::now(),
                    Some(Err(e)) => return SessionEnd::Lost(Some(e.to_string())),
                    None => return SessionEnd::Lost(None),
                },
                command = self.commands.recv() => match command {
                    Some(HubCommand::Invoke { method, arguments, reply }) => {
                        self.next_invocation_id += 1;
                        let id = self.next_invocation_id.to_string();
                        let text = protocol::invocation(&id, &method, &arguments);
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            let _ = reply.send(Err(RealtimeError::Transport(e.to_string())));
                            return SessionEnd::Lost(Some(e.to_string()));
                        }
                        self.pending.insert(id, (method, reply));
                    }
                    Some(HubCommand::Close) | None => {
                        let _ = write.send(Message::Text(protocol::close().into())).await;
                        let _ = write.close().await;
                        return SessionEnd::Shutdown;
                    }
                },
                _ = keep_alive.tick() => {
                    if last_seen.elapsed() > self.config.server_timeout {
                        return SessionEnd::Lost(Some("server timeout".to_string()));
                    }
                    if let Err(e) = write.send(Message::Text(protocol::ping().into())).await {
                        return SessionEnd::Lost(Some(e.to_string()));
                    }
                }
            }
        }
    }

    /// Handle every record of one text frame
    async fn handle_text(&mut self, text: &str) -> Option<SessionEnd> {
        for parsed in protocol::parse_frames(text) {
            match parsed {
                Ok(msg) => {
                    if let Some(end) = self.handle(msg).await {
                        return Some(end);
                    }
                }
                Err(e) => app_log!(warn, "Dropping unreadable hub record: {}", e),
            }
        }
        None
    }

    async fn handle(&mut self, msg: HubMessage) -> Option<SessionEnd> {
        match msg {
            HubMessage::Invocation {
                target, arguments, ..
            } => {
                let event = TransportEvent::Invocation { target, arguments };
                if self.events.send(event).await.is_err() {
                    return Some(SessionEnd::Shutdown);
                }
            }
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => {
                if let Some((method, reply)) = self.pending.remove(&invocation_id) {
                    let outcome = match error {
                        Some(reason) => Err(RealtimeError::Invocation { method, reason }),
                        None => Ok(result.unwrap_or(Value::Null)),
                    };
                    let _ = reply.send(outcome);
                }
            }
            HubMessage::Close {
                error,
                allow_reconnect,
            } => {
                return Some(if allow_reconnect {
                    SessionEnd::Lost(error)
                } else {
                    SessionEnd::ServerClosed(error)
                });
            }
            HubMessage::Ping | HubMessage::Other(_) => {}
        }
        None
    }

    async fn reconnect(&mut self) -> Reconnect {
        let delays = self.config.reconnect_delays.clone();
        for (attempt, delay) in delays.into_iter().enumerate() {
            if !self.wait(delay).await {
                return Reconnect::Shutdown;
            }

            app_log!(info, attempt = attempt + 1, "Reconnecting to hub");
            match establish(
                &self.http,
                &self.url,
                &self.access_token,
                self.config.handshake_timeout,
            )
            .await
            {
                Ok(established) => return Reconnect::Recovered(established),
                Err(e) => app_log!(warn, attempt = attempt + 1, "Reconnect attempt failed: {}", e),
            }
        }
        Reconnect::GaveUp
    }

    /// Sleep while refusing invocations; false when asked to shut down
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(HubCommand::Invoke { reply, .. }) => {
                        let _ = reply.send(Err(RealtimeError::NotConnected));
                    }
                    Some(HubCommand::Close) | None => return false,
                },
            }
        }
    }

    fn fail_pending(&mut self, err: impl Fn() -> RealtimeError) {
        for (_, (_, reply)) in self.pending.drain() {
            let _ = reply.send(Err(err()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reconnect_schedule() {
        let config = WebSocketConfig::default();
        let secs: Vec<u64> = config.reconnect_delays.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![0, 2, 10, 30]);
        assert!(config.server_timeout > config.keep_alive_interval);
    }

    #[tokio::test]
    async fn test_open_fails_for_invalid_url() {
        let transport =
            WebSocketTransport::new(Duration::from_secs(1), WebSocketConfig::default()).unwrap();
        let err = transport.open("not a url", "token").await.unwrap_err();
        assert!(matches!(err, RealtimeError::Transport(_)));
    }

    fn driver() -> (LinkDriver, mpsc::Receiver<TransportEvent>) {
        let (_command_tx, command_rx) = mpsc::channel(1);
        let (event_tx, event_rx) = mpsc::channel(8);
        let driver = LinkDriver {
            http: reqwest::Client::new(),
            url: "http://hub.test/chathub".to_string(),
            access_token: "token".to_string(),
            config: WebSocketConfig::default(),
            commands: command_rx,
            events: event_tx,
            pending: HashMap::new(),
            next_invocation_id: 0,
        };
        (driver, event_rx)
    }

    #[tokio::test]
    async fn test_records_after_handshake_reply_are_delivered() {
        let sep = protocol::RECORD_SEPARATOR;
        let frame = format!(
            "{{}}{sep}{}{sep}{}{sep}",
            r#"{"type":1,"target":"ReceiveMessage","arguments":[{"senderId":"7"}]}"#,
            r#"{"type":6}"#,
        );
        let backlog = protocol::parse_handshake_response(&frame).unwrap().to_string();

        let (mut driver, mut events) = driver();
        assert!(driver.handle_text(&backlog).await.is_none());
        assert_eq!(
            events.recv().await.unwrap(),
            TransportEvent::Invocation {
                target: "ReceiveMessage".into(),
                arguments: vec![serde_json::json!({"senderId": "7"})],
            }
        );

        let end = driver.handle_text(&protocol::close()).await;
        assert!(matches!(end, Some(SessionEnd::ServerClosed(None))));
    }
}
