// src/cli.rs
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;

use crate::app_log;
use crate::auth::{AuthProvider, SessionCredentials};
use crate::clock::SystemClock;
use crate::core::{ConfigManager, ServiceClient};
use crate::hub::{ConnectionManager, WebSocketConfig, WebSocketTransport};
use crate::session::{ListenerSession, SessionContext};
use crate::sink::TracingSink;

#[derive(Parser)]
#[command(name = "jobhub")]
#[command(about = "Real-time message notifications for the job-search app")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Bearer token for the hub and REST API
    #[arg(long, env = "JOBHUB_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// Current user id; read from the token's claims when omitted
    #[arg(long, env = "JOBHUB_USER_ID", global = true)]
    pub user_id: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Connect and log incoming message notifications until Ctrl-C
    Listen {
        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
    },
    /// Print the latest conversations
    Conversations,
    /// Print the newest message exchanged with one counterpart
    Messages { counterpart_id: String },
}

pub async fn handle_command(cli: Cli, config: ConfigManager) -> Result<()> {
    let credentials = Arc::new(SessionCredentials::new(cli.token, cli.user_id));
    let auth: Arc<dyn AuthProvider> = credentials;
    let client = Arc::new(ServiceClient::new(
        config.service.api_base_url.clone(),
        config.service.timeout_seconds,
        Arc::clone(&auth),
    )?);

    match cli.command {
        Command::Listen { duration_secs } => {
            listen(config, auth, client, duration_secs.map(Duration::from_secs)).await
        }
        Command::Conversations => {
            let user_id = require_user(auth.as_ref())?;
            let conversations = client.fetch_latest_conversations(&user_id).await?;
            app_log!(info, "Fetched {} conversation(s)", conversations.len());
            println!("{}", serde_json::to_string_pretty(&conversations)?);
            Ok(())
        }
        Command::Messages { counterpart_id } => {
            let user_id = require_user(auth.as_ref())?;
            match client.fetch_latest_message(&user_id, &counterpart_id).await? {
                Some(message) => println!("{}", serde_json::to_string_pretty(&message)?),
                None => println!("No messages with {}", counterpart_id),
            }
            Ok(())
        }
    }
}

fn require_user(auth: &dyn AuthProvider) -> Result<String> {
    auth.current_user_id()
        .context("No user id: pass --user-id or a token carrying one")
}

async fn listen(
    config: ConfigManager,
    auth: Arc<dyn AuthProvider>,
    client: Arc<ServiceClient>,
    duration: Option<Duration>,
) -> Result<()> {
    require_user(auth.as_ref())?;

    let transport = WebSocketTransport::new(config.request_timeout(), WebSocketConfig::default())
        .context("Failed to create hub transport")?;
    let connection =
        ConnectionManager::new(config.hub_config(), Arc::new(transport), Arc::clone(&auth));

    let context = SessionContext {
        connection: connection.clone(),
        auth,
        api: client,
        sink: Arc::new(TracingSink),
        clock: Arc::new(SystemClock),
    };
    let mut session = ListenerSession::start(context, config.listener.clone()).await;
    println!(
        "Listening as user {} (session {}), Ctrl-C to stop",
        session.user_id().unwrap_or("?"),
        session.id()
    );

    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?,
    }

    session.stop();
    connection.disconnect().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_messages_command() {
        let cli = Cli::try_parse_from([
            "jobhub",
            "--token",
            "abc",
            "messages",
            "7",
            "--user-id",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.token.as_deref(), Some("abc"));
        assert_eq!(cli.user_id.as_deref(), Some("3"));
        assert!(matches!(cli.command, Command::Messages { counterpart_id } if counterpart_id == "7"));
    }

    #[test]
    fn test_parse_listen_duration() {
        let cli = Cli::try_parse_from(["jobhub", "listen", "--duration-secs", "30"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Listen {
                duration_secs: Some(30)
            }
        ));
    }

    #[test]
    fn test_require_user() {
        let creds = SessionCredentials::new(Some("not-a-jwt".into()), None);
        assert!(require_user(&creds).is_err());
        let creds = SessionCredentials::new(None, Some("3".into()));
        assert_eq!(require_user(&creds).unwrap(), "3");
    }
}
