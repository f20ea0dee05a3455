// src/core/service_client.rs
//! HTTP client for the conversation endpoints, bearer-authenticated

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

use crate::app_log;
use crate::auth::AuthProvider;
use crate::poller::ConversationApi;
use crate::types::{ChatMessage, ConversationSummary};

const CONVERSATIONS_ENDPOINT: &str = "/conversations";
const MESSAGES_ENDPOINT: &str = "/messages";

/// Lists arrive bare or wrapped, depending on the endpoint version
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListEnvelope<T> {
    Bare(Vec<T>),
    Wrapped {
        #[serde(alias = "items", alias = "messages", alias = "conversations")]
        data: Vec<T>,
    },
}

impl<T> ListEnvelope<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            ListEnvelope::Bare(items) | ListEnvelope::Wrapped { data: items } => items,
        }
    }
}

pub struct ServiceClient {
    client: reqwest::Client,
    base_url: String,
    auth: Arc<dyn AuthProvider>,
}

impl ServiceClient {
    /// Create new service client with configuration
    pub fn new(base_url: String, timeout_seconds: u64, auth: Arc<dyn AuthProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn conversations_path(user_id: &str) -> String {
        format!("{}/{}/latest", CONVERSATIONS_ENDPOINT, user_id)
    }

    fn latest_message_path(user_id: &str, counterpart_id: &str) -> String {
        format!(
            "{}/{}/{}?page=1&pageSize=1",
            MESSAGES_ENDPOINT, user_id, counterpart_id
        )
    }

    /// Generic authenticated GET request
    pub async fn get<R>(&self, endpoint: &str) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        let token = self
            .auth
            .stored_token()
            .context("No bearer token stored; sign in first")?;

        app_log!(trace, "GET {}", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("Failed to GET from {}", url))?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<R>()
                .await
                .context("Failed to parse JSON response")
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("HTTP {} error: {}", status, error_text)
        }
    }

    pub async fn fetch_latest_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        let envelope: ListEnvelope<ConversationSummary> = self
            .get(&Self::conversations_path(user_id))
            .await
            .context("Failed to load latest conversations")?;
        Ok(envelope.into_vec())
    }

    pub async fn fetch_latest_message(
        &self,
        user_id: &str,
        counterpart_id: &str,
    ) -> Result<Option<ChatMessage>> {
        let envelope: ListEnvelope<ChatMessage> = self
            .get(&Self::latest_message_path(user_id, counterpart_id))
            .await
            .with_context(|| format!("Failed to load latest message with {}", counterpart_id))?;
        Ok(envelope.into_vec().into_iter().next())
    }
}

#[async_trait]
impl ConversationApi for ServiceClient {
    async fn latest_conversations(&self, user_id: &str) -> Result<Vec<ConversationSummary>> {
        self.fetch_latest_conversations(user_id).await
    }

    async fn latest_message(&self, user_id: &str, counterpart_id: &str) -> Result<Option<ChatMessage>> {
        self.fetch_latest_message(user_id, counterpart_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionCredentials;

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(ServiceClient::conversations_path("3"), "/conversations/3/latest");
        assert_eq!(
            ServiceClient::latest_message_path("3", "7"),
            "/messages/3/7?page=1&pageSize=1"
        );
    }

    #[test]
    fn test_list_envelopes() {
        let bare: ListEnvelope<ChatMessage> =
            serde_json::from_str(r#"[{"messageId": 1, "senderId": "7"}]"#).unwrap();
        assert_eq!(bare.into_vec()[0].message_id.as_deref(), Some("1"));

        let wrapped: ListEnvelope<ChatMessage> =
            serde_json::from_str(r#"{"items": [{"id": "m2", "fromUserId": 7}], "total": 40}"#)
                .unwrap();
        let messages = wrapped.into_vec();
        assert_eq!(messages[0].message_id.as_deref(), Some("m2"));
        assert_eq!(messages[0].sender_id.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_get_requires_token() {
        let auth = Arc::new(SessionCredentials::new(None, Some("3".into())));
        let client = ServiceClient::new("http://127.0.0.1:9/api/".into(), 1, auth).unwrap();
        assert_eq!(client.base_url, "http://127.0.0.1:9/api");

        let err = client.fetch_latest_conversations("3").await.unwrap_err();
        assert!(format!("{:#}", err).contains("No bearer token"));
    }
}
