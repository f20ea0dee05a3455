// src/auth.rs
//! Stored credentials and current-user resolution

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::RwLock;

use crate::app_log;

/// Source of the bearer token and the signed-in user's id.
///
/// Both calls must return immediately; implementations read cached state.
pub trait AuthProvider: Send + Sync {
    fn stored_token(&self) -> Option<String>;
    fn current_user_id(&self) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<serde_json::Value>,
    nameid: Option<serde_json::Value>,
    #[serde(rename = "userId")]
    user_id: Option<serde_json::Value>,
    #[serde(rename = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier")]
    name_identifier: Option<serde_json::Value>,
}

/// Read the user id out of a bearer token's claims.
///
/// The signature is not checked; the server does that on every request and
/// this is only used to label the local session.
pub fn user_id_from_token(token: &str) -> Option<String> {
    let header = jsonwebtoken::decode_header(token).ok()?;
    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = match decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation) {
        Ok(data) => data,
        Err(e) => {
            app_log!(debug, "Could not read claims from token: {}", e);
            return None;
        }
    };

    let claims = data.claims;
    [
        claims.name_identifier,
        claims.nameid,
        claims.user_id,
        claims.sub,
    ]
    .iter()
    .flatten()
    .find_map(crate::types::fields::id_string)
}

#[derive(Debug, Default, Clone)]
struct Credentials {
    token: Option<String>,
    user_id: Option<String>,
}

/// In-memory credential store updated on sign-in and sign-out
#[derive(Debug, Default)]
pub struct SessionCredentials {
    inner: RwLock<Credentials>,
}

impl SessionCredentials {
    pub fn new(token: Option<String>, user_id: Option<String>) -> Self {
        let creds = Self::default();
        creds.sign_in(token, user_id);
        creds
    }

    /// Store a token; without an explicit user id it is taken from the claims
    pub fn sign_in(&self, token: Option<String>, user_id: Option<String>) {
        let token = token.filter(|t| !t.trim().is_empty());
        let user_id = user_id
            .filter(|id| !id.trim().is_empty())
            .or_else(|| token.as_deref().and_then(user_id_from_token));

        if let Ok(mut guard) = self.inner.write() {
            *guard = Credentials { token, user_id };
        }
    }

    pub fn sign_out(&self) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = Credentials::default();
        }
    }
}

impl AuthProvider for SessionCredentials {
    fn stored_token(&self) -> Option<String> {
        self.inner.read().ok()?.token.clone()
    }

    fn current_user_id(&self) -> Option<String> {
        self.inner.read().ok()?.user_id.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn token_with(claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"server-secret"),
        )
        .unwrap()
    }

    #[test]
    fn test_user_id_from_sub() {
        let token = token_with(json!({"sub": "42", "exp": 1}));
        assert_eq!(user_id_from_token(&token), Some("42".to_string()));
    }

    #[test]
    fn test_user_id_prefers_name_identifier() {
        let token = token_with(json!({
            "sub": "someone@example.com",
            "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier": 17
        }));
        assert_eq!(user_id_from_token(&token), Some("17".to_string()));
    }

    #[test]
    fn test_garbage_token_has_no_user() {
        assert_eq!(user_id_from_token("not-a-jwt"), None);
    }

    #[test]
    fn test_session_credentials_lifecycle() {
        let creds = SessionCredentials::new(Some("opaque".into()), Some("3".into()));
        assert_eq!(creds.stored_token().as_deref(), Some("opaque"));
        assert_eq!(creds.current_user_id().as_deref(), Some("3"));

        creds.sign_out();
        assert!(creds.stored_token().is_none());
        assert!(creds.current_user_id().is_none());

        let token = token_with(json!({"nameid": "5"}));
        creds.sign_in(Some(token), None);
        assert_eq!(creds.current_user_id().as_deref(), Some("5"));
    }
}
