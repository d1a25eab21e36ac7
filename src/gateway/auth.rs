//! Handshake authentication for the WebSocket ingress.
//!
//! A bearer token arrives in the `Authorization` header or the `?token=`
//! query parameter and resolves to a user identity from the configured
//! token table. With anonymous access enabled, a missing or unknown token
//! yields a fresh `anon-<short-id>` identity instead of a rejection.

use std::collections::HashMap;

use axum::http::HeaderMap;
use uuid::Uuid;

use crate::error::{Error, Result};

pub struct Authenticator {
    tokens: HashMap<String, String>,
    allow_anonymous: bool,
}

impl Authenticator {
    pub fn new(tokens: HashMap<String, String>, allow_anonymous: bool) -> Self {
        Self {
            tokens,
            allow_anonymous,
        }
    }

    /// Resolve a presented token to a user identity.
    pub fn resolve(&self, token: Option<&str>) -> Result<String> {
        if let Some(token) = token
            && let Some(user) = self.tokens.get(token)
        {
            return Ok(user.clone());
        }
        if self.allow_anonymous {
            let short = Uuid::new_v4().simple().to_string();
            return Ok(format!("anon-{}", &short[..8]));
        }
        Err(Error::Config("unauthorized: unknown or missing token".into()))
    }
}

/// Pull the bearer token out of the handshake request.
pub fn extract_token(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| query.get("token").cloned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authenticator(allow_anonymous: bool) -> Authenticator {
        let mut tokens = HashMap::new();
        tokens.insert("secret-1".to_string(), "alice".to_string());
        Authenticator::new(tokens, allow_anonymous)
    }

    #[test]
    fn known_token_resolves_user() {
        let auth = authenticator(false);
        assert_eq!(auth.resolve(Some("secret-1")).unwrap(), "alice");
    }

    #[test]
    fn unknown_token_rejected_without_anonymous() {
        let auth = authenticator(false);
        assert!(auth.resolve(Some("nope")).is_err());
        assert!(auth.resolve(None).is_err());
    }

    #[test]
    fn anonymous_gets_short_identity() {
        let auth = authenticator(true);
        let user = auth.resolve(None).unwrap();
        assert!(user.starts_with("anon-"));
        assert_eq!(user.len(), "anon-".len() + 8);
    }

    #[test]
    fn header_beats_query() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer from-header".parse().unwrap());
        let mut query = HashMap::new();
        query.insert("token".to_string(), "from-query".to_string());
        assert_eq!(extract_token(&headers, &query).as_deref(), Some("from-header"));
    }

    #[test]
    fn query_token_fallback() {
        let headers = HeaderMap::new();
        let mut query = HashMap::new();
        query.insert("token".to_string(), "from-query".to_string());
        assert_eq!(extract_token(&headers, &query).as_deref(), Some("from-query"));
    }
}
