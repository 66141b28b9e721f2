//! Caller identity.
//!
//! Every request carries a bearer token. The token is verified against the
//! workspace's current-user endpoint before any compilation or execution,
//! and statements then run with that same token.

use crate::error::{GatewayError, Result};
use crate::execution::classifier::ErrorClassifier;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// A verified caller. The token is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_name: String,
    token: String,
}

impl Principal {
    pub fn new(user_name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("user_name", &self.user_name)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Principal>;
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str> {
    let header = header.ok_or_else(|| GatewayError::Unauthenticated("missing Authorization header".to_string()))?;
    let (scheme, token) = header
        .trim()
        .split_once(' ')
        .ok_or_else(|| GatewayError::Unauthenticated("malformed Authorization header".to_string()))?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(GatewayError::Unauthenticated(
            "Authorization header must use the Bearer scheme".to_string(),
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(GatewayError::Unauthenticated("empty bearer token".to_string()));
    }
    Ok(token)
}

#[derive(Debug, Deserialize)]
struct CurrentUser {
    #[serde(rename = "userName")]
    user_name: Option<String>,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    id: Option<String>,
}

/// Verifies tokens with `GET {host}/api/2.0/preview/scim/v2/Me`.
pub struct DatabricksIdentityVerifier {
    host: String,
    client: Client,
}

impl DatabricksIdentityVerifier {
    pub fn new(host: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl IdentityVerifier for DatabricksIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<Principal> {
        let url = format!("{}/api/2.0/preview/scim/v2/Me", self.host);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| GatewayError::from(ErrorClassifier::classify_transport(&e)))?;

        let status = response.status();
        match status.as_u16() {
            401 => return Err(GatewayError::Unauthenticated("invalid token".to_string())),
            403 => return Err(GatewayError::PermissionDenied("permission denied".to_string())),
            _ if !status.is_success() => {
                let text = response.text().await.unwrap_or_default();
                return Err(ErrorClassifier::classify_status(status.as_u16(), None, &text).into());
            }
            _ => {}
        }

        let user: CurrentUser = response
            .json()
            .await
            .map_err(|e| GatewayError::RemoteTransient(format!("malformed identity response: {}", e)))?;
        let user_name = user
            .user_name
            .or(user.display_name)
            .or(user.id)
            .ok_or_else(|| GatewayError::RemoteTransient("identity response carried no user name".to_string()))?;

        debug!(user = %user_name, "verified caller identity");
        Ok(Principal::new(user_name, token))
    }
}
