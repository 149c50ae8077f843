//! External identity provider client.
//!
//! End-user credentials are owned by a hosted identity service (a
//! GoTrue-style HTTP API); the local `users` table only mirrors a subset of
//! its data. The provider is behind a trait so tests can substitute a
//! double, and every call is bounded by a client timeout so a hung provider
//! never stalls a request indefinitely.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::config::IdentityConfig;

/// The subset of provider account data the local mirror cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub id: String,
    pub email: String,
    pub email_verified: bool,
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    /// The provider refused the operation (bad credentials, duplicate
    /// sign-up, expired verification link). The message is safe for clients.
    #[error("{0}")]
    Rejected(String),
    /// Transport failure or timeout; the caller should surface a generic
    /// "try again" message.
    #[error("Identity provider is unreachable")]
    Unavailable(#[source] reqwest::Error),
    /// The provider returned something we could not interpret.
    #[error("Unexpected response from identity provider")]
    Malformed,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Register a new account. The returned identity reports whether the
    /// email is already confirmed.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: &str,
        phone: Option<&str>,
    ) -> Result<ExternalIdentity, IdentityError>;

    /// Authenticate with email and password.
    async fn sign_in(&self, email: &str, password: &str) -> Result<ExternalIdentity, IdentityError>;

    /// Confirm an email address from a verification link token.
    async fn verify_email(
        &self,
        token_hash: &str,
        kind: &str,
    ) -> Result<ExternalIdentity, IdentityError>;

    /// Re-send the signup verification email.
    async fn resend_verification(&self, email: &str) -> Result<(), IdentityError>;

    /// Trigger the provider's password recovery email.
    async fn request_password_reset(&self, email: &str) -> Result<(), IdentityError>;

    /// Redeem a recovery-link token and set a new password.
    async fn reset_password(
        &self,
        token_hash: &str,
        new_password: &str,
    ) -> Result<ExternalIdentity, IdentityError>;

    /// Change the account password after re-verifying the current one.
    async fn update_password(
        &self,
        email: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), IdentityError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct ProviderMetadata {
    full_name: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderUser {
    id: String,
    email: String,
    email_confirmed_at: Option<String>,
    #[serde(default)]
    user_metadata: ProviderMetadata,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: ProviderUser,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    #[serde(alias = "error_description", alias = "message")]
    msg: Option<String>,
}

impl From<ProviderUser> for ExternalIdentity {
    fn from(user: ProviderUser) -> Self {
        Self {
            id: user.id,
            email: user.email,
            email_verified: user.email_confirmed_at.is_some(),
            name: user.user_metadata.full_name,
            phone: user.user_metadata.phone,
        }
    }
}

pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpIdentityProvider {
    pub fn new(config: &IdentityConfig) -> anyhow::Result<Option<Self>> {
        let (endpoint, api_key) = match (&config.endpoint, &config.api_key) {
            (Some(endpoint), Some(api_key)) => (endpoint, api_key),
            _ => return Ok(None),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Some(Self {
            client,
            base_url: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.clone(),
        }))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.base_url, path)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .header("apikey", &self.api_key)
    }

    /// Extract the provider's error message, falling back to a generic one.
    async fn rejection(response: reqwest::Response) -> IdentityError {
        let message = response
            .json::<ProviderErrorBody>()
            .await
            .ok()
            .and_then(|body| body.msg)
            .unwrap_or_else(|| "Request was rejected by the identity provider".to_string());
        IdentityError::Rejected(message)
    }

    async fn token_grant(&self, email: &str, password: &str) -> Result<TokenResponse, IdentityError> {
        let response = self
            .post("/token?grant_type=password")
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(IdentityError::Unavailable)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        response.json().await.map_err(|_| IdentityError::Malformed)
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        name: &str,
        phone: Option<&str>,
    ) -> Result<ExternalIdentity, IdentityError> {
        let response = self
            .post("/signup")
            .json(&json!({
                "email": email,
                "password": password,
                "data": { "full_name": name, "phone": phone },
            }))
            .send()
            .await
            .map_err(IdentityError::Unavailable)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let user: ProviderUser = response.json().await.map_err(|_| IdentityError::Malformed)?;
        Ok(user.into())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<ExternalIdentity, IdentityError> {
        let token = self.token_grant(email, password).await?;
        Ok(token.user.into())
    }

    async fn verify_email(
        &self,
        token_hash: &str,
        kind: &str,
    ) -> Result<ExternalIdentity, IdentityError> {
        let response = self
            .post("/verify")
            .json(&json!({ "token_hash": token_hash, "type": kind }))
            .send()
            .await
            .map_err(IdentityError::Unavailable)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let token: TokenResponse = response.json().await.map_err(|_| IdentityError::Malformed)?;
        Ok(token.user.into())
    }

    async fn resend_verification(&self, email: &str) -> Result<(), IdentityError> {
        let response = self
            .post("/resend")
            .json(&json!({ "type": "signup", "email": email }))
            .send()
            .await
            .map_err(IdentityError::Unavailable)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(())
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), IdentityError> {
        let response = self
            .post("/recover")
            .json(&json!({ "email": email }))
            .send()
            .await
            .map_err(IdentityError::Unavailable)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(())
    }

    async fn reset_password(
        &self,
        token_hash: &str,
        new_password: &str,
    ) -> Result<ExternalIdentity, IdentityError> {
        // Redeeming the recovery token yields an access token scoped to the
        // account; the password change rides on that token.
        let response = self
            .post("/verify")
            .json(&json!({ "token_hash": token_hash, "type": "recovery" }))
            .send()
            .await
            .map_err(IdentityError::Unavailable)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        let token: TokenResponse = response.json().await.map_err(|_| IdentityError::Malformed)?;

        let response = self
            .client
            .put(self.url("/user"))
            .header("apikey", &self.api_key)
            .bearer_auth(&token.access_token)
            .json(&json!({ "password": new_password }))
            .send()
            .await
            .map_err(IdentityError::Unavailable)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(token.user.into())
    }

    async fn update_password(
        &self,
        email: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), IdentityError> {
        // Re-authenticate first; the password change is scoped to the
        // resulting access token, never to the service key.
        let token = self.token_grant(email, current_password).await?;

        let response = self
            .client
            .put(self.url("/user"))
            .header("apikey", &self.api_key)
            .bearer_auth(&token.access_token)
            .json(&json!({ "password": new_password }))
            .send()
            .await
            .map_err(IdentityError::Unavailable)?;

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(())
    }
}
