//! Auth client for the remote record API.

use serde::Deserialize;

use crate::gateway::{check_status, normalize_base_url, GatewayError, GatewayResult};
use crate::models::Session;

/// Client for `/auth/register` and `/auth/login`.
///
/// Returns sessions; persisting them is the caller's concern.
#[derive(Debug, Clone)]
pub struct AuthClient {
    base_url: String,
    client: reqwest::Client,
}

impl AuthClient {
    pub fn new(base_url: impl Into<String>) -> GatewayResult<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url.into())?,
            client: reqwest::Client::builder().build()?,
        })
    }

    /// Register a new account and return its session.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> GatewayResult<Session> {
        validate_credentials(username, password)?;

        let mut payload = serde_json::json!({
            "username": username,
            "password": password,
        });
        if let Some(email) = email {
            payload["email"] = serde_json::Value::String(email.to_string());
        }

        let response = self
            .client
            .post(format!("{}/auth/register", self.base_url))
            .json(&payload)
            .send()
            .await?;
        let response = check_status(response).await?;
        let payload = response.json::<AuthResponse>().await?;
        payload.try_into()
    }

    /// Log in with username/password and return the session.
    pub async fn login(&self, username: &str, password: &str) -> GatewayResult<Session> {
        validate_credentials(username, password)?;

        let payload = serde_json::json!({
            "username": username,
            "password": password,
        });
        let response = self
            .client
            .post(format!("{}/auth/login", self.base_url))
            .json(&payload)
            .send()
            .await?;
        let response = check_status(response).await?;
        let payload = response.json::<AuthResponse>().await?;
        payload.try_into()
    }
}

fn validate_credentials(username: &str, password: &str) -> GatewayResult<()> {
    if username.trim().is_empty() {
        return Err(GatewayError::InvalidConfiguration(
            "username must not be empty".to_string(),
        ));
    }
    if password.trim().is_empty() {
        return Err(GatewayError::InvalidConfiguration(
            "password must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    user_id: Option<i64>,
    username: Option<String>,
    token: Option<String>,
}

impl TryFrom<AuthResponse> for Session {
    type Error = GatewayError;

    fn try_from(value: AuthResponse) -> GatewayResult<Self> {
        let user_id = value.user_id.ok_or_else(|| {
            GatewayError::InvalidPayload("auth response did not include userId".to_string())
        })?;
        let token = value
            .token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                GatewayError::InvalidPayload("auth response did not include token".to_string())
            })?;

        Ok(Self {
            user_id,
            username: value.username.unwrap_or_default(),
            token,
        })
    }
}
