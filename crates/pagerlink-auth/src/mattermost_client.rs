//! Minimal Mattermost REST v4 client.
//!
//! Only what login needs: fetch the user behind an access token. Errors are
//! reported as [`MattermostApiError`] so callers can tell an invalid token
//! apart from any other API failure.

use serde::Deserialize;
use tracing::debug;

/// Failure talking to the Mattermost API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MattermostApiError {
    /// The server rejected the token (HTTP 401).
    #[error("mattermost token invalid: {msg}")]
    TokenInvalid { msg: String, status: u16 },

    /// Any other failure, including transport errors (no status).
    #[error("mattermost api error: {msg}")]
    Api { msg: String, status: Option<u16> },
}

impl MattermostApiError {
    pub fn msg(&self) -> &str {
        match self {
            Self::TokenInvalid { msg, .. } | Self::Api { msg, .. } => msg,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::TokenInvalid { status, .. } => Some(*status),
            Self::Api { status, .. } => *status,
        }
    }
}

impl From<reqwest::Error> for MattermostApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Api {
            status: err.status().map(|s| s.as_u16()),
            msg: err.to_string(),
        }
    }
}

/// A Mattermost account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MattermostUserInfo {
    #[serde(rename = "id")]
    pub user_id: String,
    pub username: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub nickname: Option<String>,
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Mattermost's JSON error envelope.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Client bound to one server and one access token.
pub struct MattermostClient {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl MattermostClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_http(base_url, token, reqwest::Client::new())
    }

    pub fn with_http(
        base_url: impl Into<String>,
        token: impl Into<String>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            http,
        }
    }

    /// `GET /api/v4/users/me`
    pub async fn get_user(&self) -> Result<MattermostUserInfo, MattermostApiError> {
        let url = format!("{}/api/v4/users/me", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let user: MattermostUserInfo = response.json().await?;
            debug!(mattermost_user_id = %user.user_id, "fetched mattermost user");
            return Ok(user);
        }

        let body = response.text().await.unwrap_or_default();
        let msg = serde_json::from_str::<ApiErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or_else(|_| {
                if body.is_empty() {
                    status.canonical_reason().unwrap_or("unknown error").to_string()
                } else {
                    body
                }
            });

        if status == reqwest::StatusCode::UNAUTHORIZED {
            Err(MattermostApiError::TokenInvalid {
                msg,
                status: status.as_u16(),
            })
        } else {
            Err(MattermostApiError::Api {
                msg,
                status: Some(status.as_u16()),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
