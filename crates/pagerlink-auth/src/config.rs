//! Provider credentials and endpoints.
//!
//! Every endpoint has a production default and can be overridden, which is
//! how tests point the adapters at a local mock server.

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};
use crate::providers::Backend;

/// Settings for every provider plus the shared redirect base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Public base URL the providers redirect back to. The callback for a
    /// backend is `{redirect_base_url}/complete/{backend}/`.
    #[serde(default = "default_redirect_base_url")]
    pub redirect_base_url: String,

    #[serde(default)]
    pub google: Option<GoogleConfig>,

    #[serde(default)]
    pub slack: Option<SlackConfig>,

    #[serde(default)]
    pub mattermost: Option<MattermostConfig>,
}

impl AuthConfig {
    /// The callback URL registered for `backend`.
    pub fn redirect_uri(&self, backend: Backend) -> String {
        format!(
            "{}/complete/{}/",
            self.redirect_base_url.trim_end_matches('/'),
            backend
        )
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            redirect_base_url: default_redirect_base_url(),
            google: None,
            slack: None,
            mattermost: None,
        }
    }
}

fn default_redirect_base_url() -> String {
    "http://127.0.0.1:8400".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,

    #[serde(default = "default_google_authorization_url")]
    pub authorization_url: String,

    #[serde(default = "default_google_token_url")]
    pub token_url: String,

    #[serde(default = "default_google_userinfo_url")]
    pub userinfo_url: String,
}

impl GoogleConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorization_url: default_google_authorization_url(),
            token_url: default_google_token_url(),
            userinfo_url: default_google_userinfo_url(),
        }
    }

    /// Point every endpoint at `base` (used against a mock server).
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.authorization_url = format!("{base}/o/oauth2/auth");
        self.token_url = format!("{base}/token");
        self.userinfo_url = format!("{base}/oauth2/v3/userinfo");
        self
    }
}

fn default_google_authorization_url() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_google_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_google_userinfo_url() -> String {
    "https://www.googleapis.com/oauth2/v3/userinfo".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub client_id: String,
    pub client_secret: String,

    /// Base for the browser-facing authorize page.
    #[serde(default = "default_slack_oauth_base_url")]
    pub oauth_base_url: String,

    /// Base for Web API methods (`oauth.v2.access`, `users.profile.get`).
    #[serde(default = "default_slack_api_base_url")]
    pub api_base_url: String,
}

impl SlackConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            oauth_base_url: default_slack_oauth_base_url(),
            api_base_url: default_slack_api_base_url(),
        }
    }

    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.oauth_base_url = base.to_string();
        self.api_base_url = format!("{base}/api");
        self
    }

    pub fn authorization_url(&self) -> String {
        format!("{}/oauth/v2/authorize", self.oauth_base_url.trim_end_matches('/'))
    }

    pub fn token_url(&self) -> String {
        self.api_method("oauth.v2.access")
    }

    pub fn api_method(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base_url.trim_end_matches('/'))
    }
}

fn default_slack_oauth_base_url() -> String {
    "https://slack.com".to_string()
}

fn default_slack_api_base_url() -> String {
    "https://slack.com/api".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MattermostConfig {
    /// Root URL of the Mattermost server, e.g. `https://chat.example.com`.
    pub host: String,
    pub client_id: String,
    pub client_secret: String,
}

impl MattermostConfig {
    pub fn new(
        host: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn authorization_url(&self) -> String {
        format!("{}/oauth/authorize", self.host.trim_end_matches('/'))
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth/access_token", self.host.trim_end_matches('/'))
    }
}

/// Reject blank credentials early so a misconfigured provider fails at
/// startup rather than on the first callback.
pub(crate) fn require_credentials(backend: Backend, client_id: &str, secret: &str) -> Result<()> {
    if client_id.trim().is_empty() || secret.trim().is_empty() {
        return Err(AuthError::InvalidConfig {
            reason: format!("{backend}: client id and secret must be set"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
