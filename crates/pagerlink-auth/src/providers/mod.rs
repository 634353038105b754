//! Provider adapters.
//!
//! Each adapter implements [`OAuthProvider`] for one backend identifier.
//! The set of backends is closed ([`Backend`]); the host selects one by its
//! identifier string and drives it through [`crate::AuthManager`].

pub mod google;
pub mod mattermost;
pub mod slack;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use pagerlink_store::TokenKind;
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;
use crate::context::{AuthContext, CallbackParams};
use crate::error::{AuthError, Result};
use crate::oauth::{TokenExchange, TokenResponse};
use crate::profile::NormalizedProfile;
use crate::state::StateTokenStore;

pub use google::GoogleProvider;
pub use mattermost::MattermostProvider;
pub use slack::{SlackMode, SlackProvider};

/// Callback query parameter carrying the state token for Google and
/// Mattermost.
pub const STATE_PARAM: &str = "state";

/// Callback query parameter carrying the state token for Slack, which
/// travels inside the redirect URI rather than the OAuth `state`.
pub const SLACK_TOKEN_PARAM: &str = "slack_login_token";

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Provider backends, keyed by their stable string identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Backend {
    #[serde(rename = "google-oauth2")]
    Google,
    #[serde(rename = "slack-login")]
    SlackLogin,
    #[serde(rename = "slack-install-free")]
    SlackInstall,
    #[serde(rename = "mattermost-login")]
    MattermostLogin,
}

impl Backend {
    pub const ALL: [Backend; 4] = [
        Backend::Google,
        Backend::SlackLogin,
        Backend::SlackInstall,
        Backend::MattermostLogin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google-oauth2",
            Self::SlackLogin => "slack-login",
            Self::SlackInstall => "slack-install-free",
            Self::MattermostLogin => "mattermost-login",
        }
    }

    /// The kind of state token this backend issues and redeems.
    pub fn token_kind(&self) -> TokenKind {
        match self {
            Self::Google => TokenKind::Google,
            Self::SlackLogin | Self::SlackInstall => TokenKind::Slack,
            Self::MattermostLogin => TokenKind::Mattermost,
        }
    }

    /// Callback query parameter that carries the state token.
    pub fn state_param(&self) -> &'static str {
        match self {
            Self::SlackLogin | Self::SlackInstall => SLACK_TOKEN_PARAM,
            Self::Google | Self::MattermostLogin => STATE_PARAM,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self> {
        Backend::ALL
            .into_iter()
            .find(|b| b.as_str() == s)
            .ok_or_else(|| AuthError::UnknownBackend {
                name: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Where to send the user to start authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationRequest {
    pub backend: Backend,
    pub url: String,
    /// The exact redirect URI sent to the provider. The token exchange must
    /// repeat it byte for byte.
    pub redirect_uri: String,
}

/// One OAuth backend.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn backend(&self) -> Backend;

    /// Issue a state token for `ctx` and build the authorization URL.
    ///
    /// Fails with [`AuthError::MissingAuthContext`] when `ctx` is absent.
    async fn build_authorization_request(
        &self,
        ctx: Option<&AuthContext>,
    ) -> Result<AuthorizationRequest>;

    /// Exchange the callback's authorization code for a token.
    async fn exchange_token(&self, callback: &CallbackParams) -> Result<TokenExchange>;

    /// Fetch the provider profile and reduce it to [`NormalizedProfile`].
    async fn fetch_normalized_profile(&self, access_token: &str) -> Result<NormalizedProfile>;

    /// Combine the token response with the profile into the final
    /// provider response. May fill gaps in `profile` from the token
    /// response.
    fn merge_response(
        &self,
        exchange: &TokenExchange,
        profile: &mut NormalizedProfile,
    ) -> TokenResponse {
        let mut response = exchange.response.clone();
        profile.merge_into(&mut response, &exchange.access_token);
        response
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The configured providers, looked up by [`Backend`].
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<Backend, Arc<dyn OAuthProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a provider for every backend whose section is present in
    /// `config`. Slack login and install share the `slack` section.
    pub fn from_config(config: &AuthConfig, tokens: Arc<dyn StateTokenStore>) -> Result<Self> {
        let mut registry = Self::new();

        if let Some(ref google) = config.google {
            registry.register(Arc::new(GoogleProvider::new(
                google.clone(),
                config.redirect_uri(Backend::Google),
                Arc::clone(&tokens),
            )?));
        }

        if let Some(ref slack) = config.slack {
            for mode in [SlackMode::Login, SlackMode::Install] {
                registry.register(Arc::new(SlackProvider::new(
                    mode,
                    slack.clone(),
                    config.redirect_uri(mode.backend()),
                    Arc::clone(&tokens),
                )?));
            }
        }

        if let Some(ref mattermost) = config.mattermost {
            registry.register(Arc::new(MattermostProvider::new(
                mattermost.clone(),
                config.redirect_uri(Backend::MattermostLogin),
                Arc::clone(&tokens),
            )?));
        }

        tracing::info!(backends = ?registry.backends(), "oauth providers configured");
        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn OAuthProvider>) {
        self.providers.insert(provider.backend(), provider);
    }

    pub fn get(&self, backend: Backend) -> Result<Arc<dyn OAuthProvider>> {
        self.providers
            .get(&backend)
            .cloned()
            .ok_or_else(|| AuthError::ProviderNotFound {
                backend: backend.to_string(),
            })
    }

    /// Configured backends, in a stable order.
    pub fn backends(&self) -> Vec<Backend> {
        let mut backends: Vec<Backend> = self.providers.keys().copied().collect();
        backends.sort();
        backends
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("backends", &self.backends())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GoogleConfig, SlackConfig};

    struct NoTokens;

    #[async_trait]
    impl StateTokenStore for NoTokens {
        async fn issue(&self, _kind: TokenKind, _ctx: &AuthContext) -> Result<String> {
            Ok("tok".to_string())
        }

        async fn redeem(&self, _kind: TokenKind, _token: &str) -> Result<AuthContext> {
            Err(AuthError::InvalidState {
                reason: "none".to_string(),
            })
        }
    }

    #[test]
    fn backend_identifiers_round_trip() {
        for backend in Backend::ALL {
            assert_eq!(backend.as_str().parse::<Backend>().unwrap(), backend);
        }
        assert!(matches!(
            "github".parse::<Backend>(),
            Err(AuthError::UnknownBackend { .. })
        ));
    }

    #[test]
    fn slack_backends_share_token_kind_and_param() {
        assert_eq!(Backend::SlackLogin.token_kind(), TokenKind::Slack);
        assert_eq!(Backend::SlackInstall.token_kind(), TokenKind::Slack);
        assert_eq!(Backend::SlackInstall.state_param(), "slack_login_token");
        assert_eq!(Backend::Google.state_param(), "state");
        assert_eq!(Backend::MattermostLogin.token_kind(), TokenKind::Mattermost);
    }

    #[test]
    fn registry_only_holds_configured_backends() {
        let config = AuthConfig {
            google: Some(GoogleConfig::new("g-id", "g-secret")),
            slack: Some(SlackConfig::new("s-id", "s-secret")),
            ..Default::default()
        };
        let registry = ProviderRegistry::from_config(&config, Arc::new(NoTokens)).unwrap();

        assert_eq!(
            registry.backends(),
            vec![Backend::Google, Backend::SlackLogin, Backend::SlackInstall]
        );
        let err = registry.get(Backend::MattermostLogin).err().unwrap();
        assert!(matches!(err, AuthError::ProviderNotFound { ref backend } if backend == "mattermost-login"));
    }

    #[test]
    fn blank_credentials_fail_registry_construction() {
        let config = AuthConfig {
            google: Some(GoogleConfig::new("", "")),
            ..Default::default()
        };
        assert!(matches!(
            ProviderRegistry::from_config(&config, Arc::new(NoTokens)),
            Err(AuthError::InvalidConfig { .. })
        ));
    }
}
