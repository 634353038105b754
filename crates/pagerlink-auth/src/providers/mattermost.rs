//! Mattermost login against a self-hosted server.
//!
//! Endpoints hang off the configured host. The profile comes from the
//! Mattermost REST client; its errors never leave this module as-is.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{instrument, warn};

use super::{AuthorizationRequest, Backend, OAuthProvider};
use crate::config::{MattermostConfig, require_credentials};
use crate::context::{AuthContext, CallbackParams};
use crate::error::{AuthError, Result};
use crate::mattermost_client::MattermostClient;
use crate::oauth::{OAuthClient, TokenExchange, root_access_token};
use crate::profile::{NormalizedProfile, ProfileUser};
use crate::state::StateTokenStore;

pub struct MattermostProvider {
    config: MattermostConfig,
    redirect_uri: String,
    client: OAuthClient,
    tokens: Arc<dyn StateTokenStore>,
}

impl MattermostProvider {
    pub fn new(
        config: MattermostConfig,
        redirect_uri: String,
        tokens: Arc<dyn StateTokenStore>,
    ) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(AuthError::InvalidConfig {
                reason: "mattermost-login: host must be set".to_string(),
            });
        }
        require_credentials(
            Backend::MattermostLogin,
            &config.client_id,
            &config.client_secret,
        )?;
        let client = OAuthClient::new(&config.client_id, &config.client_secret);
        Ok(Self {
            config,
            redirect_uri,
            client,
            tokens,
        })
    }
}

#[async_trait]
impl OAuthProvider for MattermostProvider {
    fn backend(&self) -> Backend {
        Backend::MattermostLogin
    }

    #[instrument(skip_all, fields(backend = "mattermost-login"))]
    async fn build_authorization_request(
        &self,
        ctx: Option<&AuthContext>,
    ) -> Result<AuthorizationRequest> {
        let ctx = AuthContext::require(ctx)?;
        let token = self
            .tokens
            .issue(Backend::MattermostLogin.token_kind(), ctx)
            .await?;

        let url = self.client.authorization_url(
            &self.config.authorization_url(),
            &self.redirect_uri,
            &[("state", token.as_str())],
        )?;

        Ok(AuthorizationRequest {
            backend: Backend::MattermostLogin,
            url,
            redirect_uri: self.redirect_uri.clone(),
        })
    }

    async fn exchange_token(&self, callback: &CallbackParams) -> Result<TokenExchange> {
        let response = self
            .client
            .exchange_code(&self.config.token_url(), callback.code()?, &self.redirect_uri)
            .await?;
        root_access_token(response)
    }

    async fn fetch_normalized_profile(&self, access_token: &str) -> Result<NormalizedProfile> {
        let client =
            MattermostClient::with_http(&self.config.host, access_token, self.client.http().clone());
        let user = client.get_user().await.map_err(|err| {
            warn!(error = %err, "mattermost user fetch failed");
            AuthError::MattermostLogin {
                message: err.msg().to_string(),
                status: err.status(),
            }
        })?;

        Ok(NormalizedProfile {
            user: ProfileUser {
                external_id: Some(user.user_id),
                username: Some(user.username),
                name: None,
                nickname: user.nickname,
                email: None,
            },
            team: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
