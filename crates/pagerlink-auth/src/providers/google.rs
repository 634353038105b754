//! Google OAuth2 login.
//!
//! The state token rides in the standard `state` parameter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{AuthorizationRequest, Backend, OAuthProvider};
use crate::config::{GoogleConfig, require_credentials};
use crate::context::{AuthContext, CallbackParams};
use crate::error::Result;
use crate::oauth::{OAuthClient, TokenExchange, root_access_token};
use crate::profile::{NormalizedProfile, ProfileUser, str_at};
use crate::state::StateTokenStore;

pub const DEFAULT_SCOPES: &[&str] = &["openid", "email", "profile"];

pub struct GoogleProvider {
    config: GoogleConfig,
    redirect_uri: String,
    client: OAuthClient,
    tokens: Arc<dyn StateTokenStore>,
}

impl GoogleProvider {
    pub fn new(
        config: GoogleConfig,
        redirect_uri: String,
        tokens: Arc<dyn StateTokenStore>,
    ) -> Result<Self> {
        require_credentials(Backend::Google, &config.client_id, &config.client_secret)?;
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
impl OAuthProvider for GoogleProvider {
    fn backend(&self) -> Backend {
        Backend::Google
    }

    #[instrument(skip_all, fields(backend = "google-oauth2"))]
    async fn build_authorization_request(
        &self,
        ctx: Option<&AuthContext>,
    ) -> Result<AuthorizationRequest> {
        let ctx = AuthContext::require(ctx)?;
        let token = self.tokens.issue(Backend::Google.token_kind(), ctx).await?;
        let scope = DEFAULT_SCOPES.join(" ");

        let url = self.client.authorization_url(
            &self.config.authorization_url,
            &self.redirect_uri,
            &[("state", token.as_str()), ("scope", scope.as_str())],
        )?;

        Ok(AuthorizationRequest {
            backend: Backend::Google,
            url,
            redirect_uri: self.redirect_uri.clone(),
        })
    }

    async fn exchange_token(&self, callback: &CallbackParams) -> Result<TokenExchange> {
        let response = self
            .client
            .exchange_code(&self.config.token_url, callback.code()?, &self.redirect_uri)
            .await?;
        root_access_token(response)
    }

    async fn fetch_normalized_profile(&self, access_token: &str) -> Result<NormalizedProfile> {
        let info = self
            .client
            .get_json(&self.config.userinfo_url, &[], Some(access_token))
            .await?;
        debug!(sub = ?info.get("sub"), "fetched google userinfo");

        let email = str_at(&info, "email");
        let username = email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .filter(|local| !local.is_empty())
            .map(str::to_string);

        Ok(NormalizedProfile {
            user: ProfileUser {
                external_id: str_at(&info, "sub"),
                username,
                name: str_at(&info, "name"),
                nickname: str_at(&info, "given_name"),
                email,
            },
            team: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
