//! Slack OAuth v2, in login and workspace-install flavours.
//!
//! Slack differs from the other backends in three ways:
//!
//! - the state token is appended to the redirect URI as
//!   `slack_login_token` instead of using OAuth `state`, and that exact
//!   redirect URI must be repeated on the token exchange;
//! - the user token lives at `authed_user.access_token`, not at the root;
//! - failures come back as HTTP 200 with `"ok": false`.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{AuthorizationRequest, Backend, OAuthProvider, SLACK_TOKEN_PARAM};
use crate::config::{SlackConfig, require_credentials};
use crate::context::{AuthContext, CallbackParams};
use crate::error::{AuthError, Result};
use crate::oauth::{OAuthClient, TokenExchange, TokenResponse, string_field};
use crate::profile::{NormalizedProfile, ProfileUser, str_at};
use crate::state::StateTokenStore;

/// User-token scopes, requested by both flavours.
pub const USER_SCOPE: &[&str] = &[
    "channels:read",
    "users.profile:read",
    "users:read",
    "users:read.email",
];

/// Bot-token scopes, requested only on install.
pub const BOT_SCOPE: &[&str] = &[
    "app_mentions:read",
    "channels:history",
    "channels:join",
    "channels:read",
    "chat:write",
    "chat:write.customize",
    "chat:write.public",
    "commands",
    "files:write",
    "groups:history",
    "groups:read",
    "im:history",
    "im:read",
    "im:write",
    "mpim:history",
    "reactions:write",
    "team:read",
    "usergroups:read",
    "usergroups:write",
    "users.profile:read",
    "users:read",
    "users:read.email",
    "users:write",
];

const SCOPE_SEPARATOR: &str = ",";

/// Which Slack flow an adapter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlackMode {
    /// Identify a user; user scopes only.
    Login,
    /// Install the app into a workspace; user and bot scopes.
    Install,
}

impl SlackMode {
    pub fn backend(self) -> Backend {
        match self {
            Self::Login => Backend::SlackLogin,
            Self::Install => Backend::SlackInstall,
        }
    }

    /// Scope query parameters for the authorize URL, as
    /// `(parameter, scopes)` pairs.
    pub fn scope_params(self) -> Vec<(&'static str, &'static [&'static str])> {
        match self {
            Self::Login => vec![("user_scope", USER_SCOPE)],
            Self::Install => vec![("user_scope", USER_SCOPE), ("scope", BOT_SCOPE)],
        }
    }

    /// Every scope requested, regardless of token type.
    pub fn requested_scopes(self) -> BTreeSet<&'static str> {
        self.scope_params()
            .into_iter()
            .flat_map(|(_, scopes)| scopes.iter().copied())
            .collect()
    }
}

pub struct SlackProvider {
    mode: SlackMode,
    config: SlackConfig,
    redirect_uri: String,
    client: OAuthClient,
    tokens: Arc<dyn StateTokenStore>,
}

impl SlackProvider {
    pub fn new(
        mode: SlackMode,
        config: SlackConfig,
        redirect_uri: String,
        tokens: Arc<dyn StateTokenStore>,
    ) -> Result<Self> {
        require_credentials(mode.backend(), &config.client_id, &config.client_secret)?;
        let client = OAuthClient::new(&config.client_id, &config.client_secret);
        Ok(Self {
            mode,
            config,
            redirect_uri,
            client,
            tokens,
        })
    }

    pub fn mode(&self) -> SlackMode {
        self.mode
    }

    /// The redirect URI with the state token as its only query parameter.
    ///
    /// Any query already on the configured URI is replaced, so issuing and
    /// exchanging produce the same string.
    pub fn redirect_uri_with_token(&self, token: &str) -> Result<String> {
        let mut url = Url::parse(&self.redirect_uri)?;
        url.set_query(None);
        url.query_pairs_mut().append_pair(SLACK_TOKEN_PARAM, token);
        Ok(url.to_string())
    }

    /// Call `users.profile.get`, first with the token as a query parameter
    /// and, if Slack answers `ok: false`, again with a bearer header.
    async fn users_profile(&self, access_token: &str) -> Result<Value> {
        let url = self.config.api_method("users.profile.get");

        let first = self
            .client
            .get_json(&url, &[("token", access_token)], None)
            .await?;
        if !is_soft_failure(&first) {
            return Ok(first);
        }

        warn!(
            error = ?first.get("error"),
            "users.profile.get rejected query token, retrying with bearer header"
        );
        let second = self.client.get_json(&url, &[], Some(access_token)).await?;
        if is_soft_failure(&second) {
            return Err(slack_error(&second));
        }
        Ok(second)
    }
}

#[async_trait]
impl OAuthProvider for SlackProvider {
    fn backend(&self) -> Backend {
        self.mode.backend()
    }

    #[instrument(skip_all, fields(mode = "slack"))]
    async fn build_authorization_request(
        &self,
        ctx: Option<&AuthContext>,
    ) -> Result<AuthorizationRequest> {
        let ctx = AuthContext::require(ctx)?;
        let token = self.tokens.issue(self.backend().token_kind(), ctx).await?;
        let redirect_uri = self.redirect_uri_with_token(&token)?;

        let joined: Vec<(&str, String)> = self
            .mode
            .scope_params()
            .into_iter()
            .map(|(param, scopes)| (param, scopes.join(SCOPE_SEPARATOR)))
            .collect();
        let extra: Vec<(&str, &str)> = joined.iter().map(|(p, s)| (*p, s.as_str())).collect();

        let url = self.client.authorization_url(
            &self.config.authorization_url(),
            &redirect_uri,
            &extra,
        )?;

        Ok(AuthorizationRequest {
            backend: self.backend(),
            url,
            redirect_uri,
        })
    }

    #[instrument(skip_all, fields(mode = "slack"))]
    async fn exchange_token(&self, callback: &CallbackParams) -> Result<TokenExchange> {
        let code = callback.code()?;
        let redirect_uri = match callback.get(SLACK_TOKEN_PARAM).filter(|t| !t.is_empty()) {
            Some(token) => self.redirect_uri_with_token(token)?,
            None => self.redirect_uri.clone(),
        };

        let response = self
            .client
            .exchange_code(&self.config.token_url(), code, &redirect_uri)
            .await?;

        if response.get("ok") == Some(&Value::Bool(false)) {
            return Err(slack_error(&Value::Object(response)));
        }

        let access_token = response
            .get("authed_user")
            .and_then(|u| str_at(u, "access_token"))
            .ok_or_else(|| AuthError::MalformedResponse {
                reason: "slack token response has no authed_user.access_token".to_string(),
            })?;
        debug!(team = ?response.get("team"), "slack token exchange complete");

        Ok(TokenExchange {
            access_token,
            response,
        })
    }

    async fn fetch_normalized_profile(&self, access_token: &str) -> Result<NormalizedProfile> {
        let body = self.users_profile(access_token).await?;
        let profile = body.get("profile").cloned().unwrap_or(Value::Null);

        Ok(NormalizedProfile {
            user: ProfileUser {
                external_id: None,
                username: str_at(&profile, "display_name_normalized"),
                name: str_at(&profile, "real_name_normalized"),
                nickname: None,
                email: str_at(&profile, "email"),
            },
            team: profile.get("team").filter(|t| !t.is_null()).cloned(),
        })
    }

    /// The token response's `team` wins; the profile's team is dropped.
    /// The Slack user id comes from `authed_user.id`.
    fn merge_response(
        &self,
        exchange: &TokenExchange,
        profile: &mut NormalizedProfile,
    ) -> TokenResponse {
        profile.team = None;
        if profile.user.external_id.is_none() {
            profile.user.external_id = exchange
                .response
                .get("authed_user")
                .and_then(|u| str_at(u, "id"));
        }

        let mut response = exchange.response.clone();
        profile.merge_into(&mut response, &exchange.access_token);
        response
    }
}

fn is_soft_failure(body: &Value) -> bool {
    body.get("ok") == Some(&Value::Bool(false))
}

fn slack_error(body: &Value) -> AuthError {
    let error = body
        .as_object()
        .and_then(|obj| string_field(obj, "error"))
        .unwrap_or_else(|| "unknown_error".to_string());
    AuthError::Provider {
        provider: "slack",
        error,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
