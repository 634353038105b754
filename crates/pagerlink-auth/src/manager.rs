//! High-level OAuth flow orchestration.
//!
//! The [`AuthManager`] is the entry point for the host: it starts a flow for
//! a backend ([`AuthManager::begin`]) and finishes it from the callback
//! ([`AuthManager::complete`]). Completion order is fixed:
//!
//! 1. Reject callbacks carrying a provider `error` parameter.
//! 2. Redeem the state token (single use) to recover the user.
//! 3. Exchange the code for a token.
//! 4. Fetch and normalize the provider profile.
//! 5. Merge profile and token response.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::callback::CallbackServer;
use crate::config::AuthConfig;
use crate::context::{AuthContext, CallbackParams};
use crate::error::{AuthError, Result};
use crate::finalize::AuthFinalizer;
use crate::oauth::TokenResponse;
use crate::profile::NormalizedProfile;
use crate::providers::{AuthorizationRequest, Backend, ProviderRegistry};
use crate::state::StateTokenStore;

/// Default timeout for the local callback listener in seconds (5 minutes).
pub const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 300;

/// Outcome of a successful callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedAuth {
    pub backend: Backend,
    /// The user and organization the state token was issued to.
    pub context: AuthContext,
    /// The token used for profile calls (Slack: the user token).
    pub access_token: String,
    pub profile: NormalizedProfile,
    /// Token response merged with the profile.
    pub response: TokenResponse,
}

// ---------------------------------------------------------------------------
// AuthManager
// ---------------------------------------------------------------------------

/// Drives provider adapters through a full authorization round trip.
#[derive(Clone)]
pub struct AuthManager {
    registry: ProviderRegistry,
    tokens: Arc<dyn StateTokenStore>,
}

impl AuthManager {
    pub fn new(registry: ProviderRegistry, tokens: Arc<dyn StateTokenStore>) -> Self {
        Self { registry, tokens }
    }

    /// Build the registry from `config` and wrap it.
    pub fn from_config(config: &AuthConfig, tokens: Arc<dyn StateTokenStore>) -> Result<Self> {
        let registry = ProviderRegistry::from_config(config, Arc::clone(&tokens))?;
        Ok(Self::new(registry, tokens))
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Issue a state token for `ctx` and return where to send the user.
    #[instrument(skip_all, fields(backend = %backend))]
    pub async fn begin(
        &self,
        backend: Backend,
        ctx: Option<&AuthContext>,
    ) -> Result<AuthorizationRequest> {
        let provider = self.registry.get(backend)?;
        let request = provider.build_authorization_request(ctx).await?;
        info!(backend = %backend, "authorization request built");
        Ok(request)
    }

    /// Finish a flow from the callback's query parameters.
    ///
    /// # Errors
    ///
    /// - [`AuthError::ProviderDenied`] if the callback carries `error`.
    /// - [`AuthError::InvalidState`] if the state token is missing, unknown,
    ///   expired, already used, or of another provider kind.
    /// - Adapter errors from the exchange and profile steps.
    #[instrument(skip_all, fields(backend = %backend))]
    pub async fn complete(&self, backend: Backend, callback: &CallbackParams) -> Result<CompletedAuth> {
        let provider = self.registry.get(backend)?;

        if let Some(error) = callback.error() {
            warn!(backend = %backend, error = error, "provider returned an error on callback");
            return Err(AuthError::ProviderDenied {
                backend: backend.to_string(),
                error: error.to_string(),
                description: callback.error_description().map(str::to_string),
            });
        }

        let param = backend.state_param();
        let token = callback
            .get(param)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::InvalidState {
                reason: format!("callback has no {param} parameter"),
            })?;
        let context = self.tokens.redeem(backend.token_kind(), token).await?;
        debug!(user_id = %context.user_id, "state token redeemed");

        let exchange = provider.exchange_token(callback).await?;
        let mut profile = provider
            .fetch_normalized_profile(&exchange.access_token)
            .await?;
        let response = provider.merge_response(&exchange, &mut profile);

        info!(
            backend = %backend,
            user_id = %context.user_id,
            organization_id = %context.organization_id,
            "oauth flow completed"
        );

        Ok(CompletedAuth {
            backend,
            context,
            access_token: exchange.access_token,
            profile,
            response,
        })
    }

    /// [`AuthManager::complete`], then hand the result to `finalizer`.
    pub async fn complete_with(
        &self,
        backend: Backend,
        callback: &CallbackParams,
        finalizer: &dyn AuthFinalizer,
    ) -> Result<CompletedAuth> {
        let completed = self.complete(backend, callback).await?;
        finalizer.finalize(&completed).await?;
        Ok(completed)
    }

    /// Run the whole round trip against a local callback listener.
    ///
    /// This method:
    /// 1. Builds the authorization request for `ctx`.
    /// 2. Logs the authorization URL for the user to visit.
    /// 3. Waits on `127.0.0.1:{port}` for the provider redirect.
    /// 4. Completes the flow and runs `finalizer`.
    pub async fn authenticate_local(
        &self,
        backend: Backend,
        ctx: &AuthContext,
        port: u16,
        timeout_secs: u64,
        finalizer: &dyn AuthFinalizer,
    ) -> Result<CompletedAuth> {
        let request = self.begin(backend, Some(ctx)).await?;

        info!(url = %request.url, "open this URL in your browser to authorize");

        let callback = CallbackServer::start(port, timeout_secs).await?;
        self.complete_with(backend, &callback, finalizer).await
    }
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("registry", &self.registry)
            .finish()
    }
}
