//! Single-use state tokens as seen by the provider adapters.
//!
//! Adapters only need two things from token storage: mint a token bound to
//! the current user, and trade a token back for that user exactly once.
//! [`pagerlink_store::AuthTokenStore`] is the production implementation.

use async_trait::async_trait;
use pagerlink_store::{AuthTokenStore, StoreError, TokenKind};
use tracing::debug;

use crate::context::AuthContext;
use crate::error::{AuthError, Result};

/// Issue and redeem provider-kind state tokens.
#[async_trait]
pub trait StateTokenStore: Send + Sync {
    /// Mint a fresh token of `kind` bound to `ctx`. Returns the plaintext.
    async fn issue(&self, kind: TokenKind, ctx: &AuthContext) -> Result<String>;

    /// Consume `token`, returning the context it was bound to.
    ///
    /// Unknown, expired, already-used, or wrong-kind tokens all fail with
    /// [`AuthError::InvalidState`].
    async fn redeem(&self, kind: TokenKind, token: &str) -> Result<AuthContext>;
}

#[async_trait]
impl StateTokenStore for AuthTokenStore {
    async fn issue(&self, kind: TokenKind, ctx: &AuthContext) -> Result<String> {
        let issued = AuthTokenStore::issue(self, kind, &ctx.user_id, &ctx.organization_id)
            .await
            .map_err(|err| match err {
                StoreError::InvalidArgument(_) => AuthError::MissingAuthContext,
                other => AuthError::Store(other),
            })?;
        Ok(issued.token)
    }

    async fn redeem(&self, kind: TokenKind, token: &str) -> Result<AuthContext> {
        match AuthTokenStore::redeem(self, kind, token).await {
            Ok(grant) => Ok(AuthContext::new(grant.user_id, grant.organization_id)),
            Err(StoreError::NotFound { id, .. }) => {
                debug!(kind = %kind, token_key = %id, "state token rejected");
                Err(AuthError::InvalidState {
                    reason: format!("{kind} token is unknown, expired, or already used"),
                })
            }
            Err(StoreError::InvalidArgument(reason)) => Err(AuthError::InvalidState { reason }),
            Err(other) => Err(AuthError::Store(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
