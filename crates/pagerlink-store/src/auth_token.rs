//! Single-use OAuth state tokens.
//!
//! A state token binds an in-flight OAuth round trip to the user and
//! organization that started it. The session cannot be trusted to survive
//! the provider redirect, so the callback recovers the actor by redeeming
//! the token instead.
//!
//! Only a SHA-256 digest of each token is stored. Redemption is one atomic
//! `UPDATE ... RETURNING`, so the same token can never be redeemed twice,
//! even by concurrent callbacks.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Random bytes per token (before base64url encoding).
const TOKEN_BYTES: usize = 32;

/// Length of the non-secret prefix kept for diagnostics.
const TOKEN_KEY_LEN: usize = 8;

/// Default lifetime of an unredeemed token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(300);

/// Which provider family a token was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Google,
    Slack,
    Mattermost,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Slack => "slack",
            Self::Mattermost => "mattermost",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A freshly issued token. `token` is the only copy of the secret.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub kind: TokenKind,
    pub expires_at: i64,
}

/// The actor recovered by redeeming a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub user_id: String,
    pub organization_id: String,
}

/// Issues and redeems single-use state tokens.
#[derive(Clone)]
pub struct AuthTokenStore {
    db: Database,
    ttl: Duration,
}

impl AuthTokenStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            ttl: DEFAULT_TOKEN_TTL,
        }
    }

    /// Override how long an issued token stays redeemable.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issue a new token bound to `(user_id, organization_id)`.
    ///
    /// Earlier tokens for the same user stay valid, so two concurrent login
    /// attempts do not interfere with each other.
    #[instrument(skip(self))]
    pub async fn issue(
        &self,
        kind: TokenKind,
        user_id: &str,
        organization_id: &str,
    ) -> StoreResult<IssuedToken> {
        if user_id.is_empty() || organization_id.is_empty() {
            return Err(StoreError::InvalidArgument(
                "state tokens need both a user and an organization".into(),
            ));
        }

        let token = generate_token()?;
        let token_key = token_key(&token);
        let digest = token_digest(&token);
        let now = Utc::now().timestamp();
        let expires_at = now + i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX - now);

        let user = user_id.to_string();
        let organization = organization_id.to_string();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO auth_tokens (kind, token_key, digest, user_id, organization_id, created_at, expires_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![kind.as_str(), token_key, digest, user, organization, now, expires_at],
                )
                .map_err(|e| {
                    if let rusqlite::Error::SqliteFailure(ref err, _) = e
                        && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
                    {
                        return StoreError::NotFound {
                            entity: "user",
                            id: user.clone(),
                        };
                    }
                    StoreError::Sqlite(e)
                })?;
                Ok(())
            })
            .await?;

        debug!(kind = %kind, user_id = user_id, expires_at, "state token issued");
        Ok(IssuedToken {
            token,
            kind,
            expires_at,
        })
    }

    /// Redeem a token, consuming it.
    ///
    /// Unknown, expired, already-redeemed, and wrong-kind tokens are all
    /// reported as [`StoreError::NotFound`].
    #[instrument(skip(self, token))]
    pub async fn redeem(&self, kind: TokenKind, token: &str) -> StoreResult<TokenGrant> {
        let digest = token_digest(token);
        let key = token_key(token);
        let now = Utc::now().timestamp();

        let grant = self
            .db
            .execute(move |conn| {
                let result = conn.query_row(
                    "UPDATE auth_tokens SET redeemed_at = ?3 \
                     WHERE digest = ?1 AND kind = ?2 AND redeemed_at IS NULL AND expires_at > ?3 \
                     RETURNING user_id, organization_id",
                    rusqlite::params![digest, kind.as_str(), now],
                    |row| {
                        Ok(TokenGrant {
                            user_id: row.get(0)?,
                            organization_id: row.get(1)?,
                        })
                    },
                );
                match result {
                    Ok(grant) => Ok(grant),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFound {
                        entity: "auth token",
                        id: key,
                    }),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await?;

        debug!(kind = %kind, user_id = %grant.user_id, "state token redeemed");
        Ok(grant)
    }

    /// Delete redeemed and expired tokens, returning how many were removed.
    #[instrument(skip(self))]
    pub async fn purge_expired(&self) -> StoreResult<usize> {
        let now = Utc::now().timestamp();
        let purged = self
            .db
            .execute(move |conn| {
                let n = conn.execute(
                    "DELETE FROM auth_tokens WHERE redeemed_at IS NOT NULL OR expires_at <= ?1",
                    rusqlite::params![now],
                )?;
                Ok(n)
            })
            .await?;
        info!(purged, "stale state tokens purged");
        Ok(purged)
    }
}

fn generate_token() -> StoreResult<String> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; TOKEN_BYTES];
    rng.fill(&mut bytes)
        .map_err(|_| StoreError::InvalidArgument("failed to generate state token: CSPRNG error".into()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn token_digest(token: &str) -> String {
    let hash = digest::digest(&digest::SHA256, token.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

fn token_key(token: &str) -> String {
    token.chars().take(TOKEN_KEY_LEN).collect()
}

// ── tests ────────────────────────────────────────────────────────────
