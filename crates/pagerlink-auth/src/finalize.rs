//! Post-login hooks.
//!
//! A finalizer runs after the manager has produced a [`CompletedAuth`] and
//! persists whatever the host needs from it.

use async_trait::async_trait;
use pagerlink_store::{ExternalIdentity, IdentityLinkStore, MattermostUser};
use tracing::info;

use crate::error::{AuthError, Result};
use crate::manager::CompletedAuth;
use crate::providers::Backend;

#[async_trait]
pub trait AuthFinalizer: Send + Sync {
    async fn finalize(&self, completed: &CompletedAuth) -> Result<()>;
}

/// Does nothing; for flows whose result the caller handles itself.
pub struct NoopFinalizer;

#[async_trait]
impl AuthFinalizer for NoopFinalizer {
    async fn finalize(&self, _completed: &CompletedAuth) -> Result<()> {
        Ok(())
    }
}

/// Records the Mattermost identity of a completed `mattermost-login`.
///
/// Other backends pass through untouched.
pub struct MattermostIdentityLinker {
    links: IdentityLinkStore,
}

impl MattermostIdentityLinker {
    pub fn new(links: IdentityLinkStore) -> Self {
        Self { links }
    }

    /// Create or update the link for the completed login.
    ///
    /// The same Mattermost account refreshes username and nickname; a
    /// different account replaces the old link.
    pub async fn link(&self, completed: &CompletedAuth) -> Result<Option<MattermostUser>> {
        if completed.backend != Backend::MattermostLogin {
            return Ok(None);
        }

        let user = &completed.profile.user;
        let identity = ExternalIdentity {
            mattermost_user_id: user.external_id.clone().ok_or_else(|| {
                AuthError::MalformedResponse {
                    reason: "mattermost profile has no user id".to_string(),
                }
            })?,
            username: user
                .username
                .clone()
                .ok_or_else(|| AuthError::MalformedResponse {
                    reason: "mattermost profile has no username".to_string(),
                })?,
            nickname: user.nickname.clone(),
        };

        let user_id = completed.context.user_id.as_str();
        let link = match self.links.get_by_user(user_id).await? {
            Some(existing) if existing.mattermost_user_id == identity.mattermost_user_id => {
                self.links
                    .refresh(user_id, &identity.username, identity.nickname.as_deref())
                    .await?
            }
            Some(_) => self.links.replace(user_id, &identity).await?,
            None => self.links.create(user_id, &identity).await?,
        };

        info!(
            user_id = %link.user_id,
            mattermost_user_id = %link.mattermost_user_id,
            "mattermost identity linked"
        );
        Ok(Some(link))
    }
}

#[async_trait]
impl AuthFinalizer for MattermostIdentityLinker {
    async fn finalize(&self, completed: &CompletedAuth) -> Result<()> {
        self.link(completed).await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AuthContext;
    use crate::profile::{NormalizedProfile, ProfileUser};
    use pagerlink_store::{Database, HostRecords};

    async fn linker() -> MattermostIdentityLinker {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        HostRecords::new(db.clone())
            .upsert_user("u-1", "org-1")
            .await
            .unwrap();
        MattermostIdentityLinker::new(IdentityLinkStore::new(db))
    }

    fn completed(backend: Backend, external_id: &str, username: &str) -> CompletedAuth {
        CompletedAuth {
            backend,
            context: AuthContext::new("u-1", "org-1"),
            access_token: "at".to_string(),
            profile: NormalizedProfile {
                user: ProfileUser {
                    external_id: Some(external_id.to_string()),
                    username: Some(username.to_string()),
                    nickname: Some("Al".to_string()),
                    ..Default::default()
                },
                team: None,
            },
            response: Default::default(),
        }
    }

    #[tokio::test]
    async fn creates_then_refreshes_link() {
        let linker = linker().await;

        let created = linker
            .link(&completed(Backend::MattermostLogin, "mm-1", "alice"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.mention_username(), "@alice");

        let refreshed = linker
            .link(&completed(Backend::MattermostLogin, "mm-1", "alice2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refreshed.id, created.id);
        assert_eq!(refreshed.username, "alice2");
    }

    #[tokio::test]
    async fn different_account_replaces_link() {
        let linker = linker().await;
        linker
            .link(&completed(Backend::MattermostLogin, "mm-1", "alice"))
            .await
            .unwrap();

        let replaced = linker
            .link(&completed(Backend::MattermostLogin, "mm-2", "bob"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replaced.mattermost_user_id, "mm-2");
        assert!(
            linker
                .links
                .get_by_mattermost_user_id("mm-1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn relink_with_multibyte_nickname() {
        let linker = linker().await;
        linker
            .link(&completed(Backend::MattermostLogin, "mm-1", "alice"))
            .await
            .unwrap();

        let mut auth = completed(Backend::MattermostLogin, "mm-2", "alice");
        auth.profile.user.nickname = Some("日".repeat(40));
        let relinked = linker.link(&auth).await.unwrap().unwrap();
        assert_eq!(relinked.mattermost_user_id, "mm-2");
        assert_eq!(relinked.nickname, Some("日".repeat(40)));
    }

    #[tokio::test]
    async fn rejected_relink_keeps_previous_link() {
        let linker = linker().await;
        let original = linker
            .link(&completed(Backend::MattermostLogin, "mm-1", "alice"))
            .await
            .unwrap()
            .unwrap();

        let mut auth = completed(Backend::MattermostLogin, "mm-2", "bob");
        auth.profile.user.nickname = Some("日".repeat(101));
        assert!(matches!(linker.link(&auth).await, Err(AuthError::Store(_))));

        let kept = linker.links.get_by_user("u-1").await.unwrap();
        assert_eq!(kept, Some(original));
    }

    #[tokio::test]
    async fn other_backends_are_ignored() {
        let linker = linker().await;
        let result = linker
            .link(&completed(Backend::Google, "g-1", "alice"))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn missing_username_is_malformed() {
        let linker = linker().await;
        let mut auth = completed(Backend::MattermostLogin, "mm-1", "alice");
        auth.profile.user.username = None;
        assert!(matches!(
            linker.link(&auth).await,
            Err(AuthError::MalformedResponse { .. })
        ));
    }
}
