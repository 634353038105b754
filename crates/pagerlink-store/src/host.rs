//! Anchor rows for host-owned entities.
//!
//! Users and alert groups belong to the host alerting product. The link
//! records and state tokens reference them through foreign keys, so the
//! store keeps a minimal mirror of their ids (and owning organization) to
//! get the same cascade behaviour as the host schema.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};
use crate::identity_link::IdentityLinkStore;

/// A mirrored host user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostUser {
    pub id: String,
    pub organization_id: String,
    pub created_at: i64,
}

/// Insert / delete operations for host anchor rows.
#[derive(Clone)]
pub struct HostRecords {
    db: Database,
    identity_links: Option<IdentityLinkStore>,
}

impl HostRecords {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            identity_links: None,
        }
    }

    /// Keep `links`' reverse-lookup cache in step with user deletes.
    pub fn with_identity_links(mut self, links: IdentityLinkStore) -> Self {
        self.identity_links = Some(links);
        self
    }

    /// Mirror a host user. Re-registering an existing id updates its
    /// organization.
    #[instrument(skip(self))]
    pub async fn upsert_user(&self, id: &str, organization_id: &str) -> StoreResult<()> {
        Self::require_non_empty("user id", id)?;
        Self::require_non_empty("organization id", organization_id)?;

        let id = id.to_string();
        let organization_id = organization_id.to_string();
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO users (id, organization_id, created_at) VALUES (?1, ?2, ?3) \
                     ON CONFLICT(id) DO UPDATE SET organization_id = excluded.organization_id",
                    rusqlite::params![id, organization_id, now],
                )?;
                debug!(user_id = %id, "host user mirrored");
                Ok(())
            })
            .await
    }

    /// Mirror a host alert group.
    #[instrument(skip(self))]
    pub async fn upsert_alert_group(&self, id: &str, organization_id: &str) -> StoreResult<()> {
        Self::require_non_empty("alert group id", id)?;
        Self::require_non_empty("organization id", organization_id)?;

        let id = id.to_string();
        let organization_id = organization_id.to_string();
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO alert_groups (id, organization_id, created_at) VALUES (?1, ?2, ?3) \
                     ON CONFLICT(id) DO UPDATE SET organization_id = excluded.organization_id",
                    rusqlite::params![id, organization_id, now],
                )?;
                debug!(alert_group_id = %id, "host alert group mirrored");
                Ok(())
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_user(&self, id: &str) -> StoreResult<Option<HostUser>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT id, organization_id, created_at FROM users WHERE id = ?1",
                    rusqlite::params![id],
                    |row| {
                        Ok(HostUser {
                            id: row.get(0)?,
                            organization_id: row.get(1)?,
                            created_at: row.get(2)?,
                        })
                    },
                );
                match result {
                    Ok(user) => Ok(Some(user)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// Delete a user; its state tokens and identity link go with it.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        let unlinked = self
            .db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let unlinked = {
                    let mut stmt = tx.prepare(
                        "SELECT mattermost_user_id FROM mattermost_users WHERE user_id = ?1",
                    )?;
                    stmt.query_map(rusqlite::params![id], |row| row.get::<_, String>(0))?
                        .collect::<Result<Vec<_>, _>>()?
                };
                let deleted = tx.execute("DELETE FROM users WHERE id = ?1", rusqlite::params![id])?;
                if deleted == 0 {
                    return Err(StoreError::NotFound { entity: "user", id });
                }
                tx.commit()?;
                Ok(unlinked)
            })
            .await?;

        if let Some(links) = &self.identity_links {
            links.invalidate_external_ids(&unlinked).await;
        }
        debug!(unlinked = unlinked.len(), "host user deleted");
        Ok(())
    }

    /// Delete an alert group; its message links go with it.
    #[instrument(skip(self))]
    pub async fn delete_alert_group(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let deleted =
                    conn.execute("DELETE FROM alert_groups WHERE id = ?1", rusqlite::params![id])?;
                if deleted == 0 {
                    return Err(StoreError::NotFound {
                        entity: "alert group",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    fn require_non_empty(what: &str, value: &str) -> StoreResult<()> {
        if value.is_empty() {
            return Err(StoreError::InvalidArgument(format!("{what} must not be empty")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> HostRecords {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        HostRecords::new(db)
    }

    #[tokio::test]
    async fn upsert_and_get_user() {
        let host = setup().await;
        host.upsert_user("u-1", "org-1").await.unwrap();

        let user = host.get_user("u-1").await.unwrap().unwrap();
        assert_eq!(user.organization_id, "org-1");
    }

    #[tokio::test]
    async fn upsert_user_moves_organization() {
        let host = setup().await;
        host.upsert_user("u-1", "org-1").await.unwrap();
        host.upsert_user("u-1", "org-2").await.unwrap();

        let user = host.get_user("u-1").await.unwrap().unwrap();
        assert_eq!(user.organization_id, "org-2");
    }

    #[tokio::test]
    async fn get_missing_user_returns_none() {
        let host = setup().await;
        assert!(host.get_user("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_ids_rejected() {
        let host = setup().await;
        assert!(matches!(
            host.upsert_user("", "org").await,
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            host.upsert_alert_group("ag", "").await,
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn delete_user_clears_cached_reverse_lookup() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let links = IdentityLinkStore::new(db.clone());
        let host = HostRecords::new(db).with_identity_links(links.clone());
        host.upsert_user("u-1", "org-1").await.unwrap();

        let identity = crate::identity_link::ExternalIdentity {
            mattermost_user_id: "mm-1".into(),
            username: "alice".into(),
            nickname: None,
        };
        links.create("u-1", &identity).await.unwrap();
        // Warm the cache.
        assert!(links.get_by_mattermost_user_id("mm-1").await.unwrap().is_some());

        host.delete_user("u-1").await.unwrap();
        assert!(links.get_by_user("u-1").await.unwrap().is_none());
        assert!(links.get_by_mattermost_user_id("mm-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_missing_returns_not_found() {
        let host = setup().await;
        assert!(matches!(
            host.delete_user("nobody").await,
            Err(StoreError::NotFound { entity: "user", .. })
        ));
        assert!(matches!(
            host.delete_alert_group("nothing").await,
            Err(StoreError::NotFound { entity: "alert group", .. })
        ));
    }
}
