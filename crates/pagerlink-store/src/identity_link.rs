//! One-to-one links between internal users and Mattermost identities.
//!
//! Each internal user has at most one link (`user_id` is UNIQUE). The
//! Mattermost user id is indexed but not unique, since nothing stops two
//! internal accounts from linking the same external user; reverse lookup
//! returns the most recent link.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::cache::{CacheStats, LookupCache};
use crate::db::Database;
use crate::error::{StoreError, StoreResult};

const MAX_FIELD_LEN: usize = 100;

/// Reverse-lookup cache sizing. Cascade deletes through
/// [`HostRecords`](crate::host::HostRecords) invalidate through
/// [`IdentityLinkStore::invalidate_external_ids`].
const CACHE_CAPACITY: u64 = 10_000;
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Identity fields reported by Mattermost for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub mattermost_user_id: String,
    pub username: String,
    pub nickname: Option<String>,
}

/// A stored identity link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MattermostUser {
    pub id: i64,
    pub user_id: String,
    pub mattermost_user_id: String,
    pub username: String,
    pub nickname: Option<String>,
    pub created_at: i64,
}

impl MattermostUser {
    /// The `@username` form used in Mattermost messages.
    pub fn mention_username(&self) -> String {
        format!("@{}", self.username)
    }
}

/// Store for [`MattermostUser`] rows.
#[derive(Clone)]
pub struct IdentityLinkStore {
    db: Database,
    by_external_id: LookupCache<String, MattermostUser>,
}

const SELECT_COLUMNS: &str =
    "SELECT id, user_id, mattermost_user_id, username, nickname, created_at FROM mattermost_users";

impl IdentityLinkStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            by_external_id: LookupCache::new("mattermost_users", CACHE_CAPACITY, CACHE_TTL),
        }
    }

    /// Link `user_id` to a Mattermost identity.
    ///
    /// A user that is already linked yields [`StoreError::UniqueViolation`];
    /// use [`IdentityLinkStore::refresh`] to update an existing link.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        user_id: &str,
        identity: &ExternalIdentity,
    ) -> StoreResult<MattermostUser> {
        validate(identity)?;

        let user_id = user_id.to_string();
        let identity = identity.clone();
        let now = Utc::now().timestamp();

        let link = self
            .db
            .execute(move |conn| insert_link(conn, user_id, identity, now))
            .await?;

        self.by_external_id.invalidate(&link.mattermost_user_id).await;
        debug!(
            user_id = %link.user_id,
            mattermost_user_id = %link.mattermost_user_id,
            "identity linked"
        );
        Ok(link)
    }

    /// Point `user_id` at a different Mattermost identity.
    ///
    /// The old link (if any) is deleted and the new one inserted in a single
    /// transaction, so a rejected identity leaves the old link in place.
    #[instrument(skip(self))]
    pub async fn replace(
        &self,
        user_id: &str,
        identity: &ExternalIdentity,
    ) -> StoreResult<MattermostUser> {
        validate(identity)?;

        let user_id = user_id.to_string();
        let identity = identity.clone();
        let now = Utc::now().timestamp();

        let (previous, link) = self
            .db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let previous: Option<String> = match tx.query_row(
                    "SELECT mattermost_user_id FROM mattermost_users WHERE user_id = ?1",
                    rusqlite::params![user_id],
                    |row| row.get(0),
                ) {
                    Ok(id) => Some(id),
                    Err(rusqlite::Error::QueryReturnedNoRows) => None,
                    Err(e) => return Err(StoreError::Sqlite(e)),
                };
                tx.execute(
                    "DELETE FROM mattermost_users WHERE user_id = ?1",
                    rusqlite::params![user_id],
                )?;
                let link = insert_link(&tx, user_id, identity, now)?;
                tx.commit()?;
                Ok((previous, link))
            })
            .await?;

        if let Some(previous) = previous {
            self.by_external_id.invalidate(&previous).await;
        }
        self.by_external_id.invalidate(&link.mattermost_user_id).await;
        debug!(
            user_id = %link.user_id,
            mattermost_user_id = %link.mattermost_user_id,
            "identity relinked"
        );
        Ok(link)
    }

    /// Update username / nickname of an existing link.
    ///
    /// The Mattermost user id is left as is: a different external user means
    /// a new link, not a refresh.
    #[instrument(skip(self))]
    pub async fn refresh(
        &self,
        user_id: &str,
        username: &str,
        nickname: Option<&str>,
    ) -> StoreResult<MattermostUser> {
        check_len("username", username, false)?;
        if let Some(nickname) = nickname {
            check_len("nickname", nickname, true)?;
        }

        let user_id_owned = user_id.to_string();
        let username = username.to_string();
        let nickname = nickname.map(str::to_string);
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE mattermost_users SET username = ?2, nickname = ?3 WHERE user_id = ?1",
                    rusqlite::params![user_id_owned, username, nickname],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "mattermost user",
                        id: user_id_owned,
                    });
                }
                Ok(())
            })
            .await?;

        let link = self
            .get_by_user(user_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "mattermost user",
                id: user_id.to_string(),
            })?;
        self.by_external_id.invalidate(&link.mattermost_user_id).await;
        Ok(link)
    }

    #[instrument(skip(self))]
    pub async fn get_by_user(&self, user_id: &str) -> StoreResult<Option<MattermostUser>> {
        let user_id = user_id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("{SELECT_COLUMNS} WHERE user_id = ?1"),
                    rusqlite::params![user_id],
                    map_row,
                );
                match result {
                    Ok(link) => Ok(Some(link)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// Resolve a Mattermost user id (from a provider event) to its link.
    #[instrument(skip(self))]
    pub async fn get_by_mattermost_user_id(
        &self,
        mattermost_user_id: &str,
    ) -> StoreResult<Option<MattermostUser>> {
        let key = mattermost_user_id.to_string();
        let db = self.db.clone();
        self.by_external_id
            .get_or_load(&key, || {
                let key = key.clone();
                async move {
                    db.execute(move |conn| {
                        let result = conn.query_row(
                            &format!(
                                "{SELECT_COLUMNS} WHERE mattermost_user_id = ?1 ORDER BY id DESC LIMIT 1"
                            ),
                            rusqlite::params![key],
                            map_row,
                        );
                        match result {
                            Ok(link) => Ok(Some(link)),
                            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                            Err(e) => Err(StoreError::Sqlite(e)),
                        }
                    })
                    .await
                }
            })
            .await
    }

    /// Remove the link for `user_id`, returning whether one existed.
    #[instrument(skip(self))]
    pub async fn delete_by_user(&self, user_id: &str) -> StoreResult<bool> {
        let Some(existing) = self.get_by_user(user_id).await? else {
            return Ok(false);
        };

        let user_id = user_id.to_string();
        let deleted = self
            .db
            .execute(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM mattermost_users WHERE user_id = ?1",
                    rusqlite::params![user_id],
                )?)
            })
            .await?;

        self.by_external_id.invalidate(&existing.mattermost_user_id).await;
        Ok(deleted > 0)
    }

    /// Drop cached reverse lookups for links removed outside this store,
    /// e.g. by a user delete cascading to `mattermost_users`.
    pub async fn invalidate_external_ids(&self, mattermost_user_ids: &[String]) {
        for id in mattermost_user_ids {
            self.by_external_id.invalidate(id).await;
        }
    }

    /// Reverse-lookup cache counters.
    pub fn cache_stats(&self) -> &CacheStats {
        self.by_external_id.stats()
    }
}

fn insert_link(
    conn: &rusqlite::Connection,
    user_id: String,
    identity: ExternalIdentity,
    now: i64,
) -> StoreResult<MattermostUser> {
    conn.execute(
        "INSERT INTO mattermost_users (user_id, mattermost_user_id, username, nickname, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![
            user_id,
            identity.mattermost_user_id,
            identity.username,
            identity.nickname,
            now
        ],
    )
    .map_err(|e| {
        if let rusqlite::Error::SqliteFailure(ref err, _) = e
            && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
        {
            return StoreError::NotFound {
                entity: "user",
                id: user_id.clone(),
            };
        }
        StoreError::from_insert(e, "mattermost_users.user_id")
    })?;

    Ok(MattermostUser {
        id: conn.last_insert_rowid(),
        user_id,
        mattermost_user_id: identity.mattermost_user_id,
        username: identity.username,
        nickname: identity.nickname,
        created_at: now,
    })
}

/// Lengths are in characters, matching SQLite's `length()` on TEXT.
fn check_len(what: &str, value: &str, allow_empty: bool) -> StoreResult<()> {
    let len = value.chars().count();
    if (!allow_empty && len == 0) || len > MAX_FIELD_LEN {
        let range = if allow_empty { "0" } else { "1" };
        return Err(StoreError::InvalidArgument(format!(
            "{what} must be {range}..={MAX_FIELD_LEN} characters"
        )));
    }
    Ok(())
}

fn validate(identity: &ExternalIdentity) -> StoreResult<()> {
    check_len("mattermost user id", &identity.mattermost_user_id, false)?;
    check_len("username", &identity.username, false)?;
    if let Some(nickname) = &identity.nickname {
        check_len("nickname", nickname, true)?;
    }
    Ok(())
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MattermostUser> {
    Ok(MattermostUser {
        id: row.get(0)?,
        user_id: row.get(1)?,
        mattermost_user_id: row.get(2)?,
        username: row.get(3)?,
        nickname: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// ── tests ────────────────────────────────────────────────────────────
