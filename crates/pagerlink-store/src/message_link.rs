//! Ledger of Mattermost posts made on behalf of alert groups.
//!
//! One row per posted message. At most one row exists per
//! `(alert_group, message_type, channel_id)`; a second insert is reported
//! as [`StoreError::UniqueViolation`] and the caller decides whether that
//! means "already posted". Rows are never updated and disappear only with
//! their alert group.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Name of the uniqueness constraint on `mattermost_messages`.
pub const UNIQUE_MESSAGE_CONSTRAINT: &str = "unique_alert_group_message_type_channel_id";

/// Longest post or channel id the schema accepts.
const MAX_ID_LEN: usize = 100;

/// What a posted message represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// The main alert group message.
    AlertGroupMessage,
    /// The threaded log message.
    LogMessage,
}

impl MessageType {
    fn as_i64(self) -> i64 {
        match self {
            Self::AlertGroupMessage => 0,
            Self::LogMessage => 1,
        }
    }

    fn from_i64(value: i64) -> StoreResult<Self> {
        match value {
            0 => Ok(Self::AlertGroupMessage),
            1 => Ok(Self::LogMessage),
            other => Err(StoreError::InvalidArgument(format!(
                "unknown message type: {other}"
            ))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::AlertGroupMessage => "Alert group message",
            Self::LogMessage => "Log message",
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alert_group_message" | "alert-group-message" => Ok(Self::AlertGroupMessage),
            "log_message" | "log-message" => Ok(Self::LogMessage),
            other => Err(StoreError::InvalidArgument(format!(
                "unknown message type: {other}"
            ))),
        }
    }
}

/// Identifies a post in a Mattermost channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRef {
    pub post_id: String,
    pub channel_id: String,
}

/// A stored message link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MattermostMessage {
    pub id: i64,
    pub post_id: String,
    pub channel_id: String,
    pub message_type: MessageType,
    pub alert_group_id: String,
    pub created_at: i64,
}

/// Insert-only store for [`MattermostMessage`] rows.
#[derive(Clone)]
pub struct MessageLinkStore {
    db: Database,
}

const SELECT_COLUMNS: &str =
    "SELECT id, post_id, channel_id, message_type, alert_group_id, created_at FROM mattermost_messages";

impl MessageLinkStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a message that was just posted for `alert_group_id`.
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        alert_group_id: &str,
        post: &PostRef,
        message_type: MessageType,
    ) -> StoreResult<MattermostMessage> {
        for (what, value) in [("post id", &post.post_id), ("channel id", &post.channel_id)] {
            if value.is_empty() || value.chars().count() > MAX_ID_LEN {
                return Err(StoreError::InvalidArgument(format!(
                    "{what} must be 1..={MAX_ID_LEN} characters"
                )));
            }
        }

        let alert_group_id = alert_group_id.to_string();
        let post = post.clone();
        let now = Utc::now().timestamp();

        let message = self
            .db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO mattermost_messages (post_id, channel_id, message_type, alert_group_id, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        post.post_id,
                        post.channel_id,
                        message_type.as_i64(),
                        alert_group_id,
                        now
                    ],
                )
                .map_err(|e| {
                    if let rusqlite::Error::SqliteFailure(ref err, _) = e
                        && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
                    {
                        return StoreError::NotFound {
                            entity: "alert group",
                            id: alert_group_id.clone(),
                        };
                    }
                    StoreError::from_insert(e, UNIQUE_MESSAGE_CONSTRAINT)
                })?;

                Ok(MattermostMessage {
                    id: conn.last_insert_rowid(),
                    post_id: post.post_id,
                    channel_id: post.channel_id,
                    message_type,
                    alert_group_id,
                    created_at: now,
                })
            })
            .await?;

        debug!(
            alert_group_id = %message.alert_group_id,
            channel_id = %message.channel_id,
            post_id = %message.post_id,
            message_type = message.message_type.label(),
            "message link recorded"
        );
        Ok(message)
    }

    /// Reverse lookup from a known post (edits, reactions, replies).
    #[instrument(skip(self))]
    pub async fn get_by_post(
        &self,
        channel_id: &str,
        post_id: &str,
    ) -> StoreResult<Option<MattermostMessage>> {
        let channel_id = channel_id.to_string();
        let post_id = post_id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("{SELECT_COLUMNS} WHERE channel_id = ?1 AND post_id = ?2"),
                    rusqlite::params![channel_id, post_id],
                    MessageRow::from_row,
                );
                match result {
                    Ok(row) => row.into_message().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// Fetch the link for one `(alert_group, message_type, channel)` triple.
    #[instrument(skip(self))]
    pub async fn get(
        &self,
        alert_group_id: &str,
        message_type: MessageType,
        channel_id: &str,
    ) -> StoreResult<Option<MattermostMessage>> {
        let alert_group_id = alert_group_id.to_string();
        let channel_id = channel_id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!(
                        "{SELECT_COLUMNS} WHERE alert_group_id = ?1 AND message_type = ?2 AND channel_id = ?3"
                    ),
                    rusqlite::params![alert_group_id, message_type.as_i64(), channel_id],
                    MessageRow::from_row,
                );
                match result {
                    Ok(row) => row.into_message().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// All links for an alert group, oldest first.
    #[instrument(skip(self))]
    pub async fn list_for_alert_group(
        &self,
        alert_group_id: &str,
    ) -> StoreResult<Vec<MattermostMessage>> {
        let alert_group_id = alert_group_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{SELECT_COLUMNS} WHERE alert_group_id = ?1 ORDER BY created_at ASC, id ASC"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![alert_group_id], MessageRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows.into_iter().map(MessageRow::into_message).collect()
            })
            .await
    }
}

// ── row mapping ──────────────────────────────────────────────────────

struct MessageRow {
    id: i64,
    post_id: String,
    channel_id: String,
    message_type: i64,
    alert_group_id: String,
    created_at: i64,
}

impl MessageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            post_id: row.get(1)?,
            channel_id: row.get(2)?,
            message_type: row.get(3)?,
            alert_group_id: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_message(self) -> StoreResult<MattermostMessage> {
        Ok(MattermostMessage {
            id: self.id,
            post_id: self.post_id,
            channel_id: self.channel_id,
            message_type: MessageType::from_i64(self.message_type)?,
            alert_group_id: self.alert_group_id,
            created_at: self.created_at,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostRecords;

    async fn setup() -> (HostRecords, MessageLinkStore) {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let host = HostRecords::new(db.clone());
        host.upsert_alert_group("ag-1", "org-1").await.unwrap();
        (host, MessageLinkStore::new(db))
    }

    fn post(post_id: &str, channel_id: &str) -> PostRef {
        PostRef {
            post_id: post_id.into(),
            channel_id: channel_id.into(),
        }
    }

    #[tokio::test]
    async fn create_and_reverse_lookup() {
        let (_host, store) = setup().await;
        let created = store
            .create("ag-1", &post("p-1", "c-1"), MessageType::AlertGroupMessage)
            .await
            .unwrap();

        let found = store.get_by_post("c-1", "p-1").await.unwrap().unwrap();
        assert_eq!(found, created);
        assert!(store.get_by_post("c-2", "p-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_triple_is_unique_violation() {
        let (_host, store) = setup().await;
        store
            .create("ag-1", &post("p-1", "c-1"), MessageType::AlertGroupMessage)
            .await
            .unwrap();

        let err = store
            .create("ag-1", &post("p-2", "c-1"), MessageType::AlertGroupMessage)
            .await
            .unwrap_err();
        match err {
            StoreError::UniqueViolation { constraint } => {
                assert_eq!(constraint, UNIQUE_MESSAGE_CONSTRAINT);
            }
            other => panic!("expected unique violation, got {other}"),
        }
    }

    #[tokio::test]
    async fn different_type_or_channel_is_allowed() {
        let (_host, store) = setup().await;
        store
            .create("ag-1", &post("p-1", "c-1"), MessageType::AlertGroupMessage)
            .await
            .unwrap();
        store
            .create("ag-1", &post("p-2", "c-1"), MessageType::LogMessage)
            .await
            .unwrap();
        store
            .create("ag-1", &post("p-3", "c-2"), MessageType::AlertGroupMessage)
            .await
            .unwrap();

        let all = store.list_for_alert_group("ag-1").await.unwrap();
        assert_eq!(all.len(), 3);
        let log = store
            .get("ag-1", MessageType::LogMessage, "c-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(log.post_id, "p-2");
    }

    #[tokio::test]
    async fn unknown_alert_group_is_not_found() {
        let (_host, store) = setup().await;
        let err = store
            .create("missing", &post("p-1", "c-1"), MessageType::LogMessage)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::NotFound {
                entity: "alert group",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn oversized_ids_rejected() {
        let (_host, store) = setup().await;
        let long = "x".repeat(101);
        let err = store
            .create("ag-1", &post(&long, "c-1"), MessageType::LogMessage)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn id_length_counts_characters() {
        let (_host, store) = setup().await;
        // 100 characters, 300 bytes.
        let channel = "频".repeat(100);
        let created = store
            .create("ag-1", &post("p-1", &channel), MessageType::LogMessage)
            .await
            .unwrap();
        assert_eq!(created.channel_id, channel);
    }

    #[tokio::test]
    async fn links_cascade_with_alert_group() {
        let (host, store) = setup().await;
        store
            .create("ag-1", &post("p-1", "c-1"), MessageType::AlertGroupMessage)
            .await
            .unwrap();

        host.delete_alert_group("ag-1").await.unwrap();
        assert!(store.get_by_post("c-1", "p-1").await.unwrap().is_none());
    }

    #[test]
    fn message_type_parses_both_spellings() {
        assert_eq!(
            "alert-group-message".parse::<MessageType>().unwrap(),
            MessageType::AlertGroupMessage
        );
        assert_eq!("log_message".parse::<MessageType>().unwrap(), MessageType::LogMessage);
        assert!("reaction".parse::<MessageType>().is_err());
    }
}
