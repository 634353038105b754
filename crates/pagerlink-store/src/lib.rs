//! # pagerlink-store
//!
//! SQLite persistence for pagerlink.
//!
//! Holds the single-use OAuth state tokens and the two Mattermost link
//! records: which posts were made for an alert group, and which internal
//! user each Mattermost identity belongs to.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  AuthTokenStore   (issue / redeem state tokens)     │
//! │  MessageLinkStore (mattermost_messages)             │
//! │  IdentityLinkStore(mattermost_users + moka cache)   │
//! │  HostRecords      (users / alert_groups anchors)    │
//! ├─────────────────────────────────────────────────────┤
//! │  Database (rusqlite WAL, foreign keys on)           │
//! │  Migrations (versioned, transactional)              │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use pagerlink_store::{Database, AuthTokenStore, TokenKind};
//!
//! let db = Database::open_and_migrate("data/pagerlink.db").await?;
//! let tokens = AuthTokenStore::new(db.clone());
//! let issued = tokens.issue(TokenKind::Slack, "user-1", "org-1").await?;
//! let grant = tokens.redeem(TokenKind::Slack, &issued.token).await?;
//! ```

pub mod auth_token;
pub mod cache;
pub mod db;
pub mod error;
pub mod host;
pub mod identity_link;
pub mod message_link;
pub mod migration;

// ── re-exports ───────────────────────────────────────────────────────

pub use auth_token::{AuthTokenStore, DEFAULT_TOKEN_TTL, IssuedToken, TokenGrant, TokenKind};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use host::{HostRecords, HostUser};
pub use identity_link::{ExternalIdentity, IdentityLinkStore, MattermostUser};
pub use message_link::{
    MattermostMessage, MessageLinkStore, MessageType, PostRef, UNIQUE_MESSAGE_CONSTRAINT,
};
