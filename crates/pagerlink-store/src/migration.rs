//! Schema migration system.
//!
//! Migrations are stored as static SQL strings keyed by version number.
//! The current version is tracked in a `_migrations` table so migrations
//! are idempotent and only run once.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    /// Monotonically increasing version number (1, 2, 3, ...).
    version: u32,
    description: &'static str,
    /// Raw SQL to execute. May contain multiple statements separated by `;`.
    sql: &'static str,
}

/// All migrations in order. Add new migrations to the end of this array.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "host anchors: users and alert groups mirrored from the host",
        sql: r#"
            CREATE TABLE users (
                id              TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                created_at      INTEGER NOT NULL
            );
            CREATE INDEX idx_users_organization ON users(organization_id);

            CREATE TABLE alert_groups (
                id              TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                created_at      INTEGER NOT NULL
            );
            CREATE INDEX idx_alert_groups_organization ON alert_groups(organization_id);
        "#,
    },
    Migration {
        version: 2,
        description: "auth_tokens: single-use OAuth state tokens",
        sql: r#"
            CREATE TABLE auth_tokens (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                kind            TEXT NOT NULL CHECK(kind IN ('google','slack','mattermost')),
                token_key       TEXT NOT NULL,
                digest          TEXT NOT NULL UNIQUE,
                user_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                organization_id TEXT NOT NULL,
                created_at      INTEGER NOT NULL,
                expires_at      INTEGER NOT NULL,
                redeemed_at     INTEGER
            );
            CREATE INDEX idx_auth_tokens_key ON auth_tokens(token_key);
            CREATE INDEX idx_auth_tokens_user ON auth_tokens(user_id);
        "#,
    },
    Migration {
        version: 3,
        description: "mattermost_messages: posts made on behalf of alert groups",
        sql: r#"
            CREATE TABLE mattermost_messages (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id        TEXT NOT NULL CHECK(length(post_id) <= 100),
                channel_id     TEXT NOT NULL CHECK(length(channel_id) <= 100),
                message_type   INTEGER NOT NULL CHECK(message_type IN (0, 1)),
                alert_group_id TEXT NOT NULL REFERENCES alert_groups(id) ON DELETE CASCADE,
                created_at     INTEGER NOT NULL,
                CONSTRAINT unique_alert_group_message_type_channel_id
                    UNIQUE (alert_group_id, message_type, channel_id)
            );
            CREATE INDEX idx_mattermost_messages_channel_post
                ON mattermost_messages(channel_id, post_id);

            -- created_at is set once
            CREATE TRIGGER mattermost_messages_immutable
            BEFORE UPDATE ON mattermost_messages
            BEGIN
                SELECT RAISE(ABORT, 'mattermost_messages rows are immutable');
            END;
        "#,
    },
    Migration {
        version: 4,
        description: "mattermost_users: one external identity per internal user",
        sql: r#"
            CREATE TABLE mattermost_users (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id            TEXT NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                mattermost_user_id TEXT NOT NULL CHECK(length(mattermost_user_id) <= 100),
                username           TEXT NOT NULL CHECK(length(username) <= 100),
                nickname           TEXT CHECK(nickname IS NULL OR length(nickname) <= 100),
                created_at         INTEGER NOT NULL
            );
            CREATE INDEX idx_mattermost_users_mattermost_user_id
                ON mattermost_users(mattermost_user_id);
        "#,
    },
];

// ── public API ───────────────────────────────────────────────────────

/// Run all pending migrations against `conn`.
///
/// This is a **synchronous** function: call it from `spawn_blocking`.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(
        current_version = current,
        pending = pending.len(),
        "running pending migrations"
    );

    for migration in pending {
        apply(conn, migration)?;
    }

    info!(
        new_version = MIGRATIONS.last().map(|m| m.version).unwrap_or(0),
        "all migrations applied"
    );
    Ok(())
}

/// Return the latest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    let version: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::Migration {
            version: 0,
            message: format!("failed to read current version: {e}"),
        })?;
    Ok(version)
}

// ── internals ────────────────────────────────────────────────────────

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })?;
    Ok(())
}

/// Apply a single migration inside a transaction.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    // `conn.transaction()` needs `&mut Connection`, so BEGIN/COMMIT by hand.
    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("failed to begin transaction: {e}"),
        })?;

    let result = (|| -> StoreResult<()> {
        conn.execute_batch(migration.sql)
            .map_err(|e| StoreError::Migration {
                version: migration.version,
                message: format!("SQL execution failed: {e}"),
            })?;

        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.version, migration.description, now],
        )
        .map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("failed to record migration: {e}"),
        })?;

        Ok(())
    })();

    match &result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")
                .map_err(|e| StoreError::Migration {
                    version: migration.version,
                    message: format!("failed to commit: {e}"),
                })?;
            debug!(version = migration.version, "migration applied");
        }
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
        }
    }

    result
}

// ── tests ────────────────────────────────────────────────────────────
