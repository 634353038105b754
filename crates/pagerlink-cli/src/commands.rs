//! Subcommand implementations.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use pagerlink_auth::{
    AuthContext, AuthFinalizer, AuthManager, Backend, CallbackParams, CompletedAuth,
    MattermostIdentityLinker,
};
use pagerlink_store::{
    AuthTokenStore, Database, HostRecords, IdentityLinkStore, MessageLinkStore, MessageType,
    PostRef,
};
use serde::Serialize;
use tracing::info;

use crate::cli::{HostAction, IdentityAction, MessageAction, TokenAction};
use crate::config::AppConfig;

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

async fn open_database(config: &AppConfig) -> Result<Database> {
    let path = config.database.path.clone();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    Database::open_and_migrate(path.clone())
        .await
        .with_context(|| format!("opening database {}", path.display()))
}

fn auth_manager(config: &AppConfig, db: &Database) -> Result<AuthManager> {
    let tokens = Arc::new(AuthTokenStore::new(db.clone()).with_ttl(config.token_ttl()));
    AuthManager::from_config(&config.auth_config(), tokens).context("configuring providers")
}

fn parse_backend(name: &str) -> Result<Backend> {
    Ok(name.parse::<Backend>()?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// What we print for a completed flow. Tokens stay out of stdout.
#[derive(Serialize)]
struct CompletedSummary<'a> {
    backend: Backend,
    context: &'a AuthContext,
    profile: &'a pagerlink_auth::NormalizedProfile,
    #[serde(skip_serializing_if = "Option::is_none")]
    team: Option<&'a serde_json::Value>,
}

impl<'a> From<&'a CompletedAuth> for CompletedSummary<'a> {
    fn from(completed: &'a CompletedAuth) -> Self {
        Self {
            backend: completed.backend,
            context: &completed.context,
            profile: &completed.profile,
            team: completed.response.get("team"),
        }
    }
}

// ---------------------------------------------------------------------------
// migrate
// ---------------------------------------------------------------------------

pub async fn migrate(config: &AppConfig) -> Result<()> {
    let db = open_database(config).await?;
    let version = db.execute(pagerlink_store::migration::current_version).await?;
    info!(path = %config.database.path.display(), version, "database is up to date");
    Ok(())
}

// ---------------------------------------------------------------------------
// OAuth flows
// ---------------------------------------------------------------------------

pub async fn authorize(config: &AppConfig, backend: &str, user: &str, org: &str) -> Result<()> {
    let backend = parse_backend(backend)?;
    let db = open_database(config).await?;
    let manager = auth_manager(config, &db)?;

    let ctx = AuthContext::new(user, org);
    let request = manager.begin(backend, Some(&ctx)).await?;
    println!("{}", request.url);
    Ok(())
}

pub async fn complete(config: &AppConfig, backend: &str, callback_url: &str) -> Result<()> {
    let backend = parse_backend(backend)?;
    let db = open_database(config).await?;
    let manager = auth_manager(config, &db)?;
    let linker = MattermostIdentityLinker::new(IdentityLinkStore::new(db.clone()));

    let callback = CallbackParams::from_url(callback_url).context("parsing callback url")?;
    let completed = manager.complete_with(backend, &callback, &linker).await?;
    print_json(&CompletedSummary::from(&completed))
}

pub async fn login(
    config: &AppConfig,
    backend: &str,
    user: &str,
    org: &str,
    port: Option<u16>,
) -> Result<()> {
    let backend = parse_backend(backend)?;
    let db = open_database(config).await?;
    let manager = auth_manager(config, &db)?;
    let linker = MattermostIdentityLinker::new(IdentityLinkStore::new(db.clone()));
    let finalizer: &dyn AuthFinalizer = &linker;

    let ctx = AuthContext::new(user, org);
    let port = port.unwrap_or(config.callback.port);
    let completed = manager
        .authenticate_local(backend, &ctx, port, config.callback.timeout_secs, finalizer)
        .await?;
    print_json(&CompletedSummary::from(&completed))
}

// ---------------------------------------------------------------------------
// host
// ---------------------------------------------------------------------------

pub async fn host(config: &AppConfig, action: HostAction) -> Result<()> {
    let db = open_database(config).await?;
    let records = HostRecords::new(db);

    match action {
        HostAction::AddUser { id, org } => {
            records.upsert_user(&id, &org).await?;
            println!("user {id} saved");
        }
        HostAction::AddAlertGroup { id, org } => {
            records.upsert_alert_group(&id, &org).await?;
            println!("alert group {id} saved");
        }
        HostAction::RemoveUser { id } => {
            records.delete_user(&id).await?;
            println!("user {id} removed");
        }
        HostAction::RemoveAlertGroup { id } => {
            records.delete_alert_group(&id).await?;
            println!("alert group {id} removed");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// messages
// ---------------------------------------------------------------------------

pub async fn messages(config: &AppConfig, action: MessageAction) -> Result<()> {
    let db = open_database(config).await?;
    let store = MessageLinkStore::new(db);

    match action {
        MessageAction::Record {
            alert_group,
            channel,
            post,
            message_type,
        } => {
            let message_type: MessageType = message_type.parse()?;
            let post = PostRef {
                post_id: post,
                channel_id: channel,
            };
            let created = match store.create(&alert_group, &post, message_type).await {
                Ok(created) => created,
                Err(err) if err.is_unique_violation() => {
                    bail!(
                        "a {} is already recorded for alert group {alert_group} in channel {}",
                        message_type.label().to_lowercase(),
                        post.channel_id
                    );
                }
                Err(err) => return Err(err.into()),
            };
            print_json(&created)?;
        }
        MessageAction::Lookup { channel, post } => match store.get_by_post(&channel, &post).await? {
            Some(message) => print_json(&message)?,
            None => bail!("no message recorded for post {post} in channel {channel}"),
        },
        MessageAction::List { alert_group } => {
            print_json(&store.list_for_alert_group(&alert_group).await?)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// identities
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct IdentityView<'a> {
    #[serde(flatten)]
    link: &'a pagerlink_store::MattermostUser,
    mention: String,
}

pub async fn identities(config: &AppConfig, action: IdentityAction) -> Result<()> {
    let db = open_database(config).await?;
    let store = IdentityLinkStore::new(db);

    let (link, what) = match action {
        IdentityAction::Show { user } => (store.get_by_user(&user).await?, format!("user {user}")),
        IdentityAction::Lookup { mattermost_user_id } => (
            store.get_by_mattermost_user_id(&mattermost_user_id).await?,
            format!("mattermost user {mattermost_user_id}"),
        ),
    };

    match link {
        Some(link) => print_json(&IdentityView {
            mention: link.mention_username(),
            link: &link,
        }),
        None => bail!("no identity link for {what}"),
    }
}

// ---------------------------------------------------------------------------
// tokens
// ---------------------------------------------------------------------------

pub async fn tokens(config: &AppConfig, action: TokenAction) -> Result<()> {
    let db = open_database(config).await?;
    match action {
        TokenAction::Purge => {
            let purged = AuthTokenStore::new(db).purge_expired().await?;
            info!(purged, "state tokens purged");
            println!("{purged} token(s) purged");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &tempfile::TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.database.path = dir.path().join("nested").join("pagerlink.db");
        config
    }

    #[tokio::test]
    async fn open_database_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        open_database(&config).await.unwrap();
        assert!(config.database.path.exists());
    }

    #[tokio::test]
    async fn authorize_without_provider_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        let err = authorize(&config, "slack-login", "u-1", "org-1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("provider not configured"));
    }

    #[tokio::test]
    async fn unknown_backend_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = authorize(&config_in(&dir), "github", "u-1", "org-1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown backend"));
    }

    #[tokio::test]
    async fn duplicate_message_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        host(
            &config,
            HostAction::AddAlertGroup {
                id: "ag-1".into(),
                org: "org-1".into(),
            },
        )
        .await
        .unwrap();

        let record = || MessageAction::Record {
            alert_group: "ag-1".into(),
            channel: "c-1".into(),
            post: "p-1".into(),
            message_type: "log-message".into(),
        };
        messages(&config, record()).await.unwrap();
        let err = messages(&config, record()).await.unwrap_err();
        assert!(err.to_string().contains("already recorded"));
    }
}
