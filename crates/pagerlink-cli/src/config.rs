//! Application configuration.
//!
//! Reads `config/default.toml`, then lets environment variables (usually
//! from `.env`) override secrets and deployment-specific values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use pagerlink_auth::AuthConfig;
use pagerlink_auth::config::{GoogleConfig, MattermostConfig, SlackConfig};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/pagerlink.db")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthTokenSection {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for AuthTokenSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackSection {
    /// Public base URL providers redirect to.
    #[serde(default = "default_redirect_base_url")]
    pub redirect_base_url: String,
    /// Port the `login` command listens on.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CallbackSection {
    fn default() -> Self {
        Self {
            redirect_base_url: default_redirect_base_url(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_redirect_base_url() -> String {
    "http://127.0.0.1:8400".to_string()
}

fn default_port() -> u16 {
    8400
}

fn default_timeout_secs() -> u64 {
    pagerlink_auth::DEFAULT_CALLBACK_TIMEOUT_SECS
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub auth_tokens: AuthTokenSection,
    #[serde(default)]
    pub callback: CallbackSection,
    #[serde(default)]
    pub google: Option<GoogleConfig>,
    #[serde(default)]
    pub slack: Option<SlackConfig>,
    #[serde(default)]
    pub mattermost: Option<MattermostConfig>,
}

impl AppConfig {
    /// Load `path`, falling back to defaults when the file does not exist,
    /// then apply process environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content)
                .with_context(|| format!("invalid config file {}", path.display()))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Override values from environment variables.
    ///
    /// A provider section that is absent from the file is created when the
    /// environment supplies everything it needs.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = var("PAGERLINK_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }

        let google_id = var("GOOGLE_OAUTH2_CLIENT_ID");
        let google_secret = var("GOOGLE_OAUTH2_CLIENT_SECRET");
        match self.google.as_mut() {
            Some(google) => {
                if let Some(id) = google_id {
                    google.client_id = id;
                }
                if let Some(secret) = google_secret {
                    google.client_secret = secret;
                }
            }
            None => {
                if let (Some(id), Some(secret)) = (google_id, google_secret) {
                    self.google = Some(GoogleConfig::new(id, secret));
                }
            }
        }

        let slack_id = var("SLACK_CLIENT_OAUTH_ID");
        let slack_secret = var("SLACK_CLIENT_OAUTH_SECRET");
        match self.slack.as_mut() {
            Some(slack) => {
                if let Some(id) = slack_id {
                    slack.client_id = id;
                }
                if let Some(secret) = slack_secret {
                    slack.client_secret = secret;
                }
            }
            None => {
                if let (Some(id), Some(secret)) = (slack_id, slack_secret) {
                    self.slack = Some(SlackConfig::new(id, secret));
                }
            }
        }

        let mm_host = var("MATTERMOST_HOST");
        let mm_id = var("MATTERMOST_CLIENT_OAUTH_ID");
        let mm_secret = var("MATTERMOST_CLIENT_OAUTH_SECRET");
        match self.mattermost.as_mut() {
            Some(mm) => {
                if let Some(host) = mm_host {
                    mm.host = host;
                }
                if let Some(id) = mm_id {
                    mm.client_id = id;
                }
                if let Some(secret) = mm_secret {
                    mm.client_secret = secret;
                }
            }
            None => {
                if let (Some(host), Some(id), Some(secret)) = (mm_host, mm_id, mm_secret) {
                    self.mattermost = Some(MattermostConfig::new(host, id, secret));
                }
            }
        }
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.auth_tokens.ttl_secs)
    }

    /// Provider settings for [`pagerlink_auth::AuthManager`].
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            redirect_base_url: self.callback.redirect_base_url.clone(),
            google: self.google.clone(),
            slack: self.slack.clone(),
            mattermost: self.mattermost.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
