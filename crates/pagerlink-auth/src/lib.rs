//! OAuth provider adapters for pagerlink.
//!
//! Lets a user sign in with, or install the product into, a third-party
//! provider:
//!
//! - **Google** login (`google-oauth2`)
//! - **Slack** login (`slack-login`) and workspace install (`slack-install-free`)
//! - **Mattermost** login against a self-hosted server (`mattermost-login`)
//!
//! Every flow is bound to the user that started it through a single-use
//! state token from [`pagerlink_store::AuthTokenStore`], redeemed when the
//! provider redirects back.
//!
//! # Architecture
//!
//! ```text
//! AuthManager
//! ├── ProviderRegistry     (Backend → dyn OAuthProvider)
//! │   ├── GoogleProvider
//! │   ├── SlackProvider    (Login | Install)
//! │   └── MattermostProvider ── MattermostClient
//! ├── StateTokenStore      (issue / redeem)
//! ├── CallbackServer       (local HTTP listener)
//! └── AuthFinalizer        (e.g. MattermostIdentityLinker)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pagerlink_auth::{AuthConfig, AuthContext, AuthManager, Backend, CallbackParams};
//! use pagerlink_auth::config::SlackConfig;
//! use pagerlink_store::{AuthTokenStore, Database};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let db = Database::open_and_migrate("data/pagerlink.db").await?;
//! let config = AuthConfig {
//!     slack: Some(SlackConfig::new("client-id", "client-secret")),
//!     ..Default::default()
//! };
//! let manager = AuthManager::from_config(&config, Arc::new(AuthTokenStore::new(db)))?;
//!
//! let ctx = AuthContext::new("user-1", "org-1");
//! let request = manager.begin(Backend::SlackLogin, Some(&ctx)).await?;
//! println!("visit {}", request.url);
//!
//! // ... later, from the redirect:
//! let callback = CallbackParams::from_url("https://example.com/complete/slack-login/?slack_login_token=t&code=c")?;
//! let completed = manager.complete(Backend::SlackLogin, &callback).await?;
//! println!("signed in as {:?}", completed.profile.user.email);
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod config;
pub mod context;
pub mod error;
pub mod finalize;
pub mod manager;
pub mod mattermost_client;
pub mod oauth;
pub mod profile;
pub mod providers;
pub mod state;

// Re-export key types at the crate root for convenience.
pub use callback::CallbackServer;
pub use config::AuthConfig;
pub use context::{AuthContext, CallbackParams};
pub use error::{AuthError, Result};
pub use finalize::{AuthFinalizer, MattermostIdentityLinker, NoopFinalizer};
pub use manager::{AuthManager, CompletedAuth, DEFAULT_CALLBACK_TIMEOUT_SECS};
pub use mattermost_client::{MattermostApiError, MattermostClient, MattermostUserInfo};
pub use profile::{NormalizedProfile, ProfileUser};
pub use providers::{AuthorizationRequest, Backend, OAuthProvider, ProviderRegistry};
pub use state::StateTokenStore;
