//! Error types for the auth crate.
//!
//! All adapter and manager operations surface errors through [`AuthError`].
//! Transport failures are carried unchanged in [`AuthError::NetworkError`];
//! provider-specific failure conventions are normalized into the other
//! variants at the adapter boundary.

/// Unified error type for the pagerlink auth crate.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// An HTTP request to a provider failed (transport or non-2xx status).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// An error propagated from the store crate.
    #[error("store error: {0}")]
    Store(#[from] pagerlink_store::StoreError),

    /// Configuration is missing or malformed.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The backend identifier is not one we know.
    #[error("unknown backend: {name}")]
    UnknownBackend { name: String },

    /// The backend is known but not configured.
    #[error("provider not configured: {backend}")]
    ProviderNotFound { backend: String },

    /// No authenticated user / organization was available to bind the
    /// state token to.
    #[error("missing authorization context: no authenticated user and organization")]
    MissingAuthContext,

    /// The callback's state token was absent, unknown, expired, or used.
    #[error("invalid state token: {reason}")]
    InvalidState { reason: String },

    /// A required callback parameter is missing.
    #[error("missing callback parameter: {name}")]
    MissingParameter { name: String },

    /// The user (or provider) refused authorization; the callback carried
    /// an `error` parameter.
    #[error("{backend} authorization denied: {error}")]
    ProviderDenied {
        backend: String,
        error: String,
        description: Option<String>,
    },

    /// The token endpoint rejected the authorization code.
    #[error("invalid grant: {reason}")]
    InvalidGrant { reason: String },

    /// The provider answered HTTP 200 but reported failure in the body
    /// (Slack's `ok: false`).
    #[error("{provider} api error: {error}")]
    Provider {
        provider: &'static str,
        error: String,
    },

    /// The provider response lacked a field we depend on.
    #[error("malformed provider response: {reason}")]
    MalformedResponse { reason: String },

    /// Fetching the Mattermost user failed (invalid token or API error).
    #[error(
        "error while trying to fetch mattermost user: {message} status: {}",
        .status.map_or_else(|| "unknown".to_string(), |s| s.to_string())
    )]
    MattermostLogin {
        message: String,
        status: Option<u16>,
    },

    /// The local callback listener timed out waiting for the redirect.
    #[error("callback timed out after {timeout_secs} seconds")]
    CallbackTimeout { timeout_secs: u64 },

    /// The overall authentication flow failed for a non-specific reason.
    #[error("authentication flow failed: {reason}")]
    FlowFailed { reason: String },

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (e.g. from the callback TCP listener).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
