//! Request-scoped inputs to an OAuth flow.
//!
//! [`AuthContext`] is who the flow runs on behalf of; [`CallbackParams`] is
//! everything the provider sent back on the redirect.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, Result};

/// The authenticated internal user and organization that start a flow.
///
/// State tokens are bound to this pair at issue time and the pair is
/// recovered when the token is redeemed on the callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: String,
    pub organization_id: String,
}

impl AuthContext {
    pub fn new(user_id: impl Into<String>, organization_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
        }
    }

    /// Unwrap an optional context, failing with
    /// [`AuthError::MissingAuthContext`] when absent or blank.
    pub fn require(ctx: Option<&AuthContext>) -> Result<&AuthContext> {
        match ctx {
            Some(ctx) if !ctx.user_id.is_empty() && !ctx.organization_id.is_empty() => Ok(ctx),
            _ => Err(AuthError::MissingAuthContext),
        }
    }
}

/// Query parameters received on the OAuth redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    params: BTreeMap<String, String>,
}

impl CallbackParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw query string (`code=...&state=...`, no leading `?`).
    ///
    /// When a key repeats, the first occurrence wins.
    pub fn from_query(query: &str) -> Self {
        let mut params = BTreeMap::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        Self { params }
    }

    /// Parse the query of a full callback URL.
    pub fn from_url(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        Ok(Self::from_query(url.query().unwrap_or_default()))
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Fetch a parameter that must be present and non-empty.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AuthError::MissingParameter {
                name: key.to_string(),
            })
    }

    /// The authorization code.
    pub fn code(&self) -> Result<&str> {
        self.require("code")
    }

    /// The provider's `error` parameter, if the user refused or the
    /// provider failed before issuing a code.
    pub fn error(&self) -> Option<&str> {
        self.get("error").filter(|v| !v.is_empty())
    }

    pub fn error_description(&self) -> Option<&str> {
        self.get("error_description")
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
