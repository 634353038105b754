//! Provider-independent user profile.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The user as a provider described them, reduced to the fields the host
/// cares about. Absent fields are omitted when serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// `{ user: {...}, team?: {...} }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedProfile {
    pub user: ProfileUser,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<Value>,
}

impl NormalizedProfile {
    /// Merge into a token response: profile keys overwrite response keys,
    /// except that `access_token` is filled only when the response lacks it.
    pub fn merge_into(&self, response: &mut Map<String, Value>, access_token: &str) {
        response.insert(
            "user".to_string(),
            serde_json::to_value(&self.user).unwrap_or(Value::Null),
        );
        if let Some(ref team) = self.team {
            response.insert("team".to_string(), team.clone());
        }
        response
            .entry("access_token".to_string())
            .or_insert_with(|| Value::String(access_token.to_string()));
    }
}

/// Read a non-empty string at `key` of a JSON object.
pub(crate) fn str_at(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
