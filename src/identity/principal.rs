use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Authenticated identity as held by the session store and persisted under the identity key.
/// `id` may be empty when the server only identified the user by email.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Normalized role tag, empty when unknown.
    #[serde(default)]
    pub role: String,
    /// Remaining server fields, kept so `update()` merges and persistence stay lossless.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Identity {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
