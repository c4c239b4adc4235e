use serde::Serialize;
use serde_json::Value;

use super::principal::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Lifecycle {
    Uninitialized,
    /// A credential was found without a cached identity and is being verified.
    Bootstrapping,
    Authenticated,
    Anonymous,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Uninitialized => "Uninitialized",
            Lifecycle::Bootstrapping => "Bootstrapping",
            Lifecycle::Authenticated => "Authenticated",
            Lifecycle::Anonymous => "Anonymous",
        }
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// The current session. Never mutated in place: every commit swaps in a whole new record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRecord {
    pub identity: Option<Identity>,
    pub credential: Option<String>,
    /// Always a valid 24 hex character id when present.
    pub business_ref: Option<String>,
    /// Last known business entity; may lag behind `business_ref`.
    pub business_snapshot: Option<Value>,
    pub lifecycle: Lifecycle,
}

impl SessionRecord {
    pub fn empty(lifecycle: Lifecycle) -> Self {
        Self { identity: None, credential: None, business_ref: None, business_snapshot: None, lifecycle }
    }

    pub fn is_authenticated(&self) -> bool { self.identity.is_some() }

    pub fn role(&self) -> Option<&str> { self.identity.as_ref().map(|i| i.role.as_str()) }
}

impl Default for SessionRecord {
    fn default() -> Self { Self::empty(Lifecycle::Uninitialized) }
}
