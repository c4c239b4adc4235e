//! Runtime configuration for the session subsystem.
//! Values come from `PORTAL_*` environment variables with hard defaults; anything
//! unparseable falls back to the default rather than failing startup.

use std::time::Duration;

/// Persisted key names. Canonical keys are authoritative; `legacy_*` keys mirror
/// them for readers that predate the `auth.` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub identity: String,
    pub credential: String,
    pub business_id: String,
    pub business: String,
    pub legacy_identity: String,
    pub legacy_credential: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            identity: "auth.user".into(),
            credential: "auth.token".into(),
            business_id: "auth.businessId".into(),
            business: "auth.business".into(),
            legacy_identity: "user".into(),
            legacy_credential: "token".into(),
        }
    }
}

impl StorageKeys {
    /// Compatibility writes executed alongside the canonical identity write.
    pub fn identity_mirrors(&self) -> [&str; 1] { [self.legacy_identity.as_str()] }

    /// Compatibility writes executed alongside the canonical credential write.
    pub fn credential_mirrors(&self) -> [&str; 1] { [self.legacy_credential.as_str()] }

    /// Every key owned by a session, canonical and legacy.
    pub fn all(&self) -> Vec<&str> {
        vec![
            self.identity.as_str(),
            self.credential.as_str(),
            self.business_id.as_str(),
            self.business.as_str(),
            self.legacy_identity.as_str(),
            self.legacy_credential.as_str(),
        ]
    }
}

/// Redirect targets handed to the routing layer by the access guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    pub login_path: String,
    pub unauthorized_path: String,
}

impl Default for GuardConfig {
    fn default() -> Self { Self { login_path: "/login".into(), unauthorized_path: "/unauthorized".into() } }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the backend that serves `/auth/*` and `/business/*`.
    pub api_base: String,
    /// Bound on the bootstrap `/auth/me` verification call.
    pub verify_timeout: Duration,
    /// Bound on every other outbound request.
    pub fetch_timeout: Duration,
    pub keys: StorageKeys,
    pub guard: GuardConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8080".into(),
            verify_timeout: Duration::from_millis(8_000),
            fetch_timeout: Duration::from_millis(10_000),
            keys: StorageKeys::default(),
            guard: GuardConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary variable source; `from_env` is this over the process environment.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let mut cfg = Self::default();
        if let Some(base) = lookup("PORTAL_API_BASE").filter(|s| !s.trim().is_empty()) {
            cfg.api_base = base.trim().trim_end_matches('/').to_string();
        }
        let ms = |k: &str| lookup(k).and_then(|s| s.trim().parse::<u64>().ok()).filter(|v| *v > 0);
        if let Some(v) = ms("PORTAL_VERIFY_TIMEOUT_MS") { cfg.verify_timeout = Duration::from_millis(v); }
        if let Some(v) = ms("PORTAL_FETCH_TIMEOUT_MS") { cfg.fetch_timeout = Duration::from_millis(v); }
        if let Some(p) = lookup("PORTAL_LOGIN_PATH").filter(|s| s.starts_with('/')) { cfg.guard.login_path = p; }
        if let Some(p) = lookup("PORTAL_UNAUTHORIZED_PATH").filter(|s| s.starts_with('/')) { cfg.guard.unauthorized_path = p; }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_unset() {
        let cfg = SessionConfig::from_lookup(|_| None);
        assert_eq!(cfg.api_base, "http://127.0.0.1:8080");
        assert_eq!(cfg.verify_timeout, Duration::from_millis(8_000));
        assert_eq!(cfg.guard.login_path, "/login");
        assert_eq!(cfg.keys.credential, "auth.token");
    }

    #[test]
    fn overrides_and_bad_values() {
        let env: HashMap<&str, &str> = [
            ("PORTAL_API_BASE", "https://api.example.test/"),
            ("PORTAL_VERIFY_TIMEOUT_MS", "250"),
            ("PORTAL_FETCH_TIMEOUT_MS", "not-a-number"),
            ("PORTAL_LOGIN_PATH", "signin"),
        ].into_iter().collect();
        let cfg = SessionConfig::from_lookup(|k| env.get(k).map(|s| s.to_string()));
        assert_eq!(cfg.api_base, "https://api.example.test");
        assert_eq!(cfg.verify_timeout, Duration::from_millis(250));
        assert_eq!(cfg.fetch_timeout, Duration::from_millis(10_000));
        // not an absolute path: ignored
        assert_eq!(cfg.guard.login_path, "/login");
    }

    #[test]
    fn key_lists_cover_legacy_mirrors() {
        let k = StorageKeys::default();
        assert_eq!(k.identity_mirrors(), ["user"]);
        assert_eq!(k.credential_mirrors(), ["token"]);
        assert_eq!(k.all().len(), 6);
    }
}
