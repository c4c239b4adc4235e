use crate::config::GuardConfig;

use super::record::{Lifecycle, SessionRecord};
use super::role::RoleQuery;
use super::session::SessionStore;

/// What the routing layer should do with a protected route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session not settled yet; show a pending indicator.
    Loading,
    /// Send to the login entry point.
    Unauthenticated,
    /// Send to the restricted-access view with an optional reason tag.
    Unauthorized { reason: Option<String> },
    Authorized,
}

impl GuardDecision {
    /// Where to redirect, if anywhere.
    pub fn redirect_target(&self, cfg: &GuardConfig) -> Option<String> {
        match self {
            GuardDecision::Unauthenticated => Some(cfg.login_path.clone()),
            GuardDecision::Unauthorized { reason: Some(r) } => {
                Some(format!("{}?reason={}", cfg.unauthorized_path, urlencoding::encode(r)))
            }
            GuardDecision::Unauthorized { reason: None } => Some(cfg.unauthorized_path.clone()),
            GuardDecision::Loading | GuardDecision::Authorized => None,
        }
    }
}

/// Pure read of `record` against the required roles. Pass `AnyRole` for routes that only
/// need a signed-in identity; an empty role set admits nobody.
pub fn evaluate<Q: RoleQuery + ?Sized>(record: &SessionRecord, required: &Q) -> GuardDecision {
    if record.lifecycle == Lifecycle::Bootstrapping {
        return GuardDecision::Loading;
    }
    let Some(identity) = record.identity.as_ref() else { return GuardDecision::Unauthenticated };
    if required.includes(&identity.role) {
        return GuardDecision::Authorized;
    }
    let reason = if identity.role.is_empty() { "missing_role" } else { "insufficient_role" };
    GuardDecision::Unauthorized { reason: Some(reason.to_string()) }
}

impl SessionStore {
    pub fn guard<Q: RoleQuery + ?Sized>(&self, required: &Q) -> GuardDecision {
        evaluate(&self.snapshot(), required)
    }
}
