//! Startup verification of a persisted credential that has no cached identity.
//! Runs at most once per store; the outcome is committed only if no explicit
//! login/logout/sync replaced the session while `/auth/me` was in flight.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};

use super::payload::parse_identity;
use super::record::{Lifecycle, SessionRecord};
use super::session::{Guard, SessionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Latch already tripped, or the store was not waiting on verification.
    Skipped,
    Verified,
    /// Verification failed; the session was cleared.
    Rejected,
    /// An explicit action changed the session first; the result was discarded.
    Superseded,
}

impl SessionStore {
    /// Run `bootstrap` in the background. `None` when the latch has already tripped.
    pub fn spawn_bootstrap(self: &Arc<Self>) -> Option<JoinHandle<BootstrapOutcome>> {
        if self.bootstrap_latch.load(Ordering::Acquire) { return None; }
        let rt = tokio::runtime::Handle::try_current().ok()?;
        let store = self.clone();
        Some(rt.spawn(async move { store.bootstrap().await }))
    }

    pub async fn bootstrap(self: &Arc<Self>) -> BootstrapOutcome {
        if self.bootstrap_latch.swap(true, Ordering::AcqRel) {
            return BootstrapOutcome::Skipped;
        }
        if self.lifecycle() == Lifecycle::Uninitialized { self.initialize(); }
        let generation = self.generation();
        let start = self.snapshot();
        // initialize() only enters Bootstrapping for a credential without a cached identity
        if start.lifecycle != Lifecycle::Bootstrapping { return BootstrapOutcome::Skipped; }
        let Some(credential) = start.credential.clone().or_else(|| self.read_credential()) else {
            self.clear_if_current(generation);
            return BootstrapOutcome::Skipped;
        };

        self.api.set_authorization(Some(&credential));
        debug!(target: "portal::bootstrap", "verifying stored credential (generation {})", generation);

        let verified = self.verify().await.and_then(|payload| {
            let identity = parse_identity(&payload)
                .ok_or_else(|| SessionError::InvalidCredentialResponse("no id or email in /auth/me payload".into()))?;
            Ok((payload, identity))
        });

        match verified {
            Ok((payload, identity)) => {
                let business = Self::valid_business_ref(&payload);
                let committed = self.commit(
                    Guard::ReplaceIfCurrent(generation),
                    |prev| {
                        let (business_ref, business_snapshot) = Self::business_for(prev, business.as_ref());
                        Some(SessionRecord {
                            identity: Some(identity),
                            credential: Some(credential.clone()),
                            business_ref,
                            business_snapshot,
                            lifecycle: Lifecycle::Authenticated,
                        })
                    },
                    |store, next| {
                        if let Some(ident) = next.identity.as_ref() { store.persist_identity(ident); }
                        store.persist_business(next.business_ref.as_deref(), next.business_snapshot.as_ref());
                    },
                );
                let Some((record, new_generation)) = committed else {
                    info!(target: "portal::bootstrap", "verification succeeded after the session changed; discarded");
                    return BootstrapOutcome::Superseded;
                };
                info!(target: "portal::bootstrap", "credential verified, lifecycle=Authenticated");
                if let Some(id) = record.business_ref.clone() {
                    // fire and forget
                    let _ = self.spawn_enrichment(id, new_generation);
                }
                BootstrapOutcome::Verified
            }
            Err(e) => {
                warn!(target: "portal::bootstrap", "credential verification failed: {}", e);
                if self.clear_if_current(generation) {
                    BootstrapOutcome::Rejected
                } else {
                    BootstrapOutcome::Superseded
                }
            }
        }
    }

    async fn verify(&self) -> SessionResult<Value> {
        let timeout = self.config.verify_timeout;
        match tokio::time::timeout(timeout, self.api.who_am_i()).await {
            Ok(r) => r,
            Err(_) => Err(SessionError::Timeout(timeout.as_millis() as u64)),
        }
    }
}
