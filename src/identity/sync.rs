//! Cross-tab synchronization: react to another tab's writes to the shared storage area.
//! Only two events matter: the credential being removed (treated as a logout performed
//! elsewhere) and the identity blob changing. Nothing here issues network calls or writes
//! storage back; last writer wins.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::storage::{StorageEvent, StorageEvents};

use super::payload::coerce_identity;
use super::record::{Lifecycle, SessionRecord};
use super::session::{Guard, SessionStore};

impl SessionStore {
    /// Apply one foreign storage event. Returns true when the in-memory session changed.
    pub fn apply_storage_event(&self, ev: &StorageEvent) -> bool {
        let keys = &self.config.keys;
        if ev.key == keys.credential && ev.new_value.is_none() {
            if self.lifecycle() == Lifecycle::Anonymous { return false; }
            info!(target: "portal::sync", "credential removed by tab {}; clearing local session", ev.source_tab);
            self.forget_locally();
            return true;
        }
        if ev.key == keys.identity {
            let parsed = ev
                .new_value
                .as_deref()
                .and_then(|text| serde_json::from_str::<Value>(text).ok())
                .and_then(|v| coerce_identity(&v));
            return match parsed {
                Some(identity) => {
                    debug!(target: "portal::sync", "identity replaced by tab {} (user={})", ev.source_tab, identity.id);
                    let credential = self.read_credential();
                    let (business_ref, business_snapshot) = self.read_business();
                    let committed = self.commit(
                        Guard::Replace,
                        |prev| {
                            let mut next = prev.clone();
                            next.identity = Some(identity);
                            next.credential = credential.clone().or_else(|| prev.credential.clone());
                            next.business_ref = business_ref;
                            next.business_snapshot = business_snapshot;
                            next.lifecycle = Lifecycle::Authenticated;
                            Some(next)
                        },
                        |_, _| {},
                    );
                    if let Some((record, _)) = committed { self.api.set_authorization(record.credential.as_deref()); }
                    true
                }
                None => {
                    if !self.is_authenticated() { return false; }
                    info!(target: "portal::sync", "identity cleared by tab {}", ev.source_tab);
                    self.forget_locally();
                    true
                }
            };
        }
        false
    }

    /// Drop the in-memory session without touching storage or the network.
    fn forget_locally(&self) {
        self.commit(Guard::Replace, |_| Some(SessionRecord::empty(Lifecycle::Anonymous)), |_, _| {});
        self.api.set_authorization(None);
    }

    /// Drive `apply_storage_event` from this tab's storage subscription until it closes.
    pub fn spawn_cross_tab_sync(self: &Arc<Self>, mut events: StorageEvents) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(ev) = events.recv().await {
                let Some(store) = weak.upgrade() else { break };
                store.apply_storage_event(&ev);
            }
            debug!(target: "portal::sync", "storage subscription closed");
        })
    }
}
