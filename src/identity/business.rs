//! Best-effort business enrichment: resolve a referenced business id into a cached snapshot.
//! Failures never surface; the store simply keeps its last known-good snapshot.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};

use super::events::AuthEvent;
use super::payload::{business_id_from, is_valid_business_id};
use super::session::{Guard, SessionStore};

/// Handle to an in-flight enrichment. Dropping it does not cancel the fetch; `teardown` does.
pub struct EnrichmentTask(JoinHandle<()>);

impl EnrichmentTask {
    /// Wait for the fetch and (possible) commit to complete.
    pub async fn finished(self) {
        let _ = self.0.await;
    }

    pub fn abort(&self) { self.0.abort(); }
}

/// Some endpoints wrap the entity in `data` or `business`.
fn unwrap_entity(payload: Value) -> Value {
    for key in ["business", "data"] {
        if let Some(inner) = payload.get(key).filter(|v| business_id_from(v).is_some() && v.is_object()) {
            return inner.clone();
        }
    }
    payload
}

impl SessionStore {
    /// Resolve `input` (an id string, or an object exposing `id`/`_id`) into a business snapshot.
    /// Silently does nothing for anything that is not a valid 24 hex character id.
    pub fn load_business_data(self: &Arc<Self>, input: &Value) -> Option<EnrichmentTask> {
        let Some(id) = business_id_from(input).filter(|id| is_valid_business_id(id)) else {
            debug!(target: "portal::business", "load_business_data: {}", SessionError::MalformedIdentifier(input.to_string()));
            return None;
        };
        let generation = self.generation();
        self.spawn_enrichment(id, generation)
    }

    /// Re-fetch the business currently referenced by the session, if any.
    pub fn refresh_business(self: &Arc<Self>) -> Option<EnrichmentTask> {
        let id = self.business_ref()?;
        self.load_business_data(&Value::String(id))
    }

    pub(super) fn spawn_enrichment(self: &Arc<Self>, id: String, generation: u64) -> Option<EnrichmentTask> {
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            warn!(target: "portal::business", "no async runtime; business enrichment for {} skipped", id);
            return None;
        };
        let store = self.clone();
        let handle = rt.spawn(async move {
            if let Err(e) = store.enrich(&id, generation).await {
                debug!(target: "portal::business", "enrichment ignored: {}", e);
            }
        });
        self.track(&handle);
        Some(EnrichmentTask(handle))
    }

    async fn enrich(&self, id: &str, generation: u64) -> SessionResult<()> {
        let timeout = self.config.fetch_timeout;
        let fetched = match tokio::time::timeout(timeout, self.api.fetch_business(id)).await {
            Ok(r) => r,
            Err(_) => Err(SessionError::Timeout(timeout.as_millis() as u64)),
        };
        let entity = fetched.map(unwrap_entity).map_err(|e| SessionError::EnrichmentFailure { id: id.to_string(), message: e.to_string() })?;
        let canonical = business_id_from(&entity).filter(|c| is_valid_business_id(c)).unwrap_or_else(|| id.to_string());

        let committed = self.commit(
            Guard::AmendIfCurrent(generation),
            |prev| {
                prev.identity.as_ref()?;
                let mut next = prev.clone();
                next.business_ref = Some(canonical.clone());
                next.business_snapshot = Some(entity.clone());
                Some(next)
            },
            |store, next| store.persist_business(next.business_ref.as_deref(), next.business_snapshot.as_ref()),
        );
        match committed {
            Some(_) => {
                debug!(target: "portal::business", "business {} cached", canonical);
                self.events.emit(AuthEvent::BusinessUpdated { id: canonical });
            }
            None => debug!(target: "portal::business", "business {} resolved for a session that is gone; dropped", canonical),
        }
        Ok(())
    }
}
