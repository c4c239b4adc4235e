use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info};

use crate::api::IdentityApi;
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::storage::{Persistence, StorageEvents, TabStorage};
use crate::tprintln;

use super::business::EnrichmentTask;
use super::events::{AuthEvent, AuthEvents};
use super::payload::{coerce_identity, merge_identity, probe_business_ref, BusinessRef};
use super::principal::Identity;
use super::record::{Lifecycle, SessionRecord};
use super::role::RoleQuery;

struct Current {
    record: Arc<SessionRecord>,
    /// Bumped by every identity-replacing commit. Async work captures it and only
    /// commits if it is still current.
    generation: u64,
}

/// Owner of the session record. All writes go through `commit`, which swaps the whole
/// record under one lock and writes persistence before the lock is released.
pub struct SessionStore {
    current: RwLock<Current>,
    pub(super) persistence: Persistence,
    pub(super) api: Arc<dyn IdentityApi>,
    pub(super) events: AuthEvents,
    pub(super) config: SessionConfig,
    pub(super) bootstrap_latch: AtomicBool,
    background: Mutex<Vec<AbortHandle>>,
}

/// Controls how a commit interacts with the generation counter.
#[derive(Clone, Copy)]
pub(super) enum Guard {
    /// Unconditional; the commit replaces identity and bumps the generation.
    Replace,
    /// Only if the generation still equals the captured one; bumps on success.
    ReplaceIfCurrent(u64),
    /// Only if the generation still equals the captured one; does not bump.
    AmendIfCurrent(u64),
    /// Unconditional, no bump (profile updates).
    Amend,
}

impl SessionStore {
    pub fn new(persistence: Persistence, api: Arc<dyn IdentityApi>, events: AuthEvents, config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            current: RwLock::new(Current { record: Arc::new(SessionRecord::default()), generation: 0 }),
            persistence,
            api,
            events,
            config,
            bootstrap_latch: AtomicBool::new(false),
            background: Mutex::new(Vec::new()),
        })
    }

    /// Store writing through one tab's view of the origin storage.
    pub fn for_tab(tab: &TabStorage, api: Arc<dyn IdentityApi>, events: AuthEvents, config: SessionConfig) -> Arc<Self> {
        Self::new(Persistence::new(Arc::new(tab.clone())), api, events, config)
    }

    /// Application startup: load persisted state, then run the background pieces
    /// (bootstrap verification, cross-tab sync on `storage_events`, session-expiry watcher).
    pub fn start(self: &Arc<Self>, storage_events: StorageEvents) {
        self.initialize();
        if let Some(h) = self.spawn_bootstrap() { self.track(&h); }
        let sync = self.spawn_cross_tab_sync(storage_events);
        self.track(&sync);
        let expiry = self.watch_expiry();
        self.track(&expiry);
    }

    /// Abort every background task this store owns, in-flight enrichment included.
    /// The record itself is left as is.
    pub fn teardown(&self) {
        let handles: Vec<AbortHandle> = std::mem::take(&mut *self.background.lock());
        debug!(target: "portal::session", "teardown: aborting {} background tasks", handles.len());
        for h in handles { h.abort(); }
    }

    pub(super) fn track<T>(&self, handle: &JoinHandle<T>) {
        let mut background = self.background.lock();
        background.retain(|h| !h.is_finished());
        background.push(handle.abort_handle());
    }

    // ---- reads ----

    pub fn snapshot(&self) -> Arc<SessionRecord> { self.current.read().record.clone() }

    pub fn generation(&self) -> u64 { self.current.read().generation }

    pub fn lifecycle(&self) -> Lifecycle { self.current.read().record.lifecycle }

    pub fn is_authenticated(&self) -> bool { self.current.read().record.is_authenticated() }

    pub fn identity(&self) -> Option<Identity> { self.current.read().record.identity.clone() }

    pub fn business_ref(&self) -> Option<String> { self.current.read().record.business_ref.clone() }

    pub fn business_snapshot(&self) -> Option<Value> { self.current.read().record.business_snapshot.clone() }

    /// True iff there is an identity and its role is in `roles`.
    pub fn has_role<Q: RoleQuery + ?Sized>(&self, roles: &Q) -> bool {
        match self.current.read().record.role() {
            Some(role) if !role.is_empty() => roles.includes(role),
            _ => false,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> { self.events.subscribe() }

    pub fn events(&self) -> &AuthEvents { &self.events }

    pub fn config(&self) -> &SessionConfig { &self.config }

    // ---- commit ----

    /// Swap in the record built by `build` and run `persist` for it, both under the write lock.
    /// Returns the committed record and its generation, or `None` when the guard or `build` declined.
    pub(super) fn commit<B, P>(&self, guard: Guard, build: B, persist: P) -> Option<(Arc<SessionRecord>, u64)>
    where
        B: FnOnce(&SessionRecord) -> Option<SessionRecord>,
        P: FnOnce(&Self, &SessionRecord),
    {
        let (record, generation) = {
            let mut cur = self.current.write();
            let (expected, bump) = match guard {
                Guard::Replace => (None, true),
                Guard::ReplaceIfCurrent(g) => (Some(g), true),
                Guard::AmendIfCurrent(g) => (Some(g), false),
                Guard::Amend => (None, false),
            };
            if let Some(g) = expected {
                if g != cur.generation {
                    debug!(target: "portal::session", "commit: stale generation {} (current {}), discarded", g, cur.generation);
                    return None;
                }
            }
            let next = build(&cur.record)?;
            persist(self, &next);
            if bump { cur.generation += 1; }
            cur.record = Arc::new(next);
            (cur.record.clone(), cur.generation)
        };
        self.events.emit(AuthEvent::SessionChanged { lifecycle: record.lifecycle });
        Some((record, generation))
    }

    // ---- persistence helpers ----

    pub(super) fn persist_identity(&self, identity: &Identity) {
        let keys = &self.config.keys;
        let value = identity.to_value();
        self.persistence.set_json(&keys.identity, &value);
        for k in keys.identity_mirrors() { self.persistence.set_json(k, &value); }
    }

    pub(super) fn persist_credential(&self, credential: &str) {
        let keys = &self.config.keys;
        self.persistence.set_raw(&keys.credential, credential);
        for k in keys.credential_mirrors() { self.persistence.set_raw(k, credential); }
    }

    pub(super) fn persist_business(&self, business_ref: Option<&str>, snapshot: Option<&Value>) {
        let keys = &self.config.keys;
        match business_ref {
            Some(id) => self.persistence.set_raw(&keys.business_id, id),
            None => self.persistence.remove(&keys.business_id),
        }
        match snapshot {
            Some(v) => self.persistence.set_json(&keys.business, v),
            None => self.persistence.remove(&keys.business),
        }
    }

    fn remove_all_keys(&self) {
        for k in self.config.keys.all() { self.persistence.remove(k); }
    }

    pub(super) fn read_identity(&self) -> Option<Identity> {
        let keys = &self.config.keys;
        self.persistence
            .get_value(&keys.identity)
            .or_else(|| self.persistence.get_value(&keys.legacy_identity))
            .and_then(|v| coerce_identity(&v))
    }

    /// Stored credential, canonical key first. Tolerates values written as JSON strings.
    pub(super) fn read_credential(&self) -> Option<String> {
        let keys = &self.config.keys;
        let raw = self.persistence.get_raw(&keys.credential).or_else(|| self.persistence.get_raw(&keys.legacy_credential))?;
        let tok = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::String(s)) => s,
            Ok(Value::Null) => String::new(),
            _ => raw,
        };
        Some(tok.trim().to_string()).filter(|t| !t.is_empty())
    }

    pub(super) fn read_business(&self) -> (Option<String>, Option<Value>) {
        let keys = &self.config.keys;
        let id = self.persistence.get_raw(&keys.business_id).filter(|id| BusinessRef::Id(id.clone()).is_valid());
        (id, self.persistence.get_value(&keys.business))
    }

    /// Business ref and snapshot for a new identity. An embedded entity becomes the snapshot;
    /// a bare id keeps the previous snapshot only if it was for the same id.
    pub(super) fn business_for(prev: &SessionRecord, found: Option<&BusinessRef>) -> (Option<String>, Option<Value>) {
        match found {
            Some(BusinessRef::Entity { id, entity }) => (Some(id.clone()), Some(entity.clone())),
            Some(BusinessRef::Id(id)) => {
                let snap = if prev.business_ref.as_deref() == Some(id.as_str()) { prev.business_snapshot.clone() } else { None };
                (Some(id.clone()), snap)
            }
            None => (None, None),
        }
    }

    pub(super) fn valid_business_ref(payload: &Value) -> Option<BusinessRef> {
        let found = probe_business_ref(payload)?;
        if found.is_valid() { return Some(found); }
        let err = SessionError::MalformedIdentifier(found.id().to_string());
        debug!(target: "portal::business", "skipping business reference: {}", err);
        None
    }

    // ---- operations ----

    /// Load persisted state and settle the initial lifecycle.
    pub fn initialize(&self) {
        let identity = self.read_identity();
        let credential = self.read_credential();
        let (business_ref, business_snapshot) = self.read_business();
        let lifecycle = match (&identity, &credential) {
            (Some(_), _) => Lifecycle::Authenticated,
            (None, Some(_)) => Lifecycle::Bootstrapping,
            (None, None) => Lifecycle::Anonymous,
        };
        if credential.is_some() { self.api.set_authorization(credential.as_deref()); }
        let record = SessionRecord {
            identity,
            credential,
            business_ref: if lifecycle == Lifecycle::Anonymous { None } else { business_ref },
            business_snapshot: if lifecycle == Lifecycle::Anonymous { None } else { business_snapshot },
            lifecycle,
        };
        info!(target: "portal::session", "initialize: lifecycle={}", lifecycle);
        self.commit(Guard::Amend, move |_| Some(record), |_, _| {});
    }

    /// Commit a freshly authenticated identity. `credential` may be omitted to re-enter with
    /// the credential already held. Enrichment is started when the payload carries a valid
    /// business reference; the returned handle may be awaited or dropped.
    pub fn login(self: &Arc<Self>, payload: &Value, credential: Option<&str>) -> SessionResult<Option<EnrichmentTask>> {
        let identity = coerce_identity(payload).ok_or(SessionError::InvalidIdentity)?;
        let business = Self::valid_business_ref(payload);
        let credential = credential.map(str::trim).filter(|c| !c.is_empty()).map(str::to_string);

        let committed = self.commit(
            Guard::Replace,
            |prev| {
                let (business_ref, business_snapshot) = Self::business_for(prev, business.as_ref());
                Some(SessionRecord {
                    identity: Some(identity),
                    credential: credential.clone().or_else(|| prev.credential.clone()),
                    business_ref,
                    business_snapshot,
                    lifecycle: Lifecycle::Authenticated,
                })
            },
            |store, next| {
                // credential first so other tabs reacting to the identity write can read it
                if let Some(c) = credential.as_deref() { store.persist_credential(c); }
                if let Some(ident) = next.identity.as_ref() { store.persist_identity(ident); }
                store.persist_business(next.business_ref.as_deref(), next.business_snapshot.as_ref());
            },
        );
        let Some((record, generation)) = committed else { return Ok(None) };

        self.api.set_authorization(record.credential.as_deref());
        self.events.take_redirect_after_login();
        let ident = record.identity.as_ref().map(|i| (i.id.as_str(), i.role.as_str())).unwrap_or_default();
        info!(target: "portal::session", "login: user={} role={} generation={}", ident.0, ident.1, generation);
        tprintln!("session.login user={} role={} business={:?}", ident.0, ident.1, record.business_ref);

        Ok(record.business_ref.clone().and_then(|id| self.spawn_enrichment(id, generation)))
    }

    /// Shallow-merge `partial` into the current identity. Lifecycle is untouched.
    /// Returns false when there is no identity to update.
    pub fn update(&self, partial: &Value) -> bool {
        let committed = self.commit(
            Guard::Amend,
            |prev| {
                let current = prev.identity.as_ref()?;
                let mut next = prev.clone();
                next.identity = Some(merge_identity(current, partial));
                Some(next)
            },
            |store, next| {
                if let Some(ident) = next.identity.as_ref() { store.persist_identity(ident); }
            },
        );
        committed.is_some()
    }

    /// Local logout: forget everything and remove every session key, legacy aliases included.
    pub fn clear_session(&self) {
        self.commit(Guard::Replace, |_| Some(SessionRecord::empty(Lifecycle::Anonymous)), |store, _| store.remove_all_keys());
        self.api.set_authorization(None);
        info!(target: "portal::session", "clear_session: session cleared");
    }

    /// Clear only if nothing replaced the session since `generation` was captured.
    pub(super) fn clear_if_current(&self, generation: u64) -> bool {
        let cleared = self
            .commit(
                Guard::ReplaceIfCurrent(generation),
                |_| Some(SessionRecord::empty(Lifecycle::Anonymous)),
                |store, _| store.remove_all_keys(),
            )
            .is_some();
        if cleared { self.api.set_authorization(None); }
        cleared
    }

    /// Network logout (best effort, failures ignored) followed by `clear_session`.
    pub async fn logout(&self) {
        if let Err(e) = self.api.logout().await {
            debug!(target: "portal::session", "logout: server call failed, ignoring: {}", e);
        }
        self.clear_session();
    }

    /// Clear the session whenever the transport reports it expired.
    pub fn watch_expiry(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let mut rx = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(AuthEvent::SessionExpired) => {
                        let Some(store) = weak.upgrade() else { break };
                        if store.lifecycle() != Lifecycle::Anonymous {
                            info!(target: "portal::session", "session expired, clearing");
                            store.clear_session();
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
