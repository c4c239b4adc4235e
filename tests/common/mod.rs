//! Shared fixtures: a scripted in-process identity provider and store builders.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;

use portal_session::api::IdentityApi;
use portal_session::error::{SessionError, SessionResult};
use portal_session::identity::AuthEvents;
use portal_session::storage::{Persistence, StorageArea, TabStorage};
use portal_session::{SessionConfig, SessionStore};

pub const HEX_ID: &str = "507f1f77bcf86cd799439011";

/// How `/auth/me` answers.
#[derive(Clone)]
pub enum MeReply {
    Payload(Value),
    NetworkError,
    /// Never answers within any sane timeout.
    Hang,
}

pub struct MockApi {
    pub me: Mutex<MeReply>,
    /// When set, `/auth/me` waits on it before answering.
    pub me_gate: Mutex<Option<Arc<Notify>>>,
    pub businesses: Mutex<HashMap<String, Value>>,
    /// When set, `/business/{id}` waits on it before answering.
    pub business_gate: Mutex<Option<Arc<Notify>>>,
    pub me_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub business_calls: Mutex<Vec<String>>,
    pub authorization: Mutex<Option<String>>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            me: Mutex::new(MeReply::NetworkError),
            me_gate: Mutex::new(None),
            businesses: Mutex::new(HashMap::new()),
            business_gate: Mutex::new(None),
            me_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            business_calls: Mutex::new(Vec::new()),
            authorization: Mutex::new(None),
        })
    }

    pub fn reply_me(&self, reply: MeReply) { *self.me.lock() = reply; }

    pub fn with_business(&self, id: &str, entity: Value) { self.businesses.lock().insert(id.to_string(), entity); }

    pub fn gate_me(&self) -> Arc<Notify> {
        let n = Arc::new(Notify::new());
        *self.me_gate.lock() = Some(n.clone());
        n
    }

    pub fn gate_business(&self) -> Arc<Notify> {
        let n = Arc::new(Notify::new());
        *self.business_gate.lock() = Some(n.clone());
        n
    }

    pub fn network_calls(&self) -> usize {
        self.me_calls.load(Ordering::SeqCst) + self.logout_calls.load(Ordering::SeqCst) + self.business_calls.lock().len()
    }
}

impl IdentityApi for MockApi {
    fn set_authorization(&self, credential: Option<&str>) {
        *self.authorization.lock() = credential.map(str::to_string);
    }

    fn who_am_i(&self) -> BoxFuture<'_, SessionResult<Value>> {
        async move {
            self.me_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.me_gate.lock().clone();
            if let Some(g) = gate { g.notified().await; }
            let reply = self.me.lock().clone();
            match reply {
                MeReply::Payload(v) => Ok(v),
                MeReply::NetworkError => Err(SessionError::Transport("connection refused".into())),
                MeReply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(SessionError::Transport("unreachable".into()))
                }
            }
        }
        .boxed()
    }

    fn logout(&self) -> BoxFuture<'_, SessionResult<()>> {
        async move {
            self.logout_calls.fetch_add(1, Ordering::SeqCst);
            Err(SessionError::Transport("logout endpoint down".into()))
        }
        .boxed()
    }

    fn fetch_business<'a>(&'a self, id: &'a str) -> BoxFuture<'a, SessionResult<Value>> {
        async move {
            self.business_calls.lock().push(id.to_string());
            let gate = self.business_gate.lock().clone();
            if let Some(g) = gate { g.notified().await; }
            self.businesses.lock().get(id).cloned().ok_or_else(|| SessionError::Transport(format!("HTTP 404 for {}", id)))
        }
        .boxed()
    }
}

pub fn test_config() -> SessionConfig {
    let mut cfg = SessionConfig::default();
    cfg.verify_timeout = Duration::from_millis(200);
    cfg.fetch_timeout = Duration::from_millis(500);
    cfg
}

pub struct Tab {
    pub storage: TabStorage,
    pub api: Arc<MockApi>,
    pub store: Arc<SessionStore>,
}

/// A fresh tab on `area` with its own mock provider. Not initialized.
pub fn open_tab(area: &StorageArea) -> Tab {
    portal_session::logging::init_tracing("debug");
    let storage = area.tab();
    let api = MockApi::new();
    let store = SessionStore::new(
        Persistence::new(Arc::new(storage.clone())),
        api.clone(),
        AuthEvents::new(),
        test_config(),
    );
    Tab { storage, api, store }
}
