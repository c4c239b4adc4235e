use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::record::Lifecycle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// The transport saw the credential rejected; the store clears itself on this.
    SessionExpired,
    /// A business snapshot was committed; UI collaborators should re-render.
    BusinessUpdated { id: String },
    SessionChanged { lifecycle: Lifecycle },
}

struct Inner {
    tx: broadcast::Sender<AuthEvent>,
    redirect_after_login: Mutex<Option<String>>,
}

/// Notification bus shared by the transport, the session store and UI collaborators.
/// Also owns the "redirect after login" slot that a successful login consumes.
#[derive(Clone)]
pub struct AuthEvents(Arc<Inner>);

impl Default for AuthEvents {
    fn default() -> Self { Self::new() }
}

impl AuthEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self(Arc::new(Inner { tx, redirect_after_login: Mutex::new(None) }))
    }

    pub fn emit(&self, ev: AuthEvent) {
        // Fire and forget: zero subscribers is not an error.
        let _ = self.0.tx.send(ev);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> { self.0.tx.subscribe() }

    pub fn set_redirect_after_login(&self, path: impl Into<String>) {
        *self.0.redirect_after_login.lock() = Some(path.into());
    }

    pub fn redirect_after_login(&self) -> Option<String> { self.0.redirect_after_login.lock().clone() }

    pub fn take_redirect_after_login(&self) -> Option<String> { self.0.redirect_after_login.lock().take() }
}
