//! HttpIdentityApi against an in-process axum identity provider.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::task::JoinHandle;

use portal_session::api::{HttpIdentityApi, IdentityApi};
use portal_session::identity::{AuthEvent, AuthEvents, BootstrapOutcome, Lifecycle};
use portal_session::storage::{Storage, StorageArea};
use portal_session::{SessionConfig, SessionError, SessionStore};

const HEX_ID: &str = "65a1b2c3d4e5f60718293a4b";

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::to_string)
}

async fn me(headers: HeaderMap) -> impl IntoResponse {
    match bearer(&headers).as_deref() {
        Some("good") => (StatusCode::OK, Json(json!({"data": {"user": {"_id": "u42", "email": "o@x.io", "role": "OWNER", "businessId": HEX_ID}}}))),
        _ => (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid token"}))),
    }
}

async fn business(Path(id): Path<String>) -> impl IntoResponse {
    Json(json!({"business": {"_id": id, "name": "Corner Shop"}}))
}

async fn logout() -> StatusCode { StatusCode::NO_CONTENT }

// Start the mock provider on an ephemeral localhost port. Abort the handle to stop it.
async fn start_provider() -> (JoinHandle<()>, SocketAddr) {
    let app = Router::new()
        .route("/auth/me", get(me))
        .route("/auth/logout", post(logout))
        .route("/business/{id}", get(business));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind 127.0.0.1:0");
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("mock provider error: {e:?}");
        }
    });
    (handle, addr)
}

fn config_for(addr: SocketAddr) -> SessionConfig {
    let mut cfg = SessionConfig::default();
    cfg.api_base = format!("http://{}/", addr);
    cfg.verify_timeout = Duration::from_secs(5);
    cfg.fetch_timeout = Duration::from_secs(5);
    cfg
}

#[tokio::test]
async fn who_am_i_sends_bearer_and_returns_payload() {
    let (server, addr) = start_provider().await;
    let api = HttpIdentityApi::new(&config_for(addr), AuthEvents::new()).unwrap();
    assert_eq!(api.base(), format!("http://{}", addr));
    api.set_authorization(Some("good"));
    let payload = api.who_am_i().await.expect("me");
    let ident = portal_session::identity::parse_identity(&payload).unwrap();
    assert_eq!(ident.id, "u42");
    assert_eq!(ident.role, "owner");
    server.abort();
}

#[tokio::test]
async fn rejected_credential_emits_session_expired() {
    let (server, addr) = start_provider().await;
    let events = AuthEvents::new();
    let mut rx = events.subscribe();
    let api = HttpIdentityApi::new(&config_for(addr), events).unwrap();
    api.set_authorization(Some("stale"));
    let err = api.who_am_i().await.err().expect("401 expected");
    assert!(matches!(err, SessionError::Unauthorized), "got {:?}", err);
    assert_eq!(rx.recv().await.unwrap(), AuthEvent::SessionExpired);

    api.set_authorization(None);
    assert!(matches!(api.who_am_i().await, Err(SessionError::Unauthorized)));
    server.abort();
}

#[tokio::test]
async fn business_and_logout_endpoints() {
    let (server, addr) = start_provider().await;
    let api = HttpIdentityApi::new(&config_for(addr), AuthEvents::new()).unwrap();
    let entity = api.fetch_business(HEX_ID).await.unwrap();
    assert_eq!(entity["business"]["_id"], HEX_ID);
    api.logout().await.expect("logout");
    server.abort();
}

#[tokio::test]
async fn unreachable_provider_is_a_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let api = HttpIdentityApi::new(&config_for(addr), AuthEvents::new()).unwrap();
    let err = api.who_am_i().await.err().expect("connection should fail");
    assert!(err.is_network(), "got {:?}", err);
}

#[test]
fn invalid_base_url_is_rejected() {
    let mut cfg = SessionConfig::default();
    cfg.api_base = "not a url".into();
    assert!(HttpIdentityApi::new(&cfg, AuthEvents::new()).is_err());
}

#[tokio::test]
async fn bootstrap_and_enrichment_over_http() {
    let (server, addr) = start_provider().await;
    let area = StorageArea::in_memory();
    let tab = area.tab();
    tab.set("auth.token", "good").unwrap();

    let cfg = config_for(addr);
    let events = AuthEvents::new();
    let api = Arc::new(HttpIdentityApi::new(&cfg, events.clone()).unwrap());
    let store = SessionStore::for_tab(&tab, api, events, cfg);
    let mut rx = store.subscribe();
    store.initialize();

    assert_eq!(store.bootstrap().await, BootstrapOutcome::Verified);
    assert_eq!(store.lifecycle(), Lifecycle::Authenticated);
    assert!(store.has_role("owner"));

    let updated = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(AuthEvent::BusinessUpdated { id }) = rx.recv().await { return id; }
        }
    })
    .await
    .expect("business enrichment");
    assert_eq!(updated, HEX_ID);
    assert_eq!(store.business_snapshot().unwrap()["name"], "Corner Shop");
    assert_eq!(tab.get("auth.businessId").as_deref(), Some(HEX_ID));
    server.abort();
}
