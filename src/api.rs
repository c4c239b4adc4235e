//! Network boundary of the session subsystem.
//! The store only depends on the `IdentityApi` trait; `http::HttpIdentityApi` is the
//! reqwest-backed implementation used in production.

pub mod http;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::SessionResult;

pub use http::HttpIdentityApi;

pub trait IdentityApi: Send + Sync {
    /// Attach (or detach) the bearer credential used on every outbound request.
    fn set_authorization(&self, credential: Option<&str>);

    /// `GET /auth/me`.
    fn who_am_i(&self) -> BoxFuture<'_, SessionResult<Value>>;

    /// `POST /auth/logout`. Best effort.
    fn logout(&self) -> BoxFuture<'_, SessionResult<()>>;

    /// `GET /business/{id}`.
    fn fetch_business<'a>(&'a self, id: &'a str) -> BoxFuture<'a, SessionResult<Value>>;
}
