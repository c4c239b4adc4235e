//! Session error model.
//! These errors stay inside the subsystem: the store's public operations swallow them
//! (logging at the appropriate level) so callers only ever observe state changes.
//! `login()` is the single exception, rejecting payloads that carry no identity.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// `/auth/me` failed or answered with something that is not an identity.
    #[error("invalid credential response: {0}")]
    InvalidCredentialResponse(String),
    /// A business reference that is not a 24 hex character id.
    #[error("malformed identifier: {0:?}")]
    MalformedIdentifier(String),
    /// Persisted JSON under `key` could not be parsed.
    #[error("storage corruption at '{key}': {message}")]
    StorageCorruption { key: String, message: String },
    #[error("business enrichment failed for {id}: {message}")]
    EnrichmentFailure { id: String, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    /// The server rejected the current credential (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,
    #[error("payload does not contain a recognizable identity")]
    InvalidIdentity,
}

impl SessionError {
    pub fn code_str(&self) -> &'static str {
        match self {
            SessionError::InvalidCredentialResponse(_) => "invalid_credential_response",
            SessionError::MalformedIdentifier(_) => "malformed_identifier",
            SessionError::StorageCorruption { .. } => "storage_corruption",
            SessionError::EnrichmentFailure { .. } => "enrichment_failure",
            SessionError::Transport(_) => "transport",
            SessionError::Timeout(_) => "timeout",
            SessionError::Unauthorized => "unauthorized",
            SessionError::InvalidIdentity => "invalid_identity",
        }
    }

    /// Network-side failures: the request never produced a usable answer.
    pub fn is_network(&self) -> bool {
        matches!(self, SessionError::Transport(_) | SessionError::Timeout(_) | SessionError::Unauthorized)
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.status() == Some(reqwest::StatusCode::UNAUTHORIZED) { return SessionError::Unauthorized; }
        SessionError::Transport(err.to_string())
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
