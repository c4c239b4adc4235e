//! Client-side session and identity management.
//! Keep the public surface thin and split implementation across sub-modules:
//! the store owns the record, the other modules add behavior to it.

mod principal;
mod role;
mod payload;
mod record;
mod events;
mod session;
mod bootstrap;
mod business;
mod sync;
mod guard;

pub use principal::Identity;
pub use role::{normalize_role, normalize_role_str, AnyRole, Role, RoleQuery};
pub use payload::{business_id_from, coerce_identity, is_valid_business_id, parse_identity, probe_business_ref, probe_role, BusinessRef};
pub use record::{Lifecycle, SessionRecord};
pub use events::{AuthEvent, AuthEvents};
pub use session::SessionStore;
pub use bootstrap::BootstrapOutcome;
pub use business::EnrichmentTask;
pub use guard::{evaluate, GuardDecision};
