use serde_json::Value;

/// Canonical authorization roles. Stored and compared as their lower-case tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Owner,
    Provider,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Owner, Role::Provider];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Owner => "owner",
            Role::Provider => "provider",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.as_str() == tag)
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str { self.as_str() }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// Legacy and localized spellings, keyed by their canonicalized form.
const ALIASES: &[(&str, Role)] = &[
    ("admin", Role::Admin),
    ("administrator", Role::Admin),
    ("administrador", Role::Admin),
    ("superadmin", Role::Admin),
    ("super_admin", Role::Admin),
    ("super-admin", Role::Admin),
    ("owner", Role::Owner),
    ("business_owner", Role::Owner),
    ("businessowner", Role::Owner),
    ("propietario", Role::Owner),
    ("dueno", Role::Owner),
    ("dueño", Role::Owner),
    ("provider", Role::Provider),
    ("service_provider", Role::Provider),
    ("proveedor", Role::Provider),
    ("prestador", Role::Provider),
    ("professional", Role::Provider),
    ("profesional", Role::Provider),
];

/// Lower-case, trimmed, internal whitespace runs collapsed to `_`.
fn canonicalize(raw: &str) -> String {
    raw.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join("_")
}

/// Normalize a raw role string. Known aliases map to a canonical tag, anything else
/// is returned in canonical spelling so future roles still compare consistently.
pub fn normalize_role_str(raw: &str) -> String {
    let canon = canonicalize(raw);
    match ALIASES.iter().find(|(alias, _)| *alias == canon) {
        Some((_, role)) => role.as_str().to_string(),
        None => canon,
    }
}

/// Normalize an arbitrary JSON value. Falsy values (null, false, 0, "") and
/// non-scalars yield the empty marker.
pub fn normalize_role(raw: &Value) -> String {
    match raw {
        Value::String(s) => normalize_role_str(s),
        Value::Number(n) => {
            if n.as_f64().map(|f| f == 0.0 || f.is_nan()).unwrap_or(false) { return String::new(); }
            normalize_role_str(&n.to_string())
        }
        Value::Bool(true) => normalize_role_str("true"),
        Value::Null | Value::Bool(false) | Value::Array(_) | Value::Object(_) => String::new(),
    }
}

/// Anything that can answer "is this role included": a single tag, a `Role`, or a list of either.
pub trait RoleQuery {
    fn includes(&self, role: &str) -> bool;
}

/// Requirement met by every role, including the empty one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnyRole;

impl RoleQuery for AnyRole {
    fn includes(&self, _role: &str) -> bool { true }
}

impl RoleQuery for str {
    fn includes(&self, role: &str) -> bool { self == role }
}

impl RoleQuery for &str {
    fn includes(&self, role: &str) -> bool { *self == role }
}

impl RoleQuery for String {
    fn includes(&self, role: &str) -> bool { self == role }
}

impl RoleQuery for Role {
    fn includes(&self, role: &str) -> bool { self.as_str() == role }
}

impl<T: AsRef<str>> RoleQuery for [T] {
    fn includes(&self, role: &str) -> bool { self.iter().any(|r| r.as_ref() == role) }
}

impl<T: AsRef<str>> RoleQuery for &[T] {
    fn includes(&self, role: &str) -> bool { (**self).includes(role) }
}

impl<T: AsRef<str>, const N: usize> RoleQuery for [T; N] {
    fn includes(&self, role: &str) -> bool { self.as_slice().includes(role) }
}

impl<T: AsRef<str>> RoleQuery for Vec<T> {
    fn includes(&self, role: &str) -> bool { self.as_slice().includes(role) }
}
