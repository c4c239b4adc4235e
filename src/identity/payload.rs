//! Shape probes for server payloads.
//! Identity, role and business reference arrive nested differently per endpoint, so each
//! lookup is an ordered list of small probes returning `None` on mismatch; the first hit wins.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::principal::Identity;
use super::role::normalize_role;

static OBJECT_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{24}$").expect("object id pattern"));

/// Containers an identity may be nested in, in priority order.
const IDENTITY_PATHS: &[&[&str]] = &[&[], &["user"], &["data", "user"], &["data"], &["profile"]];

/// Places a role may live, relative to the payload root.
const ROLE_PATHS: &[&[&str]] = &[&["role"], &["user", "role"], &["data", "role"], &["profile", "role"]];

/// Fields that are lifted out of the container into typed `Identity` fields.
const IDENTITY_FIELDS: &[&str] = &["id", "_id", "username", "email", "role"];

/// True for a 24 character hexadecimal entity id.
pub fn is_valid_business_id(id: &str) -> bool { OBJECT_ID.is_match(id) }

fn at<'a>(v: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(v, |cur, seg| cur.get(*seg))
}

/// Non-empty trimmed string, or a number rendered as a string.
fn scalar_str(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn object_id(obj: &Map<String, Value>) -> Option<String> {
    obj.get("id").and_then(scalar_str).or_else(|| obj.get("_id").and_then(scalar_str))
}

fn looks_like_identity(obj: &Map<String, Value>) -> bool {
    object_id(obj).is_some() || obj.get("email").and_then(scalar_str).is_some()
}

fn identity_container(payload: &Value) -> Option<&Map<String, Value>> {
    IDENTITY_PATHS
        .iter()
        .filter_map(|p| at(payload, p).and_then(Value::as_object))
        .find(|obj| looks_like_identity(obj))
}

fn container_role(container: &Map<String, Value>) -> Option<String> {
    container.get("role").map(normalize_role).filter(|r| !r.is_empty())
}

fn roles_entry(container: &Map<String, Value>) -> Option<String> {
    container
        .get("roles")
        .and_then(Value::as_array)
        .and_then(|roles| roles.iter().map(normalize_role).find(|r| !r.is_empty()))
}

/// First non-empty normalized role: the identity container itself, then the known nesting
/// depths, then the first entry of a `roles` array.
pub fn probe_role(payload: &Value) -> String {
    let container = identity_container(payload);
    if let Some(r) = container.and_then(container_role) { return r; }
    for path in ROLE_PATHS {
        if let Some(r) = at(payload, path).map(normalize_role).filter(|r| !r.is_empty()) { return r; }
    }
    container.and_then(roles_entry).unwrap_or_default()
}

fn identity_from(container: &Map<String, Value>, payload: &Value) -> Identity {
    let extra = container
        .iter()
        .filter(|(k, _)| !IDENTITY_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let role = container_role(container)
        .or_else(|| Some(probe_role(payload)).filter(|r| !r.is_empty()))
        .or_else(|| roles_entry(container))
        .unwrap_or_default();
    Identity {
        id: object_id(container).unwrap_or_default(),
        username: container.get("username").and_then(scalar_str),
        email: container.get("email").and_then(scalar_str),
        role,
        extra,
    }
}

/// Build an identity from a server payload. `None` when no container carries an id or email.
pub fn parse_identity(payload: &Value) -> Option<Identity> {
    identity_container(payload).map(|c| identity_from(c, payload))
}

fn looks_like_profile(obj: &Map<String, Value>) -> bool {
    obj.contains_key("username") || obj.contains_key("role")
}

/// Build an identity from a caller-supplied or stored object. Prefers a container with an id
/// or email, then one with a username or role, then the root. `None` only for non-objects.
pub fn coerce_identity(payload: &Value) -> Option<Identity> {
    parse_identity(payload).or_else(|| {
        let container = IDENTITY_PATHS
            .iter()
            .filter_map(|p| at(payload, p).and_then(Value::as_object))
            .find(|obj| looks_like_profile(obj))
            .or_else(|| payload.as_object())?;
        Some(identity_from(container, payload))
    })
}

/// Shallow merge of `partial` over `current`. Non-object partials leave the identity unchanged.
pub fn merge_identity(current: &Identity, partial: &Value) -> Identity {
    let Some(patch) = partial.as_object() else { return current.clone() };
    let mut merged = match current.to_value() {
        Value::Object(m) => m,
        _ => Map::new(),
    };
    for (k, v) in patch {
        merged.insert(k.clone(), v.clone());
    }
    // An id can be replaced but never dropped by a merge.
    if object_id(&merged).is_none() && !current.id.is_empty() {
        merged.insert("id".into(), Value::String(current.id.clone()));
    }
    coerce_identity(&Value::Object(merged)).unwrap_or_else(|| current.clone())
}

/// A business reference as found in a payload. The id is not yet validated.
#[derive(Debug, Clone, PartialEq)]
pub enum BusinessRef {
    /// Bare id string.
    Id(String),
    /// Embedded entity; the object is kept verbatim as the initial snapshot.
    Entity { id: String, entity: Value },
}

impl BusinessRef {
    pub fn id(&self) -> &str {
        match self {
            BusinessRef::Id(id) | BusinessRef::Entity { id, .. } => id,
        }
    }

    pub fn entity(&self) -> Option<&Value> {
        match self {
            BusinessRef::Entity { entity, .. } => Some(entity),
            BusinessRef::Id(_) => None,
        }
    }

    pub fn is_valid(&self) -> bool { is_valid_business_id(self.id()) }
}

fn probe_ref_field(obj: &Map<String, Value>, field: &str) -> Option<BusinessRef> {
    match obj.get(field)? {
        Value::String(s) if !s.trim().is_empty() => Some(BusinessRef::Id(s.trim().to_string())),
        Value::Object(inner) => object_id(inner).map(|id| BusinessRef::Entity { id, entity: Value::Object(inner.clone()) }),
        _ => None,
    }
}

fn probe_ref_in(obj: &Map<String, Value>) -> Option<BusinessRef> {
    probe_ref_field(obj, "business").or_else(|| probe_ref_field(obj, "businessId"))
}

/// Business reference carried by a payload: `business` (string or object with `id`/`_id`),
/// then `businessId` in the same two shapes; identity container first, then the root.
pub fn probe_business_ref(payload: &Value) -> Option<BusinessRef> {
    identity_container(payload)
        .and_then(probe_ref_in)
        .or_else(|| payload.as_object().and_then(probe_ref_in))
}

/// Id accepted by the enrichment loader: a bare string or an object exposing `id`/`_id`.
pub fn business_id_from(input: &Value) -> Option<String> {
    match input {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Object(obj) => object_id(obj),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HEX: &str = "507f1f77bcf86cd799439011";

    #[test]
    fn identity_found_at_every_depth() {
        for payload in [
            json!({"id": "u1", "role": "ADMIN"}),
            json!({"user": {"_id": "u1", "role": "ADMIN"}}),
            json!({"data": {"user": {"id": "u1"}, "role": "admin"}}),
            json!({"data": {"id": "u1", "role": "Administrator"}}),
            json!({"profile": {"id": "u1", "role": "admin"}}),
        ] {
            let ident = parse_identity(&payload).unwrap_or_else(|| panic!("no identity in {}", payload));
            assert_eq!(ident.id, "u1");
            assert_eq!(ident.role, "admin", "role for {}", payload);
        }
    }

    #[test]
    fn role_probe_order_and_fallbacks() {
        // container role wins over an outer one
        assert_eq!(probe_role(&json!({"user": {"id": "u", "role": "owner"}, "role": "admin"})), "owner");
        assert_eq!(probe_role(&json!({"user": {"id": "u"}, "profile": {"role": "Prestador"}})), "provider");
        assert_eq!(probe_role(&json!({"id": "u", "roles": ["", "OWNER"]})), "owner");
        assert_eq!(probe_role(&json!({"id": "u"})), "");
    }

    #[test]
    fn unrecognizable_payloads() {
        assert!(parse_identity(&json!({"status": "ok"})).is_none());
        assert!(parse_identity(&json!({"user": {"name": "x"}})).is_none());
        assert!(parse_identity(&json!("u1")).is_none());
        let by_email = parse_identity(&json!({"email": "a@b.c"})).unwrap();
        assert_eq!(by_email.id, "");
        assert_eq!(by_email.email.as_deref(), Some("a@b.c"));
    }

    #[test]
    fn handed_identity_without_id_is_still_built() {
        let ident = coerce_identity(&json!({"username": "ana", "role": "Dueño"})).unwrap();
        assert_eq!(ident.id, "");
        assert_eq!(ident.username.as_deref(), Some("ana"));
        assert_eq!(ident.role, "owner");
        let nested = coerce_identity(&json!({"ok": true, "user": {"username": "bo", "role": "admin"}})).unwrap();
        assert_eq!(nested.username.as_deref(), Some("bo"));
        assert!(!nested.extra.contains_key("ok"));
        let bare = coerce_identity(&json!({"status": "ok"})).unwrap();
        assert_eq!(bare.role, "");
        assert!(coerce_identity(&json!("u1")).is_none());
        assert!(coerce_identity(&Value::Null).is_none());
        // an id-bearing container still wins
        assert_eq!(coerce_identity(&json!({"username": "x", "user": {"id": "u7"}})).unwrap().id, "u7");
    }

    #[test]
    fn merge_keeps_identity_without_id() {
        let cur = coerce_identity(&json!({"username": "ana", "role": "owner"})).unwrap();
        let next = merge_identity(&cur, &json!({"phone": "555"}));
        assert_eq!(next.username.as_deref(), Some("ana"));
        assert_eq!(next.role, "owner");
        assert_eq!(next.extra.get("phone"), Some(&json!("555")));
    }

    #[test]
    fn extra_fields_are_preserved() {
        let ident = parse_identity(&json!({"_id": 42, "username": "ana", "phone": "123"})).unwrap();
        assert_eq!(ident.id, "42");
        assert_eq!(ident.username.as_deref(), Some("ana"));
        assert_eq!(ident.extra.get("phone"), Some(&json!("123")));
        assert!(!ident.extra.contains_key("_id"));
    }

    #[test]
    fn merge_renormalizes_role_and_keeps_id() {
        let cur = parse_identity(&json!({"id": "u1", "role": "owner", "username": "a"})).unwrap();
        let next = merge_identity(&cur, &json!({"role": "ADMIN", "username": "b", "id": null}));
        assert_eq!(next.id, "u1");
        assert_eq!(next.role, "admin");
        assert_eq!(next.username.as_deref(), Some("b"));
        assert_eq!(merge_identity(&cur, &json!(3)), cur);
    }

    #[test]
    fn business_ref_shapes() {
        assert_eq!(probe_business_ref(&json!({"id": "u", "business": HEX})), Some(BusinessRef::Id(HEX.into())));
        let r = probe_business_ref(&json!({"id": "u", "business": {"_id": HEX, "image": "x.png"}})).unwrap();
        assert_eq!(r.id(), HEX);
        assert_eq!(r.entity(), Some(&json!({"_id": HEX, "image": "x.png"})));
        assert_eq!(probe_business_ref(&json!({"user": {"id": "u", "businessId": HEX}})).unwrap().id(), HEX);
        assert_eq!(probe_business_ref(&json!({"id": "u", "businessId": {"id": HEX}})).unwrap().id(), HEX);
        // root-level sibling of a nested identity
        assert_eq!(probe_business_ref(&json!({"user": {"id": "u"}, "businessId": HEX})).unwrap().id(), HEX);
        assert!(probe_business_ref(&json!({"id": "u", "business": 5})).is_none());
    }

    #[test]
    fn business_id_validation() {
        assert!(is_valid_business_id(HEX));
        assert!(is_valid_business_id(&HEX.to_uppercase()));
        assert!(!is_valid_business_id("not-a-valid-id"));
        assert!(!is_valid_business_id(&HEX[..23]));
        assert!(!is_valid_business_id(&format!("{}0", HEX)));
        assert!(!BusinessRef::Id("zz7f1f77bcf86cd799439011".into()).is_valid());
        assert_eq!(business_id_from(&json!({"_id": HEX})).as_deref(), Some(HEX));
        assert_eq!(business_id_from(&json!("  ")), None);
    }
}
