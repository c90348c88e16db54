//! Cache key derivation.
//!
//! A canonical key is the SHA-256 digest of the caller's key material merged
//! with the session-scoping fields. `serde_json` keeps object keys sorted, so
//! the serialized form is stable for equal values regardless of insertion order.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

const SESSION_MODE_FIELD: &str = "sessionMode";
const SESSION_ID_FIELD: &str = "sessionId";

/// Session scoping applied to a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionMode {
    NoSession,
    Private,
    AuthenticatedPublic,
}

impl SessionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoSession => "no_session",
            Self::Private => "private",
            Self::AuthenticatedPublic => "authenticated_public",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contextual key fragment. Only `Private` carries a session id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyScope {
    NoSession,
    Private { session_id: String },
    AuthenticatedPublic,
}

impl KeyScope {
    pub fn private(session_id: impl Into<String>) -> Self {
        Self::Private {
            session_id: session_id.into(),
        }
    }

    pub fn mode(&self) -> SessionMode {
        match self {
            Self::NoSession => SessionMode::NoSession,
            Self::Private { .. } => SessionMode::Private,
            Self::AuthenticatedPublic => SessionMode::AuthenticatedPublic,
        }
    }

    fn write_fields(&self, target: &mut Map<String, Value>) {
        target.insert(
            SESSION_MODE_FIELD.to_string(),
            Value::from(self.mode().as_str()),
        );
        if let Self::Private { session_id } = self {
            target.insert(SESSION_ID_FIELD.to_string(), Value::from(session_id.as_str()));
        }
    }
}

/// Fixed-width hex digest used as the store lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("cache key data is not serializable: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cache key data must be a JSON object, got {kind}")]
    NotAnObject { kind: &'static str },
}

/// Derive the canonical key for `base` under `scope`.
///
/// Contextual fields overwrite caller fields with the same name.
pub fn derive_key<T>(base: &T, scope: &KeyScope) -> Result<CanonicalKey, KeyError>
where
    T: Serialize + ?Sized,
{
    let mut material = match serde_json::to_value(base)? {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(KeyError::NotAnObject {
                kind: value_kind(&other),
            });
        }
    };
    scope.write_fields(&mut material);

    let serialized = serde_json::to_vec(&Value::Object(material))?;
    let mut hasher = Sha256::new();
    hasher.update(&serialized);
    Ok(CanonicalKey(hex::encode(hasher.finalize())))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    #[test]
    fn equal_material_yields_equal_keys() {
        let first = json!({ "operationName": "Q", "variables": { "a": 1, "b": [1, 2] } });
        let second = json!({ "variables": { "b": [1, 2], "a": 1 }, "operationName": "Q" });

        let scope = KeyScope::NoSession;
        assert_eq!(
            derive_key(&first, &scope).expect("key"),
            derive_key(&second, &scope).expect("key")
        );
    }

    #[test]
    fn key_is_sha256_hex() {
        let key = derive_key(&json!({ "q": "x" }), &KeyScope::NoSession).expect("key");
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn private_keys_differ_per_session() {
        let base = json!({ "operationName": "Q" });
        let a = derive_key(&base, &KeyScope::private("A")).expect("key");
        let b = derive_key(&base, &KeyScope::private("B")).expect("key");
        assert_ne!(a, b);
    }

    #[test]
    fn session_modes_produce_distinct_keys() {
        let base = json!({ "operationName": "Q" });
        let none = derive_key(&base, &KeyScope::NoSession).expect("key");
        let public = derive_key(&base, &KeyScope::AuthenticatedPublic).expect("key");
        let private = derive_key(&base, &KeyScope::private("A")).expect("key");
        assert_ne!(none, public);
        assert_ne!(none, private);
        assert_ne!(public, private);
    }

    #[test]
    fn caller_fields_cannot_shadow_session_scope() {
        let spoofed = json!({
            "operationName": "Q",
            "sessionMode": "private",
            "sessionId": "victim",
        });
        let honest = json!({ "operationName": "Q" });

        let mode_only = json!({ "operationName": "Q", "sessionMode": "private" });
        assert_eq!(
            derive_key(&mode_only, &KeyScope::NoSession).expect("key"),
            derive_key(&honest, &KeyScope::NoSession).expect("key")
        );
        assert_ne!(
            derive_key(&spoofed, &KeyScope::NoSession).expect("key"),
            derive_key(&honest, &KeyScope::NoSession).expect("key")
        );
        assert_eq!(
            derive_key(&spoofed, &KeyScope::private("attacker")).expect("key"),
            derive_key(&honest, &KeyScope::private("attacker")).expect("key")
        );
        assert_ne!(
            derive_key(&spoofed, &KeyScope::NoSession).expect("key"),
            derive_key(&honest, &KeyScope::private("victim")).expect("key")
        );
    }

    #[test]
    fn derivation_is_idempotent() {
        let base = json!({ "operationName": "Q" });
        let scope = KeyScope::AuthenticatedPublic;
        let first = derive_key(&base, &scope).expect("key");
        let second = derive_key(&base, &scope).expect("key");
        assert_eq!(first, second);
    }

    #[test]
    fn non_string_map_keys_fail_serialization() {
        let mut base = HashMap::new();
        base.insert((1, 2), "value");
        let err = derive_key(&base, &KeyScope::NoSession).expect_err("should fail");
        assert!(matches!(err, KeyError::Serialization(_)));
    }

    #[test]
    fn scalar_material_is_rejected() {
        let err = derive_key(&json!("just a string"), &KeyScope::NoSession)
            .expect_err("should fail");
        assert!(matches!(err, KeyError::NotAnObject { kind: "string" }));
    }

    #[test]
    fn null_material_is_treated_as_empty() {
        assert_eq!(
            derive_key(&Value::Null, &KeyScope::NoSession).expect("key"),
            derive_key(&json!({}), &KeyScope::NoSession).expect("key")
        );
    }
}
