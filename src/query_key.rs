use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde_json::Value;

/// Identity of a cached query.
///
/// A key is an ordered sequence of JSON parts. Two keys are equivalent iff
/// their canonical serialization is equal: object keys serialize in sorted
/// order (the default `serde_json::Map` is a `BTreeMap`), so structurally
/// equal keys compare equal regardless of how their objects were built.
///
/// The canonical form and its 64-bit hash are computed once at construction.
/// [`QueryKey::hash64`] is the stable value used as the subscription trigger
/// and as the `query` field of trace entries.
///
/// ```
/// use refetch::query_key;
///
/// let a = query_key!["todos", 42, { "done": false }];
/// let b = query_key!["todos", 42, { "done": false }];
/// assert_eq!(a, b);
/// assert_eq!(a.hash64(), b.hash64());
/// ```
#[derive(Clone)]
pub struct QueryKey {
    parts: Vec<Value>,
    canonical: String,
    hash: u64,
}

impl QueryKey {
    /// Builds a key from its ordered parts.
    pub fn new(parts: Vec<Value>) -> Self {
        let canonical = serde_json::to_string(&parts).expect("query key serialization");
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        let hash = hasher.finish();
        QueryKey {
            parts,
            canonical,
            hash,
        }
    }

    /// Builds a key from a JSON array of parts. A non-array value becomes a
    /// single-part key.
    ///
    /// This is what [`query_key!`](macro@crate::query_key) expands to, so the
    /// macro's parts get `serde_json::json!`'s full syntax, object literals
    /// included.
    pub fn from_json_array(value: Value) -> Self {
        match value {
            Value::Array(parts) => QueryKey::new(parts),
            other => QueryKey::new(vec![other]),
        }
    }

    /// The ordered parts of the key.
    pub fn parts(&self) -> &[Value] {
        &self.parts
    }

    /// Canonical serialization of the key.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Stable hash of the canonical serialization.
    pub fn hash64(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl std::fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "QueryKey({})", self.canonical)
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical)
    }
}

impl From<Vec<Value>> for QueryKey {
    fn from(parts: Vec<Value>) -> Self {
        QueryKey::new(parts)
    }
}

/// Builds a [`QueryKey`] from heterogeneous serializable parts.
///
/// ```
/// use refetch::query_key;
///
/// let key = query_key!["billing", "invoices", 7];
/// assert_eq!(key.parts().len(), 3);
/// ```
// The parts are forwarded verbatim into one json! array so its object
// literal syntax survives; an expr fragment would reject `{ ... }` parts.
#[macro_export]
macro_rules! query_key {
    ($($parts:tt)*) => {
        $crate::QueryKey::from_json_array($crate::serde_json::json!([$($parts)*]))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_with_equal_parts_are_equal() {
        let a = query_key!["workspace", 3];
        let b = query_key!["workspace", 3];
        assert_eq!(a, b);
        assert_eq!(a.hash64(), b.hash64());
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn part_order_is_significant() {
        let a = query_key![3, "workspace"];
        let b = query_key!["workspace", 3];
        assert_ne!(a, b);
    }

    #[test]
    fn object_keys_serialize_sorted() {
        let key = query_key![{ "b": 1, "a": 2 }];
        assert_eq!(key.canonical(), r#"[{"a":2,"b":1}]"#);
    }

    #[test]
    fn macro_accepts_object_literals_and_expressions() {
        let done = false;
        let key = query_key!["todos", 41 + 1, { "done": done }];
        assert_eq!(key.parts().len(), 3);
        assert_eq!(key.canonical(), r#"["todos",42,{"done":false}]"#);
    }

    #[test]
    fn from_json_array_wraps_non_arrays() {
        let key = QueryKey::from_json_array(serde_json::json!("solo"));
        assert_eq!(key.canonical(), r#"["solo"]"#);
    }

    #[test]
    fn hash_survives_clone() {
        let a = query_key!["webhooks", { "page": 1 }];
        let b = a.clone();
        assert_eq!(a.hash64(), b.hash64());
    }
}
