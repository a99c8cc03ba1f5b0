use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Structurally compared cache key, e.g. `["emails", {"page": 1, "size": 50}]`.
///
/// Two keys built from deep-equal parts address the same cache slot, no
/// matter in which order the fields of a nested object were inserted.
/// Equality and hashing go through a canonical string in which object
/// members are sorted by name.
#[derive(Clone)]
pub struct QueryKey {
    parts: Vec<Value>,
    canonical: String,
}

impl QueryKey {
    /// Build a key from its parts
    pub fn new(parts: Vec<Value>) -> Self {
        let canonical = canonical_string(&parts);
        Self { parts, canonical }
    }

    /// Start a key family, e.g. `QueryKey::root("emails")`
    pub fn root(name: &str) -> Self {
        Self::new(vec![Value::String(name.to_string())])
    }

    /// Append one more part to the key
    pub fn with(mut self, part: impl Into<Value>) -> Self {
        self.parts.push(part.into());
        self.canonical = canonical_string(&self.parts);
        self
    }

    pub fn parts(&self) -> &[Value] {
        &self.parts
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// True if `prefix` addresses this key or the family it belongs to.
    ///
    /// `["emails"]` is a prefix of `["emails", {"page": 1}]` but not of
    /// `["email", "42"]`.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        prefix.parts.len() <= self.parts.len()
            && prefix
                .parts
                .iter()
                .zip(self.parts.iter())
                .all(|(a, b)| canonical_value(a) == canonical_value(b))
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
        self.canonical.hash(state);
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryKey({})", self.canonical)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl From<&str> for QueryKey {
    fn from(name: &str) -> Self {
        QueryKey::root(name)
    }
}

fn canonical_string(parts: &[Value]) -> String {
    let mut out = String::from("[");
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_canonical(part, &mut out);
    }
    out.push(']');
    out
}

fn canonical_value(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

// Objects are written with their members sorted so that insertion order
// never changes the key.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (name, member)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(member, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_structural_equality_ignores_member_order() {
        let mut a = serde_json::Map::new();
        a.insert("page".to_string(), json!(1));
        a.insert("size".to_string(), json!(50));
        let mut b = serde_json::Map::new();
        b.insert("size".to_string(), json!(50));
        b.insert("page".to_string(), json!(1));

        let k1 = QueryKey::root("emails").with(Value::Object(a));
        let k2 = QueryKey::root("emails").with(Value::Object(b));
        assert_eq!(k1, k2);

        let mut set = HashSet::new();
        set.insert(k1);
        assert!(set.contains(&k2));
    }

    #[test]
    fn test_different_values_are_different_keys() {
        let k1 = QueryKey::root("emails").with(json!({"page": 1}));
        let k2 = QueryKey::root("emails").with(json!({"page": 2}));
        assert_ne!(k1, k2);
        assert_ne!(QueryKey::root("email").with("1"), QueryKey::root("email").with(1));
    }

    #[test]
    fn test_prefix_matching() {
        let family = QueryKey::root("emails");
        let page = QueryKey::root("emails").with(json!({"page": 1, "query": null}));
        let single = QueryKey::root("email").with("42");

        assert!(page.starts_with(&family));
        assert!(family.starts_with(&family));
        assert!(!single.starts_with(&family));
        assert!(!family.starts_with(&page));
        assert!(single.starts_with(&QueryKey::root("email").with("42")));
    }

    #[test]
    fn test_canonical_form() {
        let key = QueryKey::root("emails").with(json!({"size": 50, "page": 1}));
        assert_eq!(key.canonical(), r#"["emails",{"page":1,"size":50}]"#);
        assert_eq!(key.to_string(), key.canonical());
    }
}
