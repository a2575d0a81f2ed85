//! Typed scratch map shared by the stages of one request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::session::Session;

/// Keys stages use to pass results along the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainKey {
    /// Session bound to the request (`get-session`).
    Session,
    /// Validated request method (`only-get-or-post`).
    Operation,
    /// Decoded form fields (`decode-post-form-urlencoded`).
    PostFields,
    /// File to serve (`get-resource-path-from-url`).
    ResourcePath,
}

#[derive(Debug, Clone)]
pub enum ChainValue {
    Session(Arc<Session>),
    Text(String),
    Fields(FormFields),
    Path(PathBuf),
}

/// Chain info map with typed accessors.
#[derive(Debug, Clone, Default)]
pub struct ChainInfo {
    values: HashMap<ChainKey, ChainValue>,
}

impl ChainInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: ChainKey, value: ChainValue) {
        self.values.insert(key, value);
    }

    pub fn get(&self, key: ChainKey) -> Option<&ChainValue> {
        self.values.get(&key)
    }

    pub fn contains(&self, key: ChainKey) -> bool {
        self.values.contains_key(&key)
    }

    pub fn session(&self) -> Option<&Arc<Session>> {
        match self.values.get(&ChainKey::Session) {
            Some(ChainValue::Session(session)) => Some(session),
            _ => None,
        }
    }

    pub fn operation(&self) -> Option<&str> {
        match self.values.get(&ChainKey::Operation) {
            Some(ChainValue::Text(operation)) => Some(operation),
            _ => None,
        }
    }

    pub fn post_fields(&self) -> Option<&FormFields> {
        match self.values.get(&ChainKey::PostFields) {
            Some(ChainValue::Fields(fields)) => Some(fields),
            _ => None,
        }
    }

    pub fn resource_path(&self) -> Option<&Path> {
        match self.values.get(&ChainKey::ResourcePath) {
            Some(ChainValue::Path(path)) => Some(path),
            _ => None,
        }
    }
}

/// Decoded `name=value` pairs in arrival order. A repeated name keeps its
/// first position and takes the last value.
#[derive(Debug, Clone, Default)]
pub struct FormFields {
    fields: IndexMap<String, String>,
}

impl PartialEq for FormFields {
    fn eq(&self, other: &Self) -> bool {
        self.iter().eq(other.iter())
    }
}

impl Eq for FormFields {}

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.fields.shift_remove(name)
    }

    /// Remove and return the first field.
    pub fn pop_first(&mut self) -> Option<(String, String)> {
        self.fields.shift_remove_index(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters_ignore_mismatched_values() {
        let mut info = ChainInfo::new();
        info.insert(ChainKey::ResourcePath, ChainValue::Text("not a path".into()));
        assert!(info.contains(ChainKey::ResourcePath));
        assert!(info.resource_path().is_none());

        info.insert(ChainKey::ResourcePath, ChainValue::Path("/srv/index.html".into()));
        assert_eq!(info.resource_path(), Some(Path::new("/srv/index.html")));
    }

    #[test]
    fn form_fields_keep_order() {
        let mut fields = FormFields::new();
        fields.insert("b", "1");
        fields.insert("a", "2");
        fields.insert("b", "3");
        let pairs: Vec<_> = fields.iter().collect();
        assert_eq!(pairs, vec![("b", "3"), ("a", "2")]);

        assert_eq!(fields.pop_first(), Some(("b".into(), "3".into())));
        assert_eq!(fields.remove("a").as_deref(), Some("2"));
        assert!(fields.is_empty());
        assert_eq!(fields.pop_first(), None);
    }

    #[test]
    fn form_fields_equality_is_ordered() {
        let mut ab = FormFields::new();
        ab.insert("a", "1");
        ab.insert("b", "2");
        let mut ba = FormFields::new();
        ba.insert("b", "2");
        ba.insert("a", "1");
        assert_ne!(ab, ba);

        ba.pop_first();
        ba.insert("b", "2");
        assert_eq!(ab, ba);
    }

    #[test]
    fn many_repeated_names_stay_unique() {
        let mut fields = FormFields::new();
        for round in 0..50 {
            for i in 0..1_000 {
                fields.insert(format!("f{}", i), round.to_string());
            }
        }
        assert_eq!(fields.len(), 1_000);
        assert_eq!(fields.get("f999"), Some("49"));
        assert_eq!(fields.iter().next(), Some(("f0", "49")));
        assert_eq!(fields.remove("f500").as_deref(), Some("49"));
        assert_eq!(fields.iter().nth(500).map(|(n, _)| n), Some("f501"));
    }
}
