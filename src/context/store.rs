//! Per-request key-value store.
//!
//! The store carries values between middleware and the terminal handler
//! within a single request. Values are type-erased; typed accessors report a
//! wrong-typed value the same way as an absent one.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

type StoredValue = Arc<dyn Any + Send + Sync>;

/// A reader-writer-locked `String → Any` map scoped to one request.
///
/// # Examples
///
/// ```
/// use trellis::context::Store;
///
/// let store = Store::new();
/// store.set("user_id", 42i64);
/// assert_eq!(store.get_i64("user_id"), Some(42));
/// assert_eq!(store.get_string("user_id"), None); // wrong type reads as absent
/// ```
#[derive(Default)]
pub struct Store {
    map: RwLock<HashMap<String, StoredValue>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under `key`, replacing any previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Any + Send + Sync) {
        self.map.write().insert(key.into(), Arc::new(value));
    }

    /// Returns the value under `key` downcast to `T`, or `None` when absent
    /// or of a different type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.map.read().get(key)?.clone();
        value.downcast::<T>().ok()
    }

    /// Like [`get`](Self::get) but panics when the key is absent or the type
    /// does not match. For values a prior middleware is contractually
    /// required to have set.
    pub fn must_get<T: Any + Send + Sync>(&self, key: &str) -> Arc<T> {
        match self.get::<T>(key) {
            Some(value) => value,
            None => panic!("store key '{key}' is absent or has an unexpected type"),
        }
    }

    /// Returns a `String` value by clone, or `None` when absent or not a string.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get::<String>(key).map(|v| (*v).clone())
    }

    /// Returns an `i64` value, or `None` when absent or not an `i64`.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get::<i64>(key).map(|v| *v)
    }

    /// Returns a `bool` value, or `None` when absent or not a `bool`.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get::<bool>(key).map(|v| *v)
    }

    /// Returns `true` when `key` holds a value of any type.
    pub fn contains(&self, key: &str) -> bool {
        self.map.read().contains_key(key)
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Removes every entry, keeping the allocated capacity for pool reuse.
    pub fn clear(&self) {
        self.map.write().clear();
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let store = Store::new();
        store.set("name", "alice".to_owned());
        assert_eq!(store.get_string("name").as_deref(), Some("alice"));
        assert!(store.contains("name"));
        assert!(!store.contains("missing"));
    }

    #[test]
    fn typed_accessors_report_mismatch_as_absent() {
        let store = Store::new();
        store.set("n", 7i64);
        assert_eq!(store.get_i64("n"), Some(7));
        assert_eq!(store.get_string("n"), None);
        assert_eq!(store.get_bool("n"), None);
    }

    #[test]
    fn set_replaces_previous_value() {
        let store = Store::new();
        store.set("k", 1i64);
        store.set("k", true);
        assert_eq!(store.get_i64("k"), None);
        assert_eq!(store.get_bool("k"), Some(true));
    }

    #[test]
    fn arbitrary_types_round_trip() {
        #[derive(Debug, PartialEq)]
        struct User {
            id: u32,
        }
        let store = Store::new();
        store.set("user", User { id: 9 });
        assert_eq!(store.must_get::<User>("user").id, 9);
    }

    #[test]
    #[should_panic(expected = "absent or has an unexpected type")]
    fn must_get_panics_on_absence() {
        Store::new().must_get::<String>("nope");
    }

    #[test]
    fn clear_empties_the_store() {
        let store = Store::new();
        store.set("a", 1i64);
        store.set("b", 2i64);
        store.clear();
        assert!(store.is_empty());
    }
}
