//! Key/value bag carried from a request to its response and to every request
//! spawned from it.
//!
//! The collector never reads or writes a `Context`; it only hands the same
//! bag along. Clones share storage, so a value put by a request callback is
//! visible to the response callbacks of the same page and to child requests.

use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Context {
    values: Arc<DashMap<String, Value>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from a JSON object, as found in serialized requests.
    pub fn from_map(map: Map<String, Value>) -> Self {
        let ctx = Self::new();
        for (key, value) in map {
            ctx.values.insert(key, value);
        }
        ctx
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|v| v.value().clone())
    }

    /// Returns the value under `key` if it is a JSON string.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(|v| v.value().as_str().map(str::to_string))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.remove(key).map(|(_, v)| v)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Visits every entry. Iteration order is unspecified.
    pub fn for_each(&self, mut f: impl FnMut(&str, &Value)) {
        for entry in self.values.iter() {
            f(entry.key(), entry.value());
        }
    }

    /// Copies the entries into a JSON object.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        self.for_each(|k, v| {
            map.insert(k.to_string(), v.clone());
        });
        map
    }
}
