//! In-process key/value table used for telemetry and tuning exchange.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Key/value store capability.
pub trait KeyValueStore: Send + Sync {
    fn set(&self, key: &str, value: &str);

    /// Stored value, or an empty string when the key is absent.
    fn get(&self, key: &str) -> String;

    fn has(&self, key: &str) -> bool;
}

/// Shared string table. Clones refer to the same storage.
#[derive(Debug, Clone, Default)]
pub struct NetworkTable {
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl NetworkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys travel newline-delimited; strip delimiter bytes.
    fn sanitize(key: &str) -> String {
        key.chars().filter(|&c| c != '\n' && c != '\u{ff}').collect()
    }

    /// Store a value received from the remote side, key taken verbatim.
    pub fn set_remote(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.write().insert(key.into(), value.into());
    }

    /// Apply a batch of remote values atomically.
    pub fn merge(&self, values: impl IntoIterator<Item = (String, String)>) {
        self.data.write().extend(values);
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.data.read().clone()
    }
}

impl KeyValueStore for NetworkTable {
    fn set(&self, key: &str, value: &str) {
        self.data
            .write()
            .insert(Self::sanitize(key), value.to_owned());
    }

    fn get(&self, key: &str) -> String {
        self.data.read().get(key).cloned().unwrap_or_default()
    }

    fn has(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }
}
