//! In-memory control bus for tests and demos.

use std::{
    collections::HashMap,
    convert::Infallible,
    future::Future,
    sync::{Arc, Mutex},
};

use serde_json::Value;

use super::ControlBus;
use crate::IgnoreMutexErr;

/// Write operations observed by the bus, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum BusOp {
    Set { key: String, value: Value },
    SetMany { entries: Vec<(String, Value)> },
}

/// Shared-handle in-memory store. Clones share the same map and write
/// log, so a test can keep a handle for inspection while an executor or
/// cache owns another.
#[derive(Clone, Default)]
pub struct MemoryBus {
    store: Arc<Mutex<HashMap<String, Value>>>,
    write_log: Arc<Mutex<Vec<BusOp>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains the write log.
    pub fn take_ops(&self) -> Vec<BusOp> {
        std::mem::take(&mut *self.write_log.lock().unwrap_ignore_poison())
    }

    /// Copy of the current key/value contents.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.store.lock().unwrap_ignore_poison().clone()
    }
}

impl ControlBus for MemoryBus {
    type Error = Infallible;

    fn get(&mut self, key: &str) -> impl Future<Output = Result<Option<Value>, Infallible>> + Send {
        let store = self.store.clone();
        async move { Ok(store.lock().unwrap_ignore_poison().get(key).cloned()) }
    }

    fn set(
        &mut self,
        key: &str,
        value: Value,
    ) -> impl Future<Output = Result<(), Infallible>> + Send {
        let store = self.store.clone();
        let write_log = self.write_log.clone();
        async move {
            store
                .lock()
                .unwrap_ignore_poison()
                .insert(key.to_string(), value.clone());
            write_log.lock().unwrap_ignore_poison().push(BusOp::Set {
                key: key.to_string(),
                value,
            });
            Ok(())
        }
    }

    fn set_many(
        &mut self,
        entries: &[(String, Value)],
    ) -> impl Future<Output = Result<(), Infallible>> + Send {
        let store = self.store.clone();
        let write_log = self.write_log.clone();
        let entries = entries.to_vec();
        async move {
            // one lock scope, the batch lands as a unit
            let mut store = store.lock().unwrap_ignore_poison();
            for (key, value) in &entries {
                store.insert(key.clone(), value.clone());
            }
            drop(store);
            write_log
                .lock()
                .unwrap_ignore_poison()
                .push(BusOp::SetMany { entries });
            Ok(())
        }
    }

    fn batch_get(
        &mut self,
        keys: &[String],
    ) -> impl Future<Output = Result<Vec<Option<Value>>, Infallible>> + Send {
        let store = self.store.clone();
        let keys = keys.to_vec();
        async move {
            let store = store.lock().unwrap_ignore_poison();
            Ok(keys.iter().map(|k| store.get(k).cloned()).collect())
        }
    }

    fn keys(&mut self, pattern: &str) -> impl Future<Output = Result<Vec<String>, Infallible>> + Send {
        let store = self.store.clone();
        let pattern = pattern.to_string();
        async move {
            let store = store.lock().unwrap_ignore_poison();
            let mut matching: Vec<String> = store
                .keys()
                .filter(|k| wildcard_match(pattern.as_bytes(), k.as_bytes()))
                .cloned()
                .collect();
            matching.sort();
            Ok(matching)
        }
    }
}

/// `*` matches any run of bytes, `?` any single byte.
fn wildcard_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some(p);
            mark = t;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            mark += 1;
            t = mark;
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::wildcard_match;

    fn matches(pattern: &str, text: &str) -> bool {
        wildcard_match(pattern.as_bytes(), text.as_bytes())
    }

    #[test]
    fn wildcard_patterns() {
        assert!(matches("*", "anything::at::all"));
        assert!(matches("robot::*", "robot::sensors::q"));
        assert!(!matches("robot::*", "interface::sensors::q"));
        assert!(matches("*::q", "robot::sensors::q"));
        assert!(matches("robot::?", "robot::q"));
        assert!(!matches("robot::?", "robot::dq"));
        assert!(matches("exact", "exact"));
        assert!(!matches("exact", "exact::not"));
    }
}
