use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{Duration, Utc};
use thiserror::Error;

use crate::errors::AuthError;
use crate::types::Timestamp;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        AuthError::Store(e.to_string())
    }
}

/// Keyed store the auth core runs against.
///
/// Each method is a single atomic step with respect to other callers. The
/// single-use nonce guarantee rests on `take`, and session refresh relies on
/// `replace` never recreating a row that a concurrent revoke removed.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Upsert.
    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Inserts only when the key is vacant. Returns the existing value
    /// otherwise, leaving it untouched.
    fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<Option<Vec<u8>>, StoreError>;

    /// Overwrites only when the key is present. Returns whether it wrote.
    fn replace(&self, key: &str, value: Vec<u8>) -> Result<bool, StoreError>;

    /// Atomic get-and-delete.
    fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Deletes only while the stored value still equals `expected`, so a
    /// sweep never removes a row that was rewritten after it was read.
    fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError>;

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryStore {
    kv: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Vec<u8>>>, StoreError> {
        self.kv
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.kv.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<Option<Vec<u8>>, StoreError> {
        let mut kv = self.lock()?;
        if let Some(existing) = kv.get(key) {
            return Ok(Some(existing.clone()));
        }
        kv.insert(key.to_string(), value);
        Ok(None)
    }

    fn replace(&self, key: &str, value: Vec<u8>) -> Result<bool, StoreError> {
        let mut kv = self.lock()?;
        match kv.get_mut(key) {
            Some(slot) => {
                *slot = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock()?.remove(key))
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.remove(key).is_some())
    }

    fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError> {
        let mut kv = self.lock()?;
        if kv.get(key).map(Vec::as_slice) != Some(expected) {
            return Ok(false);
        }
        kv.remove(key);
        Ok(true)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let kv = self.lock()?;
        Ok(kv
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }

    pub fn set(&self, to: Timestamp) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.now.lock().map(|n| *n).unwrap_or_else(|e| *e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_removes_exactly_once() {
        let store = InMemoryStore::new();
        store.put("nonce/voi/A", b"x".to_vec()).unwrap();

        assert_eq!(store.take("nonce/voi/A").unwrap(), Some(b"x".to_vec()));
        assert_eq!(store.take("nonce/voi/A").unwrap(), None);
    }

    #[test]
    fn put_if_absent_keeps_first_writer() {
        let store = InMemoryStore::new();
        assert_eq!(store.put_if_absent("owner/k", b"p1".to_vec()).unwrap(), None);
        assert_eq!(
            store.put_if_absent("owner/k", b"p2".to_vec()).unwrap(),
            Some(b"p1".to_vec())
        );
        assert_eq!(store.get("owner/k").unwrap(), Some(b"p1".to_vec()));
    }

    #[test]
    fn replace_does_not_resurrect() {
        let store = InMemoryStore::new();
        assert!(!store.replace("session/token/h", b"row".to_vec()).unwrap());
        assert!(store.get("session/token/h").unwrap().is_none());
    }

    #[test]
    fn delete_if_eq_skips_rewritten_rows() {
        let store = InMemoryStore::new();
        store.put("nonce/voi/A", b"old".to_vec()).unwrap();
        store.put("nonce/voi/A", b"new".to_vec()).unwrap();

        assert!(!store.delete_if_eq("nonce/voi/A", b"old").unwrap());
        assert!(store.delete_if_eq("nonce/voi/A", b"new").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn scan_prefix_is_bounded() {
        let store = InMemoryStore::new();
        store.put("link/p1/voi/A", vec![1]).unwrap();
        store.put("link/p1/voi/B", vec![2]).unwrap();
        store.put("link/p2/voi/C", vec![3]).unwrap();

        let rows = store.scan_prefix("link/p1/").unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::seconds(30));
        assert_eq!(clock.now(), start + Duration::seconds(30));
    }
}
