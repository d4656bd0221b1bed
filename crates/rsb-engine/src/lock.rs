//! Per-identifier reader/writer locks.
//!
//! Each live key owns one `tokio::sync::RwLock`. Entries are created on first
//! use and removed when the last guard or waiter for the key goes away, so
//! the table only ever holds keys with operations in flight.

use crate::error::{BrokerError, Result};
use rsb_core::{BindingId, InstanceId};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, warn};

type Entries<K> = Arc<Mutex<HashMap<K, Arc<RwLock<()>>>>>;

/// Lock table keyed by identifier, with a bounded wait on every acquisition.
#[derive(Debug)]
pub struct LockTable<K> {
    entries: Entries<K>,
    timeout: Duration,
}

impl<K> LockTable<K>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    /// Create an empty table whose acquisitions give up after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Acquire shared access to `key`.
    pub async fn read(&self, key: &K) -> Result<LockGuard<K>> {
        let acquired = tokio::time::timeout(self.timeout, self.entry(key).read_owned()).await;
        match acquired {
            Ok(guard) => Ok(self.guard(key, Held::Read(guard))),
            Err(_) => Err(self.busy(key)),
        }
    }

    /// Acquire exclusive access to `key`.
    pub async fn write(&self, key: &K) -> Result<LockGuard<K>> {
        let acquired = tokio::time::timeout(self.timeout, self.entry(key).write_owned()).await;
        match acquired {
            Ok(guard) => Ok(self.guard(key, Held::Write(guard))),
            Err(_) => Err(self.busy(key)),
        }
    }

    /// Number of keys with a holder or waiter.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if no key is locked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured acquisition timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn entry(&self, key: &K) -> Arc<RwLock<()>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            entries
                .entry(key.clone())
                .or_insert_with(|| Arc::new(RwLock::new(()))),
        )
    }

    fn guard(&self, key: &K, held: Held) -> LockGuard<K> {
        LockGuard {
            key: key.clone(),
            held: Some(held),
            entries: Arc::clone(&self.entries),
        }
    }

    /// Called once the timed-out acquisition has been dropped, so a waiter
    /// that outlived the last holder does not leave its entry behind.
    fn busy(&self, key: &K) -> BrokerError {
        prune(&self.entries, key);
        warn!(key = %key, timeout = ?self.timeout, "Lock acquisition timed out");
        BrokerError::Busy {
            key: key.to_string(),
        }
    }
}

enum Held {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
}

/// Access to one key; released on drop.
pub struct LockGuard<K>
where
    K: Eq + Hash,
{
    key: K,
    held: Option<Held>,
    entries: Entries<K>,
}

impl<K> LockGuard<K>
where
    K: Eq + Hash,
{
    /// The locked key.
    #[must_use]
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Whether this guard holds exclusive access.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        matches!(self.held, Some(Held::Write(_)))
    }
}

impl<K> fmt::Debug for LockGuard<K>
where
    K: Eq + Hash + fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key.to_string())
            .field("exclusive", &self.is_exclusive())
            .finish()
    }
}

impl<K> Drop for LockGuard<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        // Release before pruning so the count below excludes this guard.
        drop(self.held.take());
        prune(&self.entries, &self.key);
    }
}

/// Remove `key` when the table holds the only reference to its lock.
fn prune<K>(entries: &Entries<K>, key: &K)
where
    K: Eq + Hash,
{
    let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
    if entries
        .get(key)
        .is_some_and(|lock| Arc::strong_count(lock) == 1)
    {
        entries.remove(key);
        debug!("Pruned idle lock entry");
    }
}

/// Lock key for a binding: unique only within its owning instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingKey {
    /// Owning instance
    pub instance_id: InstanceId,
    /// Binding within the instance
    pub binding_id: BindingId,
}

impl BindingKey {
    /// Create a key.
    #[must_use]
    pub fn new(instance_id: InstanceId, binding_id: BindingId) -> Self {
        Self {
            instance_id,
            binding_id,
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instance_id, self.binding_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> InstanceId {
        InstanceId::new(s).expect("valid instance ID")
    }

    #[tokio::test]
    async fn test_write_excludes_writer() {
        let table = LockTable::new(Duration::from_millis(50));
        let key = id("i1");

        let held = table.write(&key).await.expect("first write");
        let result = table.write(&key).await;
        assert!(matches!(result, Err(BrokerError::Busy { key }) if key == "i1"));

        drop(held);
        assert!(table.write(&key).await.is_ok());
    }

    #[tokio::test]
    async fn test_timed_out_waiter_leaves_no_entry() {
        let table = LockTable::new(Duration::from_millis(20));
        let key = id("i1");

        let held = table.write(&key).await.expect("first write");
        for _ in 0..3 {
            assert!(matches!(table.read(&key).await, Err(BrokerError::Busy { .. })));
        }
        assert_eq!(table.len(), 1);

        drop(held);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_readers_share_but_exclude_writer() {
        let table = LockTable::new(Duration::from_millis(50));
        let key = id("i1");

        let first = table.read(&key).await.expect("first read");
        let second = table.read(&key).await.expect("second read");
        assert!(!first.is_exclusive());

        assert!(matches!(
            table.write(&key).await,
            Err(BrokerError::Busy { .. })
        ));

        drop(first);
        drop(second);
        let writer = table.write(&key).await.expect("write after readers");
        assert!(writer.is_exclusive());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let table = LockTable::new(Duration::from_millis(50));

        let _a = table.write(&id("i1")).await.expect("lock i1");
        let _b = table.write(&id("i2")).await.expect("lock i2");
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_entries_pruned_after_release() {
        let table = LockTable::new(Duration::from_millis(20));
        let key = id("i1");

        {
            let _guard = table.write(&key).await.expect("lock");
            assert_eq!(table.len(), 1);
            let _ = table.read(&key).await;
            assert_eq!(table.len(), 1);
        }

        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_binding_key_display() {
        let key = BindingKey::new(id("i1"), BindingId::new("b1").expect("valid binding ID"));
        assert_eq!(key.to_string(), "i1/b1");

        let table = LockTable::new(Duration::from_millis(20));
        let _guard = table.write(&key).await.expect("lock binding");
        let other = BindingKey::new(id("i1"), BindingId::new("b2").expect("valid binding ID"));
        assert!(table.write(&other).await.is_ok());
    }
}
