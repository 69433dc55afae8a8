//! Namespace locks: one reader/writer lock per resource name, created on
//! first use and dropped again once nobody holds or waits for it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type LockTable = HashMap<String, Arc<RwLock<()>>>;

#[derive(Debug, Clone, Default)]
pub struct NsLockMap {
    locks: Arc<Mutex<LockTable>>,
}

#[derive(Debug)]
enum Held {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
}

/// Releases the lock on drop.
#[derive(Debug)]
pub struct NsLockGuard {
    held: Option<Held>,
    lock: Arc<RwLock<()>>,
    name: String,
    table: Arc<Mutex<LockTable>>,
}

impl NsLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, name: &str) -> Arc<RwLock<()>> {
        lock_table(&self.locks)
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    pub async fn read(&self, name: &str) -> NsLockGuard {
        let lock = self.entry(name);
        let held = Held::Read(lock.clone().read_owned().await);
        self.guard(name, lock, held)
    }

    pub async fn write(&self, name: &str) -> NsLockGuard {
        let lock = self.entry(name);
        let held = Held::Write(lock.clone().write_owned().await);
        self.guard(name, lock, held)
    }

    fn guard(&self, name: &str, lock: Arc<RwLock<()>>, held: Held) -> NsLockGuard {
        NsLockGuard {
            held: Some(held),
            lock,
            name: name.to_string(),
            table: self.locks.clone(),
        }
    }

    /// Number of live lock entries.
    pub fn len(&self) -> usize {
        lock_table(&self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for NsLockGuard {
    fn drop(&mut self) {
        self.held.take();
        let mut table = lock_table(&self.table);
        // One reference in the table and one here: no other holder or waiter.
        if Arc::strong_count(&self.lock) == 2 {
            table.remove(&self.name);
        }
    }
}

fn lock_table(table: &Mutex<LockTable>) -> MutexGuard<'_, LockTable> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn object_resource(bucket: &str, key: &str) -> String {
    format!("object/{bucket}/{key}")
}

pub fn upload_resource(bucket: &str, upload_id: &str) -> String {
    format!("upload/{bucket}/{upload_id}")
}

pub fn part_resource(bucket: &str, upload_id: &str, part_number: u32) -> String {
    format!("part/{bucket}/{upload_id}/{part_number}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn readers_share_and_writers_exclude() {
        let locks = NsLockMap::new();
        let first = locks.read("a").await;
        let second = locks.read("a").await;
        assert_eq!(locks.len(), 1);

        let pending = tokio::time::timeout(Duration::from_millis(50), locks.write("a")).await;
        assert!(pending.is_err());

        drop(first);
        drop(second);
        let writer = locks.write("a").await;
        let other = locks.write("b").await;
        assert_eq!(locks.len(), 2);
        drop(writer);
        drop(other);
    }

    #[tokio::test]
    async fn entries_are_removed_when_unused() {
        let locks = NsLockMap::new();
        {
            let _guard = locks.write(&object_resource("bucket", "key")).await;
            assert!(!locks.is_empty());
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn waiters_keep_the_entry_alive() {
        let locks = NsLockMap::new();
        let guard = locks.write("k").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.write("k").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        assert!(!locks.is_empty() || waiter.is_finished());

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
