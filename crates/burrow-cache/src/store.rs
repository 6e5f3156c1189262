//! The transactional key/value boundary and the in-memory backend.
//!
//! The cache only ever talks to [`Store`]; swapping in a persistent
//! backend means implementing these two traits. Writes are buffered in the
//! transaction and applied atomically on commit. A write transaction must
//! not be held across a suspension point; the single-threaded worker
//! upholds that by construction.

use crate::error::{CacheError, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// An ordered key/value store with transactions.
pub trait Store: Send + Sync {
    /// Opens a transaction. Read-only transactions reject mutation.
    fn begin(&self, write: bool) -> Result<Box<dyn StoreTxn>>;

    /// Number of stored keys outside any transaction.
    fn len(&self) -> usize;

    /// True when no keys are stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One store transaction.
pub trait StoreTxn: Send {
    /// Looks up a key, observing this transaction's own pending writes.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Inserts or replaces a value.
    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Removes a key; removing an absent key reports [`CacheError::Miss`].
    fn remove(&mut self, key: &[u8]) -> Result<()>;

    /// Drops every key.
    fn clear(&mut self) -> Result<()>;

    /// Number of keys as seen by this transaction.
    fn count(&self) -> usize;

    /// Applies buffered writes. A failed commit must leave the store as if
    /// the transaction had been aborted.
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discards buffered writes.
    fn abort(self: Box<Self>);
}

/// Pending mutation inside a [`MemTxn`].
#[derive(Debug, Clone)]
enum Pending {
    Put(Vec<u8>),
    Del,
}

/// BTreeMap-backed store. Prefix ordering of keys gives the zone locality
/// the key encoding is designed for.
#[derive(Debug, Default)]
pub struct MemStore {
    map: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemStore {
    fn begin(&self, write: bool) -> Result<Box<dyn StoreTxn>> {
        Ok(Box::new(MemTxn {
            map: Arc::clone(&self.map),
            write,
            clear_first: false,
            pending: BTreeMap::new(),
        }))
    }

    fn len(&self) -> usize {
        self.map.read().len()
    }
}

/// Transaction over a [`MemStore`].
struct MemTxn {
    map: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    write: bool,
    clear_first: bool,
    pending: BTreeMap<Vec<u8>, Pending>,
}

impl MemTxn {
    fn require_write(&self) -> Result<()> {
        if !self.write {
            return Err(CacheError::BadTxn {
                reason: "mutation in a read-only transaction",
            });
        }
        Ok(())
    }
}

impl StoreTxn for MemTxn {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(pending) = self.pending.get(key) {
            return Ok(match pending {
                Pending::Put(v) => Some(v.clone()),
                Pending::Del => None,
            });
        }
        if self.clear_first {
            return Ok(None);
        }
        Ok(self.map.read().get(key).cloned())
    }

    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.require_write()?;
        self.pending.insert(key.to_vec(), Pending::Put(value.to_vec()));
        Ok(())
    }

    fn remove(&mut self, key: &[u8]) -> Result<()> {
        self.require_write()?;
        if self.get(key)?.is_none() {
            return Err(CacheError::Miss);
        }
        self.pending.insert(key.to_vec(), Pending::Del);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.require_write()?;
        self.clear_first = true;
        self.pending.clear();
        Ok(())
    }

    fn count(&self) -> usize {
        if self.clear_first {
            return self
                .pending
                .values()
                .filter(|p| matches!(p, Pending::Put(_)))
                .count();
        }
        let map = self.map.read();
        let mut count = map.len();
        for (key, pending) in &self.pending {
            match (pending, map.contains_key(key)) {
                (Pending::Put(_), false) => count += 1,
                (Pending::Del, true) => count -= 1,
                _ => {}
            }
        }
        count
    }

    fn commit(self: Box<Self>) -> Result<()> {
        if !self.write {
            return Ok(());
        }
        let mut map = self.map.write();
        if self.clear_first {
            map.clear();
        }
        for (key, pending) in self.pending {
            match pending {
                Pending::Put(v) => {
                    map.insert(key, v);
                }
                Pending::Del => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn abort(self: Box<Self>) {}
}
