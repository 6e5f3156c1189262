//! # burrow-cache
//!
//! Transactional record cache for the burrow resolver.
//!
//! Entries are tagged, time-stamped RRSets stored under
//! `tag || label-reversed name || rrtype` keys in an ordered KV store, so
//! a zone's records cluster together. Every entry carries a trust
//! [`Rank`]; inserts may never lower the rank of a live entry. The store
//! is versioned: opening a non-empty store written by a different version
//! clears it rather than misreading it.
//!
//! Cache failures are deliberately non-fatal for callers: the resolver
//! treats any error as a miss and goes to the network.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod error;
pub mod key;
pub mod rank;
pub mod store;

pub use entry::{materialize, EntryHeader, FLAG_WCARD_PROOF, HEADER_LEN};
pub use error::{CacheError, Result};
pub use key::Tag;
pub use rank::Rank;
pub use store::{MemStore, Store, StoreTxn};

use burrow_proto::{Name, RClass, RType, RrSet};
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Key of the version marker, outside every tag's keyspace.
const VERSION_KEY: &[u8] = &[0x00];

/// Current on-store format version.
const VERSION_VAL: &[u8] = b"V\x02";

/// Cache operation counters, read by the resolver to steer throttling.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Successful peeks.
    pub hit: AtomicU64,
    /// Failed peeks, stale included.
    pub miss: AtomicU64,
    /// Insert attempts.
    pub insert: AtomicU64,
    /// Deletions.
    pub delete: AtomicU64,
    /// Read transactions opened.
    pub txn_read: AtomicU64,
    /// Write transactions opened.
    pub txn_write: AtomicU64,
}

impl CacheStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Hit ratio over all peeks so far.
    pub fn hit_ratio(&self) -> f64 {
        let hit = self.hit.load(Ordering::Relaxed) as f64;
        let miss = self.miss.load(Ordering::Relaxed) as f64;
        if hit + miss == 0.0 {
            0.0
        } else {
            hit / (hit + miss)
        }
    }
}

/// The record cache.
pub struct Cache {
    store: Arc<dyn Store>,
    stats: CacheStats,
    max_entries: usize,
}

impl Cache {
    /// Opens the cache over a backing store, enforcing the format version.
    ///
    /// A non-empty store carrying a different (or missing) version marker
    /// is cleared and re-stamped.
    pub fn open(store: Arc<dyn Store>) -> Result<Self> {
        Self::open_with_limit(store, 0)
    }

    /// Like [`open`](Self::open), bounding the entry count. Inserts of
    /// new keys into a full cache are dropped (existing keys still
    /// refresh); zero means unbounded.
    pub fn open_with_limit(store: Arc<dyn Store>, max_entries: usize) -> Result<Self> {
        let mut txn = store.begin(true)?;
        match txn.get(VERSION_KEY)? {
            Some(v) if v == VERSION_VAL => {}
            None if txn.count() == 0 => {
                txn.insert(VERSION_KEY, VERSION_VAL)?;
            }
            other => {
                warn!(
                    found = ?other.map(|v| v.len()),
                    "cache version mismatch, clearing store"
                );
                txn.clear()?;
                txn.insert(VERSION_KEY, VERSION_VAL)?;
            }
        }
        txn.commit()?;
        Ok(Self {
            store,
            stats: CacheStats::default(),
            max_entries,
        })
    }

    /// Opens a fresh in-memory cache. Convenience for tests and defaults.
    pub fn in_memory() -> Self {
        Self::open(Arc::new(MemStore::new())).expect("empty store always opens")
    }

    /// Closes the cache, releasing the store handle. Data survives in
    /// the backing store; only the connection goes away.
    pub fn close(self) {}

    /// Operation counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of cached entries, version marker excluded.
    pub fn count(&self) -> usize {
        self.store.len().saturating_sub(1)
    }

    /// Opens a cache transaction.
    pub fn begin(&self, write: bool) -> Result<CacheTxn<'_>> {
        if write {
            CacheStats::bump(&self.stats.txn_write);
        } else {
            CacheStats::bump(&self.stats.txn_read);
        }
        Ok(CacheTxn {
            inner: Some(self.store.begin(write)?),
            cache: self,
        })
    }
}

/// A transaction over the cache. Aborts on drop unless committed.
pub struct CacheTxn<'a> {
    inner: Option<Box<dyn StoreTxn>>,
    cache: &'a Cache,
}

impl CacheTxn<'_> {
    fn txn(&self) -> &dyn StoreTxn {
        self.inner.as_deref().expect("transaction already consumed")
    }

    fn txn_mut(&mut self) -> &mut dyn StoreTxn {
        self.inner.as_deref_mut().expect("transaction already consumed")
    }

    /// Raw lookup of an entry with freshness accounting.
    ///
    /// Returns the header, the packed rdata, and the TTL drift. An entry
    /// stamped in the future (clock skew on a shared store) hits with a
    /// drift of zero.
    pub fn peek(
        &self,
        tag: Tag,
        name: &Name,
        rtype: RType,
        now: u32,
    ) -> Result<(EntryHeader, Bytes, u32)> {
        let key = key::entry_key(tag, name, rtype);
        let value = match self.txn().get(&key)? {
            Some(v) => v,
            None => {
                CacheStats::bump(&self.cache.stats.miss);
                return Err(CacheError::Miss);
            }
        };
        let header = EntryHeader::decode(&value)?;
        let data = Bytes::copy_from_slice(&value[HEADER_LEN..]);

        if now <= header.timestamp {
            CacheStats::bump(&self.cache.stats.hit);
            return Ok((header, data, 0));
        }
        let drift = now - header.timestamp;
        if drift <= header.ttl {
            CacheStats::bump(&self.cache.stats.hit);
            Ok((header, data, drift))
        } else {
            CacheStats::bump(&self.cache.stats.miss);
            Err(CacheError::Stale { rank: header.rank })
        }
    }

    /// Rank of the entry under a key, fresh or stale.
    ///
    /// Unlike [`peek`](Self::peek), a stale entry still yields its rank;
    /// the iterator uses this to decide whether fetched data may replace
    /// what is already there.
    pub fn peek_rank(&self, tag: Tag, name: &Name, rtype: RType, now: u32) -> Result<Rank> {
        match self.peek(tag, name, rtype, now) {
            Ok((header, _, _)) => Ok(header.rank),
            Err(CacheError::Stale { rank }) => Ok(rank),
            Err(e) => Err(e),
        }
    }

    /// Inserts an entry, replacing what is stored under the key.
    ///
    /// Replacement is suppressed when a live entry of higher rank exists;
    /// the call still reports success so callers need not special-case it.
    /// Expired entries are always overwritten.
    pub fn insert(
        &mut self,
        tag: Tag,
        name: &Name,
        rtype: RType,
        header: EntryHeader,
        data: &[u8],
    ) -> Result<()> {
        CacheStats::bump(&self.cache.stats.insert);
        let key = key::entry_key(tag, name, rtype);

        let existing = self.txn().get(&key)?;
        if existing.is_none()
            && self.cache.max_entries != 0
            && self.txn().count() > self.cache.max_entries
        {
            debug!(%name, %rtype, "cache full, insert dropped");
            return Ok(());
        }

        if let Some(existing) = existing {
            if let Ok(old) = EntryHeader::decode(&existing) {
                let now = header.timestamp;
                let live = now <= old.timestamp || now - old.timestamp <= old.ttl;
                if live && old.rank > header.rank {
                    debug!(%name, %rtype, old = %old.rank, new = %header.rank,
                        "insert suppressed by rank");
                    return Ok(());
                }
            }
        }

        let mut value = BytesMut::with_capacity(HEADER_LEN + data.len());
        header.encode_into(&mut value);
        value.extend_from_slice(data);
        self.txn_mut().insert(&key, &value)
    }

    /// Removes the entry under a key.
    pub fn remove(&mut self, tag: Tag, name: &Name, rtype: RType) -> Result<()> {
        CacheStats::bump(&self.cache.stats.delete);
        let key = key::entry_key(tag, name, rtype);
        self.txn_mut().remove(&key)
    }

    /// Drops every entry and restores the version marker.
    pub fn clear(&mut self) -> Result<()> {
        self.txn_mut().clear()?;
        self.txn_mut().insert(VERSION_KEY, VERSION_VAL)
    }

    /// Looks up an RRSet. TTLs in the result are the original stored
    /// values; pass the returned drift to [`materialize`] to age them.
    pub fn peek_rr(
        &self,
        name: &Name,
        rtype: RType,
        now: u32,
    ) -> Result<(RrSet, u32, Rank, u8)> {
        let (header, data, drift) = self.peek(Tag::Record, name, rtype, now)?;
        let set = entry::unpack_rdata(name.clone(), rtype, RClass::In, header.count, &data)?;
        Ok((set, drift, header.rank, header.flags))
    }

    /// Stores an RRSet under the record tag. Empty sets are a no-op.
    pub fn insert_rr(&mut self, set: &RrSet, rank: Rank, flags: u8, timestamp: u32) -> Result<()> {
        if set.is_empty() {
            return Ok(());
        }
        let header = EntryHeader {
            timestamp,
            ttl: set.max_ttl(),
            count: set.len() as u16,
            rank,
            flags,
        };
        let data = entry::pack_rdata(set);
        self.insert(Tag::Record, &set.owner, set.rtype, header, &data)
    }

    /// Looks up the signature set covering `(name, rtype)`.
    pub fn peek_sig(
        &self,
        name: &Name,
        covered: RType,
        now: u32,
    ) -> Result<(RrSet, u32, Rank)> {
        let (header, data, drift) = self.peek(Tag::Signature, name, covered, now)?;
        let set = entry::unpack_rdata(name.clone(), RType::Rrsig, RClass::In, header.count, &data)?;
        Ok((set, drift, header.rank))
    }

    /// Stores the signature set covering `covered`.
    pub fn insert_sig(
        &mut self,
        set: &RrSet,
        covered: RType,
        rank: Rank,
        timestamp: u32,
    ) -> Result<()> {
        if set.is_empty() {
            return Ok(());
        }
        let header = EntryHeader {
            timestamp,
            ttl: set.max_ttl(),
            count: set.len() as u16,
            rank,
            flags: 0,
        };
        let data = entry::pack_rdata(set);
        self.insert(Tag::Signature, &set.owner, covered, header, &data)
    }

    /// Commits buffered writes. Failure leaves the store unchanged.
    pub fn commit(mut self) -> Result<()> {
        self.inner
            .take()
            .expect("transaction already consumed")
            .commit()
    }

    /// Discards buffered writes.
    pub fn abort(mut self) {
        if let Some(inner) = self.inner.take() {
            inner.abort();
        }
    }
}

impl Drop for CacheTxn<'_> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn a_set(name: &str, ttl: u32, addr: Ipv4Addr) -> RrSet {
        let mut set = RrSet::new(name.parse().unwrap(), RType::A, RClass::In);
        set.push(ttl, Bytes::copy_from_slice(&addr.octets()));
        set
    }

    #[test]
    fn insert_then_peek_fresh() {
        let cache = Cache::in_memory();
        let set = a_set("example.com", 300, Ipv4Addr::new(10, 0, 0, 1));

        let mut txn = cache.begin(true).unwrap();
        txn.insert_rr(&set, Rank::AUTH, 0, 1000).unwrap();
        txn.commit().unwrap();

        let txn = cache.begin(false).unwrap();
        let (found, drift, rank, _) = txn.peek_rr(&set.owner, RType::A, 1100).unwrap();
        assert_eq!(drift, 100);
        assert_eq!(rank, Rank::AUTH);
        assert_eq!(found, set);

        let aged = materialize(&found, drift);
        assert_eq!(aged.items[0].ttl, 200);
    }

    #[test]
    fn freshness_window_is_inclusive() {
        let cache = Cache::in_memory();
        let set = a_set("example.com", 300, Ipv4Addr::new(10, 0, 0, 1));
        let mut txn = cache.begin(true).unwrap();
        txn.insert_rr(&set, Rank::AUTH, 0, 1000).unwrap();
        txn.commit().unwrap();

        let txn = cache.begin(false).unwrap();
        assert!(txn.peek_rr(&set.owner, RType::A, 1300).is_ok());
        assert!(matches!(
            txn.peek_rr(&set.owner, RType::A, 1301),
            Err(CacheError::Stale { rank: Rank::AUTH })
        ));
    }

    #[test]
    fn future_entry_hits_with_zero_drift() {
        let cache = Cache::in_memory();
        let set = a_set("example.com", 300, Ipv4Addr::new(10, 0, 0, 1));
        let mut txn = cache.begin(true).unwrap();
        txn.insert_rr(&set, Rank::AUTH, 0, 5000).unwrap();
        txn.commit().unwrap();

        let txn = cache.begin(false).unwrap();
        let (_, drift, _, _) = txn.peek_rr(&set.owner, RType::A, 1000).unwrap();
        assert_eq!(drift, 0);
    }

    #[test]
    fn rank_downgrade_suppressed_on_live_entry() {
        let cache = Cache::in_memory();
        let secure = a_set("example.com", 300, Ipv4Addr::new(10, 0, 0, 1));
        let spoofed = a_set("example.com", 300, Ipv4Addr::new(10, 6, 6, 6));

        let mut txn = cache.begin(true).unwrap();
        txn.insert_rr(&secure, Rank::NONAUTH | Rank::SECURE, 0, 1000).unwrap();
        txn.insert_rr(&spoofed, Rank::AUTH, 0, 1010).unwrap();
        txn.commit().unwrap();

        let txn = cache.begin(false).unwrap();
        let (found, _, rank, _) = txn.peek_rr(&secure.owner, RType::A, 1020).unwrap();
        assert_eq!(rank, Rank::NONAUTH | Rank::SECURE);
        assert_eq!(found.items[0].data.as_ref(), &[10, 0, 0, 1]);
    }

    #[test]
    fn expired_entry_is_always_replaced() {
        let cache = Cache::in_memory();
        let old = a_set("example.com", 10, Ipv4Addr::new(10, 0, 0, 1));
        let new = a_set("example.com", 300, Ipv4Addr::new(10, 0, 0, 2));

        let mut txn = cache.begin(true).unwrap();
        txn.insert_rr(&old, Rank::SECURE, 0, 1000).unwrap();
        // Insert at t=2000, long past the old entry's 10s TTL.
        txn.insert_rr(&new, Rank::NONAUTH, 0, 2000).unwrap();
        txn.commit().unwrap();

        let txn = cache.begin(false).unwrap();
        let (found, _, rank, _) = txn.peek_rr(&new.owner, RType::A, 2001).unwrap();
        assert_eq!(rank, Rank::NONAUTH);
        assert_eq!(found.items[0].data.as_ref(), &[10, 0, 0, 2]);
    }

    #[test]
    fn empty_rrset_insert_is_noop() {
        let cache = Cache::in_memory();
        let empty = RrSet::new("example.com".parse().unwrap(), RType::A, RClass::In);
        let mut txn = cache.begin(true).unwrap();
        txn.insert_rr(&empty, Rank::AUTH, 0, 1000).unwrap();
        txn.commit().unwrap();
        assert_eq!(cache.count(), 0);
    }

    #[test]
    fn stale_rank_still_readable() {
        let cache = Cache::in_memory();
        let set = a_set("example.com", 10, Ipv4Addr::new(10, 0, 0, 1));
        let mut txn = cache.begin(true).unwrap();
        txn.insert_rr(&set, Rank::AUTH, 0, 1000).unwrap();
        txn.commit().unwrap();

        let txn = cache.begin(false).unwrap();
        let rank = txn.peek_rank(Tag::Record, &set.owner, RType::A, 9999).unwrap();
        assert_eq!(rank, Rank::AUTH);
        assert!(matches!(
            txn.peek_rank(Tag::Record, &"other.".parse().unwrap(), RType::A, 9999),
            Err(CacheError::Miss)
        ));
    }

    #[test]
    fn full_cache_drops_new_keys_but_refreshes_old() {
        let cache = Cache::open_with_limit(Arc::new(MemStore::new()), 1).unwrap();
        let first = a_set("one.example", 300, Ipv4Addr::new(10, 0, 0, 1));
        let second = a_set("two.example", 300, Ipv4Addr::new(10, 0, 0, 2));

        let mut txn = cache.begin(true).unwrap();
        txn.insert_rr(&first, Rank::AUTH, 0, 1000).unwrap();
        txn.insert_rr(&second, Rank::AUTH, 0, 1000).unwrap();
        txn.commit().unwrap();
        assert_eq!(cache.count(), 1);

        // The resident key still refreshes.
        let refreshed = a_set("one.example", 600, Ipv4Addr::new(10, 0, 0, 9));
        let mut txn = cache.begin(true).unwrap();
        txn.insert_rr(&refreshed, Rank::AUTH, 0, 2000).unwrap();
        txn.commit().unwrap();

        let txn = cache.begin(false).unwrap();
        let (found, _, _, _) = txn.peek_rr(&refreshed.owner, RType::A, 2001).unwrap();
        assert_eq!(found.items[0].data.as_ref(), &[10, 0, 0, 9]);
        assert!(txn.peek_rr(&second.owner, RType::A, 1001).is_err());
    }

    #[test]
    fn version_mismatch_clears_store() {
        let store = Arc::new(MemStore::new());
        {
            let mut txn = store.begin(true).unwrap();
            txn.insert(VERSION_KEY, b"V\x01").unwrap();
            txn.insert(b"Rsomething", b"old data").unwrap();
            txn.commit().unwrap();
        }
        let cache = Cache::open(store.clone()).unwrap();
        assert_eq!(cache.count(), 0);

        let txn = store.begin(false).unwrap();
        assert_eq!(txn.get(VERSION_KEY).unwrap().as_deref(), Some(VERSION_VAL));
        assert!(txn.get(b"Rsomething").unwrap().is_none());
    }

    #[test]
    fn reopen_same_version_keeps_data() {
        let store = Arc::new(MemStore::new());
        {
            let cache = Cache::open(store.clone()).unwrap();
            let set = a_set("example.com", 300, Ipv4Addr::new(10, 0, 0, 1));
            let mut txn = cache.begin(true).unwrap();
            txn.insert_rr(&set, Rank::AUTH, 0, 1000).unwrap();
            txn.commit().unwrap();
        }
        let cache = Cache::open(store).unwrap();
        assert_eq!(cache.count(), 1);
    }

    #[test]
    fn signatures_live_under_their_own_tag() {
        let cache = Cache::in_memory();
        let mut sigs = RrSet::new("example.com".parse().unwrap(), RType::Rrsig, RClass::In);
        sigs.push(300, Bytes::from_static(b"\x00\x01fake-signature"));

        let mut txn = cache.begin(true).unwrap();
        // The signature set covering the A records.
        txn.insert_sig(&sigs, RType::A, Rank::AUTH, 1000).unwrap();
        txn.commit().unwrap();

        let txn = cache.begin(false).unwrap();
        let (found, drift, rank) = txn.peek_sig(&sigs.owner, RType::A, 1100).unwrap();
        assert_eq!(drift, 100);
        assert_eq!(rank, Rank::AUTH);
        assert_eq!(found.rtype, RType::Rrsig);
        assert_eq!(found.len(), 1);
        // No collision with the record tag for the same (name, type).
        assert!(txn.peek_rr(&sigs.owner, RType::A, 1100).is_err());
    }

    #[test]
    fn stats_track_operations() {
        let cache = Cache::in_memory();
        let set = a_set("example.com", 300, Ipv4Addr::new(10, 0, 0, 1));
        let mut txn = cache.begin(true).unwrap();
        txn.insert_rr(&set, Rank::AUTH, 0, 1000).unwrap();
        txn.commit().unwrap();

        let txn = cache.begin(false).unwrap();
        let _ = txn.peek_rr(&set.owner, RType::A, 1100);
        let _ = txn.peek_rr(&"nope.".parse().unwrap(), RType::A, 1100);
        drop(txn);

        let stats = cache.stats();
        assert_eq!(stats.hit.load(Ordering::Relaxed), 1);
        assert_eq!(stats.miss.load(Ordering::Relaxed), 1);
        assert_eq!(stats.insert.load(Ordering::Relaxed), 1);
        assert_eq!(stats.txn_write.load(Ordering::Relaxed), 1);
        assert_eq!(stats.txn_read.load(Ordering::Relaxed), 1);
    }
}
