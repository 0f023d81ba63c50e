//! Typed keyspace (C2): tagged-union entries, approximate memory accounting,
//! lazy TTL expiration, and the watcher registry backing WATCH/EXEC
//! invalidation. Grounded on the teacher's `orderbook.rs` `OrderBook`
//! (`hashbrown::HashMap` keyed lookup table) for the map shape, and on its
//! allocate-and-swap mutation style (`set_qty`/`cancel` never hand out a
//! `&mut` across a payload replacement) for the "replace, don't mutate in
//! place" policy that makes `BGSAVE`'s shallow copy sound (SPEC_FULL.md §4.2,
//! DESIGN.md open-question resolution).

use hashbrown::HashMap;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::hyperloglog::Hll;

pub type Bytes = Vec<u8>;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashField {
    pub value: Bytes,
    pub expiry: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    String,
    List,
    Hash,
    Set,
    ZSet,
    Hll,
}

impl ItemType {
    pub fn name(&self) -> &'static str {
        match self {
            ItemType::String => "string",
            ItemType::List => "list",
            ItemType::Hash => "hash",
            ItemType::Set => "set",
            ItemType::ZSet => "zset",
            ItemType::Hll => "string",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Payload {
    String(Bytes),
    List(VecDeque<Bytes>),
    Hash(IndexMap<Bytes, HashField>),
    Set(IndexSet<Bytes>),
    ZSet(IndexMap<Bytes, f64>),
    Hll(Hll),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub payload: Payload,
    pub expiry: Option<u64>,
    pub last_accessed: u64,
    pub access_count: u64,
}

impl Item {
    pub fn new(payload: Payload) -> Self {
        Item {
            payload,
            expiry: None,
            last_accessed: now_ms(),
            access_count: 0,
        }
    }

    pub fn type_tag(&self) -> ItemType {
        match &self.payload {
            Payload::String(_) => ItemType::String,
            Payload::List(_) => ItemType::List,
            Payload::Hash(_) => ItemType::Hash,
            Payload::Set(_) => ItemType::Set,
            Payload::ZSet(_) => ItemType::ZSet,
            Payload::Hll(_) => ItemType::Hll,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        matches!(self.expiry, Some(e) if e <= now)
    }

    pub fn is_empty_container(&self) -> bool {
        match &self.payload {
            Payload::String(_) | Payload::Hll(_) => false,
            Payload::List(l) => l.is_empty(),
            Payload::Hash(h) => h.is_empty(),
            Payload::Set(s) => s.is_empty(),
            Payload::ZSet(z) => z.is_empty(),
        }
    }
}

/// Approximate per-entry memory charge (§4.2): map overhead + key length +
/// a fixed struct header + payload size. Must be monotone in payload size
/// only; exactness is not required.
const MAP_ENTRY_OVERHEAD: i64 = 48;
const ITEM_HEADER: i64 = 32;

pub fn charge(key: &[u8], item: &Item) -> i64 {
    let payload_size: i64 = match &item.payload {
        Payload::String(s) => s.len() as i64,
        Payload::List(l) => l.iter().map(|v| v.len() as i64 + 8).sum(),
        Payload::Set(s) => s.iter().map(|v| v.len() as i64 + 8).sum(),
        Payload::Hash(h) => h
            .iter()
            .map(|(k, v)| k.len() as i64 + v.value.len() as i64 + 16)
            .sum(),
        Payload::ZSet(z) => z.iter().map(|(m, _)| m.len() as i64 + 16).sum(),
        Payload::Hll(hll) => hll.charge() as i64,
    };
    MAP_ENTRY_OVERHEAD + key.len() as i64 + ITEM_HEADER + payload_size
}

/// Mapping key -> list of `(client id, shared tx_failed flag)` pairs
/// (§4.2 `touch`, §4.4 WATCH). Owned by the keyspace per the component table
/// but locked independently of `mu`, as the spec requires. The flag is the
/// client's own `Arc<AtomicBool>` (see `client::TxState`) rather than just an
/// id, since the watcher registry has no way to reach into another thread's
/// `ClientSession` to set a plain field directly.
#[derive(Debug, Default)]
pub struct WatcherTable {
    by_key: HashMap<Bytes, Vec<(u64, Arc<AtomicBool>)>>,
}

impl WatcherTable {
    pub fn watch(&mut self, key: Bytes, client_id: u64, tx_failed: Arc<AtomicBool>) {
        let list = self.by_key.entry(key).or_default();
        if !list.iter().any(|(id, _)| *id == client_id) {
            list.push((client_id, tx_failed));
        }
    }

    pub fn unwatch_client(&mut self, client_id: u64, keys: &[Bytes]) {
        for key in keys {
            if let Some(list) = self.by_key.get_mut(key) {
                list.retain(|(id, _)| *id != client_id);
                if list.is_empty() {
                    self.by_key.remove(key);
                }
            }
        }
    }

    /// Notifies (sets `tx_failed` on) and clears watchers of `key`.
    pub fn touch(&mut self, key: &[u8]) {
        if let Some(list) = self.by_key.remove(key) {
            for (_, flag) in list {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Keyspace {
    map: HashMap<Bytes, Item>,
    pub mem: i64,
    pub mempeak: i64,
    pub expired_keys: u64,
    pub evicted_keys: u64,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dbsize(&self) -> usize {
        self.map.len()
    }

    fn bump_mem(&mut self, delta: i64) {
        self.mem += delta;
        assert!(self.mem >= 0, "fatal: negative memory counter (bookkeeping bug)");
        if self.mem > self.mempeak {
            self.mempeak = self.mem;
        }
    }

    /// Read-only lookup honoring lazy expiration; updates LRU/LFU metadata
    /// on hit. Returns `None` if absent or just-expired (the entry is
    /// removed as a side effect of the latter).
    pub fn get(&mut self, key: &[u8]) -> Option<&Item> {
        if self.remove_if_expired(key) {
            return None;
        }
        let now = now_ms();
        if let Some(item) = self.map.get_mut(key) {
            item.last_accessed = now;
            item.access_count += 1;
        }
        self.map.get(key)
    }

    /// Like `get` but does not bump access metadata — used by handlers that
    /// need to peek without affecting eviction ranking (e.g. TTL, TYPE).
    pub fn peek(&mut self, key: &[u8]) -> Option<&Item> {
        if self.remove_if_expired(key) {
            return None;
        }
        self.map.get(key)
    }

    pub fn contains(&mut self, key: &[u8]) -> bool {
        self.peek(key).is_some()
    }

    /// Replaces (or inserts) the entry at `key` wholesale. This is the only
    /// mutation path handlers are allowed to use for payload changes — see
    /// the module doc comment.
    pub fn replace(&mut self, key: Bytes, item: Item) {
        let new_charge = charge(&key, &item);
        let old_charge = self.map.get(&key).map(|old| charge(&key, old)).unwrap_or(0);
        self.map.insert(key, item);
        self.bump_mem(new_charge - old_charge);
    }

    pub fn put_string(&mut self, key: Bytes, value: Bytes) {
        self.replace(key, Item::new(Payload::String(value)));
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Item> {
        let removed = self.map.remove(key);
        if let Some(item) = &removed {
            self.bump_mem(-charge(key, item));
        }
        removed
    }

    /// Removes `key` if its entry has expired, returning whether it did.
    pub fn remove_if_expired(&mut self, key: &[u8]) -> bool {
        let expired = matches!(self.map.get(key), Some(item) if item.is_expired(now_ms()));
        if expired {
            self.remove(key);
            self.expired_keys += 1;
        }
        expired
    }

    /// Drops the entry if it is now an empty container (§3 invariant I4).
    pub fn drop_if_empty(&mut self, key: &[u8]) {
        if matches!(self.map.get(key), Some(item) if item.is_empty_container()) {
            self.remove(key);
        }
    }

    pub fn set_expiry(&mut self, key: &[u8], expiry: Option<u64>) -> bool {
        if let Some(item) = self.map.get_mut(key) {
            item.expiry = expiry;
            true
        } else {
            false
        }
    }

    pub fn rename(&mut self, from: &[u8], to: Bytes) -> bool {
        if let Some(item) = self.map.remove(from) {
            self.bump_mem(-charge(from, &item));
            self.replace(to, item);
            true
        } else {
            false
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &Bytes> {
        self.map.keys()
    }

    /// Returns up to `n` `(key, item)` pairs via native hash-map iteration
    /// order, used by the eviction engine (C3). Expired entries are skipped
    /// rather than surfaced as eviction candidates.
    pub fn sample(&self, n: usize) -> Vec<(Bytes, Item)> {
        let now = now_ms();
        self.map
            .iter()
            .filter(|(_, item)| !item.is_expired(now))
            .take(n)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn flush(&mut self) {
        self.map.clear();
        self.mem = 0;
        self.mempeak = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &Item)> {
        self.map.iter()
    }

    /// Clones the key->entry map for a background saver (§4.6 BGSAVE). A
    /// plain `clone` stands in for the reference implementation's shallow
    /// pointer copy: it is still cheap relative to encoding, and correctness
    /// does not depend on it being pointer-cheap since handlers never mutate
    /// a live `Item` in place (§4.2).
    pub fn snapshot_map(&self) -> HashMap<Bytes, Item> {
        self.map.clone()
    }

    /// Replaces the whole keyspace with `map`, recomputing `mem`/`mempeak`
    /// from scratch via the normal `replace` path (RDB/AOF restore).
    pub fn load_map(&mut self, map: HashMap<Bytes, Item>) {
        self.flush();
        for (key, item) in map {
            self.replace(key, item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_updates_mem_by_delta() {
        let mut ks = Keyspace::new();
        ks.put_string(b"k".to_vec(), b"hello".to_vec());
        let after_first = ks.mem;
        assert!(after_first > 0);
        ks.put_string(b"k".to_vec(), b"hi".to_vec());
        assert!(ks.mem < after_first);
        ks.remove(b"k");
        assert_eq!(ks.mem, 0);
    }

    #[test]
    fn mempeak_tracks_maximum() {
        let mut ks = Keyspace::new();
        ks.put_string(b"a".to_vec(), vec![0u8; 1000]);
        let peak = ks.mempeak;
        ks.remove(b"a");
        assert_eq!(ks.mem, 0);
        assert_eq!(ks.mempeak, peak);
    }

    #[test]
    fn expired_entry_is_removed_on_access() {
        let mut ks = Keyspace::new();
        ks.put_string(b"k".to_vec(), b"v".to_vec());
        ks.set_expiry(b"k", Some(now_ms().saturating_sub(1)));
        assert!(ks.get(b"k").is_none());
        assert_eq!(ks.dbsize(), 0);
        assert_eq!(ks.expired_keys, 1);
    }

    #[test]
    fn empty_container_is_dropped() {
        let mut ks = Keyspace::new();
        ks.replace(b"l".to_vec(), Item::new(Payload::List(VecDeque::new())));
        ks.drop_if_empty(b"l");
        assert_eq!(ks.dbsize(), 0);
    }

    #[test]
    fn watcher_table_notifies_and_clears() {
        let mut wt = WatcherTable::default();
        let flag_a = Arc::new(AtomicBool::new(false));
        let flag_b = Arc::new(AtomicBool::new(false));
        wt.watch(b"k".to_vec(), 1, flag_a.clone());
        wt.watch(b"k".to_vec(), 2, flag_b.clone());
        wt.touch(b"k");
        assert!(flag_a.load(Ordering::SeqCst));
        assert!(flag_b.load(Ordering::SeqCst));
        // Second touch is a no-op: the watcher list was cleared by the first.
        let flag_c = Arc::new(AtomicBool::new(false));
        wt.watch(b"other".to_vec(), 3, flag_c.clone());
        wt.touch(b"k");
        assert!(!flag_c.load(Ordering::SeqCst));
    }
}
