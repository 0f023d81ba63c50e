//! Process-wide shared state (§3 `AppState`). Aggregates the keyspace lock,
//! the watcher/tx-serialize companion locks, persistence handles, the
//! pub/sub broker, the active-connection registry, and the MONITOR list.
//! Grounded on the teacher's pattern of one top-level struct threaded
//! through every background worker and connection thread by `Arc` (compare
//! `main.rs`'s `pool: Arc<PacketPool>`, `snapshot_tx`, etc., each passed
//! independently); here they are collected into a single `AppState` because
//! the command dispatcher, unlike the teacher's pipeline stages, needs all
//! of them at once per command.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::aof::Aof;
use crate::broker::Broker;
use crate::client::ClientSink;
use crate::config::AppConfig;
use crate::eviction::{evict_to_admit, EvictionOutcome};
use crate::keyspace::{charge, Bytes, Item, Keyspace};
use crate::resp::RespValue;

/// One configured `(seconds, changed_keys)` save rule with its own
/// changed-key counter, reset on each tick (§3 "RDB state").
pub struct SnapshotTracker {
    pub seconds: u64,
    pub changed_keys: u64,
    pub counter: AtomicU64,
}

#[derive(Default)]
pub struct Stats {
    pub connections_received: AtomicU64,
    pub commands_processed: AtomicU64,
}

pub struct AppState {
    pub config: AppConfig,
    pub keyspace: Mutex<Keyspace>,
    pub watchers: Mutex<crate::keyspace::WatcherTable>,
    /// Serializes EXEC bodies against concurrent single-command writes
    /// (§4.4, §9 "Transaction isolation").
    pub tx_serialize: Mutex<()>,
    pub aof: Option<Arc<Aof>>,
    pub broker: Broker,
    pub clients: Mutex<HashMap<u64, Arc<ClientSink>>>,
    pub monitors: Mutex<HashSet<u64>>,
    pub snapshot_trackers: Vec<SnapshotTracker>,
    pub rdb_path: std::path::PathBuf,
    pub bgsave_running: AtomicBool,
    pub stats: Stats,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, aof: Option<Arc<Aof>>) -> Self {
        let rdb_path = config.persistence.dir.join(&config.persistence.dbfilename);
        let snapshot_trackers = config
            .persistence
            .save_rules
            .iter()
            .map(|r| SnapshotTracker {
                seconds: r.seconds,
                changed_keys: r.changed_keys,
                counter: AtomicU64::new(0),
            })
            .collect();
        AppState {
            config,
            keyspace: Mutex::new(Keyspace::new()),
            watchers: Mutex::new(crate::keyspace::WatcherTable::default()),
            tx_serialize: Mutex::new(()),
            aof,
            broker: Broker::new(),
            clients: Mutex::new(HashMap::new()),
            monitors: Mutex::new(HashSet::new()),
            snapshot_trackers,
            rdb_path,
            bgsave_running: AtomicBool::new(false),
            stats: Stats::default(),
            start_time: Instant::now(),
        }
    }

    pub fn register_client(&self, id: u64, sink: Arc<ClientSink>) {
        self.clients.lock().unwrap().insert(id, sink);
        self.stats.connections_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unregister_client(&self, id: u64) {
        self.clients.lock().unwrap().remove(&id);
        self.monitors.lock().unwrap().remove(&id);
        self.broker.unsubscribe_all(id);
    }

    pub fn client_sink(&self, id: u64) -> Option<Arc<ClientSink>> {
        self.clients.lock().unwrap().get(&id).cloned()
    }

    pub fn active_connections(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Notifies every watcher of `key` (setting each one's `tx_failed` flag
    /// directly, since the flag is shared via `Arc` rather than looked up by
    /// id) and clears the watcher list for `key`.
    pub fn touch_key(&self, key: &[u8]) {
        self.watchers.lock().unwrap().touch(key);
    }

    /// Bumps every configured snapshot tracker's changed-key counter by one
    /// (§4.4 dispatch rule 5). Called once per successful mutating command.
    pub fn bump_change_counters(&self) {
        for t in &self.snapshot_trackers {
            t.counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Runs admission control for a write that would install `new_item` at
    /// `key`, then performs the replacement if admitted. This is the only
    /// path handlers use to write a payload, so eviction and the
    /// replace-don't-mutate policy (§4.2) are both enforced in one place.
    pub fn admit_and_replace(
        &self,
        ks: &mut Keyspace,
        key: Bytes,
        new_item: Item,
    ) -> Result<(), RespValue> {
        let new_charge = charge(&key, &new_item);
        let old_charge = ks.peek(&key).map(|old| charge(&key, old)).unwrap_or(0);
        let delta = new_charge - old_charge;
        match evict_to_admit(
            ks,
            self.config.memory.maxmemory_policy,
            self.config.memory.maxmemory_samples,
            delta,
            self.config.memory.maxmemory,
        ) {
            EvictionOutcome::Admitted => {
                ks.replace(key, new_item);
                Ok(())
            }
            EvictionOutcome::Disabled | EvictionOutcome::BudgetUnreachable => {
                Err(RespValue::error("OOM maxmemory reached"))
            }
        }
    }
}
