//! Core of the RESP-compatible key-value server: the typed keyspace, the
//! RESP codec and command dispatcher, the AOF/RDB persistence subsystems,
//! sampled eviction, and the connection supervisor. Exposed as a library
//! (in addition to the `crabkv-server` binary) so integration tests under
//! `tests/` can drive `AppState`/`dispatch` directly rather than spawning a
//! real TCP server (SPEC_FULL.md §10.5).

pub mod aof;
pub mod broker;
pub mod client;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod eviction;
pub mod hyperloglog;
pub mod keyspace;
pub mod rdb;
pub mod resp;
pub mod server;
pub mod state;
pub mod util;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{info, warn};

use crate::aof::Aof;
use crate::client::ClientSession;
use crate::config::{AppConfig, FsyncPolicy};
use crate::state::AppState;
use crate::util::BarrierFlag;

enum BackgroundWorker {
    Aof(Arc<std::sync::atomic::AtomicBool>, std::thread::JoinHandle<()>),
    Plain(std::thread::JoinHandle<()>),
}

impl BackgroundWorker {
    fn join(self) {
        match self {
            BackgroundWorker::Aof(stop, handle) => {
                stop.store(true, Ordering::Relaxed);
                let _ = handle.join();
            }
            BackgroundWorker::Plain(handle) => {
                let _ = handle.join();
            }
        }
    }
}

/// Brings up persistence, the connection supervisor, and background
/// workers, then blocks until `Ctrl-C` raises shutdown (§4.7, §5). Returns
/// once every worker has joined and a final RDB/AOF flush has completed.
pub fn run(cfg: AppConfig) -> anyhow::Result<()> {
    let rdb_path = cfg.persistence.dir.join(&cfg.persistence.dbfilename);

    // AOF, if enabled, takes precedence over the RDB file on restart: it is
    // the more recent and more complete record of writes.
    let (aof, aof_replay) = if cfg.persistence.appendonly {
        let (aof, replay) = Aof::open(
            &cfg.persistence.dir,
            &cfg.persistence.appendfilename,
            cfg.persistence.appendfsync,
        )?;
        (Some(Arc::new(aof)), replay)
    } else {
        (None, Vec::new())
    };

    let state = Arc::new(AppState::new(cfg, aof));

    if !aof_replay.is_empty() {
        info!("replaying {} command(s) from AOF", aof_replay.len());
        replay_commands(&state, aof_replay);
    } else if rdb_path.exists() {
        match rdb::load(&rdb_path) {
            Ok(image) => {
                let mut ks = state.keyspace.lock().unwrap();
                let count = image.len();
                ks.load_map(image);
                drop(ks);
                info!("restored {count} key(s) from RDB {rdb_path:?}");
            }
            Err(e) => {
                warn!("failed to load RDB {rdb_path:?}, starting with an empty keyspace: {e:?}");
            }
        }
    }

    let shutdown = Arc::new(BarrierFlag::default());
    {
        let s = shutdown.clone();
        ctrlc::set_handler(move || {
            s.raise();
        })?;
    }

    let mut background = Vec::new();
    if let Some(aof) = &state.aof {
        if state.config.persistence.appendfsync == FsyncPolicy::EverySec {
            let (stop, handle) = aof.spawn_everysec_flusher();
            background.push(BackgroundWorker::Aof(stop, handle));
        }
    }
    for handle in rdb::spawn_trigger_threads(state.clone(), shutdown.clone()) {
        background.push(BackgroundWorker::Plain(handle));
    }

    // The accept loop blocks the calling thread until `shutdown` is raised.
    server::run(state.clone(), shutdown.clone())?;

    for worker in background {
        worker.join();
    }

    // Final persistence pass before exit (§4.7).
    if let Err(e) = rdb::save_sync(&state) {
        warn!("final RDB save failed: {e:?}");
    }
    if let Some(aof) = &state.aof {
        // The everysec flusher was already stopped above; flush once more
        // synchronously so the last partial second of writes isn't lost.
        // Appends already fsync inline in `always` mode, so this matters
        // only for `everysec`/`no`.
        if let Err(e) = aof.flush() {
            warn!("final AOF flush failed: {e:?}");
        }
    }

    Ok(())
}

/// Applies every replayed AOF command directly through `dispatch::apply`
/// against a throwaway session, bypassing `dispatch::dispatch` entirely so
/// replay never re-appends to the AOF or bumps RDB change counters (§4.5
/// "neutered state"). Unknown commands are logged and skipped rather than
/// aborting the restore.
fn replay_commands(state: &Arc<AppState>, commands: Vec<Vec<Vec<u8>>>) {
    let mut session = ClientSession::new(0, "replay".to_string());
    for args in commands {
        if args.is_empty() {
            continue;
        }
        let cmd = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        let (reply, _) = dispatch::apply(state, &mut session, &cmd, &args[1..]);
        if let resp::RespValue::Error(e) = &reply {
            warn!("AOF replay: command {cmd:?} returned an error, skipping: {e}");
        }
    }
}
