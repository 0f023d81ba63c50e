//! Command dispatcher (C4, §4.4). Per-connection state machine: auth gate,
//! transaction queueing, handler invocation, AOF append, snapshot-trigger
//! bump, MONITOR fan-out. Grounded on the teacher's `decode.rs` event-apply
//! loop (`for ev in &events { book.apply(ev); ... }`) generalized to
//! per-command dispatch, and cross-checked against
//! `other_examples/f7f99c33_jonwiggins-cedis__src-server.rs.rs`'s
//! `process_command`/`dispatch` split for the auth-gate/tx-queue/AOF-append
//! ordering (§4.4 dispatch rules 1-6).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::client::ClientSession;
use crate::commands::{self, Outcome};
use crate::keyspace::Bytes;
use crate::resp::RespValue;
use crate::state::AppState;

const SAFE_UNAUTHENTICATED: &[&str] = &["COMMAND", "COMMANDS", "PING", "HELP", "AUTH"];
const TX_CONTROL: &[&str] = &["MULTI", "EXEC", "DISCARD", "WATCH", "UNWATCH"];

/// Handles one parsed command array for `session`, returning every RESP
/// value that must be written to the client in order (almost always one;
/// SUBSCRIBE/PSUBSCRIBE/UNSUBSCRIBE/PUNSUBSCRIBE confirm once per argument).
pub fn dispatch(state: &Arc<AppState>, session: &mut ClientSession, args: Vec<Bytes>) -> Vec<RespValue> {
    if args.is_empty() {
        return Vec::new();
    }
    // §6 `sensitive yes|no`: when case-sensitive matching is in force
    // (the default), the command name must match one of the uppercase
    // handler names literally; when relaxed, it's normalized first.
    let raw = String::from_utf8_lossy(&args[0]).into_owned();
    let cmd = if state.config.network.case_sensitive_commands {
        raw
    } else {
        raw.to_ascii_uppercase()
    };

    // Dispatch rule 2: auth gate.
    if state.config.requirepass.is_some()
        && !session.authenticated
        && !SAFE_UNAUTHENTICATED.contains(&cmd.as_str())
    {
        return vec![RespValue::error("NOAUTH Authentication required.")];
    }

    // Dispatch rule 3: transaction queueing.
    if session.tx.in_tx && !TX_CONTROL.contains(&cmd.as_str()) {
        session.tx.queued.push(args);
        return vec![RespValue::simple("QUEUED")];
    }

    let replies = match cmd.as_str() {
        "MULTI" => vec![commands::tx::multi(state, &args[1..], session).0],
        "DISCARD" => vec![commands::tx::discard(state, &args[1..], session).0],
        "WATCH" => vec![commands::tx::watch(state, &args[1..], session).0],
        "UNWATCH" => vec![commands::tx::unwatch(state, &args[1..], session).0],
        "EXEC" => vec![exec(state, session)],
        "SUBSCRIBE" => commands::pubsub_cmds::subscribe(state, &args[1..], session),
        "UNSUBSCRIBE" => commands::pubsub_cmds::unsubscribe(state, &args[1..], session),
        "PSUBSCRIBE" => commands::pubsub_cmds::psubscribe(state, &args[1..], session),
        "PUNSUBSCRIBE" => commands::pubsub_cmds::punsubscribe(state, &args[1..], session),
        _ => {
            let (reply, mutated) = apply(state, session, &cmd, &args[1..]);
            if mutated {
                log_to_aof(state, &args);
                state.bump_change_counters();
            }
            vec![reply]
        }
    };

    state.stats.commands_processed.fetch_add(1, Ordering::Relaxed);
    fan_out_monitor(state, session, &args);
    replies
}

fn log_to_aof(state: &Arc<AppState>, args: &[Bytes]) {
    if let Some(aof) = &state.aof {
        if let Err(e) = aof.append(args) {
            log::warn!("AOF append failed, continuing with in-memory state only: {e}");
        }
    }
}

/// EXEC (§4.4, §9 "Transaction isolation"): acquires `tx_serialize` so the
/// whole body runs atomically with respect to concurrent single-command
/// writers, re-reads `tx_failed` under that lock (it may have been set by a
/// watcher touch that raced the original WATCH), then either aborts with a
/// null array or runs every queued command, collecting exactly one reply
/// each (open-question resolution: queued-command errors do not abort the
/// transaction).
fn exec(state: &Arc<AppState>, session: &mut ClientSession) -> RespValue {
    if !session.tx.in_tx {
        return RespValue::error("ERR EXEC without MULTI");
    }
    let _serialize_guard = state.tx_serialize.lock().unwrap();
    let failed = session.tx.is_failed();
    let queued = std::mem::take(&mut session.tx.queued);
    session.tx.reset();
    state
        .watchers
        .lock()
        .unwrap()
        .unwatch_client(session.id, &session.watched_keys);
    session.watched_keys.clear();

    if failed {
        return RespValue::NullArray;
    }

    let mut results = Vec::with_capacity(queued.len());
    for cmd_args in queued {
        if cmd_args.is_empty() {
            continue;
        }
        let raw = String::from_utf8_lossy(&cmd_args[0]).into_owned();
        let cmd = if state.config.network.case_sensitive_commands {
            raw
        } else {
            raw.to_ascii_uppercase()
        };
        let reply = match cmd.as_str() {
            "SUBSCRIBE" | "UNSUBSCRIBE" | "PSUBSCRIBE" | "PUNSUBSCRIBE" => {
                let many = match cmd.as_str() {
                    "SUBSCRIBE" => commands::pubsub_cmds::subscribe(state, &cmd_args[1..], session),
                    "UNSUBSCRIBE" => commands::pubsub_cmds::unsubscribe(state, &cmd_args[1..], session),
                    "PSUBSCRIBE" => commands::pubsub_cmds::psubscribe(state, &cmd_args[1..], session),
                    _ => commands::pubsub_cmds::punsubscribe(state, &cmd_args[1..], session),
                };
                RespValue::array(many)
            }
            _ => {
                let (reply, mutated) = apply(state, session, &cmd, &cmd_args[1..]);
                if mutated {
                    log_to_aof(state, &cmd_args);
                    state.bump_change_counters();
                }
                reply
            }
        };
        results.push(reply);
    }
    RespValue::array(results)
}

/// Applies every command outside the transaction-control and pub/sub
/// families (§4.4's representative handler contracts). Unknown commands
/// are rule 1 of the dispatch order.
/// `pub` (rather than crate-private) so AOF replay (`lib.rs::run`) and
/// integration tests can apply logged commands directly against the
/// keyspace without re-entering the dispatcher's auth gate, transaction
/// queueing, or AOF-append side effects.
pub fn apply(state: &Arc<AppState>, session: &mut ClientSession, cmd: &str, args: &[Bytes]) -> Outcome {
    use commands::{hashes, hll, keys, lists, pubsub_cmds, server_cmds, sets, strings, zsets};

    match cmd {
        // Strings
        "GET" => strings::get(state, args),
        "SET" => strings::set(state, args),
        "SETNX" => strings::setnx(state, args),
        "SETEX" => strings::setex(state, args),
        "PSETEX" => strings::psetex(state, args),
        "GETSET" => strings::getset(state, args),
        "MGET" => strings::mget(state, args),
        "MSET" => strings::mset(state, args),
        "INCR" => strings::incr(state, args),
        "DECR" => strings::decr(state, args),
        "INCRBY" => strings::incrby(state, args),
        "DECRBY" => strings::decrby(state, args),
        "INCRBYFLOAT" => strings::incrbyfloat(state, args),
        "STRLEN" => strings::strlen(state, args),
        "APPEND" => strings::append(state, args),
        "GETRANGE" => strings::getrange(state, args),
        "SETRANGE" => strings::setrange(state, args),

        // Lists
        "LPUSH" => lists::lpush(state, args),
        "RPUSH" => lists::rpush(state, args),
        "LPOP" => lists::lpop(state, args),
        "RPOP" => lists::rpop(state, args),
        "LRANGE" => lists::lrange(state, args),
        "LLEN" => lists::llen(state, args),
        "LINDEX" => lists::lindex(state, args),
        "LSET" => lists::lset(state, args),
        "LREM" => lists::lrem(state, args),
        "LTRIM" => lists::ltrim(state, args),
        "LMOVE" => lists::lmove(state, args),
        "RPOPLPUSH" => lists::rpoplpush(state, args),

        // Sets
        "SADD" => sets::sadd(state, args),
        "SREM" => sets::srem(state, args),
        "SMEMBERS" => sets::smembers(state, args),
        "SISMEMBER" => sets::sismember(state, args),
        "SCARD" => sets::scard(state, args),
        "SINTER" => sets::sinter(state, args),
        "SUNION" => sets::sunion(state, args),
        "SDIFF" => sets::sdiff(state, args),
        "SINTERSTORE" => sets::sinterstore(state, args),
        "SUNIONSTORE" => sets::sunionstore(state, args),
        "SDIFFSTORE" => sets::sdiffstore(state, args),
        "SRANDMEMBER" => sets::srandmember(state, args),
        "SPOP" => sets::spop(state, args),
        "SMOVE" => sets::smove(state, args),

        // Hashes
        "HSET" => hashes::hset(state, args),
        "HSETNX" => hashes::hsetnx(state, args),
        "HGET" => hashes::hget(state, args),
        "HMGET" => hashes::hmget(state, args),
        "HMSET" => hashes::hmset(state, args),
        "HDEL" => hashes::hdel(state, args),
        "HEXISTS" => hashes::hexists(state, args),
        "HLEN" => hashes::hlen(state, args),
        "HKEYS" => hashes::hkeys(state, args),
        "HVALS" => hashes::hvals(state, args),
        "HGETALL" => hashes::hgetall(state, args),
        "HINCRBY" => hashes::hincrby(state, args),
        "HINCRBYFLOAT" => hashes::hincrbyfloat(state, args),
        "HEXPIRE" => hashes::hexpire(state, args),

        // Sorted sets
        "ZADD" => zsets::zadd(state, args),
        "ZREM" => zsets::zrem(state, args),
        "ZSCORE" => zsets::zscore(state, args),
        "ZCARD" => zsets::zcard(state, args),
        "ZRANGE" => zsets::zrange(state, args),
        "ZREVRANGE" => zsets::zrevrange(state, args),
        "ZRANGEBYSCORE" => zsets::zrangebyscore(state, args),
        "ZRANK" => zsets::zrank(state, args),
        "ZREVRANK" => zsets::zrevrank(state, args),
        "ZINCRBY" => zsets::zincrby(state, args),

        // HyperLogLog
        "PFADD" => hll::pfadd(state, args),
        "PFCOUNT" => hll::pfcount(state, args),
        "PFMERGE" => hll::pfmerge(state, args),

        // Keys
        "DEL" => keys::del(state, args),
        "EXISTS" => keys::exists(state, args),
        "KEYS" => keys::keys(state, args),
        "TYPE" => keys::r#type(state, args),
        "RENAME" => keys::rename(state, args),
        "EXPIRE" => keys::expire(state, args),
        "TTL" => keys::ttl(state, args),
        "PERSIST" => keys::persist(state, args),

        // Server
        "PING" => server_cmds::ping(state, args),
        "ECHO" => server_cmds::echo(state, args),
        "COMMAND" | "COMMANDS" => server_cmds::command(state, args),
        "HELP" => (RespValue::simple("see documentation"), false),
        "FLUSHDB" => server_cmds::flushdb(state, args),
        "DBSIZE" => server_cmds::dbsize(state, args),
        "SAVE" => server_cmds::save(state, args),
        "BGSAVE" => server_cmds::bgsave(state, args),
        "BGREWRITEAOF" => server_cmds::bgrewriteaof(state, args),
        "INFO" => server_cmds::info(state, args),
        "MONITOR" => server_cmds::monitor(state, args, session.id),
        "AUTH" => server_cmds::auth(state, args, session),
        "PUBLISH" => pubsub_cmds::publish(state, args),

        other => (
            RespValue::error(format!("ERR unknown command '{}'", other.to_lowercase())),
            false,
        ),
    }
}

/// Fans a copy of `args` out to every client in MONITOR mode except the
/// originator (§4.4 dispatch rule 6), formatted as
/// `<unix-seconds.micros> [<addr>] "<arg>" ...`.
fn fan_out_monitor(state: &Arc<AppState>, session: &ClientSession, args: &[Bytes]) {
    let monitors = state.monitors.lock().unwrap();
    if monitors.is_empty() {
        return;
    }
    let ids: Vec<u64> = monitors.iter().copied().filter(|id| *id != session.id).collect();
    drop(monitors);
    if ids.is_empty() {
        return;
    }
    let line = format_monitor_line(session, args);
    for id in ids {
        if let Some(sink) = state.client_sink(id) {
            let _ = sink.send(&RespValue::simple(line.clone()));
        }
    }
}

fn format_monitor_line(session: &ClientSession, args: &[Bytes]) -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let mut line = format!("{}.{:06} [{}]", now.as_secs(), now.subsec_micros(), session.addr);
    for a in args {
        line.push_str(" \"");
        line.push_str(&String::from_utf8_lossy(a).replace('"', "\\\""));
        line.push('"');
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn new_state() -> Arc<AppState> {
        Arc::new(AppState::new(AppConfig::default(), None))
    }

    fn session() -> ClientSession {
        ClientSession::new(crate::client::next_client_id(), "127.0.0.1:0".to_string())
    }

    fn cmd(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn unknown_command_errors_without_closing_connection() {
        let st = new_state();
        let mut sess = session();
        let replies = dispatch(&st, &mut sess, cmd(&["BOGUS"]));
        assert_eq!(replies.len(), 1);
        assert!(matches!(replies[0], RespValue::Error(_)));
    }

    #[test]
    fn auth_gate_blocks_unauthenticated_clients() {
        let mut cfg = AppConfig::default();
        cfg.requirepass = Some("secret".to_string());
        let st = Arc::new(AppState::new(cfg, None));
        let mut sess = session();
        let replies = dispatch(&st, &mut sess, cmd(&["GET", "k"]));
        assert!(matches!(&replies[0], RespValue::Error(e) if e.starts_with("NOAUTH")));
        let replies = dispatch(&st, &mut sess, cmd(&["AUTH", "secret"]));
        assert_eq!(replies[0], RespValue::ok());
        let replies = dispatch(&st, &mut sess, cmd(&["GET", "k"]));
        assert_eq!(replies[0], RespValue::Null);
    }

    #[test]
    fn multi_queues_and_exec_applies_in_order() {
        let st = new_state();
        let mut sess = session();
        assert_eq!(dispatch(&st, &mut sess, cmd(&["MULTI"]))[0], RespValue::ok());
        assert_eq!(
            dispatch(&st, &mut sess, cmd(&["SET", "k", "1"]))[0],
            RespValue::simple("QUEUED")
        );
        assert_eq!(
            dispatch(&st, &mut sess, cmd(&["INCR", "k"]))[0],
            RespValue::simple("QUEUED")
        );
        let replies = dispatch(&st, &mut sess, cmd(&["EXEC"]));
        assert_eq!(
            replies[0],
            RespValue::array(vec![RespValue::ok(), RespValue::int(2)])
        );
        assert!(!sess.tx.in_tx);
    }

    #[test]
    fn watched_key_touch_aborts_exec() {
        let st = new_state();
        let mut sess = session();
        dispatch(&st, &mut sess, cmd(&["WATCH", "k"]));
        dispatch(&st, &mut sess, cmd(&["MULTI"]));
        dispatch(&st, &mut sess, cmd(&["SET", "k", "2"]));
        // A concurrent writer touches the watched key before EXEC.
        st.touch_key(b"k");
        // Apply the concurrent write for real so the final GET reflects it.
        let mut other = session();
        dispatch(&st, &mut other, cmd(&["SET", "k", "99"]));
        let replies = dispatch(&st, &mut sess, cmd(&["EXEC"]));
        assert_eq!(replies[0], RespValue::NullArray);
        let replies = dispatch(&st, &mut sess, cmd(&["GET", "k"]));
        assert_eq!(replies[0], RespValue::bulk(*b"99"));
    }

    #[test]
    fn discard_clears_queue_without_executing() {
        let st = new_state();
        let mut sess = session();
        dispatch(&st, &mut sess, cmd(&["MULTI"]));
        dispatch(&st, &mut sess, cmd(&["SET", "k", "1"]));
        dispatch(&st, &mut sess, cmd(&["DISCARD"]));
        let replies = dispatch(&st, &mut sess, cmd(&["GET", "k"]));
        assert_eq!(replies[0], RespValue::Null);
    }

    #[test]
    fn publish_subscribe_round_trip() {
        let st = new_state();
        let mut sub = session();
        let replies = dispatch(&st, &mut sub, cmd(&["SUBSCRIBE", "ch"]));
        assert_eq!(replies.len(), 1);
        let mut pub_session = session();
        let replies = dispatch(&st, &mut pub_session, cmd(&["PUBLISH", "ch", "hi"]));
        // No sink registered for `sub` (not a real socket in this test), so
        // delivery count is 0, but the command itself must not error.
        assert_eq!(replies[0], RespValue::int(0));
    }
}
