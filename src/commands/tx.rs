//! Transaction control commands (§4.4, §9): MULTI, DISCARD, WATCH, UNWATCH.
//! EXEC itself lives in `dispatch.rs` since it must recursively invoke the
//! dispatcher for each queued command — these four only touch the owning
//! connection's `ClientSession` and the watcher registry.

use crate::client::ClientSession;
use crate::commands::{ok_unmutated, wrong_args, Outcome};
use crate::keyspace::Bytes;
use crate::resp::RespValue;
use crate::state::AppState;

pub fn multi(_state: &AppState, args: &[Bytes], session: &mut ClientSession) -> Outcome {
    if !args.is_empty() {
        return wrong_args("multi");
    }
    if session.tx.in_tx {
        return ok_unmutated(RespValue::error("ERR MULTI calls can not be nested"));
    }
    session.tx.in_tx = true;
    session.tx.tx_failed.store(false, std::sync::atomic::Ordering::SeqCst);
    session.tx.queued.clear();
    ok_unmutated(RespValue::ok())
}

pub fn discard(state: &AppState, args: &[Bytes], session: &mut ClientSession) -> Outcome {
    if !args.is_empty() {
        return wrong_args("discard");
    }
    if !session.tx.in_tx {
        return ok_unmutated(RespValue::error("ERR DISCARD without MULTI"));
    }
    session.tx.reset();
    state.watchers.lock().unwrap().unwatch_client(session.id, &session.watched_keys);
    session.watched_keys.clear();
    ok_unmutated(RespValue::ok())
}

pub fn watch(state: &AppState, args: &[Bytes], session: &mut ClientSession) -> Outcome {
    if args.is_empty() {
        return wrong_args("watch");
    }
    if session.tx.in_tx {
        return ok_unmutated(RespValue::error("ERR WATCH inside MULTI is not allowed"));
    }
    let mut watchers = state.watchers.lock().unwrap();
    for key in args {
        watchers.watch(key.clone(), session.id, session.tx.tx_failed.clone());
        if !session.watched_keys.contains(key) {
            session.watched_keys.push(key.clone());
        }
    }
    ok_unmutated(RespValue::ok())
}

pub fn unwatch(state: &AppState, args: &[Bytes], session: &mut ClientSession) -> Outcome {
    if !args.is_empty() {
        return wrong_args("unwatch");
    }
    state.watchers.lock().unwrap().unwatch_client(session.id, &session.watched_keys);
    session.watched_keys.clear();
    ok_unmutated(RespValue::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn state() -> AppState {
        AppState::new(AppConfig::default(), None)
    }

    #[test]
    fn multi_rejects_nesting() {
        let st = state();
        let mut session = ClientSession::new(1, "127.0.0.1:0".to_string());
        multi(&st, &[], &mut session);
        let (reply, _) = multi(&st, &[], &mut session);
        assert!(matches!(reply, RespValue::Error(_)));
    }

    #[test]
    fn discard_without_multi_errors() {
        let st = state();
        let mut session = ClientSession::new(1, "127.0.0.1:0".to_string());
        let (reply, _) = discard(&st, &[], &mut session);
        assert!(matches!(reply, RespValue::Error(_)));
    }

    #[test]
    fn watch_then_unwatch_clears_registry() {
        let st = state();
        let mut session = ClientSession::new(1, "127.0.0.1:0".to_string());
        watch(&st, &[b"k".to_vec()], &mut session);
        assert_eq!(session.watched_keys.len(), 1);
        unwatch(&st, &[], &mut session);
        assert!(session.watched_keys.is_empty());
        // unwatch cleared the registration, so touching `k` must not mark
        // this session's (already-cleared) tx_failed flag.
        st.watchers.lock().unwrap().touch(b"k");
        assert!(!session.tx.is_failed());
    }
}
