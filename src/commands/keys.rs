//! Generic key commands (§4.4): DEL, EXISTS, KEYS, TYPE, RENAME, EXPIRE,
//! TTL, PERSIST.

use globset::Glob;

use crate::commands::{not_integer, ok_mutated, ok_unmutated, parse_i64, wrong_args, Outcome};
use crate::keyspace::{now_ms, Bytes};
use crate::resp::RespValue;
use crate::state::AppState;

pub fn del(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.is_empty() {
        return wrong_args("del");
    }
    let mut ks = state.keyspace.lock().unwrap();
    let mut removed = 0i64;
    let mut touched = Vec::new();
    for k in args {
        if ks.remove(k).is_some() {
            removed += 1;
            touched.push(k.clone());
        }
    }
    drop(ks);
    for k in &touched {
        state.touch_key(k);
    }
    (RespValue::int(removed), removed > 0)
}

pub fn exists(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.is_empty() {
        return wrong_args("exists");
    }
    let mut ks = state.keyspace.lock().unwrap();
    let count = args.iter().filter(|k| ks.contains(k)).count();
    ok_unmutated(RespValue::int(count as i64))
}

pub fn keys(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 1 {
        return wrong_args("keys");
    }
    let pattern = match std::str::from_utf8(&args[0]) {
        Ok(p) => p,
        Err(_) => return (RespValue::error("ERR invalid pattern"), false),
    };
    let glob = match Glob::new(pattern) {
        Ok(g) => g.compile_matcher(),
        Err(_) => return (RespValue::error("ERR invalid pattern"), false),
    };
    let ks = state.keyspace.lock().unwrap();
    let now = now_ms();
    let out = ks
        .iter()
        .filter(|(_, item)| !item.is_expired(now))
        .filter(|(k, _)| glob.is_match(String::from_utf8_lossy(k).as_ref()))
        .map(|(k, _)| RespValue::bulk(k.clone()))
        .collect();
    ok_unmutated(RespValue::array(out))
}

pub fn r#type(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 1 {
        return wrong_args("type");
    }
    let mut ks = state.keyspace.lock().unwrap();
    match ks.get(&args[0]) {
        None => ok_unmutated(RespValue::simple("none")),
        Some(item) => ok_unmutated(RespValue::simple(item.type_tag().name())),
    }
}

pub fn rename(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 2 {
        return wrong_args("rename");
    }
    let mut ks = state.keyspace.lock().unwrap();
    if !ks.contains(&args[0]) {
        return (RespValue::error("ERR no such key"), false);
    }
    ks.rename(&args[0], args[1].clone());
    drop(ks);
    state.touch_key(&args[0]);
    state.touch_key(&args[1]);
    (RespValue::ok(), true)
}

pub fn expire(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 2 {
        return wrong_args("expire");
    }
    let seconds = match parse_i64(&args[1]) {
        Some(s) => s,
        None => return (not_integer(), false),
    };
    let mut ks = state.keyspace.lock().unwrap();
    if !ks.contains(&args[0]) {
        return ok_unmutated(RespValue::int(0));
    }
    let expiry = (now_ms() as i64 + seconds * 1000).max(0) as u64;
    ks.set_expiry(&args[0], Some(expiry));
    drop(ks);
    state.touch_key(&args[0]);
    ok_mutated(RespValue::int(1))
}

pub fn ttl(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 1 {
        return wrong_args("ttl");
    }
    let mut ks = state.keyspace.lock().unwrap();
    match ks.get(&args[0]) {
        None => ok_unmutated(RespValue::int(-2)),
        Some(item) => match item.expiry {
            None => ok_unmutated(RespValue::int(-1)),
            Some(e) => {
                let now = now_ms();
                let remaining = if e > now { (e - now) / 1000 } else { 0 };
                ok_unmutated(RespValue::int(remaining as i64))
            }
        },
    }
}

pub fn persist(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 1 {
        return wrong_args("persist");
    }
    let mut ks = state.keyspace.lock().unwrap();
    match ks.get(&args[0]) {
        None => ok_unmutated(RespValue::int(0)),
        Some(item) if item.expiry.is_none() => ok_unmutated(RespValue::int(0)),
        Some(_) => {
            ks.set_expiry(&args[0], None);
            ok_mutated(RespValue::int(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::strings::set;
    use crate::config::AppConfig;

    fn state() -> AppState {
        AppState::new(AppConfig::default(), None)
    }

    #[test]
    fn del_reports_removed_count() {
        let st = state();
        set(&st, &[b"a".to_vec(), b"1".to_vec()]);
        set(&st, &[b"b".to_vec(), b"1".to_vec()]);
        let (reply, _) = del(&st, &[b"a".to_vec(), b"missing".to_vec(), b"b".to_vec()]);
        assert_eq!(reply, RespValue::int(2));
    }

    #[test]
    fn expire_then_ttl_reports_remaining_seconds() {
        let st = state();
        set(&st, &[b"k".to_vec(), b"v".to_vec()]);
        expire(&st, &[b"k".to_vec(), b"100".to_vec()]);
        let (reply, _) = ttl(&st, &[b"k".to_vec()]);
        match reply {
            RespValue::Integer(n) => assert!(n > 0 && n <= 100),
            _ => panic!("expected integer"),
        }
    }

    #[test]
    fn keys_matches_glob_pattern() {
        let st = state();
        set(&st, &[b"foo".to_vec(), b"1".to_vec()]);
        set(&st, &[b"bar".to_vec(), b"1".to_vec()]);
        let (reply, _) = keys(&st, &[b"fo*".to_vec()]);
        assert_eq!(reply, RespValue::array(vec![RespValue::bulk(*b"foo")]));
    }
}
