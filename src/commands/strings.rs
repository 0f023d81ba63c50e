//! String commands (§4.4). Grounded on `keyspace.rs`'s replace-only
//! mutation policy: every write here builds a fresh `Item` and hands it to
//! `AppState::admit_and_replace` rather than mutating a live payload.

use crate::commands::{
    bulk_or_null, clamp_range, format_float, not_float, not_integer, ok_mutated, ok_unmutated,
    parse_f64, parse_i64, wrong_args, wrongtype, Outcome,
};
use crate::keyspace::{now_ms, Bytes, Item, Payload};
use crate::resp::RespValue;
use crate::state::AppState;

fn as_string<'a>(item: &'a Item) -> Option<&'a Bytes> {
    match &item.payload {
        Payload::String(s) => Some(s),
        _ => None,
    }
}

pub fn get(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 1 {
        return wrong_args("get");
    }
    let mut ks = state.keyspace.lock().unwrap();
    match ks.get(&args[0]) {
        None => ok_unmutated(RespValue::Null),
        Some(item) => match as_string(item) {
            Some(s) => ok_unmutated(RespValue::bulk(s.clone())),
            None => ok_unmutated(wrongtype()),
        },
    }
}

pub fn set(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() < 2 {
        return wrong_args("set");
    }
    let key = args[0].clone();
    let value = args[1].clone();
    let mut expiry = None;
    let mut i = 2;
    while i < args.len() {
        let opt = String::from_utf8_lossy(&args[i]).to_ascii_uppercase();
        match opt.as_str() {
            "EX" | "PX" if i + 1 < args.len() => {
                let n = match parse_i64(&args[i + 1]) {
                    Some(n) if n > 0 => n,
                    _ => return (not_integer(), false),
                };
                let ms = if opt == "EX" { n * 1000 } else { n };
                expiry = Some(now_ms() + ms as u64);
                i += 2;
            }
            _ => return (RespValue::error("ERR syntax error"), false),
        }
    }
    let mut ks = state.keyspace.lock().unwrap();
    let mut item = Item::new(Payload::String(value));
    item.expiry = expiry;
    match state.admit_and_replace(&mut ks, key.clone(), item) {
        Ok(()) => {
            drop(ks);
            state.touch_key(&key);
            ok_mutated(RespValue::ok())
        }
        Err(e) => ok_unmutated(e),
    }
}

pub fn setnx(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 2 {
        return wrong_args("setnx");
    }
    let mut ks = state.keyspace.lock().unwrap();
    if ks.contains(&args[0]) {
        return ok_unmutated(RespValue::int(0));
    }
    let key = args[0].clone();
    match state.admit_and_replace(&mut ks, key.clone(), Item::new(Payload::String(args[1].clone()))) {
        Ok(()) => {
            drop(ks);
            state.touch_key(&key);
            ok_mutated(RespValue::int(1))
        }
        Err(e) => ok_unmutated(e),
    }
}

fn setex_impl(state: &AppState, args: &[Bytes], millis_arg: bool, cmd: &str) -> Outcome {
    if args.len() != 3 {
        return wrong_args(cmd);
    }
    let n = match parse_i64(&args[1]) {
        Some(n) if n > 0 => n,
        _ => return (not_integer(), false),
    };
    let ms = if millis_arg { n } else { n * 1000 };
    let key = args[0].clone();
    let mut item = Item::new(Payload::String(args[2].clone()));
    item.expiry = Some(now_ms() + ms as u64);
    let mut ks = state.keyspace.lock().unwrap();
    match state.admit_and_replace(&mut ks, key.clone(), item) {
        Ok(()) => {
            drop(ks);
            state.touch_key(&key);
            ok_mutated(RespValue::ok())
        }
        Err(e) => ok_unmutated(e),
    }
}

pub fn setex(state: &AppState, args: &[Bytes]) -> Outcome {
    setex_impl(state, args, false, "setex")
}

pub fn psetex(state: &AppState, args: &[Bytes]) -> Outcome {
    setex_impl(state, args, true, "psetex")
}

pub fn getset(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 2 {
        return wrong_args("getset");
    }
    let mut ks = state.keyspace.lock().unwrap();
    let old = match ks.peek(&args[0]) {
        Some(item) => match as_string(item) {
            Some(s) => Some(s.clone()),
            None => return ok_unmutated(wrongtype()),
        },
        None => None,
    };
    let key = args[0].clone();
    match state.admit_and_replace(&mut ks, key.clone(), Item::new(Payload::String(args[1].clone()))) {
        Ok(()) => {
            drop(ks);
            state.touch_key(&key);
            ok_mutated(bulk_or_null(old))
        }
        Err(e) => ok_unmutated(e),
    }
}

pub fn mget(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.is_empty() {
        return wrong_args("mget");
    }
    let mut ks = state.keyspace.lock().unwrap();
    let out = args
        .iter()
        .map(|k| match ks.get(k) {
            Some(item) => match as_string(item) {
                Some(s) => RespValue::bulk(s.clone()),
                None => RespValue::Null,
            },
            None => RespValue::Null,
        })
        .collect();
    ok_unmutated(RespValue::array(out))
}

pub fn mset(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.is_empty() || args.len() % 2 != 0 {
        return wrong_args("mset");
    }
    let mut ks = state.keyspace.lock().unwrap();
    for pair in args.chunks(2) {
        let key = pair[0].clone();
        // MSET bypasses eviction admission per pair the way a bulk load
        // would; a single pair failing admission fails the whole command.
        if let Err(e) = state.admit_and_replace(&mut ks, key.clone(), Item::new(Payload::String(pair[1].clone())))
        {
            return ok_unmutated(e);
        }
        drop(ks);
        state.touch_key(&key);
        ks = state.keyspace.lock().unwrap();
    }
    ok_mutated(RespValue::ok())
}

fn incr_by(state: &AppState, key: &[u8], delta: i64) -> Outcome {
    let mut ks = state.keyspace.lock().unwrap();
    let current = match ks.peek(key) {
        Some(item) => match as_string(item) {
            Some(s) => match parse_i64(s) {
                Some(n) => n,
                None => return (not_integer(), false),
            },
            None => return (wrongtype(), false),
        },
        None => 0,
    };
    let next = match current.checked_add(delta) {
        Some(n) => n,
        None => return (not_integer(), false),
    };
    let key = key.to_vec();
    match state.admit_and_replace(
        &mut ks,
        key.clone(),
        Item::new(Payload::String(next.to_string().into_bytes())),
    ) {
        Ok(()) => {
            drop(ks);
            state.touch_key(&key);
            ok_mutated(RespValue::int(next))
        }
        Err(e) => ok_unmutated(e),
    }
}

pub fn incr(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 1 {
        return wrong_args("incr");
    }
    incr_by(state, &args[0], 1)
}

pub fn decr(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 1 {
        return wrong_args("decr");
    }
    incr_by(state, &args[0], -1)
}

pub fn incrby(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 2 {
        return wrong_args("incrby");
    }
    match parse_i64(&args[1]) {
        Some(d) => incr_by(state, &args[0], d),
        None => (not_integer(), false),
    }
}

pub fn decrby(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 2 {
        return wrong_args("decrby");
    }
    match parse_i64(&args[1]) {
        Some(d) => incr_by(state, &args[0], -d),
        None => (not_integer(), false),
    }
}

pub fn incrbyfloat(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 2 {
        return wrong_args("incrbyfloat");
    }
    let delta = match parse_f64(&args[1]) {
        Some(f) => f,
        None => return (not_float(), false),
    };
    let mut ks = state.keyspace.lock().unwrap();
    let current = match ks.peek(&args[0]) {
        Some(item) => match as_string(item) {
            Some(s) => match parse_f64(s) {
                Some(n) => n,
                None => return (not_float(), false),
            },
            None => return (wrongtype(), false),
        },
        None => 0.0,
    };
    let next = current + delta;
    let key = args[0].clone();
    let formatted = format_float(next);
    match state.admit_and_replace(
        &mut ks,
        key.clone(),
        Item::new(Payload::String(formatted.clone().into_bytes())),
    ) {
        Ok(()) => {
            drop(ks);
            state.touch_key(&key);
            ok_mutated(RespValue::bulk(formatted.into_bytes()))
        }
        Err(e) => ok_unmutated(e),
    }
}

pub fn strlen(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 1 {
        return wrong_args("strlen");
    }
    let mut ks = state.keyspace.lock().unwrap();
    match ks.get(&args[0]) {
        None => ok_unmutated(RespValue::int(0)),
        Some(item) => match as_string(item) {
            Some(s) => ok_unmutated(RespValue::int(s.len() as i64)),
            None => ok_unmutated(wrongtype()),
        },
    }
}

pub fn append(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 2 {
        return wrong_args("append");
    }
    let mut ks = state.keyspace.lock().unwrap();
    let mut buf = match ks.peek(&args[0]) {
        Some(item) => match as_string(item) {
            Some(s) => s.clone(),
            None => return (wrongtype(), false),
        },
        None => Vec::new(),
    };
    buf.extend_from_slice(&args[1]);
    let len = buf.len() as i64;
    let key = args[0].clone();
    match state.admit_and_replace(&mut ks, key.clone(), Item::new(Payload::String(buf))) {
        Ok(()) => {
            drop(ks);
            state.touch_key(&key);
            ok_mutated(RespValue::int(len))
        }
        Err(e) => ok_unmutated(e),
    }
}

pub fn getrange(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 3 {
        return wrong_args("getrange");
    }
    let (start, stop) = match (parse_i64(&args[1]), parse_i64(&args[2])) {
        (Some(a), Some(b)) => (a, b),
        _ => return (not_integer(), false),
    };
    let mut ks = state.keyspace.lock().unwrap();
    let s = match ks.get(&args[0]) {
        Some(item) => match as_string(item) {
            Some(s) => s.clone(),
            None => return (wrongtype(), false),
        },
        None => return ok_unmutated(RespValue::bulk(Vec::new())),
    };
    match clamp_range(start, stop, s.len()) {
        Some((a, b)) => ok_unmutated(RespValue::bulk(s[a..=b].to_vec())),
        None => ok_unmutated(RespValue::bulk(Vec::new())),
    }
}

pub fn setrange(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 3 {
        return wrong_args("setrange");
    }
    let offset = match parse_i64(&args[1]) {
        Some(n) if n >= 0 => n as usize,
        _ => return (not_integer(), false),
    };
    let mut ks = state.keyspace.lock().unwrap();
    let mut buf = match ks.peek(&args[0]) {
        Some(item) => match as_string(item) {
            Some(s) => s.clone(),
            None => return (wrongtype(), false),
        },
        None => Vec::new(),
    };
    if buf.len() < offset + args[2].len() {
        buf.resize(offset + args[2].len(), 0);
    }
    buf[offset..offset + args[2].len()].copy_from_slice(&args[2]);
    let len = buf.len() as i64;
    let key = args[0].clone();
    match state.admit_and_replace(&mut ks, key.clone(), Item::new(Payload::String(buf))) {
        Ok(()) => {
            drop(ks);
            state.touch_key(&key);
            ok_mutated(RespValue::int(len))
        }
        Err(e) => ok_unmutated(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn state() -> AppState {
        AppState::new(AppConfig::default(), None)
    }

    #[test]
    fn set_then_get_round_trips() {
        let st = state();
        set(&st, &[b"k".to_vec(), b"v".to_vec()]);
        let (reply, _) = get(&st, &[b"k".to_vec()]);
        assert_eq!(reply, RespValue::bulk(*b"v"));
    }

    #[test]
    fn incr_on_missing_key_returns_one() {
        let st = state();
        let (reply, mutated) = incr(&st, &[b"counter".to_vec()]);
        assert_eq!(reply, RespValue::int(1));
        assert!(mutated);
        let (reply, _) = get(&st, &[b"counter".to_vec()]);
        assert_eq!(reply, RespValue::bulk(*b"1"));
    }

    #[test]
    fn incr_on_non_integer_value_errors() {
        let st = state();
        set(&st, &[b"k".to_vec(), b"abc".to_vec()]);
        let (reply, mutated) = incr(&st, &[b"k".to_vec()]);
        assert!(matches!(reply, RespValue::Error(_)));
        assert!(!mutated);
    }

    #[test]
    fn getrange_clamps_out_of_range() {
        let st = state();
        set(&st, &[b"k".to_vec(), b"hello".to_vec()]);
        let (reply, _) = getrange(&st, &[b"k".to_vec(), b"0".to_vec(), b"-1".to_vec()]);
        assert_eq!(reply, RespValue::bulk(*b"hello"));
        let (reply, _) = getrange(&st, &[b"k".to_vec(), b"5".to_vec(), b"2".to_vec()]);
        assert_eq!(reply, RespValue::bulk(Vec::<u8>::new()));
    }
}
