//! Hash commands (§4.4). Backed by `Payload::Hash(IndexMap<Bytes, HashField>)`.
//! Fields carry their own optional expiry (`HashField.expiry`, §3 C2); every
//! read path here filters out fields that have expired the same way the
//! keyspace does for whole keys.

use crate::commands::{not_integer, ok_mutated, ok_unmutated, parse_f64, parse_i64, wrong_args, wrongtype, Outcome};
use crate::keyspace::{now_ms, Bytes, HashField, Item, Payload};
use crate::resp::RespValue;
use crate::state::AppState;
use indexmap::IndexMap;

fn as_hash(item: &Item) -> Option<&IndexMap<Bytes, HashField>> {
    match &item.payload {
        Payload::Hash(h) => Some(h),
        _ => None,
    }
}

fn live(field: &HashField, now: u64) -> bool {
    !matches!(field.expiry, Some(e) if e <= now)
}

pub fn hset(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() < 3 || args.len() % 2 != 1 {
        return wrong_args("hset");
    }
    let mut ks = state.keyspace.lock().unwrap();
    let mut hash = match ks.peek(&args[0]) {
        Some(item) => match as_hash(item) {
            Some(h) => h.clone(),
            None => return (wrongtype(), false),
        },
        None => IndexMap::new(),
    };
    let mut added = 0i64;
    for pair in args[1..].chunks(2) {
        let field = HashField {
            value: pair[1].clone(),
            expiry: None,
        };
        if hash.insert(pair[0].clone(), field).is_none() {
            added += 1;
        }
    }
    let key = args[0].clone();
    match state.admit_and_replace(&mut ks, key.clone(), Item::new(Payload::Hash(hash))) {
        Ok(()) => {
            drop(ks);
            state.touch_key(&key);
            ok_mutated(RespValue::int(added))
        }
        Err(e) => ok_unmutated(e),
    }
}

pub fn hsetnx(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 3 {
        return wrong_args("hsetnx");
    }
    let mut ks = state.keyspace.lock().unwrap();
    let mut hash = match ks.peek(&args[0]) {
        Some(item) => match as_hash(item) {
            Some(h) => h.clone(),
            None => return (wrongtype(), false),
        },
        None => IndexMap::new(),
    };
    let now = now_ms();
    if hash.get(&args[1]).map_or(false, |f| live(f, now)) {
        return ok_unmutated(RespValue::int(0));
    }
    hash.insert(
        args[1].clone(),
        HashField {
            value: args[2].clone(),
            expiry: None,
        },
    );
    let key = args[0].clone();
    match state.admit_and_replace(&mut ks, key.clone(), Item::new(Payload::Hash(hash))) {
        Ok(()) => {
            drop(ks);
            state.touch_key(&key);
            ok_mutated(RespValue::int(1))
        }
        Err(e) => ok_unmutated(e),
    }
}

pub fn hget(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 2 {
        return wrong_args("hget");
    }
    let mut ks = state.keyspace.lock().unwrap();
    match ks.get(&args[0]) {
        None => ok_unmutated(RespValue::Null),
        Some(item) => match as_hash(item) {
            None => ok_unmutated(wrongtype()),
            Some(h) => {
                let now = now_ms();
                match h.get(&args[1]) {
                    Some(f) if live(f, now) => ok_unmutated(RespValue::bulk(f.value.clone())),
                    _ => ok_unmutated(RespValue::Null),
                }
            }
        },
    }
}

pub fn hmget(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() < 2 {
        return wrong_args("hmget");
    }
    let mut ks = state.keyspace.lock().unwrap();
    let hash = match ks.get(&args[0]) {
        None => return ok_unmutated(RespValue::array(args[1..].iter().map(|_| RespValue::Null).collect())),
        Some(item) => match as_hash(item) {
            Some(h) => h,
            None => return ok_unmutated(wrongtype()),
        },
    };
    let now = now_ms();
    let out = args[1..]
        .iter()
        .map(|f| match hash.get(f) {
            Some(v) if live(v, now) => RespValue::bulk(v.value.clone()),
            _ => RespValue::Null,
        })
        .collect();
    ok_unmutated(RespValue::array(out))
}

pub fn hmset(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() < 3 || args.len() % 2 != 1 {
        return wrong_args("hmset");
    }
    let (reply, mutated) = hset(state, args);
    match reply {
        RespValue::Error(_) => (reply, mutated),
        _ => (RespValue::ok(), mutated),
    }
}

pub fn hdel(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() < 2 {
        return wrong_args("hdel");
    }
    let mut ks = state.keyspace.lock().unwrap();
    let mut hash = match ks.peek(&args[0]) {
        None => return ok_unmutated(RespValue::int(0)),
        Some(item) => match as_hash(item) {
            Some(h) => h.clone(),
            None => return (wrongtype(), false),
        },
    };
    let mut removed = 0i64;
    for f in &args[1..] {
        if hash.shift_remove(f).is_some() {
            removed += 1;
        }
    }
    let key = args[0].clone();
    if hash.is_empty() {
        ks.remove(&key);
    } else {
        ks.replace(key.clone(), Item::new(Payload::Hash(hash)));
    }
    drop(ks);
    if removed > 0 {
        state.touch_key(&key);
    }
    (RespValue::int(removed), removed > 0)
}

pub fn hexists(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 2 {
        return wrong_args("hexists");
    }
    let mut ks = state.keyspace.lock().unwrap();
    match ks.get(&args[0]) {
        None => ok_unmutated(RespValue::int(0)),
        Some(item) => match as_hash(item) {
            None => ok_unmutated(wrongtype()),
            Some(h) => {
                let now = now_ms();
                let present = h.get(&args[1]).map_or(false, |f| live(f, now));
                ok_unmutated(RespValue::int(present as i64))
            }
        },
    }
}

pub fn hlen(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 1 {
        return wrong_args("hlen");
    }
    let mut ks = state.keyspace.lock().unwrap();
    match ks.get(&args[0]) {
        None => ok_unmutated(RespValue::int(0)),
        Some(item) => match as_hash(item) {
            None => ok_unmutated(wrongtype()),
            Some(h) => {
                let now = now_ms();
                ok_unmutated(RespValue::int(h.values().filter(|f| live(f, now)).count() as i64))
            }
        },
    }
}

pub fn hkeys(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 1 {
        return wrong_args("hkeys");
    }
    let mut ks = state.keyspace.lock().unwrap();
    match ks.get(&args[0]) {
        None => ok_unmutated(RespValue::array(Vec::new())),
        Some(item) => match as_hash(item) {
            None => ok_unmutated(wrongtype()),
            Some(h) => {
                let now = now_ms();
                let out = h
                    .iter()
                    .filter(|(_, f)| live(f, now))
                    .map(|(k, _)| RespValue::bulk(k.clone()))
                    .collect();
                ok_unmutated(RespValue::array(out))
            }
        },
    }
}

pub fn hvals(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 1 {
        return wrong_args("hvals");
    }
    let mut ks = state.keyspace.lock().unwrap();
    match ks.get(&args[0]) {
        None => ok_unmutated(RespValue::array(Vec::new())),
        Some(item) => match as_hash(item) {
            None => ok_unmutated(wrongtype()),
            Some(h) => {
                let now = now_ms();
                let out = h
                    .values()
                    .filter(|f| live(f, now))
                    .map(|f| RespValue::bulk(f.value.clone()))
                    .collect();
                ok_unmutated(RespValue::array(out))
            }
        },
    }
}

pub fn hgetall(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 1 {
        return wrong_args("hgetall");
    }
    let mut ks = state.keyspace.lock().unwrap();
    match ks.get(&args[0]) {
        None => ok_unmutated(RespValue::array(Vec::new())),
        Some(item) => match as_hash(item) {
            None => ok_unmutated(wrongtype()),
            Some(h) => {
                let now = now_ms();
                let mut out = Vec::with_capacity(h.len() * 2);
                for (k, f) in h.iter().filter(|(_, f)| live(f, now)) {
                    out.push(RespValue::bulk(k.clone()));
                    out.push(RespValue::bulk(f.value.clone()));
                }
                ok_unmutated(RespValue::array(out))
            }
        },
    }
}

fn incr_field(state: &AppState, args: &[Bytes], cmd: &str, delta_is_float: bool) -> Outcome {
    if args.len() != 3 {
        return wrong_args(cmd);
    }
    let mut ks = state.keyspace.lock().unwrap();
    let mut hash = match ks.peek(&args[0]) {
        Some(item) => match as_hash(item) {
            Some(h) => h.clone(),
            None => return (wrongtype(), false),
        },
        None => IndexMap::new(),
    };
    let now = now_ms();
    let current_text = hash.get(&args[1]).filter(|f| live(f, now)).map(|f| f.value.clone());

    let new_text = if delta_is_float {
        let delta = match parse_f64(&args[2]) {
            Some(d) => d,
            None => return (RespValue::error("ERR value is not a valid float"), false),
        };
        let current = match &current_text {
            Some(v) => match std::str::from_utf8(v).ok().and_then(|s| s.parse::<f64>().ok()) {
                Some(f) => f,
                None => return (RespValue::error("ERR hash value is not a float"), false),
            },
            None => 0.0,
        };
        crate::commands::format_float(current + delta).into_bytes()
    } else {
        let delta = match parse_i64(&args[2]) {
            Some(d) => d,
            None => return (not_integer(), false),
        };
        let current = match &current_text {
            Some(v) => match std::str::from_utf8(v).ok().and_then(|s| s.parse::<i64>().ok()) {
                Some(i) => i,
                None => return (RespValue::error("ERR hash value is not an integer"), false),
            },
            None => 0,
        };
        let sum = match current.checked_add(delta) {
            Some(s) => s,
            None => return (not_integer(), false),
        };
        sum.to_string().into_bytes()
    };

    hash.insert(
        args[1].clone(),
        HashField {
            value: new_text.clone(),
            expiry: None,
        },
    );
    let key = args[0].clone();
    match state.admit_and_replace(&mut ks, key.clone(), Item::new(Payload::Hash(hash))) {
        Ok(()) => {
            drop(ks);
            state.touch_key(&key);
            ok_mutated(RespValue::bulk(new_text))
        }
        Err(e) => ok_unmutated(e),
    }
}

pub fn hincrby(state: &AppState, args: &[Bytes]) -> Outcome {
    incr_field(state, args, "hincrby", false)
}

pub fn hincrbyfloat(state: &AppState, args: &[Bytes]) -> Outcome {
    incr_field(state, args, "hincrbyfloat", true)
}

/// `HEXPIRE key seconds FIELDS numfields field [field ...]`.
pub fn hexpire(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() < 5 {
        return wrong_args("hexpire");
    }
    let seconds = match parse_i64(&args[1]) {
        Some(s) if s >= 0 => s,
        _ => return (not_integer(), false),
    };
    if !args[2].eq_ignore_ascii_case(b"FIELDS") {
        return (RespValue::error("ERR syntax error"), false);
    }
    let numfields = match parse_i64(&args[3]) {
        Some(n) if n >= 0 => n as usize,
        _ => return (not_integer(), false),
    };
    let fields = &args[4..];
    if fields.len() != numfields {
        return (
            RespValue::error("ERR wrong number of fields in HEXPIRE"),
            false,
        );
    }
    let mut ks = state.keyspace.lock().unwrap();
    let mut hash = match ks.peek(&args[0]) {
        Some(item) => match as_hash(item) {
            Some(h) => h.clone(),
            None => return (wrongtype(), false),
        },
        None => return ok_unmutated(RespValue::array(fields.iter().map(|_| RespValue::int(-2)).collect())),
    };
    let expiry = now_ms() + (seconds as u64) * 1000;
    let mut results = Vec::with_capacity(fields.len());
    for f in fields {
        match hash.get_mut(f) {
            Some(field) => {
                field.expiry = Some(expiry);
                results.push(RespValue::int(1));
            }
            None => results.push(RespValue::int(-2)),
        }
    }
    let key = args[0].clone();
    ks.replace(key.clone(), Item::new(Payload::Hash(hash)));
    drop(ks);
    state.touch_key(&key);
    (RespValue::array(results), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn state() -> AppState {
        AppState::new(AppConfig::default(), None)
    }

    #[test]
    fn hset_then_hgetall_round_trips() {
        let st = state();
        hset(&st, &[b"h".to_vec(), b"a".to_vec(), b"1".to_vec(), b"b".to_vec(), b"2".to_vec()]);
        let (reply, _) = hgetall(&st, &[b"h".to_vec()]);
        assert_eq!(
            reply,
            RespValue::array(vec![
                RespValue::bulk(*b"a"),
                RespValue::bulk(*b"1"),
                RespValue::bulk(*b"b"),
                RespValue::bulk(*b"2"),
            ])
        );
    }

    #[test]
    fn hincrby_on_missing_field_starts_at_zero() {
        let st = state();
        let (reply, _) = hincrby(&st, &[b"h".to_vec(), b"f".to_vec(), b"5".to_vec()]);
        assert_eq!(reply, RespValue::bulk(*b"5"));
    }

    #[test]
    fn hexpire_marks_field_expired() {
        let st = state();
        hset(&st, &[b"h".to_vec(), b"f".to_vec(), b"v".to_vec()]);
        hexpire(&st, &[b"h".to_vec(), b"0".to_vec(), b"FIELDS".to_vec(), b"1".to_vec(), b"f".to_vec()]);
        let (reply, _) = hget(&st, &[b"h".to_vec(), b"f".to_vec()]);
        assert_eq!(reply, RespValue::Null);
    }
}
