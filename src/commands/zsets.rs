//! Sorted set commands (§4.4). Backed by `Payload::ZSet(IndexMap<Bytes, f64>)`.
//! `IndexMap` preserves insertion order, not score order, so every ranking
//! operation sorts on demand (score ascending, ties broken lexicographically
//! by member) rather than maintaining a separate ordered structure — a
//! deliberate simplification given the "no maximum performance tuning"
//! non-goal (SPEC_FULL.md §7).

use indexmap::IndexMap;

use crate::commands::{format_float, not_float, ok_mutated, ok_unmutated, parse_f64, parse_i64, wrong_args, wrongtype, Outcome};
use crate::keyspace::{Bytes, Item, Payload};
use crate::resp::RespValue;
use crate::state::AppState;

fn as_zset(item: &Item) -> Option<&IndexMap<Bytes, f64>> {
    match &item.payload {
        Payload::ZSet(z) => Some(z),
        _ => None,
    }
}

fn sorted(z: &IndexMap<Bytes, f64>) -> Vec<(Bytes, f64)> {
    let mut v: Vec<(Bytes, f64)> = z.iter().map(|(m, s)| (m.clone(), *s)).collect();
    v.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    v
}

pub fn zadd(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() < 3 || args.len() % 2 != 1 {
        return wrong_args("zadd");
    }
    let mut ks = state.keyspace.lock().unwrap();
    let mut zset = match ks.peek(&args[0]) {
        Some(item) => match as_zset(item) {
            Some(z) => z.clone(),
            None => return (wrongtype(), false),
        },
        None => IndexMap::new(),
    };
    let mut added = 0i64;
    for pair in args[1..].chunks(2) {
        let score = match parse_f64(&pair[0]) {
            Some(s) => s,
            None => return (not_float(), false),
        };
        if zset.insert(pair[1].clone(), score).is_none() {
            added += 1;
        }
    }
    let key = args[0].clone();
    match state.admit_and_replace(&mut ks, key.clone(), Item::new(Payload::ZSet(zset))) {
        Ok(()) => {
            drop(ks);
            state.touch_key(&key);
            ok_mutated(RespValue::int(added))
        }
        Err(e) => ok_unmutated(e),
    }
}

pub fn zrem(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() < 2 {
        return wrong_args("zrem");
    }
    let mut ks = state.keyspace.lock().unwrap();
    let mut zset = match ks.peek(&args[0]) {
        None => return ok_unmutated(RespValue::int(0)),
        Some(item) => match as_zset(item) {
            Some(z) => z.clone(),
            None => return (wrongtype(), false),
        },
    };
    let mut removed = 0i64;
    for m in &args[1..] {
        if zset.shift_remove(m).is_some() {
            removed += 1;
        }
    }
    let key = args[0].clone();
    if zset.is_empty() {
        ks.remove(&key);
    } else {
        ks.replace(key.clone(), Item::new(Payload::ZSet(zset)));
    }
    drop(ks);
    if removed > 0 {
        state.touch_key(&key);
    }
    (RespValue::int(removed), removed > 0)
}

pub fn zscore(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 2 {
        return wrong_args("zscore");
    }
    let mut ks = state.keyspace.lock().unwrap();
    match ks.get(&args[0]) {
        None => ok_unmutated(RespValue::Null),
        Some(item) => match as_zset(item) {
            None => ok_unmutated(wrongtype()),
            Some(z) => match z.get(&args[1]) {
                Some(s) => ok_unmutated(RespValue::bulk(format_float(*s).into_bytes())),
                None => ok_unmutated(RespValue::Null),
            },
        },
    }
}

pub fn zcard(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 1 {
        return wrong_args("zcard");
    }
    let mut ks = state.keyspace.lock().unwrap();
    match ks.get(&args[0]) {
        None => ok_unmutated(RespValue::int(0)),
        Some(item) => match as_zset(item) {
            None => ok_unmutated(wrongtype()),
            Some(z) => ok_unmutated(RespValue::int(z.len() as i64)),
        },
    }
}

fn range_reply(entries: Vec<(Bytes, f64)>, with_scores: bool) -> RespValue {
    let mut out = Vec::with_capacity(entries.len() * if with_scores { 2 } else { 1 });
    for (m, s) in entries {
        out.push(RespValue::bulk(m));
        if with_scores {
            out.push(RespValue::bulk(format_float(s).into_bytes()));
        }
    }
    RespValue::array(out)
}

fn range_by_index(state: &AppState, args: &[Bytes], reverse: bool, cmd: &str) -> Outcome {
    if args.len() < 3 {
        return wrong_args(cmd);
    }
    let with_scores = args.len() == 4 && args[3].eq_ignore_ascii_case(b"WITHSCORES");
    if args.len() == 4 && !with_scores {
        return (RespValue::error("ERR syntax error"), false);
    }
    let start = match parse_i64(&args[1]) {
        Some(n) => n,
        None => return (crate::commands::not_integer(), false),
    };
    let stop = match parse_i64(&args[2]) {
        Some(n) => n,
        None => return (crate::commands::not_integer(), false),
    };
    let mut ks = state.keyspace.lock().unwrap();
    let zset = match ks.get(&args[0]) {
        None => return ok_unmutated(RespValue::array(Vec::new())),
        Some(item) => match as_zset(item) {
            Some(z) => z,
            None => return ok_unmutated(wrongtype()),
        },
    };
    let mut ordered = sorted(zset);
    if reverse {
        ordered.reverse();
    }
    match crate::commands::clamp_range(start, stop, ordered.len()) {
        Some((a, b)) => {
            let slice = ordered.into_iter().skip(a).take(b - a + 1).collect();
            ok_unmutated(range_reply(slice, with_scores))
        }
        None => ok_unmutated(RespValue::array(Vec::new())),
    }
}

pub fn zrange(state: &AppState, args: &[Bytes]) -> Outcome {
    range_by_index(state, args, false, "zrange")
}

pub fn zrevrange(state: &AppState, args: &[Bytes]) -> Outcome {
    range_by_index(state, args, true, "zrevrange")
}

fn parse_score_bound(b: &[u8]) -> Option<(f64, bool)> {
    if b == b"-inf" {
        return Some((f64::NEG_INFINITY, false));
    }
    if b == b"+inf" || b == b"inf" {
        return Some((f64::INFINITY, false));
    }
    if let Some(rest) = b.strip_prefix(b"(") {
        return std::str::from_utf8(rest).ok()?.parse::<f64>().ok().map(|f| (f, true));
    }
    std::str::from_utf8(b).ok()?.parse::<f64>().ok().map(|f| (f, false))
}

pub fn zrangebyscore(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() < 3 {
        return wrong_args("zrangebyscore");
    }
    let with_scores = args.len() == 4 && args[3].eq_ignore_ascii_case(b"WITHSCORES");
    if args.len() == 4 && !with_scores {
        return (RespValue::error("ERR syntax error"), false);
    }
    let (min, min_excl) = match parse_score_bound(&args[1]) {
        Some(v) => v,
        None => return (not_float(), false),
    };
    let (max, max_excl) = match parse_score_bound(&args[2]) {
        Some(v) => v,
        None => return (not_float(), false),
    };
    let mut ks = state.keyspace.lock().unwrap();
    let zset = match ks.get(&args[0]) {
        None => return ok_unmutated(RespValue::array(Vec::new())),
        Some(item) => match as_zset(item) {
            Some(z) => z,
            None => return ok_unmutated(wrongtype()),
        },
    };
    let ordered = sorted(zset);
    let filtered: Vec<(Bytes, f64)> = ordered
        .into_iter()
        .filter(|(_, s)| {
            let lower_ok = if min_excl { *s > min } else { *s >= min };
            let upper_ok = if max_excl { *s < max } else { *s <= max };
            lower_ok && upper_ok
        })
        .collect();
    ok_unmutated(range_reply(filtered, with_scores))
}

fn rank(state: &AppState, args: &[Bytes], reverse: bool, cmd: &str) -> Outcome {
    if args.len() != 2 {
        return wrong_args(cmd);
    }
    let mut ks = state.keyspace.lock().unwrap();
    let zset = match ks.get(&args[0]) {
        None => return ok_unmutated(RespValue::Null),
        Some(item) => match as_zset(item) {
            Some(z) => z,
            None => return ok_unmutated(wrongtype()),
        },
    };
    if !zset.contains_key(&args[1]) {
        return ok_unmutated(RespValue::Null);
    }
    let mut ordered = sorted(zset);
    if reverse {
        ordered.reverse();
    }
    match ordered.iter().position(|(m, _)| m == &args[1]) {
        Some(idx) => ok_unmutated(RespValue::int(idx as i64)),
        None => ok_unmutated(RespValue::Null),
    }
}

pub fn zrank(state: &AppState, args: &[Bytes]) -> Outcome {
    rank(state, args, false, "zrank")
}

pub fn zrevrank(state: &AppState, args: &[Bytes]) -> Outcome {
    rank(state, args, true, "zrevrank")
}

pub fn zincrby(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 3 {
        return wrong_args("zincrby");
    }
    let delta = match parse_f64(&args[1]) {
        Some(d) => d,
        None => return (not_float(), false),
    };
    let mut ks = state.keyspace.lock().unwrap();
    let mut zset = match ks.peek(&args[0]) {
        Some(item) => match as_zset(item) {
            Some(z) => z.clone(),
            None => return (wrongtype(), false),
        },
        None => IndexMap::new(),
    };
    let new_score = zset.get(&args[2]).copied().unwrap_or(0.0) + delta;
    zset.insert(args[2].clone(), new_score);
    let key = args[0].clone();
    match state.admit_and_replace(&mut ks, key.clone(), Item::new(Payload::ZSet(zset))) {
        Ok(()) => {
            drop(ks);
            state.touch_key(&key);
            ok_mutated(RespValue::bulk(format_float(new_score).into_bytes()))
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
    fn zrange_sorts_by_score() {
        let st = state();
        zadd(&st, &[b"z".to_vec(), b"3".to_vec(), b"c".to_vec(), b"1".to_vec(), b"a".to_vec(), b"2".to_vec(), b"b".to_vec()]);
        let (reply, _) = zrange(&st, &[b"z".to_vec(), b"0".to_vec(), b"-1".to_vec()]);
        assert_eq!(
            reply,
            RespValue::array(vec![RespValue::bulk(*b"a"), RespValue::bulk(*b"b"), RespValue::bulk(*b"c")])
        );
    }

    #[test]
    fn zrangebyscore_filters_inclusive_bounds() {
        let st = state();
        zadd(&st, &[b"z".to_vec(), b"1".to_vec(), b"a".to_vec(), b"2".to_vec(), b"b".to_vec(), b"3".to_vec(), b"c".to_vec()]);
        let (reply, _) = zrangebyscore(&st, &[b"z".to_vec(), b"2".to_vec(), b"3".to_vec()]);
        assert_eq!(reply, RespValue::array(vec![RespValue::bulk(*b"b"), RespValue::bulk(*b"c")]));
    }

    #[test]
    fn zincrby_creates_on_missing_member() {
        let st = state();
        let (reply, _) = zincrby(&st, &[b"z".to_vec(), b"5".to_vec(), b"m".to_vec()]);
        assert_eq!(reply, RespValue::bulk(*b"5"));
    }
}
