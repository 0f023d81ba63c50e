//! Set commands (§4.4). Backed by `Payload::Set(IndexSet<Bytes>)`.

use indexmap::IndexSet;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::commands::{not_integer, ok_mutated, ok_unmutated, parse_i64, wrong_args, wrongtype, Outcome};
use crate::keyspace::{Bytes, Item, Payload};
use crate::resp::RespValue;
use crate::state::AppState;

fn as_set(item: &Item) -> Option<&IndexSet<Bytes>> {
    match &item.payload {
        Payload::Set(s) => Some(s),
        _ => None,
    }
}

pub fn sadd(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() < 2 {
        return wrong_args("sadd");
    }
    let mut ks = state.keyspace.lock().unwrap();
    let mut set = match ks.peek(&args[0]) {
        Some(item) => match as_set(item) {
            Some(s) => s.clone(),
            None => return (wrongtype(), false),
        },
        None => IndexSet::new(),
    };
    let mut added = 0i64;
    for m in &args[1..] {
        if set.insert(m.clone()) {
            added += 1;
        }
    }
    let key = args[0].clone();
    match state.admit_and_replace(&mut ks, key.clone(), Item::new(Payload::Set(set))) {
        Ok(()) => {
            drop(ks);
            state.touch_key(&key);
            ok_mutated(RespValue::int(added))
        }
        Err(e) => ok_unmutated(e),
    }
}

pub fn srem(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() < 2 {
        return wrong_args("srem");
    }
    let mut ks = state.keyspace.lock().unwrap();
    let mut set = match ks.peek(&args[0]) {
        None => return ok_unmutated(RespValue::int(0)),
        Some(item) => match as_set(item) {
            Some(s) => s.clone(),
            None => return (wrongtype(), false),
        },
    };
    let mut removed = 0i64;
    for m in &args[1..] {
        if set.shift_remove(m) {
            removed += 1;
        }
    }
    let key = args[0].clone();
    if set.is_empty() {
        ks.remove(&key);
    } else {
        ks.replace(key.clone(), Item::new(Payload::Set(set)));
    }
    drop(ks);
    if removed > 0 {
        state.touch_key(&key);
    }
    (RespValue::int(removed), removed > 0)
}

pub fn smembers(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 1 {
        return wrong_args("smembers");
    }
    let mut ks = state.keyspace.lock().unwrap();
    match ks.get(&args[0]) {
        None => ok_unmutated(RespValue::array(Vec::new())),
        Some(item) => match as_set(item) {
            None => ok_unmutated(wrongtype()),
            Some(s) => ok_unmutated(RespValue::array(s.iter().cloned().map(RespValue::bulk).collect())),
        },
    }
}

pub fn sismember(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 2 {
        return wrong_args("sismember");
    }
    let mut ks = state.keyspace.lock().unwrap();
    match ks.get(&args[0]) {
        None => ok_unmutated(RespValue::int(0)),
        Some(item) => match as_set(item) {
            None => ok_unmutated(wrongtype()),
            Some(s) => ok_unmutated(RespValue::int(s.contains(&args[1]) as i64)),
        },
    }
}

pub fn scard(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 1 {
        return wrong_args("scard");
    }
    let mut ks = state.keyspace.lock().unwrap();
    match ks.get(&args[0]) {
        None => ok_unmutated(RespValue::int(0)),
        Some(item) => match as_set(item) {
            None => ok_unmutated(wrongtype()),
            Some(s) => ok_unmutated(RespValue::int(s.len() as i64)),
        },
    }
}

fn load_sets(ks: &mut crate::keyspace::Keyspace, keys: &[Bytes]) -> Result<Vec<IndexSet<Bytes>>, RespValue> {
    let mut sets = Vec::with_capacity(keys.len());
    for k in keys {
        match ks.get(k) {
            None => sets.push(IndexSet::new()),
            Some(item) => match as_set(item) {
                Some(s) => sets.push(s.clone()),
                None => return Err(wrongtype()),
            },
        }
    }
    Ok(sets)
}

fn combine(sets: &[IndexSet<Bytes>], op: &str) -> IndexSet<Bytes> {
    match op {
        "inter" => {
            let mut iter = sets.iter();
            match iter.next() {
                None => IndexSet::new(),
                Some(first) => iter.fold(first.clone(), |acc, s| acc.intersection(s).cloned().collect()),
            }
        }
        "union" => sets.iter().fold(IndexSet::new(), |mut acc, s| {
            acc.extend(s.iter().cloned());
            acc
        }),
        "diff" => {
            let mut iter = sets.iter();
            match iter.next() {
                None => IndexSet::new(),
                Some(first) => iter.fold(first.clone(), |acc, s| acc.difference(s).cloned().collect()),
            }
        }
        _ => unreachable!(),
    }
}

fn set_op(state: &AppState, args: &[Bytes], op: &str, cmd: &str) -> Outcome {
    if args.is_empty() {
        return wrong_args(cmd);
    }
    let mut ks = state.keyspace.lock().unwrap();
    let sets = match load_sets(&mut ks, args) {
        Ok(s) => s,
        Err(e) => return (e, false),
    };
    let result = combine(&sets, op);
    ok_unmutated(RespValue::array(result.into_iter().map(RespValue::bulk).collect()))
}

pub fn sinter(state: &AppState, args: &[Bytes]) -> Outcome {
    set_op(state, args, "inter", "sinter")
}

pub fn sunion(state: &AppState, args: &[Bytes]) -> Outcome {
    set_op(state, args, "union", "sunion")
}

pub fn sdiff(state: &AppState, args: &[Bytes]) -> Outcome {
    set_op(state, args, "diff", "sdiff")
}

fn set_op_store(state: &AppState, args: &[Bytes], op: &str, cmd: &str) -> Outcome {
    if args.len() < 2 {
        return wrong_args(cmd);
    }
    let mut ks = state.keyspace.lock().unwrap();
    let sets = match load_sets(&mut ks, &args[1..]) {
        Ok(s) => s,
        Err(e) => return (e, false),
    };
    let result = combine(&sets, op);
    let len = result.len() as i64;
    let dest = args[0].clone();
    if result.is_empty() {
        ks.remove(&dest);
        drop(ks);
        (RespValue::int(0), true)
    } else {
        match state.admit_and_replace(&mut ks, dest.clone(), Item::new(Payload::Set(result))) {
            Ok(()) => {
                drop(ks);
                state.touch_key(&dest);
                ok_mutated(RespValue::int(len))
            }
            Err(e) => ok_unmutated(e),
        }
    }
}

pub fn sinterstore(state: &AppState, args: &[Bytes]) -> Outcome {
    set_op_store(state, args, "inter", "sinterstore")
}

pub fn sunionstore(state: &AppState, args: &[Bytes]) -> Outcome {
    set_op_store(state, args, "union", "sunionstore")
}

pub fn sdiffstore(state: &AppState, args: &[Bytes]) -> Outcome {
    set_op_store(state, args, "diff", "sdiffstore")
}

pub fn srandmember(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.is_empty() || args.len() > 2 {
        return wrong_args("srandmember");
    }
    let mut ks = state.keyspace.lock().unwrap();
    let set = match ks.get(&args[0]) {
        None => {
            return ok_unmutated(if args.len() == 2 {
                RespValue::array(Vec::new())
            } else {
                RespValue::Null
            })
        }
        Some(item) => match as_set(item) {
            Some(s) => s,
            None => return ok_unmutated(wrongtype()),
        },
    };
    let members: Vec<&Bytes> = set.iter().collect();
    let mut rng = rand::thread_rng();
    if args.len() == 1 {
        return ok_unmutated(match members.choose(&mut rng) {
            Some(m) => RespValue::bulk((*m).clone()),
            None => RespValue::Null,
        });
    }
    let count = match parse_i64(&args[1]) {
        Some(n) => n,
        None => return (not_integer(), false),
    };
    let out: Vec<RespValue> = if count >= 0 {
        let n = (count as usize).min(members.len());
        let mut shuffled = members.clone();
        shuffled.shuffle(&mut rng);
        shuffled.into_iter().take(n).map(|m| RespValue::bulk(m.clone())).collect()
    } else {
        let n = (-count) as usize;
        (0..n)
            .map(|_| {
                let idx = rng.gen_range(0..members.len().max(1));
                RespValue::bulk(members[idx.min(members.len().saturating_sub(1))].clone())
            })
            .collect()
    };
    ok_unmutated(RespValue::array(out))
}

pub fn spop(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.is_empty() || args.len() > 2 {
        return wrong_args("spop");
    }
    let count = if args.len() == 2 {
        match parse_i64(&args[1]) {
            Some(n) if n >= 0 => Some(n as usize),
            _ => return (not_integer(), false),
        }
    } else {
        None
    };
    let mut ks = state.keyspace.lock().unwrap();
    let mut set = match ks.peek(&args[0]) {
        None => {
            return ok_unmutated(if args.len() == 2 {
                RespValue::array(Vec::new())
            } else {
                RespValue::Null
            })
        }
        Some(item) => match as_set(item) {
            Some(s) => s.clone(),
            None => return (wrongtype(), false),
        },
    };
    let mut rng = rand::thread_rng();
    let n = count.unwrap_or(1).min(set.len());
    let mut popped = Vec::with_capacity(n);
    for _ in 0..n {
        if set.is_empty() {
            break;
        }
        let idx = rng.gen_range(0..set.len());
        if let Some(m) = set.shift_remove_index(idx) {
            popped.push(m);
        }
    }
    let key = args[0].clone();
    if set.is_empty() {
        ks.remove(&key);
    } else {
        ks.replace(key.clone(), Item::new(Payload::Set(set)));
    }
    drop(ks);
    if !popped.is_empty() {
        state.touch_key(&key);
    }
    let reply = if args.len() == 2 {
        RespValue::array(popped.into_iter().map(RespValue::bulk).collect())
    } else {
        match popped.into_iter().next() {
            Some(m) => RespValue::bulk(m),
            None => RespValue::Null,
        }
    };
    (reply, true)
}

pub fn smove(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 3 {
        return wrong_args("smove");
    }
    let mut ks = state.keyspace.lock().unwrap();
    let mut src = match ks.peek(&args[0]) {
        None => return ok_unmutated(RespValue::int(0)),
        Some(item) => match as_set(item) {
            Some(s) => s.clone(),
            None => return (wrongtype(), false),
        },
    };
    if !src.shift_remove(&args[2]) {
        return ok_unmutated(RespValue::int(0));
    }
    let mut dst = match ks.peek(&args[1]) {
        Some(item) => match as_set(item) {
            Some(s) => s.clone(),
            None => return (wrongtype(), false),
        },
        None => IndexSet::new(),
    };
    dst.insert(args[2].clone());

    let src_key = args[0].clone();
    let dst_key = args[1].clone();
    let src_empty = src.is_empty();
    // Admit the destination write first; only commit the source-side
    // removal/replace once it is confirmed to succeed, so a rejected OOM
    // write never leaves the moved member unreachable in neither set.
    match state.admit_and_replace(&mut ks, dst_key.clone(), Item::new(Payload::Set(dst))) {
        Ok(()) => {
            if src_empty {
                ks.remove(&src_key);
            } else {
                ks.replace(src_key.clone(), Item::new(Payload::Set(src)));
            }
            drop(ks);
            state.touch_key(&src_key);
            state.touch_key(&dst_key);
            ok_mutated(RespValue::int(1))
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
    fn sadd_dedups_and_scard_counts() {
        let st = state();
        sadd(&st, &[b"s".to_vec(), b"a".to_vec(), b"a".to_vec(), b"b".to_vec()]);
        let (reply, _) = scard(&st, &[b"s".to_vec()]);
        assert_eq!(reply, RespValue::int(2));
    }

    #[test]
    fn sinter_is_intersection() {
        let st = state();
        sadd(&st, &[b"a".to_vec(), b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);
        sadd(&st, &[b"b".to_vec(), b"2".to_vec(), b"3".to_vec(), b"4".to_vec()]);
        let (reply, _) = sinter(&st, &[b"a".to_vec(), b"b".to_vec()]);
        match reply {
            RespValue::Array(items) => assert_eq!(items.len(), 2),
            _ => panic!("expected array"),
        }
    }

    #[test]
    fn smove_transfers_member() {
        let st = state();
        sadd(&st, &[b"a".to_vec(), b"x".to_vec()]);
        let (reply, _) = smove(&st, &[b"a".to_vec(), b"b".to_vec(), b"x".to_vec()]);
        assert_eq!(reply, RespValue::int(1));
        let (reply, _) = sismember(&st, &[b"b".to_vec(), b"x".to_vec()]);
        assert_eq!(reply, RespValue::int(1));
        let (reply, _) = sismember(&st, &[b"a".to_vec(), b"x".to_vec()]);
        assert_eq!(reply, RespValue::int(0));
    }
}
