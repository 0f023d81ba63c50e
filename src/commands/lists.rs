//! List commands (§4.4). Backed by `Payload::List(VecDeque<Bytes>)`.

use std::collections::VecDeque;

use crate::commands::{clamp_range, not_integer, ok_mutated, ok_unmutated, parse_i64, wrong_args, wrongtype, Outcome};
use crate::keyspace::{Bytes, Item, Payload};
use crate::resp::RespValue;
use crate::state::AppState;

fn as_list<'a>(item: &'a Item) -> Option<&'a VecDeque<Bytes>> {
    match &item.payload {
        Payload::List(l) => Some(l),
        _ => None,
    }
}

fn push(state: &AppState, args: &[Bytes], left: bool, cmd: &str) -> Outcome {
    if args.len() < 2 {
        return wrong_args(cmd);
    }
    let mut ks = state.keyspace.lock().unwrap();
    let mut list = match ks.peek(&args[0]) {
        Some(item) => match as_list(item) {
            Some(l) => l.clone(),
            None => return (wrongtype(), false),
        },
        None => VecDeque::new(),
    };
    for v in &args[1..] {
        if left {
            list.push_front(v.clone());
        } else {
            list.push_back(v.clone());
        }
    }
    let len = list.len() as i64;
    let key = args[0].clone();
    match state.admit_and_replace(&mut ks, key.clone(), Item::new(Payload::List(list))) {
        Ok(()) => {
            drop(ks);
            state.touch_key(&key);
            ok_mutated(RespValue::int(len))
        }
        Err(e) => ok_unmutated(e),
    }
}

pub fn lpush(state: &AppState, args: &[Bytes]) -> Outcome {
    push(state, args, true, "lpush")
}

pub fn rpush(state: &AppState, args: &[Bytes]) -> Outcome {
    push(state, args, false, "rpush")
}

fn pop(state: &AppState, args: &[Bytes], left: bool, cmd: &str) -> Outcome {
    if args.is_empty() || args.len() > 2 {
        return wrong_args(cmd);
    }
    let count = if args.len() == 2 {
        match parse_i64(&args[1]) {
            Some(n) if n >= 0 => n as usize,
            _ => return (not_integer(), false),
        }
    } else {
        1
    };
    let mut ks = state.keyspace.lock().unwrap();
    let mut list = match ks.peek(&args[0]) {
        Some(item) => match as_list(item) {
            Some(l) => l.clone(),
            None => return (wrongtype(), false),
        },
        None => {
            return ok_unmutated(if args.len() == 2 {
                RespValue::NullArray
            } else {
                RespValue::Null
            })
        }
    };
    let mut popped = Vec::new();
    for _ in 0..count.max(1) {
        let v = if left { list.pop_front() } else { list.pop_back() };
        match v {
            Some(v) => popped.push(v),
            None => break,
        }
        if args.len() < 2 {
            break;
        }
    }
    let key = args[0].clone();
    let empty_after = list.is_empty();
    if empty_after {
        ks.remove(&key);
    } else {
        ks.replace(key.clone(), Item::new(Payload::List(list)));
    }
    drop(ks);
    if !popped.is_empty() {
        state.touch_key(&key);
    }
    let reply = if args.len() == 2 {
        if popped.is_empty() {
            RespValue::NullArray
        } else {
            RespValue::array(popped.into_iter().map(RespValue::bulk).collect())
        }
    } else {
        match popped.into_iter().next() {
            Some(v) => RespValue::bulk(v),
            None => RespValue::Null,
        }
    };
    (reply, true)
}

pub fn lpop(state: &AppState, args: &[Bytes]) -> Outcome {
    pop(state, args, true, "lpop")
}

pub fn rpop(state: &AppState, args: &[Bytes]) -> Outcome {
    pop(state, args, false, "rpop")
}

pub fn llen(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 1 {
        return wrong_args("llen");
    }
    let mut ks = state.keyspace.lock().unwrap();
    match ks.get(&args[0]) {
        None => ok_unmutated(RespValue::int(0)),
        Some(item) => match as_list(item) {
            Some(l) => ok_unmutated(RespValue::int(l.len() as i64)),
            None => ok_unmutated(wrongtype()),
        },
    }
}

pub fn lrange(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 3 {
        return wrong_args("lrange");
    }
    let (start, stop) = match (parse_i64(&args[1]), parse_i64(&args[2])) {
        (Some(a), Some(b)) => (a, b),
        _ => return (not_integer(), false),
    };
    let mut ks = state.keyspace.lock().unwrap();
    let list = match ks.get(&args[0]) {
        None => return ok_unmutated(RespValue::array(Vec::new())),
        Some(item) => match as_list(item) {
            Some(l) => l,
            None => return ok_unmutated(wrongtype()),
        },
    };
    match clamp_range(start, stop, list.len()) {
        Some((a, b)) => {
            let items = list.iter().skip(a).take(b - a + 1).cloned().map(RespValue::bulk).collect();
            ok_unmutated(RespValue::array(items))
        }
        None => ok_unmutated(RespValue::array(Vec::new())),
    }
}

pub fn lindex(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 2 {
        return wrong_args("lindex");
    }
    let idx = match parse_i64(&args[1]) {
        Some(n) => n,
        None => return (not_integer(), false),
    };
    let mut ks = state.keyspace.lock().unwrap();
    let list = match ks.get(&args[0]) {
        None => return ok_unmutated(RespValue::Null),
        Some(item) => match as_list(item) {
            Some(l) => l,
            None => return ok_unmutated(wrongtype()),
        },
    };
    let real = if idx < 0 { list.len() as i64 + idx } else { idx };
    if real < 0 || real as usize >= list.len() {
        return ok_unmutated(RespValue::Null);
    }
    ok_unmutated(RespValue::bulk(list[real as usize].clone()))
}

pub fn lset(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 3 {
        return wrong_args("lset");
    }
    let idx = match parse_i64(&args[1]) {
        Some(n) => n,
        None => return (not_integer(), false),
    };
    let mut ks = state.keyspace.lock().unwrap();
    let mut list = match ks.peek(&args[0]) {
        None => return (RespValue::error("ERR no such key"), false),
        Some(item) => match as_list(item) {
            Some(l) => l.clone(),
            None => return (wrongtype(), false),
        },
    };
    let real = if idx < 0 { list.len() as i64 + idx } else { idx };
    if real < 0 || real as usize >= list.len() {
        return (RespValue::error("ERR index out of range"), false);
    }
    list[real as usize] = args[2].clone();
    let key = args[0].clone();
    match state.admit_and_replace(&mut ks, key.clone(), Item::new(Payload::List(list))) {
        Ok(()) => {
            drop(ks);
            state.touch_key(&key);
            ok_mutated(RespValue::ok())
        }
        Err(e) => ok_unmutated(e),
    }
}

pub fn lrem(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 3 {
        return wrong_args("lrem");
    }
    let count = match parse_i64(&args[1]) {
        Some(n) => n,
        None => return (not_integer(), false),
    };
    let mut ks = state.keyspace.lock().unwrap();
    let mut list = match ks.peek(&args[0]) {
        None => return ok_unmutated(RespValue::int(0)),
        Some(item) => match as_list(item) {
            Some(l) => l.clone(),
            None => return (wrongtype(), false),
        },
    };
    let target = &args[2];
    let mut removed = 0i64;
    if count == 0 {
        let before = list.len();
        list.retain(|v| v != target);
        removed = (before - list.len()) as i64;
    } else if count > 0 {
        let mut kept = VecDeque::with_capacity(list.len());
        let mut to_remove = count;
        for v in list {
            if to_remove > 0 && &v == target {
                to_remove -= 1;
                removed += 1;
            } else {
                kept.push_back(v);
            }
        }
        list = kept;
    } else {
        let mut kept: VecDeque<Bytes> = VecDeque::with_capacity(list.len());
        let mut to_remove = -count;
        for v in list.into_iter().rev() {
            if to_remove > 0 && &v == target {
                to_remove -= 1;
                removed += 1;
            } else {
                kept.push_front(v);
            }
        }
        list = kept;
    }
    let key = args[0].clone();
    if list.is_empty() {
        ks.remove(&key);
    } else {
        ks.replace(key.clone(), Item::new(Payload::List(list)));
    }
    drop(ks);
    if removed > 0 {
        state.touch_key(&key);
    }
    (RespValue::int(removed), removed > 0)
}

pub fn ltrim(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 3 {
        return wrong_args("ltrim");
    }
    let (start, stop) = match (parse_i64(&args[1]), parse_i64(&args[2])) {
        (Some(a), Some(b)) => (a, b),
        _ => return (not_integer(), false),
    };
    let mut ks = state.keyspace.lock().unwrap();
    let list = match ks.peek(&args[0]) {
        None => return ok_unmutated(RespValue::ok()),
        Some(item) => match as_list(item) {
            Some(l) => l.clone(),
            None => return (wrongtype(), false),
        },
    };
    let trimmed: VecDeque<Bytes> = match clamp_range(start, stop, list.len()) {
        Some((a, b)) => list.into_iter().skip(a).take(b - a + 1).collect(),
        None => VecDeque::new(),
    };
    let key = args[0].clone();
    if trimmed.is_empty() {
        ks.remove(&key);
    } else {
        ks.replace(key.clone(), Item::new(Payload::List(trimmed)));
    }
    drop(ks);
    state.touch_key(&key);
    (RespValue::ok(), true)
}

/// Shared by `LMOVE` and `RPOPLPUSH` (the latter is `LMOVE src dst RIGHT LEFT`).
pub fn lmove(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 4 {
        return wrong_args("lmove");
    }
    let from_left = match args[2].to_ascii_uppercase().as_slice() {
        b"LEFT" => true,
        b"RIGHT" => false,
        _ => return (RespValue::error("ERR syntax error"), false),
    };
    let to_left = match args[3].to_ascii_uppercase().as_slice() {
        b"LEFT" => true,
        b"RIGHT" => false,
        _ => return (RespValue::error("ERR syntax error"), false),
    };
    let mut ks = state.keyspace.lock().unwrap();
    let mut src = match ks.peek(&args[0]) {
        None => return ok_unmutated(RespValue::Null),
        Some(item) => match as_list(item) {
            Some(l) => l.clone(),
            None => return (wrongtype(), false),
        },
    };
    let value = if from_left { src.pop_front() } else { src.pop_back() };
    let value = match value {
        Some(v) => v,
        None => return ok_unmutated(RespValue::Null),
    };
    let mut dst = if args[0] == args[1] {
        src.clone()
    } else {
        match ks.peek(&args[1]) {
            Some(item) => match as_list(item) {
                Some(l) => l.clone(),
                None => return (wrongtype(), false),
            },
            None => VecDeque::new(),
        }
    };
    if to_left {
        dst.push_front(value.clone());
    } else {
        dst.push_back(value.clone());
    }

    let src_key = args[0].clone();
    let dst_key = args[1].clone();
    let src_empty = src.is_empty();
    // Admit the destination write first; only commit the source-side
    // removal/replace once it is confirmed to succeed, so a rejected OOM
    // write never leaves the popped value unreachable in neither key.
    match state.admit_and_replace(&mut ks, dst_key.clone(), Item::new(Payload::List(dst))) {
        Ok(()) => {
            if src_key != dst_key {
                if src_empty {
                    ks.remove(&src_key);
                } else {
                    ks.replace(src_key.clone(), Item::new(Payload::List(src)));
                }
            }
            drop(ks);
            state.touch_key(&src_key);
            if dst_key != src_key {
                state.touch_key(&dst_key);
            }
            ok_mutated(RespValue::bulk(value))
        }
        Err(e) => ok_unmutated(e),
    }
}

pub fn rpoplpush(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 2 {
        return wrong_args("rpoplpush");
    }
    let expanded = [args[0].clone(), args[1].clone(), b"RIGHT".to_vec(), b"LEFT".to_vec()];
    lmove(state, &expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn state() -> AppState {
        AppState::new(AppConfig::default(), None)
    }

    #[test]
    fn lrange_full_and_empty() {
        let st = state();
        rpush(&st, &[b"l".to_vec(), b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        let (reply, _) = lrange(&st, &[b"l".to_vec(), b"0".to_vec(), b"-1".to_vec()]);
        assert_eq!(
            reply,
            RespValue::array(vec![RespValue::bulk(*b"a"), RespValue::bulk(*b"b"), RespValue::bulk(*b"c")])
        );
        let (reply, _) = lrange(&st, &[b"l".to_vec(), b"5".to_vec(), b"2".to_vec()]);
        assert_eq!(reply, RespValue::array(Vec::new()));
    }

    #[test]
    fn lpop_empties_and_removes_key() {
        let st = state();
        rpush(&st, &[b"l".to_vec(), b"a".to_vec()]);
        lpop(&st, &[b"l".to_vec()]);
        let (reply, _) = llen(&st, &[b"l".to_vec()]);
        assert_eq!(reply, RespValue::int(0));
    }

    #[test]
    fn rpoplpush_moves_between_keys() {
        let st = state();
        rpush(&st, &[b"src".to_vec(), b"a".to_vec(), b"b".to_vec()]);
        let (reply, _) = rpoplpush(&st, &[b"src".to_vec(), b"dst".to_vec()]);
        assert_eq!(reply, RespValue::bulk(*b"b"));
        let (reply, _) = lrange(&st, &[b"dst".to_vec(), b"0".to_vec(), b"-1".to_vec()]);
        assert_eq!(reply, RespValue::array(vec![RespValue::bulk(*b"b")]));
    }
}
