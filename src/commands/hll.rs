//! HyperLogLog commands (§4.4 B4): PFADD, PFCOUNT, PFMERGE.

use crate::commands::{ok_mutated, ok_unmutated, wrong_args, wrongtype, Outcome};
use crate::hyperloglog::Hll;
use crate::keyspace::{Bytes, Item, Payload};
use crate::resp::RespValue;
use crate::state::AppState;

fn as_hll(item: &Item) -> Option<&Hll> {
    match &item.payload {
        Payload::Hll(h) => Some(h),
        _ => None,
    }
}

pub fn pfadd(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.is_empty() {
        return wrong_args("pfadd");
    }
    let mut ks = state.keyspace.lock().unwrap();
    let mut hll = match ks.peek(&args[0]) {
        Some(item) => match as_hll(item) {
            Some(h) => h.clone(),
            None => return (wrongtype(), false),
        },
        None => Hll::new(),
    };
    let mut changed = false;
    for v in &args[1..] {
        if hll.add(v) {
            changed = true;
        }
    }
    let key = args[0].clone();
    match state.admit_and_replace(&mut ks, key.clone(), Item::new(Payload::Hll(hll))) {
        Ok(()) => {
            drop(ks);
            if changed {
                state.touch_key(&key);
            }
            (RespValue::int(changed as i64), changed)
        }
        Err(e) => ok_unmutated(e),
    }
}

pub fn pfcount(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.is_empty() {
        return wrong_args("pfcount");
    }
    let mut ks = state.keyspace.lock().unwrap();
    if args.len() == 1 {
        return match ks.get(&args[0]) {
            None => ok_unmutated(RespValue::int(0)),
            Some(item) => match as_hll(item) {
                Some(h) => ok_unmutated(RespValue::int(h.count() as i64)),
                None => ok_unmutated(wrongtype()),
            },
        };
    }
    let mut merged = Hll::new();
    for k in args {
        match ks.get(k) {
            None => {}
            Some(item) => match as_hll(item) {
                Some(h) => merged.merge(h),
                None => return ok_unmutated(wrongtype()),
            },
        }
    }
    ok_unmutated(RespValue::int(merged.count() as i64))
}

pub fn pfmerge(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.is_empty() {
        return wrong_args("pfmerge");
    }
    let mut ks = state.keyspace.lock().unwrap();
    let mut dest = match ks.peek(&args[0]) {
        Some(item) => match as_hll(item) {
            Some(h) => h.clone(),
            None => return (wrongtype(), false),
        },
        None => Hll::new(),
    };
    for k in &args[1..] {
        match ks.get(k) {
            None => {}
            Some(item) => match as_hll(item) {
                Some(h) => dest.merge(h),
                None => return (wrongtype(), false),
            },
        }
    }
    let key = args[0].clone();
    match state.admit_and_replace(&mut ks, key.clone(), Item::new(Payload::Hll(dest))) {
        Ok(()) => {
            drop(ks);
            state.touch_key(&key);
            ok_mutated(RespValue::ok())
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
    fn pfadd_reports_change_and_pfcount_estimates() {
        let st = state();
        let (reply, mutated) = pfadd(&st, &[b"hll".to_vec(), b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(reply, RespValue::int(1));
        assert!(mutated);
        let (reply, _) = pfcount(&st, &[b"hll".to_vec()]);
        match reply {
            RespValue::Integer(n) => assert!(n >= 1 && n <= 10),
            _ => panic!("expected integer"),
        }
    }

    #[test]
    fn pfmerge_combines_two_keys() {
        let st = state();
        pfadd(&st, &[b"a".to_vec(), b"1".to_vec(), b"2".to_vec()]);
        pfadd(&st, &[b"b".to_vec(), b"3".to_vec(), b"4".to_vec()]);
        pfmerge(&st, &[b"dest".to_vec(), b"a".to_vec(), b"b".to_vec()]);
        let (reply, _) = pfcount(&st, &[b"dest".to_vec()]);
        match reply {
            RespValue::Integer(n) => assert!(n >= 1),
            _ => panic!("expected integer"),
        }
    }
}
