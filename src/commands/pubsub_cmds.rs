//! Pub/Sub commands (§4.4). SUBSCRIBE/PSUBSCRIBE/UNSUBSCRIBE/PUNSUBSCRIBE
//! emit one confirmation reply per channel argument (RESP's multi-bulk
//! push convention), so unlike every other handler they return `Vec<RespValue>`
//! rather than a single `Outcome` — `dispatch.rs` special-cases these four
//! the same way it special-cases EXEC.

use crate::client::ClientSession;
use crate::commands::{ok_unmutated, wrong_args, Outcome};
use crate::keyspace::Bytes;
use crate::resp::RespValue;
use crate::state::AppState;

fn confirm(kind: &'static str, channel: Bytes, count: usize) -> RespValue {
    RespValue::array(vec![
        RespValue::bulk(kind.as_bytes().to_vec()),
        RespValue::bulk(channel),
        RespValue::int(count as i64),
    ])
}

pub fn subscribe(state: &AppState, args: &[Bytes], session: &mut ClientSession) -> Vec<RespValue> {
    args.iter()
        .map(|ch| {
            session.subscribed_channels.insert(ch.clone());
            let count = state.broker.subscribe(ch.clone(), session.id);
            confirm("subscribe", ch.clone(), count)
        })
        .collect()
}

pub fn unsubscribe(state: &AppState, args: &[Bytes], session: &mut ClientSession) -> Vec<RespValue> {
    let targets: Vec<Bytes> = if args.is_empty() {
        session.subscribed_channels.iter().cloned().collect()
    } else {
        args.to_vec()
    };
    if targets.is_empty() {
        return vec![confirm("unsubscribe", Bytes::new(), session.subscription_count())];
    }
    targets
        .into_iter()
        .map(|ch| {
            session.subscribed_channels.remove(&ch);
            let count = state.broker.unsubscribe(&ch, session.id);
            confirm("unsubscribe", ch, count)
        })
        .collect()
}

pub fn psubscribe(state: &AppState, args: &[Bytes], session: &mut ClientSession) -> Vec<RespValue> {
    args.iter()
        .map(|pat| {
            session.subscribed_patterns.insert(pat.clone());
            let count = state.broker.psubscribe(pat.clone(), session.id);
            confirm("psubscribe", pat.clone(), count)
        })
        .collect()
}

pub fn punsubscribe(state: &AppState, args: &[Bytes], session: &mut ClientSession) -> Vec<RespValue> {
    let targets: Vec<Bytes> = if args.is_empty() {
        session.subscribed_patterns.iter().cloned().collect()
    } else {
        args.to_vec()
    };
    if targets.is_empty() {
        return vec![confirm("punsubscribe", Bytes::new(), session.subscription_count())];
    }
    targets
        .into_iter()
        .map(|pat| {
            session.subscribed_patterns.remove(&pat);
            let count = state.broker.punsubscribe(&pat, session.id);
            confirm("punsubscribe", pat, count)
        })
        .collect()
}

pub fn publish(state: &AppState, args: &[Bytes]) -> Outcome {
    if args.len() != 2 {
        return wrong_args("publish");
    }
    let delivered = state.broker.publish(&args[0], &args[1], |id| state.client_sink(id));
    ok_unmutated(RespValue::int(delivered as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn state() -> AppState {
        AppState::new(AppConfig::default(), None)
    }

    #[test]
    fn subscribe_confirms_per_channel() {
        let st = state();
        let mut session = ClientSession::new(1, "127.0.0.1:0".to_string());
        let replies = subscribe(&st, &[b"a".to_vec(), b"b".to_vec()], &mut session);
        assert_eq!(replies.len(), 2);
        assert_eq!(session.subscription_count(), 2);
    }

    #[test]
    fn unsubscribe_all_with_no_args_confirms_empty() {
        let st = state();
        let mut session = ClientSession::new(1, "127.0.0.1:0".to_string());
        subscribe(&st, &[b"a".to_vec()], &mut session);
        let replies = unsubscribe(&st, &[], &mut session);
        assert_eq!(replies.len(), 1);
        assert_eq!(session.subscription_count(), 0);
    }

    #[test]
    fn publish_with_no_subscribers_returns_zero() {
        let st = state();
        let (reply, _) = publish(&st, &[b"ch".to_vec(), b"hi".to_vec()]);
        assert_eq!(reply, RespValue::int(0));
    }
}
