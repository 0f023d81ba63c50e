//! Command handlers (C5, §4.4). Each handler is grounded on the teacher's
//! `decode.rs` event-apply loop (`for ev in &events { book.apply(ev) }`)
//! generalized to per-command application against the keyspace, and
//! cross-checked against `other_examples/f7f99c33_jonwiggins-cedis__src-server.rs.rs`'s
//! `process_command` for the "one function per command, explicit arity
//! check, RESP error on mismatch" shape.
//!
//! A handler returns `(reply, mutated)`: `mutated` tells the dispatcher
//! whether to append the command to the AOF and bump the snapshot
//! trigger counters (§4.4 dispatch rule 5).

pub mod hashes;
pub mod hll;
pub mod keys;
pub mod lists;
pub mod pubsub_cmds;
pub mod server_cmds;
pub mod sets;
pub mod strings;
pub mod tx;
pub mod zsets;

use crate::keyspace::Bytes;
use crate::resp::RespValue;

pub type Outcome = (RespValue, bool);

pub fn ok_unmutated(v: RespValue) -> Outcome {
    (v, false)
}

pub fn ok_mutated(v: RespValue) -> Outcome {
    (v, true)
}

pub fn wrong_args(cmd: &str) -> Outcome {
    (
        RespValue::error(format!("ERR wrong number of arguments for '{}' command", cmd.to_lowercase())),
        false,
    )
}

pub fn wrongtype() -> RespValue {
    RespValue::error("WRONGTYPE Operation against a key holding the wrong kind of value")
}

pub fn not_integer() -> RespValue {
    RespValue::error("ERR value is not an integer or out of range")
}

pub fn not_float() -> RespValue {
    RespValue::error("ERR value is not a valid float")
}

pub fn parse_i64(b: &[u8]) -> Option<i64> {
    std::str::from_utf8(b).ok()?.parse::<i64>().ok()
}

pub fn parse_f64(b: &[u8]) -> Option<f64> {
    std::str::from_utf8(b).ok()?.parse::<f64>().ok()
}

/// Formats a float the way INCRBYFLOAT/HINCRBYFLOAT/ZINCRBY do: fixed
/// precision, trailing zeros (and a trailing decimal point) stripped.
pub fn format_float(f: f64) -> String {
    let mut s = format!("{:.17}", f);
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    s
}

/// Clamps a possibly-negative `LRANGE`/`GETRANGE`-style index pair
/// (negative counts from the end) to `[0, len]`, returning `None` when the
/// resulting range is empty (§4.4 "Range commands ... clamp to the valid
/// range").
pub fn clamp_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len_i = len as i64;
    let norm = |i: i64| -> i64 {
        if i < 0 {
            (len_i + i).max(0)
        } else {
            i
        }
    };
    let start = norm(start).min(len_i - 1).max(0);
    let stop = norm(stop).min(len_i - 1);
    if stop < start {
        return None;
    }
    Some((start as usize, stop as usize))
}

pub fn bulk_or_null(v: Option<Bytes>) -> RespValue {
    match v {
        Some(b) => RespValue::bulk(b),
        None => RespValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_float_strips_trailing_zeros() {
        assert_eq!(format_float(3.0), "3");
        assert_eq!(format_float(3.50), "3.5");
        assert_eq!(format_float(-0.1), "-0.1");
    }

    #[test]
    fn clamp_range_handles_negative_and_out_of_bounds() {
        assert_eq!(clamp_range(0, -1, 5), Some((0, 4)));
        assert_eq!(clamp_range(5, 2, 5), None);
        assert_eq!(clamp_range(-100, -1, 3), Some((0, 2)));
    }
}
