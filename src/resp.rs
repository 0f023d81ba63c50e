//! RESP (REdis Serialization Protocol) parser and serializer.
//!
//! Commands arrive as arrays of bulk strings; replies may be any of the five
//! RESP types. The parser reads a CRLF-terminated header and, for arrays,
//! recurses into `count` elements. It is side-effect free except for the
//! buffered reads/writes it performs on the caller's stream.

use std::io::{self, BufRead, Write};

#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Null,
    Array(Vec<RespValue>),
    NullArray,
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::Simple("OK".to_string())
    }

    pub fn simple(s: impl Into<String>) -> Self {
        RespValue::Simple(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn bulk(b: impl Into<Vec<u8>>) -> Self {
        RespValue::Bulk(b.into())
    }

    pub fn int(i: i64) -> Self {
        RespValue::Integer(i)
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(items)
    }

    /// Interprets this value as a command argument, the way the dispatcher
    /// reads the elements of the top-level command array.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::Bulk(b) => Some(b),
            RespValue::Simple(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum ParseError {
    Io(io::Error),
    Eof,
    Malformed(String),
}

impl From<io::Error> for ParseError {
    fn from(e: io::Error) -> Self {
        ParseError::Io(e)
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Io(e) => write!(f, "io error: {e}"),
            ParseError::Eof => write!(f, "connection closed"),
            ParseError::Malformed(s) => write!(f, "malformed input: {s}"),
        }
    }
}

/// Reads one RESP array of bulk strings (a command) from a buffered reader.
/// Returns `Ok(None)` only on a clean EOF at a message boundary (no bytes of
/// the next message were read yet); any partial read past that point is a
/// `ParseError`, matching the spec's "short read closes the connection" rule.
pub fn read_command<R: BufRead>(r: &mut R) -> Result<Option<Vec<Vec<u8>>>, ParseError> {
    let line = match read_line(r)? {
        Some(l) => l,
        None => return Ok(None),
    };
    if line.is_empty() {
        return Err(ParseError::Malformed("empty header".into()));
    }
    match line[0] {
        b'*' => {
            let count: i64 = parse_int(&line[1..])?;
            if count < 0 {
                return Ok(Some(Vec::new()));
            }
            let mut out = Vec::with_capacity(count as usize);
            for _ in 0..count {
                out.push(read_bulk(r)?);
            }
            Ok(Some(out))
        }
        // Inline commands (bare text line, no `*` array framing) are accepted
        // the way real clients occasionally send them (e.g. telnet).
        _ => Ok(Some(
            line.split(|b| *b == b' ')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_vec())
                .collect(),
        )),
    }
}

fn read_bulk<R: BufRead>(r: &mut R) -> Result<Vec<u8>, ParseError> {
    let line = read_line(r)?.ok_or(ParseError::Eof)?;
    if line.first() != Some(&b'$') {
        return Err(ParseError::Malformed(format!(
            "expected bulk string header, got {:?}",
            String::from_utf8_lossy(&line)
        )));
    }
    let len: i64 = parse_int(&line[1..])?;
    if len < 0 {
        return Ok(Vec::new());
    }
    let len = len as usize;
    let mut buf = vec![0u8; len + 2];
    r.read_exact(&mut buf).map_err(|_| ParseError::Eof)?;
    buf.truncate(len);
    Ok(buf)
}

fn read_line<R: BufRead>(r: &mut R) -> Result<Option<Vec<u8>>, ParseError> {
    let mut raw = Vec::new();
    let n = r.read_until(b'\n', &mut raw)?;
    if n == 0 {
        return Ok(None);
    }
    while raw.last() == Some(&b'\n') || raw.last() == Some(&b'\r') {
        raw.pop();
    }
    Ok(Some(raw))
}

fn parse_int(b: &[u8]) -> Result<i64, ParseError> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| ParseError::Malformed(format!("bad integer: {:?}", String::from_utf8_lossy(b))))
}

pub fn write_value<W: Write>(w: &mut W, value: &RespValue) -> io::Result<()> {
    match value {
        RespValue::Simple(s) => write!(w, "+{s}\r\n"),
        RespValue::Error(s) => write!(w, "-{s}\r\n"),
        RespValue::Integer(i) => write!(w, ":{i}\r\n"),
        RespValue::Bulk(b) => {
            write!(w, "${}\r\n", b.len())?;
            w.write_all(b)?;
            w.write_all(b"\r\n")
        }
        RespValue::Null => w.write_all(b"$-1\r\n"),
        RespValue::NullArray => w.write_all(b"*-1\r\n"),
        RespValue::Array(items) => {
            write!(w, "*{}\r\n", items.len())?;
            for item in items {
                write_value(w, item)?;
            }
            Ok(())
        }
    }
}

pub fn serialize(value: &RespValue) -> Vec<u8> {
    let mut buf = Vec::new();
    write_value(&mut buf, value).expect("write to Vec<u8> cannot fail");
    buf
}

/// Encodes a command array as RESP, the form the AOF log and the wire
/// protocol share (`*N\r\n$len\r\nbytes\r\n...`).
pub fn encode_command(args: &[Vec<u8>]) -> Vec<u8> {
    let items = args.iter().cloned().map(RespValue::Bulk).collect();
    serialize(&RespValue::Array(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    #[test]
    fn parses_array_of_bulk_strings() {
        let input = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n".to_vec();
        let mut r = BufReader::new(&input[..]);
        let cmd = read_command(&mut r).unwrap().unwrap();
        assert_eq!(cmd, vec![b"GET".to_vec(), b"name".to_vec()]);
    }

    #[test]
    fn parses_inline_command() {
        let input = b"PING\r\n".to_vec();
        let mut r = BufReader::new(&input[..]);
        let cmd = read_command(&mut r).unwrap().unwrap();
        assert_eq!(cmd, vec![b"PING".to_vec()]);
    }

    #[test]
    fn returns_none_on_clean_eof() {
        let input: Vec<u8> = Vec::new();
        let mut r = BufReader::new(&input[..]);
        assert!(read_command(&mut r).unwrap().is_none());
    }

    #[test]
    fn serializes_bulk_and_null() {
        assert_eq!(serialize(&RespValue::bulk(*b"Alice")), b"$5\r\nAlice\r\n");
        assert_eq!(serialize(&RespValue::Null), b"$-1\r\n");
        assert_eq!(serialize(&RespValue::ok()), b"+OK\r\n");
        assert_eq!(serialize(&RespValue::int(-2)), b":-2\r\n");
    }

    #[test]
    fn round_trips_command_encoding() {
        let args = vec![b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()];
        let encoded = encode_command(&args);
        let mut r = BufReader::new(&encoded[..]);
        let parsed = read_command(&mut r).unwrap().unwrap();
        assert_eq!(parsed, args);
    }
}
