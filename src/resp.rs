use std::fmt;
use std::io::Write;
use std::str::{from_utf8, Utf8Error};

use bytes::Bytes;
use thiserror::Error;

pub const CTRLF: &[u8] = b"\r\n";

/// A single RESP value.
///
/// `BulkBytes` carries a bulk payload that was not followed by CRLF on the
/// wire. That is how a snapshot transfer is framed, so it encodes without the
/// trailing terminator.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Resp {
    Null,
    SimpleString(String),
    SimpleError(String),
    Integer(i64),
    BulkString(Bytes),
    BulkBytes(Bytes),
    Array(Vec<Resp>),
}

#[derive(Debug, Error)]
pub enum RespError {
    #[error("Can not parse data as UTF-8")]
    UtfError(#[from] Utf8Error),

    #[error("Encountered unsupported type: {0:?}")]
    UnsupportedType(char),

    #[error("Can not parse data as integer")]
    NotAnInteger(#[from] std::num::ParseIntError),

    #[error("Data is not terminated with CTRLF")]
    NoCtrlf,

    #[error("Invalid length: {0}")]
    InvalidLength(i64),

    #[error("Not enough data for a full message")]
    Incomplete,
}

impl RespError {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, RespError::Incomplete)
    }
}

impl Resp {
    /// Decodes one message from the front of `input`, returning it together with
    /// the unconsumed tail.
    ///
    /// `eof` tells the decoder no more bytes will arrive. It only matters for a
    /// bulk payload sitting at the very end of the buffer: without more input we
    /// can't tell a text bulk string from a raw blob, so we wait unless the
    /// stream has ended.
    pub fn parse_inner(input: &[u8], eof: bool) -> Result<(Self, &[u8]), RespError> {
        use Resp::*;
        use RespError::*;

        let (tag, rest) = input.split_first().ok_or(Incomplete)?;
        if !matches!(tag, b'+' | b'-' | b':' | b'$' | b'*') {
            return Err(UnsupportedType(*tag as char));
        }
        let (line, rest) = split_line(rest)?;

        match tag {
            b'+' => Ok((SimpleString(from_utf8(line)?.to_owned()), rest)),
            b'-' => Ok((SimpleError(from_utf8(line)?.to_owned()), rest)),
            b':' => Ok((Integer(parse_integer(line)?), rest)),
            b'$' => match parse_integer(line)? {
                -1 => Ok((Null, rest)),
                0 => match rest {
                    [b'\r', b'\n', rest @ ..] => Ok((BulkString(Bytes::new()), rest)),
                    [_, _, ..] => Err(NoCtrlf),
                    _ => Err(Incomplete),
                },
                length if length < 0 => Err(InvalidLength(length)),
                length => {
                    let length = length as usize;
                    if rest.len() < length {
                        return Err(Incomplete);
                    }
                    let (payload, tail) = rest.split_at(length);
                    match tail {
                        [b'\r', b'\n', tail @ ..] => Ok((
                            BulkString(Bytes::copy_from_slice(payload)),
                            tail,
                        )),
                        [b'\r'] | [] if !eof => Err(Incomplete),
                        _ => Ok((BulkBytes(Bytes::copy_from_slice(payload)), tail)),
                    }
                }
            },
            _ => match parse_integer(line)? {
                -1 => Ok((Null, rest)),
                length if length < 0 => Err(InvalidLength(length)),
                length => {
                    let mut rest = rest;
                    let mut array = Vec::with_capacity(length.min(1024) as usize);
                    for _ in 0..length {
                        let (value, new_rest) = Self::parse_inner(rest, eof)?;
                        array.push(value);
                        rest = new_rest;
                    }
                    Ok((Array(array), rest))
                }
            },
        }
    }

    pub fn parse(input: &[u8]) -> Result<Self, RespError> {
        let (resp, _) = Self::parse_inner(input, true)?;
        Ok(resp)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![];
        self.encode_into(&mut buf);
        buf
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Resp::Null => buf.extend(b"$-1\r\n"),
            Resp::SimpleString(s) => {
                buf.push(b'+');
                buf.extend(s.as_bytes());
                buf.extend(CTRLF);
            }
            Resp::SimpleError(e) => {
                buf.push(b'-');
                buf.extend(e.as_bytes());
                buf.extend(CTRLF);
            }
            Resp::Integer(i) => {
                let _ = write!(buf, ":{i}\r\n");
            }
            Resp::BulkString(b) => {
                let _ = write!(buf, "${}\r\n", b.len());
                buf.extend(b.iter());
                buf.extend(CTRLF);
            }
            Resp::BulkBytes(b) => {
                let _ = write!(buf, "${}\r\n", b.len());
                buf.extend(b.iter());
            }
            Resp::Array(vec) => {
                let _ = write!(buf, "*{}\r\n", vec.len());
                for i in vec {
                    i.encode_into(buf);
                }
            }
        }
    }

    /// Number of bytes `encode` produces.
    pub fn encoded_len(&self) -> usize {
        fn digits(n: usize) -> usize {
            n.checked_ilog10().unwrap_or(0) as usize + 1
        }
        match self {
            Resp::Null => 5,
            Resp::SimpleString(s) | Resp::SimpleError(s) => s.len() + 3,
            Resp::Integer(i) => {
                let sign = usize::from(*i < 0);
                digits(i.unsigned_abs() as usize) + sign + 3
            }
            Resp::BulkString(s) => 1 + digits(s.len()) + 2 + s.len() + 2,
            Resp::BulkBytes(b) => 1 + digits(b.len()) + 2 + b.len(),
            Resp::Array(vec) => {
                1 + digits(vec.len()) + 2 + vec.iter().map(Resp::encoded_len).sum::<usize>()
            }
        }
    }

    pub fn ok() -> Self {
        Self::SimpleString("OK".to_string())
    }

    pub fn simple_string(input: impl Into<String>) -> Self {
        Self::SimpleString(input.into())
    }

    pub fn bulk_string(input: impl Into<String>) -> Self {
        Self::BulkString(Bytes::from(input.into()))
    }

    pub fn error(input: impl Into<String>) -> Self {
        Self::SimpleError(input.into())
    }

    pub fn array(input: Vec<Resp>) -> Self {
        Self::Array(input)
    }

    /// Builds a command in the form clients send it: an array of bulk strings.
    pub fn command<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Array(parts.into_iter().map(Self::bulk_string).collect())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Resp::SimpleError(_))
    }
}

fn split_line(input: &[u8]) -> Result<(&[u8], &[u8]), RespError> {
    let position = input
        .windows(2)
        .position(|window| window == CTRLF)
        .ok_or(RespError::Incomplete)?;
    Ok((&input[..position], &input[position + 2..]))
}

fn parse_integer(line: &[u8]) -> Result<i64, RespError> {
    Ok(from_utf8(line)?.parse::<i64>()?)
}

impl fmt::Debug for Resp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "(nil)"),
            Self::SimpleString(s) => write!(f, "+\"{s}\""),
            Self::SimpleError(e) => write!(f, "-\"{e}\""),
            Self::Integer(i) => write!(f, "{i}"),
            Self::BulkString(bs) => write!(f, "${} {}", bs.len(), String::from_utf8_lossy(bs)),
            Self::BulkBytes(b) => write!(f, "${} <{} raw bytes>", b.len(), b.len()),
            Self::Array(array) => {
                write!(f, "[")?;
                for (n, i) in array.iter().enumerate() {
                    if n > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}", i)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_array() {
        let input = b"*2\r\n$4\r\nECHO\r\n$3\r\nhey\r\n";
        let (resp, rest) = Resp::parse_inner(input, false).unwrap();
        assert_eq!(resp, Resp::command(["ECHO", "hey"]));
        assert!(rest.is_empty());
    }

    #[test]
    fn parses_signed_integers() {
        assert_eq!(Resp::parse(b":+42\r\n").unwrap(), Resp::Integer(42));
        assert_eq!(Resp::parse(b":-7\r\n").unwrap(), Resp::Integer(-7));
    }

    #[test]
    fn parses_null_and_empty_bulk() {
        assert_eq!(Resp::parse(b"$-1\r\n").unwrap(), Resp::Null);
        let (resp, rest) = Resp::parse_inner(b"$0\r\n\r\n+OK\r\n", false).unwrap();
        assert_eq!(resp, Resp::bulk_string(""));
        assert_eq!(rest, b"+OK\r\n");
    }

    #[test]
    fn bulk_without_terminator_is_raw_bytes() {
        let input = b"$5\r\nREDIS*1\r\n$4\r\nPING\r\n";
        let (resp, rest) = Resp::parse_inner(input, false).unwrap();
        assert_eq!(resp, Resp::BulkBytes(Bytes::from_static(b"REDIS")));
        let (next, rest) = Resp::parse_inner(rest, false).unwrap();
        assert_eq!(next, Resp::command(["PING"]));
        assert!(rest.is_empty());
    }

    #[test]
    fn waits_for_terminator_before_deciding() {
        let err = Resp::parse_inner(b"$3\r\nfoo", false).unwrap_err();
        assert!(err.is_incomplete());
        let err = Resp::parse_inner(b"$3\r\nfoo\r", false).unwrap_err();
        assert!(err.is_incomplete());
        let (resp, _) = Resp::parse_inner(b"$3\r\nfoo", true).unwrap();
        assert_eq!(resp, Resp::BulkBytes(Bytes::from_static(b"foo")));
    }

    #[test]
    fn terminated_bulk_keeps_non_utf8_bytes() {
        let (resp, rest) = Resp::parse_inner(b"$3\r\n\xff\x00\xfe\r\n", false).unwrap();
        assert_eq!(resp, Resp::BulkString(Bytes::from_static(b"\xff\x00\xfe")));
        assert!(rest.is_empty());
        assert_eq!(resp.encode(), b"$3\r\n\xff\x00\xfe\r\n");
    }

    #[test]
    fn partial_array_is_incomplete() {
        let err = Resp::parse_inner(b"*2\r\n$3\r\nGET\r\n", false).unwrap_err();
        assert!(err.is_incomplete());
    }

    #[test]
    fn rejects_unknown_tag() {
        let err = Resp::parse_inner(b"!oops\r\n", false).unwrap_err();
        assert!(matches!(err, RespError::UnsupportedType('!')));
    }

    #[test]
    fn encodes_every_variant() {
        assert_eq!(Resp::Null.encode(), b"$-1\r\n");
        assert_eq!(Resp::ok().encode(), b"+OK\r\n");
        assert_eq!(Resp::error("ERR nope").encode(), b"-ERR nope\r\n");
        assert_eq!(Resp::Integer(-12).encode(), b":-12\r\n");
        assert_eq!(Resp::bulk_string("hi").encode(), b"$2\r\nhi\r\n");
        assert_eq!(
            Resp::BulkBytes(Bytes::from_static(b"\x00\x01")).encode(),
            b"$2\r\n\x00\x01"
        );
        assert_eq!(
            Resp::command(["SET", "a", "1"]).encode(),
            b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n"
        );
    }

    #[test]
    fn encoded_len_matches_encode() {
        let values = [
            Resp::Null,
            Resp::Integer(0),
            Resp::Integer(-1000),
            Resp::Integer(i64::MIN),
            Resp::bulk_string(""),
            Resp::bulk_string("a".repeat(120)),
            Resp::BulkBytes(Bytes::from_static(b"REDIS0011")),
            Resp::array(vec![]),
            Resp::array(vec![Resp::command(["REPLCONF", "GETACK", "*"]), Resp::ok()]),
        ];
        for value in values {
            assert_eq!(value.encoded_len(), value.encode().len(), "{value:?}");
        }
    }
}
