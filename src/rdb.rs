//! Snapshot (RDB) decoding and encoding.
//!
//! Only string values are understood. Integer-encoded and LZF-compressed
//! strings are skipped byte-for-byte so the rest of the file stays aligned, but
//! they load as an empty placeholder instead of their real contents.

use std::io::Write;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{Buf, Bytes};
use thiserror::Error;
use tracing::{debug, warn};

use crate::resp::Resp;
use crate::utils::{from_epoch_ms, to_epoch_ms};

pub const MAGIC: &[u8] = b"REDIS";
pub const VERSION: &[u8] = b"0011";
pub const REDIS_VER: &str = "redis-ver";
pub const REDIS_VER_VALUE: &str = "7.2.0";

pub const AUX: u8 = 0xFA;
pub const RESIZEDB: u8 = 0xFB;
pub const EXPIRETIME_MS: u8 = 0xFC;
pub const EXPIRETIME: u8 = 0xFD;
pub const SELECTDB: u8 = 0xFE;
pub const EOF: u8 = 0xFF;
pub const STRING_TYPE: u8 = 0x00;

const PLACEHOLDER: &str = "";

#[derive(Debug, Error)]
pub enum RdbError {
    #[error("Header parse error")]
    RdbHeaderParserError,

    #[error("Snapshot ended in the middle of a record")]
    UnexpectedEof,

    #[error("Unsupported value type {0:#04x}")]
    UnsupportedValueType(u8),

    #[error("Unknown special string encoding {0}")]
    UnknownEncoding(u8),

    #[error("Failed to open RDB file")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RdbEntry {
    pub key: String,
    pub value: Resp,
    pub expires_at: Option<SystemTime>,
}

#[derive(Debug, Default)]
pub struct Rdb {
    pub version: String,
    pub metadata: Vec<(String, String)>,
    pub entries: Vec<RdbEntry>,
}

enum Length {
    Plain(usize),
    Integer(usize),
    Compressed,
}

impl Rdb {
    /// Reads and decodes the snapshot at `path`. A missing file is not an error.
    pub async fn load(path: impl AsRef<Path>) -> Result<Option<Self>, RdbError> {
        match tokio::fs::read(path.as_ref()).await {
            Ok(buf) => Self::decode(&buf).map(Some),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn decode(mut input: &[u8]) -> Result<Self, RdbError> {
        let header = take(&mut input, MAGIC.len() + VERSION.len())
            .map_err(|_| RdbError::RdbHeaderParserError)?;
        if &header[..MAGIC.len()] != MAGIC {
            return Err(RdbError::RdbHeaderParserError);
        }
        let mut rdb = Rdb {
            version: String::from_utf8_lossy(&header[MAGIC.len()..]).into_owned(),
            ..Default::default()
        };

        let mut expires_at = None;
        loop {
            match take_u8(&mut input)? {
                AUX => {
                    let name = read_string(&mut input)?;
                    let value = read_string(&mut input)?;
                    debug!(%name, %value, "rdb aux field");
                    rdb.metadata.push((name, value));
                }
                SELECTDB => {
                    let index = take_u8(&mut input)?;
                    debug!(index, "rdb database selector");
                }
                RESIZEDB => {
                    let keys = read_size(&mut input)?;
                    let expires = read_size(&mut input)?;
                    debug!(keys, expires, "rdb resize hint");
                }
                EXPIRETIME => {
                    let seconds = take(&mut input, 4)?.get_u32_le();
                    expires_at = Some(UNIX_EPOCH + Duration::from_secs(seconds as u64));
                }
                EXPIRETIME_MS => {
                    let millis = take(&mut input, 8)?.get_u64_le();
                    expires_at = Some(from_epoch_ms(millis));
                }
                STRING_TYPE => {
                    let key = read_string(&mut input)?;
                    let value = read_bytes(&mut input)?;
                    rdb.entries.push(RdbEntry {
                        key,
                        value: Resp::BulkString(value),
                        expires_at: expires_at.take(),
                    });
                }
                EOF => break,
                other => return Err(RdbError::UnsupportedValueType(other)),
            }
        }

        Ok(rdb)
    }

    /// Encodes `entries` as a database-0 snapshot with a disabled (zero) checksum.
    pub fn encode(entries: &[RdbEntry]) -> Vec<u8> {
        let mut buf = vec![];
        buf.extend(MAGIC);
        buf.extend(VERSION);
        buf.push(AUX);
        write_bytes(&mut buf, REDIS_VER.as_bytes());
        write_bytes(&mut buf, REDIS_VER_VALUE.as_bytes());
        buf.extend([SELECTDB, 0, RESIZEDB]);
        write_length(&mut buf, entries.len());
        write_length(
            &mut buf,
            entries.iter().filter(|e| e.expires_at.is_some()).count(),
        );

        for entry in entries {
            if let Some(expires_at) = entry.expires_at {
                buf.push(EXPIRETIME_MS);
                buf.extend(to_epoch_ms(expires_at).to_le_bytes());
            }
            buf.push(STRING_TYPE);
            write_bytes(&mut buf, entry.key.as_bytes());
            match &entry.value {
                Resp::SimpleString(s) => write_bytes(&mut buf, s.as_bytes()),
                Resp::BulkString(b) | Resp::BulkBytes(b) => write_bytes(&mut buf, b),
                Resp::Integer(i) => write_bytes(&mut buf, i.to_string().as_bytes()),
                _ => write_bytes(&mut buf, PLACEHOLDER.as_bytes()),
            }
        }

        buf.push(EOF);
        buf.extend([0u8; 8]);
        buf
    }
}

fn take_u8(input: &mut &[u8]) -> Result<u8, RdbError> {
    if !input.has_remaining() {
        return Err(RdbError::UnexpectedEof);
    }
    Ok(input.get_u8())
}

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], RdbError> {
    if input.len() < n {
        return Err(RdbError::UnexpectedEof);
    }
    let (head, tail) = input.split_at(n);
    *input = tail;
    Ok(head)
}

fn read_length(input: &mut &[u8]) -> Result<Length, RdbError> {
    let first = take_u8(input)?;
    match first >> 6 {
        0 => Ok(Length::Plain((first & 0x3F) as usize)),
        1 => {
            let second = take_u8(input)?;
            Ok(Length::Plain(((first & 0x3F) as usize) << 8 | second as usize))
        }
        2 => Ok(Length::Plain(take(input, 4)?.get_u32_le() as usize)),
        _ => match first & 0x3F {
            0 => Ok(Length::Integer(1)),
            1 => Ok(Length::Integer(2)),
            2 => Ok(Length::Integer(4)),
            3 => Ok(Length::Compressed),
            n => Err(RdbError::UnknownEncoding(n)),
        },
    }
}

fn read_size(input: &mut &[u8]) -> Result<usize, RdbError> {
    match read_length(input)? {
        Length::Plain(n) => Ok(n),
        Length::Integer(width) => {
            take(input, width)?;
            Ok(0)
        }
        Length::Compressed => Err(RdbError::UnknownEncoding(3)),
    }
}

fn read_string(input: &mut &[u8]) -> Result<String, RdbError> {
    let bytes = read_bytes(input)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn read_bytes(input: &mut &[u8]) -> Result<Bytes, RdbError> {
    match read_length(input)? {
        Length::Plain(n) => Ok(Bytes::copy_from_slice(take(input, n)?)),
        Length::Integer(width) => {
            take(input, width)?;
            warn!(width, "integer-encoded rdb string loaded as placeholder");
            Ok(Bytes::from_static(PLACEHOLDER.as_bytes()))
        }
        Length::Compressed => {
            let compressed = read_size(input)?;
            let _uncompressed = read_size(input)?;
            take(input, compressed)?;
            warn!(compressed, "lzf-compressed rdb string loaded as placeholder");
            Ok(Bytes::from_static(PLACEHOLDER.as_bytes()))
        }
    }
}

fn write_length(buf: &mut Vec<u8>, len: usize) {
    if len < 1 << 6 {
        buf.push(len as u8);
    } else if len < 1 << 14 {
        buf.push(0x40 | (len >> 8) as u8);
        buf.push(len as u8);
    } else {
        buf.push(0x80);
        let _ = buf.write_all(&(len as u32).to_le_bytes());
    }
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_length(buf, bytes.len());
    buf.extend(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u8> {
        let mut buf = b"REDIS0011".to_vec();
        buf.extend([AUX, 9]);
        buf.extend(b"redis-ver");
        buf.extend([5]);
        buf.extend(b"7.2.0");
        buf.extend([SELECTDB, 0, RESIZEDB, 3, 2]);
        buf
    }

    #[test]
    fn decodes_keys_with_expiries() {
        let mut buf = header();
        buf.extend([STRING_TYPE, 3]);
        buf.extend(b"foo");
        buf.extend([3]);
        buf.extend(b"bar");
        buf.push(EXPIRETIME_MS);
        buf.extend(1956528000000u64.to_le_bytes());
        buf.extend([STRING_TYPE, 5]);
        buf.extend(b"apple");
        buf.extend([6]);
        buf.extend(b"banana");
        buf.push(EXPIRETIME);
        buf.extend(1640995200u32.to_le_bytes());
        buf.extend([STRING_TYPE, 4]);
        buf.extend(b"pear");
        buf.extend([1]);
        buf.extend(b"x");
        buf.push(EOF);
        buf.extend([0u8; 8]);

        let rdb = Rdb::decode(&buf).unwrap();
        assert_eq!(rdb.version, "0011");
        assert_eq!(
            rdb.metadata,
            vec![("redis-ver".to_string(), "7.2.0".to_string())]
        );
        assert_eq!(rdb.entries.len(), 3);
        assert_eq!(rdb.entries[0].key, "foo");
        assert_eq!(rdb.entries[0].value, Resp::bulk_string("bar"));
        assert_eq!(rdb.entries[0].expires_at, None);
        assert_eq!(
            rdb.entries[1].expires_at,
            Some(from_epoch_ms(1956528000000))
        );
        assert_eq!(
            rdb.entries[2].expires_at,
            Some(UNIX_EPOCH + Duration::from_secs(1640995200))
        );
    }

    #[test]
    fn special_encodings_keep_alignment() {
        let mut buf = header();
        buf.extend([STRING_TYPE, 3]);
        buf.extend(b"num");
        buf.extend([0xC1, 0x39, 0x30]);
        buf.extend([STRING_TYPE, 3]);
        buf.extend(b"lzf");
        buf.extend([0xC3, 2, 10, 0xAA, 0xBB]);
        buf.extend([STRING_TYPE, 4]);
        buf.extend(b"last");
        buf.extend([2]);
        buf.extend(b"ok");
        buf.push(EOF);

        let rdb = Rdb::decode(&buf).unwrap();
        let keys: Vec<_> = rdb.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["num", "lzf", "last"]);
        assert_eq!(rdb.entries[0].value, Resp::bulk_string(PLACEHOLDER));
        assert_eq!(rdb.entries[2].value, Resp::bulk_string("ok"));
    }

    #[test]
    fn rejects_non_string_values() {
        let mut buf = header();
        buf.extend([0x04, 1, b'k']);
        assert!(matches!(
            Rdb::decode(&buf),
            Err(RdbError::UnsupportedValueType(0x04))
        ));
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        assert!(matches!(
            Rdb::decode(b"RODIS0011\xFF"),
            Err(RdbError::RdbHeaderParserError)
        ));
        let mut buf = header();
        buf.extend([STRING_TYPE, 10]);
        buf.extend(b"short");
        assert!(matches!(Rdb::decode(&buf), Err(RdbError::UnexpectedEof)));
    }

    #[test]
    fn encoded_snapshot_decodes_back() {
        let entries = vec![
            RdbEntry {
                key: "a".to_string(),
                value: Resp::bulk_string("1"),
                expires_at: None,
            },
            RdbEntry {
                key: "long".to_string(),
                value: Resp::bulk_string("v".repeat(300)),
                expires_at: Some(from_epoch_ms(4102444800000)),
            },
        ];
        let rdb = Rdb::decode(&Rdb::encode(&entries)).unwrap();
        assert_eq!(rdb.entries, entries);
    }

    #[test]
    fn binary_values_survive_encoding() {
        let entries = vec![RdbEntry {
            key: "blob".to_string(),
            value: Resp::BulkString(Bytes::from_static(b"\xff\x00\xfe")),
            expires_at: None,
        }];
        let rdb = Rdb::decode(&Rdb::encode(&entries)).unwrap();
        assert_eq!(rdb.entries, entries);
    }

    #[test]
    fn empty_snapshot_is_valid() {
        let rdb = Rdb::decode(&Rdb::encode(&[])).unwrap();
        assert!(rdb.entries.is_empty());
    }

    #[tokio::test]
    async fn missing_file_loads_nothing() {
        let loaded = Rdb::load("/nonexistent/dir/dump.rdb").await.unwrap();
        assert!(loaded.is_none());
    }
}
