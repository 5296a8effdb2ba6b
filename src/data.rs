pub mod stream;

use std::time::SystemTime;

use bytes::Bytes;

use crate::resp::Resp;

pub use stream::{RequestedId, Stream, StreamEntry, StreamError, StreamId};

#[derive(Debug, Clone)]
pub enum Value {
    /// Stored byte-for-byte.
    Str(Bytes),
    Stream(Stream),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Stream(_) => "stream",
        }
    }
}

/// Converts a decoded wire or snapshot value into a string value. Arrays and
/// nulls have no string form and are handed back unchanged.
impl TryFrom<Resp> for Value {
    type Error = Resp;

    fn try_from(resp: Resp) -> Result<Self, Self::Error> {
        match resp {
            Resp::SimpleString(s) | Resp::SimpleError(s) => Ok(Self::Str(Bytes::from(s))),
            Resp::Integer(number) => Ok(Self::Str(Bytes::from(number.to_string()))),
            Resp::BulkString(bytes) | Resp::BulkBytes(bytes) => Ok(Self::Str(bytes)),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub value: Value,
    pub expires_at: Option<SystemTime>,
}

impl Entry {
    pub fn new(value: Value, expires_at: Option<SystemTime>) -> Self {
        Self { value, expires_at }
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}
