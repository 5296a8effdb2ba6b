use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;

use indexmap::IndexMap;
use thiserror::Error;

use crate::resp::Resp;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("ERR Invalid stream ID specified as stream command argument")]
    MallformedStreamId,

    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    InvalidStreamId,

    #[error("ERR The ID specified in XADD must be greater than 0-0")]
    ZeroStreamId,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    pub milliseconds: u64,
    pub sequence_number: u64,
}

impl StreamId {
    pub const MIN: StreamId = StreamId::new(0, 0);
    pub const MAX: StreamId = StreamId::new(u64::MAX, u64::MAX);

    pub const fn new(milliseconds: u64, sequence_number: u64) -> Self {
        Self {
            milliseconds,
            sequence_number,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.milliseconds == 0 && self.sequence_number == 0
    }

    /// Parses `ms-seq`, or a bare `ms` with the sequence set to `default_sequence`.
    pub fn parse_with_default(s: &str, default_sequence: u64) -> Result<Self, StreamError> {
        match s.split_once('-') {
            Some((milliseconds, sequence_number)) => Ok(Self::new(
                parse_component(milliseconds)?,
                parse_component(sequence_number)?,
            )),
            None => Ok(Self::new(parse_component(s)?, default_sequence)),
        }
    }
}

impl FromStr for StreamId {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with_default(s, 0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.milliseconds, self.sequence_number)
    }
}

/// The id argument of XADD before it is resolved against the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedId {
    /// `*`
    Auto,
    /// `ms-*` or a bare `ms`
    AutoSequence(u64),
    /// `ms-seq`
    Explicit(StreamId),
}

impl FromStr for RequestedId {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "*" {
            return Ok(Self::Auto);
        }
        let (milliseconds, sequence_number) = match s.strip_prefix('-') {
            // A leading dash is a negative millisecond part.
            Some(rest) => {
                let (ms, _) = rest.split_once('-').unwrap_or((rest, ""));
                parse_component(ms)?;
                return Err(StreamError::ZeroStreamId);
            }
            None => s.split_once('-').unwrap_or((s, "*")),
        };
        let milliseconds = parse_component(milliseconds)?;
        match sequence_number {
            "*" => Ok(Self::AutoSequence(milliseconds)),
            sequence_number => Ok(Self::Explicit(StreamId::new(
                milliseconds,
                parse_component(sequence_number)?,
            ))),
        }
    }
}

fn parse_component(s: &str) -> Result<u64, StreamError> {
    if let Some(magnitude) = s.strip_prefix('-') {
        return match magnitude.parse::<u64>() {
            Ok(_) => Err(StreamError::ZeroStreamId),
            Err(_) => Err(StreamError::MallformedStreamId),
        };
    }
    s.parse().map_err(|_| StreamError::MallformedStreamId)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: IndexMap<String, String>,
}

/// `[id, [field, value, ...]]`, the shape XRANGE and XREAD reply with.
impl From<StreamEntry> for Resp {
    fn from(entry: StreamEntry) -> Self {
        let fields = entry
            .fields
            .into_iter()
            .flat_map(|(field, value)| [Resp::bulk_string(field), Resp::bulk_string(value)])
            .collect();
        Resp::array(vec![
            Resp::bulk_string(entry.id.to_string()),
            Resp::array(fields),
        ])
    }
}

/// An append-only log of field maps keyed by strictly increasing ids.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    inner: BTreeMap<StreamId, IndexMap<String, String>>,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn last_id(&self) -> Option<StreamId> {
        self.inner.keys().next_back().copied()
    }

    /// Resolves `requested` into the id the next entry would get.
    pub fn next_id(&self, requested: RequestedId, now_ms: u64) -> Result<StreamId, StreamError> {
        let id = match requested {
            RequestedId::Explicit(id) if id.is_zero() => return Err(StreamError::ZeroStreamId),
            RequestedId::Explicit(id) => id,
            RequestedId::AutoSequence(milliseconds) => {
                StreamId::new(milliseconds, self.auto_sequence(milliseconds))
            }
            RequestedId::Auto => StreamId::new(now_ms, self.auto_sequence(now_ms)),
        };

        match self.last_id() {
            Some(top) if id <= top => Err(StreamError::InvalidStreamId),
            _ => Ok(id),
        }
    }

    fn auto_sequence(&self, milliseconds: u64) -> u64 {
        match self.last_id() {
            Some(top) if top.milliseconds == milliseconds => top.sequence_number.saturating_add(1),
            _ if milliseconds == 0 => 1,
            _ => 0,
        }
    }

    pub fn insert(
        &mut self,
        requested: RequestedId,
        fields: IndexMap<String, String>,
        now_ms: u64,
    ) -> Result<StreamId, StreamError> {
        let id = self.next_id(requested, now_ms)?;
        self.inner.insert(id, fields);
        Ok(id)
    }

    /// Entries with `start <= id <= end`.
    pub fn range(&self, start: StreamId, end: StreamId) -> Vec<StreamEntry> {
        if start > end {
            return vec![];
        }
        Self::collect(self.inner.range(start..=end))
    }

    /// Entries with `id > after`.
    pub fn after(&self, after: StreamId) -> Vec<StreamEntry> {
        Self::collect(self.inner.range((Bound::Excluded(after), Bound::Unbounded)))
    }

    fn collect<'s>(
        entries: impl Iterator<Item = (&'s StreamId, &'s IndexMap<String, String>)>,
    ) -> Vec<StreamEntry> {
        entries
            .map(|(id, fields)| StreamEntry {
                id: *id,
                fields: fields.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn id(s: &str) -> RequestedId {
        s.parse().unwrap()
    }

    #[test]
    fn parses_requested_ids() {
        assert_eq!(id("*"), RequestedId::Auto);
        assert_eq!(id("5-*"), RequestedId::AutoSequence(5));
        assert_eq!(id("5"), RequestedId::AutoSequence(5));
        assert_eq!(id("5-3"), RequestedId::Explicit(StreamId::new(5, 3)));
        assert_eq!(
            "abc-1".parse::<RequestedId>(),
            Err(StreamError::MallformedStreamId)
        );
        assert_eq!("-1-1".parse::<RequestedId>(), Err(StreamError::ZeroStreamId));
        assert_eq!("1--1".parse::<RequestedId>(), Err(StreamError::ZeroStreamId));
    }

    #[test]
    fn rejects_zero_id() {
        let mut stream = Stream::new();
        assert_eq!(
            stream.insert(id("0-0"), fields(&[("a", "1")]), 0),
            Err(StreamError::ZeroStreamId)
        );
        assert!(stream.is_empty());
    }

    #[test]
    fn auto_sequence_defaults() {
        let mut stream = Stream::new();
        assert_eq!(stream.next_id(id("5"), 0), Ok(StreamId::new(5, 0)));
        assert_eq!(stream.next_id(id("0-*"), 0), Ok(StreamId::new(0, 1)));

        stream.insert(id("0-*"), fields(&[("a", "1")]), 0).unwrap();
        assert_eq!(stream.next_id(id("0-*"), 0), Ok(StreamId::new(0, 2)));
        assert_eq!(stream.next_id(id("7-*"), 0), Ok(StreamId::new(7, 0)));
    }

    #[test]
    fn ids_must_grow() {
        let mut stream = Stream::new();
        stream.insert(id("1-1"), fields(&[("f", "v")]), 0).unwrap();
        assert_eq!(
            stream.insert(id("1-1"), fields(&[("f", "v2")]), 0),
            Err(StreamError::InvalidStreamId)
        );
        assert_eq!(
            stream.insert(id("0-5"), fields(&[("f", "v2")]), 0),
            Err(StreamError::InvalidStreamId)
        );
        assert_eq!(
            stream.insert(id("1-*"), fields(&[("f", "v2")]), 0),
            Ok(StreamId::new(1, 2))
        );
    }

    #[test]
    fn full_auto_uses_clock() {
        let mut stream = Stream::new();
        assert_eq!(
            stream.insert(id("*"), fields(&[("f", "v")]), 1_000),
            Ok(StreamId::new(1_000, 0))
        );
        assert_eq!(
            stream.insert(id("*"), fields(&[("f", "v")]), 1_000),
            Ok(StreamId::new(1_000, 1))
        );
    }

    #[test]
    fn duplicate_fields_overwrite() {
        let mut stream = Stream::new();
        let mut map = fields(&[("a", "1"), ("b", "2")]);
        map.insert("a".to_string(), "3".to_string());
        stream.insert(id("1-1"), map, 0).unwrap();
        let entries = stream.range(StreamId::MIN, StreamId::MAX);
        assert_eq!(entries[0].fields, fields(&[("a", "3"), ("b", "2")]));
    }

    #[test]
    fn range_is_inclusive_and_after_is_exclusive() {
        let mut stream = Stream::new();
        for raw in ["1-1", "1-2", "2-0", "3-5"] {
            stream.insert(id(raw), fields(&[("x", raw)]), 0).unwrap();
        }
        let ids = |entries: Vec<StreamEntry>| {
            entries
                .into_iter()
                .map(|e| e.id.to_string())
                .collect::<Vec<_>>()
        };

        assert_eq!(
            ids(stream.range(StreamId::new(1, 2), StreamId::new(2, 0))),
            ["1-2", "2-0"]
        );
        assert_eq!(ids(stream.after(StreamId::new(1, 2))), ["2-0", "3-5"]);
        assert!(stream.range(StreamId::new(3, 0), StreamId::new(1, 0)).is_empty());
        assert!(stream.after(StreamId::new(3, 5)).is_empty());
    }
}
