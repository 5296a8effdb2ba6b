use crate::command::CommandError;
use crate::data::StreamId;

#[derive(Debug, Clone, PartialEq)]
pub struct XRange {
    pub key: String,
    pub start: StreamId,
    pub end: StreamId,
}

impl XRange {
    pub fn parse(args: &[String]) -> Result<Self, CommandError> {
        let key = args
            .first()
            .ok_or_else(|| CommandError::WrongArity("xrange".to_string()))?
            .clone();

        let start = match args.get(1).map(String::as_str) {
            None | Some("-") => StreamId::MIN,
            Some("+") => StreamId::MAX,
            Some(s) => StreamId::parse_with_default(s, 0)?,
        };
        let end = match args.get(2).map(String::as_str) {
            None | Some("+") => StreamId::MAX,
            Some("-") => StreamId::MIN,
            Some(s) => StreamId::parse_with_default(s, u64::MAX)?,
        };

        Ok(Self { key, start, end })
    }
}
