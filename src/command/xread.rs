use std::time::Duration;

use crate::command::{parse_integer, CommandError};
use crate::data::StreamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    Forever,
    For(Duration),
}

/// Where an XREAD starts reading a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFrom {
    After(StreamId),
    /// `$`: whatever the top id is when the command starts.
    Latest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct XRead {
    pub block: Option<Block>,
    pub streams: Vec<(String, ReadFrom)>,
}

impl XRead {
    pub fn parse(args: &[String]) -> Result<Self, CommandError> {
        let mut block = None;
        let mut args = args;
        loop {
            match args {
                [option, timeout, rest @ ..] if option.eq_ignore_ascii_case("block") => {
                    let millis: i64 = parse_integer(timeout)?;
                    block = Some(match millis {
                        n if n <= 0 => Block::Forever,
                        n => Block::For(Duration::from_millis(n as u64)),
                    });
                    args = rest;
                }
                [option, rest @ ..] if option.eq_ignore_ascii_case("streams") => {
                    args = rest;
                    break;
                }
                _ => return Err(CommandError::Syntax),
            }
        }

        if args.is_empty() || args.len() % 2 != 0 {
            return Err(CommandError::UnbalancedStreams);
        }
        let (keys, ids) = args.split_at(args.len() / 2);
        let streams = keys
            .iter()
            .zip(ids)
            .map(|(key, id)| {
                let from = match id.as_str() {
                    "$" => ReadFrom::Latest,
                    "-" => ReadFrom::After(StreamId::MIN),
                    id => ReadFrom::After(StreamId::parse_with_default(id, 0)?),
                };
                Ok((key.clone(), from))
            })
            .collect::<Result<Vec<_>, CommandError>>()?;

        Ok(Self { block, streams })
    }
}
