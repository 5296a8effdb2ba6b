mod get;
mod set;
mod wait;
mod xadd;
mod xrange;
mod xread;

pub use get::Get;
pub use set::{Expiry, Set};
pub use wait::Wait;
pub use xadd::XAdd;
pub use xrange::XRange;
pub use xread::{Block, ReadFrom, XRead};

use thiserror::Error;

use crate::data::StreamError;
use crate::resp::Resp;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping(Option<String>),
    Echo(String),
    Get(Get),
    Set(Set),
    Info(Option<String>),
    ConfigGet(Vec<String>),
    Keys(String),
    Type(String),
    XAdd(XAdd),
    XRange(XRange),
    XRead(XRead),
    ReplConf(Vec<String>),
    Psync { replication_id: String, offset: i64 },
    Wait(Wait),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR Protocol error: expected an array of bulk strings")]
    IncorrectFormat,

    #[error("ERR unknown command '{0}'")]
    UnsupportedCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpiry(String),

    #[error("ERR unknown subcommand '{0}'")]
    UnknownSubcommand(String),

    #[error("ERR Unbalanced 'xread' list of streams: for each stream key an ID or '$' must be specified.")]
    UnbalancedStreams,

    #[error("READONLY You can't write against a read only replica.")]
    ReadOnly,

    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl From<CommandError> for Resp {
    fn from(err: CommandError) -> Self {
        Resp::error(err.to_string())
    }
}

impl From<StoreError> for Resp {
    fn from(err: StoreError) -> Self {
        Resp::error(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arity {
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl Arity {
    fn of(name: &str) -> Option<Self> {
        use Arity::*;
        Some(match name {
            "ping" => Between(0, 1),
            "echo" => Exact(1),
            "get" => Exact(1),
            "set" => AtLeast(2),
            "info" => Between(0, 1),
            "config" => AtLeast(2),
            "keys" => Exact(1),
            "type" => Exact(1),
            "xadd" => AtLeast(4),
            "xrange" => Between(1, 3),
            "xread" => AtLeast(3),
            "replconf" => AtLeast(1),
            "psync" => Exact(2),
            "wait" => Exact(2),
            _ => return None,
        })
    }

    fn check(self, name: &str, args: usize) -> Result<(), CommandError> {
        let ok = match self {
            Arity::Exact(n) => args == n,
            Arity::AtLeast(n) => args >= n,
            Arity::Between(min, max) => (min..=max).contains(&args),
        };
        if ok {
            Ok(())
        } else {
            Err(CommandError::WrongArity(name.to_string()))
        }
    }
}

impl Command {
    /// Parses a client request: an array whose first element names the command.
    pub fn parse(resp: &Resp) -> Result<Self, CommandError> {
        use CommandError::*;
        let Resp::Array(array) = resp else {
            return Err(IncorrectFormat);
        };
        let (name, raw_args) = array.split_first().ok_or(IncorrectFormat)?;
        let name = match name {
            Resp::SimpleString(s) => s.to_ascii_lowercase(),
            Resp::BulkString(b) => String::from_utf8_lossy(b).to_ascii_lowercase(),
            _ => return Err(IncorrectFormat),
        };
        let args = raw_args
            .iter()
            .map(argument)
            .collect::<Result<Vec<_>, _>>()?;
        let mut command = Self::from_parts(&name, &args)?;
        // Stored values keep their exact bytes, not the text decoding of them.
        if let (Command::Set(set), Some(Resp::BulkString(raw) | Resp::BulkBytes(raw))) =
            (&mut command, raw_args.get(1))
        {
            set.value = raw.clone();
        }
        Ok(command)
    }

    /// `name` must already be lower-cased.
    pub fn from_parts(name: &str, args: &[String]) -> Result<Self, CommandError> {
        use CommandError::*;
        Arity::of(name)
            .ok_or_else(|| UnsupportedCommand(name.to_string()))?
            .check(name, args.len())?;

        let command = match name {
            "ping" => Command::Ping(args.first().cloned()),
            "echo" => Command::Echo(args[0].clone()),
            "get" => Command::Get(Get::parse(args)?),
            "set" => Command::Set(Set::parse(args)?),
            "info" => Command::Info(args.first().map(|s| s.to_ascii_lowercase())),
            "config" => match args[0].to_ascii_lowercase().as_str() {
                "get" => Command::ConfigGet(args[1..].to_vec()),
                other => return Err(UnknownSubcommand(other.to_string())),
            },
            "keys" => Command::Keys(args[0].clone()),
            "type" => Command::Type(args[0].clone()),
            "xadd" => Command::XAdd(XAdd::parse(args)?),
            "xrange" => Command::XRange(XRange::parse(args)?),
            "xread" => Command::XRead(XRead::parse(args)?),
            "replconf" => Command::ReplConf(args.to_vec()),
            "psync" => Command::Psync {
                replication_id: args[0].clone(),
                offset: args[1].parse().map_err(|_| NotAnInteger)?,
            },
            "wait" => Command::Wait(Wait::parse(args)?),
            _ => return Err(UnsupportedCommand(name.to_string())),
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping(_) => "ping",
            Command::Echo(_) => "echo",
            Command::Get(_) => "get",
            Command::Set(_) => "set",
            Command::Info(_) => "info",
            Command::ConfigGet(_) => "config",
            Command::Keys(_) => "keys",
            Command::Type(_) => "type",
            Command::XAdd(_) => "xadd",
            Command::XRange(_) => "xrange",
            Command::XRead(_) => "xread",
            Command::ReplConf(_) => "replconf",
            Command::Psync { .. } => "psync",
            Command::Wait(_) => "wait",
        }
    }

    /// Commands that mutate the keyspace and therefore replicate.
    pub fn is_write(&self) -> bool {
        matches!(self, Command::Set(_) | Command::XAdd(_))
    }
}

fn argument(resp: &Resp) -> Result<String, CommandError> {
    match resp {
        Resp::SimpleString(s) => Ok(s.clone()),
        Resp::BulkString(bytes) | Resp::BulkBytes(bytes) => {
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
        Resp::Integer(i) => Ok(i.to_string()),
        _ => Err(CommandError::IncorrectFormat),
    }
}

pub(crate) fn parse_integer<T: std::str::FromStr>(s: &str) -> Result<T, CommandError> {
    s.parse().map_err(|_| CommandError::NotAnInteger)
}
