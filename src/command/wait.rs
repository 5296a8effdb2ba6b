use std::time::Duration;

use crate::command::{parse_integer, CommandError};

#[derive(Debug, Clone, PartialEq)]
pub struct Wait {
    pub replicas: usize,
    /// `None` waits without a deadline (a timeout of 0).
    pub timeout: Option<Duration>,
}

impl Wait {
    pub fn parse(args: &[String]) -> Result<Self, CommandError> {
        let [replicas, timeout] = args else {
            return Err(CommandError::WrongArity("wait".to_string()));
        };
        let replicas = parse_integer(replicas)?;
        let timeout = match parse_integer::<u64>(timeout)? {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        Ok(Self { replicas, timeout })
    }
}
