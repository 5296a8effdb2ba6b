use std::time::{Duration, SystemTime};

use bytes::Bytes;

use crate::command::{parse_integer, CommandError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Seconds(u64),
    Milliseconds(u64),
}

impl Expiry {
    /// `None` when the deadline is past what the clock can represent.
    pub fn deadline(&self, now: SystemTime) -> Option<SystemTime> {
        match self {
            Expiry::Seconds(s) => now.checked_add(Duration::from_secs(*s)),
            Expiry::Milliseconds(ms) => now.checked_add(Duration::from_millis(*ms)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Set {
    pub key: String,
    pub value: Bytes,
    pub expiry: Option<Expiry>,
}

impl Set {
    pub fn parse(args: &[String]) -> Result<Self, CommandError> {
        let [key, value, options @ ..] = args else {
            return Err(CommandError::WrongArity("set".to_string()));
        };

        let mut expiry = None;
        let mut options = options.iter();
        while let Some(option) = options.next() {
            let unit = option.to_ascii_lowercase();
            if unit != "ex" && unit != "px" {
                return Err(CommandError::Syntax);
            }
            let amount: u64 = parse_integer(options.next().ok_or(CommandError::Syntax)?)?;
            let millis = match unit.as_str() {
                "ex" => amount.checked_mul(1000),
                _ => Some(amount),
            };
            if amount == 0 || millis.map_or(true, |ms| ms > i64::MAX as u64) {
                return Err(CommandError::InvalidExpiry("set".to_string()));
            }
            expiry = Some(match unit.as_str() {
                "ex" => Expiry::Seconds(amount),
                _ => Expiry::Milliseconds(amount),
            });
        }

        Ok(Self {
            key: key.clone(),
            value: Bytes::from(value.clone()),
            expiry,
        })
    }
}
