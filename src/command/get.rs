use crate::command::CommandError;

#[derive(Debug, Clone, PartialEq)]
pub struct Get {
    pub key: String,
}

impl Get {
    pub fn parse(args: &[String]) -> Result<Self, CommandError> {
        let key = args
            .first()
            .ok_or_else(|| CommandError::WrongArity("get".to_string()))?
            .clone();
        Ok(Self { key })
    }
}
