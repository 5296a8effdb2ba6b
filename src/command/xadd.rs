use indexmap::IndexMap;

use crate::command::CommandError;
use crate::data::RequestedId;

#[derive(Debug, Clone, PartialEq)]
pub struct XAdd {
    pub key: String,
    pub id: RequestedId,
    pub fields: IndexMap<String, String>,
}

impl XAdd {
    pub fn parse(args: &[String]) -> Result<Self, CommandError> {
        let [key, id, pairs @ ..] = args else {
            return Err(CommandError::WrongArity("xadd".to_string()));
        };
        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return Err(CommandError::WrongArity("xadd".to_string()));
        }

        let fields = pairs
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect();
        Ok(Self {
            key: key.clone(),
            id: id.parse()?,
            fields,
        })
    }
}
