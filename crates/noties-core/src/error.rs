use thiserror::Error;

/// A record that cannot be turned into a valid note or day plan.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchemaError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("duplicate block id `{0}` in note")]
    DuplicateBlockId(String),

    #[error("malformed record: {0}")]
    Malformed(String),

    #[error(transparent)]
    Path(#[from] PathError),
}

impl From<serde_json::Error> for SchemaError {
    fn from(err: serde_json::Error) -> Self {
        SchemaError::Malformed(err.to_string())
    }
}

/// A string that is not a `pins/{scope}/{collection}[/{id}]` path.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PathError {
    #[error("path `{0}` does not start with `pins/`")]
    MissingRoot(String),

    #[error("unknown collection `{0}`")]
    UnknownCollection(String),

    #[error("path `{0}` has an empty segment")]
    EmptySegment(String),

    #[error("path `{0}` has too many segments")]
    TooLong(String),

    #[error("`{0}` cannot be used as a path segment")]
    InvalidSegment(String),
}
