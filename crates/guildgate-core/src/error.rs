use guildgate_util::snowflake::IdError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid id: {0}")]
    Id(#[from] IdError),
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("unexpected payload: {0}")]
    Unexpected(String),
}
