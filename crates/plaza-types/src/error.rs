use thiserror::Error;

/// Input rejected before it reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("content cannot be empty")]
    EmptyContent,

    #[error("content is {len} characters, the limit is {max}")]
    ContentTooLong { len: usize, max: usize },

    #[error("unsupported reaction: {0}")]
    UnsupportedReaction(String),

    #[error("{0}")]
    InvalidField(&'static str),
}
