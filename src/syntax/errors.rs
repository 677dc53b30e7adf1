use thiserror::Error;

use crate::reader::ReaderError;

#[derive(Error, Debug)]
pub enum SyntaxError {
    #[error("failed to set language for parser")]
    LanguageSet,

    #[error("failed to parse source")]
    ParseFailed,

    #[error("invalid query: {message}")]
    InvalidQuery { message: String },

    #[error("query matched 0 locations")]
    NoMatch,

    #[error("query matched {count} locations, expected exactly 1")]
    AmbiguousMatch { count: usize },

    #[error(transparent)]
    Reader(#[from] ReaderError),
}
