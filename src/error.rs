use crate::ast::{CType, Location};
use thiserror::Error;

/// Constructs a path cannot be translated precisely for.
/// Callers treat these as "no precise formula for this path".
#[derive(Debug, Error)]
pub enum Error {
    #[error("{loc}: unrecognized code: {message}")]
    UnrecognizedCode {
        message:    String,
        loc:        Location,
    },

    #[error("{loc}: unsupported cast from '{from}' to '{to}'")]
    UnsupportedCast {
        from:       CType,
        to:         CType,
        loc:        Location,
    },

    #[error("{loc}: function '{function}' takes {expected} arguments but was called with {found}")]
    ArityMismatch {
        function:   String,
        expected:   usize,
        found:      usize,
        loc:        Location,
    },

    #[error("no branch value for state {0}")]
    MissingBranch(usize),

    #[error("translation interrupted")]
    Interrupted,

    #[error("cannot parse formula: {0}")]
    Parse(String),

    #[error("invalid key '{0}'")]
    InvalidKey(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] toml::de::Error),
}

impl Error {
    pub fn unrecognized<S: Into<String>>(message: S, loc: &Location) -> Self {
        Error::UnrecognizedCode {
            message:    message.into(),
            loc:        loc.clone(),
        }
    }
}

impl<R: pest::RuleType> From<pest::error::Error<R>> for Error {
    fn from(e: pest::error::Error<R>) -> Self {
        Error::Parse(format!("{}", e))
    }
}
