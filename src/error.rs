use thiserror::Error;

/// A specialized `Result` type for calculator operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Text typed into a parameter field did not parse to a usable value
    #[error("invalid {field} value '{text}': enter a numeric value")]
    InvalidInput { field: &'static str, text: String },

    /// A tap or recompute was requested while no session is running
    #[error("no active session")]
    NoActiveSession,

    #[error("settings storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer message codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A stored timestamp could not be parsed
    #[error("invalid stored timestamp '{0}'")]
    Timestamp(String),
}

impl Error {
    pub fn invalid_input(field: &'static str, text: impl Into<String>) -> Self {
        Error::InvalidInput {
            field,
            text: text.into(),
        }
    }
}
