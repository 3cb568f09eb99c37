use thiserror::Error;

/// Result type used across the curator
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by configuration, scoring and collaborator calls
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid settings, weight tables or playlist definitions
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown strategy: '{0}'")]
    UnknownStrategy(String),

    /// Selection constraints that cannot describe a valid run
    #[error("Invalid selection constraints: {0}")]
    InvalidConstraints(String),

    /// Media catalog request or response failure
    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Genre similarity lookup failed: {0}")]
    Similarity(String),

    /// A collaborator cannot provide the requested figure
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// At least one playlist window failed after the whole batch ran
    #[error("{failed} of {total} playlists failed: {summary}")]
    BatchFailed {
        failed: usize,
        total: usize,
        summary: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
