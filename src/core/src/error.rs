use thiserror::Error;

/// ocipack error types
#[derive(Error, Debug)]
pub enum PackError {
    /// Digest or named file absent from a repository
    #[error("Not found: {0}")]
    NotFound(String),

    /// The same digest was registered twice while building a repository
    #[error("Duplicate blob: {0}")]
    DuplicateBlob(String),

    /// No decoder is registered for a media type
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// Structurally invalid tar input
    #[error("Malformed archive: {0}")]
    MalformedArchive(String),

    /// Input uses a feature the engine does not implement
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// An index did not resolve to exactly one item
    #[error("Expected exactly one {expected}, found {found}")]
    Cardinality { expected: String, found: usize },

    /// Malformed digest or a path escaping a repository root
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl PackError {
    /// Wrap an I/O error with the path or operation it happened on.
    pub fn io_context(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        PackError::Io(std::io::Error::new(err.kind(), format!("{}: {}", context, err)))
    }
}

impl From<serde_json::Error> for PackError {
    fn from(err: serde_json::Error) -> Self {
        PackError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for PackError {
    fn from(err: serde_yaml::Error) -> Self {
        PackError::Serialization(err.to_string())
    }
}

/// Result type alias for ocipack operations
pub type Result<T> = std::result::Result<T, PackError>;
