//! ocipack core - shared error, configuration and logging types.
//!
//! Used by the repacking engine and by whatever embeds it.

pub mod config;
pub mod error;
pub mod log;

// Re-export commonly used types
pub use config::{LogLevel, OciCompression, RepackConfig};
pub use error::{PackError, Result};

/// ocipack version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
