use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PackError, Result};

/// Compression applied to a layer tar stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OciCompression {
    Gzip,
    Zstd,
}

impl OciCompression {
    /// Default level when none is configured.
    pub fn default_level(&self) -> u32 {
        match self {
            OciCompression::Gzip => 6,
            OciCompression::Zstd => 3,
        }
    }

    /// Inclusive range of accepted levels.
    pub fn level_range(&self) -> std::ops::RangeInclusive<u32> {
        match self {
            OciCompression::Gzip => 0..=9,
            OciCompression::Zstd => 1..=22,
        }
    }

    /// Conventional file extension for a tar compressed this way.
    pub fn file_extension(&self) -> &'static str {
        match self {
            OciCompression::Gzip => "tar.gz",
            OciCompression::Zstd => "tar.zst",
        }
    }
}

impl std::fmt::Display for OciCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OciCompression::Gzip => write!(f, "gzip"),
            OciCompression::Zstd => write!(f, "zstd"),
        }
    }
}

impl std::str::FromStr for OciCompression {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "gzip" | "gz" => Ok(Self::Gzip),
            "zstd" | "zst" => Ok(Self::Zstd),
            _ => Err(format!("unknown compression: '{}' (supported: gzip, zstd)", s)),
        }
    }
}

/// Repacking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepackConfig {
    /// Number of output layer tars the merged filesystem is split into
    pub num_output_files: usize,

    /// Compression of the output layers (`null` for plain tar)
    pub compression: Option<OciCompression>,

    /// Compression level, codec default when unset
    pub compression_level: Option<u32>,

    /// Directory for intermediate and output tars (a fresh temp dir when unset)
    pub scratch_dir: Option<PathBuf>,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for RepackConfig {
    fn default() -> Self {
        Self {
            num_output_files: 1,
            compression: Some(OciCompression::Gzip),
            compression_level: None,
            scratch_dir: None,
            log_level: LogLevel::Info,
        }
    }
}

impl RepackConfig {
    /// Parse a YAML configuration document.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON configuration document.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a `.yaml`/`.yml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PackError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            other => Err(PackError::Config(format!(
                "Unsupported config file extension {:?} for {}",
                other,
                path.display()
            ))),
        }
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.num_output_files == 0 {
            return Err(PackError::Config(
                "num_output_files must be at least 1".to_string(),
            ));
        }

        if let Some(level) = self.compression_level {
            match self.compression {
                None => {
                    return Err(PackError::Config(
                        "compression_level set without compression".to_string(),
                    ));
                }
                Some(compression) => {
                    if !compression.level_range().contains(&level) {
                        return Err(PackError::Config(format!(
                            "{} level {} out of range {:?}",
                            compression,
                            level,
                            compression.level_range()
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Effective compression level, if compressing at all.
    pub fn effective_level(&self) -> Option<u32> {
        self.compression
            .map(|c| self.compression_level.unwrap_or_else(|| c.default_level()))
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
