//! WSN-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, WsnError>;

/// Top-level error type for wifi_sentinel.
#[derive(Debug, Error)]
pub enum WsnError {
    #[error("[WSN-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[WSN-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[WSN-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[WSN-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[WSN-2001] scan results unavailable: {details}")]
    ScanUnavailable { details: String },

    #[error("[WSN-2002] scan source failure in {source_name}: {details}")]
    ScanSource {
        source_name: &'static str,
        details: String,
    },

    #[error("[WSN-2101] model load failure for {path}: {details}")]
    ModelLoad { path: PathBuf, details: String },

    #[error("[WSN-2102] inference failure: {details}")]
    Inference { details: String },

    #[error("[WSN-2201] store record rejected: {details}")]
    StoreRecord { details: String },

    #[error("[WSN-2301] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[WSN-2302] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[WSN-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[WSN-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[WSN-3004] cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("[WSN-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl WsnError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "WSN-1001",
            Self::MissingConfig { .. } => "WSN-1002",
            Self::ConfigParse { .. } => "WSN-1003",
            Self::UnsupportedPlatform { .. } => "WSN-1101",
            Self::ScanUnavailable { .. } => "WSN-2001",
            Self::ScanSource { .. } => "WSN-2002",
            Self::ModelLoad { .. } => "WSN-2101",
            Self::Inference { .. } => "WSN-2102",
            Self::StoreRecord { .. } => "WSN-2201",
            Self::Serialization { .. } => "WSN-2301",
            Self::Sql { .. } => "WSN-2302",
            Self::PermissionDenied { .. } => "WSN-3001",
            Self::Io { .. } => "WSN-3002",
            Self::Cancelled { .. } => "WSN-3004",
            Self::Runtime { .. } => "WSN-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    ///
    /// Radio and storage hiccups are transient; configuration and model
    /// problems need an operator.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ScanUnavailable { .. }
                | Self::ScanSource { .. }
                | Self::Io { .. }
                | Self::Cancelled { .. }
                | Self::Sql { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    ///
    /// `EACCES`-style failures surface as [`WsnError::PermissionDenied`].
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied { path };
        }
        Self::Io { path, source }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for WsnError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for WsnError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for WsnError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for WsnError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}
