//! STE-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::cluster::node::NodeId;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, EvictError>;

/// Top-level error type for the slow-trend evictor.
#[derive(Debug, Error)]
pub enum EvictError {
    #[error("[STE-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[STE-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[STE-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[STE-2001] failed to persist scheduler config {name}: {details}")]
    Persistence { name: String, details: String },

    #[error("[STE-2002] no slow-trend signal for node {node}")]
    NoSignalData { node: NodeId },

    #[error("[STE-2003] node {node} not found in cluster")]
    NodeNotFound { node: NodeId },

    #[error("[STE-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[STE-2102] metrics registry failure: {details}")]
    Metrics { details: String },

    #[error("[STE-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[STE-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl EvictError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "STE-1001",
            Self::MissingConfig { .. } => "STE-1002",
            Self::ConfigParse { .. } => "STE-1003",
            Self::Persistence { .. } => "STE-2001",
            Self::NoSignalData { .. } => "STE-2002",
            Self::NodeNotFound { .. } => "STE-2003",
            Self::Serialization { .. } => "STE-2101",
            Self::Metrics { .. } => "STE-2102",
            Self::Io { .. } => "STE-3002",
            Self::Runtime { .. } => "STE-3900",
        }
    }

    /// Whether retrying on a later tick might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Persistence { .. }
                | Self::NoSignalData { .. }
                | Self::Io { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for a failed config write.
    #[must_use]
    pub fn persistence(name: &str, details: impl Into<String>) -> Self {
        Self::Persistence {
            name: name.to_string(),
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for EvictError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for EvictError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<toml::ser::Error> for EvictError {
    fn from(value: toml::ser::Error) -> Self {
        Self::Serialization {
            context: "toml",
            details: value.to_string(),
        }
    }
}

impl From<prometheus::Error> for EvictError {
    fn from(value: prometheus::Error) -> Self {
        Self::Metrics {
            details: value.to_string(),
        }
    }
}
