// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration error types.

use std::path::PathBuf;

use harvest_opcua::OpcUaError;
use thiserror::Error;

use crate::loader::ConfigFormat;

/// Why a configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file does not exist.
    #[error("Config file not found: {path}")]
    NotFound {
        /// Requested path.
        path: PathBuf,
    },

    /// The file exists but could not be read.
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The extension maps to no supported format.
    #[error("Cannot tell the config format of '{path}' (expected .yaml, .yml, .toml or .json)")]
    UnknownExtension {
        /// File path.
        path: PathBuf,
    },

    /// The content does not deserialize into the schema.
    #[error("{origin}: invalid {format}: {message}")]
    Syntax {
        /// File path, or `<inline>` for string content.
        origin: String,
        /// Format the content was parsed as.
        format: &'static str,
        /// Parser message.
        message: String,
    },

    /// A `HARVEST_*` override has a value of the wrong shape.
    #[error("Environment override {variable}: {message}")]
    EnvOverride {
        /// Full variable name.
        variable: String,
        /// What was wrong.
        message: String,
    },

    /// A collector or logging setting is out of range.
    #[error("Invalid '{field}': {message}")]
    Invalid {
        /// Dotted field path.
        field: String,
        /// What was wrong.
        message: String,
    },

    /// The `opcua` section failed the engine's own validation.
    #[error("Invalid opcua section: {0}")]
    OpcUa(#[from] OpcUaError),
}

impl ConfigError {
    /// A missing file.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// An unreadable file.
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// A path without a known extension.
    pub fn unknown_extension(path: impl Into<PathBuf>) -> Self {
        Self::UnknownExtension { path: path.into() }
    }

    /// Content `origin` failed to parse as `format`.
    pub fn syntax(origin: impl Into<String>, format: ConfigFormat, message: impl Into<String>) -> Self {
        Self::Syntax {
            origin: origin.into(),
            format: format.name(),
            message: message.into(),
        }
    }

    /// A malformed environment override.
    pub fn env_override(variable: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EnvOverride {
            variable: variable.into(),
            message: message.into(),
        }
    }

    /// An out-of-range setting.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns `true` when the file itself could not be used.
    pub fn is_file_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Read { .. } | Self::UnknownExtension { .. }
        )
    }

    /// The environment variable at fault, if any.
    pub fn env_variable(&self) -> Option<&str> {
        match self {
            Self::EnvOverride { variable, .. } => Some(variable),
            _ => None,
        }
    }

    /// Short kind name for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Read { .. } => "read",
            Self::UnknownExtension { .. } => "unknown_extension",
            Self::Syntax { .. } => "syntax",
            Self::EnvOverride { .. } => "env_override",
            Self::Invalid { .. } => "invalid",
            Self::OpcUa(_) => "opcua",
        }
    }
}

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_opcua::ConfigurationError;

    #[test]
    fn test_syntax_error_names_origin_and_format() {
        let error = ConfigError::syntax("plant.toml", ConfigFormat::Toml, "expected `=`");
        assert_eq!(error.kind(), "syntax");
        assert_eq!(error.to_string(), "plant.toml: invalid TOML: expected `=`");
    }

    #[test]
    fn test_engine_error_converts() {
        let error: ConfigError =
            OpcUaError::configuration(ConfigurationError::missing_field("endpoint")).into();
        assert_eq!(error.kind(), "opcua");
        assert!(error.to_string().contains("endpoint"));
    }

    #[test]
    fn test_file_errors() {
        let error = ConfigError::read(
            "harvest.yaml",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(error.is_file_error());
        assert!(ConfigError::not_found("harvest.yaml").is_file_error());
        assert!(ConfigError::unknown_extension("harvest.ini").is_file_error());
        assert!(!ConfigError::invalid("collector.period", "zero").is_file_error());
    }

    #[test]
    fn test_env_variable() {
        let error = ConfigError::env_override("HARVEST_OPCUA_MODE", "expected polling or streaming");
        assert_eq!(error.env_variable(), Some("HARVEST_OPCUA_MODE"));
        assert_eq!(ConfigError::not_found("x.yaml").env_variable(), None);
    }
}
