// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the harvest binary.

use harvest_config::ConfigError;
use harvest_opcua::OpcUaError;
use thiserror::Error;

/// Result type alias for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors that end a CLI command.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Config loading error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// The engine failed to start or gave up reconnecting.
    #[error("Collection error: {0}")]
    Engine(#[from] OpcUaError),

    /// Runtime error.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        /// The context description.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<CliError>,
    },
}

impl CliError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a runtime error.
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Adds context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::Config(_) => 1,
            Self::Engine(e) if e.category() == "configuration" => 1,
            Self::Engine(e) if e.category() == "connection" => 2,
            Self::Engine(_) => 3,
            Self::Runtime(_) => 3,
            Self::Io(_) => 4,
            Self::WithContext { source, .. } => source.exit_code(),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Error Reporting
// =============================================================================

/// Prints an error and its cause chain to stderr.
pub fn report_error(error: &CliError) {
    eprintln!("Error: {}", error);

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  Caused by: {}", cause);
        source = cause.source();
    }
}

/// Reports an error and exits with its code.
pub fn report_error_and_exit(error: CliError) -> ! {
    report_error(&error);
    std::process::exit(error.exit_code())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_opcua::{ConfigurationError, ConnectionError};

    #[test]
    fn test_error_with_context() {
        let err = CliError::config("inner error").with_context("outer context");
        assert_eq!(err.to_string(), "outer context: Configuration error: inner error");
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::config("test").exit_code(), 1);
        assert_eq!(
            CliError::from(ConfigError::invalid("collector.period", "zero")).exit_code(),
            1
        );
        assert_eq!(
            CliError::from(OpcUaError::configuration(ConfigurationError::missing_field(
                "endpoint"
            )))
            .exit_code(),
            1
        );
        assert_eq!(
            CliError::from(OpcUaError::connection(ConnectionError::retries_exhausted(
                "opc.tcp://plc:4840",
                5,
                "refused"
            )))
            .exit_code(),
            2
        );
        assert_eq!(CliError::runtime("test").exit_code(), 3);
        assert_eq!(CliError::Io("test".to_string()).exit_code(), 4);
    }
}
