// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Error types for the collection engine.
//!
//! Errors are grouped by the layer that produced them so callers can decide
//! between retrying, skipping a single item, or stopping the engine:
//!
//! ```text
//! OpcUaError
//! ├── Connection    - Endpoint discovery, connect, retry exhaustion
//! ├── Browse        - Address-space traversal failures
//! ├── Operation     - Batched reads and attribute reads
//! ├── Subscription  - Subscription and monitored item failures
//! ├── Configuration - Invalid settings
//! ├── Sink          - Record publishing failures
//! └── Internal      - Task and runtime failures
//! ```
//!
//! # Examples
//!
//! ```
//! use harvest_opcua::error::{ConnectionError, OpcUaError};
//!
//! let error = OpcUaError::connection(ConnectionError::refused("opc.tcp://localhost:4840"));
//! assert!(error.is_retryable());
//! assert_eq!(error.category(), "connection");
//! ```

use std::fmt;

use thiserror::Error;
use tracing::Level;

// =============================================================================
// OpcUaError - Main Error Type
// =============================================================================

/// The main error type for engine operations.
#[derive(Debug, Error)]
pub enum OpcUaError {
    /// Connection-related errors.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// Node browsing errors.
    #[error("{0}")]
    Browse(#[from] BrowseError),

    /// Read operation errors.
    #[error("{0}")]
    Operation(#[from] OperationError),

    /// Subscription and monitoring errors.
    #[error("{0}")]
    Subscription(#[from] SubscriptionError),

    /// Configuration errors.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// The publish sink rejected a record.
    #[error("Sink '{sink}' failed: {message}")]
    Sink {
        /// Sink name.
        sink: String,
        /// Failure description.
        message: String,
    },

    /// Internal runtime failure (task join, poisoned state).
    #[error("Internal error: {message}")]
    Internal {
        /// Failure description.
        message: String,
    },
}

impl OpcUaError {
    // =========================================================================
    // Factory Methods
    // =========================================================================

    /// Creates a connection error.
    #[inline]
    pub fn connection(error: ConnectionError) -> Self {
        Self::Connection(error)
    }

    /// Creates a browse error.
    #[inline]
    pub fn browse(error: BrowseError) -> Self {
        Self::Browse(error)
    }

    /// Creates an operation error.
    #[inline]
    pub fn operation(error: OperationError) -> Self {
        Self::Operation(error)
    }

    /// Creates a subscription error.
    #[inline]
    pub fn subscription(error: SubscriptionError) -> Self {
        Self::Subscription(error)
    }

    /// Creates a configuration error.
    #[inline]
    pub fn configuration(error: ConfigurationError) -> Self {
        Self::Configuration(error)
    }

    /// Creates a "not connected" error.
    pub fn not_connected() -> Self {
        Self::Connection(ConnectionError::NotConnected)
    }

    /// Creates a batched read failure.
    pub fn read_failed(message: impl Into<String>) -> Self {
        Self::Operation(OperationError::batch_failed(message))
    }

    /// Creates a sink error.
    pub fn sink(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sink {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    // =========================================================================
    // Error Properties
    // =========================================================================

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_retryable(),
            Self::Browse(e) => e.is_retryable(),
            Self::Operation(e) => e.is_retryable(),
            Self::Subscription(e) => e.is_retryable(),
            Self::Sink { .. } => true,
            Self::Configuration(_) | Self::Internal { .. } => false,
        }
    }

    /// Returns `true` if the error means the session can no longer be used.
    ///
    /// Collection tasks treat these like a lost connection and force a
    /// reconnect on the next trigger.
    pub fn is_connection_loss(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Operation(OperationError::BatchFailed { .. }) => true,
            Self::Subscription(SubscriptionError::CreationFailed { .. }) => true,
            _ => false,
        }
    }

    /// Returns the severity level of this error.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Connection(e) => e.severity(),
            Self::Browse(_) => ErrorSeverity::Warning,
            Self::Operation(e) => e.severity(),
            Self::Subscription(_) => ErrorSeverity::Error,
            Self::Sink { .. } => ErrorSeverity::Warning,
            Self::Configuration(_) => ErrorSeverity::Critical,
            Self::Internal { .. } => ErrorSeverity::Critical,
        }
    }

    /// Returns the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Browse(_) => "browse",
            Self::Operation(_) => "operation",
            Self::Subscription(_) => "subscription",
            Self::Configuration(_) => "configuration",
            Self::Sink { .. } => "sink",
            Self::Internal { .. } => "internal",
        }
    }

    /// Returns the tracing level for this error.
    pub fn tracing_level(&self) -> Level {
        self.severity().to_tracing_level()
    }

    /// Logs this error with appropriate level and context.
    pub fn log(&self, context: &str) {
        match self.tracing_level() {
            Level::ERROR => tracing::error!(
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            Level::WARN => tracing::warn!(
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
            _ => tracing::debug!(
                category = self.category(),
                context = context,
                retryable = self.is_retryable(),
                "{self}"
            ),
        }
    }
}

// =============================================================================
// ConnectionError
// =============================================================================

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Connection refused or handshake failed.
    #[error("Connection refused to '{endpoint}'{}", reason_suffix(.reason))]
    Refused {
        /// Target endpoint.
        endpoint: String,
        /// Failure detail from the protocol library.
        reason: Option<String>,
    },

    /// Endpoint discovery failed.
    #[error("Failed to discover endpoints at '{endpoint}': {message}")]
    Discovery {
        /// Target endpoint.
        endpoint: String,
        /// Failure detail.
        message: String,
    },

    /// Invalid endpoint URL.
    #[error("Invalid endpoint URL: '{url}' - {reason}")]
    InvalidEndpoint {
        /// The invalid URL.
        url: String,
        /// Reason.
        reason: String,
    },

    /// The bounded retry helper gave up.
    #[error("Tried to connect to '{endpoint}' {attempts} time(s) without success: {last}")]
    RetriesExhausted {
        /// Target endpoint.
        endpoint: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last failure message.
        last: String,
    },

    /// Not connected.
    #[error("Not connected to OPC UA server")]
    NotConnected,
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(r) => format!(": {r}"),
        None => String::new(),
    }
}

impl ConnectionError {
    /// Creates a connection refused error.
    pub fn refused(endpoint: impl Into<String>) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
            reason: None,
        }
    }

    /// Creates a connection refused error carrying the library's reason.
    pub fn refused_with(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Refused {
            endpoint: endpoint.into(),
            reason: Some(reason.into()),
        }
    }

    /// Creates an endpoint discovery error.
    pub fn discovery(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Discovery {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid endpoint error.
    pub fn invalid_endpoint(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a retries exhausted error.
    pub fn retries_exhausted(endpoint: impl Into<String>, attempts: u32, last: impl Into<String>) -> Self {
        Self::RetriesExhausted {
            endpoint: endpoint.into(),
            attempts,
            last: last.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Refused { .. } | Self::Discovery { .. } | Self::NotConnected => true,
            Self::InvalidEndpoint { .. } | Self::RetriesExhausted { .. } => false,
        }
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotConnected => ErrorSeverity::Warning,
            Self::Refused { .. } | Self::Discovery { .. } => ErrorSeverity::Error,
            Self::InvalidEndpoint { .. } | Self::RetriesExhausted { .. } => ErrorSeverity::Critical,
        }
    }
}

// =============================================================================
// BrowseError
// =============================================================================

/// Address-space browsing errors.
#[derive(Debug, Error)]
pub enum BrowseError {
    /// Children enumeration failed.
    #[error("Browse failed for '{node_id}': {message}")]
    BrowseFailed {
        /// Node being browsed.
        node_id: String,
        /// Failure detail.
        message: String,
    },

    /// Attribute read failed for a visited node.
    #[error("Attribute read failed for '{node_id}': {message}")]
    AttributesFailed {
        /// Node being inspected.
        node_id: String,
        /// Failure detail.
        message: String,
    },

    /// Invalid node identifier.
    #[error("Invalid node ID '{node_id}': {reason}")]
    InvalidNodeId {
        /// The invalid node ID.
        node_id: String,
        /// Reason.
        reason: String,
    },
}

impl BrowseError {
    /// Creates a browse failed error.
    pub fn browse_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BrowseFailed {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Creates an attribute read error.
    pub fn attributes_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AttributesFailed {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid node ID error.
    pub fn invalid_node_id(node_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNodeId {
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidNodeId { .. })
    }
}

// =============================================================================
// OperationError
// =============================================================================

/// Read operation errors.
#[derive(Debug, Error)]
pub enum OperationError {
    /// The batched read round trip failed as a whole.
    #[error("Batched read failed: {message}")]
    BatchFailed {
        /// Failure detail.
        message: String,
    },

    /// The server answered with a different number of results than requested.
    #[error("Batched read returned {actual} results for {expected} nodes")]
    ResultCountMismatch {
        /// Number of requested nodes.
        expected: usize,
        /// Number of returned results.
        actual: usize,
    },

    /// A single node returned a bad status.
    #[error("Bad status {} (0x{status_code:08X}) for '{node_id}'", status_name(.status_code))]
    BadStatus {
        /// Node ID.
        node_id: String,
        /// Raw status code.
        status_code: u32,
    },
}

impl OperationError {
    /// Creates a batch failure.
    pub fn batch_failed(message: impl Into<String>) -> Self {
        Self::BatchFailed {
            message: message.into(),
        }
    }

    /// Creates a bad status error.
    pub fn bad_status(node_id: impl Into<String>, status_code: u32) -> Self {
        Self::BadStatus {
            node_id: node_id.into(),
            status_code,
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BatchFailed { .. })
    }

    /// Returns the severity level.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::BadStatus { .. } => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

fn status_name(code: &u32) -> &'static str {
    status_code_name(*code)
}

/// Returns a symbolic name for common OPC UA status codes.
pub fn status_code_name(code: u32) -> &'static str {
    match code {
        0x0000_0000 => "Good",
        0x8001_0000 => "BadUnexpectedError",
        0x8002_0000 => "BadInternalError",
        0x800A_0000 => "BadTimeout",
        0x800D_0000 => "BadServerNotConnected",
        0x800E_0000 => "BadServerHalted",
        0x8031_0000 => "BadNoCommunication",
        0x8033_0000 => "BadNodeIdInvalid",
        0x8034_0000 => "BadNodeIdUnknown",
        0x8035_0000 => "BadAttributeIdInvalid",
        0x803B_0000 => "BadNotReadable",
        0x8040_0000 => "BadMonitoredItemIdInvalid",
        0x8041_0000 => "BadMonitoredItemFilterInvalid",
        0x8079_0000 => "BadSubscriptionIdInvalid",
        0x80AB_0000 => "BadConnectionClosed",
        0x80AE_0000 => "BadInvalidState",
        c if c & 0x8000_0000 != 0 => "Bad",
        c if c & 0x4000_0000 != 0 => "Uncertain",
        _ => "Good",
    }
}

// =============================================================================
// SubscriptionError
// =============================================================================

/// Subscription and monitored item errors.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// Subscription creation failed.
    #[error("Failed to create subscription: {message}")]
    CreationFailed {
        /// Failure detail.
        message: String,
    },

    /// A monitored item could not be registered.
    #[error("Failed to monitor '{node_id}': {message}")]
    MonitorFailed {
        /// Node ID.
        node_id: String,
        /// Failure detail.
        message: String,
    },

    /// A notification carried an error.
    #[error("Notification error on subscription {subscription_id}: {message}")]
    Notification {
        /// Subscription ID.
        subscription_id: u32,
        /// Failure detail.
        message: String,
    },

    /// A streaming subscription is already active.
    #[error("Subscription {subscription_id} is already active")]
    AlreadyActive {
        /// Active subscription ID.
        subscription_id: u32,
    },
}

impl SubscriptionError {
    /// Creates a subscription creation error.
    pub fn creation_failed(message: impl Into<String>) -> Self {
        Self::CreationFailed {
            message: message.into(),
        }
    }

    /// Creates a monitored item error.
    pub fn monitor_failed(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MonitorFailed {
            node_id: node_id.into(),
            message: message.into(),
        }
    }

    /// Creates a notification error.
    pub fn notification(subscription_id: u32, message: impl Into<String>) -> Self {
        Self::Notification {
            subscription_id,
            message: message.into(),
        }
    }

    /// Returns `true` if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CreationFailed { .. } | Self::Notification { .. })
    }
}

// =============================================================================
// ConfigurationError
// =============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Invalid configuration value.
    #[error("Invalid configuration for '{field}': {reason}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Reason.
        reason: String,
    },

    /// Missing required field.
    #[error("Missing required configuration field: '{field}'")]
    MissingField {
        /// Field name.
        field: String,
    },

    /// Conflicting settings.
    #[error("Conflicting configuration: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },
}

impl ConfigurationError {
    /// Creates an invalid value error.
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }
}

// =============================================================================
// ErrorSeverity
// =============================================================================

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorSeverity {
    /// Informational - no action required.
    Info,
    /// Warning - action may be required.
    Warning,
    /// Error - action required, but recoverable.
    Error,
    /// Critical - immediate action required.
    Critical,
}

impl ErrorSeverity {
    /// Converts to tracing level.
    pub fn to_tracing_level(self) -> Level {
        match self {
            Self::Info => Level::INFO,
            Self::Warning => Level::WARN,
            Self::Error | Self::Critical => Level::ERROR,
        }
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Result Alias
// =============================================================================

/// Result type for engine operations.
pub type OpcUaResult<T> = Result<T, OpcUaError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_retryable() {
        assert!(ConnectionError::refused("opc.tcp://localhost:4840").is_retryable());
        assert!(ConnectionError::NotConnected.is_retryable());
        assert!(!ConnectionError::invalid_endpoint("bad-url", "invalid format").is_retryable());
        assert!(
            !ConnectionError::retries_exhausted("opc.tcp://localhost:4840", 5, "refused")
                .is_retryable()
        );
    }

    #[test]
    fn test_retries_exhausted_message() {
        let error = OpcUaError::connection(ConnectionError::retries_exhausted(
            "opc.tcp://plc:4840",
            3,
            "Connection refused",
        ));
        let text = error.to_string();
        assert!(text.contains("3 time(s)"));
        assert!(text.contains("opc.tcp://plc:4840"));
        assert_eq!(error.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_refused_with_reason() {
        let error = ConnectionError::refused_with("opc.tcp://plc:4840", "BadTimeout");
        assert_eq!(
            error.to_string(),
            "Connection refused to 'opc.tcp://plc:4840': BadTimeout"
        );
    }

    #[test]
    fn test_connection_loss_classification() {
        assert!(OpcUaError::not_connected().is_connection_loss());
        assert!(OpcUaError::read_failed("socket closed").is_connection_loss());
        assert!(!OpcUaError::operation(OperationError::bad_status("ns=2;s=A", 0x8034_0000))
            .is_connection_loss());
        assert!(!OpcUaError::sink("memory", "full").is_connection_loss());
    }

    #[test]
    fn test_status_code_names() {
        assert_eq!(status_code_name(0), "Good");
        assert_eq!(status_code_name(0x8034_0000), "BadNodeIdUnknown");
        assert_eq!(status_code_name(0x80FF_0000), "Bad");
        assert_eq!(status_code_name(0x40A0_0000), "Uncertain");
    }

    #[test]
    fn test_bad_status_display() {
        let error = OperationError::bad_status("ns=2;s=Temp", 0x8034_0000);
        assert!(error.to_string().contains("BadNodeIdUnknown"));
        assert!(error.to_string().contains("0x80340000"));
    }

    #[test]
    fn test_category() {
        assert_eq!(OpcUaError::not_connected().category(), "connection");
        assert_eq!(
            OpcUaError::configuration(ConfigurationError::missing_field("endpoint")).category(),
            "configuration"
        );
        assert_eq!(OpcUaError::internal("join").category(), "internal");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::Error);
        assert!(ErrorSeverity::Error > ErrorSeverity::Warning);
        assert_eq!(ErrorSeverity::Warning.to_tracing_level(), Level::WARN);
    }
}
