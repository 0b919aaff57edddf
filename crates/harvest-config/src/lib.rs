// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # harvest-config
//!
//! Configuration for the harvest OPC UA collector.
//!
//! ## Features
//!
//! - **Multi-Format Support**: YAML, TOML and JSON, detected by extension
//! - **Placeholders**: `${VAR}` and `${VAR:default}` resolved before parsing
//! - **Environment Overrides**: `HARVEST_*` variables win over file values
//! - **Validation**: collector and engine settings checked before use
//!
//! ## Quick Start
//!
//! ```no_run
//! use harvest_config::load_config;
//!
//! let config = load_config("harvest.yaml").unwrap();
//! println!("Endpoint: {}", config.opcua.endpoint);
//! println!("Period: {:?}", config.collector.period);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod error;
pub mod loader;
pub mod schema;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, load_config_str, ConfigFormat, ConfigLoader};
pub use schema::{CollectorSettings, HarvestConfig, LogFormat, LogLevel, LoggingSettings};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
