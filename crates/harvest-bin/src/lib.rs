// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # harvest-bin
//!
//! Command-line collector built on `harvest-opcua`.
//!
//! - CLI argument parsing with clap
//! - Periodic trigger loop around the collection engine
//! - Graceful shutdown on SIGTERM/SIGINT
//! - JSON-lines records on stdout, logs on stderr
//!
//! ## Architecture
//!
//! ```text
//!                 main.rs
//!                    │
//!                 cli.rs
//!                    │
//!        ┌───────────┼───────────┐
//!        ▼           ▼           ▼
//!    commands     runtime     logging
//!                    │
//!          ┌─────────┼─────────┐
//!          ▼         ▼         ▼
//!      shutdown   engine    sink (stdout)
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Collect with ./harvest.yaml (default command)
//! harvest
//!
//! # Custom config, stop after ten triggers
//! harvest -c /etc/harvest/plant.toml run --max-triggers 10
//!
//! # Check a configuration without connecting
//! harvest validate --strict
//!
//! # List what browsing would collect
//! harvest browse --max-level 3 -f json
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;
pub mod sink;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use error::{CliError, CliResult};
pub use logging::init_logging;
pub use runtime::{CollectorRuntime, RuntimeBuilder};
pub use shutdown::ShutdownCoordinator;
pub use sink::JsonLinesSink;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
