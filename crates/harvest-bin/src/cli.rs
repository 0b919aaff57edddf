// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `run`: Connect and collect until stopped (default)
//! - `validate`: Validate the configuration file
//! - `browse`: Print the catalog the browser discovers
//! - `version`: Show version information

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use harvest_config::LoggingSettings;

// =============================================================================
// Main CLI Structure
// =============================================================================

/// harvest - OPC UA telemetry collector
///
/// Connects to an OPC UA server, collects the configured (or discovered)
/// nodes by polling or subscription and writes one JSON record per value to
/// stdout.
#[derive(Parser, Debug)]
#[command(
    name = "harvest",
    author = "Sylvex <contact@sylvex.io>",
    version = crate::VERSION,
    about = "OPC UA telemetry collector",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "harvest.yaml",
        env = "HARVEST_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, env = "HARVEST_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "HARVEST_LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Connect and collect until stopped
    ///
    /// This is the default command when no subcommand is specified.
    Run(RunArgs),

    /// Validate the configuration file
    ///
    /// Parses and validates the configuration without connecting.
    Validate(ValidateArgs),

    /// Browse the server address space and print the catalog
    Browse(BrowseArgs),

    /// Show detailed version information
    Version,
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for the `run` command.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Stop after this many triggers
    #[arg(long)]
    pub max_triggers: Option<u64>,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Default, Clone)]
pub struct ValidateArgs {
    /// Show parsed configuration after validation
    #[arg(short, long)]
    pub show_config: bool,

    /// Output format for validation results
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,

    /// Strict mode: treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for the `browse` command.
#[derive(Args, Debug, Default, Clone)]
pub struct BrowseArgs {
    /// Maximum depth below each root (0 = unlimited)
    #[arg(long)]
    pub max_level: Option<usize>,

    /// Maximum children visited per node (0 = unlimited)
    #[arg(long)]
    pub max_per_parent: Option<usize>,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable multi-line format
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// JSON format for structured logging
    Json,
}

impl From<harvest_config::LogFormat> for LogFormat {
    fn from(format: harvest_config::LogFormat) -> Self {
        match format {
            harvest_config::LogFormat::Pretty => LogFormat::Pretty,
            harvest_config::LogFormat::Compact => LogFormat::Compact,
            harvest_config::LogFormat::Json => LogFormat::Json,
        }
    }
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for programmatic parsing
    Json,
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective command, defaulting to `Run` if none specified.
    pub fn effective_command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }

    /// The log level: flags first, then the config file.
    pub fn effective_log_level(&self, settings: &LoggingSettings) -> String {
        if self.quiet {
            "warn".to_string()
        } else if self.verbose {
            "debug".to_string()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| settings.level.as_str().to_string())
        }
    }

    /// The log format: flag first, then the config file.
    pub fn effective_log_format(&self, settings: &LoggingSettings) -> LogFormat {
        self.log_format.unwrap_or_else(|| settings.format.into())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command() {
        let cli = Cli::parse_from(["harvest"]);
        assert!(cli.command.is_none());
        assert!(matches!(cli.effective_command(), Commands::Run(_)));
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from(["harvest", "run", "--max-triggers", "3"]);
        match cli.command {
            Some(Commands::Run(args)) => assert_eq!(args.max_triggers, Some(3)),
            other => panic!("Expected Run command, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_command() {
        let cli = Cli::parse_from(["harvest", "validate", "--show-config", "-f", "json"]);
        if let Some(Commands::Validate(args)) = cli.command {
            assert!(args.show_config);
            assert_eq!(args.format, OutputFormat::Json);
        } else {
            panic!("Expected Validate command");
        }
    }

    #[test]
    fn test_browse_command() {
        let cli = Cli::parse_from(["harvest", "browse", "--max-level", "2"]);
        if let Some(Commands::Browse(args)) = cli.command {
            assert_eq!(args.max_level, Some(2));
            assert_eq!(args.max_per_parent, None);
        } else {
            panic!("Expected Browse command");
        }
    }

    #[test]
    fn test_config_path() {
        let cli = Cli::parse_from(["harvest", "-c", "/etc/harvest/plant.toml", "validate"]);
        assert_eq!(cli.config, PathBuf::from("/etc/harvest/plant.toml"));
    }

    #[test]
    fn test_log_level_precedence() {
        let settings = LoggingSettings {
            level: harvest_config::LogLevel::Error,
            format: harvest_config::LogFormat::Json,
        };

        let cli = Cli::parse_from(["harvest", "-l", "trace"]);
        assert_eq!(cli.effective_log_level(&settings), "trace");

        let cli = Cli::parse_from(["harvest", "-v"]);
        assert_eq!(cli.effective_log_level(&settings), "debug");

        let cli = Cli::parse_from(["harvest", "-q", "-l", "trace"]);
        assert_eq!(cli.effective_log_level(&settings), "warn");

        let cli = Cli::parse_from(["harvest", "--log-format", "compact"]);
        assert_eq!(cli.effective_log_format(&settings), LogFormat::Compact);
    }
}
