// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.
//!
//! - `run`: Connect and collect until stopped
//! - `validate`: Validate the configuration file
//! - `browse`: Print the discovered catalog
//! - `version`: Show version information

mod browse;
mod run;
mod validate;
mod version;

pub use browse::{browse, discover, render_catalog};
pub use run::run;
pub use validate::{validate, validation_warnings};
pub use version::version;

use crate::cli::{Cli, Commands};
use crate::error::CliResult;

/// Executes the appropriate command based on CLI arguments.
pub async fn execute(cli: Cli) -> CliResult<()> {
    match cli.effective_command() {
        Commands::Run(args) => run::run(&cli, args).await,
        Commands::Validate(args) => validate::validate(&cli, args),
        Commands::Browse(args) => browse::browse(&cli, args).await,
        Commands::Version => version::version(&cli),
    }
}
