// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `version` command.

use crate::cli::Cli;
use crate::error::CliResult;

fn enabled(on: bool) -> &'static str {
    if on {
        "enabled"
    } else {
        "disabled"
    }
}

/// Executes the `version` command to display version information.
pub fn version(_cli: &Cli) -> CliResult<()> {
    println!("harvest - OPC UA telemetry collector");
    println!();
    println!("Version Information:");
    println!("  harvest-bin:    {}", crate::VERSION);
    println!("  harvest-opcua:  {}", harvest_opcua::VERSION);
    println!("  harvest-config: {}", harvest_config::VERSION);
    println!();
    println!("Build Information:");
    println!("  Target:         {}", std::env::consts::ARCH);
    println!("  OS:             {}", std::env::consts::OS);
    println!();
    println!("Features:");
    println!("  OPC UA client:  {}", enabled(cfg!(feature = "real-transport")));
    println!();
    println!("License: PolyForm Noncommercial License 1.0.0");
    println!("Copyright (c) 2025 Sylvex. All rights reserved.");

    Ok(())
}
