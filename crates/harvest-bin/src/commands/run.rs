// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `run` command.

use std::sync::Arc;

use harvest_config::load_config;
use tracing::info;

use crate::cli::{Cli, RunArgs};
use crate::error::CliResult;
use crate::logging::init_logging;
use crate::runtime::{default_transport, RuntimeBuilder};
use crate::sink::JsonLinesSink;

/// Executes the `run` command: collect until a signal or the trigger limit.
pub async fn run(cli: &Cli, args: RunArgs) -> CliResult<()> {
    let config = load_config(&cli.config)?;
    init_logging(
        &cli.effective_log_level(&config.logging),
        cli.effective_log_format(&config.logging),
    );
    info!(config = %cli.config.display(), "Configuration loaded");

    let runtime = RuntimeBuilder::new()
        .config(config)
        .max_triggers(args.max_triggers)
        .build()?;

    let listener = runtime.shutdown().clone();
    let signals = tokio::spawn(async move { listener.wait_for_signal().await });

    let result = runtime
        .run(default_transport()?, Arc::new(JsonLinesSink::stdout()))
        .await;
    signals.abort();
    result
}
