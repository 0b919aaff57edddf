// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Collector runtime: engine startup, the periodic trigger loop and shutdown.

use std::path::Path;
use std::sync::Arc;

use harvest_config::{ConfigLoader, HarvestConfig};
use harvest_opcua::{CollectionEngine, EventSink, OpcUaTransport, TriggerOutcome};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::{CliError, CliResult};
use crate::shutdown::ShutdownCoordinator;

// =============================================================================
// CollectorRuntime
// =============================================================================

/// Runs one collection engine until shutdown.
pub struct CollectorRuntime {
    config: HarvestConfig,
    shutdown: ShutdownCoordinator,
    max_triggers: Option<u64>,
}

impl CollectorRuntime {
    /// Creates a runtime for a validated configuration.
    pub fn new(config: HarvestConfig) -> Self {
        Self {
            config,
            shutdown: ShutdownCoordinator::new(),
            max_triggers: None,
        }
    }

    /// Stops after `max` triggers.
    pub fn with_max_triggers(mut self, max: Option<u64>) -> Self {
        self.max_triggers = max;
        self
    }

    /// The shutdown coordinator driving this runtime.
    pub fn shutdown(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Starts the engine and triggers it every `collector.period`.
    ///
    /// Returns when shutdown is requested, after `max_triggers`, or with an
    /// error when the engine gives up reconnecting.
    pub async fn run(
        self,
        transport: Arc<dyn OpcUaTransport>,
        sink: Arc<dyn EventSink>,
    ) -> CliResult<()> {
        info!(
            version = crate::VERSION,
            endpoint = %self.config.opcua.endpoint,
            period = ?self.config.collector.period,
            sink = sink.name(),
            "Starting harvest collector"
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        if self.shutdown.is_shutdown_initiated() {
            return Ok(());
        }

        let engine = CollectionEngine::start(self.config.opcua.clone(), transport, sink).await?;
        let result = self.trigger_loop(&engine, &mut shutdown_rx).await;
        engine.shutdown().await;

        let stats = engine.stats();
        info!(
            records = stats.scheduler.records_emitted,
            skipped = stats.scheduler.skipped,
            failed = stats.scheduler.failed,
            reconnects = stats.scheduler.reconnects,
            "Harvest collector stopped"
        );
        result
    }

    async fn trigger_loop(
        &self,
        engine: &CollectionEngine,
        shutdown_rx: &mut tokio::sync::broadcast::Receiver<()>,
    ) -> CliResult<()> {
        let mut interval = tokio::time::interval(self.config.collector.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut triggers = 0u64;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Stopping trigger loop");
                    return Ok(());
                }
                _ = interval.tick() => {}
            }

            match engine.trigger().await {
                Ok(TriggerOutcome::Drained(count)) => debug!(records = count, "Queue drained"),
                Ok(outcome) => debug!(?outcome, "Triggered"),
                Err(e) => {
                    error!(error = %e, "Giving up after failed reconnect");
                    return Err(CliError::from(e).with_context("collection stopped"));
                }
            }

            triggers += 1;
            if self.max_triggers.is_some_and(|max| triggers >= max) {
                info!(triggers, "Trigger limit reached");
                return Ok(());
            }
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builds a [`CollectorRuntime`] from a file or a configuration value.
#[derive(Default)]
pub struct RuntimeBuilder {
    config_path: Option<std::path::PathBuf>,
    config: Option<HarvestConfig>,
    max_triggers: Option<u64>,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration file path.
    pub fn config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the configuration directly.
    pub fn config(mut self, config: HarvestConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Stops after `max` triggers.
    pub fn max_triggers(mut self, max: Option<u64>) -> Self {
        self.max_triggers = max;
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> CliResult<CollectorRuntime> {
        let config = match self.config {
            Some(config) => config,
            None => {
                let path = self
                    .config_path
                    .ok_or_else(|| CliError::config("No configuration provided"))?;
                ConfigLoader::new().load(&path)?
            }
        };
        Ok(CollectorRuntime::new(config).with_max_triggers(self.max_triggers))
    }
}

/// The transport this binary was built with.
pub fn default_transport() -> CliResult<Arc<dyn OpcUaTransport>> {
    #[cfg(feature = "real-transport")]
    {
        Ok(Arc::new(harvest_opcua::OpcUaClientTransport::new()))
    }
    #[cfg(not(feature = "real-transport"))]
    {
        Err(CliError::config(
            "harvest was built without the real-transport feature",
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================
