// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The engine facade wiring connection, catalog and scheduler together.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::browse::AddressSpaceBrowser;
use crate::catalog::NodeCatalog;
use crate::client::{ConnectionManager, ConnectionStatsSnapshot, OpcUaTransport};
use crate::error::OpcUaResult;
use crate::scheduler::{FetchScheduler, SchedulerStatsSnapshot, TriggerOutcome};
use crate::sink::EventSink;
use crate::subscription::SubscriptionStatsSnapshot;
use crate::types::{CollectionMode, OpcUaConfig};

/// How long shutdown waits for running cycles before closing under them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// =============================================================================
// EngineStats
// =============================================================================

/// Combined engine counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    /// Catalog size.
    pub catalog_nodes: usize,
    /// Connection counters.
    pub connection: ConnectionStatsSnapshot,
    /// Scheduler counters.
    pub scheduler: SchedulerStatsSnapshot,
    /// Current subscription counters, when streaming.
    pub subscription: Option<SubscriptionStatsSnapshot>,
}

// =============================================================================
// CollectionEngine
// =============================================================================

/// A connected, cataloged collection engine.
///
/// ```rust,ignore
/// let engine = CollectionEngine::start(config, transport, sink).await?;
/// loop {
///     interval.tick().await;
///     engine.trigger().await?;
/// }
/// ```
pub struct CollectionEngine {
    connection: Arc<ConnectionManager>,
    catalog: Arc<NodeCatalog>,
    scheduler: FetchScheduler,
}

impl CollectionEngine {
    /// Connects, builds the catalog and, when streaming, subscribes.
    pub async fn start(
        config: OpcUaConfig,
        transport: Arc<dyn OpcUaTransport>,
        sink: Arc<dyn EventSink>,
    ) -> OpcUaResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        info!(
            endpoint = %config.endpoint,
            mode = %config.mode,
            transport = %transport.name(),
            "Starting collection engine"
        );

        let connection = Arc::new(ConnectionManager::new(Arc::clone(&config), transport));
        connection.establish_connection(config.startup_attempts).await?;

        let catalog = match AddressSpaceBrowser::new(Arc::clone(&connection))
            .build_catalog()
            .await
        {
            Ok(catalog) => Arc::new(catalog),
            Err(e) => {
                connection.close().await;
                return Err(e);
            }
        };
        if catalog.is_empty() {
            warn!("Catalog is empty, nothing will be collected");
        }

        let scheduler = FetchScheduler::new(Arc::clone(&connection), Arc::clone(&catalog), sink);
        if let Err(e) = scheduler.start_streaming().await {
            connection.close().await;
            return Err(e);
        }

        info!(nodes = catalog.len(), mode = %config.mode, "Collection engine started");
        Ok(Self {
            connection,
            catalog,
            scheduler,
        })
    }

    /// Runs one collection step; see [`FetchScheduler::trigger`].
    pub async fn trigger(&self) -> OpcUaResult<TriggerOutcome> {
        self.scheduler.trigger().await
    }

    /// The nodes being collected.
    pub fn catalog(&self) -> &NodeCatalog {
        &self.catalog
    }

    /// The collection mode.
    pub fn mode(&self) -> CollectionMode {
        self.scheduler.mode()
    }

    /// Returns `true` while the session is live.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// The connection manager.
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// The scheduler.
    pub fn scheduler(&self) -> &FetchScheduler {
        &self.scheduler
    }

    /// Returns the combined counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            catalog_nodes: self.catalog.len(),
            connection: self.connection.stats().snapshot(),
            scheduler: self.scheduler.stats(),
            subscription: self.scheduler.subscription().map(|s| s.stats()),
        }
    }

    /// Stops collection and closes the connection. Always succeeds.
    ///
    /// Running polling cycles get a grace period; after it the connection is
    /// closed under them and they finish with an error.
    pub async fn shutdown(&self) {
        info!("Shutting down collection engine");
        self.scheduler.stop_streaming().await;

        if tokio::time::timeout(SHUTDOWN_GRACE, self.scheduler.wait_idle())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.scheduler.in_flight(),
                "Collection cycles still running, closing connection under them"
            );
            self.connection.close().await;
            self.scheduler.wait_idle().await;
        }

        self.connection.close().await;
        let stats = self.stats();
        info!(
            records = stats.scheduler.records_emitted,
            triggers = stats.scheduler.triggers,
            reconnects = stats.scheduler.reconnects,
            "Collection engine stopped"
        );
    }
}

impl std::fmt::Debug for CollectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionEngine")
            .field("connection", &self.connection)
            .field("catalog", &self.catalog.len())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
