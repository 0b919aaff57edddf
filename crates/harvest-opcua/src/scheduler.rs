// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Trigger handling, concurrency bound, stall detection and reconnection.
//!
//! The host calls [`FetchScheduler::trigger`] on its own schedule, possibly
//! overlapping. Each trigger does one of four things:
//!
//! ```text
//!                  ┌─ not connected ──► backoff, establish_connection ──► Reconnected
//!                  │                     (streaming: fresh subscription)
//!   trigger() ─────┼─ streaming ───────► drain queue, format, publish ───► Drained(n)
//!                  │
//!                  └─ polling ─┬─ permit ──► spawn collect/format/publish ► Launched
//!                              └─ no permit ─► backpressure warning ─────► Skipped
//! ```
//!
//! Every formatted batch is fed to the [`StallWatchdog`]; an exhausted
//! budget force-closes the connection so the next trigger reconnects.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use crate::catalog::NodeCatalog;
use crate::client::ConnectionManager;
use crate::collector::{PollingCollector, ValueSample};
use crate::error::OpcUaResult;
use crate::formatter::EventFormatter;
use crate::sink::EventSink;
use crate::subscription::{PendingQueue, StreamingCollector, SubscriptionHandle};
use crate::types::CollectionMode;

// =============================================================================
// TriggerOutcome
// =============================================================================

/// What a trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Streaming: this many samples were drained and published.
    Drained(usize),
    /// Polling: a collection cycle was started.
    Launched,
    /// Polling: every permit was taken, the trigger was dropped.
    Skipped,
    /// The connection was re-established; nothing was collected.
    Reconnected,
}

// =============================================================================
// StallWatchdog
// =============================================================================

/// Counts consecutive empty batches.
#[derive(Debug)]
pub struct StallWatchdog {
    budget: u32,
    remaining: AtomicU32,
}

impl StallWatchdog {
    /// Creates a watchdog tolerating `budget - 1` consecutive empty batches.
    pub fn new(budget: u32) -> Self {
        let budget = budget.max(1);
        Self {
            budget,
            remaining: AtomicU32::new(budget),
        }
    }

    /// Records a batch of `samples` samples.
    ///
    /// Returns `true` on the batch that exhausts the budget. The counter is
    /// not re-armed automatically; see [`rearm`](Self::rearm).
    pub fn record(&self, samples: usize) -> bool {
        if samples > 0 {
            self.rearm();
            return false;
        }
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        previous == 1
    }

    /// Resets the counter to the full budget.
    pub fn rearm(&self) {
        self.remaining.store(self.budget, Ordering::Release);
    }

    /// Empty batches left before a stall is declared.
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Configured budget.
    pub fn budget(&self) -> u32 {
        self.budget
    }
}

// =============================================================================
// SchedulerStats
// =============================================================================

/// Scheduler counters.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Trigger calls.
    pub triggers: AtomicU64,
    /// Polling triggers dropped for lack of a permit.
    pub skipped: AtomicU64,
    /// Polling cycles started.
    pub launched: AtomicU64,
    /// Polling cycles that ended in a batch error.
    pub failed: AtomicU64,
    /// Successful reconnects.
    pub reconnects: AtomicU64,
    /// Stalls detected.
    pub stalls: AtomicU64,
    /// Records accepted by the sink.
    pub records_emitted: AtomicU64,
    /// Records rejected by the sink.
    pub sink_errors: AtomicU64,
}

impl SchedulerStats {
    /// Returns a point-in-time copy.
    pub fn snapshot(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            triggers: self.triggers.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            launched: self.launched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`SchedulerStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStatsSnapshot {
    /// Trigger calls.
    pub triggers: u64,
    /// Polling triggers dropped for lack of a permit.
    pub skipped: u64,
    /// Polling cycles started.
    pub launched: u64,
    /// Polling cycles that ended in a batch error.
    pub failed: u64,
    /// Successful reconnects.
    pub reconnects: u64,
    /// Stalls detected.
    pub stalls: u64,
    /// Records accepted by the sink.
    pub records_emitted: u64,
    /// Records rejected by the sink.
    pub sink_errors: u64,
}

// =============================================================================
// Shared state
// =============================================================================

/// State reachable from spawned polling cycles.
struct Shared {
    connection: Arc<ConnectionManager>,
    catalog: Arc<NodeCatalog>,
    formatter: EventFormatter,
    sink: Arc<dyn EventSink>,
    watchdog: StallWatchdog,
    stats: SchedulerStats,
    running: AtomicUsize,
}

/// Counts one polling cycle as running until dropped.
struct RunningCycle(Arc<Shared>);

impl RunningCycle {
    fn start(shared: Arc<Shared>) -> Self {
        shared.running.fetch_add(1, Ordering::AcqRel);
        Self(shared)
    }
}

impl Drop for RunningCycle {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Shared {
    /// Formats and publishes a batch, then feeds the watchdog.
    async fn emit(&self, samples: Vec<ValueSample>) -> usize {
        let records = self.formatter.format(&samples);
        let count = records.len();

        for record in records {
            match self.sink.publish(record).await {
                Ok(()) => {
                    self.stats.records_emitted.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.sink_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(sink = self.sink.name(), error = %e, "Failed to publish record");
                }
            }
        }

        if self.watchdog.record(count) {
            self.stats.stalls.fetch_add(1, Ordering::Relaxed);
            warn!(
                budget = self.watchdog.budget(),
                "No data received for too many cycles, forcing reconnect"
            );
            self.connection.close().await;
            self.watchdog.rearm();
        }
        count
    }

    async fn poll_cycle(&self, collector: &PollingCollector) {
        debug!("Collection cycle started");
        match collector.collect(&self.catalog).await {
            Ok(samples) => {
                let count = self.emit(samples).await;
                debug!(records = count, "Collection cycle finished");
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                e.log("poll_cycle");
                self.connection.close().await;
            }
        }
    }
}

enum Collection {
    Polling {
        collector: PollingCollector,
        permits: Arc<Semaphore>,
        max_cycles: usize,
    },
    Streaming {
        collector: StreamingCollector,
        subscription: SyncMutex<Option<Arc<SubscriptionHandle>>>,
    },
}

// =============================================================================
// FetchScheduler
// =============================================================================

/// Drives collection on each trigger.
pub struct FetchScheduler {
    shared: Arc<Shared>,
    collection: Collection,
    reconnect_lock: Mutex<()>,
    reconnect_backoff: Duration,
    retry_on_error: u32,
}

impl FetchScheduler {
    /// Creates a scheduler for the connection's configured mode.
    ///
    /// Streaming mode does not subscribe until
    /// [`start_streaming`](Self::start_streaming) is called.
    pub fn new(
        connection: Arc<ConnectionManager>,
        catalog: Arc<NodeCatalog>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let config = connection.config();
        let formatter = EventFormatter::new(config.endpoint.clone(), config.output.clone());
        let watchdog = StallWatchdog::new(config.stall_budget);
        let reconnect_backoff = config.reconnect_backoff;
        let retry_on_error = config.retry_on_error;

        let collection = match config.mode {
            CollectionMode::Polling => Collection::Polling {
                collector: PollingCollector::new(Arc::clone(&connection)),
                permits: Arc::new(Semaphore::new(config.max_concurrent_cycles)),
                max_cycles: config.max_concurrent_cycles,
            },
            CollectionMode::Streaming => {
                let queue = Arc::new(PendingQueue::new(config.subscription.queue_capacity));
                Collection::Streaming {
                    collector: StreamingCollector::new(Arc::clone(&connection), queue),
                    subscription: SyncMutex::new(None),
                }
            }
        };

        Self {
            shared: Arc::new(Shared {
                connection,
                catalog,
                formatter,
                sink,
                watchdog,
                stats: SchedulerStats::default(),
                running: AtomicUsize::new(0),
            }),
            collection,
            reconnect_lock: Mutex::new(()),
            reconnect_backoff,
            retry_on_error,
        }
    }

    /// Returns the collection mode.
    pub fn mode(&self) -> CollectionMode {
        match self.collection {
            Collection::Polling { .. } => CollectionMode::Polling,
            Collection::Streaming { .. } => CollectionMode::Streaming,
        }
    }

    /// Returns the counters.
    pub fn stats(&self) -> SchedulerStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Returns the stall watchdog.
    pub fn watchdog(&self) -> &StallWatchdog {
        &self.shared.watchdog
    }

    /// Returns the current subscription, if streaming.
    pub fn subscription(&self) -> Option<Arc<SubscriptionHandle>> {
        match &self.collection {
            Collection::Streaming { subscription, .. } => subscription.lock().clone(),
            Collection::Polling { .. } => None,
        }
    }

    /// Returns the pending queue, if streaming.
    pub fn pending_queue(&self) -> Option<&Arc<PendingQueue>> {
        match &self.collection {
            Collection::Streaming { collector, .. } => Some(collector.queue()),
            Collection::Polling { .. } => None,
        }
    }

    /// Polling cycles currently running.
    ///
    /// Counted apart from the permit pool, which [`wait_idle`](Self::wait_idle)
    /// drains while it waits.
    pub fn in_flight(&self) -> usize {
        self.shared.running.load(Ordering::Acquire)
    }

    // =========================================================================
    // Trigger
    // =========================================================================

    /// Runs one collection step.
    ///
    /// Returns an error only when the reconnect budget is exhausted.
    pub async fn trigger(&self) -> OpcUaResult<TriggerOutcome> {
        self.shared.stats.triggers.fetch_add(1, Ordering::Relaxed);

        if !self.shared.connection.is_connected() {
            self.reconnect().await?;
            return Ok(TriggerOutcome::Reconnected);
        }

        match &self.collection {
            Collection::Streaming { collector, .. } => {
                let samples = collector.queue().drain();
                let count = self.shared.emit(samples).await;
                Ok(TriggerOutcome::Drained(count))
            }
            Collection::Polling {
                collector, permits, ..
            } => {
                let permit = match Arc::clone(permits).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        self.shared.stats.skipped.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            "Max concurrent cycles reached. The server takes too long to answer; \
                             consider increasing max_concurrent_cycles or the collection period"
                        );
                        return Ok(TriggerOutcome::Skipped);
                    }
                };

                self.shared.stats.launched.fetch_add(1, Ordering::Relaxed);
                let running = RunningCycle::start(Arc::clone(&self.shared));
                let collector = collector.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    running.0.poll_cycle(&collector).await;
                    drop(running);
                });
                Ok(TriggerOutcome::Launched)
            }
        }
    }

    /// Waits out the backoff, reconnects and, when streaming, resubscribes.
    async fn reconnect(&self) -> OpcUaResult<()> {
        let _guard = self.reconnect_lock.lock().await;
        if self.shared.connection.is_connected() {
            return Ok(());
        }

        info!(backoff = ?self.reconnect_backoff, "Waiting before reconnect");
        tokio::time::sleep(self.reconnect_backoff).await;

        if let Err(e) = self
            .shared
            .connection
            .establish_connection(self.retry_on_error)
            .await
        {
            error!(error = %e, "Reconnect was not successful");
            return Err(e);
        }
        self.shared.stats.reconnects.fetch_add(1, Ordering::Relaxed);
        self.shared.watchdog.rearm();
        info!("Reconnected");

        if matches!(self.collection, Collection::Streaming { .. }) {
            if let Err(e) = self.start_streaming().await {
                e.log("resubscribe");
                self.shared.connection.close().await;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Streaming lifecycle
    // =========================================================================

    /// Starts a fresh subscription, replacing any previous one.
    ///
    /// Does nothing in polling mode.
    pub async fn start_streaming(&self) -> OpcUaResult<()> {
        let Collection::Streaming {
            collector,
            subscription,
        } = &self.collection
        else {
            return Ok(());
        };

        let previous = subscription.lock().take();
        if let Some(previous) = previous {
            previous.stop().await;
        }

        let handle = collector.start(Arc::clone(&self.shared.catalog)).await?;
        *subscription.lock() = Some(Arc::new(handle));
        Ok(())
    }

    /// Stops the subscription, if any.
    pub async fn stop_streaming(&self) {
        if let Collection::Streaming { subscription, .. } = &self.collection {
            let current = subscription.lock().take();
            if let Some(handle) = current {
                handle.stop().await;
            }
        }
    }

    /// Waits until no polling cycle is running.
    pub async fn wait_idle(&self) {
        if let Collection::Polling {
            permits, max_cycles, ..
        } = &self.collection
        {
            let all = u32::try_from(*max_cycles).unwrap_or(u32::MAX);
            match permits.acquire_many(all).await {
                Ok(permits) => drop(permits),
                Err(e) => debug!(error = %e, "Permit pool closed"),
            }
        }
    }
}

impl fmt::Debug for FetchScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchScheduler")
            .field("mode", &self.mode())
            .field("catalog", &self.shared.catalog.len())
            .field("stats", &self.stats())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
