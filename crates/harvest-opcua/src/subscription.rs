// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Streaming collection.
//!
//! One subscription per engine. A background task maps every data change
//! back to its catalog node and appends a [`ValueSample`] to the
//! [`PendingQueue`], which the scheduler drains on each trigger.
//!
//! ```text
//!   server ──publish──► Notification channel ──► subscription task
//!                                                     │ try_send
//!                                                     ▼
//!   FetchScheduler::trigger ◄──── drain ──────── PendingQueue (bounded)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::NodeCatalog;
use crate::client::{ConnectionManager, Notification, SubscriptionParams};
use crate::collector::ValueSample;
use crate::error::{OpcUaError, OpcUaResult, SubscriptionError};

// =============================================================================
// PendingQueue
// =============================================================================

/// Bounded buffer between the subscription task and the scheduler.
///
/// Appends never block: a sample that does not fit is dropped and counted.
pub struct PendingQueue {
    tx: mpsc::Sender<ValueSample>,
    rx: Mutex<mpsc::Receiver<ValueSample>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl PendingQueue {
    /// Creates a queue holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Appends a sample. Returns `false` if it was dropped.
    pub fn push(&self, sample: ValueSample) -> bool {
        match self.tx.try_send(sample) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Removes everything currently buffered, in arrival order.
    pub fn drain(&self) -> Vec<ValueSample> {
        let mut rx = self.rx.lock();
        let mut samples = Vec::with_capacity(rx.len());
        while let Ok(sample) = rx.try_recv() {
            samples.push(sample);
        }
        samples
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Returns `true` when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for PendingQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("dropped", &self.dropped())
            .finish()
    }
}

// =============================================================================
// SubscriptionStats
// =============================================================================

/// Counters of one subscription.
#[derive(Debug, Default)]
pub struct SubscriptionStats {
    /// Samples appended to the queue.
    pub delivered: AtomicU64,
    /// Samples dropped on a full queue.
    pub dropped: AtomicU64,
    /// Notification errors and unknown handles.
    pub errors: AtomicU64,
}

impl SubscriptionStats {
    /// Returns a point-in-time copy.
    pub fn snapshot(&self) -> SubscriptionStatsSnapshot {
        SubscriptionStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`SubscriptionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionStatsSnapshot {
    /// Samples appended to the queue.
    pub delivered: u64,
    /// Samples dropped on a full queue.
    pub dropped: u64,
    /// Notification errors and unknown handles.
    pub errors: u64,
}

// =============================================================================
// SubscriptionHandle
// =============================================================================

/// A running streaming subscription.
pub struct SubscriptionHandle {
    subscription_id: u32,
    item_count: usize,
    stats: Arc<SubscriptionStats>,
    connection: Arc<ConnectionManager>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionHandle {
    /// Server-assigned subscription id.
    pub fn id(&self) -> u32 {
        self.subscription_id
    }

    /// Number of monitored items registered.
    pub fn item_count(&self) -> usize {
        self.item_count
    }

    /// Returns the counters.
    pub fn stats(&self) -> SubscriptionStatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns `true` while the notification task is running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stops the notification task and deletes the subscription.
    ///
    /// Safe to call more than once.
    pub async fn stop(&self) {
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                debug!(subscription_id = self.subscription_id, error = %e, "Subscription task ended abnormally");
            }
            self.connection.delete_subscription(self.subscription_id).await;

            let stats = self.stats.snapshot();
            info!(
                subscription_id = self.subscription_id,
                delivered = stats.delivered,
                dropped = stats.dropped,
                "Subscription stopped"
            );
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.get_mut().take() {
            let _ = shutdown.send(());
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("subscription_id", &self.subscription_id)
            .field("item_count", &self.item_count)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

// =============================================================================
// StreamingCollector
// =============================================================================

/// Starts the subscription that feeds a [`PendingQueue`].
#[derive(Debug, Clone)]
pub struct StreamingCollector {
    connection: Arc<ConnectionManager>,
    queue: Arc<PendingQueue>,
    params: SubscriptionParams,
}

impl StreamingCollector {
    /// Creates a collector using the connection's subscription settings.
    pub fn new(connection: Arc<ConnectionManager>, queue: Arc<PendingQueue>) -> Self {
        let params = SubscriptionParams::from(&connection.config().subscription);
        Self {
            connection,
            queue,
            params,
        }
    }

    /// Returns the queue this collector fills.
    pub fn queue(&self) -> &Arc<PendingQueue> {
        &self.queue
    }

    /// Creates the subscription, registers every node, and starts the task.
    ///
    /// Each node is monitored under its catalog index. Nodes that cannot be
    /// monitored are logged and skipped.
    pub async fn start(&self, catalog: Arc<NodeCatalog>) -> OpcUaResult<SubscriptionHandle> {
        let (subscription_id, notifications) = self
            .connection
            .create_subscription(&self.params)
            .await
            .map_err(|e| match e {
                OpcUaError::Subscription(_) | OpcUaError::Connection(_) => e,
                other => OpcUaError::subscription(SubscriptionError::creation_failed(
                    other.to_string(),
                )),
            })?;
        info!(
            subscription_id,
            interval = ?self.params.publishing_interval,
            "Subscription created"
        );

        let mut item_count = 0;
        for (index, node) in catalog.iter().enumerate() {
            let handle = index as u32;
            match self.connection.monitor(subscription_id, &node.node_id, handle).await {
                Ok(status) if status.is_good() => {
                    item_count += 1;
                    debug!(node = %node.id, handle, "Monitoring node");
                }
                Ok(status) => {
                    let err = SubscriptionError::monitor_failed(node.id.clone(), status.to_string());
                    warn!(error = %err, "Skipping node");
                }
                Err(e) => {
                    let err = SubscriptionError::monitor_failed(node.id.clone(), e.to_string());
                    warn!(error = %err, "Skipping node");
                }
            }
        }

        let stats = Arc::new(SubscriptionStats::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_notifications(
            notifications,
            shutdown_rx,
            catalog,
            Arc::clone(&self.queue),
            Arc::clone(&stats),
        ));

        info!(subscription_id, items = item_count, "Start listening");
        Ok(SubscriptionHandle {
            subscription_id,
            item_count,
            stats,
            connection: Arc::clone(&self.connection),
            shutdown: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
        })
    }
}

/// Reads notifications until the channel closes or shutdown is signalled.
async fn run_notifications(
    mut notifications: mpsc::Receiver<Notification>,
    mut shutdown: oneshot::Receiver<()>,
    catalog: Arc<NodeCatalog>,
    queue: Arc<PendingQueue>,
    stats: Arc<SubscriptionStats>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            message = notifications.recv() => match message {
                Some(notification) => handle_notification(notification, &catalog, &queue, &stats),
                None => break,
            },
        }
    }
    debug!("Stopped listening");
}

fn handle_notification(
    notification: Notification,
    catalog: &NodeCatalog,
    queue: &PendingQueue,
    stats: &SubscriptionStats,
) {
    match notification {
        Notification::DataChange {
            subscription_id,
            items,
        } => {
            for item in items {
                let Some(node) = catalog.get(item.handle as usize) else {
                    stats.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(subscription_id, handle = item.handle, "Notification for unknown handle");
                    continue;
                };

                if queue.push(ValueSample::new(Arc::clone(node), item.value)) {
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                } else {
                    let dropped = stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped == 1 || dropped % 1000 == 0 {
                        warn!(
                            subscription_id,
                            dropped,
                            capacity = queue.capacity(),
                            "Pending queue full, dropping samples"
                        );
                    }
                }
            }
        }
        Notification::Error {
            subscription_id,
            message,
        } => {
            stats.errors.fetch_add(1, Ordering::Relaxed);
            let err = SubscriptionError::notification(subscription_id, message);
            warn!(error = %err, "Dropping notification");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::catalog::CatalogNode;
    use crate::client::OpcUaTransport;
    use crate::mock::MockTransport;
    use crate::types::{DataValue, NodeConfig, NodeId, OpcUaConfig, StatusCode, ValueType, Variant};

    fn sample(id: &str) -> ValueSample {
        ValueSample::new(
            Arc::new(CatalogNode::new(NodeId::string(2, id))),
            DataValue::good(1.0),
        )
    }

    #[test]
    fn test_pending_queue_drops_when_full() {
        let queue = PendingQueue::new(2);
        assert!(queue.push(sample("A")));
        assert!(queue.push(sample("B")));
        assert!(!queue.push(sample("C")));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].node.id, "ns=2;s=A");
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    async fn setup(queue_capacity: usize) -> (Arc<MockTransport>, StreamingCollector, Arc<NodeCatalog>) {
        let mock = Arc::new(MockTransport::new());
        mock.add_variable(NodeId::string(2, "Temp"), "Temp", ValueType::Float64, 72.5);
        mock.add_variable(NodeId::string(2, "Level"), "Level", ValueType::Int32, 3);

        let config = OpcUaConfig::builder()
            .node(NodeConfig::string(2, "Temp"))
            .build()
            .unwrap();
        let connection = Arc::new(ConnectionManager::new(
            Arc::new(config),
            Arc::clone(&mock) as Arc<dyn OpcUaTransport>,
        ));
        connection.connect().await.unwrap();

        let catalog: NodeCatalog = vec![
            CatalogNode::new(NodeId::string(2, "Temp")),
            CatalogNode::new(NodeId::string(2, "Missing")),
            CatalogNode::new(NodeId::string(2, "Level")),
        ]
        .into_iter()
        .collect();

        let queue = Arc::new(PendingQueue::new(queue_capacity));
        (mock, StreamingCollector::new(connection, queue), Arc::new(catalog))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_start_registers_items_by_index() {
        let (mock, collector, catalog) = setup(16).await;
        let handle = collector.start(catalog).await.unwrap();

        // the unknown node fails registration and is skipped
        assert_eq!(handle.item_count(), 2);
        assert_eq!(mock.monitored_handles(handle.id()), vec![0, 2]);
        assert!(handle.is_running());
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_notifications_reach_queue() {
        let (mock, collector, catalog) = setup(16).await;
        let handle = collector.start(catalog).await.unwrap();

        mock.set_value(&NodeId::string(2, "Temp"), 73.0);
        mock.set_value(&NodeId::string(2, "Level"), 4);
        settle().await;

        let samples = collector.queue().drain();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].node.id, "ns=2;s=Temp");
        assert_eq!(samples[0].value, Variant::Double(73.0));
        assert_eq!(samples[1].node.id, "ns=2;s=Level");
        assert_eq!(handle.stats().delivered, 2);
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_full_queue_counts_drops() {
        let (mock, collector, catalog) = setup(1).await;
        let handle = collector.start(catalog).await.unwrap();

        mock.set_value(&NodeId::string(2, "Temp"), 1.0);
        mock.set_value(&NodeId::string(2, "Temp"), 2.0);
        mock.set_value(&NodeId::string(2, "Temp"), 3.0);
        settle().await;

        let stats = handle.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 2);
        assert_eq!(collector.queue().drain()[0].value, Variant::Double(1.0));
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_notification_errors_are_dropped() {
        let (mock, collector, catalog) = setup(16).await;
        let handle = collector.start(catalog).await.unwrap();

        mock.emit_notification_error(handle.id(), "BadTimeout");
        mock.emit_raw_change(handle.id(), 99, DataValue::bad(StatusCode::BAD_NOT_READABLE));
        settle().await;

        assert!(collector.queue().is_empty());
        assert_eq!(handle.stats().errors, 2);
        assert!(handle.is_running());
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_stop_deletes_subscription() {
        let (mock, collector, catalog) = setup(16).await;
        let handle = collector.start(catalog).await.unwrap();
        let id = handle.id();

        handle.stop().await;
        handle.stop().await;

        assert!(!handle.is_running());
        assert_eq!(mock.deleted_subscriptions(), vec![id]);
    }

    #[tokio::test]
    async fn test_start_fails_when_disconnected() {
        let (_mock, collector, catalog) = setup(16).await;
        collector.connection.close().await;
        assert!(collector.start(catalog).await.is_err());
    }
}
