// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Session ownership and lifecycle.
//!
//! The [`ConnectionManager`] is the only owner of the protocol session. It
//! handles endpoint selection, authentication, idempotent connect, bounded
//! retry and teardown. It also serializes every non-subscription round trip
//! so the session never sees two concurrent requests.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::client::transport::{
    ConnectOptions, ConnectTarget, EndpointDescriptor, Identity, Notification, OpcUaTransport,
    SubscriptionParams,
};
use crate::error::{ConnectionError, OpcUaError, OpcUaResult};
use crate::types::{AttributeId, DataValue, NodeId, OpcUaConfig, StatusCode};

// =============================================================================
// ConnectionState
// =============================================================================

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No live session.
    Disconnected,
    /// A session is live.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

// =============================================================================
// ConnectionStats
// =============================================================================

/// Connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Connect attempts that performed a handshake.
    pub connect_attempts: AtomicU64,
    /// Successful handshakes.
    pub connects: AtomicU64,
    /// Close calls that tore down a live session.
    pub closes: AtomicU64,
}

impl ConnectionStats {
    /// Returns a point-in-time copy.
    pub fn snapshot(&self) -> ConnectionStatsSnapshot {
        ConnectionStatsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`ConnectionStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionStatsSnapshot {
    /// Connect attempts that performed a handshake.
    pub connect_attempts: u64,
    /// Successful handshakes.
    pub connects: u64,
    /// Close calls that tore down a live session.
    pub closes: u64,
}

// =============================================================================
// ConnectionManager
// =============================================================================

/// Owns the single session to the configured endpoint.
pub struct ConnectionManager {
    config: Arc<OpcUaConfig>,
    transport: Arc<dyn OpcUaTransport>,
    connected: AtomicBool,
    /// Serializes connect so concurrent callers never handshake twice.
    connect_lock: Mutex<()>,
    /// Serializes session round trips.
    call_lock: Mutex<()>,
    subscription: SyncMutex<Option<u32>>,
    stats: ConnectionStats,
}

impl ConnectionManager {
    /// Creates a disconnected manager.
    pub fn new(config: Arc<OpcUaConfig>, transport: Arc<dyn OpcUaTransport>) -> Self {
        Self {
            config,
            transport,
            connected: AtomicBool::new(false),
            connect_lock: Mutex::new(()),
            call_lock: Mutex::new(()),
            subscription: SyncMutex::new(None),
            stats: ConnectionStats::default(),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &OpcUaConfig {
        &self.config
    }

    /// Returns the connection counters.
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Returns `true` while the session is considered live.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    // =========================================================================
    // Connect
    // =========================================================================

    /// Connects if not already connected.
    ///
    /// Returns `Ok(true)` when a new session was established and `Ok(false)`
    /// when one was already live.
    pub async fn connect(&self) -> OpcUaResult<bool> {
        if self.is_connected() {
            return Ok(false);
        }
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return Ok(false);
        }

        self.stats.connect_attempts.fetch_add(1, Ordering::Relaxed);
        let endpoint_url = &self.config.endpoint;

        info!(endpoint = %endpoint_url, "Fetching advertised endpoints");
        let endpoints = match self.transport.get_endpoints(endpoint_url).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                e.log("get_endpoints");
                Vec::new()
            }
        };

        let target = self.select_target(&endpoints);
        let options = self.connect_options(target.endpoint.is_some());

        self.transport.connect(&target, &options).await?;
        self.connected.store(true, Ordering::Release);
        self.stats.connects.fetch_add(1, Ordering::Relaxed);

        info!(
            endpoint = %target.url,
            secured = target.endpoint.is_some(),
            "Connection established"
        );
        Ok(true)
    }

    /// Picks the advertised endpoint matching policy and mode, or the raw address.
    fn select_target(&self, endpoints: &[EndpointDescriptor]) -> ConnectTarget {
        let policy = self.config.security_policy;
        let mode = self.config.security_mode;

        match endpoints.iter().find(|e| e.matches(policy, mode)) {
            Some(endpoint) => {
                info!(
                    policy = %endpoint.security_policy_uri,
                    mode = %endpoint.security_mode,
                    url = %endpoint.url,
                    "Selected endpoint"
                );
                ConnectTarget::endpoint(endpoint.clone())
            }
            None => {
                warn!(
                    policy = %policy,
                    mode = %mode,
                    "No suitable endpoint found, falling back to the configured address without security"
                );
                for endpoint in endpoints {
                    warn!(
                        url = %endpoint.url,
                        mode = %endpoint.security_mode,
                        policy = %endpoint.security_policy_uri,
                        "Advertised endpoint"
                    );
                }
                ConnectTarget::fallback(self.config.endpoint.clone())
            }
        }
    }

    /// Builds connect options; identity only when an endpoint matched.
    fn connect_options(&self, endpoint_matched: bool) -> ConnectOptions {
        let mut options = ConnectOptions::from_config(&self.config);
        if endpoint_matched {
            options.identity = Some(match &self.config.username {
                Some(username) => {
                    info!(user = %username, "Using username authentication");
                    Identity::UserName {
                        username: username.clone(),
                        password: self.config.password.clone().unwrap_or_default(),
                    }
                }
                None => {
                    info!("Using anonymous login");
                    Identity::Anonymous
                }
            });
        }
        options
    }

    /// Calls [`connect`](Self::connect) up to `max_attempts` times.
    ///
    /// Waits `retry_delay` after every failed attempt.
    pub async fn establish_connection(&self, max_attempts: u32) -> OpcUaResult<()> {
        let attempts = max_attempts.max(1);
        let mut last: Option<OpcUaError> = None;

        for attempt in 1..=attempts {
            match self.connect().await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(attempt, max_attempts = attempts, error = %e, "Connect attempt failed");
                    last = Some(e);
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }

        let last = last.map(|e| e.to_string()).unwrap_or_default();
        error!(
            endpoint = %self.config.endpoint,
            attempts,
            "Tried to connect to OPC UA server without success"
        );
        Err(OpcUaError::connection(ConnectionError::retries_exhausted(
            self.config.endpoint.clone(),
            attempts,
            last,
        )))
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Tears the session down. Never fails and is safe to call repeatedly.
    ///
    /// The disconnected state is published before any teardown so concurrent
    /// readers stop using the session immediately. Does not wait for in-flight
    /// calls; those fail on the closed session.
    pub async fn close(&self) {
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        debug!(was_connected, "Closing connection");

        let subscription = self.subscription.lock().take();
        if let Some(id) = subscription {
            if let Err(e) = self.transport.delete_subscription(id).await {
                debug!(subscription_id = id, error = %e, "Subscription already gone");
            }
        }

        if let Err(e) = self.transport.close().await {
            debug!(error = %e, "Session was already closed or invalidated");
        }

        if was_connected {
            self.stats.closes.fetch_add(1, Ordering::Relaxed);
            info!(endpoint = %self.config.endpoint, "Connection closed");
        }
    }

    // =========================================================================
    // Session calls
    // =========================================================================

    fn ensure_connected(&self) -> OpcUaResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(OpcUaError::not_connected())
        }
    }

    /// Lists the hierarchical children of a node.
    pub async fn browse_children(&self, node: &NodeId) -> OpcUaResult<Vec<NodeId>> {
        self.ensure_connected()?;
        let _guard = self.call_lock.lock().await;
        self.ensure_connected()?;
        self.transport.browse_children(node).await
    }

    /// Reads several attributes of one node in one request.
    pub async fn read_attributes(
        &self,
        node: &NodeId,
        attributes: &[AttributeId],
    ) -> OpcUaResult<Vec<DataValue>> {
        self.ensure_connected()?;
        let _guard = self.call_lock.lock().await;
        self.ensure_connected()?;
        self.transport.read_attributes(node, attributes).await
    }

    /// Batched read of the Value attribute.
    pub async fn read_values(&self, nodes: &[NodeId]) -> OpcUaResult<Vec<DataValue>> {
        self.ensure_connected()?;
        let _guard = self.call_lock.lock().await;
        self.ensure_connected()?;
        self.transport.read_values(nodes, self.config.max_age).await
    }

    /// Creates the engine's subscription and remembers it for teardown.
    pub async fn create_subscription(
        &self,
        params: &SubscriptionParams,
    ) -> OpcUaResult<(u32, mpsc::Receiver<Notification>)> {
        self.ensure_connected()?;
        let _guard = self.call_lock.lock().await;
        self.ensure_connected()?;
        let (id, rx) = self.transport.create_subscription(params).await?;
        *self.subscription.lock() = Some(id);
        Ok((id, rx))
    }

    /// Registers one monitored item.
    pub async fn monitor(&self, subscription_id: u32, node: &NodeId, handle: u32) -> OpcUaResult<StatusCode> {
        self.ensure_connected()?;
        let _guard = self.call_lock.lock().await;
        self.transport.monitor(subscription_id, node, handle).await
    }

    /// Deletes the engine's subscription if it is still the current one.
    pub async fn delete_subscription(&self, subscription_id: u32) {
        let current = {
            let mut slot = self.subscription.lock();
            if *slot == Some(subscription_id) {
                slot.take()
            } else {
                None
            }
        };
        if current.is_none() || !self.is_connected() {
            return;
        }
        let _guard = self.call_lock.lock().await;
        if let Err(e) = self.transport.delete_subscription(subscription_id).await {
            debug!(subscription_id, error = %e, "Failed to delete subscription");
        }
    }

    /// Waits up to `timeout` for in-flight session calls to finish.
    pub async fn quiesce(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.call_lock.lock()).await.is_ok()
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.config.endpoint)
            .field("transport", &self.transport.name())
            .field("state", &self.state())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
