// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-memory transport for tests.
//!
//! [`MockTransport`] holds a small address space of folders and variables,
//! advertises endpoints, runs subscriptions over real channels and can be
//! told to fail at most steps. Every session gets a generation number; a
//! call that started on a session which has since been closed fails with a
//! "not connected" error instead of returning stale data.
//!
//! Monitoring a node does not push an initial value. Changes are pushed by
//! [`set_value`](MockTransport::set_value) and
//! [`set_data_value`](MockTransport::set_data_value).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::client::{
    ConnectOptions, ConnectTarget, EndpointDescriptor, ItemChange, Notification, OpcUaTransport,
    SubscriptionParams,
};
use crate::error::{BrowseError, ConnectionError, OpcUaError, OpcUaResult, SubscriptionError};
use crate::types::{AttributeId, DataValue, NodeId, StatusCode, ValueType, Variant};

// =============================================================================
// Address space
// =============================================================================

#[derive(Debug, Clone)]
struct MockNode {
    browse_name: String,
    display_name: String,
    value_type: Option<ValueType>,
    value: DataValue,
    children: Vec<NodeId>,
}

impl MockNode {
    fn attribute(&self, attribute: AttributeId) -> DataValue {
        match attribute {
            AttributeId::BrowseName => DataValue::good(self.browse_name.as_str()),
            AttributeId::DisplayName => DataValue::good(self.display_name.as_str()),
            AttributeId::DataType => match self.value_type.and_then(data_type_id) {
                Some(id) => DataValue::good(Variant::NodeId(NodeId::numeric(0, id))),
                // variables of non-scalar types still have a DataType
                None if self.value_type.is_some() => {
                    DataValue::good(Variant::NodeId(NodeId::numeric(0, 22)))
                }
                None => DataValue::bad(StatusCode::BAD_ATTRIBUTE_ID_INVALID),
            },
            AttributeId::Value => match self.value_type {
                Some(_) => self.value.clone(),
                None => DataValue::bad(StatusCode::BAD_ATTRIBUTE_ID_INVALID),
            },
        }
    }
}

fn data_type_id(value_type: ValueType) -> Option<u32> {
    Some(match value_type {
        ValueType::Bool => 1,
        ValueType::Int8 => 2,
        ValueType::Byte => 3,
        ValueType::Int16 => 4,
        ValueType::UInt16 => 5,
        ValueType::Int32 => 6,
        ValueType::UInt32 => 7,
        ValueType::Int64 => 8,
        ValueType::UInt64 => 9,
        ValueType::Float32 => 10,
        ValueType::Float64 => 11,
        ValueType::String => 12,
        ValueType::Time => 13,
        ValueType::Unknown => return None,
    })
}

struct MockSubscription {
    tx: mpsc::Sender<Notification>,
    items: Vec<(NodeId, u32)>,
}

#[derive(Default)]
struct State {
    nodes: HashMap<NodeId, MockNode>,
    endpoints: Option<Vec<EndpointDescriptor>>,
    subscriptions: HashMap<u32, MockSubscription>,
    next_subscription_id: u32,
    deleted_subscriptions: Vec<u32>,
    last_connect: Option<(ConnectTarget, ConnectOptions)>,
    attribute_failures: HashSet<NodeId>,
    browse_failures: HashSet<NodeId>,
    truncate_next_read: bool,
    read_latency: Duration,
}

/// Decrements the active read counter when a read ends.
struct ActiveRead<'a>(&'a AtomicUsize);

impl Drop for ActiveRead<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// =============================================================================
// MockTransport
// =============================================================================

/// In-memory [`OpcUaTransport`].
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<State>,
    connected: AtomicBool,
    generation: AtomicU64,
    fail_get_endpoints: AtomicBool,
    fail_connects: AtomicU32,
    fail_reads: AtomicU32,
    fail_close: AtomicBool,
    connect_count: AtomicU64,
    read_value_calls: AtomicU64,
    active_reads: AtomicUsize,
    max_concurrent_reads: AtomicUsize,
}

impl MockTransport {
    /// Creates an empty address space advertising one insecure endpoint.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_subscription_id: 1,
                ..State::default()
            }),
            ..Self::default()
        }
    }

    // =========================================================================
    // Address space setup
    // =========================================================================

    /// Adds a folder (no DataType, no Value).
    pub fn add_folder(&self, node_id: NodeId, name: &str) {
        self.state.lock().nodes.insert(
            node_id,
            MockNode {
                browse_name: name.to_string(),
                display_name: name.to_string(),
                value_type: None,
                value: DataValue::default(),
                children: Vec::new(),
            },
        );
    }

    /// Adds a variable with an initial value.
    pub fn add_variable(
        &self,
        node_id: NodeId,
        name: &str,
        value_type: ValueType,
        value: impl Into<Variant>,
    ) {
        self.state.lock().nodes.insert(
            node_id,
            MockNode {
                browse_name: name.to_string(),
                display_name: name.to_string(),
                value_type: Some(value_type),
                value: DataValue::good(value).with_source_timestamp(Utc::now()),
                children: Vec::new(),
            },
        );
    }

    /// Adds a hierarchical reference. A child may have several parents.
    pub fn add_reference(&self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.state.lock().nodes.get_mut(&parent) {
            node.children.push(child);
        }
    }

    /// Sets a variable's value with the current time as source timestamp.
    pub fn set_value(&self, node_id: &NodeId, value: impl Into<Variant>) {
        self.set_data_value(node_id, DataValue::good(value).with_source_timestamp(Utc::now()));
    }

    /// Sets a variable's full read result and notifies every monitored item.
    pub fn set_data_value(&self, node_id: &NodeId, value: DataValue) {
        let mut state = self.state.lock();
        if let Some(node) = state.nodes.get_mut(node_id) {
            node.value = value.clone();
        }
        for (&subscription_id, subscription) in &state.subscriptions {
            let items: Vec<ItemChange> = subscription
                .items
                .iter()
                .filter(|(monitored, _)| monitored == node_id)
                .map(|&(_, handle)| ItemChange {
                    handle,
                    value: value.clone(),
                })
                .collect();
            if !items.is_empty() {
                let _ = subscription.tx.try_send(Notification::DataChange {
                    subscription_id,
                    items,
                });
            }
        }
    }

    /// Pushes a change for an arbitrary handle.
    pub fn emit_raw_change(&self, subscription_id: u32, handle: u32, value: DataValue) {
        if let Some(subscription) = self.state.lock().subscriptions.get(&subscription_id) {
            let _ = subscription.tx.try_send(Notification::DataChange {
                subscription_id,
                items: vec![ItemChange { handle, value }],
            });
        }
    }

    /// Pushes a notification error.
    pub fn emit_notification_error(&self, subscription_id: u32, message: &str) {
        if let Some(subscription) = self.state.lock().subscriptions.get(&subscription_id) {
            let _ = subscription.tx.try_send(Notification::Error {
                subscription_id,
                message: message.to_string(),
            });
        }
    }

    /// Advertises an endpoint. The first call replaces the default one.
    pub fn add_endpoint(&self, endpoint: EndpointDescriptor) {
        self.state
            .lock()
            .endpoints
            .get_or_insert_with(Vec::new)
            .push(endpoint);
    }

    /// Advertises no endpoints at all.
    pub fn clear_endpoints(&self) {
        self.state.lock().endpoints = Some(Vec::new());
    }

    // =========================================================================
    // Failure injection
    // =========================================================================

    /// Makes endpoint discovery fail.
    pub fn fail_get_endpoints(&self, fail: bool) {
        self.fail_get_endpoints.store(fail, Ordering::SeqCst);
    }

    /// Refuses the next `count` connects.
    pub fn fail_next_connects(&self, count: u32) {
        self.fail_connects.store(count, Ordering::SeqCst);
    }

    /// Fails the next `count` batched reads.
    pub fn fail_next_reads(&self, count: u32) {
        self.fail_reads.store(count, Ordering::SeqCst);
    }

    /// Makes the next batched read return one result too few.
    pub fn truncate_next_read(&self) {
        self.state.lock().truncate_next_read = true;
    }

    /// Makes `close` report an error (after closing).
    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Fails attribute reads of one node.
    pub fn fail_attributes_for(&self, node_id: NodeId) {
        self.state.lock().attribute_failures.insert(node_id);
    }

    /// Fails child enumeration of one node.
    pub fn fail_browse_for(&self, node_id: NodeId) {
        self.state.lock().browse_failures.insert(node_id);
    }

    /// Delays every batched read.
    pub fn set_read_latency(&self, latency: Duration) {
        self.state.lock().read_latency = latency;
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Connect calls, successful or not.
    pub fn connect_count(&self) -> u64 {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Batched read calls.
    pub fn read_value_calls(&self) -> u64 {
        self.read_value_calls.load(Ordering::SeqCst)
    }

    /// Highest number of batched reads seen in flight at once.
    pub fn max_concurrent_reads(&self) -> usize {
        self.max_concurrent_reads.load(Ordering::SeqCst)
    }

    /// Target and options of the last successful connect.
    pub fn last_connect(&self) -> Option<(ConnectTarget, ConnectOptions)> {
        self.state.lock().last_connect.clone()
    }

    /// Subscriptions deleted explicitly, in order.
    pub fn deleted_subscriptions(&self) -> Vec<u32> {
        self.state.lock().deleted_subscriptions.clone()
    }

    /// Handles registered on a subscription, in registration order.
    pub fn monitored_handles(&self, subscription_id: u32) -> Vec<u32> {
        self.state
            .lock()
            .subscriptions
            .get(&subscription_id)
            .map(|s| s.items.iter().map(|&(_, handle)| handle).collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // Session helpers
    // =========================================================================

    fn session(&self) -> OpcUaResult<u64> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(self.generation.load(Ordering::SeqCst))
        } else {
            Err(OpcUaError::not_connected())
        }
    }

    fn still_open(&self, session: u64) -> OpcUaResult<()> {
        if self.connected.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == session {
            Ok(())
        } else {
            Err(OpcUaError::not_connected())
        }
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl OpcUaTransport for MockTransport {
    async fn get_endpoints(&self, url: &str) -> OpcUaResult<Vec<EndpointDescriptor>> {
        if self.fail_get_endpoints.load(Ordering::SeqCst) {
            return Err(OpcUaError::connection(ConnectionError::discovery(
                url,
                "endpoint discovery refused",
            )));
        }
        Ok(self.state.lock().endpoints.clone().unwrap_or_else(|| {
            vec![EndpointDescriptor::new(
                url,
                crate::types::SecurityPolicy::None,
                crate::types::SecurityMode::None,
            )]
        }))
    }

    async fn connect(&self, target: &ConnectTarget, options: &ConnectOptions) -> OpcUaResult<()> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        if Self::take_one(&self.fail_connects) {
            return Err(OpcUaError::connection(ConnectionError::refused_with(
                target.url.clone(),
                "connection refused",
            )));
        }
        self.state.lock().last_connect = Some((target.clone(), options.clone()));
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> OpcUaResult<()> {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        // dropping the senders ends every notification channel
        self.state.lock().subscriptions.clear();

        if self.fail_close.load(Ordering::SeqCst) {
            return Err(OpcUaError::internal("close failed"));
        }
        if !was_connected {
            return Err(OpcUaError::not_connected());
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn browse_children(&self, node: &NodeId) -> OpcUaResult<Vec<NodeId>> {
        self.session()?;
        let state = self.state.lock();
        if state.browse_failures.contains(node) {
            return Err(OpcUaError::browse(BrowseError::browse_failed(
                node.to_string(),
                "BadTimeout",
            )));
        }
        state
            .nodes
            .get(node)
            .map(|n| n.children.clone())
            .ok_or_else(|| {
                OpcUaError::browse(BrowseError::browse_failed(node.to_string(), "BadNodeIdUnknown"))
            })
    }

    async fn read_attributes(
        &self,
        node: &NodeId,
        attributes: &[AttributeId],
    ) -> OpcUaResult<Vec<DataValue>> {
        self.session()?;
        let state = self.state.lock();
        if state.attribute_failures.contains(node) {
            return Err(OpcUaError::browse(BrowseError::attributes_failed(
                node.to_string(),
                "BadTimeout",
            )));
        }
        Ok(match state.nodes.get(node) {
            Some(n) => attributes.iter().map(|&a| n.attribute(a)).collect(),
            None => attributes
                .iter()
                .map(|_| DataValue::bad(StatusCode::BAD_NODE_ID_UNKNOWN))
                .collect(),
        })
    }

    async fn read_values(&self, nodes: &[NodeId], _max_age: Duration) -> OpcUaResult<Vec<DataValue>> {
        let session = self.session()?;
        self.read_value_calls.fetch_add(1, Ordering::SeqCst);

        let active = self.active_reads.fetch_add(1, Ordering::SeqCst) + 1;
        let _active = ActiveRead(&self.active_reads);
        self.max_concurrent_reads.fetch_max(active, Ordering::SeqCst);

        let latency = self.state.lock().read_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.still_open(session)?;

        if Self::take_one(&self.fail_reads) {
            return Err(OpcUaError::read_failed("BadCommunicationError"));
        }

        let mut state = self.state.lock();
        let mut values: Vec<DataValue> = nodes
            .iter()
            .map(|id| match state.nodes.get(id) {
                Some(node) => node.attribute(AttributeId::Value),
                None => DataValue::bad(StatusCode::BAD_NODE_ID_UNKNOWN),
            })
            .collect();
        if std::mem::take(&mut state.truncate_next_read) {
            values.pop();
        }
        Ok(values)
    }

    async fn create_subscription(
        &self,
        params: &SubscriptionParams,
    ) -> OpcUaResult<(u32, mpsc::Receiver<Notification>)> {
        self.session()?;
        let (tx, rx) = mpsc::channel(params.channel_capacity.max(1));
        let mut state = self.state.lock();
        let id = state.next_subscription_id;
        state.next_subscription_id += 1;
        state.subscriptions.insert(
            id,
            MockSubscription {
                tx,
                items: Vec::new(),
            },
        );
        Ok((id, rx))
    }

    async fn monitor(
        &self,
        subscription_id: u32,
        node: &NodeId,
        handle: u32,
    ) -> OpcUaResult<StatusCode> {
        self.session()?;
        let mut state = self.state.lock();
        let status = match state.nodes.get(node) {
            Some(n) if n.value_type.is_some() => StatusCode::GOOD,
            Some(_) => StatusCode::BAD_ATTRIBUTE_ID_INVALID,
            None => StatusCode::BAD_NODE_ID_UNKNOWN,
        };
        let subscription = state.subscriptions.get_mut(&subscription_id).ok_or_else(|| {
            OpcUaError::subscription(SubscriptionError::monitor_failed(
                node.to_string(),
                "BadSubscriptionIdInvalid",
            ))
        })?;
        if status.is_good() {
            subscription.items.push((node.clone(), handle));
        }
        Ok(status)
    }

    async fn delete_subscription(&self, subscription_id: u32) -> OpcUaResult<()> {
        self.session()?;
        let mut state = self.state.lock();
        if state.subscriptions.remove(&subscription_id).is_none() {
            return Err(OpcUaError::subscription(SubscriptionError::notification(
                subscription_id,
                "BadSubscriptionIdInvalid",
            )));
        }
        state.deleted_subscriptions.push(subscription_id);
        Ok(())
    }

    fn name(&self) -> String {
        "mock".to_string()
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("connected", &self.is_connected())
            .field("nodes", &self.state.lock().nodes.len())
            .finish()
    }
}
