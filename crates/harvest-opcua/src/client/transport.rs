// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Protocol client abstraction.
//!
//! The engine never speaks the wire protocol itself. Everything it needs from
//! an OPC UA client library is expressed by [`OpcUaTransport`], which has a
//! real implementation on top of the `opcua` crate and an in-memory mock for
//! tests.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::OpcUaResult;
use crate::types::{
    AttributeId, DataValue, NodeId, OpcUaConfig, SecurityMode, SecurityPolicy, StatusCode,
    SubscriptionSettings,
};

// =============================================================================
// EndpointDescriptor
// =============================================================================

/// One endpoint advertised by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Endpoint URL.
    pub url: String,

    /// Security policy URI as advertised.
    pub security_policy_uri: String,

    /// Message security mode.
    pub security_mode: SecurityMode,
}

impl EndpointDescriptor {
    /// Creates a descriptor for the given policy and mode.
    pub fn new(url: impl Into<String>, policy: SecurityPolicy, mode: SecurityMode) -> Self {
        Self {
            url: url.into(),
            security_policy_uri: policy.uri().to_string(),
            security_mode: mode,
        }
    }

    /// Returns `true` if this endpoint offers exactly the given policy and mode.
    pub fn matches(&self, policy: SecurityPolicy, mode: SecurityMode) -> bool {
        self.security_policy_uri == policy.uri() && self.security_mode == mode
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} / {}]",
            self.url, self.security_policy_uri, self.security_mode
        )
    }
}

// =============================================================================
// Connect target and options
// =============================================================================

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// URL to dial.
    pub url: String,

    /// The matched endpoint, or `None` when falling back to the raw address.
    pub endpoint: Option<EndpointDescriptor>,
}

impl ConnectTarget {
    /// Targets a matched endpoint.
    pub fn endpoint(endpoint: EndpointDescriptor) -> Self {
        Self {
            url: endpoint.url.clone(),
            endpoint: Some(endpoint),
        }
    }

    /// Targets the configured address without security.
    pub fn fallback(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            endpoint: None,
        }
    }
}

/// User identity presented when activating a session.
#[derive(Clone, PartialEq, Eq)]
pub enum Identity {
    /// Anonymous login.
    Anonymous,
    /// Username and password.
    UserName {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::UserName { username, .. } => f
                .debug_struct("UserName")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

/// Options used to build a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Application name.
    pub application_name: String,
    /// Application URI.
    pub application_uri: String,
    /// Client certificate path.
    pub client_cert: Option<String>,
    /// Client private key path.
    pub client_key: Option<String>,
    /// PKI directory.
    pub pki_dir: String,
    /// Accept any server certificate.
    pub trust_server_certs: bool,
    /// Identity, attached only when an endpoint matched.
    pub identity: Option<Identity>,
}

impl ConnectOptions {
    /// Builds the identity-free options from configuration.
    pub fn from_config(config: &OpcUaConfig) -> Self {
        Self {
            application_name: config.application_name.clone(),
            application_uri: config.effective_application_uri(),
            client_cert: config.client_cert.clone(),
            client_key: config.client_key.clone(),
            pki_dir: config.pki_dir.clone(),
            trust_server_certs: config.trust_server_certs,
            identity: None,
        }
    }
}

// =============================================================================
// Subscription parameters and notifications
// =============================================================================

/// Parameters for creating a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionParams {
    /// Publishing interval.
    pub publishing_interval: Duration,
    /// Sampling interval for monitored items.
    pub sampling_interval: Duration,
    /// Server-side queue size per item.
    pub item_queue_size: u32,
    /// Lifetime count.
    pub lifetime_count: u32,
    /// Keep-alive count.
    pub keep_alive_count: u32,
    /// Max notifications per publish.
    pub max_notifications_per_publish: u32,
    /// Priority.
    pub priority: u8,
    /// Capacity of the notification channel handed back to the caller.
    pub channel_capacity: usize,
}

impl From<&SubscriptionSettings> for SubscriptionParams {
    fn from(settings: &SubscriptionSettings) -> Self {
        Self {
            publishing_interval: settings.publishing_interval,
            sampling_interval: settings.sampling_interval,
            item_queue_size: settings.item_queue_size,
            lifetime_count: settings.lifetime_count,
            keep_alive_count: settings.keep_alive_count,
            max_notifications_per_publish: settings.max_notifications_per_publish,
            priority: settings.priority,
            channel_capacity: settings.queue_capacity,
        }
    }
}

/// A value change for one monitored item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemChange {
    /// Client handle given at registration.
    pub handle: u32,
    /// New value.
    pub value: DataValue,
}

/// A message delivered on a subscription's notification channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// One or more monitored items changed.
    DataChange {
        /// Subscription ID.
        subscription_id: u32,
        /// Changed items.
        items: Vec<ItemChange>,
    },
    /// The publish exchange reported an error.
    Error {
        /// Subscription ID.
        subscription_id: u32,
        /// Error description.
        message: String,
    },
}

// =============================================================================
// OpcUaTransport Trait
// =============================================================================

/// Primitives consumed from an OPC UA client library.
///
/// Implementations hold at most one session. Calls on a closed session must
/// fail with a "not connected" error rather than hang.
#[async_trait]
pub trait OpcUaTransport: Send + Sync {
    /// Queries the endpoints advertised at `url`.
    async fn get_endpoints(&self, url: &str) -> OpcUaResult<Vec<EndpointDescriptor>>;

    /// Establishes a session.
    async fn connect(&self, target: &ConnectTarget, options: &ConnectOptions) -> OpcUaResult<()>;

    /// Closes the session and any subscription on it.
    async fn close(&self) -> OpcUaResult<()>;

    /// Returns `true` while a session is live.
    fn is_connected(&self) -> bool;

    /// Returns the direct hierarchical children of `node`.
    async fn browse_children(&self, node: &NodeId) -> OpcUaResult<Vec<NodeId>>;

    /// Reads several attributes of one node in one request.
    ///
    /// Results are in the order of `attributes`.
    async fn read_attributes(
        &self,
        node: &NodeId,
        attributes: &[AttributeId],
    ) -> OpcUaResult<Vec<DataValue>>;

    /// Reads the Value attribute of many nodes in one request.
    ///
    /// Results are in the order of `nodes`.
    async fn read_values(&self, nodes: &[NodeId], max_age: Duration) -> OpcUaResult<Vec<DataValue>>;

    /// Creates a subscription and returns its id and notification channel.
    async fn create_subscription(
        &self,
        params: &SubscriptionParams,
    ) -> OpcUaResult<(u32, mpsc::Receiver<Notification>)>;

    /// Registers one monitored item reporting under `handle`.
    async fn monitor(&self, subscription_id: u32, node: &NodeId, handle: u32)
        -> OpcUaResult<StatusCode>;

    /// Deletes a subscription.
    async fn delete_subscription(&self, subscription_id: u32) -> OpcUaResult<()>;

    /// Transport name for logging.
    fn name(&self) -> String;
}

// =============================================================================
// Tests
// =============================================================================
