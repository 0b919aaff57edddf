// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Transport backed by the `opcua` crate.
//!
//! The `opcua` client API is synchronous, so every session call runs on the
//! blocking thread pool. Publishing for subscriptions is driven by the
//! session's own background loop (`Session::run_async`), and data changes are
//! forwarded into a tokio channel from the library's callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use opcua::client::prelude::*;
use opcua::sync::RwLock as OpcUaRwLock;

use crate::client::transport::{
    ConnectOptions, ConnectTarget, EndpointDescriptor, Identity, ItemChange, Notification,
    OpcUaTransport, SubscriptionParams,
};
use crate::error::{
    BrowseError, ConnectionError, OpcUaError, OpcUaResult, SubscriptionError,
};
use crate::types::{self as ht, AttributeId as HtAttributeId};

/// Maps server-assigned monitored item ids to engine handles, per subscription.
type HandleMap = Arc<RwLock<HashMap<u32, u32>>>;

struct LiveSession {
    session: Arc<OpcUaRwLock<Session>>,
    publish_loop: Option<oneshot::Sender<SessionCommand>>,
    handles: HashMap<u32, HandleMap>,
}

// =============================================================================
// OpcUaClientTransport
// =============================================================================

/// [`OpcUaTransport`] implementation over a real OPC UA session.
pub struct OpcUaClientTransport {
    live: Mutex<Option<LiveSession>>,
}

impl OpcUaClientTransport {
    /// Creates a disconnected transport.
    pub fn new() -> Self {
        Self {
            live: Mutex::new(None),
        }
    }

    fn build_client(options: &ConnectOptions) -> OpcUaResult<Client> {
        let mut builder = ClientBuilder::new()
            .application_name(options.application_name.as_str())
            .application_uri(options.application_uri.as_str())
            .pki_dir(options.pki_dir.as_str())
            .trust_server_certs(options.trust_server_certs)
            .session_retry_limit(0);

        match (&options.client_cert, &options.client_key) {
            (Some(cert), Some(key)) => {
                info!(application_uri = %options.application_uri, "Using client certificate");
                builder = builder
                    .certificate_path(cert.as_str())
                    .private_key_path(key.as_str())
                    .create_sample_keypair(false);
            }
            _ => builder = builder.create_sample_keypair(true),
        }

        builder.client().ok_or_else(|| {
            OpcUaError::connection(ConnectionError::invalid_endpoint(
                options.application_uri.as_str(),
                "Failed to build OPC UA client",
            ))
        })
    }

    fn session(&self) -> OpcUaResult<Arc<OpcUaRwLock<Session>>> {
        self.live
            .lock()
            .as_ref()
            .map(|live| Arc::clone(&live.session))
            .ok_or_else(OpcUaError::not_connected)
    }

    /// Runs a blocking session call on the blocking pool.
    async fn blocking<T, F>(&self, call: F) -> OpcUaResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> OpcUaResult<T> + Send + 'static,
    {
        let session = self.session()?;
        tokio::task::spawn_blocking(move || {
            let guard = session.read();
            call(&guard)
        })
        .await
        .map_err(|e| OpcUaError::internal(format!("session task failed: {e}")))?
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    fn to_opcua_node_id(node_id: &ht::NodeId) -> NodeId {
        match &node_id.identifier {
            ht::NodeIdentifier::Numeric(v) => NodeId::new(node_id.namespace_index, *v),
            ht::NodeIdentifier::String(v) => NodeId::new(node_id.namespace_index, v.clone()),
        }
    }

    /// Converts back; GUID and opaque ids are rendered as strings.
    fn from_opcua_node_id(node_id: &NodeId) -> ht::NodeId {
        match &node_id.identifier {
            Identifier::Numeric(v) => ht::NodeId::numeric(node_id.namespace, *v),
            Identifier::String(v) => ht::NodeId::string(node_id.namespace, v.as_ref()),
            other => ht::NodeId::string(node_id.namespace, other.to_string()),
        }
    }

    fn to_opcua_attribute(attribute: HtAttributeId) -> AttributeId {
        match attribute {
            HtAttributeId::BrowseName => AttributeId::BrowseName,
            HtAttributeId::DisplayName => AttributeId::DisplayName,
            HtAttributeId::Value => AttributeId::Value,
            HtAttributeId::DataType => AttributeId::DataType,
        }
    }

    fn to_security_policy(uri: &str) -> SecurityPolicy {
        SecurityPolicy::from_uri(uri)
    }

    fn to_message_mode(mode: ht::SecurityMode) -> MessageSecurityMode {
        match mode {
            ht::SecurityMode::None => MessageSecurityMode::None,
            ht::SecurityMode::Sign => MessageSecurityMode::Sign,
            ht::SecurityMode::SignAndEncrypt => MessageSecurityMode::SignAndEncrypt,
        }
    }

    fn from_message_mode(mode: MessageSecurityMode) -> ht::SecurityMode {
        match mode {
            MessageSecurityMode::Sign => ht::SecurityMode::Sign,
            MessageSecurityMode::SignAndEncrypt => ht::SecurityMode::SignAndEncrypt,
            _ => ht::SecurityMode::None,
        }
    }

    fn from_opcua_variant(variant: &Variant) -> ht::Variant {
        match variant {
            Variant::Empty => ht::Variant::Empty,
            Variant::Boolean(v) => ht::Variant::Boolean(*v),
            Variant::SByte(v) => ht::Variant::SByte(*v),
            Variant::Byte(v) => ht::Variant::Byte(*v),
            Variant::Int16(v) => ht::Variant::Int16(*v),
            Variant::UInt16(v) => ht::Variant::UInt16(*v),
            Variant::Int32(v) => ht::Variant::Int32(*v),
            Variant::UInt32(v) => ht::Variant::UInt32(*v),
            Variant::Int64(v) => ht::Variant::Int64(*v),
            Variant::UInt64(v) => ht::Variant::UInt64(*v),
            Variant::Float(v) => ht::Variant::Float(*v),
            Variant::Double(v) => ht::Variant::Double(*v),
            Variant::String(v) => ht::Variant::String(v.as_ref().to_string()),
            Variant::DateTime(v) => ht::Variant::DateTime(v.as_chrono()),
            Variant::NodeId(v) => ht::Variant::NodeId(Self::from_opcua_node_id(v)),
            Variant::LocalizedText(v) => ht::Variant::String(v.text.as_ref().to_string()),
            Variant::QualifiedName(v) => ht::Variant::String(v.name.as_ref().to_string()),
            Variant::Array(arr) => {
                ht::Variant::Array(arr.values.iter().map(Self::from_opcua_variant).collect())
            }
            other => ht::Variant::String(format!("{other:?}")),
        }
    }

    fn from_opcua_data_value(value: &DataValue) -> ht::DataValue {
        ht::DataValue {
            status: ht::StatusCode(value.status.map(|s| s.bits()).unwrap_or(0)),
            value: value
                .value
                .as_ref()
                .map(Self::from_opcua_variant)
                .unwrap_or_default(),
            source_timestamp: value.source_timestamp.map(|t| t.as_chrono()),
        }
    }

    fn read_value_id(node_id: &ht::NodeId, attribute: AttributeId) -> ReadValueId {
        ReadValueId {
            node_id: Self::to_opcua_node_id(node_id),
            attribute_id: attribute as u32,
            index_range: UAString::null(),
            data_encoding: QualifiedName::null(),
        }
    }
}

impl Default for OpcUaClientTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OpcUaTransport for OpcUaClientTransport {
    async fn get_endpoints(&self, url: &str) -> OpcUaResult<Vec<EndpointDescriptor>> {
        let options = ConnectOptions {
            application_name: "endpoint discovery".to_string(),
            application_uri: "urn:harvest:discovery".to_string(),
            client_cert: None,
            client_key: None,
            pki_dir: "pki".to_string(),
            trust_server_certs: false,
            identity: None,
        };
        let url = url.to_string();

        tokio::task::spawn_blocking(move || {
            let client = Self::build_client(&options)?;
            let endpoints = client
                .get_server_endpoints_from_url(url.as_str())
                .map_err(|e| OpcUaError::connection(ConnectionError::discovery(&url, e.to_string())))?;

            Ok(endpoints
                .iter()
                .map(|e| EndpointDescriptor {
                    url: e.endpoint_url.as_ref().to_string(),
                    security_policy_uri: e.security_policy_uri.as_ref().to_string(),
                    security_mode: Self::from_message_mode(e.security_mode),
                })
                .collect())
        })
        .await
        .map_err(|e| OpcUaError::internal(format!("discovery task failed: {e}")))?
    }

    async fn connect(&self, target: &ConnectTarget, options: &ConnectOptions) -> OpcUaResult<()> {
        let target = target.clone();
        let options = options.clone();

        let session = tokio::task::spawn_blocking(move || {
            let mut client = Self::build_client(&options)?;

            let (policy_uri, mode, identity) = match &target.endpoint {
                Some(endpoint) => {
                    let identity = match &options.identity {
                        Some(Identity::UserName { username, password }) => {
                            IdentityToken::UserName(username.clone(), password.clone())
                        }
                        _ => IdentityToken::Anonymous,
                    };
                    (
                        Self::to_security_policy(&endpoint.security_policy_uri),
                        Self::to_message_mode(endpoint.security_mode),
                        identity,
                    )
                }
                None => (
                    SecurityPolicy::None,
                    MessageSecurityMode::None,
                    IdentityToken::Anonymous,
                ),
            };

            let description: EndpointDescription = (
                target.url.as_str(),
                policy_uri.to_uri(),
                mode,
                UserTokenPolicy::anonymous(),
            )
                .into();

            client
                .connect_to_endpoint(description, identity)
                .map_err(|e| {
                    OpcUaError::connection(ConnectionError::refused_with(&target.url, e.to_string()))
                })
        })
        .await
        .map_err(|e| OpcUaError::internal(format!("connect task failed: {e}")))??;

        let publish_loop = Session::run_async(Arc::clone(&session));
        *self.live.lock() = Some(LiveSession {
            session,
            publish_loop: Some(publish_loop),
            handles: HashMap::new(),
        });

        Ok(())
    }

    async fn close(&self) -> OpcUaResult<()> {
        let live = self.live.lock().take();
        let Some(mut live) = live else {
            return Ok(());
        };

        if let Some(stop) = live.publish_loop.take() {
            // The loop may already have ended on its own.
            let _ = stop.send(SessionCommand::Stop);
        }

        let session = live.session;
        tokio::task::spawn_blocking(move || session.read().disconnect())
            .await
            .map_err(|e| OpcUaError::internal(format!("disconnect task failed: {e}")))?;

        debug!("OPC UA session disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.live
            .lock()
            .as_ref()
            .map(|live| live.session.read().is_connected())
            .unwrap_or(false)
    }

    async fn browse_children(&self, node: &ht::NodeId) -> OpcUaResult<Vec<ht::NodeId>> {
        let description = BrowseDescription {
            node_id: Self::to_opcua_node_id(node),
            browse_direction: BrowseDirection::Forward,
            reference_type_id: ReferenceTypeId::HierarchicalReferences.into(),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: BrowseDescriptionResultMask::all().bits(),
        };
        let node_text = node.to_string();

        trace!(node_id = %node, "Browsing children");

        self.blocking(move |session| {
            let results = session
                .browse(&[description])
                .map_err(|e| OpcUaError::browse(BrowseError::browse_failed(&node_text, e.to_string())))?
                .unwrap_or_default();

            Ok(results
                .into_iter()
                .next()
                .and_then(|r| r.references)
                .unwrap_or_default()
                .iter()
                .map(|r| Self::from_opcua_node_id(&r.node_id.node_id))
                .collect())
        })
        .await
    }

    async fn read_attributes(
        &self,
        node: &ht::NodeId,
        attributes: &[HtAttributeId],
    ) -> OpcUaResult<Vec<ht::DataValue>> {
        let ids: Vec<ReadValueId> = attributes
            .iter()
            .map(|a| Self::read_value_id(node, Self::to_opcua_attribute(*a)))
            .collect();
        let node_text = node.to_string();

        self.blocking(move |session| {
            let values = session
                .read(&ids, TimestampsToReturn::Neither, 0.0)
                .map_err(|e| {
                    OpcUaError::browse(BrowseError::attributes_failed(&node_text, e.to_string()))
                })?;
            Ok(values.iter().map(Self::from_opcua_data_value).collect())
        })
        .await
    }

    async fn read_values(
        &self,
        nodes: &[ht::NodeId],
        max_age: Duration,
    ) -> OpcUaResult<Vec<ht::DataValue>> {
        let ids: Vec<ReadValueId> = nodes
            .iter()
            .map(|n| Self::read_value_id(n, AttributeId::Value))
            .collect();
        let max_age = max_age.as_millis() as f64;

        self.blocking(move |session| {
            let values = session
                .read(&ids, TimestampsToReturn::Both, max_age)
                .map_err(|e| OpcUaError::read_failed(e.to_string()))?;
            Ok(values.iter().map(Self::from_opcua_data_value).collect())
        })
        .await
    }

    async fn create_subscription(
        &self,
        params: &SubscriptionParams,
    ) -> OpcUaResult<(u32, mpsc::Receiver<Notification>)> {
        let (tx, rx) = mpsc::channel(params.channel_capacity.max(1));
        let handles: HandleMap = Arc::new(RwLock::new(HashMap::new()));
        let callback_handles = Arc::clone(&handles);
        let assigned_id = Arc::new(AtomicU32::new(0));
        let callback_id = Arc::clone(&assigned_id);
        let params = params.clone();

        let subscription_id = self
            .blocking(move |session| {
                let callback = DataChangeCallback::new(move |items: &[&MonitoredItem]| {
                    let map = callback_handles.read();
                    let changes: Vec<ItemChange> = items
                        .iter()
                        .filter_map(|item| {
                            map.get(&item.id()).map(|handle| ItemChange {
                                handle: *handle,
                                value: Self::from_opcua_data_value(item.last_value()),
                            })
                        })
                        .collect();
                    if changes.is_empty() {
                        return;
                    }
                    let notification = Notification::DataChange {
                        subscription_id: callback_id.load(Ordering::Relaxed),
                        items: changes,
                    };
                    if tx.try_send(notification).is_err() {
                        warn!("Notification channel full or closed, data change dropped");
                    }
                });

                session
                    .create_subscription(
                        params.publishing_interval.as_millis() as f64,
                        params.lifetime_count,
                        params.keep_alive_count,
                        params.max_notifications_per_publish,
                        params.priority,
                        true,
                        callback,
                    )
                    .map_err(|e| {
                        OpcUaError::subscription(SubscriptionError::creation_failed(e.to_string()))
                    })
            })
            .await?;
        assigned_id.store(subscription_id, Ordering::Relaxed);

        if let Some(live) = self.live.lock().as_mut() {
            live.handles.insert(subscription_id, handles);
        }

        info!(subscription_id, "Created subscription");
        Ok((subscription_id, rx))
    }

    async fn monitor(
        &self,
        subscription_id: u32,
        node: &ht::NodeId,
        handle: u32,
    ) -> OpcUaResult<ht::StatusCode> {
        let handles = self
            .live
            .lock()
            .as_ref()
            .and_then(|live| live.handles.get(&subscription_id).cloned())
            .ok_or_else(|| {
                OpcUaError::subscription(SubscriptionError::monitor_failed(
                    node.to_string(),
                    format!("unknown subscription {subscription_id}"),
                ))
            })?;

        let request = MonitoredItemCreateRequest {
            item_to_monitor: Self::read_value_id(node, AttributeId::Value),
            monitoring_mode: MonitoringMode::Reporting,
            requested_parameters: MonitoringParameters {
                client_handle: handle,
                sampling_interval: 0.0,
                filter: ExtensionObject::null(),
                queue_size: 10,
                discard_oldest: true,
            },
        };
        let node_text = node.to_string();

        self.blocking(move |session| {
            let results = session
                .create_monitored_items(subscription_id, TimestampsToReturn::Both, &[request])
                .map_err(|e| {
                    OpcUaError::subscription(SubscriptionError::monitor_failed(&node_text, e.to_string()))
                })?;

            let result = results.into_iter().next().ok_or_else(|| {
                OpcUaError::subscription(SubscriptionError::monitor_failed(
                    &node_text,
                    "empty monitored item response",
                ))
            })?;

            if result.status_code.is_good() {
                handles.write().insert(result.monitored_item_id, handle);
            }
            Ok(ht::StatusCode(result.status_code.bits()))
        })
        .await
    }

    async fn delete_subscription(&self, subscription_id: u32) -> OpcUaResult<()> {
        if let Some(live) = self.live.lock().as_mut() {
            live.handles.remove(&subscription_id);
        }

        self.blocking(move |session| {
            session.delete_subscription(subscription_id).map_err(|e| {
                OpcUaError::subscription(SubscriptionError::creation_failed(format!(
                    "delete subscription {subscription_id}: {e}"
                )))
            })?;
            Ok(())
        })
        .await
    }

    fn name(&self) -> String {
        "opcua-client".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
