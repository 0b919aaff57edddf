// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Address-space discovery.
//!
//! Builds the [`NodeCatalog`] an engine collects from, either by walking the
//! server's address space or by enriching the configured node list.
//!
//! # Traversal
//!
//! ```text
//!   root (level 0)
//!    ├── attributes: DataType, DisplayName, BrowseName   (one request)
//!    ├── known type? ──► emit CatalogNode (path = parent.browse_name)
//!    └── children ──► recurse (level + 1), depth first, server order
//! ```
//!
//! Two guards bound the walk, each disabled by zero: `max_level` stops
//! recursion past that many hops from a root, and `max_nodes_per_parent`
//! caps the children visited below one node.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::catalog::{join_path, CatalogNode, NodeCatalog};
use crate::client::ConnectionManager;
use crate::error::{BrowseError, OpcUaError, OpcUaResult};
use crate::types::{AttributeId, BrowseSettings, DataValue, NodeConfig, NodeId, ValueType};

/// Attributes fetched for every visited node, in this order.
const NODE_ATTRIBUTES: [AttributeId; 3] = [
    AttributeId::DataType,
    AttributeId::DisplayName,
    AttributeId::BrowseName,
];

// =============================================================================
// BrowseStatistics
// =============================================================================

/// Statistics for discovery.
#[derive(Debug, Default)]
pub struct BrowseStatistics {
    /// Nodes whose attributes were requested.
    pub nodes_visited: AtomicU64,

    /// Nodes added to the catalog.
    pub nodes_emitted: AtomicU64,

    /// Failed attribute reads.
    pub attribute_errors: AtomicU64,

    /// Failed child enumerations.
    pub browse_errors: AtomicU64,
}

impl BrowseStatistics {
    /// Creates new statistics.
    pub fn new() -> Self {
        Self::default()
    }

    fn record_visit(&self) {
        self.nodes_visited.fetch_add(1, Ordering::Relaxed);
    }

    fn record_emit(&self) {
        self.nodes_emitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_attribute_error(&self) {
        self.attribute_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_browse_error(&self) {
        self.browse_errors.fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// NodeAttributes
// =============================================================================

/// The per-node attributes used to decide emission.
#[derive(Debug, Clone, Default, PartialEq)]
struct NodeAttributes {
    value_type: ValueType,
    display_name: String,
    browse_name: String,
}

impl NodeAttributes {
    fn from_values(values: &[DataValue]) -> Self {
        let text = |index: usize| {
            values
                .get(index)
                .filter(|v| v.status.is_good())
                .and_then(|v| v.value.as_text())
                .unwrap_or_default()
                .to_string()
        };

        Self {
            value_type: values
                .first()
                .map(ValueType::from_data_type_value)
                .unwrap_or_default(),
            display_name: text(1),
            browse_name: text(2),
        }
    }
}

/// A pending visit on the traversal stack.
struct Visit {
    node_id: NodeId,
    parent_path: String,
    level: usize,
    label: Option<String>,
}

// =============================================================================
// AddressSpaceBrowser
// =============================================================================

/// Discovers collectible nodes through the [`ConnectionManager`].
pub struct AddressSpaceBrowser {
    connection: Arc<ConnectionManager>,
    settings: BrowseSettings,
    nodes: Vec<NodeConfig>,
    stats: BrowseStatistics,
}

impl AddressSpaceBrowser {
    /// Creates a browser using the connection's configuration.
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        let settings = connection.config().browse.clone();
        let nodes = connection.config().nodes.clone();
        Self {
            connection,
            settings,
            nodes,
            stats: BrowseStatistics::new(),
        }
    }

    /// Overrides the browse guards.
    pub fn with_settings(mut self, settings: BrowseSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &BrowseStatistics {
        &self.stats
    }

    /// Builds the catalog the way the configuration asks for.
    pub async fn build_catalog(&self) -> OpcUaResult<NodeCatalog> {
        if self.settings.enabled {
            self.browse().await
        } else {
            self.resolve_configured().await
        }
    }

    /// Walks the address space from the configured roots.
    ///
    /// Roots are the configured nodes, or the Objects and Views folders when
    /// none are configured. Per-node failures never abort the walk.
    pub async fn browse(&self) -> OpcUaResult<NodeCatalog> {
        let roots = self.roots()?;
        let mut catalog = NodeCatalog::new();
        let mut visited: HashSet<NodeId> = HashSet::new();

        for (root, label) in roots {
            info!(root = %root, "Start browsing");
            let mut stack = vec![Visit {
                node_id: root,
                parent_path: String::new(),
                level: 0,
                label,
            }];

            while let Some(visit) = stack.pop() {
                if !visited.insert(visit.node_id.clone()) {
                    continue;
                }
                let path = self.visit(&visit, &mut catalog).await;

                if self.settings.max_level > 0 && visit.level >= self.settings.max_level {
                    continue;
                }

                let mut children = self.children(&visit.node_id).await;
                if self.settings.max_nodes_per_parent > 0 {
                    children.truncate(self.settings.max_nodes_per_parent);
                }

                // reversed so the first child is popped first
                for child in children.into_iter().rev() {
                    stack.push(Visit {
                        node_id: child,
                        parent_path: path.clone(),
                        level: visit.level + 1,
                        label: None,
                    });
                }
            }
        }

        info!(
            visited = self.stats.nodes_visited.load(Ordering::Relaxed),
            emitted = catalog.len(),
            "Browsing finished"
        );
        Ok(catalog)
    }

    /// Reads one node's attributes and emits it if it carries a value.
    ///
    /// Returns the path its children hang under.
    async fn visit(&self, visit: &Visit, catalog: &mut NodeCatalog) -> String {
        self.stats.record_visit();

        let attributes = match self
            .connection
            .read_attributes(&visit.node_id, &NODE_ATTRIBUTES)
            .await
        {
            Ok(values) => NodeAttributes::from_values(&values),
            Err(e) => {
                self.stats.record_attribute_error();
                let err = BrowseError::attributes_failed(visit.node_id.to_string(), e.to_string());
                warn!(error = %err, "Skipping node");
                return visit.parent_path.clone();
            }
        };

        let path = join_path(&visit.parent_path, &attributes.browse_name);
        debug!(node = %visit.node_id, value_type = %attributes.value_type, "Analyse node");

        if attributes.value_type.is_known() {
            let node = CatalogNode::new(visit.node_id.clone())
                .with_label(visit.label.as_deref())
                .with_display_name(attributes.display_name)
                .with_path(path.clone())
                .with_value_type(attributes.value_type);

            info!(
                node = %node.id,
                value_type = %node.value_type,
                name = %node.display_name,
                "Add node to catalog"
            );
            if catalog.push(node) {
                self.stats.record_emit();
            }
        }

        path
    }

    async fn children(&self, node_id: &NodeId) -> Vec<NodeId> {
        match self.connection.browse_children(node_id).await {
            Ok(children) => {
                debug!(node = %node_id, count = children.len(), "Found children");
                children
            }
            Err(e) => {
                self.stats.record_browse_error();
                let err = BrowseError::browse_failed(node_id.to_string(), e.to_string());
                warn!(error = %err, "Treating node as leaf");
                Vec::new()
            }
        }
    }

    fn roots(&self) -> OpcUaResult<Vec<(NodeId, Option<String>)>> {
        if self.nodes.is_empty() {
            return Ok(vec![
                (NodeId::OBJECTS_FOLDER, None),
                (NodeId::VIEWS_FOLDER, None),
            ]);
        }
        self.nodes
            .iter()
            .map(|n| Ok((n.node_id()?, n.label.clone())))
            .collect()
    }

    /// Turns the configured node list into a catalog without browsing.
    ///
    /// Display name and value type come from the same attribute read the
    /// walk uses. A node whose read fails is kept with an unknown type.
    pub async fn resolve_configured(&self) -> OpcUaResult<NodeCatalog> {
        if self.nodes.is_empty() {
            return Err(OpcUaError::browse(BrowseError::browse_failed(
                "<configured>",
                "no nodes configured",
            )));
        }

        let mut catalog = NodeCatalog::new();
        for config in &self.nodes {
            let node_id = config.node_id()?;
            if catalog.contains(&node_id) {
                debug!(node = %node_id, "Duplicate configured node ignored");
                continue;
            }
            self.stats.record_visit();

            let mut node = CatalogNode::new(node_id.clone()).with_label(config.label.as_deref());
            match self.connection.read_attributes(&node_id, &NODE_ATTRIBUTES).await {
                Ok(values) => {
                    let attributes = NodeAttributes::from_values(&values);
                    node = node
                        .with_display_name(attributes.display_name)
                        .with_value_type(attributes.value_type);
                }
                Err(e) => {
                    self.stats.record_attribute_error();
                    warn!(node = %node_id, error = %e, "Could not enrich configured node");
                }
            }

            catalog.push(node);
            self.stats.record_emit();
        }

        info!(nodes = catalog.len(), "Configured nodes resolved");
        Ok(catalog)
    }
}

impl std::fmt::Debug for AddressSpaceBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSpaceBrowser")
            .field("settings", &self.settings)
            .field("roots", &self.nodes.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::OpcUaTransport;
    use crate::mock::MockTransport;
    use crate::types::OpcUaConfig;

    /// Objects
    ///  └── Plant (folder)
    ///       ├── Boiler (folder)
    ///       │    ├── Temp (Double)
    ///       │    └── Pressure (Float)
    ///       ├── Status (String)
    ///       └── Shared -> Boiler.Temp (second reference)
    fn plant() -> Arc<MockTransport> {
        let mock = Arc::new(MockTransport::new());
        mock.add_folder(NodeId::OBJECTS_FOLDER, "Objects");
        mock.add_folder(NodeId::VIEWS_FOLDER, "Views");
        mock.add_folder(NodeId::string(2, "Plant"), "Plant");
        mock.add_folder(NodeId::string(2, "Boiler"), "Boiler");
        mock.add_variable(NodeId::string(2, "Temp"), "Temp", ValueType::Float64, 72.5);
        mock.add_variable(NodeId::string(2, "Pressure"), "Pressure", ValueType::Float32, 1.2);
        mock.add_variable(NodeId::string(2, "Status"), "Status", ValueType::String, "RUN");
        mock.add_reference(NodeId::OBJECTS_FOLDER, NodeId::string(2, "Plant"));
        mock.add_reference(NodeId::string(2, "Plant"), NodeId::string(2, "Boiler"));
        mock.add_reference(NodeId::string(2, "Boiler"), NodeId::string(2, "Temp"));
        mock.add_reference(NodeId::string(2, "Boiler"), NodeId::string(2, "Pressure"));
        mock.add_reference(NodeId::string(2, "Plant"), NodeId::string(2, "Status"));
        mock.add_reference(NodeId::string(2, "Plant"), NodeId::string(2, "Temp"));
        mock
    }

    async fn browser(mock: &Arc<MockTransport>, config: OpcUaConfig) -> AddressSpaceBrowser {
        let connection = Arc::new(ConnectionManager::new(
            Arc::new(config),
            Arc::clone(mock) as Arc<dyn OpcUaTransport>,
        ));
        connection.connect().await.unwrap();
        AddressSpaceBrowser::new(connection)
    }

    fn browse_config(max_level: usize, max_per_parent: usize) -> OpcUaConfig {
        OpcUaConfig::builder()
            .browse(max_level, max_per_parent)
            .build()
            .unwrap()
    }

    fn ids(catalog: &NodeCatalog) -> Vec<String> {
        catalog.iter().map(|n| n.id.clone()).collect()
    }

    #[tokio::test]
    async fn test_browse_from_default_roots() {
        let mock = plant();
        let browser = browser(&mock, browse_config(0, 0)).await;
        let catalog = browser.browse().await.unwrap();

        assert_eq!(ids(&catalog), vec!["ns=2;s=Temp", "ns=2;s=Pressure", "ns=2;s=Status"]);

        let temp = catalog.get(0).unwrap();
        assert_eq!(temp.path, "Objects.Plant.Boiler.Temp");
        assert_eq!(temp.display_name, "Temp");
        assert_eq!(temp.value_type, ValueType::Float64);
        assert_eq!(temp.label, "ns=2;s=Temp");
    }

    #[tokio::test]
    async fn test_browse_max_level() {
        let mock = plant();
        // Objects(0) -> Plant(1) -> Status(2); Boiler children are level 3
        let browser = browser(&mock, browse_config(2, 0)).await;
        let catalog = browser.browse().await.unwrap();

        assert_eq!(ids(&catalog), vec!["ns=2;s=Status", "ns=2;s=Temp"]);
        assert_eq!(catalog.get(1).unwrap().path, "Objects.Plant.Temp");
    }

    #[tokio::test]
    async fn test_browse_max_nodes_per_parent() {
        let mock = plant();
        let browser = browser(&mock, browse_config(0, 1)).await;
        let catalog = browser.browse().await.unwrap();

        // only the first child of each parent is visited
        assert_eq!(ids(&catalog), vec!["ns=2;s=Temp"]);
    }

    #[tokio::test]
    async fn test_browse_from_configured_root_keeps_label() {
        let mock = plant();
        let mut config = browse_config(0, 0);
        config.nodes.push(NodeConfig::string(2, "Temp").with_label("boiler.temp"));
        let browser = browser(&mock, config).await;
        let catalog = browser.browse().await.unwrap();

        assert_eq!(catalog.len(), 1);
        let node = catalog.get(0).unwrap();
        assert_eq!(node.label, "boiler.temp");
        assert_eq!(node.path, "Temp");
    }

    #[tokio::test]
    async fn test_browse_attribute_failure_is_skipped() {
        let mock = plant();
        mock.fail_attributes_for(NodeId::string(2, "Boiler"));
        let browser = browser(&mock, browse_config(0, 0)).await;
        let catalog = browser.browse().await.unwrap();

        // Boiler itself is skipped but its children are still visited
        assert_eq!(catalog.len(), 3);
        assert_eq!(browser.stats().attribute_errors.load(Ordering::Relaxed), 1);
        assert_eq!(catalog.get(0).unwrap().path, "Objects.Plant.Temp");
    }

    #[tokio::test]
    async fn test_browse_children_failure_is_leaf() {
        let mock = plant();
        mock.fail_browse_for(NodeId::string(2, "Plant"));
        let browser = browser(&mock, browse_config(0, 0)).await;
        let catalog = browser.browse().await.unwrap();

        assert!(catalog.is_empty());
        assert_eq!(browser.stats().browse_errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_resolve_configured() {
        let mock = plant();
        let config = OpcUaConfig::builder()
            .node(NodeConfig::string(2, "Temp").with_label("boiler.temp"))
            .node(NodeConfig::string(2, "Missing"))
            .node(NodeConfig::string(2, "ns=2;s=Temp"))
            .build()
            .unwrap();
        mock.fail_attributes_for(NodeId::string(2, "Missing"));

        let browser = browser(&mock, config).await;
        let catalog = browser.build_catalog().await.unwrap();

        assert_eq!(catalog.len(), 2);
        let temp = catalog.get(0).unwrap();
        assert_eq!(temp.label, "boiler.temp");
        assert_eq!(temp.value_type, ValueType::Float64);
        assert_eq!(temp.path, "");

        let missing = catalog.get(1).unwrap();
        assert_eq!(missing.label, "ns=2;s=Missing");
        assert_eq!(missing.value_type, ValueType::Unknown);
    }

    #[test]
    fn test_node_attributes_from_values() {
        let values = vec![
            DataValue::good(crate::types::Variant::NodeId(NodeId::numeric(0, 11))),
            DataValue::good("Temperature"),
            DataValue::good("Temp"),
        ];
        let attrs = NodeAttributes::from_values(&values);
        assert_eq!(attrs.value_type, ValueType::Float64);
        assert_eq!(attrs.display_name, "Temperature");
        assert_eq!(attrs.browse_name, "Temp");

        let attrs = NodeAttributes::from_values(&[]);
        assert_eq!(attrs, NodeAttributes::default());
    }
}
