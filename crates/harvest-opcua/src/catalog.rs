// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The set of nodes an engine collects.
//!
//! Catalog nodes are created once, either by browsing or from the configured
//! node list, and then shared read-only. Samples reference them through an
//! `Arc`, and monitored items through their catalog index.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::types::{NodeId, ValueType};

// =============================================================================
// CatalogNode
// =============================================================================

/// One collectible point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogNode {
    /// Resolved node identifier.
    #[serde(skip)]
    pub node_id: NodeId,

    /// Identifier in text form, used in records.
    pub id: String,

    /// Configured label, or the identifier when none was configured.
    pub label: String,

    /// Display name discovered on the server.
    pub display_name: String,

    /// Dot-joined browse names from the browse root. Empty for configured nodes.
    pub path: String,

    /// Value type inferred from the DataType attribute.
    pub value_type: ValueType,
}

impl CatalogNode {
    /// Creates a node with no metadata; the label defaults to the identifier.
    pub fn new(node_id: NodeId) -> Self {
        let id = node_id.to_string();
        Self {
            node_id,
            label: id.clone(),
            id,
            display_name: String::new(),
            path: String::new(),
            value_type: ValueType::Unknown,
        }
    }

    /// Sets the label. Empty labels keep the identifier fallback.
    pub fn with_label(mut self, label: Option<&str>) -> Self {
        if let Some(label) = label.filter(|l| !l.trim().is_empty()) {
            self.label = label.to_string();
        }
        self
    }

    /// Sets the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Sets the browse path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Sets the value type.
    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }
}

/// Joins a parent path and a browse name with `.`.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

// =============================================================================
// NodeCatalog
// =============================================================================

/// Ordered, duplicate-free list of catalog nodes.
///
/// The position of a node is its monitored item handle.
#[derive(Debug, Clone, Default)]
pub struct NodeCatalog {
    nodes: Vec<Arc<CatalogNode>>,
    seen: HashSet<NodeId>,
}

impl NodeCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node. Returns `false` if a node with the same id already exists.
    pub fn push(&mut self, node: CatalogNode) -> bool {
        if !self.seen.insert(node.node_id.clone()) {
            return false;
        }
        self.nodes.push(Arc::new(node));
        true
    }

    /// Returns the node at `index`.
    pub fn get(&self, index: usize) -> Option<&Arc<CatalogNode>> {
        self.nodes.get(index)
    }

    /// Returns `true` if a node with this id is in the catalog.
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.seen.contains(node_id)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over the nodes in handle order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<CatalogNode>> {
        self.nodes.iter()
    }

    /// Returns the node ids in handle order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.node_id.clone()).collect()
    }
}

impl FromIterator<CatalogNode> for NodeCatalog {
    fn from_iter<I: IntoIterator<Item = CatalogNode>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for node in iter {
            catalog.push(node);
        }
        catalog
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_fallback() {
        let node = CatalogNode::new(NodeId::string(2, "Temp"));
        assert_eq!(node.label, "ns=2;s=Temp");

        let node = CatalogNode::new(NodeId::string(2, "Temp")).with_label(Some("boiler.temp"));
        assert_eq!(node.label, "boiler.temp");

        let node = CatalogNode::new(NodeId::string(2, "Temp")).with_label(Some(""));
        assert_eq!(node.label, "ns=2;s=Temp");
    }

    #[test]
    fn test_catalog_rejects_duplicates() {
        let mut catalog = NodeCatalog::new();
        assert!(catalog.push(CatalogNode::new(NodeId::string(2, "A"))));
        assert!(catalog.push(CatalogNode::new(NodeId::string(2, "B"))));
        assert!(!catalog.push(CatalogNode::new(NodeId::string(2, "A")).with_label(Some("dup"))));
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(1).unwrap().id, "ns=2;s=B");
        assert!(catalog.contains(&NodeId::string(2, "A")));
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "Objects"), "Objects");
        assert_eq!(join_path("Objects.Boiler", "Temp"), "Objects.Boiler.Temp");
    }
}
