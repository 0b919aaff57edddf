// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Value samples and the polling collector.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::catalog::{CatalogNode, NodeCatalog};
use crate::client::ConnectionManager;
use crate::error::{OpcUaError, OpcUaResult, OperationError};
use crate::types::{DataValue, StatusCode, Variant};

// =============================================================================
// ValueSample
// =============================================================================

/// One observed value of one catalog node.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSample {
    /// The node this value belongs to.
    pub node: Arc<CatalogNode>,

    /// Status reported for this node.
    pub status: StatusCode,

    /// Source timestamp, if the server provided one.
    pub source_timestamp: Option<DateTime<Utc>>,

    /// Raw value.
    pub value: Variant,
}

impl ValueSample {
    /// Builds a sample from a read result.
    pub fn new(node: Arc<CatalogNode>, value: DataValue) -> Self {
        Self {
            node,
            status: value.status,
            source_timestamp: value.source_timestamp,
            value: value.value,
        }
    }

    /// Returns `true` if the status is good.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.status.is_good()
    }
}

// =============================================================================
// PollingCollector
// =============================================================================

/// Reads every catalog node in one batched request.
#[derive(Debug, Clone)]
pub struct PollingCollector {
    connection: Arc<ConnectionManager>,
}

impl PollingCollector {
    /// Creates a collector on the given connection.
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    /// Reads the current value of every node in `catalog`.
    ///
    /// Results are zipped onto the catalog by position. A transport failure
    /// fails the whole batch; per-node bad statuses are kept on the samples.
    pub async fn collect(&self, catalog: &NodeCatalog) -> OpcUaResult<Vec<ValueSample>> {
        if catalog.is_empty() {
            return Ok(Vec::new());
        }

        let node_ids = catalog.node_ids();
        let values = self.connection.read_values(&node_ids).await.map_err(|e| {
            error!(nodes = node_ids.len(), error = %e, "Batched read failed");
            match e {
                OpcUaError::Operation(_) => e,
                other => OpcUaError::read_failed(other.to_string()),
            }
        })?;

        if values.len() != node_ids.len() {
            error!(
                expected = node_ids.len(),
                actual = values.len(),
                "Batched read returned a different number of results"
            );
            return Err(OpcUaError::operation(OperationError::ResultCountMismatch {
                expected: node_ids.len(),
                actual: values.len(),
            }));
        }

        let samples: Vec<ValueSample> = catalog
            .iter()
            .zip(values)
            .map(|(node, value)| ValueSample::new(Arc::clone(node), value))
            .collect();

        debug!(
            samples = samples.len(),
            bad = samples.iter().filter(|s| !s.is_ok()).count(),
            "Batched read complete"
        );
        Ok(samples)
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
    use crate::types::{NodeConfig, NodeId, OpcUaConfig, ValueType};

    async fn setup() -> (Arc<MockTransport>, PollingCollector, NodeCatalog) {
        let mock = Arc::new(MockTransport::new());
        mock.add_variable(NodeId::string(2, "Temp"), "Temp", ValueType::Float64, 72.5);
        mock.add_variable(NodeId::string(2, "Count"), "Count", ValueType::Int32, 7);

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
            CatalogNode::new(NodeId::string(2, "Count")),
        ]
        .into_iter()
        .collect();

        (mock, PollingCollector::new(connection), catalog)
    }

    #[tokio::test]
    async fn test_collect_zips_by_position() {
        let (mock, collector, catalog) = setup().await;
        let samples = collector.collect(&catalog).await.unwrap();

        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].node.id, "ns=2;s=Temp");
        assert_eq!(samples[0].value, Variant::Double(72.5));
        assert!(samples[0].is_ok());
        assert!(samples[0].source_timestamp.is_some());

        assert_eq!(samples[1].status, StatusCode::BAD_NODE_ID_UNKNOWN);
        assert_eq!(samples[2].value, Variant::Int32(7));
        assert_eq!(mock.read_value_calls(), 1);
    }

    #[tokio::test]
    async fn test_collect_empty_catalog_skips_round_trip() {
        let (mock, collector, _) = setup().await;
        let samples = collector.collect(&NodeCatalog::new()).await.unwrap();
        assert!(samples.is_empty());
        assert_eq!(mock.read_value_calls(), 0);
    }

    #[tokio::test]
    async fn test_collect_transport_failure_fails_batch() {
        let (mock, collector, catalog) = setup().await;
        mock.fail_next_reads(1);

        let err = collector.collect(&catalog).await.unwrap_err();
        assert!(err.is_connection_loss());
    }

    #[tokio::test]
    async fn test_collect_count_mismatch_is_batch_error() {
        let (mock, collector, catalog) = setup().await;
        mock.truncate_next_read();

        let err = collector.collect(&catalog).await.unwrap_err();
        assert!(matches!(
            err,
            OpcUaError::Operation(OperationError::ResultCountMismatch { expected: 3, actual: 2 })
        ));
    }
}
