// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA connection and collection engine.
//!
//! Connects to one OPC UA server, resolves the nodes to collect into a
//! catalog (explicitly configured or discovered by browsing the address
//! space) and turns their values into flat records handed to an
//! [`EventSink`]. Collection is either polled (one batched read per
//! trigger, bounded concurrency) or streamed (one subscription whose
//! notifications queue up until the next trigger drains them).
//!
//! # Architecture
//!
//! ```text
//! CollectionEngine
//! ├── ConnectionManager     endpoint selection, retries, session lifecycle
//! ├── AddressSpaceBrowser   NodeCatalog from config or depth-first browse
//! └── FetchScheduler        trigger handling, reconnect, stall watchdog
//!     ├── PollingCollector      batched reads
//!     ├── StreamingCollector    subscription + PendingQueue
//!     └── EventFormatter        samples → Record → EventSink
//! ```
//!
//! All server traffic goes through the [`OpcUaTransport`] trait. The
//! `real-transport` feature provides an implementation on top of the
//! `opcua` crate; the `mock` feature provides an in-memory one.
//!
//! # Error Handling
//!
//! ```text
//! OpcUaError
//! ├── Connection    - Discovery, connect and retry failures
//! ├── Browse        - Address space traversal failures
//! ├── Operation     - Batched read failures
//! ├── Subscription  - Subscription and monitoring errors
//! ├── Configuration - Invalid settings
//! ├── Sink          - Downstream publish failures
//! └── Internal      - Everything else
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use harvest_opcua::{CollectionEngine, MemorySink, NodeConfig, OpcUaConfig};
//!
//! let config = OpcUaConfig::builder()
//!     .endpoint("opc.tcp://plc.local:4840")
//!     .node(NodeConfig::string(2, "Temp").with_label("boiler.temp"))
//!     .build()?;
//!
//! let engine = CollectionEngine::start(config, transport, Arc::new(MemorySink::new())).await?;
//! engine.trigger().await?;
//! engine.shutdown().await;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod browse;
pub mod catalog;
pub mod client;
pub mod collector;
pub mod engine;
pub mod error;
pub mod formatter;
pub mod scheduler;
pub mod sink;
pub mod subscription;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export commonly used types
pub use error::{
    BrowseError, ConfigurationError, ConnectionError, ErrorSeverity, OpcUaError, OpcUaResult,
    OperationError, SubscriptionError,
};

pub use types::{
    AttributeId, BrowseSettings, CollectionMode, ConfiguredId, DataValue, NodeConfig, NodeId,
    NodeIdentifier, OpcUaConfig, OpcUaConfigBuilder, OutputSettings, SecurityMode,
    SecurityPolicy, StatusCode, SubscriptionSettings, ValueType, Variant,
};

pub use client::{
    ConnectOptions, ConnectTarget, ConnectionManager, ConnectionState, ConnectionStatsSnapshot,
    EndpointDescriptor, Identity, ItemChange, Notification, OpcUaTransport, SubscriptionParams,
};

#[cfg(feature = "real-transport")]
pub use client::OpcUaClientTransport;

pub use browse::{AddressSpaceBrowser, BrowseStatistics};
pub use catalog::{CatalogNode, NodeCatalog};
pub use collector::{PollingCollector, ValueSample};
pub use engine::{CollectionEngine, EngineStats};
pub use formatter::{EventFormatter, Record};
pub use scheduler::{FetchScheduler, SchedulerStatsSnapshot, StallWatchdog, TriggerOutcome};
pub use sink::{EventSink, MemorySink};
pub use subscription::{
    PendingQueue, StreamingCollector, SubscriptionHandle, SubscriptionStatsSnapshot,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
