// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA client plumbing.
//!
//! - **Transport Layer**: the [`OpcUaTransport`] trait over a client library
//! - **Connection Manager**: session ownership, endpoint selection and retry
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │        Browser / Collectors / FetchScheduler                    │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   ConnectionManager                             │
//! │        (single session, serialized round trips)                 │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    OpcUaTransport                               │
//! │       (OpcUaClientTransport | MockTransport)                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod connection;
mod transport;

#[cfg(feature = "real-transport")]
mod real_transport;

pub use connection::{ConnectionManager, ConnectionState, ConnectionStats, ConnectionStatsSnapshot};
pub use transport::{
    ConnectOptions, ConnectTarget, EndpointDescriptor, Identity, ItemChange, Notification,
    OpcUaTransport, SubscriptionParams,
};

#[cfg(feature = "real-transport")]
pub use real_transport::OpcUaClientTransport;
