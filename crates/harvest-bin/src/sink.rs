// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! JSON-lines record output.
//!
//! Writes happen on the blocking pool so a slow or stalled stdout never
//! holds up a runtime worker.

use std::io::{self, Write};
use std::sync::Arc;

use async_trait::async_trait;
use harvest_opcua::{EventSink, OpcUaError, OpcUaResult, Record};
use parking_lot::Mutex;

/// Writes each record as one JSON object per line.
pub struct JsonLinesSink<W> {
    writer: Arc<Mutex<W>>,
    name: &'static str,
}

impl JsonLinesSink<io::Stdout> {
    /// A sink writing to stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout(), "stdout")
    }
}

impl<W: Write + Send + 'static> JsonLinesSink<W> {
    /// A sink writing to `writer`.
    pub fn new(writer: W, name: &'static str) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            name,
        }
    }
}

#[async_trait]
impl<W: Write + Send + 'static> EventSink for JsonLinesSink<W> {
    async fn publish(&self, record: Record) -> OpcUaResult<()> {
        let line = record.to_json_string();
        let writer = Arc::clone(&self.writer);

        tokio::task::spawn_blocking(move || {
            let mut writer = writer.lock();
            writeln!(writer, "{line}").and_then(|()| writer.flush())
        })
        .await
        .map_err(|e| OpcUaError::sink(self.name, format!("write task failed: {e}")))?
        .map_err(|e| OpcUaError::sink(self.name, e.to_string()))
    }

    fn name(&self) -> &str {
        self.name
    }
}

// =============================================================================
// Tests
// =============================================================================
