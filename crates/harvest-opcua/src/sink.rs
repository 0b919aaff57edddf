// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Downstream record consumers.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{OpcUaError, OpcUaResult};
use crate::formatter::Record;

// =============================================================================
// EventSink Trait
// =============================================================================

/// Receives formatted records, one call per record.
///
/// A failed publish is logged and counted by the caller; it never aborts the
/// rest of the batch.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publishes one record.
    async fn publish(&self, record: Record) -> OpcUaResult<()>;

    /// Returns the name of this sink for logging.
    fn name(&self) -> &str;
}

// =============================================================================
// MemorySink
// =============================================================================

/// Keeps every published record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
    reject: AtomicU32,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects the next `count` publishes.
    pub fn reject_next(&self, count: u32) {
        self.reject.store(count, Ordering::SeqCst);
    }

    /// Returns a copy of the stored records.
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    /// Removes and returns the stored records.
    pub fn take(&self) -> Vec<Record> {
        std::mem::take(&mut *self.records.lock())
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if nothing was stored.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn publish(&self, record: Record) -> OpcUaResult<()> {
        let rejected = self
            .reject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(OpcUaError::sink(self.name(), "record rejected"));
        }
        self.records.lock().push(record);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> Record {
        let mut record = Record::new();
        record.put("sensor.id", id);
        record
    }

    #[tokio::test]
    async fn test_memory_sink_stores_records() {
        let sink = MemorySink::new();
        sink.publish(record("a")).await.unwrap();
        sink.publish(record("b")).await.unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.take()[1], record("b"));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_memory_sink_rejects() {
        let sink = MemorySink::new();
        sink.reject_next(1);

        let err = sink.publish(record("a")).await.unwrap_err();
        assert_eq!(err.category(), "sink");
        sink.publish(record("b")).await.unwrap();
        assert_eq!(sink.records(), vec![record("b")]);
    }
}
