// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! End-to-end collection scenarios against the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;

use harvest_opcua::mock::MockTransport;
use harvest_opcua::{
    CollectionEngine, CollectionMode, DataValue, EventSink, MemorySink, NodeConfig, NodeId,
    OpcUaConfig, OpcUaConfigBuilder, OpcUaTransport, TriggerOutcome, ValueType,
};

// =============================================================================
// Fixtures
// =============================================================================

fn temp() -> NodeId {
    NodeId::string(2, "Temp")
}

fn boiler() -> Arc<MockTransport> {
    let mock = Arc::new(MockTransport::new());
    mock.add_folder(NodeId::OBJECTS_FOLDER, "Objects");
    mock.add_folder(NodeId::VIEWS_FOLDER, "Views");
    mock.add_folder(NodeId::string(2, "Boiler"), "Boiler");
    mock.add_variable(temp(), "Temp", ValueType::Float64, 72.5);
    mock.add_variable(NodeId::string(2, "Level"), "Level", ValueType::Int32, 40);
    mock.add_reference(NodeId::OBJECTS_FOLDER, NodeId::string(2, "Boiler"));
    mock.add_reference(NodeId::string(2, "Boiler"), temp());
    mock.add_reference(NodeId::string(2, "Boiler"), NodeId::string(2, "Level"));
    mock
}

fn base(mode: CollectionMode) -> OpcUaConfigBuilder {
    OpcUaConfig::builder()
        .endpoint("opc.tcp://boiler:4840")
        .node(NodeConfig::string(2, "Temp").with_label("boiler.temp"))
        .mode(mode)
        .retry_delay(Duration::from_millis(1))
        .reconnect_backoff(Duration::from_millis(1))
}

async fn start(
    mock: &Arc<MockTransport>,
    config: OpcUaConfig,
) -> (CollectionEngine, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let engine = CollectionEngine::start(
        config,
        Arc::clone(mock) as Arc<dyn OpcUaTransport>,
        Arc::clone(&sink) as Arc<dyn EventSink>,
    )
    .await
    .unwrap();
    (engine, sink)
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

// =============================================================================
// Polling
// =============================================================================

#[tokio::test]
async fn test_polling_boiler_record() {
    let mock = boiler();
    let source = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    mock.set_data_value(&temp(), DataValue::good(72.5).with_source_timestamp(source));

    let (engine, sink) = start(&mock, base(CollectionMode::Polling).build().unwrap()).await;
    assert_eq!(engine.trigger().await.unwrap(), TriggerOutcome::Launched);
    engine.scheduler().wait_idle().await;

    let records = sink.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.get("sensor.id"), Some(&json!("ns=2;s=Temp")));
    assert_eq!(record.get("sensor.label"), Some(&json!("boiler.temp")));
    assert_eq!(record.get("value.value_float64"), Some(&json!(72.5)));
    assert_eq!(
        record.get("value.source_timestamp"),
        Some(&json!("2024-03-01T12:00:00Z"))
    );
    assert_eq!(record.get("event.outcome"), Some(&json!("success")));
    assert!(!record.contains("value.status_code"));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_polling_concurrency_bound() {
    let mock = boiler();
    mock.set_read_latency(Duration::from_millis(200));
    let config = base(CollectionMode::Polling)
        .max_concurrent_cycles(2)
        .build()
        .unwrap();
    let (engine, sink) = start(&mock, config).await;

    assert_eq!(engine.trigger().await.unwrap(), TriggerOutcome::Launched);
    assert_eq!(engine.trigger().await.unwrap(), TriggerOutcome::Launched);
    assert_eq!(engine.trigger().await.unwrap(), TriggerOutcome::Skipped);

    engine.scheduler().wait_idle().await;
    assert!(mock.max_concurrent_reads() <= 2);
    assert_eq!(mock.read_value_calls(), 2);
    assert_eq!(sink.len(), 2);

    let stats = engine.stats();
    assert_eq!(stats.scheduler.launched, 2);
    assert_eq!(stats.scheduler.skipped, 1);

    // permits come back once the cycles finish
    assert_eq!(engine.trigger().await.unwrap(), TriggerOutcome::Launched);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_polling_unknown_node_reports_status() {
    let mock = boiler();
    let config = base(CollectionMode::Polling)
        .node(NodeConfig::string(2, "Missing"))
        .build()
        .unwrap();
    let (engine, sink) = start(&mock, config).await;

    engine.trigger().await.unwrap();
    engine.scheduler().wait_idle().await;

    let records = sink.records();
    assert_eq!(records.len(), 2);
    let missing = &records[1];
    assert_eq!(missing.get("event.outcome"), Some(&json!("failure")));
    assert_eq!(missing.get("value.status_code"), Some(&json!("0x80340000")));
    assert!(!missing.contains("value.value"));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_polling_read_failure_reconnects() {
    let mock = boiler();
    let (engine, sink) = start(&mock, base(CollectionMode::Polling).build().unwrap()).await;

    mock.fail_next_reads(1);
    assert_eq!(engine.trigger().await.unwrap(), TriggerOutcome::Launched);
    engine.scheduler().wait_idle().await;
    assert!(!engine.is_connected());
    assert!(sink.is_empty());

    assert_eq!(engine.trigger().await.unwrap(), TriggerOutcome::Reconnected);
    assert!(engine.is_connected());
    assert_eq!(mock.connect_count(), 2);

    assert_eq!(engine.trigger().await.unwrap(), TriggerOutcome::Launched);
    engine.scheduler().wait_idle().await;
    assert_eq!(sink.len(), 1);

    let stats = engine.stats();
    assert_eq!(stats.scheduler.failed, 1);
    assert_eq!(stats.scheduler.reconnects, 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_budget_exhausted() {
    let mock = boiler();
    let config = base(CollectionMode::Polling)
        .retry_on_error(2)
        .build()
        .unwrap();
    let (engine, _sink) = start(&mock, config).await;

    engine.connection().close().await;
    mock.fail_next_connects(10);

    assert!(engine.trigger().await.is_err());
    assert_eq!(mock.connect_count(), 3);
    assert!(!engine.is_connected());
}

// =============================================================================
// Streaming
// =============================================================================

#[tokio::test]
async fn test_streaming_drains_changes() {
    let mock = boiler();
    let (engine, sink) = start(&mock, base(CollectionMode::Streaming).build().unwrap()).await;
    let queue = Arc::clone(engine.scheduler().pending_queue().unwrap());

    mock.set_value(&temp(), 73.0);
    mock.set_value(&temp(), 74.5);
    wait_for(|| queue.len() == 2).await;

    assert_eq!(engine.trigger().await.unwrap(), TriggerOutcome::Drained(2));
    let records = sink.take();
    assert_eq!(records[0].get("value.value_float64"), Some(&json!(73.0)));
    assert_eq!(records[1].get("value.value_float64"), Some(&json!(74.5)));

    assert_eq!(engine.trigger().await.unwrap(), TriggerOutcome::Drained(0));
    assert_eq!(mock.read_value_calls(), 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_streaming_stall_forces_resubscribe() {
    let mock = boiler();
    let config = base(CollectionMode::Streaming)
        .stall_budget(2)
        .build()
        .unwrap();
    let (engine, sink) = start(&mock, config).await;
    let first = engine.scheduler().subscription().unwrap().id();

    assert_eq!(engine.trigger().await.unwrap(), TriggerOutcome::Drained(0));
    assert!(engine.is_connected());
    assert_eq!(engine.trigger().await.unwrap(), TriggerOutcome::Drained(0));
    assert!(!engine.is_connected());
    assert_eq!(engine.stats().scheduler.stalls, 1);

    assert_eq!(engine.trigger().await.unwrap(), TriggerOutcome::Reconnected);
    let second = engine.scheduler().subscription().unwrap();
    assert_ne!(second.id(), first);
    assert_eq!(mock.monitored_handles(second.id()), vec![0]);
    assert_eq!(engine.scheduler().watchdog().remaining(), 2);

    mock.set_value(&temp(), 80.0);
    let queue = Arc::clone(engine.scheduler().pending_queue().unwrap());
    wait_for(|| queue.len() == 1).await;
    assert_eq!(engine.trigger().await.unwrap(), TriggerOutcome::Drained(1));
    assert_eq!(sink.len(), 1);
    engine.shutdown().await;
}

// =============================================================================
// Discovery
// =============================================================================

#[tokio::test]
async fn test_browse_discovery_feeds_polling() {
    let mock = boiler();
    let config = OpcUaConfig::builder()
        .mode(CollectionMode::Polling)
        .browse(0, 0)
        .build()
        .unwrap();
    let (engine, sink) = start(&mock, config).await;

    let ids: Vec<&str> = engine.catalog().iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["ns=2;s=Temp", "ns=2;s=Level"]);

    engine.trigger().await.unwrap();
    engine.scheduler().wait_idle().await;

    let records = sink.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get("sensor.path"), Some(&json!("Objects.Boiler.Temp")));
    assert_eq!(records[1].get("value.value_int32"), Some(&json!(40)));
    engine.shutdown().await;
}
