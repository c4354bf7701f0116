//! Device → cloud data fanout, log fanout, and the cloud command stream
//! boundary behaviors.

mod common;

use common::{gateway_config, standard_config, wait_for, Fixture};
use edgelink::Connector;
use serde_json::json;

#[tokio::test]
async fn device_data_fans_out_to_every_live_cloud_connector() {
    let fixture = Fixture::new(gateway_config(&[("c1", "Mock"), ("c2", "Mock")], &[("d1", "Mock")]));
    fixture.boot().await;

    let device = fixture.controller.device_connectors().await;
    device["d1"].instance.base().emit_data(json!({ "value": 42 }));

    let stats = fixture.stats.clone();
    wait_for("fanout to both cloud connectors", || {
        stats.data_for("c1").len() == 1 && stats.data_for("c2").len() == 1
    })
    .await;
    assert_eq!(fixture.stats.data_for("c1"), vec![json!({ "value": 42 })]);
}

#[tokio::test]
async fn stopped_cloud_connectors_are_skipped_by_fanout() {
    let fixture = Fixture::new(gateway_config(&[("c1", "Mock"), ("c2", "Mock")], &[("d1", "Mock")]));
    fixture.boot().await;

    let device = fixture.controller.device_connectors().await;
    let d1 = device["d1"].instance.clone();

    d1.base().emit_data(json!({ "value": 42 }));
    let stats = fixture.stats.clone();
    wait_for("first fanout", || stats.data_for("c1").len() == 1).await;

    // Stop c1 through the command stream of c2, then emit again.
    fixture
        .issue_and_await(
            "c2",
            json!([{ "action": "stop_connector", "category": "cloud", "id": "c1", "requestId": "r1" }]),
            "r1",
        )
        .await;

    d1.base().emit_data(json!({ "value": 43 }));
    let stats = fixture.stats.clone();
    wait_for("second fanout reaches c2", || stats.data_for("c2").len() == 2).await;

    // c1 saw exactly one payload in total.
    assert_eq!(fixture.stats.data_for("c1").len(), 1);
}

#[tokio::test]
async fn log_events_from_either_category_reach_cloud_connectors() {
    let fixture = Fixture::new(standard_config());
    fixture.boot().await;

    let device = fixture.controller.device_connectors().await;
    device["d1"].instance.base().emit_log(json!({ "level": "warn", "msg": "voltage sag" }));

    let stats = fixture.stats.clone();
    wait_for("device log fanout", || {
        stats.envelopes_for("c1").iter().any(|env| env["msg"] == "voltage sag")
    })
    .await;

    let cloud = fixture.controller.cloud_connectors().await;
    cloud["c1"].instance.base().emit_log(json!({ "level": "info", "msg": "uplink ok" }));

    let stats = fixture.stats.clone();
    wait_for("cloud log fanout", || {
        stats.envelopes_for("c1").iter().any(|env| env["msg"] == "uplink ok")
    })
    .await;
}

#[tokio::test]
async fn non_sequence_cloud_payloads_are_dropped_without_side_effects() {
    let fixture = Fixture::new(standard_config());
    fixture.boot().await;
    let baseline_inits = fixture.stats.init_count("d1");

    let cloud = fixture.controller.cloud_connectors().await;
    let c1 = cloud["c1"].instance.clone();
    // A mapping, a scalar, and an empty sequence: all dropped.
    c1.base().emit_data(json!({ "action": "stop_connector" }));
    c1.base().emit_data(json!("stop_connector"));
    c1.base().emit_data(json!([]));

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(fixture.stats.envelopes_for("c1").is_empty(), "no command was acknowledged");
    assert_eq!(fixture.stats.init_count("d1"), baseline_inits);
    assert_eq!(fixture.stats.stop_count("d1"), 0);
}

#[tokio::test]
async fn malformed_batch_elements_are_dropped_but_the_rest_execute() {
    let fixture = Fixture::new(standard_config());
    fixture.boot().await;

    let batch = json!([
        5,
        { "command": "has no action" },
        { "action": 17 },
        { "action": "list_connectors", "requestId": "rx" }
    ]);
    let completion = fixture.issue_and_await("c1", batch, "rx").await;
    assert_eq!(completion["data"]["hasErrors"], false);

    // Exactly one command was acknowledged.
    let acks: Vec<_> = fixture
        .stats
        .envelopes_for("c1")
        .into_iter()
        .filter(|env| env["data"]["type"] == "ack")
        .collect();
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0]["data"]["action"], "list_connectors");
}
