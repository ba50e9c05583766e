//! End-to-end pipeline: normalize -> partition -> preload -> verify ->
//! replay -> re-replay, against the in-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;

use aqua_core::{Location, Parameter, DEFAULT_PRELOAD_RATIO};
use aqua_ingest::{parse_flow_csv, parse_quality_csv, LabelMap};
use aqua_store::{MeasurementStore, MemoryStore};
use aqua_sync::{load_preload, partition_groups, verify, ReplayScheduler, ReplayStep};

fn quality_fixture() -> String {
    let mut text = String::from("1. HUMIDITY, Safe Range: (30 to 70)\nDate,Time,Value\n");
    for day in 1..=10 {
        text.push_str(&format!("{day:02}-01-2025,08:00:00,{}\n", 40.0 + day as f64));
    }
    text.push_str("2. STP (BOD), Safe Range: (0 to 5)\nDate,Time,Value\n");
    for day in 1..=5 {
        text.push_str(&format!("{day:02}-01-2025,08:00:00,{}\n", 1.0 + day as f64 / 10.0));
    }
    text
}

fn flow_fixture() -> String {
    let mut text = String::from("Location Name: Corporation Water\nDate,Time,Totalizer\n");
    for day in 1..=5 {
        text.push_str(&format!("{day:02}-01-2025,08:00:00,{}\n", 1000.0 + day as f64));
    }
    text
}

#[tokio::test]
async fn preload_then_replay_reconstitutes_every_group() {
    let quality = parse_quality_csv(&quality_fixture(), &LabelMap::builtin());
    let flow = parse_flow_csv(&flow_fixture());
    assert_eq!(quality.summary.rows_kept, 15);
    assert_eq!(flow.summary.rows_kept, 5);

    let store = Arc::new(MemoryStore::new());

    let (quality_pre, quality_rem) =
        partition_groups(quality.groups.clone(), DEFAULT_PRELOAD_RATIO);
    let (flow_pre, flow_rem) = partition_groups(flow.groups.clone(), DEFAULT_PRELOAD_RATIO);

    let summary = load_preload(store.as_ref(), &quality_pre, &flow_pre)
        .await
        .unwrap();
    assert_eq!(summary.quality_rows, 8 + 4);
    assert_eq!(summary.flow_rows, 4);

    // the verifier agrees with the loader before any replay happens
    let report = verify(store.as_ref(), &quality, &flow, DEFAULT_PRELOAD_RATIO)
        .await
        .unwrap();
    assert!(report.pass);

    let mut scheduler = ReplayScheduler::new(store.clone(), quality_rem.clone(), flow_rem.clone());
    assert_eq!(scheduler.remaining(), 2 + 1 + 1);
    while scheduler.release_next().await != ReplayStep::Drained {}

    assert_eq!(store.quality_count(Parameter::Humidity).await.unwrap(), 10);
    assert_eq!(store.quality_count(Parameter::StpBod).await.unwrap(), 5);
    assert_eq!(
        store.flow_count(Location::CorporationWater).await.unwrap(),
        5
    );

    // replaying the remainder again converges to the same state
    let rows_before = store.quality_rows().await;
    let mut scheduler = ReplayScheduler::new(store.clone(), quality_rem, flow_rem);
    while scheduler.release_next().await != ReplayStep::Drained {}
    assert_eq!(store.quality_rows().await, rows_before);
}
