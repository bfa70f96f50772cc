//! Follower read path over materialized replica segments.
//!
//! Simulates what the replication transport delivers: the primary's
//! metadata database and segment bytes land in the follower's data
//! directory, the snapshot maps logical identity to physical key, and
//! tail queries resolve through it.

use rackline_common::{
    LogConfig, RacklineConfig, ReplicaSnapshot, Role, Schedule, MAIN_DB_KEY,
};
use rackline_logstore::{LogStore, TailQuery};
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;

const CADENCE_MS: u64 = 5 * 60 * 1000;
const BASE_TS: u64 = 1_700_000_000_000;
const LOG_KEY: &str = "stat-5m-t-miner";

fn tick(i: u64) -> u64 {
    BASE_TS + i * CADENCE_MS
}

async fn seeded_primary(dir: &TempDir) -> (LogStore, ReplicaSnapshot) {
    let mut config = RacklineConfig::default();
    config.node.data_dir = dir.path().to_path_buf();
    config.log = LogConfig {
        rotate_max_len: Some(5),
        keep_count: Some(3),
    };
    let schedule = Schedule::new(vec![("5m".into(), CADENCE_MS)]);
    let store = LogStore::open(&config, schedule).unwrap();

    for i in 0..5 {
        store
            .append(LOG_KEY, tick(i), &json!({ "ts": tick(i), "power": i }), 0, true)
            .await
            .unwrap();
    }
    assert_eq!(store.rotate_logs().await.unwrap().len(), 1);
    for i in 5..10 {
        store
            .append(LOG_KEY, tick(i), &json!({ "ts": tick(i), "power": i }), 0, true)
            .await
            .unwrap();
    }

    let snapshot = store.build_snapshot().await.unwrap();
    (store, snapshot)
}

/// Copy the primary's durable state the way the replication transport
/// would deliver it: meta database verbatim, each segment under its
/// physical key in the follower's replica directory.
fn materialize(primary_dir: &Path, follower_dir: &Path, snapshot: &ReplicaSnapshot) {
    std::fs::create_dir_all(follower_dir.join("replica")).unwrap();
    std::fs::copy(
        primary_dir.join("meta.redb"),
        follower_dir.join("meta.redb"),
    )
    .unwrap();
    for (logical, physical) in &snapshot.segment_keys {
        if logical == MAIN_DB_KEY {
            continue;
        }
        std::fs::copy(
            primary_dir.join("segments").join(format!("{logical}.redb")),
            follower_dir.join("replica").join(format!("{physical}.redb")),
        )
        .unwrap();
    }
}

fn open_follower(dir: &TempDir) -> LogStore {
    let mut config = RacklineConfig::default();
    config.node.data_dir = dir.path().to_path_buf();
    config.replica.role = Role::Follower;
    config.replica.rpc_public_key = Some("primary-rpc".into());
    let schedule = Schedule::new(vec![("5m".into(), CADENCE_MS)]);
    LogStore::open(&config, schedule).unwrap()
}

#[tokio::test]
async fn follower_tail_resolves_through_snapshot() {
    let primary_dir = TempDir::new().unwrap();
    let follower_dir = TempDir::new().unwrap();

    let (primary, snapshot) = seeded_primary(&primary_dir).await;
    drop(primary);
    materialize(primary_dir.path(), follower_dir.path(), &snapshot);

    let follower = open_follower(&follower_dir);
    follower.install_snapshot(snapshot, None);

    // stitches across both replicated segments, most-recent-first
    let records = follower
        .tail(
            LOG_KEY,
            &TailQuery {
                limit: Some(7),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(records.len(), 7);
    assert_eq!(records[0]["ts"].as_u64().unwrap(), tick(9));
    assert_eq!(records[6]["ts"].as_u64().unwrap(), tick(3));
}

#[tokio::test]
async fn follower_without_snapshot_cannot_resolve() {
    let primary_dir = TempDir::new().unwrap();
    let follower_dir = TempDir::new().unwrap();

    let (primary, snapshot) = seeded_primary(&primary_dir).await;
    drop(primary);
    materialize(primary_dir.path(), follower_dir.path(), &snapshot);

    // meta knows the key but no snapshot maps it to physical bytes
    let follower = open_follower(&follower_dir);
    let err = follower
        .tail(LOG_KEY, &TailQuery::default())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn follower_survives_unmapped_tail_segments() {
    let primary_dir = TempDir::new().unwrap();
    let follower_dir = TempDir::new().unwrap();

    let (primary, mut snapshot) = seeded_primary(&primary_dir).await;
    drop(primary);
    materialize(primary_dir.path(), follower_dir.path(), &snapshot);

    // the sealed segment drops out of the snapshot; partial results win
    snapshot
        .segment_keys
        .remove(&format!("{LOG_KEY}-0"))
        .unwrap();
    let follower = open_follower(&follower_dir);
    follower.install_snapshot(snapshot, None);

    let records = follower
        .tail(
            LOG_KEY,
            &TailQuery {
                limit: Some(7),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    // only the live segment's five records are reachable
    assert_eq!(records.len(), 5);
    assert_eq!(records[0]["ts"].as_u64().unwrap(), tick(9));
    assert_eq!(records[4]["ts"].as_u64().unwrap(), tick(5));
}
