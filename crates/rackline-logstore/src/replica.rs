//! Primary/follower replica resolution.
//!
//! The primary publishes a snapshot mapping logical segment identity to
//! physical key; a follower resolves reads through the most recently
//! fetched snapshot instead of local naming. Snapshot refresh prefers
//! availability over freshness: a failed fetch keeps the previous
//! snapshot and logs the error.

use crate::LogStore;
use async_trait::async_trait;
use rackline_common::{Error, ReplicaSnapshot, Result, MAIN_DB_KEY};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Control-channel method a follower calls to fetch the snapshot.
pub const GET_REPLICA_SNAPSHOT: &str = "get_replica_snapshot";

const SNAPSHOT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Request/response seam to the primary. The transport behind it is out
/// of this crate's hands.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    async fn request(&self, method: &str, payload: Value, timeout: Duration) -> Result<Value>;
}

/// Rendezvous seam: joining the shared swarm lets the storage primitive
/// stream segment bytes peer-to-peer.
pub trait SwarmHook: Send + Sync {
    fn join(&self, discovery_key: &str) -> Result<()>;
}

impl LogStore {
    /// Build the snapshot a primary publishes: the metadata database
    /// under `main-0`, then every resolvable segment inside the
    /// retention window of every log key.
    pub async fn build_snapshot(&self) -> Result<ReplicaSnapshot> {
        let mut segment_keys = HashMap::new();
        segment_keys.insert(MAIN_DB_KEY.to_string(), self.meta().id().to_hex());

        let height = self.window_height();
        for (log_key, meta) in self.meta().scan()? {
            for offset in 0..height {
                if offset > meta.cur {
                    break;
                }
                let Some(segment) = self.acquire(&log_key, offset, false).await else {
                    continue;
                };
                let point = meta.cur - offset;
                segment_keys.insert(
                    ReplicaSnapshot::segment_key(&log_key, point),
                    segment.id().to_hex(),
                );
                self.release(segment);
            }
        }

        Ok(ReplicaSnapshot {
            discovery_key: self.discovery_key().map(str::to_string),
            segment_keys,
        })
    }

    /// Resolve a logical segment to its physical key through the
    /// current snapshot. Pure lookup; `None` when unmapped or no
    /// snapshot has been fetched yet.
    #[must_use]
    pub fn resolve_replica(&self, log_key: &str, point: u64) -> Option<String> {
        let snapshot = self.snapshot_state().read();
        snapshot
            .as_ref()
            .and_then(|snap| snap.resolve(log_key, point))
            .map(str::to_string)
    }

    /// Install a snapshot and persist it for restart survival. Joins
    /// the swarm when the snapshot carries a rendezvous identifier.
    pub fn install_snapshot(&self, snapshot: ReplicaSnapshot, swarm: Option<&dyn SwarmHook>) {
        if let (Some(hook), Some(key)) = (swarm, snapshot.discovery_key.as_deref()) {
            self.join_swarm(hook, key);
        }
        if let Err(e) = self.persist_snapshot(&snapshot) {
            warn!(error = %e, "failed to persist replica snapshot");
        }
        debug!(segments = snapshot.segment_keys.len(), "installed replica snapshot");
        *self.snapshot_state().write() = Some(snapshot);
    }

    /// Fetch a fresh snapshot from the primary. Returns whether a new
    /// snapshot was installed; any fetch or decode failure keeps the
    /// previous snapshot.
    pub async fn refresh_snapshot(
        &self,
        channel: &dyn ControlChannel,
        swarm: Option<&dyn SwarmHook>,
    ) -> Result<bool> {
        if self.rpc_public_key().is_none() {
            return Ok(false);
        }

        let response = match channel
            .request(GET_REPLICA_SNAPSHOT, Value::Object(Default::default()), SNAPSHOT_FETCH_TIMEOUT)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "replica snapshot fetch failed, keeping previous snapshot");
                return Ok(false);
            }
        };
        let snapshot: ReplicaSnapshot = match serde_json::from_value(response) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "replica snapshot undecodable, keeping previous snapshot");
                return Ok(false);
            }
        };

        self.install_snapshot(snapshot, swarm);
        Ok(true)
    }

    /// Idempotent: re-joining while already joined is a no-op.
    fn join_swarm(&self, hook: &dyn SwarmHook, discovery_key: &str) {
        if self.swarm_joined().swap(true, Ordering::SeqCst) {
            return;
        }
        match hook.join(discovery_key) {
            Ok(()) => info!(discovery_key, "joined replication swarm"),
            Err(e) => {
                self.swarm_joined().store(false, Ordering::SeqCst);
                warn!(discovery_key, error = %e, "failed to join replication swarm");
            }
        }
    }

    fn persist_snapshot(&self, snapshot: &ReplicaSnapshot) -> Result<()> {
        let bytes = serde_json::to_vec(snapshot)?;
        std::fs::write(self.snapshot_path(), bytes)?;
        Ok(())
    }

    /// Primary-side responder for the follower's snapshot-fetch call.
    pub async fn handle_control_request(&self, method: &str, _payload: Value) -> Result<Value> {
        match method {
            GET_REPLICA_SNAPSHOT => Ok(serde_json::to_value(self.build_snapshot().await?)?),
            other => Err(Error::control(format!("unknown method: {other}"))),
        }
    }
}
