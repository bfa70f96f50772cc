//! Rackline Logstore - segmented time-series log store
//!
//! Turns an ordered durable key-value primitive (redb) into a rotating
//! chain of bounded segments per logical time series, with a bounded
//! warm-handle cache, count-based retention eviction, peer-replica read
//! resolution, and cross-segment range/tail queries.
//!
//! [`LogStore`] is the coordinating context object: every subsystem
//! operation (rotation, cache refresh, snapshot build, tail queries)
//! goes through one owned instance rather than shared globals.

pub mod aggregate;
mod cache;
mod meta;
pub mod query;
pub mod replica;
pub mod segment;

mod rotate;

pub use query::TailQuery;
pub use replica::{ControlChannel, SwarmHook, GET_REPLICA_SNAPSHOT};
pub use rotate::RotationEvent;
pub use segment::{ScanQuery, Segment, SegmentStore};

use cache::CacheEntry;
use meta::MetaDb;
use parking_lot::{Mutex, RwLock};
use rackline_common::{
    Error, LogMeta, RacklineConfig, ReplicaSnapshot, Result, Role, Schedule,
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{debug, trace, warn};

/// The segmented log store context.
pub struct LogStore {
    role: Role,
    rotate_max_len: Option<u64>,
    keep_count: Option<u64>,
    window_height: u64,
    discovery_key: Option<String>,
    rpc_public_key: Option<String>,
    schedule: Schedule,
    meta: MetaDb,
    segments: SegmentStore,
    /// Warm segment handles keyed by physical identity hex. The refresh
    /// pass is the single writer; everyone else borrows handles.
    cache: Mutex<HashMap<String, CacheEntry>>,
    /// Most recently fetched replica snapshot (followers)
    snapshot: RwLock<Option<ReplicaSnapshot>>,
    snapshot_path: PathBuf,
    swarm_joined: AtomicBool,
}

impl LogStore {
    /// Open the store under the configured data directory. A follower
    /// reloads its last persisted replica snapshot so it can resolve
    /// reads before the first refresh completes.
    pub fn open(config: &RacklineConfig, schedule: Schedule) -> Result<Self> {
        let data_dir = &config.node.data_dir;
        let meta = MetaDb::open(data_dir)?;
        let segments = SegmentStore::open(data_dir)?;
        let snapshot_path = data_dir.join("replica-snapshot.json");

        let store = Self {
            role: config.replica.role,
            rotate_max_len: config.log.rotate_max_len,
            keep_count: config.log.keep_count,
            window_height: config.log.max_height(),
            discovery_key: config.replica.discovery_key.clone(),
            rpc_public_key: config.replica.rpc_public_key.clone(),
            schedule,
            meta,
            segments,
            cache: Mutex::new(HashMap::new()),
            snapshot: RwLock::new(None),
            snapshot_path,
            swarm_joined: AtomicBool::new(false),
        };

        if store.role.is_follower() {
            store.load_persisted_snapshot();
        }
        Ok(store)
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Retention window height (`ceil(keep_count * 1.5)`)
    #[must_use]
    pub fn window_height(&self) -> u64 {
        self.window_height
    }

    pub(crate) fn meta(&self) -> &MetaDb {
        &self.meta
    }

    pub(crate) fn segments(&self) -> &SegmentStore {
        &self.segments
    }

    pub(crate) fn cache(&self) -> &Mutex<HashMap<String, CacheEntry>> {
        &self.cache
    }

    pub(crate) fn keep_count(&self) -> Option<u64> {
        self.keep_count
    }

    pub(crate) fn rotate_max_len(&self) -> Option<u64> {
        self.rotate_max_len
    }

    pub(crate) fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub(crate) fn discovery_key(&self) -> Option<&str> {
        self.discovery_key.as_deref()
    }

    pub(crate) fn rpc_public_key(&self) -> Option<&str> {
        self.rpc_public_key.as_deref()
    }

    pub(crate) fn snapshot_state(&self) -> &RwLock<Option<ReplicaSnapshot>> {
        &self.snapshot
    }

    pub(crate) fn snapshot_path(&self) -> &PathBuf {
        &self.snapshot_path
    }

    pub(crate) fn swarm_joined(&self) -> &AtomicBool {
        &self.swarm_joined
    }

    fn load_persisted_snapshot(&self) {
        match std::fs::read(&self.snapshot_path) {
            Ok(bytes) => match serde_json::from_slice::<ReplicaSnapshot>(&bytes) {
                Ok(snap) => {
                    debug!(segments = snap.segment_keys.len(), "restored replica snapshot");
                    *self.snapshot.write() = Some(snap);
                }
                Err(e) => warn!(error = %e, "persisted replica snapshot is unreadable"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "failed to read persisted replica snapshot"),
        }
    }

    fn meta_for(&self, log_key: &str, create: bool) -> Result<Option<LogMeta>> {
        if create && !self.role.is_follower() {
            return self.meta.ensure(log_key).map(Some);
        }
        self.meta.get(log_key)
    }

    /// Acquire the segment `offset` rotations behind the current one.
    ///
    /// Returns `None` for anything that makes the segment unavailable:
    /// unknown log key, an offset beyond the chain, an unmapped replica
    /// point, or an I/O failure while opening. On the primary, a live
    /// segment failing its read probe is sealed in place (the meta
    /// pointer advances past it) and a fresh live segment is returned;
    /// the damaged one is left on disk for forensic recovery.
    pub async fn acquire(
        &self,
        log_key: &str,
        offset: u64,
        create: bool,
    ) -> Option<Arc<Segment>> {
        let meta = match self.meta_for(log_key, create) {
            Ok(Some(meta)) => meta,
            Ok(None) => return None,
            Err(e) => {
                debug!(log_key, error = %e, "failed to load log meta");
                return None;
            }
        };
        if offset > meta.cur {
            return None;
        }
        let point = meta.cur - offset;

        if self.role.is_follower() {
            let physical = {
                let snapshot = self.snapshot.read();
                snapshot.as_ref()?.resolve(log_key, point)?.to_string()
            };
            match self.segments.open_replica(&physical) {
                Ok(segment) => segment,
                Err(e) => {
                    debug!(log_key, point, physical, error = %e, "failed to open replica segment");
                    None
                }
            }
        } else {
            match self.segments.open_named(log_key, point, create) {
                Ok(Some(segment)) => {
                    if offset == 0 && segment.probe().is_err() {
                        warn!(log_key, point, "live segment failed read probe, sealing it");
                        drop(segment);
                        self.heal_live_segment(log_key)
                    } else {
                        Some(segment)
                    }
                }
                Ok(None) => None,
                Err(e) if offset == 0 => {
                    warn!(log_key, point, error = %e, "live segment unreadable, sealing it");
                    self.heal_live_segment(log_key)
                }
                Err(e) => {
                    debug!(log_key, point, error = %e, "failed to open segment");
                    None
                }
            }
        }
    }

    /// Seal a damaged live segment by advancing `cur` (an implicit
    /// rotation; the old file stays put) and open the new empty one.
    fn heal_live_segment(&self, log_key: &str) -> Option<Arc<Segment>> {
        let meta = match self.meta.advance(log_key) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(log_key, error = %e, "failed to seal corrupted live segment");
                return None;
            }
        };
        match self.segments.open_named(log_key, meta.cur, true) {
            Ok(segment) => segment,
            Err(e) => {
                warn!(log_key, cur = meta.cur, error = %e, "failed to open replacement segment");
                None
            }
        }
    }

    /// Write one `(ts, record)` into the segment at `offset`, optionally
    /// creating the series. A silently absent segment is a no-op.
    pub async fn append(
        &self,
        log_key: &str,
        ts: u64,
        record: &Value,
        offset: u64,
        create: bool,
    ) -> Result<()> {
        if self.role.is_follower() {
            return Err(Error::RoleViolation("append"));
        }
        let Some(segment) = self.acquire(log_key, offset, create).await else {
            return Ok(());
        };
        let result = segment.put(ts, record);
        self.release(segment);
        result
    }

    /// Release a segment handle acquired through [`Self::acquire`].
    /// Callers must release on every exit path.
    pub fn release(&self, segment: Arc<Segment>) {
        trace!(segment = %segment.id(), "releasing segment handle");
        drop(segment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rackline_common::LogConfig;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_store(dir: &TempDir) -> LogStore {
        let mut config = RacklineConfig::default();
        config.node.data_dir = dir.path().to_path_buf();
        config.log = LogConfig {
            rotate_max_len: Some(5),
            keep_count: Some(3),
        };
        LogStore::open(&config, Schedule::default()).unwrap()
    }

    #[tokio::test]
    async fn test_acquire_creates_lazily() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        assert!(store.acquire("stat-5m", 0, false).await.is_none());

        let seg = store.acquire("stat-5m", 0, true).await.unwrap();
        assert_eq!(seg.len().unwrap(), 0);
        store.release(seg);

        // now it exists without create
        assert!(store.acquire("stat-5m", 0, false).await.is_some());
    }

    #[tokio::test]
    async fn test_acquire_offsets_walk_the_chain() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        store
            .append("stat-5m", 100, &json!({ "ts": 100 }), 0, true)
            .await
            .unwrap();
        let first_id = {
            let seg = store.acquire("stat-5m", 0, false).await.unwrap();
            let id = seg.id();
            store.release(seg);
            id
        };
        store.meta().advance("stat-5m").unwrap();
        store
            .append("stat-5m", 200, &json!({ "ts": 200 }), 0, true)
            .await
            .unwrap();

        let live = store.acquire("stat-5m", 0, false).await.unwrap();
        assert_ne!(live.id(), first_id);
        store.release(live);

        let sealed = store.acquire("stat-5m", 1, false).await.unwrap();
        assert_eq!(sealed.id(), first_id);
        store.release(sealed);

        // beyond the chain
        assert!(store.acquire("stat-5m", 2, false).await.is_none());
    }

    #[tokio::test]
    async fn test_corrupted_live_segment_heals_in_place() {
        let dir = TempDir::new().unwrap();
        let (damaged_path, cur_before) = {
            let store = test_store(&dir);
            store
                .append("stat-5m", 100, &json!({ "ts": 100 }), 0, true)
                .await
                .unwrap();
            let seg = store.acquire("stat-5m", 0, false).await.unwrap();
            let path = seg.path().to_path_buf();
            store.release(seg);
            (path, store.meta().get("stat-5m").unwrap().unwrap().cur)
        };

        // trash the live segment on disk
        std::fs::write(&damaged_path, b"garbage, not a database").unwrap();

        let store = test_store(&dir);
        let seg = store.acquire("stat-5m", 0, true).await.unwrap();
        // the returned handle is usable
        seg.put(200, &json!({ "ts": 200 })).unwrap();
        assert_eq!(seg.len().unwrap(), 1);
        store.release(seg);

        // one implicit rotation, damaged file still present
        let meta = store.meta().get("stat-5m").unwrap().unwrap();
        assert_eq!(meta.cur, cur_before + 1);
        assert!(damaged_path.exists());
    }

    #[tokio::test]
    async fn test_follower_append_is_a_role_violation() {
        let dir = TempDir::new().unwrap();
        let mut config = RacklineConfig::default();
        config.node.data_dir = dir.path().to_path_buf();
        config.replica.role = Role::Follower;
        let store = LogStore::open(&config, Schedule::default()).unwrap();

        let err = store
            .append("stat-5m", 1, &json!({ "ts": 1 }), 0, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RoleViolation(_)));
    }
}
