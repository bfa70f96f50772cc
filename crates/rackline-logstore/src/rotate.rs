//! Segment rotation.
//!
//! A sweep over every known log key that seals live segments which have
//! reached the configured maximum length. Sealing only moves the meta
//! pointer; old segments are destroyed later by retention eviction,
//! never here.

use crate::LogStore;
use rackline_common::{LogMeta, Result};
use tracing::{debug, warn};

/// One rotation performed by a sweep: the log key, its meta after the
/// advance, and the live segment length that triggered it.
#[derive(Clone, Debug)]
pub struct RotationEvent {
    pub log_key: String,
    pub meta: LogMeta,
    pub observed_len: u64,
}

impl LogStore {
    /// Rotate every live segment that reached the configured maximum
    /// length. A no-op on followers and when no maximum is configured.
    /// One log key's failure never aborts the others.
    pub async fn rotate_logs(&self) -> Result<Vec<RotationEvent>> {
        if self.role().is_follower() {
            return Ok(Vec::new());
        }
        let Some(max_len) = self.rotate_max_len() else {
            return Ok(Vec::new());
        };

        let mut events = Vec::new();
        for (log_key, _) in self.meta().scan()? {
            let Some(segment) = self.acquire(&log_key, 0, false).await else {
                continue;
            };
            match segment.len() {
                Ok(len) if len >= max_len => match self.meta().advance(&log_key) {
                    Ok(advanced) => {
                        debug!(log_key, cur = advanced.cur, len, "rotated live segment");
                        events.push(RotationEvent {
                            log_key: log_key.clone(),
                            meta: advanced,
                            observed_len: len,
                        });
                    }
                    Err(e) => warn!(log_key, error = %e, "failed to advance log meta"),
                },
                Ok(_) => {}
                Err(e) => debug!(log_key, error = %e, "failed to read live segment length"),
            }
            self.release(segment);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use crate::LogStore;
    use rackline_common::{LogConfig, RacklineConfig, Role, Schedule};
    use serde_json::json;
    use tempfile::TempDir;

    fn store_with_max_len(dir: &TempDir, max_len: Option<u64>, role: Role) -> LogStore {
        let mut config = RacklineConfig::default();
        config.node.data_dir = dir.path().to_path_buf();
        config.replica.role = role;
        config.log = LogConfig {
            rotate_max_len: max_len,
            keep_count: Some(3),
        };
        LogStore::open(&config, Schedule::default()).unwrap()
    }

    async fn write_records(store: &LogStore, log_key: &str, count: u64) {
        for i in 0..count {
            store
                .append(log_key, 1_000 + i, &json!({ "ts": 1_000 + i }), 0, true)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_rotation_at_exact_threshold() {
        let dir = TempDir::new().unwrap();
        let store = store_with_max_len(&dir, Some(5), Role::Primary);
        write_records(&store, "stat-5m", 5).await;

        let events = store.rotate_logs().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].log_key, "stat-5m");
        assert_eq!(events[0].observed_len, 5);
        assert_eq!(events[0].meta.cur, 1);

        // new live segment is empty
        let live = store.acquire("stat-5m", 0, true).await.unwrap();
        assert_eq!(live.len().unwrap(), 0);
        store.release(live);
        assert_eq!(store.meta().get("stat-5m").unwrap().unwrap().cur, 1);
    }

    #[tokio::test]
    async fn test_no_rotation_below_threshold() {
        let dir = TempDir::new().unwrap();
        let store = store_with_max_len(&dir, Some(5), Role::Primary);
        write_records(&store, "stat-5m", 4).await;

        let events = store.rotate_logs().await.unwrap();
        assert!(events.is_empty());
        assert_eq!(store.meta().get("stat-5m").unwrap().unwrap().cur, 0);
    }

    #[tokio::test]
    async fn test_rotation_unconfigured_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = store_with_max_len(&dir, None, Role::Primary);
        write_records(&store, "stat-5m", 50).await;
        assert!(store.rotate_logs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rotation_noop_on_follower() {
        let dir = TempDir::new().unwrap();
        let store = store_with_max_len(&dir, Some(1), Role::Follower);
        assert!(store.rotate_logs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_absent_live_segment_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = store_with_max_len(&dir, Some(5), Role::Primary);
        // meta exists but the live segment file does not
        store.meta().ensure("stat-5m").unwrap();
        write_records(&store, "stat-1h", 5).await;

        let events = store.rotate_logs().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].log_key, "stat-1h");
    }
}
