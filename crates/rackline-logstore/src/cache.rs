//! Warm-handle cache and count-based retention eviction.
//!
//! Segments are comparatively expensive to open, so the refresh pass
//! keeps one long-lived handle per physical segment inside the
//! retention window. Retention is expressed in rotation counts rather
//! than wall-clock time, decoupling it from write-rate variance.

use crate::LogStore;
use crate::segment::Segment;
use rackline_common::{Result, max_height};
use std::sync::Arc;
use tracing::{debug, warn};

/// One cached handle. `offset` is the distance from the current segment
/// as of the last scan; `-1` marks an entry not reconfirmed yet.
pub(crate) struct CacheEntry {
    pub segment: Arc<Segment>,
    pub offset: i64,
    pub log_key: String,
}

impl LogStore {
    /// Refresh the warm-handle cache and evict segments that fell out
    /// of the retention window. A no-op when no keep count is
    /// configured.
    ///
    /// After a run: at most one entry per physical segment, every
    /// offset current as of the scan, and per-log-key cache size
    /// bounded by `ceil(keep_count * 1.5)`.
    pub async fn refresh_cache(&self) -> Result<()> {
        let Some(keep_count) = self.keep_count() else {
            return Ok(());
        };
        let height = max_height(keep_count);

        // Mark every entry provisionally stale; the rescan below
        // reconfirms whatever is still inside the window.
        {
            let mut cache = self.cache().lock();
            for entry in cache.values_mut() {
                entry.offset = -1;
            }
        }

        for (log_key, meta) in self.meta().scan()? {
            for offset in 0..height {
                let Some(segment) = self.acquire(&log_key, offset, false).await else {
                    continue;
                };
                let physical = segment.id().to_hex();

                let mut cache = self.cache().lock();
                if let Some(entry) = cache.get_mut(&physical) {
                    entry.offset = i64::try_from(offset).unwrap_or(i64::MAX);
                    drop(cache);
                    // the cache already owns this segment's handle
                    self.release(segment);
                    continue;
                }
                debug!(log_key, offset, cur = meta.cur, physical, "caching segment handle");
                cache.insert(
                    physical,
                    CacheEntry {
                        segment,
                        offset: i64::try_from(offset).unwrap_or(i64::MAX),
                        log_key: log_key.clone(),
                    },
                );
            }
        }

        self.cleanup_cache();
        Ok(())
    }

    /// Drop every entry left marked stale and best-effort delete its
    /// backing segment. A delete failure is logged and does not abort
    /// the remaining cleanup.
    fn cleanup_cache(&self) {
        let stale: Vec<(String, CacheEntry)> = {
            let mut cache = self.cache().lock();
            let keys: Vec<String> = cache
                .iter()
                .filter(|(_, entry)| entry.offset < 0)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| cache.remove(&key).map(|entry| (key, entry)))
                .collect()
        };

        for (physical, entry) in stale {
            debug!(
                log_key = entry.log_key,
                physical, "evicting segment outside retention window"
            );
            if let Err(e) = self.segments().remove(&entry.segment) {
                warn!(physical, error = %e, "failed to delete evicted segment");
            }
            drop(entry);
        }
    }

    /// Number of cached handles (all log keys)
    #[must_use]
    pub fn cached_segments(&self) -> usize {
        self.cache().lock().len()
    }

    /// Number of cached handles for one log key
    #[must_use]
    pub fn cached_segments_for(&self, log_key: &str) -> usize {
        self.cache()
            .lock()
            .values()
            .filter(|entry| entry.log_key == log_key)
            .count()
    }
}
