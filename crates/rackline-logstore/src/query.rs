//! Cross-segment range/tail queries.
//!
//! A tail walks the segment chain from a starting offset, stitching
//! reverse-chronological bounded scans until the target count is
//! reached or the retention window is exhausted. The default limit of
//! 100 applies only when none of start/end/limit are given; a
//! time-bounded query without an explicit limit is unbounded by design.

use crate::LogStore;
use crate::aggregate::{self, AggregateOp};
use crate::segment::ScanQuery;
use rackline_common::{Error, Result, now_ms};
use serde_json::Value;
use tracing::debug;

const DEFAULT_TAIL_LIMIT: usize = 100;

/// Parameters of a tail query.
#[derive(Clone, Debug, Default)]
pub struct TailQuery {
    /// Inclusive lower time bound, milliseconds
    pub start: Option<u64>,
    /// Inclusive upper time bound, milliseconds
    pub end: Option<u64>,
    /// Maximum records to return
    pub limit: Option<usize>,
    /// Segment offset to start walking from
    pub offset: u64,
    /// Bucket width for grouped aggregation, e.g. `"1H"` or `"1D"`
    pub group_range: Option<String>,
    /// Average instead of sum within each bucket
    pub average: bool,
}

impl LogStore {
    /// Answer a tail query: records most-recent-first, optionally
    /// collapsed into fixed-width time buckets.
    pub async fn tail(&self, log_key: &str, query: &TailQuery) -> Result<Vec<Value>> {
        if log_key.is_empty() {
            return Err(Error::invalid_argument("log key must not be empty"));
        }
        let records = self.collect_tail(log_key, query).await?;
        if let Some(width) = query.group_range.as_deref() {
            let op = if query.average {
                AggregateOp::Avg
            } else {
                AggregateOp::Sum
            };
            return aggregate::bucket_records(records, width, op);
        }
        Ok(records)
    }

    async fn collect_tail(&self, log_key: &str, query: &TailQuery) -> Result<Vec<Value>> {
        // The default limit applies only when the query carries no
        // bounds at all; start or end alone leaves it unbounded.
        let limit = query.limit.or_else(|| {
            if query.start.is_none() && query.end.is_none() {
                Some(DEFAULT_TAIL_LIMIT)
            } else {
                None
            }
        });

        let expected = self
            .schedule()
            .expected_count(query.start, query.end, log_key, now_ms());
        let height = self.window_height();
        let mut offset = query.offset;

        if expected == 0 && limit.is_none() {
            // no estimate and no limit: a single unbounded segment read
            return self.read_segment(log_key, offset, query, None).await;
        }

        let target = match (expected, limit) {
            (0, Some(limit)) => limit,
            (expected, None) => usize::try_from(expected).unwrap_or(usize::MAX),
            (expected, Some(limit)) => usize::try_from(expected)
                .unwrap_or(usize::MAX)
                .min(limit),
        };

        if offset >= height {
            return self.read_segment(log_key, offset, query, limit).await;
        }

        let mut collected: Vec<Value> = Vec::new();
        let mut read_any = false;
        while collected.len() < target && offset <= height {
            match self
                .read_segment(log_key, offset, query, Some(target - collected.len()))
                .await
            {
                Ok(batch) => {
                    read_any = true;
                    collected.extend(batch);
                    offset += 1;
                }
                Err(e) if !read_any => return Err(e),
                Err(e) => {
                    debug!(log_key, offset, error = %e, "tail stopped at unavailable segment");
                    break;
                }
            }
        }
        Ok(collected)
    }

    /// Reverse-chronological bounded read of one segment.
    async fn read_segment(
        &self,
        log_key: &str,
        offset: u64,
        query: &TailQuery,
        limit: Option<usize>,
    ) -> Result<Vec<Value>> {
        let Some(segment) = self.acquire(log_key, offset, false).await else {
            return Err(Error::SegmentNotFound {
                log_key: log_key.to_string(),
                offset,
            });
        };
        let scan = ScanQuery {
            gte: query.start,
            lte: query.end,
            limit,
            reverse: true,
            ..Default::default()
        };
        let result = segment.scan(&scan);
        self.release(segment);
        Ok(result?.into_iter().map(|(_, record)| record).collect())
    }
}
