//! Physical segments and the segment store.
//!
//! A segment is one redb database holding a bounded slice of a logical
//! time series. Records are keyed by 8-byte big-endian millisecond
//! timestamps so key order equals chronological order; values are JSON
//! records. A control table carries the segment's physical identity,
//! which is generated once at creation and survives reopen.
//!
//! The store hands out shared handles (`Arc<Segment>`) through a
//! registry keyed by path, so opening the same segment twice in-process
//! yields the same handle instead of contending on the file lock.

use dashmap::DashMap;
use rackline_common::{Error, Result, SegmentId, decode_ts, encode_ts};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde_json::Value;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::debug;

const RECORDS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("records");
const CONTROL: TableDefinition<&str, &[u8]> = TableDefinition::new("control");

const SEGMENT_ID_KEY: &str = "segment_id";

/// Range-bounded scan over a segment's records.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScanQuery {
    pub gte: Option<u64>,
    pub lte: Option<u64>,
    pub gt: Option<u64>,
    pub lt: Option<u64>,
    pub limit: Option<usize>,
    pub reverse: bool,
}

/// One open segment. Writability is a property of how it was acquired:
/// only the primary's live-path segments accept writes.
pub struct Segment {
    id: SegmentId,
    path: PathBuf,
    db: Database,
    writable: bool,
}

impl Segment {
    fn create(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;
        let id = SegmentId::generate();
        let txn = db.begin_write()?;
        {
            let _records = txn.open_table(RECORDS)?;
            let mut control = txn.open_table(CONTROL)?;
            control.insert(SEGMENT_ID_KEY, id.as_bytes().as_slice())?;
        }
        txn.commit()?;
        debug!(segment = %id, path = %path.display(), "created segment");
        Ok(Self {
            id,
            path: path.to_path_buf(),
            db,
            writable: true,
        })
    }

    fn open(path: &Path, writable: bool) -> Result<Self> {
        let db = Database::open(path)?;
        let txn = db.begin_read()?;
        let control = txn.open_table(CONTROL)?;
        let id = match control.get(SEGMENT_ID_KEY)? {
            Some(raw) => {
                let bytes = <[u8; 16]>::try_from(raw.value())
                    .map_err(|_| Error::Corrupted(format!("bad segment id in {}", path.display())))?;
                SegmentId::from_bytes(bytes)
            }
            None => {
                return Err(Error::Corrupted(format!(
                    "segment id missing in {}",
                    path.display()
                )));
            }
        };
        drop(control);
        drop(txn);
        Ok(Self {
            id,
            path: path.to_path_buf(),
            db,
            writable,
        })
    }

    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records in the segment
    pub fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let records = txn.open_table(RECORDS)?;
        Ok(records.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Minimal read probe. A damaged segment fails here even when empty.
    pub fn probe(&self) -> Result<()> {
        let txn = self.db.begin_read()?;
        let records = txn.open_table(RECORDS)?;
        let mut iter = records.iter()?;
        if let Some(entry) = iter.next() {
            entry?;
        }
        Ok(())
    }

    /// Append one record keyed by its timestamp
    pub fn put(&self, ts: u64, record: &Value) -> Result<()> {
        if !self.writable {
            return Err(Error::RoleViolation("put on read-only segment"));
        }
        let value = serde_json::to_vec(record)?;
        let key = encode_ts(ts);
        let txn = self.db.begin_write()?;
        {
            let mut records = txn.open_table(RECORDS)?;
            records.insert(key.as_slice(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Range-bounded scan, reversible and optionally limited
    pub fn scan(&self, query: &ScanQuery) -> Result<Vec<(u64, Value)>> {
        let txn = self.db.begin_read()?;
        let records = txn.open_table(RECORDS)?;

        let gte = query.gte.map(encode_ts);
        let gt = query.gt.map(encode_ts);
        let lte = query.lte.map(encode_ts);
        let lt = query.lt.map(encode_ts);
        let lower: Bound<&[u8]> = match (&gte, &gt) {
            (Some(key), _) => Bound::Included(key.as_slice()),
            (None, Some(key)) => Bound::Excluded(key.as_slice()),
            (None, None) => Bound::Unbounded,
        };
        let upper: Bound<&[u8]> = match (&lte, &lt) {
            (Some(key), _) => Bound::Included(key.as_slice()),
            (None, Some(key)) => Bound::Excluded(key.as_slice()),
            (None, None) => Bound::Unbounded,
        };

        let range = records.range::<&[u8]>((lower, upper))?;
        let iter: Box<dyn Iterator<Item = _>> = if query.reverse {
            Box::new(range.rev())
        } else {
            Box::new(range)
        };

        let limit = query.limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        for entry in iter {
            if out.len() >= limit {
                break;
            }
            let (key, value) = entry?;
            let record: Value = serde_json::from_slice(value.value())?;
            out.push((decode_ts(key.value()), record));
        }
        Ok(out)
    }
}

/// Opens, creates and deletes segment files, deduplicating open handles
/// per path.
pub struct SegmentStore {
    segments_dir: PathBuf,
    replica_dir: PathBuf,
    open_handles: DashMap<PathBuf, Weak<Segment>>,
}

impl SegmentStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let segments_dir = data_dir.join("segments");
        let replica_dir = data_dir.join("replica");
        std::fs::create_dir_all(&segments_dir)?;
        std::fs::create_dir_all(&replica_dir)?;
        Ok(Self {
            segments_dir,
            replica_dir,
            open_handles: DashMap::new(),
        })
    }

    fn named_path(&self, log_key: &str, point: u64) -> PathBuf {
        self.segments_dir.join(format!("{log_key}-{point}.redb"))
    }

    /// Path a follower materializes replicated segment bytes under
    #[must_use]
    pub fn replica_path(&self, physical_key: &str) -> PathBuf {
        self.replica_dir.join(format!("{physical_key}.redb"))
    }

    /// Open (or create) the segment addressed by `(log_key, point)`
    pub fn open_named(
        &self,
        log_key: &str,
        point: u64,
        create: bool,
    ) -> Result<Option<Arc<Segment>>> {
        self.open_at(self.named_path(log_key, point), create, true)
    }

    /// Open a replicated segment by its physical key, read-only
    pub fn open_replica(&self, physical_key: &str) -> Result<Option<Arc<Segment>>> {
        self.open_at(self.replica_path(physical_key), false, false)
    }

    fn open_at(&self, path: PathBuf, create: bool, writable: bool) -> Result<Option<Arc<Segment>>> {
        if let Some(existing) = self
            .open_handles
            .get(&path)
            .and_then(|weak| weak.upgrade())
        {
            return Ok(Some(existing));
        }
        let segment = if path.exists() {
            Segment::open(&path, writable)?
        } else if create {
            Segment::create(&path)?
        } else {
            return Ok(None);
        };
        let segment = Arc::new(segment);
        self.open_handles
            .insert(path, Arc::downgrade(&segment));
        Ok(Some(segment))
    }

    /// Delete a segment's backing file and forget its handle entry.
    /// The caller is expected to be the last owner of the handle.
    pub fn remove(&self, segment: &Arc<Segment>) -> Result<()> {
        self.open_handles.remove(segment.path());
        std::fs::remove_file(segment.path())?;
        debug!(segment = %segment.id(), path = %segment.path().display(), "deleted segment");
        Ok(())
    }
}
