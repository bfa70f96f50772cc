//! Persistent metadata database.
//!
//! One redb database per node holding the `{cur}` pointer for every log
//! key as a JSON blob, plus a control table with the database's own
//! physical identity (published as `main-0` in replica snapshots).

use rackline_common::{Error, LogMeta, Result, SegmentId};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use tracing::{debug, error};

const LOGS_META: TableDefinition<&str, &[u8]> = TableDefinition::new("logs_meta");
const CONTROL: TableDefinition<&str, &[u8]> = TableDefinition::new("control");

const DB_ID_KEY: &str = "db_id";

pub struct MetaDb {
    db: Database,
    id: SegmentId,
}

impl MetaDb {
    /// Open (or create) the metadata database under `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db = Database::create(data_dir.join("meta.redb"))?;

        // Create tables eagerly so later read txns don't fail, and pin
        // the database identity on first open.
        let txn = db.begin_write()?;
        let id = {
            let _logs = txn.open_table(LOGS_META)?;
            let mut control = txn.open_table(CONTROL)?;
            let existing = control
                .get(DB_ID_KEY)?
                .and_then(|raw| <[u8; 16]>::try_from(raw.value()).ok())
                .map(SegmentId::from_bytes);
            match existing {
                Some(id) => id,
                None => {
                    let id = SegmentId::generate();
                    control.insert(DB_ID_KEY, id.as_bytes().as_slice())?;
                    id
                }
            }
        };
        txn.commit()?;

        Ok(Self { db, id })
    }

    /// Physical identity of the metadata database itself
    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn get(&self, log_key: &str) -> Result<Option<LogMeta>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(LOGS_META)?;
        match table.get(log_key)? {
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value())?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, log_key: &str, meta: &LogMeta) -> Result<()> {
        let bytes = serde_json::to_vec(meta)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(LOGS_META)?;
            table.insert(log_key, bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Get the meta for a log key, initializing `{cur: 0}` when absent.
    pub fn ensure(&self, log_key: &str) -> Result<LogMeta> {
        if let Some(meta) = self.get(log_key)? {
            return Ok(meta);
        }
        let meta = LogMeta::default();
        self.put(log_key, &meta)?;
        debug!(log_key, "initialized log meta");
        Ok(meta)
    }

    /// Advance `cur` by one, sealing the current live segment.
    pub fn advance(&self, log_key: &str) -> Result<LogMeta> {
        let mut meta = self
            .get(log_key)?
            .ok_or_else(|| Error::MetaNotFound(log_key.to_string()))?;
        meta.cur += 1;
        self.put(log_key, &meta)?;
        Ok(meta)
    }

    /// Full scan of all known log keys. Undecodable entries are logged
    /// and skipped.
    pub fn scan(&self) -> Result<Vec<(String, LogMeta)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(LOGS_META)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            let key = entry.0.value().to_string();
            match serde_json::from_slice(entry.1.value()) {
                Ok(meta) => result.push((key, meta)),
                Err(e) => error!("failed to decode log meta '{}': {}", key, e),
            }
        }
        Ok(result)
    }
}
