use std::path::Path;

use anyhow::{anyhow, Result};
use redb::{Database, TableDefinition};
use ulid::{Generator, Ulid};

use crate::LogEntry;

const TABLE_LOGS: TableDefinition<u128, &[u8]> = TableDefinition::new("logs");
const TABLE_IDX_OBJECT: TableDefinition<(&str, u128), ()> = TableDefinition::new("idx_object");
const TABLE_IDX_CORRELATION: TableDefinition<(&str, u128), ()> =
    TableDefinition::new("idx_correlation");

/// Filter for [`LogManager::query`].
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub object_id: Option<String>,
    pub correlation_id: Option<String>,
    pub start_ns: Option<i64>,
    pub end_ns: Option<i64>,
    pub limit: usize,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            object_id: None,
            correlation_id: None,
            start_ns: None,
            end_ns: None,
            limit: 100,
        }
    }
}

/// redb-backed log storage. Entries are keyed by ULID, so the primary
/// table is ordered by time.
pub struct LogManager {
    db: Database,
}

impl LogManager {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let db_path = data_dir.as_ref().join("audit.redb");
        let db = Database::create(&db_path)?;

        let txn = db.begin_write()?;
        txn.open_table(TABLE_LOGS)?;
        txn.open_table(TABLE_IDX_OBJECT)?;
        txn.open_table(TABLE_IDX_CORRELATION)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Insert entries in one write transaction. Unstamped entries get an
    /// id and timestamp here.
    pub fn append_batch(&self, entries: Vec<LogEntry>) -> Result<()> {
        let mut generator = Generator::new();
        let txn = self.db.begin_write()?;
        {
            let mut logs = txn.open_table(TABLE_LOGS)?;
            let mut idx_obj = txn.open_table(TABLE_IDX_OBJECT)?;
            let mut idx_corr = txn.open_table(TABLE_IDX_CORRELATION)?;

            for mut entry in entries {
                entry.stamp(&mut generator);
                let ulid: Ulid = entry
                    .id
                    .parse()
                    .map_err(|e| anyhow!("Invalid ULID in entry: {e}"))?;

                let key = ulid.0;
                let encoded = entry.encode()?;
                logs.insert(key, encoded.as_slice())?;

                for obj_id in &entry.related_object_ids {
                    idx_obj.insert((obj_id.as_str(), key), ())?;
                }
                if let Some(corr) = &entry.correlation_id {
                    idx_corr.insert((corr.as_str(), key), ())?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn append(&self, entry: LogEntry) -> Result<()> {
        self.append_batch(vec![entry])
    }

    /// Entries matching `query`, oldest first.
    pub fn query(&self, query: &LogQuery) -> Result<Vec<LogEntry>> {
        let start_ms = query.start_ns.unwrap_or(0).max(0) / 1_000_000;
        let end_ms = query.end_ns.unwrap_or(i64::MAX) / 1_000_000;
        let min_ulid = Ulid::from_parts(start_ms as u64, 0).0;
        let max_ulid = Ulid::from_parts(end_ms as u64, u128::MAX).0;

        let txn = self.db.begin_read()?;
        let logs = txn.open_table(TABLE_LOGS)?;
        let mut results = Vec::new();

        // The correlation index is narrower than the object index, prefer it.
        let index = match (&query.correlation_id, &query.object_id) {
            (Some(corr), _) => Some((TABLE_IDX_CORRELATION, corr.as_str())),
            (None, Some(obj)) => Some((TABLE_IDX_OBJECT, obj.as_str())),
            (None, None) => None,
        };

        if let Some((table, key)) = index {
            let idx = txn.open_table(table)?;
            for item in idx.range((key, min_ulid)..=(key, max_ulid))? {
                if results.len() >= query.limit {
                    break;
                }
                let (k, _) = item?;
                let (_, ulid_key) = k.value();
                if let Some(access) = logs.get(ulid_key)? {
                    let entry = LogEntry::decode(access.value())?;
                    if matches_object(&entry, query.object_id.as_deref()) {
                        results.push(entry);
                    }
                }
            }
        } else {
            for item in logs.range(min_ulid..=max_ulid)? {
                if results.len() >= query.limit {
                    break;
                }
                let (_, value) = item?;
                results.push(LogEntry::decode(value.value())?);
            }
        }

        Ok(results)
    }

    /// The most recent `limit` entries, oldest first.
    pub fn tail(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let txn = self.db.begin_read()?;
        let logs = txn.open_table(TABLE_LOGS)?;

        let mut results = Vec::with_capacity(limit);
        for item in logs.range(0u128..=u128::MAX)?.rev() {
            if results.len() >= limit {
                break;
            }
            let (_, value) = item?;
            results.push(LogEntry::decode(value.value())?);
        }
        results.reverse();
        Ok(results)
    }
}

fn matches_object(entry: &LogEntry, object_id: Option<&str>) -> bool {
    match object_id {
        Some(obj) => entry.related_object_ids.iter().any(|id| id == obj),
        None => true,
    }
}
