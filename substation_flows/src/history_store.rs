//! Per-entity history persistence.
//!
//! Each entity's history is one partition that is only ever replaced wholesale. The
//! read-merge-write cycle for an entity runs under that entity's lock so two writers
//! for the same substation cannot lose each other's rows.

use crate::error::{PipelineError, StoreError};
use crate::frame::{corrupt, from_dataframe, to_dataframe};
use crate::merge::{merge_history, MergeStats};
use crate::models::FlowTable;
use log::debug;
use polars::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub const PARTITION_EXTENSION: &str = "parquet";
const PARTITION_DIGEST_LEN: usize = 12;

pub trait HistoryStore: Send + Sync {
    /// Stored history for `entity`, or `None` when nothing has been stored yet.
    fn read(&self, entity: &str) -> Result<Option<FlowTable>, StoreError>;

    /// Replace the stored history for `table.entity_key` with `table`.
    fn write(&self, table: &FlowTable) -> Result<(), StoreError>;
}

/// Filesystem-safe partition stem: lowercase, runs of other characters become one '-'.
pub fn partition_stem(entity: &str) -> String {
    let mut stem = String::with_capacity(entity.len());
    for c in entity.trim().chars() {
        if c.is_ascii_alphanumeric() {
            stem.push(c.to_ascii_lowercase());
        } else if !stem.ends_with('-') {
            stem.push('-');
        }
    }
    stem.trim_matches('-').to_string()
}

/// Partition key for `entity`: the readable stem plus a short digest of the exact key, so
/// labels that differ only in case or punctuation never share a partition.
pub fn partition_key(entity: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    let stem = partition_stem(entity);
    if stem.is_empty() {
        digest[..PARTITION_DIGEST_LEN].to_string()
    } else {
        format!("{}-{}", stem, &digest[..PARTITION_DIGEST_LEN])
    }
}

pub struct ParquetHistoryStore {
    root: PathBuf,
}

impl ParquetHistoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_path(&self, entity: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", partition_key(entity), PARTITION_EXTENSION))
    }

    /// All stored partitions, sorted by path.
    pub fn list_partitions(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(PARTITION_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Read a partition without knowing its entity key up front. The key comes from the
    /// stored rows, falling back to the file stem for an empty partition.
    pub fn read_partition(path: &Path) -> Result<FlowTable, StoreError> {
        let df = read_parquet(path)?;
        let fallback = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        from_dataframe(&df, None, &fallback)
    }
}

impl HistoryStore for ParquetHistoryStore {
    fn read(&self, entity: &str) -> Result<Option<FlowTable>, StoreError> {
        let path = self.partition_path(entity);
        if !path.exists() {
            return Ok(None);
        }
        let df = read_parquet(&path)?;
        from_dataframe(&df, Some(entity), entity).map(Some)
    }

    fn write(&self, table: &FlowTable) -> Result<(), StoreError> {
        let mut df = to_dataframe(table)?;
        let path = self.partition_path(&table.entity_key);
        let tmp_path = path.with_extension(format!("{}.tmp", PARTITION_EXTENSION));

        ParquetWriter::new(fs::File::create(&tmp_path)?).finish(&mut df)?;
        fs::rename(&tmp_path, &path)?;

        debug!("Wrote {} rows to {}", table.len(), path.display());
        Ok(())
    }
}

fn read_parquet(path: &Path) -> Result<DataFrame, StoreError> {
    let file = fs::File::open(path)?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::Corrupt(format!("{}: {}", path.display(), e)))
}

/// Store backed by a map, used by tests and dry runs.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    tables: Mutex<HashMap<String, FlowTable>>,
    corrupt: Mutex<HashSet<String>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later read of `entity` fail as an unreadable partition would.
    pub fn mark_corrupt(&self, entity: &str) {
        lock(&self.corrupt).insert(entity.to_string());
    }

    pub fn entities(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.tables).keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn read(&self, entity: &str) -> Result<Option<FlowTable>, StoreError> {
        if lock(&self.corrupt).contains(entity) {
            return Err(corrupt(format!("{} is marked corrupt", entity)));
        }
        Ok(lock(&self.tables).get(entity).cloned())
    }

    fn write(&self, table: &FlowTable) -> Result<(), StoreError> {
        lock(&self.tables).insert(table.entity_key.clone(), table.clone());
        Ok(())
    }
}

/// A panic while a guard was held leaves nothing half-written (writes are whole-file
/// replacements), so a poisoned lock is still safe to use.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One mutex per partition key, created on first use. Keying on the partition rather
/// than the raw label keeps lock scope and storage scope identical.
#[derive(Default)]
pub struct EntityLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, entity: &str) -> Arc<Mutex<()>> {
        lock(&self.locks)
            .entry(partition_key(entity))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Read, merge and replace one entity's history while holding that entity's lock.
pub fn merge_into_store<S: HistoryStore + ?Sized>(
    store: &S,
    locks: &EntityLocks,
    incoming: FlowTable,
) -> Result<MergeStats, PipelineError> {
    let entity_lock = locks.lock_for(&incoming.entity_key);
    let _guard = lock(&entity_lock);

    let existing = store.read(&incoming.entity_key)?;
    let existing_rows = existing.as_ref().map_or(0, FlowTable::len);
    let incoming_rows = incoming.len();

    let merged = merge_history(existing, incoming)?;
    store.write(&merged)?;

    Ok(MergeStats {
        existing_rows,
        incoming_rows,
        merged_rows: merged.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MeasurementRecord, PowerField};
    use chrono::{Duration, TimeZone, Utc};
    use std::thread;
    use tempfile::TempDir;

    const KEY: &str = "Aberaeron 11kV Transformer Flows";

    fn table(slots: &[i64], fields: &[PowerField]) -> FlowTable {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let records = slots
            .iter()
            .map(|slot| {
                let mut record = MeasurementRecord::new(KEY, start + Duration::minutes(30 * slot));
                for field in fields {
                    record = record.with_value(*field, Some(*slot as f32 / 2.0));
                }
                record
            })
            .collect();
        FlowTable::new(KEY, fields.iter().copied(), records)
    }

    #[test]
    fn test_partition_stem() {
        assert_eq!(partition_stem(KEY), "aberaeron-11kv-transformer-flows");
        assert_eq!(partition_stem("  St. Johns 132/33kV "), "st-johns-132-33kv");
    }

    #[test]
    fn test_partition_key_separates_spelling_variants() {
        let live = partition_key("Aberaeron 11KV Transformer Flows");
        let historical = partition_key(KEY);
        assert_ne!(live, historical);
        assert!(historical.starts_with("aberaeron-11kv-transformer-flows-"));
        assert_eq!(partition_key(KEY), historical);
        assert_eq!(partition_key("///").len(), PARTITION_DIGEST_LEN);
    }

    #[test]
    fn test_case_variants_keep_separate_histories() {
        let dir = TempDir::new().unwrap();
        let store = ParquetHistoryStore::new(dir.path()).unwrap();
        let locks = EntityLocks::new();

        let historical = table(&[0, 1], &[PowerField::ActivePower]);
        let mut live = table(&[1, 2, 3], &[PowerField::ActivePower]);
        live.entity_key = "Aberaeron 11KV Transformer Flows".to_string();
        for record in &mut live.records {
            record.entity_key = live.entity_key.clone();
        }

        merge_into_store(&store, &locks, historical).unwrap();
        merge_into_store(&store, &locks, live.clone()).unwrap();

        assert_eq!(store.list_partitions().unwrap().len(), 2);
        assert_eq!(store.read(KEY).unwrap().unwrap().len(), 2);
        assert_eq!(store.read(&live.entity_key).unwrap().unwrap(), live);
    }

    #[test]
    fn test_parquet_store_round_trip_keeps_columns_and_nulls() {
        let dir = TempDir::new().unwrap();
        let store = ParquetHistoryStore::new(dir.path()).unwrap();
        assert!(store.read(KEY).unwrap().is_none());

        let mut stored = table(&[0, 1, 2], &[PowerField::ActivePower, PowerField::ReactivePower]);
        stored.records[1].reactive_power_mvar = None;
        store.write(&stored).unwrap();

        let loaded = store.read(KEY).unwrap().unwrap();
        assert_eq!(loaded, stored);
        assert_eq!(store.list_partitions().unwrap().len(), 1);
        assert_eq!(
            ParquetHistoryStore::read_partition(&store.partition_path(KEY)).unwrap(),
            stored
        );
    }

    #[test]
    fn test_parquet_store_write_replaces_history() {
        let dir = TempDir::new().unwrap();
        let store = ParquetHistoryStore::new(dir.path()).unwrap();
        store.write(&table(&[0, 1, 2], &[PowerField::ActivePower])).unwrap();
        store.write(&table(&[5], &[PowerField::ApparentPower])).unwrap();

        let loaded = store.read(KEY).unwrap().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(!loaded.has_field(PowerField::ActivePower));
        assert!(!store.partition_path(KEY).with_extension("parquet.tmp").exists());
    }

    #[test]
    fn test_corrupt_partition_is_a_store_error() {
        let dir = TempDir::new().unwrap();
        let store = ParquetHistoryStore::new(dir.path()).unwrap();
        fs::write(store.partition_path(KEY), b"not parquet").unwrap();
        assert!(matches!(store.read(KEY), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_merge_into_store_accumulates() {
        let store = InMemoryHistoryStore::new();
        let locks = EntityLocks::new();

        let first = merge_into_store(&store, &locks, table(&[0, 1], &[PowerField::ActivePower]))
            .unwrap();
        assert_eq!(first.added_rows(), 2);

        let second = merge_into_store(&store, &locks, table(&[1, 2], &[PowerField::ActivePower]))
            .unwrap();
        assert_eq!(second.existing_rows, 2);
        assert_eq!(second.merged_rows, 3);
        assert_eq!(store.entities(), vec![KEY.to_string()]);
    }

    #[test]
    fn test_corrupt_history_fails_only_that_entity() {
        let store = InMemoryHistoryStore::new();
        let locks = EntityLocks::new();
        store.mark_corrupt(KEY);

        let err = merge_into_store(&store, &locks, table(&[0], &[PowerField::ActivePower]));
        assert!(matches!(err, Err(PipelineError::Store(StoreError::Corrupt(_)))));

        let mut other = table(&[0], &[PowerField::ActivePower]);
        other.entity_key = "Filton Dc Transformer Flows".to_string();
        for record in &mut other.records {
            record.entity_key = other.entity_key.clone();
        }
        assert!(merge_into_store(&store, &locks, other).is_ok());
    }

    #[test]
    fn test_concurrent_merges_for_one_entity_do_not_lose_rows() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ParquetHistoryStore::new(dir.path()).unwrap());
        let locks = Arc::new(EntityLocks::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let locks = Arc::clone(&locks);
                thread::spawn(move || {
                    let batch = table(&[i * 2, i * 2 + 1], &[PowerField::ActivePower]);
                    merge_into_store(store.as_ref(), &locks, batch).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let history = store.read(KEY).unwrap().unwrap();
        assert_eq!(history.len(), 16);
        assert!(history.is_sorted_unique());
    }
}
