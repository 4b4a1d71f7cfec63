//! In-memory backend for dry runs and tests.
//!
//! This provides a [`Backend`] backed by ordered maps, one per table. The backend is [`Clone`]:
//! every worker receives its own handle, while all handles share the same store. Tests can hold
//! a handle for direct inspection.
//!
//! Optionally, inserts are buffered in a write batch shared by all handles and only become
//! visible once the batch is flushed, mirroring adapters that batch writes to a time-series
//! database.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, Mutex};

use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::backend::{Backend, BackendError, BackendResult, FieldMap, FieldSet};
use crate::key::RecordKey;
use crate::window::{TimeWindow, WindowQuery, WindowScan};

/// Records of one table, ordered by series and timestamp.
type Table = BTreeMap<(String, u64), FieldMap>;

type Store = HashMap<String, Table>;

/// A pending insert in the write batch.
type PendingInsert = (String, (String, u64), FieldMap);

#[derive(Debug)]
struct WriteBatch {
    size: usize,
    pending: Mutex<Vec<PendingInsert>>,
}

/// A [`Backend`] keeping all records in memory.
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    store: Arc<Mutex<Store>>,
    batch: Option<Arc<WriteBatch>>,
}

impl InMemoryBackend {
    /// Creates an empty backend that applies inserts immediately.
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(HashMap::new())),
            batch: None,
        }
    }

    /// Creates an empty backend that buffers `batch_size` inserts before applying them.
    ///
    /// Buffered inserts are applied when the batch is full and on [`Backend::cleanup`].
    pub fn with_batch_size(batch_size: usize) -> Self {
        let batch = (batch_size > 1).then(|| {
            Arc::new(WriteBatch {
                size: batch_size,
                pending: Mutex::new(Vec::with_capacity(batch_size)),
            })
        });

        Self {
            store: Arc::new(Mutex::new(HashMap::new())),
            batch,
        }
    }

    /// Returns a clone of the stored fields of a record, if present.
    pub fn get_stored(&self, table: &str, key: &RecordKey) -> Option<FieldMap> {
        self.store
            .lock()
            .unwrap()
            .get(table)
            .and_then(|t| t.get(&series_key(key)))
            .cloned()
    }

    /// Number of records visible in the given table.
    pub fn len(&self, table: &str) -> usize {
        self.store
            .lock()
            .unwrap()
            .get(table)
            .map_or(0, BTreeMap::len)
    }

    /// Returns `true` if the table has no visible records.
    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    /// Number of inserts waiting in the write batch.
    pub fn pending(&self) -> usize {
        self.batch
            .as_ref()
            .map_or(0, |batch| batch.pending.lock().unwrap().len())
    }

    /// Applies all buffered inserts to the store.
    pub fn flush(&self) {
        if let Some(batch) = &self.batch {
            let pending = std::mem::take(&mut *batch.pending.lock().unwrap());
            self.apply(pending);
        }
    }

    fn apply(&self, inserts: Vec<PendingInsert>) {
        if inserts.is_empty() {
            return;
        }

        tracing::trace!(records = inserts.len(), "applying write batch");
        let mut store = self.store.lock().unwrap();
        for (table, key, values) in inserts {
            store.entry(table).or_default().insert(key, values);
        }
    }

    fn range(
        &self,
        table: &str,
        from: (String, u64),
        to: Bound<(String, u64)>,
        limit: usize,
        fields: Option<&FieldSet>,
    ) -> Vec<FieldMap> {
        let store = self.store.lock().unwrap();
        let Some(table) = store.get(table) else {
            return Vec::new();
        };

        table
            .range((Bound::Included(from), to))
            .take(limit)
            .map(|(_, values)| project(values, fields))
            .collect()
    }

    fn window(
        &self,
        table: &str,
        device: &str,
        window: TimeWindow,
        limit: usize,
        fields: Option<&FieldSet>,
    ) -> Vec<FieldMap> {
        self.range(
            table,
            (device.to_owned(), window.start),
            Bound::Included((device.to_owned(), window.end)),
            limit,
            fields,
        )
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn series_key(key: &RecordKey) -> (String, u64) {
    (key.device_id(), key.timestamp())
}

fn project(values: &FieldMap, fields: Option<&FieldSet>) -> FieldMap {
    match fields {
        Some(fields) => values
            .iter()
            .filter(|(name, _)| fields.contains(*name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
        None => values.clone(),
    }
}

#[async_trait::async_trait]
impl Backend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn cleanup(&self) -> BackendResult<()> {
        self.flush();
        Ok(())
    }

    async fn insert(&self, table: &str, key: &RecordKey, values: &FieldMap) -> BackendResult<()> {
        let insert = (table.to_owned(), series_key(key), values.clone());

        let Some(batch) = &self.batch else {
            self.apply(vec![insert]);
            return Ok(());
        };

        let full = {
            let mut pending = batch.pending.lock().unwrap();
            pending.push(insert);
            (pending.len() >= batch.size).then(|| std::mem::take(&mut *pending))
        };

        if let Some(inserts) = full {
            self.apply(inserts);
        }

        Ok(())
    }

    async fn read(
        &self,
        table: &str,
        key: &RecordKey,
        fields: Option<&FieldSet>,
    ) -> BackendResult<FieldMap> {
        let store = self.store.lock().unwrap();
        let values = store
            .get(table)
            .and_then(|t| t.get(&series_key(key)))
            .ok_or(BackendError::NotFound)?;

        Ok(project(values, fields))
    }

    async fn update(&self, table: &str, key: &RecordKey, values: &FieldMap) -> BackendResult<()> {
        let mut store = self.store.lock().unwrap();
        let record = store
            .entry(table.to_owned())
            .or_default()
            .entry(series_key(key))
            .or_default();

        for (name, value) in values {
            record.insert(name.clone(), value.clone());
        }

        Ok(())
    }

    async fn delete(&self, table: &str, key: &RecordKey) -> BackendResult<()> {
        let mut store = self.store.lock().unwrap();
        store
            .get_mut(table)
            .and_then(|t| t.remove(&series_key(key)))
            .map(drop)
            .ok_or(BackendError::NotFound)
    }

    async fn scan(
        &self,
        table: &str,
        start_key: &RecordKey,
        limit: usize,
        fields: Option<&FieldSet>,
    ) -> BackendResult<Vec<FieldMap>> {
        Ok(self.range(table, series_key(start_key), Bound::Unbounded, limit, fields))
    }

    async fn dual_window_scan(
        &self,
        table: &str,
        query: &WindowQuery,
        fields: Option<&FieldSet>,
    ) -> BackendResult<WindowScan> {
        let mut rng = SmallRng::from_os_rng();
        let device = query.device_id();
        let limit = query.limit.unwrap_or(usize::MAX);

        query
            .execute(&mut rng, |window| {
                let records = self.window(table, &device, window, limit, fields);
                async move { Ok(records) }
            })
            .await
    }
}
