//! Versioned key-value record storage.
//!
//! This is the persistence seam: anything offering atomic get and
//! put-with-expected-version can back the task store and the agent ledger.
//! Ledger counters use [`RecordStore::update`], which applies a function to
//! the current record while the key is held, so concurrent updates of one
//! key never lose a write.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use guild_core::{Error, Result};

/// Version of a freshly inserted record.
pub const INITIAL_VERSION: u64 = 1;

/// A record together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub record: T,
}

/// Trait for versioned record storage backends.
///
/// `put` is a compare-and-swap: it succeeds only if the stored version still
/// equals `expected_version`, and bumps the version on success.
#[async_trait]
pub trait RecordStore<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Read a record and its current version.
    async fn get(&self, key: &str) -> Result<Option<Versioned<T>>>;

    /// Insert a new record.
    ///
    /// Fails with `Error::Conflict` if the key is already present.
    async fn insert(&self, key: &str, record: T) -> Result<Versioned<T>>;

    /// Replace a record if it is still at `expected_version`.
    ///
    /// Fails with `Error::Conflict` on a version mismatch or a missing key.
    async fn put(&self, key: &str, record: T, expected_version: u64) -> Result<Versioned<T>>;

    /// Apply `f` to the current record (`None` if absent) and store the
    /// result, as one atomic step for this key.
    ///
    /// Unlike `put`, this never reports a version race: concurrent updates
    /// of the same key are serialised by the backend.
    async fn update(
        &self,
        key: &str,
        f: &(dyn for<'a> Fn(Option<&'a T>) -> T + Send + Sync),
    ) -> Result<Versioned<T>>;

    /// Snapshot of every record. Each record is read atomically.
    async fn values(&self) -> Result<Vec<T>>;

    /// Number of stored records.
    async fn len(&self) -> Result<usize>;

    /// Check if the store holds no records.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// In-memory record store.
///
/// Backed by a sharded concurrent map, so each compare-and-swap holds only
/// the lock of the shard owning its key.
#[derive(Debug)]
pub struct InMemoryRecordStore<T> {
    records: DashMap<String, Versioned<T>>,
}

impl<T> Default for InMemoryRecordStore<T> {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
        }
    }
}

impl<T> InMemoryRecordStore<T> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped in an Arc.
    #[must_use]
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl<T> RecordStore<T> for InMemoryRecordStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<Versioned<T>>> {
        Ok(self.records.get(key).map(|entry| entry.value().clone()))
    }

    async fn insert(&self, key: &str, record: T) -> Result<Versioned<T>> {
        match self.records.entry(key.to_string()) {
            Entry::Occupied(_) => Err(Error::conflict(key, "record already exists")),
            Entry::Vacant(slot) => {
                let versioned = Versioned {
                    version: INITIAL_VERSION,
                    record,
                };
                slot.insert(versioned.clone());
                Ok(versioned)
            }
        }
    }

    async fn put(&self, key: &str, record: T, expected_version: u64) -> Result<Versioned<T>> {
        let Some(mut current) = self.records.get_mut(key) else {
            return Err(Error::conflict(key, "record does not exist"));
        };

        if current.version != expected_version {
            return Err(Error::conflict(
                key,
                format!(
                    "expected version {expected_version}, found {}",
                    current.version
                ),
            ));
        }

        current.version = current.version.saturating_add(1);
        current.record = record;
        Ok(current.value().clone())
    }

    async fn update(
        &self,
        key: &str,
        f: &(dyn for<'a> Fn(Option<&'a T>) -> T + Send + Sync),
    ) -> Result<Versioned<T>> {
        // The entry guard holds the shard lock until the new value is stored.
        let stored = self
            .records
            .entry(key.to_string())
            .and_modify(|current| {
                current.record = f(Some(&current.record));
                current.version = current.version.saturating_add(1);
            })
            .or_insert_with(|| Versioned {
                version: INITIAL_VERSION,
                record: f(None),
            });
        Ok(stored.value().clone())
    }

    async fn values(&self) -> Result<Vec<T>> {
        Ok(self
            .records
            .iter()
            .map(|entry| entry.value().record.clone())
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}
