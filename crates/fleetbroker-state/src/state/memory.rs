//! Process-local storage.
//!
//! [`InMemoryBackend`] keeps every broker record in a sharded [`DashMap`];
//! [`InMemoryState`] is the state the broker runs on when its database
//! string is `:memory:`. Nothing survives a restart.
//!
//! Writes go through the map's entry API, which holds the shard lock of
//! the key for the whole read-compare-write. Two nodes pulling the same
//! instruction therefore serialize on its `task_ins:` entry and only one
//! of their delivery stamps lands.
//!
//! ```
//! use fleetbroker_state::state::memory::InMemoryState;
//!
//! let state = InMemoryState::in_memory();
//! assert!(state.backend().is_empty());
//! ```

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::state::backend::{StorageBackend, StorageError, VersionedRecord};
use crate::state::generic::GenericState;

#[derive(Debug, Clone)]
struct Slot {
    bytes: Vec<u8>,
    version: u64,
}

impl Slot {
    fn first(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            version: 1,
        }
    }

    fn record(&self) -> VersionedRecord {
        VersionedRecord {
            data: self.bytes.clone(),
            version: self.version,
        }
    }
}

/// [`StorageBackend`] over a concurrent hash map.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    slots: DashMap<String, Slot>,
}

impl InMemoryBackend {
    /// An empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records of any kind (instructions, results, nodes, runs, keys).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing at all is stored.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError> {
        self.slots
            .get(key)
            .map(|slot| slot.record())
            .ok_or_else(|| StorageError::NotFound { key: key.into() })
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError> {
        let slot = self
            .slots
            .entry(key.to_owned())
            .and_modify(|slot| {
                slot.bytes = data.to_vec();
                slot.version += 1;
            })
            .or_insert_with(|| Slot::first(data));
        Ok(slot.version)
    }

    async fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<bool, StorageError> {
        match self.slots.entry(key.to_owned()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::first(data));
                Ok(true)
            },
        }
    }

    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        let Some(mut slot) = self.slots.get_mut(key) else {
            return Err(StorageError::NotFound { key: key.into() });
        };
        if slot.version != expected_version {
            return Err(StorageError::VersionConflict {
                key: key.into(),
                expected: expected_version,
                actual: slot.version,
            });
        }
        slot.bytes = data.to_vec();
        slot.version += 1;
        Ok(slot.version)
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.slots.remove(key).is_some())
    }

    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError> {
        let mut found = Vec::new();
        for slot in self.slots.iter() {
            if slot.key().starts_with(prefix) {
                found.push((slot.key().clone(), slot.value().record()));
            }
        }
        Ok(found)
    }
}

/// The process-local state.
pub type InMemoryState = GenericState<InMemoryBackend>;

impl GenericState<InMemoryBackend> {
    /// Creates an empty in-memory state.
    pub fn in_memory() -> Self {
        Self::new(InMemoryBackend::new())
    }
}

impl Default for GenericState<InMemoryBackend> {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn unknown_node_record_is_not_found() {
        let backend = InMemoryBackend::new();
        let err = backend.get("node:1").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { key } if key == "node:1"));
    }

    #[tokio::test]
    async fn rewriting_a_run_bumps_its_version() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.put("run:1", b"a").await.unwrap(), 1);
        assert_eq!(backend.put("run:1", b"b").await.unwrap(), 2);
        assert_eq!(
            backend.get("run:1").await.unwrap(),
            VersionedRecord { data: b"b".to_vec(), version: 2 }
        );
    }

    #[tokio::test]
    async fn second_registration_of_a_node_id_is_refused() {
        let backend = InMemoryBackend::new();
        assert!(backend.put_if_absent("node:7", b"first").await.unwrap());
        assert!(!backend.put_if_absent("node:7", b"second").await.unwrap());
        assert_eq!(
            backend.get("node:7").await.unwrap(),
            VersionedRecord { data: b"first".to_vec(), version: 1 }
        );
    }

    #[tokio::test]
    async fn only_one_delivery_stamp_lands() {
        let backend = InMemoryBackend::new();
        backend.put("task_ins:a", b"pending").await.unwrap();
        let read = backend.get("task_ins:a").await.unwrap();

        let winner = backend.put_if_version("task_ins:a", b"delivered-to-1", read.version).await;
        let loser = backend.put_if_version("task_ins:a", b"delivered-to-2", read.version).await;

        assert_eq!(winner.unwrap(), 2);
        assert!(matches!(
            loser,
            Err(StorageError::VersionConflict { expected: 1, actual: 2, .. })
        ));
        assert_eq!(backend.get("task_ins:a").await.unwrap().data, b"delivered-to-1");
    }

    #[tokio::test]
    async fn stamping_a_deleted_instruction_fails() {
        let backend = InMemoryBackend::new();
        backend.put("task_ins:x", b"pending").await.unwrap();
        backend.delete("task_ins:x").await.unwrap();

        let err = backend.put_if_version("task_ins:x", b"delivered", 1).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let backend = InMemoryBackend::new();
        backend.put("node:1", b"{}").await.unwrap();
        assert!(backend.delete("node:1").await.unwrap());
        assert!(!backend.delete("node:1").await.unwrap());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn instructions_and_results_list_separately() {
        let backend = InMemoryBackend::new();
        backend.put("task_ins:1", b"{}").await.unwrap();
        backend.put("task_ins:2", b"{}").await.unwrap();
        backend.put("task_res:3", b"{}").await.unwrap();

        let mut instructions: Vec<String> = backend
            .list_by_prefix("task_ins:")
            .await
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        instructions.sort();
        assert_eq!(instructions, ["task_ins:1", "task_ins:2"]);
        assert_eq!(backend.list_by_prefix("task_res:").await.unwrap().len(), 1);
        assert_eq!(backend.len(), 3);
    }

    #[test]
    fn default_state_is_empty() {
        let state = InMemoryState::default();
        assert!(state.backend().is_empty());
    }
}
