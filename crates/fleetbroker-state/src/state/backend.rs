//! Versioned key-value storage under the broker state.
//!
//! Every record the broker keeps (instructions, results, node and run
//! registrations, trusted public keys) is one JSON blob under a key of
//! the form `{namespace}:{id}`, e.g. `task_ins:7f0c...` or `node:42`.
//! Namespace names never contain `:`, so listing `task_res:` yields
//! exactly the stored results.
//!
//! Records carry a version that starts at 1 and grows with each write.
//! Handing out an instruction rewrites its record with
//! [`StorageBackend::put_if_version`]; whoever loses that race sees
//! [`StorageError::VersionConflict`] and leaves the instruction alone.

use async_trait::async_trait;

/// Bytes of one record and the version they were read at.
///
/// ```
/// use fleetbroker_state::state::backend::VersionedRecord;
///
/// let registration = VersionedRecord { data: br#"{"id":42}"#.to_vec(), version: 3 };
/// assert_eq!(registration.version, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedRecord {
    /// JSON encoding of the stored message or registration.
    pub data: Vec<u8>,

    /// Write count of the record; the first write is version 1.
    pub version: u64,
}

/// Failure of a single backend call.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Nothing is stored under `key`.
    #[error("no record under {key}")]
    NotFound {
        /// Missing key.
        key: String,
    },

    /// A compare-and-swap write found another version in place.
    #[error("{key} is at version {actual}, write expected {expected}")]
    VersionConflict {
        /// Contended key.
        key: String,
        /// Version the writer read.
        expected: u64,
        /// Version found at write time.
        actual: u64,
    },

    /// The engine itself failed (SQLite error, poisoned connection, ...).
    #[error("storage engine failed: {message}")]
    Backend {
        /// What the backend was doing.
        message: String,
        /// Engine error, when there is one.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StorageError {
    /// An engine failure while doing `message`, caused by `source`.
    pub fn backend<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Storage engine contract used by
/// [`GenericState`](crate::state::generic::GenericState).
///
/// Engines store opaque bytes; validity rules, delivery stamps and
/// instruction/result pairing all live in `GenericState`. Calls arrive
/// from concurrent RPC handlers, hence `Send + Sync`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Reads the record under `key`, or [`StorageError::NotFound`].
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError>;

    /// Creates or overwrites `key`; returns the version written.
    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError>;

    /// Creates `key` unless it exists. `false` means the existing record
    /// was kept; used for task ids and node/run registration.
    async fn put_if_absent(&self, key: &str, data: &[u8]) -> Result<bool, StorageError>;

    /// Overwrites `key` only while it is still at `expected_version`.
    ///
    /// Fails with [`StorageError::NotFound`] when the record is gone and
    /// [`StorageError::VersionConflict`] when another write got there
    /// first.
    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError>;

    /// Removes `key`; `true` if something was removed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Every record whose key starts with `prefix`, in no particular order.
    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError>;
}

/// Key of record `id` in `namespace`.
///
/// ```
/// use fleetbroker_state::state::backend::make_key;
///
/// assert_eq!(make_key("task_res", "5"), "task_res:5");
/// ```
pub fn make_key(namespace: &str, id: &str) -> String {
    format!("{namespace}:{id}")
}

/// Splits `{namespace}:{id}` back apart. Ids may themselves contain `:`.
///
/// ```
/// use fleetbroker_state::state::backend::parse_key;
///
/// assert_eq!(parse_key("run:9"), Some(("run", "9")));
/// assert_eq!(parse_key("run"), None);
/// ```
pub fn parse_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(':')
}

/// Prefix for [`StorageBackend::list_by_prefix`] over one namespace.
pub fn make_prefix(namespace: &str) -> String {
    format!("{namespace}:")
}
