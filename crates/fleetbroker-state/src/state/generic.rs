//! Generic state with all domain logic delegating to a [`StorageBackend`].
//!
//! [`GenericState`] implements every broker operation (validity checks,
//! identifier assignment, at-most-once delivery, instruction/result
//! pairing, node and run registries, trusted keys) on top of any
//! [`StorageBackend`] implementation.
//!
//! # Construction
//!
//! ```rust
//! use fleetbroker_state::state::generic::GenericState;
//! use fleetbroker_state::state::memory::InMemoryBackend;
//!
//! let state = GenericState::new(InMemoryBackend::new()).with_id_attempts(16);
//! # let _ = state;
//! ```
//!
//! # Delivery
//!
//! Handing out an instruction is a compare-and-swap on its record: the
//! `delivered_at` stamp is written with
//! [`StorageBackend::put_if_version`]. A caller that loses the race skips
//! the record, so two concurrent pulls never see the same instruction.

use std::collections::{HashMap, HashSet};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StateError};
use crate::state::backend::{make_key, make_prefix, parse_key, StorageBackend, StorageError};
use crate::types::{NodeId, RunId, TaskId, TaskIns, TaskMessage, TaskRes};
use crate::validation::is_valid_task;

const NODE_NAMESPACE: &str = "node";
const RUN_NAMESPACE: &str = "run";
const PUBLIC_KEY_NAMESPACE: &str = "public_key";

/// Default number of random candidates drawn before giving up on a fresh id.
pub const DEFAULT_ID_ATTEMPTS: usize = 64;

/// Registry entry for nodes and runs.
#[derive(Debug, Serialize, Deserialize)]
struct RegistryRecord {
    id: i64,
    created_at: chrono::DateTime<Utc>,
}

/// Generic state that delegates all storage to a [`StorageBackend`].
///
/// # Type Parameters
///
/// * `B` - A [`StorageBackend`] implementation (in-memory, SQLite, ...)
#[derive(Debug)]
pub struct GenericState<B: StorageBackend> {
    backend: B,
    id_attempts: usize,
}

impl<B: StorageBackend> GenericState<B> {
    /// Creates a new state backed by the given backend.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            id_attempts: DEFAULT_ID_ATTEMPTS,
        }
    }

    /// Sets how many random candidates [`create_node`](Self::create_node)
    /// and [`create_run`](Self::create_run) try before failing.
    pub fn with_id_attempts(mut self, attempts: usize) -> Self {
        self.id_attempts = attempts.max(1);
        self
    }

    /// Returns a reference to the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    // ---- Serialization helpers (private) ----

    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(StateError::from)
    }

    fn decode<M: TaskMessage>(data: &[u8]) -> Result<M> {
        serde_json::from_slice(data)
            .map_err(|e| StateError::Serialization(format!("failed to decode {}: {e}", M::KIND)))
    }

    fn check_limit(limit: Option<usize>) -> Result<()> {
        match limit {
            Some(0) => Err(StateError::InvalidLimit { limit: 0 }),
            _ => Ok(()),
        }
    }

    /// Loads every record of a message kind together with its key and
    /// version.
    async fn load_all<M: TaskMessage>(&self) -> Result<Vec<(String, u64, M)>> {
        let records = self.backend.list_by_prefix(&make_prefix(M::KIND)).await?;
        records
            .into_iter()
            .map(|(key, record)| {
                let message = Self::decode::<M>(&record.data)?;
                Ok((key, record.version, message))
            })
            .collect()
    }

    // ---- Task operations ----

    async fn store<M: TaskMessage>(&self, mut message: M) -> Option<TaskId> {
        if !is_valid_task(&message) {
            return None;
        }

        let task_id = Uuid::new_v4();
        message.set_task_id(task_id);
        let task = message.task_mut();
        task.created_at = Some(Utc::now());
        task.delivered_at = None;

        let bytes = match Self::encode(&message) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!(kind = M::KIND, error = %err, "failed to encode task message");
                return None;
            },
        };

        let key = make_key(M::KIND, &task_id.to_string());
        match self.backend.put_if_absent(&key, &bytes).await {
            Ok(true) => {
                tracing::debug!(kind = M::KIND, task_id = %task_id, "stored task message");
                Some(task_id)
            },
            Ok(false) => {
                tracing::error!(kind = M::KIND, task_id = %task_id, "task id already taken");
                None
            },
            Err(err) => {
                tracing::error!(kind = M::KIND, error = %err, "failed to persist task message");
                None
            },
        }
    }

    /// Validates and stores an instruction. See
    /// [`State::store_task_ins`](crate::state::State::store_task_ins).
    pub async fn store_task_ins(&self, task_ins: TaskIns) -> Option<TaskId> {
        self.store(task_ins).await
    }

    /// Validates and stores a result. See
    /// [`State::store_task_res`](crate::state::State::store_task_res).
    ///
    /// The instruction named by `ancestry[0]` must still be stored; a
    /// result for a consumed or unknown instruction is rejected.
    pub async fn store_task_res(&self, task_res: TaskRes) -> Option<TaskId> {
        if !is_valid_task(&task_res) {
            return None;
        }

        let Some(answered) = task_res.answered_task_id() else {
            tracing::warn!(
                ancestry = ?task_res.task.ancestry,
                "result does not reference a task id"
            );
            return None;
        };
        let ins_key = make_key(TaskIns::KIND, &answered.to_string());
        match self.backend.get(&ins_key).await {
            Ok(_) => {},
            Err(StorageError::NotFound { .. }) => {
                tracing::warn!(task_id = %answered, "result answers an unknown instruction");
                return None;
            },
            Err(err) => {
                tracing::error!(task_id = %answered, error = %err, "failed to look up answered instruction");
                return None;
            },
        }

        self.store(task_res).await
    }

    /// Hands out undelivered instructions for a consumer, oldest first,
    /// marking each one delivered.
    pub async fn get_task_ins(
        &self,
        node_id: Option<NodeId>,
        limit: Option<usize>,
    ) -> Result<Vec<TaskIns>> {
        Self::check_limit(limit)?;
        if node_id == Some(0) {
            return Err(StateError::InvalidNodeId);
        }

        let mut candidates: Vec<(String, u64, TaskIns)> = self
            .load_all::<TaskIns>()
            .await?
            .into_iter()
            .filter(|(_, _, ins)| {
                let consumer = &ins.task.consumer;
                let addressed = match node_id {
                    Some(id) => !consumer.anonymous && consumer.node_id == id,
                    None => consumer.anonymous && consumer.node_id == 0,
                };
                addressed && !ins.task.is_delivered()
            })
            .collect();
        candidates.sort_by(|(_, _, a), (_, _, b)| {
            a.task
                .created_at
                .cmp(&b.task.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });

        let mut delivered = Vec::new();
        for (key, version, mut ins) in candidates {
            if limit.is_some_and(|limit| delivered.len() >= limit) {
                break;
            }

            ins.task.delivered_at = Some(Utc::now());
            let bytes = Self::encode(&ins)?;
            match self.backend.put_if_version(&key, &bytes, version).await {
                Ok(_) => delivered.push(ins),
                Err(StorageError::VersionConflict { .. } | StorageError::NotFound { .. }) => {
                    tracing::debug!(key = %key, "instruction taken by a concurrent pull");
                },
                Err(err) => return Err(err.into()),
            }
        }

        tracing::debug!(
            node_id = ?node_id,
            count = delivered.len(),
            "delivered task instructions"
        );
        Ok(delivered)
    }

    /// Returns the results matching `task_ids`, marking undelivered ones
    /// delivered.
    pub async fn get_task_res(
        &self,
        task_ids: &HashSet<TaskId>,
        limit: Option<usize>,
    ) -> Result<Vec<TaskRes>> {
        Self::check_limit(limit)?;
        if task_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut matches: Vec<(String, u64, TaskRes)> = self
            .load_all::<TaskRes>()
            .await?
            .into_iter()
            .filter(|(_, _, res)| {
                res.task_id.is_some_and(|id| task_ids.contains(&id))
                    || res
                        .answered_task_id()
                        .is_some_and(|id| task_ids.contains(&id))
            })
            .collect();
        matches.sort_by(|(_, _, a), (_, _, b)| {
            a.task
                .created_at
                .cmp(&b.task.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        if let Some(limit) = limit {
            matches.truncate(limit);
        }

        let mut results = Vec::with_capacity(matches.len());
        for (key, version, mut res) in matches {
            if res.task.is_delivered() {
                results.push(res);
                continue;
            }

            res.task.delivered_at = Some(Utc::now());
            let bytes = Self::encode(&res)?;
            match self.backend.put_if_version(&key, &bytes, version).await {
                Ok(_) => results.push(res),
                Err(StorageError::VersionConflict { .. }) => {
                    // Stamped concurrently; return what is stored now.
                    match self.backend.get(&key).await {
                        Ok(record) => results.push(Self::decode(&record.data)?),
                        Err(StorageError::NotFound { .. }) => {},
                        Err(err) => return Err(err.into()),
                    }
                },
                Err(StorageError::NotFound { .. }) => {},
                Err(err) => return Err(err.into()),
            }
        }

        Ok(results)
    }

    /// Removes every delivered instruction in `task_ids` that has been
    /// answered, together with its results. Results whose instruction is
    /// already gone are removed as well.
    pub async fn delete_tasks(&self, task_ids: &HashSet<TaskId>) -> Result<()> {
        if task_ids.is_empty() {
            return Ok(());
        }

        let mut answers: HashMap<TaskId, Vec<String>> = HashMap::new();
        for (key, _, res) in self.load_all::<TaskRes>().await? {
            if let Some(answered) = res.answered_task_id() {
                if task_ids.contains(&answered) {
                    answers.entry(answered).or_default().push(key);
                }
            }
        }

        let mut deleted = 0usize;
        for task_id in task_ids {
            let Some(res_keys) = answers.get(task_id) else {
                continue;
            };

            let ins_key = make_key(TaskIns::KIND, &task_id.to_string());
            let ins: TaskIns = match self.backend.get(&ins_key).await {
                Ok(record) => Self::decode(&record.data)?,
                Err(StorageError::NotFound { .. }) => {
                    for res_key in res_keys {
                        self.backend.delete(res_key).await?;
                    }
                    tracing::debug!(task_id = %task_id, "removed results of a missing instruction");
                    continue;
                },
                Err(err) => return Err(err.into()),
            };
            if !ins.task.is_delivered() {
                continue;
            }

            for res_key in res_keys {
                self.backend.delete(res_key).await?;
            }
            self.backend.delete(&ins_key).await?;
            deleted += 1;
        }

        tracing::debug!(requested = task_ids.len(), deleted, "deleted task pairs");
        Ok(())
    }

    // ---- Node and run registries ----

    async fn register(&self, namespace: &str, id: i64) -> Result<bool> {
        let record = RegistryRecord {
            id,
            created_at: Utc::now(),
        };
        let bytes = Self::encode(&record)?;
        Ok(self
            .backend
            .put_if_absent(&make_key(namespace, &id.to_string()), &bytes)
            .await?)
    }

    async fn registered_ids(&self, namespace: &str) -> Result<HashSet<i64>> {
        let records = self.backend.list_by_prefix(&make_prefix(namespace)).await?;
        Ok(records
            .iter()
            .filter_map(|(key, _)| parse_key(key))
            .filter_map(|(_, id)| id.parse::<i64>().ok())
            .collect())
    }

    async fn allocate(&self, namespace: &'static str) -> Result<i64> {
        for _ in 0..self.id_attempts {
            let candidate = rand::random_range(1..=i64::MAX);
            if self.register(namespace, candidate).await? {
                return Ok(candidate);
            }
        }
        Err(StateError::IdExhausted {
            kind: namespace,
            attempts: self.id_attempts,
        })
    }

    /// Adds a node to the live node set. Idempotent.
    pub async fn register_node(&self, node_id: NodeId) -> Result<()> {
        if node_id == 0 {
            return Err(StateError::InvalidNodeId);
        }
        if self.register(NODE_NAMESPACE, node_id).await? {
            tracing::info!(node_id, "registered node");
        }
        Ok(())
    }

    /// Removes a node from the live node set. Idempotent.
    pub async fn unregister_node(&self, node_id: NodeId) -> Result<()> {
        let key = make_key(NODE_NAMESPACE, &node_id.to_string());
        if self.backend.delete(&key).await? {
            tracing::info!(node_id, "unregistered node");
        }
        Ok(())
    }

    /// Snapshot of the registered node ids.
    pub async fn get_nodes(&self) -> Result<HashSet<NodeId>> {
        self.registered_ids(NODE_NAMESPACE).await
    }

    /// Draws, registers and returns a fresh node id.
    pub async fn create_node(&self) -> Result<NodeId> {
        let node_id = self.allocate(NODE_NAMESPACE).await?;
        tracing::info!(node_id, "created node");
        Ok(node_id)
    }

    /// Draws, records and returns a fresh run id.
    pub async fn create_run(&self) -> Result<RunId> {
        let run_id = self.allocate(RUN_NAMESPACE).await?;
        tracing::info!(run_id, "created run");
        Ok(run_id)
    }

    /// Returns `true` if the run exists.
    pub async fn has_run(&self, run_id: RunId) -> Result<bool> {
        match self
            .backend
            .get(&make_key(RUN_NAMESPACE, &run_id.to_string()))
            .await
        {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    // ---- Trusted client keys ----

    /// Adds one key to the trusted set.
    pub async fn store_client_public_key(&self, public_key: &[u8]) -> Result<()> {
        let key = make_key(PUBLIC_KEY_NAMESPACE, &URL_SAFE.encode(public_key));
        self.backend.put(&key, public_key).await?;
        Ok(())
    }

    /// Adds every key in `public_keys` to the trusted set.
    pub async fn store_client_public_keys(&self, public_keys: &HashSet<Vec<u8>>) -> Result<()> {
        for public_key in public_keys {
            self.store_client_public_key(public_key).await?;
        }
        tracing::info!(count = public_keys.len(), "stored client public keys");
        Ok(())
    }

    /// Snapshot of the trusted key set.
    pub async fn get_client_public_keys(&self) -> Result<HashSet<Vec<u8>>> {
        let records = self
            .backend
            .list_by_prefix(&make_prefix(PUBLIC_KEY_NAMESPACE))
            .await?;
        Ok(records.into_iter().map(|(_, record)| record.data).collect())
    }
}
