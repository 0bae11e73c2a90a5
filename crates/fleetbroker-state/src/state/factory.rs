//! Selects and caches the state implementation named by a database string.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::state::memory::InMemoryState;
use crate::state::State;

/// Database strings that select the in-memory state.
pub const IN_MEMORY_DATABASES: [&str; 2] = [":memory:", ":in-memory-state:"];

/// Builds the [`State`] shared by the servicers and the interceptor.
///
/// The first call to [`state`](StateFactory::state) creates the instance;
/// later calls return the same one, so every component sees the same
/// tasks and nodes.
///
/// # Examples
///
/// ```
/// use fleetbroker_state::StateFactory;
///
/// let factory = StateFactory::new(":memory:");
/// let a = factory.state().unwrap();
/// let b = factory.state().unwrap();
/// assert!(std::sync::Arc::ptr_eq(&a, &b));
/// ```
pub struct StateFactory {
    database: String,
    state: Mutex<Option<Arc<dyn State>>>,
}

impl std::fmt::Debug for StateFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateFactory")
            .field("database", &self.database)
            .field("initialized", &self.state.lock().is_some())
            .finish()
    }
}

impl StateFactory {
    /// Creates a factory for `database`: `":memory:"` (or
    /// `":in-memory-state:"`) for process-local state, otherwise the
    /// path of a SQLite file.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            state: Mutex::new(None),
        }
    }

    /// The configured database string.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the shared state, creating it on first use.
    ///
    /// # Errors
    ///
    /// - [`StateError::UnsupportedDatabase`](crate::StateError::UnsupportedDatabase)
    ///   if the database string names a file but the `sqlite` feature is
    ///   disabled.
    /// - [`StateError::Storage`](crate::StateError::Storage) if the SQLite
    ///   file cannot be opened.
    pub fn state(&self) -> Result<Arc<dyn State>> {
        let mut slot = self.state.lock();
        if let Some(state) = slot.as_ref() {
            return Ok(Arc::clone(state));
        }

        let state = self.build()?;
        *slot = Some(Arc::clone(&state));
        Ok(state)
    }

    fn build(&self) -> Result<Arc<dyn State>> {
        if IN_MEMORY_DATABASES.contains(&self.database.as_str()) {
            tracing::info!(database = %self.database, "using in-memory state");
            return Ok(Arc::new(InMemoryState::in_memory()));
        }
        self.build_file_backed()
    }

    #[cfg(feature = "sqlite")]
    fn build_file_backed(&self) -> Result<Arc<dyn State>> {
        use crate::state::sqlite::{SqliteBackend, SqliteState};

        tracing::info!(database = %self.database, "using sqlite state");
        let backend = SqliteBackend::open(&self.database)?;
        Ok(Arc::new(SqliteState::new(backend)))
    }

    #[cfg(not(feature = "sqlite"))]
    fn build_file_backed(&self) -> Result<Arc<dyn State>> {
        tracing::error!(database = %self.database, "file-backed state requires the `sqlite` feature");
        Err(crate::error::StateError::UnsupportedDatabase(
            self.database.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_aliases_are_accepted() {
        for database in IN_MEMORY_DATABASES {
            assert!(StateFactory::new(database).state().is_ok());
        }
    }

    #[test]
    fn distinct_factories_have_distinct_state() {
        let a = StateFactory::new(":memory:").state().unwrap();
        let b = StateFactory::new(":memory:").state().unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[cfg(not(feature = "sqlite"))]
    #[test]
    fn file_database_without_sqlite_is_unsupported() {
        let err = StateFactory::new("/tmp/state.db").state().err().unwrap();
        assert!(matches!(err, crate::StateError::UnsupportedDatabase(db) if db == "/tmp/state.db"));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn file_database_opens_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.db");
        let factory = StateFactory::new(path.to_string_lossy().into_owned());
        let state = factory.state().unwrap();
        let run_id = state.create_run().await.unwrap();
        assert!(state.has_run(run_id).await.unwrap());
    }
}
