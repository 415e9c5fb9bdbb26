//! Per-session snapshot store with turn-granular commits.
//!
//! Each conversation session gets its own [`RefRegistry`], restored at the
//! start of a turn and serialized back when the turn completes. A turn that
//! fails or times out simply never commits, so the previous snapshot stays in
//! place and half-applied in-memory state is discarded.
//!
//! The store itself is safe to share between request handlers; the registry a
//! turn works on is an owned value, so two sessions never contend and one
//! session's turns are expected to be serialized by the caller.

use dashmap::DashMap;

use crate::error::RegistryResult;
use crate::registry::RefRegistry;
use crate::schema::RegistryConfig;

/// In-memory map of session id → latest committed snapshot.
pub struct SessionStore {
    config: RegistryConfig,
    snapshots: DashMap<String, Vec<u8>>,
}

impl SessionStore {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            snapshots: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Registry for the next turn of `session_id`.
    ///
    /// Restores the last committed snapshot, falling back to a fresh registry
    /// (with a warning) if there is none or it cannot be read. The turn cursor
    /// is set to `turn` and the step cursor cleared.
    pub fn begin_turn(&self, session_id: &str, turn: u64) -> RefRegistry {
        let snapshot = self.snapshots.get(session_id).map(|s| s.value().clone());
        let mut registry = RefRegistry::restore_or_fresh(snapshot.as_deref(), self.config.clone());
        registry.set_turn(turn);
        registry.set_step(None::<String>);
        tracing::debug!(session = session_id, turn, records = registry.len(), "turn started");
        registry
    }

    /// Persist the registry at the end of a successful turn.
    pub fn commit_turn(&self, session_id: &str, registry: &RefRegistry) -> RegistryResult<()> {
        let bytes = registry.serialize()?;
        tracing::debug!(session = session_id, turn = registry.turn(), bytes = bytes.len(), "turn committed");
        self.snapshots.insert(session_id.to_string(), bytes);
        Ok(())
    }

    /// Latest committed snapshot, for handing to durable storage.
    pub fn snapshot(&self, session_id: &str) -> Option<Vec<u8>> {
        self.snapshots.get(session_id).map(|s| s.value().clone())
    }

    /// Seed a session from a snapshot loaded out of durable storage.
    pub fn load(&self, session_id: impl Into<String>, snapshot: Vec<u8>) {
        self.snapshots.insert(session_id.into(), snapshot);
    }

    /// Forget a session at session end. Returns whether it existed.
    pub fn end_session(&self, session_id: &str) -> bool {
        self.snapshots.remove(session_id).is_some()
    }

    /// Number of sessions with a committed snapshot.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Action;
    use crate::reference::{EntityType, StorageId};

    fn recipe() -> EntityType {
        EntityType::new("recipe").unwrap()
    }

    #[test]
    fn committed_turns_carry_over() {
        let store = SessionStore::new(RegistryConfig::default());
        let mut reg = store.begin_turn("s1", 1);
        reg.register(StorageId::from("abc"), &recipe(), "Curry", Action::Read)
            .unwrap();
        store.commit_turn("s1", &reg).unwrap();

        let next = store.begin_turn("s1", 2);
        assert_eq!(next.turn(), 2);
        assert_eq!(next.resolve_str("recipe_1").unwrap(), &StorageId::from("abc"));
    }

    #[test]
    fn uncommitted_turn_is_discarded() {
        let store = SessionStore::new(RegistryConfig::default());
        let reg = store.begin_turn("s1", 1);
        store.commit_turn("s1", &reg).unwrap();

        let mut aborted = store.begin_turn("s1", 2);
        aborted
            .register(StorageId::from("abc"), &recipe(), "Curry", Action::Read)
            .unwrap();
        drop(aborted);

        let retry = store.begin_turn("s1", 2);
        assert!(retry.is_empty());
    }

    #[test]
    fn sessions_are_isolated() {
        let store = SessionStore::new(RegistryConfig::default());
        let mut a = store.begin_turn("a", 1);
        a.register(StorageId::from("abc"), &recipe(), "Curry", Action::Read)
            .unwrap();
        store.commit_turn("a", &a).unwrap();

        let b = store.begin_turn("b", 1);
        assert!(b.is_empty());
        assert_eq!(store.len(), 1);
        assert!(store.end_session("a"));
        assert!(!store.end_session("a"));
        assert!(store.is_empty());
    }

    #[test]
    fn bad_snapshot_starts_fresh() {
        let store = SessionStore::new(RegistryConfig::default());
        store.load("s1", b"not a snapshot".to_vec());
        let reg = store.begin_turn("s1", 4);
        assert!(reg.is_empty());
        assert_eq!(reg.turn(), 4);
    }
}
