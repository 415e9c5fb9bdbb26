//! Reference registry: bidirectional reference ↔ storage-id mapping.
//!
//! The [`RefRegistry`] is the per-session source of truth. Records live in one
//! table keyed by [`EntityRef`]; a secondary index maps each confirmed
//! `(EntityType, StorageId)` pair back to its reference so lookups are O(1) in
//! both directions. Storage ids are only unique within a type: integer keys
//! commonly repeat across tables.
//!
//! One registry exists per conversation session and is threaded through the
//! turn pipeline by `&mut`. It does no locking and no I/O; an embedding layer
//! serving many sessions guards each instance itself (see
//! [`crate::session::SessionStore`]).

use std::collections::HashMap;

use crate::artifact::ArtifactStore;
use crate::enrich::EnrichmentTask;
use crate::error::{LifecycleError, RefError, RegistryResult};
use crate::record::{Action, Binding, EntityRecord};
use crate::reference::{EntityRef, EntityType, RefAllocator, StorageId};
use crate::schema::RegistryConfig;

/// Per-session reference registry.
#[derive(Clone)]
pub struct RefRegistry {
    pub(crate) config: RegistryConfig,
    pub(crate) allocator: RefAllocator,
    /// Forward map: reference → record (source of truth).
    pub(crate) records: HashMap<EntityRef, EntityRecord>,
    /// Reverse map: (type, storage id) → reference, confirmed entities only.
    pub(crate) by_storage: HashMap<(EntityType, StorageId), EntityRef>,
    pub(crate) artifacts: ArtifactStore,
    pub(crate) enrichment: Vec<EnrichmentTask>,
    pub(crate) turn: u64,
    pub(crate) step: Option<String>,
}

impl RefRegistry {
    /// Create an empty registry for a new session.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            allocator: RefAllocator::new(),
            records: HashMap::new(),
            by_storage: HashMap::new(),
            artifacts: ArtifactStore::default(),
            enrichment: Vec::new(),
            turn: 0,
            step: None,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Current turn. The registry never advances it on its own.
    pub fn turn(&self) -> u64 {
        self.turn
    }

    /// Set the current turn; new records are stamped with it.
    pub fn set_turn(&mut self, turn: u64) {
        if turn < self.turn {
            tracing::debug!(from = self.turn, to = turn, "turn counter moved backwards");
        }
        self.turn = turn;
    }

    /// Current pipeline step, recorded as `source_step` on new records.
    pub fn step(&self) -> Option<&str> {
        self.step.as_deref()
    }

    pub fn set_step(&mut self, step: Option<impl Into<String>>) {
        self.step = step.map(Into::into);
    }

    /// Reference counters, for inspection.
    pub fn allocator(&self) -> &RefAllocator {
        &self.allocator
    }

    /// Allocate the next confirmed reference for a type without registering it.
    pub fn next_ref(&mut self, entity_type: &EntityType) -> RegistryResult<EntityRef> {
        Ok(self.allocator.next_ref(entity_type)?)
    }

    /// Allocate the next `gen_` reference for a type without registering it.
    pub fn next_pending_ref(&mut self, entity_type: &EntityType) -> RegistryResult<EntityRef> {
        Ok(self.allocator.next_pending_ref(entity_type)?)
    }

    /// Register a confirmed entity surfaced by a read or write.
    ///
    /// Storage ids are scoped by entity type: the same key in two tables names
    /// two entities. A `(type, storage id)` pair that is already mapped returns
    /// its existing reference; the stored action is upgraded only when
    /// `action` is strictly more specific than the current one (`linked < read
    /// < created < updated < deleted`), the same ladder
    /// [`set_action`](Self::set_action) enforces. Otherwise a fresh reference
    /// is allocated.
    ///
    /// An empty `label` means the label is unknown: a new record gets the
    /// configured placeholder and an existing record keeps its label. A
    /// non-empty label on an upgrade replaces the stored one and settles any
    /// queued enrichment for the reference.
    pub fn register(
        &mut self,
        storage_id: StorageId,
        entity_type: &EntityType,
        label: impl Into<String>,
        action: Action,
    ) -> RegistryResult<EntityRef> {
        if action == Action::Generated {
            return Err(LifecycleError::IllegalTransition {
                reference: storage_id.to_string(),
                from: "unregistered".into(),
                to: action.to_string(),
            }
            .into());
        }
        let label = label.into();
        let key = (entity_type.clone(), storage_id);

        if let Some(existing) = self.by_storage.get(&key).cloned() {
            let turn = self.turn;
            let record = self
                .records
                .get_mut(&existing)
                .ok_or_else(|| RefError::NotFound {
                    reference: existing.to_string(),
                })?;
            if action != record.action && record.action.can_transition_to(action) {
                tracing::debug!(
                    reference = %existing,
                    from = %record.action,
                    to = %action,
                    "upgrading action"
                );
                record.apply_action(action, turn);
                if !label.is_empty() {
                    record.label = label;
                    self.enrichment.retain(|t| t.entity_ref != existing);
                }
            }
            return Ok(existing);
        }

        let label = if label.is_empty() {
            self.config.placeholder_label.clone()
        } else {
            label
        };
        let (entity_type, storage_id) = key;
        let entity_ref = self.allocator.next_ref(&entity_type)?;
        let record = EntityRecord::new(
            entity_ref.clone(),
            Binding::Confirmed(storage_id.clone()),
            label,
            action,
            self.turn,
        )
        .with_source_step(self.step.clone());
        tracing::debug!(reference = %entity_ref, storage_id = %storage_id, %action, "registered");
        self.by_storage.insert((entity_type, storage_id), entity_ref.clone());
        self.records.insert(entity_ref.clone(), record);
        Ok(entity_ref)
    }

    /// Whether a `(type, storage id)` pair already has a reference.
    pub(crate) fn is_known(&self, entity_type: &EntityType, storage_id: &StorageId) -> bool {
        self.by_storage
            .contains_key(&(entity_type.clone(), storage_id.clone()))
    }

    /// Map a reference back to its storage id.
    ///
    /// Pending (generated, unsaved) references fail with
    /// [`RefError::PendingResolution`]; callers should read the artifact store
    /// instead.
    pub fn resolve_ref(&self, entity_ref: &EntityRef) -> RegistryResult<&StorageId> {
        let record = self.record(entity_ref)?;
        match &record.binding {
            Binding::Confirmed(id) => Ok(id),
            Binding::Pending => Err(RefError::PendingResolution {
                reference: entity_ref.to_string(),
            }
            .into()),
        }
    }

    /// Parse and resolve a textual reference.
    pub fn resolve_str(&self, raw: &str) -> RegistryResult<&StorageId> {
        let entity_ref = EntityRef::parse(raw)?;
        self.resolve_ref(&entity_ref)
    }

    /// Parse a reference the planner wrote and check that it was issued here.
    pub fn parse_ref(&self, raw: &str) -> RegistryResult<EntityRef> {
        let entity_ref = EntityRef::parse(raw)?;
        self.record(&entity_ref)?;
        Ok(entity_ref)
    }

    /// Reference for a storage id of the given type, if it has been seen.
    pub fn resolve_storage(
        &self,
        entity_type: &EntityType,
        storage_id: &StorageId,
    ) -> Option<&EntityRef> {
        self.by_storage
            .get(&(entity_type.clone(), storage_id.clone()))
    }

    /// Record for a reference.
    pub fn get(&self, entity_ref: &EntityRef) -> Option<&EntityRecord> {
        self.records.get(entity_ref)
    }

    /// Record for a reference, or [`RefError::NotFound`].
    pub fn record(&self, entity_ref: &EntityRef) -> Result<&EntityRecord, RefError> {
        self.records.get(entity_ref).ok_or_else(|| RefError::NotFound {
            reference: entity_ref.to_string(),
        })
    }

    pub(crate) fn record_mut(&mut self, entity_ref: &EntityRef) -> Result<&mut EntityRecord, RefError> {
        self.records
            .get_mut(entity_ref)
            .ok_or_else(|| RefError::NotFound {
                reference: entity_ref.to_string(),
            })
    }

    /// All records, ordered by reference.
    pub fn records(&self) -> Vec<&EntityRecord> {
        let mut all: Vec<_> = self.records.values().collect();
        all.sort_by(|a, b| a.entity_ref.cmp(&b.entity_ref));
        all
    }

    /// Number of registered references.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Label for a reference, falling back to the reference itself.
    pub fn label_of(&self, entity_ref: &EntityRef) -> String {
        self.records
            .get(entity_ref)
            .map(|r| r.label.clone())
            .unwrap_or_else(|| entity_ref.to_string())
    }

    /// Reset to an empty registry at session end, keeping the configuration.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

impl std::fmt::Debug for RefRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefRegistry")
            .field("records", &self.records.len())
            .field("artifacts", &self.artifacts.len())
            .field("enrichment", &self.enrichment.len())
            .field("turn", &self.turn)
            .finish()
    }
}
