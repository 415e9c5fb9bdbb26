//! Artifact store: full content of generated entities awaiting persistence.
//!
//! Generated content gets a `gen_` reference the moment it is produced, so the
//! model can talk about it like any other entity. When the content is saved,
//! [`RefRegistry::promote`] binds that same reference to the new storage id and
//! drops the artifact. Promotion is terminal and idempotent.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{RefError, RegistryResult};
use crate::record::{Action, Binding, EntityRecord};
use crate::reference::{EntityRef, EntityType, StorageId};
use crate::registry::RefRegistry;

/// Generated content held until it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingArtifact {
    pub entity_ref: EntityRef,
    pub label: String,
    /// Full generated document. Stored as JSON text so binary snapshot
    /// encodings need no self-describing format.
    #[serde(with = "json_text")]
    pub content: serde_json::Value,
}

/// Pending artifacts keyed by reference.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    artifacts: HashMap<EntityRef, PendingArtifact>,
}

impl ArtifactStore {
    pub fn get(&self, entity_ref: &EntityRef) -> Option<&PendingArtifact> {
        self.artifacts.get(entity_ref)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// All artifacts, ordered by reference.
    pub fn iter_sorted(&self) -> Vec<&PendingArtifact> {
        let mut all: Vec<_> = self.artifacts.values().collect();
        all.sort_by(|a, b| a.entity_ref.cmp(&b.entity_ref));
        all
    }

    pub(crate) fn insert(&mut self, artifact: PendingArtifact) {
        self.artifacts.insert(artifact.entity_ref.clone(), artifact);
    }

    pub(crate) fn remove(&mut self, entity_ref: &EntityRef) -> Option<PendingArtifact> {
        self.artifacts.remove(entity_ref)
    }

    /// Pending artifact of `entity_type` whose label equals `label`, ignoring
    /// case. The lowest ordinal wins when several match.
    pub fn find_by_label(&self, entity_type: &EntityType, label: &str) -> Option<&EntityRef> {
        let wanted = label.to_lowercase();
        self.artifacts
            .values()
            .filter(|a| a.entity_ref.entity_type() == entity_type)
            .filter(|a| a.label.to_lowercase() == wanted)
            .map(|a| &a.entity_ref)
            .min_by_key(|r| r.ordinal())
    }
}

impl RefRegistry {
    /// Register model-generated content under a fresh `gen_` reference.
    pub fn register_generated(
        &mut self,
        entity_type: &EntityType,
        label: impl Into<String>,
        content: serde_json::Value,
    ) -> RegistryResult<EntityRef> {
        let label = label.into();
        let entity_ref = self.allocator.next_pending_ref(entity_type)?;
        let record = EntityRecord::new(
            entity_ref.clone(),
            Binding::Pending,
            label.clone(),
            Action::Generated,
            self.turn,
        )
        .with_source_step(self.step.clone());
        tracing::debug!(reference = %entity_ref, %label, "registered generated artifact");
        self.records.insert(entity_ref.clone(), record);
        self.artifacts.insert(PendingArtifact {
            entity_ref: entity_ref.clone(),
            label,
            content,
        });
        Ok(entity_ref)
    }

    /// Full content of a pending artifact.
    pub fn get_artifact(&self, entity_ref: &EntityRef) -> Option<&PendingArtifact> {
        self.artifacts.get(entity_ref)
    }

    /// All pending artifacts.
    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Bind a pending reference to the storage id it was persisted under.
    ///
    /// The reference string is kept, the artifact is dropped and the action
    /// becomes `created`. Promoting an already-promoted reference to the same
    /// storage id is a no-op. Unknown references fail with
    /// [`RefError::NotFound`]; binding to a storage id that already belongs to
    /// another reference (or re-promoting to a different one) fails with
    /// [`RefError::StorageConflict`] and changes nothing.
    pub fn promote(
        &mut self,
        pending_ref: &EntityRef,
        storage_id: StorageId,
        label: Option<&str>,
    ) -> RegistryResult<EntityRef> {
        self.check_promote(pending_ref, &storage_id)?;
        if self.record(pending_ref)?.is_pending() {
            self.bind_pending(pending_ref, storage_id, label)?;
        } else {
            tracing::debug!(reference = %pending_ref, "already promoted");
        }
        Ok(pending_ref.clone())
    }

    /// Record a newly persisted entity, reusing a pending reference whose label
    /// matches (case-insensitive) before minting a new confirmed one.
    ///
    /// The label match is best effort: two generated artifacts of one type that
    /// share a label cannot be told apart, and the lowest ordinal is promoted.
    pub fn promote_matching(
        &mut self,
        storage_id: StorageId,
        entity_type: &EntityType,
        label: &str,
    ) -> RegistryResult<EntityRef> {
        if self.is_known(entity_type, &storage_id) {
            return self.register(storage_id, entity_type, label, Action::Created);
        }
        match self.artifacts.find_by_label(entity_type, label).cloned() {
            Some(pending_ref) => {
                tracing::debug!(reference = %pending_ref, storage_id = %storage_id, "label match, promoting in place");
                self.bind_pending(&pending_ref, storage_id, Some(label))?;
                Ok(pending_ref)
            }
            None => self.register(storage_id, entity_type, label, Action::Created),
        }
    }

    /// Everything [`promote`](Self::promote) can reject, checked without
    /// touching state.
    pub(crate) fn check_promote(
        &self,
        pending_ref: &EntityRef,
        storage_id: &StorageId,
    ) -> RegistryResult<()> {
        let record = self.record(pending_ref)?;
        if let Binding::Confirmed(existing) = &record.binding {
            if existing == storage_id {
                return Ok(());
            }
            return Err(RefError::StorageConflict {
                reference: pending_ref.to_string(),
                storage_id: storage_id.to_string(),
                existing: existing.to_string(),
            }
            .into());
        }
        if let Some(owner) = self.resolve_storage(pending_ref.entity_type(), storage_id) {
            return Err(RefError::StorageConflict {
                reference: pending_ref.to_string(),
                storage_id: storage_id.to_string(),
                existing: owner.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn bind_pending(
        &mut self,
        pending_ref: &EntityRef,
        storage_id: StorageId,
        label: Option<&str>,
    ) -> RegistryResult<()> {
        let record = self.record_mut(pending_ref)?;
        record.binding = Binding::Confirmed(storage_id.clone());
        record.action = Action::Created;
        if let Some(label) = label.filter(|l| !l.is_empty()) {
            record.label = label.to_string();
        }
        self.by_storage.insert(
            (pending_ref.entity_type().clone(), storage_id.clone()),
            pending_ref.clone(),
        );
        self.artifacts.remove(pending_ref);
        tracing::debug!(reference = %pending_ref, storage_id = %storage_id, "promoted");
        Ok(())
    }
}

/// Serde adapter storing a JSON value as its compact text form.
mod json_text {
    use serde::{Deserialize, Deserializer, Serializer, de, ser};

    pub fn serialize<S: Serializer>(value: &serde_json::Value, s: S) -> Result<S::Ok, S::Error> {
        let text = serde_json::to_string(value).map_err(ser::Error::custom)?;
        s.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<serde_json::Value, D::Error> {
        let text = String::deserialize(d)?;
        serde_json::from_str(&text).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::schema::RegistryConfig;
    use serde_json::json;

    fn recipe() -> EntityType {
        EntityType::new("recipe").unwrap()
    }

    fn generated(reg: &mut RefRegistry, label: &str) -> EntityRef {
        reg.register_generated(&recipe(), label, json!({ "name": label, "steps": ["cook"] }))
            .unwrap()
    }

    #[test]
    fn generated_ref_is_pending() {
        let mut reg = RefRegistry::new(RegistryConfig::default());
        let r = generated(&mut reg, "Simple Cod");
        assert_eq!(r.to_string(), "gen_recipe_1");
        assert_eq!(reg.get(&r).unwrap().action, Action::Generated);
        assert_eq!(reg.get_artifact(&r).unwrap().content["name"], "Simple Cod");

        let err = reg.resolve_ref(&r).unwrap_err();
        assert!(matches!(err, RegistryError::Ref(RefError::PendingResolution { .. })));
        assert!(err.is_recoverable());
    }

    #[test]
    fn promote_binds_in_place() {
        let mut reg = RefRegistry::new(RegistryConfig::default());
        let r = generated(&mut reg, "Simple Cod");
        let promoted = reg.promote(&r, StorageId::from("xyz"), None).unwrap();
        assert_eq!(promoted, r);
        assert_eq!(reg.resolve_ref(&r).unwrap(), &StorageId::from("xyz"));
        assert_eq!(reg.resolve_storage(&recipe(), &StorageId::from("xyz")), Some(&r));
        assert!(reg.get_artifact(&r).is_none());
        assert_eq!(reg.get(&r).unwrap().action, Action::Created);
    }

    #[test]
    fn promote_is_idempotent() {
        let mut reg = RefRegistry::new(RegistryConfig::default());
        let r = generated(&mut reg, "Simple Cod");
        reg.promote(&r, StorageId::from("xyz"), Some("Simple Cod v2"))
            .unwrap();
        let after_first = reg.get(&r).unwrap().clone();
        let again = reg.promote(&r, StorageId::from("xyz"), Some("Simple Cod v2"))
            .unwrap();
        assert_eq!(again, r);
        assert_eq!(reg.get(&r).unwrap(), &after_first);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn promote_rejects_conflicts_without_change() {
        let mut reg = RefRegistry::new(RegistryConfig::default());
        let a = generated(&mut reg, "A");
        let b = generated(&mut reg, "B");
        reg.promote(&a, StorageId::from("one"), None).unwrap();

        // Re-promoting to a different id.
        let err = reg.promote(&a, StorageId::from("two"), None).unwrap_err();
        assert!(matches!(err, RegistryError::Ref(RefError::StorageConflict { .. })));
        assert_eq!(reg.resolve_ref(&a).unwrap(), &StorageId::from("one"));

        // Binding to an id owned by someone else.
        let err = reg.promote(&b, StorageId::from("one"), None).unwrap_err();
        assert!(matches!(err, RegistryError::Ref(RefError::StorageConflict { .. })));
        assert!(reg.get_artifact(&b).is_some());
        assert!(reg.get(&b).unwrap().is_pending());
    }

    #[test]
    fn promote_unknown_is_not_found() {
        let mut reg = RefRegistry::new(RegistryConfig::default());
        let missing = EntityRef::parse("gen_recipe_4").unwrap();
        let err = reg.promote(&missing, StorageId::from("x"), None).unwrap_err();
        assert!(matches!(err, RegistryError::Ref(RefError::NotFound { .. })));
    }

    #[test]
    fn label_match_reuses_pending_ref() {
        let mut reg = RefRegistry::new(RegistryConfig::default());
        let curry = generated(&mut reg, "Thai Curry");
        let r = reg
            .promote_matching(StorageId::from("db-1"), &recipe(), "thai curry")
            .unwrap();
        assert_eq!(r, curry);
        assert_eq!(r.to_string(), "gen_recipe_1");
        assert!(reg.artifacts().is_empty());
        assert_eq!(reg.allocator.peek(&recipe(), false), 0);

        // No artifact left to match: a confirmed ref is minted.
        let other = reg
            .promote_matching(StorageId::from("db-2"), &recipe(), "Thai Curry")
            .unwrap();
        assert_eq!(other.to_string(), "recipe_1");
    }

    #[test]
    fn label_match_prefers_lowest_ordinal() {
        let mut reg = RefRegistry::new(RegistryConfig::default());
        let first = generated(&mut reg, "Soup");
        let _second = generated(&mut reg, "SOUP");
        let r = reg
            .promote_matching(StorageId::from("db-1"), &recipe(), "soup")
            .unwrap();
        assert_eq!(r, first);
        assert_eq!(reg.artifacts().len(), 1);
    }

    #[test]
    fn content_survives_bincode() {
        let artifact = PendingArtifact {
            entity_ref: EntityRef::parse("gen_recipe_1").unwrap(),
            label: "Simple Cod".into(),
            content: json!({ "name": "Simple Cod", "servings": 2, "tags": ["fish"] }),
        };
        let bytes = bincode::serialize(&artifact).unwrap();
        let back: PendingArtifact = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, artifact);
    }
}
