//! Versioned snapshots for cross-turn persistence.
//!
//! A snapshot is an 8-byte magic, a little-endian `u32` format version, and a
//! bincode-encoded body holding every record, pending artifact, counter, queued
//! enrichment task and the turn cursor. The host stores the blob alongside the
//! transcript; the registry never does I/O itself.
//!
//! Snapshots of another version are rejected outright. The caller falls back to
//! a fresh registry ([`RefRegistry::restore_or_fresh`]).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::artifact::{ArtifactStore, PendingArtifact};
use crate::enrich::EnrichmentTask;
use crate::error::{RegistryResult, SnapshotError};
use crate::record::{Action, Binding, EntityRecord};
use crate::reference::{EntityRef, EntityType, RefAllocator, StorageId};
use crate::registry::RefRegistry;
use crate::schema::RegistryConfig;

const SNAPSHOT_MAGIC: &[u8; 8] = b"REFREG\0\0";
/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 2;
const HEADER_SIZE: usize = 12;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotBody {
    turn: u64,
    step: Option<String>,
    allocator: RefAllocator,
    records: Vec<EntityRecord>,
    artifacts: Vec<PendingArtifact>,
    enrichment: Vec<EnrichmentTask>,
}

fn corrupt(message: impl Into<String>) -> SnapshotError {
    SnapshotError::Corrupt {
        message: message.into(),
    }
}

impl RefRegistry {
    fn snapshot_body(&self) -> SnapshotBody {
        SnapshotBody {
            turn: self.turn,
            step: self.step.clone(),
            allocator: self.allocator.clone(),
            records: self.records().into_iter().cloned().collect(),
            artifacts: self.artifacts.iter_sorted().into_iter().cloned().collect(),
            enrichment: self.enrichment.clone(),
        }
    }

    /// Encode the whole registry as a versioned binary snapshot.
    pub fn serialize(&self) -> RegistryResult<Vec<u8>> {
        let body = bincode::serialize(&self.snapshot_body()).map_err(|e| SnapshotError::Encoding {
            message: format!("failed to serialize registry: {e}"),
        })?;
        let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
        out.extend_from_slice(SNAPSHOT_MAGIC);
        out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        out.extend_from_slice(&body);
        tracing::debug!(
            bytes = out.len(),
            records = self.records.len(),
            turn = self.turn,
            "registry snapshot written"
        );
        Ok(out)
    }

    /// Rebuild a registry from a snapshot.
    ///
    /// Fails with [`SnapshotError::VersionMismatch`] for other format versions
    /// and [`SnapshotError::Corrupt`] when the header is wrong or the decoded
    /// state breaks a registry invariant. No partial recovery is attempted.
    pub fn deserialize(bytes: &[u8], config: RegistryConfig) -> RegistryResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(corrupt(format!("{} bytes is shorter than the snapshot header", bytes.len())).into());
        }
        if &bytes[..8] != SNAPSHOT_MAGIC {
            return Err(corrupt("missing snapshot magic; is this a registry snapshot?").into());
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&bytes[8..HEADER_SIZE]);
        let version = u32::from_le_bytes(version);
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                found: version,
                expected: SNAPSHOT_VERSION,
            }
            .into());
        }

        let body: SnapshotBody =
            bincode::deserialize(&bytes[HEADER_SIZE..]).map_err(|e| SnapshotError::Encoding {
                message: format!("failed to deserialize registry: {e}"),
            })?;
        Ok(Self::from_body(body, config)?)
    }

    /// Restore from a snapshot, or start fresh if there is none or it cannot
    /// be used.
    pub fn restore_or_fresh(bytes: Option<&[u8]>, config: RegistryConfig) -> Self {
        let Some(bytes) = bytes else {
            return Self::new(config);
        };
        match Self::deserialize(bytes, config.clone()) {
            Ok(registry) => registry,
            Err(e) => {
                tracing::warn!(error = %e, "discarding registry snapshot, starting fresh");
                Self::new(config)
            }
        }
    }

    /// Human-readable JSON rendering of the snapshot body.
    pub fn export_json(&self) -> RegistryResult<String> {
        serde_json::to_string_pretty(&self.snapshot_body()).map_err(|e| {
            SnapshotError::Encoding {
                message: format!("failed to render registry as JSON: {e}"),
            }
            .into()
        })
    }

    fn from_body(body: SnapshotBody, config: RegistryConfig) -> Result<Self, SnapshotError> {
        let mut records: HashMap<EntityRef, EntityRecord> = HashMap::with_capacity(body.records.len());
        let mut by_storage: HashMap<(EntityType, StorageId), EntityRef> = HashMap::new();

        for record in body.records {
            let r = &record.entity_ref;
            if r.entity_type() != &record.entity_type {
                return Err(corrupt(format!("{r} is recorded as a {}", record.entity_type)));
            }
            if !body.allocator.has_issued(r) {
                return Err(corrupt(format!("{r} is beyond its allocator counter")));
            }
            if record.turn_last_referenced < record.turn_created {
                return Err(corrupt(format!("{r} was last referenced before it was created")));
            }
            if record.turn_deleted.is_some() != (record.action == Action::Deleted) {
                return Err(corrupt(format!("{r} has a deletion turn that disagrees with its action")));
            }
            match &record.binding {
                Binding::Pending => {
                    if !r.is_generated() || record.action != Action::Generated {
                        return Err(corrupt(format!("{r} is pending but not generated")));
                    }
                }
                Binding::Confirmed(id) => {
                    if record.action == Action::Generated {
                        return Err(corrupt(format!("{r} is confirmed but still marked generated")));
                    }
                    let key = (record.entity_type.clone(), id.clone());
                    if let Some(other) = by_storage.insert(key, r.clone()) {
                        return Err(corrupt(format!("storage id {id} is bound to both {other} and {r}")));
                    }
                }
            }
            if records.insert(r.clone(), record.clone()).is_some() {
                return Err(corrupt(format!("{} appears twice", record.entity_ref)));
            }
        }

        let mut artifacts = ArtifactStore::default();
        let mut with_artifact = HashSet::new();
        for artifact in body.artifacts {
            match records.get(&artifact.entity_ref) {
                Some(record) if record.is_pending() => {}
                _ => {
                    return Err(corrupt(format!(
                        "artifact {} has no pending record",
                        artifact.entity_ref
                    )));
                }
            }
            with_artifact.insert(artifact.entity_ref.clone());
            artifacts.insert(artifact);
        }
        if let Some(orphan) = records
            .values()
            .find(|r| r.is_pending() && !with_artifact.contains(&r.entity_ref))
        {
            return Err(corrupt(format!("{} is pending without an artifact", orphan.entity_ref)));
        }

        if let Some(task) = body
            .enrichment
            .iter()
            .find(|t| !records.contains_key(&t.entity_ref))
        {
            return Err(corrupt(format!("enrichment task for unknown {}", task.entity_ref)));
        }

        Ok(Self {
            config,
            allocator: body.allocator,
            records,
            by_storage,
            artifacts,
            enrichment: body.enrichment,
            turn: body.turn,
            step: body.step,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use serde_json::json;

    fn populated() -> RefRegistry {
        let mut reg = RefRegistry::new(RegistryConfig::default());
        let recipe = EntityType::new("recipe").unwrap();
        reg.set_turn(2);
        reg.register(StorageId::from("abc"), &recipe, "Thai Curry", Action::Read)
            .unwrap();
        reg.register_generated(&recipe, "Simple Cod", json!({ "name": "Simple Cod" }))
            .unwrap();
        reg
    }

    #[test]
    fn round_trip_preserves_state() {
        let reg = populated();
        let bytes = reg.serialize().unwrap();
        assert_eq!(&bytes[..8], SNAPSHOT_MAGIC);

        let back = RefRegistry::deserialize(&bytes, RegistryConfig::default()).unwrap();
        assert_eq!(back.turn(), 2);
        assert_eq!(back.records(), reg.records());
        assert_eq!(back.resolve_str("recipe_1").unwrap(), &StorageId::from("abc"));
        let draft = EntityRef::parse("gen_recipe_1").unwrap();
        assert_eq!(back.get_artifact(&draft), reg.get_artifact(&draft));
        assert_eq!(back.allocator, reg.allocator);
    }

    #[test]
    fn counters_continue_after_restore() {
        let reg = populated();
        let mut back =
            RefRegistry::deserialize(&reg.serialize().unwrap(), RegistryConfig::default()).unwrap();
        let r = back
            .register(
                StorageId::from("def"),
                &EntityType::new("recipe").unwrap(),
                "Next",
                Action::Read,
            )
            .unwrap();
        assert_eq!(r.to_string(), "recipe_2");
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut bytes = populated().serialize().unwrap();
        bytes[8..12].copy_from_slice(&99u32.to_le_bytes());
        let err = RefRegistry::deserialize(&bytes, RegistryConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Snapshot(SnapshotError::VersionMismatch { found: 99, expected: 2 })
        ));
    }

    #[test]
    fn garbage_is_corrupt() {
        let err = RefRegistry::deserialize(b"short", RegistryConfig::default()).unwrap_err();
        assert!(matches!(err, RegistryError::Snapshot(SnapshotError::Corrupt { .. })));

        let err = RefRegistry::deserialize(b"NOTAREGISTRYBLOB", RegistryConfig::default())
            .unwrap_err();
        assert!(matches!(err, RegistryError::Snapshot(SnapshotError::Corrupt { .. })));

        let mut bytes = populated().serialize().unwrap();
        bytes.truncate(bytes.len() - 4);
        let err = RefRegistry::deserialize(&bytes, RegistryConfig::default()).unwrap_err();
        assert!(matches!(err, RegistryError::Snapshot(SnapshotError::Encoding { .. })));
    }

    #[test]
    fn restore_or_fresh_falls_back() {
        let fresh = RefRegistry::restore_or_fresh(Some(b"junk"), RegistryConfig::default());
        assert!(fresh.is_empty());

        let none = RefRegistry::restore_or_fresh(None, RegistryConfig::default());
        assert!(none.is_empty());

        let bytes = populated().serialize().unwrap();
        let restored = RefRegistry::restore_or_fresh(Some(&bytes), RegistryConfig::default());
        assert_eq!(restored.len(), 2);
    }

    #[test]
    fn invariant_violations_are_corrupt() {
        let reg = populated();
        let mut body = reg.snapshot_body();
        // Same storage id bound twice.
        let mut dup = body.records[0].clone();
        dup.entity_ref = EntityRef::parse("recipe_2").unwrap();
        body.allocator = {
            let mut alloc = body.allocator.clone();
            alloc.next_ref(&EntityType::new("recipe").unwrap()).unwrap();
            alloc
        };
        body.records.push(dup);
        let err = RefRegistry::from_body(body, RegistryConfig::default()).unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt { .. }));

        let mut body = reg.snapshot_body();
        body.artifacts.clear();
        assert!(RefRegistry::from_body(body, RegistryConfig::default()).is_err());

        // A deletion turn on a record that was never deleted.
        let mut body = reg.snapshot_body();
        let read = body
            .records
            .iter_mut()
            .find(|r| r.action == Action::Read)
            .unwrap();
        read.turn_deleted = Some(2);
        let err = RefRegistry::from_body(body, RegistryConfig::default()).unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt { .. }));
    }

    #[test]
    fn deletion_turn_survives_round_trip() {
        let mut reg = populated();
        let r = EntityRef::parse("recipe_1").unwrap();
        reg.set_turn(3);
        reg.set_action(&r, Action::Deleted).unwrap();
        let back =
            RefRegistry::deserialize(&reg.serialize().unwrap(), RegistryConfig::default()).unwrap();
        assert_eq!(back.get(&r).unwrap().turn_deleted, Some(3));
        assert!(back.get_active(2, 3).contains(&r));
        assert!(!back.get_active(2, 4).contains(&r));
    }

    #[test]
    fn json_export_names_refs() {
        let json = populated().export_json().unwrap();
        assert!(json.contains("\"recipe_1\""));
        assert!(json.contains("\"gen_recipe_1\""));
    }
}
