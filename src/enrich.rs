//! Lazy foreign-key registration and deferred label enrichment.
//!
//! Translating a read result must never wait on extra round-trips. A foreign
//! key whose value has no reference yet is registered on the spot as `linked`
//! with a placeholder label, and an [`EnrichmentTask`] is queued. The caller
//! later asks for [`RefRegistry::pending_lookups`], runs one bulk query per
//! target table, and feeds the labels back through [`RefRegistry::enrich`].
//! Rows that come back from a read or insert without a label column are
//! queued the same way.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::RegistryResult;
use crate::record::Action;
use crate::reference::{EntityRef, EntityType, StorageId};
use crate::registry::RefRegistry;

/// A lazily linked reference waiting for its label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentTask {
    pub entity_ref: EntityRef,
    pub storage_id: StorageId,
    pub target_table: String,
    pub label_column: String,
    /// Enrichment passes this task has gone through without a label.
    pub attempts: u32,
}

/// One bulk label query for the Database collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelLookup {
    pub table: String,
    /// Entity type of the table; results are keyed by it in [`RefRegistry::enrich`].
    pub entity_type: EntityType,
    pub id_column: String,
    pub label_column: String,
    pub storage_ids: Vec<StorageId>,
}

/// Outcome of an enrichment pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichReport {
    /// References whose label was filled in.
    pub labeled: Vec<EntityRef>,
    /// References still carrying the placeholder, kept for another pass.
    pub unresolved: Vec<EntityRef>,
    /// References given up on after too many passes. They keep the placeholder.
    pub dropped: Vec<EntityRef>,
}

/// Key of a label result: the entity type looked up and the storage id.
pub type LabelKey = (EntityType, StorageId);

impl RefRegistry {
    /// Reference for a foreign-key value, registering it as `linked` if unseen.
    pub(crate) fn link_foreign_key(
        &mut self,
        storage_id: StorageId,
        target_table: &str,
    ) -> RegistryResult<EntityRef> {
        let target = self.config.table(target_table)?.clone();
        if let Some(existing) = self.resolve_storage(&target.entity_type, &storage_id) {
            return Ok(existing.clone());
        }

        let entity_ref = self.register(storage_id.clone(), &target.entity_type, "", Action::Linked)?;
        tracing::debug!(reference = %entity_ref, table = target_table, "lazily linked foreign key");
        self.queue_enrichment(entity_ref.clone(), storage_id, target_table)?;
        Ok(entity_ref)
    }

    /// Queue a label lookup for a reference registered without a label.
    pub(crate) fn queue_enrichment(
        &mut self,
        entity_ref: EntityRef,
        storage_id: StorageId,
        table: &str,
    ) -> RegistryResult<()> {
        if self.enrichment.iter().any(|t| t.entity_ref == entity_ref) {
            return Ok(());
        }
        let label_column = self.config.table(table)?.label_column.clone();
        self.enrichment.push(EnrichmentTask {
            entity_ref,
            storage_id,
            target_table: table.to_string(),
            label_column,
            attempts: 0,
        });
        Ok(())
    }

    /// Queued enrichment tasks, oldest first.
    pub fn enrichment_tasks(&self) -> &[EnrichmentTask] {
        &self.enrichment
    }

    /// Bulk label queries needed to enrich every queued task, one per target
    /// table, ordered by table name.
    pub fn pending_lookups(&self) -> Vec<LabelLookup> {
        let mut by_table: BTreeMap<&str, LabelLookup> = BTreeMap::new();
        for task in &self.enrichment {
            let lookup = by_table
                .entry(task.target_table.as_str())
                .or_insert_with(|| LabelLookup {
                    table: task.target_table.clone(),
                    entity_type: task.entity_ref.entity_type().clone(),
                    id_column: self
                        .config
                        .tables
                        .get(&task.target_table)
                        .map(|t| t.id_column.clone())
                        .unwrap_or_else(|| "id".into()),
                    label_column: task.label_column.clone(),
                    storage_ids: Vec::new(),
                });
            if !lookup.storage_ids.contains(&task.storage_id) {
                lookup.storage_ids.push(task.storage_id.clone());
            }
        }
        by_table.into_values().collect()
    }

    /// Apply the results of the bulk label lookups.
    ///
    /// `labels` maps `(entity type, storage id)` to labels across all
    /// looked-up tables. Tasks without a result keep their placeholder and are
    /// retried on the next pass, up to `max_enrich_attempts`. Tasks whose
    /// record already carries a real label (set by a direct read in the
    /// meantime) are cleared without touching it.
    pub fn enrich(&mut self, labels: &HashMap<LabelKey, String>) -> EnrichReport {
        let mut report = EnrichReport::default();
        let max_attempts = self.config.max_enrich_attempts;
        let placeholder = self.config.placeholder_label.clone();
        let tasks = std::mem::take(&mut self.enrichment);

        for mut task in tasks {
            let Some(record) = self.records.get_mut(&task.entity_ref) else {
                continue;
            };
            if record.label != placeholder {
                continue;
            }
            let key = (record.entity_type.clone(), task.storage_id.clone());
            match labels.get(&key).filter(|l| !l.is_empty()) {
                Some(label) => {
                    record.label = label.clone();
                    report.labeled.push(task.entity_ref);
                }
                None => {
                    task.attempts += 1;
                    if task.attempts >= max_attempts {
                        tracing::warn!(
                            reference = %task.entity_ref,
                            table = %task.target_table,
                            attempts = task.attempts,
                            "no label found, giving up on enrichment"
                        );
                        report.dropped.push(task.entity_ref);
                    } else {
                        report.unresolved.push(task.entity_ref.clone());
                        self.enrichment.push(task);
                    }
                }
            }
        }

        tracing::debug!(
            labeled = report.labeled.len(),
            unresolved = report.unresolved.len(),
            dropped = report.dropped.len(),
            "enrichment pass complete"
        );
        report
    }
}
