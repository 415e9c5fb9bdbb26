//! Entity lifecycle: recency, action transitions and retention.
//!
//! Recency only moves forward and only through [`RefRegistry::touch`]. The
//! active view partitions references into *recent* (touched within the window)
//! and *retained* (older, but carrying an explicit retention reason). Anything
//! else is left out of the view and stays resolvable.

use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, RegistryResult};
use crate::record::{Action, EntityRecord};
use crate::reference::EntityRef;
use crate::registry::RefRegistry;

/// Recency partition of the registry at a given turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveView {
    /// Touched within the window, most recent first.
    pub recent: Vec<EntityRef>,
    /// Outside the window but explicitly retained, most recent first.
    pub retained: Vec<EntityRef>,
}

impl ActiveView {
    pub fn is_empty(&self) -> bool {
        self.recent.is_empty() && self.retained.is_empty()
    }

    /// Whether a reference appears in either partition.
    pub fn contains(&self, entity_ref: &EntityRef) -> bool {
        self.recent.contains(entity_ref) || self.retained.contains(entity_ref)
    }
}

/// Where a record falls in the active view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    Recent,
    Retained,
    Omitted,
}

pub(crate) fn placement(record: &EntityRecord, window_turns: u64, current_turn: u64) -> Placement {
    // A deleted entity is shown during the turn it was deleted in, then dropped.
    if record.action == Action::Deleted {
        let deleted_in = record.turn_deleted.unwrap_or(record.turn_last_referenced);
        return if deleted_in >= current_turn {
            Placement::Recent
        } else {
            Placement::Omitted
        };
    }
    if current_turn.saturating_sub(record.turn_last_referenced) <= window_turns {
        Placement::Recent
    } else if record.retention.is_some() {
        Placement::Retained
    } else {
        Placement::Omitted
    }
}

/// Most recently referenced first, then by reference.
pub(crate) fn by_recency(a: &&EntityRecord, b: &&EntityRecord) -> std::cmp::Ordering {
    b.turn_last_referenced
        .cmp(&a.turn_last_referenced)
        .then_with(|| a.entity_ref.cmp(&b.entity_ref))
}

impl RefRegistry {
    /// Mark a reference as discussed in `turn`.
    ///
    /// Sets `turn_last_referenced` to `max(current, turn)`: repeated or stale
    /// touches never move recency backwards.
    pub fn touch(&mut self, entity_ref: &EntityRef, turn: u64) -> RegistryResult<()> {
        let record = self.record_mut(entity_ref)?;
        record.turn_last_referenced = record.turn_last_referenced.max(turn);
        Ok(())
    }

    /// Touch every reference in `refs`; all must exist or nothing changes.
    pub fn touch_all<'a>(
        &mut self,
        refs: impl IntoIterator<Item = &'a EntityRef>,
        turn: u64,
    ) -> RegistryResult<()> {
        let refs: Vec<&EntityRef> = refs.into_iter().collect();
        for r in &refs {
            self.record(r)?;
        }
        for r in refs {
            self.touch(r, turn)?;
        }
        Ok(())
    }

    /// Change a reference's action, subject to the transition allow-list.
    ///
    /// Illegal transitions are logged and rejected; the previous action is kept.
    pub fn set_action(&mut self, entity_ref: &EntityRef, action: Action) -> RegistryResult<()> {
        let turn = self.turn;
        let record = self.record_mut(entity_ref)?;
        if !record.action.can_transition_to(action) {
            tracing::warn!(
                reference = %entity_ref,
                from = %record.action,
                to = %action,
                "illegal action transition dropped"
            );
            return Err(LifecycleError::IllegalTransition {
                reference: entity_ref.to_string(),
                from: record.action.to_string(),
                to: action.to_string(),
            }
            .into());
        }
        record.apply_action(action, turn);
        Ok(())
    }

    /// Keep presenting a reference past the recency window, for `reason`.
    pub fn set_retention_reason(
        &mut self,
        entity_ref: &EntityRef,
        reason: impl Into<String>,
    ) -> RegistryResult<()> {
        let record = self.record_mut(entity_ref)?;
        record.retention = Some(reason.into());
        Ok(())
    }

    /// Drop a retention reason. Returns the previous reason, if any.
    pub fn clear_retention(&mut self, entity_ref: &EntityRef) -> RegistryResult<Option<String>> {
        let record = self.record_mut(entity_ref)?;
        Ok(record.retention.take())
    }

    /// Partition references into recent and retained as of `current_turn`.
    ///
    /// Recent: `current_turn - turn_last_referenced <= window_turns`. Retained:
    /// outside the window with a retention reason. Everything else is omitted
    /// from the view but not erased.
    pub fn get_active(&self, window_turns: u64, current_turn: u64) -> ActiveView {
        let mut recent = Vec::new();
        let mut retained = Vec::new();
        for record in self.records.values() {
            match placement(record, window_turns, current_turn) {
                Placement::Recent => recent.push(record),
                Placement::Retained => retained.push(record),
                Placement::Omitted => {}
            }
        }
        recent.sort_by(by_recency);
        retained.sort_by(by_recency);
        ActiveView {
            recent: recent.into_iter().map(|r| r.entity_ref.clone()).collect(),
            retained: retained.into_iter().map(|r| r.entity_ref.clone()).collect(),
        }
    }
}
