//! Active-context view handed to the planning layer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lifecycle::{Placement, by_recency, placement};
use crate::record::{Action, EntityRecord};
use crate::reference::{EntityRef, EntityType};
use crate::registry::RefRegistry;

/// One entity as presented to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewEntry {
    pub reference: EntityRef,
    pub entity_type: EntityType,
    pub label: String,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<String>,
}

impl From<&EntityRecord> for ViewEntry {
    fn from(record: &EntityRecord) -> Self {
        Self {
            reference: record.entity_ref.clone(),
            entity_type: record.entity_type.clone(),
            label: record.label.clone(),
            action: record.action,
            retention: record.retention.clone(),
        }
    }
}

impl fmt::Display for ViewEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "- {} \"{}\" ({}, {})",
            self.reference, self.label, self.entity_type, self.action
        )?;
        if let Some(reason) = &self.retention {
            write!(f, " kept: {reason}")?;
        }
        Ok(())
    }
}

/// Entities the planner should see this turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveContext {
    /// Every pending artifact, regardless of recency.
    pub generated: Vec<ViewEntry>,
    /// Confirmed entities touched within the window.
    pub recent: Vec<ViewEntry>,
    /// Confirmed entities outside the window with a retention reason.
    pub retained: Vec<ViewEntry>,
}

impl ActiveContext {
    pub fn is_empty(&self) -> bool {
        self.generated.is_empty() && self.recent.is_empty() && self.retained.is_empty()
    }
}

impl fmt::Display for ActiveContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sections = [
            ("Generated (not saved)", &self.generated),
            ("Recent", &self.recent),
            ("Retained", &self.retained),
        ];
        let mut first = true;
        for (title, entries) in sections {
            if entries.is_empty() {
                continue;
            }
            if !first {
                writeln!(f)?;
            }
            first = false;
            writeln!(f, "{title}:")?;
            for entry in entries {
                writeln!(f, "{entry}")?;
            }
        }
        if first {
            writeln!(f, "(no active entities)")?;
        }
        Ok(())
    }
}

impl RefRegistry {
    /// Build the planner's view as of `current_turn` with a `window`-turn
    /// recency window.
    pub fn format_active_view(&self, current_turn: u64, window: u64) -> ActiveContext {
        let mut generated = Vec::new();
        let mut recent = Vec::new();
        let mut retained = Vec::new();
        for record in self.records.values() {
            if record.is_pending() {
                generated.push(record);
                continue;
            }
            match placement(record, window, current_turn) {
                Placement::Recent => recent.push(record),
                Placement::Retained => retained.push(record),
                Placement::Omitted => {}
            }
        }
        generated.sort_by(by_recency);
        recent.sort_by(by_recency);
        retained.sort_by(by_recency);

        ActiveContext {
            generated: generated.into_iter().map(ViewEntry::from).collect(),
            recent: recent.into_iter().map(ViewEntry::from).collect(),
            retained: retained.into_iter().map(ViewEntry::from).collect(),
        }
    }

    /// [`format_active_view`](Self::format_active_view) at the registry's own
    /// turn with the configured window.
    pub fn current_view(&self) -> ActiveContext {
        self.format_active_view(self.turn, self.config.window_turns)
    }
}
