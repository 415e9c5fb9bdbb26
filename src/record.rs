//! Per-reference metadata: how an entity surfaced and when it was last discussed.
//!
//! Every reference in the registry owns exactly one [`EntityRecord`]. The
//! record carries the entity's [`Binding`] (a storage id, or the pending
//! sentinel for generated content), its [`Action`] provenance and the turn
//! bookkeeping the recency view is computed from.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::reference::{EntityRef, EntityType, StorageId};

/// How an entity last changed from the conversation's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Returned by a direct read.
    Read,
    /// Persisted by a creation write (or promoted from generated content).
    Created,
    /// Modified by an update write.
    Updated,
    /// Removed by a delete write. The reference stays resolvable.
    Deleted,
    /// Model-generated content that has not been saved.
    Generated,
    /// Discovered as a foreign key inside another row, label not yet known.
    Linked,
}

impl Action {
    /// Specificity rank used when the same storage id is registered again.
    ///
    /// `Generated` sits outside the ordering: it is never reached or left
    /// through registration.
    pub fn specificity(self) -> Option<u8> {
        match self {
            Action::Linked => Some(0),
            Action::Read => Some(1),
            Action::Created => Some(2),
            Action::Updated => Some(3),
            Action::Deleted => Some(4),
            Action::Generated => None,
        }
    }

    /// Whether `self -> to` is on the lifecycle allow-list.
    ///
    /// The allow-list is the specificity ladder: an action may only move to a
    /// strictly more specific one. Staying on the same action is always
    /// allowed (and is a no-op). `Generated` is only left through promotion.
    pub fn can_transition_to(self, to: Action) -> bool {
        if self == to {
            return true;
        }
        match (self.specificity(), to.specificity()) {
            (Some(from), Some(to)) => to > from,
            _ => false,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Read => "read",
            Action::Created => "created",
            Action::Updated => "updated",
            Action::Deleted => "deleted",
            Action::Generated => "generated",
            Action::Linked => "linked",
        };
        f.write_str(s)
    }
}

/// What a reference is bound to in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Binding {
    /// Backed by a real row.
    Confirmed(StorageId),
    /// Generated content awaiting persistence; no storage id exists yet.
    Pending,
}

impl Binding {
    pub fn storage_id(&self) -> Option<&StorageId> {
        match self {
            Binding::Confirmed(id) => Some(id),
            Binding::Pending => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Binding::Pending)
    }
}

/// Metadata for a single reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// The reference this record describes.
    pub entity_ref: EntityRef,
    /// Storage binding, or the pending sentinel.
    pub binding: Binding,
    /// Entity type (always equal to `entity_ref.entity_type()`).
    pub entity_type: EntityType,
    /// Human-readable label shown to the model.
    pub label: String,
    /// Lifecycle action.
    pub action: Action,
    /// Turn in which the reference was issued.
    pub turn_created: u64,
    /// Last turn in which the reference was explicitly touched.
    pub turn_last_referenced: u64,
    /// Pipeline step that surfaced the entity, if the caller set one.
    pub source_step: Option<String>,
    /// Externally attached reason to keep presenting the entity past the
    /// recency window.
    pub retention: Option<String>,
    /// Turn in which the action became `deleted`.
    pub turn_deleted: Option<u64>,
}

impl EntityRecord {
    /// Create a record issued at `turn`.
    pub fn new(
        entity_ref: EntityRef,
        binding: Binding,
        label: impl Into<String>,
        action: Action,
        turn: u64,
    ) -> Self {
        let entity_type = entity_ref.entity_type().clone();
        Self {
            entity_ref,
            binding,
            entity_type,
            label: label.into(),
            action,
            turn_created: turn,
            turn_last_referenced: turn,
            source_step: None,
            retention: None,
            turn_deleted: (action == Action::Deleted).then_some(turn),
        }
    }

    /// Attach the pipeline step that surfaced this entity.
    pub fn with_source_step(mut self, step: Option<String>) -> Self {
        self.source_step = step;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.binding.is_pending()
    }

    pub fn storage_id(&self) -> Option<&StorageId> {
        self.binding.storage_id()
    }

    /// Move to `action` in `turn`, stamping the deletion turn when it applies.
    pub(crate) fn apply_action(&mut self, action: Action, turn: u64) {
        if action == Action::Deleted && self.action != Action::Deleted {
            self.turn_deleted = Some(turn);
        }
        self.action = action;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specificity_orders_confirmed_actions() {
        let order = [
            Action::Linked,
            Action::Read,
            Action::Created,
            Action::Updated,
            Action::Deleted,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].specificity() < pair[1].specificity());
        }
        assert_eq!(Action::Generated.specificity(), None);
    }

    #[test]
    fn allow_list() {
        assert!(Action::Linked.can_transition_to(Action::Read));
        assert!(Action::Read.can_transition_to(Action::Deleted));
        assert!(Action::Created.can_transition_to(Action::Updated));
        assert!(Action::Read.can_transition_to(Action::Read));

        assert!(!Action::Read.can_transition_to(Action::Linked));
        assert!(!Action::Deleted.can_transition_to(Action::Read));
        assert!(!Action::Generated.can_transition_to(Action::Created));
        assert!(!Action::Read.can_transition_to(Action::Generated));
        assert!(!Action::Updated.can_transition_to(Action::Created));
    }

    #[test]
    fn allow_list_matches_registration_ladder() {
        let all = [
            Action::Linked,
            Action::Read,
            Action::Created,
            Action::Updated,
            Action::Deleted,
            Action::Generated,
        ];
        for from in all {
            for to in all {
                if from == to {
                    continue;
                }
                let upgrade = matches!(
                    (from.specificity(), to.specificity()),
                    (Some(a), Some(b)) if b > a
                );
                assert_eq!(from.can_transition_to(to), upgrade, "{from} -> {to}");
            }
        }
        assert!(Action::Read.can_transition_to(Action::Created));
    }

    #[test]
    fn deletion_turn_is_stamped_once() {
        let r = EntityRef::parse("recipe_1").unwrap();
        let mut rec = EntityRecord::new(
            r,
            Binding::Confirmed(StorageId::from("abc")),
            "Thai Curry",
            Action::Read,
            1,
        );
        assert_eq!(rec.turn_deleted, None);
        rec.apply_action(Action::Deleted, 3);
        rec.apply_action(Action::Deleted, 5);
        assert_eq!(rec.turn_deleted, Some(3));
    }

    #[test]
    fn new_record_starts_with_equal_turns() {
        let r = EntityRef::parse("recipe_1").unwrap();
        let rec = EntityRecord::new(
            r.clone(),
            Binding::Confirmed(StorageId::from("abc")),
            "Thai Curry",
            Action::Read,
            4,
        );
        assert_eq!(rec.turn_created, 4);
        assert_eq!(rec.turn_last_referenced, 4);
        assert_eq!(rec.entity_type.as_str(), "recipe");
        assert_eq!(rec.storage_id().map(StorageId::as_str), Some("abc"));
        assert!(!rec.is_pending());
    }
}
