//! Core reference types for the registry.
//!
//! Every entity the agent can talk about is addressed by an [`EntityRef`]: a
//! short typed string such as `recipe_12` or `gen_meal_1`. The real primary key
//! lives in a [`StorageId`], which is a distinct type so the two can never be
//! swapped by accident. The [`RefAllocator`] hands out per-type ordinals.
//!
//! The textual form `^(gen_)?[a-z]+_[0-9]+$` is part of the persisted snapshot
//! format and of the prompt contract, so [`EntityRef`]'s `Display` and
//! [`EntityRef::parse`] must stay byte-stable.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RefError;

/// Prefix marking a reference to generated, not yet persisted content.
pub const PENDING_PREFIX: &str = "gen_";

/// Entity type name reserved by the pending prefix.
const RESERVED_TYPE: &str = "gen";

/// Entity type (`recipe`, `meal`, ...): one or more lowercase ASCII letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityType(String);

impl EntityType {
    /// Validate and wrap an entity type name.
    pub fn new(raw: impl Into<String>) -> Result<Self, RefError> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && raw.bytes().all(|b| b.is_ascii_lowercase())
            && raw != RESERVED_TYPE;
        if valid {
            Ok(Self(raw))
        } else {
            Err(RefError::InvalidEntityType { raw })
        }
    }

    /// The type name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EntityType {
    type Error = RefError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::new(raw)
    }
}

impl From<EntityType> for String {
    fn from(ty: EntityType) -> Self {
        ty.0
    }
}

/// Real primary key of a row in the backing store.
///
/// Held as a string; integer keys are normalized to their decimal form by the
/// translation layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageId(String);

impl StorageId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StorageId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for StorageId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// A typed, session-unique reference such as `recipe_3` or `gen_recipe_1`.
///
/// Stored structurally and serialized as its textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityRef {
    pending: bool,
    entity_type: EntityType,
    ordinal: u64,
}

impl EntityRef {
    fn confirmed(entity_type: EntityType, ordinal: u64) -> Self {
        Self {
            pending: false,
            entity_type,
            ordinal,
        }
    }

    fn generated(entity_type: EntityType, ordinal: u64) -> Self {
        Self {
            pending: true,
            entity_type,
            ordinal,
        }
    }

    /// Parse the textual form.
    ///
    /// Only canonical ordinals are accepted (no leading zeros, never `0`), since
    /// the allocator never issues anything else and a non-canonical spelling
    /// would not round-trip byte for byte.
    pub fn parse(raw: &str) -> Result<Self, RefError> {
        let invalid = || RefError::InvalidRef {
            raw: raw.to_string(),
        };

        let (pending, body) = match raw.strip_prefix(PENDING_PREFIX) {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let (ty, digits) = body.rsplit_once('_').ok_or_else(invalid)?;
        if digits.is_empty()
            || !digits.bytes().all(|b| b.is_ascii_digit())
            || digits.starts_with('0')
        {
            return Err(invalid());
        }
        let ordinal: u64 = digits.parse().map_err(|_| invalid())?;
        let entity_type = EntityType::new(ty).map_err(|_| invalid())?;

        Ok(Self {
            pending,
            entity_type,
            ordinal,
        })
    }

    /// Whether this reference was issued for generated, unsaved content.
    ///
    /// The prefix is permanent: a promoted `gen_` reference keeps its spelling,
    /// so this says how the reference was born, not whether it is still pending.
    pub fn is_generated(&self) -> bool {
        self.pending
    }

    pub fn entity_type(&self) -> &EntityType {
        &self.entity_type
    }

    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pending {
            f.write_str(PENDING_PREFIX)?;
        }
        write!(f, "{}_{}", self.entity_type, self.ordinal)
    }
}

impl std::str::FromStr for EntityRef {
    type Err = RefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntityRef {
    type Error = RefError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<EntityRef> for String {
    fn from(r: EntityRef) -> Self {
        r.to_string()
    }
}

impl PartialOrd for EntityRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntityRef {
    /// Type first, then confirmed before generated, then ordinal.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.entity_type, self.pending, self.ordinal).cmp(&(
            &other.entity_type,
            other.pending,
            other.ordinal,
        ))
    }
}

/// Per-type reference allocator.
///
/// Confirmed and generated references count independently. Counters record the
/// last ordinal issued and are never rewound, so a reference is never reissued,
/// even after its entity is logically deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefAllocator {
    confirmed: BTreeMap<EntityType, u64>,
    generated: BTreeMap<EntityType, u64>,
}

impl RefAllocator {
    /// Create an allocator with every counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next confirmed reference for `entity_type`.
    pub fn next_ref(&mut self, entity_type: &EntityType) -> Result<EntityRef, RefError> {
        let ordinal = Self::bump(&mut self.confirmed, entity_type)?;
        Ok(EntityRef::confirmed(entity_type.clone(), ordinal))
    }

    /// Allocate the next `gen_` reference for `entity_type`.
    pub fn next_pending_ref(&mut self, entity_type: &EntityType) -> Result<EntityRef, RefError> {
        let ordinal = Self::bump(&mut self.generated, entity_type)?;
        Ok(EntityRef::generated(entity_type.clone(), ordinal))
    }

    /// Last ordinal issued for a type (0 if none), without consuming anything.
    pub fn peek(&self, entity_type: &EntityType, generated: bool) -> u64 {
        let counters = if generated {
            &self.generated
        } else {
            &self.confirmed
        };
        counters.get(entity_type).copied().unwrap_or(0)
    }

    /// Whether `r` is at or below the issued high-water mark of its counter.
    pub(crate) fn has_issued(&self, r: &EntityRef) -> bool {
        r.ordinal() <= self.peek(r.entity_type(), r.is_generated())
    }

    fn bump(counters: &mut BTreeMap<EntityType, u64>, ty: &EntityType) -> Result<u64, RefError> {
        let slot = counters.entry(ty.clone()).or_insert(0);
        let next = slot
            .checked_add(1)
            .ok_or_else(|| RefError::AllocatorExhausted {
                entity_type: ty.to_string(),
            })?;
        *slot = next;
        Ok(next)
    }
}
