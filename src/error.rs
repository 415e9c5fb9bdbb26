//! Rich diagnostic error types for the reference registry.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so the planning layer (or a human reading
//! a log) knows what went wrong and what the caller is expected to do next.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the registry.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Ref(#[from] RefError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

impl RegistryError {
    /// Whether the caller can recover locally instead of replanning.
    ///
    /// Only a pending-resolution failure qualifies: the caller redirects to the
    /// artifact store and carries on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RegistryError::Ref(RefError::PendingResolution { .. }))
    }
}

// ---------------------------------------------------------------------------
// Reference errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RefError {
    #[error("unknown reference: {reference}")]
    #[diagnostic(
        code(refreg::reference::not_found),
        help(
            "No entity with this reference was surfaced in this session. \
             Replan from the active view instead of retrying the same reference."
        )
    )]
    NotFound { reference: String },

    #[error("reference {reference} points at generated content that is not saved yet")]
    #[diagnostic(
        code(refreg::reference::pending),
        help(
            "Generated entities have no storage identifier until they are promoted. \
             Read the content from the artifact store, or persist it first."
        )
    )]
    PendingResolution { reference: String },

    #[error("malformed reference: \"{raw}\"")]
    #[diagnostic(
        code(refreg::reference::malformed),
        help("References look like `recipe_12` or `gen_meal_1` (`^(gen_)?[a-z]+_[0-9]+$`).")
    )]
    InvalidRef { raw: String },

    #[error("invalid entity type: \"{raw}\"")]
    #[diagnostic(
        code(refreg::reference::invalid_type),
        help("Entity types are one or more lowercase ASCII letters, and `gen` is reserved.")
    )]
    InvalidEntityType { raw: String },

    #[error("cannot bind {reference} to storage id {storage_id}: already bound to {existing}")]
    #[diagnostic(
        code(refreg::reference::storage_conflict),
        help(
            "Each storage id of a type maps to exactly one reference, and promotion is terminal. \
             The registry was left unchanged."
        )
    )]
    StorageConflict {
        reference: String,
        storage_id: String,
        existing: String,
    },

    #[error("reference allocator exhausted for entity type {entity_type}")]
    #[diagnostic(
        code(refreg::reference::exhausted),
        help(
            "The per-type counter reached u64::MAX. This requires 2^64 allocations \
             within one session; check for an allocation loop."
        )
    )]
    AllocatorExhausted { entity_type: String },
}

// ---------------------------------------------------------------------------
// Lifecycle errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LifecycleError {
    #[error("illegal action transition for {reference}: {from} -> {to}")]
    #[diagnostic(
        code(refreg::lifecycle::illegal_transition),
        help(
            "Allowed transitions: linked -> read/updated/deleted, read -> updated/deleted, \
             created -> updated/deleted, updated -> deleted. Generated entities only \
             leave `generated` through promotion. The previous action was kept."
        )
    )]
    IllegalTransition {
        reference: String,
        from: String,
        to: String,
    },
}

// ---------------------------------------------------------------------------
// Schema errors (translation boundary)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SchemaError {
    #[error("table \"{table}\" is not declared in the registry schema")]
    #[diagnostic(
        code(refreg::schema::unknown_table),
        help("Add a `[tables.{table}]` section to the registry config.")
    )]
    UnknownTable { table: String },

    #[error("row {row} of table \"{table}\" has no \"{column}\" column")]
    #[diagnostic(
        code(refreg::schema::missing_column),
        help("The Database collaborator must return the id column for every row it hands over.")
    )]
    MissingColumn {
        table: String,
        column: String,
        row: usize,
    },

    #[error("column \"{column}\" of table \"{table}\" holds a value that cannot be an identifier")]
    #[diagnostic(
        code(refreg::schema::invalid_value),
        help("Identifier columns must hold strings or integers.")
    )]
    InvalidValue { table: String, column: String },

    #[error("column \"{column}\" of table \"{table}\" expects a {expected} reference, got {reference}")]
    #[diagnostic(
        code(refreg::schema::wrong_entity_type),
        help("Pass a reference of the entity type this column points at.")
    )]
    WrongEntityType {
        table: String,
        column: String,
        reference: String,
        expected: String,
    },
}

// ---------------------------------------------------------------------------
// Snapshot errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SnapshotError {
    #[error("snapshot version {found} is not supported (expected {expected})")]
    #[diagnostic(
        code(refreg::snapshot::version_mismatch),
        help(
            "Snapshots are never partially recovered. Start the session with a fresh \
             registry (see `RefRegistry::restore_or_fresh`)."
        )
    )]
    VersionMismatch { found: u32, expected: u32 },

    #[error("corrupt snapshot: {message}")]
    #[diagnostic(
        code(refreg::snapshot::corrupt),
        help("The blob is not a registry snapshot or violates registry invariants. Start fresh.")
    )]
    Corrupt { message: String },

    #[error("snapshot encoding error: {message}")]
    #[diagnostic(
        code(refreg::snapshot::encoding),
        help("Failed to encode or decode the snapshot body. This usually means the blob was truncated.")
    )]
    Encoding { message: String },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read registry config: {path}")]
    #[diagnostic(
        code(refreg::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse registry config: {path}: {message}")]
    #[diagnostic(
        code(refreg::config::parse),
        help("Check the TOML syntax in the registry config file.")
    )]
    Parse { path: String, message: String },

    #[error("invalid registry config: {message}")]
    #[diagnostic(
        code(refreg::config::invalid),
        help("Fix the table declarations: {message}")
    )]
    Invalid { message: String },
}

/// Convenience alias for functions returning registry results.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_error_converts_to_registry_error() {
        let err = RefError::NotFound {
            reference: "recipe_9".into(),
        };
        let top: RegistryError = err.into();
        assert!(matches!(top, RegistryError::Ref(RefError::NotFound { .. })));
        assert!(!top.is_recoverable());
    }

    #[test]
    fn pending_resolution_is_recoverable() {
        let top: RegistryError = RefError::PendingResolution {
            reference: "gen_recipe_1".into(),
        }
        .into();
        assert!(top.is_recoverable());
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = SnapshotError::VersionMismatch {
            found: 7,
            expected: 1,
        };
        let msg = format!("{err}");
        assert!(msg.contains('7'));
        assert!(msg.contains('1'));

        let err = LifecycleError::IllegalTransition {
            reference: "recipe_1".into(),
            from: "deleted".into(),
            to: "read".into(),
        };
        assert!(format!("{err}").contains("deleted -> read"));
    }
}
