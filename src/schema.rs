//! Registry configuration: recency window, placeholder labels and table schema.
//!
//! The schema tells the translation layer which column of each table holds the
//! primary key, which holds the human-readable label, and which columns are
//! foreign keys into other tracked tables. Configuration is loaded from TOML:
//!
//! ```toml
//! window_turns = 2
//!
//! [tables.recipes]
//! entity_type = "recipe"
//!
//! [tables.meal_plans]
//! entity_type = "meal"
//! foreign_keys = { recipe_id = "recipes" }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, SchemaError};
use crate::reference::EntityType;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Schema of one tracked table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Entity type rows of this table are referenced as.
    pub entity_type: EntityType,
    /// Primary key column.
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// Column holding the human-readable label.
    #[serde(default = "default_label_column")]
    pub label_column: String,
    /// Foreign-key column → target table.
    #[serde(default)]
    pub foreign_keys: BTreeMap<String, String>,
}

fn default_id_column() -> String {
    "id".into()
}
fn default_label_column() -> String {
    "name".into()
}

impl TableSchema {
    /// A table with the default `id` / `name` columns and no foreign keys.
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            id_column: default_id_column(),
            label_column: default_label_column(),
            foreign_keys: BTreeMap::new(),
        }
    }

    pub fn with_foreign_key(mut self, column: impl Into<String>, target: impl Into<String>) -> Self {
        self.foreign_keys.insert(column.into(), target.into());
        self
    }

    /// Whether `column` holds identifiers (the primary key or a foreign key).
    pub fn is_identifier_column(&self, column: &str) -> bool {
        column == self.id_column || self.foreign_keys.contains_key(column)
    }
}

/// Full registry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Default recency window, in turns, for the active view.
    #[serde(default = "default_window_turns")]
    pub window_turns: u64,
    /// Label given to lazily linked entities until enrichment fills it in.
    #[serde(default = "default_placeholder_label")]
    pub placeholder_label: String,
    /// Enrichment passes an unresolved foreign key survives before it is dropped.
    #[serde(default = "default_max_enrich_attempts")]
    pub max_enrich_attempts: u32,
    /// Tracked tables by name.
    #[serde(default)]
    pub tables: BTreeMap<String, TableSchema>,
}

fn default_window_turns() -> u64 {
    2
}
fn default_placeholder_label() -> String {
    "(unresolved)".into()
}
fn default_max_enrich_attempts() -> u32 {
    3
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            window_turns: default_window_turns(),
            placeholder_label: default_placeholder_label(),
            max_enrich_attempts: default_max_enrich_attempts(),
            tables: BTreeMap::new(),
        }
    }
}

impl RegistryConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content, &path.display().to_string())
    }

    /// Parse and validate TOML text. `origin` names the source in errors.
    pub fn from_toml(content: &str, origin: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> ConfigResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid {
            message: format!("failed to serialize config: {e}"),
        })
    }

    /// Add a table declaration.
    pub fn with_table(mut self, name: impl Into<String>, schema: TableSchema) -> Self {
        self.tables.insert(name.into(), schema);
        self
    }

    /// Check cross-table consistency.
    ///
    /// Each entity type belongs to exactly one table, and every foreign key
    /// targets a declared table.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen_types = HashSet::new();
        for (name, table) in &self.tables {
            if !seen_types.insert(&table.entity_type) {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "entity type \"{}\" is declared by more than one table (again in \"{name}\")",
                        table.entity_type
                    ),
                });
            }
            if table.id_column == table.label_column {
                return Err(ConfigError::Invalid {
                    message: format!("table \"{name}\" uses \"{}\" as both id and label", table.id_column),
                });
            }
            for (column, target) in &table.foreign_keys {
                if !self.tables.contains_key(target) {
                    return Err(ConfigError::Invalid {
                        message: format!(
                            "foreign key \"{name}.{column}\" targets undeclared table \"{target}\""
                        ),
                    });
                }
                if *column == table.id_column {
                    return Err(ConfigError::Invalid {
                        message: format!("\"{name}.{column}\" cannot be both primary and foreign key"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Schema of a tracked table.
    pub fn table(&self, name: &str) -> Result<&TableSchema, SchemaError> {
        self.tables.get(name).ok_or_else(|| SchemaError::UnknownTable {
            table: name.to_string(),
        })
    }

    /// The table whose rows are referenced as `entity_type`.
    pub fn table_for_type(&self, entity_type: &EntityType) -> Option<(&str, &TableSchema)> {
        self.tables
            .iter()
            .find(|(_, t)| &t.entity_type == entity_type)
            .map(|(name, t)| (name.as_str(), t))
    }
}
