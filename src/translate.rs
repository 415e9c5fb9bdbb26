//! Translation at the Database collaborator boundary.
//!
//! Ingress (`translate_read`, `translate_write_output`) replaces storage ids in
//! returned rows with references, registering new entities and lazily linking
//! unseen foreign keys. Egress (`translate_write_input`, `translate_filters`)
//! replaces references with storage ids before a query or mutation runs.
//!
//! Ingress is two-phase: every row of a batch is validated before any row is
//! registered, so a rejected batch leaves the registry untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RegistryResult, SchemaError};
use crate::record::Action;
use crate::reference::{EntityRef, EntityType, StorageId};
use crate::registry::RefRegistry;
use crate::schema::TableSchema;

/// A row as exchanged with the Database collaborator.
pub type Row = serde_json::Map<String, Value>;

/// Kind of mutation whose output is being translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOp {
    Insert,
    Update,
    Delete,
}

impl WriteOp {
    /// Action recorded for entities returned by this operation.
    pub fn action(self) -> Action {
        match self {
            WriteOp::Insert => Action::Created,
            WriteOp::Update => Action::Updated,
            WriteOp::Delete => Action::Deleted,
        }
    }
}

struct Link {
    column: String,
    storage_id: StorageId,
    target_table: String,
}

struct RowPlan {
    storage_id: StorageId,
    label: Option<String>,
    links: Vec<Link>,
}

/// Storage id carried by a JSON value: non-empty strings and integers.
fn storage_id_of(value: &Value) -> Option<StorageId> {
    match value {
        Value::String(s) if !s.is_empty() => Some(StorageId::new(s.clone())),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(StorageId::new(n.to_string())),
        _ => None,
    }
}

fn label_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl RefRegistry {
    /// Replace storage ids in read results with references.
    ///
    /// Rows are registered with action `read`; a `linked` entity read directly
    /// keeps its reference and becomes `read`. Unseen foreign keys are linked
    /// and queued for enrichment. Existing records are not touched: recency is
    /// the planner's call.
    pub fn translate_read(&mut self, rows: Vec<Row>, table: &str) -> RegistryResult<Vec<Row>> {
        self.ingest(rows, table, Action::Read)
    }

    /// Replace storage ids in rows returned by a mutation with references.
    ///
    /// Inserted rows whose storage id is new first try to promote a pending
    /// artifact of the same type with the same label (see
    /// [`RefRegistry::promote_matching`]).
    pub fn translate_write_output(
        &mut self,
        rows: Vec<Row>,
        table: &str,
        op: WriteOp,
    ) -> RegistryResult<Vec<Row>> {
        self.ingest(rows, table, op.action())
    }

    /// Replace references in a mutation payload with storage ids.
    ///
    /// Only the table's id column and declared foreign-key columns are
    /// translated, and only values that parse as references. Pending
    /// references fail with
    /// [`PendingResolution`](crate::error::RefError::PendingResolution).
    pub fn translate_write_input(&self, payload: Row, table: &str) -> RegistryResult<Row> {
        let schema = self.config.table(table)?;
        let mut out = Row::new();
        for (column, value) in payload {
            let translated = if schema.is_identifier_column(&column) {
                let expected = match schema.foreign_keys.get(&column) {
                    Some(target) => &self.config.table(target)?.entity_type,
                    None => &schema.entity_type,
                };
                self.egress_column(value, table, &column, expected)?
            } else {
                value
            };
            out.insert(column, translated);
        }
        Ok(out)
    }

    /// Replace every reference-shaped value in a filter map with its storage
    /// id, descending into arrays and nested objects.
    pub fn translate_filters(&self, filters: Row) -> RegistryResult<Row> {
        let mut out = Row::new();
        for (key, value) in filters {
            out.insert(key, self.egress_any(value)?);
        }
        Ok(out)
    }

    fn egress_column(
        &self,
        value: Value,
        table: &str,
        column: &str,
        expected: &EntityType,
    ) -> RegistryResult<Value> {
        match value {
            Value::String(s) => match EntityRef::parse(&s) {
                Ok(r) => {
                    if r.entity_type() != expected {
                        return Err(SchemaError::WrongEntityType {
                            table: table.to_string(),
                            column: column.to_string(),
                            reference: r.to_string(),
                            expected: expected.to_string(),
                        }
                        .into());
                    }
                    Ok(Value::String(self.resolve_ref(&r)?.to_string()))
                }
                Err(_) => Ok(Value::String(s)),
            },
            Value::Array(items) => items
                .into_iter()
                .map(|v| self.egress_column(v, table, column, expected))
                .collect::<RegistryResult<Vec<_>>>()
                .map(Value::Array),
            other => Ok(other),
        }
    }

    fn egress_any(&self, value: Value) -> RegistryResult<Value> {
        match value {
            Value::String(s) => match EntityRef::parse(&s) {
                Ok(r) => Ok(Value::String(self.resolve_ref(&r)?.to_string())),
                Err(_) => Ok(Value::String(s)),
            },
            Value::Array(items) => items
                .into_iter()
                .map(|v| self.egress_any(v))
                .collect::<RegistryResult<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => self.translate_filters(map).map(Value::Object),
            other => Ok(other),
        }
    }

    fn ingest(&mut self, rows: Vec<Row>, table: &str, action: Action) -> RegistryResult<Vec<Row>> {
        let schema = self.config.table(table)?.clone();
        let plans = self.plan_ingest(&rows, table, &schema)?;

        let mut out = Vec::with_capacity(rows.len());
        for (mut row, plan) in rows.into_iter().zip(plans) {
            let known = self.is_known(&schema.entity_type, &plan.storage_id);
            let unlabeled = plan.label.is_none();
            let entity_ref = match (action, plan.label) {
                (Action::Created, Some(label)) => {
                    self.promote_matching(plan.storage_id.clone(), &schema.entity_type, &label)?
                }
                // No label column: an existing record keeps its label.
                (_, label) => self.register(
                    plan.storage_id.clone(),
                    &schema.entity_type,
                    label.unwrap_or_default(),
                    action,
                )?,
            };
            if unlabeled && !known {
                self.queue_enrichment(entity_ref.clone(), plan.storage_id, table)?;
            }
            row.insert(schema.id_column.clone(), Value::String(entity_ref.to_string()));

            for link in plan.links {
                let linked = self.link_foreign_key(link.storage_id, &link.target_table)?;
                row.insert(link.column, Value::String(linked.to_string()));
            }
            out.push(row);
        }
        Ok(out)
    }

    /// Validate a batch and extract what each row will register.
    fn plan_ingest(
        &self,
        rows: &[Row],
        table: &str,
        schema: &TableSchema,
    ) -> RegistryResult<Vec<RowPlan>> {
        let mut plans = Vec::with_capacity(rows.len());

        for (index, row) in rows.iter().enumerate() {
            let storage_id = match row.get(&schema.id_column) {
                None | Some(Value::Null) => {
                    return Err(SchemaError::MissingColumn {
                        table: table.to_string(),
                        column: schema.id_column.clone(),
                        row: index,
                    }
                    .into());
                }
                Some(value) => storage_id_of(value).ok_or_else(|| SchemaError::InvalidValue {
                    table: table.to_string(),
                    column: schema.id_column.clone(),
                })?,
            };

            let mut links = Vec::new();
            for (column, target_table) in &schema.foreign_keys {
                let value = match row.get(column) {
                    None | Some(Value::Null) => continue,
                    Some(value) => value,
                };
                let fk = storage_id_of(value).ok_or_else(|| SchemaError::InvalidValue {
                    table: table.to_string(),
                    column: column.clone(),
                })?;
                self.config.table(target_table)?;
                links.push(Link {
                    column: column.clone(),
                    storage_id: fk,
                    target_table: target_table.clone(),
                });
            }

            plans.push(RowPlan {
                storage_id,
                label: row.get(&schema.label_column).and_then(label_of),
                links,
            });
        }
        Ok(plans)
    }
}
