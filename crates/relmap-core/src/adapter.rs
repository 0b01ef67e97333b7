//! Storage adapter contract.

use std::sync::Arc;

use crate::clause::{Condition, OrderBy};
use crate::schema::{AssociationInfo, EntitySchema, Property};
use crate::{Record, Result, Value};

/// Arguments of [`Adapter::find`], already unmapped to column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindRequest {
    pub resource: String,
    /// Columns to return; empty returns every column.
    pub selection: Vec<String>,
    pub conditions: Vec<Condition>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Associations the adapter must embed in each row under
    /// [`AssociationInfo::column`].
    pub associations: Vec<AssociationInfo>,
}

impl FindRequest {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ..Self::default()
        }
    }

    pub fn select(mut self, columns: Vec<String>) -> Self {
        self.selection = columns;
        self
    }

    pub fn filter(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }
}

/// Column and value identifying one row.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryKey {
    pub column: String,
    pub value: Value,
}

impl PrimaryKey {
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// A backend executing CRUD primitives against named resources.
///
/// Adapters are shared between queries and hold no per-call state.
/// Implementations must be `Send + Sync` so they can live behind an `Arc`.
pub trait Adapter: Send + Sync {
    /// Name entities use to bind to this adapter.
    fn name(&self) -> &str;

    /// Value and name translation for this backend.
    fn mapping(&self) -> Arc<dyn Mapping> {
        Arc::new(DefaultMapping)
    }

    /// Fetch rows, embedding the requested local associations.
    fn find(&self, request: &FindRequest) -> Result<Vec<Record>>;

    fn count(&self, resource: &str, conditions: &[Condition]) -> Result<u64>;

    /// Insert a row and return its primary value.
    fn insert(&self, resource: &str, values: Record) -> Result<Value>;

    /// Update every row matching `conditions`; returns the number of rows changed.
    fn update(&self, resource: &str, values: Record, conditions: &[Condition]) -> Result<u64>;

    /// Update one row; `false` if it does not exist.
    fn update_one(&self, resource: &str, primary: &PrimaryKey, values: Record) -> Result<bool>;

    /// Delete every row matching `conditions`; returns the number of rows removed.
    fn delete(&self, resource: &str, conditions: &[Condition]) -> Result<u64>;

    /// Delete one row; `false` if it does not exist.
    fn delete_one(&self, resource: &str, primary: &PrimaryKey) -> Result<bool>;
}

/// Backend-specific translation between entity and adapter representation.
///
/// Every method has a pass-through default; adapters override the parts
/// their storage format needs.
pub trait Mapping: Send + Sync {
    /// Adapter value to entity value, before type coercion.
    fn map_value(&self, _property: &Property, value: Value) -> Result<Value> {
        Ok(value)
    }

    /// Entity value to adapter value.
    fn unmap_value(&self, _property: &Property, value: Value) -> Result<Value> {
        Ok(value)
    }

    /// Property names to column names.
    fn unmap_selection(&self, schema: &EntitySchema, selection: &[String]) -> Result<Vec<String>> {
        selection
            .iter()
            .map(|name| Ok(schema.require_property(name)?.mapped_name().to_string()))
            .collect()
    }

    /// Rewrite condition names to columns and unmap their values.
    fn unmap_conditions(
        &self,
        schema: &EntitySchema,
        conditions: &[Condition],
    ) -> Result<Vec<Condition>> {
        conditions
            .iter()
            .map(|condition| match condition {
                Condition::Compare {
                    name,
                    operator,
                    value,
                    joiner,
                } => {
                    let property = schema.require_property(name)?;
                    let value = match value {
                        Value::Array(items) => Value::Array(
                            items
                                .iter()
                                .map(|v| self.unmap_value(property, v.clone()))
                                .collect::<Result<_>>()?,
                        ),
                        Value::Null => Value::Null,
                        other => self.unmap_value(property, other.clone())?,
                    };
                    Ok(Condition::Compare {
                        name: property.mapped_name().to_string(),
                        operator: *operator,
                        value,
                        joiner: *joiner,
                    })
                }
                Condition::Group { conditions, joiner } => Ok(Condition::Group {
                    conditions: self.unmap_conditions(schema, conditions)?,
                    joiner: *joiner,
                }),
            })
            .collect()
    }

    fn unmap_order_by(&self, schema: &EntitySchema, order_by: &[OrderBy]) -> Result<Vec<OrderBy>> {
        order_by
            .iter()
            .map(|o| {
                Ok(OrderBy {
                    name: schema.require_property(&o.name)?.mapped_name().to_string(),
                    direction: o.direction,
                })
            })
            .collect()
    }
}

/// Mapping that only translates names.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMapping;

impl Mapping for DefaultMapping {}
