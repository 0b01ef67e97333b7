//! Write queries: [`Insert`], [`Update`], [`UpdateOne`], [`Delete`] and [`DeleteOne`].

use std::sync::Arc;

use relmap_core::{
    Condition, Entity, EntitySchema, Error, PrimaryKey, QueryErrorKind, Record, Result, Value,
};

use crate::connection::{Connection, Query};
use crate::filter::Filterable;

fn check_entity(schema: &EntitySchema, entity: &Entity) -> Result<()> {
    if entity.name() == schema.name() {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "Expected entity {}, got {}",
            schema.name(),
            entity.name()
        )))
    }
}

/// Adapter row for `entity` without its primary column.
fn values_without_primary(connection: &Connection, entity: &Entity) -> Result<Record> {
    let mut values = connection.mapper().unmap_entity(entity)?;
    if let Some(primary) = entity.schema().primary() {
        values.remove(primary.mapped_name());
    }
    Ok(values)
}

/// Primary column and adapter value identifying one row of `schema`.
fn primary_key(connection: &Connection, schema: &EntitySchema, adapter: &str, value: Value) -> Result<PrimaryKey> {
    let property = schema.require_primary()?;
    let value = connection.mapping(adapter).unmap_value(property, value)?;
    Ok(PrimaryKey::new(property.mapped_name(), value))
}

/// Store a new entity and return its primary value.
///
/// An empty primary value is left out so the adapter can generate one.
#[derive(Debug)]
pub struct Insert<'c> {
    connection: &'c Connection,
    entity: &'c Entity,
}

impl<'c> Insert<'c> {
    pub fn new(connection: &'c Connection, schema: &EntitySchema, entity: &'c Entity) -> Result<Self> {
        check_entity(schema, entity)?;
        Ok(Self { connection, entity })
    }
}

impl Query for Insert<'_> {
    type Output = Value;

    fn name(&self) -> &'static str {
        "insert"
    }

    fn schema(&self) -> &Arc<EntitySchema> {
        self.entity.schema()
    }

    fn connection(&self) -> &Connection {
        self.connection
    }

    fn execute(&self) -> Result<Value> {
        let schema = self.entity.schema();
        let (adapter, resource) = self.connection.entity_adapter(schema)?;
        let mut values = self.connection.mapper().unmap_entity(self.entity)?;
        if let Some(primary) = schema.primary() {
            if values.get(primary.mapped_name()).is_none_or(Value::is_empty) {
                values.remove(primary.mapped_name());
            }
        }
        let primary = adapter.insert(&resource, values)?;
        tracing::debug!(entity = %schema.name(), primary = ?primary, "Inserted");
        Ok(primary)
    }
}

/// Write the entity's values to every row matching the conditions.
///
/// Without conditions every row of the resource is updated.
#[derive(Debug)]
pub struct Update<'c> {
    connection: &'c Connection,
    schema: Arc<EntitySchema>,
    entity: &'c Entity,
    conditions: Vec<Condition>,
}

impl<'c> Update<'c> {
    pub fn new(connection: &'c Connection, schema: Arc<EntitySchema>, entity: &'c Entity) -> Result<Self> {
        check_entity(&schema, entity)?;
        Ok(Self {
            connection,
            schema,
            entity,
            conditions: Vec::new(),
        })
    }
}

impl Filterable for Update<'_> {
    fn filter_schema(&self) -> &EntitySchema {
        &self.schema
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl Query for Update<'_> {
    type Output = u64;

    fn name(&self) -> &'static str {
        "update"
    }

    fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    fn connection(&self) -> &Connection {
        self.connection
    }

    fn execute(&self) -> Result<u64> {
        let (adapter, resource) = self.connection.entity_adapter(&self.schema)?;
        let values = values_without_primary(self.connection, self.entity)?;
        let conditions = self
            .connection
            .mapping(adapter.name())
            .unmap_conditions(&self.schema, &self.conditions)?;
        adapter.update(&resource, values, &conditions)
    }
}

/// Write the entity's values to the row with the given primary value.
#[derive(Debug)]
pub struct UpdateOne<'c> {
    connection: &'c Connection,
    schema: Arc<EntitySchema>,
    primary: Value,
    entity: &'c Entity,
}

impl<'c> UpdateOne<'c> {
    pub fn new(
        connection: &'c Connection,
        schema: Arc<EntitySchema>,
        primary: Value,
        entity: &'c Entity,
    ) -> Result<Self> {
        check_entity(&schema, entity)?;
        if primary.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "Primary value of {} is required",
                schema.name()
            )));
        }
        Ok(Self {
            connection,
            schema,
            primary,
            entity,
        })
    }
}

impl Query for UpdateOne<'_> {
    type Output = bool;

    fn name(&self) -> &'static str {
        "update_one"
    }

    fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    fn connection(&self) -> &Connection {
        self.connection
    }

    fn execute(&self) -> Result<bool> {
        let (adapter, resource) = self.connection.entity_adapter(&self.schema)?;
        let primary = primary_key(self.connection, &self.schema, adapter.name(), self.primary.clone())?;
        let values = values_without_primary(self.connection, self.entity)?;
        adapter.update_one(&resource, &primary, values)
    }
}

/// Remove every row matching the conditions. At least one condition is required.
#[derive(Debug)]
pub struct Delete<'c> {
    connection: &'c Connection,
    schema: Arc<EntitySchema>,
    conditions: Vec<Condition>,
}

impl<'c> Delete<'c> {
    pub fn new(connection: &'c Connection, schema: Arc<EntitySchema>) -> Self {
        Self {
            connection,
            schema,
            conditions: Vec::new(),
        }
    }
}

impl Filterable for Delete<'_> {
    fn filter_schema(&self) -> &EntitySchema {
        &self.schema
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl Query for Delete<'_> {
    type Output = u64;

    fn name(&self) -> &'static str {
        "delete"
    }

    fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    fn connection(&self) -> &Connection {
        self.connection
    }

    fn execute(&self) -> Result<u64> {
        if self.conditions.is_empty() {
            return Err(Error::query(
                QueryErrorKind::Precondition,
                format!("Delete on {} requires at least one condition", self.schema.name()),
            ));
        }
        let (adapter, resource) = self.connection.entity_adapter(&self.schema)?;
        let conditions = self
            .connection
            .mapping(adapter.name())
            .unmap_conditions(&self.schema, &self.conditions)?;
        adapter.delete(&resource, &conditions)
    }
}

/// Remove the row with the given primary value.
#[derive(Debug)]
pub struct DeleteOne<'c> {
    connection: &'c Connection,
    schema: Arc<EntitySchema>,
    primary: Value,
}

impl<'c> DeleteOne<'c> {
    pub fn new(connection: &'c Connection, schema: Arc<EntitySchema>, primary: Value) -> Result<Self> {
        if primary.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "Primary value of {} is required",
                schema.name()
            )));
        }
        Ok(Self {
            connection,
            schema,
            primary,
        })
    }
}

impl Query for DeleteOne<'_> {
    type Output = bool;

    fn name(&self) -> &'static str {
        "delete_one"
    }

    fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    fn connection(&self) -> &Connection {
        self.connection
    }

    fn execute(&self) -> Result<bool> {
        let (adapter, resource) = self.connection.entity_adapter(&self.schema)?;
        let primary = primary_key(self.connection, &self.schema, adapter.name(), self.primary.clone())?;
        adapter.delete_one(&resource, &primary)
    }
}
