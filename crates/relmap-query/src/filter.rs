//! Condition building shared by every filtering query.

use relmap_core::{Condition, EntitySchema, Error, Operator, Result, Value};

/// Queries that accept filter conditions on entity properties.
///
/// Conditions may only name stored columns: association and computed
/// properties are rejected when the condition is added.
pub trait Filterable: Sized {
    fn filter_schema(&self) -> &EntitySchema;

    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    /// Called for every property a new condition references.
    fn on_condition_property(&mut self, _name: &str) {}

    /// Add a prebuilt condition or group.
    fn filter(mut self, condition: Condition) -> Result<Self> {
        for name in condition.names() {
            check_condition_property(self.filter_schema(), name)?;
            self.on_condition_property(name);
        }
        self.conditions_mut().push(condition);
        Ok(self)
    }

    fn where_(self, name: &str, operator: Operator, value: impl Into<Value>) -> Result<Self> {
        self.filter(Condition::new(name, operator, value))
    }

    fn or_where(self, name: &str, operator: Operator, value: impl Into<Value>) -> Result<Self> {
        self.filter(Condition::new(name, operator, value).or())
    }

    fn where_group(self, conditions: Vec<Condition>) -> Result<Self> {
        self.filter(Condition::group(conditions))
    }

    fn or_where_group(self, conditions: Vec<Condition>) -> Result<Self> {
        self.filter(Condition::group(conditions).or())
    }
}

fn check_condition_property(schema: &EntitySchema, name: &str) -> Result<()> {
    let Some(property) = schema.property_named(name) else {
        return Err(Error::query_property(format!(
            "Property '{}' is not defined on entity {}",
            name,
            schema.name()
        )));
    };
    if property.is_association() {
        return Err(Error::query_property(format!(
            "Conditions on association '{}' are not allowed",
            name
        )));
    }
    if property.is_computed() {
        return Err(Error::query_property(format!(
            "Conditions on computed property '{}' are not allowed",
            name
        )));
    }
    Ok(())
}
