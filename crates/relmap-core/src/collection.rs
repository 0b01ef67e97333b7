//! Ordered collections of same-typed entities.

use std::ops::Index;

use crate::entity::{Changes, Entity};
use crate::{Error, Result, Value};

/// Ordered, index-addressable entities of one type, with a log of pending
/// membership changes.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCollection {
    entity: String,
    entities: Vec<Entity>,
    changes: Changes,
}

impl EntityCollection {
    pub fn new(entity: impl Into<String>) -> Self {
        let entity = entity.into();
        Self {
            changes: Changes::new(entity.clone()),
            entity,
            entities: Vec::new(),
        }
    }

    pub fn from_entities(entity: impl Into<String>, entities: Vec<Entity>) -> Result<Self> {
        let mut collection = Self::new(entity);
        for e in entities {
            collection.push(e)?;
        }
        Ok(collection)
    }

    /// Name of the entity type held.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    fn check(&self, entity: &Entity) -> Result<()> {
        if entity.name() == self.entity {
            Ok(())
        } else {
            Err(Error::InvalidArgument(format!(
                "Expected entity {} but {} given",
                self.entity,
                entity.name()
            )))
        }
    }

    pub fn push(&mut self, entity: Entity) -> Result<()> {
        self.check(&entity)?;
        self.entities.push(entity);
        Ok(())
    }

    /// Replace the entity at `index`, or append when `index == len()`.
    pub fn set(&mut self, index: usize, entity: Entity) -> Result<()> {
        self.check(&entity)?;
        match index.cmp(&self.entities.len()) {
            std::cmp::Ordering::Less => {
                self.entities[index] = entity;
                Ok(())
            }
            std::cmp::Ordering::Equal => {
                self.entities.push(entity);
                Ok(())
            }
            std::cmp::Ordering::Greater => Err(Error::InvalidArgument(format!(
                "Index {} out of bounds for collection of {}",
                index,
                self.entities.len()
            ))),
        }
    }

    pub fn remove_at(&mut self, index: usize) -> Option<Entity> {
        (index < self.entities.len()).then(|| self.entities.remove(index))
    }

    pub fn get(&self, index: usize) -> Option<&Entity> {
        self.entities.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Entity> {
        self.entities.get_mut(index)
    }

    /// First entity whose primary value equals `primary`.
    pub fn get_by_primary(&self, primary: &Value) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| e.primary_value().is_some_and(|v| v.loosely_equals(primary)))
    }

    /// Primary values of all entities that have one.
    pub fn primaries(&self) -> Vec<Value> {
        self.entities.iter().filter_map(Entity::primary_value).collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entity> {
        self.entities.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Entity> {
        self.entities.iter_mut()
    }

    pub fn into_vec(self) -> Vec<Entity> {
        self.entities
    }

    pub fn changes(&self) -> &Changes {
        &self.changes
    }

    pub fn changes_mut(&mut self) -> &mut Changes {
        &mut self.changes
    }

    pub fn attach(&mut self, primary: impl Into<Value>) -> Result<()> {
        self.changes.attach(primary)
    }

    pub fn detach(&mut self, primary: impl Into<Value>) -> Result<()> {
        self.changes.detach(primary)
    }

    pub fn add(&mut self, entity: Entity) -> Result<()> {
        self.changes.add(entity)
    }

    pub fn remove(&mut self, primary: impl Into<Value>) -> Result<()> {
        self.changes.remove(primary)
    }
}

impl Index<usize> for EntityCollection {
    type Output = Entity;

    fn index(&self, index: usize) -> &Entity {
        &self.entities[index]
    }
}

impl IntoIterator for EntityCollection {
    type Item = Entity;
    type IntoIter = std::vec::IntoIter<Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.into_iter()
    }
}

impl<'a> IntoIterator for &'a EntityCollection {
    type Item = &'a Entity;
    type IntoIter = std::slice::Iter<'a, Entity>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntitySchema, Property};
    use std::sync::Arc;

    fn schema(name: &str) -> Arc<EntitySchema> {
        Arc::new(
            EntitySchema::new(name)
                .property(Property::integer("id").primary())
                .property(Property::string("name")),
        )
    }

    fn power(id: i64) -> Entity {
        Entity::from_values(schema("Power"), [("id", id)]).unwrap()
    }

    #[test]
    fn rejects_other_types() {
        let mut powers = EntityCollection::new("Power");
        powers.push(power(1)).unwrap();
        let hero = Entity::new(schema("Hero"));
        assert!(powers.push(hero.clone()).is_err());
        assert!(powers.set(0, hero).is_err());
        assert_eq!(powers.len(), 1);
    }

    #[test]
    fn index_addressing() {
        let mut powers = EntityCollection::from_entities("Power", vec![power(1), power(2)]).unwrap();
        powers.set(2, power(3)).unwrap();
        powers.set(0, power(10)).unwrap();
        assert!(powers.set(9, power(4)).is_err());
        assert_eq!(powers[0].get_i64("id"), Some(10));
        assert_eq!(powers.remove_at(1).and_then(|e| e.get_i64("id")), Some(2));
        assert!(powers.remove_at(5).is_none());
        assert_eq!(
            powers.iter().filter_map(|e| e.get_i64("id")).collect::<Vec<_>>(),
            vec![10, 3]
        );
    }

    #[test]
    fn lookup_by_primary() {
        let powers = EntityCollection::from_entities("Power", vec![power(1), power(2)]).unwrap();
        assert!(powers.get_by_primary(&Value::BigInt(2)).is_some());
        assert!(powers.get_by_primary(&Value::Text("1".into())).is_some());
        assert!(powers.get_by_primary(&Value::BigInt(3)).is_none());
        assert_eq!(powers.primaries(), vec![Value::BigInt(1), Value::BigInt(2)]);
    }

    #[test]
    fn change_log_is_separate_from_members() {
        let mut powers = EntityCollection::new("Power");
        powers.attach(1).unwrap();
        powers.detach(2).unwrap();
        powers.add(power(3)).unwrap();
        powers.remove(4).unwrap();
        powers.remove(4).unwrap();
        assert!(powers.is_empty());
        assert_eq!(powers.changes().attached(), &[Value::BigInt(1)]);
        assert_eq!(powers.changes().removed().len(), 1);
        assert_eq!(powers.changes().added().len(), 1);
        assert!(powers.add(Entity::new(schema("Hero"))).is_err());
    }
}
