//! Typed entities built on an [`EntitySchema`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::collection::EntityCollection;
use crate::convert::{coerce_basic, format_datetime, parse_datetime};
use crate::schema::{BasicType, EntitySchema, Property, PropertyKind};
use crate::{Error, Result, Value};

/// A typed property value held by an [`Entity`].
///
/// Absence of a value is represented by the property being unset.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
    Entity(Box<Entity>),
    Collection(EntityCollection),
}

impl EntityValue {
    pub fn type_name(&self) -> String {
        match self {
            EntityValue::Bool(_) => "boolean".to_string(),
            EntityValue::Int(_) => "integer".to_string(),
            EntityValue::Float(_) => "float".to_string(),
            EntityValue::Text(_) => "string".to_string(),
            EntityValue::DateTime(_) => "datetime".to_string(),
            EntityValue::Entity(e) => e.name().to_string(),
            EntityValue::Collection(c) => format!("{}[]", c.entity()),
        }
    }

    /// Plain value for scalar variants; `None` for entities and collections.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            EntityValue::Bool(v) => Some(Value::Bool(*v)),
            EntityValue::Int(v) => Some(Value::BigInt(*v)),
            EntityValue::Float(v) => Some(Value::Double(*v)),
            EntityValue::Text(v) => Some(Value::Text(v.clone())),
            EntityValue::DateTime(v) => Some(Value::DateTime(*v)),
            EntityValue::Entity(_) | EntityValue::Collection(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            EntityValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EntityValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for EntityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityValue::Bool(v) => write!(f, "{}", v),
            EntityValue::Int(v) => write!(f, "{}", v),
            EntityValue::Float(v) => write!(f, "{}", v),
            EntityValue::Text(v) => f.write_str(v),
            EntityValue::DateTime(v) => f.write_str(&format_datetime(v)),
            EntityValue::Entity(e) => write!(f, "{}", e.name()),
            EntityValue::Collection(c) => write!(f, "{}[{}]", c.entity(), c.len()),
        }
    }
}

impl From<bool> for EntityValue {
    fn from(v: bool) -> Self {
        EntityValue::Bool(v)
    }
}

impl From<i32> for EntityValue {
    fn from(v: i32) -> Self {
        EntityValue::Int(i64::from(v))
    }
}

impl From<i64> for EntityValue {
    fn from(v: i64) -> Self {
        EntityValue::Int(v)
    }
}

impl From<f64> for EntityValue {
    fn from(v: f64) -> Self {
        EntityValue::Float(v)
    }
}

impl From<&str> for EntityValue {
    fn from(v: &str) -> Self {
        EntityValue::Text(v.to_string())
    }
}

impl From<String> for EntityValue {
    fn from(v: String) -> Self {
        EntityValue::Text(v)
    }
}

impl From<NaiveDateTime> for EntityValue {
    fn from(v: NaiveDateTime) -> Self {
        EntityValue::DateTime(v)
    }
}

impl From<Entity> for EntityValue {
    fn from(v: Entity) -> Self {
        EntityValue::Entity(Box::new(v))
    }
}

impl From<EntityCollection> for EntityValue {
    fn from(v: EntityCollection) -> Self {
        EntityValue::Collection(v)
    }
}

/// Pending association changes not yet written to storage.
///
/// Attach, detach and remove name existing targets by primary value and are
/// deduplicated; add queues a new target entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    entity: String,
    attached: Vec<Value>,
    detached: Vec<Value>,
    added: Vec<Entity>,
    removed: Vec<Value>,
}

impl Changes {
    /// Empty log for targets of type `entity`.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            ..Self::default()
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn attach(&mut self, primary: impl Into<Value>) -> Result<()> {
        push_primary(&mut self.attached, primary.into(), "attach")
    }

    pub fn detach(&mut self, primary: impl Into<Value>) -> Result<()> {
        push_primary(&mut self.detached, primary.into(), "detach")
    }

    pub fn remove(&mut self, primary: impl Into<Value>) -> Result<()> {
        push_primary(&mut self.removed, primary.into(), "remove")
    }

    pub fn add(&mut self, entity: Entity) -> Result<()> {
        if entity.name() != self.entity {
            return Err(Error::InvalidArgument(format!(
                "Expected entity {} but {} given",
                self.entity,
                entity.name()
            )));
        }
        self.added.push(entity);
        Ok(())
    }

    pub fn attached(&self) -> &[Value] {
        &self.attached
    }

    pub fn detached(&self) -> &[Value] {
        &self.detached
    }

    pub fn added(&self) -> &[Entity] {
        &self.added
    }

    pub fn removed(&self) -> &[Value] {
        &self.removed
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
            && self.detached.is_empty()
            && self.added.is_empty()
            && self.removed.is_empty()
    }

    /// Drain the log, leaving it empty.
    pub fn take(&mut self) -> Changes {
        let entity = self.entity.clone();
        std::mem::replace(self, Changes::new(entity))
    }
}

fn push_primary(list: &mut Vec<Value>, primary: Value, action: &str) -> Result<()> {
    if primary.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "Primary value is required to {} an entity",
            action
        )));
    }
    if !list.iter().any(|v| v.loosely_equals(&primary)) {
        list.push(primary);
    }
    Ok(())
}

/// A record of typed property values described by an [`EntitySchema`].
#[derive(Clone)]
pub struct Entity {
    schema: Arc<EntitySchema>,
    data: BTreeMap<String, EntityValue>,
    changes: BTreeMap<String, Changes>,
}

impl Entity {
    pub fn new(schema: Arc<EntitySchema>) -> Self {
        Self {
            schema,
            data: BTreeMap::new(),
            changes: BTreeMap::new(),
        }
    }

    /// Build from values, converting them to the declared types.
    ///
    /// Unknown and computed properties are skipped; read-only properties are
    /// accepted.
    pub fn from_values<K, V, I>(schema: Arc<EntitySchema>, values: I) -> Result<Self>
    where
        K: AsRef<str>,
        V: Into<EntityValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut entity = Self::new(schema);
        entity.assign(values, true)?;
        Ok(entity)
    }

    /// Merge values into this entity, skipping read-only properties.
    pub fn import<K, V, I>(&mut self, values: I) -> Result<()>
    where
        K: AsRef<str>,
        V: Into<EntityValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.assign(values, false)
    }

    fn assign<K, V, I>(&mut self, values: I, allow_read_only: bool) -> Result<()>
    where
        K: AsRef<str>,
        V: Into<EntityValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (name, value) in values {
            let Some(property) = self.schema.property_named(name.as_ref()) else {
                continue;
            };
            if property.is_computed() || (property.is_read_only() && !allow_read_only) {
                continue;
            }
            let value = convert_value(&self.schema, property, value.into())?;
            self.data.insert(property.name().to_string(), value);
        }
        Ok(())
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    /// Set a property; the value must already have the declared type.
    pub fn set(&mut self, name: &str, value: impl Into<EntityValue>) -> Result<()> {
        let property = self.writable(name)?;
        let value = value.into();
        check_type(&self.schema, property, &value)?;
        self.data.insert(name.to_string(), value);
        Ok(())
    }

    pub fn unset(&mut self, name: &str) -> Result<()> {
        self.writable(name)?;
        self.data.remove(name);
        Ok(())
    }

    fn writable(&self, name: &str) -> Result<&Property> {
        let property = self.schema.require_property(name)?;
        if property.is_computed() {
            return Err(Error::InvalidArgument(format!(
                "Computed property '{}' is read-only",
                name
            )));
        }
        if property.is_read_only() {
            return Err(Error::InvalidArgument(format!(
                "Property '{}' is read-only",
                name
            )));
        }
        Ok(property)
    }

    /// Value of a property, computing it when the property is computed.
    pub fn get(&self, name: &str) -> Result<Option<EntityValue>> {
        let property = self.schema.require_property(name)?;
        if let PropertyKind::Computed(compute) = property.kind() {
            return Ok(compute(self));
        }
        Ok(self.data.get(name).cloned())
    }

    /// Stored value, without computing.
    pub fn value(&self, name: &str) -> Option<&EntityValue> {
        self.data.get(name)
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.data.contains_key(name)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.data.get(name).and_then(EntityValue::as_i64)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(EntityValue::as_str)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.data.get(name) {
            Some(EntityValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.data.get(name) {
            Some(EntityValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_datetime(&self, name: &str) -> Option<NaiveDateTime> {
        match self.data.get(name) {
            Some(EntityValue::DateTime(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        match self.data.get(name) {
            Some(EntityValue::Entity(e)) => Some(e),
            _ => None,
        }
    }

    pub fn collection(&self, name: &str) -> Option<&EntityCollection> {
        match self.data.get(name) {
            Some(EntityValue::Collection(c)) => Some(c),
            _ => None,
        }
    }

    /// Primary value, if the schema declares a primary and it is set.
    pub fn primary_value(&self) -> Option<Value> {
        let primary = self.schema.primary()?;
        self.data.get(primary.name()).and_then(EntityValue::to_value)
    }

    /// Store a primary value produced by the adapter, bypassing read-only checks.
    pub fn assign_primary(&mut self, value: Value) -> Result<()> {
        let primary = self.schema.require_primary()?;
        if value.is_empty() {
            self.data.remove(primary.name());
            return Ok(());
        }
        let converted = match primary.kind() {
            PropertyKind::Basic(ty) => coerce_basic(*ty, &value),
            PropertyKind::DateTime => parse_datetime(&value).map(EntityValue::DateTime),
            _ => None,
        };
        let Some(converted) = converted else {
            return Err(Error::InvalidArgument(format!(
                "Can not use {} as primary value of entity {}",
                value.type_name(),
                self.schema.name()
            )));
        };
        let name = primary.name().to_string();
        self.data.insert(name, converted);
        Ok(())
    }

    /// Stored values in property-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EntityValue)> {
        self.data.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Pending changes of an association property, if any were recorded.
    pub fn changes(&self, name: &str) -> Option<&Changes> {
        match self.data.get(name) {
            Some(EntityValue::Collection(c)) if !self.changes.contains_key(name) => {
                Some(c.changes())
            }
            _ => self.changes.get(name),
        }
    }

    /// Change log of an association property.
    ///
    /// Collection associations use the log of the collection stored in the
    /// property, creating an empty collection when the property is unset.
    pub fn changes_mut(&mut self, name: &str) -> Result<&mut Changes> {
        let property = self.schema.require_property(name)?;
        let Some(association) = property.association() else {
            return Err(Error::InvalidArgument(format!(
                "Property '{}' on entity {} is not an association",
                name,
                self.schema.name()
            )));
        };
        let target = association.target.clone();
        if association.kind.is_many() {
            let value = self
                .data
                .entry(name.to_string())
                .or_insert_with(|| EntityValue::Collection(EntityCollection::new(target)));
            match value {
                EntityValue::Collection(c) => Ok(c.changes_mut()),
                other => Err(Error::InvalidArgument(format!(
                    "Property '{}' holds {} instead of a collection",
                    name,
                    other.type_name()
                ))),
            }
        } else {
            Ok(self
                .changes
                .entry(name.to_string())
                .or_insert_with(|| Changes::new(target)))
        }
    }

    /// Drain the change log of an association property.
    pub fn take_changes(&mut self, name: &str) -> Option<Changes> {
        if let Some(changes) = self.changes.get_mut(name) {
            return Some(changes.take());
        }
        match self.data.get_mut(name) {
            Some(EntityValue::Collection(c)) => Some(c.changes_mut().take()),
            _ => None,
        }
    }

    /// Insert a value that was already converted by the mapper.
    pub(crate) fn insert_mapped(&mut self, name: &str, value: EntityValue) {
        self.data.insert(name.to_string(), value);
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name() == other.schema.name() && self.data == other.data
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.schema.name());
        for (name, value) in &self.data {
            s.field(name, value);
        }
        s.finish()
    }
}

fn check_type(schema: &EntitySchema, property: &Property, value: &EntityValue) -> Result<()> {
    let ok = match (property.kind(), value) {
        (PropertyKind::Basic(BasicType::Boolean), EntityValue::Bool(_))
        | (PropertyKind::Basic(BasicType::Integer), EntityValue::Int(_))
        | (PropertyKind::Basic(BasicType::Float), EntityValue::Float(_))
        | (PropertyKind::Basic(BasicType::String), EntityValue::Text(_))
        | (PropertyKind::DateTime, EntityValue::DateTime(_)) => true,
        (PropertyKind::Entity(target), EntityValue::Entity(e)) => e.name() == target,
        (PropertyKind::Collection(target), EntityValue::Collection(c)) => c.entity() == target,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "Expected {} for property '{}' on entity {} but {} given",
            property.kind().type_name(),
            property.name(),
            schema.name(),
            value.type_name()
        )))
    }
}

fn convert_value(schema: &EntitySchema, property: &Property, value: EntityValue) -> Result<EntityValue> {
    if check_type(schema, property, &value).is_ok() {
        return Ok(value);
    }
    let converted = value.to_value().and_then(|raw| match property.kind() {
        PropertyKind::Basic(ty) => coerce_basic(*ty, &raw),
        PropertyKind::DateTime => parse_datetime(&raw).map(EntityValue::DateTime),
        _ => None,
    });
    match converted {
        Some(v) => Ok(v),
        None => check_type(schema, property, &value).map(|()| value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Property;

    fn person() -> Arc<EntitySchema> {
        Arc::new(
            EntitySchema::new("Person")
                .property(Property::integer("id").primary())
                .property(Property::string("first"))
                .property(Property::string("last"))
                .property(Property::integer("age"))
                .property(Property::string("code").read_only())
                .property(Property::many_to_one("team", "Team", "team_id"))
                .property(Property::one_to_many("pets", "Pet", "owner_id"))
                .property(Property::computed("full_name", |e| {
                    Some(EntityValue::Text(format!(
                        "{} {}",
                        e.get_str("first")?,
                        e.get_str("last")?
                    )))
                })),
        )
    }

    #[test]
    fn set_checks_types() {
        let mut p = Entity::new(person());
        p.set("age", 30).unwrap();
        assert_eq!(p.get_i64("age"), Some(30));

        let err = p.set("age", "thirty").unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(err.to_string().contains("Expected integer for property 'age'"));

        assert!(p.set("nope", 1).is_err());
    }

    #[test]
    fn computed_and_read_only_are_not_settable() {
        let mut p = Entity::new(person());
        let err = p.set("full_name", "x").unwrap_err();
        assert!(err.to_string().contains("Computed property"));
        assert!(p.set("code", "abc").is_err());
        assert!(p.unset("code").is_err());
    }

    #[test]
    fn computed_reads_from_data() {
        let p = Entity::from_values(person(), [("first", "Ada"), ("last", "Lovelace")]).unwrap();
        assert_eq!(
            p.get("full_name").unwrap(),
            Some(EntityValue::Text("Ada Lovelace".into()))
        );
        assert!(p.get("undefined").is_err());
    }

    #[test]
    fn from_values_converts_and_skips() {
        let p = Entity::from_values(
            person(),
            [
                ("age", EntityValue::Text("41".into())),
                ("code", EntityValue::Text("X1".into())),
                ("unknown", EntityValue::Int(1)),
                ("full_name", EntityValue::Text("ignored".into())),
            ],
        )
        .unwrap();
        assert_eq!(p.get_i64("age"), Some(41));
        assert_eq!(p.get_str("code"), Some("X1"));
        assert!(!p.is_set("full_name"));
        assert_eq!(p.iter().count(), 2);
    }

    #[test]
    fn import_skips_read_only() {
        let mut p = Entity::from_values(person(), [("code", "A")]).unwrap();
        p.import([("code", "B"), ("first", "Grace")]).unwrap();
        assert_eq!(p.get_str("code"), Some("A"));
        assert_eq!(p.get_str("first"), Some("Grace"));

        let err = p.import([("age", "old")]).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn primary_value() {
        let mut p = Entity::new(person());
        assert_eq!(p.primary_value(), None);
        p.set("id", 5).unwrap();
        assert_eq!(p.primary_value(), Some(Value::BigInt(5)));

        p.assign_primary(Value::Text("12".into())).unwrap();
        assert_eq!(p.get_i64("id"), Some(12));
        assert!(p.assign_primary(Value::Text("x".into())).is_err());
        p.assign_primary(Value::Null).unwrap();
        assert!(!p.is_set("id"));
    }

    #[test]
    fn association_change_logs() {
        let mut p = Entity::new(person());
        assert!(p.changes_mut("age").is_err());

        let team = p.changes_mut("team").unwrap();
        team.attach(3).unwrap();
        team.attach(3).unwrap();
        assert_eq!(team.attached(), &[Value::BigInt(3)]);
        assert!(team.detach(Value::Null).is_err());

        p.changes_mut("pets").unwrap().remove("7").unwrap();
        assert!(p.is_set("pets"));
        assert_eq!(p.changes("pets").unwrap().removed().len(), 1);

        let drained = p.take_changes("pets").unwrap();
        assert_eq!(drained.removed(), &[Value::Text("7".into())]);
        assert!(p.changes("pets").unwrap().is_empty());
    }

    #[test]
    fn added_entities_must_match_target() {
        let mut p = Entity::new(person());
        let other = Entity::new(person());
        let err = p.changes_mut("pets").unwrap().add(other).unwrap_err();
        assert!(err.to_string().contains("Expected entity Pet but Person given"));
    }
}
