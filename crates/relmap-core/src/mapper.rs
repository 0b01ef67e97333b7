//! Conversion between adapter rows and typed entities.

use std::collections::HashMap;
use std::sync::Arc;

use crate::adapter::Mapping;
use crate::collection::EntityCollection;
use crate::convert::{coerce_basic, parse_datetime};
use crate::entity::{Entity, EntityValue};
use crate::error::MappingError;
use crate::schema::{EntitySchema, Property, PropertyKind, SchemaRegistry};
use crate::{Error, Record, Result, Value};

/// Maps adapter rows to entities and back.
///
/// Adapter mappings are looked up by the adapter name an entity is bound to;
/// entities bound to an adapter without a registered mapping use values as is.
pub struct Mapper {
    registry: Arc<SchemaRegistry>,
    mappings: HashMap<String, Arc<dyn Mapping>>,
}

impl std::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper")
            .field("mappings", &self.mappings.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Mapper {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self {
            registry,
            mappings: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn register_adapter_mapping(
        &mut self,
        adapter: impl Into<String>,
        mapping: Arc<dyn Mapping>,
    ) -> Result<()> {
        let adapter = adapter.into();
        if self.mappings.contains_key(&adapter) {
            return Err(Error::InvalidArgument(format!(
                "Mapping for adapter '{}' already registered",
                adapter
            )));
        }
        tracing::debug!(adapter = %adapter, "Registered adapter mapping");
        self.mappings.insert(adapter, mapping);
        Ok(())
    }

    /// Mapping registered for `adapter`.
    pub fn mapping(&self, adapter: &str) -> Option<&Arc<dyn Mapping>> {
        self.mappings.get(adapter)
    }

    /// Mapping of the adapter `schema` is bound to.
    fn adapter_mapping(&self, schema: &EntitySchema) -> Result<Option<&dyn Mapping>> {
        let Some(adapter) = schema.adapter_name() else {
            return Err(MappingError::new("Adapter required for mapping")
                .entity(schema.name())
                .into());
        };
        Ok(self.mappings.get(adapter).map(|m| m.as_ref()))
    }

    /// Convert one adapter value to the property's type.
    ///
    /// Null and the empty string yield `None` whatever the declared type.
    pub fn map_value(
        &self,
        schema: &EntitySchema,
        property: &Property,
        value: Value,
    ) -> Result<Option<EntityValue>> {
        let fail = |message: String| -> Error {
            MappingError::new(message)
                .entity(schema.name())
                .property(property.name())
                .into()
        };

        let mut value = value;
        if let Some(mapping) = self.adapter_mapping(schema)? {
            value = mapping.map_value(property, value)?;
        }
        if let Some(filter) = property.map_filter() {
            value = (filter.map)(value);
        }
        if value.is_empty() {
            return Ok(None);
        }

        match property.kind() {
            PropertyKind::Basic(ty) => coerce_basic(*ty, &value).map(Some).ok_or_else(|| {
                fail(format!(
                    "Can not convert {} to {}",
                    value.type_name(),
                    ty.name()
                ))
            }),
            PropertyKind::DateTime => parse_datetime(&value)
                .map(|dt| Some(EntityValue::DateTime(dt)))
                .ok_or_else(|| fail(format!("Can not convert {:?} to datetime", value))),
            PropertyKind::Entity(target) => match value {
                Value::Record(row) => {
                    let target = self.registry.require(target)?;
                    Ok(Some(EntityValue::Entity(Box::new(
                        self.map_entity(&target, &row)?,
                    ))))
                }
                other => Err(fail(format!(
                    "Expected record for entity {} but {} given",
                    target,
                    other.type_name()
                ))),
            },
            PropertyKind::Collection(target) => match value {
                Value::Array(items) => {
                    let target = self.registry.require(target)?;
                    let mut rows = Vec::with_capacity(items.len());
                    for item in items {
                        match item {
                            Value::Record(row) => rows.push(row),
                            other => {
                                return Err(fail(format!(
                                    "Expected record in collection of {} but {} given",
                                    target.name(),
                                    other.type_name()
                                )));
                            }
                        }
                    }
                    Ok(Some(EntityValue::Collection(
                        self.map_collection(&target, &rows)?,
                    )))
                }
                other => Err(fail(format!(
                    "Expected array for collection of {} but {} given",
                    target,
                    other.type_name()
                ))),
            },
            PropertyKind::Computed(_) => Err(fail("Computed properties can not be mapped".into())),
        }
    }

    /// Build an entity from an adapter row.
    ///
    /// Columns are matched to properties by mapped name first, then by
    /// property name; unmatched columns and computed properties are skipped.
    pub fn map_entity(&self, schema: &Arc<EntitySchema>, row: &Record) -> Result<Entity> {
        let mut entity = Entity::new(Arc::clone(schema));
        for (column, value) in row.iter() {
            let Some(property) = schema.property_for_column(column) else {
                continue;
            };
            if property.is_computed() {
                continue;
            }
            if let Some(value) = self.map_value(schema, property, value.clone())? {
                entity.insert_mapped(property.name(), value);
            }
        }
        Ok(entity)
    }

    pub fn map_collection(
        &self,
        schema: &Arc<EntitySchema>,
        rows: &[Record],
    ) -> Result<EntityCollection> {
        let mut collection = EntityCollection::new(schema.name());
        for row in rows {
            collection.push(self.map_entity(schema, row)?)?;
        }
        Ok(collection)
    }

    /// Convert one entity value to its adapter representation.
    pub fn unmap_value(
        &self,
        schema: &EntitySchema,
        property: &Property,
        value: &EntityValue,
    ) -> Result<Value> {
        match value {
            EntityValue::Entity(entity) => Ok(Value::Record(self.unmap_entity(entity)?)),
            EntityValue::Collection(collection) => {
                Ok(Value::Array(self.unmap_collection(collection)?))
            }
            scalar => {
                let mut raw = scalar.to_value().unwrap_or(Value::Null);
                if let Some(filter) = property.map_filter() {
                    raw = (filter.unmap)(raw);
                }
                match self.adapter_mapping(schema)? {
                    Some(mapping) => mapping.unmap_value(property, raw),
                    None => Ok(raw),
                }
            }
        }
    }

    /// Adapter row for an entity; association and computed properties are left out.
    pub fn unmap_entity(&self, entity: &Entity) -> Result<Record> {
        let schema = entity.schema();
        let mut row = Record::new();
        for (name, value) in entity.iter() {
            let Some(property) = schema.property_named(name) else {
                continue;
            };
            if property.is_association() || property.is_computed() {
                continue;
            }
            row.insert(
                property.mapped_name(),
                self.unmap_value(schema, property, value)?,
            );
        }
        Ok(row)
    }

    pub fn unmap_collection(&self, collection: &EntityCollection) -> Result<Vec<Value>> {
        collection
            .iter()
            .map(|entity| self.unmap_entity(entity).map(Value::Record))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Property;
    use chrono::NaiveDate;

    struct Prefixed;

    impl Mapping for Prefixed {
        fn map_value(&self, _property: &Property, value: Value) -> Result<Value> {
            Ok(match value {
                Value::Text(s) => Value::Text(s.trim_start_matches("db:").to_string()),
                other => other,
            })
        }

        fn unmap_value(&self, _property: &Property, value: Value) -> Result<Value> {
            Ok(match value {
                Value::Text(s) => Value::Text(format!("db:{}", s)),
                other => other,
            })
        }
    }

    fn registry() -> Arc<SchemaRegistry> {
        SchemaRegistry::builder()
            .entity(
                EntitySchema::new("Hero")
                    .adapter("store", "heroes")
                    .property(Property::integer("id").primary())
                    .property(Property::string("name").mapped_as("hero_name"))
                    .property(Property::boolean("active"))
                    .property(Property::float("rating"))
                    .property(Property::datetime("born"))
                    .property(Property::integer("team_id"))
                    .property(Property::many_to_one("team", "Team", "team_id"))
                    .property(Property::collection("sidekicks", "Hero"))
                    .property(Property::computed("label", |e| {
                        e.get_str("name").map(|n| EntityValue::Text(n.to_uppercase()))
                    })),
            )
            .entity(
                EntitySchema::new("Team")
                    .adapter("store", "teams")
                    .property(Property::integer("id").primary())
                    .property(
                        Property::string("motto")
                            .filter(|v| match v {
                                Value::Text(s) => Value::Text(s.to_lowercase()),
                                other => other,
                            }, |v| match v {
                                Value::Text(s) => Value::Text(s.to_uppercase()),
                                other => other,
                            }),
                    ),
            )
            .entity(EntitySchema::new("Loose").property(Property::string("x")))
            .build()
            .unwrap()
    }

    fn hero_schema(mapper: &Mapper) -> Arc<EntitySchema> {
        mapper.registry().require("Hero").unwrap()
    }

    #[test]
    fn maps_row_with_aliases_and_coercion() {
        let mapper = Mapper::new(registry());
        let row = Record::new()
            .with("id", "5")
            .with("hero_name", "Ada")
            .with("active", "true")
            .with("rating", 4)
            .with("born", "1815-12-10 00:00:00")
            .with("team_id", Value::Null)
            .with("unknown_column", 1)
            .with("label", "ignored");
        let hero = mapper.map_entity(&hero_schema(&mapper), &row).unwrap();
        assert_eq!(hero.get_i64("id"), Some(5));
        assert_eq!(hero.get_str("name"), Some("Ada"));
        assert_eq!(hero.get_bool("active"), Some(true));
        assert_eq!(hero.get_f64("rating"), Some(4.0));
        assert_eq!(
            hero.get_datetime("born"),
            NaiveDate::from_ymd_opt(1815, 12, 10).and_then(|d| d.and_hms_opt(0, 0, 0))
        );
        assert!(!hero.is_set("team_id"));
        assert_eq!(
            hero.get("label").unwrap(),
            Some(EntityValue::Text("ADA".into()))
        );
    }

    #[test]
    fn empty_string_maps_to_none() {
        let mapper = Mapper::new(registry());
        let schema = hero_schema(&mapper);
        let property = schema.property_named("rating").unwrap();
        assert_eq!(
            mapper
                .map_value(&schema, property, Value::Text(String::new()))
                .unwrap(),
            None
        );
    }

    #[test]
    fn unconvertible_value_is_mapping_error() {
        let mapper = Mapper::new(registry());
        let schema = hero_schema(&mapper);
        let row = Record::new().with("born", "not a date");
        let err = mapper.map_entity(&schema, &row).unwrap_err();
        assert!(err.is_mapping());
        assert!(err.to_string().contains("Hero.born"));

        let row = Record::new().with("active", "perhaps");
        assert!(mapper.map_entity(&schema, &row).unwrap_err().is_mapping());

        let row = Record::new().with("id", Value::Double(1e20));
        assert!(mapper.map_entity(&schema, &row).unwrap_err().is_mapping());
    }

    #[test]
    fn nested_associations_recurse() {
        let mapper = Mapper::new(registry());
        let row = Record::new()
            .with("id", 1)
            .with("team", Record::new().with("id", 9).with("motto", "ONWARD"))
            .with(
                "sidekicks",
                Value::Array(vec![Value::Record(Record::new().with("id", 2))]),
            );
        let hero = mapper.map_entity(&hero_schema(&mapper), &row).unwrap();
        let team = hero.entity("team").unwrap();
        assert_eq!(team.get_i64("id"), Some(9));
        assert_eq!(team.get_str("motto"), Some("onward"));
        assert_eq!(hero.collection("sidekicks").unwrap().len(), 1);

        let bad = Record::new().with("team", 3);
        assert!(mapper.map_entity(&hero_schema(&mapper), &bad).is_err());
    }

    #[test]
    fn round_trip_preserves_scalars() {
        let mapper = Mapper::new(registry());
        let born = NaiveDate::from_ymd_opt(1906, 12, 9)
            .and_then(|d| d.and_hms_opt(8, 30, 0))
            .unwrap();
        let row = Record::new()
            .with("id", 3)
            .with("hero_name", "Grace")
            .with("active", false)
            .with("rating", 4.75)
            .with("born", born)
            .with("team_id", 7);
        let hero = mapper.map_entity(&hero_schema(&mapper), &row).unwrap();
        assert_eq!(mapper.unmap_entity(&hero).unwrap(), row);
    }

    #[test]
    fn unmap_skips_associations_and_applies_mappings() {
        let mut mapper = Mapper::new(registry());
        mapper
            .register_adapter_mapping("store", Arc::new(Prefixed))
            .unwrap();
        let row = Record::new()
            .with("id", 1)
            .with("hero_name", "db:Ada")
            .with("team", Record::new().with("id", 2).with("motto", "go"));
        let hero = mapper.map_entity(&hero_schema(&mapper), &row).unwrap();
        assert_eq!(hero.get_str("name"), Some("Ada"));
        assert!(hero.entity("team").is_some());

        let unmapped = mapper.unmap_entity(&hero).unwrap();
        assert_eq!(unmapped.get("hero_name"), Some(&Value::Text("db:Ada".into())));
        assert!(!unmapped.contains("team"));

        // the filter runs before the adapter mapping
        let team = hero.entity("team").unwrap();
        let team_row = mapper.unmap_entity(team).unwrap();
        assert_eq!(team_row.get("motto"), Some(&Value::Text("db:GO".into())));
    }

    #[test]
    fn duplicate_mapping_is_rejected() {
        let mut mapper = Mapper::new(registry());
        mapper
            .register_adapter_mapping("store", Arc::new(Prefixed))
            .unwrap();
        let err = mapper
            .register_adapter_mapping("store", Arc::new(Prefixed))
            .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn entity_without_adapter_can_not_be_mapped() {
        let mapper = Mapper::new(registry());
        let schema = mapper.registry().require("Loose").unwrap();
        let err = mapper
            .map_entity(&schema, &Record::new().with("x", "y"))
            .unwrap_err();
        assert!(err.is_mapping());

        let entity = Entity::from_values(schema, [("x", "y")]).unwrap();
        assert!(mapper.unmap_entity(&entity).unwrap_err().is_mapping());
    }
}
