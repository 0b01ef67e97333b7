//! Entity metadata: properties, associations and the schema registry.
//!
//! Schemas are declared once, validated by [`SchemaRegistryBuilder::build`]
//! and then shared read-only (`Arc<SchemaRegistry>`) by the mapper, queries
//! and repositories.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::entity::{Entity, EntityValue};
use crate::{Error, Result, Value};

/// Scalar types a basic property can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasicType {
    Boolean,
    Integer,
    Float,
    String,
}

impl BasicType {
    pub const fn name(self) -> &'static str {
        match self {
            BasicType::Boolean => "boolean",
            BasicType::Integer => "integer",
            BasicType::Float => "float",
            BasicType::String => "string",
        }
    }
}

/// Derives a computed property from the rest of the entity.
pub type ComputeFn = fn(&Entity) -> Option<EntityValue>;

/// Category and type of a property.
#[derive(Clone)]
pub enum PropertyKind {
    Basic(BasicType),
    DateTime,
    /// Nested entity of the named schema.
    Entity(String),
    /// Collection of entities of the named schema.
    Collection(String),
    /// Derived on read, never stored or settable.
    Computed(ComputeFn),
}

impl PropertyKind {
    pub fn type_name(&self) -> String {
        match self {
            PropertyKind::Basic(t) => t.name().to_string(),
            PropertyKind::DateTime => "datetime".to_string(),
            PropertyKind::Entity(target) => target.clone(),
            PropertyKind::Collection(target) => format!("{}[]", target),
            PropertyKind::Computed(_) => "computed".to_string(),
        }
    }
}

impl fmt::Debug for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKind::Basic(t) => f.debug_tuple("Basic").field(t).finish(),
            PropertyKind::DateTime => f.write_str("DateTime"),
            PropertyKind::Entity(t) => f.debug_tuple("Entity").field(t).finish(),
            PropertyKind::Collection(t) => f.debug_tuple("Collection").field(t).finish(),
            PropertyKind::Computed(_) => f.write_str("Computed"),
        }
    }
}

/// User-supplied value filter applied on both mapping directions.
///
/// `map` runs after the adapter mapping when reading, `unmap` runs first when
/// writing.
#[derive(Debug, Clone, Copy)]
pub struct MapFilter {
    pub map: fn(Value) -> Value,
    pub unmap: fn(Value) -> Value,
}

/// How two entities relate and which keys correlate them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationKind {
    /// Source column `foreign_key` holds the target primary.
    OneToOne { foreign_key: String },
    /// Target column `reference_key` holds the source primary.
    OneToMany { reference_key: String },
    /// Source column `reference_key` holds the target primary.
    ManyToOne { reference_key: String },
    /// Rows of `join_resource` pair `join_key` (source primary) with
    /// `reference_key` (target primary). The join resource lives with the
    /// source adapter when `dominant`, with the target adapter otherwise.
    ManyToMany {
        join_key: String,
        join_resource: String,
        reference_key: String,
        dominant: bool,
    },
}

impl AssociationKind {
    pub const fn name(&self) -> &'static str {
        match self {
            AssociationKind::OneToOne { .. } => "OneToOne",
            AssociationKind::OneToMany { .. } => "OneToMany",
            AssociationKind::ManyToOne { .. } => "ManyToOne",
            AssociationKind::ManyToMany { .. } => "ManyToMany",
        }
    }

    /// Whether the association yields a collection.
    pub const fn is_many(&self) -> bool {
        matches!(
            self,
            AssociationKind::OneToMany { .. } | AssociationKind::ManyToMany { .. }
        )
    }
}

/// Association declared on a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub target: String,
    pub kind: AssociationKind,
}

/// A single entity property.
#[derive(Debug, Clone)]
pub struct Property {
    name: String,
    mapped_name: Option<String>,
    kind: PropertyKind,
    primary: bool,
    read_only: bool,
    association: Option<Association>,
    filter: Option<MapFilter>,
}

impl Property {
    pub fn new(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            mapped_name: None,
            kind,
            primary: false,
            read_only: false,
            association: None,
            filter: None,
        }
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Basic(BasicType::Boolean))
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Basic(BasicType::Integer))
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Basic(BasicType::Float))
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Basic(BasicType::String))
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::DateTime)
    }

    pub fn entity(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Entity(target.into()))
    }

    pub fn collection(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, PropertyKind::Collection(target.into()))
    }

    pub fn computed(name: impl Into<String>, compute: ComputeFn) -> Self {
        Self::new(name, PropertyKind::Computed(compute))
    }

    /// Entity-typed property whose source column `reference_key` holds the target primary.
    pub fn many_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        reference_key: impl Into<String>,
    ) -> Self {
        let target = target.into();
        Self::entity(name, target.clone()).associated(Association {
            target,
            kind: AssociationKind::ManyToOne {
                reference_key: reference_key.into(),
            },
        })
    }

    pub fn one_to_one(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let target = target.into();
        Self::entity(name, target.clone()).associated(Association {
            target,
            kind: AssociationKind::OneToOne {
                foreign_key: foreign_key.into(),
            },
        })
    }

    pub fn one_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        reference_key: impl Into<String>,
    ) -> Self {
        let target = target.into();
        Self::collection(name, target.clone()).associated(Association {
            target,
            kind: AssociationKind::OneToMany {
                reference_key: reference_key.into(),
            },
        })
    }

    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        join_key: impl Into<String>,
        join_resource: impl Into<String>,
        reference_key: impl Into<String>,
    ) -> Self {
        let target = target.into();
        Self::collection(name, target.clone()).associated(Association {
            target,
            kind: AssociationKind::ManyToMany {
                join_key: join_key.into(),
                join_resource: join_resource.into(),
                reference_key: reference_key.into(),
                dominant: true,
            },
        })
    }

    /// Keep the ManyToMany join resource on the target adapter.
    pub fn not_dominant(mut self) -> Self {
        if let Some(Association {
            kind: AssociationKind::ManyToMany { dominant, .. },
            ..
        }) = &mut self.association
        {
            *dominant = false;
        }
        self
    }

    pub fn associated(mut self, association: Association) -> Self {
        self.association = Some(association);
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Adapter-side column name, when it differs from the property name.
    pub fn mapped_as(mut self, column: impl Into<String>) -> Self {
        self.mapped_name = Some(column.into());
        self
    }

    pub fn filter(mut self, map: fn(Value) -> Value, unmap: fn(Value) -> Value) -> Self {
        self.filter = Some(MapFilter { map, unmap });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column name used by the adapter.
    pub fn mapped_name(&self) -> &str {
        self.mapped_name.as_deref().unwrap_or(&self.name)
    }

    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_computed(&self) -> bool {
        matches!(self.kind, PropertyKind::Computed(_))
    }

    pub fn is_association(&self) -> bool {
        self.association.is_some()
    }

    /// Stored column: neither an association nor computed.
    pub fn is_column(&self) -> bool {
        !self.is_association() && !self.is_computed()
    }

    pub fn association(&self) -> Option<&Association> {
        self.association.as_ref()
    }

    pub fn map_filter(&self) -> Option<&MapFilter> {
        self.filter.as_ref()
    }

    /// Target schema name of entity and collection properties.
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            PropertyKind::Entity(t) | PropertyKind::Collection(t) => Some(t),
            _ => None,
        }
    }
}

/// Adapter and resource an entity is stored in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterBinding {
    pub name: String,
    pub resource: String,
}

/// Static description of one entity type.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    name: String,
    adapter: Option<AdapterBinding>,
    properties: Vec<Property>,
}

impl EntitySchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            adapter: None,
            properties: Vec::new(),
        }
    }

    /// Bind to `resource` on the adapter registered as `adapter`.
    pub fn adapter(mut self, adapter: impl Into<String>, resource: impl Into<String>) -> Self {
        self.adapter = Some(AdapterBinding {
            name: adapter.into(),
            resource: resource.into(),
        });
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_adapter(&self) -> bool {
        self.adapter.is_some()
    }

    pub fn adapter_binding(&self) -> Option<&AdapterBinding> {
        self.adapter.as_ref()
    }

    pub fn adapter_name(&self) -> Option<&str> {
        self.adapter.as_ref().map(|a| a.name.as_str())
    }

    pub fn resource(&self) -> Option<&str> {
        self.adapter.as_ref().map(|a| a.resource.as_str())
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn property_named(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property_named(name).is_some()
    }

    /// Property by name, or `InvalidArgument` naming the entity.
    pub fn require_property(&self, name: &str) -> Result<&Property> {
        self.property_named(name).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "Undefined property '{}' on entity {}",
                name, self.name
            ))
        })
    }

    /// Property for an adapter column: mapped names first, then plain names.
    pub fn property_for_column(&self, column: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| p.mapped_name.as_deref() == Some(column))
            .or_else(|| self.property_named(column))
    }

    pub fn primary(&self) -> Option<&Property> {
        self.properties.iter().find(|p| p.primary)
    }

    /// Primary property, or `InvalidArgument` if none is declared.
    pub fn require_primary(&self) -> Result<&Property> {
        self.primary().ok_or_else(|| {
            Error::InvalidArgument(format!("Entity {} has no primary property", self.name))
        })
    }

    /// Properties stored as plain columns.
    pub fn columns(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter().filter(|p| p.is_column())
    }

    pub fn associations(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter().filter(|p| p.is_association())
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for property in &self.properties {
            if !seen.insert(property.name.as_str()) {
                return Err(Error::Definition(format!(
                    "Duplicate property '{}' on entity {}",
                    property.name, self.name
                )));
            }
        }
        if self.properties.iter().filter(|p| p.primary).count() > 1 {
            return Err(Error::Definition(format!(
                "Only one primary property allowed on entity {}",
                self.name
            )));
        }
        if let Some(primary) = self.primary() {
            if !primary.is_column() {
                return Err(Error::Definition(format!(
                    "Primary property '{}' on entity {} must be a stored column",
                    primary.name, self.name
                )));
            }
        }
        Ok(())
    }
}

/// An association with every name needed to resolve it at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationInfo {
    /// Property on the source entity.
    pub property: String,
    /// Row key the resolved data is stored under.
    pub column: String,
    pub kind: AssociationKind,
    pub source_entity: String,
    pub source_adapter: String,
    pub source_resource: String,
    pub source_primary: String,
    pub target_entity: String,
    pub target_adapter: String,
    pub target_resource: String,
    pub target_primary: String,
}

impl AssociationInfo {
    /// Source and target live behind different adapters.
    pub fn is_remote(&self) -> bool {
        self.source_adapter != self.target_adapter
    }

    /// Adapter that owns the ManyToMany join resource.
    pub fn join_adapter(&self) -> &str {
        match &self.kind {
            AssociationKind::ManyToMany {
                dominant: false, ..
            } => &self.target_adapter,
            _ => &self.source_adapter,
        }
    }
}

/// Immutable set of entity schemas with their resolved associations.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<EntitySchema>>,
    associations: HashMap<(String, String), AssociationInfo>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<EntitySchema>> {
        self.schemas.get(name).cloned()
    }

    pub fn require(&self, name: &str) -> Result<Arc<EntitySchema>> {
        self.get(name)
            .ok_or_else(|| Error::InvalidArgument(format!("Entity {} is not registered", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    /// Resolved association of `entity.property`.
    pub fn association(&self, entity: &str, property: &str) -> Result<&AssociationInfo> {
        self.associations
            .get(&(entity.to_string(), property.to_string()))
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "Property '{}' on entity {} is not an association",
                    property, entity
                ))
            })
    }
}

/// Collects schemas; [`build`](Self::build) validates and resolves them.
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    schemas: Vec<EntitySchema>,
    error: Option<Error>,
}

impl SchemaRegistryBuilder {
    pub fn entity(mut self, schema: EntitySchema) -> Self {
        if self.error.is_none() && self.schemas.iter().any(|s| s.name == schema.name) {
            self.error = Some(Error::InvalidArgument(format!(
                "Entity {} already registered",
                schema.name
            )));
        }
        self.schemas.push(schema);
        self
    }

    pub fn build(self) -> Result<Arc<SchemaRegistry>> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let mut registry = SchemaRegistry::default();
        for schema in self.schemas {
            schema.validate()?;
            registry
                .schemas
                .insert(schema.name.clone(), Arc::new(schema));
        }

        let mut resolved = Vec::new();
        for schema in registry.schemas.values() {
            for property in schema.associations() {
                resolved.push(resolve(&registry, schema, property)?);
            }
        }
        for info in resolved {
            tracing::trace!(
                entity = %info.source_entity,
                property = %info.property,
                kind = info.kind.name(),
                remote = info.is_remote(),
                "Resolved association"
            );
            registry
                .associations
                .insert((info.source_entity.clone(), info.property.clone()), info);
        }
        Ok(Arc::new(registry))
    }
}

fn resolve(
    registry: &SchemaRegistry,
    schema: &EntitySchema,
    property: &Property,
) -> Result<AssociationInfo> {
    let Some(association) = property.association() else {
        return Err(Error::Definition(format!(
            "Property '{}' is not an association",
            property.name
        )));
    };
    let definition = |msg: String| {
        Error::Definition(format!(
            "Association {}.{}: {}",
            schema.name, property.name, msg
        ))
    };

    let target = registry
        .schemas
        .get(&association.target)
        .ok_or_else(|| definition(format!("target entity {} not registered", association.target)))?;

    let shape_ok = match (&association.kind, property.kind()) {
        (AssociationKind::OneToOne { .. } | AssociationKind::ManyToOne { .. }, PropertyKind::Entity(t))
        | (
            AssociationKind::OneToMany { .. } | AssociationKind::ManyToMany { .. },
            PropertyKind::Collection(t),
        ) => *t == association.target,
        _ => false,
    };
    if !shape_ok {
        return Err(definition(format!(
            "{} requires a property of type {}",
            association.kind.name(),
            if association.kind.is_many() {
                format!("{}[]", association.target)
            } else {
                association.target.clone()
            }
        )));
    }

    if let AssociationKind::ManyToMany {
        join_key,
        join_resource,
        reference_key,
        ..
    } = &association.kind
    {
        if join_key.is_empty() || join_resource.is_empty() || reference_key.is_empty() {
            return Err(definition(
                "join key, join resource and reference key are required".to_string(),
            ));
        }
    }

    let (Some(source_binding), Some(target_binding)) = (&schema.adapter, &target.adapter) else {
        return Err(definition("both entities must define an adapter".to_string()));
    };
    let (Some(source_primary), Some(target_primary)) = (schema.primary(), target.primary()) else {
        return Err(definition("both entities must define a primary property".to_string()));
    };

    Ok(AssociationInfo {
        property: property.name.clone(),
        column: property.mapped_name().to_string(),
        kind: association.kind.clone(),
        source_entity: schema.name.clone(),
        source_adapter: source_binding.name.clone(),
        source_resource: source_binding.resource.clone(),
        source_primary: source_primary.mapped_name().to_string(),
        target_entity: target.name.clone(),
        target_adapter: target_binding.name.clone(),
        target_resource: target_binding.resource.clone(),
        target_primary: target_primary.mapped_name().to_string(),
    })
}
