//! relmap - entity mapping over multiple storage adapters.
//!
//! relmap maps typed entities onto the rows of pluggable storage adapters
//! and resolves associations between entities, including associations whose
//! two sides live on different adapters. It provides:
//!
//! - Declarative entity schemas with OneToOne, OneToMany, ManyToOne and
//!   ManyToMany associations
//! - Bidirectional mapping between adapter rows and typed entities
//! - Chainable find, count, insert, update and delete queries
//! - Batched cross-adapter association resolution
//! - Tag-invalidated caching of find results
//! - Repositories that write entities together with their association changes
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use relmap::prelude::*;
//!
//! let registry = SchemaRegistry::builder()
//!     .entity(
//!         EntitySchema::new("Hero")
//!             .adapter("memory", "heroes")
//!             .property(Property::integer("id").primary())
//!             .property(Property::string("name"))
//!             .property(Property::integer("age")),
//!     )
//!     .build()?;
//!
//! let connection = Arc::new(
//!     Connection::builder(Arc::clone(&registry))
//!         .adapter(Arc::new(MemoryAdapter::new("memory")))
//!         .build()?,
//! );
//! let heroes = Repository::new(Arc::clone(&connection), "Hero")?;
//!
//! let mut hero = Entity::from_values(
//!     registry.require("Hero")?,
//!     [("name", EntityValue::from("Spider-Man")), ("age", EntityValue::from(25))],
//! )?;
//! heroes.save(&mut hero)?;
//! assert_eq!(hero.get_i64("id"), Some(1));
//!
//! let adults = heroes
//!     .find()
//!     .where_("age", Operator::Gte, 18)?
//!     .order_by("name", Direction::Asc)?
//!     .run()?;
//! assert_eq!(adults.len(), 1);
//! # Ok::<(), relmap::Error>(())
//! ```
//!
//! # Crates
//!
//! - `relmap-core`: values, schemas, entities, the adapter traits and the mapper
//! - `relmap-query`: connection, queries, association resolution and caching
//! - `relmap-repository`: entity persistence with association write-through
//! - `relmap-memory`: the in-memory reference adapter

// Re-export all public types from sub-crates
pub use relmap_core::{
    // Adapter contract
    Adapter,
    AdapterBinding,
    AdapterError,
    // Schema
    Association,
    AssociationInfo,
    AssociationKind,
    BasicType,
    Changes,
    ComputeFn,
    // Query clauses
    Condition,
    DefaultMapping,
    Direction,
    // Entities
    Entity,
    EntityCollection,
    EntitySchema,
    EntityValue,
    // Errors
    Error,
    FieldValidationError,
    FindRequest,
    Joiner,
    // Values
    Key,
    MapFilter,
    Mapper,
    Mapping,
    MappingError,
    Operator,
    OrderBy,
    PrimaryKey,
    Property,
    PropertyKind,
    QueryError,
    QueryErrorKind,
    Record,
    RepositoryError,
    Result,
    // Validation
    Rule,
    RuleValidator,
    SchemaRegistry,
    SchemaRegistryBuilder,
    ValidationError,
    ValidationErrorKind,
    Validator,
    Value,
};

pub use relmap_query::{
    AfterRunHook, BeforeRunHook, Cache, CacheOptions, Connection, ConnectionBuilder, Count,
    Delete, DeleteOne, Filterable, Find, FindOne, Insert, MemoryCache, Query, QueryBuilder,
    QueryInfo, TAG_QUERY, Update, UpdateOne,
};

pub use relmap_repository::{Repository, RepositoryConfig};

pub use relmap_memory::MemoryAdapter;

/// Prelude module for convenient imports.
///
/// ```
/// use relmap::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Adapters
        Adapter,
        // Caching
        CacheOptions,
        // Queries
        Condition,
        Connection,
        Direction,
        // Entities
        Entity,
        EntityCollection,
        EntitySchema,
        EntityValue,
        Error,
        Filterable,
        Mapping,
        MemoryAdapter,
        MemoryCache,
        Operator,
        Property,
        Query,
        Record,
        // Persistence
        Repository,
        Result,
        SchemaRegistry,
        Value,
    };
}
