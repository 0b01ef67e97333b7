//! Core types and traits for relmap.
//!
//! This crate provides the foundational pieces shared by the query,
//! repository and adapter crates:
//!
//! - `Value` and `Record` for adapter-native rows
//! - `EntitySchema`, `Property` and `SchemaRegistry` describing entities
//! - `Entity` and `EntityCollection` holding typed values
//! - `Adapter` and `Mapping` traits for storage backends
//! - `Mapper` converting rows to entities and back

pub mod adapter;
pub mod clause;
pub mod collection;
mod convert;
pub mod entity;
pub mod error;
pub mod mapper;
pub mod schema;
pub mod validate;
pub mod value;

pub use adapter::{Adapter, DefaultMapping, FindRequest, Mapping, PrimaryKey};
pub use clause::{Condition, Direction, Joiner, Operator, OrderBy};
pub use collection::EntityCollection;
pub use entity::{Changes, Entity, EntityValue};
pub use error::{
    AdapterError, Error, FieldValidationError, MappingError, QueryError, QueryErrorKind,
    RepositoryError, Result, ValidationError, ValidationErrorKind,
};
pub use mapper::Mapper;
pub use schema::{
    AdapterBinding, Association, AssociationInfo, AssociationKind, BasicType, ComputeFn,
    EntitySchema, MapFilter, Property, PropertyKind, SchemaRegistry, SchemaRegistryBuilder,
};
pub use validate::{Rule, RuleValidator, Validator};
pub use value::{Key, Record, Value};
