//! Entity persistence for relmap.
//!
//! A [`Repository`] stores and loads entities of one type through a
//! [`Connection`]. Writes run in two phases:
//!
//! 1. the entity row itself is validated and written with an insert or
//!    update query;
//! 2. the pending changes recorded on each association property (attach,
//!    detach, add, remove) are replayed against the adapters owning the
//!    association.
//!
//! The phases are not coupled by a transaction. A failure in the second
//! phase leaves the entity row written and is reported as
//! [`Error::Repository`] with the adapter error as its source.

mod write;

use std::sync::Arc;

use relmap_core::{
    Changes, Condition, Entity, EntityCollection, EntitySchema, Error, Operator, RepositoryError,
    Result, Validator, Value,
};
use relmap_query::{Connection, Filterable, Find, Query, QueryBuilder, TAG_QUERY};

use crate::write::{AssociationWriter, Written};

/// Behaviour switches of a [`Repository`].
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Run the validator before every write.
    pub validate: bool,
    /// Replay association changes after the entity is written.
    pub write_associations: bool,
    /// Drop cached query results after every write.
    pub invalidate_cache: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            validate: true,
            write_associations: true,
            invalidate_cache: true,
        }
    }
}

/// Stores and loads entities of one type.
pub struct Repository {
    connection: Arc<Connection>,
    schema: Arc<EntitySchema>,
    validator: Option<Arc<dyn Validator>>,
    config: RepositoryConfig,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &self.schema.name())
            .field("validator", &self.validator.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Repository of the named entity.
    pub fn new(connection: Arc<Connection>, entity: &str) -> Result<Self> {
        let schema = connection.registry().require(entity)?;
        Ok(Self {
            connection,
            schema,
            validator: None,
            config: RepositoryConfig::default(),
        })
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn entity_name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Query builder for this repository's entity.
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(&self.connection, Arc::clone(&self.schema))
    }

    /// Find query to refine and run.
    pub fn find(&self) -> Find<'_> {
        self.query().find()
    }

    pub fn find_one(&self, primary: impl Into<Value>) -> Result<Option<Entity>> {
        self.query().find_one(primary)?.run()
    }

    /// Entities with any of the given primary values.
    pub fn find_by_primaries(&self, primaries: Vec<Value>) -> Result<EntityCollection> {
        if primaries.is_empty() {
            return Ok(EntityCollection::new(self.schema.name()));
        }
        let primary = self.schema.require_primary()?;
        self.find()
            .where_(primary.name(), Operator::In, Value::Array(primaries))?
            .run()
    }

    pub fn count(&self) -> Result<u64> {
        self.query().count().run()
    }

    /// Count of entities matching `conditions`.
    pub fn count_where(&self, conditions: Vec<Condition>) -> Result<u64> {
        let mut count = self.query().count();
        for condition in conditions {
            count = count.filter(condition)?;
        }
        count.run()
    }

    /// Insert when the primary value is empty, update otherwise.
    pub fn save(&self, entity: &mut Entity) -> Result<()> {
        if entity.primary_value().is_none_or(|v| v.is_empty()) {
            self.insert(entity)
        } else {
            self.update(entity)
        }
    }

    /// Store a new entity and assign the primary value the adapter returned.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = %self.schema.name()))]
    pub fn insert(&self, entity: &mut Entity) -> Result<()> {
        self.check_entity(entity)?;
        self.validate(entity)?;

        let primary = self
            .query()
            .insert(entity)?
            .run()
            .map_err(|e| self.wrap("Insert failed", e))?;
        entity.assign_primary(primary)?;
        tracing::debug!(primary = ?entity.primary_value(), "Entity inserted");

        let result = self.write_associations(entity);
        self.invalidate();
        result
    }

    /// Write the entity's values to its stored row.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = %self.schema.name()))]
    pub fn update(&self, entity: &mut Entity) -> Result<()> {
        self.check_entity(entity)?;
        let primary = self.require_primary_value(entity)?;
        self.validate(entity)?;

        let found = self
            .query()
            .update_one(primary.clone(), entity)?
            .run()
            .map_err(|e| self.wrap("Update failed", e))?;
        if !found {
            return Err(RepositoryError::new(
                self.schema.name(),
                format!("Entity with primary {:?} not found", primary),
            )
            .into());
        }

        let result = self.write_associations(entity);
        self.invalidate();
        result
    }

    /// Delete the entity's stored row. Returns whether a row was removed.
    #[tracing::instrument(level = "debug", skip(self, entity), fields(entity = %self.schema.name()))]
    pub fn delete(&self, entity: &Entity) -> Result<bool> {
        self.check_entity(entity)?;
        let primary = self.require_primary_value(entity)?;
        let deleted = self
            .query()
            .delete_one(primary)?
            .run()
            .map_err(|e| self.wrap("Delete failed", e))?;
        self.invalidate();
        Ok(deleted)
    }

    fn check_entity(&self, entity: &Entity) -> Result<()> {
        if entity.name() == self.schema.name() {
            return Ok(());
        }
        Err(Error::InvalidArgument(format!(
            "Repository of {} can not store entity {}",
            self.schema.name(),
            entity.name()
        )))
    }

    fn require_primary_value(&self, entity: &Entity) -> Result<Value> {
        entity
            .primary_value()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "Entity {} has no primary value",
                    self.schema.name()
                ))
            })
    }

    fn validate(&self, entity: &Entity) -> Result<()> {
        if !self.config.validate {
            return Ok(());
        }
        match &self.validator {
            Some(validator) => Ok(validator.validate(entity)?),
            None => Ok(()),
        }
    }

    /// Storage errors become repository errors; caller mistakes pass through.
    fn wrap(&self, message: &str, error: Error) -> Error {
        match error {
            Error::InvalidArgument(_) | Error::Validation(_) | Error::Repository(_) => error,
            other => RepositoryError::new(self.schema.name(), message)
                .with_source(other)
                .into(),
        }
    }

    fn write_associations(&self, entity: &mut Entity) -> Result<()> {
        if !self.config.write_associations {
            return Ok(());
        }
        let writer = AssociationWriter {
            connection: &self.connection,
            validator: if self.config.validate {
                self.validator.as_ref()
            } else {
                None
            },
        };
        let names: Vec<String> = self
            .schema
            .associations()
            .map(|p| p.name().to_string())
            .collect();
        for name in names {
            if entity.changes(&name).is_none_or(Changes::is_empty) {
                continue;
            }
            let info = self.connection.registry().association(self.schema.name(), &name)?;
            let Some(changes) = entity.take_changes(&name) else {
                continue;
            };
            let mut written = Written::default();
            if let Err(e) = writer.apply(entity, info, &changes, &mut written) {
                tracing::warn!(association = %name, error = %e, "Association write failed");
                // Unwritten entries stay logged for a later save.
                *entity.changes_mut(&name)? = written.remaining(&changes)?;
                return Err(Error::Repository(
                    RepositoryError::new(
                        self.schema.name(),
                        format!("Writing association '{}' failed", name),
                    )
                    .with_source(e),
                ));
            }
        }
        Ok(())
    }

    fn invalidate(&self) {
        if !self.config.invalidate_cache {
            return;
        }
        if let Some(cache) = self.connection.cache() {
            cache.clean(&[TAG_QUERY]);
        }
    }
}
