//! Entry point for building queries on one entity.

use std::sync::Arc;

use relmap_core::{Entity, EntitySchema, Result, Value};

use crate::connection::Connection;
use crate::find::{Count, Find, FindOne};
use crate::modify::{Delete, DeleteOne, Insert, Update, UpdateOne};

/// Creates queries for one entity on a [`Connection`].
///
/// ```ignore
/// let heroes = connection
///     .query("Hero")?
///     .find()
///     .where_("age", Operator::Gt, 30)?
///     .associate(&["team"])?
///     .run()?;
/// ```
#[derive(Debug, Clone)]
pub struct QueryBuilder<'c> {
    connection: &'c Connection,
    schema: Arc<EntitySchema>,
}

impl<'c> QueryBuilder<'c> {
    pub fn new(connection: &'c Connection, schema: Arc<EntitySchema>) -> Self {
        Self { connection, schema }
    }

    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    pub fn find(&self) -> Find<'c> {
        Find::new(self.connection, Arc::clone(&self.schema))
    }

    pub fn find_one(&self, primary: impl Into<Value>) -> Result<FindOne<'c>> {
        FindOne::new(self.connection, Arc::clone(&self.schema), primary)
    }

    pub fn count(&self) -> Count<'c> {
        Count::new(self.connection, Arc::clone(&self.schema))
    }

    pub fn insert(&self, entity: &'c Entity) -> Result<Insert<'c>> {
        Insert::new(self.connection, &self.schema, entity)
    }

    pub fn update(&self, entity: &'c Entity) -> Result<Update<'c>> {
        Update::new(self.connection, Arc::clone(&self.schema), entity)
    }

    pub fn update_one(&self, primary: impl Into<Value>, entity: &'c Entity) -> Result<UpdateOne<'c>> {
        UpdateOne::new(self.connection, Arc::clone(&self.schema), primary.into(), entity)
    }

    pub fn delete(&self) -> Delete<'c> {
        Delete::new(self.connection, Arc::clone(&self.schema))
    }

    pub fn delete_one(&self, primary: impl Into<Value>) -> Result<DeleteOne<'c>> {
        DeleteOne::new(self.connection, Arc::clone(&self.schema), primary.into())
    }
}
