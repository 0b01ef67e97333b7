//! Read queries: [`Find`], [`FindOne`] and [`Count`].

use std::sync::Arc;

use serde::Serialize;

use relmap_core::{
    AssociationInfo, AssociationKind, Condition, Direction, Entity, EntityCollection,
    EntitySchema, Error, FindRequest, OrderBy, QueryErrorKind, Record, Result, Value,
};

use crate::association;
use crate::cache::{CacheOptions, TAG_QUERY};
use crate::connection::{Connection, Query};
use crate::filter::Filterable;

/// Prefix of every cache key produced by [`Find::cache_key`].
const CACHE_KEY_PREFIX: &str = "relmap.find";

/// Filtered, sorted and paginated read of an entity, with association
/// resolution.
///
/// Associations whose target lives behind the same adapter are passed down
/// to [`Adapter::find`](relmap_core::Adapter::find); the rest are fetched
/// afterwards with one batched call per association and merged by key.
#[derive(Debug, Clone)]
pub struct Find<'c> {
    connection: &'c Connection,
    schema: Arc<EntitySchema>,
    selection: Vec<String>,
    conditions: Vec<Condition>,
    order_by: Vec<OrderBy>,
    limit: Option<usize>,
    offset: Option<usize>,
    associations: Vec<String>,
    cache: Option<CacheOptions>,
}

/// Deterministic input of the cache checksum.
#[derive(Serialize)]
struct ChecksumInput<'a> {
    name: &'a str,
    entity: &'a str,
    limit: Option<usize>,
    offset: Option<usize>,
    selection: &'a [String],
    order_by: &'a [OrderBy],
    local: Vec<&'a str>,
    remote: Vec<&'a str>,
    conditions: &'a [Condition],
}

impl<'c> Find<'c> {
    pub fn new(connection: &'c Connection, schema: Arc<EntitySchema>) -> Self {
        Self {
            connection,
            schema,
            selection: Vec::new(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            associations: Vec::new(),
            cache: None,
        }
    }

    /// Restrict the returned properties. The primary property is always
    /// returned once anything is selected.
    pub fn select(mut self, names: &[&str]) -> Result<Self> {
        for name in names {
            let property = self.schema.property_named(name).ok_or_else(|| {
                Error::query_property(format!(
                    "Property '{}' is not defined on entity {}",
                    name,
                    self.schema.name()
                ))
            })?;
            if property.is_association() {
                return Err(Error::query_property(format!(
                    "Association '{}' can not be selected, use associate instead",
                    name
                )));
            }
            if property.is_computed() {
                return Err(Error::query_property(format!(
                    "Computed property '{}' can not be selected",
                    name
                )));
            }
            self.push_selection(name);
        }
        Ok(self)
    }

    pub fn order_by(mut self, name: &str, direction: Direction) -> Result<Self> {
        let Some(property) = self.schema.property_named(name) else {
            return Err(Error::query_property(format!(
                "Cannot order by unknown property '{}' of entity {}",
                name,
                self.schema.name()
            )));
        };
        if !property.is_column() {
            return Err(Error::query_property(format!(
                "Cannot order by property '{}', it is not stored",
                name
            )));
        }
        self.order_by.push(OrderBy {
            name: name.to_string(),
            direction,
        });
        Ok(self)
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Request associations to be resolved and returned with each entity.
    pub fn associate(mut self, names: &[&str]) -> Result<Self> {
        for name in names {
            let is_association = self
                .schema
                .property_named(name)
                .is_some_and(relmap_core::Property::is_association);
            if !is_association {
                return Err(Error::query_property(format!(
                    "Property '{}' of entity {} is not an association",
                    name,
                    self.schema.name()
                )));
            }
            if !self.associations.iter().any(|a| a == name) {
                self.associations.push((*name).to_string());
            }
        }
        Ok(self)
    }

    /// Serve and store results through the connection cache.
    ///
    /// Stored entries are always tagged with [`TAG_QUERY`].
    pub fn cached(mut self, enable: bool, options: CacheOptions) -> Result<Self> {
        if !enable {
            self.cache = None;
            return Ok(self);
        }
        if self.connection.cache().is_none() {
            return Err(Error::query(QueryErrorKind::Cache, "Cache not set"));
        }
        self.cache = Some(options.tag(TAG_QUERY));
        Ok(self)
    }

    /// Property names fetched from the adapter.
    ///
    /// Every stored property when nothing was selected, otherwise the
    /// selection plus the primary property.
    pub fn selection(&self) -> Vec<String> {
        if self.selection.is_empty() {
            return self
                .schema
                .columns()
                .map(|p| p.name().to_string())
                .collect();
        }
        let mut selection = self.selection.clone();
        if let Some(primary) = self.schema.primary() {
            if !selection.iter().any(|s| s == primary.name()) {
                selection.insert(0, primary.name().to_string());
            }
        }
        selection
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn associations(&self) -> &[String] {
        &self.associations
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// 32-bit checksum over everything that shapes the result.
    pub fn checksum(&self) -> Result<u32> {
        let (local, remote) = self.partition_associations()?;
        let input = ChecksumInput {
            name: self.name(),
            entity: self.schema.name(),
            limit: self.limit,
            offset: self.offset,
            selection: &self.selection,
            order_by: &self.order_by,
            local: local.iter().map(|a| a.property.as_str()).collect(),
            remote: remote.iter().map(|a| a.property.as_str()).collect(),
            conditions: &self.conditions,
        };
        let bytes = serde_json::to_vec(&input).map_err(|e| {
            Error::query(
                QueryErrorKind::Cache,
                format!("Can not serialize checksum input: {}", e),
            )
        })?;
        Ok(xxhash_rust::xxh32::xxh32(&bytes, 0))
    }

    /// Opaque key results are cached under.
    pub fn cache_key(&self) -> Result<String> {
        Ok(format!("{}.{:08x}", CACHE_KEY_PREFIX, self.checksum()?))
    }

    fn push_selection(&mut self, name: &str) {
        if !self.selection.iter().any(|s| s == name) {
            self.selection.push(name.to_string());
        }
    }

    /// Requested associations split into (local, remote).
    fn partition_associations(&self) -> Result<(Vec<AssociationInfo>, Vec<AssociationInfo>)> {
        let registry = self.connection.registry();
        let mut local = Vec::new();
        let mut remote = Vec::new();
        for name in &self.associations {
            let info = registry.association(self.schema.name(), name)?;
            if info.is_remote() {
                remote.push(info.clone());
            } else {
                local.push(info.clone());
            }
        }
        Ok((local, remote))
    }

    /// Load the merged rows from the cache. Undecodable entries count as a miss.
    fn load_cached(&self, key: &str) -> Option<Vec<Record>> {
        let cache = self.connection.cache()?;
        let value = cache.load(key)?;
        match serde_json::from_value(value) {
            Ok(rows) => Some(rows),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    fn store_cached(&self, key: &str, rows: &[Record], options: &CacheOptions) {
        let Some(cache) = self.connection.cache() else {
            return;
        };
        match serde_json::to_value(rows) {
            Ok(value) => cache.save(key, value, options),
            Err(e) => tracing::warn!(key = %key, error = %e, "Query result not cached"),
        }
    }

    /// Fetch the rows and resolve every requested association.
    fn fetch_rows(&self, local: Vec<AssociationInfo>, remote: &[AssociationInfo]) -> Result<Vec<Record>> {
        let (adapter, resource) = self.connection.entity_adapter(&self.schema)?;
        let mapping = self.connection.mapping(adapter.name());

        let mut selection = mapping.unmap_selection(&self.schema, &self.selection())?;
        for info in remote {
            let key = match &info.kind {
                AssociationKind::ManyToOne { reference_key } => reference_key,
                AssociationKind::OneToOne { foreign_key } => foreign_key,
                _ => continue,
            };
            if !selection.contains(key) {
                selection.push(key.clone());
            }
        }

        let request = FindRequest {
            resource,
            selection,
            conditions: mapping.unmap_conditions(&self.schema, &self.conditions)?,
            order_by: mapping.unmap_order_by(&self.schema, &self.order_by)?,
            limit: self.limit,
            offset: self.offset,
            associations: local,
        };
        let mut rows = adapter.find(&request)?;
        tracing::debug!(
            entity = %self.schema.name(),
            rows = rows.len(),
            local = request.associations.len(),
            remote = remote.len(),
            "Fetched rows"
        );

        if rows.is_empty() {
            return Ok(rows);
        }
        for info in remote {
            association::resolve(self.connection, info, &mut rows)?;
        }
        Ok(rows)
    }
}

impl Filterable for Find<'_> {
    fn filter_schema(&self) -> &EntitySchema {
        &self.schema
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }

    fn on_condition_property(&mut self, name: &str) {
        if !self.selection.is_empty() {
            self.push_selection(name);
        }
    }
}

impl Query for Find<'_> {
    type Output = EntityCollection;

    fn name(&self) -> &'static str {
        "find"
    }

    fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    fn connection(&self) -> &Connection {
        self.connection
    }

    #[tracing::instrument(level = "debug", skip(self), fields(entity = %self.schema.name()))]
    fn execute(&self) -> Result<EntityCollection> {
        let (local, remote) = self.partition_associations()?;
        for info in &remote {
            self.connection.adapter(&info.target_adapter)?;
            self.connection.adapter(info.join_adapter())?;
        }

        let cache_key = match &self.cache {
            Some(_) => Some(self.cache_key()?),
            None => None,
        };
        if let Some(key) = &cache_key {
            if let Some(rows) = self.load_cached(key) {
                tracing::debug!(key = %key, rows = rows.len(), "Query served from cache");
                return self.connection.mapper().map_collection(&self.schema, &rows);
            }
            tracing::debug!(key = %key, "Query cache miss");
        }

        let rows = self.fetch_rows(local, &remote)?;

        if let (Some(key), Some(options)) = (&cache_key, &self.cache) {
            self.store_cached(key, &rows, options);
        }
        self.connection.mapper().map_collection(&self.schema, &rows)
    }
}

/// Find a single entity by primary value. A missing row is `Ok(None)`.
#[derive(Debug, Clone)]
pub struct FindOne<'c> {
    find: Find<'c>,
}

impl<'c> FindOne<'c> {
    pub fn new(
        connection: &'c Connection,
        schema: Arc<EntitySchema>,
        primary: impl Into<Value>,
    ) -> Result<Self> {
        let primary_name = schema.require_primary()?.name().to_string();
        let find = Find::new(connection, schema)
            .filter(Condition::eq(primary_name, primary))?
            .limit(1);
        Ok(Self { find })
    }

    pub fn select(mut self, names: &[&str]) -> Result<Self> {
        self.find = self.find.select(names)?;
        Ok(self)
    }

    pub fn associate(mut self, names: &[&str]) -> Result<Self> {
        self.find = self.find.associate(names)?;
        Ok(self)
    }

    pub fn cached(mut self, enable: bool, options: CacheOptions) -> Result<Self> {
        self.find = self.find.cached(enable, options)?;
        Ok(self)
    }
}

impl Query for FindOne<'_> {
    type Output = Option<Entity>;

    fn name(&self) -> &'static str {
        "find_one"
    }

    fn schema(&self) -> &Arc<EntitySchema> {
        self.find.schema()
    }

    fn connection(&self) -> &Connection {
        self.find.connection
    }

    fn execute(&self) -> Result<Option<Entity>> {
        Ok(self.find.execute()?.into_vec().into_iter().next())
    }
}

/// Number of rows matching the conditions.
#[derive(Debug, Clone)]
pub struct Count<'c> {
    connection: &'c Connection,
    schema: Arc<EntitySchema>,
    conditions: Vec<Condition>,
}

impl<'c> Count<'c> {
    pub fn new(connection: &'c Connection, schema: Arc<EntitySchema>) -> Self {
        Self {
            connection,
            schema,
            conditions: Vec::new(),
        }
    }
}

impl Filterable for Count<'_> {
    fn filter_schema(&self) -> &EntitySchema {
        &self.schema
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

impl Query for Count<'_> {
    type Output = u64;

    fn name(&self) -> &'static str {
        "count"
    }

    fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    fn connection(&self) -> &Connection {
        self.connection
    }

    fn execute(&self) -> Result<u64> {
        let (adapter, resource) = self.connection.entity_adapter(&self.schema)?;
        let conditions = self
            .connection
            .mapping(adapter.name())
            .unmap_conditions(&self.schema, &self.conditions)?;
        adapter.count(&resource, &conditions)
    }
}
