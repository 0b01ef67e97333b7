//! Registered adapters, cache and run hooks shared by every query.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use relmap_core::{
    Adapter, DefaultMapping, EntitySchema, Error, Mapper, Mapping, QueryErrorKind, Result, SchemaRegistry,
};

use crate::builder::QueryBuilder;
use crate::cache::Cache;

/// Identifies a query to run hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryInfo {
    pub name: &'static str,
    pub entity: String,
}

pub type BeforeRunHook = Box<dyn Fn(&QueryInfo) + Send + Sync>;
pub type AfterRunHook = Box<dyn Fn(&QueryInfo, Duration) + Send + Sync>;

/// An executable query.
pub trait Query {
    type Output;

    /// Short query name, e.g. "find".
    fn name(&self) -> &'static str;

    fn schema(&self) -> &Arc<EntitySchema>;

    fn connection(&self) -> &Connection;

    /// Execute without hooks; use [`run`](Query::run).
    fn execute(&self) -> Result<Self::Output>;

    /// Execute through [`Connection::run`].
    fn run(&self) -> Result<Self::Output>
    where
        Self: Sized,
    {
        self.connection().run(self)
    }
}

/// Everything a query needs to execute: schemas, adapters, the mapper and an
/// optional cache.
pub struct Connection {
    registry: Arc<SchemaRegistry>,
    adapters: HashMap<String, Arc<dyn Adapter>>,
    mapper: Mapper,
    cache: Option<Arc<dyn Cache>>,
    before_run: Vec<BeforeRunHook>,
    after_run: Vec<AfterRunHook>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .field("cache", &self.cache.is_some())
            .field("before_run", &self.before_run.len())
            .field("after_run", &self.after_run.len())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn builder(registry: Arc<SchemaRegistry>) -> ConnectionBuilder {
        ConnectionBuilder {
            registry,
            adapters: Vec::new(),
            mappings: Vec::new(),
            cache: None,
            before_run: Vec::new(),
            after_run: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.cache.as_ref()
    }

    /// Adapter registered under `name`.
    pub fn adapter(&self, name: &str) -> Result<&Arc<dyn Adapter>> {
        self.adapters.get(name).ok_or_else(|| {
            Error::query(
                QueryErrorKind::Adapter,
                format!("Adapter with name '{}' not set", name),
            )
        })
    }

    /// Mapping used for the named adapter.
    pub fn mapping(&self, adapter: &str) -> Arc<dyn Mapping> {
        self.mapper
            .mapping(adapter)
            .cloned()
            .unwrap_or_else(|| Arc::new(DefaultMapping))
    }

    /// Adapter and resource an entity is stored in.
    pub fn entity_adapter(&self, schema: &EntitySchema) -> Result<(&Arc<dyn Adapter>, String)> {
        let Some(binding) = schema.adapter_binding() else {
            return Err(Error::query(
                QueryErrorKind::Adapter,
                format!("Entity {} has no adapter defined", schema.name()),
            ));
        };
        Ok((self.adapter(&binding.name)?, binding.resource.clone()))
    }

    /// Start a query on the named entity.
    pub fn query(&self, entity: &str) -> Result<QueryBuilder<'_>> {
        Ok(QueryBuilder::new(self, self.registry.require(entity)?))
    }

    /// Execute a query, calling the run hooks around it.
    pub fn run<Q: Query>(&self, query: &Q) -> Result<Q::Output> {
        let info = QueryInfo {
            name: query.name(),
            entity: query.schema().name().to_string(),
        };
        for hook in &self.before_run {
            hook(&info);
        }
        let start = Instant::now();
        let result = query.execute().map_err(|e| match e {
            Error::Query(q) if q.query.is_none() => Error::Query(q.query(info.name)),
            other => other,
        });
        let elapsed = start.elapsed();
        for hook in &self.after_run {
            hook(&info, elapsed);
        }
        match &result {
            Ok(_) => tracing::debug!(
                query = info.name,
                entity = %info.entity,
                elapsed_us = elapsed.as_micros() as u64,
                "Query executed"
            ),
            Err(e) => tracing::warn!(
                query = info.name,
                entity = %info.entity,
                error = %e,
                "Query failed"
            ),
        }
        result
    }
}

/// Configures a [`Connection`].
pub struct ConnectionBuilder {
    registry: Arc<SchemaRegistry>,
    adapters: Vec<Arc<dyn Adapter>>,
    mappings: Vec<(String, Arc<dyn Mapping>)>,
    cache: Option<Arc<dyn Cache>>,
    before_run: Vec<BeforeRunHook>,
    after_run: Vec<AfterRunHook>,
}

impl ConnectionBuilder {
    pub fn adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Use `mapping` for `adapter` instead of the adapter's own mapping.
    pub fn mapping(mut self, adapter: impl Into<String>, mapping: Arc<dyn Mapping>) -> Self {
        self.mappings.push((adapter.into(), mapping));
        self
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn on_before_run(mut self, hook: impl Fn(&QueryInfo) + Send + Sync + 'static) -> Self {
        self.before_run.push(Box::new(hook));
        self
    }

    pub fn on_after_run(
        mut self,
        hook: impl Fn(&QueryInfo, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.after_run.push(Box::new(hook));
        self
    }

    pub fn build(self) -> Result<Connection> {
        let mut mapper = Mapper::new(Arc::clone(&self.registry));
        let explicit: Vec<String> = self.mappings.iter().map(|(name, _)| name.clone()).collect();
        for (adapter, mapping) in self.mappings {
            mapper.register_adapter_mapping(adapter, mapping)?;
        }

        let mut adapters = HashMap::new();
        for adapter in self.adapters {
            let name = adapter.name().to_string();
            if adapters.contains_key(&name) {
                return Err(Error::InvalidArgument(format!(
                    "Adapter with name '{}' already registered",
                    name
                )));
            }
            if !explicit.contains(&name) {
                mapper.register_adapter_mapping(name.clone(), adapter.mapping())?;
            }
            tracing::info!(adapter = %name, "Adapter registered");
            adapters.insert(name, adapter);
        }

        Ok(Connection {
            registry: self.registry,
            adapters,
            mapper,
            cache: self.cache,
            before_run: self.before_run,
            after_run: self.after_run,
        })
    }
}
