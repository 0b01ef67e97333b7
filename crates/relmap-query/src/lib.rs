//! Query building and execution for relmap.
//!
//! A [`Connection`] holds the registered adapters, the [`Mapper`] and an
//! optional [`Cache`]. Queries are created per entity through
//! [`Connection::query`] and executed with [`Query::run`]:
//!
//! - [`Find`], [`FindOne`] and [`Count`] read rows
//! - [`Insert`], [`Update`], [`UpdateOne`], [`Delete`] and [`DeleteOne`] write them
//!
//! `Find` resolves requested associations. Local ones are embedded by the
//! entity's own adapter; remote ones are fetched from the target adapter in
//! one batched call per association and merged into the rows by key.
//!
//! [`Mapper`]: relmap_core::Mapper

mod association;
pub mod builder;
pub mod cache;
pub mod connection;
pub mod filter;
pub mod find;
pub mod modify;

pub use builder::QueryBuilder;
pub use cache::{Cache, CacheOptions, MemoryCache, TAG_QUERY};
pub use connection::{AfterRunHook, BeforeRunHook, Connection, ConnectionBuilder, Query, QueryInfo};
pub use filter::Filterable;
pub use find::{Count, Find, FindOne};
pub use modify::{Delete, DeleteOne, Insert, Update, UpdateOne};
