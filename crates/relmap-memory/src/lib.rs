//! In-memory storage adapter for relmap.
//!
//! `MemoryAdapter` keeps one ordered table of [`Record`] rows per resource
//! and implements the whole [`Adapter`] contract against them: every
//! [`Operator`](relmap_core::Operator), grouped conditions, ordering,
//! pagination and embedding of local associations. It is meant for tests,
//! prototypes and as a reference for adapter authors.
//!
//! ```
//! use relmap_core::{Adapter, Condition, FindRequest, Record};
//! use relmap_memory::MemoryAdapter;
//!
//! let adapter = MemoryAdapter::new("memory");
//! let id = adapter.insert("heroes", Record::new().with("name", "Ada")).unwrap();
//! assert_eq!(id.as_i64(), Some(1));
//!
//! let rows = adapter
//!     .find(&FindRequest::new("heroes").filter(vec![Condition::eq("name", "Ada")]))
//!     .unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

mod embed;
mod eval;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use relmap_core::{
    Adapter, Condition, DefaultMapping, Error, FindRequest, Mapping, PrimaryKey, Record, Result,
    Value,
};

const DEFAULT_PRIMARY: &str = "id";

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Record>,
    next_id: i64,
}

impl Table {
    fn observe_primary(&mut self, value: &Value) {
        if let Some(id) = value.as_i64() {
            self.next_id = self.next_id.max(id);
        }
    }
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Table>,
}

/// Adapter storing rows in process memory.
pub struct MemoryAdapter {
    name: String,
    default_primary: String,
    primaries: HashMap<String, String>,
    mapping: Arc<dyn Mapping>,
    state: Mutex<State>,
}

impl fmt::Debug for MemoryAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAdapter")
            .field("name", &self.name)
            .field("default_primary", &self.default_primary)
            .field("primaries", &self.primaries)
            .finish_non_exhaustive()
    }
}

impl MemoryAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_primary: DEFAULT_PRIMARY.to_string(),
            primaries: HashMap::new(),
            mapping: Arc::new(DefaultMapping),
            state: Mutex::new(State::default()),
        }
    }

    /// Primary column for resources without an explicit one (default `id`).
    pub fn primary_column(mut self, column: impl Into<String>) -> Self {
        self.default_primary = column.into();
        self
    }

    /// Primary column of one resource.
    pub fn resource_primary(mut self, resource: impl Into<String>, column: impl Into<String>) -> Self {
        self.primaries.insert(resource.into(), column.into());
        self
    }

    /// Mapping entities bound to this adapter go through.
    pub fn with_mapping(mut self, mapping: Arc<dyn Mapping>) -> Self {
        self.mapping = mapping;
        self
    }

    /// Store rows as-is, keeping auto-increment ahead of their primaries.
    pub fn seed(self, resource: &str, rows: Vec<Record>) -> Self {
        {
            let primary = self.primary_of(resource).to_string();
            let mut state = self.state();
            let table = state.tables.entry(resource.to_string()).or_default();
            for row in rows {
                if let Some(value) = row.get(&primary) {
                    table.observe_primary(value);
                }
                table.rows.push(row);
            }
        }
        self
    }

    /// Snapshot of every row stored for `resource`.
    pub fn rows(&self, resource: &str) -> Vec<Record> {
        self.state()
            .tables
            .get(resource)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    fn primary_of(&self, resource: &str) -> &str {
        self.primaries
            .get(resource)
            .map_or(self.default_primary.as_str(), String::as_str)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn merge_values(row: &mut Record, values: &Record) {
    for (column, value) in values.iter() {
        row.insert(column, value.clone());
    }
}

impl Adapter for MemoryAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn mapping(&self) -> Arc<dyn Mapping> {
        Arc::clone(&self.mapping)
    }

    fn find(&self, request: &FindRequest) -> Result<Vec<Record>> {
        let state = self.state();
        let stored = state
            .tables
            .get(&request.resource)
            .map_or(&[][..], |t| t.rows.as_slice());

        let mut rows: Vec<Record> = stored
            .iter()
            .filter(|row| eval::matches_all(row, &request.conditions))
            .cloned()
            .collect();
        eval::sort(&mut rows, &request.order_by);
        let mut rows: Vec<Record> = rows
            .into_iter()
            .skip(request.offset.unwrap_or(0))
            .take(request.limit.unwrap_or(usize::MAX))
            .collect();

        let table = |resource: &str| {
            state
                .tables
                .get(resource)
                .map_or(&[][..], |t| t.rows.as_slice())
        };
        for info in &request.associations {
            embed::embed(table, info, &mut rows);
        }

        if !request.selection.is_empty() {
            let mut columns = request.selection.clone();
            columns.extend(request.associations.iter().map(|a| a.column.clone()));
            rows = rows.iter().map(|row| row.project(&columns)).collect();
        }
        tracing::trace!(
            adapter = %self.name,
            resource = %request.resource,
            rows = rows.len(),
            associations = request.associations.len(),
            "find"
        );
        Ok(rows)
    }

    fn count(&self, resource: &str, conditions: &[Condition]) -> Result<u64> {
        let state = self.state();
        let count = state.tables.get(resource).map_or(0, |t| {
            t.rows
                .iter()
                .filter(|row| eval::matches_all(row, conditions))
                .count()
        });
        Ok(count as u64)
    }

    fn insert(&self, resource: &str, mut values: Record) -> Result<Value> {
        let primary = self.primary_of(resource).to_string();
        let mut state = self.state();
        let table = state.tables.entry(resource.to_string()).or_default();

        let id = match values.get(&primary) {
            Some(value) if !value.is_empty() => {
                if table
                    .rows
                    .iter()
                    .any(|row| row.get(&primary).is_some_and(|v| v.loosely_equals(value)))
                {
                    return Err(Error::adapter(
                        &self.name,
                        format!("Duplicate primary {:?} in {}", value, resource),
                    ));
                }
                value.clone()
            }
            _ => Value::BigInt(table.next_id + 1),
        };
        table.observe_primary(&id);
        values.insert(primary.as_str(), id.clone());
        table.rows.push(values);
        tracing::trace!(adapter = %self.name, resource = %resource, primary = ?id, "insert");
        Ok(id)
    }

    fn update(&self, resource: &str, values: Record, conditions: &[Condition]) -> Result<u64> {
        let mut state = self.state();
        let Some(table) = state.tables.get_mut(resource) else {
            return Ok(0);
        };
        let mut changed = 0;
        for row in table
            .rows
            .iter_mut()
            .filter(|row| eval::matches_all(row, conditions))
        {
            merge_values(row, &values);
            changed += 1;
        }
        tracing::trace!(adapter = %self.name, resource = %resource, rows = changed, "update");
        Ok(changed)
    }

    fn update_one(&self, resource: &str, primary: &PrimaryKey, values: Record) -> Result<bool> {
        let mut state = self.state();
        let Some(row) = state.tables.get_mut(resource).and_then(|t| {
            t.rows.iter_mut().find(|row| {
                row.get(&primary.column)
                    .is_some_and(|v| v.loosely_equals(&primary.value))
            })
        }) else {
            return Ok(false);
        };
        merge_values(row, &values);
        Ok(true)
    }

    fn delete(&self, resource: &str, conditions: &[Condition]) -> Result<u64> {
        let mut state = self.state();
        let Some(table) = state.tables.get_mut(resource) else {
            return Ok(0);
        };
        let before = table.rows.len();
        table.rows.retain(|row| !eval::matches_all(row, conditions));
        let removed = (before - table.rows.len()) as u64;
        tracing::trace!(adapter = %self.name, resource = %resource, rows = removed, "delete");
        Ok(removed)
    }

    fn delete_one(&self, resource: &str, primary: &PrimaryKey) -> Result<bool> {
        let mut state = self.state();
        let Some(table) = state.tables.get_mut(resource) else {
            return Ok(false);
        };
        let position = table.rows.iter().position(|row| {
            row.get(&primary.column)
                .is_some_and(|v| v.loosely_equals(&primary.value))
        });
        match position {
            Some(index) => {
                table.rows.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_core::{
        AssociationInfo, AssociationKind, Direction, Operator, OrderBy, SchemaRegistry,
        EntitySchema, Property,
    };

    fn heroes() -> MemoryAdapter {
        MemoryAdapter::new("memory")
            .seed(
                "heroes",
                vec![
                    Record::new().with("id", 1).with("name", "Ada").with("age", 36).with("team_id", 7),
                    Record::new().with("id", 2).with("name", "Grace").with("age", 85).with("team_id", 7),
                    Record::new().with("id", 3).with("name", "Linus").with("age", 54).with("team_id", 8),
                    Record::new().with("id", 4).with("name", "Ken").with("age", 81),
                ],
            )
            .seed(
                "teams",
                vec![
                    Record::new().with("id", 7).with("name", "Pioneers"),
                    Record::new().with("id", 8).with("name", "Kernel"),
                ],
            )
            .seed(
                "powers",
                vec![
                    Record::new().with("id", 10).with("name", "math"),
                    Record::new().with("id", 11).with("name", "compilers"),
                ],
            )
            .seed(
                "hero_powers",
                vec![
                    Record::new().with("hero_id", 1).with("power_id", 10),
                    Record::new().with("hero_id", 2).with("power_id", 11),
                    Record::new().with("hero_id", 2).with("power_id", 10),
                ],
            )
    }

    fn ids(rows: &[Record]) -> Vec<i64> {
        rows.iter()
            .filter_map(|r| r.get("id").and_then(Value::as_i64))
            .collect()
    }

    fn associations() -> std::sync::Arc<SchemaRegistry> {
        SchemaRegistry::builder()
            .entity(
                EntitySchema::new("Hero")
                    .adapter("memory", "heroes")
                    .property(Property::integer("id").primary())
                    .property(Property::string("name"))
                    .property(Property::integer("team_id"))
                    .property(Property::many_to_one("team", "Team", "team_id"))
                    .property(Property::many_to_many("powers", "Power", "hero_id", "hero_powers", "power_id")),
            )
            .entity(
                EntitySchema::new("Team")
                    .adapter("memory", "teams")
                    .property(Property::integer("id").primary())
                    .property(Property::string("name"))
                    .property(Property::one_to_many("members", "Hero", "team_id")),
            )
            .entity(
                EntitySchema::new("Power")
                    .adapter("memory", "powers")
                    .property(Property::integer("id").primary())
                    .property(Property::string("name")),
            )
            .build()
            .unwrap()
    }

    fn info(entity: &str, property: &str) -> AssociationInfo {
        associations().association(entity, property).unwrap().clone()
    }

    #[test]
    fn insert_assigns_increasing_primaries() {
        let adapter = heroes();
        let id = adapter.insert("heroes", Record::new().with("name", "Barbara")).unwrap();
        assert_eq!(id, Value::BigInt(5));
        let id = adapter
            .insert("heroes", Record::new().with("id", 40).with("name", "Dennis"))
            .unwrap();
        assert_eq!(id, Value::BigInt(40));
        let id = adapter.insert("heroes", Record::new().with("name", "Bjarne")).unwrap();
        assert_eq!(id, Value::BigInt(41));

        let err = adapter
            .insert("heroes", Record::new().with("id", 1))
            .unwrap_err();
        assert!(matches!(err, Error::Adapter(_)));
    }

    #[test]
    fn custom_primary_column() {
        let adapter = MemoryAdapter::new("memory")
            .primary_column("uid")
            .resource_primary("tags", "tag");
        assert_eq!(adapter.insert("users", Record::new()).unwrap(), Value::BigInt(1));
        assert!(adapter.rows("users")[0].contains("uid"));
        adapter.insert("tags", Record::new().with("tag", "rust")).unwrap();
        assert_eq!(adapter.rows("tags")[0].get("tag"), Some(&Value::Text("rust".into())));
    }

    #[test]
    fn find_filters_sorts_and_paginates() {
        let adapter = heroes();
        let mut request = FindRequest::new("heroes").filter(vec![
            Condition::new("age", Operator::Gt, 40),
            Condition::new("name", Operator::Like, "%a%").or(),
        ]);
        request.order_by = vec![OrderBy::desc("age")];
        assert_eq!(ids(&adapter.find(&request).unwrap()), vec![2, 4, 3, 1]);

        request.offset = Some(1);
        request.limit = Some(2);
        assert_eq!(ids(&adapter.find(&request).unwrap()), vec![4, 3]);

        let request = FindRequest::new("heroes")
            .select(vec!["name".into()])
            .filter(vec![Condition::new("team_id", Operator::IsNull, Value::Null)]);
        let rows = adapter.find(&request).unwrap();
        assert_eq!(rows, vec![Record::new().with("name", "Ken")]);

        assert!(adapter.find(&FindRequest::new("nothing")).unwrap().is_empty());
    }

    #[test]
    fn count_update_and_delete() {
        let adapter = heroes();
        let team = [Condition::eq("team_id", 7)];
        assert_eq!(adapter.count("heroes", &team).unwrap(), 2);

        let changed = adapter
            .update("heroes", Record::new().with("team_id", 9), &team)
            .unwrap();
        assert_eq!(changed, 2);
        assert_eq!(adapter.count("heroes", &team).unwrap(), 0);

        let key = PrimaryKey::new("id", 3);
        assert!(adapter.update_one("heroes", &key, Record::new().with("age", 55)).unwrap());
        assert!(!adapter
            .update_one("heroes", &PrimaryKey::new("id", 30), Record::new())
            .unwrap());
        let rows = adapter
            .find(&FindRequest::new("heroes").filter(vec![Condition::eq("id", 3)]))
            .unwrap();
        assert_eq!(rows[0].get("age"), Some(&Value::BigInt(55)));

        assert_eq!(
            adapter
                .delete("heroes", &[Condition::new("age", Operator::Gte, 80)])
                .unwrap(),
            2
        );
        assert!(adapter.delete_one("heroes", &key).unwrap());
        assert!(!adapter.delete_one("heroes", &key).unwrap());
        assert_eq!(ids(&adapter.rows("heroes")), vec![1]);
    }

    #[test]
    fn embeds_single_and_many_associations() {
        let adapter = heroes();
        let mut request = FindRequest::new("heroes").select(vec!["id".into(), "name".into()]);
        request.associations = vec![info("Hero", "team"), info("Hero", "powers")];
        request.order_by = vec![OrderBy {
            name: "id".into(),
            direction: Direction::Asc,
        }];
        let rows = adapter.find(&request).unwrap();

        let team = rows[0].get("team").and_then(Value::as_record).unwrap();
        assert_eq!(team.get("name"), Some(&Value::Text("Pioneers".into())));
        // projection keeps associations but drops unselected columns
        assert!(!rows[0].contains("team_id"));
        assert!(!rows[3].contains("team"));

        let powers: Vec<_> = rows[1]
            .get("powers")
            .and_then(Value::as_array)
            .unwrap()
            .iter()
            .filter_map(|p| p.as_record().and_then(|r| r.get("id")).and_then(Value::as_i64))
            .collect();
        assert_eq!(powers, vec![11, 10]);
        assert!(!rows[2].contains("powers"));
    }

    #[test]
    fn embeds_one_to_many() {
        let adapter = heroes();
        let mut request = FindRequest::new("teams");
        request.associations = vec![info("Team", "members")];
        let rows = adapter.find(&request).unwrap();
        let members = rows[0].get("members").and_then(Value::as_array).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(
            rows[1].get("members").and_then(Value::as_array).map(<[Value]>::len),
            Some(1)
        );
        assert!(matches!(info("Team", "members").kind, AssociationKind::OneToMany { .. }));
    }
}
