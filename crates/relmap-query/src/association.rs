//! Remote association resolution.
//!
//! A remote association lives behind a different adapter than its source
//! entity, so it cannot be embedded by the source adapter's `find`. Each
//! strategy below collects correlation keys from the rows already fetched,
//! issues one batched `find` per hop against the target side, and returns
//! the associated data keyed by correlation value. [`merge`] then attaches
//! it to the source rows; rows without a match are left untouched.

use std::collections::{HashMap, HashSet};

use relmap_core::{
    AssociationInfo, AssociationKind, Condition, FindRequest, Key, Record, Result, Value,
};

use crate::connection::Connection;

/// Associated values keyed by correlation value.
type Associated = HashMap<Key, Value>;

/// Resolve `info` for `rows` and merge the result into them.
#[tracing::instrument(level = "debug", skip(connection, info, rows), fields(association = %info.property, kind = info.kind.name()))]
pub(crate) fn resolve(connection: &Connection, info: &AssociationInfo, rows: &mut [Record]) -> Result<()> {
    let (merge_key, associated) = match &info.kind {
        AssociationKind::ManyToOne { reference_key } => {
            (reference_key.as_str(), by_target_primary(connection, info, rows, reference_key)?)
        }
        AssociationKind::OneToOne { foreign_key } => {
            (foreign_key.as_str(), by_target_primary(connection, info, rows, foreign_key)?)
        }
        AssociationKind::OneToMany { reference_key } => (
            info.source_primary.as_str(),
            one_to_many(connection, info, rows, reference_key)?,
        ),
        AssociationKind::ManyToMany {
            join_key,
            join_resource,
            reference_key,
            ..
        } => (
            info.source_primary.as_str(),
            many_to_many(connection, info, rows, join_key, join_resource, reference_key)?,
        ),
    };
    let merged = merge(rows, merge_key, &info.column, &associated);
    tracing::debug!(
        association = %info.property,
        rows = rows.len(),
        merged = merged,
        "Merged remote association"
    );
    Ok(())
}

/// Distinct non-null values of `column` over `rows`, in first-seen order.
///
/// Values are returned as stored so the target adapter sees the original
/// representation.
pub(crate) fn collect_keys(rows: &[Record], column: &str) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut values = Vec::new();
    for row in rows {
        let Some(value) = row.get(column) else {
            continue;
        };
        if let Some(key) = value.key() {
            if seen.insert(key) {
                values.push(value.clone());
            }
        }
    }
    values
}

/// Attach `associated[row[key_column]]` under `property_column` for every row
/// that has a match. Returns the number of rows that received data.
pub(crate) fn merge(
    rows: &mut [Record],
    key_column: &str,
    property_column: &str,
    associated: &Associated,
) -> usize {
    let mut merged = 0;
    for row in rows.iter_mut() {
        let Some(found) = row.key(key_column).and_then(|key| associated.get(&key)) else {
            continue;
        };
        row.insert(property_column, found.clone());
        merged += 1;
    }
    merged
}

/// Columns of every stored property of the target entity, plus `extra`.
fn target_selection(connection: &Connection, info: &AssociationInfo, extra: &str) -> Result<Vec<String>> {
    let schema = connection.registry().require(&info.target_entity)?;
    let names: Vec<String> = schema.columns().map(|p| p.name().to_string()).collect();
    let mut columns = connection
        .mapping(&info.target_adapter)
        .unmap_selection(&schema, &names)?;
    if !columns.iter().any(|c| c == extra) {
        columns.push(extra.to_string());
    }
    Ok(columns)
}

fn fetch_targets(
    connection: &Connection,
    info: &AssociationInfo,
    column: &str,
    keys: Vec<Value>,
    extra: &str,
) -> Result<Vec<Record>> {
    let adapter = connection.adapter(&info.target_adapter)?;
    let request = FindRequest::new(info.target_resource.clone())
        .select(target_selection(connection, info, extra)?)
        .filter(vec![Condition::any_of(column, keys)]);
    let rows = adapter.find(&request)?;
    tracing::trace!(
        adapter = %info.target_adapter,
        resource = %info.target_resource,
        rows = rows.len(),
        "Fetched association targets"
    );
    Ok(rows)
}

/// ManyToOne and OneToOne: `source[key_column]` holds the target primary.
fn by_target_primary(
    connection: &Connection,
    info: &AssociationInfo,
    rows: &[Record],
    key_column: &str,
) -> Result<Associated> {
    let keys = collect_keys(rows, key_column);
    tracing::debug!(keys = keys.len(), "Resolving targets by primary");
    if keys.is_empty() {
        return Ok(Associated::new());
    }
    let targets = fetch_targets(connection, info, &info.target_primary, keys, &info.target_primary)?;

    let mut associated = Associated::new();
    for target in targets {
        if let Some(key) = target.key(&info.target_primary) {
            associated.entry(key).or_insert(Value::Record(target));
        }
    }
    Ok(associated)
}

/// Target rows whose `reference_key` holds the source primary, grouped by it.
fn one_to_many(
    connection: &Connection,
    info: &AssociationInfo,
    rows: &[Record],
    reference_key: &str,
) -> Result<Associated> {
    let keys = collect_keys(rows, &info.source_primary);
    tracing::debug!(keys = keys.len(), "Resolving one-to-many targets");
    if keys.is_empty() {
        return Ok(Associated::new());
    }
    let targets = fetch_targets(connection, info, reference_key, keys, reference_key)?;

    let mut grouped: HashMap<Key, Vec<Value>> = HashMap::new();
    for target in targets {
        if let Some(key) = target.key(reference_key) {
            grouped.entry(key).or_default().push(Value::Record(target));
        }
    }
    Ok(grouped
        .into_iter()
        .map(|(key, items)| (key, Value::Array(items)))
        .collect())
}

/// Two hops: join rows for the source primaries, then the targets they name.
fn many_to_many(
    connection: &Connection,
    info: &AssociationInfo,
    rows: &[Record],
    join_key: &str,
    join_resource: &str,
    reference_key: &str,
) -> Result<Associated> {
    let keys = collect_keys(rows, &info.source_primary);
    tracing::debug!(keys = keys.len(), join_resource = %join_resource, "Resolving many-to-many targets");
    if keys.is_empty() {
        return Ok(Associated::new());
    }

    let join_adapter = connection.adapter(info.join_adapter())?;
    let request = FindRequest::new(join_resource)
        .select(vec![join_key.to_string(), reference_key.to_string()])
        .filter(vec![Condition::any_of(join_key, keys)]);
    let links = join_adapter.find(&request)?;

    let target_keys = collect_keys(&links, reference_key);
    if target_keys.is_empty() {
        return Ok(Associated::new());
    }
    let targets = fetch_targets(
        connection,
        info,
        &info.target_primary,
        target_keys,
        &info.target_primary,
    )?;
    let by_primary: HashMap<Key, Record> = targets
        .into_iter()
        .filter_map(|t| t.key(&info.target_primary).map(|k| (k, t)))
        .collect();

    let mut grouped: HashMap<Key, Vec<Value>> = HashMap::new();
    for link in &links {
        let (Some(source), Some(target)) = (link.key(join_key), link.key(reference_key)) else {
            continue;
        };
        if let Some(found) = by_primary.get(&target) {
            grouped
                .entry(source)
                .or_default()
                .push(Value::Record(found.clone()));
        }
    }
    Ok(grouped
        .into_iter()
        .map(|(key, items)| (key, Value::Array(items)))
        .collect())
}
