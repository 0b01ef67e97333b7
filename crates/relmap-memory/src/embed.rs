//! Local association embedding.
//!
//! Source and target share this adapter, so every lookup is a scan of the
//! stored tables rather than a separate round trip.

use std::collections::HashMap;

use relmap_core::{AssociationInfo, AssociationKind, Key, Record, Value};

fn index_by<'a>(rows: &'a [Record], column: &str) -> HashMap<Key, &'a Record> {
    let mut index = HashMap::new();
    for row in rows {
        if let Some(key) = row.key(column) {
            index.entry(key).or_insert(row);
        }
    }
    index
}

fn group_by(rows: &[Record], column: &str) -> HashMap<Key, Vec<Value>> {
    let mut groups: HashMap<Key, Vec<Value>> = HashMap::new();
    for row in rows {
        if let Some(key) = row.key(column) {
            groups
                .entry(key)
                .or_default()
                .push(Value::Record(row.clone()));
        }
    }
    groups
}

/// Attach `info` to every row that has associated data. `table` looks up
/// stored rows by resource; a missing resource counts as empty.
pub(crate) fn embed<'t>(
    table: impl Fn(&str) -> &'t [Record],
    info: &AssociationInfo,
    rows: &mut [Record],
) {
    let targets = table(&info.target_resource);
    let (key_column, associated): (&str, HashMap<Key, Value>) = match &info.kind {
        AssociationKind::ManyToOne { reference_key: key }
        | AssociationKind::OneToOne { foreign_key: key } => {
            let index = index_by(targets, &info.target_primary);
            let associated = index
                .into_iter()
                .map(|(k, row)| (k, Value::Record(row.clone())))
                .collect();
            (key.as_str(), associated)
        }
        AssociationKind::OneToMany { reference_key } => {
            let associated = group_by(targets, reference_key)
                .into_iter()
                .map(|(k, items)| (k, Value::Array(items)))
                .collect();
            (info.source_primary.as_str(), associated)
        }
        AssociationKind::ManyToMany {
            join_key,
            join_resource,
            reference_key,
            ..
        } => {
            let index = index_by(targets, &info.target_primary);
            let mut grouped: HashMap<Key, Vec<Value>> = HashMap::new();
            for link in table(join_resource) {
                let (Some(source), Some(target)) = (link.key(join_key), link.key(reference_key))
                else {
                    continue;
                };
                if let Some(found) = index.get(&target) {
                    grouped
                        .entry(source)
                        .or_default()
                        .push(Value::Record((*found).clone()));
                }
            }
            let associated = grouped
                .into_iter()
                .map(|(k, items)| (k, Value::Array(items)))
                .collect();
            (info.source_primary.as_str(), associated)
        }
    };

    for row in rows.iter_mut() {
        if let Some(found) = row.key(key_column).and_then(|k| associated.get(&k)) {
            row.insert(info.column.as_str(), found.clone());
        }
    }
}
