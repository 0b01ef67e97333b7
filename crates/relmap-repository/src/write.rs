//! Association write-through.
//!
//! After the owning entity is stored, the pending changes of each of its
//! associations are replayed against the adapters involved. There is no
//! transaction across adapters: every change is applied as soon as it is
//! reached and the first failure stops the replay. [`Written`] tracks how
//! far the replay got so the unwritten rest can be kept on the entity.

use std::sync::Arc;

use relmap_core::{
    Adapter, AssociationInfo, AssociationKind, Changes, Condition, Entity, EntitySchema, Error,
    PrimaryKey, Record, Result, Validator, Value,
};
use relmap_query::Connection;

/// Join-resource operation of a ManyToMany association.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LinkOp {
    Link { source: Value, target: Value },
    Unlink { source: Value, target: Value },
}

impl LinkOp {
    fn execute(
        &self,
        adapter: &dyn Adapter,
        resource: &str,
        join_key: &str,
        reference_key: &str,
    ) -> Result<()> {
        match self {
            LinkOp::Link { source, target } => {
                let values = Record::new()
                    .with(join_key, source.clone())
                    .with(reference_key, target.clone());
                adapter.insert(resource, values)?;
            }
            LinkOp::Unlink { source, target } => {
                let conditions = [
                    Condition::eq(join_key, source.clone()),
                    Condition::eq(reference_key, target.clone()),
                ];
                adapter.delete(resource, &conditions)?;
            }
        }
        Ok(())
    }
}

/// Number of entries of each change list already written.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Written {
    pub attached: usize,
    pub detached: usize,
    pub added: usize,
    pub removed: usize,
}

impl Written {
    /// Entries of `changes` not written yet.
    pub(crate) fn remaining(&self, changes: &Changes) -> Result<Changes> {
        let mut rest = Changes::new(changes.entity());
        for primary in changes.attached().iter().skip(self.attached) {
            rest.attach(primary.clone())?;
        }
        for primary in changes.detached().iter().skip(self.detached) {
            rest.detach(primary.clone())?;
        }
        for target in changes.added().iter().skip(self.added) {
            rest.add(target.clone())?;
        }
        for primary in changes.removed().iter().skip(self.removed) {
            rest.remove(primary.clone())?;
        }
        Ok(rest)
    }
}

/// Replays association changes of one source entity.
pub(crate) struct AssociationWriter<'a> {
    pub connection: &'a Connection,
    pub validator: Option<&'a Arc<dyn Validator>>,
}

impl AssociationWriter<'_> {
    /// Apply `changes` of `info` for `entity`, whose primary is already stored.
    ///
    /// `written` counts the entries that reached storage, also on failure.
    pub(crate) fn apply(
        &self,
        entity: &mut Entity,
        info: &AssociationInfo,
        changes: &Changes,
        written: &mut Written,
    ) -> Result<()> {
        tracing::info!(
            entity = %info.source_entity,
            association = %info.property,
            kind = info.kind.name(),
            attach_count = changes.attached().len(),
            detach_count = changes.detached().len(),
            add_count = changes.added().len(),
            remove_count = changes.removed().len(),
            "Writing association changes"
        );
        let source = self.source_primary(entity, info)?;
        match &info.kind {
            AssociationKind::ManyToMany {
                join_key,
                join_resource,
                reference_key,
                ..
            } => self.many_to_many(
                info,
                &source,
                changes,
                written,
                (join_key.as_str(), join_resource.as_str(), reference_key.as_str()),
            ),
            AssociationKind::OneToMany { reference_key } => {
                self.one_to_many(info, &source, changes, written, reference_key)
            }
            AssociationKind::ManyToOne { reference_key: key }
            | AssociationKind::OneToOne { foreign_key: key } => {
                self.key_on_source(entity, info, &source, changes, written, key)
            }
        }
    }

    fn source_primary(&self, entity: &Entity, info: &AssociationInfo) -> Result<Value> {
        let schema = entity.schema();
        let property = schema.require_primary()?;
        let Some(value) = entity.primary_value().filter(|v| !v.is_empty()) else {
            return Err(Error::InvalidArgument(format!(
                "Entity {} must have a primary value to write association '{}'",
                schema.name(),
                info.property
            )));
        };
        self.connection
            .mapping(&info.source_adapter)
            .unmap_value(property, value)
    }

    fn target_schema(&self, info: &AssociationInfo) -> Result<Arc<EntitySchema>> {
        self.connection.registry().require(&info.target_entity)
    }

    /// Target primary as the target adapter stores it.
    fn target_key(&self, info: &AssociationInfo, primary: &Value) -> Result<PrimaryKey> {
        let schema = self.target_schema(info)?;
        let property = schema.require_primary()?;
        let value = self
            .connection
            .mapping(&info.target_adapter)
            .unmap_value(property, primary.clone())?;
        Ok(PrimaryKey::new(property.mapped_name(), value))
    }

    /// Store a new target, optionally with an extra column, and return its
    /// primary in adapter form.
    fn insert_target(&self, info: &AssociationInfo, target: &Entity, extra: Option<(&str, &Value)>) -> Result<Value> {
        if let Some(validator) = self.validator {
            validator.validate(target)?;
        }
        let mut values = self.connection.mapper().unmap_entity(target)?;
        let schema = target.schema();
        if let Some(primary) = schema.primary() {
            if values.get(primary.mapped_name()).is_none_or(Value::is_empty) {
                values.remove(primary.mapped_name());
            }
        }
        if let Some((column, value)) = extra {
            values.insert(column, value.clone());
        }
        let adapter = self.connection.adapter(&info.target_adapter)?;
        adapter.insert(&info.target_resource, values)
    }

    fn many_to_many(
        &self,
        info: &AssociationInfo,
        source: &Value,
        changes: &Changes,
        written: &mut Written,
        (join_key, join_resource, reference_key): (&str, &str, &str),
    ) -> Result<()> {
        let join = self.connection.adapter(info.join_adapter())?;
        let target_adapter = self.connection.adapter(&info.target_adapter)?;
        let link = |target: PrimaryKey| LinkOp::Link {
            source: source.clone(),
            target: target.value,
        };
        let unlink = |target: &PrimaryKey| LinkOp::Unlink {
            source: source.clone(),
            target: target.value.clone(),
        };

        for primary in changes.attached() {
            link(self.target_key(info, primary)?).execute(&**join, join_resource, join_key, reference_key)?;
            written.attached += 1;
        }
        for primary in changes.detached() {
            unlink(&self.target_key(info, primary)?).execute(&**join, join_resource, join_key, reference_key)?;
            written.detached += 1;
        }
        for target in changes.added() {
            let id = self.insert_target(info, target, None)?;
            LinkOp::Link {
                source: source.clone(),
                target: id,
            }
            .execute(&**join, join_resource, join_key, reference_key)?;
            written.added += 1;
        }
        for primary in changes.removed() {
            let key = self.target_key(info, primary)?;
            unlink(&key).execute(&**join, join_resource, join_key, reference_key)?;
            target_adapter.delete_one(&info.target_resource, &key)?;
            written.removed += 1;
        }
        Ok(())
    }

    fn one_to_many(
        &self,
        info: &AssociationInfo,
        source: &Value,
        changes: &Changes,
        written: &mut Written,
        reference_key: &str,
    ) -> Result<()> {
        let adapter = self.connection.adapter(&info.target_adapter)?;
        let set_reference = |key: &PrimaryKey, value: Value| -> Result<bool> {
            adapter.update_one(
                &info.target_resource,
                key,
                Record::new().with(reference_key, value),
            )
        };

        for primary in changes.attached() {
            set_reference(&self.target_key(info, primary)?, source.clone())?;
            written.attached += 1;
        }
        for primary in changes.detached() {
            set_reference(&self.target_key(info, primary)?, Value::Null)?;
            written.detached += 1;
        }
        for target in changes.added() {
            self.insert_target(info, target, Some((reference_key, source)))?;
            written.added += 1;
        }
        for primary in changes.removed() {
            adapter.delete_one(&info.target_resource, &self.target_key(info, primary)?)?;
            written.removed += 1;
        }
        Ok(())
    }

    /// ManyToOne and OneToOne: the link lives in `key` on the source row.
    fn key_on_source(
        &self,
        entity: &mut Entity,
        info: &AssociationInfo,
        source: &Value,
        changes: &Changes,
        written: &mut Written,
        key: &str,
    ) -> Result<()> {
        let source_adapter = self.connection.adapter(&info.source_adapter)?;
        let source_key = PrimaryKey::new(info.source_primary.clone(), source.clone());
        let link = |entity: &mut Entity, value: Value| -> Result<()> {
            source_adapter.update_one(
                &info.source_resource,
                &source_key,
                Record::new().with(key, value.clone()),
            )?;
            self.sync_key(entity, info, key, value)
        };

        for primary in changes.attached() {
            link(entity, self.target_key(info, primary)?.value)?;
            written.attached += 1;
        }
        if !changes.detached().is_empty() {
            link(entity, Value::Null)?;
            written.detached = changes.detached().len();
        }
        for target in changes.added() {
            let id = self.insert_target(info, target, None)?;
            link(entity, id)?;
            written.added += 1;
        }
        if !changes.removed().is_empty() {
            let adapter = self.connection.adapter(&info.target_adapter)?;
            for primary in changes.removed() {
                adapter.delete_one(&info.target_resource, &self.target_key(info, primary)?)?;
            }
            link(entity, Value::Null)?;
            written.removed = changes.removed().len();
        }
        Ok(())
    }

    /// Mirror a stored key column into the entity so later writes keep it.
    fn sync_key(&self, entity: &mut Entity, info: &AssociationInfo, column: &str, value: Value) -> Result<()> {
        let schema = Arc::clone(entity.schema());
        let Some(property) = schema.property_for_column(column) else {
            return Ok(());
        };
        if property.is_read_only() || !property.is_column() {
            return Ok(());
        }
        let mapped = self.connection.mapper().map_value(&schema, property, value)?;
        tracing::trace!(association = %info.property, column = %column, "Mirroring key");
        match mapped {
            Some(mapped) => entity.set(property.name(), mapped),
            None => entity.unset(property.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_ops_carry_both_keys() {
        let link = LinkOp::Link {
            source: Value::BigInt(1),
            target: Value::BigInt(10),
        };
        let unlink = LinkOp::Unlink {
            source: Value::BigInt(1),
            target: Value::BigInt(10),
        };
        assert_ne!(link, unlink);
        assert!(matches!(link, LinkOp::Link { ref target, .. } if *target == Value::BigInt(10)));
    }

    #[test]
    fn remaining_skips_written_entries() {
        let mut changes = Changes::new("Power");
        changes.attach(10).unwrap();
        changes.attach(11).unwrap();
        changes.detach(12).unwrap();
        changes.remove(13).unwrap();

        let written = Written {
            attached: 1,
            ..Written::default()
        };
        let rest = written.remaining(&changes).unwrap();
        assert_eq!(rest.entity(), "Power");
        assert_eq!(rest.attached(), &[Value::BigInt(11)]);
        assert_eq!(rest.detached(), &[Value::BigInt(12)]);
        assert_eq!(rest.removed(), &[Value::BigInt(13)]);

        let all = Written {
            attached: 2,
            detached: 1,
            added: 0,
            removed: 1,
        };
        assert!(all.remaining(&changes).unwrap().is_empty());
    }
}
