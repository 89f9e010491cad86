//! Structural diff between two snapshots.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{FieldDescriptor, IndexDescriptor, SchemaDescriptor, Snapshot};

/// A field present on both sides whose shape changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub from: FieldDescriptor,
    pub to: FieldDescriptor,
}

/// Changes to one entity present in both snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDiff {
    /// Collection of the current descriptor.
    pub collection: String,
    #[serde(skip_serializing_if = "IndexMap::is_empty", default)]
    pub added_fields: IndexMap<String, FieldDescriptor>,
    #[serde(skip_serializing_if = "IndexMap::is_empty", default)]
    pub removed_fields: IndexMap<String, FieldDescriptor>,
    #[serde(skip_serializing_if = "IndexMap::is_empty", default)]
    pub modified_fields: IndexMap<String, FieldChange>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub added_indexes: Vec<IndexDescriptor>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub removed_indexes: Vec<IndexDescriptor>,
}

impl EntityDiff {
    pub fn is_empty(&self) -> bool {
        self.added_fields.is_empty()
            && self.removed_fields.is_empty()
            && self.modified_fields.is_empty()
            && self.added_indexes.is_empty()
            && self.removed_indexes.is_empty()
    }

    fn invert(&self) -> EntityDiff {
        EntityDiff {
            collection: self.collection.clone(),
            added_fields: self.removed_fields.clone(),
            removed_fields: self.added_fields.clone(),
            modified_fields: self
                .modified_fields
                .iter()
                .map(|(name, change)| {
                    (
                        name.clone(),
                        FieldChange {
                            from: change.to.clone(),
                            to: change.from.clone(),
                        },
                    )
                })
                .collect(),
            added_indexes: self.removed_indexes.clone(),
            removed_indexes: self.added_indexes.clone(),
        }
    }
}

/// Difference between a current and a previous snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDiff {
    /// Entities only in the current snapshot.
    pub added: BTreeMap<String, SchemaDescriptor>,
    /// Entities only in the previous snapshot.
    pub removed: BTreeMap<String, SchemaDescriptor>,
    /// Entities in both with a non-empty delta.
    pub modified: BTreeMap<String, EntityDiff>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// The diff obtained by swapping current and previous.
    pub fn invert(&self) -> SchemaDiff {
        SchemaDiff {
            added: self.removed.clone(),
            removed: self.added.clone(),
            modified: self
                .modified
                .iter()
                .map(|(name, delta)| (name.clone(), delta.invert()))
                .collect(),
        }
    }

    /// Human readable, one line per change.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (name, schema) in &self.added {
            let _ = writeln!(out, "+ entity {} ({} fields)", name, schema.fields.len());
        }
        for name in self.removed.keys() {
            let _ = writeln!(out, "- entity {}", name);
        }
        for (name, delta) in &self.modified {
            for (field, descriptor) in &delta.added_fields {
                let _ = writeln!(out, "+ {}.{}: {}", name, field, descriptor);
            }
            for field in delta.removed_fields.keys() {
                let _ = writeln!(out, "- {}.{}", name, field);
            }
            for (field, change) in &delta.modified_fields {
                let _ = writeln!(out, "~ {}.{}: {} => {}", name, field, change.from, change.to);
            }
            for index in &delta.added_indexes {
                let _ = writeln!(out, "+ {} index {}", name, index);
            }
            for index in &delta.removed_indexes {
                let _ = writeln!(out, "- {} index {}", name, index);
            }
        }
        out
    }
}

/// Compute the diff from `previous` to `current`.
///
/// With no previous snapshot every current entity is reported as added.
pub fn diff_snapshots(current: &Snapshot, previous: Option<&Snapshot>) -> SchemaDiff {
    let empty = Snapshot::new();
    let previous = previous.unwrap_or(&empty);
    let mut diff = SchemaDiff::default();

    for schema in current.entities() {
        match previous.get(&schema.entity_name) {
            None => {
                diff.added.insert(schema.entity_name.clone(), schema.clone());
            }
            Some(before) => {
                let delta = diff_entity(before, schema);
                if !delta.is_empty() {
                    diff.modified.insert(schema.entity_name.clone(), delta);
                }
            }
        }
    }

    for schema in previous.entities() {
        if !current.contains(&schema.entity_name) {
            diff.removed.insert(schema.entity_name.clone(), schema.clone());
        }
    }

    diff
}

fn diff_entity(before: &SchemaDescriptor, after: &SchemaDescriptor) -> EntityDiff {
    let mut delta = EntityDiff {
        collection: after.collection_name(),
        ..EntityDiff::default()
    };

    for (name, field) in &after.fields {
        match before.fields.get(name) {
            None => {
                delta.added_fields.insert(name.clone(), field.clone());
            }
            Some(old) if !old.same_shape(field) => {
                delta.modified_fields.insert(
                    name.clone(),
                    FieldChange {
                        from: old.clone(),
                        to: field.clone(),
                    },
                );
            }
            Some(_) => {}
        }
    }

    for (name, field) in &before.fields {
        if !after.fields.contains_key(name) {
            delta.removed_fields.insert(name.clone(), field.clone());
        }
    }

    delta.added_indexes = index_difference(&after.indexes, &before.indexes);
    delta.removed_indexes = index_difference(&before.indexes, &after.indexes);

    delta
}

/// Indexes in `left` with no equal index in `right`, sorted by signature.
fn index_difference(left: &[IndexDescriptor], right: &[IndexDescriptor]) -> Vec<IndexDescriptor> {
    let mut out: Vec<IndexDescriptor> = left
        .iter()
        .filter(|index| !right.contains(index))
        .cloned()
        .collect();
    out.sort_by_key(|index| (index.signature_key(), index.options.unique));
    out.dedup();
    out
}
