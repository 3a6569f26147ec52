//! Declared indexes and their reconciliation against the store.

use indexmap::IndexMap;

use crate::{
    backend::{ID_INDEX, IndexSpec},
    class::{ClassDef, FieldKind},
    collection::CollectionHandle,
    error::OdmResult,
    keys,
};

/// Indexes a class declares on its own collection.
///
/// Unique fields and compound-unique groups become unique indexes; indexed fields and every
/// local-key reference become plain indexes.
pub fn class_indexes(class: &ClassDef) -> Vec<IndexSpec> {
    let mut indexes = Vec::new();
    let mut groups: IndexMap<&str, Vec<String>> = IndexMap::new();

    for field in class.fields() {
        let Some(key) = keys::stored_key(class, field) else {
            continue;
        };
        if matches!(field.kind, FieldKind::Primary(_)) {
            continue;
        }
        if let Some(group) = &field.unique_group {
            groups.entry(group.as_str()).or_default().push(key.clone());
        }
        if field.unique {
            indexes.push(IndexSpec::new([key], true));
        } else if field.indexed
            || matches!(field.kind, FieldKind::LocalKey(_) | FieldKind::LocalKeys(_))
        {
            indexes.push(IndexSpec::new([key], false));
        }
    }
    for (_, keys) in groups {
        indexes.push(IndexSpec::new(keys, true));
    }

    indexes.dedup_by(|a, b| a.name == b.name);
    indexes
}

/// Join collections a class participates in, each with its unique pair index.
///
/// Derived from relation metadata alone, so the related class need not be registered yet.
pub fn join_indexes(class: &ClassDef) -> Vec<(String, IndexSpec)> {
    class
        .fields()
        .iter()
        .filter_map(|field| match &field.kind {
            FieldKind::ForeignKeys(rel) if rel.join => {
                let other = rel.foreign_key.as_deref()?;
                let collection =
                    keys::join_collection_name(class.name(), &field.name, &rel.target, other);
                let (local, target) = keys::join_columns(&field.name, other);
                let mut columns = [local, target];
                columns.sort();
                Some((collection, IndexSpec::new(columns, true)))
            }
            _ => None,
        })
        .collect()
}

/// Creates declared indexes that are missing and drops existing ones that are no longer
/// declared. The built-in identifier index is left alone.
pub async fn sync_indexes(collection: &CollectionHandle, declared: &[IndexSpec]) -> OdmResult<()> {
    let existing = collection.list_indexes().await?;

    for index in &existing {
        if index.name == ID_INDEX {
            continue;
        }
        if !declared.iter().any(|d| d == index) {
            tracing::warn!(
                collection = collection.name(),
                index = %index.name,
                "dropping index that is no longer declared"
            );
            collection.drop_index(&index.name).await?;
        }
    }
    for index in declared {
        if !existing.iter().any(|e| e == index) {
            collection.create_index(index.clone()).await?;
        }
    }

    Ok(())
}
