//! Bulk loading of seed data.
//!
//! A [`Loader`] takes groups of plain records, each optionally tagged with an external
//! identifier that other records use to point at it, and writes them through the owning
//! graphs. Existing records are recognized by their declared unique fields. The result maps
//! every external identifier to the store identifier of the record it ended up as.
//!
//! # Example
//!
//! ```ignore
//! let groups = vec![
//!     LoadGroup::new("Author", "blog")
//!         .object(LoadObject::new().external_id("ada").value("name", "Ada")),
//!     LoadGroup::new("Post", "blog")
//!         .object(LoadObject::new().value("title", "Notes").reference("author", "ada")),
//! ];
//!
//! let ids = Loader::new(&registry, LoadStrategy::UpsertOrSkip).load(groups).await?;
//! println!("ada is {}", ids["ada"]);
//! ```

use indexmap::IndexMap;

use crate::{
    class::{ClassDef, FieldKind},
    encode,
    error::{OdmError, OdmResult},
    id, keys,
    object::Object,
    query::{Expr, Filter, Query},
    registry::{ConnectionRegistry, Graph},
    value::Value,
};

/// External identifier to store identifier.
pub type IdMap = IndexMap<String, String>;

/// How records that already exist are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStrategy {
    /// Keep the stored record as is and map to its identifier.
    #[default]
    UpsertOrSkip,
    /// Overwrite the stored record in place, keeping its identifier.
    UpsertOrReseed,
}

/// One record to load.
#[derive(Debug, Clone, Default)]
pub struct LoadObject {
    pub external_id: Option<String>,
    pub values: IndexMap<String, Value>,
    /// Relation field to the external identifiers it points at.
    pub refs: IndexMap<String, Vec<String>>,
}

impl LoadObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    pub fn value(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }

    pub fn reference(mut self, field: impl Into<String>, external_id: impl Into<String>) -> Self {
        self.refs
            .entry(field.into())
            .or_default()
            .push(external_id.into());
        self
    }
}

/// Records of one class in one graph.
#[derive(Debug, Clone)]
pub struct LoadGroup {
    pub class: String,
    pub graph: String,
    pub objects: Vec<LoadObject>,
}

impl LoadGroup {
    pub fn new(class: impl Into<String>, graph: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            graph: graph.into(),
            objects: Vec::new(),
        }
    }

    pub fn object(mut self, object: LoadObject) -> Self {
        self.objects.push(object);
        self
    }
}

struct Loaded {
    graph: Graph,
    object: Object,
    external_id: Option<String>,
    /// Stored record this entry resolved to and left alone.
    skipped: bool,
    refs: IndexMap<String, Vec<String>>,
}

/// Writes load groups through a registry's graphs.
pub struct Loader<'r> {
    registry: &'r ConnectionRegistry,
    strategy: LoadStrategy,
}

impl<'r> Loader<'r> {
    pub fn new(registry: &'r ConnectionRegistry, strategy: LoadStrategy) -> Self {
        Self { registry, strategy }
    }

    /// Loads every group and returns the identifier reconciliation map.
    ///
    /// # Errors
    ///
    /// [`OdmError::InvalidSchema`] for a reference to an external identifier that no group
    /// defines; otherwise whatever saving the records raises.
    pub async fn load(&self, groups: Vec<LoadGroup>) -> OdmResult<IdMap> {
        let mut loaded = Vec::new();

        for group in groups {
            let graph = self.registry.graph(&group.graph);
            let class = graph.class(&group.class)?;

            for record in group.objects {
                let object = Object::new(&class);
                for (field, value) in record.values {
                    object.set(&field, value)?;
                }

                if let Some(existing) = self.existing(&graph, &class, &object).await? {
                    if self.strategy == LoadStrategy::UpsertOrSkip {
                        tracing::debug!(
                            class = class.name(),
                            id = ?existing.id_string(),
                            "keeping existing record"
                        );
                        loaded.push(Loaded {
                            graph: graph.clone(),
                            object: existing,
                            external_id: record.external_id,
                            skipped: true,
                            refs: record.refs,
                        });
                        continue;
                    }
                    if let Some(id) = existing.id() {
                        object.set(&class.primary_field().name, id)?;
                    }
                }
                if object.id().is_none() {
                    if let Some(id) = id::generate(class.id_strategy()) {
                        object.set_id(id);
                    }
                }

                loaded.push(Loaded {
                    graph: graph.clone(),
                    object,
                    external_id: record.external_id,
                    skipped: false,
                    refs: record.refs,
                });
            }
        }

        let by_external = loaded
            .iter()
            .enumerate()
            .filter_map(|(i, entry)| entry.external_id.clone().map(|id| (id, i)))
            .collect::<IndexMap<_, _>>();

        for entry in loaded.iter().filter(|e| !e.skipped) {
            for (field, targets) in &entry.refs {
                let related = targets
                    .iter()
                    .map(|target| {
                        by_external
                            .get(target)
                            .map(|i| &loaded[*i])
                            .ok_or_else(|| {
                                OdmError::InvalidSchema(format!(
                                    "{}.{} refers to unknown record {target}",
                                    entry.object.class_name(),
                                    field
                                ))
                            })
                    })
                    .collect::<OdmResult<Vec<_>>>()?;
                link(&entry.object, field, &related)?;
            }
        }

        for entry in loaded.iter().filter(|e| !e.skipped) {
            if entry.object.is_new() {
                entry.graph.save(&entry.object).await?;
            }
        }

        let mut ids = IdMap::new();
        for entry in &loaded {
            if let (Some(external), Some(id)) = (&entry.external_id, entry.object.id_string()) {
                ids.insert(external.clone(), id);
            }
        }

        Ok(ids)
    }

    /// Finds the stored record sharing a unique value with `object`.
    async fn existing(&self, graph: &Graph, class: &ClassDef, object: &Object) -> OdmResult<Option<Object>> {
        let Some(filter) = unique_filter(class, object) else {
            return Ok(None);
        };

        graph.query(Query::find(class.name(), filter)).optional().exec().await
    }
}

/// Filter matching any stored record that would collide with `object` on a unique field or
/// a complete compound-unique group.
fn unique_filter(class: &ClassDef, object: &Object) -> Option<Expr> {
    let mut alternatives = Vec::new();
    let mut groups: IndexMap<&str, Vec<Expr>> = IndexMap::new();
    let mut incomplete = Vec::new();

    for field in class.fields() {
        if !matches!(field.kind, FieldKind::Embedded(_)) {
            continue;
        }
        let value = object.get(&field.name).and_then(|v| scalar(&v));
        if field.unique {
            if let Some(value) = &value {
                alternatives.push(Filter::eq(field.name.clone(), value.clone()));
            }
        }
        if let Some(group) = &field.unique_group {
            match value {
                Some(value) => groups
                    .entry(group.as_str())
                    .or_default()
                    .push(Filter::eq(field.name.clone(), value)),
                None => incomplete.push(group.as_str()),
            }
        }
    }
    for (group, members) in groups {
        if !incomplete.contains(&group) {
            alternatives.push(Filter::and(members));
        }
    }

    match alternatives.len() {
        0 => None,
        1 => alternatives.pop(),
        _ => Some(Filter::or(alternatives)),
    }
}

fn scalar(value: &Value) -> Option<bson::Bson> {
    match value {
        Value::String(s) => Some(s.clone().into()),
        Value::Int(i) => Some((*i).into()),
        Value::Float(f) => Some((*f).into()),
        Value::Bool(b) => Some((*b).into()),
        Value::Date(d) => Some(encode::date_to_bson(*d)),
        Value::DateTime(dt) => Some(encode::datetime_to_bson(*dt)),
        _ => None,
    }
}

/// Points a relation field of `object` at loaded records.
///
/// Local keys to kept records are stored by identifier so the kept record is not rewritten.
/// New records carry pre-assigned identifiers, so mixed lists resolve too.
fn link(object: &Object, field: &str, related: &[&Loaded]) -> OdmResult<()> {
    let class = object.class();
    let def = class.require_field(field)?;

    match &def.kind {
        FieldKind::LocalKey(_) => {
            let Some(target) = related.first() else {
                return Ok(());
            };
            if target.skipped {
                let id = target.object.id().unwrap_or(Value::Null);
                object.set(&keys::reference_key(field), id)
            } else {
                object.set(field, target.object.clone())
            }
        }
        FieldKind::LocalKeys(_) if related.iter().any(|t| t.skipped) => {
            let ids = related
                .iter()
                .map(|t| t.object.id().unwrap_or(Value::Null))
                .collect::<Vec<_>>();
            object.set(&keys::reference_keys_key(field), Value::List(ids))
        }
        FieldKind::ForeignKey(_) => match related.first() {
            Some(target) => object.set(field, target.object.clone()),
            None => Ok(()),
        },
        FieldKind::LocalKeys(_) | FieldKind::ForeignKeys(_) => object.set(
            field,
            related.iter().map(|t| t.object.clone()).collect::<Vec<_>>(),
        ),
        _ => Err(OdmError::InvalidSchema(format!(
            "{}.{} is not a relation",
            class.name(),
            field
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        class::{FieldDef, FieldType},
        testing,
    };

    #[test]
    fn unique_filter_uses_unique_fields() {
        let schema = testing::blog_schema();
        let author = schema.class("Author").unwrap();
        let object = Object::new(&author).with("name", "Ada").unwrap();

        assert_eq!(unique_filter(&author, &object), Some(Filter::eq("name", "Ada")));
    }

    #[test]
    fn unique_filter_needs_complete_groups() {
        let seat = ClassDef::builder("Seat")
            .field(FieldDef::embedded("row", FieldType::Str).unique_with("place"))
            .field(FieldDef::embedded("number", FieldType::Int).unique_with("place"))
            .build()
            .unwrap();

        let partial = Object::new(&seat).with("row", "B").unwrap();
        assert_eq!(unique_filter(&seat, &partial), None);

        partial.set("number", 12).unwrap();
        assert_eq!(
            unique_filter(&seat, &partial),
            Some(Filter::and([Filter::eq("row", "B"), Filter::eq("number", 12_i64)]))
        );
    }

    #[test]
    fn classes_without_unique_fields_never_match() {
        let schema = testing::blog_schema();
        let post = schema.class("Post").unwrap();
        let object = Object::new(&post).with("title", "Notes").unwrap();

        assert_eq!(unique_filter(&post, &object), None);
    }
}
