//! Per-graph class registry.
//!
//! A [`Schema`] owns the class definitions of one graph and resolves relation targets by
//! name. Relations may point at classes registered later; [`Schema::check`] verifies the
//! whole set once every class is known.

use indexmap::IndexMap;

use crate::{
    class::{ClassDef, ClassRef, FieldDef, FieldKind, FieldType},
    classify::{FieldClass, classify},
    error::{OdmError, OdmResult},
    keys,
};

/// Physical layout of one side of a many-to-many relation.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    /// Name of the join collection.
    pub collection: String,
    /// Column holding the identifier of the declaring class.
    pub local_column: String,
    /// Column holding the identifier of the target class.
    pub target_column: String,
}

/// Class registry of a graph.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    classes: IndexMap<String, ClassRef>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a class. Names and collections must be unique within the schema.
    pub fn register(&mut self, class: ClassRef) -> OdmResult<()> {
        if self.classes.contains_key(class.name()) {
            return Err(OdmError::InvalidSchema(format!(
                "class {} is already registered",
                class.name()
            )));
        }
        if !class.is_embedded() {
            if let Some(other) = self
                .classes
                .values()
                .find(|c| !c.is_embedded() && c.collection() == class.collection())
            {
                return Err(OdmError::InvalidSchema(format!(
                    "{} and {} share collection {}",
                    other.name(),
                    class.name(),
                    class.collection()
                )));
            }
        }

        self.classes.insert(class.name().to_string(), class);
        Ok(())
    }

    pub fn class(&self, name: &str) -> OdmResult<ClassRef> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| OdmError::UnknownClass(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassRef> {
        self.classes.values()
    }

    /// Resolves the class a relation field points at.
    pub fn target(&self, class: &ClassDef, field: &FieldDef) -> OdmResult<ClassRef> {
        let rel = field.relation().ok_or_else(|| {
            OdmError::InvalidSchema(format!("{}.{} is not a relation", class.name(), field.name))
        })?;
        self.class(&rel.target)
    }

    /// Resolves the field on the related class named by the relation's foreign key.
    pub fn counterpart<'a>(
        &self,
        class: &ClassDef,
        field: &FieldDef,
        target: &'a ClassDef,
    ) -> OdmResult<Option<&'a FieldDef>> {
        let Some(name) = field.relation().and_then(|r| r.foreign_key.as_deref()) else {
            return Ok(None);
        };

        target.field(name).map(Some).ok_or_else(|| {
            OdmError::InvalidSchema(format!(
                "{}.{} names foreign key {}, which {} does not declare",
                class.name(),
                field.name,
                name,
                target.name()
            ))
        })
    }

    /// Returns the on-document key that related documents use to point back at `class`
    /// for a foreign-key field.
    pub fn back_reference_key(&self, class: &ClassDef, field: &FieldDef) -> OdmResult<(ClassRef, String)> {
        let target = self.target(class, field)?;
        let counterpart = self.counterpart(class, field, &target)?.ok_or_else(|| {
            OdmError::InvalidSchema(format!("{}.{} needs a foreign key name", class.name(), field.name))
        })?;
        let key = keys::stored_key(&target, counterpart).ok_or_else(|| {
            OdmError::InvalidSchema(format!(
                "{}.{} must be a local key to back {}.{}",
                target.name(),
                counterpart.name,
                class.name(),
                field.name
            ))
        })?;

        Ok((target, key))
    }

    /// Resolves the join collection layout of a many-to-many field.
    pub fn join_spec(&self, class: &ClassDef, field: &FieldDef) -> OdmResult<JoinSpec> {
        let target = self.target(class, field)?;
        let counterpart = self.counterpart(class, field, &target)?.ok_or_else(|| {
            OdmError::InvalidSchema(format!("{}.{} needs a foreign key name", class.name(), field.name))
        })?;
        let (local_column, target_column) = keys::join_columns(&field.name, &counterpart.name);

        Ok(JoinSpec {
            collection: keys::join_collection_name(
                class.name(),
                &field.name,
                target.name(),
                &counterpart.name,
            ),
            local_column,
            target_column,
        })
    }

    /// Verifies that every relation and embedded instance type resolves consistently.
    pub fn check(&self) -> OdmResult<()> {
        for class in self.classes.values() {
            for field in class.fields() {
                match &field.kind {
                    FieldKind::Embedded(ty) => self.check_type(class, field, ty)?,
                    FieldKind::Primary(_) => {}
                    _ => self.check_relation(class, field)?,
                }
            }
        }

        Ok(())
    }

    fn check_type(&self, class: &ClassDef, field: &FieldDef, ty: &FieldType) -> OdmResult<()> {
        match ty {
            FieldType::Instance(name) => self.class(name).map(|_| ()),
            FieldType::List(item) | FieldType::Dict(item) => self.check_type(class, field, item),
            FieldType::Shape(members) => members
                .iter()
                .try_for_each(|m| self.check_type(class, field, &m.ty)),
            _ => Ok(()),
        }
    }

    fn check_relation(&self, class: &ClassDef, field: &FieldDef) -> OdmResult<()> {
        let target = self.target(class, field)?;
        if target.is_embedded() {
            return Err(OdmError::InvalidSchema(format!(
                "{}.{} cannot reference embedded class {}",
                class.name(),
                field.name,
                target.name()
            )));
        }
        let counterpart = self.counterpart(class, field, &target)?;
        let mismatch = |expected: &str| {
            OdmError::InvalidSchema(format!(
                "{}.{} expects {}.{} to be {}",
                class.name(),
                field.name,
                target.name(),
                counterpart.map(|c| c.name.as_str()).unwrap_or("?"),
                expected
            ))
        };

        let Some(counterpart) = counterpart else {
            return Ok(());
        };
        let points_back = counterpart
            .relation()
            .is_some_and(|rel| rel.target == class.name());

        if classify(field) == FieldClass::JoinKeys
            && target.name() == class.name()
            && counterpart.name == field.name
        {
            return Err(OdmError::InvalidSchema(format!(
                "{}.{} cannot be its own join counterpart; declare two fields on {}",
                class.name(),
                field.name,
                class.name()
            )));
        }

        match (classify(field), classify(counterpart)) {
            (FieldClass::ForeignKey | FieldClass::ForeignKeys, FieldClass::LocalKey | FieldClass::LocalKeys)
                if points_back => Ok(()),
            (FieldClass::ForeignKey | FieldClass::ForeignKeys, _) => Err(mismatch("a local key")),
            (FieldClass::JoinKeys, FieldClass::JoinKeys) if points_back => Ok(()),
            (FieldClass::JoinKeys, _) => Err(mismatch("a join list")),
            (FieldClass::LocalKey | FieldClass::LocalKeys, FieldClass::ForeignKey | FieldClass::ForeignKeys)
                if points_back => Ok(()),
            (FieldClass::LocalKey | FieldClass::LocalKeys, _) => Err(mismatch("a foreign key")),
            _ => Ok(()),
        }
    }
}
