//! Field classification shared by the encoder, decoder and query builder.
//!
//! [`classify`] maps a field definition onto exactly one [`FieldClass`]; the boolean predicates
//! are thin views over it, so no field can satisfy two of them at once.

use crate::class::{FieldDef, FieldKind, FieldType};

/// Handling branch selected for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldClass {
    /// The identifier field.
    Identifier,
    /// Scalar, date, datetime, enum, list, dict and shape values.
    Embedded,
    /// An inline instance of another class.
    EmbeddedInstance,
    /// Single reference stored on this document.
    LocalKey,
    /// List of references stored on this document.
    LocalKeys,
    /// Single reference stored on the related document.
    ForeignKey,
    /// List of references stored on the related documents.
    ForeignKeys,
    /// Many-to-many references stored in a join collection.
    JoinKeys,
}

impl FieldClass {
    /// Returns `true` for every reference class.
    pub fn is_reference(&self) -> bool {
        !matches!(
            self,
            FieldClass::Identifier | FieldClass::Embedded | FieldClass::EmbeddedInstance
        )
    }

    /// Returns `true` when the related side holds the key.
    pub fn is_virtual(&self) -> bool {
        matches!(
            self,
            FieldClass::ForeignKey | FieldClass::ForeignKeys | FieldClass::JoinKeys
        )
    }

    /// Returns `true` when a resolved relation holds a list of objects.
    pub fn is_many(&self) -> bool {
        matches!(
            self,
            FieldClass::LocalKeys | FieldClass::ForeignKeys | FieldClass::JoinKeys
        )
    }
}

/// Classifies a field definition.
pub fn classify(field: &FieldDef) -> FieldClass {
    match &field.kind {
        FieldKind::Primary(_) => FieldClass::Identifier,
        FieldKind::Embedded(FieldType::Instance(_)) => FieldClass::EmbeddedInstance,
        FieldKind::Embedded(_) => FieldClass::Embedded,
        FieldKind::LocalKey(_) => FieldClass::LocalKey,
        FieldKind::LocalKeys(_) => FieldClass::LocalKeys,
        FieldKind::ForeignKey(_) => FieldClass::ForeignKey,
        FieldKind::ForeignKeys(rel) if rel.join => FieldClass::JoinKeys,
        FieldKind::ForeignKeys(_) => FieldClass::ForeignKeys,
    }
}

pub fn is_identifier(field: &FieldDef) -> bool {
    classify(field) == FieldClass::Identifier
}

pub fn is_embedded_instance(field: &FieldDef) -> bool {
    classify(field) == FieldClass::EmbeddedInstance
}

pub fn is_embedded_list(field: &FieldDef) -> bool {
    matches!(&field.kind, FieldKind::Embedded(FieldType::List(_)))
}

pub fn is_local_key(field: &FieldDef) -> bool {
    classify(field) == FieldClass::LocalKey
}

pub fn is_local_keys(field: &FieldDef) -> bool {
    classify(field) == FieldClass::LocalKeys
}

/// Single or list foreign key, including join-collection lists.
pub fn is_foreign_key(field: &FieldDef) -> bool {
    classify(field).is_virtual()
}
