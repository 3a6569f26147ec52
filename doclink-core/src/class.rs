//! Class metadata: the field-definition contract consumed by the encoder, decoder and query builder.
//!
//! A [`ClassDef`] is built once through [`ClassBuilder`] and is immutable afterwards. Classes are
//! shared as [`ClassRef`] (an `Arc`) and resolved by name through a [`Schema`](crate::schema::Schema).
//!
//! # Example
//!
//! ```ignore
//! use doclink::class::{ClassDef, FieldDef, FieldType, Relation};
//!
//! let author = ClassDef::builder("Author")
//!     .field(FieldDef::embedded("name", FieldType::Str).required().unique())
//!     .field(FieldDef::foreign_keys("posts", Relation::to("Post").foreign_key("author")))
//!     .build()?;
//!
//! let post = ClassDef::builder("Post")
//!     .field(FieldDef::embedded("title", FieldType::Str))
//!     .field(FieldDef::local_key("author", Relation::to("Author").foreign_key("posts")))
//!     .build()?;
//! ```

use std::{collections::{HashMap, HashSet}, fmt, sync::Arc};

use crate::{
    error::{OdmError, OdmResult},
    keys::{self, KeyCase},
};

/// Shared handle to an immutable class definition.
pub type ClassRef = Arc<ClassDef>;

/// Name of the identifier field added when a class declares none.
pub const DEFAULT_ID_FIELD: &str = "id";

/// How the identifier of a class is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdStrategy {
    /// Generated `ObjectId`, displayed as its 24 character hex string.
    #[default]
    ObjectId,
    /// Generated UUID v4, displayed in hyphenated form.
    Uuid,
    /// Caller-supplied string identifier.
    String,
    /// Caller-supplied integer identifier.
    Int,
}

impl IdStrategy {
    /// Returns `true` when an absent identifier is generated during encoding.
    pub fn is_generated(&self) -> bool {
        matches!(self, IdStrategy::ObjectId | IdStrategy::Uuid)
    }
}

/// What happens to related records when the holder is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// Clear back-references and join rows, keep the related records.
    #[default]
    Nullify,
    /// Delete the related records as well.
    Cascade,
    /// Refuse the delete while related records exist.
    Deny,
}

/// A named, typed member of a [`FieldType::Shape`].
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeField {
    pub name: String,
    pub ty: FieldType,
}

/// Semantic type of an embedded value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// Any value, stored as-is.
    Any,
    Str,
    Int,
    Float,
    Bool,
    /// Calendar date. Stored as a datetime at midnight UTC and truncated when read back.
    Date,
    DateTime,
    /// A closed set of named values, stored by name.
    Enum(Arc<[String]>),
    List(Box<FieldType>),
    /// String keyed map with uniformly typed values.
    Dict(Box<FieldType>),
    /// Fixed set of named, typed members.
    Shape(Vec<ShapeField>),
    /// An instance of another class, stored inline.
    Instance(String),
}

impl FieldType {
    /// Creates an enum type from its value names.
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldType::Enum(values.into_iter().map(Into::into).collect())
    }

    pub fn list(item: FieldType) -> Self {
        FieldType::List(Box::new(item))
    }

    pub fn dict(item: FieldType) -> Self {
        FieldType::Dict(Box::new(item))
    }

    pub fn shape<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldType)>,
        S: Into<String>,
    {
        FieldType::Shape(
            fields
                .into_iter()
                .map(|(name, ty)| ShapeField { name: name.into(), ty })
                .collect(),
        )
    }

    pub fn instance(class: impl Into<String>) -> Self {
        FieldType::Instance(class.into())
    }
}

/// A directed edge from the declaring class to `target`.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    /// Name of the related class.
    pub target: String,
    /// Name of the field on `target` that points back at the declaring class.
    pub foreign_key: Option<String>,
    /// Many-to-many through an auxiliary join collection.
    pub join: bool,
    /// Delete behaviour for the related records.
    pub on_delete: DeletePolicy,
}

impl Relation {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            foreign_key: None,
            join: false,
            on_delete: DeletePolicy::default(),
        }
    }

    pub fn foreign_key(mut self, name: impl Into<String>) -> Self {
        self.foreign_key = Some(name.into());
        self
    }

    /// Marks the relation as many-to-many through a join collection.
    pub fn through_join(mut self) -> Self {
        self.join = true;
        self
    }

    pub fn on_delete(mut self, policy: DeletePolicy) -> Self {
        self.on_delete = policy;
        self
    }
}

/// Storage strategy of a field. Exactly one applies to every field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// The identifier field, stored under the reserved `_id` key.
    Primary(IdStrategy),
    /// A value stored inline in the owning document.
    Embedded(FieldType),
    /// The owning document stores the related document's identifier.
    LocalKey(Relation),
    /// The owning document stores an ordered list of related identifiers.
    LocalKeys(Relation),
    /// The related document stores the back-reference; virtual on this side.
    ForeignKey(Relation),
    /// Related documents store the back-reference, or pairs live in a join collection.
    ForeignKeys(Relation),
}

impl FieldKind {
    /// Returns the relation metadata for reference fields.
    pub fn relation(&self) -> Option<&Relation> {
        match self {
            FieldKind::LocalKey(rel)
            | FieldKind::LocalKeys(rel)
            | FieldKind::ForeignKey(rel)
            | FieldKind::ForeignKeys(rel) => Some(rel),
            FieldKind::Primary(_) | FieldKind::Embedded(_) => None,
        }
    }
}

/// A single field definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub unique: bool,
    /// Name of the compound-unique group this field participates in.
    pub unique_group: Option<String>,
    pub indexed: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            unique: false,
            unique_group: None,
            indexed: false,
        }
    }

    pub fn primary(name: impl Into<String>, strategy: IdStrategy) -> Self {
        Self::new(name, FieldKind::Primary(strategy))
    }

    pub fn embedded(name: impl Into<String>, ty: FieldType) -> Self {
        Self::new(name, FieldKind::Embedded(ty))
    }

    pub fn local_key(name: impl Into<String>, relation: Relation) -> Self {
        Self::new(name, FieldKind::LocalKey(relation))
    }

    pub fn local_keys(name: impl Into<String>, relation: Relation) -> Self {
        Self::new(name, FieldKind::LocalKeys(relation))
    }

    pub fn foreign_key(name: impl Into<String>, relation: Relation) -> Self {
        Self::new(name, FieldKind::ForeignKey(relation))
    }

    pub fn foreign_keys(name: impl Into<String>, relation: Relation) -> Self {
        Self::new(name, FieldKind::ForeignKeys(relation))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Adds the field to a compound-unique group shared with other fields of the class.
    pub fn unique_with(mut self, group: impl Into<String>) -> Self {
        self.unique_group = Some(group.into());
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn relation(&self) -> Option<&Relation> {
        self.kind.relation()
    }
}

/// Immutable definition of a typed class.
#[derive(Clone, PartialEq)]
pub struct ClassDef {
    name: String,
    collection: String,
    key_case: KeyCase,
    embedded: bool,
    fields: Vec<FieldDef>,
    primary: usize,
}

impl ClassDef {
    /// Starts a definition for a class with the given name.
    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the physical collection backing this class.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn key_case(&self) -> KeyCase {
        self.key_case
    }

    /// Embedded classes are value objects without a collection of their own.
    pub fn is_embedded(&self) -> bool {
        self.embedded
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks a field up, failing with [`OdmError::UnknownField`].
    pub fn require_field(&self, name: &str) -> OdmResult<&FieldDef> {
        self.field(name).ok_or_else(|| OdmError::UnknownField {
            class: self.name.clone(),
            field: name.to_string(),
        })
    }

    pub fn primary_field(&self) -> &FieldDef {
        &self.fields[self.primary]
    }

    pub fn id_strategy(&self) -> IdStrategy {
        match self.primary_field().kind {
            FieldKind::Primary(strategy) => strategy,
            _ => IdStrategy::default(),
        }
    }

    /// On-document key of a non-identifier field, following the class key case.
    pub fn db_key(&self, field: &str) -> String {
        keys::db_field_key(field, self.key_case)
    }
}

impl fmt::Debug for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDef")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("fields", &self.fields.iter().map(|f| &f.name).collect::<Vec<_>>())
            .finish()
    }
}

/// Fluent builder for [`ClassDef`].
#[derive(Debug, Clone)]
pub struct ClassBuilder {
    name: String,
    collection: Option<String>,
    key_case: KeyCase,
    embedded: bool,
    fields: Vec<FieldDef>,
}

impl ClassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            key_case: KeyCase::default(),
            embedded: false,
            fields: Vec::new(),
        }
    }

    /// Overrides the derived collection name.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    pub fn key_case(mut self, case: KeyCase) -> Self {
        self.key_case = case;
        self
    }

    /// Declares the class as an embedded value class.
    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Validates the definition and freezes it.
    ///
    /// A primary field named `id` using [`IdStrategy::ObjectId`] is prepended when none is declared.
    pub fn build(self) -> OdmResult<ClassRef> {
        let mut fields = self.fields;
        let mut seen = HashSet::new();

        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(OdmError::InvalidSchema(format!(
                    "{} declares field {} twice",
                    self.name, field.name
                )));
            }
            if let FieldKind::ForeignKey(rel) | FieldKind::ForeignKeys(rel) = &field.kind {
                if rel.foreign_key.is_none() {
                    return Err(OdmError::InvalidSchema(format!(
                        "{}.{} needs a foreign key name",
                        self.name, field.name
                    )));
                }
            }
            if let FieldKind::LocalKey(rel) | FieldKind::LocalKeys(rel) | FieldKind::ForeignKey(rel) = &field.kind {
                if rel.join {
                    return Err(OdmError::InvalidSchema(format!(
                        "{}.{} cannot use a join collection, only list foreign keys can",
                        self.name, field.name
                    )));
                }
            }
        }

        let primaries = fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Primary(_)))
            .count();
        if primaries > 1 {
            return Err(OdmError::InvalidSchema(format!(
                "{} declares more than one identifier field",
                self.name
            )));
        }
        if primaries == 0 {
            if seen.contains(DEFAULT_ID_FIELD) {
                return Err(OdmError::InvalidSchema(format!(
                    "{} uses the reserved field name {} for a non-identifier field",
                    self.name, DEFAULT_ID_FIELD
                )));
            }
            fields.insert(0, FieldDef::primary(DEFAULT_ID_FIELD, IdStrategy::ObjectId));
        }

        let primary = fields
            .iter()
            .position(|f| matches!(f.kind, FieldKind::Primary(_)))
            .unwrap_or(0);

        let collection = self
            .collection
            .unwrap_or_else(|| keys::collection_name(&self.name, self.key_case));

        let class = ClassDef {
            name: self.name,
            collection,
            key_case: self.key_case,
            embedded: self.embedded,
            fields,
            primary,
        };
        class.check_keys()?;

        Ok(Arc::new(class))
    }
}

impl ClassDef {
    /// Fails when two fields would share an on-document key, or when a reference attribute
    /// shadows a declared field.
    fn check_keys(&self) -> OdmResult<()> {
        let mut stored = HashMap::new();
        let mut attributes = HashMap::new();

        for field in &self.fields {
            if let Some(key) = keys::stored_key(self, field) {
                if let Some(other) = stored.insert(key.clone(), field.name.as_str()) {
                    return Err(OdmError::InvalidSchema(format!(
                        "{}.{} and {}.{} are both stored under {}",
                        self.name, other, self.name, field.name, key
                    )));
                }
            }
            if let Some(attribute) = keys::attribute_key(field) {
                if self.fields.iter().any(|f| f.name == attribute) {
                    return Err(OdmError::InvalidSchema(format!(
                        "{}.{} keeps its identifiers in {}, which is also a declared field",
                        self.name, field.name, attribute
                    )));
                }
                if let Some(other) = attributes.insert(attribute.clone(), field.name.as_str()) {
                    return Err(OdmError::InvalidSchema(format!(
                        "{}.{} and {}.{} both keep their identifiers in {}",
                        self.name, other, self.name, field.name, attribute
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_adds_default_identifier() {
        let class = ClassDef::builder("BlogPost")
            .field(FieldDef::embedded("title", FieldType::Str))
            .build()
            .unwrap();

        assert_eq!(class.primary_field().name, "id");
        assert_eq!(class.id_strategy(), IdStrategy::ObjectId);
        assert_eq!(class.collection(), "blogPosts");
        assert_eq!(class.fields().len(), 2);
    }

    #[test]
    fn build_keeps_declared_identifier() {
        let class = ClassDef::builder("Country")
            .field(FieldDef::primary("code", IdStrategy::String))
            .field(FieldDef::embedded("name", FieldType::Str))
            .build()
            .unwrap();

        assert_eq!(class.primary_field().name, "code");
        assert!(!class.id_strategy().is_generated());
    }

    #[test]
    fn build_rejects_duplicate_fields() {
        let result = ClassDef::builder("User")
            .field(FieldDef::embedded("name", FieldType::Str))
            .field(FieldDef::embedded("name", FieldType::Int))
            .build();

        assert!(matches!(result, Err(OdmError::InvalidSchema(_))));
    }

    #[test]
    fn build_rejects_colliding_stored_keys() {
        let result = ClassDef::builder("Pet")
            .field(FieldDef::embedded("owner_id", FieldType::Str))
            .field(FieldDef::local_key("owner", Relation::to("Person")))
            .build();

        assert!(matches!(result, Err(OdmError::InvalidSchema(message)) if message.contains("ownerId")));
    }

    #[test]
    fn build_rejects_case_variants_sharing_a_key() {
        let result = ClassDef::builder("Pet")
            .field(FieldDef::embedded("nick_name", FieldType::Str))
            .field(FieldDef::embedded("nickName", FieldType::Str))
            .build();

        assert!(matches!(result, Err(OdmError::InvalidSchema(_))));
    }

    #[test]
    fn build_rejects_foreign_key_without_name() {
        let result = ClassDef::builder("User")
            .field(FieldDef::foreign_keys("posts", Relation::to("Post")))
            .build();

        assert!(matches!(result, Err(OdmError::InvalidSchema(_))));
    }

    #[test]
    fn collection_override_and_snake_case() {
        let class = ClassDef::builder("BlogPost")
            .key_case(KeyCase::Snake)
            .build()
            .unwrap();
        assert_eq!(class.collection(), "blog_posts");
        assert_eq!(class.db_key("created_at"), "created_at");

        let class = ClassDef::builder("BlogPost")
            .collection("articles")
            .build()
            .unwrap();
        assert_eq!(class.collection(), "articles");
        assert_eq!(class.db_key("created_at"), "createdAt");
    }
}
