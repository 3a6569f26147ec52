//! Reference key mapping and naming conventions.
//!
//! In-memory field names are snake_case. On-document keys follow the owning class's
//! [`KeyCase`]. A relation field `owner` keeps its resolved identifier in the attribute
//! `owner_id` and stores it under `ownerId`; a list relation `tags` uses `tag_ids` / `tagIds`.
//! The encoder, decoder and query builder all derive keys from the functions in this module.

use convert_case::{Case, Casing};

use crate::class::{ClassDef, FieldDef, FieldKind};

/// Reserved on-document key of the identifier field.
pub const ID_KEY: &str = "_id";

/// Key casing convention of a class's documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyCase {
    #[default]
    Camel,
    Snake,
}

impl KeyCase {
    fn case(&self) -> Case {
        match self {
            KeyCase::Camel => Case::Camel,
            KeyCase::Snake => Case::Snake,
        }
    }
}

/// Converts an in-memory field name into its on-document key.
pub fn db_field_key(field: &str, case: KeyCase) -> String {
    field.to_case(case.case())
}

/// Attribute holding the resolved identifier of a single reference field.
pub fn reference_key(field: &str) -> String {
    format!("{}_id", field.to_case(Case::Snake))
}

/// Attribute holding the resolved identifiers of a list reference field.
pub fn reference_keys_key(field: &str) -> String {
    format!("{}_ids", singularize(&field.to_case(Case::Snake)))
}

/// On-document key of a single reference field.
pub fn db_reference_key(field: &str, class: &ClassDef) -> String {
    db_field_key(&reference_key(field), class.key_case())
}

/// On-document key of a list reference field.
pub fn db_reference_keys_key(field: &str, class: &ClassDef) -> String {
    db_field_key(&reference_keys_key(field), class.key_case())
}

/// Attribute name under which an object keeps the identifier(s) of a local-key field.
pub fn attribute_key(field: &FieldDef) -> Option<String> {
    match &field.kind {
        FieldKind::LocalKey(_) => Some(reference_key(&field.name)),
        FieldKind::LocalKeys(_) => Some(reference_keys_key(&field.name)),
        _ => None,
    }
}

/// On-document key where a field's data is stored, `None` for virtual relation fields.
pub fn stored_key(class: &ClassDef, field: &FieldDef) -> Option<String> {
    match &field.kind {
        FieldKind::Primary(_) => Some(ID_KEY.to_string()),
        FieldKind::Embedded(_) => Some(class.db_key(&field.name)),
        FieldKind::LocalKey(_) => Some(db_reference_key(&field.name, class)),
        FieldKind::LocalKeys(_) => Some(db_reference_keys_key(&field.name, class)),
        FieldKind::ForeignKey(_) | FieldKind::ForeignKeys(_) => None,
    }
}

/// Derives a collection name: pluralized class name in the class key case.
pub fn collection_name(class_name: &str, case: KeyCase) -> String {
    pluralize(&class_name.to_case(Case::Snake)).to_case(case.case())
}

/// Name of the join collection backing a many-to-many relation.
///
/// Both sides of the relation produce the same name regardless of which one asks.
pub fn join_collection_name(class_a: &str, field_a: &str, class_b: &str, field_b: &str) -> String {
    let mut sides = [(class_a, field_a), (class_b, field_b)];
    sides.sort();

    sides
        .iter()
        .map(|(class, field)| {
            format!(
                "{}_{}",
                pluralize(&class.to_case(Case::Snake)),
                field.to_case(Case::Snake)
            )
        })
        .collect::<Vec<_>>()
        .join("_")
        .to_case(Case::Camel)
}

/// Columns of a join collection: the first stores the identifier of `(class_a, field_a)`'s
/// owner, the second the identifier of `(class_b, field_b)`'s owner.
///
/// A column is named after the field on the opposite side that points at its owner, so
/// `Article.tags <-> Tag.articles` yields `articleId` and `tagId`.
pub fn join_columns(field_a: &str, field_b: &str) -> (String, String) {
    let column_a = db_field_key(&reference_key(&singularize(field_b)), KeyCase::Camel);
    let mut column_b = db_field_key(&reference_key(&singularize(field_a)), KeyCase::Camel);

    if column_a == column_b {
        column_b = format!("{column_b}2");
    }

    (column_a, column_b)
}

/// English plural of the last word of a snake_case name.
pub fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    if let Some(stem) = word.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{stem}ies");
        }
    }
    if ["s", "x", "z", "ch", "sh"]
        .iter()
        .any(|suffix| word.ends_with(suffix))
    {
        return format!("{word}es");
    }

    format!("{word}s")
}

/// English singular of the last word of a snake_case name. Inverse of [`pluralize`].
pub fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    for suffix in ["sses", "xes", "zes", "ches", "shes"] {
        if word.ends_with(suffix) {
            return word[..word.len() - 2].to_string();
        }
    }
    if word.ends_with("ss") || word.ends_with("us") || word.ends_with("is") {
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix('s') {
        return stem.to_string();
    }

    word.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        class::{ClassDef, FieldDef, FieldType, Relation},
        error::OdmError,
    };

    #[test]
    fn reference_keys_follow_field_names() {
        assert_eq!(reference_key("owner"), "owner_id");
        assert_eq!(reference_keys_key("tags"), "tag_ids");
        assert_eq!(reference_keys_key("categories"), "category_ids");
        assert_eq!(reference_keys_key("boxes"), "box_ids");
    }

    #[test]
    fn db_reference_keys_apply_class_case() {
        let camel = ClassDef::builder("Post").build().unwrap();
        let snake = ClassDef::builder("Post")
            .key_case(KeyCase::Snake)
            .build()
            .unwrap();

        assert_eq!(db_reference_key("author", &camel), "authorId");
        assert_eq!(db_reference_keys_key("tags", &camel), "tagIds");
        assert_eq!(db_reference_key("author", &snake), "author_id");
        assert_eq!(db_reference_keys_key("tags", &snake), "tag_ids");
    }

    #[test]
    fn stored_keys_are_distinct_per_class() {
        let class = ClassDef::builder("Post")
            .field(FieldDef::embedded("title", FieldType::Str))
            .field(FieldDef::local_key("author", Relation::to("Author")))
            .field(FieldDef::local_keys("tags", Relation::to("Tag")))
            .field(FieldDef::foreign_keys("comments", Relation::to("Comment").foreign_key("post")))
            .build()
            .unwrap();

        let keys = class
            .fields()
            .iter()
            .filter_map(|f| stored_key(&class, f))
            .collect::<Vec<_>>();

        assert_eq!(keys, vec!["_id", "title", "authorId", "tagIds"]);

        let colliding = ClassDef::builder("Post")
            .field(FieldDef::embedded("author_id", FieldType::Str))
            .field(FieldDef::local_key("author", Relation::to("Author")))
            .build();
        assert!(matches!(colliding, Err(OdmError::InvalidSchema(_))));
    }

    #[test]
    fn pluralize_and_singularize_round_trip() {
        for word in ["user", "category", "box", "church", "day", "address", "post"] {
            assert_eq!(singularize(&pluralize(word)), word);
        }
        assert_eq!(pluralize("category"), "categories");
        assert_eq!(pluralize("day"), "days");
    }

    #[test]
    fn collection_names_are_pluralized() {
        assert_eq!(collection_name("User", KeyCase::Camel), "users");
        assert_eq!(collection_name("BlogPost", KeyCase::Camel), "blogPosts");
        assert_eq!(collection_name("Category", KeyCase::Snake), "categories");
    }

    #[test]
    fn join_collection_name_is_symmetric() {
        let ab = join_collection_name("Article", "tags", "Tag", "articles");
        let ba = join_collection_name("Tag", "articles", "Article", "tags");

        assert_eq!(ab, ba);
        assert_eq!(ab, "articlesTagsTagsArticles");
    }

    #[test]
    fn join_columns_name_the_owning_side() {
        assert_eq!(
            join_columns("tags", "articles"),
            ("articleId".to_string(), "tagId".to_string())
        );
        assert_eq!(
            join_columns("friends", "friends"),
            ("friendId".to_string(), "friendId2".to_string())
        );
    }
}
