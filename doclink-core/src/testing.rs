//! Shared class fixtures for unit tests.

use crate::{
    class::{ClassDef, DeletePolicy, FieldDef, FieldType, Relation},
    schema::Schema,
};

/// Authors, posts, tags, users with profiles, and people with embedded addresses.
pub fn blog_schema() -> Schema {
    let classes = [
        ClassDef::builder("Author")
            .field(FieldDef::embedded("name", FieldType::Str).required().unique())
            .field(FieldDef::foreign_keys(
                "posts",
                Relation::to("Post").foreign_key("author").on_delete(DeletePolicy::Cascade),
            ))
            .build(),
        ClassDef::builder("Post")
            .field(FieldDef::embedded("title", FieldType::Str))
            .field(FieldDef::embedded("published_on", FieldType::Date))
            .field(FieldDef::local_key("author", Relation::to("Author").foreign_key("posts")).indexed())
            .field(FieldDef::foreign_keys(
                "tags",
                Relation::to("Tag").foreign_key("posts").through_join(),
            ))
            .build(),
        ClassDef::builder("Tag")
            .field(FieldDef::embedded("label", FieldType::Str).unique())
            .field(FieldDef::foreign_keys(
                "posts",
                Relation::to("Post").foreign_key("tags").through_join(),
            ))
            .build(),
        ClassDef::builder("User")
            .field(FieldDef::embedded("name", FieldType::Str))
            .field(FieldDef::local_key("profile", Relation::to("Profile").foreign_key("user")))
            .field(FieldDef::local_keys("favorites", Relation::to("Post")))
            .build(),
        ClassDef::builder("Profile")
            .field(FieldDef::embedded("bio", FieldType::Str))
            .field(FieldDef::foreign_key("user", Relation::to("User").foreign_key("profile")))
            .build(),
        ClassDef::builder("Address")
            .embedded()
            .field(FieldDef::embedded("street", FieldType::Str))
            .field(FieldDef::embedded("zip", FieldType::Str))
            .build(),
        ClassDef::builder("Person")
            .field(FieldDef::embedded("name", FieldType::Str).required())
            .field(FieldDef::embedded("born", FieldType::Date))
            .field(FieldDef::embedded("last_seen", FieldType::DateTime))
            .field(FieldDef::embedded(
                "mood",
                FieldType::enumeration(["happy", "sad"]),
            ))
            .field(FieldDef::embedded("scores", FieldType::list(FieldType::Int)))
            .field(FieldDef::embedded("limits", FieldType::dict(FieldType::Float)))
            .field(FieldDef::embedded(
                "size",
                FieldType::shape([("height", FieldType::Int), ("width", FieldType::Int)]),
            ))
            .field(FieldDef::embedded("home", FieldType::instance("Address")))
            .field(FieldDef::embedded("active", FieldType::Bool))
            .build(),
    ];

    let mut schema = Schema::new();
    for class in classes {
        schema.register(class.unwrap()).unwrap();
    }
    schema.check().unwrap();
    schema
}
