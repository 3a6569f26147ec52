#![allow(dead_code)]

use doclink::{memory::MemoryConnector, prelude::*};

pub const BLOG_URL: &str = "memory://blog";

/// Authors writing posts, posts tagged and commented, users with profiles.
pub fn blog_classes() -> Vec<ClassRef> {
    [
        ClassDef::builder("Author")
            .field(FieldDef::embedded("name", FieldType::Str).required().unique())
            .field(FieldDef::embedded("bio", FieldType::Str))
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
            .field(FieldDef::foreign_keys(
                "comments",
                Relation::to("Comment").foreign_key("post").on_delete(DeletePolicy::Deny),
            ))
            .build(),
        ClassDef::builder("Comment")
            .field(FieldDef::embedded("body", FieldType::Str))
            .field(FieldDef::local_key("post", Relation::to("Post").foreign_key("comments")))
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
            .build(),
        ClassDef::builder("Profile")
            .field(FieldDef::embedded("bio", FieldType::Str))
            .field(FieldDef::foreign_key("user", Relation::to("User").foreign_key("profile")))
            .build(),
    ]
    .into_iter()
    .map(|class| class.unwrap())
    .collect()
}

/// A registry whose `blog` graph has every blog class registered, not yet connected.
pub async fn registry() -> (ConnectionRegistry, MemoryConnector) {
    let connector = MemoryConnector::new();
    let registry = ConnectionRegistry::new(connector.clone());
    let graph = registry.graph("blog");
    for class in blog_classes() {
        graph.register(class).await.unwrap();
    }
    graph.check().unwrap();

    (registry, connector)
}

/// The connected `blog` graph.
pub async fn blog() -> Graph {
    let (registry, _) = registry().await;
    let graph = registry.graph("blog");
    graph.connect(BLOG_URL).await.unwrap();
    graph
}

pub fn new(graph: &Graph, class: &str) -> Object {
    Object::new(&graph.class(class).unwrap())
}

pub async fn count(graph: &Graph, collection: &str) -> u64 {
    graph
        .collection(collection)
        .await
        .unwrap()
        .count(None, None)
        .await
        .unwrap()
}
