mod common;

use doclink::prelude::*;

use common::{count, registry, BLOG_URL};

fn fixtures(bio: &str) -> Vec<LoadGroup> {
    vec![
        LoadGroup::new("Author", "blog").object(
            LoadObject::new()
                .external_id("ada")
                .value("name", "Ada")
                .value("bio", bio),
        ),
        LoadGroup::new("Tag", "blog")
            .object(LoadObject::new().external_id("rust").value("label", "rust"))
            .object(LoadObject::new().external_id("odm").value("label", "odm")),
        LoadGroup::new("Post", "blog").object(
            LoadObject::new()
                .external_id("notes")
                .value("title", "Notes")
                .reference("author", "ada")
                .reference("tags", "rust")
                .reference("tags", "odm"),
        ),
    ]
}

#[tokio::test]
async fn loading_links_records_by_external_id() {
    let (registry, _) = registry().await;
    let graph = registry.graph("blog");
    graph.connect(BLOG_URL).await.unwrap();

    let ids = Loader::new(&registry, LoadStrategy::default())
        .load(fixtures("first"))
        .await
        .unwrap();

    assert_eq!(ids.keys().collect::<Vec<_>>(), ["ada", "rust", "odm", "notes"]);
    let post = graph.get("Post", ids["notes"].clone()).include("tags").await.unwrap();
    assert_eq!(post.get("author_id"), Some(Value::String(ids["ada"].clone())));
    assert_eq!(post.related_list("tags").len(), 2);
}

#[tokio::test]
async fn upsert_or_skip_keeps_existing_records() {
    let (registry, _) = registry().await;
    let graph = registry.graph("blog");
    graph.connect(BLOG_URL).await.unwrap();
    let loader = Loader::new(&registry, LoadStrategy::UpsertOrSkip);

    let first = loader.load(fixtures("first")).await.unwrap();
    let second = loader.load(fixtures("second")).await.unwrap();

    assert_eq!(first["ada"], second["ada"]);
    assert_eq!(first["rust"], second["rust"]);
    assert_eq!(count(&graph, "authors").await, 1);
    assert_eq!(count(&graph, "tags").await, 2);

    let ada = graph.get("Author", second["ada"].clone()).await.unwrap();
    assert_eq!(ada.get("bio"), Some(Value::from("first")));

    // Posts carry no unique field, so the second load adds another one linked to the kept author.
    let post = graph.get("Post", second["notes"].clone()).await.unwrap();
    assert_eq!(post.get("author_id"), Some(Value::String(first["ada"].clone())));
}

#[tokio::test]
async fn upsert_or_reseed_overwrites_existing_records() {
    let (registry, _) = registry().await;
    let graph = registry.graph("blog");
    graph.connect(BLOG_URL).await.unwrap();

    let first = Loader::new(&registry, LoadStrategy::UpsertOrReseed)
        .load(fixtures("first"))
        .await
        .unwrap();
    let second = Loader::new(&registry, LoadStrategy::UpsertOrReseed)
        .load(fixtures("second"))
        .await
        .unwrap();

    assert_eq!(first["ada"], second["ada"]);
    assert_eq!(count(&graph, "authors").await, 1);
    let ada = graph.get("Author", second["ada"].clone()).await.unwrap();
    assert_eq!(ada.get("bio"), Some(Value::from("second")));
}

#[tokio::test]
async fn unknown_external_ids_are_rejected() {
    let (registry, _) = registry().await;
    registry.graph("blog").connect(BLOG_URL).await.unwrap();

    let err = Loader::new(&registry, LoadStrategy::default())
        .load(vec![LoadGroup::new("Post", "blog").object(
            LoadObject::new().value("title", "orphan").reference("author", "nobody"),
        )])
        .await
        .unwrap_err();

    assert!(matches!(err, OdmError::InvalidSchema(message) if message.contains("nobody")));
}
