mod common;

use doclink::prelude::*;

use common::{BLOG_URL, count, new, registry};

#[tokio::test]
async fn graphs_are_created_once_per_name() {
    let (registry, _) = registry().await;

    assert!(registry.graph("blog").ptr_eq(&registry.graph("blog")));
    assert!(!registry.graph("blog").ptr_eq(&registry.graph("audit")));
    assert_eq!(registry.graph_names(), ["audit", "blog"]);
}

#[tokio::test]
async fn collections_require_a_connection() {
    let (registry, _) = registry().await;
    let graph = registry.graph("blog");

    assert!(!graph.is_connected().await);
    let err = graph.all("Author").await.unwrap_err();
    assert!(matches!(err, OdmError::NotConnected(name) if name == "blog"));
}

#[tokio::test]
async fn connecting_synchronizes_declared_indexes() {
    let (registry, connector) = registry().await;
    registry.graph("blog").connect(BLOG_URL).await.unwrap();
    let store = connector.store(BLOG_URL).unwrap();

    let authors = store.list_indexes("authors").await.unwrap();
    assert!(authors.contains(&IndexSpec::new(["name"], true)));

    let posts = store.list_indexes("posts").await.unwrap();
    assert!(posts.contains(&IndexSpec::new(["authorId"], false)));

    let rows = store.list_indexes("postsTagsTagsPosts").await.unwrap();
    assert!(rows.contains(&IndexSpec::new(["postId", "tagId"], true)));
}

#[tokio::test]
async fn undeclared_indexes_are_dropped_on_connect() {
    let (registry, connector) = registry().await;
    let graph = registry.graph("blog");
    graph.connect(BLOG_URL).await.unwrap();
    let stale = IndexSpec::new(["legacy"], false);
    connector
        .store(BLOG_URL)
        .unwrap()
        .create_index("authors", stale.clone())
        .await
        .unwrap();

    graph.connect(BLOG_URL).await.unwrap();

    let indexes = connector.store(BLOG_URL).unwrap().list_indexes("authors").await.unwrap();
    assert!(!indexes.contains(&stale));
    assert!(indexes.iter().any(|index| index.name == "_id_"));
}

#[tokio::test]
async fn reconnecting_keeps_the_data_of_the_same_url() {
    let (registry, _) = registry().await;
    let graph = registry.graph("blog");
    graph.connect(BLOG_URL).await.unwrap();
    graph.save(&new(&graph, "Author").with("name", "Ada").unwrap()).await.unwrap();

    graph.disconnect().await.unwrap();
    graph.disconnect().await.unwrap();
    assert!(!graph.is_connected().await);

    graph.connect(BLOG_URL).await.unwrap();
    assert_eq!(count(&graph, "authors").await, 1);

    graph.connect("memory://elsewhere").await.unwrap();
    assert_eq!(count(&graph, "authors").await, 0);
}

#[tokio::test]
async fn connected_callbacks_run_now_and_on_every_connect() {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use doclink::collection::CollectionHandle;
    use futures::future::BoxFuture;

    let (registry, _) = registry().await;
    let graph = registry.graph("blog");
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    graph
        .on_connected(
            "authors",
            Arc::new(move |_collection: CollectionHandle| -> BoxFuture<'static, OdmResult<()>> {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok(()) })
            }),
        )
        .await
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    graph.connect(BLOG_URL).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    graph.connect(BLOG_URL).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn connect_all_uses_the_configured_urls() {
    let (registry, _) = registry().await;
    let config = RegistryConfig::from_json(
        r#"{ "graphs": { "blog": { "url": "memory://blog" }, "audit": { "url": "memory://audit" } } }"#,
    )
    .unwrap();

    registry.connect_all(&config).await.unwrap();
    assert!(registry.graph("blog").is_connected().await);
    assert!(registry.graph("audit").is_connected().await);

    registry.disconnect_all().await.unwrap();
    assert!(!registry.graph("blog").is_connected().await);
}

#[tokio::test]
async fn unsupported_urls_fail_to_connect() {
    let (registry, _) = registry().await;
    let err = registry.graph("blog").connect("postgres://localhost").await.unwrap_err();

    assert!(matches!(err, OdmError::Connection { graph, .. } if graph == "blog"));
    assert!(!registry.graph("blog").is_connected().await);
}
