mod common;

use doclink::prelude::*;
use futures::TryStreamExt;

use common::{blog, new};

async fn seeded(authors: usize) -> Graph {
    let graph = blog().await;
    let objects = (0..authors)
        .map(|i| new(&graph, "Author").with("name", format!("author-{i:02}")).unwrap())
        .collect::<Vec<_>>();
    graph.save_all(&objects).await.unwrap();
    graph
}

fn names(objects: &[Object]) -> Vec<String> {
    objects
        .iter()
        .filter_map(|o| o.get("name").and_then(|n| n.as_str().map(String::from)))
        .collect()
}

#[tokio::test]
async fn order_skip_and_limit_compose() {
    let graph = seeded(5).await;

    let found = graph
        .all("Author")
        .order("name", SortDirection::Desc)
        .skip(1)
        .limit(2)
        .await
        .unwrap();

    assert_eq!(names(&found), ["author-03", "author-02"]);
}

#[tokio::test]
async fn filters_use_field_names() {
    let graph = seeded(12).await;

    let found = graph
        .find("Author", Filter::starts_with("name", "author-1"))
        .order("name", SortDirection::Asc)
        .await
        .unwrap();
    assert_eq!(names(&found), ["author-10", "author-11"]);

    let count = graph
        .find("Author", Filter::starts_with("name", "author-0"))
        .limit(3)
        .count()
        .await
        .unwrap();
    assert_eq!(count, 10);
}

#[tokio::test]
async fn pages_report_neighbours_and_totals() {
    let graph = seeded(25).await;
    let query = graph.all("Author").order("name", SortDirection::Asc);

    let second = query.page(PaginationParams::new(2, 10)).await.unwrap();
    assert_eq!(second.items.len(), 10);
    assert_eq!(second.count, 25);
    assert_eq!(second.next_page, Some(3));
    assert_eq!(second.previous_page, Some(1));
    assert_eq!(names(&second.items)[0], "author-10");

    let last = query.page(PaginationParams::new(3, 10)).await.unwrap();
    assert_eq!(last.items.len(), 5);
    assert_eq!(last.next_page, None);
}

#[tokio::test]
async fn exists_checks_without_fetching() {
    let graph = seeded(3).await;

    assert!(graph.find("Author", Filter::eq("name", "author-01")).exists().await.unwrap());
    assert!(!graph.find("Author", Filter::eq("name", "nobody")).exists().await.unwrap());
}

#[tokio::test]
async fn streams_decode_lazily() {
    let graph = seeded(4).await;

    let stream = graph
        .all("Author")
        .order("name", SortDirection::Asc)
        .stream()
        .await
        .unwrap();
    let found: Vec<Object> = stream.try_collect().await.unwrap();

    assert_eq!(names(&found), ["author-00", "author-01", "author-02", "author-03"]);
}

#[tokio::test]
async fn queries_on_identifiers_accept_display_ids() {
    let graph = seeded(3).await;
    let all = graph.all("Author").order("name", SortDirection::Asc).await.unwrap();
    let ids = all.iter().filter_map(|o| o.id_string()).collect::<Vec<_>>();

    let found = graph
        .find("Author", Filter::any_of("id", vec![ids[0].clone(), ids[2].clone()]))
        .order("name", SortDirection::Asc)
        .await
        .unwrap();

    assert_eq!(names(&found), ["author-00", "author-02"]);
}

#[tokio::test]
async fn executed_queries_keep_their_results() {
    let graph = seeded(1).await;
    let query = graph.all("Author");

    let first = query.exec().await.unwrap();
    assert_eq!(first.len(), 1);

    graph.save(&new(&graph, "Author").with("name", "late").unwrap()).await.unwrap();

    let again = query.exec().await.unwrap();
    assert_eq!(again.len(), 1);
    assert!(again[0].ptr_eq(&first[0]));
    assert_eq!(query.clone().await.unwrap().len(), 1);

    // Refining starts over, and so does a freshly built query.
    assert_eq!(query.clone().order("name", SortDirection::Asc).await.unwrap().len(), 2);
    assert_eq!(graph.all("Author").await.unwrap().len(), 2);
}

#[tokio::test]
async fn single_results_are_kept_after_execution() {
    let graph = seeded(1).await;
    let query = graph.find("Author", Filter::eq("name", "late")).optional();
    assert!(query.exec().await.unwrap().is_none());

    graph.save(&new(&graph, "Author").with("name", "late").unwrap()).await.unwrap();

    assert!(query.exec().await.unwrap().is_none());
    assert!(graph.find("Author", Filter::eq("name", "late")).first().await.is_ok());
}
