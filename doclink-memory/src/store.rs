//! In-memory storage implementation of the store driver contract.
//!
//! Documents live in per-collection maps keyed by their rendered `_id`, in insertion order.
//! Declared unique indexes are enforced on every write.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use futures::StreamExt;
use indexmap::IndexMap;
use mea::rwlock::RwLock;

use doclink_core::{
    backend::{DocumentStream, ID_INDEX, IndexSpec, StoreBackend, StoreConnector},
    error::{OdmError, OdmResult},
    keys::ID_KEY,
    pipeline::Stage,
    query::{Expr, Filter},
};

use crate::{
    aggregate,
    evaluator::{Comparable, DocumentEvaluator, get_path},
};

/// URL scheme accepted by [`MemoryConnector`].
pub const MEMORY_SCHEME: &str = "memory://";

#[derive(Debug, Default, Clone)]
struct CollectionState {
    documents: IndexMap<String, Document>,
    indexes: IndexMap<String, IndexSpec>,
}

type StoreMap = HashMap<String, CollectionState>;

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state; clones share the
/// same data. Pipelines scan whole collections, which is fine for tests and small data sets.
///
/// # Example
///
/// ```ignore
/// use doclink_memory::InMemoryStore;
/// use doclink::backend::StoreBackend;
/// use doclink::query::Filter;
/// use bson::doc;
///
/// let store = InMemoryStore::builder().build().await?;
/// store
///     .replace_document("users", Filter::eq("_id", 1), doc! { "_id": 1, "name": "Alice" })
///     .await?;
/// assert_eq!(store.documents("users").await.len(), 1);
/// ```
#[derive(Default, Clone)]
pub struct InMemoryStore {
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Snapshot of a collection's documents in insertion order.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.store
            .read()
            .await
            .get(collection)
            .map(|state| state.documents.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of the collections holding documents or indexes.
    pub async fn collection_names(&self) -> Vec<String> {
        let mut names = self.store.read().await.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore").finish_non_exhaustive()
    }
}

fn id_index() -> IndexSpec {
    IndexSpec {
        name: ID_INDEX.to_string(),
        keys: vec![ID_KEY.to_string()],
        unique: true,
    }
}

/// Key tuple of `document` under `index`; missing keys count as null.
fn index_key<'a>(document: &'a Document, index: &IndexSpec) -> Vec<Comparable<'a>> {
    index
        .keys
        .iter()
        .map(|key| get_path(document, key).map(Comparable::from).unwrap_or(Comparable::Null))
        .collect()
}

fn render_key(document: &Document, index: &IndexSpec) -> String {
    let pairs = index
        .keys
        .iter()
        .map(|key| {
            let value = get_path(document, key).cloned().unwrap_or(Bson::Null);
            format!("{key}: {value}")
        })
        .collect::<Vec<_>>();

    format!("{{ {} }}", pairs.join(", "))
}

/// Finds a unique index that `document` would violate, ignoring the document stored under
/// `replacing`.
fn violated_index(
    collection: &str,
    state: &CollectionState,
    document: &Document,
    replacing: Option<&str>,
) -> Option<OdmError> {
    for index in state.indexes.values().filter(|i| i.unique) {
        let key = index_key(document, index);
        let clash = state
            .documents
            .iter()
            .filter(|(id, _)| Some(id.as_str()) != replacing)
            .any(|(_, other)| index_key(other, index) == key);
        if clash {
            return Some(OdmError::DuplicateKey {
                collection: collection.to_string(),
                index: index.name.clone(),
                value: Some(render_key(document, index)),
            });
        }
    }

    None
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn replace_document(&self, collection: &str, filter: Expr, document: Document) -> OdmResult<()> {
        let mut store = self.store.write().await;
        let state = store.entry(collection.to_string()).or_default();

        let mut replaced = None;
        for (key, existing) in &state.documents {
            if DocumentEvaluator::new(existing).evaluate(&filter)? {
                replaced = Some(key.clone());
                break;
            }
        }

        let mut document = document;
        match &replaced {
            Some(key) => {
                if !document.contains_key(ID_KEY) {
                    if let Some(id) = state.documents.get(key).and_then(|d| d.get(ID_KEY)).cloned() {
                        document.insert(ID_KEY, id);
                    }
                }
            }
            None => {
                if !document.contains_key(ID_KEY) {
                    document.insert(ID_KEY, ObjectId::new());
                }
            }
        }

        let key = document.get(ID_KEY).map(|id| id.to_string()).unwrap_or_default();
        if replaced.as_deref() != Some(key.as_str()) && state.documents.contains_key(&key) {
            return Err(OdmError::DuplicateKey {
                collection: collection.to_string(),
                index: ID_INDEX.to_string(),
                value: Some(render_key(&document, &id_index())),
            });
        }
        if let Some(err) = violated_index(collection, state, &document, replaced.as_deref()) {
            return Err(err);
        }

        match replaced {
            Some(old) if old == key => {
                state.documents.insert(key, document);
            }
            Some(old) => {
                if let Some(index) = state.documents.get_index_of(&old) {
                    state.documents.shift_remove_index(index);
                    state.documents.shift_insert(index, key, document);
                }
            }
            None => {
                state.documents.insert(key, document);
            }
        }

        Ok(())
    }

    async fn delete_one(&self, collection: &str, filter: Expr) -> OdmResult<u64> {
        let mut store = self.store.write().await;
        let Some(state) = store.get_mut(collection) else {
            return Ok(0);
        };

        let mut target = None;
        for (key, document) in &state.documents {
            if DocumentEvaluator::new(document).evaluate(&filter)? {
                target = Some(key.clone());
                break;
            }
        }

        Ok(match target {
            Some(key) => {
                state.documents.shift_remove(&key);
                1
            }
            None => 0,
        })
    }

    async fn delete_many(&self, collection: &str, filter: Expr) -> OdmResult<u64> {
        let mut store = self.store.write().await;
        let Some(state) = store.get_mut(collection) else {
            return Ok(0);
        };

        let mut doomed = Vec::new();
        for (key, document) in &state.documents {
            if DocumentEvaluator::new(document).evaluate(&filter)? {
                doomed.push(key.clone());
            }
        }
        for key in &doomed {
            state.documents.shift_remove(key);
        }

        Ok(doomed.len() as u64)
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Stage>) -> OdmResult<DocumentStream> {
        let store = self.store.read().await;
        let source = |name: &str| -> Vec<Document> {
            store
                .get(name)
                .map(|state| state.documents.values().cloned().collect())
                .unwrap_or_default()
        };

        let documents = aggregate::run(&pipeline, source(collection), &source)?;
        Ok(futures::stream::iter(documents.into_iter().map(Ok)).boxed())
    }

    async fn count_documents(&self, collection: &str, filter: Option<Expr>, limit: Option<u64>) -> OdmResult<u64> {
        let store = self.store.read().await;
        let Some(state) = store.get(collection) else {
            return Ok(0);
        };

        let mut count = 0;
        for document in state.documents.values() {
            if limit.is_some_and(|limit| count >= limit) {
                break;
            }
            let matched = match &filter {
                Some(filter) => DocumentEvaluator::new(document).evaluate(filter)?,
                None => true,
            };
            if matched {
                count += 1;
            }
        }

        Ok(count)
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> OdmResult<()> {
        let mut store = self.store.write().await;
        let state = store.entry(collection.to_string()).or_default();
        if state.indexes.contains_key(&index.name) {
            return Ok(());
        }

        if index.unique {
            let documents = state.documents.values().collect::<Vec<_>>();
            for (i, document) in documents.iter().enumerate() {
                let key = index_key(document, &index);
                if documents[i + 1..].iter().any(|other| index_key(other, &index) == key) {
                    return Err(OdmError::DuplicateKey {
                        collection: collection.to_string(),
                        index: index.name.clone(),
                        value: Some(render_key(document, &index)),
                    });
                }
            }
        }

        state.indexes.insert(index.name.clone(), index);
        Ok(())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> OdmResult<()> {
        let mut store = self.store.write().await;
        let removed = store
            .get_mut(collection)
            .and_then(|state| state.indexes.shift_remove(name));

        match removed {
            Some(_) => Ok(()),
            None => Err(OdmError::Backend(format!("index {name} not found on {collection}"))),
        }
    }

    async fn list_indexes(&self, collection: &str) -> OdmResult<Vec<IndexSpec>> {
        let store = self.store.read().await;
        let mut indexes = vec![id_index()];
        if let Some(state) = store.get(collection) {
            indexes.extend(state.indexes.values().cloned());
        }

        Ok(indexes)
    }
}

/// Builder for [`InMemoryStore`], optionally seeded with documents.
#[derive(Default)]
pub struct InMemoryStoreBuilder {
    seed: Vec<(String, Document)>,
}

impl InMemoryStoreBuilder {
    /// Adds a document to a collection of the built store.
    pub fn document(mut self, collection: impl Into<String>, document: Document) -> Self {
        self.seed.push((collection.into(), document));
        self
    }

    pub async fn build(self) -> OdmResult<InMemoryStore> {
        let store = InMemoryStore::new();
        for (collection, document) in self.seed {
            let filter = match document.get(ID_KEY) {
                Some(id) => Filter::eq(ID_KEY, id.clone()),
                None => Filter::not_exists(ID_KEY),
            };
            store.replace_document(&collection, filter, document).await?;
        }

        Ok(store)
    }
}

/// Connector handing out in-memory stores for `memory://<name>` URLs.
///
/// Connecting twice to the same URL yields the same store, so data survives a reconnect.
#[derive(Default, Clone)]
pub struct MemoryConnector {
    stores: Arc<parking_lot::Mutex<HashMap<String, InMemoryStore>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store behind a URL, if something connected to it.
    pub fn store(&self, url: &str) -> Option<InMemoryStore> {
        self.stores.lock().get(url).cloned()
    }
}

impl fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut urls = self.stores.lock().keys().cloned().collect::<Vec<_>>();
        urls.sort();
        f.debug_struct("MemoryConnector").field("urls", &urls).finish()
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, graph: &str, url: &str) -> OdmResult<Arc<dyn StoreBackend>> {
        if !url.starts_with(MEMORY_SCHEME) {
            return Err(OdmError::Connection {
                graph: graph.to_string(),
                message: format!("unsupported url {url}, expected {MEMORY_SCHEME}<name>"),
            });
        }

        let store = self
            .stores
            .lock()
            .entry(url.to_string())
            .or_default()
            .clone();
        tracing::debug!(graph, url, "in-memory store attached");

        Ok(Arc::new(store))
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use futures::TryStreamExt;

    use super::*;

    #[tokio::test]
    async fn replace_inserts_then_replaces_in_place() {
        let store = InMemoryStore::new();
        store
            .replace_document("users", Filter::eq("_id", 1), doc! { "_id": 1, "name": "Ada" })
            .await
            .unwrap();
        store
            .replace_document("users", Filter::eq("_id", 2), doc! { "_id": 2, "name": "Bob" })
            .await
            .unwrap();
        store
            .replace_document("users", Filter::eq("_id", 1), doc! { "_id": 1, "name": "Ada L." })
            .await
            .unwrap();

        let documents = store.documents("users").await;
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].get_str("name").unwrap(), "Ada L.");
    }

    #[tokio::test]
    async fn unique_indexes_reject_duplicates() {
        let store = InMemoryStore::new();
        store
            .create_index("users", IndexSpec::new(["name"], true))
            .await
            .unwrap();
        store
            .replace_document("users", Filter::eq("_id", 1), doc! { "_id": 1, "name": "X" })
            .await
            .unwrap();

        let err = store
            .replace_document("users", Filter::eq("_id", 2), doc! { "_id": 2, "name": "X" })
            .await
            .unwrap_err();
        assert!(matches!(err, OdmError::DuplicateKey { index, .. } if index == "name_1"));

        // Rewriting the same document is not a clash with itself.
        store
            .replace_document("users", Filter::eq("_id", 1), doc! { "_id": 1, "name": "X" })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rows_without_ids_get_generated_ones() {
        let store = InMemoryStore::new();
        let filter = Filter::and([Filter::eq("postId", 1), Filter::eq("tagId", 2)]);
        store
            .replace_document("postsTagsTagsPosts", filter.clone(), doc! { "postId": 1, "tagId": 2 })
            .await
            .unwrap();
        store
            .replace_document("postsTagsTagsPosts", filter, doc! { "postId": 1, "tagId": 2 })
            .await
            .unwrap();

        let rows = store.documents("postsTagsTagsPosts").await;
        assert_eq!(rows.len(), 1);
        assert!(matches!(rows[0].get("_id"), Some(Bson::ObjectId(_))));
    }

    #[tokio::test]
    async fn count_stops_at_limit() {
        let store = InMemoryStore::builder()
            .document("tags", doc! { "_id": 1, "label": "a" })
            .document("tags", doc! { "_id": 2, "label": "b" })
            .document("tags", doc! { "_id": 3, "label": "c" })
            .build()
            .await
            .unwrap();

        assert_eq!(store.count_documents("tags", None, None).await.unwrap(), 3);
        assert_eq!(store.count_documents("tags", None, Some(1)).await.unwrap(), 1);
        assert_eq!(
            store
                .count_documents("tags", Some(Filter::ne("label", "a")), None)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn aggregate_streams_pipeline_results() {
        let store = InMemoryStore::builder()
            .document("tags", doc! { "_id": 1, "label": "a" })
            .document("tags", doc! { "_id": 2, "label": "b" })
            .build()
            .await
            .unwrap();

        let documents: Vec<Document> = store
            .aggregate("tags", vec![Stage::Match(Filter::eq("label", "b"))])
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(documents, vec![doc! { "_id": 2, "label": "b" }]);
    }

    #[tokio::test]
    async fn indexes_are_listed_after_the_id_index() {
        let store = InMemoryStore::new();
        store
            .create_index("tags", IndexSpec::new(["label"], true))
            .await
            .unwrap();

        let names = store
            .list_indexes("tags")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["_id_", "label_1"]);

        store.drop_index("tags", "label_1").await.unwrap();
        assert!(store.drop_index("tags", "label_1").await.is_err());
    }

    #[tokio::test]
    async fn connector_requires_memory_urls() {
        let connector = MemoryConnector::new();
        let err = connector.connect("blog", "mongodb://localhost").await.unwrap_err();
        assert!(matches!(err, OdmError::Connection { graph, .. } if graph == "blog"));

        connector.connect("blog", "memory://blog").await.unwrap();
        assert!(connector.store("memory://blog").is_some());
    }
}
