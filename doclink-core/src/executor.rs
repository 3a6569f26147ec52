//! Query execution.
//!
//! Query values are built from a [`Graph`] and run with `exec()` or by awaiting them. The
//! first execution compiles the query, issues one aggregation against the class collection
//! and decodes the whole result set in a single pass. The value then keeps its results:
//! executing it again, or a clone of it, returns the same objects without a round trip.
//! Refining an executed query with a builder method yields a fresh, unexecuted one.
//!
//! | Flavor | Built with | Yields |
//! |---|---|---|
//! | [`ListQuery`] | [`Graph::find`], [`Graph::all`], [`Graph::query`] | `Vec<Object>` |
//! | [`SingleQuery`] | [`Graph::get`], [`ListQuery::first`] | `Object`, or `NotFound` |
//! | [`OptionalQuery`] | [`ListQuery::optional`] | `Option<Object>` |
//! | [`ExistsQuery`] | [`ListQuery::exists`] | `bool` |
//!
//! # Example
//!
//! ```ignore
//! let posts = graph
//!     .find("Post", Filter::eq("published", true))
//!     .order("title", SortDirection::Asc)
//!     .include("author")
//!     .await?;
//!
//! let ada = graph.get("Author", "65a000000000000000000001").await?;
//! ```

use std::{future::IntoFuture, sync::Arc};

use bson::{Bson, Document};
use futures::{StreamExt, TryStreamExt, future::BoxFuture, stream::BoxStream};
use mea::mutex::Mutex;

use crate::{
    compile,
    decode::{self, Decoder},
    error::{OdmError, OdmResult},
    object::Object,
    page::{Page, PaginationParams},
    query::{Expr, Include, Query, SortDirection},
    registry::Graph,
};

/// Lazily decoded query results.
pub type ObjectStream = BoxStream<'static, OdmResult<Object>>;

impl Graph {
    /// Objects of `class` matching `filter`.
    pub fn find(&self, class: &str, filter: Expr) -> ListQuery {
        self.query(Query::find(class, filter))
    }

    /// Every object of `class`.
    pub fn all(&self, class: &str) -> ListQuery {
        self.query(Query::all(class))
    }

    /// The object of `class` with the given identifier.
    pub fn get(&self, class: &str, id: impl Into<Bson>) -> SingleQuery {
        self.query(Query::id(class, id)).first()
    }

    /// Runs a prepared query.
    pub fn query(&self, query: Query) -> ListQuery {
        ListQuery {
            graph: self.clone(),
            query,
            results: ResultCache::default(),
        }
    }

    async fn fetch(&self, query: &Query) -> OdmResult<Vec<Object>> {
        let schema = self.schema();
        let class = schema.class(&query.class)?;
        let stages = compile::build_pipeline(&schema, query)?;

        let collection = self.class_collection(&class).await?;
        let documents: Vec<Document> = collection.aggregate(stages).await?.try_collect().await?;

        decode::decode_root_list(&schema, &documents, &class)
    }

    async fn fetch_first(&self, query: &Query) -> OdmResult<Option<Object>> {
        Ok(self.fetch(query).await?.into_iter().next())
    }

    async fn count_matches(&self, query: &Query, limit: Option<u64>) -> OdmResult<u64> {
        let schema = self.schema();
        let class = schema.class(&query.class)?;
        let filter = query
            .filter
            .as_ref()
            .map(|filter| compile::translate_filter(&schema, &class, filter))
            .transpose()?;

        self.class_collection(&class)
            .await?
            .count(filter, limit)
            .await
    }
}

/// Results kept by an executed query, shared between its clones.
struct ResultCache<T>(Arc<Mutex<Option<T>>>);

impl<T> Default for ResultCache<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }
}

impl<T> Clone for ResultCache<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> std::fmt::Debug for ResultCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResultCache")
    }
}

impl<T: Clone> ResultCache<T> {
    /// The kept results, or those of `fetch` once it succeeds. Failures are not kept.
    ///
    /// The lock is held across the fetch so concurrent executions share one round trip.
    async fn get_or_fetch<F>(&self, fetch: F) -> OdmResult<T>
    where
        F: Future<Output = OdmResult<T>>,
    {
        let mut slot = self.0.lock().await;
        if let Some(results) = slot.as_ref() {
            return Ok(results.clone());
        }

        let results = fetch.await?;
        *slot = Some(results.clone());
        Ok(results)
    }
}

/// A query returning every match.
#[derive(Debug, Clone)]
pub struct ListQuery {
    graph: Graph,
    query: Query,
    results: ResultCache<Vec<Object>>,
}

impl ListQuery {
    /// The query as built so far.
    pub fn query(&self) -> &Query {
        &self.query
    }

    fn refine(self, f: impl FnOnce(Query) -> Query) -> Self {
        Self {
            graph: self.graph,
            query: f(self.query),
            results: ResultCache::default(),
        }
    }

    pub fn filter(self, filter: Expr) -> Self {
        self.refine(|query| query.filter(filter))
    }

    pub fn order(self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.refine(|query| query.order(field, direction))
    }

    pub fn skip(self, n: u64) -> Self {
        self.refine(|query| query.skip(n))
    }

    pub fn limit(self, n: u64) -> Self {
        self.refine(|query| query.limit(n))
    }

    pub fn include(self, field: impl Into<String>) -> Self {
        self.refine(|query| query.include(field))
    }

    pub fn include_with(self, include: Include) -> Self {
        self.refine(|query| query.include_with(include))
    }

    /// Narrows to the first match, failing with [`OdmError::NotFound`] when there is none.
    pub fn first(self) -> SingleQuery {
        SingleQuery {
            graph: self.graph,
            query: self.query.limit(1),
            result: ResultCache::default(),
        }
    }

    /// Narrows to the first match, if any.
    pub fn optional(self) -> OptionalQuery {
        OptionalQuery {
            graph: self.graph,
            query: self.query.limit(1),
            result: ResultCache::default(),
        }
    }

    /// Whether anything matches. Includes, sorts and pagination are ignored.
    pub fn exists(self) -> ExistsQuery {
        ExistsQuery {
            graph: self.graph,
            query: self.query,
            result: ResultCache::default(),
        }
    }

    /// Runs the query on first use and returns the kept results afterwards.
    pub async fn exec(&self) -> OdmResult<Vec<Object>> {
        self.results.get_or_fetch(self.graph.fetch(&self.query)).await
    }

    /// Number of matches, ignoring skip and limit. Always asks the store.
    pub async fn count(&self) -> OdmResult<u64> {
        self.graph.count_matches(&self.query, None).await
    }

    /// Fetches one page of matches together with the total match count.
    pub async fn page(&self, params: PaginationParams) -> OdmResult<Page<Object>> {
        let total = self.count().await?;
        let items = self
            .graph
            .fetch(&self.query.clone().skip(params.offset()).limit(params.per_page))
            .await?;

        Ok(params.page_of(items, total))
    }

    /// Streams matches, decoding each document as it arrives.
    ///
    /// Related instances are shared across the stream the same way they are within `exec`.
    pub async fn stream(&self) -> OdmResult<ObjectStream> {
        let schema = self.graph.schema();
        let class = schema.class(&self.query.class)?;
        let stages = compile::build_pipeline(&schema, &self.query)?;
        let documents = self
            .graph
            .class_collection(&class)
            .await?
            .aggregate(stages)
            .await?;

        let mut decoder = Decoder::new(schema);
        Ok(documents
            .map(move |document| document.and_then(|document| decoder.decode(&class, &document)))
            .boxed())
    }
}

impl IntoFuture for ListQuery {
    type Output = OdmResult<Vec<Object>>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.exec().await })
    }
}

/// A query returning exactly one object.
#[derive(Debug, Clone)]
pub struct SingleQuery {
    graph: Graph,
    query: Query,
    result: ResultCache<Option<Object>>,
}

impl SingleQuery {
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn include(self, field: impl Into<String>) -> Self {
        Self {
            graph: self.graph,
            query: self.query.include(field),
            result: ResultCache::default(),
        }
    }

    pub fn include_with(self, include: Include) -> Self {
        Self {
            graph: self.graph,
            query: self.query.include_with(include),
            result: ResultCache::default(),
        }
    }

    /// Relaxes to an optional result, sharing any result already fetched.
    pub fn optional(self) -> OptionalQuery {
        OptionalQuery {
            graph: self.graph,
            query: self.query,
            result: self.result,
        }
    }

    /// # Errors
    ///
    /// [`OdmError::NotFound`] describing the filter, sort and skip when nothing matches.
    pub async fn exec(&self) -> OdmResult<Object> {
        self.result
            .get_or_fetch(self.graph.fetch_first(&self.query))
            .await?
            .ok_or_else(|| OdmError::NotFound {
                class: self.query.class.clone(),
                description: self.query.describe(),
            })
    }
}

impl IntoFuture for SingleQuery {
    type Output = OdmResult<Object>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.exec().await })
    }
}

/// A query returning at most one object.
#[derive(Debug, Clone)]
pub struct OptionalQuery {
    graph: Graph,
    query: Query,
    result: ResultCache<Option<Object>>,
}

impl OptionalQuery {
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn include(self, field: impl Into<String>) -> Self {
        Self {
            graph: self.graph,
            query: self.query.include(field),
            result: ResultCache::default(),
        }
    }

    pub async fn exec(&self) -> OdmResult<Option<Object>> {
        self.result.get_or_fetch(self.graph.fetch_first(&self.query)).await
    }
}

impl IntoFuture for OptionalQuery {
    type Output = OdmResult<Option<Object>>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.exec().await })
    }
}

/// A bounded existence check.
#[derive(Debug, Clone)]
pub struct ExistsQuery {
    graph: Graph,
    query: Query,
    result: ResultCache<bool>,
}

impl ExistsQuery {
    pub async fn exec(&self) -> OdmResult<bool> {
        self.result
            .get_or_fetch(async { self.graph.count_matches(&self.query, Some(1)).await.map(|n| n > 0) })
            .await
    }
}

impl IntoFuture for ExistsQuery {
    type Output = OdmResult<bool>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.exec().await })
    }
}
