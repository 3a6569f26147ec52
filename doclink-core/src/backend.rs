//! Storage backend abstraction for the document store.
//!
//! This module defines the driver contract the mapping layer consumes, allowing graphs to
//! run against different storage implementations (in-memory, MongoDB).
//!
//! # Overview
//!
//! The [`StoreBackend`] trait provides a unified async interface over one database:
//! upserts, deletes, aggregation, bounded counts and index administration. A
//! [`StoreConnector`] turns a connection URL into a backend and is what a
//! [`ConnectionRegistry`](crate::registry::ConnectionRegistry) is constructed with.
//!
//! # Examples
//!
//! ```ignore
//! use doclink::backend::StoreBackend;
//! use doclink::query::Filter;
//! use bson::doc;
//!
//! let backend = MyBackendImpl::new();
//!
//! backend
//!     .replace_document("users", Filter::eq("_id", 1), doc! { "_id": 1, "name": "Alice" })
//!     .await?;
//! ```

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use bson::Document;
use futures::stream::BoxStream;

use crate::{error::OdmResult, pipeline::Stage, query::Expr};

/// Stream of documents produced by an aggregation.
pub type DocumentStream = BoxStream<'static, OdmResult<Document>>;

/// Name of the built-in identifier index, never dropped by index synchronization.
pub const ID_INDEX: &str = "_id_";

/// Declaration of a store index over on-document keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<String>,
    pub unique: bool,
}

impl IndexSpec {
    /// Creates an ascending index named after its keys, `a_1_b_1` style.
    pub fn new<I, S>(keys: I, unique: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys = keys.into_iter().map(Into::into).collect::<Vec<String>>();
        let name = keys
            .iter()
            .map(|k| format!("{k}_1"))
            .collect::<Vec<_>>()
            .join("_");

        Self { name, keys, unique }
    }
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks. The exact concurrency model is implementation-specific.
///
/// # Error Handling
///
/// Write operations that violate a unique index fail with
/// [`OdmError::DuplicateKey`](crate::error::OdmError::DuplicateKey), naming the index. Other
/// store-level failures surface as [`OdmError::Backend`](crate::error::OdmError::Backend).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Replaces the single document matching `filter`, inserting `document` if none matches.
    ///
    /// # Arguments
    ///
    /// * `collection` - The name of the collection. Created automatically if it doesn't exist.
    /// * `filter` - Filter over on-document keys selecting the document to replace
    /// * `document` - The full replacement document
    async fn replace_document(
        &self,
        collection: &str,
        filter: Expr,
        document: Document,
    ) -> OdmResult<()>;

    /// Deletes the first document matching `filter`. Returns the number of deleted documents.
    async fn delete_one(&self, collection: &str, filter: Expr) -> OdmResult<u64>;

    /// Deletes every document matching `filter`. Returns the number of deleted documents.
    async fn delete_many(&self, collection: &str, filter: Expr) -> OdmResult<u64>;

    /// Runs an aggregation pipeline and streams the resulting documents.
    ///
    /// # Arguments
    ///
    /// * `collection` - The collection the pipeline starts from
    /// * `pipeline` - The stages to apply, in order
    async fn aggregate(&self, collection: &str, pipeline: Vec<Stage>) -> OdmResult<DocumentStream>;

    /// Counts documents matching `filter`, stopping at `limit` when given.
    async fn count_documents(
        &self,
        collection: &str,
        filter: Option<Expr>,
        limit: Option<u64>,
    ) -> OdmResult<u64>;

    /// Creates an index. Creating an index that already exists with the same keys is a no-op.
    ///
    /// # Note
    ///
    /// If the index is unique and existing documents violate it, the backend returns an error.
    async fn create_index(&self, collection: &str, index: IndexSpec) -> OdmResult<()>;

    /// Drops an index by name.
    async fn drop_index(&self, collection: &str, name: &str) -> OdmResult<()>;

    /// Lists the indexes of a collection, including the built-in identifier index.
    async fn list_indexes(&self, collection: &str) -> OdmResult<Vec<IndexSpec>>;

    /// Releases the resources held by the backend.
    ///
    /// The default implementation is a no-op, but backends with external connections
    /// should override this.
    async fn shutdown(&self) -> OdmResult<()> {
        Ok(())
    }
}

/// Factory establishing backends from connection URLs.
#[async_trait]
pub trait StoreConnector: Send + Sync + Debug {
    /// Connects to the store at `url`.
    ///
    /// # Errors
    ///
    /// Fails with [`OdmError::Connection`](crate::error::OdmError::Connection) when the URL is
    /// malformed or the store cannot be reached.
    async fn connect(&self, graph: &str, url: &str) -> OdmResult<Arc<dyn StoreBackend>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_names_follow_keys() {
        assert_eq!(IndexSpec::new(["name"], true).name, "name_1");
        assert_eq!(IndexSpec::new(["postId", "tagId"], true).name, "postId_1_tagId_1");
    }
}
