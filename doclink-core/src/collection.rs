//! Collection handles.
//!
//! A [`CollectionHandle`] pairs a collection name with the backend of the graph it was
//! obtained from. Handles are cheap to clone and are cached per graph by the
//! [`ConnectionRegistry`](crate::registry::ConnectionRegistry).
//!
//! # Example
//!
//! ```ignore
//! let users = graph.collection("users").await?;
//! let total = users.count(None, None).await?;
//! ```

use std::{fmt, sync::Arc};

use bson::Document;

use crate::{
    backend::{DocumentStream, IndexSpec, StoreBackend},
    error::OdmResult,
    pipeline::{self, Stage},
    query::Expr,
};

/// A named collection of a connected graph.
#[derive(Clone)]
pub struct CollectionHandle {
    name: String,
    backend: Arc<dyn StoreBackend>,
}

impl CollectionHandle {
    pub(crate) fn new(name: impl Into<String>, backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            name: name.into(),
            backend,
        }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replaces the document matching `filter`, inserting it when none matches.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::DuplicateKey`](crate::error::OdmError::DuplicateKey) when a unique
    /// index is violated.
    pub async fn replace(&self, filter: Expr, document: Document) -> OdmResult<()> {
        tracing::debug!(collection = %self.name, %filter, "replacing document");
        self.backend
            .replace_document(&self.name, filter, document)
            .await
    }

    pub async fn delete_one(&self, filter: Expr) -> OdmResult<u64> {
        tracing::debug!(collection = %self.name, %filter, "deleting one document");
        self.backend.delete_one(&self.name, filter).await
    }

    pub async fn delete_many(&self, filter: Expr) -> OdmResult<u64> {
        tracing::debug!(collection = %self.name, %filter, "deleting documents");
        self.backend.delete_many(&self.name, filter).await
    }

    /// Runs an aggregation pipeline starting from this collection.
    pub async fn aggregate(&self, stages: Vec<Stage>) -> OdmResult<DocumentStream> {
        tracing::debug!(
            collection = %self.name,
            pipeline = %pipeline::outline(&stages),
            "running aggregation"
        );
        self.backend.aggregate(&self.name, stages).await
    }

    /// Counts matching documents, stopping at `limit` when given.
    pub async fn count(&self, filter: Option<Expr>, limit: Option<u64>) -> OdmResult<u64> {
        self.backend
            .count_documents(&self.name, filter, limit)
            .await
    }

    pub async fn create_index(&self, index: IndexSpec) -> OdmResult<()> {
        tracing::debug!(collection = %self.name, index = %index.name, "creating index");
        self.backend.create_index(&self.name, index).await
    }

    pub async fn drop_index(&self, name: &str) -> OdmResult<()> {
        self.backend.drop_index(&self.name, name).await
    }

    pub async fn list_indexes(&self) -> OdmResult<Vec<IndexSpec>> {
        self.backend.list_indexes(&self.name).await
    }
}

impl fmt::Debug for CollectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
