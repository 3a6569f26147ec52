use std::sync::Arc;

use async_trait::async_trait;
use bson::{Document, doc};
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    Client, Collection as MongoCollection, IndexModel,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, IndexOptions},
};
use doclink_core::{
    backend::{DocumentStream, IndexSpec, StoreBackend, StoreConnector},
    error::{OdmError, OdmResult},
    pipeline::Stage,
    query::{Expr, QueryVisitor},
};

use crate::query::{MongoQueryTranslator, pipeline_documents};

/// Server error code for unique index violations.
const DUPLICATE_KEY: i32 = 11000;

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }

    fn filter(expr: &Expr) -> OdmResult<Document> {
        MongoQueryTranslator.visit_expr(expr)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn replace_document(
        &self,
        collection: &str,
        filter: Expr,
        document: Document,
    ) -> OdmResult<()> {
        self.get_collection(collection)
            .replace_one(Self::filter(&filter)?, document)
            .upsert(true)
            .await
            .map_err(|e| translate_error(collection, e))?;

        Ok(())
    }

    async fn delete_one(&self, collection: &str, filter: Expr) -> OdmResult<u64> {
        Ok(self
            .get_collection(collection)
            .delete_one(Self::filter(&filter)?)
            .await
            .map_err(|e| translate_error(collection, e))?
            .deleted_count)
    }

    async fn delete_many(&self, collection: &str, filter: Expr) -> OdmResult<u64> {
        Ok(self
            .get_collection(collection)
            .delete_many(Self::filter(&filter)?)
            .await
            .map_err(|e| translate_error(collection, e))?
            .deleted_count)
    }

    async fn aggregate(&self, collection: &str, pipeline: Vec<Stage>) -> OdmResult<DocumentStream> {
        let pipeline = pipeline_documents(&pipeline)?;
        tracing::trace!(collection, ?pipeline, "running aggregation");

        let collection_name = collection.to_string();
        Ok(self
            .get_collection(collection)
            .aggregate(pipeline)
            .await
            .map_err(|e| translate_error(collection, e))?
            .map_err(move |e| translate_error(&collection_name, e))
            .boxed())
    }

    async fn count_documents(
        &self,
        collection: &str,
        filter: Option<Expr>,
        limit: Option<u64>,
    ) -> OdmResult<u64> {
        let filter = match &filter {
            Some(expr) => Self::filter(expr)?,
            None => doc! {},
        };

        let coll = self.get_collection(collection);
        let mut action = coll.count_documents(filter);
        if let Some(limit) = limit {
            action = action.limit(limit);
        }

        action.await.map_err(|e| translate_error(collection, e))
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> OdmResult<()> {
        let mut keys = Document::new();
        for key in &index.keys {
            keys.insert(key.clone(), 1);
        }

        self.get_collection(collection)
            .create_index(
                IndexModel::builder()
                    .keys(keys)
                    .options(
                        IndexOptions::builder()
                            .name(index.name.clone())
                            .unique(index.unique)
                            .build(),
                    )
                    .build(),
            )
            .await
            .map_err(|e| translate_error(collection, e))?;

        Ok(())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> OdmResult<()> {
        self.get_collection(collection)
            .drop_index(name)
            .await
            .map_err(|e| translate_error(collection, e))?;

        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> OdmResult<Vec<IndexSpec>> {
        let models = match self.get_collection(collection).list_indexes().await {
            Ok(cursor) => cursor
                .try_collect::<Vec<IndexModel>>()
                .await
                .map_err(|e| translate_error(collection, e))?,
            // Listing the indexes of a collection that does not exist yet.
            Err(e) if matches!(e.kind.as_ref(), ErrorKind::Command(c) if c.code == 26) => Vec::new(),
            Err(e) => return Err(translate_error(collection, e)),
        };

        Ok(models.into_iter().map(index_spec).collect())
    }

    async fn shutdown(&self) -> OdmResult<()> {
        self.client.clone().shutdown().await;

        Ok(())
    }
}

fn index_spec(model: IndexModel) -> IndexSpec {
    let keys = model.keys.keys().cloned().collect::<Vec<_>>();
    let (name, unique) = match model.options {
        Some(options) => (options.name, options.unique.unwrap_or(false)),
        None => (None, false),
    };

    match name {
        Some(name) => IndexSpec { name, keys, unique },
        None => IndexSpec::new(keys, unique),
    }
}

/// Maps driver errors into store errors, recognizing unique index violations.
fn translate_error(collection: &str, err: MongoError) -> OdmError {
    let duplicate = match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY => Some(e.message.clone()),
        ErrorKind::Command(e) if e.code == DUPLICATE_KEY => Some(e.message.clone()),
        _ => None,
    };

    match duplicate {
        Some(message) => {
            let (index, value) = parse_duplicate_message(&message);
            OdmError::DuplicateKey {
                collection: collection.to_string(),
                index,
                value,
            }
        }
        None => OdmError::Backend(err.to_string()),
    }
}

/// Extracts the index name and key value from a server message such as
/// `E11000 duplicate key error collection: blog.authors index: name_1 dup key: { name: "Ada" }`.
fn parse_duplicate_message(message: &str) -> (String, Option<String>) {
    let index = message
        .split_once("index: ")
        .map(|(_, rest)| rest.split_whitespace().next().unwrap_or_default().to_string())
        .unwrap_or_default();
    let value = message
        .split_once("dup key: ")
        .map(|(_, rest)| rest.trim().to_string());

    (index, value)
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }

    pub async fn build(self) -> OdmResult<MongoDbStore> {
        let options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| OdmError::Backend(e.to_string()))?;

        Ok(MongoDbStore::new(
            Client::with_options(options).map_err(|e| OdmError::Backend(e.to_string()))?,
            self.database,
        ))
    }
}

/// Connects graphs to MongoDB deployments.
///
/// The database is the one named in the connection string, or the graph name when the
/// string names none.
#[derive(Debug, Default, Clone)]
pub struct MongoConnector;

impl MongoConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StoreConnector for MongoConnector {
    async fn connect(&self, graph: &str, url: &str) -> OdmResult<Arc<dyn StoreBackend>> {
        let failed = |e: MongoError| OdmError::Connection {
            graph: graph.to_string(),
            message: e.to_string(),
        };

        let options = ClientOptions::parse(url).await.map_err(failed)?;
        let database = options
            .default_database
            .clone()
            .unwrap_or_else(|| graph.to_string());
        let client = Client::with_options(options).map_err(failed)?;

        client
            .database(&database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(failed)?;
        tracing::debug!(graph, database, "mongodb deployment reachable");

        Ok(Arc::new(MongoDbStore::new(client, database)))
    }
}
