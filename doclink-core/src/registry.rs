//! Connection registry and graph handles.
//!
//! A [`ConnectionRegistry`] is constructed explicitly with a [`StoreConnector`] and hands out
//! one [`Graph`] per name: repeated calls with the same name return handles to the same
//! graph. A graph owns its class schema, its connection and its cached collection handles.
//!
//! Lifecycle transitions are not serialized by the registry; callers connect and disconnect
//! a graph from one place.
//!
//! # Example
//!
//! ```ignore
//! use doclink::registry::ConnectionRegistry;
//! use doclink_memory::MemoryConnector;
//!
//! let registry = ConnectionRegistry::new(MemoryConnector::default());
//! let blog = registry.graph("blog");
//! blog.register(author_class).await?;
//! blog.connect("memory://blog").await?;
//!
//! let authors = blog.find("Author", Filter::eq("name", "A1")).exec().await?;
//! ```

use std::{collections::HashMap, fmt, sync::Arc};

use futures::future::BoxFuture;
use mea::rwlock::RwLock;
use parking_lot::Mutex;

use crate::{
    backend::{StoreBackend, StoreConnector},
    class::ClassRef,
    collection::CollectionHandle,
    config::RegistryConfig,
    error::{OdmError, OdmResult},
    index,
    schema::Schema,
};

/// Callback run against a collection once it is available.
pub type ConnectedCallback =
    Arc<dyn Fn(CollectionHandle) -> BoxFuture<'static, OdmResult<()>> + Send + Sync>;

/// Registry of named graphs sharing one connector.
pub struct ConnectionRegistry {
    connector: Arc<dyn StoreConnector>,
    graphs: Mutex<HashMap<String, Graph>>,
}

impl ConnectionRegistry {
    pub fn new(connector: impl StoreConnector + 'static) -> Self {
        Self::with_connector(Arc::new(connector))
    }

    pub fn with_connector(connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            connector,
            graphs: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the graph with the given name, creating it on first use.
    pub fn graph(&self, name: &str) -> Graph {
        self.graphs
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Graph::new(name, self.connector.clone()))
            .clone()
    }

    /// Names of the graphs created so far.
    pub fn graph_names(&self) -> Vec<String> {
        let mut names = self.graphs.lock().keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Connects every configured graph, in configuration order.
    pub async fn connect_all(&self, config: &RegistryConfig) -> OdmResult<()> {
        for (name, graph_config) in &config.graphs {
            self.graph(name).connect(&graph_config.url).await?;
        }

        Ok(())
    }

    /// Disconnects every graph.
    pub async fn disconnect_all(&self) -> OdmResult<()> {
        let graphs = self.graphs.lock().values().cloned().collect::<Vec<_>>();
        for graph in graphs {
            graph.disconnect().await?;
        }

        Ok(())
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connector", &self.connector)
            .field("graphs", &self.graph_names())
            .finish()
    }
}

struct GraphInner {
    name: String,
    connector: Arc<dyn StoreConnector>,
    backend: RwLock<Option<Arc<dyn StoreBackend>>>,
    collections: Mutex<HashMap<String, CollectionHandle>>,
    callbacks: Mutex<Vec<(String, ConnectedCallback)>>,
    schema: parking_lot::RwLock<Arc<Schema>>,
}

/// Handle to a named graph. Clones share the same graph.
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl Graph {
    fn new(name: &str, connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            inner: Arc::new(GraphInner {
                name: name.to_string(),
                connector,
                backend: RwLock::new(None),
                collections: Mutex::new(HashMap::new()),
                callbacks: Mutex::new(Vec::new()),
                schema: parking_lot::RwLock::new(Arc::new(Schema::new())),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns `true` when both handles refer to the same graph.
    pub fn ptr_eq(&self, other: &Graph) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Snapshot of the graph's class schema.
    pub fn schema(&self) -> Arc<Schema> {
        self.inner.schema.read().clone()
    }

    pub fn class(&self, name: &str) -> OdmResult<ClassRef> {
        self.schema().class(name)
    }

    /// Adds a class to the graph and schedules synchronization of its indexes.
    ///
    /// Relations may name classes registered later; call [`Schema::check`] through
    /// [`Graph::check`] once every class is in.
    pub async fn register(&self, class: ClassRef) -> OdmResult<()> {
        {
            let mut schema = self.inner.schema.write();
            let mut next = Schema::clone(&schema);
            next.register(class.clone())?;
            *schema = Arc::new(next);
        }

        if class.is_embedded() {
            return Ok(());
        }

        let declared = index::class_indexes(&class);
        self.on_connected(class.collection(), sync_callback(declared))
            .await?;

        for (collection, pair) in index::join_indexes(&class) {
            let known = self
                .inner
                .callbacks
                .lock()
                .iter()
                .any(|(name, _)| *name == collection);
            if !known {
                self.on_connected(&collection, sync_callback(vec![pair]))
                    .await?;
            }
        }

        Ok(())
    }

    /// Verifies that every registered relation resolves.
    pub fn check(&self) -> OdmResult<()> {
        self.schema().check()
    }

    /// Establishes the connection and replays every registered collection callback.
    ///
    /// # Errors
    ///
    /// Fails with [`OdmError::Connection`] when the connector cannot reach the store. A
    /// failing callback is surfaced after the connection is in place.
    pub async fn connect(&self, url: &str) -> OdmResult<()> {
        let backend = self.inner.connector.connect(&self.inner.name, url).await?;
        let previous = {
            let mut slot = self.inner.backend.write().await;
            slot.replace(backend)
        };
        self.inner.collections.lock().clear();
        if let Some(previous) = previous {
            previous.shutdown().await?;
        }
        tracing::info!(graph = %self.inner.name, "graph connected");

        let callbacks = self.inner.callbacks.lock().clone();
        for (name, callback) in callbacks {
            let collection = self.collection(&name).await?;
            callback(collection).await?;
        }

        Ok(())
    }

    /// Releases the connection and forgets cached collection handles. Idempotent.
    pub async fn disconnect(&self) -> OdmResult<()> {
        let previous = self.inner.backend.write().await.take();
        self.inner.collections.lock().clear();

        if let Some(backend) = previous {
            backend.shutdown().await?;
            tracing::info!(graph = %self.inner.name, "graph disconnected");
        }

        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.backend.read().await.is_some()
    }

    /// Returns the cached handle of a collection, creating it on first access.
    ///
    /// # Errors
    ///
    /// Fails with [`OdmError::NotConnected`] before [`Graph::connect`].
    pub async fn collection(&self, name: &str) -> OdmResult<CollectionHandle> {
        let backend = self
            .inner
            .backend
            .read()
            .await
            .clone()
            .ok_or_else(|| OdmError::NotConnected(self.inner.name.clone()))?;

        let handle = self
            .inner
            .collections
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| CollectionHandle::new(name, backend))
            .clone();

        Ok(handle)
    }

    /// Collection backing a class.
    pub async fn class_collection(&self, class: &ClassRef) -> OdmResult<CollectionHandle> {
        self.collection(class.collection()).await
    }

    /// Registers a callback for a collection. Runs it immediately when the graph is already
    /// connected, and again on every later [`Graph::connect`].
    pub async fn on_connected(&self, name: &str, callback: ConnectedCallback) -> OdmResult<()> {
        self.inner
            .callbacks
            .lock()
            .push((name.to_string(), callback.clone()));

        if self.is_connected().await {
            let collection = self.collection(name).await?;
            callback(collection).await?;
        }

        Ok(())
    }
}

fn sync_callback(declared: Vec<crate::backend::IndexSpec>) -> ConnectedCallback {
    let declared = Arc::new(declared);
    Arc::new(move |collection: CollectionHandle| {
        let declared = declared.clone();
        Box::pin(async move { index::sync_indexes(&collection, &declared).await })
    })
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.inner.name)
            .field("classes", &self.schema().classes().map(|c| c.name()).collect::<Vec<_>>())
            .finish()
    }
}
