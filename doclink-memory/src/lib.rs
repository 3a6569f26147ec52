//! In-memory document storage backend for doclink.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait,
//! including an interpreter for the aggregation stages the query compiler emits. It is what
//! the test suites run against and is handy for development and small deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **Aggregation** - Match, sort, skip, limit, lookup with sub-pipelines, unwind and replace-root
//! - **Unique indexes** - Declared unique indexes are enforced on every write
//! - **Connector** - [`MemoryConnector`] serves `memory://<name>` URLs to a connection registry
//!
//! # Quick Start
//!
//! ```ignore
//! use doclink::{registry::ConnectionRegistry, memory::MemoryConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ConnectionRegistry::new(MemoryConnector::new());
//!     let graph = registry.graph("blog");
//!     graph.register(author_class()).await?;
//!     graph.connect("memory://blog").await?;
//!
//!     Ok(())
//! }
//! ```

mod aggregate;
pub mod evaluator;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder, MEMORY_SCHEME, MemoryConnector};
