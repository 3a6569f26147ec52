//! MongoDB backend implementation for doclink.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait. Filters
//! and aggregation stages produced by the query compiler are translated into MongoDB's own
//! pipeline syntax, so includes and joins run server side.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! doclink = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Persistent storage** - Data is persisted to MongoDB Atlas or self-hosted MongoDB
//! - **Server side aggregation** - Includes and join-table traversals compile to `$lookup`
//! - **Unique indexes** - Duplicate key errors are reported with the violated index name
//! - **Connector** - [`MongoConnector`] serves `mongodb://` URLs to a connection registry
//!
//! # Example
//!
//! ```ignore
//! use doclink::{registry::ConnectionRegistry, mongodb::MongoConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = ConnectionRegistry::new(MongoConnector::new());
//!     registry
//!         .graph("blog")
//!         .connect("mongodb://localhost:27017/blog")
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod query;
pub mod store;

pub use store::{MongoConnector, MongoDbStore, MongoDbStoreBuilder};
