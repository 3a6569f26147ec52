//! Main doclink crate providing a unified interface for object-document mapping.
//!
//! This crate is the primary entry point for users of the doclink framework.
//! It re-exports the core types and functionality from the sub-crates and provides
//! convenient access to the storage backends.
//!
//! # Features
//!
//! - **Declared classes** - Fields, identifiers and relations described once, validated on every write
//! - **Relation-aware persistence** - One-to-one, one-to-many and many-to-many links kept consistent in both directions
//! - **Chainable queries** - Filters, ordering, pagination and eager includes compiled to aggregation pipelines
//! - **Delete policies** - Nullify, cascade or deny per relation, planned before anything is written
//! - **Multiple backends** - In-memory and MongoDB storage behind one driver contract
//!
//! # Quick Start
//!
//! ```ignore
//! use doclink::{prelude::*, memory::MemoryConnector};
//!
//! #[tokio::main]
//! async fn main() -> OdmResult<()> {
//!     let author = ClassDef::builder("Author")
//!         .field(FieldDef::embedded("name", FieldType::Str).required().unique())
//!         .field(FieldDef::foreign_keys("posts", Relation::to("Post").foreign_key("author")))
//!         .build()?;
//!     let post = ClassDef::builder("Post")
//!         .field(FieldDef::embedded("title", FieldType::Str))
//!         .field(FieldDef::local_key("author", Relation::to("Author").foreign_key("posts")))
//!         .build()?;
//!
//!     let registry = ConnectionRegistry::new(MemoryConnector::new());
//!     let blog = registry.graph("blog");
//!     blog.register(author.clone()).await?;
//!     blog.register(post.clone()).await?;
//!     blog.connect("memory://blog").await?;
//!
//!     // Saving the author also saves its posts, each pointing back at the author
//!     let ada = Object::new(&author)
//!         .with("name", "Ada")?
//!         .with("posts", vec![Object::new(&post).with("title", "Notes")?])?;
//!     blog.save(&ada).await?;
//!
//!     let found = blog
//!         .find("Author", Filter::eq("name", "Ada"))
//!         .include("posts")
//!         .first()
//!         .await?;
//!     println!("{} posts", found.related_list("posts").len());
//!
//!     registry.disconnect_all().await
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use doclink_core::{
    backend, class, classify, collection, command, compile, config, decode, encode, error,
    executor, id, index, keys, loader, object, page, pipeline, query, registry, schema, value,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use doclink_memory::{InMemoryStore, InMemoryStoreBuilder, MEMORY_SCHEME, MemoryConnector};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use doclink_mongodb::{MongoConnector, MongoDbStore, MongoDbStoreBuilder};
}
