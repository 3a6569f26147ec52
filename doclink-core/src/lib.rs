//! Object-document mapping over aggregation-capable document stores.
//!
//! This crate is the core of the doclink project and provides:
//!
//! - **Class metadata** ([`class`], [`schema`]) - Field declarations, relation kinds and the per-graph class registry
//! - **Field classification and key mapping** ([`classify`], [`keys`]) - Storage strategy per field and the on-document key names
//! - **Objects** ([`object`], [`value`]) - Shared, validated instances of declared classes
//! - **Encoding and decoding** ([`encode`], [`decode`]) - Object graphs to ordered write commands and documents back to objects
//! - **Queries** ([`query`], [`compile`], [`executor`]) - Chainable queries compiled into aggregation pipelines
//! - **Store backend abstraction** ([`backend`]) - The driver contract implemented by each storage backend
//! - **Connection registry** ([`registry`]) - Named graphs with their connections, collections and index synchronization
//! - **Error handling** ([`error`]) - The error taxonomy shared by every operation
//! - **Bulk loading** ([`loader`]) - Seeding graphs from plain records with identifier reconciliation
//!
//! # Example
//!
//! ```ignore
//! use doclink_core::{
//!     class::{ClassDef, FieldDef, FieldType, Relation},
//!     object::Object,
//!     registry::ConnectionRegistry,
//! };
//!
//! let author = ClassDef::builder("Author")
//!     .field(FieldDef::embedded("name", FieldType::Str).required().unique())
//!     .field(FieldDef::foreign_keys("posts", Relation::to("Post").foreign_key("author")))
//!     .build()?;
//!
//! let blog = registry.graph("blog");
//! blog.register(author.clone()).await?;
//! blog.connect("memory://blog").await?;
//!
//! blog.save(&Object::new(&author).with("name", "Ada")?).await?;
//! ```

pub mod backend;
pub mod class;
pub mod classify;
pub mod collection;
pub mod command;
pub mod compile;
pub mod config;
pub mod decode;
mod delete;
pub mod encode;
pub mod error;
pub mod executor;
pub mod id;
pub mod index;
pub mod keys;
pub mod loader;
pub mod object;
pub mod page;
pub mod pipeline;
pub mod query;
pub mod registry;
pub mod schema;
pub mod value;
mod writer;

#[cfg(test)]
mod testing;
