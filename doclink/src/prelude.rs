//! Convenient re-exports of commonly used types from doclink.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use doclink::prelude::*;
//! ```
//!
//! This provides access to:
//! - Class declarations and objects
//! - The connection registry and graphs
//! - Query construction, filtering and pagination
//! - Store backend traits
//! - Error types

pub use doclink_core::{
    backend::{IndexSpec, StoreBackend, StoreConnector},
    class::{ClassDef, ClassRef, DeletePolicy, FieldDef, FieldType, IdStrategy, Relation},
    config::{GraphConfig, RegistryConfig},
    error::{OdmError, OdmResult},
    executor::{ExistsQuery, ListQuery, OptionalQuery, SingleQuery},
    loader::{IdMap, LoadGroup, LoadObject, LoadStrategy, Loader},
    object::Object,
    page::{Page, PaginationParams},
    query::{Expr, Filter, Include, Query, QueryVisitor, Sort, SortDirection},
    registry::{ConnectionRegistry, Graph},
    value::Value,
};
