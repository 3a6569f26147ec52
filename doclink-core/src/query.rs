//! Query construction and filtering API.
//!
//! A [`Query`] is a plain value accumulating a filter, a compound sort, skip/limit and the
//! relations to include. It names fields by their in-memory names; the
//! [`compile`](crate::compile) module turns it into aggregation stages over on-document keys.
//!
//! # Query Building
//!
//! ```ignore
//! use doclink::query::{Filter, Include, Query, SortDirection};
//!
//! let query = Query::find("Post", Filter::eq("published", true))
//!     .order("created", SortDirection::Desc)
//!     .order("title", SortDirection::Asc)
//!     .skip(20)
//!     .limit(10)
//!     .include("author")
//!     .include_with(Include::with(
//!         "comments",
//!         Query::find("Comment", Filter::eq("approved", true)).limit(3),
//!     ));
//! ```
//!
//! # Filter Expression API
//!
//! The [`Filter`] struct provides a collection of static methods for building filter expressions:
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - String: `starts_with`, `ends_with`, `contains`, `not_contains`
//! - Existence: `exists`, `not_exists`
//! - Array: `any_of`, `none_of`
//! - Logical: `and`, `or`
//!
//! Expressions can be combined using chainable methods for more complex queries.

use std::fmt;

use bson::Bson;

use crate::error::OdmError;

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// Numeric form used by aggregation `$sort` stages.
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// Sort specification for query results.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to (exact match).
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// String or array contains value.
    Contains,
    /// String or array does not contain value.
    NotContains,
    /// String starts with value.
    StartsWith,
    /// String ends with value.
    EndsWith,
    /// Field equals any of the values.
    AnyOf,
    /// Field equals none of the values.
    NoneOf,
}

impl FieldOp {
    fn symbol(&self) -> &'static str {
        match self {
            FieldOp::Eq => "=",
            FieldOp::Ne => "!=",
            FieldOp::Gt => ">",
            FieldOp::Gte => ">=",
            FieldOp::Lt => "<",
            FieldOp::Lte => "<=",
            FieldOp::Contains => "contains",
            FieldOp::NotContains => "not contains",
            FieldOp::StartsWith => "starts with",
            FieldOp::EndsWith => "ends with",
            FieldOp::AnyOf => "in",
            FieldOp::NoneOf => "not in",
        }
    }
}

/// A filter expression for querying documents.
///
/// Expressions can be combined using logical operators (`And`, `Or`, `Not`)
/// to build complex filter predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The field name to compare.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, exprs: &[Expr], sep: &str| -> fmt::Result {
            write!(f, "(")?;
            for (i, expr) in exprs.iter().enumerate() {
                if i > 0 {
                    write!(f, " {sep} ")?;
                }
                write!(f, "{expr}")?;
            }
            write!(f, ")")
        };

        match self {
            Expr::And(exprs) => join(f, exprs, "and"),
            Expr::Or(exprs) => join(f, exprs, "or"),
            Expr::Not(expr) => write!(f, "not {expr}"),
            Expr::Exists(field, true) => write!(f, "{field} exists"),
            Expr::Exists(field, false) => write!(f, "{field} missing"),
            Expr::Field { field, op, value } => write!(f, "{field} {} {value}", op.symbol()),
        }
    }
}

/// Helper struct for constructing filter expressions.
///
/// Provides static methods to construct common filter expressions in a type-safe manner.
/// All methods accept field names and values as `Into<String>` and `Into<Bson>` for ergonomics.
///
/// # Example
///
/// ```ignore
/// use doclink::query::Filter;
///
/// let expr = Filter::eq("name", "Alice")
///     .and(Filter::gt("age", 18));
/// ```
pub struct Filter;

impl Filter {
    /// Matches documents where the field equals the specified value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches documents where the field does not equal the specified value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the string field starts with the specified value.
    pub fn starts_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::StartsWith, value.into())
    }

    /// Matches documents where the string field ends with the specified value.
    pub fn ends_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::EndsWith, value.into())
    }

    /// Matches documents where the field (string or array) contains the specified value.
    pub fn contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Contains, value.into())
    }

    /// Matches documents where the field (string or array) does not contain the specified value.
    pub fn not_contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NotContains, value.into())
    }

    /// Matches documents where the field is present. A field explicitly set to null is present.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches documents where the field is missing. A field explicitly set to null is not missing.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Matches documents where the field equals any of the values.
    pub fn any_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::AnyOf, value.into())
    }

    /// Matches documents where the field equals none of the values.
    pub fn none_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NoneOf, value.into())
    }
}

/// A relation to resolve alongside the root documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Include {
    /// In-memory name of the relation field.
    pub field: String,
    /// Further filtering, sorting and nested includes on the related side.
    pub subquery: Option<Query>,
    /// Drops root documents without a counterpart (single-valued relations only).
    pub required: bool,
}

impl Include {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            subquery: None,
            required: false,
        }
    }

    /// Includes a relation through a subquery over the related class.
    pub fn with(field: impl Into<String>, subquery: Query) -> Self {
        Self {
            field: field.into(),
            subquery: Some(subquery),
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A structured query over one class.
///
/// Field names are in-memory names. Multiple [`Query::order`] calls compose into a compound
/// sort with the first call taking precedence.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Name of the queried class.
    pub class: String,
    /// Optional filter expression to match documents.
    pub filter: Option<Expr>,
    /// Sort keys, highest precedence first.
    pub sorts: Vec<Sort>,
    /// Number of documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
    /// Relations to resolve.
    pub includes: Vec<Include>,
}

impl Query {
    /// Creates a query over every document of a class.
    pub fn all(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            filter: None,
            sorts: Vec::new(),
            skip: None,
            limit: None,
            includes: Vec::new(),
        }
    }

    /// Creates a query seeded with a filter.
    pub fn find(class: impl Into<String>, filter: Expr) -> Self {
        Self::all(class).filter(filter)
    }

    /// Creates a query matching one identifier.
    ///
    /// The identifier field is addressed by the name [`DEFAULT_ID_FIELD`](crate::class::DEFAULT_ID_FIELD)
    /// and resolved to the class's actual identifier field during compilation.
    pub fn id(class: impl Into<String>, id: impl Into<Bson>) -> Self {
        Self::find(class, Filter::eq(ID_ALIAS, id))
    }

    /// Adds a filter, AND-ed with any existing one.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(filter),
            None => filter,
        });
        self
    }

    /// Appends a sort key.
    pub fn order(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sorts.push(Sort {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    /// Caps the number of results. Zero means no cap.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Includes a relation without a subquery.
    pub fn include(self, field: impl Into<String>) -> Self {
        self.include_with(Include::new(field))
    }

    /// Includes a relation. A later include of the same field replaces an earlier one.
    pub fn include_with(mut self, include: Include) -> Self {
        self.includes.retain(|i| i.field != include.field);
        self.includes.push(include);
        self
    }

    /// Human-readable rendering of the filter, sort and skip state.
    pub fn describe(&self) -> String {
        let mut parts = vec![match &self.filter {
            Some(filter) => format!("filter {filter}"),
            None => "no filter".to_string(),
        }];
        if !self.sorts.is_empty() {
            parts.push(format!(
                "sort {}",
                self.sorts
                    .iter()
                    .map(|s| format!(
                        "{} {}",
                        s.field,
                        match s.direction {
                            SortDirection::Asc => "asc",
                            SortDirection::Desc => "desc",
                        }
                    ))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        if let Some(skip) = self.skip {
            parts.push(format!("skip {skip}"));
        }
        if let Some(limit) = self.limit {
            parts.push(format!("limit {limit}"));
        }

        parts.join("; ")
    }
}

/// Field name that always addresses the identifier, whatever the identifier field is called.
pub const ID_ALIAS: &str = "id";

pub trait QueryVisitor {
    type Output;
    type Error: Into<OdmError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_accumulate_with_and() {
        let query = Query::find("User", Filter::eq("name", "Ada")).filter(Filter::gt("age", 30));

        assert_eq!(
            query.filter,
            Some(Expr::And(vec![Filter::eq("name", "Ada"), Filter::gt("age", 30)]))
        );
    }

    #[test]
    fn orders_compose_in_call_order() {
        let query = Query::all("User")
            .order("last", SortDirection::Asc)
            .order("first", SortDirection::Desc);

        let fields = query.sorts.iter().map(|s| s.field.as_str()).collect::<Vec<_>>();
        assert_eq!(fields, vec!["last", "first"]);
    }

    #[test]
    fn repeated_include_replaces() {
        let query = Query::all("User")
            .include("profile")
            .include_with(Include::new("profile").required());

        assert_eq!(query.includes.len(), 1);
        assert!(query.includes[0].required);
    }

    #[test]
    fn describe_mentions_filter_sort_and_skip() {
        let text = Query::find("User", Filter::eq("name", "Ada"))
            .order("age", SortDirection::Desc)
            .skip(5)
            .describe();

        assert!(text.contains("name = \"Ada\""));
        assert!(text.contains("sort age desc"));
        assert!(text.contains("skip 5"));
    }
}
