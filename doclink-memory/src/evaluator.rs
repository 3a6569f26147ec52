//! Filter evaluation for in-memory documents.
//!
//! Field paths may be dotted. A field holding an array matches an equality (or membership)
//! test when any of its elements does, and an equality test against null also matches a
//! missing field, the same way document stores treat them.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};

use doclink_core::{
    error::OdmError,
    query::{Expr, FieldOp, QueryVisitor},
};

/// Type-erased, comparable representation of BSON values.
///
/// Integers and floats are normalized to `f64`.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Binary(&'a [u8]),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Binary(value) => Comparable::Binary(&value.bytes),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            _ => Comparable::Null,
        }
    }
}

impl Comparable<'_> {
    /// Position of the value's type in the cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::Binary(_) => 5,
            Comparable::ObjectId(_) => 6,
            Comparable::Bool(_) => 7,
            Comparable::DateTime(_) => 8,
        }
    }

    /// Total order used by sort stages: by type first, then by value.
    pub(crate) fn sort_cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Binary(a), Comparable::Binary(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            (Comparable::Binary(a), Comparable::Binary(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Resolves a dotted path inside a document.
pub(crate) fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_document()?.get(part)?;
    }
    Some(current)
}

/// Equality with array-membership semantics on the stored side.
pub(crate) fn matches_value(stored: Option<&Bson>, value: &Bson) -> bool {
    let expected = Comparable::from(value);
    match stored {
        None => expected == Comparable::Null,
        Some(array @ Bson::Array(items)) => {
            Comparable::from(array) == expected
                || items.iter().any(|item| Comparable::from(item) == expected)
        }
        Some(stored) => Comparable::from(stored) == expected,
    }
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> Result<bool, OdmError> {
        self.visit_expr(expr)
    }

    pub fn filter_documents(
        documents: impl IntoIterator<Item = Document>,
        expr: &Expr,
    ) -> Result<Vec<Document>, OdmError> {
        let mut kept = Vec::new();
        for document in documents {
            if DocumentEvaluator::new(&document).evaluate(expr)? {
                kept.push(document);
            }
        }

        Ok(kept)
    }
}

impl QueryVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = OdmError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(get_path(self.document, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let stored = get_path(self.document, field);

        match op {
            FieldOp::Eq => return Ok(matches_value(stored, value)),
            FieldOp::Ne => return Ok(!matches_value(stored, value)),
            FieldOp::AnyOf | FieldOp::NoneOf => {
                let candidates = match value {
                    Bson::Array(values) => values.iter().collect::<Vec<_>>(),
                    single => vec![single],
                };
                let any = candidates.into_iter().any(|v| matches_value(stored, v));
                return Ok(if *op == FieldOp::AnyOf { any } else { !any });
            }
            _ => {}
        }

        let Some(field_value) = stored else {
            return Ok(matches!(op, FieldOp::NotContains));
        };

        Ok(match op {
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => {
                match Comparable::from(field_value).partial_cmp(&Comparable::from(value)) {
                    Some(ordering) => match op {
                        FieldOp::Gt => ordering == Ordering::Greater,
                        FieldOp::Gte => ordering != Ordering::Less,
                        FieldOp::Lt => ordering == Ordering::Less,
                        _ => ordering != Ordering::Greater,
                    },
                    None => false,
                }
            }
            FieldOp::Contains | FieldOp::NotContains => {
                let contains = match (field_value, value) {
                    (Bson::String(left), Bson::String(right)) => left.contains(right.as_str()),
                    (Bson::Array(items), Bson::String(right)) => items
                        .iter()
                        .any(|item| matches!(item, Bson::String(left) if left.contains(right.as_str()))),
                    // An array operand needs every element present to contain, and any
                    // element present to fail not-contains.
                    (_, Bson::Array(needles)) if *op == FieldOp::Contains => {
                        !needles.is_empty() && needles.iter().all(|needle| matches_value(stored, needle))
                    }
                    (_, Bson::Array(needles)) => needles.iter().any(|needle| matches_value(stored, needle)),
                    (Bson::Array(_), needle) => matches_value(stored, needle),
                    (_, needle) if *op == FieldOp::NotContains => matches_value(stored, needle),
                    _ => false,
                };
                if *op == FieldOp::Contains { contains } else { !contains }
            }
            FieldOp::StartsWith => match (Comparable::from(field_value), Comparable::from(value)) {
                (Comparable::String(left), Comparable::String(right)) => left.starts_with(right),
                _ => false,
            },
            FieldOp::EndsWith => match (Comparable::from(field_value), Comparable::from(value)) {
                (Comparable::String(left), Comparable::String(right)) => left.ends_with(right),
                _ => false,
            },
            FieldOp::Eq | FieldOp::Ne | FieldOp::AnyOf | FieldOp::NoneOf => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use doclink_core::query::Filter;

    use super::*;

    fn eval(document: &Document, expr: Expr) -> bool {
        DocumentEvaluator::new(document).evaluate(&expr).unwrap()
    }

    #[test]
    fn equality_matches_array_members() {
        let document = doc! { "favoriteIds": [1, 2, 3] };

        assert!(eval(&document, Filter::eq("favoriteIds", 2)));
        assert!(!eval(&document, Filter::eq("favoriteIds", 4)));
        assert!(eval(&document, Filter::ne("favoriteIds", 4)));
    }

    #[test]
    fn null_equality_matches_missing_fields() {
        let document = doc! { "name": "Ada" };

        assert!(eval(&document, Filter::eq("authorId", Bson::Null)));
        assert!(!eval(&document, Filter::eq("name", Bson::Null)));
    }

    #[test]
    fn dotted_paths_reach_into_shapes() {
        let document = doc! { "size": { "height": 180, "width": 40 } };

        assert!(eval(&document, Filter::gt("size.height", 170)));
        assert!(eval(&document, Filter::exists("size.width")));
        assert!(!eval(&document, Filter::exists("size.depth")));
    }

    #[test]
    fn explicit_null_fields_exist() {
        let document = doc! { "authorId": Bson::Null };

        assert!(eval(&document, Filter::exists("authorId")));
        assert!(!eval(&document, Filter::not_exists("authorId")));
        assert!(eval(&document, Filter::not_exists("bio")));
    }

    #[test]
    fn object_ids_compare_by_value() {
        let id = ObjectId::new();
        let document = doc! { "_id": id };

        assert!(eval(&document, Filter::eq("_id", id)));
        assert!(eval(&document, Filter::any_of("_id", vec![Bson::ObjectId(ObjectId::new()), Bson::ObjectId(id)])));
    }

    #[test]
    fn string_operators() {
        let document = doc! { "title": "Rust in practice" };

        assert!(eval(&document, Filter::starts_with("title", "Rust")));
        assert!(eval(&document, Filter::ends_with("title", "practice")));
        assert!(eval(&document, Filter::contains("title", "in")));
        assert!(eval(&document, Filter::and([Filter::not_contains("title", "Go"), Filter::lte("title", "S")])));
    }

    #[test]
    fn array_operands_contain_every_element() {
        let document = doc! { "labels": ["a", "b"] };

        assert!(eval(&document, Filter::contains("labels", vec!["a", "b"])));
        assert!(eval(&document, Filter::contains("labels", vec!["b"])));
        assert!(!eval(&document, Filter::contains("labels", vec!["a", "c"])));
        assert!(eval(&document, Filter::contains("labels", "a")));
    }

    #[test]
    fn array_operands_not_contain_any_element() {
        let document = doc! { "labels": ["a", "b"] };

        assert!(eval(&document, Filter::not_contains("labels", vec!["c", "d"])));
        assert!(!eval(&document, Filter::not_contains("labels", vec!["a", "c"])));
        assert!(!eval(&document, Filter::not_contains("labels", vec!["a", "b"])));
        assert!(eval(&document, Filter::not_contains("missing", vec!["a"])));
    }

    #[test]
    fn sort_order_ranks_types_before_values() {
        let null = Bson::Null;
        let number = Bson::Int32(3);
        let text = Bson::String("a".into());

        assert_eq!(Comparable::from(&null).sort_cmp(&Comparable::from(&number)), Ordering::Less);
        assert_eq!(Comparable::from(&text).sort_cmp(&Comparable::from(&number)), Ordering::Greater);
    }
}
