//! Query expression evaluation for in-memory document filtering.
//!
//! This module provides the evaluation engine for query expressions, enabling filtering,
//! comparison and ordering of BSON documents.

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use std::{cmp::Ordering, collections::HashMap};

use docstore_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, QueryVisitor, Sort, SortDirection},
};

use crate::path;

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64 so that `Int32(5)` and `Double(5.0)` compare equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Values with no ordering of their own; compared by raw equality.
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            other => Comparable::Other(other),
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
            Comparable::ObjectId(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
            Comparable::Other(_) => 8,
        }
    }

    /// Total order used for sorting and min/max, ranking by type before value.
    pub(crate) fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Comparable::Array(a), Comparable::Array(b)) => {
                for (left, right) in a.iter().zip(b) {
                    let ordering = left.total_cmp(right);
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                a.len().cmp(&b.len())
            }
            // NaN sorts below every other number and equal to itself.
            (Comparable::Number(a), Comparable::Number(b)) => match (a.is_nan(), b.is_nan()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            },
            _ => match self.partial_cmp(other) {
                Some(ordering) => ordering,
                None => self.rank().cmp(&other.rank()),
            },
        }
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
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
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
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// `true` when two values are the same key or group value.
pub(crate) fn same_value(left: &Bson, right: &Bson) -> bool {
    Comparable::from(left) == Comparable::from(right)
}

/// Orders two documents by the given sort keys. Missing fields sort as null.
pub(crate) fn compare_documents(left: &Document, right: &Document, keys: &[Sort]) -> Ordering {
    for key in keys {
        let a = path::lookup(left, &key.field).map(Comparable::from).unwrap_or(Comparable::Null);
        let b = path::lookup(right, &key.field).map(Comparable::from).unwrap_or(Comparable::Null);

        let ordering = match key.direction {
            SortDirection::Asc => a.total_cmp(&b),
            SortDirection::Desc => b.total_cmp(&a),
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    /// Evaluates `expr` against one document.
    pub fn matches(document: &Document, expr: &Expr) -> DocumentStoreResult<bool> {
        DocumentEvaluator::new(document).evaluate(expr)
    }
}

/// Applies a positive operator to one resolved field value.
fn field_matches(field_value: &Bson, op: &FieldOp, value: &Bson) -> bool {
    let left = Comparable::from(field_value);
    let right = Comparable::from(value);

    match op {
        FieldOp::Eq => {
            left == right
                || match (&left, &right) {
                    (Comparable::Array(items), single) if !matches!(single, Comparable::Array(_)) => {
                        items.iter().any(|item| item == single)
                    }
                    _ => false,
                }
        }
        FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => {
            let satisfies = |candidate: &Comparable| match candidate.partial_cmp(&right) {
                Some(ordering) => match op {
                    FieldOp::Gt => ordering == Ordering::Greater,
                    FieldOp::Gte => ordering != Ordering::Less,
                    FieldOp::Lt => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                },
                None => false,
            };

            match &left {
                Comparable::Array(items) => items.iter().any(satisfies),
                single => satisfies(single),
            }
        }
        FieldOp::Contains => match (&left, &right) {
            (Comparable::Array(items), Comparable::Array(wanted)) => {
                wanted.iter().all(|want| items.iter().any(|item| item == want))
            }
            (Comparable::Array(items), single) => items.iter().any(|item| item == single),
            (Comparable::String(haystack), Comparable::String(needle)) => haystack.contains(needle),
            _ => false,
        },
        FieldOp::StartsWith => match (&left, &right) {
            (Comparable::String(text), Comparable::String(prefix)) => text.starts_with(prefix),
            _ => false,
        },
        FieldOp::EndsWith => match (&left, &right) {
            (Comparable::String(text), Comparable::String(suffix)) => text.ends_with(suffix),
            _ => false,
        },
        FieldOp::AnyOf => {
            let candidates: Vec<&Comparable> = match &right {
                Comparable::Array(values) => values.iter().collect(),
                single => vec![single],
            };

            match &left {
                Comparable::Array(items) => {
                    candidates.contains(&&left)
                        || items.iter().any(|item| candidates.contains(&item))
                }
                single => candidates.contains(&single),
            }
        }
        FieldOp::Ne | FieldOp::NotContains | FieldOp::NoneOf => false,
    }
}

impl QueryVisitor for DocumentEvaluator<'_> {
    type Output = bool;
    type Error = DocumentStoreError;

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
        Ok(!path::resolve(self.document, field).is_empty() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        // Negated operators match exactly when their positive form does not, which also
        // makes them match documents missing the field.
        let (positive, negate) = match op {
            FieldOp::Ne => (FieldOp::Eq, true),
            FieldOp::NotContains => (FieldOp::Contains, true),
            FieldOp::NoneOf => (FieldOp::AnyOf, true),
            other => (other.clone(), false),
        };

        let values = path::resolve(self.document, field);

        let matched = if values.is_empty() {
            // A missing field equals null.
            match positive {
                FieldOp::Eq => matches!(value, Bson::Null),
                FieldOp::AnyOf => field_matches(&Bson::Null, &FieldOp::AnyOf, value),
                _ => false,
            }
        } else {
            values.iter().any(|field_value| field_matches(field_value, &positive, value))
        };

        Ok(matched != negate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docstore_core::query::Filter;

    fn restaurant() -> Document {
        doc! {
            "name": "Riviera Caterer",
            "borough": "Brooklyn",
            "cuisine": "American",
            "stars": 4,
            "address": { "street": "Stillwell Avenue", "zipcode": "11224" },
            "grades": [{ "grade": "A", "score": 5 }, { "grade": "B", "score": 14 }],
            "tags": ["catering", "events"],
        }
    }

    fn check(expr: Expr) -> bool {
        DocumentEvaluator::matches(&restaurant(), &expr).unwrap()
    }

    #[test]
    fn equality_and_numeric_normalization() {
        assert!(check(Filter::eq("borough", "Brooklyn")));
        assert!(check(Filter::eq("stars", 4.0)));
        assert!(!check(Filter::eq("borough", "Queens")));
        assert!(check(Filter::ne("borough", "Queens")));
    }

    #[test]
    fn dotted_paths_and_array_fan_out() {
        assert!(check(Filter::eq("address.zipcode", "11224")));
        assert!(check(Filter::gt("grades.score", 10)));
        assert!(!check(Filter::gt("grades.score", 20)));
        assert!(check(Filter::eq("grades.grade", "B")));
    }

    #[test]
    fn eq_on_array_matches_any_element() {
        assert!(check(Filter::eq("tags", "events")));
        assert!(!check(Filter::eq("tags", "delivery")));
    }

    #[test]
    fn missing_fields() {
        assert!(!check(Filter::eq("phone", "555")));
        assert!(check(Filter::eq("phone", Bson::Null)));
        assert!(check(Filter::ne("phone", "555")));
        assert!(check(Filter::not_exists("phone")));
        assert!(check(Filter::exists("address.street")));
    }

    #[test]
    fn string_operators() {
        assert!(check(Filter::starts_with("name", "Riv")));
        assert!(check(Filter::ends_with("name", "Caterer")));
        assert!(check(Filter::contains("name", "era C")));
        assert!(check(Filter::not_contains("name", "Pizza")));
    }

    #[test]
    fn membership_operators() {
        assert!(check(Filter::any_of("borough", vec!["Queens", "Brooklyn"])));
        assert!(check(Filter::any_of("tags", vec!["events"])));
        assert!(check(Filter::none_of("cuisine", vec!["Italian", "Thai"])));
        assert!(!check(Filter::none_of("tags", vec!["catering"])));
    }

    #[test]
    fn boolean_composition() {
        assert!(check(Filter::and([Filter::eq("borough", "Brooklyn"), Filter::gte("stars", 4)])));
        assert!(check(Filter::or([Filter::eq("borough", "Queens"), Filter::lt("stars", 5)])));
        assert!(!check(Filter::eq("borough", "Brooklyn").not()));
        assert!(check(Filter::all()));
    }

    #[test]
    fn sort_orders_across_types() {
        let low = doc! { "v": 1 };
        let high = doc! { "v": "text" };
        let missing = doc! {};

        let asc = [Sort::asc("v")];
        assert_eq!(compare_documents(&low, &high, &asc), Ordering::Less);
        assert_eq!(compare_documents(&missing, &low, &asc), Ordering::Less);

        let desc = [Sort::desc("v")];
        assert_eq!(compare_documents(&low, &high, &desc), Ordering::Greater);
    }

    #[test]
    fn nan_sorts_below_every_number() {
        let mut documents: Vec<Document> = (0..30)
            .map(|i| if i % 3 == 0 { doc! { "v": f64::NAN } } else { doc! { "v": f64::from(30 - i) } })
            .collect();
        documents.push(doc! { "v": f64::NEG_INFINITY });

        let asc = [Sort::asc("v")];
        documents.sort_by(|a, b| compare_documents(a, b, &asc));

        let values: Vec<f64> = documents.iter().map(|d| d.get_f64("v").unwrap()).collect();
        assert!(values[..10].iter().all(|v| v.is_nan()));
        assert!(values[10..].windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(values[10], f64::NEG_INFINITY);

        let nan = doc! { "v": f64::NAN };
        assert_eq!(compare_documents(&nan, &nan, &asc), Ordering::Equal);
        assert_eq!(compare_documents(&doc! {}, &nan, &asc), Ordering::Less);
    }
}
