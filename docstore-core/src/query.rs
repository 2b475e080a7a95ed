//! Query construction and filtering API for document stores.
//!
//! This module provides type-safe query construction with filtering, projection, sorting,
//! limits, and a visitor pattern for query execution across different backends.
//!
//! # Query Building
//!
//! ```ignore
//! use docstore::query::{Filter, Projection, Query, SortDirection};
//!
//! let query = Query::builder()
//!     .filter(Filter::eq("borough", "Brooklyn"))
//!     .projection(Projection::include(["name", "cuisine"]))
//!     .sort("name", SortDirection::Asc)
//!     .limit(10)
//!     .build();
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
//! - Logical: `and`, `or`, `all`
//! - Key lookup: `key`
//!
//! Field names may be dotted paths (`"address.zipcode"`) into nested documents.

use bson::Bson;

use crate::{document::KEY_FIELD, error::DocumentStoreError};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

/// One key of a sort specification.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Sort { field: field.into(), direction: SortDirection::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Sort { field: field.into(), direction: SortDirection::Desc }
    }
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Equal to (exact match, or any element of an array field).
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
    /// String contains substring, or array contains value(s).
    Contains,
    /// Negation of [`FieldOp::Contains`].
    NotContains,
    /// String starts with value.
    StartsWith,
    /// String ends with value.
    EndsWith,
    /// Field (or any array element) equals one of the values.
    AnyOf,
    /// Field (and every array element) equals none of the values.
    NoneOf,
}

/// A filter expression for querying documents.
///
/// Expressions can be combined using logical operators (`And`, `Or`, `Not`)
/// to build complex filter predicates. An empty `And` matches every document.
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
        /// The field name (or dotted path) to compare.
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

    /// Returns `true` if this expression matches every document.
    pub fn matches_all(&self) -> bool {
        matches!(self, Expr::And(list) if list.iter().all(Expr::matches_all))
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

/// Selects which fields appear in returned documents.
///
/// The key field is returned unless [`Projection::without_key`] is used.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Whether `fields` lists fields to keep (`true`) or fields to drop (`false`).
    pub include: bool,
    /// Field names or dotted paths.
    pub fields: Vec<String>,
    /// Whether the key field is kept.
    pub keep_key: bool,
}

impl Projection {
    /// Keeps only the listed fields (plus the key).
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection {
            include: true,
            fields: fields.into_iter().map(Into::into).collect(),
            keep_key: true,
        }
    }

    /// Drops the listed fields and keeps everything else.
    pub fn exclude<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection {
            include: false,
            fields: fields.into_iter().map(Into::into).collect(),
            keep_key: true,
        }
    }

    /// Also drops the key field.
    pub fn without_key(mut self) -> Self {
        self.keep_key = false;
        self
    }
}

/// A structured query for retrieving documents.
///
/// Use [`QueryBuilder`] for ergonomic construction. A query without a filter matches
/// every document in the collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Optional filter expression to match documents.
    pub filter: Option<Expr>,
    /// Optional projection applied to each returned document.
    pub projection: Option<Projection>,
    /// Sort keys, most significant first.
    pub sort: Vec<Sort>,
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Number of documents to skip.
    pub offset: Option<usize>,
}

impl Query {
    /// Creates a new empty query matching every document.
    pub fn new() -> Self {
        Query::default()
    }

    /// Creates a new query builder for fluent construction.
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// The filter of this query, or a match-all expression when none is set.
    pub fn filter_or_all(&self) -> Expr {
        self.filter.clone().unwrap_or_else(Filter::all)
    }
}

impl From<Expr> for Query {
    fn from(filter: Expr) -> Self {
        Query { filter: Some(filter), ..Query::default() }
    }
}

/// Helper struct for constructing filter expressions.
///
/// All methods accept field names and values as `Into<String>` and `Into<Bson>` for ergonomics.
///
/// # Example
///
/// ```ignore
/// use docstore::query::Filter;
///
/// let expr = Filter::eq("borough", "Brooklyn")
///     .and(Filter::gt("grades.score", 10));
/// ```
pub struct Filter;

impl Filter {
    /// Matches every document.
    pub fn all() -> Expr {
        Expr::And(Vec::new())
    }

    /// Matches the document whose key equals `key`.
    pub fn key(key: impl Into<Bson>) -> Expr {
        Filter::eq(KEY_FIELD, key)
    }

    /// Matches documents where the field equals the specified value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches documents where the field does not equal the specified value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    /// Matches documents where the field is greater than the specified value.
    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    /// Matches documents where the field is greater than or equal to the specified value.
    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    /// Matches documents where the field is less than the specified value.
    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    /// Matches documents where the field is less than or equal to the specified value.
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

    /// Matches documents where the field is present.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Matches documents where the field is missing.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    /// Combines multiple expressions such that all must match.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// Combines multiple expressions such that any can match.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Matches documents where the field equals any of the specified values.
    pub fn any_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::AnyOf, value.into())
    }

    /// Matches documents where the field equals none of the specified values.
    pub fn none_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NoneOf, value.into())
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    /// Creates a new query builder.
    pub fn new() -> Self {
        QueryBuilder { query: Query::default() }
    }

    /// Sets the filter expression for this query.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(filter);
        self
    }

    /// Sets the projection applied to returned documents.
    pub fn projection(mut self, projection: Projection) -> Self {
        self.query.projection = Some(projection);
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Sets the number of documents to skip.
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Appends a sort key. Earlier keys take precedence.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(Sort { field: field.into(), direction });
        self
    }

    /// Builds and returns the final query.
    pub fn build(self) -> Query {
        self.query
    }
}

/// Walks a filter expression, producing a backend-specific result.
///
/// The MongoDB backend translates expressions into query documents; the in-memory backend
/// evaluates them against a single document.
pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

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
