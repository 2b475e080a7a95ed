//! Aggregation pipelines.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s; the output of stage *i* feeds stage
//! *i + 1*. Result order is only defined by an explicit sort stage.
//!
//! # Example
//!
//! ```ignore
//! use docstore::pipeline::{Group, Pipeline};
//! use docstore::query::{Filter, SortDirection};
//!
//! // The ten most common cuisines in Brooklyn.
//! let pipeline = Pipeline::new()
//!     .filter(Filter::eq("borough", "Brooklyn"))
//!     .group(Group::by("cuisine").count("number_of_restaurants"))
//!     .sort("number_of_restaurants", SortDirection::Desc)
//!     .limit(10);
//! ```

use bson::Bson;

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, Projection, Sort, SortDirection},
};

/// Value fed into a [`Accumulator::Sum`].
#[derive(Debug, Clone, PartialEq)]
pub enum AccumulatorInput {
    /// Adds the constant once per document.
    Constant(Bson),
    /// Adds the numeric value at the path; non-numeric and missing values are skipped.
    Field(String),
}

/// Per-group reduction.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Sum(AccumulatorInput),
    /// Number of documents in the group.
    Count,
    Avg(String),
    Min(String),
    Max(String),
    First(String),
    /// Collects every value at the path into an array.
    Push(String),
}

/// What documents are grouped by. The group key becomes the output `_id`.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupKey {
    /// One group for the whole input.
    None,
    /// Group by the value at a path.
    Field(String),
    /// Group by several paths; the output `_id` is a document of `(alias, path)` values.
    Compound(Vec<(String, String)>),
}

/// A group stage definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: GroupKey,
    /// Output field name and reduction, in output order.
    pub accumulators: Vec<(String, Accumulator)>,
}

impl Group {
    /// Groups by the value at `field`.
    pub fn by(field: impl Into<String>) -> Self {
        Group { key: GroupKey::Field(field.into()), accumulators: Vec::new() }
    }

    /// Collapses the whole input into a single group.
    pub fn all() -> Self {
        Group { key: GroupKey::None, accumulators: Vec::new() }
    }

    /// Groups by several fields at once.
    pub fn by_fields<I, A, F>(fields: I) -> Self
    where
        I: IntoIterator<Item = (A, F)>,
        A: Into<String>,
        F: Into<String>,
    {
        Group {
            key: GroupKey::Compound(
                fields
                    .into_iter()
                    .map(|(alias, field)| (alias.into(), field.into()))
                    .collect(),
            ),
            accumulators: Vec::new(),
        }
    }

    pub fn accumulate(mut self, output: impl Into<String>, accumulator: Accumulator) -> Self {
        self.accumulators.push((output.into(), accumulator));
        self
    }

    pub fn count(self, output: impl Into<String>) -> Self {
        self.accumulate(output, Accumulator::Count)
    }

    pub fn sum(self, output: impl Into<String>, field: impl Into<String>) -> Self {
        self.accumulate(output, Accumulator::Sum(AccumulatorInput::Field(field.into())))
    }

    pub fn avg(self, output: impl Into<String>, field: impl Into<String>) -> Self {
        self.accumulate(output, Accumulator::Avg(field.into()))
    }

    pub fn min(self, output: impl Into<String>, field: impl Into<String>) -> Self {
        self.accumulate(output, Accumulator::Min(field.into()))
    }

    pub fn max(self, output: impl Into<String>, field: impl Into<String>) -> Self {
        self.accumulate(output, Accumulator::Max(field.into()))
    }

    pub fn first(self, output: impl Into<String>, field: impl Into<String>) -> Self {
        self.accumulate(output, Accumulator::First(field.into()))
    }

    pub fn push(self, output: impl Into<String>, field: impl Into<String>) -> Self {
        self.accumulate(output, Accumulator::Push(field.into()))
    }
}

/// One transformation step of a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Keeps documents matching the expression.
    Match(Expr),
    Group(Group),
    Sort(Vec<Sort>),
    Limit(usize),
    Skip(usize),
    Project(Projection),
    /// Emits one document per element of the array at the path.
    Unwind(String),
    /// Replaces the input with a single document `{ <field>: <number of inputs> }`.
    Count(String),
}

/// An ordered sequence of stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Appends a match stage.
    pub fn filter(self, filter: Expr) -> Self {
        self.stage(Stage::Match(filter))
    }

    pub fn group(self, group: Group) -> Self {
        self.stage(Stage::Group(group))
    }

    /// Appends a single-key sort stage.
    pub fn sort(self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.stage(Stage::Sort(vec![Sort { field: field.into(), direction }]))
    }

    pub fn sort_by(self, keys: Vec<Sort>) -> Self {
        self.stage(Stage::Sort(keys))
    }

    pub fn limit(self, limit: usize) -> Self {
        self.stage(Stage::Limit(limit))
    }

    pub fn skip(self, skip: usize) -> Self {
        self.stage(Stage::Skip(skip))
    }

    pub fn project(self, projection: Projection) -> Self {
        self.stage(Stage::Project(projection))
    }

    pub fn unwind(self, field: impl Into<String>) -> Self {
        self.stage(Stage::Unwind(field.into()))
    }

    pub fn count(self, output: impl Into<String>) -> Self {
        self.stage(Stage::Count(output.into()))
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Rejects pipelines no store would accept.
    pub fn validate(&self) -> DocumentStoreResult<()> {
        if self.stages.is_empty() {
            return Err(DocumentStoreError::Query("pipeline has no stages".to_string()));
        }

        for stage in &self.stages {
            match stage {
                Stage::Sort(keys) if keys.is_empty() => {
                    return Err(DocumentStoreError::Query("sort stage has no keys".to_string()));
                }
                Stage::Limit(0) => {
                    return Err(DocumentStoreError::Query("limit stage must be positive".to_string()));
                }
                Stage::Count(field) if field.is_empty() || field.starts_with('$') || field.contains('.') => {
                    return Err(DocumentStoreError::Query(format!(
                        "invalid count output field '{field}'"
                    )));
                }
                Stage::Group(group) if group.accumulators.iter().any(|(name, _)| name == "_id") => {
                    return Err(DocumentStoreError::Query(
                        "group output field '_id' is reserved for the group key".to_string(),
                    ));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Walks pipeline stages, producing a backend-specific result per stage.
pub trait StageVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_match(&mut self, filter: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_group(&mut self, group: &Group) -> Result<Self::Output, Self::Error>;
    fn visit_sort(&mut self, keys: &[Sort]) -> Result<Self::Output, Self::Error>;
    fn visit_limit(&mut self, limit: usize) -> Result<Self::Output, Self::Error>;
    fn visit_skip(&mut self, skip: usize) -> Result<Self::Output, Self::Error>;
    fn visit_project(&mut self, projection: &Projection) -> Result<Self::Output, Self::Error>;
    fn visit_unwind(&mut self, field: &str) -> Result<Self::Output, Self::Error>;
    fn visit_count(&mut self, output: &str) -> Result<Self::Output, Self::Error>;

    fn visit_stage(&mut self, stage: &Stage) -> Result<Self::Output, Self::Error> {
        match stage {
            Stage::Match(filter) => self.visit_match(filter),
            Stage::Group(group) => self.visit_group(group),
            Stage::Sort(keys) => self.visit_sort(keys),
            Stage::Limit(limit) => self.visit_limit(*limit),
            Stage::Skip(skip) => self.visit_skip(*skip),
            Stage::Project(projection) => self.visit_project(projection),
            Stage::Unwind(field) => self.visit_unwind(field),
            Stage::Count(output) => self.visit_count(output),
        }
    }
}
