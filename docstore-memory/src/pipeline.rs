//! Aggregation pipeline execution over in-memory documents.

use bson::{Bson, Document};

use docstore_core::{
    document::KEY_FIELD,
    error::{DocumentStoreError, DocumentStoreResult},
    pipeline::{Accumulator, AccumulatorInput, Group, GroupKey, Pipeline, StageVisitor},
    query::{Expr, Projection, Sort},
};

use crate::{
    evaluator::{Comparable, DocumentEvaluator, compare_documents, same_value},
    path, projection,
    update::as_f64,
};

/// Runs `pipeline` over `documents`, feeding each stage's output into the next.
pub(crate) fn run(documents: Vec<Document>, pipeline: &Pipeline) -> DocumentStoreResult<Vec<Document>> {
    let mut executor = PipelineExecutor { documents };

    for stage in pipeline.stages() {
        executor.visit_stage(stage)?;
    }

    Ok(executor.documents)
}

struct PipelineExecutor {
    documents: Vec<Document>,
}

impl StageVisitor for PipelineExecutor {
    type Output = ();
    type Error = DocumentStoreError;

    fn visit_match(&mut self, filter: &Expr) -> Result<(), Self::Error> {
        let mut kept = Vec::with_capacity(self.documents.len());
        for document in self.documents.drain(..) {
            if DocumentEvaluator::matches(&document, filter)? {
                kept.push(document);
            }
        }
        self.documents = kept;
        Ok(())
    }

    fn visit_group(&mut self, group: &Group) -> Result<(), Self::Error> {
        let mut groups: Vec<(Bson, Vec<State>)> = Vec::new();

        for document in &self.documents {
            let key = group_key(document, &group.key);

            let index = match groups.iter().position(|(existing, _)| same_value(existing, &key)) {
                Some(index) => index,
                None => {
                    let states = group.accumulators.iter().map(|(_, acc)| State::new(acc)).collect();
                    groups.push((key, states));
                    groups.len() - 1
                }
            };

            for ((_, accumulator), state) in group.accumulators.iter().zip(&mut groups[index].1) {
                state.feed(accumulator, document);
            }
        }

        self.documents = groups
            .into_iter()
            .map(|(key, states)| {
                let mut output = Document::new();
                output.insert(KEY_FIELD, key);
                for ((name, _), state) in group.accumulators.iter().zip(states) {
                    output.insert(name.as_str(), state.finish());
                }
                output
            })
            .collect();

        Ok(())
    }

    fn visit_sort(&mut self, keys: &[Sort]) -> Result<(), Self::Error> {
        self.documents.sort_by(|a, b| compare_documents(a, b, keys));
        Ok(())
    }

    fn visit_limit(&mut self, limit: usize) -> Result<(), Self::Error> {
        self.documents.truncate(limit);
        Ok(())
    }

    fn visit_skip(&mut self, skip: usize) -> Result<(), Self::Error> {
        let skip = skip.min(self.documents.len());
        self.documents.drain(..skip);
        Ok(())
    }

    fn visit_project(&mut self, shape: &Projection) -> Result<(), Self::Error> {
        self.documents = self
            .documents
            .iter()
            .map(|document| projection::project(document, shape))
            .collect::<DocumentStoreResult<_>>()?;
        Ok(())
    }

    fn visit_unwind(&mut self, field: &str) -> Result<(), Self::Error> {
        let mut unwound = Vec::with_capacity(self.documents.len());

        for document in self.documents.drain(..) {
            match path::lookup(&document, field) {
                None | Some(Bson::Null) => {}
                Some(Bson::Array(items)) => {
                    for item in items.clone() {
                        let mut copy = document.clone();
                        path::set(&mut copy, field, item)?;
                        unwound.push(copy);
                    }
                }
                Some(_) => unwound.push(document),
            }
        }

        self.documents = unwound;
        Ok(())
    }

    fn visit_count(&mut self, output: &str) -> Result<(), Self::Error> {
        let count = self.documents.len();
        self.documents = if count == 0 {
            Vec::new()
        } else {
            let mut counted = Document::new();
            counted.insert(output, integer(count as i64));
            vec![counted]
        };
        Ok(())
    }
}

fn group_key(document: &Document, key: &GroupKey) -> Bson {
    let value_at = |field: &str| path::lookup(document, field).cloned().unwrap_or(Bson::Null);

    match key {
        GroupKey::None => Bson::Null,
        GroupKey::Field(field) => value_at(field),
        GroupKey::Compound(fields) => {
            let mut compound = Document::new();
            for (alias, field) in fields {
                compound.insert(alias.as_str(), value_at(field));
            }
            Bson::Document(compound)
        }
    }
}

/// Narrowest integer representation of `value`.
fn integer(value: i64) -> Bson {
    match i32::try_from(value) {
        Ok(small) => Bson::Int32(small),
        Err(_) => Bson::Int64(value),
    }
}

/// Running state of one accumulator within one group.
enum State {
    Sum { int: i64, float: f64, is_float: bool, is_long: bool },
    Avg { total: f64, n: u64 },
    Extreme { best: Option<Bson>, keep_greater: bool },
    First(Option<Bson>),
    Push(Vec<Bson>),
}

impl State {
    fn new(accumulator: &Accumulator) -> Self {
        match accumulator {
            Accumulator::Sum(_) | Accumulator::Count => {
                State::Sum { int: 0, float: 0.0, is_float: false, is_long: false }
            }
            Accumulator::Avg(_) => State::Avg { total: 0.0, n: 0 },
            Accumulator::Min(_) => State::Extreme { best: None, keep_greater: false },
            Accumulator::Max(_) => State::Extreme { best: None, keep_greater: true },
            Accumulator::First(_) => State::First(None),
            Accumulator::Push(_) => State::Push(Vec::new()),
        }
    }

    fn feed(&mut self, accumulator: &Accumulator, document: &Document) {
        let input = match accumulator {
            Accumulator::Count => Some(Bson::Int32(1)),
            Accumulator::Sum(AccumulatorInput::Constant(value)) => Some(value.clone()),
            Accumulator::Sum(AccumulatorInput::Field(field))
            | Accumulator::Avg(field)
            | Accumulator::Min(field)
            | Accumulator::Max(field)
            | Accumulator::First(field)
            | Accumulator::Push(field) => path::lookup(document, field).cloned(),
        };

        match self {
            State::Sum { int, float, is_float, is_long } => match input {
                Some(Bson::Int32(v)) => add_int(int, float, is_float, v as i64),
                Some(Bson::Int64(v)) => {
                    *is_long = true;
                    add_int(int, float, is_float, v);
                }
                Some(Bson::Double(v)) => {
                    *is_float = true;
                    *float += v;
                }
                _ => {}
            },
            State::Avg { total, n } => {
                if let Some(v) = input.as_ref().and_then(as_f64) {
                    *total += v;
                    *n += 1;
                }
            }
            State::Extreme { best, keep_greater } => {
                let Some(value) = input.filter(|v| !matches!(v, Bson::Null)) else {
                    return;
                };
                let replace = match best {
                    None => true,
                    Some(current) => {
                        let ordering = Comparable::from(&value).total_cmp(&Comparable::from(&*current));
                        if *keep_greater { ordering.is_gt() } else { ordering.is_lt() }
                    }
                };
                if replace {
                    *best = Some(value);
                }
            }
            State::First(first) => {
                if first.is_none() {
                    *first = Some(input.unwrap_or(Bson::Null));
                }
            }
            State::Push(values) => {
                if let Some(value) = input {
                    values.push(value);
                }
            }
        }
    }

    fn finish(self) -> Bson {
        match self {
            State::Sum { int, float, is_float, is_long } => {
                if is_float {
                    Bson::Double(float + int as f64)
                } else if is_long {
                    Bson::Int64(int)
                } else {
                    integer(int)
                }
            }
            State::Avg { total, n } => {
                if n == 0 {
                    Bson::Null
                } else {
                    Bson::Double(total / n as f64)
                }
            }
            State::Extreme { best, .. } => best.unwrap_or(Bson::Null),
            State::First(first) => first.unwrap_or(Bson::Null),
            State::Push(values) => Bson::Array(values),
        }
    }
}

/// Adds to the integer part of a sum, spilling into the float part on overflow.
fn add_int(int: &mut i64, float: &mut f64, is_float: &mut bool, value: i64) {
    match int.checked_add(value) {
        Some(sum) => *int = sum,
        None => {
            *is_float = true;
            *float += value as f64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docstore_core::{
        pipeline::Group,
        query::{Filter, SortDirection},
    };

    fn restaurants() -> Vec<Document> {
        vec![
            doc! { "_id": 1, "name": "A", "borough": "Brooklyn", "cuisine": "Pizza", "stars": 4, "grades": [{ "score": 3 }, { "score": 9 }] },
            doc! { "_id": 2, "name": "B", "borough": "Brooklyn", "cuisine": "Thai", "stars": 2, "grades": [] },
            doc! { "_id": 3, "name": "C", "borough": "Queens", "cuisine": "Pizza", "stars": 5 },
            doc! { "_id": 4, "name": "D", "borough": "Brooklyn", "cuisine": "Pizza", "stars": 3.5, "grades": [{ "score": 12 }] },
        ]
    }

    #[test]
    fn match_group_sort() {
        let pipeline = Pipeline::new()
            .filter(Filter::eq("borough", "Brooklyn"))
            .group(Group::by("cuisine").count("count"))
            .sort("count", SortDirection::Desc);

        let output = run(restaurants(), &pipeline).unwrap();

        assert_eq!(
            output,
            vec![doc! { "_id": "Pizza", "count": 2 }, doc! { "_id": "Thai", "count": 1 }]
        );
    }

    #[test]
    fn accumulators() {
        let pipeline = Pipeline::new()
            .group(
                Group::all()
                    .sum("total_stars", "stars")
                    .avg("avg_stars", "stars")
                    .min("min_stars", "stars")
                    .max("max_stars", "stars")
                    .first("first_name", "name")
                    .push("names", "name"),
            );

        let output = run(restaurants(), &pipeline).unwrap();

        assert_eq!(
            output,
            vec![doc! {
                "_id": Bson::Null,
                "total_stars": 14.5,
                "avg_stars": 3.625,
                "min_stars": 2,
                "max_stars": 5,
                "first_name": "A",
                "names": ["A", "B", "C", "D"],
            }]
        );
    }

    #[test]
    fn integer_sums_stay_integers() {
        let pipeline = Pipeline::new()
            .filter(Filter::eq("cuisine", "Pizza"))
            .filter(Filter::ne("_id", 4))
            .group(Group::all().sum("stars", "stars"));

        assert_eq!(run(restaurants(), &pipeline).unwrap(), vec![doc! { "_id": Bson::Null, "stars": 9 }]);
    }

    #[test]
    fn compound_group_key() {
        let pipeline = Pipeline::new()
            .group(Group::by_fields([("borough", "borough"), ("cuisine", "cuisine")]).count("n"))
            .sort("n", SortDirection::Desc)
            .limit(1);

        assert_eq!(
            run(restaurants(), &pipeline).unwrap(),
            vec![doc! { "_id": { "borough": "Brooklyn", "cuisine": "Pizza" }, "n": 2 }]
        );
    }

    #[test]
    fn unwind_drops_missing_and_empty_arrays() {
        let pipeline = Pipeline::new()
            .unwind("grades")
            .project(Projection::include(["grades.score"]));

        assert_eq!(
            run(restaurants(), &pipeline).unwrap(),
            vec![
                doc! { "_id": 1, "grades": { "score": 3 } },
                doc! { "_id": 1, "grades": { "score": 9 } },
                doc! { "_id": 4, "grades": { "score": 12 } },
            ]
        );
    }

    #[test]
    fn skip_limit_and_count() {
        let pipeline = Pipeline::new().sort("_id", SortDirection::Asc).skip(1).limit(2).count("n");
        assert_eq!(run(restaurants(), &pipeline).unwrap(), vec![doc! { "n": 2 }]);

        let nothing = Pipeline::new().filter(Filter::eq("borough", "Bronx")).count("n");
        assert!(run(restaurants(), &nothing).unwrap().is_empty());
    }
}
