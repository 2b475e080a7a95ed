//! Aggregation pipeline translation into MongoDB stage documents.

use bson::{Bson, Document, doc};

use docstore_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    pipeline::{Accumulator, AccumulatorInput, Group, GroupKey, Pipeline, StageVisitor},
    query::{Expr, Projection, QueryVisitor, Sort},
};

use crate::query::{MongoQueryTranslator, projection_document, sort_document};

pub(crate) struct MongoStageTranslator;

impl MongoStageTranslator {
    /// Translates every stage of `pipeline`, in order.
    pub fn pipeline(pipeline: &Pipeline) -> DocumentStoreResult<Vec<Document>> {
        pipeline
            .stages()
            .iter()
            .map(|stage| MongoStageTranslator.visit_stage(stage))
            .collect()
    }
}

fn field_ref(path: &str) -> String {
    format!("${path}")
}

fn accumulator_document(accumulator: &Accumulator) -> Document {
    match accumulator {
        Accumulator::Sum(AccumulatorInput::Constant(value)) => doc! { "$sum": value },
        Accumulator::Sum(AccumulatorInput::Field(field)) => doc! { "$sum": field_ref(field) },
        Accumulator::Count => doc! { "$sum": 1 },
        Accumulator::Avg(field) => doc! { "$avg": field_ref(field) },
        Accumulator::Min(field) => doc! { "$min": field_ref(field) },
        Accumulator::Max(field) => doc! { "$max": field_ref(field) },
        Accumulator::First(field) => doc! { "$first": field_ref(field) },
        Accumulator::Push(field) => doc! { "$push": field_ref(field) },
    }
}

impl StageVisitor for MongoStageTranslator {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_match(&mut self, filter: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$match": MongoQueryTranslator.visit_expr(filter)? })
    }

    fn visit_group(&mut self, group: &Group) -> Result<Self::Output, Self::Error> {
        let key = match &group.key {
            GroupKey::None => Bson::Null,
            GroupKey::Field(field) => Bson::String(field_ref(field)),
            GroupKey::Compound(fields) => Bson::Document(
                fields
                    .iter()
                    .map(|(alias, field)| (alias.clone(), Bson::String(field_ref(field))))
                    .collect(),
            ),
        };

        let mut stage = doc! { "_id": key };
        for (output, accumulator) in &group.accumulators {
            stage.insert(output.as_str(), accumulator_document(accumulator));
        }

        Ok(doc! { "$group": stage })
    }

    fn visit_sort(&mut self, keys: &[Sort]) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$sort": sort_document(keys) })
    }

    fn visit_limit(&mut self, limit: usize) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$limit": limit as i64 })
    }

    fn visit_skip(&mut self, skip: usize) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$skip": skip as i64 })
    }

    fn visit_project(&mut self, projection: &Projection) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$project": projection_document(projection) })
    }

    fn visit_unwind(&mut self, field: &str) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$unwind": field_ref(field) })
    }

    fn visit_count(&mut self, output: &str) -> Result<Self::Output, Self::Error> {
        Ok(doc! { "$count": output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_core::query::{Filter, SortDirection};

    #[test]
    fn cuisine_counts_for_a_borough() {
        let pipeline = Pipeline::new()
            .filter(Filter::eq("borough", "Brooklyn"))
            .group(Group::by("cuisine").count("count"))
            .sort("count", SortDirection::Desc)
            .limit(5);

        assert_eq!(
            MongoStageTranslator::pipeline(&pipeline).unwrap(),
            vec![
                doc! { "$match": { "borough": { "$eq": "Brooklyn" } } },
                doc! { "$group": { "_id": "$cuisine", "count": { "$sum": 1 } } },
                doc! { "$sort": { "count": -1 } },
                doc! { "$limit": 5_i64 },
            ]
        );
    }

    #[test]
    fn compound_keys_and_accumulators() {
        let group = Group::by_fields([("borough", "borough"), ("cuisine", "cuisine")])
            .avg("avg_score", "grades.score")
            .push("names", "name");

        assert_eq!(
            MongoStageTranslator.visit_group(&group).unwrap(),
            doc! {
                "$group": {
                    "_id": { "borough": "$borough", "cuisine": "$cuisine" },
                    "avg_score": { "$avg": "$grades.score" },
                    "names": { "$push": "$name" },
                }
            }
        );
    }

    #[test]
    fn unwind_skip_and_count() {
        let pipeline = Pipeline::new().unwind("grades").skip(2).count("total");

        assert_eq!(
            MongoStageTranslator::pipeline(&pipeline).unwrap(),
            vec![
                doc! { "$unwind": "$grades" },
                doc! { "$skip": 2_i64 },
                doc! { "$count": "total" },
            ]
        );
    }
}
