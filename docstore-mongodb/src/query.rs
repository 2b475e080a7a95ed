//! Query translation from docstore AST to MongoDB query syntax.
//!
//! This module translates docstore's abstract query expressions, projections, sort keys and
//! update operators into MongoDB BSON documents for execution by the server.

use bson::{Bson, Document, doc};

use docstore_core::{
    document::KEY_FIELD,
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, Projection, QueryVisitor, Sort, SortDirection},
    update::{Update, UpdateOp},
};

/// Translates docstore query expressions into MongoDB query documents.
///
/// String matching operators become anchored or unanchored regular expressions with the
/// pattern escaped, so matching is literal and case-sensitive.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    /// Translates an optional filter; `None` matches every document.
    pub fn filter(expr: Option<&Expr>) -> DocumentStoreResult<Document> {
        match expr {
            Some(expr) => MongoQueryTranslator.visit_expr(expr),
            None => Ok(Document::new()),
        }
    }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(Document::new());
        }

        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(doc! { "$expr": false });
        }

        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        // `$not` only applies to operator expressions; `$nor` negates a whole filter.
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::Contains => match value {
                    Bson::String(s) => doc! { "$regex": escape_regex(s) },
                    Bson::Array(arr) => doc! { "$all": arr },
                    single => doc! { "$all": [single] },
                },
                FieldOp::NotContains => match value {
                    Bson::String(s) => doc! { "$not": { "$regex": escape_regex(s) } },
                    Bson::Array(arr) => doc! { "$not": { "$all": arr } },
                    single => doc! { "$not": { "$all": [single] } },
                },
                FieldOp::StartsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("^{}", escape_regex(s)) },
                    _ => return Err(DocumentStoreError::Query("StartsWith operator requires a string value".to_string())),
                },
                FieldOp::EndsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("{}$", escape_regex(s)) },
                    _ => return Err(DocumentStoreError::Query("EndsWith operator requires a string value".to_string())),
                },
                FieldOp::AnyOf => doc! { "$in": as_list(value) },
                FieldOp::NoneOf => doc! { "$nin": as_list(value) },
            }
        })
    }
}

fn as_list(value: &Bson) -> Bson {
    match value {
        Bson::Array(_) => value.clone(),
        single => Bson::Array(vec![single.clone()]),
    }
}

fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if "\\.^$|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Translates sort keys into a sort document, most significant key first.
pub(crate) fn sort_document(keys: &[Sort]) -> Document {
    keys.iter()
        .map(|key| {
            let direction = match key.direction {
                SortDirection::Asc => 1,
                SortDirection::Desc => -1,
            };
            (key.field.clone(), Bson::Int32(direction))
        })
        .collect()
}

/// Translates a projection into an inclusion or exclusion document.
pub(crate) fn projection_document(projection: &Projection) -> Document {
    let flag = if projection.include { 1 } else { 0 };
    let mut translated: Document = projection
        .fields
        .iter()
        .filter(|field| field.as_str() != KEY_FIELD)
        .map(|field| (field.clone(), Bson::Int32(flag)))
        .collect();

    if !projection.keep_key {
        translated.insert(KEY_FIELD, 0);
    }

    translated
}

/// Translates update operators, grouping fields under their operator.
pub(crate) fn update_document(update: &Update) -> Document {
    let mut translated = Document::new();

    for op in update.ops() {
        let (operator, field, value) = match op {
            UpdateOp::Set(field, value) => ("$set", field, value.clone()),
            UpdateOp::Unset(field) => ("$unset", field, Bson::String(String::new())),
            UpdateOp::Inc(field, amount) => ("$inc", field, amount.clone()),
            UpdateOp::Push(field, value) => ("$push", field, value.clone()),
            UpdateOp::Rename(field, new) => ("$rename", field, Bson::String(new.clone())),
        };

        match translated.get_mut(operator) {
            Some(Bson::Document(fields)) => {
                fields.insert(field.as_str(), value);
            }
            _ => {
                translated.insert(operator, doc! { field.as_str(): value });
            }
        }
    }

    translated
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_core::query::Filter;

    fn translate(expr: Expr) -> Document {
        MongoQueryTranslator.visit_expr(&expr).unwrap()
    }

    #[test]
    fn match_all_is_empty() {
        assert_eq!(translate(Filter::all()), doc! {});
        assert_eq!(MongoQueryTranslator::filter(None).unwrap(), doc! {});
    }

    #[test]
    fn comparison_and_composition() {
        assert_eq!(
            translate(Filter::eq("borough", "Brooklyn").and(Filter::gte("stars", 4))),
            doc! { "$and": [{ "borough": { "$eq": "Brooklyn" } }, { "stars": { "$gte": 4 } }] }
        );
        assert_eq!(
            translate(Filter::eq("cuisine", "Thai").not()),
            doc! { "$nor": [{ "cuisine": { "$eq": "Thai" } }] }
        );
    }

    #[test]
    fn string_operators_are_escaped() {
        assert_eq!(translate(Filter::starts_with("name", "A+")), doc! { "name": { "$regex": "^A\\+" } });
        assert_eq!(translate(Filter::ends_with("name", "Inc.")), doc! { "name": { "$regex": "Inc\\.$" } });
        assert_eq!(translate(Filter::contains("name", "Pizza")), doc! { "name": { "$regex": "Pizza" } });
        assert!(MongoQueryTranslator.visit_expr(&Filter::starts_with("stars", 4)).is_err());
    }

    #[test]
    fn membership_wraps_scalars() {
        assert_eq!(translate(Filter::any_of("borough", "Queens")), doc! { "borough": { "$in": ["Queens"] } });
        assert_eq!(
            translate(Filter::none_of("borough", vec!["Queens", "Bronx"])),
            doc! { "borough": { "$nin": ["Queens", "Bronx"] } }
        );
    }

    #[test]
    fn projection_and_sort() {
        assert_eq!(
            projection_document(&Projection::include(["name", "cuisine"]).without_key()),
            doc! { "name": 1, "cuisine": 1, "_id": 0 }
        );
        assert_eq!(projection_document(&Projection::exclude(["grades"])), doc! { "grades": 0 });
        assert_eq!(
            sort_document(&[Sort::asc("borough"), Sort::desc("stars")]),
            doc! { "borough": 1, "stars": -1 }
        );
    }

    #[test]
    fn update_groups_by_operator() {
        let update = Update::new()
            .set("name", "New Restaurant Name")
            .set("cuisine", "Thai")
            .inc("visits", 1)
            .unset("phone");

        assert_eq!(
            update_document(&update),
            doc! {
                "$set": { "name": "New Restaurant Name", "cuisine": "Thai" },
                "$inc": { "visits": 1 },
                "$unset": { "phone": "" },
            }
        );
    }
}
