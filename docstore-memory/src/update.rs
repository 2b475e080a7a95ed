//! Application of update operators to stored documents.

use bson::{Bson, Document};

use docstore_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    update::{Update, UpdateOp},
};

use crate::path;

/// Applies every operator of `update` to `document` in order.
///
/// Returns `true` when the document changed. On error the document may be partially
/// updated; callers apply updates to a copy.
pub(crate) fn apply(document: &mut Document, update: &Update) -> DocumentStoreResult<bool> {
    let before = document.clone();

    for op in update.ops() {
        match op {
            UpdateOp::Set(field, value) => path::set(document, field, value.clone())?,
            UpdateOp::Unset(field) => {
                path::remove(document, field);
            }
            UpdateOp::Inc(field, amount) => {
                let incremented = match path::lookup(document, field) {
                    None => amount.clone(),
                    Some(current) => add(current, amount).ok_or_else(|| {
                        DocumentStoreError::Query(format!(
                            "cannot apply $inc to '{field}': value {current} is not numeric"
                        ))
                    })?,
                };
                path::set(document, field, incremented)?;
            }
            UpdateOp::Push(field, value) => {
                let pushed = match path::lookup(document, field) {
                    None => Bson::Array(vec![value.clone()]),
                    Some(Bson::Array(items)) => {
                        let mut items = items.clone();
                        items.push(value.clone());
                        Bson::Array(items)
                    }
                    Some(current) => {
                        return Err(DocumentStoreError::Query(format!(
                            "cannot apply $push to '{field}': value {current} is not an array"
                        )));
                    }
                };
                path::set(document, field, pushed)?;
            }
            UpdateOp::Rename(from, to) => {
                if let Some(value) = path::remove(document, from) {
                    path::set(document, to, value)?;
                }
            }
        }
    }

    Ok(*document != before)
}

/// Adds two numbers, widening the result only as far as needed.
fn add(current: &Bson, amount: &Bson) -> Option<Bson> {
    Some(match (current, amount) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Bson::Int32(sum),
            None => Bson::Int64(*a as i64 + *b as i64),
        },
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64((*a as i64).checked_add(*b)?),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a.checked_add(*b as i64)?),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.checked_add(*b)?),
        (a, b) => Bson::Double(as_f64(a)? + as_f64(b)?),
    })
}

pub(crate) fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(*v as f64),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}
