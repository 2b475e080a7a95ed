//! Field selection applied to documents returned by finds.

use bson::Document;

use docstore_core::{
    document::KEY_FIELD,
    error::DocumentStoreResult,
    query::Projection,
};

use crate::path;

/// Shapes a document according to `projection`.
pub(crate) fn project(document: &Document, projection: &Projection) -> DocumentStoreResult<Document> {
    if projection.include {
        let mut shaped = Document::new();

        if projection.keep_key {
            if let Some(key) = document.get(KEY_FIELD) {
                shaped.insert(KEY_FIELD, key.clone());
            }
        }

        for field in &projection.fields {
            if field == KEY_FIELD && !projection.keep_key {
                continue;
            }
            if let Some(value) = path::lookup(document, field) {
                path::set(&mut shaped, field, value.clone())?;
            }
        }

        Ok(shaped)
    } else {
        let mut shaped = document.clone();

        for field in &projection.fields {
            path::remove(&mut shaped, field);
        }
        if !projection.keep_key {
            shaped.remove(KEY_FIELD);
        }

        Ok(shaped)
    }
}
