//! Document representation, key handling and serialization helpers.
//!
//! A document is an arbitrary `bson::Document`: a field → value mapping with nested
//! mappings and sequences. Its key lives in the [`KEY_FIELD`] field and never changes
//! once assigned.

use bson::{Bson, de::deserialize_from_bson, oid::ObjectId, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, from_value, to_value};

use crate::error::{DocumentStoreError, DocumentStoreResult};

pub use bson::Document;

/// Name of the field holding a document's unique key.
pub const KEY_FIELD: &str = "_id";

/// Returns the key of `document`, if it has one.
pub fn document_key(document: &Document) -> Option<&Bson> {
    document.get(KEY_FIELD)
}

/// Returns the key of `document`, assigning a fresh [`ObjectId`] first if it has none.
///
/// Keys are generated here, before any remote call, so callers learn the key of every
/// document they insert regardless of the backend.
pub fn ensure_key(document: &mut Document) -> Bson {
    match document.get(KEY_FIELD) {
        Some(key) => key.clone(),
        None => {
            let key = Bson::ObjectId(ObjectId::new());
            document.insert(KEY_FIELD, key.clone());
            key
        }
    }
}

/// Renders a key for log lines and error messages.
///
/// Strings are rendered without quotes and object ids as their hex form.
pub fn display_key(key: &Bson) -> String {
    match key {
        Bson::String(s) => s.clone(),
        Bson::ObjectId(oid) => oid.to_hex(),
        other => other.to_string(),
    }
}

/// Serialization helpers for any serde type that is stored as a document.
///
/// This trait is automatically implemented for every `Serialize + DeserializeOwned` type.
///
/// # Example
///
/// ```ignore
/// use docstore::document::DocumentExt;
///
/// #[derive(Serialize, Deserialize)]
/// struct Restaurant { name: String, borough: String }
///
/// let doc = Restaurant { name: "Nick's".into(), borough: "Brooklyn".into() }.to_document()?;
/// let back = Restaurant::from_document(doc)?;
/// ```
pub trait DocumentExt: Sized {
    /// Converts this value to a document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidDocument`] if the value does not serialize to a mapping.
    fn to_document(&self) -> DocumentStoreResult<Document>;

    /// Creates a value from a document.
    fn from_document(document: Document) -> DocumentStoreResult<Self>;

    /// Converts this value to a JSON value.
    fn to_json(&self) -> DocumentStoreResult<Value>;

    /// Creates a value from a JSON value.
    fn from_json(value: Value) -> DocumentStoreResult<Self>;
}

impl<T: Serialize + DeserializeOwned> DocumentExt for T {
    fn to_document(&self) -> DocumentStoreResult<Document> {
        match serialize_to_bson(self)? {
            Bson::Document(document) => Ok(document),
            other => Err(DocumentStoreError::InvalidDocument(format!(
                "expected a mapping, got {:?}",
                other.element_type()
            ))),
        }
    }

    fn from_document(document: Document) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_bson(Bson::Document(document))?)
    }

    fn to_json(&self) -> DocumentStoreResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> DocumentStoreResult<Self> {
        Ok(from_value(value)?)
    }
}
