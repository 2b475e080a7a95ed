//! Mapping of driver errors onto the docstore error taxonomy.

use bson::Bson;
use mongodb::error::{
    Error as MongoError, ErrorKind, TRANSIENT_TRANSACTION_ERROR, WriteFailure,
};

use docstore_core::{document::display_key, error::DocumentStoreError};

const DUPLICATE_KEY_CODE: i32 = 11000;
const WRITE_CONFLICT_CODE: i32 = 112;
pub(crate) const NAMESPACE_NOT_FOUND_CODE: i32 = 26;

/// Context of the failed operation, used to make errors precise.
#[derive(Clone, Copy)]
pub(crate) struct Failed<'a> {
    pub collection: &'a str,
    /// Key of the document being written, when known.
    pub key: Option<&'a Bson>,
}

impl<'a> Failed<'a> {
    pub fn on(collection: &'a str) -> Self {
        Failed { collection, key: None }
    }

    pub fn with_key(mut self, key: &'a Bson) -> Self {
        self.key = Some(key);
        self
    }

    fn duplicate(&self, message: &str) -> DocumentStoreError {
        let key = match self.key {
            Some(key) => display_key(key),
            None => message
                .split_once("dup key: ")
                .map_or_else(|| message.to_string(), |(_, key)| key.trim().to_string()),
        };

        DocumentStoreError::DuplicateKey { key, collection: self.collection.to_string() }
    }
}

/// Maps a driver error.
pub(crate) fn translate(err: MongoError, failed: Failed<'_>) -> DocumentStoreError {
    if err.contains_label(TRANSIENT_TRANSACTION_ERROR) && !is_connection(&err.kind) {
        return DocumentStoreError::WriteConflict(err.to_string());
    }

    match *err.kind {
        ErrorKind::Write(WriteFailure::WriteError(ref write_error)) if write_error.code == DUPLICATE_KEY_CODE => {
            failed.duplicate(&write_error.message)
        }
        ErrorKind::Command(ref command) if command.code == WRITE_CONFLICT_CODE => {
            DocumentStoreError::WriteConflict(command.message.clone())
        }
        ErrorKind::InsertMany(ref failure) => {
            let duplicate = failure
                .write_errors
                .as_ref()
                .and_then(|errors| errors.iter().find(|e| e.code == DUPLICATE_KEY_CODE));
            match duplicate {
                Some(write_error) => failed.duplicate(&write_error.message),
                None => DocumentStoreError::Query(err.to_string()),
            }
        }
        ref kind if is_connection(kind) => DocumentStoreError::Connection(err.to_string()),
        ErrorKind::Command(_)
        | ErrorKind::Write(_)
        | ErrorKind::InvalidArgument { .. }
        | ErrorKind::Transaction { .. } => DocumentStoreError::Query(err.to_string()),
        ErrorKind::Bson(_) | ErrorKind::BsonSerialization(_) | ErrorKind::BsonDeserialization(_) => {
            DocumentStoreError::Serialization(err.to_string())
        }
        _ => DocumentStoreError::Backend(err.to_string()),
    }
}

/// Maps an ordered `insert_many` failure, reporting the keys written before it.
///
/// Writes stop at the first failing document, so every document before the lowest failing
/// index was inserted.
pub(crate) fn translate_insert_many(err: MongoError, collection: &str, keys: &[Bson]) -> DocumentStoreError {
    let first_failure = match &*err.kind {
        ErrorKind::InsertMany(failure) => failure
            .write_errors
            .as_ref()
            .and_then(|errors| errors.iter().map(|e| e.index).min()),
        _ => None,
    };

    let inserted = match first_failure {
        Some(index) => keys[..index.min(keys.len())].to_vec(),
        // Nothing is known to have been written.
        None => Vec::new(),
    };

    let source = match first_failure.and_then(|index| keys.get(index)) {
        Some(key) => translate(err, Failed::on(collection).with_key(key)),
        None => translate(err, Failed::on(collection)),
    };

    DocumentStoreError::PartialInsert { inserted, source: Box::new(source) }
}

/// Returns the server error code of a command failure.
pub(crate) fn command_code(err: &MongoError) -> Option<i32> {
    match &*err.kind {
        ErrorKind::Command(command) => Some(command.code),
        _ => None,
    }
}

/// Failures meaning the store cannot be reached or the driver client is closed.
fn is_connection(kind: &ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Io(_)
            | ErrorKind::ConnectionPoolCleared { .. }
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::DnsResolve { .. }
            | ErrorKind::Authentication { .. }
            | ErrorKind::Shutdown
    )
}
