//! Structured results of read and write operations.

use bson::Document;
use serde::{Deserialize, Serialize};

/// Documents returned by a multi-document find.
///
/// `total_count` is the number of documents matching the filter, independent of any
/// limit or offset, so `documents.len() <= total_count` always holds for a consistent
/// snapshot.
///
/// # Example
///
/// ```ignore
/// let found = restaurants.find_many(Query::builder().limit(3).build()).await?;
/// println!("returned {} of {}", found.len(), found.total_count);
/// for document in found {
///     println!("{document}");
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FindResult<T = Document> {
    /// The documents returned, after projection and limit.
    pub documents: Vec<T>,
    /// Total count of matching documents.
    pub total_count: u64,
}

impl<T> FindResult<T> {
    pub fn new(documents: Vec<T>, total_count: u64) -> Self {
        Self { documents, total_count }
    }

    /// Number of documents returned.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.documents.iter()
    }

    /// Converts every document, keeping the total count.
    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<FindResult<U>, E> {
        Ok(FindResult {
            documents: self.documents.into_iter().map(f).collect::<Result<Vec<_>, E>>()?,
            total_count: self.total_count,
        })
    }
}

impl<T> Default for FindResult<T> {
    fn default() -> Self {
        Self { documents: Vec::new(), total_count: 0 }
    }
}

impl<T> IntoIterator for FindResult<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a FindResult<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.documents.iter()
    }
}

/// Result of an update.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Documents matched by the filter.
    pub matched_count: u64,
    /// Documents whose content actually changed.
    pub modified_count: u64,
}

/// Result of a delete.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted_count: u64,
}
