//! Update specifications applied to matched documents.

use bson::Bson;

use crate::{
    document::KEY_FIELD,
    error::{DocumentStoreError, DocumentStoreResult},
};

/// A single field-update operator.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Sets the field (creating intermediate documents as needed).
    Set(String, Bson),
    /// Removes the field if present.
    Unset(String),
    /// Adds a number to the field, treating a missing field as zero.
    Inc(String, Bson),
    /// Appends a value to an array field, creating the array if missing.
    Push(String, Bson),
    /// Moves the value of the first field to the second.
    Rename(String, String),
}

impl UpdateOp {
    /// The paths this operator writes to.
    pub fn paths(&self) -> Vec<&str> {
        match self {
            UpdateOp::Set(path, _)
            | UpdateOp::Unset(path)
            | UpdateOp::Inc(path, _)
            | UpdateOp::Push(path, _) => vec![path.as_str()],
            UpdateOp::Rename(from, to) => vec![from.as_str(), to.as_str()],
        }
    }
}

/// An ordered list of update operators.
///
/// # Example
///
/// ```ignore
/// use docstore::update::Update;
///
/// let update = Update::new()
///     .set("name", "New Restaurant Name")
///     .inc("visits", 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Update::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::Set(field.into(), value.into()));
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset(field.into()));
        self
    }

    pub fn inc(mut self, field: impl Into<String>, amount: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::Inc(field.into(), amount.into()));
        self
    }

    pub fn push(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::Push(field.into(), value.into()));
        self
    }

    pub fn rename(mut self, field: impl Into<String>, new: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Rename(field.into(), new.into()));
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Rejects updates the store would refuse: empty ones and ones that write the key field.
    pub fn validate(&self) -> DocumentStoreResult<()> {
        if self.ops.is_empty() {
            return Err(DocumentStoreError::Query(
                "update must contain at least one operator".to_string(),
            ));
        }

        let touches_key = self
            .ops
            .iter()
            .flat_map(UpdateOp::paths)
            .any(|path| path == KEY_FIELD || path.starts_with("_id."));

        if touches_key {
            return Err(DocumentStoreError::Query(format!(
                "update would modify the immutable field '{KEY_FIELD}'"
            )));
        }

        for op in &self.ops {
            if let UpdateOp::Inc(path, amount) = op {
                if !matches!(amount, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) {
                    return Err(DocumentStoreError::Query(format!(
                        "cannot increment '{path}' by a non-numeric amount"
                    )));
                }
            }
        }

        Ok(())
    }
}
