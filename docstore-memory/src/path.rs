//! Dotted-path access into nested documents.

use bson::{Bson, Document};

use docstore_core::error::{DocumentStoreError, DocumentStoreResult};

/// Returns the single value at `path`, following numeric segments into arrays.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Returns every value reachable at `path`.
///
/// Non-numeric segments fan out over arrays of documents, so `"grades.score"` yields the
/// score of every grade.
pub(crate) fn resolve<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut found = Vec::new();

    if let Some(first) = document.get(segments[0]) {
        collect(first, &segments[1..], &mut found);
    }

    found
}

fn collect<'a>(value: &'a Bson, rest: &[&str], found: &mut Vec<&'a Bson>) {
    let Some((segment, tail)) = rest.split_first() else {
        found.push(value);
        return;
    };

    match value {
        Bson::Document(inner) => {
            if let Some(next) = inner.get(*segment) {
                collect(next, tail, found);
            }
        }
        Bson::Array(items) => match segment.parse::<usize>() {
            Ok(index) => {
                if let Some(next) = items.get(index) {
                    collect(next, tail, found);
                }
            }
            Err(_) => {
                for item in items {
                    if let Bson::Document(inner) = item {
                        if let Some(next) = inner.get(*segment) {
                            collect(next, tail, found);
                        }
                    }
                }
            }
        },
        _ => {}
    }
}

/// Sets the value at `path`, creating intermediate documents as needed.
pub(crate) fn set(document: &mut Document, path: &str, value: Bson) -> DocumentStoreResult<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, tail)) => {
            if !document.contains_key(head) {
                document.insert(head, Document::new());
            }

            match document.get_mut(head) {
                Some(Bson::Document(inner)) => set(inner, tail, value),
                Some(Bson::Array(items)) => {
                    let (index, rest) = match tail.split_once('.') {
                        Some((index, rest)) => (index, Some(rest)),
                        None => (tail, None),
                    };
                    let slot = index
                        .parse::<usize>()
                        .ok()
                        .and_then(|index| items.get_mut(index))
                        .ok_or_else(|| cannot_create(path, head))?;

                    match (rest, slot) {
                        (None, slot) => {
                            *slot = value;
                            Ok(())
                        }
                        (Some(rest), Bson::Document(inner)) => set(inner, rest, value),
                        (Some(_), _) => Err(cannot_create(path, head)),
                    }
                }
                _ => Err(cannot_create(path, head)),
            }
        }
    }
}

/// Removes and returns the value at `path`.
pub(crate) fn remove(document: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, tail)) => match document.get_mut(head)? {
            Bson::Document(inner) => remove(inner, tail),
            _ => None,
        },
    }
}

fn cannot_create(path: &str, head: &str) -> DocumentStoreError {
    DocumentStoreError::Query(format!(
        "cannot create field '{path}': '{head}' is not a document"
    ))
}
