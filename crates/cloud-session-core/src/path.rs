//! Path-based in-place mutation of session data.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::SessionData;

/// Separator between keys in an update path.
pub const PATH_SEPARATOR: char = '/';

/// One `(path, value)` pair of an update call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOp {
    /// `/`-separated key list, e.g. `/cart/items`.
    pub path: String,
    /// Value stored at the final key.
    pub value: Value,
}

impl UpdateOp {
    #[must_use]
    pub fn new(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
        }
    }
}

/// Update error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpdateError {
    #[error("Update path has no keys: {0:?}")]
    EmptyPath(String),
    #[error("Cannot descend into non-object value at {key:?} in {path:?}")]
    NotAnObject { path: String, key: String },
}

/// Set `op.value` at `op.path`, creating missing intermediate objects.
///
/// # Errors
/// Returns error if the path is empty or crosses a non-object value.
pub fn apply_update(data: &mut SessionData, op: &UpdateOp) -> Result<(), UpdateError> {
    let keys: Vec<&str> = op
        .path
        .split(PATH_SEPARATOR)
        .filter(|k| !k.is_empty())
        .collect();
    let Some((last, parents)) = keys.split_last() else {
        return Err(UpdateError::EmptyPath(op.path.clone()));
    };

    let mut node = data;
    for key in parents {
        let child = node
            .entry((*key).to_string())
            .or_insert_with(|| Value::Object(SessionData::new()));
        node = child.as_object_mut().ok_or_else(|| UpdateError::NotAnObject {
            path: op.path.clone(),
            key: (*key).to_string(),
        })?;
    }
    node.insert((*last).to_string(), op.value.clone());
    Ok(())
}

/// Apply every op in order. Not transactional: a failing op is logged and
/// skipped, ops before and after it still apply.
///
/// Returns the number of ops applied.
pub fn apply_updates(data: &mut SessionData, ops: &[UpdateOp]) -> usize {
    ops.iter()
        .filter(|op| match apply_update(data, op) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %op.path, "Skipping session update: {e}");
                false
            }
        })
        .count()
}
