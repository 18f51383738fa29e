//! Structural diff between JSON values.
//!
//! Produces JSON-Patch style operations (`add`, `replace`, `remove`).
//! Objects are compared key by key and arrays index by index, which is
//! enough for the report and session shapes published on the bus.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step of a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Replace { path: String, value: Value },
    Remove { path: String },
}

impl PatchOperation {
    pub fn path(&self) -> &str {
        match self {
            Self::Add { path, .. } | Self::Replace { path, .. } | Self::Remove { path } => path,
        }
    }
}

/// An empty container of the same shape as `value`.
pub(crate) fn empty_like(value: &Value) -> Value {
    match value {
        Value::Object(_) => Value::Object(Default::default()),
        Value::Array(_) => Value::Array(Vec::new()),
        _ => Value::Null,
    }
}

/// Operations that turn `old` into `new`. Empty when they are equal.
pub fn diff(old: &Value, new: &Value) -> Vec<PatchOperation> {
    let mut ops = Vec::new();
    diff_at(&mut String::new(), old, new, &mut ops);
    ops
}

fn diff_at(path: &mut String, old: &Value, new: &Value, ops: &mut Vec<PatchOperation>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_value) in old_map {
                let len = push_token(path, key);
                match new_map.get(key) {
                    Some(new_value) => diff_at(path, old_value, new_value, ops),
                    None => ops.push(PatchOperation::Remove { path: path.clone() }),
                }
                path.truncate(len);
            }
            for (key, new_value) in new_map {
                if !old_map.contains_key(key) {
                    let len = push_token(path, key);
                    ops.push(PatchOperation::Add {
                        path: path.clone(),
                        value: new_value.clone(),
                    });
                    path.truncate(len);
                }
            }
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            let common = old_items.len().min(new_items.len());
            for index in 0..common {
                let len = push_token(path, &index.to_string());
                diff_at(path, &old_items[index], &new_items[index], ops);
                path.truncate(len);
            }
            for (index, item) in new_items.iter().enumerate().skip(common) {
                let len = push_token(path, &index.to_string());
                ops.push(PatchOperation::Add {
                    path: path.clone(),
                    value: item.clone(),
                });
                path.truncate(len);
            }
            // Highest index first so earlier removals don't shift later ones.
            for index in (common..old_items.len()).rev() {
                let len = push_token(path, &index.to_string());
                ops.push(PatchOperation::Remove { path: path.clone() });
                path.truncate(len);
            }
        }
        _ => ops.push(PatchOperation::Replace {
            path: path.clone(),
            value: new.clone(),
        }),
    }
}

/// Append an escaped pointer token, returning the length to truncate back to.
fn push_token(path: &mut String, token: &str) -> usize {
    let len = path.len();
    path.push('/');
    for c in token.chars() {
        match c {
            '~' => path.push_str("~0"),
            '/' => path.push_str("~1"),
            c => path.push(c),
        }
    }
    len
}

fn parse_pointer(path: &str) -> Result<Vec<String>> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| Error::InvalidPath(path.to_string()))?;
    Ok(rest
        .split('/')
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn array_index(token: &str, len: usize, allow_end: bool, path: &str) -> Result<usize> {
    if allow_end && token == "-" {
        return Ok(len);
    }
    let index: usize = token
        .parse()
        .map_err(|_| Error::InvalidPath(path.to_string()))?;
    let limit = if allow_end { len } else { len.saturating_sub(1) };
    if index > limit || (!allow_end && len == 0) {
        return Err(Error::PathNotFound(path.to_string()));
    }
    Ok(index)
}

/// Apply `ops` to `target` in order.
///
/// Stops at the first failing operation; operations before it stay applied.
pub fn apply_patch(target: &mut Value, ops: &[PatchOperation]) -> Result<()> {
    for op in ops {
        apply_one(target, op)?;
    }
    Ok(())
}

fn apply_one(target: &mut Value, op: &PatchOperation) -> Result<()> {
    let path = op.path();
    let mut tokens = parse_pointer(path)?;
    let Some(last) = tokens.pop() else {
        return match op {
            PatchOperation::Add { value, .. } | PatchOperation::Replace { value, .. } => {
                *target = value.clone();
                Ok(())
            }
            PatchOperation::Remove { .. } => Err(Error::InvalidPath(path.to_string())),
        };
    };

    let mut parent = target;
    for token in &tokens {
        parent = match parent {
            Value::Object(map) => map.get_mut(token),
            Value::Array(items) => {
                let index = array_index(token, items.len(), false, path)?;
                items.get_mut(index)
            }
            _ => None,
        }
        .ok_or_else(|| Error::PathNotFound(path.to_string()))?;
    }

    match (parent, op) {
        (Value::Object(map), PatchOperation::Add { value, .. }) => {
            map.insert(last, value.clone());
        }
        (Value::Object(map), PatchOperation::Replace { value, .. }) => {
            let slot = map
                .get_mut(&last)
                .ok_or_else(|| Error::PathNotFound(path.to_string()))?;
            *slot = value.clone();
        }
        (Value::Object(map), PatchOperation::Remove { .. }) => {
            map.remove(&last)
                .ok_or_else(|| Error::PathNotFound(path.to_string()))?;
        }
        (Value::Array(items), PatchOperation::Add { value, .. }) => {
            let index = array_index(&last, items.len(), true, path)?;
            items.insert(index, value.clone());
        }
        (Value::Array(items), PatchOperation::Replace { value, .. }) => {
            let index = array_index(&last, items.len(), false, path)?;
            items[index] = value.clone();
        }
        (Value::Array(items), PatchOperation::Remove { .. }) => {
            let index = array_index(&last, items.len(), false, path)?;
            items.remove(index);
        }
        _ => return Err(Error::PathNotFound(path.to_string())),
    }
    Ok(())
}
