// crates/authz-policy-store/src/patch.rs
// ============================================================================
// Module: JSON Patch
// Description: RFC 6902 patch application and structural diff.
// Purpose: Mutate the policy tree document and compute its inverse.
// Dependencies: serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`apply_patch`] supports `add`, `remove`, `replace`, `move`, `copy` and
//! `test`. [`diff`] produces a patch that turns one document into another;
//! arrays are diffed after stripping their common prefix and suffix, so a
//! single appended row yields a single `remove`.
//!
//! Invariant: for all documents `a` and `b`, applying `diff(a, b)` to `a`
//! yields `b`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Patch failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchError {
    /// Patch document is not a list of operations.
    #[error("malformed patch: {0}")]
    Malformed(String),
    /// Pointer does not resolve against the document.
    #[error("patch path not found: {0}")]
    PathNotFound(String),
    /// `test` operation did not match.
    #[error("patch test failed at {0}")]
    TestFailed(String),
}

// ============================================================================
// SECTION: Apply
// ============================================================================

/// Applies `patch` to `document` in place.
///
/// On error `document` may be partially modified; callers patch a copy.
///
/// # Errors
///
/// Returns [`PatchError`] for malformed operations, unresolved paths, or a
/// failed `test`.
pub fn apply_patch(document: &mut Value, patch: &Value) -> Result<(), PatchError> {
    let Some(operations) = patch.as_array() else {
        return Err(PatchError::Malformed("patch must be an array".to_string()));
    };
    for (index, operation) in operations.iter().enumerate() {
        apply_operation(document, operation).map_err(|err| annotate(err, index))?;
    }
    Ok(())
}

/// Prefixes malformed-operation messages with the operation index.
fn annotate(err: PatchError, index: usize) -> PatchError {
    match err {
        PatchError::Malformed(message) => PatchError::Malformed(format!("op {index}: {message}")),
        other => other,
    }
}

/// Applies one operation.
fn apply_operation(document: &mut Value, operation: &Value) -> Result<(), PatchError> {
    let op = string_member(operation, "op")?;
    let path = string_member(operation, "path")?;
    let tokens = parse_pointer(path)?;
    match op {
        "add" => add(document, &tokens, value_member(operation)?.clone(), path),
        "remove" => remove(document, &tokens, path).map(|_| ()),
        "replace" => {
            let target = resolve_mut(document, &tokens, path)?;
            *target = value_member(operation)?.clone();
            Ok(())
        }
        "move" => {
            let from = string_member(operation, "from")?;
            if path != from && path.starts_with(&format!("{from}/")) {
                return Err(PatchError::Malformed(format!("cannot move {from} into itself")));
            }
            let value = remove(document, &parse_pointer(from)?, from)?;
            add(document, &tokens, value, path)
        }
        "copy" => {
            let from = string_member(operation, "from")?;
            let value = resolve_mut(document, &parse_pointer(from)?, from)?.clone();
            add(document, &tokens, value, path)
        }
        "test" => {
            let expected = value_member(operation)?;
            if *resolve_mut(document, &tokens, path)? == *expected {
                Ok(())
            } else {
                Err(PatchError::TestFailed(path.to_string()))
            }
        }
        other => Err(PatchError::Malformed(format!("unknown op `{other}`"))),
    }
}

/// Inserts `value` at `tokens`.
fn add(document: &mut Value, tokens: &[String], value: Value, path: &str) -> Result<(), PatchError> {
    let Some((last, parents)) = tokens.split_last() else {
        *document = value;
        return Ok(());
    };
    match resolve_mut(document, parents, path)? {
        Value::Object(map) => {
            map.insert(last.clone(), value);
            Ok(())
        }
        Value::Array(items) => {
            if last == "-" {
                items.push(value);
                return Ok(());
            }
            let index = parse_index(last, path)?;
            if index > items.len() {
                return Err(PatchError::PathNotFound(path.to_string()));
            }
            items.insert(index, value);
            Ok(())
        }
        _ => Err(PatchError::PathNotFound(path.to_string())),
    }
}

/// Removes and returns the value at `tokens`.
fn remove(document: &mut Value, tokens: &[String], path: &str) -> Result<Value, PatchError> {
    let Some((last, parents)) = tokens.split_last() else {
        return Err(PatchError::Malformed("cannot remove the document root".to_string()));
    };
    match resolve_mut(document, parents, path)? {
        Value::Object(map) => {
            map.remove(last).ok_or_else(|| PatchError::PathNotFound(path.to_string()))
        }
        Value::Array(items) => {
            let index = parse_index(last, path)?;
            if index >= items.len() {
                return Err(PatchError::PathNotFound(path.to_string()));
            }
            Ok(items.remove(index))
        }
        _ => Err(PatchError::PathNotFound(path.to_string())),
    }
}

/// Walks `tokens` from the root.
fn resolve_mut<'a>(
    document: &'a mut Value,
    tokens: &[String],
    path: &str,
) -> Result<&'a mut Value, PatchError> {
    let mut current = document;
    for token in tokens {
        current = match current {
            Value::Object(map) => map.get_mut(token),
            Value::Array(items) => {
                let index = parse_index(token, path)?;
                items.get_mut(index)
            }
            _ => None,
        }
        .ok_or_else(|| PatchError::PathNotFound(path.to_string()))?;
    }
    Ok(current)
}

/// Parses a JSON pointer into unescaped reference tokens.
fn parse_pointer(path: &str) -> Result<Vec<String>, PatchError> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err(PatchError::Malformed(format!("pointer `{path}` must start with /")));
    };
    Ok(rest.split('/').map(|token| token.replace("~1", "/").replace("~0", "~")).collect())
}

/// Parses an array index token.
fn parse_index(token: &str, path: &str) -> Result<usize, PatchError> {
    if token.len() > 1 && token.starts_with('0') {
        return Err(PatchError::PathNotFound(path.to_string()));
    }
    token.parse().map_err(|_| PatchError::PathNotFound(path.to_string()))
}

/// Reads a required string member of an operation.
fn string_member<'a>(operation: &'a Value, key: &str) -> Result<&'a str, PatchError> {
    operation
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| PatchError::Malformed(format!("missing `{key}`")))
}

/// Reads the required `value` member of an operation.
fn value_member(operation: &Value) -> Result<&Value, PatchError> {
    operation.get("value").ok_or_else(|| PatchError::Malformed("missing `value`".to_string()))
}

// ============================================================================
// SECTION: Diff
// ============================================================================

/// Returns a patch that turns `from` into `to`.
#[must_use]
pub fn diff(from: &Value, to: &Value) -> Value {
    let mut operations = Vec::new();
    diff_into(from, to, "", &mut operations);
    Value::Array(operations)
}

/// Appends the operations for one node.
fn diff_into(from: &Value, to: &Value, path: &str, operations: &mut Vec<Value>) {
    if from == to {
        return;
    }
    match (from, to) {
        (Value::Object(left), Value::Object(right)) => diff_objects(left, right, path, operations),
        (Value::Array(left), Value::Array(right)) => diff_arrays(left, right, path, operations),
        _ => operations.push(json!({"op": "replace", "path": path, "value": to})),
    }
}

/// Diffs two objects key by key.
fn diff_objects(
    left: &Map<String, Value>,
    right: &Map<String, Value>,
    path: &str,
    operations: &mut Vec<Value>,
) {
    for (key, value) in left {
        let child = format!("{path}/{}", escape_token(key));
        match right.get(key) {
            Some(other) => diff_into(value, other, &child, operations),
            None => operations.push(json!({"op": "remove", "path": child})),
        }
    }
    for (key, value) in right {
        if !left.contains_key(key) {
            let child = format!("{path}/{}", escape_token(key));
            operations.push(json!({"op": "add", "path": child, "value": value}));
        }
    }
}

/// Diffs two arrays around their common prefix and suffix.
fn diff_arrays(left: &[Value], right: &[Value], path: &str, operations: &mut Vec<Value>) {
    let prefix = left.iter().zip(right).take_while(|(a, b)| a == b).count();
    let max_suffix = left.len().min(right.len()) - prefix;
    let suffix = left
        .iter()
        .rev()
        .zip(right.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();
    let left_mid = &left[prefix .. left.len() - suffix];
    let right_mid = &right[prefix .. right.len() - suffix];
    let shared = left_mid.len().min(right_mid.len());
    for offset in 0 .. shared {
        let child = format!("{path}/{}", prefix + offset);
        diff_into(&left_mid[offset], &right_mid[offset], &child, operations);
    }
    for offset in (shared .. left_mid.len()).rev() {
        operations.push(json!({"op": "remove", "path": format!("{path}/{}", prefix + offset)}));
    }
    for (offset, value) in right_mid.iter().enumerate().skip(shared) {
        operations.push(json!({
            "op": "add",
            "path": format!("{path}/{}", prefix + offset),
            "value": value,
        }));
    }
}

/// Escapes a reference token for use in a pointer.
fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions and helpers are permitted.")]

    use super::*;

    #[test]
    fn appended_row_reverses_to_one_remove() {
        let before = json!({"g": [], "p": [["role:admin", "global", "core.users", "list"]]});
        let after = json!({"g": [], "p": [
            ["role:admin", "global", "core.users", "list"],
            ["role:admin", "global", "core.users", "edit"]
        ]});
        assert_eq!(diff(&after, &before), json!([{"op": "remove", "path": "/p/1"}]));
    }

    #[test]
    fn operations_cover_the_rfc_set() {
        let mut document = json!({"a": [1, 2], "b": {"c~d/e": true}});
        let patch = json!([
            {"op": "add", "path": "/a/0", "value": 0},
            {"op": "test", "path": "/b/c~0d~1e", "value": true},
            {"op": "copy", "from": "/a/1", "path": "/a/-"},
            {"op": "move", "from": "/b", "path": "/z"},
            {"op": "replace", "path": "/a/3", "value": 9},
            {"op": "remove", "path": "/a/0"}
        ]);
        apply_patch(&mut document, &patch).unwrap();
        assert_eq!(document, json!({"a": [1, 2, 9], "z": {"c~d/e": true}}));
    }

    #[test]
    fn failures_are_typed() {
        let mut document = json!({"p": []});
        assert_eq!(
            apply_patch(&mut document, &json!([{"op": "remove", "path": "/p/0"}])),
            Err(PatchError::PathNotFound("/p/0".to_string()))
        );
        assert_eq!(
            apply_patch(&mut document, &json!([{"op": "test", "path": "/p", "value": [1]}])),
            Err(PatchError::TestFailed("/p".to_string()))
        );
        assert!(matches!(
            apply_patch(&mut document, &json!([{"op": "frobnicate", "path": "/p"}])),
            Err(PatchError::Malformed(_))
        ));
        assert!(matches!(apply_patch(&mut document, &json!({"op": "add"})), Err(PatchError::Malformed(_))));
        assert!(matches!(
            apply_patch(&mut document, &json!([{"op": "add", "path": "/p/01", "value": 1}])),
            Err(PatchError::PathNotFound(_))
        ));
    }
}
