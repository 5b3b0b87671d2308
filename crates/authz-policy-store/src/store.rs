// crates/authz-policy-store/src/store.rs
// ============================================================================
// Module: Policy Store
// Description: Load, patch and rewrite a directory of policy CSV fragments.
// Purpose: Turn a policy diff into deterministic file edits plus an inverse.
// Dependencies: authz-core, serde_json, tracing, walkdir
// ============================================================================

//! ## Overview
//! The policy tree maps a rule type (`p`, `g`, ...) to its rows, each row being
//! the fields after the type column. Its JSON form is the patch target:
//!
//! ```json
//! {"g": [["alice", "role:admin", "global"]], "p": [["role:admin", "global", "core.users", "list"]]}
//! ```
//!
//! Every loaded row remembers its file. On write, known rows return to that
//! file, new rows go to the first file that held their type, and types with
//! no file go to `<dir>/core/global.csv`. Files are rewritten sorted, so equal
//! trees always produce equal bytes.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use authz_core::rules::read_policy_file;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::patch::PatchError;
use crate::patch::apply_patch;
use crate::patch::diff;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Fallback file for rule types no loaded file declared, relative to the dir.
pub const FALLBACK_FILE: &str = "core/global.csv";
/// Rule types always present in the tree.
const REQUIRED_TYPES: [&str; 2] = ["p", "g"];
/// Separator between fields of one identity.
const IDENTITY_SEPARATOR: char = '\u{1F}';
/// Field separator used on write.
const FIELD_SEPARATOR: &str = ", ";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Rule type to rows, each row holding the fields after the type column.
pub type PolicyTree = BTreeMap<String, Vec<Vec<String>>>;

/// Policy store errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyStoreError {
    /// Filesystem failure.
    #[error("policy store io error: {0}")]
    Io(String),
    /// A policy file is malformed.
    #[error("policy store parse error: {0}")]
    Parse(String),
    /// The diff is malformed or does not apply.
    #[error("policy store patch error: {0}")]
    Patch(#[from] PatchError),
    /// The patched document is not a policy tree.
    #[error("policy store decode error: {0}")]
    Decode(String),
}

/// File-backed policy tree.
#[derive(Debug)]
pub struct PolicyStore {
    /// Policy directory.
    dir: PathBuf,
    /// Current tree in on-disk order.
    tree: PolicyTree,
    /// Row identity to originating file.
    entry_files: HashMap<String, PathBuf>,
    /// Rule type to the file new rows of that type go to.
    type_defaults: BTreeMap<String, PathBuf>,
    /// Files currently hosting at least one row.
    files: BTreeSet<PathBuf>,
}

impl PolicyStore {
    /// Loads every `.csv` file under `dir`, creating `dir` when missing.
    ///
    /// Files are visited in file-name order, so type defaults are stable.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyStoreError::Io`] or [`PolicyStoreError::Parse`].
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, PolicyStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| io_error(&dir, &err))?;
        let mut store = Self {
            dir,
            tree: PolicyTree::new(),
            entry_files: HashMap::new(),
            type_defaults: BTreeMap::new(),
            files: BTreeSet::new(),
        };
        for entry in WalkDir::new(&store.dir).sort_by_file_name() {
            let entry = entry.map_err(|err| PolicyStoreError::Io(err.to_string()))?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "csv") {
                continue;
            }
            store.load_file(path)?;
        }
        ensure_required_types(&mut store.tree);
        debug!(
            dir = %store.dir.display(),
            files = store.files.len(),
            policies = store.tree.values().map(Vec::len).sum::<usize>(),
            "policy store loaded"
        );
        Ok(store)
    }

    /// Returns the policy directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the current tree.
    #[must_use]
    pub const fn tree(&self) -> &PolicyTree {
        &self.tree
    }

    /// Returns the files currently hosting rows.
    #[must_use]
    pub const fn files(&self) -> &BTreeSet<PathBuf> {
        &self.files
    }

    /// Returns the tree's JSON form.
    #[must_use]
    pub fn document(&self) -> Value {
        tree_document(&self.tree)
    }

    /// Applies `patch`, rewrites the affected files and returns the reverse
    /// patch.
    ///
    /// Patch and decode failures leave the disk untouched. A write failure
    /// may leave files partially updated.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyStoreError::Patch`], [`PolicyStoreError::Decode`] or
    /// [`PolicyStoreError::Io`].
    pub fn apply(&mut self, patch: &Value) -> Result<Value, PolicyStoreError> {
        let before = self.document();
        let mut patched = before.clone();
        apply_patch(&mut patched, patch)?;
        let mut tree: PolicyTree = serde_json::from_value(patched)
            .map_err(|err| PolicyStoreError::Decode(err.to_string()))?;
        ensure_required_types(&mut tree);

        let layout = self.route(&tree)?;
        for (path, rows) in &layout {
            write_file(path, rows)?;
        }
        for stale in self.files.iter().filter(|path| !layout.contains_key(*path)) {
            match fs::remove_file(stale) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(io_error(stale, &err)),
            }
        }

        let mut on_disk = PolicyTree::new();
        for rows in layout.values() {
            for row in rows {
                if let Some((kind, fields)) = row.split_first() {
                    on_disk.entry(kind.clone()).or_default().push(fields.to_vec());
                }
            }
        }
        ensure_required_types(&mut on_disk);
        self.files = layout.keys().cloned().collect();
        self.tree = on_disk;
        let reverse = diff(&self.document(), &before);
        debug!(
            files = self.files.len(),
            reverse_ops = reverse.as_array().map_or(0, Vec::len),
            "policy store applied patch"
        );
        Ok(reverse)
    }

    /// Reads one file into the tree.
    fn load_file(&mut self, path: &Path) -> Result<(), PolicyStoreError> {
        let rows = read_policy_file(path)
            .map_err(|err| PolicyStoreError::Parse(format!("{}: {err}", path.display())))?;
        for row in rows {
            let Some((kind, fields)) = row.split_first() else {
                continue;
            };
            self.tree.entry(kind.clone()).or_default().push(fields.to_vec());
            self.entry_files.entry(identity(kind, fields)).or_insert_with(|| path.to_path_buf());
            self.type_defaults.entry(kind.clone()).or_insert_with(|| path.to_path_buf());
        }
        self.files.insert(path.to_path_buf());
        Ok(())
    }

    /// Assigns every row of `tree` to a file, sorted within each file.
    fn route(
        &mut self,
        tree: &PolicyTree,
    ) -> Result<BTreeMap<PathBuf, Vec<Vec<String>>>, PolicyStoreError> {
        let mut layout: BTreeMap<PathBuf, Vec<Vec<String>>> = BTreeMap::new();
        for (kind, rows) in tree {
            for fields in rows {
                let mut row = Vec::with_capacity(fields.len() + 1);
                row.push(kind.clone());
                row.extend(fields.iter().cloned());
                if let Some(field) = row.iter().find(|field| !is_writable(field)) {
                    return Err(PolicyStoreError::Decode(format!(
                        "field `{field}` cannot be written as a bare policy field"
                    )));
                }
                let path = self.file_for(kind, fields);
                layout.entry(path).or_default().push(row);
            }
        }
        for rows in layout.values_mut() {
            rows.sort_by_cached_key(|row| row.join("|"));
        }
        Ok(layout)
    }

    /// Resolves the file a row belongs to.
    fn file_for(&mut self, kind: &str, fields: &[String]) -> PathBuf {
        if let Some(path) = self.entry_files.get(&identity(kind, fields)) {
            return path.clone();
        }
        if let Some(path) = self.type_defaults.get(kind) {
            return path.clone();
        }
        let fallback = self.dir.join(FALLBACK_FILE);
        self.type_defaults.insert(kind.to_string(), fallback.clone());
        fallback
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Inserts empty `p` and `g` lists when missing.
fn ensure_required_types(tree: &mut PolicyTree) {
    for kind in REQUIRED_TYPES {
        tree.entry(kind.to_string()).or_default();
    }
}

/// Returns the JSON form of a tree.
fn tree_document(tree: &PolicyTree) -> Value {
    Value::Object(
        tree.iter()
            .map(|(kind, rows)| {
                let rows = rows
                    .iter()
                    .map(|row| Value::Array(row.iter().cloned().map(Value::String).collect()))
                    .collect();
                (kind.clone(), Value::Array(rows))
            })
            .collect(),
    )
}

/// Returns the identity of a row: `<type>|<f1>\x1F<f2>...`.
fn identity(kind: &str, fields: &[String]) -> String {
    let mut key = String::from(kind);
    key.push('|');
    for (index, field) in fields.iter().enumerate() {
        if index > 0 {
            key.push(IDENTITY_SEPARATOR);
        }
        key.push_str(field);
    }
    key
}

/// Returns true when `field` survives an unquoted `, `-separated line.
fn is_writable(field: &str) -> bool {
    field == field.trim()
        && !field.starts_with('#')
        && !field.contains([',', '"', '\n', '\r'])
}

/// Writes sorted rows to `path`, creating its parent directory.
fn write_file(path: &Path, rows: &[Vec<String>]) -> Result<(), PolicyStoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| io_error(parent, &err))?;
    }
    let mut contents = String::new();
    for row in rows {
        contents.push_str(&row.join(FIELD_SEPARATOR));
        contents.push('\n');
    }
    fs::write(path, contents).map_err(|err| io_error(path, &err))
}

/// Formats an I/O error with its path.
fn io_error(path: &Path, err: &std::io::Error) -> PolicyStoreError {
    PolicyStoreError::Io(format!("{}: {err}", path.display()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_separates_fields_with_unit_separator() {
        let fields = vec!["a".to_string(), "b".to_string()];
        assert_eq!(identity("p", &fields), "p|a\u{1F}b");
    }

    #[test]
    fn separators_are_not_writable() {
        assert!(is_writable("r.attr.department == 'security'"));
        assert!(!is_writable("a,b"));
        assert!(!is_writable(" padded"));
        assert!(!is_writable("#comment"));
    }
}
