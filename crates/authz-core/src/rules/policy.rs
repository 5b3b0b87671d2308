// crates/authz-core/src/rules/policy.rs
// ============================================================================
// Module: Policy Rows
// Description: CSV policy row reader and typed policy/grant rows.
// Purpose: Turn `p`/`g` CSV lines into rules the evaluator can match.
// Dependencies: csv, serde
// ============================================================================

//! ## Overview
//! Policy files hold one rule per line:
//!
//! ```text
//! # comment
//! p, role:core.admin, global, core.users, list, allow
//! p, role:core.editor, global, core.docs, edit, allow, r.attr.owner == r.sub
//! g, tenant:global:user:f6f8b13e-755f-41e0-af1a-f2671e40c15c, role:core.admin, global
//! ```
//!
//! [`read_policy_rows`] is the shared reader used by the engine, the policy
//! listing and the policy store mutator. Fields are trimmed; blank lines and
//! `#` comments are skipped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::rules::RuleError;
use crate::rules::condition::Condition;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Row type of policy rules.
pub const POLICY_ROW: &str = "p";
/// Row type of role grants.
pub const GROUPING_ROW: &str = "g";

// ============================================================================
// SECTION: Row Reader
// ============================================================================

/// Reads policy CSV rows; element 0 of each row is the row type.
///
/// # Errors
///
/// Returns [`RuleError::Parse`] when the CSV is malformed.
pub fn read_policy_rows<R: Read>(reader: R) -> Result<Vec<Vec<String>>, RuleError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(reader);
    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record.map_err(|err| RuleError::Parse(err.to_string()))?;
        let row: Vec<String> = record.iter().map(|field| field.trim().to_string()).collect();
        if row.iter().all(String::is_empty) || row[0].starts_with('#') {
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Reads policy rows from a file.
///
/// # Errors
///
/// Returns [`RuleError`] when the file cannot be opened or parsed.
pub fn read_policy_file(path: &Path) -> Result<Vec<Vec<String>>, RuleError> {
    let file =
        File::open(path).map_err(|err| RuleError::Io(format!("{}: {err}", path.display())))?;
    read_policy_rows(file)
}

// ============================================================================
// SECTION: Typed Rows
// ============================================================================

/// Rule effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Grants access.
    #[default]
    Allow,
    /// Revokes access.
    Deny,
}

impl Effect {
    /// Returns the canonical label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }

    /// Parses an effect label; blank means allow.
    fn parse(label: &str) -> Result<Self, RuleError> {
        match label.trim().to_lowercase().as_str() {
            "" | "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            other => Err(RuleError::Parse(format!("unknown effect `{other}`"))),
        }
    }
}

/// `p` row: grants or denies an action on an object.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyRule {
    /// Subject or role the rule applies to.
    pub subject: String,
    /// Domain the rule applies in.
    pub domain: String,
    /// Object pattern.
    pub object: String,
    /// Action pattern.
    pub action: String,
    /// Rule effect.
    pub effect: Effect,
    /// Optional ABAC condition.
    pub condition: Option<Condition>,
}

impl PolicyRule {
    /// Builds a rule from the fields following the `p` type marker.
    fn from_fields(fields: &[String]) -> Result<Self, RuleError> {
        if fields.len() < 4 {
            return Err(RuleError::Parse(format!(
                "policy row needs at least 4 fields, found {}",
                fields.len()
            )));
        }
        let effect = Effect::parse(fields.get(4).map_or("", String::as_str))?;
        let condition = match fields.get(5).map(|text| text.trim()) {
            Some(text) if !text.is_empty() => Some(Condition::parse(text)?),
            _ => None,
        };
        Ok(Self {
            subject: fields[0].clone(),
            domain: fields[1].clone(),
            object: fields[2].clone(),
            action: fields[3].clone(),
            effect,
            condition,
        })
    }

    /// Returns the canonical row text used in traces.
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut text = format!(
            "p, {}, {}, {}, {}, {}",
            self.subject,
            self.domain,
            self.object,
            self.action,
            self.effect.as_str()
        );
        if let Some(condition) = &self.condition {
            text.push_str(", ");
            text.push_str(condition.as_str());
        }
        text
    }
}

/// `g` row: makes a member inherit a role inside a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrant {
    /// Member subject (user or role).
    pub member: String,
    /// Granted role.
    pub role: String,
    /// Domain of the grant; `None` means the model's global domain.
    pub domain: Option<String>,
}

impl RoleGrant {
    /// Builds a grant from the fields following the `g` type marker.
    fn from_fields(fields: &[String]) -> Result<Self, RuleError> {
        if fields.len() < 2 {
            return Err(RuleError::Parse(format!(
                "grouping row needs at least 2 fields, found {}",
                fields.len()
            )));
        }
        let domain = fields.get(2).filter(|domain| !domain.is_empty()).cloned();
        Ok(Self { member: fields[0].clone(), role: fields[1].clone(), domain })
    }
}

/// Typed rule set read from a policy file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicySet {
    /// Policy rules in file order.
    pub rules: Vec<PolicyRule>,
    /// Role grants in file order.
    pub grants: Vec<RoleGrant>,
}

impl PolicySet {
    /// Builds a rule set from raw rows. Rows of other types are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Parse`] naming the offending line when a row is
    /// malformed.
    pub fn from_rows(rows: &[Vec<String>]) -> Result<Self, RuleError> {
        let mut set = Self::default();
        for (index, row) in rows.iter().enumerate() {
            let Some((kind, fields)) = row.split_first() else {
                continue;
            };
            let result = match kind.as_str() {
                POLICY_ROW => PolicyRule::from_fields(fields).map(|rule| set.rules.push(rule)),
                GROUPING_ROW => RoleGrant::from_fields(fields).map(|grant| set.grants.push(grant)),
                _ => Ok(()),
            };
            result.map_err(|err| RuleError::Parse(format!("row {}: {err}", index + 1)))?;
        }
        Ok(set)
    }

    /// Loads a rule set from a policy file.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, RuleError> {
        Self::from_rows(&read_policy_file(path)?)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions and helpers are permitted.")]

    use super::*;

    #[test]
    fn reader_trims_fields_and_skips_comments() {
        let text = "# header\n\np,  role:admin , global, core.users, list\n   \ng, alice, role:admin\n";
        let rows = read_policy_rows(text.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["p", "role:admin", "global", "core.users", "list"]);
        assert_eq!(rows[1], vec!["g", "alice", "role:admin"]);
    }

    #[test]
    fn typed_rows_default_effect_and_domain() {
        let rows = read_policy_rows(
            "p, role:admin, global, core.users, list\ng, alice, role:admin\ng2, x, y\n".as_bytes(),
        )
        .unwrap();
        let set = PolicySet::from_rows(&rows).unwrap();
        assert_eq!(set.rules[0].effect, Effect::Allow);
        assert_eq!(set.grants[0].domain, None);
        assert_eq!(set.rules[0].canonical(), "p, role:admin, global, core.users, list, allow");
    }

    #[test]
    fn malformed_rows_name_their_position() {
        let rows = read_policy_rows("p, role:admin, global\n".as_bytes()).unwrap();
        let err = PolicySet::from_rows(&rows).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }
}
