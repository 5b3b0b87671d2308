// crates/authz-core/src/rules/listing.rs
// ============================================================================
// Module: Policy Listing
// Description: Flat policy entries with filtering, sorting and paging.
// Purpose: Back policy browsing screens with the aggregated policy file.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! [`PolicyEntry`] flattens `p` and `g` rows into one shape. For grouping
//! rows the granted role is reported in `object` and the grant domain in
//! `domain`. [`PolicyQuery`] applies exact-match filters, a case-insensitive
//! search over object and action, a stable sort and offset paging.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ACTION_WILDCARD;
use crate::rules::RuleError;
use crate::rules::policy::read_policy_file;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default page size.
pub const DEFAULT_POLICY_PAGE_SIZE: usize = 50;
/// Maximum page size.
pub const MAX_POLICY_PAGE_SIZE: usize = 500;

// ============================================================================
// SECTION: Types
// ============================================================================

/// One flattened row of the aggregated policy file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEntry {
    /// Row type (`p`, `g`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Subject or member.
    pub subject: String,
    /// Domain.
    pub domain: String,
    /// Object, or the granted role for grouping rows.
    pub object: String,
    /// Action; `*` when absent.
    pub action: String,
    /// Effect; `allow` when absent.
    pub effect: String,
}

impl PolicyEntry {
    /// Flattens a raw row whose first element is the row type.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Parse`] for an empty row.
    pub fn from_row(row: &[String]) -> Result<Self, RuleError> {
        let get = |index: usize| row.get(index).cloned().unwrap_or_default();
        let kind = get(0);
        if kind.is_empty() {
            return Err(RuleError::Parse("empty policy row".to_string()));
        }
        let effect = match get(5) {
            effect if effect.is_empty() => "allow".to_string(),
            effect => effect,
        };
        let mut entry = Self {
            subject: get(1),
            domain: get(2),
            object: get(3),
            action: get(4),
            effect,
            kind,
        };
        if entry.kind.starts_with('g') {
            entry.object = get(2);
            entry.domain = get(3);
            entry.action = String::new();
            entry.effect = "allow".to_string();
        }
        if entry.action.is_empty() {
            entry.action = ACTION_WILDCARD.to_string();
        }
        Ok(entry)
    }

    /// Loads all entries from the aggregated policy file.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError`] when the file cannot be read or a row is empty.
    pub fn load_all(path: &Path) -> Result<Vec<Self>, RuleError> {
        read_policy_file(path)?
            .iter()
            .enumerate()
            .map(|(index, row)| {
                Self::from_row(row).map_err(|err| {
                    RuleError::Parse(format!("policy file line {}: {err}", index + 1))
                })
            })
            .collect()
    }
}

/// Sort key for policy listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicySortField {
    /// Sort by object (default).
    #[default]
    Object,
    /// Sort by subject.
    Subject,
    /// Sort by domain.
    Domain,
    /// Sort by row type.
    Type,
    /// Sort by action.
    Action,
}

impl PolicySortField {
    /// Parses a field label; unknown labels sort by object.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        match label.trim() {
            "subject" => Self::Subject,
            "domain" => Self::Domain,
            "type" => Self::Type,
            "action" => Self::Action,
            _ => Self::Object,
        }
    }

    /// Returns the compared field of an entry.
    fn key(self, entry: &PolicyEntry) -> &str {
        match self {
            Self::Object => &entry.object,
            Self::Subject => &entry.subject,
            Self::Domain => &entry.domain,
            Self::Type => &entry.kind,
            Self::Action => &entry.action,
        }
    }
}

/// Filter, sort and page parameters for policy listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyQuery {
    /// Exact subject filter.
    #[serde(default)]
    pub subject: Option<String>,
    /// Exact domain filter.
    #[serde(default)]
    pub domain: Option<String>,
    /// Exact type filter.
    #[serde(default)]
    pub kind: Option<String>,
    /// Case-insensitive search over object and action.
    #[serde(default)]
    pub search: Option<String>,
    /// 1-based page number.
    pub page: usize,
    /// Page size, clamped to 1..=500.
    pub limit: usize,
    /// Sort field.
    #[serde(default)]
    pub sort: PolicySortField,
    /// Ascending when true.
    pub ascending: bool,
}

impl Default for PolicyQuery {
    fn default() -> Self {
        Self {
            subject: None,
            domain: None,
            kind: None,
            search: None,
            page: 1,
            limit: DEFAULT_POLICY_PAGE_SIZE,
            sort: PolicySortField::Object,
            ascending: true,
        }
    }
}

/// One page of policy entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyPage {
    /// Entries on this page.
    pub items: Vec<PolicyEntry>,
    /// Total matching entries.
    pub total: usize,
}

impl PolicyQuery {
    /// Returns true when `entry` passes every filter.
    fn accepts(&self, entry: &PolicyEntry) -> bool {
        let exact = |filter: &Option<String>, value: &str| {
            filter.as_deref().is_none_or(|filter| filter.is_empty() || filter == value)
        };
        if !exact(&self.subject, &entry.subject)
            || !exact(&self.domain, &entry.domain)
            || !exact(&self.kind, &entry.kind)
        {
            return false;
        }
        match self.search.as_deref().map(str::to_lowercase) {
            Some(search) if !search.is_empty() => {
                entry.object.to_lowercase().contains(&search)
                    || entry.action.to_lowercase().contains(&search)
            }
            _ => true,
        }
    }

    /// Filters, sorts and pages `entries`.
    #[must_use]
    pub fn apply(&self, entries: &[PolicyEntry]) -> PolicyPage {
        let mut matched: Vec<PolicyEntry> =
            entries.iter().filter(|entry| self.accepts(entry)).cloned().collect();
        matched.sort_by(|a, b| {
            let ordering = self.sort.key(a).cmp(self.sort.key(b));
            if self.ascending { ordering } else { ordering.reverse() }
        });
        let total = matched.len();
        let limit = self.limit.clamp(1, MAX_POLICY_PAGE_SIZE);
        let start = self.page.saturating_sub(1).saturating_mul(limit).min(total);
        let end = start.saturating_add(limit).min(total);
        let items = match start.cmp(&end) {
            Ordering::Less => matched[start .. end].to_vec(),
            _ => Vec::new(),
        };
        PolicyPage { items, total }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
