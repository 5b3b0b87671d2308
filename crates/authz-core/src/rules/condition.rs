// crates/authz-core/src/rules/condition.rs
// ============================================================================
// Module: Rule Conditions
// Description: ABAC condition column parsed from policy rows.
// Purpose: Gate a policy row on request attributes.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! A condition is a conjunction of comparisons:
//!
//! ```text
//! r.attr.owner == r.sub && r.attr.region != 'eu' && r.attr.level == 3
//! ```
//!
//! Operands are request fields (`r.sub`, `r.dom`, `r.obj`, `r.act`),
//! attribute paths (`r.attr.<key>[.<key>...]`) or literals (single or double
//! quoted strings, numbers, `true`, `false`, `null`). A comparison that reads a
//! missing attribute evaluates to false regardless of the operator.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde_json::Value;

use crate::core::request::AuthzRequest;
use crate::rules::RuleError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Clauses joined by `&&`.
    clauses: Vec<Clause>,
    /// Source text, kept for traces.
    source: String,
}

/// Single comparison.
#[derive(Debug, Clone, PartialEq)]
struct Clause {
    /// Left operand.
    left: Operand,
    /// Comparison operator.
    op: Operator,
    /// Right operand.
    right: Operand,
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
}

/// Comparison operand.
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    /// Request subject.
    Subject,
    /// Request domain.
    Domain,
    /// Request object.
    Object,
    /// Request action.
    Action,
    /// Attribute path below `r.attr`.
    Attribute(Vec<String>),
    /// Literal value.
    Literal(Value),
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

impl Condition {
    /// Parses a condition expression.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::Condition`] when the expression is malformed.
    pub fn parse(source: &str) -> Result<Self, RuleError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(RuleError::Condition("condition is empty".to_string()));
        }
        let clauses = split_conjunction(trimmed)
            .into_iter()
            .map(parse_clause)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { clauses, source: trimmed.to_string() })
    }

    /// Evaluates the condition against a request.
    #[must_use]
    pub fn matches(&self, request: &AuthzRequest) -> bool {
        self.clauses.iter().all(|clause| clause.matches(request))
    }

    /// Returns the source text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Splits on `&&` outside of quoted literals.
fn split_conjunction(source: &str) -> Vec<&str> {
    let bytes = source.as_bytes();
    let mut parts = Vec::new();
    let mut quote: Option<u8> = None;
    let mut start = 0;
    let mut index = 0;
    while index < bytes.len() {
        let byte = bytes[index];
        match quote {
            Some(open) if byte == open => quote = None,
            Some(_) => {}
            None if byte == b'\'' || byte == b'"' => quote = Some(byte),
            None if byte == b'&' && bytes.get(index + 1) == Some(&b'&') => {
                parts.push(source[start .. index].trim());
                index += 2;
                start = index;
                continue;
            }
            None => {}
        }
        index += 1;
    }
    parts.push(source[start ..].trim());
    parts
}

/// Parses `<operand> <op> <operand>`.
fn parse_clause(text: &str) -> Result<Clause, RuleError> {
    let (position, op) = find_operator(text)
        .ok_or_else(|| RuleError::Condition(format!("missing comparison operator in `{text}`")))?;
    let left = parse_operand(&text[.. position])?;
    let right = parse_operand(&text[position + 2 ..])?;
    Ok(Clause { left, op, right })
}

/// Locates the first `==` or `!=` outside of quotes.
fn find_operator(text: &str) -> Option<(usize, Operator)> {
    let bytes = text.as_bytes();
    let mut quote: Option<u8> = None;
    for index in 0 .. bytes.len().saturating_sub(1) {
        let byte = bytes[index];
        match quote {
            Some(open) if byte == open => quote = None,
            Some(_) => {}
            None if byte == b'\'' || byte == b'"' => quote = Some(byte),
            None if byte == b'=' && bytes[index + 1] == b'=' => return Some((index, Operator::Eq)),
            None if byte == b'!' && bytes[index + 1] == b'=' => return Some((index, Operator::Ne)),
            None => {}
        }
    }
    None
}

/// Parses a single operand.
fn parse_operand(text: &str) -> Result<Operand, RuleError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(RuleError::Condition("empty operand".to_string()));
    }
    match text {
        "r.sub" => return Ok(Operand::Subject),
        "r.dom" => return Ok(Operand::Domain),
        "r.obj" => return Ok(Operand::Object),
        "r.act" => return Ok(Operand::Action),
        "true" => return Ok(Operand::Literal(Value::Bool(true))),
        "false" => return Ok(Operand::Literal(Value::Bool(false))),
        "null" => return Ok(Operand::Literal(Value::Null)),
        _ => {}
    }
    if let Some(path) = text.strip_prefix("r.attr.") {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(RuleError::Condition(format!("invalid attribute path `{text}`")));
        }
        return Ok(Operand::Attribute(segments));
    }
    if let Some(literal) = quoted(text) {
        return Ok(Operand::Literal(Value::String(literal.to_string())));
    }
    serde_json::from_str::<serde_json::Number>(text)
        .map(|number| Operand::Literal(Value::Number(number)))
        .map_err(|_| RuleError::Condition(format!("unrecognized operand `{text}`")))
}

/// Returns the body of a single- or double-quoted literal.
fn quoted(text: &str) -> Option<&str> {
    let first = text.chars().next()?;
    if (first == '\'' || first == '"') && text.len() >= 2 && text.ends_with(first) {
        return Some(&text[1 .. text.len() - 1]);
    }
    None
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

impl Clause {
    /// Evaluates the comparison.
    fn matches(&self, request: &AuthzRequest) -> bool {
        let (Some(left), Some(right)) = (self.left.resolve(request), self.right.resolve(request))
        else {
            return false;
        };
        let equal = values_equal(&left, &right);
        match self.op {
            Operator::Eq => equal,
            Operator::Ne => !equal,
        }
    }
}

impl Operand {
    /// Resolves the operand against a request.
    fn resolve(&self, request: &AuthzRequest) -> Option<Value> {
        match self {
            Self::Subject => Some(Value::String(request.subject.clone())),
            Self::Domain => Some(Value::String(request.domain.clone())),
            Self::Object => Some(Value::String(request.object.clone())),
            Self::Action => Some(Value::String(request.action.clone())),
            Self::Literal(value) => Some(value.clone()),
            Self::Attribute(path) => {
                let (head, rest) = path.split_first()?;
                let mut current = request.attributes.get(head)?;
                for segment in rest {
                    current = current.get(segment.as_str())?;
                }
                Some(current.clone())
            }
        }
    }
}

/// Compares two JSON values, treating numbers by magnitude.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
            _ => a == b,
        },
        _ => left == right,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions and helpers are permitted.")]

    use serde_json::json;

    use super::*;

    fn request() -> AuthzRequest {
        AuthzRequest::new("tenant:global:user:u1", "global", "core.docs", "edit")
            .with_attribute("owner", "tenant:global:user:u1")
            .with_attribute("level", 3)
            .with_attribute("meta", json!({"region": "eu && us"}))
    }

    #[test]
    fn conjunction_of_attribute_comparisons() {
        let condition =
            Condition::parse("r.attr.owner == r.sub && r.attr.level == 3.0 && r.act != 'read'")
                .unwrap();
        assert!(condition.matches(&request()));
    }

    #[test]
    fn quoted_conjunction_is_not_split() {
        let condition = Condition::parse("r.attr.meta.region == 'eu && us'").unwrap();
        assert!(condition.matches(&request()));
    }

    #[test]
    fn missing_attribute_never_matches() {
        let condition = Condition::parse("r.attr.absent != 'x'").unwrap();
        assert!(!condition.matches(&request()));
    }

    #[test]
    fn malformed_conditions_are_rejected() {
        assert!(Condition::parse("r.attr.owner").is_err());
        assert!(Condition::parse("r.attr. == 1").is_err());
        assert!(Condition::parse("bogus == 1").is_err());
    }
}
