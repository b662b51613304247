//! # Cluster Matcher
//!
//! Evaluates an add-on's cluster selector against the known clusters.
//!
//! Grammar: comma separated requirements, all of which must hold.
//!
//! | Form | Meaning |
//! |---|---|
//! | `k=v`, `k==v` | label equals |
//! | `k!=v` | label missing or different |
//! | `k in (a, b)` | label is one of the values |
//! | `k notin (a, b)` | label missing or none of the values |
//! | `k` | label exists |
//! | `!k` | label does not exist |
//!
//! A blank selector matches no cluster.

use std::collections::{BTreeMap, BTreeSet};

use crate::controller::error::AddOnError;
use crate::controller::keys::ClusterKey;
use crate::controller::store::ManagedCluster;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::In(k, values) => labels.get(k).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(k, values) => labels.get(k).map_or(true, |v| !values.contains(v)),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::DoesNotExist(k) => !labels.contains_key(k),
        }
    }
}

/// Parsed cluster selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Parse a selector expression
    ///
    /// # Errors
    ///
    /// `AddOnError::SelectorInvalid` for any input outside the grammar.
    pub fn parse(input: &str) -> Result<Self, AddOnError> {
        let mut requirements = Vec::new();
        for part in split_requirements(input)? {
            requirements.push(parse_requirement(&part)?);
        }
        Ok(Self { requirements })
    }

    /// A selector without requirements selects nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    #[must_use]
    pub fn matches_labels(&self, labels: &BTreeMap<String, String>) -> bool {
        !self.is_empty() && self.requirements.iter().all(|r| r.matches(labels))
    }
}

/// Return the keys of the clusters matching `selector`
///
/// # Errors
///
/// `AddOnError::SelectorInvalid` when the selector cannot be parsed.
pub fn matches(
    selector: &str,
    clusters: &[ManagedCluster],
) -> Result<BTreeSet<ClusterKey>, AddOnError> {
    let selector = Selector::parse(selector)?;
    Ok(clusters
        .iter()
        .filter(|c| selector.matches_labels(&c.labels))
        .map(|c| c.reference.clone())
        .collect())
}

/// Split on top-level commas (commas inside `( )` belong to a value set)
fn split_requirements(input: &str) -> Result<Vec<String>, AddOnError> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for ch in input.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    AddOnError::SelectorInvalid(format!("unbalanced ')' in '{input}'"))
                })?;
                current.push(ch);
            }
            ',' if depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    if depth != 0 {
        return Err(AddOnError::SelectorInvalid(format!(
            "unbalanced '(' in '{input}'"
        )));
    }
    parts.push(current);

    let trimmed: Vec<String> = parts.iter().map(|p| p.trim().to_string()).collect();
    if trimmed.len() == 1 && trimmed[0].is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.iter().any(String::is_empty) {
        return Err(AddOnError::SelectorInvalid(format!(
            "empty requirement in '{input}'"
        )));
    }
    Ok(trimmed)
}

fn parse_requirement(part: &str) -> Result<Requirement, AddOnError> {
    if let Some(key) = part.strip_prefix('!') {
        return Ok(Requirement::DoesNotExist(validate_key(key.trim())?));
    }
    if let Some((key, value)) = part.split_once("!=") {
        return Ok(Requirement::NotEquals(
            validate_key(key.trim())?,
            validate_value(value.trim())?,
        ));
    }
    if let Some((key, value)) = part.split_once("==") {
        return Ok(Requirement::Equals(
            validate_key(key.trim())?,
            validate_value(value.trim())?,
        ));
    }
    if let Some((key, value)) = part.split_once('=') {
        return Ok(Requirement::Equals(
            validate_key(key.trim())?,
            validate_value(value.trim())?,
        ));
    }

    let mut tokens = part.splitn(2, char::is_whitespace);
    let key = tokens.next().unwrap_or_default().trim();
    let rest = tokens.next().unwrap_or_default().trim();
    if rest.is_empty() {
        return Ok(Requirement::Exists(validate_key(key)?));
    }

    let (negated, set) = if let Some(set) = rest.strip_prefix("notin") {
        (true, set)
    } else if let Some(set) = rest.strip_prefix("in") {
        (false, set)
    } else {
        return Err(AddOnError::SelectorInvalid(format!(
            "unknown operator in '{part}'"
        )));
    };
    let values = parse_value_set(set.trim(), part)?;
    let key = validate_key(key)?;
    Ok(if negated {
        Requirement::NotIn(key, values)
    } else {
        Requirement::In(key, values)
    })
}

fn parse_value_set(set: &str, part: &str) -> Result<BTreeSet<String>, AddOnError> {
    let inner = set
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| AddOnError::SelectorInvalid(format!("expected '(values)' in '{part}'")))?;
    let values = inner
        .split(',')
        .map(|v| validate_value(v.trim()))
        .collect::<Result<BTreeSet<_>, _>>()?;
    if values.iter().all(String::is_empty) {
        return Err(AddOnError::SelectorInvalid(format!(
            "empty value set in '{part}'"
        )));
    }
    Ok(values)
}

const MAX_LABEL_VALUE_LEN: usize = 63;

fn validate_key(key: &str) -> Result<String, AddOnError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    if valid {
        Ok(key.to_string())
    } else {
        Err(AddOnError::SelectorInvalid(format!("invalid label key '{key}'")))
    }
}

/// Empty, or at most 63 characters of `[A-Za-z0-9-_.]` starting and ending
/// with an alphanumeric
fn validate_value(value: &str) -> Result<String, AddOnError> {
    let valid = value.is_empty()
        || (value.len() <= MAX_LABEL_VALUE_LEN
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && value.starts_with(|c: char| c.is_ascii_alphanumeric())
            && value.ends_with(|c: char| c.is_ascii_alphanumeric()));
    if valid {
        Ok(value.to_string())
    } else {
        Err(AddOnError::SelectorInvalid(format!(
            "invalid label value '{value}'"
        )))
    }
}
