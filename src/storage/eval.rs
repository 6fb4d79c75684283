//! In-process evaluation of compiled filters and sort keys
//!
//! Used by the in-memory backend. Values are compared by the semantic type
//! of the terminal attribute; a missing or `null` value never satisfies a
//! comparison, only the null tests.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;

use regex::Regex;
use serde_json::{Map, Value};

use crate::catalog::{parse_date, parse_datetime, AttributeType, StepKind};
use crate::query::{Comparison, FieldPath, FilterNode, Operand, Operator, Quantified, Quantifier, SortKey};

use super::errors::{StorageError, StorageResult};

pub(crate) type Row = Map<String, Value>;

/// Follows relationships between stored rows
pub(crate) trait RowSource {
    /// Rows related to `row` (of `collection`) through `relation`
    fn related_rows(&self, collection: &str, row: &Row, relation: &str) -> Vec<Row>;
}

/// Orders two non-null values of `attr_type`.
///
/// Unordered types yield `Some(Equal)` for equal values and `None`
/// otherwise.
pub fn compare_values(attr_type: AttributeType, a: &Value, b: &Value) -> Option<Ordering> {
    match attr_type {
        AttributeType::Number => a.as_f64()?.partial_cmp(&b.as_f64()?),
        AttributeType::String => Some(a.as_str()?.cmp(b.as_str()?)),
        AttributeType::Date => Some(parse_date(a.as_str()?)?.cmp(&parse_date(b.as_str()?)?)),
        AttributeType::Datetime => {
            Some(parse_datetime(a.as_str()?)?.cmp(&parse_datetime(b.as_str()?)?))
        }
        AttributeType::Boolean | AttributeType::Binary | AttributeType::Opaque => {
            (a == b).then_some(Ordering::Equal)
        }
    }
}

fn values_equal(attr_type: AttributeType, a: &Value, b: &Value) -> bool {
    compare_values(attr_type, a, b) == Some(Ordering::Equal)
}

/// SQL `LIKE` pattern (`%` any run, `_` one character) as an anchored regex
pub fn like_to_regex(pattern: &str, ignore_case: bool) -> Result<Regex, regex::Error> {
    let mut expr = String::from("(?s)");
    if ignore_case {
        expr.push_str("(?i)");
    }
    expr.push('^');
    for c in pattern.chars() {
        match c {
            '%' => expr.push_str(".*"),
            '_' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr)
}

fn compile_like(pattern: &str, ignore_case: bool) -> StorageResult<Regex> {
    like_to_regex(pattern, ignore_case).map_err(|e| {
        StorageError::backend(format!("cannot compile like pattern '{}': {}", pattern, e))
    })
}

/// `LIKE` patterns of one filter, compiled once per query
#[derive(Debug, Default)]
pub(crate) struct Patterns {
    compiled: HashMap<(String, bool), Regex>,
}

impl Patterns {
    /// Compile every literal pattern in `node`
    pub(crate) fn compile(node: &FilterNode) -> StorageResult<Self> {
        let mut patterns = Self::default();
        patterns.collect(node)?;
        Ok(patterns)
    }

    fn collect(&mut self, node: &FilterNode) -> StorageResult<()> {
        match node {
            FilterNode::And(children) | FilterNode::Or(children) => {
                for child in children {
                    self.collect(child)?;
                }
            }
            FilterNode::Not(inner) => self.collect(inner)?,
            FilterNode::Quantified(quantified) => self.collect(&quantified.predicate)?,
            FilterNode::Compare(cmp) => {
                if let (Some(ignore_case), Operand::Value(Value::String(pattern))) =
                    (like_case(cmp.op), &cmp.operand)
                {
                    let key = (pattern.clone(), ignore_case);
                    if !self.compiled.contains_key(&key) {
                        let regex = compile_like(pattern, ignore_case)?;
                        self.compiled.insert(key, regex);
                    }
                }
            }
        }
        Ok(())
    }

    /// Literal patterns come precompiled; field operands compile per row
    fn regex(&self, pattern: &str, ignore_case: bool) -> StorageResult<Cow<'_, Regex>> {
        match self.compiled.get(&(pattern.to_string(), ignore_case)) {
            Some(regex) => Ok(Cow::Borrowed(regex)),
            None => compile_like(pattern, ignore_case).map(Cow::Owned),
        }
    }

    fn like(&self, value: &str, pattern: &str, ignore_case: bool) -> StorageResult<bool> {
        Ok(self.regex(pattern, ignore_case)?.is_match(value))
    }
}

/// Case sensitivity of a pattern operator, `None` for other operators
fn like_case(op: Operator) -> Option<bool> {
    match op {
        Operator::Like | Operator::NotLike | Operator::ILike => Some(op.ignores_case()),
        _ => None,
    }
}

/// Row reached after following every relationship step but the last
fn walk_prefix(source: &dyn RowSource, row: &Row, path: &FieldPath) -> Option<Row> {
    let mut current = row.clone();
    for step in path.prefix() {
        current = source
            .related_rows(&step.collection, &current, &step.field)
            .into_iter()
            .next()?;
    }
    Some(current)
}

/// Value at the end of `path`, or `None` when missing or `null`
pub(crate) fn resolve_value(source: &dyn RowSource, row: &Row, path: &FieldPath) -> Option<Value> {
    let owner = walk_prefix(source, row, path)?;
    match owner.get(&path.terminal().field) {
        None | Some(Value::Null) => None,
        Some(value) => Some(value.clone()),
    }
}

/// Whether `row` of `collection` satisfies `node`
pub(crate) fn matches(
    source: &dyn RowSource,
    patterns: &Patterns,
    collection: &str,
    row: &Row,
    node: &FilterNode,
) -> StorageResult<bool> {
    match node {
        FilterNode::And(children) => {
            for child in children {
                if !matches(source, patterns, collection, row, child)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        FilterNode::Or(children) => {
            for child in children {
                if matches(source, patterns, collection, row, child)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        FilterNode::Not(inner) => Ok(!matches(source, patterns, collection, row, inner)?),
        FilterNode::Compare(comparison) => matches_comparison(source, patterns, row, comparison),
        FilterNode::Quantified(quantified) => matches_quantified(source, patterns, row, quantified),
    }
}

fn matches_comparison(
    source: &dyn RowSource,
    patterns: &Patterns,
    row: &Row,
    cmp: &Comparison,
) -> StorageResult<bool> {
    let terminal = cmp.path.terminal();

    let attr_type = match &terminal.kind {
        StepKind::Attribute(t) => *t,
        StepKind::Relationship { .. } => {
            let exists = walk_prefix(source, row, &cmp.path)
                .map(|owner| {
                    !source
                        .related_rows(&terminal.collection, &owner, &terminal.field)
                        .is_empty()
                })
                .unwrap_or(false);
            return Ok(match cmp.op {
                Operator::IsNull => !exists,
                Operator::IsNotNull => exists,
                _ => false,
            });
        }
    };

    let value = resolve_value(source, row, &cmp.path);
    match cmp.op {
        Operator::IsNull => return Ok(value.is_none()),
        Operator::IsNotNull => return Ok(value.is_some()),
        _ => {}
    }
    let Some(value) = value else {
        return Ok(false);
    };

    let operand = match &cmp.operand {
        Operand::None => return Ok(false),
        Operand::Value(v) => v.clone(),
        Operand::Field(other) => match resolve_value(source, row, other) {
            Some(v) => v,
            None => return Ok(false),
        },
    };

    let ordering = || compare_values(attr_type, &value, &operand);
    let text = || value.as_str().zip(operand.as_str());

    if let Some(ignore_case) = like_case(cmp.op) {
        let Some((v, p)) = text() else {
            return Ok(false);
        };
        let hit = patterns.like(v, p, ignore_case)?;
        return Ok(hit != (cmp.op == Operator::NotLike));
    }

    let matched = match cmp.op {
        Operator::Eq => values_equal(attr_type, &value, &operand),
        Operator::Ne => !values_equal(attr_type, &value, &operand),
        Operator::Gt => ordering() == Some(Ordering::Greater),
        Operator::Gte => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Lt => ordering() == Some(Ordering::Less),
        Operator::Lte => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        Operator::In | Operator::NotIn => {
            let found = operand
                .as_array()
                .map(|items| items.iter().any(|item| values_equal(attr_type, &value, item)))
                .unwrap_or(false);
            found == (cmp.op == Operator::In)
        }
        Operator::Contains => text().map(|(v, p)| v.contains(p)).unwrap_or(false),
        Operator::StartsWith => text().map(|(v, p)| v.starts_with(p)).unwrap_or(false),
        Operator::EndsWith => text().map(|(v, p)| v.ends_with(p)).unwrap_or(false),
        Operator::IContains => text()
            .map(|(v, p)| v.to_lowercase().contains(&p.to_lowercase()))
            .unwrap_or(false),
        Operator::IStartsWith => text()
            .map(|(v, p)| v.to_lowercase().starts_with(&p.to_lowercase()))
            .unwrap_or(false),
        Operator::IEndsWith => text()
            .map(|(v, p)| v.to_lowercase().ends_with(&p.to_lowercase()))
            .unwrap_or(false),
        Operator::Like
        | Operator::ILike
        | Operator::NotLike
        | Operator::IsNull
        | Operator::IsNotNull => false,
    };
    Ok(matched)
}

fn matches_quantified(
    source: &dyn RowSource,
    patterns: &Patterns,
    row: &Row,
    quantified: &Quantified,
) -> StorageResult<bool> {
    let terminal = quantified.path.terminal();
    let Some(target) = terminal.target() else {
        return Ok(false);
    };
    let Some(owner) = walk_prefix(source, row, &quantified.path) else {
        return Ok(false);
    };

    // `all` looks for a counterexample, `has`/`any` for a witness
    let want = !matches!(quantified.quantifier, Quantifier::All);
    for related in source.related_rows(&terminal.collection, &owner, &terminal.field) {
        if matches(source, patterns, target, &related, &quantified.predicate)? == want {
            return Ok(want);
        }
    }
    Ok(!want)
}

/// Stable sort of `rows` by `keys`; missing values sort first
pub(crate) fn sort_rows(source: &dyn RowSource, rows: Vec<Row>, keys: &[SortKey]) -> Vec<Row> {
    let mut keyed: Vec<(Vec<Option<Value>>, Row)> = rows
        .into_iter()
        .map(|row| {
            let values = keys
                .iter()
                .map(|key| resolve_value(source, &row, &key.path))
                .collect();
            (values, row)
        })
        .collect();

    keyed.sort_by(|(a, _), (b, _)| {
        for (i, key) in keys.iter().enumerate() {
            let attr_type = key
                .path
                .terminal()
                .attribute_type()
                .unwrap_or(AttributeType::Opaque);
            let cmp = match (&a[i], &b[i]) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => compare_values(attr_type, x, y).unwrap_or(Ordering::Equal),
            };
            let cmp = if key.is_descending() { cmp.reverse() } else { cmp };
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        Ordering::Equal
    });

    keyed.into_iter().map(|(_, row)| row).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn like(value: &str, pattern: &str, ignore_case: bool) -> bool {
        Patterns::default().like(value, pattern, ignore_case).unwrap()
    }

    #[test]
    fn test_like_patterns() {
        assert!(like("Tolkien", "%n%", false));
        assert!(like("Tolkien", "T_lkien", false));
        assert!(!like("Tolkien", "t%", false));
        assert!(like("Tolkien", "t%", true));
        assert!(like("a.b", "a.b", false));
        assert!(!like("axb", "a.b", false));
        assert!(like("multi\nline", "%line", false));
    }

    #[test]
    fn test_oversized_pattern_is_backend_error() {
        let pattern = "_".repeat(2_000_000);
        let err = Patterns::default().like("x", &pattern, false).unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(
            compare_values(AttributeType::Number, &json!(1), &json!(1.0)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            compare_values(AttributeType::Date, &json!("2024-01-02"), &json!("2023-12-31")),
            Some(Ordering::Greater)
        );
        assert_eq!(
            compare_values(
                AttributeType::Datetime,
                &json!("2024-01-01T12:00:00+02:00"),
                &json!("2024-01-01T10:00:00Z")
            ),
            Some(Ordering::Equal)
        );
        assert_eq!(compare_values(AttributeType::Boolean, &json!(true), &json!(false)), None);
        assert_eq!(
            compare_values(AttributeType::Opaque, &json!({"a": 1}), &json!({"a": 1})),
            Some(Ordering::Equal)
        );
    }
}
