//! Filter expression AST and compiler
//!
//! Raw filter descriptors are JSON. A list is an implicit conjunction; an
//! object is either a combinator or a leaf:
//!
//! ```json
//! [{"name": "age", "op": "gte", "val": 18},
//!  {"or": [{"name": "name", "op": "like", "val": "%y%"},
//!          {"not": {"name": "author.name", "op": "eq", "val": "Bo"}}]},
//!  {"name": "comments", "op": "any", "val": {"name": "body", "op": "ilike", "val": "%rust%"}},
//!  {"name": "age", "op": "lt", "other": "height"}]
//! ```
//!
//! Compilation validates every path against the catalog and every operator
//! against the terminal field's type. The result is storage-agnostic.

use serde_json::{Map, Value};

use crate::catalog::{AttributeType, Catalog, Cardinality, PathStep, StepKind};

use super::errors::{QueryError, QueryResult};

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
    NotLike,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// Canonical operator name
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Like => "like",
            Operator::ILike => "ilike",
            Operator::NotLike => "not_like",
            Operator::Contains => "contains",
            Operator::IContains => "icontains",
            Operator::StartsWith => "startswith",
            Operator::IStartsWith => "istartswith",
            Operator::EndsWith => "endswith",
            Operator::IEndsWith => "iendswith",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::IsNull => "is_null",
            Operator::IsNotNull => "is_not_null",
        }
    }

    /// Null tests take no operand
    pub fn is_unary(&self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }

    pub fn is_ordering(&self) -> bool {
        matches!(self, Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte)
    }

    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            Operator::Like
                | Operator::ILike
                | Operator::NotLike
                | Operator::Contains
                | Operator::IContains
                | Operator::StartsWith
                | Operator::IStartsWith
                | Operator::EndsWith
                | Operator::IEndsWith
        )
    }

    pub fn is_membership(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }

    /// Case-insensitive pattern operators
    pub fn ignores_case(&self) -> bool {
        matches!(
            self,
            Operator::ILike | Operator::IContains | Operator::IStartsWith | Operator::IEndsWith
        )
    }

    /// Whether the operator can be applied to a field of this type
    pub fn applies_to(&self, attr_type: AttributeType) -> bool {
        match attr_type {
            AttributeType::Opaque => {
                matches!(self, Operator::Eq | Operator::Ne) || self.is_unary()
            }
            _ if self.is_ordering() => attr_type.is_ordered(),
            _ if self.is_pattern() => attr_type.is_textual(),
            _ => true,
        }
    }
}

/// Existence quantifiers over relationships
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantifier {
    /// At least one related entity matches (to-one or to-many)
    Has,
    /// At least one related entity matches (to-many)
    Any,
    /// Every related entity matches (to-many); vacuously true when empty
    All,
}

impl Quantifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quantifier::Has => "has",
            Quantifier::Any => "any",
            Quantifier::All => "all",
        }
    }
}

enum ParsedOp {
    Compare(Operator),
    Quantify(Quantifier),
}

fn parse_operator(name: &str) -> Option<ParsedOp> {
    let op = match name {
        "==" | "eq" | "equals" | "equal_to" => Operator::Eq,
        "!=" | "ne" | "neq" | "not_equal_to" | "does_not_equal" => Operator::Ne,
        ">" | "gt" => Operator::Gt,
        ">=" | "ge" | "gte" | "geq" => Operator::Gte,
        "<" | "lt" => Operator::Lt,
        "<=" | "le" | "lte" | "leq" => Operator::Lte,
        "like" => Operator::Like,
        "ilike" => Operator::ILike,
        "not_like" => Operator::NotLike,
        "contains" => Operator::Contains,
        "icontains" => Operator::IContains,
        "startswith" => Operator::StartsWith,
        "istartswith" => Operator::IStartsWith,
        "endswith" => Operator::EndsWith,
        "iendswith" => Operator::IEndsWith,
        "in" => Operator::In,
        "not_in" => Operator::NotIn,
        "is_null" => Operator::IsNull,
        "is_not_null" => Operator::IsNotNull,
        "has" => return Some(ParsedOp::Quantify(Quantifier::Has)),
        "any" => return Some(ParsedOp::Quantify(Quantifier::Any)),
        "all" => return Some(ParsedOp::Quantify(Quantifier::All)),
        _ => return None,
    };
    Some(ParsedOp::Compare(op))
}

/// A dotted path resolved through the catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    /// Path as written by the client
    pub raw: String,
    pub steps: Vec<PathStep>,
}

impl FieldPath {
    /// The last step of the path
    pub fn terminal(&self) -> &PathStep {
        // Resolution never yields an empty path
        &self.steps[self.steps.len() - 1]
    }

    /// Relationship steps leading to the terminal field
    pub fn prefix(&self) -> &[PathStep] {
        &self.steps[..self.steps.len() - 1]
    }
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Unary operators
    None,
    Value(Value),
    /// Another field of the same entity
    Field(FieldPath),
}

/// Leaf predicate: `path op operand`
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub path: FieldPath,
    pub op: Operator,
    pub operand: Operand,
}

/// Quantified predicate over a relationship
#[derive(Debug, Clone, PartialEq)]
pub struct Quantified {
    /// Path whose terminal step is a relationship
    pub path: FieldPath,
    pub quantifier: Quantifier,
    /// Evaluated against the relationship's target collection
    pub predicate: Box<FilterNode>,
}

/// Predicate tree
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    /// Empty conjunction is always true
    And(Vec<FilterNode>),
    /// Empty disjunction is always false
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
    Compare(Comparison),
    Quantified(Quantified),
}

impl Default for FilterNode {
    fn default() -> Self {
        FilterNode::always()
    }
}

impl FilterNode {
    /// Matches every row
    pub fn always() -> Self {
        FilterNode::And(Vec::new())
    }

    /// Matches no row
    pub fn never() -> Self {
        FilterNode::Or(Vec::new())
    }

    pub fn is_always(&self) -> bool {
        matches!(self, FilterNode::And(children) if children.is_empty())
    }

    /// Conjunction of `self` and `other`, flattening trivial nodes
    pub fn and(self, other: FilterNode) -> FilterNode {
        match (self, other) {
            (a, b) if b.is_always() => a,
            (a, b) if a.is_always() => b,
            (FilterNode::And(mut children), b) => {
                children.push(b);
                FilterNode::And(children)
            }
            (a, b) => FilterNode::And(vec![a, b]),
        }
    }
}

/// Compiles raw filter descriptors for one collection
pub struct FilterCompiler<'a> {
    catalog: &'a Catalog,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    /// Compile a raw descriptor. `null` compiles to the always-true node.
    pub fn compile(&self, collection: &str, raw: &Value) -> QueryResult<FilterNode> {
        self.compile_at(collection, raw, "")
    }

    fn compile_at(&self, collection: &str, raw: &Value, pointer: &str) -> QueryResult<FilterNode> {
        match raw {
            Value::Null => Ok(FilterNode::always()),
            Value::Array(items) => {
                let children = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.compile_at(collection, item, &format!("{}/{}", pointer, i)))
                    .collect::<QueryResult<Vec<_>>>()?;
                Ok(FilterNode::And(children))
            }
            Value::Object(object) => self.compile_object(collection, object, pointer),
            _ => Err(QueryError::filter(
                pointer,
                "filter must be an object or a list of objects",
            )),
        }
    }

    fn compile_object(
        &self,
        collection: &str,
        object: &Map<String, Value>,
        pointer: &str,
    ) -> QueryResult<FilterNode> {
        for combinator in ["and", "or", "not"] {
            let Some(inner) = object.get(combinator) else {
                continue;
            };
            if object.len() != 1 {
                return Err(QueryError::filter(
                    pointer,
                    format!("'{}' must be the only key of its object", combinator),
                ));
            }
            let inner_pointer = format!("{}/{}", pointer, combinator);
            return match (combinator, inner) {
                ("not", Value::Object(_) | Value::Array(_)) => Ok(FilterNode::Not(Box::new(
                    self.compile_at(collection, inner, &inner_pointer)?,
                ))),
                ("not", _) => Err(QueryError::filter(inner_pointer, "'not' takes a filter object")),
                (_, Value::Array(items)) => {
                    let children = items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| {
                            self.compile_at(collection, item, &format!("{}/{}", inner_pointer, i))
                        })
                        .collect::<QueryResult<Vec<_>>>()?;
                    Ok(if combinator == "and" {
                        FilterNode::And(children)
                    } else {
                        FilterNode::Or(children)
                    })
                }
                _ => Err(QueryError::filter(
                    inner_pointer,
                    format!("'{}' takes a list of filters", combinator),
                )),
            };
        }

        self.compile_leaf(collection, object, pointer)
    }

    fn compile_leaf(
        &self,
        collection: &str,
        object: &Map<String, Value>,
        pointer: &str,
    ) -> QueryResult<FilterNode> {
        let (name_key, raw_path) = match (object.get("name"), object.get("field")) {
            (Some(Value::String(p)), _) => ("name", p.as_str()),
            (None, Some(Value::String(p))) => ("field", p.as_str()),
            (Some(_), _) => {
                return Err(QueryError::filter(
                    format!("{}/name", pointer),
                    "field name must be a string",
                ))
            }
            (None, Some(_)) => {
                return Err(QueryError::filter(
                    format!("{}/field", pointer),
                    "field name must be a string",
                ))
            }
            (None, None) => {
                return Err(QueryError::filter(pointer, "missing field name"));
            }
        };
        let name_pointer = format!("{}/{}", pointer, name_key);
        let op_pointer = format!("{}/op", pointer);

        let op_name = match object.get("op") {
            Some(Value::String(op)) => op.as_str(),
            Some(_) => return Err(QueryError::filter(op_pointer, "operator must be a string")),
            None => return Err(QueryError::filter(op_pointer, "missing operator")),
        };
        let parsed = parse_operator(op_name).ok_or_else(|| {
            QueryError::filter(&op_pointer, format!("unknown operator '{}'", op_name))
        })?;

        let path = self.resolve_path(collection, raw_path, &name_pointer)?;

        match parsed {
            ParsedOp::Quantify(quantifier) => {
                self.compile_quantified(path, quantifier, object.get("val"), pointer, &name_pointer)
            }
            ParsedOp::Compare(op) => self.compile_comparison(collection, path, op, object, pointer),
        }
    }

    fn resolve_path(&self, collection: &str, raw: &str, pointer: &str) -> QueryResult<FieldPath> {
        let steps = self
            .catalog
            .resolve_field_path(collection, raw)
            .map_err(|e| QueryError::filter(pointer, e.to_string()))?;
        Ok(FieldPath {
            raw: raw.to_string(),
            steps,
        })
    }

    fn compile_quantified(
        &self,
        path: FieldPath,
        quantifier: Quantifier,
        val: Option<&Value>,
        pointer: &str,
        name_pointer: &str,
    ) -> QueryResult<FilterNode> {
        let terminal = path.terminal();
        let (cardinality, target) = match &terminal.kind {
            StepKind::Relationship { cardinality, target } => (*cardinality, target.clone()),
            StepKind::Attribute(_) => {
                return Err(QueryError::filter(
                    name_pointer,
                    format!(
                        "'{}' requires a relationship, but '{}' is an attribute",
                        quantifier.as_str(),
                        path.raw
                    ),
                ))
            }
        };
        check_to_one_prefix(&path, name_pointer)?;

        if quantifier != Quantifier::Has && cardinality != Cardinality::ToMany {
            return Err(QueryError::filter(
                name_pointer,
                format!("'{}' requires a to-many relationship", quantifier.as_str()),
            ));
        }

        let val_pointer = format!("{}/val", pointer);
        let predicate = match val {
            Some(v) if v.is_object() || v.is_array() => self.compile_at(&target, v, &val_pointer)?,
            _ => {
                return Err(QueryError::filter(
                    val_pointer,
                    format!("'{}' takes a nested filter object", quantifier.as_str()),
                ))
            }
        };

        Ok(FilterNode::Quantified(Quantified {
            path,
            quantifier,
            predicate: Box::new(predicate),
        }))
    }

    fn compile_comparison(
        &self,
        collection: &str,
        path: FieldPath,
        op: Operator,
        object: &Map<String, Value>,
        pointer: &str,
    ) -> QueryResult<FilterNode> {
        let name_pointer = format!("{}/name", pointer);
        check_to_one_prefix(&path, &name_pointer)?;

        let attr_type = match &path.terminal().kind {
            StepKind::Attribute(t) => *t,
            StepKind::Relationship { cardinality, .. } => {
                // Null tests on a to-one relationship check for a related entity
                if op.is_unary() && *cardinality == Cardinality::ToOne {
                    return Ok(FilterNode::Compare(Comparison {
                        path,
                        op,
                        operand: Operand::None,
                    }));
                }
                return Err(QueryError::filter(
                    name_pointer,
                    format!("'{}' is a relationship; use has, any or all", path.raw),
                ));
            }
        };

        if !op.applies_to(attr_type) {
            return Err(QueryError::filter(
                format!("{}/op", pointer),
                format!(
                    "operator '{}' does not apply to {} field '{}'",
                    op.as_str(),
                    attr_type.type_name(),
                    path.raw
                ),
            ));
        }

        if op.is_unary() {
            return Ok(FilterNode::Compare(Comparison {
                path,
                op,
                operand: Operand::None,
            }));
        }

        if let Some(other) = object.get("other") {
            let other_pointer = format!("{}/other", pointer);
            let Value::String(raw_other) = other else {
                return Err(QueryError::filter(other_pointer, "other field must be a string"));
            };
            if !(matches!(op, Operator::Eq | Operator::Ne) || op.is_ordering()) {
                return Err(QueryError::filter(
                    format!("{}/op", pointer),
                    format!("operator '{}' cannot compare two fields", op.as_str()),
                ));
            }
            let other_path = self.resolve_path(collection, raw_other, &other_pointer)?;
            check_to_one_prefix(&other_path, &other_pointer)?;
            match other_path.terminal().attribute_type() {
                Some(t) if t == attr_type => {}
                _ => {
                    return Err(QueryError::filter(
                        other_pointer,
                        format!("'{}' is not a {} attribute", raw_other, attr_type.type_name()),
                    ))
                }
            }
            return Ok(FilterNode::Compare(Comparison {
                path,
                op,
                operand: Operand::Field(other_path),
            }));
        }

        let val_pointer = format!("{}/val", pointer);
        let value = match object.get("val") {
            None | Some(Value::Null) if matches!(op, Operator::Eq | Operator::Ne) => {
                return Err(QueryError::filter(
                    val_pointer,
                    "to compare a value to null, use the is_null/is_not_null operators",
                ))
            }
            None | Some(Value::Null) => {
                return Err(QueryError::filter(
                    val_pointer,
                    format!("operator '{}' requires a value", op.as_str()),
                ))
            }
            Some(v) => v.clone(),
        };

        check_operand(op, attr_type, &value, &val_pointer)?;

        Ok(FilterNode::Compare(Comparison {
            path,
            op,
            operand: Operand::Value(value),
        }))
    }
}

/// Comparisons may only traverse to-one relationships
fn check_to_one_prefix(path: &FieldPath, pointer: &str) -> QueryResult<()> {
    if let Some(step) = path.prefix().iter().find(|s| s.is_to_many()) {
        return Err(QueryError::filter(
            pointer,
            format!(
                "path '{}' traverses to-many relationship '{}'; use any or all",
                path.raw, step.field
            ),
        ));
    }
    Ok(())
}

fn check_operand(op: Operator, attr_type: AttributeType, value: &Value, pointer: &str) -> QueryResult<()> {
    if op.is_membership() {
        let Value::Array(items) = value else {
            return Err(QueryError::filter(
                pointer,
                format!("operator '{}' requires a list", op.as_str()),
            ));
        };
        for (i, item) in items.iter().enumerate() {
            if !attr_type.accepts(item) {
                return Err(QueryError::filter(
                    format!("{}/{}", pointer, i),
                    format!("expected a {} value", attr_type.type_name()),
                ));
            }
        }
        return Ok(());
    }

    if op.is_pattern() {
        if !value.is_string() {
            return Err(QueryError::filter(
                pointer,
                format!("operator '{}' requires a string", op.as_str()),
            ));
        }
        return Ok(());
    }

    if !attr_type.accepts(value) {
        return Err(QueryError::filter(
            pointer,
            format!("expected a {} value", attr_type.type_name()),
        ));
    }
    Ok(())
}

/// Compile a raw filter descriptor for `collection`
pub fn compile_filter(catalog: &Catalog, collection: &str, raw: &Value) -> QueryResult<FilterNode> {
    FilterCompiler::new(catalog).compile(collection, raw)
}
