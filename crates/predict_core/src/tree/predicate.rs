//! Split predicates
//!
//! A predicate tests one field of the (id-keyed, cast) input against an
//! operand. Operators may carry a trailing `*`, meaning the branch also
//! accepts a missing value. Predicates with a `term` test the number of
//! occurrences of that term in a text or items field.

use crate::errors::{PredictError, Result};
use crate::fields::{format_number, FieldResource, FieldValue, InputRecord, OpType, TermMatcher};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;
use tracing::warn;

/// Comparison operator of a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
    In,
}

impl Operator {
    /// Parse an operator symbol, returning whether it accepts missing values
    pub fn parse(symbol: &str) -> Result<(Operator, bool)> {
        let (base, missing) = match symbol.strip_suffix('*') {
            Some(base) => (base, true),
            None => (symbol, false),
        };
        let operator = match base {
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            "=" | "==" => Operator::Eq,
            "!=" | "/=" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "in" => Operator::In,
            other => {
                return Err(PredictError::malformed(format!(
                    "unknown predicate operator {other:?}"
                )))
            }
        };
        Ok((operator, missing))
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::In => "in",
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Operator::Lt => ordering == Ordering::Less,
            Operator::Le => ordering != Ordering::Greater,
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Ne => ordering != Ordering::Equal,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
            Operator::In => false,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Right-hand side of a predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(f64),
    Text(String),
    Boolean(bool),
    Set(Vec<FieldValue>),
    Null,
}

impl Operand {
    fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Operand::Null),
            Value::Bool(b) => Ok(Operand::Boolean(*b)),
            Value::Number(n) => n
                .as_f64()
                .map(Operand::Number)
                .ok_or_else(|| PredictError::malformed(format!("invalid operand {n}"))),
            Value::String(s) => Ok(Operand::Text(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    serde_json::from_value::<FieldValue>(item.clone())
                        .map_err(|e| PredictError::malformed(format!("invalid set member: {e}")))
                })
                .collect::<Result<Vec<_>>>()
                .map(Operand::Set),
            Value::Object(_) => Err(PredictError::malformed(format!(
                "unsupported predicate operand {value}"
            ))),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Number(n) => f.write_str(&format_number(*n)),
            Operand::Text(s) => f.write_str(s),
            Operand::Boolean(b) => write!(f, "{b}"),
            Operand::Set(items) => {
                let items: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Operand::Null => f.write_str("null"),
        }
    }
}

/// Term matcher compiled on first use; `None` when the term cannot be matched
#[derive(Debug, Clone, Default)]
struct TermCache(OnceLock<Option<TermMatcher>>);

impl PartialEq for TermCache {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

/// A split condition on one field
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub operator: Operator,
    pub operand: Operand,
    pub term: Option<String>,
    /// Branch also accepts a missing value
    pub missing: bool,
    matcher: TermCache,
}

impl Predicate {
    pub fn new(field: impl Into<String>, operator: Operator, operand: Operand) -> Self {
        Self {
            field: field.into(),
            operator,
            operand,
            term: None,
            missing: false,
            matcher: TermCache::default(),
        }
    }

    /// Parse a predicate description; `true` (the root predicate) yields `None`
    pub fn from_json(value: &Value) -> Result<Option<Self>> {
        match value {
            Value::Bool(true) => Ok(None),
            Value::Object(map) => {
                let field = map
                    .get("field")
                    .and_then(Value::as_str)
                    .ok_or_else(|| PredictError::malformed(format!("predicate without field: {value}")))?;
                let symbol = map
                    .get("operator")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        PredictError::malformed(format!("predicate without operator: {value}"))
                    })?;
                let (operator, missing) = Operator::parse(symbol)?;
                let operand = Operand::from_json(map.get("value").unwrap_or(&Value::Null))?;
                let term = map.get("term").and_then(Value::as_str).map(str::to_string);

                if operator == Operator::In && !matches!(operand, Operand::Set(_)) {
                    return Err(PredictError::malformed(format!(
                        "operator in requires a list operand: {value}"
                    )));
                }
                if term.is_some() && !matches!(operand, Operand::Number(_)) {
                    return Err(PredictError::malformed(format!(
                        "term predicate requires a numeric operand: {value}"
                    )));
                }

                Ok(Some(Self {
                    field: field.to_string(),
                    operator,
                    operand,
                    term,
                    missing,
                    matcher: TermCache::default(),
                }))
            }
            other => Err(PredictError::malformed(format!("invalid predicate {other}"))),
        }
    }

    /// Whether this predicate can be evaluated against a missing value
    pub fn accepts_missing(&self) -> bool {
        self.missing || self.term.is_some() || self.operand == Operand::Null
    }

    /// Evaluate against an id-keyed input record
    pub fn apply(&self, input: &InputRecord, fields: &FieldResource) -> bool {
        let value = input.get(&self.field).filter(|v| !v.is_missing());

        if let Some(term) = &self.term {
            let text = value.and_then(FieldValue::as_str).unwrap_or("");
            let occurrences = match fields.field(&self.field) {
                Some(field) if field.optype == OpType::Items => {
                    usize::from(field.split_items(text).iter().any(|item| item == term))
                }
                Some(field) => self
                    .matcher
                    .0
                    .get_or_init(|| {
                        field
                            .analysis()
                            .matcher(term)
                            .map_err(|e| warn!(field = %self.field, "{e}"))
                            .ok()
                    })
                    .as_ref()
                    .map_or(0, |matcher| matcher.count(text)),
                None => 0,
            };
            return match self.operand {
                Operand::Number(expected) => (occurrences as f64)
                    .partial_cmp(&expected)
                    .is_some_and(|ordering| self.operator.holds(ordering)),
                _ => false,
            };
        }

        let Some(value) = value else {
            return self.missing || (self.operator == Operator::Eq && self.operand == Operand::Null);
        };

        match &self.operand {
            Operand::Null => self.operator == Operator::Ne,
            Operand::Set(items) => {
                let rendered = value.to_string();
                let contained = items
                    .iter()
                    .any(|item| item == value || item.to_string() == rendered);
                match self.operator {
                    Operator::In | Operator::Eq => contained,
                    Operator::Ne => !contained,
                    _ => false,
                }
            }
            Operand::Number(expected) => value
                .as_f64()
                .and_then(|actual| actual.partial_cmp(expected))
                .is_some_and(|ordering| self.operator.holds(ordering)),
            Operand::Text(expected) => match value {
                FieldValue::Text(actual) => self.operator.holds(actual.as_str().cmp(expected)),
                other => self.operator.holds(other.to_string().as_str().cmp(expected)),
            },
            Operand::Boolean(expected) => {
                let actual = match value {
                    FieldValue::Boolean(b) => Some(*b),
                    FieldValue::Text(t) => t.parse::<bool>().ok(),
                    _ => None,
                };
                actual.is_some_and(|actual| self.operator.holds(actual.cmp(expected)))
            }
        }
    }

    /// Human-readable rule, using field names where known
    pub fn to_rule(&self, fields: &FieldResource) -> String {
        let name = fields.display_name(&self.field);

        let mut rule = if let Some(term) = &self.term {
            let count = match self.operand {
                Operand::Number(n) => n,
                _ => 0.0,
            };
            match (self.operator, count) {
                (Operator::Gt, c) if c == 0.0 => format!("{name} contains {term}"),
                (Operator::Ge, c) if c == 1.0 => format!("{name} contains {term}"),
                (Operator::Le, c) | (Operator::Eq, c) if c == 0.0 => {
                    format!("{name} does not contain {term}")
                }
                (Operator::Lt, c) if c == 1.0 => format!("{name} does not contain {term}"),
                (operator, c) => format!(
                    "{name} contains {term} {operator} {} times",
                    format_number(c)
                ),
            }
        } else {
            match (&self.operand, self.operator) {
                (Operand::Null, Operator::Eq) => format!("{name} is missing"),
                (Operand::Null, _) => format!("{name} is not missing"),
                (operand, operator) => format!("{name} {operator} {operand}"),
            }
        };

        if self.missing {
            rule.push_str(" or missing");
        }
        rule
    }
}
