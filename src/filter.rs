//! Evaluation of parsed predicates against entity attribute values.
//!
//! A [`Filter`] is checked once against the attribute definitions in effect
//! (undefined names, text compared with numbers, unknown enum choices) and can
//! then be applied to any number of value maps without failing.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::datatype::{AttributeType, Value};
use crate::entity::{Attribute, AttributeValues};
use crate::error::{Result, TensorlabError};
use crate::predicate::{Expression, Op, literal_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Number,
    Text,
    Boolean,
}

impl Kind {
    fn of(value_type: AttributeType) -> Kind {
        match value_type {
            AttributeType::Integer | AttributeType::Float => Kind::Number,
            AttributeType::String | AttributeType::Enum => Kind::Text,
        }
    }
    fn describe(&self) -> &'static str {
        match self {
            Kind::Number => "a number",
            Kind::Text => "text",
            Kind::Boolean => "a condition",
        }
    }
}

/// A predicate validated against a set of attribute definitions.
#[derive(Debug, Clone)]
pub struct Filter {
    expression: Expression,
}

impl Filter {
    pub fn compile(expression: &Expression, definitions: &BTreeMap<String, Attribute>) -> Result<Filter> {
        check(expression, definitions)?;
        Ok(Filter { expression: expression.clone() })
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    pub fn matches(&self, values: &AttributeValues) -> bool {
        truthy(&evaluate(&self.expression, values))
    }
}

fn check(expression: &Expression, definitions: &BTreeMap<String, Attribute>) -> Result<Kind> {
    match expression {
        Expression::Identifier(name) => definitions
            .get(name)
            .map(|attribute| Kind::of(attribute.value_type))
            .ok_or_else(|| TensorlabError::lookup(format!("Attribute named '{}' is not defined here", name))),
        Expression::Literal(value) => Ok(if value.is_numeric() { Kind::Number } else { Kind::Text }),
        Expression::UnaryOperation { arg, .. } => {
            check(arg, definitions)?;
            Ok(Kind::Boolean)
        }
        Expression::BinaryOperation { op, left, right } => {
            let left_kind = check(left, definitions)?;
            let right_kind = check(right, definitions)?;
            if op.is_comparison() {
                if left_kind != right_kind {
                    return Err(TensorlabError::illegal_argument(format!(
                        "Cannot compare {} with {} in '{}'",
                        left_kind.describe(),
                        right_kind.describe(),
                        expression
                    )));
                }
                check_choice(left, right, definitions)?;
                check_choice(right, left, definitions)?;
            }
            Ok(Kind::Boolean)
        }
    }
}

/// An enum attribute can only be compared with one of its choices.
fn check_choice(side: &Expression, other: &Expression, definitions: &BTreeMap<String, Attribute>) -> Result<()> {
    let (Expression::Identifier(name), Expression::Literal(value)) = (side, other) else {
        return Ok(());
    };
    match definitions.get(name) {
        Some(attribute) if attribute.value_type == AttributeType::Enum => attribute
            .value_type
            .encode(value, &attribute.options)
            .map(|_| ())
            .map_err(|_| {
                TensorlabError::illegal_argument(format!(
                    "{} is not a choice of '{}' (expected one of {})",
                    literal_text(value),
                    name,
                    AttributeType::choices(&attribute.options).join(", ")
                ))
            }),
        _ => Ok(()),
    }
}

enum Operand {
    Null,
    Value(Value),
    Boolean(bool),
}

fn truthy(operand: &Operand) -> bool {
    match operand {
        Operand::Null => false,
        Operand::Boolean(b) => *b,
        Operand::Value(Value::Integer(i)) => *i != 0,
        Operand::Value(Value::Float(x)) => *x != 0.0,
        Operand::Value(Value::String(s)) => !s.is_empty(),
    }
}

fn evaluate(expression: &Expression, values: &AttributeValues) -> Operand {
    match expression {
        Expression::Identifier(name) => match values.get(name) {
            Some(Some(value)) => Operand::Value(value.clone()),
            _ => Operand::Null,
        },
        Expression::Literal(value) => Operand::Value(value.clone()),
        Expression::UnaryOperation { arg, .. } => Operand::Boolean(!truthy(&evaluate(arg, values))),
        Expression::BinaryOperation { op: Op::And, left, right } => {
            Operand::Boolean(truthy(&evaluate(left, values)) && truthy(&evaluate(right, values)))
        }
        Expression::BinaryOperation { op: Op::Or, left, right } => {
            Operand::Boolean(truthy(&evaluate(left, values)) || truthy(&evaluate(right, values)))
        }
        Expression::BinaryOperation { op, left, right } => {
            let ordering = compare(&evaluate(left, values), &evaluate(right, values));
            Operand::Boolean(match ordering {
                None => false,
                Some(ordering) => match op {
                    Op::Eq => ordering == Ordering::Equal,
                    Op::Ne => ordering != Ordering::Equal,
                    Op::Gt => ordering == Ordering::Greater,
                    Op::Lt => ordering == Ordering::Less,
                    Op::Ge => ordering != Ordering::Less,
                    Op::Le => ordering != Ordering::Greater,
                    _ => false,
                },
            })
        }
    }
}

/// Natural ordering of two operands; `None` when either side is null or
/// the kinds do not compare.
fn compare(left: &Operand, right: &Operand) -> Option<Ordering> {
    match (left, right) {
        (Operand::Value(Value::Integer(a)), Operand::Value(Value::Integer(b))) => Some(a.cmp(b)),
        (Operand::Value(Value::String(a)), Operand::Value(Value::String(b))) => Some(a.cmp(b)),
        (Operand::Value(a), Operand::Value(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Operand::Boolean(a), Operand::Boolean(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
