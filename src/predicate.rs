//! Boolean filter expressions over attribute values.
//!
//! ```text
//! expression := operand (binary_op operand)*
//! operand    := "not" expression | "(" expression ")" | identifier | literal
//! ```
//!
//! Operator priorities, lowest first: `or`, `and`, the comparisons
//! (`==`, `!=`, `>`, `<`, `>=`, `<=`), `not`. A flat run of operands is turned
//! into a tree by splitting at the leftmost operator of lowest priority.
//! A leading `not` takes the whole expression to its right as its argument.
//!
//! Parsing never raises: every production returns `None` on no-match so that
//! alternatives can be tried in turn, and [`parse_expression`] returns `None`
//! for anything that is not a single complete expression.

// used to print out readable forms of an expression
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::datatype::Value;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9]*").unwrap();
    static ref NUMBER: Regex = Regex::new(r"^[0-9-][0-9]*(?:\.[0-9]*)?").unwrap();
}

// ------------- Operators -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Or,
    And,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Not,
}

impl Op {
    /// Matching order matters: `>` is tried before `>=` and rejected by the
    /// trailing `=` check.
    pub const BINARIES: [Op; 8] = [Op::And, Op::Or, Op::Ne, Op::Eq, Op::Gt, Op::Lt, Op::Ge, Op::Le];
    pub const UNARIES: [Op; 1] = [Op::Not];

    pub fn symbol(&self) -> &'static str {
        match self {
            Op::Or => "or",
            Op::And => "and",
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Gt => ">",
            Op::Lt => "<",
            Op::Ge => ">=",
            Op::Le => "<=",
            Op::Not => "not",
        }
    }

    pub fn priority(&self) -> u8 {
        match self {
            Op::Or => 0,
            Op::And => 1,
            Op::Eq | Op::Ne | Op::Gt | Op::Lt | Op::Ge | Op::Le => 2,
            Op::Not => 3,
        }
    }

    pub fn is_comparison(&self) -> bool {
        self.priority() == 2
    }

    fn is_word(&self) -> bool {
        matches!(self, Op::Or | Op::And | Op::Not)
    }

    fn is_reserved(word: &str) -> bool {
        [Op::Or, Op::And, Op::Not].iter().any(|op| op.symbol() == word)
    }
}

/// Matches one of `ops` at the start of `s`. Something must follow the
/// operator, it must not be `=`, and word operators must not run into an
/// alphanumeric character.
fn match_op<'a>(s: &'a str, ops: &[Op]) -> Option<(Op, &'a str)> {
    for op in ops {
        let symbol = op.symbol();
        if s.len() <= symbol.len() || !s.starts_with(symbol) {
            continue;
        }
        let rest = &s[symbol.len()..];
        let next = rest.chars().next()?;
        if next == '=' || (op.is_word() && next.is_alphanumeric()) {
            continue;
        }
        return Some((*op, rest));
    }
    None
}

// ------------- Expression -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Identifier(String),
    Literal(Value),
    UnaryOperation {
        op: Op,
        arg: Box<Expression>,
    },
    BinaryOperation {
        op: Op,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

/// A parsed node together with the unconsumed input.
type Parsed<'a> = Option<(Expression, &'a str)>;

impl Expression {
    pub fn identifier(name: impl Into<String>) -> Self {
        Expression::Identifier(name.into())
    }
    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }
    pub fn not(arg: Expression) -> Self {
        Expression::UnaryOperation { op: Op::Not, arg: Box::new(arg) }
    }
    pub fn binary(op: Op, left: Expression, right: Expression) -> Self {
        Expression::BinaryOperation { op, left: Box::new(left), right: Box::new(right) }
    }

    /// Priority of the node's operator; atoms have none.
    pub fn priority(&self) -> Option<u8> {
        match self {
            Expression::UnaryOperation { op, .. } | Expression::BinaryOperation { op, .. } => {
                Some(op.priority())
            }
            _ => None,
        }
    }

    pub fn parse_identifier(s: &str) -> Parsed<'_> {
        let found = IDENTIFIER.find(s)?;
        if Op::is_reserved(found.as_str()) {
            return None;
        }
        Some((Expression::identifier(found.as_str()), &s[found.end()..]))
    }

    pub fn parse_literal(s: &str) -> Parsed<'_> {
        let quote = s.chars().next()?;
        if quote == '"' || quote == '\'' {
            return parse_quoted(s, quote);
        }
        let found = NUMBER.find(s)?;
        let text = found.as_str();
        let value = if text.contains('.') {
            Value::Float(text.parse::<f64>().ok()?)
        } else {
            Value::Integer(text.parse::<i64>().ok()?)
        };
        Some((Expression::Literal(value), &s[found.end()..]))
    }

    pub fn parse_unary(s: &str) -> Parsed<'_> {
        if let Some((op, rest)) = match_op(s, &Op::UNARIES) {
            let (arg, rest) = parse_subexpression(rest.trim_start())?;
            return Some((Expression::UnaryOperation { op, arg: Box::new(arg) }, rest));
        }
        parse_parenthesized(s)
    }

    /// A chain of at least two operands joined by binary operators.
    pub fn parse_binary(s: &str) -> Parsed<'_> {
        let (operands, ops, rest) = split_chain(s)?;
        if ops.is_empty() {
            return None;
        }
        Some((build_tree(operands, ops)?, rest))
    }

    /// Text that parses back into an equal tree.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        self.serialize_into(&mut out, true);
        out
    }

    // `trailing` is false when more text will follow this node; a `not`
    // there must be closed off with parentheses.
    fn serialize_into(&self, out: &mut String, trailing: bool) {
        match self {
            Expression::Identifier(name) => out.push_str(name),
            Expression::Literal(value) => serialize_literal(value, out),
            Expression::UnaryOperation { op, arg } => {
                out.push_str(op.symbol());
                out.push(' ');
                let bracket = matches!(**arg, Expression::BinaryOperation { .. });
                arg.serialize_child(out, bracket, trailing);
            }
            Expression::BinaryOperation { op, left, right } => {
                let priority = op.priority();
                let bracket_left = match **left {
                    Expression::UnaryOperation { .. } => true,
                    Expression::BinaryOperation { op: child, .. } => child.priority() <= priority,
                    _ => false,
                };
                left.serialize_child(out, bracket_left, false);
                out.push(' ');
                out.push_str(op.symbol());
                out.push(' ');
                let bracket_right = match **right {
                    Expression::UnaryOperation { .. } => !trailing,
                    Expression::BinaryOperation { op: child, .. } => child.priority() < priority,
                    _ => false,
                };
                right.serialize_child(out, bracket_right, trailing);
            }
        }
    }

    fn serialize_child(&self, out: &mut String, bracket: bool, trailing: bool) {
        if bracket {
            out.push('(');
            self.serialize_into(out, true);
            out.push(')');
        } else {
            self.serialize_into(out, trailing);
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.serialize())
    }
}

/// Parses a complete filter expression. Returns `None` when the text is not
/// exactly one well-formed expression.
pub fn parse_expression(s: &str) -> Option<Expression> {
    match parse_subexpression(s.trim()) {
        Some((expression, rest)) if rest.trim().is_empty() => Some(expression),
        _ => None,
    }
}

/// A binary chain, or the single operand when no operator follows it.
fn parse_subexpression(s: &str) -> Parsed<'_> {
    let (operands, ops, rest) = split_chain(s)?;
    Some((build_tree(operands, ops)?, rest))
}

/// Operands separated by binary operators, each operand parsed once.
fn split_chain(s: &str) -> Option<(Vec<Expression>, Vec<Op>, &str)> {
    let mut operands = Vec::new();
    let mut ops = Vec::new();
    let mut s = s;
    while !s.is_empty() && !s.starts_with(')') {
        let (operand, rest) = parse_operand(s)?;
        operands.push(operand);
        s = rest.trim_start();
        if s.is_empty() {
            break;
        }
        match match_op(s, &Op::BINARIES) {
            Some((op, rest)) => {
                ops.push(op);
                s = rest.trim_start();
            }
            None => break,
        }
    }
    if operands.is_empty() || ops.len() + 1 != operands.len() {
        return None;
    }
    Some((operands, ops, s))
}

fn parse_operand(s: &str) -> Parsed<'_> {
    Expression::parse_unary(s)
        .or_else(|| Expression::parse_identifier(s))
        .or_else(|| Expression::parse_literal(s))
}

fn parse_parenthesized(s: &str) -> Parsed<'_> {
    let inner = s.strip_prefix('(')?;
    let (expression, rest) = parse_subexpression(inner.trim_start())?;
    let rest = rest.trim_start().strip_prefix(')')?;
    Some((expression, rest))
}

fn parse_quoted(s: &str, quote: char) -> Parsed<'_> {
    let mut value = String::new();
    let mut escaped = false;
    for (i, c) in s.char_indices().skip(1) {
        if escaped {
            match c {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                '\\' | '"' | '\'' => value.push(c),
                other => {
                    value.push('\\');
                    value.push(other);
                }
            }
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Some((Expression::Literal(Value::String(value)), &s[i + c.len_utf8()..]));
        } else {
            value.push(c);
        }
    }
    None
}

/// Splits at the leftmost operator of lowest priority and recurses on both
/// sides. Expects exactly one more operand than operators.
fn build_tree(mut operands: Vec<Expression>, mut ops: Vec<Op>) -> Option<Expression> {
    if ops.is_empty() {
        return operands.pop();
    }
    let mut split = 0;
    for (i, op) in ops.iter().enumerate() {
        if op.priority() < ops[split].priority() {
            split = i;
        }
    }
    let right_operands = operands.split_off(split + 1);
    let right_ops = ops.split_off(split + 1);
    let op = ops.pop()?;
    let left = build_tree(operands, ops)?;
    let right = build_tree(right_operands, right_ops)?;
    Some(Expression::binary(op, left, right))
}

fn serialize_literal(value: &Value, out: &mut String) {
    match value {
        Value::Integer(i) => out.push_str(&i.to_string()),
        Value::Float(x) => {
            // no exponent form: the literal grammar only knows digits and a dot
            let text = format!("{}", x);
            out.push_str(&text);
            if !text.contains('.') {
                out.push_str(".0");
            }
        }
        Value::String(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    other => out.push(other),
                }
            }
            out.push('"');
        }
    }
}

/// Canonical text of a value as it would appear in a filter.
pub fn literal_text(value: &Value) -> String {
    let mut out = String::new();
    serialize_literal(value, &mut out);
    out
}
