// used for persistence
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
// used to hand attribute values to project hooks as JSON
use serde::Serialize;

// used when parsing a string to an AttributeType
use std::str::FromStr;
// used to print out readable forms of a data type
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{Result, TensorlabError};

lazy_static! {
    static ref CHOICE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

// ------------- Value -------------
/// A typed attribute value. Enum values are carried as strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::String(_) => None,
        }
    }
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Value::String(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", canonical_float(*x)),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// Shortest text that parses back to the same float.
pub(crate) fn canonical_float(x: f64) -> String {
    format!("{:?}", x)
}

// ------------- Attribute Target -------------
/// Which kind of entity must supply values for an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeTarget {
    Model,
    Run,
}

impl AttributeTarget {
    pub fn from_runtime(runtime: bool) -> Self {
        if runtime { AttributeTarget::Run } else { AttributeTarget::Model }
    }
    pub fn is_runtime(&self) -> bool {
        *self == AttributeTarget::Run
    }
    pub fn noun(&self) -> &'static str {
        match self {
            AttributeTarget::Model => "model",
            AttributeTarget::Run => "run",
        }
    }
}

// ------------- Attribute Type -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Integer,
    Float,
    String,
    Enum,
}

struct Codec {
    validate_options: fn(&str) -> bool,
    encode: fn(&Value, &str) -> Result<String>,
    decode: fn(&str, &str) -> Result<Value>,
}

const INTEGER: Codec = Codec {
    validate_options: validate_integer_options,
    encode: encode_integer,
    decode: decode_integer,
};
const FLOAT: Codec = Codec {
    validate_options: validate_empty_options,
    encode: encode_float,
    decode: decode_float,
};
const STRING: Codec = Codec {
    validate_options: validate_empty_options,
    encode: encode_string,
    decode: decode_identity,
};
const ENUM: Codec = Codec {
    validate_options: validate_enum_options,
    encode: encode_enum,
    decode: decode_identity,
};

impl AttributeType {
    pub const ALL: [AttributeType; 4] = [
        AttributeType::Integer,
        AttributeType::Float,
        AttributeType::String,
        AttributeType::Enum,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AttributeType::Integer => "Integer",
            AttributeType::Float => "Float",
            AttributeType::String => "String",
            AttributeType::Enum => "Enum",
        }
    }

    fn codec(&self) -> &'static Codec {
        match self {
            AttributeType::Integer => &INTEGER,
            AttributeType::Float => &FLOAT,
            AttributeType::String => &STRING,
            AttributeType::Enum => &ENUM,
        }
    }

    pub fn validate_options(&self, options: &str) -> bool {
        (self.codec().validate_options)(options)
    }

    /// Canonical stored form of `value`.
    pub fn encode(&self, value: &Value, options: &str) -> Result<String> {
        (self.codec().encode)(value, options)
    }

    /// Typed value of a stored string.
    pub fn decode(&self, encoded: &str, options: &str) -> Result<Value> {
        (self.codec().decode)(encoded, options)
    }

    /// Choices of an Enum options string, in declaration order.
    pub fn choices(options: &str) -> Vec<&str> {
        options.split(';').collect()
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for AttributeType {
    type Err = TensorlabError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "integer" | "int" => Ok(AttributeType::Integer),
            "float" => Ok(AttributeType::Float),
            "string" | "str" => Ok(AttributeType::String),
            "enum" => Ok(AttributeType::Enum),
            _ => Err(TensorlabError::illegal_argument(format!(
                "Unknown attribute type '{}', expected one of Integer, Float, String, Enum",
                s
            ))),
        }
    }
}

impl ToSql for AttributeType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.name()))
    }
}
impl FromSql for AttributeType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: TensorlabError| FromSqlError::Other(Box::new(e)))
    }
}

// ------------- Codecs -------------
fn cast_error(value: &Value, type_name: &str) -> TensorlabError {
    TensorlabError::illegal_argument(format!("Cannot interpret '{}' as {}", value, type_name))
}

fn validate_integer_options(options: &str) -> bool {
    matches!(options, "" | "positive" | "negative")
}

fn validate_empty_options(options: &str) -> bool {
    options.is_empty()
}

fn validate_enum_options(options: &str) -> bool {
    AttributeType::choices(options).iter().all(|c| CHOICE.is_match(c))
}

fn encode_integer(value: &Value, options: &str) -> Result<String> {
    let number = match value {
        Value::Integer(i) => *i,
        Value::Float(f)
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 =>
        {
            *f as i64
        }
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| cast_error(value, "Integer"))?,
        _ => return Err(cast_error(value, "Integer")),
    };
    match options {
        "positive" if number < 0 => Err(TensorlabError::illegal_argument(format!(
            "Expected a positive integer, got {}",
            number
        ))),
        "negative" if number > 0 => Err(TensorlabError::illegal_argument(format!(
            "Expected a negative integer, got {}",
            number
        ))),
        _ => Ok(number.to_string()),
    }
}

fn decode_integer(encoded: &str, _options: &str) -> Result<Value> {
    encoded
        .parse::<i64>()
        .map(Value::Integer)
        .map_err(|_| TensorlabError::illegal_argument(format!("Malformed integer '{}'", encoded)))
}

fn encode_float(value: &Value, _options: &str) -> Result<String> {
    let number = match value {
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| cast_error(value, "Float"))?,
        numeric => numeric.as_f64().ok_or_else(|| cast_error(value, "Float"))?,
    };
    if !number.is_finite() {
        return Err(cast_error(value, "a finite Float"));
    }
    Ok(canonical_float(number))
}

fn decode_float(encoded: &str, _options: &str) -> Result<Value> {
    match encoded.parse::<f64>() {
        Ok(x) if x.is_finite() => Ok(Value::Float(x)),
        _ => Err(TensorlabError::illegal_argument(format!("Malformed float '{}'", encoded))),
    }
}

fn encode_string(value: &Value, _options: &str) -> Result<String> {
    Ok(value.to_string())
}

fn encode_enum(value: &Value, options: &str) -> Result<String> {
    let text = value.to_string();
    if AttributeType::choices(options).contains(&text.as_str()) {
        Ok(text)
    } else {
        Err(TensorlabError::illegal_argument(format!(
            "Expected one of {}, got '{}'",
            AttributeType::choices(options).join(", "),
            text
        )))
    }
}

fn decode_identity(encoded: &str, _options: &str) -> Result<Value> {
    Ok(Value::String(encoded.to_string()))
}
