//! CQL2 filter expressions
//!
//! A compact implementation of the OGC Common Query Language (CQL2) covering
//! what the proxy needs: parsing cql2-text and cql2-json, structural
//! validation, serialization back to either encoding, AND-composition and
//! evaluation against a JSON record.
//!
//! Comparisons (`= <> < <= > >=`), `AND`/`OR`/`NOT`, `LIKE`, `BETWEEN`,
//! `IN`, `IS NULL`, arithmetic, property references, scalar literals and
//! `TIMESTAMP`/`DATE` instants can also be evaluated locally. Geometry
//! (WKT or GeoJSON), `BBOX` and `INTERVAL` literals and other functions
//! (spatial, temporal, array operators) parse and serialize unchanged but
//! are left to the upstream API.

mod eval;
mod geometry;
mod text;

use std::fmt;
use std::ops::Add;
use std::str::FromStr;

use serde_json::{json, Map, Value};
use thiserror::Error;

pub use geometry::Geometry;

/// Errors raised while parsing, validating or evaluating an expression
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Cql2Error {
    #[error("parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("invalid cql2-json: {0}")]
    Json(String),

    #[error("invalid expression: {0}")]
    Validation(String),

    #[error("cannot evaluate expression: {0}")]
    Evaluation(String),
}

/// A CQL2 expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Timestamp(String),
    Date(String),
    Property(String),
    Geometry(Geometry),
    BBox(Vec<Expr>),
    Interval(Vec<Expr>),
    Array(Vec<Expr>),
    Operation { op: String, args: Vec<Expr> },
}

const COMPARISON_OPS: &[&str] = &["=", "<>", "<", "<=", ">", ">="];
const ARITHMETIC_OPS: &[&str] = &["+", "-", "*", "/", "%", "^", "div"];

/// Minimum and maximum argument counts for the operators we understand
fn arity(op: &str) -> Option<(usize, Option<usize>)> {
    match op {
        "and" | "or" => Some((2, None)),
        "not" | "isNull" => Some((1, Some(1))),
        "like" | "in" => Some((2, Some(2))),
        "between" => Some((3, Some(3))),
        op if COMPARISON_OPS.contains(&op) || ARITHMETIC_OPS.contains(&op) => Some((2, Some(2))),
        _ => None,
    }
}

fn normalize_op(op: &str) -> String {
    let lower = op.to_ascii_lowercase();
    if lower == "isnull" {
        "isNull".to_string()
    } else {
        lower
    }
}

impl Expr {
    /// Build an operation node
    pub fn operation(op: &str, args: Vec<Expr>) -> Self {
        Expr::Operation {
            op: normalize_op(op),
            args,
        }
    }

    /// Build a `BBOX` literal from four or six numbers
    pub fn bbox(items: Vec<Expr>) -> Option<Self> {
        let numeric = items.iter().all(|item| matches!(item, Expr::Number(_)));
        (numeric && matches!(items.len(), 4 | 6)).then_some(Expr::BBox(items))
    }

    /// Build an `INTERVAL` literal; quoted instants become dates or timestamps
    pub fn interval(bounds: Vec<Expr>) -> Option<Self> {
        if bounds.len() != 2 {
            return None;
        }
        Some(Expr::Interval(bounds.into_iter().map(interval_bound).collect()))
    }

    /// Parse a cql2-json document
    pub fn from_json(value: &Value) -> Result<Self, Cql2Error> {
        match value {
            Value::Null => Ok(Expr::Null),
            Value::Bool(b) => Ok(Expr::Bool(*b)),
            Value::Number(n) => Ok(Expr::Number(n.clone())),
            Value::String(s) => Ok(Expr::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Expr::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Expr::Array),
            Value::Object(map) => Self::from_json_object(map),
        }
    }

    fn from_json_object(map: &Map<String, Value>) -> Result<Self, Cql2Error> {
        if let Some(op) = map.get("op") {
            let op = op
                .as_str()
                .ok_or_else(|| Cql2Error::Json("\"op\" must be a string".to_string()))?;
            let args = match map.get("args") {
                None => Vec::new(),
                Some(Value::Array(items)) => items
                    .iter()
                    .map(Expr::from_json)
                    .collect::<Result<Vec<_>, _>>()?,
                Some(_) => {
                    return Err(Cql2Error::Json("\"args\" must be an array".to_string()));
                }
            };
            return Ok(Expr::operation(op, args));
        }

        let string_member = |key: &str| -> Result<Option<String>, Cql2Error> {
            match map.get(key) {
                None => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(_) => Err(Cql2Error::Json(format!("\"{}\" must be a string", key))),
            }
        };

        if geometry::is_geojson(map) {
            return Geometry::from_geojson(Value::Object(map.clone())).map(Expr::Geometry);
        }
        if let Some(items) = map.get("bbox") {
            let items = match items {
                Value::Array(items) => items
                    .iter()
                    .map(Expr::from_json)
                    .collect::<Result<Vec<_>, _>>()?,
                _ => Vec::new(),
            };
            return Expr::bbox(items)
                .ok_or_else(|| Cql2Error::Json("\"bbox\" must hold 4 or 6 numbers".to_string()));
        }
        if let Some(bounds) = map.get("interval") {
            let bounds = match bounds {
                Value::Array(bounds) => bounds
                    .iter()
                    .map(Expr::from_json)
                    .collect::<Result<Vec<_>, _>>()?,
                _ => Vec::new(),
            };
            return Expr::interval(bounds)
                .ok_or_else(|| Cql2Error::Json("\"interval\" must hold 2 bounds".to_string()));
        }

        if let Some(name) = string_member("property")? {
            Ok(Expr::Property(name))
        } else if let Some(instant) = string_member("timestamp")? {
            Ok(Expr::Timestamp(instant))
        } else if let Some(day) = string_member("date")? {
            Ok(Expr::Date(day))
        } else {
            Err(Cql2Error::Json(format!(
                "unsupported object with keys [{}]",
                map.keys().cloned().collect::<Vec<_>>().join(", ")
            )))
        }
    }

    /// Serialize to cql2-json
    pub fn to_json(&self) -> Value {
        match self {
            Expr::Null => Value::Null,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Number(n) => Value::Number(n.clone()),
            Expr::String(s) => Value::String(s.clone()),
            Expr::Timestamp(t) => json!({ "timestamp": t }),
            Expr::Date(d) => json!({ "date": d }),
            Expr::Property(p) => json!({ "property": p }),
            Expr::Geometry(g) => g.as_geojson().clone(),
            Expr::BBox(items) => json!({ "bbox": items.iter().map(Expr::to_json).collect::<Vec<_>>() }),
            Expr::Interval(bounds) => {
                let bounds: Vec<Value> = bounds
                    .iter()
                    .map(|bound| match bound {
                        Expr::Date(instant) | Expr::Timestamp(instant) => {
                            Value::String(instant.clone())
                        }
                        other => other.to_json(),
                    })
                    .collect();
                json!({ "interval": bounds })
            }
            Expr::Array(items) => Value::Array(items.iter().map(Expr::to_json).collect()),
            Expr::Operation { op, args } => json!({
                "op": op,
                "args": args.iter().map(Expr::to_json).collect::<Vec<_>>(),
            }),
        }
    }

    /// Serialize to cql2-text
    pub fn to_text(&self) -> String {
        text::write(self)
    }

    /// Check that the expression is a well-formed boolean filter
    pub fn validate(&self) -> Result<(), Cql2Error> {
        if !self.is_boolean() {
            return Err(Cql2Error::Validation(
                "filter must evaluate to a boolean".to_string(),
            ));
        }
        self.validate_node()
    }

    fn validate_node(&self) -> Result<(), Cql2Error> {
        match self {
            Expr::Operation { op, args } => {
                if let Some((min, max)) = arity(op) {
                    if args.len() < min || max.is_some_and(|max| args.len() > max) {
                        return Err(Cql2Error::Validation(format!(
                            "operator '{}' does not accept {} argument(s)",
                            op,
                            args.len()
                        )));
                    }
                }
                match op.as_str() {
                    "and" | "or" | "not" => {
                        if let Some(arg) = args.iter().find(|arg| !arg.is_boolean()) {
                            return Err(Cql2Error::Validation(format!(
                                "operator '{}' requires boolean operands, got {}",
                                op,
                                arg.to_text()
                            )));
                        }
                    }
                    "in" => {
                        if !matches!(args.get(1), Some(Expr::Array(_))) {
                            return Err(Cql2Error::Validation(
                                "operator 'in' requires a list as its second argument".to_string(),
                            ));
                        }
                    }
                    _ => {}
                }
                args.iter().try_for_each(Expr::validate_node)
            }
            Expr::Array(items) | Expr::Interval(items) => {
                items.iter().try_for_each(Expr::validate_node)
            }
            Expr::Timestamp(t) => chrono::DateTime::parse_from_rfc3339(t)
                .map(|_| ())
                .map_err(|e| Cql2Error::Validation(format!("invalid timestamp '{}': {}", t, e))),
            Expr::Date(d) => chrono::NaiveDate::parse_from_str(d, "%Y-%m-%d")
                .map(|_| ())
                .map_err(|e| Cql2Error::Validation(format!("invalid date '{}': {}", d, e))),
            _ => Ok(()),
        }
    }

    /// Whether the node can produce a boolean
    fn is_boolean(&self) -> bool {
        match self {
            Expr::Bool(_) => true,
            // Unknown operators are functions; their result type is not known here.
            Expr::Operation { .. } => true,
            _ => false,
        }
    }
}

/// `'..'` stays open-ended, other quoted instants are typed by their format
fn interval_bound(bound: Expr) -> Expr {
    match bound {
        Expr::String(s) if chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d").is_ok() => {
            Expr::Date(s)
        }
        Expr::String(s) if chrono::DateTime::parse_from_rfc3339(&s).is_ok() => Expr::Timestamp(s),
        other => other,
    }
}

impl Add for Expr {
    type Output = Expr;

    /// `a + b` is `a AND b`
    fn add(self, rhs: Expr) -> Expr {
        Expr::Operation {
            op: "and".to_string(),
            args: vec![self, rhs],
        }
    }
}

impl FromStr for Expr {
    type Err = Cql2Error;

    /// Parse either encoding; input starting with `{` is treated as cql2-json
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.starts_with('{') {
            let value: Value =
                serde_json::from_str(trimmed).map_err(|e| Cql2Error::Json(e.to_string()))?;
            Expr::from_json(&value)
        } else {
            text::parse(trimmed)
        }
    }
}

impl TryFrom<&Value> for Expr {
    type Error = Cql2Error;

    /// A JSON string holds an encoded filter, anything else is cql2-json
    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => s.parse(),
            other => Expr::from_json(other),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}
