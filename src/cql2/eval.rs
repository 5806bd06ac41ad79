//! Evaluation of expressions against JSON records

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde_json::Value;

use super::{Cql2Error, Expr, ARITHMETIC_OPS};

#[derive(Debug, Clone)]
enum Operand {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    Instant(DateTime<FixedOffset>),
    List(Vec<Operand>),
    Object,
}

impl Expr {
    /// Evaluate the expression against a record (a STAC item or collection)
    ///
    /// Properties are looked up on the record itself first and then inside
    /// its `properties` member. Missing properties are null, and comparisons
    /// involving null are false.
    pub fn matches(&self, record: &Value) -> Result<bool, Cql2Error> {
        truthy(evaluate(self, record)?)
    }
}

fn evaluation_error(message: impl Into<String>) -> Cql2Error {
    Cql2Error::Evaluation(message.into())
}

fn truthy(operand: Operand) -> Result<bool, Cql2Error> {
    match operand {
        Operand::Bool(b) => Ok(b),
        Operand::Null => Ok(false),
        other => Err(evaluation_error(format!(
            "expected a boolean, got {:?}",
            other
        ))),
    }
}

fn evaluate(expr: &Expr, record: &Value) -> Result<Operand, Cql2Error> {
    match expr {
        Expr::Null => Ok(Operand::Null),
        Expr::Bool(b) => Ok(Operand::Bool(*b)),
        Expr::Number(n) => n
            .as_f64()
            .map(Operand::Number)
            .ok_or_else(|| evaluation_error(format!("number {} out of range", n))),
        Expr::String(s) => Ok(Operand::Text(s.clone())),
        Expr::Timestamp(t) => parse_instant(t)
            .map(Operand::Instant)
            .ok_or_else(|| evaluation_error(format!("invalid timestamp '{}'", t))),
        Expr::Date(d) => parse_date(d)
            .map(Operand::Instant)
            .ok_or_else(|| evaluation_error(format!("invalid date '{}'", d))),
        Expr::Property(name) => Ok(lookup(record, name).map(from_json).unwrap_or(Operand::Null)),
        Expr::Geometry(_) | Expr::BBox(_) | Expr::Interval(_) => Err(evaluation_error(format!(
            "'{}' is not supported for local evaluation",
            expr.to_text()
        ))),
        Expr::Array(items) => items
            .iter()
            .map(|item| evaluate(item, record))
            .collect::<Result<Vec<_>, _>>()
            .map(Operand::List),
        Expr::Operation { op, args } => apply(op, args, record),
    }
}

fn apply(op: &str, args: &[Expr], record: &Value) -> Result<Operand, Cql2Error> {
    let arg = |index: usize| -> Result<Operand, Cql2Error> {
        let expr = args
            .get(index)
            .ok_or_else(|| evaluation_error(format!("operator '{}' is missing arguments", op)))?;
        evaluate(expr, record)
    };

    if ARITHMETIC_OPS.contains(&op) {
        return match (arg(0)?, arg(1)?) {
            (Operand::Number(a), Operand::Number(b)) => Ok(Operand::Number(arithmetic(op, a, b))),
            (Operand::Null, _) | (_, Operand::Null) => Ok(Operand::Null),
            _ => Err(evaluation_error(format!(
                "operator '{}' requires numeric operands",
                op
            ))),
        };
    }

    let result = match op {
        "and" => {
            for expr in args {
                if !truthy(evaluate(expr, record)?)? {
                    return Ok(Operand::Bool(false));
                }
            }
            true
        }
        "or" => {
            for expr in args {
                if truthy(evaluate(expr, record)?)? {
                    return Ok(Operand::Bool(true));
                }
            }
            false
        }
        "not" => !truthy(arg(0)?)?,
        "=" => compare(&arg(0)?, &arg(1)?) == Some(Ordering::Equal),
        "<>" => matches!(
            compare(&arg(0)?, &arg(1)?),
            Some(Ordering::Less | Ordering::Greater)
        ),
        "<" => compare(&arg(0)?, &arg(1)?) == Some(Ordering::Less),
        "<=" => matches!(
            compare(&arg(0)?, &arg(1)?),
            Some(Ordering::Less | Ordering::Equal)
        ),
        ">" => compare(&arg(0)?, &arg(1)?) == Some(Ordering::Greater),
        ">=" => matches!(
            compare(&arg(0)?, &arg(1)?),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        "between" => {
            let value = arg(0)?;
            matches!(
                compare(&value, &arg(1)?),
                Some(Ordering::Greater | Ordering::Equal)
            ) && matches!(
                compare(&value, &arg(2)?),
                Some(Ordering::Less | Ordering::Equal)
            )
        }
        "in" => {
            let value = arg(0)?;
            match arg(1)? {
                Operand::List(items) => items
                    .iter()
                    .any(|item| compare(&value, item) == Some(Ordering::Equal)),
                _ => return Err(evaluation_error("'in' requires a list")),
            }
        }
        "like" => match (arg(0)?, arg(1)?) {
            (Operand::Text(value), Operand::Text(pattern)) => like(&value, &pattern)?,
            (Operand::Null, _) => false,
            _ => return Err(evaluation_error("'like' requires string operands")),
        },
        "isNull" => matches!(arg(0)?, Operand::Null),
        other => {
            return Err(evaluation_error(format!(
                "operator '{}' is not supported for local evaluation",
                other
            )))
        }
    };

    Ok(Operand::Bool(result))
}

fn arithmetic(op: &str, a: f64, b: f64) -> f64 {
    match op {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" => a / b,
        "%" => a % b,
        "^" => a.powf(b),
        _ => (a / b).trunc(),
    }
}

fn compare(left: &Operand, right: &Operand) -> Option<Ordering> {
    match (left, right) {
        (Operand::Number(a), Operand::Number(b)) => a.partial_cmp(b),
        (Operand::Text(a), Operand::Text(b)) => Some(a.cmp(b)),
        (Operand::Bool(a), Operand::Bool(b)) => Some(a.cmp(b)),
        (Operand::Instant(a), Operand::Instant(b)) => Some(a.cmp(b)),
        (Operand::Text(a), Operand::Instant(b)) => parse_instant(a).map(|a| a.cmp(b)),
        (Operand::Instant(a), Operand::Text(b)) => parse_instant(b).map(|b| a.cmp(&b)),
        _ => None,
    }
}

/// SQL `LIKE` with `%`, `_` and backslash escapes
fn like(value: &str, pattern: &str) -> Result<bool, Cql2Error> {
    let mut regex = String::from("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => regex.push_str(&regex::escape(&escaped.to_string())),
                None => regex.push_str(r"\\"),
            },
            other => regex.push_str(&regex::escape(&other.to_string())),
        }
    }
    regex.push('$');
    Regex::new(&regex)
        .map(|re| re.is_match(value))
        .map_err(|e| evaluation_error(format!("invalid LIKE pattern '{}': {}", pattern, e)))
}

fn parse_instant(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .or_else(|| parse_date(text))
}

fn parse_date(text: &str) -> Option<DateTime<FixedOffset>> {
    let day = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    let midnight = day.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight).fixed_offset())
}

fn from_json(value: &Value) -> Operand {
    match value {
        Value::Null => Operand::Null,
        Value::Bool(b) => Operand::Bool(*b),
        Value::Number(n) => n.as_f64().map(Operand::Number).unwrap_or(Operand::Null),
        Value::String(s) => Operand::Text(s.clone()),
        Value::Array(items) => Operand::List(items.iter().map(from_json).collect()),
        Value::Object(_) => Operand::Object,
    }
}

fn lookup<'a>(record: &'a Value, name: &str) -> Option<&'a Value> {
    let find = |scope: &'a Value| scope.get(name).or_else(|| dotted(scope, name));
    find(record).or_else(|| record.get("properties").and_then(find))
}

fn dotted<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if !path.contains('.') {
        return None;
    }
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
}
