//! Merging generated CQL2 filters into search requests

use indexmap::IndexMap;
use serde_json::{Map, Value};
use url::form_urlencoded;

use crate::cql2::{Cql2Error, Expr};

pub const CQL2_TEXT: &str = "cql2-text";
pub const CQL2_JSON: &str = "cql2-json";

/// Merge `filter` into a JSON request body
///
/// An existing `filter` member is combined as `filter AND existing`. The
/// output encoding follows `filter_lang`, then the body's own `filter-lang`,
/// then cql2-json.
pub fn append_body_filter(
    mut body: Map<String, Value>,
    filter: &Expr,
    filter_lang: Option<&str>,
) -> Result<Map<String, Value>, Cql2Error> {
    let filter_lang = filter_lang
        .map(str::to_string)
        .or_else(|| {
            body.get("filter-lang")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| CQL2_JSON.to_string());

    let combined = match body.get("filter") {
        Some(existing) if !is_blank(existing) => filter.clone() + Expr::try_from(existing)?,
        _ => filter.clone(),
    };

    let encoded = if filter_lang == CQL2_TEXT {
        Value::String(combined.to_text())
    } else {
        combined.to_json()
    };
    body.insert("filter".to_string(), encoded);
    body.insert("filter-lang".to_string(), Value::String(filter_lang));
    Ok(body)
}

/// Merge `filter` into a URL query string
///
/// Repeated parameters keep their first value. The filter language defaults
/// to cql2-text unless the query asks for something else.
pub fn append_qs_filter(
    query: &str,
    filter: &Expr,
    filter_lang: Option<&str>,
) -> Result<String, Cql2Error> {
    let mut params: IndexMap<String, String> = IndexMap::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        params.entry(key.into_owned()).or_insert_with(|| value.into_owned());
    }

    let filter_lang = filter_lang
        .or_else(|| params.get("filter-lang").map(String::as_str))
        .unwrap_or(CQL2_TEXT)
        .to_string();

    let body: Map<String, Value> = params
        .into_iter()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    let body = append_body_filter(body, filter, Some(&filter_lang))?;

    Ok(to_query_string(&body))
}

/// Encode a flat JSON object as a query string; non-string values are JSON-encoded
pub fn to_query_string(params: &Map<String, Value>) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        match value {
            Value::String(s) => serializer.append_pair(key, s),
            other => serializer.append_pair(key, &other.to_string()),
        };
    }
    serializer.finish()
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
