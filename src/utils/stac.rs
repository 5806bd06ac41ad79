//! STAC document helpers

use serde_json::{Map, Value};

/// Visit every link object of a STAC response
///
/// Covers the document's own `links` and the links of each entry in
/// `features` (item collections) and `collections` (collection lists).
pub fn for_each_link<F>(data: &mut Value, mut visit: F)
where
    F: FnMut(&mut Map<String, Value>),
{
    visit_links(data, &mut visit);
    for member in ["features", "collections"] {
        if let Some(Value::Array(entries)) = data.get_mut(member) {
            for entry in entries.iter_mut() {
                visit_links(entry, &mut visit);
            }
        }
    }
}

fn visit_links<F>(object: &mut Value, visit: &mut F)
where
    F: FnMut(&mut Map<String, Value>),
{
    if let Some(Value::Array(links)) = object.get_mut("links") {
        for link in links.iter_mut() {
            if let Value::Object(link) = link {
                visit(link);
            }
        }
    }
}
