//! GeoJSON geometry literals and their WKT form

use serde_json::{Map, Value};

use super::Cql2Error;

/// GeoJSON type, WKT keyword and coordinate nesting depth
const GEOMETRY_TYPES: &[(&str, &str, usize)] = &[
    ("Point", "POINT", 0),
    ("LineString", "LINESTRING", 1),
    ("Polygon", "POLYGON", 2),
    ("MultiPoint", "MULTIPOINT", 1),
    ("MultiLineString", "MULTILINESTRING", 2),
    ("MultiPolygon", "MULTIPOLYGON", 3),
    ("GeometryCollection", "GEOMETRYCOLLECTION", 0),
];

/// A geometry literal, kept as GeoJSON alongside its WKT rendering
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    geojson: Value,
    wkt: String,
}

impl Geometry {
    pub fn from_geojson(geojson: Value) -> Result<Self, Cql2Error> {
        let wkt = to_wkt(&geojson)
            .ok_or_else(|| Cql2Error::Json(format!("invalid GeoJSON geometry: {}", geojson)))?;
        Ok(Self { geojson, wkt })
    }

    pub fn as_geojson(&self) -> &Value {
        &self.geojson
    }

    pub fn wkt(&self) -> &str {
        &self.wkt
    }
}

/// Whether a cql2-json object is a GeoJSON geometry
pub(super) fn is_geojson(map: &Map<String, Value>) -> bool {
    map.get("type")
        .and_then(Value::as_str)
        .is_some_and(|kind| GEOMETRY_TYPES.iter().any(|(name, _, _)| *name == kind))
}

/// GeoJSON type and coordinate depth for an upper-case WKT keyword
pub(super) fn from_wkt_keyword(keyword: &str) -> Option<(&'static str, usize)> {
    GEOMETRY_TYPES
        .iter()
        .find(|(_, wkt, _)| *wkt == keyword)
        .map(|(name, _, depth)| (*name, *depth))
}

fn to_wkt(geojson: &Value) -> Option<String> {
    let kind = geojson.get("type")?.as_str()?;
    let (keyword, depth) = GEOMETRY_TYPES
        .iter()
        .find(|(name, _, _)| *name == kind)
        .map(|(_, wkt, depth)| (*wkt, *depth))?;

    if kind == "GeometryCollection" {
        let members = geojson.get("geometries")?.as_array()?;
        if members.is_empty() {
            return None;
        }
        let members = members.iter().map(to_wkt).collect::<Option<Vec<_>>>()?;
        return Some(format!("{}({})", keyword, members.join(", ")));
    }

    let coordinates = coordinates_to_wkt(geojson.get("coordinates")?, depth)?;
    if depth == 0 {
        Some(format!("{}({})", keyword, coordinates))
    } else {
        Some(format!("{}{}", keyword, coordinates))
    }
}

fn coordinates_to_wkt(value: &Value, depth: usize) -> Option<String> {
    let items = value.as_array()?;
    if depth == 0 {
        if !(2..=4).contains(&items.len()) || !items.iter().all(Value::is_number) {
            return None;
        }
        let ordinates: Vec<String> = items.iter().map(Value::to_string).collect();
        return Some(ordinates.join(" "));
    }
    if items.is_empty() {
        return None;
    }
    let parts = items
        .iter()
        .map(|item| coordinates_to_wkt(item, depth - 1))
        .collect::<Option<Vec<_>>>()?;
    Some(format!("({})", parts.join(", ")))
}
