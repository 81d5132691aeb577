//! Fleet core types shared by the grid, picker and push channel.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod columns;
pub mod presets;
pub mod query;
pub mod selection;

pub mod prelude {
    pub use super::columns::{builtin_columns_for, CellFormat, ColumnDescriptor, FilterKind};
    pub use super::query::{
        DateOp, FilterPredicate, FilterSpec, NumberOp, PageWindow, QueryRequest, QueryResponse,
        SortDirection, SortKey, SortSpec, TextOp,
    };
    pub use super::selection::{ReferenceKind, Selection};
    pub use super::{Collection, RefreshTarget, Row, RowId};
}

pub type RowId = i64;

/// Server-defined record. Treated as an immutable snapshot; every mutation
/// goes through the write API and comes back through a reload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(pub Map<String, Value>);

impl Row {
    pub fn id(&self) -> Option<RowId> {
        self.0.get("id").and_then(|v| v.as_i64())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Resolve a dotted path (`coordinates.x`) through nested objects.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = self.0.get(parts.next()?)?;
        parts.try_fold(first, |v, p| v.get(p))
    }
}

impl From<Value> for Row {
    fn from(v: Value) -> Self {
        match v {
            Value::Object(map) => Row(map),
            _ => Row::default(),
        }
    }
}

/// Render a JSON scalar the way the tables show it: integral floats lose
/// their fractional part (`10`, not `10.0`), null is empty.
pub fn display_scalar(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{}", f as i64)
                } else {
                    f.to_string()
                }
            } else {
                n.to_string()
            }
        }
        other => other.to_string(),
    }
}

/// The three record collections served by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Coordinates,
    Person,
    Vehicle,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Coordinates, Collection::Person, Collection::Vehicle];

    /// Path segment under `/api/`.
    pub fn rest_segment(&self) -> &'static str {
        match self {
            Collection::Coordinates => "coordinates",
            Collection::Person => "person",
            Collection::Vehicle => "vehicle",
        }
    }

    /// Path segment under `/ws/`.
    pub fn socket_segment(&self) -> &'static str {
        match self {
            Collection::Coordinates => "coordinates",
            Collection::Person => "persons",
            Collection::Vehicle => "vehicles",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rest_segment())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coordinates" | "coords" => Ok(Collection::Coordinates),
            "person" | "persons" | "people" => Ok(Collection::Person),
            "vehicle" | "vehicles" => Ok(Collection::Vehicle),
            other => Err(format!("unknown collection: {} (expect coordinates, person or vehicle)", other)),
        }
    }
}

/// Anything that can be told "the dataset changed upstream, re-check".
pub trait RefreshTarget: Send + Sync {
    fn refresh(&self);
}
