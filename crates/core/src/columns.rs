//! Built-in column sets for the three collections.
//!
//! This module provides:
//! - Column descriptors (colId, label, width, sort/filter capabilities)
//! - Value lookup through plain fields, dotted paths or fallback getters
//! - Cell rendering for plain values and timestamps

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::FilterPredicate;
use crate::{display_scalar, Collection, Row};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Number,
    Text,
    Date,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CellFormat {
    Plain,
    Timestamp,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDescriptor {
    /// Identifier used in sort and filter models (may be dotted).
    pub id: &'static str,
    pub label: &'static str,
    /// Row field read for display; `None` when only `getter` applies.
    pub field: Option<&'static str>,
    /// Ordered fallback paths; the first non-null value wins.
    pub getter: &'static [&'static str],
    pub width: f32,
    pub sortable: bool,
    pub filter: Option<FilterKind>,
    pub format: CellFormat,
}

impl ColumnDescriptor {
    /// A column with nothing to read renders empty and never sorts or filters.
    pub fn is_inert(&self) -> bool {
        self.field.is_none() && self.getter.is_empty()
    }

    pub fn can_sort(&self) -> bool {
        self.sortable && !self.is_inert()
    }

    pub fn can_filter(&self, pred: &FilterPredicate) -> bool {
        !self.is_inert() && self.filter == Some(pred.kind())
    }

    pub fn value<'a>(&self, row: &'a Row) -> Option<&'a Value> {
        for path in self.getter {
            if let Some(v) = row.get_path(path).filter(|v| !v.is_null()) {
                return Some(v);
            }
        }
        self.field.and_then(|f| row.get_path(f)).filter(|v| !v.is_null())
    }

    pub fn render(&self, row: &Row) -> String {
        let Some(v) = self.value(row) else { return String::new() };
        match self.format {
            CellFormat::Plain => display_scalar(v),
            CellFormat::Timestamp => render_timestamp(v),
        }
    }
}

fn render_timestamp(v: &Value) -> String {
    let Some(s) = v.as_str() else { return display_scalar(v) };
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return dt.naive_local().format("%Y-%m-%d %H:%M:%S").to_string();
    }
    // Backend LocalDateTime: no offset, optional fraction
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return dt.format("%Y-%m-%d %H:%M:%S").to_string();
    }
    s.to_string()
}

fn col(id: &'static str, label: &'static str, width: f32, filter: Option<FilterKind>) -> ColumnDescriptor {
    ColumnDescriptor {
        id,
        label,
        field: Some(id),
        getter: &[],
        width,
        sortable: filter.is_some(),
        filter,
        format: CellFormat::Plain,
    }
}

fn count_col(field: &'static str, label: &'static str, width: f32) -> ColumnDescriptor {
    ColumnDescriptor { sortable: false, ..col(field, label, width, None) }
}

/// Return the column set for a collection, in display order.
pub fn builtin_columns_for(collection: Collection) -> Vec<ColumnDescriptor> {
    use FilterKind::*;
    let mut cols: Vec<ColumnDescriptor> = Vec::new();

    match collection {
        Collection::Coordinates => {
            cols.push(col("id", "ID", 100.0, Some(Number)));
            cols.push(col("x", "X", 140.0, Some(Number)));
            cols.push(col("y", "Y", 140.0, Some(Number)));
            cols.push(count_col("vehiclesCount", "Vehicles", 130.0));
        }
        Collection::Person => {
            cols.push(col("id", "ID", 100.0, Some(Number)));
            cols.push(col("fullName", "Full Name", 200.0, Some(Text)));
            cols.push(ColumnDescriptor { field: Some("adminId"), ..col("admin.id", "Admin ID", 120.0, Some(Number)) });
            cols.push(ColumnDescriptor {
                field: Some("creationDate"),
                format: CellFormat::Timestamp,
                ..col("creationTime", "Created", 190.0, Some(Date))
            });
            cols.push(count_col("vehiclesCount", "Vehicles", 130.0));
        }
        Collection::Vehicle => {
            cols.push(col("id", "ID", 90.0, Some(Number)));
            cols.push(col("name", "Name", 200.0, Some(Text)));
            cols.push(col("type", "Type", 140.0, Some(Text)));
            cols.push(col("fuelType", "Fuel Type", 140.0, Some(Text)));
            cols.push(ColumnDescriptor {
                field: None,
                getter: &["creationDate", "creationTime"],
                format: CellFormat::Timestamp,
                ..col("creationTime", "Created", 190.0, Some(Date))
            });
            cols.push(ColumnDescriptor {
                field: None,
                getter: &["coordinates.x", "coordinatesX"],
                ..col("coordinates.x", "X", 110.0, Some(Number))
            });
            cols.push(ColumnDescriptor {
                field: None,
                getter: &["coordinates.y", "coordinatesY"],
                ..col("coordinates.y", "Y", 110.0, Some(Number))
            });
            cols.push(col("enginePower", "Engine Power", 150.0, Some(Number)));
            cols.push(col("numberOfWheels", "Wheels", 120.0, Some(Number)));
            cols.push(col("capacity", "Capacity", 120.0, Some(Number)));
            cols.push(col("distanceTravelled", "Distance Travelled", 170.0, Some(Number)));
            cols.push(col("fuelConsumption", "Fuel Consumption", 160.0, Some(Number)));
        }
    }
    cols
}

/// Look up a column by its colId.
pub fn find_column<'a>(cols: &'a [ColumnDescriptor], id: &str) -> Option<&'a ColumnDescriptor> {
    cols.iter().find(|c| c.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn getter_falls_back_to_flat_field() {
        let cols = builtin_columns_for(Collection::Vehicle);
        let x = find_column(&cols, "coordinates.x").unwrap();
        let nested = Row::from(json!({"id": 1, "coordinates": {"x": 3.0, "y": 4}}));
        let flat = Row::from(json!({"id": 2, "coordinatesX": 7.5}));
        assert_eq!(x.render(&nested), "3");
        assert_eq!(x.render(&flat), "7.5");
    }

    #[test]
    fn timestamps_render_without_fraction() {
        let cols = builtin_columns_for(Collection::Person);
        let created = find_column(&cols, "creationTime").unwrap();
        let row = Row::from(json!({"creationDate": "2025-10-01T12:30:05.123"}));
        assert_eq!(created.render(&row), "2025-10-01 12:30:05");
    }

    #[test]
    fn inert_column_renders_empty() {
        let inert = ColumnDescriptor { field: None, ..col("ghost", "Ghost", 10.0, Some(FilterKind::Text)) };
        assert!(inert.is_inert());
        assert!(!inert.can_sort());
        assert_eq!(inert.render(&Row::from(json!({"ghost": "boo"}))), "");
    }
}
