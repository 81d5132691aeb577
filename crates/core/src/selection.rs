//! Reference selections produced by the typeahead picker.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{display_scalar, Collection, Row, RowId};

/// How a referenced entity is labelled and which fields a selection carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceKind {
    pub collection: Collection,
    pub label_fields: &'static [&'static str],
    pub separator: &'static str,
}

impl ReferenceKind {
    pub const COORDINATES: ReferenceKind =
        ReferenceKind { collection: Collection::Coordinates, label_fields: &["x", "y"], separator: ", " };
    pub const PERSON: ReferenceKind =
        ReferenceKind { collection: Collection::Person, label_fields: &["fullName"], separator: " " };
    pub const VEHICLE: ReferenceKind =
        ReferenceKind { collection: Collection::Vehicle, label_fields: &["name"], separator: " " };

    pub fn for_collection(collection: Collection) -> Self {
        match collection {
            Collection::Coordinates => Self::COORDINATES,
            Collection::Person => Self::PERSON,
            Collection::Vehicle => Self::VEHICLE,
        }
    }

    /// `"x, y"` for coordinates; empty when any label field is missing.
    pub fn label(&self, row: &Row) -> String {
        self.label_of(|f| row.get(f))
    }

    pub fn selection_label(&self, sel: &Selection) -> String {
        if sel.id.is_none() {
            return String::new();
        }
        self.label_of(|f| sel.fields.get(f))
    }

    fn label_of<'a>(&self, lookup: impl Fn(&str) -> Option<&'a Value>) -> String {
        let mut parts = Vec::with_capacity(self.label_fields.len());
        for f in self.label_fields {
            match lookup(*f) {
                Some(v) if !v.is_null() => parts.push(display_scalar(v)),
                _ => return String::new(),
            }
        }
        parts.join(self.separator)
    }
}

/// `{id, <label fields>}`; `id == None` means nothing valid is committed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Selection {
    pub id: Option<RowId>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Selection {
    pub fn from_row(kind: &ReferenceKind, row: &Row) -> Self {
        let mut fields = Map::new();
        for f in kind.label_fields {
            fields.insert((*f).to_string(), row.get(f).cloned().unwrap_or(Value::Null));
        }
        Self { id: row.id(), fields }
    }

    /// Null id with every label field present and null.
    pub fn cleared(kind: &ReferenceKind) -> Self {
        let fields = kind.label_fields.iter().map(|f| ((*f).to_string(), Value::Null)).collect();
        Self { id: None, fields }
    }

    pub fn is_committed(&self) -> bool {
        self.id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coordinates_label_matches_ui_format() {
        let row = Row::from(json!({"id": 1, "x": 10.0, "y": 20.5}));
        assert_eq!(ReferenceKind::COORDINATES.label(&row), "10, 20.5");
        let partial = Row::from(json!({"id": 2, "x": 1}));
        assert_eq!(ReferenceKind::COORDINATES.label(&partial), "");
    }

    #[test]
    fn cleared_selection_serializes_flat_nulls() {
        let v = serde_json::to_value(Selection::cleared(&ReferenceKind::COORDINATES)).unwrap();
        assert_eq!(v, json!({"id": null, "x": null, "y": null}));
    }
}
