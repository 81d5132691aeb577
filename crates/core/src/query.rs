//! Sort/filter specs and the row query contract.
//!
//! Wire shapes follow the backend's grid endpoint:
//! `{startRow, endRow, sortModel: [{colId, sort}], filterModel: {colId: {filterType, type, ...}}}`.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::columns::FilterKind;
use crate::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    #[serde(rename = "colId")]
    pub col_id: String,
    #[serde(rename = "sort")]
    pub direction: SortDirection,
}

/// Ordered sort keys; empty means backend default order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SortSpec(pub SmallVec<[SortKey; 4]>);

impl SortSpec {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn by(col_id: impl Into<String>, direction: SortDirection) -> Self {
        let mut keys = SmallVec::new();
        keys.push(SortKey { col_id: col_id.into(), direction });
        Self(keys)
    }

    pub fn then(mut self, col_id: impl Into<String>, direction: SortDirection) -> Self {
        self.0.push(SortKey { col_id: col_id.into(), direction });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.0
    }
}

/// Parses `col[:asc|:desc],col2:desc`; direction defaults to ascending.
impl FromStr for SortSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut spec = SortSpec::none();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (col, dir) = match part.rsplit_once(':') {
                Some((c, "asc")) => (c, SortDirection::Asc),
                Some((c, "desc")) => (c, SortDirection::Desc),
                Some((_, d)) => return Err(format!("invalid sort direction: {} (expect asc or desc)", d)),
                None => (part, SortDirection::Asc),
            };
            if col.is_empty() {
                return Err(format!("missing column in sort key: {}", part));
            }
            spec = spec.then(col, dir);
        }
        Ok(spec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NumberOp {
    Equals,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    InRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextOp {
    Equals,
    NotEqual,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DateOp {
    Equals,
    LessThan,
    GreaterThan,
    InRange,
}

/// One column's predicate; the shape depends on the column's filter kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filterType", rename_all = "lowercase")]
pub enum FilterPredicate {
    Number {
        #[serde(rename = "type")]
        op: NumberOp,
        #[serde(rename = "filter", default, skip_serializing_if = "Option::is_none")]
        value: Option<f64>,
        #[serde(rename = "filterTo", default, skip_serializing_if = "Option::is_none")]
        value_to: Option<f64>,
    },
    Text {
        #[serde(rename = "type")]
        op: TextOp,
        #[serde(rename = "filter")]
        value: String,
    },
    Date {
        #[serde(rename = "type")]
        op: DateOp,
        #[serde(rename = "dateFrom")]
        date_from: NaiveDate,
        #[serde(rename = "dateTo", default, skip_serializing_if = "Option::is_none")]
        date_to: Option<NaiveDate>,
    },
}

impl FilterPredicate {
    pub fn number(op: NumberOp, value: f64) -> Self {
        FilterPredicate::Number { op, value: Some(value), value_to: None }
    }

    pub fn number_range(from: f64, to: f64) -> Self {
        FilterPredicate::Number { op: NumberOp::InRange, value: Some(from), value_to: Some(to) }
    }

    pub fn text(op: TextOp, value: impl Into<String>) -> Self {
        FilterPredicate::Text { op, value: value.into() }
    }

    pub fn kind(&self) -> FilterKind {
        match self {
            FilterPredicate::Number { .. } => FilterKind::Number,
            FilterPredicate::Text { .. } => FilterKind::Text,
            FilterPredicate::Date { .. } => FilterKind::Date,
        }
    }
}

/// colId → predicate. Replaced wholesale on every change.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSpec(pub BTreeMap<String, FilterPredicate>);

impl FilterSpec {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn single(col_id: impl Into<String>, pred: FilterPredicate) -> Self {
        let mut map = BTreeMap::new();
        map.insert(col_id.into(), pred);
        Self(map)
    }

    pub fn with(mut self, col_id: impl Into<String>, pred: FilterPredicate) -> Self {
        self.0.insert(col_id.into(), pred);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, col_id: &str) -> Option<&FilterPredicate> {
        self.0.get(col_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FilterPredicate)> {
        self.0.iter()
    }
}

/// Contiguous row range `[start_row, end_row)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageWindow {
    pub start_row: usize,
    pub end_row: usize,
}

impl PageWindow {
    pub fn new(start_row: usize, end_row: usize) -> Self {
        Self { start_row, end_row: end_row.max(start_row) }
    }

    pub fn len(&self) -> usize {
        self.end_row.saturating_sub(self.start_row)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, row: usize) -> bool {
        row >= self.start_row && row < self.end_row
    }
}

impl fmt::Display for PageWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start_row, self.end_row)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub start_row: usize,
    pub end_row: usize,
    pub sort_model: SortSpec,
    pub filter_model: FilterSpec,
}

impl QueryRequest {
    pub fn new(window: PageWindow, sort: &SortSpec, filter: &FilterSpec) -> Self {
        Self {
            start_row: window.start_row,
            end_row: window.end_row,
            sort_model: sort.clone(),
            filter_model: filter.clone(),
        }
    }

    pub fn window(&self) -> PageWindow {
        PageWindow::new(self.start_row, self.end_row)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    #[serde(default)]
    pub rows: Vec<Row>,
    /// `-1` or absent while the server does not know the total.
    #[serde(default)]
    pub last_row: Option<i64>,
}

impl QueryResponse {
    pub fn total(&self) -> Option<usize> {
        self.last_row.filter(|n| *n >= 0).map(|n| n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inverted_window_is_empty() {
        let w = PageWindow { start_row: 50, end_row: 10 };
        assert_eq!(w.len(), 0);
        assert!(w.is_empty());
        assert!(!w.contains(20));
    }

    #[test]
    fn request_serializes_to_grid_wire_shape() {
        let req = QueryRequest::new(
            PageWindow::new(100, 150),
            &SortSpec::by("x", SortDirection::Desc),
            &FilterSpec::single("enginePower", FilterPredicate::number_range(100.0, 200.0))
                .with("type", FilterPredicate::text(TextOp::Equals, "CAR")),
        );
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v,
            json!({
                "startRow": 100,
                "endRow": 150,
                "sortModel": [{"colId": "x", "sort": "desc"}],
                "filterModel": {
                    "enginePower": {"filterType": "number", "type": "inRange", "filter": 100.0, "filterTo": 200.0},
                    "type": {"filterType": "text", "type": "equals", "filter": "CAR"}
                }
            })
        );
    }

    #[test]
    fn date_predicate_uses_iso_dates() {
        let pred = FilterPredicate::Date {
            op: DateOp::InRange,
            date_from: NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
            date_to: NaiveDate::from_ymd_opt(2025, 10, 20),
        };
        let v = serde_json::to_value(&pred).unwrap();
        assert_eq!(v, json!({"filterType": "date", "type": "inRange", "dateFrom": "2025-10-01", "dateTo": "2025-10-20"}));
    }

    #[test]
    fn unknown_total_when_last_row_missing_or_negative() {
        let r: QueryResponse = serde_json::from_value(json!({"rows": []})).unwrap();
        assert_eq!(r.total(), None);
        let r: QueryResponse = serde_json::from_value(json!({"rows": [], "lastRow": -1})).unwrap();
        assert_eq!(r.total(), None);
        let r: QueryResponse = serde_json::from_value(json!({"lastRow": 140})).unwrap();
        assert_eq!(r.total(), Some(140));
        assert!(r.rows.is_empty());
    }

    #[test]
    fn sort_spec_parses_multi_key() {
        let s: SortSpec = "creationTime:desc, id".parse().unwrap();
        assert_eq!(s.keys().len(), 2);
        assert_eq!(s.keys()[0].direction, SortDirection::Desc);
        assert_eq!(s.keys()[1].col_id, "id");
        assert!("x:up".parse::<SortSpec>().is_err());
    }
}
