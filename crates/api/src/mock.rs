#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use fleet_core::query::{DateOp, FilterPredicate, FilterSpec, NumberOp, QueryRequest, QueryResponse, SortDirection, SortSpec, TextOp};
use fleet_core::{display_scalar, Collection, Row, RowId};
use serde_json::{json, Value};

use crate::{check_fuel_threshold, FleetApi, FleetError, FleetResult};

/// In-memory backend: evaluates sort/filter locally and records every call.
#[derive(Default)]
pub struct MockApi {
    rows: Mutex<HashMap<Collection, Vec<Row>>>,
    queries: Mutex<Vec<(Collection, QueryRequest)>>,
    searches: Mutex<Vec<(Collection, String, usize)>>,
    references: Mutex<HashMap<(Collection, RowId), u64>>,
    latency: Mutex<Duration>,
    window_latency: Mutex<HashMap<usize, Duration>>,
    fail_queries: AtomicBool,
    fail_search: AtomicBool,
    unknown_total: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(self, collection: Collection, rows: Vec<Row>) -> Self {
        lock(&self.rows).insert(collection, rows);
        self
    }

    /// `n` coordinates with ids `1..=n`, `x = id`, `y = id * 10`.
    pub fn with_coordinates(self, n: usize) -> Self {
        let rows = (1..=n as i64).map(|i| Row::from(json!({"id": i, "x": i as f64, "y": (i * 10) as f64}))).collect();
        self.with_rows(Collection::Coordinates, rows)
    }

    /// Every call sleeps this long before answering.
    pub fn set_latency(&self, d: Duration) {
        *lock(&self.latency) = d;
    }

    /// Query windows starting at `start_row` sleep `d` instead of the global latency.
    pub fn set_window_latency(&self, start_row: usize, d: Duration) {
        lock(&self.window_latency).insert(start_row, d);
    }

    pub fn fail_queries(&self, on: bool) {
        self.fail_queries.store(on, AtomicOrdering::SeqCst);
    }

    pub fn fail_search(&self, on: bool) {
        self.fail_search.store(on, AtomicOrdering::SeqCst);
    }

    /// Answer `lastRow: -1` like a backend that does not count.
    pub fn hide_total(&self, on: bool) {
        self.unknown_total.store(on, AtomicOrdering::SeqCst);
    }

    /// Make `delete` fail with a foreign-key conflict until a reassign target is given.
    pub fn add_references(&self, collection: Collection, id: RowId, count: u64) {
        lock(&self.references).insert((collection, id), count);
    }

    pub fn replace_rows(&self, collection: Collection, rows: Vec<Row>) {
        lock(&self.rows).insert(collection, rows);
    }

    pub fn queries(&self) -> Vec<(Collection, QueryRequest)> {
        lock(&self.queries).clone()
    }

    pub fn searches(&self) -> Vec<(Collection, String, usize)> {
        lock(&self.searches).clone()
    }

    pub fn clear_log(&self) {
        lock(&self.queries).clear();
        lock(&self.searches).clear();
    }

    async fn pause(&self, start_row: Option<usize>) {
        let d = start_row
            .and_then(|s| lock(&self.window_latency).get(&s).copied())
            .unwrap_or_else(|| *lock(&self.latency));
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
    }

    fn select(&self, collection: Collection, sort: &SortSpec, filter: &FilterSpec) -> Vec<Row> {
        let rows = lock(&self.rows);
        let mut out: Vec<Row> = rows
            .get(&collection)
            .map(|v| v.iter().filter(|r| matches_filter(r, filter)).cloned().collect())
            .unwrap_or_default();
        if !sort.is_empty() {
            out.sort_by(|a, b| {
                for key in sort.keys() {
                    let ord = compare(lookup(a, &key.col_id), lookup(b, &key.col_id));
                    let ord = if key.direction == SortDirection::Desc { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }
        out
    }
}

fn lookup<'a>(row: &'a Row, col: &str) -> Option<&'a Value> {
    row.get_path(col).filter(|v| !v.is_null())
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx.partial_cmp(&fy).unwrap_or(Ordering::Equal),
            _ => display_scalar(x).cmp(&display_scalar(y)),
        },
    }
}

fn matches_filter(row: &Row, filter: &FilterSpec) -> bool {
    filter.iter().all(|(col, pred)| matches_predicate(lookup(row, col), pred))
}

fn matches_predicate(v: Option<&Value>, pred: &FilterPredicate) -> bool {
    let Some(v) = v else { return false };
    match pred {
        FilterPredicate::Number { op, value, value_to } => {
            let (Some(n), Some(a)) = (v.as_f64(), *value) else { return false };
            match op {
                NumberOp::Equals => n == a,
                NumberOp::NotEqual => n != a,
                NumberOp::LessThan => n < a,
                NumberOp::LessThanOrEqual => n <= a,
                NumberOp::GreaterThan => n > a,
                NumberOp::GreaterThanOrEqual => n >= a,
                NumberOp::InRange => value_to.map(|b| n >= a && n <= b).unwrap_or(false),
            }
        }
        FilterPredicate::Text { op, value } => {
            let s = display_scalar(v).to_lowercase();
            let q = value.to_lowercase();
            match op {
                TextOp::Equals => s == q,
                TextOp::NotEqual => s != q,
                TextOp::Contains => s.contains(&q),
                TextOp::StartsWith => s.starts_with(&q),
                TextOp::EndsWith => s.ends_with(&q),
            }
        }
        FilterPredicate::Date { op, date_from, date_to } => {
            // ISO dates compare lexicographically.
            let s = display_scalar(v);
            let day = s.get(..10).unwrap_or(&s);
            let from = date_from.to_string();
            match op {
                DateOp::Equals => day == from,
                DateOp::LessThan => day < from.as_str(),
                DateOp::GreaterThan => day > from.as_str(),
                DateOp::InRange => date_to.map(|to| day >= from.as_str() && day <= to.to_string().as_str()).unwrap_or(false),
            }
        }
    }
}

fn matches_search(row: &Row, q: &str) -> bool {
    if q.is_empty() {
        return true;
    }
    row.0.iter().filter(|(k, _)| k.as_str() != "id").any(|(_, v)| display_scalar(v).to_lowercase().contains(q))
}

#[async_trait::async_trait]
impl FleetApi for MockApi {
    async fn query_rows(&self, collection: Collection, req: &QueryRequest) -> FleetResult<QueryResponse> {
        lock(&self.queries).push((collection, req.clone()));
        self.pause(Some(req.start_row)).await;
        if self.fail_queries.load(AtomicOrdering::SeqCst) {
            return Err(FleetError::Status { status: 500, message: "HTTP 500".into() });
        }
        let all = self.select(collection, &req.sort_model, &req.filter_model);
        let total = all.len();
        let rows = all.into_iter().skip(req.start_row).take(req.end_row.saturating_sub(req.start_row)).collect();
        let last_row = if self.unknown_total.load(AtomicOrdering::SeqCst) { -1 } else { total as i64 };
        Ok(QueryResponse { rows, last_row: Some(last_row) })
    }

    async fn search(&self, collection: Collection, query: &str, limit: usize) -> FleetResult<Vec<Row>> {
        lock(&self.searches).push((collection, query.to_string(), limit));
        self.pause(None).await;
        if self.fail_search.load(AtomicOrdering::SeqCst) {
            return Err(FleetError::Transport("connection refused".into()));
        }
        let q = query.trim().to_lowercase();
        let rows = lock(&self.rows);
        Ok(rows
            .get(&collection)
            .map(|v| v.iter().filter(|r| matches_search(r, &q)).take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, collection: Collection, id: RowId) -> FleetResult<Row> {
        lock(&self.rows)
            .get(&collection)
            .and_then(|v| v.iter().find(|r| r.id() == Some(id)).cloned())
            .ok_or_else(|| FleetError::Status { status: 404, message: format!("{} {} not found", collection, id) })
    }

    async fn create(&self, collection: Collection, body: &Value) -> FleetResult<RowId> {
        let Value::Object(map) = body else {
            return Err(FleetError::Validation("body must be an object".into()));
        };
        let mut rows = lock(&self.rows);
        let list = rows.entry(collection).or_default();
        let id = list.iter().filter_map(Row::id).max().unwrap_or(0) + 1;
        let mut row = Row(map.clone());
        row.0.insert("id".into(), json!(id));
        list.push(row);
        Ok(id)
    }

    async fn update(&self, collection: Collection, id: RowId, body: &Value) -> FleetResult<()> {
        let Value::Object(map) = body else {
            return Err(FleetError::Validation("body must be an object".into()));
        };
        let mut rows = lock(&self.rows);
        let row = rows
            .get_mut(&collection)
            .and_then(|v| v.iter_mut().find(|r| r.id() == Some(id)))
            .ok_or_else(|| FleetError::Status { status: 404, message: format!("{} {} not found", collection, id) })?;
        for (k, v) in map {
            if k != "id" {
                row.0.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: RowId, reassign_to: Option<RowId>) -> FleetResult<()> {
        {
            let mut refs = lock(&self.references);
            match (refs.get(&(collection, id)).copied(), reassign_to) {
                (Some(n), None) => {
                    return Err(FleetError::Conflict {
                        code: Some("FK_CONSTRAINT".into()),
                        message: format!("{} {} is referenced by {} records", collection, id, n),
                        ref_count: Some(n),
                    });
                }
                (Some(n), Some(target)) => {
                    refs.remove(&(collection, id));
                    *refs.entry((collection, target)).or_insert(0) += n;
                }
                (None, _) => {}
            }
        }
        let mut rows = lock(&self.rows);
        let list = rows.entry(collection).or_default();
        let before = list.len();
        list.retain(|r| r.id() != Some(id));
        if list.len() == before {
            return Err(FleetError::Status { status: 404, message: format!("{} {} not found", collection, id) });
        }
        Ok(())
    }

    async fn min_distance_vehicle(&self) -> FleetResult<Option<Row>> {
        self.pause(None).await;
        let rows = lock(&self.rows);
        let best = rows
            .get(&Collection::Vehicle)
            .into_iter()
            .flatten()
            .filter_map(|r| r.get("distanceTravelled").and_then(Value::as_f64).map(|d| (d, r)))
            .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        Ok(best.map(|(_, r)| r.clone()))
    }

    async fn count_fuel_above(&self, threshold: f64) -> FleetResult<u64> {
        check_fuel_threshold(threshold)?;
        self.pause(None).await;
        let rows = lock(&self.rows);
        let n = rows
            .get(&Collection::Vehicle)
            .into_iter()
            .flatten()
            .filter(|r| r.get("fuelConsumption").and_then(Value::as_f64).is_some_and(|f| f > threshold))
            .count();
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::query::PageWindow;

    #[tokio::test]
    async fn query_applies_filter_then_sort_then_window() {
        let api = MockApi::new().with_coordinates(200);
        let sort = SortSpec::by("x", SortDirection::Desc);
        let filter = FilterSpec::single("y", FilterPredicate::number(NumberOp::LessThanOrEqual, 1000.0));
        let resp = api.query_rows(Collection::Coordinates, &QueryRequest::new(PageWindow::new(0, 5), &sort, &filter)).await.unwrap();
        assert_eq!(resp.total(), Some(100));
        let ids: Vec<_> = resp.rows.iter().filter_map(Row::id).collect();
        assert_eq!(ids, vec![100, 99, 98, 97, 96]);
    }

    fn vehicles() -> MockApi {
        let rows = vec![
            json!({"id": 1, "name": "truck", "distanceTravelled": 900.0, "fuelConsumption": 12.5}),
            json!({"id": 2, "name": "cart", "distanceTravelled": null, "fuelConsumption": 0.5}),
            json!({"id": 3, "name": "bike", "distanceTravelled": 40.0, "fuelConsumption": 3.0}),
        ];
        MockApi::new().with_rows(Collection::Vehicle, rows.into_iter().map(Row::from).collect())
    }

    #[tokio::test]
    async fn create_assigns_next_id_and_update_merges_fields() {
        let api = vehicles();
        let id = api.create(Collection::Vehicle, &json!({"name": "van", "fuelConsumption": 8.0})).await.unwrap();
        assert_eq!(id, 4);
        api.update(Collection::Vehicle, id, &json!({"id": 99, "fuelConsumption": 9.5})).await.unwrap();
        let row = api.get(Collection::Vehicle, id).await.unwrap();
        assert_eq!(row.id(), Some(4));
        assert_eq!(row.get("name"), Some(&json!("van")));
        assert_eq!(row.get("fuelConsumption"), Some(&json!(9.5)));

        assert!(matches!(api.create(Collection::Vehicle, &json!([1])).await, Err(FleetError::Validation(_))));
        let missing = api.update(Collection::Vehicle, 42, &json!({"name": "x"})).await.unwrap_err();
        assert!(matches!(missing, FleetError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn vehicle_specials_skip_missing_values() {
        let api = vehicles();
        let best = api.min_distance_vehicle().await.unwrap();
        assert_eq!(best.and_then(|r| r.id()), Some(3));
        assert_eq!(api.count_fuel_above(2.0).await.unwrap(), 2);
        assert_eq!(api.count_fuel_above(12.5).await.unwrap(), 0);
        assert!(api.count_fuel_above(0.0).await.unwrap_err().to_string().contains("> 0"));

        let empty = MockApi::new().with_coordinates(3);
        assert_eq!(empty.min_distance_vehicle().await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_with_references_requires_reassign() {
        let api = MockApi::new().with_coordinates(3);
        api.add_references(Collection::Coordinates, 1, 2);
        let err = api.delete(Collection::Coordinates, 1, None).await.unwrap_err();
        assert!(err.needs_reassign());
        api.delete(Collection::Coordinates, 1, Some(2)).await.unwrap();
        assert!(api.get(Collection::Coordinates, 1).await.is_err());
        assert!(api.delete(Collection::Coordinates, 2, None).await.unwrap_err().needs_reassign());
    }
}
