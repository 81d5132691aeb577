#![forbid(unsafe_code)]

use fleet_api::FleetError;
use fleet_core::columns::builtin_columns_for;
use fleet_core::query::{FilterPredicate, FilterSpec, NumberOp, PageWindow, QueryResponse, SortDirection, SortSpec};
use fleet_core::{Collection, Row};
use fleet_grid::{BlockOutcome, BlockRequest, Grid, GridConfig, RowCount, RowSlot};

fn grid() -> Grid {
    Grid::new(
        Collection::Coordinates,
        builtin_columns_for(Collection::Coordinates),
        GridConfig { block_size: 50, max_blocks: 2 },
    )
}

fn rows(ids: std::ops::Range<i64>, tag: f64) -> Vec<Row> {
    ids.map(|i| Row::from(serde_json::json!({"id": i, "x": tag, "y": i as f64}))).collect()
}

fn ok(req: &BlockRequest, rows: Vec<Row>, last_row: i64) -> BlockOutcome {
    BlockOutcome::for_request(req, Ok(QueryResponse { rows, last_row: Some(last_row) }))
}

fn full_block(req: &BlockRequest, tag: f64) -> BlockOutcome {
    let start = req.query.start_row as i64;
    ok(req, rows(start..start + 50, tag), -1)
}

#[test]
fn response_for_older_spec_is_discarded() {
    let mut g = grid();
    let first = g.start();
    assert_eq!(first.len(), 1);

    let mut latest = Vec::new();
    for k in 0..4 {
        latest = g.set_filter_model(FilterSpec::single("x", FilterPredicate::number(NumberOp::GreaterThan, k as f64)));
    }
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].generation, 4);

    // Filter 0 answers late, after filter 4 is active.
    assert!(!g.apply(full_block(&first[0], 0.0)));
    assert!(matches!(g.view().row_slot(0), RowSlot::Loading));

    assert!(g.apply(full_block(&latest[0], 4.0)));
    let view = g.view();
    for i in 0..50 {
        let row = view.row(i).unwrap();
        assert_eq!(row.get("x"), Some(&serde_json::json!(4.0)));
    }
}

#[test]
fn sort_changes_reset_to_row_zero_and_purge() {
    let mut g = grid();
    let r = g.start();
    g.apply(full_block(&r[0], 1.0));
    let r = g.scroll_to(PageWindow::new(60, 90));
    assert_eq!(r.len(), 1);
    assert_eq!((r[0].query.start_row, r[0].query.end_row), (50, 100));
    g.apply(full_block(&r[0], 1.0));

    let r = g.set_sort(SortSpec::by("y", SortDirection::Desc));
    assert_eq!(g.viewport().start_row, 0);
    assert_eq!(g.cache().len(), 1);
    assert_eq!(r.len(), 1);
    assert_eq!(r[0].query.start_row, 0);
    assert_eq!(r[0].query.sort_model, SortSpec::by("y", SortDirection::Desc));
    assert!(g.row(60).is_none());
}

#[test]
fn late_response_from_superseded_refresh_is_dropped() {
    let mut g = grid();
    let r = g.start();
    g.apply(full_block(&r[0], 1.0));

    let first = g.refresh();
    let second = g.refresh();
    assert_eq!(first[0].generation, second[0].generation);
    assert_ne!(first[0].request_id, second[0].request_id);

    assert!(!g.apply(full_block(&first[0], 2.0)));
    assert_eq!(g.row(0).unwrap().get("x"), Some(&serde_json::json!(1.0)));
    assert!(g.apply(full_block(&second[0], 3.0)));
    assert_eq!(g.row(0).unwrap().get("x"), Some(&serde_json::json!(3.0)));
}

#[test]
fn reset_keeps_specs_but_purges_and_jumps_to_top() {
    let mut g = grid();
    let r = g.set_sort(SortSpec::by("x", SortDirection::Asc));
    g.apply(full_block(&r[0], 1.0));
    let r = g.scroll_to(PageWindow::new(100, 120));
    g.apply(full_block(&r[0], 1.0));

    let before = g.generation();
    let r = g.reset();
    assert_eq!(g.generation(), before + 1);
    assert_eq!(g.sort(), &SortSpec::by("x", SortDirection::Asc));
    assert_eq!(g.viewport().start_row, 0);
    assert_eq!(r.len(), 1);
    assert_eq!(r[0].query.start_row, 0);
    assert!(g.row(100).is_none());
}

#[test]
fn failed_block_shows_failure_and_retries_on_scroll() {
    let mut g = grid();
    let r = g.start();
    g.apply(BlockOutcome::for_request(&r[0], Err(FleetError::Status { status: 502, message: "HTTP 502".into() })));
    assert!(matches!(g.view().row_slot(10), RowSlot::Failed(_)));
    assert!(g.row(10).is_none());

    let retry = g.scroll_to(PageWindow::new(0, 50));
    assert_eq!(retry.len(), 1);
    assert!(matches!(g.view().row_slot(10), RowSlot::Loading));
    g.apply(full_block(&retry[0], 1.0));
    assert!(matches!(g.view().row_slot(10), RowSlot::Loaded(_)));
}

#[test]
fn short_block_proves_end_of_data() {
    let mut g = grid();
    let r = g.start();
    g.apply(ok(&r[0], rows(0..30, 1.0), -1));
    assert_eq!(g.row_count(), RowCount::Exact(30));
    assert!(matches!(g.view().row_slot(30), RowSlot::BeyondData));
    // Nothing to fetch past the end.
    assert!(g.scroll_to(PageWindow::new(50, 100)).is_empty());
}

#[test]
fn full_block_after_refresh_lifts_inferred_end() {
    let mut g = grid();
    let r = g.start();
    g.apply(full_block(&r[0], 1.0));
    let r = g.scroll_to(PageWindow::new(100, 150));
    g.apply(ok(&r[0], rows(100..140, 1.0), -1));
    assert_eq!(g.view().total(), Some(140));

    // Upstream grew; the reloaded block comes back full.
    let reqs = g.refresh();
    let tail = reqs.iter().find(|q| q.block == 2).unwrap();
    assert!(g.apply(full_block(tail, 2.0)));
    assert_eq!(g.row_count(), RowCount::Unknown);
    let view = g.view();
    assert!(matches!(view.row_slot(145), RowSlot::Loaded(_)));
    assert_eq!(view.total(), None);

    let next = g.scroll_to(PageWindow::new(150, 200));
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].query.start_row, 150);
}

#[test]
fn failed_reload_labels_old_rows_and_retries_on_scroll() {
    let mut g = grid();
    let r = g.start();
    g.apply(full_block(&r[0], 1.0));

    let reload = g.refresh();
    assert!(g.apply(BlockOutcome::for_request(&reload[0], Err(FleetError::Timeout))));
    match g.view().row_slot(0) {
        RowSlot::Stale(row, err) => {
            assert_eq!(row.id(), Some(0));
            assert_eq!(err, "timeout");
        }
        other => panic!("expected stale row, got {:?}", other),
    }

    let retry = g.scroll_to(PageWindow::new(0, 50));
    assert_eq!(retry.len(), 1);
    assert!(matches!(g.view().row_slot(0), RowSlot::Stale(..)));
    assert!(g.scroll_to(PageWindow::new(0, 50)).is_empty());

    assert!(g.apply(full_block(&retry[0], 5.0)));
    assert_eq!(g.view().row(0).and_then(|r| r.get("x")), Some(&serde_json::json!(5.0)));
}

#[test]
fn non_visible_blocks_are_evicted_beyond_capacity() {
    let mut g = grid();
    let r = g.start();
    g.apply(full_block(&r[0], 1.0));
    for start in [50usize, 100, 150] {
        let r = g.scroll_to(PageWindow::new(start, start + 50));
        g.apply(full_block(&r[0], 1.0));
    }
    assert_eq!(g.cache().len(), 2);
    assert!(g.row(0).is_none());
    assert!(g.row(160).is_some());
    assert_eq!(g.cache().evicted(), 2);
}

#[test]
fn unsupported_sort_and_filter_columns_are_ignored() {
    let mut g = grid();
    g.start();
    let r = g.set_sort(SortSpec::by("vehiclesCount", SortDirection::Asc).then("x", SortDirection::Desc));
    assert_eq!(r[0].query.sort_model, SortSpec::by("x", SortDirection::Desc));
    let r = g.set_filter("x", FilterPredicate::text(fleet_core::query::TextOp::Contains, "1"));
    assert!(r[0].query.filter_model.is_empty());
}
