#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use fleet_api::FleetApi;
use fleet_core::query::{FilterPredicate, FilterSpec, PageWindow, SortSpec};
use fleet_core::{Collection, RefreshTarget, Row};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{BlockOutcome, BlockRequest, Grid, GridView};

/// Commands accepted by a running grid.
#[derive(Debug, Clone)]
pub enum GridCommand {
    Scroll(PageWindow),
    SetSort(SortSpec),
    SetFilterModel(FilterSpec),
    SetFilter(String, FilterPredicate),
    ClearFilters,
    Refresh,
    Reset,
    /// Hand the loaded row at this index to the edit sink.
    Edit(usize),
    Shutdown,
}

/// Control surface for a spawned grid. Cheap to clone; sends never block.
#[derive(Clone)]
pub struct GridHandle {
    tx: mpsc::UnboundedSender<GridCommand>,
}

impl GridHandle {
    fn send(&self, cmd: GridCommand) {
        if self.tx.send(cmd).is_err() {
            debug!("grid loop already stopped; command dropped");
        }
    }

    pub fn scroll_to(&self, window: PageWindow) { self.send(GridCommand::Scroll(window)) }
    pub fn set_sort(&self, sort: SortSpec) { self.send(GridCommand::SetSort(sort)) }
    pub fn set_filter_model(&self, filter: FilterSpec) { self.send(GridCommand::SetFilterModel(filter)) }

    pub fn set_filter(&self, col_id: impl Into<String>, pred: FilterPredicate) {
        self.send(GridCommand::SetFilter(col_id.into(), pred))
    }

    pub fn clear_filters(&self) { self.send(GridCommand::ClearFilters) }
    pub fn reset(&self) { self.send(GridCommand::Reset) }
    pub fn edit(&self, row_index: usize) { self.send(GridCommand::Edit(row_index)) }
    pub fn shutdown(&self) { self.send(GridCommand::Shutdown) }
}

impl RefreshTarget for GridHandle {
    fn refresh(&self) {
        self.send(GridCommand::Refresh)
    }
}

/// Read side: latest published view plus an epoch bumped on every publish.
#[derive(Clone)]
pub struct GridReader {
    view: Arc<ArcSwap<GridView>>,
    epoch_rx: watch::Receiver<u64>,
}

impl GridReader {
    pub fn current(&self) -> Arc<GridView> { self.view.load_full() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }

    /// Wait for the first published view satisfying `pred`.
    /// Returns `None` once the grid loop has stopped without reaching it.
    pub async fn wait_until(&self, pred: impl Fn(&GridView) -> bool) -> Option<Arc<GridView>> {
        let mut rx = self.epoch_rx.clone();
        loop {
            let v = self.view.load_full();
            if pred(&v) {
                return Some(v);
            }
            if rx.changed().await.is_err() {
                let v = self.view.load_full();
                return if pred(&v) { Some(v) } else { None };
            }
        }
    }
}

/// Run `grid` on its own task. Block fetches run concurrently and may finish
/// in any order; the grid discards the stale ones. Edit requests send the row
/// snapshot to `edits` when given.
pub fn spawn_grid(
    api: Arc<dyn FleetApi>,
    mut grid: Grid,
    edits: Option<mpsc::UnboundedSender<Row>>,
) -> (GridHandle, GridReader) {
    let (tx, mut rx) = mpsc::unbounded_channel::<GridCommand>();
    let initial = grid.start();
    let view = Arc::new(ArcSwap::from_pointee(grid.view()));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let view_clone = Arc::clone(&view);

    tokio::spawn(async move {
        let collection = grid.collection();
        let mut inflight: JoinSet<BlockOutcome> = JoinSet::new();
        let mut epoch = 0u64;
        let mut publish = |grid: &Grid| {
            epoch += 1;
            view_clone.store(Arc::new(grid.view()));
            let _ = epoch_tx.send(epoch);
        };

        info!(collection = %collection, block_size = grid.config().block_size, "grid loop started");
        for req in initial {
            launch(&mut inflight, Arc::clone(&api), collection, req);
        }

        loop {
            tokio::select! {
                cmd = rx.recv() => {
                    let reqs = match cmd {
                        None | Some(GridCommand::Shutdown) => break,
                        Some(GridCommand::Scroll(w)) => grid.scroll_to(w),
                        Some(GridCommand::SetSort(s)) => grid.set_sort(s),
                        Some(GridCommand::SetFilterModel(f)) => grid.set_filter_model(f),
                        Some(GridCommand::SetFilter(col, p)) => grid.set_filter(&col, p),
                        Some(GridCommand::ClearFilters) => grid.clear_filters(),
                        Some(GridCommand::Refresh) => grid.refresh(),
                        Some(GridCommand::Reset) => grid.reset(),
                        Some(GridCommand::Edit(i)) => {
                            match (grid.row(i), &edits) {
                                (Some(row), Some(sink)) => {
                                    if sink.send(row.clone()).is_err() {
                                        debug!(collection = %collection, "edit sink closed");
                                    }
                                }
                                (None, _) => debug!(collection = %collection, row = i, "edit ignored; row not loaded"),
                                (Some(_), None) => {}
                            }
                            continue;
                        }
                    };
                    for req in reqs {
                        launch(&mut inflight, Arc::clone(&api), collection, req);
                    }
                    publish(&grid);
                }
                Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                    match joined {
                        Ok(outcome) => {
                            if grid.apply(outcome) {
                                publish(&grid);
                            }
                        }
                        Err(e) => warn!(collection = %collection, error = %e, "block fetch task failed"),
                    }
                }
            }
        }
        // In-flight fetches are abandoned; nothing is applied after this point.
        inflight.abort_all();
        info!(collection = %collection, "grid loop stopped");
    });

    (GridHandle { tx }, GridReader { view, epoch_rx })
}

fn launch(set: &mut JoinSet<BlockOutcome>, api: Arc<dyn FleetApi>, collection: Collection, req: BlockRequest) {
    metrics::counter!("grid_block_fetch_total", 1);
    debug!(collection = %collection, block = req.block, window = %req.query.window(), "block fetch");
    set.spawn(async move {
        let t0 = Instant::now();
        let result = api.query_rows(collection, &req.query).await;
        metrics::histogram!("grid_block_fetch_ms", t0.elapsed().as_secs_f64() * 1000.0);
        if result.is_err() {
            metrics::counter!("grid_block_fetch_failed_total", 1);
        }
        BlockOutcome::for_request(&req, result)
    });
}
