//! Fleet grid: remote paged rows behind a bounded block cache.
//!
//! `Grid` is a plain state machine. Every user action returns the block
//! requests it needs; the driver in `driver` executes them against a
//! `FleetApi` and feeds the outcomes back through `Grid::apply`. Each purge
//! bumps the generation, and every block remembers the id of the request it
//! waits on, so a response that no longer matches is dropped.

#![forbid(unsafe_code)]

use std::sync::Arc;

use fleet_api::{FleetError, FleetResult};
use fleet_core::columns::{find_column, ColumnDescriptor};
use fleet_core::query::{FilterPredicate, FilterSpec, PageWindow, QueryRequest, QueryResponse, SortSpec};
use fleet_core::{Collection, Row};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

mod cache;
mod driver;

pub use cache::{Block, BlockCache};
pub use driver::{spawn_grid, GridCommand, GridHandle, GridReader};

/// Block geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridConfig {
    /// Rows per block request.
    pub block_size: usize,
    /// Blocks kept besides the visible ones.
    pub max_blocks: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { block_size: 50, max_blocks: 2 }
    }
}

impl GridConfig {
    /// `FLEET_BLOCK_SIZE`, `FLEET_MAX_BLOCKS`.
    pub fn from_env() -> Self {
        let block_size = std::env::var("FLEET_BLOCK_SIZE").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(50);
        let max_blocks = std::env::var("FLEET_MAX_BLOCKS").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(2);
        Self { block_size: block_size.max(1), max_blocks: max_blocks.max(1) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCount {
    Unknown,
    Exact(usize),
}

impl RowCount {
    pub fn exact(&self) -> Option<usize> {
        match self {
            RowCount::Exact(n) => Some(*n),
            RowCount::Unknown => None,
        }
    }
}

/// A query the driver must run for one block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRequest {
    pub generation: u64,
    pub request_id: u64,
    pub block: usize,
    pub query: QueryRequest,
}

/// Result of running a `BlockRequest`, tagged with the same ids.
#[derive(Debug, Clone)]
pub struct BlockOutcome {
    pub generation: u64,
    pub request_id: u64,
    pub block: usize,
    pub result: FleetResult<QueryResponse>,
}

impl BlockOutcome {
    pub fn for_request(req: &BlockRequest, result: FleetResult<QueryResponse>) -> Self {
        Self { generation: req.generation, request_id: req.request_id, block: req.block, result }
    }
}

/// How a single row index should be drawn.
#[derive(Debug, Clone, PartialEq)]
pub enum RowSlot<'a> {
    Loaded(&'a Row),
    /// Previously loaded row whose reload failed.
    Stale(&'a Row, &'a str),
    Loading,
    Failed(&'a str),
    BeyondData,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockView {
    Loading,
    Loaded(Arc<[Row]>),
    /// Old rows kept after a failed reload, labelled with the error.
    Stale(Arc<[Row]>, String),
    Failed(String),
}

/// Immutable snapshot of the grid published to readers.
#[derive(Debug, Clone)]
pub struct GridView {
    pub collection: Collection,
    pub generation: u64,
    pub sort: SortSpec,
    pub filter: FilterSpec,
    pub viewport: PageWindow,
    pub row_count: RowCount,
    pub block_size: usize,
    pub columns: Arc<[ColumnDescriptor]>,
    pub blocks: FxHashMap<usize, BlockView>,
}

impl GridView {
    pub fn row_slot(&self, index: usize) -> RowSlot<'_> {
        if let RowCount::Exact(n) = self.row_count {
            if index >= n {
                return RowSlot::BeyondData;
            }
        }
        let bs = self.block_size.max(1);
        match self.blocks.get(&(index / bs)) {
            Some(BlockView::Loaded(rows)) => match rows.get(index % bs) {
                Some(row) => RowSlot::Loaded(row),
                None => RowSlot::BeyondData,
            },
            Some(BlockView::Stale(rows, e)) => match rows.get(index % bs) {
                Some(row) => RowSlot::Stale(row, e),
                None => RowSlot::Failed(e),
            },
            Some(BlockView::Failed(e)) => RowSlot::Failed(e),
            Some(BlockView::Loading) | None => RowSlot::Loading,
        }
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        match self.row_slot(index) {
            RowSlot::Loaded(r) => Some(r),
            _ => None,
        }
    }

    /// Total row count once the server or a short block has fixed it.
    pub fn total(&self) -> Option<usize> {
        self.row_count.exact()
    }

    /// Slots for every index of the viewport, in order.
    pub fn visible(&self) -> impl Iterator<Item = (usize, RowSlot<'_>)> + '_ {
        (self.viewport.start_row..self.viewport.end_row).map(move |i| (i, self.row_slot(i)))
    }

    /// True when no visible row is still waiting on a fetch.
    pub fn is_settled(&self) -> bool {
        self.visible().all(|(_, s)| !matches!(s, RowSlot::Loading))
    }
}

/// Remote paged grid over one collection.
pub struct Grid {
    collection: Collection,
    columns: Arc<[ColumnDescriptor]>,
    cfg: GridConfig,
    sort: SortSpec,
    filter: FilterSpec,
    viewport: PageWindow,
    row_count: RowCount,
    generation: u64,
    next_request: u64,
    cache: BlockCache,
}

impl Grid {
    /// Descriptors without a field or getter are kept but stay inert.
    pub fn new(collection: Collection, columns: Vec<ColumnDescriptor>, cfg: GridConfig) -> Self {
        for c in columns.iter().filter(|c| c.is_inert()) {
            debug!(collection = %collection, column = c.id, "column has no field or getter; rendering empty");
        }
        let cfg = GridConfig { block_size: cfg.block_size.max(1), max_blocks: cfg.max_blocks.max(1) };
        Self {
            collection,
            columns: Arc::from(columns),
            cfg,
            sort: SortSpec::none(),
            filter: FilterSpec::none(),
            viewport: PageWindow::new(0, cfg.block_size),
            row_count: RowCount::Unknown,
            generation: 0,
            next_request: 0,
            cache: BlockCache::with_capacity(cfg.max_blocks),
        }
    }

    pub fn collection(&self) -> Collection { self.collection }
    pub fn columns(&self) -> &[ColumnDescriptor] { &self.columns }
    pub fn config(&self) -> GridConfig { self.cfg }
    pub fn sort(&self) -> &SortSpec { &self.sort }
    pub fn filter(&self) -> &FilterSpec { &self.filter }
    pub fn viewport(&self) -> PageWindow { self.viewport }
    pub fn row_count(&self) -> RowCount { self.row_count }
    pub fn generation(&self) -> u64 { self.generation }
    pub fn cache(&self) -> &BlockCache { &self.cache }

    /// Requests for the initial window.
    pub fn start(&mut self) -> Vec<BlockRequest> {
        self.ensure_viewport()
    }

    /// Move the viewport; fetches blocks that are missing or failed.
    pub fn scroll_to(&mut self, window: PageWindow) -> Vec<BlockRequest> {
        self.viewport = window;
        let reqs = self.ensure_viewport();
        self.evict();
        reqs
    }

    pub fn set_sort(&mut self, sort: SortSpec) -> Vec<BlockRequest> {
        self.sort = self.sanitize_sort(sort);
        self.purge()
    }

    pub fn set_filter_model(&mut self, filter: FilterSpec) -> Vec<BlockRequest> {
        self.filter = self.sanitize_filter(filter);
        self.purge()
    }

    /// Replace the whole filter with a single predicate.
    pub fn set_filter(&mut self, col_id: &str, pred: FilterPredicate) -> Vec<BlockRequest> {
        self.set_filter_model(FilterSpec::single(col_id, pred))
    }

    /// Empty filter and sort, back to row 0.
    pub fn clear_filters(&mut self) -> Vec<BlockRequest> {
        self.filter = FilterSpec::none();
        self.sort = SortSpec::none();
        self.purge()
    }

    /// Re-fetch every materialized block in place. Rows stay visible until
    /// the new responses land; viewport, sort and filter are untouched.
    pub fn refresh(&mut self) -> Vec<BlockRequest> {
        if self.cache.is_empty() {
            return self.ensure_viewport();
        }
        let blocks: Vec<usize> = self.cache.indices().collect();
        let mut out = Vec::with_capacity(blocks.len());
        for b in blocks {
            let id = self.next_id();
            if let Some(block) = self.cache.get_mut(b) {
                block.pending = Some(id);
            }
            out.push(self.request(b, id));
        }
        debug!(collection = %self.collection, blocks = out.len(), "soft refresh");
        out
    }

    /// Hard refresh: same sort and filter, empty cache, back to row 0.
    pub fn reset(&mut self) -> Vec<BlockRequest> {
        self.purge()
    }

    /// Apply a fetch outcome. Returns false when it was stale and dropped.
    pub fn apply(&mut self, outcome: BlockOutcome) -> bool {
        let current = self.cache.get(outcome.block).and_then(|b| b.pending);
        if outcome.generation != self.generation || current != Some(outcome.request_id) {
            metrics::counter!("grid_stale_response_total", 1);
            debug!(
                collection = %self.collection,
                block = outcome.block,
                generation = outcome.generation,
                current_generation = self.generation,
                "dropping stale block response"
            );
            return false;
        }
        let bs = self.cfg.block_size;
        let start = outcome.block * bs;
        match outcome.result {
            Ok(resp) => {
                let got = resp.rows.len();
                match (resp.total(), self.row_count) {
                    (Some(n), _) => self.row_count = RowCount::Exact(n),
                    (None, _) if got < bs => self.row_count = RowCount::Exact(start + got),
                    // A full block reaching the inferred end means the data grew past it.
                    (None, RowCount::Exact(n)) if n <= start + got => self.row_count = RowCount::Unknown,
                    (None, _) => {}
                }
                if let Some(block) = self.cache.get_mut(outcome.block) {
                    block.rows = Some(Arc::from(resp.rows));
                    block.pending = None;
                    block.error = None;
                }
                debug!(collection = %self.collection, block = outcome.block, rows = got, row_count = ?self.row_count, "block loaded");
            }
            Err(e) => {
                warn!(collection = %self.collection, block = outcome.block, error = %e, "block fetch failed");
                if let Some(block) = self.cache.get_mut(outcome.block) {
                    block.pending = None;
                    block.error = Some(describe(&e));
                }
            }
        }
        self.evict();
        true
    }

    /// Loaded row at an absolute index.
    pub fn row(&self, index: usize) -> Option<&Row> {
        let bs = self.cfg.block_size;
        self.cache.get(index / bs)?.rows.as_ref()?.get(index % bs)
    }

    pub fn view(&self) -> GridView {
        let blocks = self
            .cache
            .iter()
            .map(|(i, b)| {
                let v = match (&b.rows, &b.error) {
                    (Some(rows), Some(e)) => BlockView::Stale(Arc::clone(rows), e.clone()),
                    (Some(rows), None) => BlockView::Loaded(Arc::clone(rows)),
                    (None, Some(e)) if b.pending.is_none() => BlockView::Failed(e.clone()),
                    _ => BlockView::Loading,
                };
                (i, v)
            })
            .collect();
        GridView {
            collection: self.collection,
            generation: self.generation,
            sort: self.sort.clone(),
            filter: self.filter.clone(),
            viewport: self.viewport,
            row_count: self.row_count,
            block_size: self.cfg.block_size,
            columns: Arc::clone(&self.columns),
            blocks,
        }
    }

    fn purge(&mut self) -> Vec<BlockRequest> {
        self.generation += 1;
        self.cache.clear();
        self.row_count = RowCount::Unknown;
        let len = self.viewport.len().max(self.cfg.block_size);
        self.viewport = PageWindow::new(0, len);
        debug!(collection = %self.collection, generation = self.generation, "cache purged");
        self.ensure_viewport()
    }

    fn visible_blocks(&self) -> std::ops::Range<usize> {
        let bs = self.cfg.block_size;
        let mut end = self.viewport.end_row;
        if let RowCount::Exact(n) = self.row_count {
            end = end.min(n);
        }
        if end <= self.viewport.start_row {
            return 0..0;
        }
        (self.viewport.start_row / bs)..((end - 1) / bs + 1)
    }

    fn ensure_viewport(&mut self) -> Vec<BlockRequest> {
        let mut out = Vec::new();
        for b in self.visible_blocks() {
            let id = match self.cache.get_mut(b) {
                None => {
                    let id = self.next_request + 1;
                    self.cache.insert(b, Block::pending(id));
                    Some(id)
                }
                // Failed blocks retry; stale rows stay on screen meanwhile.
                Some(block) if block.is_failed() => {
                    let id = self.next_request + 1;
                    block.pending = Some(id);
                    Some(id)
                }
                Some(_) => None,
            };
            match id {
                Some(id) => {
                    self.next_request = id;
                    self.cache.touch(b);
                    out.push(self.request(b, id));
                }
                None => self.cache.touch(b),
            }
        }
        out
    }

    fn evict(&mut self) {
        let visible = self.visible_blocks();
        for b in self.cache.evict(|i| visible.contains(&i)) {
            debug!(collection = %self.collection, block = b, "evicted block");
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_request += 1;
        self.next_request
    }

    fn request(&self, block: usize, request_id: u64) -> BlockRequest {
        let bs = self.cfg.block_size;
        let window = PageWindow::new(block * bs, (block + 1) * bs);
        BlockRequest {
            generation: self.generation,
            request_id,
            block,
            query: QueryRequest::new(window, &self.sort, &self.filter),
        }
    }

    fn sanitize_sort(&self, sort: SortSpec) -> SortSpec {
        let mut out = SortSpec::none();
        for key in sort.keys() {
            match find_column(&self.columns, &key.col_id) {
                Some(c) if c.can_sort() => out = out.then(key.col_id.clone(), key.direction),
                _ => debug!(collection = %self.collection, column = %key.col_id, "ignoring sort on non-sortable column"),
            }
        }
        out
    }

    fn sanitize_filter(&self, filter: FilterSpec) -> FilterSpec {
        let mut out = FilterSpec::none();
        for (col_id, pred) in filter.0 {
            match find_column(&self.columns, &col_id) {
                Some(c) if c.can_filter(&pred) => out = out.with(col_id, pred),
                _ => debug!(collection = %self.collection, column = %col_id, "ignoring filter the column does not support"),
            }
        }
        out
    }
}

fn describe(e: &FleetError) -> String {
    match e {
        FleetError::Status { status, message } => format!("{} ({})", message, status),
        other => other.to_string(),
    }
}
