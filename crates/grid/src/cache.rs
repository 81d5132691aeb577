#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use fleet_core::Row;
use rustc_hash::FxHashMap;

/// One fetched (or pending) block of rows.
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Rows from the last successful response for this block.
    pub rows: Option<Arc<[Row]>>,
    /// Request id the block is waiting on; any other id is stale.
    pub pending: Option<u64>,
    /// Last failure, cleared by the next successful response.
    pub error: Option<String>,
}

impl Block {
    pub fn pending(request_id: u64) -> Self {
        Self { rows: None, pending: Some(request_id), error: None }
    }

    /// Last fetch failed and no retry is in flight, whether or not old rows remain.
    pub fn is_failed(&self) -> bool {
        self.pending.is_none() && self.error.is_some()
    }
}

/// Bounded block map with least-recently-used ordering.
pub struct BlockCache {
    map: FxHashMap<usize, Block>,
    order: VecDeque<usize>,
    cap: usize,
    evicted: u64,
}

impl BlockCache {
    pub fn with_capacity(cap: usize) -> Self {
        Self { map: FxHashMap::default(), order: VecDeque::new(), cap: cap.max(1), evicted: 0 }
    }

    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }
    pub fn capacity(&self) -> usize { self.cap }
    pub fn evicted(&self) -> u64 { self.evicted }

    pub fn get(&self, idx: usize) -> Option<&Block> {
        self.map.get(&idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Block> {
        self.map.get_mut(&idx)
    }

    /// Insert or replace, marking the block most recently used.
    pub fn insert(&mut self, idx: usize, block: Block) {
        self.map.insert(idx, block);
        self.touch(idx);
    }

    pub fn touch(&mut self, idx: usize) {
        if !self.map.contains_key(&idx) {
            return;
        }
        if let Some(pos) = self.order.iter().position(|&i| i == idx) {
            self.order.remove(pos);
        }
        self.order.push_back(idx);
    }

    /// Block indices, least recently used first.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.order.iter().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Block)> + '_ {
        self.order.iter().filter_map(|i| self.map.get(i).map(|b| (*i, b)))
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    /// Drop least recently used blocks until within capacity, never touching
    /// blocks for which `visible` holds. Returns the dropped indices.
    pub fn evict(&mut self, visible: impl Fn(usize) -> bool) -> Vec<usize> {
        let mut dropped = Vec::new();
        while self.map.len() > self.cap {
            let Some(pos) = self.order.iter().position(|&i| !visible(i)) else { break };
            if let Some(idx) = self.order.remove(pos) {
                self.map.remove(&idx);
                self.evicted += 1;
                dropped.push(idx);
            }
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_non_visible_block() {
        let mut c = BlockCache::with_capacity(2);
        c.insert(0, Block::pending(1));
        c.insert(1, Block::pending(2));
        c.insert(2, Block::pending(3));
        c.touch(0);
        // order: 1, 2, 0; block 1 is visible so 2 goes
        assert_eq!(c.evict(|i| i == 1), vec![2]);
        assert_eq!(c.indices().collect::<Vec<_>>(), vec![1, 0]);
        assert_eq!(c.evicted(), 1);
    }

    #[test]
    fn visible_blocks_may_exceed_capacity() {
        let mut c = BlockCache::with_capacity(1);
        c.insert(3, Block::pending(1));
        c.insert(4, Block::pending(2));
        assert!(c.evict(|_| true).is_empty());
        assert_eq!(c.len(), 2);
    }
}
