//! Fleet picker: typeahead resolution of free text to one referenced record.
//!
//! Only a label that exactly matches a server suggestion commits an id; any
//! other text commits a null-id selection. Suggestion fetches are debounced
//! by the driver and tagged with a sequence number so an older response never
//! replaces a newer one.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use fleet_core::selection::{ReferenceKind, Selection};
use fleet_core::Row;
use tracing::debug;

mod driver;

pub use driver::{spawn_picker, PickerCommand, PickerHandle, PickerReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickerConfig {
    pub debounce: Duration,
    /// Suggestions requested per fetch.
    pub limit: usize,
}

impl Default for PickerConfig {
    fn default() -> Self {
        Self { debounce: Duration::from_millis(300), limit: 20 }
    }
}

impl PickerConfig {
    /// `FLEET_DEBOUNCE_MS`, `FLEET_SEARCH_LIMIT`.
    pub fn from_env() -> Self {
        let debounce_ms = std::env::var("FLEET_DEBOUNCE_MS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(300);
        let limit = std::env::var("FLEET_SEARCH_LIMIT").ok().and_then(|s| s.parse::<usize>().ok()).unwrap_or(20);
        Self { debounce: Duration::from_millis(debounce_ms), limit: limit.max(1) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerState {
    Unset,
    Typing,
    Matched,
    Unmatched,
}

/// A suggestion fetch to run; `seq` identifies the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub seq: u64,
    pub query: String,
}

/// Snapshot published to renderers.
#[derive(Debug, Clone, PartialEq)]
pub struct PickerView {
    pub text: String,
    pub state: PickerState,
    pub selection: Selection,
    pub suggestions: Arc<[Row]>,
    pub loading: bool,
    pub touched: bool,
    pub invalid: bool,
    pub description: String,
}

pub struct Picker {
    kind: ReferenceKind,
    required: bool,
    touched: bool,
    text: String,
    state: PickerState,
    selection: Selection,
    suggestions: Arc<[Row]>,
    last_seq: u64,
    loading: bool,
}

impl Picker {
    pub fn new(kind: ReferenceKind, required: bool) -> Self {
        Self {
            kind,
            required,
            touched: false,
            text: String::new(),
            state: PickerState::Unset,
            selection: Selection::cleared(&kind),
            suggestions: Arc::from(Vec::new()),
            last_seq: 0,
            loading: false,
        }
    }

    pub fn kind(&self) -> &ReferenceKind { &self.kind }
    pub fn text(&self) -> &str { &self.text }
    pub fn state(&self) -> PickerState { self.state }
    pub fn selection(&self) -> &Selection { &self.selection }
    pub fn suggestions(&self) -> &[Row] { &self.suggestions }
    pub fn is_loading(&self) -> bool { self.loading }
    pub fn is_touched(&self) -> bool { self.touched }

    /// Eager fetch with an empty query.
    pub fn mount(&mut self) -> SearchRequest {
        self.begin_fetch(String::new())
    }

    /// User edited the text. Returns the query the next debounced fetch will use.
    pub fn input(&mut self, text: impl Into<String>) -> String {
        self.text = text.into();
        self.state = PickerState::Typing;
        self.query()
    }

    /// Debounce key: the trimmed text.
    pub fn query(&self) -> String {
        self.text.trim().to_string()
    }

    pub fn begin_fetch(&mut self, query: String) -> SearchRequest {
        self.last_seq += 1;
        self.loading = true;
        SearchRequest { seq: self.last_seq, query }
    }

    /// Replace suggestions when `seq` is the newest fetch. Returns false otherwise.
    pub fn apply_suggestions(&mut self, seq: u64, rows: Vec<Row>) -> bool {
        if seq != self.last_seq {
            debug!(collection = %self.kind.collection, seq, latest = self.last_seq, "dropping stale suggestions");
            return false;
        }
        self.loading = false;
        self.suggestions = Arc::from(rows);
        true
    }

    /// Focus left the field: resolve the raw text against the latest suggestions
    /// and return the selection to commit.
    pub fn blur(&mut self) -> Selection {
        self.touched = true;
        let hit = self.suggestions.iter().find(|r| {
            let label = self.kind.label(r);
            !label.is_empty() && label == self.text
        });
        match hit {
            Some(row) => {
                self.selection = Selection::from_row(&self.kind, row);
                self.state = PickerState::Matched;
            }
            None => {
                self.selection = Selection::cleared(&self.kind);
                self.state = if self.text.trim().is_empty() { PickerState::Unset } else { PickerState::Unmatched };
            }
        }
        self.selection.clone()
    }

    /// External value changed: re-sync text and selection. `touched` is kept.
    pub fn set_value(&mut self, value: Selection) {
        self.text = self.kind.selection_label(&value);
        self.state = if value.is_committed() { PickerState::Matched } else { PickerState::Unset };
        self.selection = if value.is_committed() { value } else { Selection::cleared(&self.kind) };
    }

    pub fn is_invalid(&self) -> bool {
        self.required && self.touched && !self.selection.is_committed()
    }

    pub fn description(&self) -> String {
        match (self.state, self.selection.id) {
            (PickerState::Matched, Some(id)) => format!("selected id = {}", id),
            _ if self.loading => "loading…".to_string(),
            (PickerState::Unmatched, _) => "pick a value from the suggestions".to_string(),
            _ if self.is_invalid() => "required".to_string(),
            _ => String::new(),
        }
    }

    /// Rank the current suggestions against the raw text while a fetch is pending.
    pub fn preview(&self) -> Vec<(Row, i64)> {
        let q = self.text.trim();
        if q.is_empty() {
            return self.suggestions.iter().map(|r| (r.clone(), 0)).collect();
        }
        let matcher = SkimMatcherV2::default();
        let mut scored: Vec<(Row, i64)> = self
            .suggestions
            .iter()
            .filter_map(|r| matcher.fuzzy_match(&self.kind.label(r), q).map(|s| (r.clone(), s)))
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored
    }

    pub fn view(&self) -> PickerView {
        PickerView {
            text: self.text.clone(),
            state: self.state,
            selection: self.selection.clone(),
            suggestions: Arc::clone(&self.suggestions),
            loading: self.loading,
            touched: self.touched,
            invalid: self.is_invalid(),
            description: self.description(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn picker_with(rows: Vec<serde_json::Value>) -> Picker {
        let mut p = Picker::new(ReferenceKind::COORDINATES, true);
        let req = p.mount();
        p.apply_suggestions(req.seq, rows.into_iter().map(Row::from).collect());
        p
    }

    #[test]
    fn older_fetch_cannot_overwrite_newer_suggestions() {
        let mut p = Picker::new(ReferenceKind::COORDINATES, false);
        let a = p.begin_fetch("1".into());
        let b = p.begin_fetch("10".into());
        assert!(p.apply_suggestions(b.seq, vec![Row::from(json!({"id": 2, "x": 10, "y": 1}))]));
        assert!(!p.apply_suggestions(a.seq, vec![]));
        assert_eq!(p.suggestions().len(), 1);
        assert!(!p.is_loading());
    }

    #[test]
    fn preview_ranks_by_label() {
        let mut p = picker_with(vec![json!({"id": 1, "x": 3, "y": 4}), json!({"id": 2, "x": 10, "y": 20})]);
        p.input("10, 2");
        let ranked = p.preview();
        assert_eq!(ranked.first().and_then(|(r, _)| r.id()), Some(2));
    }

    #[test]
    fn set_value_supersedes_unmatched() {
        let mut p = picker_with(vec![]);
        p.input("nope");
        p.blur();
        assert_eq!(p.state(), PickerState::Unmatched);
        assert!(p.is_invalid());
        let row = Row::from(json!({"id": 7, "x": 1.5, "y": 2}));
        p.set_value(Selection::from_row(&ReferenceKind::COORDINATES, &row));
        assert_eq!(p.state(), PickerState::Matched);
        assert_eq!(p.text(), "1.5, 2");
        assert!(!p.is_invalid());
        assert_eq!(p.description(), "selected id = 7");
    }

    #[test]
    fn blank_blur_is_unset_and_invalid_when_required() {
        let mut p = picker_with(vec![json!({"id": 1, "x": 3, "y": 4})]);
        assert!(!p.is_invalid());
        p.input("   ");
        let sel = p.blur();
        assert_eq!(sel.id, None);
        assert_eq!(p.state(), PickerState::Unset);
        assert!(p.is_invalid());
    }
}
