//! MergeView - fetched pages and pushed events as one ordered list
//!
//! Invariants of [`MergeView::items`]:
//! - every id appears at most once; a pushed copy still in the buffer is
//!   newer than the last fetch and shows until the next refetch replaces it
//! - sorted by timestamp, newest first; ties keep pushed-then-fetched order
//! - pushed items only enter while they match the active filter, and the
//!   push buffer is emptied whenever the filter changes

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashsync_core::MergeItem;

use crate::error::QueryError;

/// Default bound of the push buffer
pub const DEFAULT_MAX_PUSHED: usize = 100;

pub type FilterFn<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// What a consumer renders
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSnapshot<T> {
    pub items: Vec<T>,
    pub loading: bool,
    /// Last fetch error; previously fetched items stay in `items`
    pub error: Option<QueryError>,
}

impl<T> Default for MergeSnapshot<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: false,
            error: None,
        }
    }
}

pub struct MergeView<T: MergeItem> {
    fetched: Vec<T>,
    pushed: Vec<T>,
    filter: Option<FilterFn<T>>,
    max_pushed: usize,
    loading: bool,
    error: Option<QueryError>,
}

impl<T: MergeItem> Default for MergeView<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MergeItem> fmt::Debug for MergeView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeView")
            .field("fetched", &self.fetched.len())
            .field("pushed", &self.pushed.len())
            .field("filtered", &self.filter.is_some())
            .field("max_pushed", &self.max_pushed)
            .field("loading", &self.loading)
            .field("error", &self.error)
            .finish()
    }
}

impl<T: MergeItem> MergeView<T> {
    pub fn new() -> Self {
        Self {
            fetched: Vec::new(),
            pushed: Vec::new(),
            filter: None,
            max_pushed: DEFAULT_MAX_PUSHED,
            loading: false,
            error: None,
        }
    }

    pub fn with_max_pushed(mut self, max_pushed: usize) -> Self {
        self.max_pushed = max_pushed;
        self
    }

    /// Replace the authoritative items
    ///
    /// Pushed copies of ids now present in the fetch are dropped, and a
    /// previous fetch error is cleared.
    pub fn set_fetched(&mut self, items: Vec<T>) {
        let ids: HashSet<T::Id> = items.iter().map(MergeItem::id).collect();
        self.pushed.retain(|item| !ids.contains(&item.id()));
        self.fetched = items;
        self.error = None;
    }

    /// Record a failed fetch without touching the visible items
    pub fn set_error(&mut self, error: QueryError) {
        self.error = Some(error);
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    /// Add a pushed item; returns `false` when the filter rejects it
    ///
    /// A later push of the same id replaces the earlier one. When the buffer
    /// is full the oldest pushed item is dropped.
    pub fn push(&mut self, item: T) -> bool {
        if !self.accepts(&item) {
            return false;
        }

        let id = item.id();
        match self.pushed.iter().position(|existing| existing.id() == id) {
            Some(index) => self.pushed[index] = item,
            None => self.pushed.push(item),
        }

        if self.pushed.len() > self.max_pushed {
            if let Some(oldest) = self
                .pushed
                .iter()
                .enumerate()
                .min_by_key(|(_, item)| item.timestamp_ms())
                .map(|(index, _)| index)
            {
                self.pushed.remove(oldest);
            }
        }
        true
    }

    /// Change the filter and empty the push buffer
    pub fn set_filter(&mut self, filter: FilterFn<T>) {
        self.filter = Some(filter);
        self.pushed.clear();
    }

    pub fn clear_filter(&mut self) {
        self.filter = None;
        self.pushed.clear();
    }

    /// Drop fetched and pushed items alike
    pub fn reset(&mut self) {
        self.fetched.clear();
        self.pushed.clear();
        self.error = None;
    }

    pub fn accepts(&self, item: &T) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(item))
    }

    /// The merged, deduplicated, newest-first list
    ///
    /// [`MergeView::set_fetched`] prunes pushed ids it covers, so whatever is
    /// left in the push buffer takes priority over the fetched copy.
    pub fn items(&self) -> Vec<T> {
        let mut seen: HashSet<T::Id> = HashSet::with_capacity(self.fetched.len());
        let mut merged: Vec<T> = Vec::with_capacity(self.fetched.len() + self.pushed.len());

        for item in self.pushed.iter().chain(self.fetched.iter()) {
            if seen.insert(item.id()) {
                merged.push(item.clone());
            }
        }

        merged.sort_by_key(|item| std::cmp::Reverse(item.timestamp_ms()));
        merged
    }

    pub fn snapshot(&self) -> MergeSnapshot<T> {
        MergeSnapshot {
            items: self.items(),
            loading: self.loading,
            error: self.error.clone(),
        }
    }

    pub fn error(&self) -> Option<&QueryError> {
        self.error.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn fetched_len(&self) -> usize {
        self.fetched.len()
    }

    pub fn pushed_len(&self) -> usize {
        self.pushed.len()
    }
}
