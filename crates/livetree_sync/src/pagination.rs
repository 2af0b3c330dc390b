//! Cursor-based pagination over key-ordered queries.
//!
//! The first page is `limit_to_first(n)` (ascending) or `limit_to_last(n)`
//! (descending) on the key-ordered base reference. Each following page is
//! anchored on the last loaded key with `start_at` / `end_at`. Range bounds
//! are inclusive, so the anchor key comes back again: the next page asks
//! for `n + 1` children and the caller drops keys it already holds. A store
//! with exclusive bounds would need the `+ 1` removed.

use crate::config::{FetchOptions, SortOrder};
use livetree_store::Reference;

/// Parameters of the last fetch, consumed by `load_more`.
#[derive(Debug, Clone)]
pub struct QueryState {
    /// The unwindowed base reference the pages are derived from.
    pub query: Reference,
    /// Page size, `None` when the fetch was not paginated.
    pub page_size: Option<usize>,
    /// Paging direction.
    pub order: SortOrder,
    /// Whether listeners are currently bound for this query.
    pub bound: bool,
}

/// Outcome of loading a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageResult {
    /// Number of models the page added locally.
    pub new_items: usize,
    /// Whether another page may exist.
    pub more_to_load: bool,
    /// Local length before the page was loaded.
    pub previous_len: usize,
}

impl PageResult {
    /// The result reported when there is nothing to load.
    pub fn exhausted(previous_len: usize) -> Self {
        Self {
            new_items: 0,
            more_to_load: false,
            previous_len,
        }
    }
}

/// Builds the first-page query for `base`.
///
/// Without a positive page size the base reference is returned unchanged.
pub fn start_query(base: &Reference, options: &FetchOptions) -> Reference {
    match options.effective_page_size() {
        Some(page_size) => {
            let ordered = base.order_by_key();
            match options.order {
                SortOrder::Asc => ordered.limit_to_first(page_size),
                SortOrder::Desc => ordered.limit_to_last(page_size),
            }
        }
        None => base.clone(),
    }
}

/// Builds the query for the page after `last_loaded_key`.
///
/// `last_loaded_key` is `None` when nothing is loaded yet, in which case
/// the page starts from the edge of the range.
pub fn next_page_query(
    base: &Reference,
    page_size: usize,
    order: SortOrder,
    last_loaded_key: Option<&str>,
) -> Reference {
    let fetch_size = page_size + 1;
    let ordered = base.order_by_key();
    match order {
        SortOrder::Asc => match last_loaded_key {
            Some(key) => ordered.start_at(key),
            None => ordered,
        }
        .limit_to_first(fetch_size),
        SortOrder::Desc => match last_loaded_key {
            Some(key) => ordered.end_at(key),
            None => ordered,
        }
        .limit_to_last(fetch_size),
    }
}

/// Tracks fetch and pagination progress for one collection.
#[derive(Debug, Clone, Default)]
pub struct Pagination {
    state: Option<QueryState>,
    more_to_load: bool,
}

impl Pagination {
    /// Creates a tracker for a collection that was never fetched.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fetch and returns the first-page query.
    ///
    /// Unpaginated fetches load the full range, so they leave nothing
    /// for `load_more`.
    pub fn begin(&mut self, base: Reference, options: &FetchOptions) -> Reference {
        let query = start_query(&base, options);
        let page_size = options.effective_page_size();
        self.more_to_load = page_size.is_some();
        self.state = Some(QueryState {
            query: base,
            page_size,
            order: options.order,
            bound: true,
        });
        query
    }

    /// Returns the next-page query and its page size, or `None` if the
    /// collection was never fetched or pagination is exhausted.
    pub fn next(&mut self, last_loaded_key: Option<&str>) -> Option<(Reference, usize)> {
        if !self.more_to_load {
            return None;
        }
        let state = self.state.as_mut()?;
        let page_size = state.page_size?;
        state.bound = true;
        Some((
            next_page_query(&state.query, page_size, state.order, last_loaded_key),
            page_size,
        ))
    }

    /// Records a loaded page and reports whether more remain.
    pub fn finish_page(&mut self, page_size: usize, previous_len: usize, len: usize) -> PageResult {
        let new_items = len.saturating_sub(previous_len);
        self.more_to_load = new_items == page_size;
        PageResult {
            new_items,
            more_to_load: self.more_to_load,
            previous_len,
        }
    }

    /// Marks the current query's listeners as released.
    pub fn unbind(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.bound = false;
        }
    }

    /// Returns true once a fetch has been issued.
    pub fn fetched(&self) -> bool {
        self.state.is_some()
    }

    /// Returns true if another page may exist.
    pub fn more_to_load(&self) -> bool {
        self.more_to_load
    }

    /// Returns the last-used query parameters.
    pub fn state(&self) -> Option<&QueryState> {
        self.state.as_ref()
    }

    /// Returns the paging direction of the last fetch (ascending if none).
    pub fn order(&self) -> SortOrder {
        self.state
            .as_ref()
            .map_or(SortOrder::Asc, |state| state.order)
    }
}
