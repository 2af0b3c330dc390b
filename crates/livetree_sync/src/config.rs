//! Configuration for synced entities and their operations.

use livetree_store::StoreHandle;
use std::collections::BTreeMap;

/// Named values available to path templates, e.g. a parent id.
pub type PathParams = BTreeMap<String, String>;

/// Sort direction for paginated fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Ascending key order, paging from the first key.
    #[default]
    Asc,
    /// Descending key order, paging from the last key.
    Desc,
}

/// Options every synced entity is constructed with.
///
/// The store handle is mandatory: there is no process-wide default store.
#[derive(Debug, Clone)]
pub struct EntityOptions {
    /// Store the entity reads from and writes to.
    pub store: StoreHandle,
    /// Parameters for the entity's path template.
    pub params: PathParams,
    /// Stamp a server `created` timestamp on create (and on update when absent).
    pub stamp_created: bool,
    /// Stamp a server `modified` timestamp on every write.
    pub stamp_modified: bool,
}

impl EntityOptions {
    /// Creates options for `store` with timestamping enabled.
    pub fn new(store: StoreHandle) -> Self {
        Self {
            store,
            params: PathParams::new(),
            stamp_created: true,
            stamp_modified: true,
        }
    }

    /// Adds a path parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Replaces all path parameters.
    #[must_use]
    pub fn with_params(mut self, params: PathParams) -> Self {
        self.params = params;
        self
    }

    /// Sets whether `created` is stamped.
    #[must_use]
    pub fn stamp_created(mut self, value: bool) -> Self {
        self.stamp_created = value;
        self
    }

    /// Sets whether `modified` is stamped.
    #[must_use]
    pub fn stamp_modified(mut self, value: bool) -> Self {
        self.stamp_modified = value;
        self
    }
}

/// Options for a collection fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Page size; `None` or `Some(0)` fetches the full range.
    pub page_size: Option<u32>,
    /// Paging direction.
    pub order: SortOrder,
}

impl FetchOptions {
    /// Creates options for an unpaginated ascending fetch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Sets the paging direction.
    #[must_use]
    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// Returns the effective page size, `None` when pagination is disabled.
    pub fn effective_page_size(&self) -> Option<usize> {
        self.page_size.filter(|&n| n > 0).map(|n| n as usize)
    }
}

/// Per-call overrides of an entity's timestamping defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Overrides [`EntityOptions::stamp_created`].
    pub stamp_created: Option<bool>,
    /// Overrides [`EntityOptions::stamp_modified`].
    pub stamp_modified: Option<bool>,
}

impl WriteOptions {
    /// Creates options that use the entity defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Disables all timestamping for this call.
    pub fn without_timestamps() -> Self {
        Self {
            stamp_created: Some(false),
            stamp_modified: Some(false),
        }
    }

    /// Overrides `created` stamping.
    #[must_use]
    pub fn stamp_created(mut self, value: bool) -> Self {
        self.stamp_created = Some(value);
        self
    }

    /// Overrides `modified` stamping.
    #[must_use]
    pub fn stamp_modified(mut self, value: bool) -> Self {
        self.stamp_modified = Some(value);
        self
    }

    /// Resolves the effective `(created, modified)` flags against defaults.
    pub(crate) fn resolve(&self, defaults: &EntityOptions) -> (bool, bool) {
        (
            self.stamp_created.unwrap_or(defaults.stamp_created),
            self.stamp_modified.unwrap_or(defaults.stamp_modified),
        )
    }
}
