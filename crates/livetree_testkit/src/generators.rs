//! Property-based test generators using proptest.

use livetree_sync::SortOrder;
use proptest::prelude::*;
use serde_json::{Map, Value};

/// Strategy for page sizes worth paginating with.
pub fn page_size_strategy() -> impl Strategy<Value = u32> {
    1u32..=6
}

/// Strategy for the number of seeded messages.
pub fn collection_size_strategy() -> impl Strategy<Value = usize> {
    0usize..=24
}

/// Strategy for paging directions.
pub fn sort_order_strategy() -> impl Strategy<Value = SortOrder> {
    prop_oneof![Just(SortOrder::Asc), Just(SortOrder::Desc)]
}

/// Strategy for valid store keys.
pub fn store_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_-]{1,12}").expect("Invalid regex")
}

/// Strategy for scalar attribute values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        prop::string::string_regex("[a-z ]{0,12}")
            .expect("Invalid regex")
            .prop_map(Value::from),
    ]
}

/// Strategy for non-empty attribute maps with scalar values.
pub fn attribute_map_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
        scalar_value_strategy(),
        1..6,
    )
    .prop_map(|attributes| attributes.into_iter().collect())
}

/// A pagination scenario.
#[derive(Debug, Clone, Copy)]
pub struct PaginationCase {
    /// Number of seeded messages.
    pub items: usize,
    /// Page size.
    pub page_size: u32,
    /// Paging direction.
    pub order: SortOrder,
}

impl PaginationCase {
    /// Number of non-empty pages a full pagination yields.
    pub fn expected_pages(&self) -> usize {
        self.items.div_ceil(self.page_size as usize)
    }
}

/// Strategy for pagination scenarios.
pub fn pagination_case_strategy() -> impl Strategy<Value = PaginationCase> {
    (
        collection_size_strategy(),
        page_size_strategy(),
        sort_order_strategy(),
    )
        .prop_map(|(items, page_size, order)| PaginationCase {
            items,
            page_size,
            order,
        })
}
