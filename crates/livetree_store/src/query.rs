//! Query specifications and window evaluation.

use crate::path::{compare_keys, StorePath};
use serde_json::Value;
use std::cmp::Ordering;

/// A limit applied to an ordered query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Limit {
    /// Keep the first `n` children of the range.
    First(usize),
    /// Keep the last `n` children of the range.
    Last(usize),
}

/// The location and windowing parameters of a query.
///
/// The window of a query is the list of children under `path`, sorted by key,
/// restricted to `start_at <= key <= end_at` and then truncated by `limit`.
/// Both bounds are inclusive.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuerySpec {
    /// Location whose children the query observes.
    pub path: StorePath,
    /// Whether `order_by_key` was requested.
    pub order_by_key: bool,
    /// Inclusive lower key bound.
    pub start_at: Option<String>,
    /// Inclusive upper key bound.
    pub end_at: Option<String>,
    /// Limit applied after the range filter.
    pub limit: Option<Limit>,
}

impl QuerySpec {
    /// Creates an unrestricted query at `path`.
    #[must_use]
    pub fn at(path: StorePath) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }

    /// Returns true if any ordering or windowing is applied.
    #[must_use]
    pub fn is_windowed(&self) -> bool {
        self.start_at.is_some() || self.end_at.is_some() || self.limit.is_some()
    }

    /// Returns true if `key` falls inside the range bounds.
    #[must_use]
    pub fn in_range(&self, key: &str) -> bool {
        let above = self
            .start_at
            .as_deref()
            .map_or(true, |start| compare_keys(key, start) != Ordering::Less);
        let below = self
            .end_at
            .as_deref()
            .map_or(true, |end| compare_keys(key, end) != Ordering::Greater);
        above && below
    }

    /// Evaluates the window over the value stored at `self.path`.
    ///
    /// Non-object values have no children and yield an empty window.
    #[must_use]
    pub fn window(&self, node: Option<&Value>) -> Vec<(String, Value)> {
        let Some(Value::Object(children)) = node else {
            return Vec::new();
        };
        let mut entries: Vec<(String, Value)> = children
            .iter()
            .filter(|(key, _)| self.in_range(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        entries.sort_by(|(a, _), (b, _)| compare_keys(a, b));

        match self.limit {
            Some(Limit::First(n)) => entries.truncate(n),
            Some(Limit::Last(n)) => {
                let skip = entries.len().saturating_sub(n);
                entries.drain(..skip);
            }
            None => {}
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> Value {
        json!({ "m3": 3, "m1": 1, "m5": 5, "m2": 2, "m4": 4 })
    }

    fn keys(window: &[(String, Value)]) -> Vec<&str> {
        window.iter().map(|(k, _)| k.as_str()).collect()
    }

    #[test]
    fn unrestricted_window_is_key_ordered() {
        let query = QuerySpec::at(StorePath::root());
        let data = data();
        assert_eq!(
            keys(&query.window(Some(&data))),
            vec!["m1", "m2", "m3", "m4", "m5"]
        );
    }

    #[test]
    fn bounds_are_inclusive() {
        let mut query = QuerySpec::at(StorePath::root());
        query.start_at = Some("m2".into());
        query.end_at = Some("m4".into());
        let data = data();
        assert_eq!(keys(&query.window(Some(&data))), vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn limits_keep_head_or_tail() {
        let data = data();
        let mut query = QuerySpec::at(StorePath::root());
        query.limit = Some(Limit::First(2));
        assert_eq!(keys(&query.window(Some(&data))), vec!["m1", "m2"]);

        query.limit = Some(Limit::Last(2));
        assert_eq!(keys(&query.window(Some(&data))), vec!["m4", "m5"]);

        query.end_at = Some("m2".into());
        query.limit = Some(Limit::Last(3));
        assert_eq!(keys(&query.window(Some(&data))), vec!["m1", "m2"]);
    }

    #[test]
    fn scalar_or_missing_node_has_no_children() {
        let query = QuerySpec::at(StorePath::root());
        assert!(query.window(None).is_empty());
        assert!(query.window(Some(&json!(42))).is_empty());
    }
}
