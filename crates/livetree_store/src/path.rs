//! Store paths and key ordering.

use crate::error::{StoreError, StoreResult};
use std::cmp::Ordering;
use std::fmt;

/// Characters a path segment may not contain.
const FORBIDDEN: &[char] = &['.', '#', '$', '[', ']'];

/// A normalized, slash-separated location in the store tree.
///
/// The root is the empty path and displays as `/`. Duplicate, leading and
/// trailing slashes are collapsed when parsing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// Returns the root path.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a path, validating every segment.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if a segment contains a character
    /// the store does not allow in keys.
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let mut segments = Vec::new();
        for segment in raw.split('/').filter(|s| !s.is_empty()) {
            validate_segment(segment, raw)?;
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// Returns the path of a descendant. `relative` may contain slashes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if `relative` is not a valid path.
    pub fn child(&self, relative: &str) -> StoreResult<Self> {
        let tail = Self::parse(relative)?;
        let mut segments = self.segments.clone();
        segments.extend(tail.segments);
        Ok(Self { segments })
    }

    /// Returns the parent path, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    /// Returns the last segment, or `None` for the root.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Returns the path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns true if this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns true if `self` equals `other` or lies below it.
    #[must_use]
    pub fn starts_with(&self, other: &StorePath) -> bool {
        self.segments.len() >= other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

fn validate_segment(segment: &str, raw: &str) -> StoreResult<()> {
    if segment.contains(FORBIDDEN) || segment.chars().any(char::is_control) {
        return Err(StoreError::InvalidPath(raw.to_string()));
    }
    Ok(())
}

/// Compares two child keys in store order.
///
/// Keys that parse as 32-bit integers sort first, numerically. All other keys
/// follow in lexicographic order.
#[must_use]
pub fn compare_keys(a: &str, b: &str) -> Ordering {
    match (as_int_key(a), as_int_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn as_int_key(key: &str) -> Option<i32> {
    // "01" and "+1" are strings to the store, not integers
    if key.starts_with('+') || (key.len() > 1 && key.starts_with('0')) || key == "-0" {
        return None;
    }
    key.parse::<i32>().ok()
}
