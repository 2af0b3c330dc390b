//! Resolution of entity store paths.
//!
//! A resolver maps an entity's contextual parameters to a store path. It must
//! be deterministic and side-effect free: the same parameters always resolve
//! to the same path. Referencing a parameter that is not set is a
//! [`SyncError::Configuration`].

use crate::config::PathParams;
use crate::error::{SyncError, SyncResult};
use livetree_store::{Reference, StoreHandle};
use std::fmt;

/// Parameter name bound to the entity's own id.
pub const ID_PARAM: &str = "id";

/// The inputs available when resolving a path.
#[derive(Debug, Clone, Copy)]
pub struct PathContext<'a> {
    /// Parameters supplied at construction.
    pub params: &'a PathParams,
    /// The entity id, for models that have one.
    pub id: Option<&'a str>,
}

impl<'a> PathContext<'a> {
    /// Creates a context.
    pub fn new(params: &'a PathParams, id: Option<&'a str>) -> Self {
        Self { params, id }
    }

    /// Looks up a parameter; `id` falls back to the entity id.
    pub fn param(&self, name: &str) -> Option<&'a str> {
        self.params
            .get(name)
            .map(String::as_str)
            .or_else(|| (name == ID_PARAM).then_some(self.id).flatten())
    }

    /// Looks up a parameter that must be present.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the missing parameter.
    pub fn require(&self, name: &str) -> SyncResult<&'a str> {
        self.param(name)
            .ok_or_else(|| SyncError::configuration(format!("missing path parameter `{name}`")))
    }
}

/// Strategy mapping a [`PathContext`] to a store path.
pub trait PathResolver: Send + Sync {
    /// Computes the path.
    fn resolve(&self, ctx: &PathContext<'_>) -> SyncResult<String>;
}

impl<F> PathResolver for F
where
    F: Fn(&PathContext<'_>) -> SyncResult<String> + Send + Sync,
{
    fn resolve(&self, ctx: &PathContext<'_>) -> SyncResult<String> {
        self(ctx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Param(String),
}

/// A path template such as `/attachments/{messageId}/{id}`.
#[derive(Clone, PartialEq, Eq)]
pub struct PathTemplate {
    source: String,
    pieces: Vec<Piece>,
}

impl PathTemplate {
    /// Parses a template.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unbalanced or empty placeholders.
    pub fn parse(source: &str) -> SyncResult<Self> {
        let mut pieces = Vec::new();
        let mut rest = source;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                pieces.push(Piece::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| {
                SyncError::configuration(format!("unclosed placeholder in `{source}`"))
            })?;
            let name = after[..close].trim();
            if name.is_empty() || name.contains('{') {
                return Err(SyncError::configuration(format!(
                    "invalid placeholder in `{source}`"
                )));
            }
            pieces.push(Piece::Param(name.to_string()));
            rest = &after[close + 1..];
        }
        if rest.contains('}') {
            return Err(SyncError::configuration(format!(
                "unopened placeholder in `{source}`"
            )));
        }
        if !rest.is_empty() {
            pieces.push(Piece::Literal(rest.to_string()));
        }
        Ok(Self {
            source: source.to_string(),
            pieces,
        })
    }

    /// Returns the placeholder names in order of appearance.
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.pieces.iter().filter_map(|piece| match piece {
            Piece::Param(name) => Some(name.as_str()),
            Piece::Literal(_) => None,
        })
    }
}

impl PathResolver for PathTemplate {
    fn resolve(&self, ctx: &PathContext<'_>) -> SyncResult<String> {
        let mut path = String::with_capacity(self.source.len());
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => path.push_str(text),
                Piece::Param(name) => path.push_str(ctx.require(name)?),
            }
        }
        Ok(path)
    }
}

impl fmt::Debug for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathTemplate").field(&self.source).finish()
    }
}

/// Resolves `resolver` against `ctx` and opens a reference in `store`.
///
/// # Errors
///
/// Returns a configuration error if a parameter is missing or the resolved
/// path is not a valid store path.
pub fn resolve_reference(
    store: &StoreHandle,
    resolver: &dyn PathResolver,
    ctx: &PathContext<'_>,
) -> SyncResult<Reference> {
    let path = resolver.resolve(ctx)?;
    store
        .reference(&path)
        .map_err(|err| SyncError::configuration(err.to_string()))
}
