//! Entity schemas.
//!
//! A schema describes a family of entities: where they live in the store,
//! which attribute holds their id, and which children each model owns.
//! Schemas replace per-entity subclasses; one `Model` type serves every
//! schema.

use crate::collection::Collection;
use crate::error::SyncResult;
use crate::model::Model;
use crate::resolver::{PathResolver, PathTemplate};
use livetree_store::Reference;
use std::fmt;
use std::sync::Arc;

/// Default name of the id attribute.
pub const DEFAULT_ID_ATTRIBUTE: &str = "id";

/// Builds a child collection for a freshly constructed model.
pub type ChildCollectionFactory = Arc<dyn Fn(&Model) -> SyncResult<Collection> + Send + Sync>;

/// Builds a child model for a freshly constructed model.
pub type ChildModelFactory = Arc<dyn Fn(&Model) -> SyncResult<Model> + Send + Sync>;

/// Customizes the base query a collection fetches from.
pub type QueryCustomizer = Arc<dyn Fn(Reference) -> Reference + Send + Sync>;

/// Describes a family of models.
#[derive(Clone)]
pub struct ModelSchema {
    pub(crate) id_attribute: String,
    pub(crate) path: Arc<dyn PathResolver>,
    pub(crate) child_collections: Vec<(String, ChildCollectionFactory)>,
    pub(crate) child_models: Vec<(String, ChildModelFactory)>,
}

impl ModelSchema {
    /// Creates a schema whose models live at `path`.
    pub fn new(path: impl PathResolver + 'static) -> Self {
        Self {
            id_attribute: DEFAULT_ID_ATTRIBUTE.to_string(),
            path: Arc::new(path),
            child_collections: Vec::new(),
            child_models: Vec::new(),
        }
    }

    /// Creates a schema from a path template such as `/users/{id}`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the template is malformed.
    pub fn from_template(template: &str) -> SyncResult<Self> {
        Ok(Self::new(PathTemplate::parse(template)?))
    }

    /// Sets the id attribute name.
    #[must_use]
    pub fn with_id_attribute(mut self, name: impl Into<String>) -> Self {
        self.id_attribute = name.into();
        self
    }

    /// Registers a child collection created with every model.
    #[must_use]
    pub fn with_child_collection(
        mut self,
        name: impl Into<String>,
        factory: impl Fn(&Model) -> SyncResult<Collection> + Send + Sync + 'static,
    ) -> Self {
        self.child_collections.push((name.into(), Arc::new(factory)));
        self
    }

    /// Registers a child model created with every model.
    #[must_use]
    pub fn with_child_model(
        mut self,
        name: impl Into<String>,
        factory: impl Fn(&Model) -> SyncResult<Model> + Send + Sync + 'static,
    ) -> Self {
        self.child_models.push((name.into(), Arc::new(factory)));
        self
    }

    /// Returns the id attribute name.
    pub fn id_attribute(&self) -> &str {
        &self.id_attribute
    }

    /// Returns the path resolver.
    pub fn path(&self) -> &dyn PathResolver {
        self.path.as_ref()
    }
}

impl fmt::Debug for ModelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSchema")
            .field("id_attribute", &self.id_attribute)
            .field(
                "child_collections",
                &self.child_collections.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .field(
                "child_models",
                &self.child_models.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

/// Describes a family of collections.
#[derive(Clone)]
pub struct CollectionSchema {
    pub(crate) path: Arc<dyn PathResolver>,
    pub(crate) model: Arc<ModelSchema>,
    pub(crate) base_query: Option<QueryCustomizer>,
}

impl CollectionSchema {
    /// Creates a schema for collections at `path` holding `model` members.
    pub fn new(path: impl PathResolver + 'static, model: Arc<ModelSchema>) -> Self {
        Self {
            path: Arc::new(path),
            model,
            base_query: None,
        }
    }

    /// Creates a schema from a path template such as `/attachments/{messageId}`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the template is malformed.
    pub fn from_template(template: &str, model: Arc<ModelSchema>) -> SyncResult<Self> {
        Ok(Self::new(PathTemplate::parse(template)?, model))
    }

    /// Customizes the base query fetches start from. Writes always target
    /// the unmodified collection location.
    #[must_use]
    pub fn with_base_query(
        mut self,
        customize: impl Fn(Reference) -> Reference + Send + Sync + 'static,
    ) -> Self {
        self.base_query = Some(Arc::new(customize));
        self
    }

    /// Returns the member schema.
    pub fn model(&self) -> &Arc<ModelSchema> {
        &self.model
    }

    /// Returns the path resolver.
    pub fn path(&self) -> &dyn PathResolver {
        self.path.as_ref()
    }
}

impl fmt::Debug for CollectionSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionSchema")
            .field("model", &self.model)
            .field("base_query", &self.base_query.is_some())
            .finish_non_exhaustive()
    }
}
