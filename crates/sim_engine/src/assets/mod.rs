//! Collision model sourcing and caching
//!
//! The core never reads model files. It asks a [`MeshSource`] — supplied
//! by the embedding resource layer — for a [`Geometry`] by name, builds a
//! collision octree from it once, and shares that octree between every
//! entity instance using the model. A model that cannot be loaded or
//! converted degrades to bounding-sphere-only collision; the degradation
//! is logged and cached so a bad model costs one warning, not one per
//! spawn.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use thiserror::Error;

use crate::geometry::octree::{MeshOctree, OctreeBuildError};
use crate::geometry::Geometry;

/// Errors raised while sourcing a collision model
#[derive(Error, Debug)]
pub enum AssetError {
    /// No mesh is known under the requested name
    #[error("model not found: {0}")]
    NotFound(String),

    /// The mesh exists but could not become an octree
    #[error("failed to build collision model for '{name}'")]
    Build {
        /// Model name
        name: String,
        /// Underlying build failure
        #[source]
        source: OctreeBuildError,
    },
}

/// Narrow interface to the resource-loading layer
pub trait MeshSource {
    /// Produce the model-space geometry for a named model
    fn geometry_for(&self, name: &str) -> Result<Geometry, AssetError>;
}

/// An in-memory mesh source backed by a map. The test suites use it, and
/// it serves as the registration point for procedurally built models.
#[derive(Default)]
pub struct MapMeshSource {
    meshes: HashMap<String, Geometry>,
}

impl MapMeshSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a geometry under a name
    pub fn insert(&mut self, name: impl Into<String>, geometry: Geometry) {
        self.meshes.insert(name.into(), geometry);
    }
}

impl MeshSource for MapMeshSource {
    fn geometry_for(&self, name: &str) -> Result<Geometry, AssetError> {
        self.meshes
            .get(name)
            .cloned()
            .ok_or_else(|| AssetError::NotFound(name.to_string()))
    }
}

/// Cached collision octrees, one per distinct model name
///
/// A cache entry of `None` records a model that degraded to sphere-only
/// collision, so the failure path is remembered too.
pub struct ModelLibrary {
    octrees: HashMap<String, Option<Arc<MeshOctree>>>,
    max_depth: u32,
    min_radius: f32,
}

impl ModelLibrary {
    /// Create a library building octrees to the given depth bounds
    pub fn new(max_depth: u32, min_radius: f32) -> Self {
        Self {
            octrees: HashMap::new(),
            max_depth,
            min_radius,
        }
    }

    /// Fetch the shared octree for a model, building and caching it on
    /// first use. Returns `None` for models degraded to sphere collision.
    pub fn octree_for(&mut self, name: &str, source: &dyn MeshSource) -> Option<Arc<MeshOctree>> {
        if let Some(cached) = self.octrees.get(name) {
            return cached.clone();
        }

        let built = match source.geometry_for(name) {
            Ok(geometry) => match MeshOctree::build(&geometry, self.max_depth, self.min_radius) {
                Ok(octree) => Some(Arc::new(octree)),
                Err(err) => {
                    warn!("collision model '{name}' unusable ({err}); degrading to bounding sphere");
                    None
                }
            },
            Err(err) => {
                warn!("model '{name}' unavailable ({err}); using bounding-sphere placeholder");
                None
            }
        };

        self.octrees.insert(name.to_string(), built.clone());
        built
    }

    /// The cached octree for a model, without attempting a build
    pub fn cached(&self, name: &str) -> Option<Arc<MeshOctree>> {
        self.octrees.get(name).cloned().flatten()
    }

    /// Number of cache entries (including degraded ones)
    pub fn len(&self) -> usize {
        self.octrees.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.octrees.is_empty()
    }

    /// Forget all cached models (system teardown)
    pub fn clear(&mut self) {
        self.octrees.clear();
    }
}
