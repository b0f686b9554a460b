//! Store builder
//!
//! Chooses between an in-memory store and one persisted to an append-only
//! file, and injects the [`Config`].

use crate::error::Result;
use crate::store::GeoStore;
use crate::types::{Config, IndexBackend};
use std::path::PathBuf;

/// Builder for [`GeoStore`] instances.
///
/// By default the store is in-memory with [`Config::default`].
///
/// # Examples
///
/// ## Persistent store
/// ```rust
/// use geostore::{Geometry, Point, StoreBuilder};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let temp_path = std::env::temp_dir().join("geostore_builder_doc.aof");
/// # let _ = std::fs::remove_file(&temp_path);
/// let store = StoreBuilder::new()
///     .aof_path(&temp_path)
///     .build()?;
///
/// store.insert("depot", Geometry::Point(Point::from_lat_lon(52.52, 13.40)), None)?;
/// store.close()?;
/// # std::fs::remove_file(temp_path)?;
/// # Ok(())
/// # }
/// ```
///
/// ## Full configuration
/// ```rust
/// use geostore::{Config, IndexBackend, StoreBuilder, SyncPolicy};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::default()
///     .with_index_backend(IndexBackend::RStar)
///     .with_sync_policy(SyncPolicy::Always);
///
/// let store = StoreBuilder::new().in_memory().config(config).build()?;
/// assert!(store.is_empty()?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StoreBuilder {
    aof_path: Option<PathBuf>,
    config: Config,
    in_memory: bool,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self {
            aof_path: None,
            config: Config::default(),
            in_memory: true,
        }
    }

    /// Persist every mutation to `path`. An existing file is replayed on
    /// [`StoreBuilder::build`].
    pub fn aof_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.aof_path = Some(path.into());
        self.in_memory = false;
        self
    }

    /// Keep everything in memory; clears any AOF path.
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self.aof_path = None;
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Shorthand for setting [`Config::index_backend`]
    pub fn index_backend(mut self, backend: IndexBackend) -> Self {
        self.config.index_backend = backend;
        self
    }

    /// Build the store, replaying the AOF when persistence is enabled.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for unusable R-tree branching, `Io` when the AOF
    /// cannot be opened, `Serialization` when it holds a corrupt frame.
    pub fn build(self) -> Result<GeoStore> {
        match self.aof_path {
            Some(path) if !self.in_memory => GeoStore::open_with_config(path, self.config),
            _ => GeoStore::with_config(self.config),
        }
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
