use crate::error::{GeoStoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique handle of a stored geometry. Issued monotonically, never reused.
pub type RecordId = u64;

/// Kind of geometry held by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    /// A single position ("Location")
    Point,
    /// A single-ring polygon ("Area")
    Polygon,
}

impl fmt::Display for GeometryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryKind::Point => write!(f, "Point"),
            GeometryKind::Polygon => write!(f, "Polygon"),
        }
    }
}

/// Which spatial index implementation backs the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexBackend {
    /// Native R-tree with quadratic split
    #[default]
    RTree,
    /// The `rstar` crate's R*-tree
    RStar,
}

/// Synchronization policy for persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncPolicy {
    /// Only flush on explicit sync or close (fastest, least safe)
    Never,
    /// Flush the write buffer after every command
    #[default]
    Flush,
    /// Flush and fsync after every command (slowest, safest)
    Always,
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Index implementation
    pub index_backend: IndexBackend,

    /// Maximum entries per R-tree node before it splits
    pub max_node_entries: usize,

    /// Minimum entries per non-root R-tree node before it is condensed
    pub min_node_entries: usize,

    /// Reject points outside ±90 latitude / ±180 longitude
    pub validate_coordinates: bool,

    /// Reject polygons whose ring crosses itself
    pub reject_self_intersecting: bool,

    /// How often the append-only log reaches the disk
    pub sync_policy: SyncPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            index_backend: IndexBackend::default(),
            max_node_entries: 8,
            min_node_entries: 3,
            validate_coordinates: true,
            reject_self_intersecting: false,
            sync_policy: SyncPolicy::default(),
        }
    }
}

impl Config {
    pub fn with_index_backend(mut self, backend: IndexBackend) -> Self {
        self.index_backend = backend;
        self
    }

    /// Set R-tree branching. Checked by [`Config::validate`].
    pub fn with_node_capacity(mut self, min_entries: usize, max_entries: usize) -> Self {
        self.min_node_entries = min_entries;
        self.max_node_entries = max_entries;
        self
    }

    pub fn with_coordinate_validation(mut self, enabled: bool) -> Self {
        self.validate_coordinates = enabled;
        self
    }

    pub fn with_self_intersection_check(mut self, enabled: bool) -> Self {
        self.reject_self_intersecting = enabled;
        self
    }

    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    /// Check that the R-tree branching parameters are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_node_entries < 4 {
            return Err(GeoStoreError::InvalidConfig(format!(
                "max_node_entries must be at least 4, got {}",
                self.max_node_entries
            )));
        }
        if self.min_node_entries < 2 || self.min_node_entries > self.max_node_entries / 2 {
            return Err(GeoStoreError::InvalidConfig(format!(
                "min_node_entries must be within 2..={}, got {}",
                self.max_node_entries / 2,
                self.min_node_entries
            )));
        }
        Ok(())
    }

    /// Parse a configuration from TOML text. Missing keys take defaults.
    #[cfg(feature = "toml")]
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| GeoStoreError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    #[cfg(feature = "toml")]
    pub fn from_toml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Statistics about the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Live Location records
    pub location_count: u64,
    /// Live Area records
    pub area_count: u64,
    /// Successful inserts since open (replay included)
    pub insert_count: u64,
    /// Successful replaces since open (replay included)
    pub replace_count: u64,
    /// Successful removes since open (replay included)
    pub remove_count: u64,
    /// Size of the AOF file in bytes
    pub aof_size: u64,
}

impl StoreStats {
    pub fn record_count(&self) -> u64 {
        self.location_count + self.area_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.index_backend, IndexBackend::RTree);
        assert_eq!(config.sync_policy, SyncPolicy::Flush);
    }

    #[test]
    fn test_node_capacity_bounds() {
        assert!(Config::default().with_node_capacity(2, 4).validate().is_ok());
        assert!(Config::default().with_node_capacity(8, 16).validate().is_ok());

        let too_small = Config::default().with_node_capacity(2, 3);
        assert!(matches!(
            too_small.validate(),
            Err(GeoStoreError::InvalidConfig(_))
        ));

        let min_too_large = Config::default().with_node_capacity(5, 8);
        assert!(min_too_large.validate().is_err());

        let min_too_small = Config::default().with_node_capacity(1, 8);
        assert!(min_too_small.validate().is_err());
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_config_from_toml() {
        let config = Config::from_toml_str(
            r#"
            index_backend = "RStar"
            max_node_entries = 16
            min_node_entries = 6
            sync_policy = "Always"
            "#,
        )
        .unwrap();

        assert_eq!(config.index_backend, IndexBackend::RStar);
        assert_eq!(config.max_node_entries, 16);
        assert_eq!(config.min_node_entries, 6);
        assert_eq!(config.sync_policy, SyncPolicy::Always);
        assert!(config.validate_coordinates);

        assert!(Config::from_toml_str("max_node_entries = 2").is_err());
    }
}
