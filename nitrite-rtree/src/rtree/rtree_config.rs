//! Tree configuration and its construction-time validation.

use serde::{Deserialize, Serialize};

use super::rtree_constants::{
    DEFAULT_DIMENSIONS, DEFAULT_MAX_NODE_ENTRIES, DEFAULT_MIN_NODE_ENTRIES,
};
use super::rtree_split::SplitStrategy;
use super::rtree_types::{SpatialError, SpatialResult};
use crate::layout::DataDefinition;

/// Shape parameters of an R-Tree.
///
/// A configuration is checked once, when a page store is constructed; a
/// store never holds an invalid configuration.
///
/// # Examples
///
/// ```rust
/// use nitrite_rtree::{SplitStrategy, TreeConfig};
///
/// let config = TreeConfig::new(8, 3, SplitStrategy::Linear).with_dimensions(3);
/// assert!(config.validate().is_ok());
///
/// let broken = TreeConfig::new(10, 10, SplitStrategy::Quadratic);
/// assert!(broken.validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    pub max_node_entries: usize,
    pub min_node_entries: usize,
    pub split_strategy: SplitStrategy,
    pub dimensions: usize,
    pub layout: DataDefinition,
}

impl TreeConfig {
    pub fn new(
        max_node_entries: usize,
        min_node_entries: usize,
        split_strategy: SplitStrategy,
    ) -> Self {
        Self {
            max_node_entries,
            min_node_entries,
            split_strategy,
            dimensions: DEFAULT_DIMENSIONS,
            layout: DataDefinition::identifier(),
        }
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_layout(mut self, layout: DataDefinition) -> Self {
        self.layout = layout;
        self
    }

    /// Checks every invariant a tree relies on.
    ///
    /// # Errors
    ///
    /// `TreeConfiguration` when the entry bounds cannot guarantee valid
    /// splits, when no dimension is configured, or when the layout is empty.
    pub fn validate(&self) -> SpatialResult<()> {
        if self.max_node_entries < 2 {
            return Err(SpatialError::TreeConfiguration(format!(
                "max_node_entries must be at least 2, got {}",
                self.max_node_entries
            )));
        }
        if self.min_node_entries == 0 {
            return Err(SpatialError::TreeConfiguration(
                "min_node_entries must be at least 1".into(),
            ));
        }
        if self.min_node_entries > self.max_node_entries / 2 {
            return Err(SpatialError::TreeConfiguration(format!(
                "min_node_entries ({}) must not exceed max_node_entries / 2 ({})",
                self.min_node_entries,
                self.max_node_entries / 2
            )));
        }
        if self.dimensions == 0 {
            return Err(SpatialError::TreeConfiguration(
                "dimensions must be at least 1".into(),
            ));
        }
        self.layout
            .validate()
            .map_err(|e| SpatialError::TreeConfiguration(e.to_string()))
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_NODE_ENTRIES,
            DEFAULT_MIN_NODE_ENTRIES,
            SplitStrategy::Quadratic,
        )
    }
}
