//! # Nitrite R-Tree - Pluggable Spatial Index
//!
//! This crate provides an R-Tree spatial index whose nodes live in a
//! pluggable page store: fully in memory, or on disk behind a bounded
//! node cache.
//!
//! ## Features
//!
//! - **n-Dimensional Boxes**: Axis-aligned bounding boxes of any dimension
//! - **Two Split Heuristics**: Linear (cheap) and Quadratic (better queries)
//! - **Pluggable Storage**: Memory store, or a cached store over any page backend
//! - **LRU Cache**: Dirty nodes are flushed before eviction
//! - **Persistent**: File-backed trees survive process restarts
//! - **Full Deletion**: Underfull nodes are condensed and their entries reinserted
//! - **Queries**: Intersection, containment and k-nearest-neighbour searches
//!
//! ## Quick Start
//!
//! ```rust
//! use nitrite_rtree::{BoundingBox, MemoryRTree, SplitStrategy, TreeConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tree = MemoryRTree::in_memory(TreeConfig::new(8, 3, SplitStrategy::Quadratic))?;
//!
//! tree.insert(&BoundingBox::rect(0.0, 0.0, 10.0, 10.0), 1)?;
//! tree.insert(&BoundingBox::rect(5.0, 5.0, 15.0, 15.0), 2)?;
//!
//! let query = BoundingBox::rect(12.0, 12.0, 20.0, 20.0);
//! let results = tree.find_intersecting_keys(&query)?;
//! assert_eq!(results, vec![2]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Disk-Backed Trees
//!
//! ```rust,no_run
//! use nitrite_rtree::{BoundingBox, DiskRTree, SpatialTree, TreeConfig};
//! use tempfile::NamedTempFile;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let temp_file = NamedTempFile::new()?;
//! let tree = DiskRTree::create(temp_file.path(), TreeConfig::default())?;
//!
//! tree.add(&BoundingBox::rect(0.0, 0.0, 10.0, 10.0), 1)?;
//! tree.close()?;
//!
//! let tree = DiskRTree::open(temp_file.path())?;
//! let _nearest = tree.find_nearest(&[12.0, 12.0], 1, None)?;
//! # Ok(())
//! # }
//! ```

pub mod bounding_box;
pub mod layout;
pub mod rtree;
pub mod spatial_tree;

pub use bounding_box::BoundingBox;
pub use layout::{DataDefinition, FieldDescriptor, FieldType, FieldValue};
pub use rtree::{
    CachedPageStore, DataId, DiskRTree, Entry, FileBackend, IntegrityReport, MemoryBackend,
    MemoryPageStore, MemoryRTree, Node, NodeCache, NodeId, PageBackend, PageStore, Payload,
    RTree, RTreeStats, SearchIter, SpatialError, SpatialResult, SplitStrategy, StoreStats,
    TreeConfig,
};
pub use spatial_tree::SpatialTree;
