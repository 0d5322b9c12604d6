//! R-Tree spatial index over pluggable page stores.
//!
//! This module provides an R-Tree designed around a storage abstraction:
//! - Nodes live in a [`PageStore`], either fully in memory or behind a
//!   bounded LRU cache in front of a byte-oriented [`PageBackend`]
//! - Overflowing nodes are split with the Linear or Quadratic heuristic
//! - Dirty nodes are flushed when evicted, never lost silently
//! - Deletion condenses underfull nodes and reinserts their entries

pub mod rtree_types;
pub mod rtree_constants;
pub mod rtree_config;
pub mod rtree_split;
pub mod rtree_store;
pub mod rtree_cache;
pub mod rtree_storage;
pub mod rtree_codec;
pub mod rtree_cached_store;
pub mod integrity;
mod rtree_impl;

pub use integrity::IntegrityReport;
pub use rtree_cache::{CachedNode, NodeCache};
pub use rtree_cached_store::CachedPageStore;
pub use rtree_config::TreeConfig;
pub use rtree_constants::{DEFAULT_CACHE_NODES, PAGE_SIZE};
pub use rtree_impl::{DiskRTree, MemoryRTree, RTree, SearchIter};
pub use rtree_split::SplitStrategy;
pub use rtree_storage::{FileBackend, MemoryBackend, PageBackend, PageId};
pub use rtree_store::{MemoryPageStore, PageStore};
pub use rtree_types::{
    DataId, Entry, Node, NodeId, Payload, RTreeStats, SpatialError, SpatialResult, StoreStats,
};
