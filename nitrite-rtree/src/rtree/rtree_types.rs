//! Core types and data structures for the R-Tree.
//!
//! This module defines the fundamental types used throughout the R-Tree:
//! - Error types and result types
//! - Entries, payloads and nodes
//! - Statistics structures

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

use crate::bounding_box::BoundingBox;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur in spatial indexing operations
#[derive(Debug, Error)]
pub enum SpatialError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid tree configuration: {0}")]
    TreeConfiguration(String),

    #[error("Invalid record layout: {0}")]
    InvalidLayout(String),

    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    #[error("Page store is closed")]
    StoreClosed,

    #[error("Cannot split {entries} entries, at least {required} are needed")]
    InvalidSplitInput { entries: usize, required: usize },

    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for spatial operations
pub type SpatialResult<T> = Result<T, SpatialError>;

/// Caller-defined identifier stored in leaf entries
pub type DataId = u64;

/// Node ID - unique identifier for a node within its page store
pub type NodeId = u64;

// ============================================================================
// Entries
// ============================================================================

/// What an entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Payload {
    /// Internal entry: the child node the box encloses
    Child(NodeId),
    /// Leaf entry: the caller's data identifier
    Data(DataId),
}

/// A bounding box plus its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub bbox: BoundingBox,
    pub payload: Payload,
}

impl Entry {
    pub fn data(bbox: BoundingBox, id: DataId) -> Self {
        Self {
            bbox,
            payload: Payload::Data(id),
        }
    }

    pub fn child(bbox: BoundingBox, node_id: NodeId) -> Self {
        Self {
            bbox,
            payload: Payload::Child(node_id),
        }
    }

    pub fn child_id(&self) -> Option<NodeId> {
        match self.payload {
            Payload::Child(id) => Some(id),
            Payload::Data(_) => None,
        }
    }

    pub fn data_id(&self) -> Option<DataId> {
        match self.payload {
            Payload::Data(id) => Some(id),
            Payload::Child(_) => None,
        }
    }
}

// ============================================================================
// Node
// ============================================================================

/// A node of the tree.
///
/// Nodes reference their parent and children by id only; the page store is
/// their sole owner. A node obtained from a store is a snapshot: mutate it,
/// then hand it back with `put`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    id: NodeId,
    leaf: bool,
    entries: Vec<Entry>,
    parent: Option<NodeId>,
}

impl Node {
    pub fn new(id: NodeId, leaf: bool, parent: Option<NodeId>, entries: Vec<Entry>) -> Self {
        Self {
            id,
            leaf,
            entries,
            parent,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn is_leaf(&self) -> bool {
        self.leaf
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn add_entry(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    pub fn remove_entry_at(&mut self, index: usize) -> Option<Entry> {
        if index < self.entries.len() {
            Some(self.entries.remove(index))
        } else {
            None
        }
    }

    /// Replaces all entries, returning the previous ones.
    pub fn replace_entries(&mut self, entries: Vec<Entry>) -> Vec<Entry> {
        std::mem::replace(&mut self.entries, entries)
    }

    pub fn set_entry_box(&mut self, index: usize, bbox: BoundingBox) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.bbox = bbox;
        }
    }

    /// Index of the entry pointing at `child`.
    pub fn position_of_child(&self, child: NodeId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.payload == Payload::Child(child))
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: Option<NodeId>) {
        self.parent = parent;
    }

    /// Union of all entry boxes, recomputed on every call. `None` for an
    /// empty node.
    pub fn envelope(&self) -> Option<BoundingBox> {
        BoundingBox::enclosing(self.entries.iter().map(|e| &e.bbox))
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters reported by a page store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Live nodes allocated in the store
    pub nodes: u64,
    pub cached_nodes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub backend_reads: u64,
    pub backend_writes: u64,
    pub evictions: u64,
    /// Evictions whose flush failed and whose content was dropped
    pub failed_flushes: u64,
}

/// Statistics about R-Tree operations
#[derive(Debug, Clone, Default)]
pub struct RTreeStats {
    pub total_entries: u64,
    pub tree_height: u32,
    pub store: StoreStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_with(boxes: &[(f64, f64, f64, f64)]) -> Node {
        let entries = boxes
            .iter()
            .enumerate()
            .map(|(i, &(a, b, c, d))| Entry::data(BoundingBox::rect(a, b, c, d), i as DataId))
            .collect();
        Node::new(1, true, None, entries)
    }

    #[test]
    fn test_envelope_is_union_of_entries() {
        let node = leaf_with(&[(0.0, 0.0, 1.0, 1.0), (5.0, -2.0, 6.0, 0.0)]);
        assert_eq!(node.envelope(), Some(BoundingBox::rect(0.0, -2.0, 6.0, 1.0)));
    }

    #[test]
    fn test_envelope_recomputed_after_mutation() {
        let mut node = leaf_with(&[(0.0, 0.0, 1.0, 1.0), (5.0, 5.0, 6.0, 6.0)]);
        node.remove_entry_at(1);
        assert_eq!(node.envelope(), Some(BoundingBox::rect(0.0, 0.0, 1.0, 1.0)));

        node.add_entry(Entry::data(BoundingBox::rect(-1.0, -1.0, 0.0, 0.0), 9));
        assert_eq!(node.envelope(), Some(BoundingBox::rect(-1.0, -1.0, 1.0, 1.0)));

        node.remove_entry_at(0);
        node.remove_entry_at(0);
        assert!(node.is_empty());
        assert_eq!(node.envelope(), None);
    }

    #[test]
    fn test_remove_entry_out_of_range() {
        let mut node = leaf_with(&[(0.0, 0.0, 1.0, 1.0)]);
        assert!(node.remove_entry_at(3).is_none());
        assert_eq!(node.entry_count(), 1);
    }

    #[test]
    fn test_parent_and_child_lookup() {
        let mut node = Node::new(
            4,
            false,
            None,
            vec![
                Entry::child(BoundingBox::rect(0.0, 0.0, 1.0, 1.0), 10),
                Entry::child(BoundingBox::rect(2.0, 2.0, 3.0, 3.0), 11),
            ],
        );
        assert_eq!(node.position_of_child(11), Some(1));
        assert_eq!(node.position_of_child(12), None);
        assert_eq!(node.entries()[0].child_id(), Some(10));
        assert_eq!(node.entries()[0].data_id(), None);

        node.set_parent(Some(2));
        assert_eq!(node.parent(), Some(2));
    }

    #[test]
    fn test_error_display() {
        let err = SpatialError::InvalidSplitInput {
            entries: 3,
            required: 4,
        };
        assert_eq!(
            err.to_string(),
            "Cannot split 3 entries, at least 4 are needed"
        );
        assert_eq!(SpatialError::NodeNotFound(7).to_string(), "Node 7 not found");
    }
}
