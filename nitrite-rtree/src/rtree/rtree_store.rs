//! Page store abstraction for node persistence.
//!
//! A [`PageStore`] owns every node of a tree and tracks the root pointer.
//! The tree only ever holds node snapshots between a `get` and the matching
//! `put`, and re-fetches by id after anything that may touch the store.

use super::rtree_config::TreeConfig;
use super::rtree_types::{Entry, Node, NodeId, SpatialError, SpatialResult, StoreStats};

/// Backend-agnostic node storage.
///
/// Implementations are not synchronized; a store is driven by one caller
/// at a time.
pub trait PageStore {
    /// The validated configuration this store was built with.
    fn config(&self) -> &TreeConfig;

    /// Allocates a new node holding `entries` and returns its id.
    fn create(
        &mut self,
        leaf: bool,
        parent: Option<NodeId>,
        entries: Vec<Entry>,
    ) -> SpatialResult<NodeId>;

    /// Returns a snapshot of the node stored under `id`.
    fn get(&mut self, id: NodeId) -> SpatialResult<Node>;

    /// Persists a mutated node under its existing id.
    fn put(&mut self, node: Node) -> SpatialResult<()>;

    /// Deletes a node; later `get` calls on `id` fail with `NodeNotFound`.
    fn remove(&mut self, id: NodeId) -> SpatialResult<()>;

    fn get_root(&self) -> SpatialResult<Option<NodeId>>;

    /// Points the tree at a new root. Callers create the root node first.
    fn set_root(&mut self, root: Option<NodeId>) -> SpatialResult<()>;

    /// Number of data entries indexed by the tree.
    fn entry_count(&self) -> SpatialResult<u64>;

    fn set_entry_count(&mut self, count: u64) -> SpatialResult<()>;

    /// Makes every pending mutation durable. No-op for memory stores.
    fn flush(&mut self) -> SpatialResult<()> {
        Ok(())
    }

    /// Drops every node and resets the root, keeping the store open.
    fn clear(&mut self) -> SpatialResult<()>;

    /// Releases backend resources. Calling it again is a no-op.
    fn close(&mut self) -> SpatialResult<()>;

    /// Releases all backing storage, including persisted pages, and closes
    /// the store.
    fn destroy(&mut self) -> SpatialResult<()>;

    fn is_closed(&self) -> bool;

    fn stats(&self) -> StoreStats {
        StoreStats::default()
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// Page store keeping every node in an indexed vector.
///
/// Node ids are slot indices and are only reused after `clear`. There is
/// no eviction; the store grows with the tree.
#[derive(Debug)]
pub struct MemoryPageStore {
    config: TreeConfig,
    nodes: Vec<Option<Node>>,
    root: Option<NodeId>,
    entry_count: u64,
    live_nodes: u64,
    closed: bool,
}

impl MemoryPageStore {
    /// Creates an empty store.
    ///
    /// # Errors
    ///
    /// `TreeConfiguration` if the configuration is invalid.
    pub fn new(config: TreeConfig) -> SpatialResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            nodes: Vec::new(),
            root: None,
            entry_count: 0,
            live_nodes: 0,
            closed: false,
        })
    }

    fn check_closed(&self) -> SpatialResult<()> {
        if self.closed {
            Err(SpatialError::StoreClosed)
        } else {
            Ok(())
        }
    }

    fn slot_mut(&mut self, id: NodeId) -> SpatialResult<&mut Option<Node>> {
        match self.nodes.get_mut(id as usize) {
            Some(slot) if slot.is_some() => Ok(slot),
            _ => Err(SpatialError::NodeNotFound(id)),
        }
    }
}

impl PageStore for MemoryPageStore {
    fn config(&self) -> &TreeConfig {
        &self.config
    }

    fn create(
        &mut self,
        leaf: bool,
        parent: Option<NodeId>,
        entries: Vec<Entry>,
    ) -> SpatialResult<NodeId> {
        self.check_closed()?;
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Some(Node::new(id, leaf, parent, entries)));
        self.live_nodes += 1;
        Ok(id)
    }

    fn get(&mut self, id: NodeId) -> SpatialResult<Node> {
        self.check_closed()?;
        self.nodes
            .get(id as usize)
            .and_then(|slot| slot.clone())
            .ok_or(SpatialError::NodeNotFound(id))
    }

    fn put(&mut self, node: Node) -> SpatialResult<()> {
        self.check_closed()?;
        // Snapshots are owned copies, so the slot is overwritten in place
        let id = node.id();
        *self.slot_mut(id)? = Some(node);
        Ok(())
    }

    fn remove(&mut self, id: NodeId) -> SpatialResult<()> {
        self.check_closed()?;
        *self.slot_mut(id)? = None;
        self.live_nodes -= 1;
        Ok(())
    }

    fn get_root(&self) -> SpatialResult<Option<NodeId>> {
        self.check_closed()?;
        Ok(self.root)
    }

    fn set_root(&mut self, root: Option<NodeId>) -> SpatialResult<()> {
        self.check_closed()?;
        if let Some(id) = root {
            self.slot_mut(id)?;
        }
        self.root = root;
        Ok(())
    }

    fn entry_count(&self) -> SpatialResult<u64> {
        self.check_closed()?;
        Ok(self.entry_count)
    }

    fn set_entry_count(&mut self, count: u64) -> SpatialResult<()> {
        self.check_closed()?;
        self.entry_count = count;
        Ok(())
    }

    fn clear(&mut self) -> SpatialResult<()> {
        self.check_closed()?;
        self.nodes.clear();
        self.root = None;
        self.entry_count = 0;
        self.live_nodes = 0;
        Ok(())
    }

    fn close(&mut self) -> SpatialResult<()> {
        if self.closed {
            return Ok(());
        }
        log::debug!("Closing memory page store with {} nodes", self.live_nodes);
        self.nodes = Vec::new();
        self.root = None;
        self.closed = true;
        Ok(())
    }

    fn destroy(&mut self) -> SpatialResult<()> {
        self.close()
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            nodes: self.live_nodes,
            ..StoreStats::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounding_box::BoundingBox;
    use crate::rtree::SplitStrategy;

    fn store() -> MemoryPageStore {
        MemoryPageStore::new(TreeConfig::new(4, 2, SplitStrategy::Quadratic)).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let result = MemoryPageStore::new(TreeConfig::new(10, 10, SplitStrategy::Quadratic));
        assert!(matches!(result, Err(SpatialError::TreeConfiguration(_))));
    }

    #[test]
    fn test_create_get_put() {
        let mut store = store();
        let id = store
            .create(true, None, vec![Entry::data(BoundingBox::rect(0.0, 0.0, 1.0, 1.0), 1)])
            .unwrap();

        let mut node = store.get(id).unwrap();
        assert!(node.is_leaf());
        assert_eq!(node.entry_count(), 1);

        node.add_entry(Entry::data(BoundingBox::rect(2.0, 2.0, 3.0, 3.0), 2));
        store.put(node).unwrap();
        assert_eq!(store.get(id).unwrap().entry_count(), 2);
        assert_eq!(store.stats().nodes, 1);
    }

    #[test]
    fn test_remove_invalidates_id() {
        let mut store = store();
        let id = store.create(true, None, vec![]).unwrap();
        store.remove(id).unwrap();

        assert!(matches!(store.get(id), Err(SpatialError::NodeNotFound(_))));
        assert!(matches!(store.remove(id), Err(SpatialError::NodeNotFound(_))));
        let stale = Node::new(id, true, None, vec![]);
        assert!(matches!(store.put(stale), Err(SpatialError::NodeNotFound(_))));

        // ids are not reused
        let next = store.create(true, None, vec![]).unwrap();
        assert_ne!(next, id);
    }

    #[test]
    fn test_unknown_id() {
        let mut store = store();
        assert!(matches!(store.get(42), Err(SpatialError::NodeNotFound(42))));
    }

    #[test]
    fn test_root_bookkeeping() {
        let mut store = store();
        assert_eq!(store.get_root().unwrap(), None);

        let id = store.create(true, None, vec![]).unwrap();
        store.set_root(Some(id)).unwrap();
        assert_eq!(store.get_root().unwrap(), Some(id));

        assert!(store.set_root(Some(99)).is_err());
        store.set_root(None).unwrap();
        assert_eq!(store.get_root().unwrap(), None);
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let mut store = store();
        let id = store.create(true, None, vec![]).unwrap();
        store.close().unwrap();
        store.close().unwrap();

        assert!(store.is_closed());
        assert!(matches!(
            store.create(true, None, vec![]),
            Err(SpatialError::StoreClosed)
        ));
        assert!(matches!(store.get(id), Err(SpatialError::StoreClosed)));
        assert!(matches!(store.get_root(), Err(SpatialError::StoreClosed)));
    }

    #[test]
    fn test_clear() {
        let mut store = store();
        let id = store.create(true, None, vec![]).unwrap();
        store.set_root(Some(id)).unwrap();
        store.set_entry_count(3).unwrap();

        store.clear().unwrap();
        assert_eq!(store.get_root().unwrap(), None);
        assert_eq!(store.entry_count().unwrap(), 0);
        assert_eq!(store.stats().nodes, 0);
    }
}
