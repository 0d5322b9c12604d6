//! LRU cache for R-Tree nodes.
//!
//! The cache only holds nodes that have been accessed or written; it never
//! preloads. Eviction is split in phases so the owning store can flush a
//! victim through its backend between choosing it and dropping it:
//! [`NodeCache::select_victim`] marks the least recently used node,
//! [`NodeCache::peek`] exposes it for the flush, [`NodeCache::mark_clean`]
//! records a successful flush and [`NodeCache::evict`] removes it.

use std::collections::HashMap;
use std::collections::VecDeque;

use super::rtree_types::{Node, NodeId};

/// A cached node with its dirty flag
#[derive(Debug, Clone)]
pub struct CachedNode {
    pub node: Node,
    pub dirty: bool,
}

/// Bounded LRU cache keyed by node id
#[derive(Debug)]
pub struct NodeCache {
    nodes: HashMap<NodeId, CachedNode>,
    /// LRU order (front = oldest, back = newest)
    lru_order: VecDeque<NodeId>,
    capacity: usize,
}

impl NodeCache {
    /// Create a new cache holding at most `capacity` nodes
    pub fn new(capacity: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            lru_order: VecDeque::new(),
            capacity,
        }
    }

    fn touch(&mut self, id: NodeId) {
        self.lru_order.retain(|&cached| cached != id);
        self.lru_order.push_back(id);
    }

    /// Get a node, updating LRU order. `None` means the caller must load it.
    pub fn get(&mut self, id: NodeId) -> Option<&Node> {
        if self.nodes.contains_key(&id) {
            self.touch(id);
            self.nodes.get(&id).map(|cached| &cached.node)
        } else {
            None
        }
    }

    /// Insert or replace a node. A replaced dirty node stays dirty.
    ///
    /// The caller is responsible for making room first (see
    /// [`NodeCache::needs_eviction`]).
    pub fn insert(&mut self, node: Node, dirty: bool) {
        let id = node.id();
        self.touch(id);
        let was_dirty = self.nodes.get(&id).map(|c| c.dirty).unwrap_or(false);
        self.nodes.insert(
            id,
            CachedNode {
                node,
                dirty: dirty || was_dirty,
            },
        );
    }

    /// True when admitting a node not yet cached requires an eviction
    pub fn needs_eviction(&self) -> bool {
        self.nodes.len() >= self.capacity
    }

    /// Phase one: the least recently used node, left in place.
    pub fn select_victim(&self) -> Option<NodeId> {
        self.lru_order.front().copied()
    }

    /// Look at a cached node without touching LRU order
    pub fn peek(&self, id: NodeId) -> Option<&CachedNode> {
        self.nodes.get(&id)
    }

    /// Phase three: drop a node from the cache.
    pub fn evict(&mut self, id: NodeId) -> Option<CachedNode> {
        self.remove(id)
    }

    /// Get all dirty node ids, oldest first
    pub fn dirty_ids(&self) -> Vec<NodeId> {
        self.lru_order
            .iter()
            .copied()
            .filter(|id| self.nodes.get(id).is_some_and(|c| c.dirty))
            .collect()
    }

    pub fn mark_clean(&mut self, id: NodeId) {
        if let Some(cached) = self.nodes.get_mut(&id) {
            cached.dirty = false;
        }
    }

    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(|c| c.dirty)
    }

    /// Remove a node from the cache
    pub fn remove(&mut self, id: NodeId) -> Option<CachedNode> {
        self.lru_order.retain(|&cached| cached != id);
        self.nodes.remove(&id)
    }

    /// Clear the cache, returning everything it held
    pub fn clear(&mut self) -> Vec<CachedNode> {
        self.lru_order.clear();
        self.nodes.drain().map(|(_, cached)| cached).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: NodeId) -> Node {
        Node::new(id, true, None, vec![])
    }

    #[test]
    fn test_node_cache_new() {
        let cache = NodeCache::new(10);
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 10);
        assert!(!cache.needs_eviction());
    }

    #[test]
    fn test_node_cache_insert_and_get() {
        let mut cache = NodeCache::new(10);
        cache.insert(node(1), false);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(1));
        assert_eq!(cache.get(1).map(|n| n.id()), Some(1));
        assert!(cache.get(999).is_none());
    }

    #[test]
    fn test_node_cache_victim_is_least_recently_used() {
        let mut cache = NodeCache::new(3);
        cache.insert(node(1), false);
        cache.insert(node(2), false);
        cache.insert(node(3), false);
        assert!(cache.needs_eviction());

        // Access node 1 to make it most recent
        let _ = cache.get(1);
        assert_eq!(cache.select_victim(), Some(2));

        // Selecting does not remove
        assert!(cache.contains(2));
        let evicted = cache.evict(2).unwrap();
        assert_eq!(evicted.node.id(), 2);

        cache.insert(node(4), false);
        assert!(!cache.contains(2));
        assert!(cache.contains(1));
        assert!(cache.contains(3));
        assert!(cache.contains(4));
        assert_eq!(cache.select_victim(), Some(3));
    }

    #[test]
    fn test_node_cache_insert_counts_as_access() {
        let mut cache = NodeCache::new(3);
        cache.insert(node(1), false);
        cache.insert(node(2), false);
        cache.insert(node(1), false);
        assert_eq!(cache.select_victim(), Some(2));
    }

    #[test]
    fn test_node_cache_dirty_flag_survives_clean_reinsert() {
        let mut cache = NodeCache::new(10);
        cache.insert(node(1), true);
        cache.insert(node(1), false);
        assert!(cache.is_dirty(1));

        cache.mark_clean(1);
        assert!(!cache.is_dirty(1));
        assert!(!cache.peek(1).unwrap().dirty);
    }

    #[test]
    fn test_node_cache_dirty_ids() {
        let mut cache = NodeCache::new(10);
        cache.insert(node(1), true);
        cache.insert(node(2), false);
        cache.insert(node(3), true);

        assert_eq!(cache.dirty_ids(), vec![1, 3]);
    }

    #[test]
    fn test_node_cache_remove_and_clear() {
        let mut cache = NodeCache::new(10);
        cache.insert(node(1), true);
        cache.insert(node(2), false);
        cache.insert(node(3), true);

        assert!(cache.remove(1).is_some());
        assert!(cache.remove(1).is_none());
        assert_eq!(cache.len(), 2);

        let cleared = cache.clear();
        assert_eq!(cleared.len(), 2);
        assert_eq!(cleared.iter().filter(|c| c.dirty).count(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.select_victim(), None);
    }
}
