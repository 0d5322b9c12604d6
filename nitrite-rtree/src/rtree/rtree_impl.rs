//! R-Tree implementation over a pluggable page store.
//!
//! The tree owns its [`PageStore`] behind a single `parking_lot::Mutex`;
//! every public operation takes the lock for its whole duration. Nodes are
//! fetched as snapshots, mutated, and written back with `put` before the
//! next node is touched, so a cached store may evict freely in between.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard};

use crate::bounding_box::BoundingBox;

use super::integrity::{check_tree, IntegrityReport};
use super::rtree_cached_store::CachedPageStore;
use super::rtree_config::TreeConfig;
use super::rtree_constants::DEFAULT_CACHE_NODES;
use super::rtree_storage::FileBackend;
use super::rtree_store::{MemoryPageStore, PageStore};
use super::rtree_types::{
    DataId, Entry, Node, NodeId, Payload, RTreeStats, SpatialError, SpatialResult,
};

/// A spatial index of bounding boxes keyed by caller-defined data ids.
pub struct RTree<S: PageStore> {
    store: Mutex<S>,
    config: TreeConfig,
}

/// A tree whose nodes all live in memory.
pub type MemoryRTree = RTree<MemoryPageStore>;

/// A file-backed tree with an LRU node cache.
pub type DiskRTree = RTree<CachedPageStore<FileBackend>>;

impl<S: PageStore> RTree<S> {
    /// Wraps an open store. The tree adopts the store's configuration.
    pub fn new(store: S) -> SpatialResult<Self> {
        if store.is_closed() {
            return Err(SpatialError::StoreClosed);
        }
        let config = store.config().clone();
        config.validate()?;
        Ok(Self {
            store: Mutex::new(store),
            config,
        })
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    fn check_box(&self, bbox: &BoundingBox) -> SpatialResult<()> {
        bbox.validate()?;
        if bbox.dimensions() != self.config.dimensions {
            return Err(SpatialError::DimensionMismatch {
                expected: self.config.dimensions,
                found: bbox.dimensions(),
            });
        }
        Ok(())
    }

    /// Indexes `bbox` under `id`.
    ///
    /// The same id may be inserted more than once, with equal or different
    /// boxes; each insertion is a distinct entry.
    pub fn insert(&self, bbox: &BoundingBox, id: DataId) -> SpatialResult<()> {
        self.check_box(bbox)?;
        let mut store = self.store.lock();
        insert_entry(&mut *store, &self.config, Entry::data(bbox.clone(), id))?;
        let count = store.entry_count()?;
        store.set_entry_count(count + 1)
    }

    /// Removes one entry matching both `bbox` and `id` exactly.
    ///
    /// Returns `false` when no such entry exists. Nodes left underfull are
    /// dissolved and their data entries reinserted from the root.
    pub fn remove(&self, bbox: &BoundingBox, id: DataId) -> SpatialResult<bool> {
        self.check_box(bbox)?;
        let mut store = self.store.lock();
        let Some(root_id) = store.get_root()? else {
            return Ok(false);
        };

        let target = Entry::data(bbox.clone(), id);
        let Some(mut leaf) = find_leaf(&mut *store, root_id, &target)? else {
            return Ok(false);
        };
        if let Some(index) = leaf.entries().iter().position(|e| *e == target) {
            leaf.remove_entry_at(index);
        }
        let leaf_id = leaf.id();
        store.put(leaf)?;

        let orphans = condense_tree(&mut *store, &self.config, leaf_id)?;
        if !orphans.is_empty() {
            log::trace!("Reinserting {} entries after condensation", orphans.len());
        }
        let total = orphans.len();
        for (done, orphan) in orphans.into_iter().enumerate() {
            if let Err(e) = insert_entry(&mut *store, &self.config, orphan) {
                log::error!(
                    "Reinsertion failed after {} of {} entries, the rest are no longer indexed: {}",
                    done,
                    total,
                    e
                );
                return Err(e);
            }
        }

        let count = store.entry_count()?;
        store.set_entry_count(count.saturating_sub(1))?;
        Ok(true)
    }

    /// Lazily yields the id of every entry whose box intersects `query`.
    ///
    /// The iterator holds the tree lock until it is dropped; every call
    /// walks the tree again from the root. The lock is not reentrant:
    /// calling any other method of this tree (even [`RTree::size`]) on the
    /// same thread while the iterator is alive deadlocks. Collect the ids
    /// first, or use [`RTree::find_intersecting_keys`].
    pub fn search(&self, query: &BoundingBox) -> SpatialResult<SearchIter<'_, S>> {
        self.start_search(query, QueryMode::Intersects)
    }

    /// Lazily yields the id of every entry whose box lies inside `query`.
    pub fn search_contained(&self, query: &BoundingBox) -> SpatialResult<SearchIter<'_, S>> {
        self.start_search(query, QueryMode::Contained)
    }

    fn start_search(&self, query: &BoundingBox, mode: QueryMode) -> SpatialResult<SearchIter<'_, S>> {
        self.check_box(query)?;
        let store = self.store.lock();
        let pending = store.get_root()?.into_iter().collect();
        Ok(SearchIter {
            store,
            query: query.clone(),
            mode,
            pending,
            ready: Vec::new(),
        })
    }

    pub fn find_intersecting_keys(&self, query: &BoundingBox) -> SpatialResult<Vec<DataId>> {
        self.search(query)?.collect()
    }

    pub fn find_contained_keys(&self, query: &BoundingBox) -> SpatialResult<Vec<DataId>> {
        self.search_contained(query)?.collect()
    }

    /// Finds the `k` entries nearest to `point`, nearest first.
    ///
    /// Distance is measured from the point to the closest point of each
    /// entry box. Entries farther than `max_distance` are skipped.
    pub fn find_nearest(
        &self,
        point: &[f64],
        k: usize,
        max_distance: Option<f64>,
    ) -> SpatialResult<Vec<(DataId, f64)>> {
        if point.len() != self.config.dimensions {
            return Err(SpatialError::DimensionMismatch {
                expected: self.config.dimensions,
                found: point.len(),
            });
        }
        if point.iter().any(|c| c.is_nan()) {
            return Err(SpatialError::InvalidBoundingBox(
                "NaN coordinate in query point".into(),
            ));
        }

        let mut store = self.store.lock();
        let mut results = Vec::new();
        let Some(root_id) = store.get_root()? else {
            return Ok(results);
        };
        if k == 0 {
            return Ok(results);
        }
        let limit = max_distance.unwrap_or(f64::INFINITY);

        // Best-first: candidates pop in order of their minimum distance, so
        // a data entry popped from the queue is nearer than anything left.
        let mut queue = BinaryHeap::new();
        queue.push(Candidate {
            distance: 0.0,
            payload: Payload::Child(root_id),
        });

        while let Some(candidate) = queue.pop() {
            if candidate.distance > limit {
                break;
            }
            match candidate.payload {
                Payload::Data(id) => {
                    results.push((id, candidate.distance));
                    if results.len() == k {
                        break;
                    }
                }
                Payload::Child(node_id) => {
                    let node = store.get(node_id)?;
                    for entry in node.entries() {
                        let distance = entry.bbox.distance_to_point(point)?;
                        if distance <= limit {
                            queue.push(Candidate {
                                distance,
                                payload: entry.payload,
                            });
                        }
                    }
                }
            }
        }

        Ok(results)
    }

    /// Number of data entries in the tree; 0 once closed.
    pub fn size(&self) -> u64 {
        self.store.lock().entry_count().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Number of levels from the root to the leaves; 0 for an empty tree.
    pub fn height(&self) -> SpatialResult<u32> {
        let mut store = self.store.lock();
        tree_height(&mut *store)
    }

    /// Snapshot of the root node, if any.
    pub fn root(&self) -> SpatialResult<Option<Node>> {
        let mut store = self.store.lock();
        match store.get_root()? {
            Some(id) => store.get(id).map(Some),
            None => Ok(None),
        }
    }

    /// Snapshot of the node stored under `id`.
    pub fn node(&self, id: NodeId) -> SpatialResult<Node> {
        self.store.lock().get(id)
    }

    pub fn stats(&self) -> SpatialResult<RTreeStats> {
        let mut store = self.store.lock();
        Ok(RTreeStats {
            total_entries: store.entry_count()?,
            tree_height: tree_height(&mut *store)?,
            store: store.stats(),
        })
    }

    /// Walks every node and checks the structural invariants of the tree.
    pub fn validate(&self) -> SpatialResult<IntegrityReport> {
        let mut store = self.store.lock();
        check_tree(&mut *store)
    }

    pub fn flush(&self) -> SpatialResult<()> {
        self.store.lock().flush()
    }

    /// Removes every entry, keeping the tree open.
    pub fn clear(&self) -> SpatialResult<()> {
        self.store.lock().clear()
    }

    /// Flushes pending changes and closes the store. Idempotent.
    pub fn close(&self) -> SpatialResult<()> {
        self.store.lock().close()
    }

    /// Closes the tree and deletes all of its data.
    pub fn drop_tree(&self) -> SpatialResult<()> {
        self.store.lock().destroy()
    }

    pub fn is_closed(&self) -> bool {
        self.store.lock().is_closed()
    }
}

impl RTree<MemoryPageStore> {
    /// Creates an empty in-memory tree.
    pub fn in_memory(config: TreeConfig) -> SpatialResult<Self> {
        Self::new(MemoryPageStore::new(config)?)
    }
}

impl RTree<CachedPageStore<FileBackend>> {
    /// Create a new file-backed R-Tree at the given path.
    ///
    /// This creates an EMPTY tree; an existing file is truncated.
    pub fn create(path: impl AsRef<Path>, config: TreeConfig) -> SpatialResult<Self> {
        Self::create_with_cache_size(path, config, DEFAULT_CACHE_NODES)
    }

    pub fn create_with_cache_size(
        path: impl AsRef<Path>,
        config: TreeConfig,
        cache_nodes: usize,
    ) -> SpatialResult<Self> {
        config.validate()?;
        let backend = FileBackend::create(path.as_ref())?;
        Self::new(CachedPageStore::create(backend, config, cache_nodes)?)
    }

    /// Open an existing file-backed R-Tree.
    ///
    /// Only the header is read; nodes are loaded on demand.
    pub fn open(path: impl AsRef<Path>) -> SpatialResult<Self> {
        Self::open_with_cache_size(path, DEFAULT_CACHE_NODES)
    }

    pub fn open_with_cache_size(path: impl AsRef<Path>, cache_nodes: usize) -> SpatialResult<Self> {
        let backend = FileBackend::open(path.as_ref())?;
        Self::new(CachedPageStore::open(backend, cache_nodes)?)
    }

    pub fn path(&self) -> PathBuf {
        self.store.lock().backend().path().to_path_buf()
    }
}

impl<S: PageStore> Drop for RTree<S> {
    fn drop(&mut self) {
        // Best effort flush on drop
        let store = self.store.get_mut();
        if !store.is_closed() {
            if let Err(e) = store.flush() {
                log::warn!("Failed to flush R-Tree on drop: {}", e);
            }
        }
    }
}

impl<S: PageStore> std::fmt::Debug for RTree<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RTree")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Search
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryMode {
    Intersects,
    Contained,
}

impl QueryMode {
    fn accepts(self, query: &BoundingBox, bbox: &BoundingBox) -> bool {
        match self {
            QueryMode::Intersects => true,
            QueryMode::Contained => query.contains(bbox),
        }
    }
}

/// Lazy depth-first walk over the nodes intersecting a query box.
///
/// Subtrees whose box misses the query are never loaded. A store error is
/// yielded once and ends the iteration.
pub struct SearchIter<'a, S: PageStore> {
    store: MutexGuard<'a, S>,
    query: BoundingBox,
    mode: QueryMode,
    pending: Vec<NodeId>,
    ready: Vec<DataId>,
}

impl<S: PageStore> Iterator for SearchIter<'_, S> {
    type Item = SpatialResult<DataId>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(id) = self.ready.pop() {
                return Some(Ok(id));
            }

            let node_id = self.pending.pop()?;
            let node = match self.store.get(node_id) {
                Ok(node) => node,
                Err(e) => {
                    self.pending.clear();
                    return Some(Err(e));
                }
            };

            for entry in node.entries() {
                if !entry.bbox.intersects(&self.query) {
                    continue;
                }
                match entry.payload {
                    Payload::Child(child) => self.pending.push(child),
                    Payload::Data(id) => {
                        if self.mode.accepts(&self.query, &entry.bbox) {
                            self.ready.push(id);
                        }
                    }
                }
            }
        }
    }
}

/// Queue element of the nearest-neighbour search, ordered so that
/// `BinaryHeap` pops the smallest distance first.
#[derive(Debug)]
struct Candidate {
    distance: f64,
    payload: Payload,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other.distance.total_cmp(&self.distance)
    }
}

// ============================================================================
// Insertion
// ============================================================================

/// Outcome of writing back a node that may have overflowed.
struct Placed {
    id: NodeId,
    parent: Option<NodeId>,
    envelope: BoundingBox,
    /// New sibling produced by a split, with its envelope
    sibling: Option<(NodeId, BoundingBox)>,
}

fn corrupted(message: String) -> SpatialError {
    SpatialError::InvalidOperation(format!("Corrupted tree: {}", message))
}

fn envelope_of(node: &Node) -> SpatialResult<BoundingBox> {
    node.envelope()
        .ok_or_else(|| corrupted(format!("node {} has no entries", node.id())))
}

/// Adds a data entry at leaf level, splitting and adjusting boxes up to the
/// root. Does not touch the entry count.
fn insert_entry<S: PageStore>(store: &mut S, config: &TreeConfig, entry: Entry) -> SpatialResult<()> {
    let Some(root_id) = store.get_root()? else {
        let root = store.create(true, None, vec![entry])?;
        store.set_root(Some(root))?;
        log::debug!("Created leaf root {}", root);
        return Ok(());
    };

    let mut leaf = choose_leaf(store, root_id, &entry.bbox)?;
    leaf.add_entry(entry);
    let mut placed = handle_overflow(store, config, leaf)?;

    // Box adjustment is needed on every level even without a split
    while let Some(parent_id) = placed.parent {
        let mut parent = store.get(parent_id)?;
        let index = parent.position_of_child(placed.id).ok_or_else(|| {
            corrupted(format!("node {} is not a child of {}", placed.id, parent_id))
        })?;
        parent.set_entry_box(index, placed.envelope);
        if let Some((sibling_id, sibling_box)) = placed.sibling {
            parent.add_entry(Entry::child(sibling_box, sibling_id));
        }
        placed = handle_overflow(store, config, parent)?;
    }

    if let Some((sibling_id, sibling_box)) = placed.sibling {
        grow_root(store, placed.id, placed.envelope, sibling_id, sibling_box)?;
    }
    Ok(())
}

/// Descends from the root along the ChooseSubtree rule.
fn choose_leaf<S: PageStore>(store: &mut S, root_id: NodeId, bbox: &BoundingBox) -> SpatialResult<Node> {
    let mut node = store.get(root_id)?;
    while !node.is_leaf() {
        let index = choose_subtree(store, &node, bbox)?;
        let child_id = node.entries()[index]
            .child_id()
            .ok_or_else(|| corrupted(format!("internal node {} holds data", node.id())))?;
        node = store.get(child_id)?;
    }
    Ok(node)
}

/// Least enlargement, then smallest resulting area, then fewest entries in
/// the child. Children are only loaded to break a tie on the first two.
fn choose_subtree<S: PageStore>(store: &mut S, node: &Node, bbox: &BoundingBox) -> SpatialResult<usize> {
    let mut candidates = Vec::with_capacity(node.entry_count());
    for (index, entry) in node.entries().iter().enumerate() {
        let enlargement = entry.bbox.enlargement(bbox)?;
        let area = entry.bbox.union(bbox)?.area();
        candidates.push((index, enlargement, area));
    }

    let (_, best_enlargement, best_area) = candidates
        .iter()
        .copied()
        .min_by(|a, b| a.1.total_cmp(&b.1).then(a.2.total_cmp(&b.2)))
        .ok_or_else(|| corrupted(format!("internal node {} is empty", node.id())))?;
    let tied: Vec<usize> = candidates
        .iter()
        .filter(|(_, enlargement, area)| *enlargement == best_enlargement && *area == best_area)
        .map(|(index, _, _)| *index)
        .collect();
    if tied.len() == 1 {
        return Ok(tied[0]);
    }

    let mut chosen = tied[0];
    let mut fewest = usize::MAX;
    for index in tied {
        let Some(child_id) = node.entries()[index].child_id() else {
            continue;
        };
        let count = store.get(child_id)?.entry_count();
        if count < fewest {
            fewest = count;
            chosen = index;
        }
    }
    Ok(chosen)
}

/// Writes `node` back, splitting it first when it holds more than the
/// maximum number of entries.
fn handle_overflow<S: PageStore>(store: &mut S, config: &TreeConfig, mut node: Node) -> SpatialResult<Placed> {
    let id = node.id();
    let parent = node.parent();

    if node.entry_count() <= config.max_node_entries {
        let envelope = envelope_of(&node)?;
        store.put(node)?;
        return Ok(Placed {
            id,
            parent,
            envelope,
            sibling: None,
        });
    }

    let entries = node.replace_entries(Vec::new());
    let (kept, moved) = config
        .split_strategy
        .split(entries, config.min_node_entries)?;

    let sibling_box = BoundingBox::enclosing(moved.iter().map(|e| &e.bbox))
        .ok_or_else(|| corrupted(format!("split of node {} produced an empty group", id)))?;
    let moved_children: Vec<NodeId> = moved.iter().filter_map(Entry::child_id).collect();
    let sibling_id = store.create(node.is_leaf(), parent, moved)?;
    for child_id in moved_children {
        let mut child = store.get(child_id)?;
        child.set_parent(Some(sibling_id));
        store.put(child)?;
    }

    node.replace_entries(kept);
    let envelope = envelope_of(&node)?;
    store.put(node)?;

    log::trace!(
        "Split node {} ({} strategy), new sibling {}",
        id,
        config.split_strategy,
        sibling_id
    );
    Ok(Placed {
        id,
        parent,
        envelope,
        sibling: Some((sibling_id, sibling_box)),
    })
}

/// Puts a new root above the two halves of a split root.
fn grow_root<S: PageStore>(
    store: &mut S,
    old_root: NodeId,
    old_root_box: BoundingBox,
    sibling_id: NodeId,
    sibling_box: BoundingBox,
) -> SpatialResult<()> {
    let root = store.create(
        false,
        None,
        vec![
            Entry::child(old_root_box, old_root),
            Entry::child(sibling_box, sibling_id),
        ],
    )?;
    for child_id in [old_root, sibling_id] {
        let mut child = store.get(child_id)?;
        child.set_parent(Some(root));
        store.put(child)?;
    }
    store.set_root(Some(root))?;
    log::debug!("Tree grew a level, new root {}", root);
    Ok(())
}

// ============================================================================
// Deletion
// ============================================================================

/// Finds the leaf holding an entry equal to `target`, descending only into
/// entries whose box contains the target box.
fn find_leaf<S: PageStore>(store: &mut S, root_id: NodeId, target: &Entry) -> SpatialResult<Option<Node>> {
    let mut pending = vec![root_id];
    while let Some(node_id) = pending.pop() {
        let node = store.get(node_id)?;
        if node.is_leaf() {
            if node.entries().iter().any(|e| e == target) {
                return Ok(Some(node));
            }
            continue;
        }
        pending.extend(
            node.entries()
                .iter()
                .filter(|e| e.bbox.contains(&target.bbox))
                .filter_map(Entry::child_id),
        );
    }
    Ok(None)
}

/// Walks from a shrunk leaf to the root, dissolving underfull nodes and
/// tightening boxes, then shortens the root. Returns the data entries of
/// dissolved nodes for reinsertion.
fn condense_tree<S: PageStore>(store: &mut S, config: &TreeConfig, leaf_id: NodeId) -> SpatialResult<Vec<Entry>> {
    let mut orphans = Vec::new();
    let mut node = store.get(leaf_id)?;

    while let Some(parent_id) = node.parent() {
        let mut parent = store.get(parent_id)?;
        let index = parent.position_of_child(node.id()).ok_or_else(|| {
            corrupted(format!("node {} is not a child of {}", node.id(), parent_id))
        })?;

        if node.entry_count() < config.min_node_entries {
            parent.remove_entry_at(index);
            dissolve_subtree(store, node, &mut orphans)?;
        } else {
            parent.set_entry_box(index, envelope_of(&node)?);
        }
        store.put(parent.clone())?;
        node = parent;
    }

    // `node` is now the root
    let mut root = node;
    loop {
        if root.is_empty() {
            store.set_root(None)?;
            store.remove(root.id())?;
            break;
        }
        if root.is_leaf() || root.entry_count() > 1 {
            break;
        }
        let child_id = root.entries()[0]
            .child_id()
            .ok_or_else(|| corrupted(format!("internal node {} holds data", root.id())))?;
        let mut child = store.get(child_id)?;
        child.set_parent(None);
        store.put(child.clone())?;
        store.set_root(Some(child_id))?;
        store.remove(root.id())?;
        log::debug!("Tree shrank a level, new root {}", child_id);
        root = child;
    }

    Ok(orphans)
}

/// Removes `node` and all of its descendants, collecting their data entries.
fn dissolve_subtree<S: PageStore>(store: &mut S, node: Node, orphans: &mut Vec<Entry>) -> SpatialResult<()> {
    let mut pending = vec![node];
    while let Some(node) = pending.pop() {
        if node.is_leaf() {
            orphans.extend(node.entries().iter().cloned());
        } else {
            for child_id in node.entries().iter().filter_map(Entry::child_id) {
                pending.push(store.get(child_id)?);
            }
        }
        store.remove(node.id())?;
    }
    Ok(())
}

fn tree_height<S: PageStore>(store: &mut S) -> SpatialResult<u32> {
    let Some(root_id) = store.get_root()? else {
        return Ok(0);
    };
    let mut height = 1;
    let mut node = store.get(root_id)?;
    while !node.is_leaf() {
        let child_id = node
            .entries()
            .first()
            .and_then(Entry::child_id)
            .ok_or_else(|| corrupted(format!("internal node {} has no child", node.id())))?;
        node = store.get(child_id)?;
        height += 1;
    }
    Ok(height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtree::SplitStrategy;
    use std::collections::HashSet;
    use tempfile::tempdir;

    fn small_config(strategy: SplitStrategy) -> TreeConfig {
        TreeConfig::new(4, 2, strategy)
    }

    fn unit_box(x: f64) -> BoundingBox {
        BoundingBox::rect(x, x, x + 1.0, x + 1.0)
    }

    fn as_set(ids: Vec<DataId>) -> HashSet<DataId> {
        ids.into_iter().collect()
    }

    #[test]
    fn test_create_empty_tree() {
        let tree = MemoryRTree::in_memory(TreeConfig::default()).unwrap();
        assert_eq!(tree.size(), 0);
        assert!(tree.is_empty());
        assert_eq!(tree.height().unwrap(), 0);
        assert!(tree.root().unwrap().is_none());
        assert!(tree
            .find_intersecting_keys(&BoundingBox::rect(0.0, 0.0, 1.0, 1.0))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = MemoryRTree::in_memory(TreeConfig::new(10, 10, SplitStrategy::Quadratic));
        assert!(matches!(result, Err(SpatialError::TreeConfiguration(_))));
    }

    #[test]
    fn test_fifth_insert_splits_root() {
        for strategy in [SplitStrategy::Quadratic, SplitStrategy::Linear] {
            let tree = MemoryRTree::in_memory(small_config(strategy)).unwrap();
            for (i, x) in [0.0, 5.0, 10.0, 15.0].into_iter().enumerate() {
                tree.insert(&unit_box(x), i as u64).unwrap();
            }
            let root = tree.root().unwrap().unwrap();
            assert!(root.is_leaf());
            assert_eq!(root.entry_count(), 4);

            tree.insert(&unit_box(20.0), 4).unwrap();
            let root = tree.root().unwrap().unwrap();
            assert!(!root.is_leaf(), "{} split did not grow the tree", strategy);
            assert_eq!(root.entry_count(), 2);
            assert_eq!(tree.height().unwrap(), 2);

            let mut total = 0;
            for entry in root.entries() {
                let child = tree.node(entry.child_id().unwrap()).unwrap();
                assert!(child.is_leaf());
                assert!((2..=4).contains(&child.entry_count()));
                assert_eq!(child.parent(), Some(root.id()));
                assert_eq!(child.envelope().as_ref(), Some(&entry.bbox));
                total += child.entry_count();
            }
            assert_eq!(total, 5);

            let found = tree
                .find_intersecting_keys(&BoundingBox::rect(0.0, 0.0, 21.0, 21.0))
                .unwrap();
            assert_eq!(as_set(found), (0..5).collect());
        }
    }

    #[test]
    fn test_search_prunes_and_repeats() {
        let tree = MemoryRTree::in_memory(small_config(SplitStrategy::Quadratic)).unwrap();
        for i in 0..50 {
            tree.insert(&unit_box(i as f64 * 2.0), i).unwrap();
        }

        let query = BoundingBox::rect(8.5, 8.5, 14.5, 14.5);
        let first = as_set(tree.find_intersecting_keys(&query).unwrap());
        let second = as_set(tree.find_intersecting_keys(&query).unwrap());
        assert_eq!(first, [4, 5, 6, 7].into_iter().collect());
        assert_eq!(first, second);

        let lazy: Vec<DataId> = tree.search(&query).unwrap().take(2).map(|r| r.unwrap()).collect();
        assert_eq!(lazy.len(), 2);
    }

    #[test]
    fn test_contained_keys() {
        let tree = MemoryRTree::in_memory(TreeConfig::default()).unwrap();
        tree.insert(&BoundingBox::rect(0.0, 0.0, 10.0, 10.0), 1).unwrap();
        tree.insert(&BoundingBox::rect(5.0, 5.0, 15.0, 15.0), 2).unwrap();
        tree.insert(&BoundingBox::rect(20.0, 20.0, 30.0, 30.0), 3).unwrap();

        let intersecting = tree
            .find_intersecting_keys(&BoundingBox::rect(8.0, 8.0, 12.0, 12.0))
            .unwrap();
        assert_eq!(as_set(intersecting), [1, 2].into_iter().collect());

        let contained = tree
            .find_contained_keys(&BoundingBox::rect(-1.0, -1.0, 11.0, 11.0))
            .unwrap();
        assert_eq!(contained, vec![1]);
    }

    #[test]
    fn test_dimension_mismatch() {
        let tree = MemoryRTree::in_memory(TreeConfig::default()).unwrap();
        let cube = BoundingBox::new(vec![0.0; 3], vec![1.0; 3]).unwrap();
        assert!(matches!(
            tree.insert(&cube, 1),
            Err(SpatialError::DimensionMismatch { expected: 2, found: 3 })
        ));
        assert!(matches!(
            tree.search(&cube),
            Err(SpatialError::DimensionMismatch { .. })
        ));
        assert!(tree.find_nearest(&[0.0], 1, None).is_err());
        assert_eq!(tree.size(), 0);
    }

    #[test]
    fn test_nan_boxes_rejected() {
        let tree = MemoryRTree::in_memory(TreeConfig::default()).unwrap();
        tree.insert(&unit_box(0.0), 1).unwrap();
        let nan = BoundingBox::rect(f64::NAN, f64::NAN, f64::NAN, f64::NAN);

        assert!(matches!(tree.insert(&nan, 2), Err(SpatialError::InvalidBoundingBox(_))));
        assert!(matches!(tree.remove(&nan, 1), Err(SpatialError::InvalidBoundingBox(_))));
        assert!(matches!(tree.search(&nan), Err(SpatialError::InvalidBoundingBox(_))));
        assert!(matches!(
            tree.find_nearest(&[f64::NAN, 0.0], 1, None),
            Err(SpatialError::InvalidBoundingBox(_))
        ));
        assert_eq!(tree.size(), 1);
    }

    #[test]
    fn test_three_dimensional_tree() {
        let config = small_config(SplitStrategy::Quadratic).with_dimensions(3);
        let tree = MemoryRTree::in_memory(config).unwrap();
        for i in 0..20u64 {
            let o = i as f64;
            let cube = BoundingBox::new(vec![o, o, o], vec![o + 1.0, o + 1.0, o + 1.0]).unwrap();
            tree.insert(&cube, i).unwrap();
        }
        let query = BoundingBox::new(vec![0.0; 3], vec![4.5; 3]).unwrap();
        assert_eq!(
            as_set(tree.find_intersecting_keys(&query).unwrap()),
            (0..5).collect()
        );
        assert!(tree.validate().unwrap().is_valid);
    }

    #[test]
    fn test_remove_and_condense() {
        let tree = MemoryRTree::in_memory(small_config(SplitStrategy::Quadratic)).unwrap();
        for i in 0..30 {
            tree.insert(&unit_box(i as f64 * 3.0), i).unwrap();
        }
        assert!(tree.height().unwrap() >= 2);

        assert!(!tree.remove(&unit_box(1.0), 0).unwrap());
        assert!(!tree.remove(&unit_box(0.0), 99).unwrap());

        for i in (0..30).step_by(2) {
            assert!(tree.remove(&unit_box(i as f64 * 3.0), i).unwrap());
            let report = tree.validate().unwrap();
            assert!(report.is_valid, "after removing {}: {:?}", i, report.errors);
        }
        assert_eq!(tree.size(), 15);

        let everything = BoundingBox::rect(-1.0, -1.0, 100.0, 100.0);
        let remaining = as_set(tree.find_intersecting_keys(&everything).unwrap());
        assert_eq!(remaining, (1..30).step_by(2).collect());

        for i in (1..30).step_by(2) {
            assert!(tree.remove(&unit_box(i as f64 * 3.0), i).unwrap());
        }
        assert_eq!(tree.size(), 0);
        assert_eq!(tree.height().unwrap(), 0);
        assert!(tree.root().unwrap().is_none());
    }

    #[test]
    fn test_duplicate_entries_removed_one_at_a_time() {
        let tree = MemoryRTree::in_memory(TreeConfig::default()).unwrap();
        let bbox = unit_box(1.0);
        tree.insert(&bbox, 7).unwrap();
        tree.insert(&bbox, 7).unwrap();

        assert!(tree.remove(&bbox, 7).unwrap());
        assert_eq!(tree.find_intersecting_keys(&bbox).unwrap(), vec![7]);
        assert!(tree.remove(&bbox, 7).unwrap());
        assert!(!tree.remove(&bbox, 7).unwrap());
    }

    #[test]
    fn test_find_nearest() {
        let tree = MemoryRTree::in_memory(small_config(SplitStrategy::Linear)).unwrap();
        for i in 0..40 {
            let x = i as f64 * 10.0;
            tree.insert(&BoundingBox::rect(x, 0.0, x, 0.0), i).unwrap();
        }

        let nearest = tree.find_nearest(&[52.0, 0.0], 3, None).unwrap();
        let ids: Vec<DataId> = nearest.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![5, 6, 4]);
        assert!((nearest[0].1 - 2.0).abs() < 1e-9);
        assert!(nearest.windows(2).all(|w| w[0].1 <= w[1].1));

        let bounded = tree.find_nearest(&[52.0, 0.0], 10, Some(10.0)).unwrap();
        assert_eq!(bounded.len(), 2);
        assert!(tree.find_nearest(&[52.0, 0.0], 0, None).unwrap().is_empty());
    }

    #[test]
    fn test_stats_and_clear() {
        let tree = MemoryRTree::in_memory(small_config(SplitStrategy::Quadratic)).unwrap();
        for i in 0..10 {
            tree.insert(&unit_box(i as f64), i).unwrap();
        }
        let stats = tree.stats().unwrap();
        assert_eq!(stats.total_entries, 10);
        assert!(stats.tree_height >= 2);
        assert!(stats.store.nodes >= 3);

        tree.clear().unwrap();
        assert_eq!(tree.size(), 0);
        tree.insert(&unit_box(0.0), 1).unwrap();
        assert_eq!(tree.size(), 1);
    }

    #[test]
    fn test_closed_tree_errors() {
        let tree = MemoryRTree::in_memory(TreeConfig::default()).unwrap();
        tree.insert(&unit_box(0.0), 1).unwrap();
        tree.close().unwrap();
        tree.close().unwrap();

        assert!(tree.is_closed());
        assert!(matches!(tree.insert(&unit_box(1.0), 2), Err(SpatialError::StoreClosed)));
        assert!(matches!(tree.search(&unit_box(0.0)), Err(SpatialError::StoreClosed)));
        assert_eq!(tree.size(), 0);
    }

    #[test]
    fn test_disk_tree_persistence_and_lazy_loading() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rtree");

        {
            let tree = DiskRTree::create(&path, small_config(SplitStrategy::Quadratic)).unwrap();
            for i in 0..100 {
                tree.insert(&unit_box(i as f64), i).unwrap();
            }
            tree.close().unwrap();
        }

        let tree = DiskRTree::open(&path).unwrap();
        assert_eq!(tree.path(), path);
        assert_eq!(tree.size(), 100);
        assert_eq!(tree.config(), &small_config(SplitStrategy::Quadratic));
        let stats = tree.stats().unwrap();
        assert_eq!(stats.total_entries, 100);
        // Only the path walked to measure the height has been loaded
        assert_eq!(stats.store.cached_nodes, stats.tree_height as u64);

        let found = tree
            .find_intersecting_keys(&BoundingBox::rect(10.5, 10.5, 12.5, 12.5))
            .unwrap();
        assert_eq!(as_set(found), [10, 11, 12].into_iter().collect());
        assert!(tree.validate().unwrap().is_valid);
    }

    #[test]
    fn test_disk_tree_with_tiny_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiny.rtree");

        let tree =
            DiskRTree::create_with_cache_size(&path, small_config(SplitStrategy::Linear), 3).unwrap();
        for i in 0..200 {
            tree.insert(&unit_box((i % 50) as f64 * 2.0), i).unwrap();
        }
        for i in 0..50 {
            assert!(tree.remove(&unit_box((i % 50) as f64 * 2.0), i).unwrap());
        }

        let stats = tree.stats().unwrap();
        assert!(stats.store.evictions > 0);
        assert_eq!(stats.store.failed_flushes, 0);
        assert!(stats.store.cached_nodes <= 3);

        let report = tree.validate().unwrap();
        assert!(report.is_valid, "{:?}", report.errors);
        assert_eq!(report.data_entries, 150);

        drop(tree);
        let reopened = DiskRTree::open_with_cache_size(&path, 3).unwrap();
        let everything = BoundingBox::rect(-1.0, -1.0, 200.0, 200.0);
        assert_eq!(
            as_set(reopened.find_intersecting_keys(&everything).unwrap()),
            (50..200).collect()
        );
    }

    #[test]
    fn test_removals_on_small_pages_keep_every_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("small_pages.rtree");
        let backend = FileBackend::create_with_page_size(&path, 512).unwrap();
        let store = CachedPageStore::create(backend, small_config(SplitStrategy::Linear), 16).unwrap();
        let tree = RTree::new(store).unwrap();

        for i in 0..400 {
            tree.insert(&unit_box((i % 100) as f64 * 2.0), i).unwrap();
        }
        for i in 0..300 {
            assert!(tree.remove(&unit_box((i % 100) as f64 * 2.0), i).unwrap());
        }

        let report = tree.validate().unwrap();
        assert!(report.is_valid, "{:?}", report.errors);
        assert_eq!(report.data_entries, 100);
        assert_eq!(tree.stats().unwrap().store.failed_flushes, 0);
        tree.close().unwrap();

        let backend = FileBackend::open_with_page_size(&path, 512).unwrap();
        let reopened = RTree::new(CachedPageStore::open(backend, 16).unwrap()).unwrap();
        let everything = BoundingBox::rect(-1.0, -1.0, 300.0, 300.0);
        assert_eq!(
            as_set(reopened.find_intersecting_keys(&everything).unwrap()),
            (300..400).collect()
        );
    }

    #[test]
    fn test_disk_tree_rejects_oversized_nodes() {
        let dir = tempdir().unwrap();
        let config = TreeConfig::new(2000, 10, SplitStrategy::Linear);
        assert!(matches!(
            DiskRTree::create(dir.path().join("big.rtree"), config),
            Err(SpatialError::TreeConfiguration(_))
        ));
    }

    #[test]
    fn test_drop_tree() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dropped.rtree");
        let tree = DiskRTree::create(&path, TreeConfig::default()).unwrap();
        tree.insert(&unit_box(0.0), 1).unwrap();

        tree.drop_tree().unwrap();
        assert!(tree.is_closed());
        assert!(DiskRTree::open(&path).is_err());
    }
}
