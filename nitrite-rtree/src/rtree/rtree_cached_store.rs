//! Page store caching nodes in front of a slower backend.
//!
//! Every `get` goes through the [`NodeCache`]; a miss loads exactly one page
//! from the backend. `create` and `put` only touch the cache and mark the
//! node dirty. Dirty nodes reach the backend when they are evicted, when
//! they become the root, or on `flush`/`close`.
//!
//! Eviction flushes are best effort: if writing a victim fails, the failure
//! is logged and counted, and the node is dropped anyway. Its most recent
//! mutation is lost in that case; the operation that triggered the eviction
//! still succeeds.

use super::rtree_cache::NodeCache;
use super::rtree_codec::{
    decode_header, decode_node, encode_header, encode_node, max_node_record_size, StoreHeader,
};
use super::rtree_config::TreeConfig;
use super::rtree_constants::MAX_FREE_LIST_ENTRIES;
use super::rtree_storage::PageBackend;
use super::rtree_store::PageStore;
use super::rtree_types::{Entry, Node, NodeId, SpatialError, SpatialResult, StoreStats};

/// Internal statistics tracking
#[derive(Debug, Default)]
struct CacheStatistics {
    cache_hits: u64,
    cache_misses: u64,
    backend_reads: u64,
    backend_writes: u64,
    evictions: u64,
    failed_flushes: u64,
}

/// A [`PageStore`] backed by any [`PageBackend`] through a bounded cache.
pub struct CachedPageStore<B: PageBackend> {
    backend: B,
    cache: NodeCache,
    header: StoreHeader,
    /// Freed ids the header page can hold
    free_list_capacity: usize,
    stats: CacheStatistics,
    closed: bool,
}

impl<B: PageBackend> CachedPageStore<B> {
    /// Initializes an empty store on `backend`, overwriting its header.
    ///
    /// # Errors
    ///
    /// `TreeConfiguration` for an invalid configuration, a zero capacity,
    /// or a node or header size the backend pages cannot hold.
    pub fn create(backend: B, config: TreeConfig, cache_capacity: usize) -> SpatialResult<Self> {
        config.validate()?;
        check_capacity(cache_capacity)?;
        check_record_fits(&backend, &config)?;
        let header = StoreHeader::new(config);
        let free_list_capacity = free_list_capacity(&backend, &header)?;

        let mut store = Self {
            backend,
            cache: NodeCache::new(cache_capacity),
            header,
            free_list_capacity,
            stats: CacheStatistics::default(),
            closed: false,
        };
        store.write_header()?;
        store.backend.sync()?;

        log::debug!(
            "Created cached page store (capacity {}, {} split)",
            cache_capacity,
            store.header.config.split_strategy
        );
        Ok(store)
    }

    /// Opens a store previously initialized on `backend`.
    ///
    /// Only the header is read; nodes are loaded when first accessed.
    pub fn open(mut backend: B, cache_capacity: usize) -> SpatialResult<Self> {
        check_capacity(cache_capacity)?;
        let bytes = backend.read_header()?.ok_or_else(|| {
            SpatialError::InvalidOperation("Backend holds no store header".into())
        })?;
        let mut header = decode_header(&bytes)?;
        check_record_fits(&backend, &header.config)?;
        let free_list_capacity = free_list_capacity(&backend, &header)?;
        header.free_list.truncate(free_list_capacity);

        log::debug!(
            "Opened cached page store with {} entries, root {:?}",
            header.entry_count,
            header.root
        );
        Ok(Self {
            backend,
            cache: NodeCache::new(cache_capacity),
            header,
            free_list_capacity,
            stats: CacheStatistics::default(),
            closed: false,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn cache(&self) -> &NodeCache {
        &self.cache
    }

    fn check_closed(&self) -> SpatialResult<()> {
        if self.closed {
            Err(SpatialError::StoreClosed)
        } else {
            Ok(())
        }
    }

    fn check_allocated(&self, id: NodeId) -> SpatialResult<()> {
        if id == 0 || id >= self.header.next_node_id || self.header.free_list.contains(&id) {
            Err(SpatialError::NodeNotFound(id))
        } else {
            Ok(())
        }
    }

    fn allocate(&mut self) -> NodeId {
        if let Some(id) = self.header.free_list.pop() {
            return id;
        }
        let id = self.header.next_node_id;
        self.header.next_node_id += 1;
        id
    }

    fn write_header(&mut self) -> SpatialResult<()> {
        let bytes = encode_header(&self.header)?;
        self.backend.write_header(&bytes)
    }

    /// Writes a cached node to the backend if it is dirty. The dirty flag
    /// is cleared only once the write succeeded.
    fn flush_node(&mut self, id: NodeId) -> SpatialResult<()> {
        let bytes = match self.cache.peek(id) {
            Some(cached) if cached.dirty => encode_node(&cached.node)?,
            _ => return Ok(()),
        };
        self.backend.write_page(id, &bytes)?;
        self.stats.backend_writes += 1;
        self.cache.mark_clean(id);
        Ok(())
    }

    /// Puts a node into the cache, evicting least recently used nodes first
    /// when a new id would exceed the capacity.
    fn admit(&mut self, node: Node, dirty: bool) {
        if !self.cache.contains(node.id()) {
            while self.cache.needs_eviction() {
                let Some(victim) = self.cache.select_victim() else {
                    break;
                };
                if let Err(e) = self.flush_node(victim) {
                    self.stats.failed_flushes += 1;
                    log::warn!(
                        "Failed to flush node {} before eviction, its latest changes are lost: {}",
                        victim,
                        e
                    );
                }
                self.cache.evict(victim);
                self.stats.evictions += 1;
                log::trace!("Evicted node {} from cache", victim);
            }
        }
        self.cache.insert(node, dirty);
    }
}

impl<B: PageBackend> PageStore for CachedPageStore<B> {
    fn config(&self) -> &TreeConfig {
        &self.header.config
    }

    fn create(
        &mut self,
        leaf: bool,
        parent: Option<NodeId>,
        entries: Vec<Entry>,
    ) -> SpatialResult<NodeId> {
        self.check_closed()?;
        let id = self.allocate();
        self.admit(Node::new(id, leaf, parent, entries), true);
        Ok(id)
    }

    fn get(&mut self, id: NodeId) -> SpatialResult<Node> {
        self.check_closed()?;
        // Removed ids never stay cached
        if let Some(node) = self.cache.get(id) {
            self.stats.cache_hits += 1;
            return Ok(node.clone());
        }

        self.check_allocated(id)?;
        self.stats.cache_misses += 1;
        self.stats.backend_reads += 1;
        let bytes = self
            .backend
            .read_page(id)?
            .ok_or(SpatialError::NodeNotFound(id))?;
        let node = decode_node(&bytes)?;
        if node.id() != id {
            return Err(SpatialError::InvalidOperation(format!(
                "Page {} holds node {}",
                id,
                node.id()
            )));
        }

        self.admit(node.clone(), false);
        Ok(node)
    }

    fn put(&mut self, node: Node) -> SpatialResult<()> {
        self.check_closed()?;
        self.check_allocated(node.id())?;
        self.admit(node, true);
        Ok(())
    }

    fn remove(&mut self, id: NodeId) -> SpatialResult<()> {
        self.check_closed()?;
        self.check_allocated(id)?;
        self.cache.remove(id);
        self.backend.free_page(id)?;
        if self.header.free_list.len() < self.free_list_capacity {
            self.header.free_list.push(id);
        } else {
            log::trace!("Free list full, page {} is not reused", id);
        }
        Ok(())
    }

    fn get_root(&self) -> SpatialResult<Option<NodeId>> {
        self.check_closed()?;
        Ok(self.header.root)
    }

    fn set_root(&mut self, root: Option<NodeId>) -> SpatialResult<()> {
        self.check_closed()?;
        if let Some(id) = root {
            self.check_allocated(id)?;
            // The header must never point at a page that was not written
            self.flush_node(id)?;
        }
        let previous = std::mem::replace(&mut self.header.root, root);
        if let Err(e) = self.write_header() {
            self.header.root = previous;
            return Err(e);
        }
        Ok(())
    }

    fn entry_count(&self) -> SpatialResult<u64> {
        self.check_closed()?;
        Ok(self.header.entry_count)
    }

    fn set_entry_count(&mut self, count: u64) -> SpatialResult<()> {
        self.check_closed()?;
        self.header.entry_count = count;
        Ok(())
    }

    fn flush(&mut self) -> SpatialResult<()> {
        self.check_closed()?;
        for id in self.cache.dirty_ids() {
            self.flush_node(id)?;
        }
        self.write_header()?;
        self.backend.sync()
    }

    fn clear(&mut self) -> SpatialResult<()> {
        self.check_closed()?;
        self.cache.clear();
        // Old pages become unreachable and are overwritten as ids are reused
        self.header = StoreHeader::new(self.header.config.clone());
        self.write_header()?;
        self.backend.sync()
    }

    fn close(&mut self) -> SpatialResult<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.cache.clear();
        self.backend.close()?;
        self.closed = true;
        log::debug!("Closed cached page store");
        Ok(())
    }

    fn destroy(&mut self) -> SpatialResult<()> {
        self.cache.clear();
        self.backend.destroy()?;
        self.closed = true;
        log::debug!("Destroyed cached page store");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            nodes: (self.header.next_node_id - 1)
                .saturating_sub(self.header.free_list.len() as u64),
            cached_nodes: self.cache.len() as u64,
            cache_hits: self.stats.cache_hits,
            cache_misses: self.stats.cache_misses,
            backend_reads: self.stats.backend_reads,
            backend_writes: self.stats.backend_writes,
            evictions: self.stats.evictions,
            failed_flushes: self.stats.failed_flushes,
        }
    }
}

impl<B: PageBackend> std::fmt::Debug for CachedPageStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedPageStore")
            .field("header", &self.header)
            .field("free_list_capacity", &self.free_list_capacity)
            .field("cached_nodes", &self.cache.len())
            .field("closed", &self.closed)
            .finish()
    }
}

fn check_capacity(cache_capacity: usize) -> SpatialResult<()> {
    if cache_capacity == 0 {
        return Err(SpatialError::TreeConfiguration(
            "cache capacity must be at least 1 node".into(),
        ));
    }
    Ok(())
}

fn check_record_fits<B: PageBackend>(backend: &B, config: &TreeConfig) -> SpatialResult<()> {
    if let Some(max) = backend.max_record_size() {
        let needed = max_node_record_size(config.max_node_entries, config.dimensions);
        if needed > max {
            return Err(SpatialError::TreeConfiguration(format!(
                "a node of {} entries needs up to {} bytes, pages hold {}",
                config.max_node_entries, needed, max
            )));
        }
    }
    Ok(())
}

/// Number of freed ids that fit in the header record next to the other
/// header fields, capped at `MAX_FREE_LIST_ENTRIES`.
fn free_list_capacity<B: PageBackend>(backend: &B, header: &StoreHeader) -> SpatialResult<usize> {
    let Some(max) = backend.max_record_size() else {
        return Ok(MAX_FREE_LIST_ENTRIES);
    };
    // Largest header without free ids: a root is set
    let mut bare = header.clone();
    bare.root = Some(NodeId::MAX);
    bare.free_list.clear();
    let needed = encode_header(&bare)?.len();
    if needed > max {
        return Err(SpatialError::TreeConfiguration(format!(
            "the store header needs {} bytes, pages hold {}",
            needed, max
        )));
    }
    // Each free id adds one u64 to the record
    let per_id = std::mem::size_of::<NodeId>();
    Ok(((max - needed) / per_id).min(MAX_FREE_LIST_ENTRIES))
}
