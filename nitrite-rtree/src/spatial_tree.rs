//! SpatialTree trait definition for spatial indexing.

use crate::bounding_box::BoundingBox;
use crate::rtree::{DataId, PageStore, RTree, SpatialResult};

/// Object-safe interface over any R-Tree, whatever store backs it.
///
/// This lets callers hold a `Box<dyn SpatialTree>` without knowing whether
/// the index lives in memory or on disk.
pub trait SpatialTree: Send + Sync {
    /// Adds a key to the tree.
    fn add(&self, key: &BoundingBox, id: DataId) -> SpatialResult<()>;

    /// Removes a key from the tree. Returns `false` if it was not indexed.
    fn remove(&self, key: &BoundingBox, id: DataId) -> SpatialResult<bool>;

    /// Finds the ids of all keys intersecting `key`.
    fn find_intersecting_keys(&self, key: &BoundingBox) -> SpatialResult<Vec<DataId>>;

    /// Finds the ids of all keys contained in `key`.
    fn find_contained_keys(&self, key: &BoundingBox) -> SpatialResult<Vec<DataId>>;

    /// Finds the K nearest entries to a point using best-first search.
    fn find_nearest(
        &self,
        point: &[f64],
        k: usize,
        max_distance: Option<f64>,
    ) -> SpatialResult<Vec<(DataId, f64)>>;

    /// Finds entries within a specific distance of a point (range query).
    fn find_within_distance(
        &self,
        point: &[f64],
        distance: f64,
    ) -> SpatialResult<Vec<(DataId, f64)>> {
        self.find_nearest(point, usize::MAX, Some(distance))
    }

    /// Gets the number of entries in the tree.
    fn size(&self) -> u64;

    /// Closes this tree, flushing all pending changes.
    fn close(&self) -> SpatialResult<()>;

    /// Clears all data from the tree.
    fn clear(&self) -> SpatialResult<()>;

    /// Drops this instance, removing all data.
    fn drop_tree(&self) -> SpatialResult<()>;
}

impl<S: PageStore + Send> SpatialTree for RTree<S> {
    fn add(&self, key: &BoundingBox, id: DataId) -> SpatialResult<()> {
        self.insert(key, id)
    }

    fn remove(&self, key: &BoundingBox, id: DataId) -> SpatialResult<bool> {
        RTree::remove(self, key, id)
    }

    fn find_intersecting_keys(&self, key: &BoundingBox) -> SpatialResult<Vec<DataId>> {
        RTree::find_intersecting_keys(self, key)
    }

    fn find_contained_keys(&self, key: &BoundingBox) -> SpatialResult<Vec<DataId>> {
        RTree::find_contained_keys(self, key)
    }

    fn find_nearest(
        &self,
        point: &[f64],
        k: usize,
        max_distance: Option<f64>,
    ) -> SpatialResult<Vec<(DataId, f64)>> {
        RTree::find_nearest(self, point, k, max_distance)
    }

    fn size(&self) -> u64 {
        RTree::size(self)
    }

    fn close(&self) -> SpatialResult<()> {
        RTree::close(self)
    }

    fn clear(&self) -> SpatialResult<()> {
        RTree::clear(self)
    }

    fn drop_tree(&self) -> SpatialResult<()> {
        RTree::drop_tree(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtree::{DiskRTree, MemoryRTree, SplitStrategy, TreeConfig};
    use tempfile::tempdir;

    fn exercise(tree: &dyn SpatialTree) {
        tree.add(&BoundingBox::rect(0.0, 0.0, 10.0, 10.0), 1).unwrap();
        tree.add(&BoundingBox::rect(5.0, 5.0, 15.0, 15.0), 2).unwrap();
        tree.add(&BoundingBox::rect(20.0, 20.0, 30.0, 30.0), 3).unwrap();
        assert_eq!(tree.size(), 3);

        let mut results = tree
            .find_intersecting_keys(&BoundingBox::rect(8.0, 8.0, 12.0, 12.0))
            .unwrap();
        results.sort_unstable();
        assert_eq!(results, vec![1, 2]);

        let results = tree
            .find_contained_keys(&BoundingBox::rect(-1.0, -1.0, 11.0, 11.0))
            .unwrap();
        assert_eq!(results, vec![1]);

        let within = tree.find_within_distance(&[16.0, 16.0], 6.0).unwrap();
        let ids: Vec<DataId> = within.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![2, 3]);

        assert!(tree.remove(&BoundingBox::rect(0.0, 0.0, 10.0, 10.0), 1).unwrap());
        assert!(!tree.remove(&BoundingBox::rect(0.0, 0.0, 10.0, 10.0), 1).unwrap());
        assert_eq!(tree.size(), 2);

        tree.clear().unwrap();
        assert_eq!(tree.size(), 0);
        tree.close().unwrap();
    }

    #[test]
    fn test_memory_tree_through_trait_object() {
        let tree: Box<dyn SpatialTree> =
            Box::new(MemoryRTree::in_memory(TreeConfig::default()).unwrap());
        exercise(tree.as_ref());
    }

    #[test]
    fn test_disk_tree_through_trait_object() {
        let dir = tempdir().unwrap();
        let config = TreeConfig::new(4, 2, SplitStrategy::Linear);
        let tree = DiskRTree::create(dir.path().join("trait.rtree"), config).unwrap();
        exercise(&tree);
    }
}
