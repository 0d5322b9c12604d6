//! Structural integrity checking for R-Tree nodes.
//!
//! The check walks every node reachable from the root and reports:
//! - nodes that cannot be loaded
//! - entry counts outside the configured bounds
//! - parent entry boxes that are not the exact envelope of their child
//! - parent links that do not point back at the referencing node
//! - leaves at different depths
//! - a data entry total that differs from the stored count

use std::collections::HashSet;

use crate::bounding_box::BoundingBox;

use super::rtree_store::PageStore;
use super::rtree_types::{NodeId, Payload, SpatialError, SpatialResult};

/// Result of an integrity check
#[derive(Debug, Clone)]
pub struct IntegrityReport {
    /// Nodes loaded during the walk
    pub nodes_checked: u64,
    /// Data entries found in leaves
    pub data_entries: u64,
    /// Levels from the root down to the leaves, 0 for an empty tree
    pub height: u32,
    pub is_valid: bool,
    /// Detailed error messages
    pub errors: Vec<String>,
}

impl IntegrityReport {
    pub fn new() -> Self {
        Self {
            nodes_checked: 0,
            data_entries: 0,
            height: 0,
            is_valid: true,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, message: String) {
        self.is_valid = false;
        self.errors.push(message);
    }
}

impl Default for IntegrityReport {
    fn default() -> Self {
        Self::new()
    }
}

struct Visit {
    id: NodeId,
    parent: Option<NodeId>,
    parent_box: Option<BoundingBox>,
    depth: u32,
}

/// Walks the whole tree held by `store`.
///
/// Only a closed store aborts the walk; every other problem is recorded in
/// the report.
pub(crate) fn check_tree<S: PageStore>(store: &mut S) -> SpatialResult<IntegrityReport> {
    let mut report = IntegrityReport::new();
    let (max, min, dimensions) = {
        let config = store.config();
        (
            config.max_node_entries,
            config.min_node_entries,
            config.dimensions,
        )
    };

    let Some(root_id) = store.get_root()? else {
        let expected = store.entry_count()?;
        if expected != 0 {
            report.fail(format!("Empty tree reports {} entries", expected));
        }
        return Ok(report);
    };

    let mut visited = HashSet::new();
    let mut leaf_depth: Option<u32> = None;
    let mut pending = vec![Visit {
        id: root_id,
        parent: None,
        parent_box: None,
        depth: 1,
    }];

    while let Some(visit) = pending.pop() {
        if !visited.insert(visit.id) {
            report.fail(format!("Node {} is referenced more than once", visit.id));
            continue;
        }

        let node = match store.get(visit.id) {
            Ok(node) => node,
            Err(SpatialError::StoreClosed) => return Err(SpatialError::StoreClosed),
            Err(e) => {
                report.fail(format!("Node {}: {}", visit.id, e));
                continue;
            }
        };
        report.nodes_checked += 1;

        if node.parent() != visit.parent {
            report.fail(format!(
                "Node {} links to parent {:?}, expected {:?}",
                visit.id,
                node.parent(),
                visit.parent
            ));
        }

        let count = node.entry_count();
        let is_root = visit.parent.is_none();
        if count > max {
            report.fail(format!("Node {} holds {} entries, max is {}", visit.id, count, max));
        }
        if is_root {
            if count == 0 {
                report.fail(format!("Root {} is empty", visit.id));
            } else if !node.is_leaf() && count < 2 {
                report.fail(format!("Internal root {} has a single child", visit.id));
            }
        } else if count < min {
            report.fail(format!("Node {} holds {} entries, min is {}", visit.id, count, min));
        }

        if let (Some(parent_box), Some(envelope)) = (&visit.parent_box, node.envelope()) {
            if !parent_box.contains(&envelope) {
                report.fail(format!(
                    "Node {} envelope {} escapes its parent entry {}",
                    visit.id, envelope, parent_box
                ));
            } else if *parent_box != envelope {
                report.fail(format!(
                    "Node {} envelope {} is tighter than its parent entry {}",
                    visit.id, envelope, parent_box
                ));
            }
        }

        if node.is_leaf() {
            match leaf_depth {
                None => leaf_depth = Some(visit.depth),
                Some(depth) if depth != visit.depth => report.fail(format!(
                    "Leaf {} at depth {}, other leaves at depth {}",
                    visit.id, visit.depth, depth
                )),
                Some(_) => {}
            }
        }

        for entry in node.entries() {
            if entry.bbox.dimensions() != dimensions {
                report.fail(format!(
                    "Node {} holds a {}-dimensional box",
                    visit.id,
                    entry.bbox.dimensions()
                ));
            }
            match (node.is_leaf(), entry.payload) {
                (true, Payload::Data(_)) => report.data_entries += 1,
                (false, Payload::Child(child)) => pending.push(Visit {
                    id: child,
                    parent: Some(visit.id),
                    parent_box: Some(entry.bbox.clone()),
                    depth: visit.depth + 1,
                }),
                (true, Payload::Child(child)) => {
                    report.fail(format!("Leaf {} references child node {}", visit.id, child))
                }
                (false, Payload::Data(id)) => {
                    report.fail(format!("Internal node {} holds data id {}", visit.id, id))
                }
            }
        }
    }

    report.height = leaf_depth.unwrap_or(0);
    let expected = store.entry_count()?;
    if expected != report.data_entries {
        report.fail(format!(
            "Found {} data entries, the store counts {}",
            report.data_entries, expected
        ));
    }

    Ok(report)
}
