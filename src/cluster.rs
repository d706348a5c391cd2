//! Hierarchical clustering of a point set into a balanced spatial tree.
//!
//! The tree recursively bisects the index set along the coordinate
//! direction of largest spread, splitting at the median, until a range
//! fits into the configured leaf size. Nodes are stored in an arena and
//! refer to contiguous ranges of a permutation array, so the tree can be
//! shared read-only by any number of hierarchical matrices.

use crate::geometry::{BoundingBox, PointSet};
use crate::types::{HMatrixError, Result};

/// A node of the cluster tree.
pub struct ClusterNode {
    /// Index range [lo, hi) into the permutation array.
    pub range: (usize, usize),
    /// Tight bounding box around the points of this node.
    pub bbox: BoundingBox,
    /// Child node ids; empty for leaves.
    pub children: Vec<usize>,
    pub parent: Option<usize>,
    pub level: usize,
}

impl ClusterNode {
    pub fn size(&self) -> usize {
        self.range.1 - self.range.0
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// A balanced spatial tree over a point set.
pub struct ClusterTree {
    nodes: Vec<ClusterNode>,
    /// Tree position -> original point index.
    perm: Vec<usize>,
    /// Node ids grouped by level, root first.
    levels: Vec<Vec<usize>>,
    leaf_size: usize,
    n: usize,
}

impl ClusterTree {
    /// Build a cluster tree over `points` with the given leaf size bound.
    ///
    /// Identical inputs produce identical trees; ties between coincident
    /// coordinates are broken by original index order, and a range of
    /// fully coincident points is still halved so the recursion
    /// terminates.
    pub fn from_points(points: &PointSet, leaf_size: usize) -> Result<ClusterTree> {
        if leaf_size == 0 {
            return Err(HMatrixError::ConfigError(
                "leaf size must be positive".to_string(),
            ));
        }
        let n = points.len();

        let mut perm: Vec<usize> = (0..n).collect();
        let mut nodes = Vec::new();
        build_node(points, leaf_size, &mut perm, &mut nodes, 0, n, None, 0);

        let depth = nodes.iter().map(|node| node.level).max().unwrap() + 1;
        let mut levels = vec![Vec::new(); depth];
        for (id, node) in nodes.iter().enumerate() {
            levels[node.level].push(id);
        }

        Ok(ClusterTree {
            nodes,
            perm,
            levels,
            leaf_size,
            n,
        })
    }

    /// Number of points indexed by the tree.
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    /// Number of levels; the root is level 0.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn root(&self) -> usize {
        0
    }

    pub fn node(&self, id: usize) -> &ClusterNode {
        &self.nodes[id]
    }

    /// Node ids at the given level.
    pub fn level_nodes(&self, level: usize) -> &[usize] {
        &self.levels[level]
    }

    /// Ids of all leaf nodes, in tree order.
    pub fn leaves(&self) -> Vec<usize> {
        let mut leaves: Vec<usize> = (0..self.nodes.len())
            .filter(|&id| self.nodes[id].is_leaf())
            .collect();
        leaves.sort_by_key(|&id| self.nodes[id].range.0);
        leaves
    }

    /// The permutation from tree positions to original point indices.
    pub fn perm(&self) -> &[usize] {
        &self.perm
    }

    /// Original point indices owned by a node.
    pub fn node_indices(&self, id: usize) -> &[usize] {
        let (lo, hi) = self.nodes[id].range;
        &self.perm[lo..hi]
    }
}

#[allow(clippy::too_many_arguments)]
fn build_node(
    points: &PointSet,
    leaf_size: usize,
    perm: &mut Vec<usize>,
    nodes: &mut Vec<ClusterNode>,
    lo: usize,
    hi: usize,
    parent: Option<usize>,
    level: usize,
) -> usize {
    let bbox = BoundingBox::from_points(points, &perm[lo..hi]);
    let id = nodes.len();
    nodes.push(ClusterNode {
        range: (lo, hi),
        bbox,
        children: Vec::new(),
        parent,
        level,
    });

    let len = hi - lo;
    if len <= leaf_size {
        return id;
    }

    let bbox = &nodes[id].bbox;
    let split_dim = bbox.widest_dimension();
    if bbox.extent(split_dim) > 0.0 {
        // Median split along the widest direction, ties broken by
        // original index so the tree is reproducible.
        perm[lo..hi].sort_by(|&a, &b| {
            let ca = points.point(a)[split_dim];
            let cb = points.point(b)[split_dim];
            ca.partial_cmp(&cb).unwrap().then(a.cmp(&b))
        });
    } else {
        // All points coincident; halve by index order.
        perm[lo..hi].sort_unstable();
    }
    let mid = lo + len / 2;

    let left = build_node(points, leaf_size, perm, nodes, lo, mid, Some(id), level + 1);
    let right = build_node(points, leaf_size, perm, nodes, mid, hi, Some(id), level + 1);
    nodes[id].children = vec![left, right];

    id
}
