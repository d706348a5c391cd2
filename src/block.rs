//! The hierarchical block structure of a matrix over a cluster tree.
//!
//! Starting from the (root, root) pair, node pairs are classified by the
//! admissibility oracle: admissible pairs become low-rank leaves
//! immediately (never refined further), inadmissible leaf pairs become
//! dense blocks, everything else is split into the children pairs. For
//! symmetric matrices only the lower triangle including the diagonal is
//! generated; the upper triangle is inferred.

use crate::admissibility::Admissibility;
use crate::cluster::ClusterTree;

/// One block of the hierarchical partition.
pub enum BlockNode {
    /// Inadmissible leaf-by-leaf block stored as an explicit dense matrix.
    Dense {
        row: usize,
        col: usize,
        slot: usize,
    },
    /// Admissible block represented through the node bases and a coupling
    /// matrix.
    LowRank {
        row: usize,
        col: usize,
        slot: usize,
    },
    /// Recursively partitioned block.
    Internal {
        row: usize,
        col: usize,
        children: Vec<usize>,
    },
}

/// The block partition of a matrix over a cluster tree.
///
/// Dense and low-rank leaves are additionally indexed by flat slots so
/// that a hierarchical matrix can store its numerical buffers in plain
/// vectors parallel to the structure.
pub struct BlockTree {
    blocks: Vec<BlockNode>,
    symmetric: bool,
    /// Slot -> (row node, col node) for dense leaves.
    dense_blocks: Vec<(usize, usize)>,
    /// Slot -> (row node, col node) for low-rank leaves.
    low_rank_blocks: Vec<(usize, usize)>,
}

impl BlockTree {
    /// Generate the block structure for the given tree and admissibility
    /// condition. The construction is deterministic: the same tree and
    /// oracle always produce the same structure.
    pub fn build<Adm: Admissibility>(tree: &ClusterTree, adm: &Adm, symmetric: bool) -> BlockTree {
        let mut structure = BlockTree {
            blocks: Vec::new(),
            symmetric,
            dense_blocks: Vec::new(),
            low_rank_blocks: Vec::new(),
        };
        structure.build_block(tree, adm, tree.root(), tree.root());
        structure
    }

    fn build_block<Adm: Admissibility>(
        &mut self,
        tree: &ClusterTree,
        adm: &Adm,
        row: usize,
        col: usize,
    ) -> usize {
        let row_node = tree.node(row);
        let col_node = tree.node(col);
        let id = self.blocks.len();

        // The diagonal is never admissible, whatever the oracle says.
        if row != col && adm.is_admissible(&row_node.bbox, &col_node.bbox) {
            let slot = self.low_rank_blocks.len();
            self.low_rank_blocks.push((row, col));
            self.blocks.push(BlockNode::LowRank { row, col, slot });
            return id;
        }

        if row_node.is_leaf() && col_node.is_leaf() {
            let slot = self.dense_blocks.len();
            self.dense_blocks.push((row, col));
            self.blocks.push(BlockNode::Dense { row, col, slot });
            return id;
        }

        // Split whichever side has children; a leaf side contributes
        // itself.
        let row_children: Vec<usize> = if row_node.is_leaf() {
            vec![row]
        } else {
            row_node.children.clone()
        };
        let col_children: Vec<usize> = if col_node.is_leaf() {
            vec![col]
        } else {
            col_node.children.clone()
        };

        self.blocks.push(BlockNode::Internal {
            row,
            col,
            children: Vec::new(),
        });

        let mut children = Vec::new();
        for &row_child in row_children.iter() {
            for &col_child in col_children.iter() {
                // For symmetric diagonal blocks only the lower triangle is
                // kept; off-diagonal blocks already lie in one triangle.
                if self.symmetric
                    && row == col
                    && tree.node(row_child).range.0 < tree.node(col_child).range.0
                {
                    continue;
                }
                children.push(self.build_block(tree, adm, row_child, col_child));
            }
        }

        if let BlockNode::Internal {
            children: slot, ..
        } = &mut self.blocks[id]
        {
            *slot = children;
        }

        id
    }

    pub fn root(&self) -> usize {
        0
    }

    pub fn block(&self, id: usize) -> &BlockNode {
        &self.blocks[id]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    pub fn num_dense(&self) -> usize {
        self.dense_blocks.len()
    }

    pub fn num_low_rank(&self) -> usize {
        self.low_rank_blocks.len()
    }

    /// Dense leaves as (row node, col node), indexed by slot.
    pub fn dense_blocks(&self) -> &[(usize, usize)] {
        &self.dense_blocks
    }

    /// Low-rank leaves as (row node, col node), indexed by slot.
    pub fn low_rank_blocks(&self) -> &[(usize, usize)] {
        &self.low_rank_blocks
    }
}
