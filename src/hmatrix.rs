//! The hierarchical matrix container.
//!
//! A matrix is described by a shared cluster tree, a shared block
//! structure and per-node nested bases: leaf nodes store an explicit
//! basis over their index range, internal nodes store only the transfer
//! matrix expressing their basis through the stacked bases of their
//! children. Low-rank blocks store a small coupling matrix between the
//! row and column node bases; inadmissible leaf blocks store an explicit
//! dense matrix. Numerical buffers are owned by the matrix, the tree and
//! the structure are not.

use std::io;
use std::sync::Arc;

use ndarray::{concatenate, s, Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::block::{BlockNode, BlockTree};
use crate::cluster::ClusterTree;
use crate::types::{HMatrixError, HScalar, MatVec, Result};

/// Hierarchical matrix with nested bases.
///
/// Symmetric matrices (`A = Aᵀ`, plain transpose) store only the lower
/// triangle of the block structure; the mirrored blocks are applied
/// implicitly. Row and column bases coincide.
#[derive(Clone)]
pub struct HMatrix<A: HScalar> {
    pub(crate) tree: Arc<ClusterTree>,
    pub(crate) structure: Arc<BlockTree>,
    /// Per node: explicit basis (size x rank) at leaves, stacked transfer
    /// matrix (sum of child ranks x rank) at internal nodes.
    pub(crate) bases: Vec<Array2<A>>,
    /// Dense buffers indexed by dense slot.
    pub(crate) dense: Vec<Array2<A>>,
    /// Coupling matrices indexed by low-rank slot.
    pub(crate) coupling: Vec<Array2<A>>,
}

impl<A: HScalar> HMatrix<A> {
    /// A structure-only, zero-filled matrix over the given tree: all
    /// ranks are zero and all dense blocks are zero.
    pub fn from_structure(tree: Arc<ClusterTree>, structure: Arc<BlockTree>) -> HMatrix<A> {
        let mut hmatrix = HMatrix {
            tree,
            structure,
            bases: Vec::new(),
            dense: Vec::new(),
            coupling: Vec::new(),
        };
        hmatrix.zero_data();
        hmatrix
    }

    /// Reset to the zero matrix, keeping the structure.
    pub fn zero_data(&mut self) {
        let tree = &self.tree;
        self.bases = (0..tree.num_nodes())
            .map(|id| {
                if tree.node(id).is_leaf() {
                    Array2::<A>::zeros((tree.node(id).size(), 0))
                } else {
                    Array2::<A>::zeros((0, 0))
                }
            })
            .collect();
        self.dense = self
            .structure
            .dense_blocks()
            .iter()
            .map(|&(row, col)| {
                Array2::<A>::zeros((tree.node(row).size(), tree.node(col).size()))
            })
            .collect();
        self.coupling = (0..self.structure.num_low_rank())
            .map(|_| Array2::<A>::zeros((0, 0)))
            .collect();
    }

    pub fn n(&self) -> usize {
        self.tree.n()
    }

    pub fn tree(&self) -> &Arc<ClusterTree> {
        &self.tree
    }

    pub fn structure(&self) -> &Arc<BlockTree> {
        &self.structure
    }

    pub fn is_symmetric(&self) -> bool {
        self.structure.is_symmetric()
    }

    /// Rank of the basis attached to a cluster node.
    pub fn rank(&self, node: usize) -> usize {
        self.bases[node].ncols()
    }

    /// Sum of all node ranks, a cheap measure of representation size.
    pub fn total_rank(&self) -> usize {
        self.bases.iter().map(|basis| basis.ncols()).sum()
    }

    /// Fail unless `other` was built over the same cluster tree and
    /// block structure.
    pub fn check_same_structure(&self, other: &HMatrix<A>) -> Result<()> {
        if !Arc::ptr_eq(&self.tree, &other.tree) {
            return Err(HMatrixError::StructureMismatch(
                "matrices built over different cluster trees".to_string(),
            ));
        }
        if !Arc::ptr_eq(&self.structure, &other.structure) {
            return Err(HMatrixError::StructureMismatch(
                "matrices built over different block structures".to_string(),
            ));
        }
        Ok(())
    }

    /// Materialize the basis of a node as an explicit (size x rank)
    /// matrix, resolving transfer matrices through the children.
    pub fn node_basis(&self, node: usize) -> Array2<A> {
        let cluster = self.tree.node(node);
        if cluster.is_leaf() {
            return self.bases[node].clone();
        }
        let child_bases: Vec<Array2<A>> = cluster
            .children
            .iter()
            .map(|&child| self.node_basis(child))
            .collect();
        let views: Vec<ArrayView2<A>> = child_bases.iter().map(|basis| basis.view()).collect();
        let stacked = block_diag(&views, cluster.size());
        stacked.dot(&self.bases[node])
    }

    /// Apply the matrix to a block of column vectors in original index
    /// order.
    pub fn matmat_impl(&self, mat: ArrayView2<A>) -> Array2<A> {
        let n = self.n();
        let width = mat.ncols();
        let perm = self.tree.perm();
        let symmetric = self.is_symmetric();

        // Permute the input into tree order.
        let mut x_tree = Array2::<A>::zeros((n, width));
        for pos in 0..n {
            x_tree.row_mut(pos).assign(&mat.row(perm[pos]));
        }

        let xhat = self.forward_transform(&x_tree);
        let mut yhat: Vec<Array2<A>> = (0..self.tree.num_nodes())
            .map(|id| Array2::<A>::zeros((self.rank(id), width)))
            .collect();
        let mut y_tree = Array2::<A>::zeros((n, width));

        for (slot, &(row, col)) in self.structure.low_rank_blocks().iter().enumerate() {
            let coupling = &self.coupling[slot];
            yhat[row] = &yhat[row] + &coupling.dot(&xhat[col]);
            if symmetric && row != col {
                yhat[col] = &yhat[col] + &coupling.t().dot(&xhat[row]);
            }
        }

        for (slot, &(row, col)) in self.structure.dense_blocks().iter().enumerate() {
            let dense = &self.dense[slot];
            let (rlo, rhi) = self.tree.node(row).range;
            let (clo, chi) = self.tree.node(col).range;
            let update = dense.dot(&x_tree.slice(s![clo..chi, ..]));
            let mut target = y_tree.slice_mut(s![rlo..rhi, ..]);
            target += &update;
            if symmetric && row != col {
                let update = dense.t().dot(&x_tree.slice(s![rlo..rhi, ..]));
                let mut target = y_tree.slice_mut(s![clo..chi, ..]);
                target += &update;
            }
        }

        self.backward_transform(yhat, &mut y_tree);

        // Permute the result back to original order.
        let mut output = Array2::<A>::zeros((n, width));
        for pos in 0..n {
            output.row_mut(perm[pos]).assign(&y_tree.row(pos));
        }
        output
    }

    /// Per-node coefficients `basisᵀ x` computed leaves first.
    fn forward_transform(&self, x_tree: &Array2<A>) -> Vec<Array2<A>> {
        let width = x_tree.ncols();
        let mut xhat: Vec<Array2<A>> = (0..self.tree.num_nodes())
            .map(|_| Array2::<A>::zeros((0, width)))
            .collect();

        for level in (0..self.tree.depth()).rev() {
            for &id in self.tree.level_nodes(level) {
                let cluster = self.tree.node(id);
                if cluster.is_leaf() {
                    let (lo, hi) = cluster.range;
                    xhat[id] = self.bases[id].t().dot(&x_tree.slice(s![lo..hi, ..]));
                } else {
                    let child_views: Vec<ArrayView2<A>> = cluster
                        .children
                        .iter()
                        .map(|&child| xhat[child].view())
                        .collect();
                    let stacked = concatenate(Axis(0), &child_views).unwrap();
                    xhat[id] = self.bases[id].t().dot(&stacked);
                }
            }
        }
        xhat
    }

    /// Accumulate `basis * yhat` into the output, parents first.
    fn backward_transform(&self, mut yhat: Vec<Array2<A>>, y_tree: &mut Array2<A>) {
        for level in 0..self.tree.depth() {
            for &id in self.tree.level_nodes(level) {
                let cluster = self.tree.node(id);
                if cluster.is_leaf() {
                    let (lo, hi) = cluster.range;
                    let update = self.bases[id].dot(&yhat[id]);
                    let mut target = y_tree.slice_mut(s![lo..hi, ..]);
                    target += &update;
                } else {
                    let contribution = self.bases[id].dot(&yhat[id]);
                    let mut offset = 0;
                    for &child in cluster.children.iter() {
                        let child_rank = self.rank(child);
                        let slice = contribution.slice(s![offset..offset + child_rank, ..]);
                        yhat[child] = &yhat[child] + &slice;
                        offset += child_rank;
                    }
                }
            }
        }
    }

    /// Materialize the full matrix in original index order.
    ///
    /// Intended for testing and validation only; this is O(n^2) memory.
    pub fn expand(&self) -> Array2<A> {
        let n = self.n();
        let symmetric = self.is_symmetric();
        let mut tree_order = Array2::<A>::zeros((n, n));

        let mut place = |block: &Array2<A>, row: usize, col: usize| {
            let (rlo, rhi) = self.tree.node(row).range;
            let (clo, chi) = self.tree.node(col).range;
            let mut target = tree_order.slice_mut(s![rlo..rhi, clo..chi]);
            target += block;
        };

        for (slot, &(row, col)) in self.structure.dense_blocks().iter().enumerate() {
            place(&self.dense[slot], row, col);
            if symmetric && row != col {
                place(&self.dense[slot].t().to_owned(), col, row);
            }
        }
        for (slot, &(row, col)) in self.structure.low_rank_blocks().iter().enumerate() {
            let row_basis = self.node_basis(row);
            let col_basis = self.node_basis(col);
            let block = row_basis.dot(&self.coupling[slot].dot(&col_basis.t()));
            if symmetric && row != col {
                place(&block.t().to_owned(), col, row);
            }
            place(&block, row, col);
        }

        let perm = self.tree.perm();
        let mut output = Array2::<A>::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                output[[perm[i], perm[j]]] = tree_order[[i, j]];
            }
        }
        output
    }

    /// Write the block structure as indented text: per block its kind,
    /// index ranges and, for low-rank blocks, the coupling rank.
    pub fn dump<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        self.dump_block(out, self.structure.root(), 0)
    }

    fn dump_block<W: io::Write>(&self, out: &mut W, id: usize, depth: usize) -> io::Result<()> {
        let indent = "  ".repeat(depth);
        match self.structure.block(id) {
            BlockNode::Dense { row, col, .. } => {
                let (rlo, rhi) = self.tree.node(*row).range;
                let (clo, chi) = self.tree.node(*col).range;
                writeln!(
                    out,
                    "{}dense   [{}, {}) x [{}, {})",
                    indent, rlo, rhi, clo, chi
                )?;
            }
            BlockNode::LowRank { row, col, slot } => {
                let (rlo, rhi) = self.tree.node(*row).range;
                let (clo, chi) = self.tree.node(*col).range;
                writeln!(
                    out,
                    "{}lowrank [{}, {}) x [{}, {}) rank ({}, {})",
                    indent,
                    rlo,
                    rhi,
                    clo,
                    chi,
                    self.coupling[*slot].nrows(),
                    self.coupling[*slot].ncols()
                )?;
            }
            BlockNode::Internal { row, col, children } => {
                let (rlo, rhi) = self.tree.node(*row).range;
                let (clo, chi) = self.tree.node(*col).range;
                writeln!(
                    out,
                    "{}block   [{}, {}) x [{}, {})",
                    indent, rlo, rhi, clo, chi
                )?;
                for &child in children {
                    self.dump_block(out, child, depth + 1)?;
                }
            }
        }
        Ok(())
    }
}

/// Stack matrices as the diagonal blocks of a tall block-diagonal
/// matrix with `rows` total rows.
pub(crate) fn block_diag<A: HScalar>(blocks: &[ArrayView2<A>], rows: usize) -> Array2<A> {
    let cols: usize = blocks.iter().map(|block| block.ncols()).sum();
    let mut output = Array2::<A>::zeros((rows, cols));
    let mut row_offset = 0;
    let mut col_offset = 0;
    for block in blocks {
        let mut target = output.slice_mut(s![
            row_offset..row_offset + block.nrows(),
            col_offset..col_offset + block.ncols()
        ]);
        target.assign(block);
        row_offset += block.nrows();
        col_offset += block.ncols();
    }
    output
}

impl<A: HScalar> MatVec for HMatrix<A> {
    type A = A;

    fn nrows(&self) -> usize {
        self.n()
    }

    fn ncols(&self) -> usize {
        self.n()
    }

    fn matvec(&self, vec: ArrayView1<A>) -> Array1<A> {
        let mat = vec.insert_axis(Axis(1));
        let result = self.matmat_impl(mat);
        result.index_axis(Axis(1), 0).to_owned()
    }
}

impl<A: HScalar> crate::types::MatMat for HMatrix<A> {
    fn matmat(&self, mat: ArrayView2<A>) -> Array2<A> {
        self.matmat_impl(mat)
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::admissibility::BoxCenterAdmissibility;
    use crate::geometry::PointSet;

    fn small_structure(symmetric: bool) -> (Arc<ClusterTree>, Arc<BlockTree>) {
        let points = PointSet::grid_1d(64, 0.0, 1.0).unwrap();
        let tree = Arc::new(ClusterTree::from_points(&points, 8).unwrap());
        let adm = BoxCenterAdmissibility::new(1.0);
        let structure = Arc::new(BlockTree::build(&tree, &adm, symmetric));
        (tree, structure)
    }

    #[test]
    fn zero_matrix_maps_to_zero() {
        let (tree, structure) = small_structure(true);
        let hmatrix = HMatrix::<f64>::from_structure(tree, structure);

        let x = ndarray::Array1::<f64>::ones(64);
        let y = hmatrix.matvec(x.view());
        assert!(y.iter().all(|&item| item == 0.0));
        assert_eq!(hmatrix.total_rank(), 0);
    }

    #[test]
    fn structure_mismatch_is_detected() {
        let (tree_a, structure_a) = small_structure(true);
        let (tree_b, structure_b) = small_structure(true);
        let first = HMatrix::<f64>::from_structure(tree_a.clone(), structure_a.clone());
        let second = HMatrix::<f64>::from_structure(tree_b, structure_b);
        let third = HMatrix::<f64>::from_structure(tree_a, structure_a);

        assert!(first.check_same_structure(&second).is_err());
        assert!(first.check_same_structure(&third).is_ok());
    }

    #[test]
    fn dump_mentions_every_leaf_block() {
        let (tree, structure) = small_structure(true);
        let hmatrix = HMatrix::<f64>::from_structure(tree, structure.clone());

        let mut buffer = Vec::new();
        hmatrix.dump(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        let dense_lines = text.lines().filter(|line| line.contains("dense")).count();
        let low_rank_lines = text.lines().filter(|line| line.contains("lowrank")).count();
        assert_eq!(dense_lines, structure.num_dense());
        assert_eq!(low_rank_lines, structure.num_low_rank());
    }
}
