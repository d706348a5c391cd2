//! Global symmetric low-rank update of a hierarchical matrix.
//!
//! Adds `weight * u * uᵀ` to a symmetric matrix without ever forming
//! anything of size n x n. Bases are first orthogonalized, then each
//! cluster basis is extended by the directions of the update that it
//! cannot already represent. Because the update touches every far-field
//! block the same way, the extension is exact: couplings are padded and
//! receive the projected outer product, dense blocks absorb their part
//! of the outer product directly.

use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use num::traits::cast::cast;
use num::Float;

use crate::backend::DenseBackend;
use crate::hcompress::orthogonalize;
use crate::hmatrix::{block_diag, HMatrix};
use crate::types::{HMatrixError, HScalar, Result};

/// Apply `hmatrix += weight * u * uᵀ` in place.
///
/// `u` is given in original index order. Node ranks grow by at most the
/// number of columns of `u`; a recompression pass afterwards removes
/// directions the update made redundant.
pub fn hlru_sym_global<A, B>(
    hmatrix: &mut HMatrix<A>,
    u: ArrayView2<A>,
    weight: A,
    backend: &B,
) -> Result<()>
where
    A: HScalar,
    B: DenseBackend<A>,
{
    if !hmatrix.is_symmetric() {
        return Err(HMatrixError::ConfigError(
            "symmetric update requires a symmetric block structure".to_string(),
        ));
    }
    if u.nrows() != hmatrix.n() {
        return Err(HMatrixError::StructureMismatch(format!(
            "update has {} rows but the matrix indexes {} points",
            u.nrows(),
            hmatrix.n()
        )));
    }

    orthogonalize(hmatrix, backend)?;

    let tree = hmatrix.tree().clone();
    let structure = hmatrix.structure().clone();
    let n = tree.n();
    let width = u.ncols();
    let orth_tol = cast::<A::Real, f64>(A::Real::epsilon()).unwrap().sqrt();

    // The update in tree order.
    let perm = tree.perm();
    let mut w_tree = Array2::<A>::zeros((n, width));
    for pos in 0..n {
        w_tree.row_mut(pos).assign(&u.row(perm[pos]));
    }

    // Dense near field takes its part of the outer product directly.
    for (slot, &(row, col)) in structure.dense_blocks().iter().enumerate() {
        let (rlo, rhi) = tree.node(row).range;
        let (clo, chi) = tree.node(col).range;
        let w_row = w_tree.slice(s![rlo..rhi, ..]);
        let w_col = w_tree.slice(s![clo..chi, ..]);
        let update = w_row.dot(&w_col.t()).mapv(|item| item * weight);
        hmatrix.dense[slot] = &hmatrix.dense[slot] + &update;
    }

    // A node's basis matters only if the node or one of its ancestors
    // sits in a low-rank block.
    let mut used = vec![false; tree.num_nodes()];
    for &(row, col) in structure.low_rank_blocks() {
        used[row] = true;
        used[col] = true;
    }
    for level in 1..tree.depth() {
        for &id in tree.level_nodes(level) {
            if used[tree.node(id).parent.unwrap()] {
                used[id] = true;
            }
        }
    }

    // Materialize the orthonormal bases bottom up, extend the used ones
    // by the part of the update outside their span, and keep the
    // projected update coefficients for the coupling phase. The stored
    // transfer matrices still refer to the old child ranks, so parents
    // are materialized from the pre-extension child bases; the extended
    // bases only feed the coefficients and the rebuild below.
    let mut explicit_old: Vec<Array2<A>> = vec![Array2::<A>::zeros((0, 0)); tree.num_nodes()];
    let mut explicit: Vec<Array2<A>> = vec![Array2::<A>::zeros((0, 0)); tree.num_nodes()];
    let mut old_ranks = vec![0usize; tree.num_nodes()];
    let mut coeffs: Vec<Array2<A>> = vec![Array2::<A>::zeros((0, 0)); tree.num_nodes()];

    for level in (0..tree.depth()).rev() {
        for &id in tree.level_nodes(level) {
            let node = tree.node(id);
            old_ranks[id] = hmatrix.rank(id);

            let basis = if node.is_leaf() {
                hmatrix.bases[id].clone()
            } else {
                let views: Vec<ArrayView2<A>> = node
                    .children
                    .iter()
                    .map(|&child| explicit_old[child].view())
                    .collect();
                block_diag(&views, node.size()).dot(&hmatrix.bases[id])
            };

            explicit[id] = if used[id] {
                let (lo, hi) = node.range;
                let w_node = w_tree.slice(s![lo..hi, ..]);
                let residual = if basis.ncols() > 0 {
                    &w_node - &basis.dot(&basis.t().dot(&w_node))
                } else {
                    w_node.to_owned()
                };
                let extension = backend.orth(residual.view(), orth_tol)?;
                let extended =
                    concatenate(Axis(1), &[basis.view(), extension.view()]).unwrap();
                coeffs[id] = extended.t().dot(&w_node);
                extended
            } else {
                basis.clone()
            };
            explicit_old[id] = basis;
        }
    }

    // Rebuild leaves and transfers against the extended bases. The
    // extended parent restriction lies in the extended child span, so
    // the projection is exact.
    for id in 0..tree.num_nodes() {
        let node = tree.node(id);
        if node.is_leaf() {
            hmatrix.bases[id] = explicit[id].clone();
        } else {
            let pieces: Vec<Array2<A>> = node
                .children
                .iter()
                .map(|&child| {
                    let offset = tree.node(child).range.0 - node.range.0;
                    let rows = explicit[id]
                        .slice(s![offset..offset + tree.node(child).size(), ..]);
                    explicit[child].t().dot(&rows)
                })
                .collect();
            let views: Vec<ArrayView2<A>> = pieces.iter().map(|piece| piece.view()).collect();
            hmatrix.bases[id] = concatenate(Axis(0), &views).unwrap();
        }
    }

    // Couplings: pad the old matrix into the grown ranks and add the
    // projected outer product.
    for (slot, &(row, col)) in structure.low_rank_blocks().iter().enumerate() {
        let new_rows = hmatrix.rank(row);
        let new_cols = hmatrix.rank(col);
        let mut coupling = Array2::<A>::zeros((new_rows, new_cols));
        {
            let old = &hmatrix.coupling[slot];
            let mut corner = coupling.slice_mut(s![0..old_ranks[row], 0..old_ranks[col]]);
            corner.assign(old);
        }
        let update = coeffs[row].dot(&coeffs[col].t()).mapv(|item| item * weight);
        hmatrix.coupling[slot] = coupling + update;
    }

    Ok(())
}
