//! Algebraic recompression of a hierarchical matrix.
//!
//! Runs in two phases. First a bottom-up orthogonalization brings every
//! node basis to orthonormal columns, folding the triangular factors
//! into the transfer and coupling matrices; this changes nothing
//! numerically. Then a top-down truncation computes, per node, the
//! dominant directions of all coupling matrices the node participates
//! in, weighted by the singular values inherited from its parent, and
//! projects bases, transfers and couplings onto them. Directions below
//! `eps` relative to the node's largest singular value are dropped.
//!
//! The representation stays nested and the bases stay orthonormal, so
//! compressing a second time with the same tolerance leaves the ranks
//! unchanged.

use ndarray::{concatenate, s, Array1, Array2, ArrayView2, Axis};
use num::traits::cast::cast;
use num::Float;

use crate::backend::{truncation_rank, DenseBackend};
use crate::hmatrix::HMatrix;
use crate::types::{HMatrixError, HScalar, Result};

/// Recompress `hmatrix` in place to the relative tolerance `eps`.
pub fn hcompress<A, B>(hmatrix: &mut HMatrix<A>, eps: f64, backend: &B) -> Result<()>
where
    A: HScalar,
    B: DenseBackend<A>,
{
    if !(eps >= 0.0) {
        return Err(HMatrixError::ConfigError(
            "compression tolerance must be non-negative".to_string(),
        ));
    }

    orthogonalize(hmatrix, backend)?;

    let tree = hmatrix.tree().clone();
    let structure = hmatrix.structure().clone();

    // Phase 2, first pass: per-node truncated projections. A node sees
    // every coupling it participates in, from the row side directly and
    // from the column side transposed, plus its parent's kept directions
    // pushed through the transfer and weighted by their singular values.
    let mut participations: Vec<Vec<(usize, bool)>> = vec![Vec::new(); tree.num_nodes()];
    for (slot, &(row, col)) in structure.low_rank_blocks().iter().enumerate() {
        participations[row].push((slot, true));
        participations[col].push((slot, false));
    }

    let mut proj: Vec<Array2<A>> = vec![Array2::<A>::zeros((0, 0)); tree.num_nodes()];
    let mut sigmas: Vec<Array1<A::Real>> = vec![Array1::<A::Real>::zeros(0); tree.num_nodes()];

    for level in 0..tree.depth() {
        for &id in tree.level_nodes(level) {
            let rank = hmatrix.rank(id);
            if rank == 0 {
                continue;
            }
            let mut pieces: Vec<Array2<A>> = Vec::new();
            for &(slot, is_row) in participations[id].iter() {
                if is_row {
                    pieces.push(hmatrix.coupling[slot].clone());
                } else {
                    pieces.push(hmatrix.coupling[slot].t().to_owned());
                }
            }
            if let Some(parent) = tree.node(id).parent {
                if sigmas[parent].len() > 0 {
                    let mut offset = 0;
                    for &sibling in tree.node(parent).children.iter() {
                        if sibling == id {
                            break;
                        }
                        offset += hmatrix.rank(sibling);
                    }
                    let rows = hmatrix.bases[parent].slice(s![offset..offset + rank, ..]);
                    let mut inherited = rows.dot(&proj[parent]);
                    for (j, mut col) in inherited.axis_iter_mut(Axis(1)).enumerate() {
                        let scale = A::from_real(sigmas[parent][j]);
                        col.map_inplace(|item| *item *= scale);
                    }
                    pieces.push(inherited);
                }
            }
            if pieces.is_empty() {
                continue;
            }
            let views: Vec<ArrayView2<A>> = pieces.iter().map(|piece| piece.view()).collect();
            let aggregate = concatenate(Axis(1), &views).unwrap();
            let (u, sigma, _) = backend.svd(aggregate.view())?;
            let kept = truncation_rank(sigma.view(), eps);
            proj[id] = u.slice(s![.., 0..kept]).to_owned();
            sigmas[id] = sigma.slice(s![0..kept]).to_owned();
        }
    }

    // Phase 2, second pass: apply the projections everywhere at once.
    let mut new_bases: Vec<Array2<A>> = Vec::with_capacity(tree.num_nodes());
    for id in 0..tree.num_nodes() {
        let node = tree.node(id);
        if node.is_leaf() {
            new_bases.push(hmatrix.bases[id].dot(&proj_or_empty(&proj, id, hmatrix.rank(id))));
        } else {
            let mut pieces = Vec::new();
            let mut offset = 0;
            for &child in node.children.iter() {
                let child_rank = hmatrix.rank(child);
                let rows = hmatrix.bases[id].slice(s![offset..offset + child_rank, ..]);
                pieces.push(proj_or_empty(&proj, child, child_rank).t().dot(&rows));
                offset += child_rank;
            }
            let views: Vec<ArrayView2<A>> = pieces.iter().map(|piece| piece.view()).collect();
            let stacked = concatenate(Axis(0), &views).unwrap();
            new_bases.push(stacked.dot(&proj_or_empty(&proj, id, hmatrix.rank(id))));
        }
    }
    for (slot, &(row, col)) in structure.low_rank_blocks().iter().enumerate() {
        let projected = proj_or_empty(&proj, row, hmatrix.rank(row))
            .t()
            .dot(&hmatrix.coupling[slot].dot(&proj_or_empty(&proj, col, hmatrix.rank(col))));
        hmatrix.coupling[slot] = projected;
    }
    hmatrix.bases = new_bases;

    log::debug!(
        "recompressed to eps {:.3e}, total rank {}",
        eps,
        hmatrix.total_rank()
    );
    Ok(())
}

/// Bring every node basis to orthonormal columns, folding the
/// triangular factors into the transfers and couplings. The represented
/// matrix does not change.
pub(crate) fn orthogonalize<A, B>(hmatrix: &mut HMatrix<A>, backend: &B) -> Result<()>
where
    A: HScalar,
    B: DenseBackend<A>,
{
    let tree = hmatrix.tree().clone();
    let structure = hmatrix.structure().clone();
    // Only exact numerical zeros are dropped here; real truncation is
    // the business of the caller.
    let orth_tol = cast::<A::Real, f64>(A::Real::epsilon()).unwrap() * 100.0;

    // rfac[id] maps the old basis of a node onto its orthogonalized
    // replacement: old = new * rfac.
    let mut rfac: Vec<Array2<A>> = vec![Array2::<A>::zeros((0, 0)); tree.num_nodes()];
    for level in (0..tree.depth()).rev() {
        for &id in tree.level_nodes(level) {
            let node = tree.node(id);
            let weighted = if node.is_leaf() {
                hmatrix.bases[id].clone()
            } else {
                // Transfer rows are grouped by child; pre-multiplying by
                // the child factors expresses the transfer against the
                // orthogonalized child bases.
                let mut pieces = Vec::new();
                let mut offset = 0;
                for &child in node.children.iter() {
                    let old_rank = rfac[child].ncols();
                    let rows = hmatrix.bases[id].slice(s![offset..offset + old_rank, ..]);
                    pieces.push(rfac[child].dot(&rows));
                    offset += old_rank;
                }
                let views: Vec<ArrayView2<A>> = pieces.iter().map(|piece| piece.view()).collect();
                concatenate(Axis(0), &views).unwrap()
            };
            let (q, r) = factorize(backend, weighted.view(), orth_tol)?;
            hmatrix.bases[id] = q;
            rfac[id] = r;
        }
    }
    for (slot, &(row, col)) in structure.low_rank_blocks().iter().enumerate() {
        hmatrix.coupling[slot] = rfac[row].dot(&hmatrix.coupling[slot].dot(&rfac[col].t()));
    }
    Ok(())
}

/// Thin factorization `mat = q * r` with orthonormal `q`, dropping
/// numerically zero directions.
fn factorize<A, B>(backend: &B, mat: ArrayView2<A>, tol: f64) -> Result<(Array2<A>, Array2<A>)>
where
    A: HScalar,
    B: DenseBackend<A>,
{
    let (u, sigma, vt) = backend.svd(mat)?;
    let rank = truncation_rank(sigma.view(), tol);
    let q = u.slice(s![.., 0..rank]).to_owned();
    let mut r = vt.slice(s![0..rank, ..]).to_owned();
    for (i, mut row) in r.axis_iter_mut(Axis(0)).enumerate() {
        let scale = A::from_real(sigma[i]);
        row.map_inplace(|item| *item *= scale);
    }
    Ok((q, r))
}

/// The projection of a node, or the zero map if the node kept nothing.
fn proj_or_empty<A: HScalar>(proj: &[Array2<A>], id: usize, rank: usize) -> Array2<A> {
    if proj[id].nrows() == rank {
        proj[id].clone()
    } else {
        Array2::<A>::zeros((rank, 0))
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::admissibility::BoxCenterAdmissibility;
    use crate::backend::CpuBackend;
    use crate::cluster::ClusterTree;
    use crate::construction::build_hmatrix;
    use crate::geometry::PointSet;
    use crate::types::RelDiff;
    use ndarray::ArrayView1;
    use std::sync::Arc;

    fn kernel(x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
        let dist: f64 = x
            .iter()
            .zip(y.iter())
            .map(|(&a, &b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        1.0 / (1.0 + dist)
    }

    fn chebyshev_hmatrix() -> HMatrix<f64> {
        let points = PointSet::grid_1d(256, 0.0, 1.0).unwrap();
        let tree = Arc::new(ClusterTree::from_points(&points, 16).unwrap());
        let adm = BoxCenterAdmissibility::new(1.0);
        build_hmatrix::<f64, _, _>(&points, &tree, &adm, &kernel, 8, true).unwrap()
    }

    #[test]
    fn compression_reduces_rank_and_keeps_accuracy() {
        let mut hmatrix = chebyshev_hmatrix();
        let reference = hmatrix.expand();
        let rank_before = hmatrix.total_rank();

        hcompress(&mut hmatrix, 1E-6, &CpuBackend::default()).unwrap();

        assert!(hmatrix.total_rank() < rank_before);
        assert!(f64::rel_diff_fro(hmatrix.expand().view(), reference.view()) < 1E-4);
    }

    #[test]
    fn compression_is_idempotent() {
        let mut hmatrix = chebyshev_hmatrix();
        let backend = CpuBackend::default();

        hcompress(&mut hmatrix, 1E-5, &backend).unwrap();
        let rank_first = hmatrix.total_rank();
        let expanded_first = hmatrix.expand();

        hcompress(&mut hmatrix, 1E-5, &backend).unwrap();
        assert_eq!(hmatrix.total_rank(), rank_first);
        assert!(
            f64::rel_diff_fro(hmatrix.expand().view(), expanded_first.view()) < 1E-10
        );
    }

    #[test]
    fn looser_tolerance_compresses_further() {
        let mut tight = chebyshev_hmatrix();
        let mut loose = tight.clone();
        let backend = CpuBackend::default();

        hcompress(&mut tight, 1E-10, &backend).unwrap();
        hcompress(&mut loose, 1E-2, &backend).unwrap();

        assert!(loose.total_rank() < tight.total_rank());
    }

    #[test]
    fn bases_are_orthonormal_after_compression() {
        let mut hmatrix = chebyshev_hmatrix();
        hcompress(&mut hmatrix, 1E-6, &CpuBackend::default()).unwrap();

        let tree = hmatrix.tree().clone();
        for id in 0..tree.num_nodes() {
            if hmatrix.rank(id) == 0 {
                continue;
            }
            let basis = hmatrix.node_basis(id);
            let gram = basis.t().dot(&basis);
            for ((i, j), &value) in gram.indexed_iter() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((value - expected).abs() < 1E-10);
            }
        }
    }

    #[test]
    fn negative_tolerance_is_rejected() {
        let mut hmatrix = chebyshev_hmatrix();
        assert!(hcompress(&mut hmatrix, -1.0, &CpuBackend::default()).is_err());
    }
}
