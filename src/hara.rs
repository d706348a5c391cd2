//! Randomized hierarchical approximation from operator samples.
//!
//! The operator is only accessed through [`MatMat`] products with
//! random probe matrices. Because the leaf blocks of the partition tile
//! the matrix disjointly, a probe supported on the far field of a
//! cluster reads the corresponding block row exactly; no peeling is
//! required. Bases are grown top down with adaptive Gaussian sampling,
//! couplings are read off with probes shaped like the column bases, and
//! the dense near field is recovered last from identity probes against
//! the residual operator, batched by a conflict-free coloring of the
//! leaves.
//!
//! Only symmetric structures are supported; symmetry here means equality
//! under the plain transpose.

use std::collections::HashSet;

use ndarray::{concatenate, s, Array2, ArrayView2, Axis};
use ndarray_linalg::Norm;
use num::traits::cast::cast;
use num::{Float, One};
use rand::Rng;

use crate::backend::DenseBackend;
use crate::cluster::ClusterTree;
use crate::hmatrix::HMatrix;
use crate::types::{HMatrixError, HScalar, MatMat, Result};

/// Controls for the randomized construction.
pub struct HaraOptions {
    /// Per-cluster budget of random probe vectors for basis detection.
    pub max_samples: usize,
    /// Probe vectors drawn per adaptive round.
    pub batch_size: usize,
    /// Absolute truncation tolerance, typically a relative tolerance
    /// scaled by a norm estimate of the operator.
    pub abs_tol: f64,
}

impl HaraOptions {
    pub fn new(abs_tol: f64) -> HaraOptions {
        HaraOptions {
            max_samples: 128,
            batch_size: 16,
            abs_tol,
        }
    }
}

/// Diagnostics of one construction run.
pub struct HaraStats {
    /// The absolute tolerance the run aimed for.
    pub requested_tol: f64,
    /// Total number of probe columns sent through the operator.
    pub samples: usize,
    /// False if any cluster exhausted its sample budget before reaching
    /// the tolerance; the result is then the best approximation within
    /// the budget.
    pub converged: bool,
    /// Largest residual estimate observed when a cluster stopped.
    pub max_residual: f64,
    /// Largest basis rank per tree level.
    pub level_ranks: Vec<usize>,
}

/// Construct a hierarchical approximation of a symmetric operator from
/// matrix-matrix samples.
///
/// The matrix is overwritten; only its tree and block structure are
/// kept. Fixing `rng` fixes the entire run.
pub fn hara<A, Op, B, R>(
    op: &Op,
    hmatrix: &mut HMatrix<A>,
    options: &HaraOptions,
    backend: &B,
    rng: &mut R,
) -> Result<HaraStats>
where
    A: HScalar,
    Op: MatMat<A = A>,
    B: DenseBackend<A>,
    R: Rng,
{
    if op.nrows() != op.ncols() {
        return Err(HMatrixError::ConfigError(
            "sampled operator must be square".to_string(),
        ));
    }
    if op.nrows() != hmatrix.n() {
        return Err(HMatrixError::StructureMismatch(format!(
            "operator has {} rows but the structure indexes {} points",
            op.nrows(),
            hmatrix.n()
        )));
    }
    if !hmatrix.is_symmetric() {
        return Err(HMatrixError::ConfigError(
            "randomized construction requires a symmetric block structure".to_string(),
        ));
    }
    if options.batch_size == 0 || options.max_samples == 0 {
        return Err(HMatrixError::ConfigError(
            "sample budget and batch size must be positive".to_string(),
        ));
    }

    hmatrix.zero_data();
    let tree = hmatrix.tree().clone();
    let structure = hmatrix.structure().clone();
    let n = tree.n();

    // Low-rank partners per cluster, in both directions of the stored
    // lower triangle.
    let mut partners: Vec<Vec<usize>> = vec![Vec::new(); tree.num_nodes()];
    for &(row, col) in structure.low_rank_blocks() {
        partners[row].push(col);
        partners[col].push(row);
    }

    let orth_tol = cast::<A::Real, f64>(A::Real::epsilon()).unwrap().sqrt();

    let mut scratch: Vec<Array2<A>> = (0..tree.num_nodes())
        .map(|id| Array2::<A>::zeros((tree.node(id).size(), 0)))
        .collect();
    let mut samples = 0usize;
    let mut converged = true;
    let mut max_residual = 0.0f64;

    // Basis detection, top down so that every basis contains the
    // restriction of its parent and the representation stays nested.
    for level in 1..tree.depth() {
        for &id in tree.level_nodes(level) {
            let node = tree.node(id);
            let parent = node.parent.unwrap();
            let offset = node.range.0 - tree.node(parent).range.0;

            let mut basis = if scratch[parent].ncols() > 0 {
                let restriction = scratch[parent]
                    .slice(s![offset..offset + node.size(), ..])
                    .to_owned();
                backend.orth(restriction.view(), orth_tol)?
            } else {
                Array2::<A>::zeros((node.size(), 0))
            };

            if !partners[id].is_empty() {
                let probe_rows = far_field_rows(&tree, &partners[id]);
                let target_rows = tree.node_indices(id);
                let node_tol = options.abs_tol * (node.size() as f64 / n as f64).sqrt();

                let mut used = 0;
                loop {
                    let batch = options.batch_size.min(options.max_samples - used);
                    let probe = A::draw_gaussian((probe_rows.len(), batch), rng);
                    let scattered = scatter_rows(n, &probe_rows, probe.view());
                    let response = op.matmat(scattered.view());
                    let local = gather_rows(&response, target_rows);
                    used += batch;
                    samples += batch;

                    let residual = if basis.ncols() > 0 {
                        &local - &basis.dot(&basis.t().dot(&local))
                    } else {
                        local
                    };
                    let estimate = max_column_norm(&residual);
                    if estimate <= node_tol {
                        max_residual = max_residual.max(estimate);
                        break;
                    }
                    if used >= options.max_samples {
                        log::warn!(
                            "cluster {} at level {} exhausted its {} samples, residual {:.3e} above {:.3e}",
                            id, level, options.max_samples, estimate, node_tol
                        );
                        converged = false;
                        max_residual = max_residual.max(estimate);
                        break;
                    }
                    let update = backend.orth(residual.view(), orth_tol)?;
                    if update.ncols() == 0 {
                        max_residual = max_residual.max(estimate);
                        break;
                    }
                    basis = concatenate(Axis(1), &[basis.view(), update.view()]).unwrap();
                }
            }
            scratch[id] = basis;
        }
    }

    let level_ranks: Vec<usize> = (0..tree.depth())
        .map(|level| {
            tree.level_nodes(level)
                .iter()
                .map(|&id| scratch[id].ncols())
                .max()
                .unwrap_or(0)
        })
        .collect();
    for (level, &rank) in level_ranks.iter().enumerate() {
        log::info!("level {}: max basis rank {}", level, rank);
    }

    // Couplings, one probe block per column cluster shaped like its
    // basis. The response restricted to a partner's rows is exactly the
    // block times the column basis.
    let mut col_slots: Vec<Vec<usize>> = vec![Vec::new(); tree.num_nodes()];
    for (slot, &(_, col)) in structure.low_rank_blocks().iter().enumerate() {
        col_slots[col].push(slot);
    }
    for col in 0..tree.num_nodes() {
        if col_slots[col].is_empty() {
            continue;
        }
        let width = scratch[col].ncols();
        if width == 0 {
            for &slot in &col_slots[col] {
                let (row, _) = structure.low_rank_blocks()[slot];
                hmatrix.coupling[slot] = Array2::<A>::zeros((scratch[row].ncols(), 0));
            }
            continue;
        }
        let scattered = scatter_rows(n, tree.node_indices(col), scratch[col].view());
        let response = op.matmat(scattered.view());
        samples += width;
        for &slot in &col_slots[col] {
            let (row, _) = structure.low_rank_blocks()[slot];
            let local = gather_rows(&response, tree.node_indices(row));
            hmatrix.coupling[slot] = scratch[row].t().dot(&local);
        }
    }

    // Install the nested representation: explicit bases at the leaves,
    // transfer matrices everywhere else. The parent restriction lies in
    // the child span by construction, so the projection is exact.
    for id in 0..tree.num_nodes() {
        let node = tree.node(id);
        if node.is_leaf() {
            hmatrix.bases[id] = scratch[id].clone();
        } else {
            let pieces: Vec<Array2<A>> = node
                .children
                .iter()
                .map(|&child| {
                    let offset = tree.node(child).range.0 - node.range.0;
                    let restriction = scratch[id]
                        .slice(s![offset..offset + tree.node(child).size(), ..]);
                    scratch[child].t().dot(&restriction)
                })
                .collect();
            let views: Vec<ArrayView2<A>> = pieces.iter().map(|piece| piece.view()).collect();
            hmatrix.bases[id] = concatenate(Axis(0), &views).unwrap();
        }
    }

    // Near field. The residual of the low-rank part is exactly the
    // union of the dense blocks, so identity probes read them off.
    // Leaves whose dense partner sets are disjoint share probe columns.
    let mut dense_partners: Vec<Vec<usize>> = vec![Vec::new(); tree.num_nodes()];
    for &(row, col) in structure.dense_blocks() {
        dense_partners[col].push(row);
        if row != col {
            dense_partners[row].push(col);
        }
    }

    let leaves = tree.leaves();
    let mut colors: Vec<Vec<usize>> = Vec::new();
    let mut color_used: Vec<HashSet<usize>> = Vec::new();
    for &leaf in leaves.iter() {
        let assigned = (0..colors.len()).find(|&c| {
            dense_partners[leaf]
                .iter()
                .all(|partner| !color_used[c].contains(partner))
        });
        let c = match assigned {
            Some(c) => c,
            None => {
                colors.push(Vec::new());
                color_used.push(HashSet::new());
                colors.len() - 1
            }
        };
        colors[c].push(leaf);
        color_used[c].extend(dense_partners[leaf].iter().copied());
    }

    let mut slots_by_col: Vec<Vec<usize>> = vec![Vec::new(); tree.num_nodes()];
    for (slot, &(_, col)) in structure.dense_blocks().iter().enumerate() {
        slots_by_col[col].push(slot);
    }

    for group in colors.iter() {
        let width = group.iter().map(|&leaf| tree.node(leaf).size()).max().unwrap();
        let mut probe = Array2::<A>::zeros((n, width));
        for &leaf in group.iter() {
            for (i, &index) in tree.node_indices(leaf).iter().enumerate() {
                probe[[index, i]] = A::one();
            }
        }
        let response = op.matmat(probe.view()) - hmatrix.matmat_impl(probe.view());
        samples += width;
        for &leaf in group.iter() {
            for &slot in &slots_by_col[leaf] {
                let (row, col) = structure.dense_blocks()[slot];
                let local = gather_rows(&response, tree.node_indices(row));
                hmatrix.dense[slot] = local.slice(s![.., 0..tree.node(col).size()]).to_owned();
            }
        }
    }

    log::info!(
        "construction used {} samples, converged: {}, max residual {:.3e}",
        samples,
        converged,
        max_residual
    );

    Ok(HaraStats {
        requested_tol: options.abs_tol,
        samples,
        converged,
        max_residual,
        level_ranks,
    })
}

/// Original-order row indices covered by the given clusters.
fn far_field_rows(tree: &ClusterTree, nodes: &[usize]) -> Vec<usize> {
    nodes
        .iter()
        .flat_map(|&node| tree.node_indices(node).iter().copied())
        .collect()
}

/// Spread the rows of `values` into an (n, width) matrix at the given
/// row positions; all other rows are zero.
fn scatter_rows<A: HScalar>(n: usize, rows: &[usize], values: ArrayView2<A>) -> Array2<A> {
    let mut output = Array2::<A>::zeros((n, values.ncols()));
    for (i, &row) in rows.iter().enumerate() {
        output.row_mut(row).assign(&values.row(i));
    }
    output
}

fn gather_rows<A: HScalar>(mat: &Array2<A>, rows: &[usize]) -> Array2<A> {
    let mut output = Array2::<A>::zeros((rows.len(), mat.ncols()));
    for (i, &row) in rows.iter().enumerate() {
        output.row_mut(i).assign(&mat.row(row));
    }
    output
}

fn max_column_norm<A: HScalar>(mat: &Array2<A>) -> f64 {
    mat.axis_iter(Axis(1))
        .map(|col| cast::<A::Real, f64>(col.norm_l2()).unwrap())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::admissibility::BoxCenterAdmissibility;
    use crate::backend::CpuBackend;
    use crate::block::BlockTree;
    use crate::geometry::PointSet;
    use crate::random::DrawGaussian;
    use crate::sampler::sampler_norm;
    use crate::types::{MatVec, RelDiff};
    use ndarray::ArrayView1;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn kernel(x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
        let dist: f64 = x
            .iter()
            .zip(y.iter())
            .map(|(&a, &b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        (-dist).exp()
    }

    fn kernel_matrix(points: &PointSet) -> Array2<f64> {
        let n = points.len();
        let mut mat = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                mat[[i, j]] = kernel(points.point(i), points.point(j));
            }
        }
        mat
    }

    fn setup(symmetric: bool) -> (Array2<f64>, HMatrix<f64>) {
        let points = PointSet::grid_2d(16, 16, 0.0, 1.0, 0.0, 1.0).unwrap();
        let tree = Arc::new(ClusterTree::from_points(&points, 32).unwrap());
        let adm = BoxCenterAdmissibility::new(1.0);
        let structure = Arc::new(BlockTree::build(&tree, &adm, symmetric));
        let hmatrix = HMatrix::<f64>::from_structure(tree, structure);
        (kernel_matrix(&points), hmatrix)
    }

    #[test]
    fn reconstructs_a_kernel_matrix_to_tolerance() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let (mat, mut hmatrix) = setup(true);
        let backend = CpuBackend::default();

        let norm = sampler_norm(&mat, 10, &mut rng);
        let options = HaraOptions::new(1E-5 * norm);
        let stats = hara(&mat, &mut hmatrix, &options, &backend, &mut rng).unwrap();

        assert!(stats.converged);
        assert!(f64::rel_diff_fro(hmatrix.expand().view(), mat.view()) < 1E-3);
    }

    #[test]
    fn tighter_tolerance_reduces_the_error() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(8);
        let (mat, mut hmatrix) = setup(true);
        let backend = CpuBackend::default();
        let norm = sampler_norm(&mat, 10, &mut rng);

        let mut errors = Vec::new();
        let mut ranks = Vec::new();
        for &eps in [1E-2, 1E-6].iter() {
            let options = HaraOptions::new(eps * norm);
            hara(&mat, &mut hmatrix, &options, &backend, &mut rng).unwrap();
            errors.push(f64::rel_diff_fro(hmatrix.expand().view(), mat.view()));
            ranks.push(hmatrix.total_rank());
        }

        assert!(errors[1] < errors[0]);
        assert!(ranks[1] >= ranks[0]);
    }

    #[test]
    fn bases_remain_nested() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(9);
        let (mat, mut hmatrix) = setup(true);
        let backend = CpuBackend::default();
        let options = HaraOptions::new(1E-6 * sampler_norm(&mat, 10, &mut rng));
        hara(&mat, &mut hmatrix, &options, &backend, &mut rng).unwrap();

        let tree = hmatrix.tree().clone();
        for id in 0..tree.num_nodes() {
            let node = tree.node(id);
            if node.is_leaf() || hmatrix.rank(id) == 0 {
                continue;
            }
            let parent_basis = hmatrix.node_basis(id);
            for &child in node.children.iter() {
                let offset = tree.node(child).range.0 - node.range.0;
                let restriction = parent_basis
                    .slice(s![offset..offset + tree.node(child).size(), ..])
                    .to_owned();
                let child_basis = hmatrix.node_basis(child);
                let residual =
                    &restriction - &child_basis.dot(&child_basis.t().dot(&restriction));
                assert!(max_column_norm(&residual) < 1E-10);
            }
        }
    }

    #[test]
    fn end_to_end_grid_reconstruction() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(12);
        let points = PointSet::grid_2d(32, 32, 0.0, 1.0, 0.0, 1.0).unwrap();
        let tree = Arc::new(ClusterTree::from_points(&points, 64).unwrap());
        let adm = BoxCenterAdmissibility::new(1.0);
        let backend = CpuBackend::default();

        let reference = crate::construction::build_hmatrix::<f64, _, _>(
            &points, &tree, &adm, &kernel, 8, true,
        )
        .unwrap();
        let norm = sampler_norm(&reference, 10, &mut rng);

        let mut errors = Vec::new();
        let mut ranks = Vec::new();
        for &eps in [1E-4, 1E-8].iter() {
            let mut reconstructed =
                crate::construction::build_hmatrix_structure::<f64, _>(&tree, &adm, true);
            let options = HaraOptions::new(eps * norm);
            let stats =
                hara(&reference, &mut reconstructed, &options, &backend, &mut rng).unwrap();
            assert!(stats.converged);
            let error = crate::sampler::sampler_difference(
                &reference,
                &reconstructed,
                40,
                &mut rng,
            )
            .unwrap()
                / norm;
            errors.push(error);
            ranks.push(reconstructed.total_rank());
        }

        assert!(errors[0] < 1E-3);
        assert!(errors[1] < errors[0]);
        assert!(ranks[1] >= ranks[0]);
    }

    #[test]
    fn exhausted_budget_is_reported_not_fatal() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(13);
        let (mat, mut hmatrix) = setup(true);
        let backend = CpuBackend::default();
        let norm = sampler_norm(&mat, 10, &mut rng);

        // A tolerance no cluster can reach within 8 probes.
        let mut options = HaraOptions::new(1E-10 * norm);
        options.max_samples = 8;
        options.batch_size = 4;
        let stats = hara(&mat, &mut hmatrix, &options, &backend, &mut rng).unwrap();

        assert!(!stats.converged);
        assert!(stats.max_residual > stats.requested_tol);

        // The result is still the best approximation within the budget
        // and stays usable.
        let error = f64::rel_diff_fro(hmatrix.expand().view(), mat.view());
        assert!(error.is_finite());
        assert!(error < 1.0);
        let x = f64::draw_gaussian((mat.nrows(), 1), &mut rng);
        let x = x.index_axis(Axis(1), 0).to_owned();
        assert!(hmatrix.matvec(x.view()).iter().all(|value| value.is_finite()));
    }

    #[test]
    fn non_symmetric_structure_is_rejected() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(10);
        let (mat, _) = setup(true);
        let (_, mut general) = setup(false);
        let backend = CpuBackend::default();
        let options = HaraOptions::new(1E-4);
        assert!(hara(&mat, &mut general, &options, &backend, &mut rng).is_err());
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let (_, mut hmatrix) = setup(true);
        let backend = CpuBackend::default();
        let small = Array2::<f64>::zeros((10, 10));
        let options = HaraOptions::new(1E-4);
        assert!(hara(&small, &mut hmatrix, &options, &backend, &mut rng).is_err());
    }
}
