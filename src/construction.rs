//! Direct construction of a hierarchical matrix from an entry generator.
//!
//! Dense blocks are evaluated pointwise. Low-rank blocks are built by
//! Chebyshev interpolation of the kernel over the cluster bounding
//! boxes: leaf bases are interpolation operators onto the box grids,
//! internal transfer matrices interpolate a parent grid at the child
//! grids, and the coupling of an admissible pair is the kernel sampled
//! at the two grids. With interpolation order k the blocks have rank
//! k^dim before any recompression.

use std::sync::Arc;

use ndarray::{Array2, ArrayView1, Axis};
use num::traits::cast::cast;
use rayon::prelude::*;

use crate::admissibility::Admissibility;
use crate::block::BlockTree;
use crate::chebyshev::{box_grid, box_interpolation};
use crate::cluster::ClusterTree;
use crate::geometry::PointSet;
use crate::hmatrix::HMatrix;
use crate::types::{HMatrixError, HScalar, Result, Scalar};

/// Pointwise source of matrix entries.
///
/// Implementations must be pure: the entry may depend only on the two
/// point coordinates.
pub trait EntryGenerator<A: HScalar>: Sync {
    fn entry(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> A;
}

impl<A: HScalar, F> EntryGenerator<A> for F
where
    F: Fn(ArrayView1<f64>, ArrayView1<f64>) -> A + Sync,
{
    fn entry(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> A {
        self(x, y)
    }
}

/// A structure-only, zero-filled hierarchical matrix over the tree.
pub fn build_hmatrix_structure<A: HScalar, Adm: Admissibility>(
    tree: &Arc<ClusterTree>,
    adm: &Adm,
    symmetric: bool,
) -> HMatrix<A> {
    let structure = Arc::new(BlockTree::build(tree, adm, symmetric));
    HMatrix::from_structure(tree.clone(), structure)
}

/// Build a hierarchical matrix from an entry generator by Chebyshev
/// interpolation.
pub fn build_hmatrix<A, G, Adm>(
    points: &PointSet,
    tree: &Arc<ClusterTree>,
    adm: &Adm,
    gen: &G,
    order: usize,
    symmetric: bool,
) -> Result<HMatrix<A>>
where
    A: HScalar + Send + Sync,
    G: EntryGenerator<A>,
    Adm: Admissibility,
{
    if order == 0 {
        return Err(HMatrixError::ConfigError(
            "interpolation order must be positive".to_string(),
        ));
    }
    if points.len() != tree.n() {
        return Err(HMatrixError::StructureMismatch(
            "point set does not match the cluster tree".to_string(),
        ));
    }

    let mut hmatrix = build_hmatrix_structure::<A, Adm>(tree, adm, symmetric);
    let structure = hmatrix.structure().clone();

    // Node bases: interpolation onto the box grid at leaves, grid to
    // grid interpolation at internal nodes.
    for id in 0..tree.num_nodes() {
        let node = tree.node(id);
        if node.is_leaf() {
            let coords = node_coordinates(points, tree, id);
            let weights = box_interpolation(coords.view(), &node.bbox, order);
            hmatrix.bases[id] = real_to_scalar(&weights);
        } else {
            let child_weights: Vec<Array2<f64>> = node
                .children
                .iter()
                .map(|&child| {
                    let child_grid = box_grid(&tree.node(child).bbox, order);
                    box_interpolation(child_grid.view(), &node.bbox, order)
                })
                .collect();
            let views: Vec<_> = child_weights.iter().map(|w| w.view()).collect();
            let transfer = ndarray::concatenate(Axis(0), &views).unwrap();
            hmatrix.bases[id] = real_to_scalar(&transfer);
        }
    }

    // Couplings: the kernel sampled at the two box grids.
    hmatrix.coupling = structure
        .low_rank_blocks()
        .par_iter()
        .map(|&(row, col)| {
            let row_grid = box_grid(&tree.node(row).bbox, order);
            let col_grid = box_grid(&tree.node(col).bbox, order);
            let mut coupling = Array2::<A>::zeros((row_grid.nrows(), col_grid.nrows()));
            for i in 0..row_grid.nrows() {
                for j in 0..col_grid.nrows() {
                    coupling[[i, j]] = gen.entry(row_grid.row(i), col_grid.row(j));
                }
            }
            coupling
        })
        .collect();

    // Dense near field, evaluated pointwise.
    hmatrix.dense = structure
        .dense_blocks()
        .par_iter()
        .map(|&(row, col)| {
            let row_indices = tree.node_indices(row);
            let col_indices = tree.node_indices(col);
            let mut dense = Array2::<A>::zeros((row_indices.len(), col_indices.len()));
            for (i, &pi) in row_indices.iter().enumerate() {
                for (j, &pj) in col_indices.iter().enumerate() {
                    dense[[i, j]] = gen.entry(points.point(pi), points.point(pj));
                }
            }
            dense
        })
        .collect();

    Ok(hmatrix)
}

fn node_coordinates(points: &PointSet, tree: &ClusterTree, id: usize) -> Array2<f64> {
    let indices = tree.node_indices(id);
    let mut coords = Array2::<f64>::zeros((indices.len(), points.dim()));
    for (i, &index) in indices.iter().enumerate() {
        coords.row_mut(i).assign(&points.point(index));
    }
    coords
}

fn real_to_scalar<A: HScalar>(mat: &Array2<f64>) -> Array2<A> {
    mat.map(|&value| A::from_real(cast::<f64, A::Real>(value).unwrap()))
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::admissibility::BoxCenterAdmissibility;
    use crate::types::{MatVec, RelDiff};
    use ndarray::Array1;
    use ndarray_linalg::Norm;

    fn exp_kernel(x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
        let dist: f64 = x
            .iter()
            .zip(y.iter())
            .map(|(&a, &b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt();
        (-dist).exp()
    }

    fn dense_reference(points: &PointSet) -> Array2<f64> {
        let n = points.len();
        let mut mat = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..n {
                mat[[i, j]] = exp_kernel(points.point(i), points.point(j));
            }
        }
        mat
    }

    #[test]
    fn expansion_matches_the_kernel_matrix() {
        let points = PointSet::grid_2d(16, 16, 0.0, 1.0, 0.0, 1.0).unwrap();
        let tree = Arc::new(ClusterTree::from_points(&points, 16).unwrap());
        let adm = BoxCenterAdmissibility::new(1.0);

        let hmatrix =
            build_hmatrix::<f64, _, _>(&points, &tree, &adm, &exp_kernel, 6, true).unwrap();
        let expanded = hmatrix.expand();
        let reference = dense_reference(&points);

        assert!(f64::rel_diff_fro(expanded.view(), reference.view()) < 1E-5);
    }

    #[test]
    fn matvec_agrees_with_expansion() {
        let points = PointSet::grid_1d(128, 0.0, 1.0).unwrap();
        let tree = Arc::new(ClusterTree::from_points(&points, 16).unwrap());
        let adm = BoxCenterAdmissibility::new(1.0);

        let hmatrix =
            build_hmatrix::<f64, _, _>(&points, &tree, &adm, &exp_kernel, 8, true).unwrap();
        let expanded = hmatrix.expand();

        let mut rng = rand::thread_rng();
        let x = crate::random::DrawGaussian::draw_gaussian((128, 1), &mut rng);
        let x: Array1<f64> = x.index_axis(Axis(1), 0).to_owned();

        let fast = hmatrix.matvec(x.view());
        let direct = expanded.dot(&x);

        let diff = &fast - &direct;
        assert!(diff.norm_l2() / direct.norm_l2() < 1E-10);
    }

    #[test]
    fn general_structure_matches_symmetric_expansion() {
        let points = PointSet::grid_1d(64, 0.0, 1.0).unwrap();
        let tree = Arc::new(ClusterTree::from_points(&points, 8).unwrap());
        let adm = BoxCenterAdmissibility::new(1.0);

        let symmetric =
            build_hmatrix::<f64, _, _>(&points, &tree, &adm, &exp_kernel, 6, true).unwrap();
        let general =
            build_hmatrix::<f64, _, _>(&points, &tree, &adm, &exp_kernel, 6, false).unwrap();

        assert!(
            f64::rel_diff_fro(symmetric.expand().view(), general.expand().view()) < 1E-12
        );
    }

    #[test]
    fn interpolation_order_zero_is_rejected() {
        let points = PointSet::grid_1d(16, 0.0, 1.0).unwrap();
        let tree = Arc::new(ClusterTree::from_points(&points, 4).unwrap());
        let adm = BoxCenterAdmissibility::new(1.0);
        assert!(
            build_hmatrix::<f64, _, _>(&points, &tree, &adm, &exp_kernel, 0, true).is_err()
        );
    }
}
