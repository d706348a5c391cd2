//! Chebyshev interpolation operators for the direct construction path.
//!
//! Low-rank blocks of an asymptotically smooth kernel are built by
//! interpolating the kernel on tensor grids of first-kind Chebyshev
//! nodes over the cluster bounding boxes. The per-node interpolation
//! operators double as nested bases: evaluating a parent box's
//! interpolants at a child box's grid yields the transfer matrix.

use crate::geometry::BoundingBox;
use itertools::Itertools;
use ndarray::{Array2, ArrayView2};

/// First-kind Chebyshev nodes on [-1, 1], in increasing order.
pub fn chebyshev_nodes(order: usize) -> Vec<f64> {
    (0..order)
        .rev()
        .map(|i| {
            let theta = std::f64::consts::PI * (i as f64 + 0.5) / order as f64;
            theta.cos()
        })
        .collect()
}

/// Chebyshev polynomials T_0 .. T_{order-1} evaluated at the given
/// points, via the three-term recurrence.
fn chebyshev_polynomials(points: &[f64], order: usize) -> Array2<f64> {
    let mut values = Array2::<f64>::zeros((points.len(), order));
    for (i, &x) in points.iter().enumerate() {
        for j in 0..order {
            values[[i, j]] = if j == 0 {
                1.0
            } else if j == 1 {
                x
            } else {
                2.0 * x * values[[i, j - 1]] - values[[i, j - 2]]
            };
        }
    }
    values
}

/// One-dimensional interpolation operator from the Chebyshev nodes to
/// arbitrary targets in [-1, 1].
///
/// Entry (i, j) is S(x_j, t_i) = (2 sum_m T_m(x_j) T_m(t_i) - 1) / order,
/// so a function sampled at the nodes is interpolated by a right
/// multiplication with the node values.
pub fn interpolation_matrix(targets: &[f64], order: usize) -> Array2<f64> {
    let nodes = chebyshev_nodes(order);
    let t_targets = chebyshev_polynomials(targets, order);
    let t_nodes = chebyshev_polynomials(&nodes, order);

    let mut weights = t_targets.dot(&t_nodes.t());
    weights.map_inplace(|item| *item = (*item * 2.0 - 1.0) / order as f64);
    weights
}

/// Map a coordinate into the reference interval [-1, 1] of a box side.
fn to_reference(value: f64, lo: f64, hi: f64) -> f64 {
    if hi > lo {
        (2.0 * value - lo - hi) / (hi - lo)
    } else {
        0.0
    }
}

/// Tensor grid of Chebyshev nodes over a bounding box.
///
/// Returns a (order^dim, dim) array of coordinates. The grid ordering
/// matches [`box_interpolation`].
pub fn box_grid(bbox: &BoundingBox, order: usize) -> Array2<f64> {
    let dim = bbox.dim();
    let nodes = chebyshev_nodes(order);
    let size = order.pow(dim as u32);

    let mut grid = Array2::<f64>::zeros((size, dim));
    for (index, digits) in (0..dim)
        .map(|_| 0..order)
        .multi_cartesian_product()
        .enumerate()
    {
        for (d, &digit) in digits.iter().enumerate() {
            let center = 0.5 * (bbox.lo(d) + bbox.hi(d));
            grid[[index, d]] = center + 0.5 * bbox.extent(d) * nodes[digit];
        }
    }
    grid
}

/// Interpolation operator from the tensor grid of `bbox` to arbitrary
/// points: a (num points, order^dim) matrix whose entries are products
/// of the one-dimensional interpolation weights.
pub fn box_interpolation(points: ArrayView2<f64>, bbox: &BoundingBox, order: usize) -> Array2<f64> {
    let dim = bbox.dim();
    let num_points = points.nrows();
    let size = order.pow(dim as u32);

    // Per-dimension 1-D weights.
    let weights: Vec<Array2<f64>> = (0..dim)
        .map(|d| {
            let targets: Vec<f64> = points
                .column(d)
                .iter()
                .map(|&value| to_reference(value, bbox.lo(d), bbox.hi(d)))
                .collect();
            interpolation_matrix(&targets, order)
        })
        .collect();

    let mut output = Array2::<f64>::zeros((num_points, size));
    for (index, digits) in (0..dim)
        .map(|_| 0..order)
        .multi_cartesian_product()
        .enumerate()
    {
        for i in 0..num_points {
            let mut product = 1.0;
            for (d, &digit) in digits.iter().enumerate() {
                product *= weights[d][[i, digit]];
            }
            output[[i, index]] = product;
        }
    }
    output
}
