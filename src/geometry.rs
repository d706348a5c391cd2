//! Point sets and axis-aligned bounding boxes.

use crate::types::{HMatrixError, Result};
use ndarray::{Array2, ArrayView1};

/// An ordered set of points in 1, 2 or 3 dimensions.
///
/// The coordinates are stored as an (n, dim) array and are immutable after
/// construction. Cluster trees reference the point set, they do not copy it.
pub struct PointSet {
    coords: Array2<f64>,
}

impl PointSet {
    /// Create a point set from an (n, dim) coordinate array.
    pub fn new(coords: Array2<f64>) -> Result<PointSet> {
        if coords.nrows() == 0 {
            return Err(HMatrixError::ConfigError("empty point set".to_string()));
        }
        let dim = coords.ncols();
        if dim == 0 || dim > 3 {
            return Err(HMatrixError::ConfigError(format!(
                "unsupported point dimension {}",
                dim
            )));
        }
        if coords.iter().any(|value| !value.is_finite()) {
            return Err(HMatrixError::ConfigError(
                "point coordinates must be finite".to_string(),
            ));
        }
        Ok(PointSet { coords })
    }

    /// Regularly spaced points on the interval [x0, x1].
    pub fn grid_1d(nx: usize, x0: f64, x1: f64) -> Result<PointSet> {
        let mut coords = Array2::<f64>::zeros((nx, 1));
        for i in 0..nx {
            coords[[i, 0]] = grid_coord(i, nx, x0, x1);
        }
        PointSet::new(coords)
    }

    /// Regular nx x ny grid on the rectangle [x0, x1] x [y0, y1].
    pub fn grid_2d(nx: usize, ny: usize, x0: f64, x1: f64, y0: f64, y1: f64) -> Result<PointSet> {
        let mut coords = Array2::<f64>::zeros((nx * ny, 2));
        for j in 0..ny {
            for i in 0..nx {
                let index = j * nx + i;
                coords[[index, 0]] = grid_coord(i, nx, x0, x1);
                coords[[index, 1]] = grid_coord(j, ny, y0, y1);
            }
        }
        PointSet::new(coords)
    }

    /// Regular nx x ny x nz grid on a box.
    #[allow(clippy::too_many_arguments)]
    pub fn grid_3d(
        nx: usize,
        ny: usize,
        nz: usize,
        x0: f64,
        x1: f64,
        y0: f64,
        y1: f64,
        z0: f64,
        z1: f64,
    ) -> Result<PointSet> {
        let mut coords = Array2::<f64>::zeros((nx * ny * nz, 3));
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let index = (k * ny + j) * nx + i;
                    coords[[index, 0]] = grid_coord(i, nx, x0, x1);
                    coords[[index, 1]] = grid_coord(j, ny, y0, y1);
                    coords[[index, 2]] = grid_coord(k, nz, z0, z1);
                }
            }
        }
        PointSet::new(coords)
    }

    pub fn len(&self) -> usize {
        self.coords.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.nrows() == 0
    }

    pub fn dim(&self) -> usize {
        self.coords.ncols()
    }

    /// Coordinates of the point with the given original index.
    pub fn point(&self, index: usize) -> ArrayView1<f64> {
        self.coords.row(index)
    }
}

fn grid_coord(i: usize, n: usize, lo: f64, hi: f64) -> f64 {
    if n == 1 {
        return 0.5 * (lo + hi);
    }
    lo + (hi - lo) * (i as f64) / ((n - 1) as f64)
}

/// Axis-aligned bounding box.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundingBox {
    lo: Vec<f64>,
    hi: Vec<f64>,
}

impl BoundingBox {
    /// Tight box around the points selected by `indices`.
    pub fn from_points(points: &PointSet, indices: &[usize]) -> BoundingBox {
        let dim = points.dim();
        let mut lo = vec![f64::INFINITY; dim];
        let mut hi = vec![f64::NEG_INFINITY; dim];
        for &index in indices {
            let point = points.point(index);
            for d in 0..dim {
                lo[d] = lo[d].min(point[d]);
                hi[d] = hi[d].max(point[d]);
            }
        }
        BoundingBox { lo, hi }
    }

    pub fn dim(&self) -> usize {
        self.lo.len()
    }

    pub fn lo(&self, d: usize) -> f64 {
        self.lo[d]
    }

    pub fn hi(&self, d: usize) -> f64 {
        self.hi[d]
    }

    /// Euclidean length of the box diagonal.
    pub fn diameter(&self) -> f64 {
        self.lo
            .iter()
            .zip(self.hi.iter())
            .map(|(&lo, &hi)| (hi - lo) * (hi - lo))
            .sum::<f64>()
            .sqrt()
    }

    pub fn center(&self) -> Vec<f64> {
        self.lo
            .iter()
            .zip(self.hi.iter())
            .map(|(&lo, &hi)| 0.5 * (lo + hi))
            .collect()
    }

    /// Euclidean distance between the box centers.
    pub fn center_distance(&self, other: &BoundingBox) -> f64 {
        self.center()
            .iter()
            .zip(other.center().iter())
            .map(|(&a, &b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }

    /// Extent of the box along dimension `d`.
    pub fn extent(&self, d: usize) -> f64 {
        self.hi[d] - self.lo[d]
    }

    /// The dimension with the largest extent.
    pub fn widest_dimension(&self) -> usize {
        let mut widest = 0;
        for d in 1..self.dim() {
            if self.extent(d) > self.extent(widest) {
                widest = d;
            }
        }
        widest
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn empty_point_set_is_rejected() {
        assert!(PointSet::new(Array2::<f64>::zeros((0, 2))).is_err());
    }

    #[test]
    fn non_finite_coordinates_are_rejected() {
        let mut coords = Array2::<f64>::zeros((4, 1));
        coords[[2, 0]] = f64::NAN;
        assert!(PointSet::new(coords).is_err());

        let mut coords = Array2::<f64>::zeros((4, 1));
        coords[[0, 0]] = f64::INFINITY;
        assert!(PointSet::new(coords).is_err());
    }

    #[test]
    fn grid_2d_covers_the_unit_square() {
        let points = PointSet::grid_2d(4, 4, 0.0, 1.0, 0.0, 1.0).unwrap();
        assert_eq!(points.len(), 16);
        assert_eq!(points.dim(), 2);

        let indices: Vec<usize> = (0..16).collect();
        let bbox = BoundingBox::from_points(&points, &indices);
        assert_eq!(bbox.lo(0), 0.0);
        assert_eq!(bbox.hi(0), 1.0);
        assert!((bbox.diameter() - 2.0_f64.sqrt()).abs() < 1E-14);
    }

    #[test]
    fn center_distance_is_symmetric() {
        let points = PointSet::grid_1d(10, 0.0, 1.0).unwrap();
        let left = BoundingBox::from_points(&points, &[0, 1, 2]);
        let right = BoundingBox::from_points(&points, &[7, 8, 9]);
        assert_eq!(
            left.center_distance(&right),
            right.center_distance(&left)
        );
        assert!(left.center_distance(&right) > 0.0);
    }

    #[test]
    fn widest_dimension_picks_largest_spread() {
        let mut coords = Array2::<f64>::zeros((3, 2));
        coords[[0, 0]] = 0.0;
        coords[[1, 0]] = 0.1;
        coords[[2, 0]] = 0.2;
        coords[[0, 1]] = 0.0;
        coords[[1, 1]] = 2.0;
        coords[[2, 1]] = 4.0;
        let points = PointSet::new(coords).unwrap();
        let bbox = BoundingBox::from_points(&points, &[0, 1, 2]);
        assert_eq!(bbox.widest_dimension(), 1);
    }
}
