//! Geometric admissibility of cluster pairs.

use crate::geometry::BoundingBox;

/// Decides whether the interaction of two clusters is compressible.
///
/// Implementations must be pure, deterministic and symmetric in their
/// arguments.
pub trait Admissibility {
    fn is_admissible(&self, row: &BoundingBox, col: &BoundingBox) -> bool;
}

/// Center-distance admissibility.
///
/// A pair is admissible iff the distance between the box centers is at
/// least `eta` times the larger box diameter. Decreasing `eta` admits
/// more pairs as compressible, increasing it coarsens the block
/// structure. A box paired with itself has center distance zero and is
/// therefore never admissible, which keeps the diagonal dense.
pub struct BoxCenterAdmissibility {
    pub eta: f64,
}

impl BoxCenterAdmissibility {
    pub fn new(eta: f64) -> BoxCenterAdmissibility {
        BoxCenterAdmissibility { eta }
    }
}

impl Admissibility for BoxCenterAdmissibility {
    fn is_admissible(&self, row: &BoundingBox, col: &BoundingBox) -> bool {
        let dist = row.center_distance(col);
        let diam = row.diameter().max(col.diameter());
        dist > 0.0 && dist >= self.eta * diam
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::geometry::PointSet;

    #[test]
    fn admissibility_is_symmetric() {
        let points = PointSet::grid_2d(8, 8, 0.0, 1.0, 0.0, 1.0).unwrap();
        let adm = BoxCenterAdmissibility::new(1.0);

        let boxes: Vec<_> = (0..8)
            .map(|i| {
                let indices: Vec<usize> = (8 * i..8 * (i + 1)).collect();
                crate::geometry::BoundingBox::from_points(&points, &indices)
            })
            .collect();

        for a in boxes.iter() {
            for b in boxes.iter() {
                assert_eq!(adm.is_admissible(a, b), adm.is_admissible(b, a));
            }
        }
    }

    #[test]
    fn a_box_is_inadmissible_with_itself() {
        let points = PointSet::grid_1d(16, 0.0, 1.0).unwrap();
        let indices: Vec<usize> = (0..16).collect();
        let bbox = crate::geometry::BoundingBox::from_points(&points, &indices);
        let adm = BoxCenterAdmissibility::new(0.1);
        assert!(!adm.is_admissible(&bbox, &bbox));
    }

    #[test]
    fn smaller_eta_admits_more_pairs() {
        let points = PointSet::grid_1d(64, 0.0, 1.0).unwrap();
        let left_indices: Vec<usize> = (0..16).collect();
        let right_indices: Vec<usize> = (24..40).collect();
        let left = crate::geometry::BoundingBox::from_points(&points, &left_indices);
        let right = crate::geometry::BoundingBox::from_points(&points, &right_indices);

        // Separation just above one box diameter.
        assert!(BoxCenterAdmissibility::new(1.0).is_admissible(&left, &right));
        assert!(!BoxCenterAdmissibility::new(2.0).is_admissible(&left, &right));
    }
}
