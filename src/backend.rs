//! Execution backend for the dense linear algebra primitives.
//!
//! The hierarchical algorithms never call into ndarray-linalg directly;
//! they go through the [`DenseBackend`] capability so that the numerical
//! core stays independent of how the small dense factorizations are
//! executed. [`CpuBackend`] is the reference implementation on top of
//! Lapack's divide-and-conquer SVD.

use crate::types::{HScalar, Result};
use ndarray::{s, Array1, Array2, ArrayView2};
use ndarray_linalg::{JobSvd, SVDDCInto, Scalar};
use num::ToPrimitive;

/// The dense primitives required by construction, compression and update.
pub trait DenseBackend<A: HScalar>: Sync {
    /// Thin singular value decomposition `mat = u * diag(s) * vt`.
    fn svd(&self, mat: ArrayView2<A>) -> Result<(Array2<A>, Array1<A::Real>, Array2<A>)>;

    /// Orthonormal basis of the numerical column space of `mat`.
    ///
    /// Singular directions below `tol` relative to the largest singular
    /// value are dropped. A numerically zero input yields a basis with
    /// zero columns rather than an error; rank deficiency is an expected
    /// local outcome.
    fn orth(&self, mat: ArrayView2<A>, tol: f64) -> Result<Array2<A>> {
        if mat.ncols() == 0 {
            return Ok(Array2::<A>::zeros((mat.nrows(), 0)));
        }
        let (u, sigma, _) = self.svd(mat)?;
        let rank = truncation_rank(sigma.view(), tol);
        Ok(u.slice(s![.., 0..rank]).to_owned())
    }
}

/// Number of singular values to keep at relative tolerance `tol`.
pub fn truncation_rank<T: Scalar>(sigma: ndarray::ArrayView1<T>, tol: f64) -> usize
where
    T: ToPrimitive,
{
    let sigma_max = match sigma.first() {
        Some(value) => value.to_f64().unwrap(),
        None => return 0,
    };
    if !(sigma_max > 0.0) {
        return 0;
    }
    sigma
        .iter()
        .take_while(|&&item| item.to_f64().unwrap() > tol * sigma_max)
        .count()
}

/// Single host execution. All per-node factorizations run on the calling
/// thread through Lapack.
#[derive(Default)]
pub struct CpuBackend;

impl<A: HScalar> DenseBackend<A> for CpuBackend {
    fn svd(&self, mat: ArrayView2<A>) -> Result<(Array2<A>, Array1<A::Real>, Array2<A>)> {
        let (m, n) = (mat.nrows(), mat.ncols());
        if m == 0 || n == 0 {
            let k = m.min(n);
            return Ok((
                Array2::<A>::zeros((m, k)),
                Array1::<A::Real>::zeros(k),
                Array2::<A>::zeros((k, n)),
            ));
        }
        let (u, sigma, vt) = mat.to_owned().svddc_into(JobSvd::Some)?;
        Ok((u.unwrap(), sigma, vt.unwrap()))
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::random::DrawGaussian;
    use ndarray::Axis;

    #[test]
    fn orth_returns_orthonormal_columns() {
        let mut rng = rand::thread_rng();
        let mat = f64::draw_gaussian((50, 10), &mut rng);
        let backend = CpuBackend::default();

        let q = DenseBackend::<f64>::orth(&backend, mat.view(), 1E-12).unwrap();

        assert_eq!(q.ncols(), 10);
        let qtq = q.t().dot(&q);
        for ((i, j), &val) in qtq.indexed_iter() {
            if i == j {
                assert!((val - 1.0).abs() < 1E-12);
            } else {
                assert!(val.abs() < 1E-12);
            }
        }
    }

    #[test]
    fn orth_detects_rank_deficiency() {
        let mut rng = rand::thread_rng();
        let thin = f64::draw_gaussian((40, 5), &mut rng);
        // 10 columns spanning a 5 dimensional space.
        let mat = ndarray::concatenate(Axis(1), &[thin.view(), thin.view()]).unwrap();
        let backend = CpuBackend::default();

        let q = DenseBackend::<f64>::orth(&backend, mat.view(), 1E-10).unwrap();
        assert_eq!(q.ncols(), 5);
    }

    #[test]
    fn orth_of_zero_matrix_is_empty() {
        let mat = Array2::<f64>::zeros((20, 4));
        let backend = CpuBackend::default();
        let q = DenseBackend::<f64>::orth(&backend, mat.view(), 1E-10).unwrap();
        assert_eq!(q.ncols(), 0);
    }

    #[test]
    fn orth_tracks_a_decaying_singular_spectrum() {
        let mut rng = rand::thread_rng();
        // Singular values log-spaced between 1 and 1E-8; a tolerance of
        // 1E-4 should keep roughly half of them.
        let mat = f64::random_approximate_low_rank_matrix((60, 30), 1.0, 1E-8, &mut rng);
        let backend = CpuBackend::default();

        let q = DenseBackend::<f64>::orth(&backend, mat.view(), 1E-4).unwrap();
        assert!(q.ncols() >= 10);
        assert!(q.ncols() <= 20);
    }

    #[test]
    fn truncation_rank_counts_leading_values() {
        let sigma = ndarray::arr1(&[1.0, 0.5, 1E-3, 1E-9]);
        assert_eq!(truncation_rank(sigma.view(), 1E-6), 3);
        assert_eq!(truncation_rank(sigma.view(), 1E-2), 2);
        assert_eq!(truncation_rank(sigma.view(), 0.9), 1);
    }
}
