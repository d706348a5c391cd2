//! Generation of random sample matrices for the supported scalar types.

use ndarray::Array2;
use ndarray_linalg::{JobSvd, Lapack, SVDDCInto, Scalar};
use num::complex::Complex;
use num::traits::cast::cast;
use num::Float;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Scalars for which Gaussian sample matrices can be drawn.
///
/// The randomized construction routines draw all of their probe vectors
/// through this trait, so fixing the caller's random number generator
/// fixes the whole run.
pub trait DrawGaussian
where
    Self: Scalar + Lapack,
{
    /// Draw a matrix with independent standard Gaussian entries.
    ///
    /// # Arguments
    ///
    /// * `dimension`: Tuple (rows, cols) specifying the number of rows and columns.
    /// * `rng`: The random number generator to use.
    fn draw_gaussian<R: Rng>(dimension: (usize, usize), rng: &mut R) -> Array2<Self>;

    /// Generate a random matrix with orthogonal rows or columns.
    ///
    /// Draws a Gaussian (m, n) matrix and orthogonalizes it. If m > n the
    /// result has orthonormal columns, otherwise orthonormal rows.
    fn random_orthogonal_matrix<R: Rng>(dimension: (usize, usize), rng: &mut R) -> Array2<Self> {
        let mut m = dimension.0;
        let mut n = dimension.1;

        // Always factorize the long and skinny orientation.
        if dimension.1 > dimension.0 {
            std::mem::swap(&mut m, &mut n);
        }

        let mat = Self::draw_gaussian((m, n), rng);

        let (u, _, _) = mat
            .svddc_into(JobSvd::Some)
            .expect("`random_orthogonal_matrix`: SVD computation failed.");

        if dimension.1 > dimension.0 {
            u.unwrap().t().map(|item| item.conj())
        } else {
            u.unwrap()
        }
    }

    /// Generate a random approximate low-rank matrix with singular values
    /// logarithmically distributed between `sigma_max` and `sigma_min`.
    ///
    /// # Arguments
    ///
    /// * `dimension`: Tuple (rows, cols) specifying the number of rows and columns.
    /// * `sigma_max`: Maximum singular value.
    /// * `sigma_min`: Minimum singular value.
    /// * `rng`: The random number generator to use.
    fn random_approximate_low_rank_matrix<R: Rng>(
        dimension: (usize, usize),
        sigma_max: f64,
        sigma_min: f64,
        rng: &mut R,
    ) -> Array2<Self> {
        use ndarray::Array;

        assert!(
            sigma_min < sigma_max,
            "`sigma_min` must be smaller than `sigma_max`"
        );
        assert!(sigma_min > 0.0, "`sigma_min` must be positive.");

        let min_dim = std::cmp::min(dimension.0, dimension.1);

        let u = Self::random_orthogonal_matrix((dimension.0, min_dim), rng);
        let vt = Self::random_orthogonal_matrix((min_dim, dimension.1), rng);
        let singvals = Array::geomspace(sigma_min, sigma_max, min_dim)
            .unwrap()
            .map(|&item| cast::<f64, Self>(item).unwrap());
        let sigma = Array2::from_diag(&singvals);
        u.dot(&sigma.dot(&vt))
    }
}

impl DrawGaussian for f64 {
    fn draw_gaussian<R: Rng>(dimension: (usize, usize), rng: &mut R) -> Array2<f64> {
        draw_gaussian_real::<f64, R>(dimension, rng)
    }
}

impl DrawGaussian for f32 {
    fn draw_gaussian<R: Rng>(dimension: (usize, usize), rng: &mut R) -> Array2<f32> {
        draw_gaussian_real::<f32, R>(dimension, rng)
    }
}

impl DrawGaussian for Complex<f64> {
    fn draw_gaussian<R: Rng>(dimension: (usize, usize), rng: &mut R) -> Array2<Complex<f64>> {
        draw_gaussian_complex::<f64, R>(dimension, rng)
    }
}

impl DrawGaussian for Complex<f32> {
    fn draw_gaussian<R: Rng>(dimension: (usize, usize), rng: &mut R) -> Array2<Complex<f32>> {
        draw_gaussian_complex::<f32, R>(dimension, rng)
    }
}

fn draw_gaussian_real<T: Float, R: Rng>(dimension: (usize, usize), rng: &mut R) -> Array2<T> {
    let mut mat = Array2::<T>::zeros(dimension);
    let normal = Normal::new(0.0, 1.0).unwrap();
    mat.map_inplace(|item| *item = cast::<f64, T>(normal.sample(rng)).unwrap());
    mat
}

fn draw_gaussian_complex<T: Float, R: Rng>(
    dimension: (usize, usize),
    rng: &mut R,
) -> Array2<Complex<T>> {
    let mut mat = Array2::<Complex<T>>::zeros(dimension);
    let normal = Normal::new(0.0, 1.0).unwrap();
    mat.map_inplace(|item| {
        let re = cast::<f64, T>(normal.sample(rng)).unwrap();
        let im = cast::<f64, T>(normal.sample(rng)).unwrap();
        *item = Complex::new(re, im);
    });
    mat
}
