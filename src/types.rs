//! Error types, the sampler traits and common helpers.

use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Axis, Data, Ix2};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::Norm;
use ndarray_linalg::OperationNorm;
use thiserror::Error;

pub use ndarray_linalg::{c32, c64, Lapack, Scalar};

use crate::random::DrawGaussian;

#[derive(Error, Debug)]
pub enum HMatrixError {
    #[error("Lapack Error")]
    LinalgError(#[from] LinalgError),
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
    #[error("Hierarchical structure mismatch: {0}")]
    StructureMismatch(String),
}

pub type Result<T> = std::result::Result<T, HMatrixError>;

/// Scalar types supported by the hierarchical algorithms.
///
/// Everything that ndarray-linalg can factorize and for which Gaussian
/// sample matrices can be drawn.
pub trait HScalar: Scalar + Lapack + DrawGaussian {}

impl<A: Scalar + Lapack + DrawGaussian> HScalar for A {}

/// Matrix-Vector Product Trait
///
/// The minimal sampler capability: an operator exposing its dimensions
/// and a matrix-vector product. Anything implementing this trait can be
/// fed to the randomized construction routines in place of an explicit
/// matrix.
pub trait MatVec {
    type A: HScalar;

    // Return the number of rows of the operator.
    fn nrows(&self) -> usize;

    // Return the number of columns of the operator.
    fn ncols(&self) -> usize;

    // Return the matrix vector product of the operator with a vector.
    fn matvec(&self, vec: ArrayView1<Self::A>) -> Array1<Self::A>;
}

/// Matrix-Matrix Product Trait
///
/// Application of an operator to a matrix of column vectors. The default
/// implementation applies `MatVec` column by column; samplers that can
/// batch their products should override it.
pub trait MatMat: MatVec {
    // Return the matrix-matrix product of the operator with a matrix.
    fn matmat(&self, mat: ArrayView2<Self::A>) -> Array2<Self::A> {
        let mut output = Array2::<Self::A>::zeros((self.nrows(), mat.ncols()));

        for (index, col) in mat.axis_iter(Axis(1)).enumerate() {
            output
                .index_axis_mut(Axis(1), index)
                .assign(&self.matvec(col));
        }

        output
    }
}

impl<A, S> MatVec for ArrayBase<S, Ix2>
where
    A: HScalar,
    S: Data<Elem = A>,
{
    type A = A;

    fn nrows(&self) -> usize {
        self.nrows()
    }

    fn ncols(&self) -> usize {
        self.ncols()
    }

    fn matvec(&self, vec: ArrayView1<Self::A>) -> Array1<Self::A> {
        self.dot(&vec)
    }
}

impl<A, S> MatMat for ArrayBase<S, Ix2>
where
    A: HScalar,
    S: Data<Elem = A>,
{
    fn matmat(&self, mat: ArrayView2<Self::A>) -> Array2<Self::A> {
        self.dot(&mat)
    }
}

pub trait RelDiff {
    type A: Scalar;

    /// Return the relative Frobenius norm difference of `first` and `second`.
    fn rel_diff_fro(
        first: ArrayView2<Self::A>,
        second: ArrayView2<Self::A>,
    ) -> <<Self as RelDiff>::A as Scalar>::Real;

    /// Return the relative l2 vector norm difference of `first` and `second`.
    fn rel_diff_l2(
        first: ArrayView1<Self::A>,
        second: ArrayView1<Self::A>,
    ) -> <<Self as RelDiff>::A as Scalar>::Real;
}

macro_rules! rel_diff_impl {
    ($scalar:ty) => {
        impl RelDiff for $scalar {
            type A = $scalar;
            fn rel_diff_fro(
                first: ArrayView2<Self::A>,
                second: ArrayView2<Self::A>,
            ) -> <<Self as RelDiff>::A as Scalar>::Real {
                let diff = first.to_owned() - &second;
                diff.opnorm_fro().unwrap() / second.opnorm_fro().unwrap()
            }

            fn rel_diff_l2(
                first: ArrayView1<Self::A>,
                second: ArrayView1<Self::A>,
            ) -> <<Self as RelDiff>::A as Scalar>::Real {
                let diff = first.to_owned() - &second;
                diff.norm_l2() / second.norm_l2()
            }
        }
    };
}

rel_diff_impl!(f32);
rel_diff_impl!(f64);
rel_diff_impl!(c32);
rel_diff_impl!(c64);
