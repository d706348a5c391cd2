//! Sampler combinators over abstract operators.
//!
//! The randomized routines only ever see an operator through [`MatVec`]
//! and [`MatMat`]. The combinators here wrap existing operators into new
//! ones without materializing anything: the square of an operator, the
//! difference of two operators and a weighted symmetric low-rank
//! perturbation. Power iteration on these wrappers gives cheap spectral
//! norm estimates for tolerance selection and validation.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::Norm;
use num::traits::Zero;
use rand::Rng;

use crate::hmatrix::HMatrix;
use crate::random::DrawGaussian;
use crate::types::{HMatrixError, HScalar, MatMat, MatVec, Result, Scalar};

/// The square `op * op` of a square operator.
pub struct SquareSampler<'a, Op: MatMat> {
    op: &'a Op,
}

impl<'a, Op: MatMat> SquareSampler<'a, Op> {
    pub fn new(op: &'a Op) -> Result<SquareSampler<'a, Op>> {
        if op.nrows() != op.ncols() {
            return Err(HMatrixError::ConfigError(
                "cannot square a non-square operator".to_string(),
            ));
        }
        Ok(SquareSampler { op })
    }
}

impl<'a, Op: MatMat> MatVec for SquareSampler<'a, Op> {
    type A = Op::A;

    fn nrows(&self) -> usize {
        self.op.nrows()
    }

    fn ncols(&self) -> usize {
        self.op.ncols()
    }

    fn matvec(&self, vec: ArrayView1<Self::A>) -> Array1<Self::A> {
        let inner = self.op.matvec(vec);
        self.op.matvec(inner.view())
    }
}

impl<'a, Op: MatMat> MatMat for SquareSampler<'a, Op> {
    fn matmat(&self, mat: ArrayView2<Self::A>) -> Array2<Self::A> {
        let inner = self.op.matmat(mat);
        self.op.matmat(inner.view())
    }
}

/// The difference `first - second` of two operators of equal shape.
pub struct DiffSampler<'a, Op1: MatMat, Op2: MatMat<A = Op1::A>> {
    first: &'a Op1,
    second: &'a Op2,
}

impl<'a, Op1: MatMat, Op2: MatMat<A = Op1::A>> DiffSampler<'a, Op1, Op2> {
    pub fn new(first: &'a Op1, second: &'a Op2) -> Result<DiffSampler<'a, Op1, Op2>> {
        if first.nrows() != second.nrows() || first.ncols() != second.ncols() {
            return Err(HMatrixError::ConfigError(format!(
                "operator dimensions differ: ({}, {}) vs ({}, {})",
                first.nrows(),
                first.ncols(),
                second.nrows(),
                second.ncols()
            )));
        }
        Ok(DiffSampler { first, second })
    }
}

impl<'a, Op1: MatMat, Op2: MatMat<A = Op1::A>> MatVec for DiffSampler<'a, Op1, Op2> {
    type A = Op1::A;

    fn nrows(&self) -> usize {
        self.first.nrows()
    }

    fn ncols(&self) -> usize {
        self.first.ncols()
    }

    fn matvec(&self, vec: ArrayView1<Self::A>) -> Array1<Self::A> {
        self.first.matvec(vec) - self.second.matvec(vec)
    }
}

impl<'a, Op1: MatMat, Op2: MatMat<A = Op1::A>> MatMat for DiffSampler<'a, Op1, Op2> {
    fn matmat(&self, mat: ArrayView2<Self::A>) -> Array2<Self::A> {
        self.first.matmat(mat) - self.second.matmat(mat)
    }
}

/// A weighted outer product `weight * u * uᵀ`, applied without ever
/// forming the product.
pub struct LowRankSampler<A: HScalar> {
    u: Array2<A>,
    weight: A,
}

impl<A: HScalar> LowRankSampler<A> {
    pub fn new(u: Array2<A>, weight: A) -> LowRankSampler<A> {
        LowRankSampler { u, weight }
    }
}

impl<A: HScalar> MatVec for LowRankSampler<A> {
    type A = A;

    fn nrows(&self) -> usize {
        self.u.nrows()
    }

    fn ncols(&self) -> usize {
        self.u.nrows()
    }

    fn matvec(&self, vec: ArrayView1<A>) -> Array1<A> {
        let coeff = self.u.t().dot(&vec);
        self.u.dot(&coeff).mapv(|item| item * self.weight)
    }
}

impl<A: HScalar> MatMat for LowRankSampler<A> {
    fn matmat(&self, mat: ArrayView2<A>) -> Array2<A> {
        let coeff = self.u.t().dot(&mat);
        self.u.dot(&coeff).mapv(|item| item * self.weight)
    }
}

/// Estimate the spectral norm of a square operator by power iteration
/// with a random start vector.
pub fn sampler_norm<Op: MatVec, R: Rng>(
    op: &Op,
    iterations: usize,
    rng: &mut R,
) -> <Op::A as Scalar>::Real {
    let n = op.ncols();
    let start: Array2<Op::A> = DrawGaussian::draw_gaussian((n, 1), rng);
    let mut vec: Array1<Op::A> = start.index_axis(Axis(1), 0).to_owned();

    let mut estimate = <Op::A as Scalar>::Real::zero();
    for _ in 0..iterations {
        let next = op.matvec(vec.view());
        estimate = next.norm_l2();
        if estimate == <Op::A as Scalar>::Real::zero() {
            return estimate;
        }
        vec = next.mapv(|item| item / Op::A::from_real(estimate));
    }
    estimate
}

/// Estimated spectral norm of `op - hmatrix`, the residual of a
/// hierarchical approximation of an abstract operator.
pub fn sampler_difference<A, Op, R>(
    op: &Op,
    hmatrix: &HMatrix<A>,
    iterations: usize,
    rng: &mut R,
) -> Result<A::Real>
where
    A: HScalar,
    Op: MatMat<A = A>,
    R: Rng,
{
    let diff = DiffSampler::new(op, hmatrix)?;
    Ok(sampler_norm(&diff, iterations, rng))
}
