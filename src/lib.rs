//! rusty-hmatrix implements hierarchical low-rank approximation of
//! dense operators.
//!
//! A point set is clustered into a balanced spatial tree, a geometric
//! admissibility condition partitions the matrix into dense near-field
//! and low-rank far-field blocks, and the far field is represented
//! through nested cluster bases and small coupling matrices. Matrices
//! can be built directly from a kernel by Chebyshev interpolation or
//! from any black-box operator by randomized sampling, recompressed to
//! a tolerance and updated by global symmetric low-rank terms. The
//! resulting representation applies to vectors in near-linear time.

pub mod admissibility;
pub mod backend;
pub mod block;
pub mod chebyshev;
pub mod cluster;
pub mod construction;
pub mod geometry;
pub mod hara;
pub mod hcompress;
pub mod hlru;
pub mod hmatrix;
pub mod random;
pub mod sampler;
pub mod types;

pub use admissibility::{Admissibility, BoxCenterAdmissibility};
pub use backend::{CpuBackend, DenseBackend};
pub use block::{BlockNode, BlockTree};
pub use cluster::{ClusterNode, ClusterTree};
pub use construction::{build_hmatrix, build_hmatrix_structure, EntryGenerator};
pub use geometry::{BoundingBox, PointSet};
pub use hara::{hara, HaraOptions, HaraStats};
pub use hcompress::hcompress;
pub use hlru::hlru_sym_global;
pub use hmatrix::HMatrix;
pub use random::DrawGaussian;
pub use sampler::{
    sampler_difference, sampler_norm, DiffSampler, LowRankSampler, SquareSampler,
};
pub use types::{HMatrixError, HScalar, MatMat, MatVec, RelDiff, Result};
