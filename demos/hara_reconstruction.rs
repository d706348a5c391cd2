//! End-to-end driver: build a kernel matrix hierarchically, reconstruct
//! it from matrix-vector samples alone, square it, update it and
//! recompress it.

use ndarray::{ArrayView1, Axis};
use rand::SeedableRng;
use std::sync::Arc;

use rusty_hmatrix::{
    build_hmatrix, build_hmatrix_structure, hara, hcompress, hlru_sym_global, sampler_difference,
    sampler_norm, BoxCenterAdmissibility, ClusterTree, CpuBackend, DrawGaussian, HaraOptions,
    LowRankSampler, MatVec, PointSet, RelDiff, SquareSampler,
};

fn kernel(x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
    let dist: f64 = x
        .iter()
        .zip(y.iter())
        .map(|(&a, &b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt();
    (-dist).exp()
}

fn main() {
    env_logger::init();
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let backend = CpuBackend::default();

    // A 32 x 32 grid on the unit square, leaf size 64, interpolation
    // order 8.
    let points = PointSet::grid_2d(32, 32, 0.0, 1.0, 0.0, 1.0).unwrap();
    let tree = Arc::new(ClusterTree::from_points(&points, 64).unwrap());
    let adm = BoxCenterAdmissibility::new(1.0);
    let n = tree.n();

    let reference = build_hmatrix::<f64, _, _>(&points, &tree, &adm, &kernel, 8, true).unwrap();
    println!(
        "reference matrix: n = {}, {} dense blocks, {} low-rank blocks, total rank {}",
        n,
        reference.structure().num_dense(),
        reference.structure().num_low_rank(),
        reference.total_rank()
    );

    let norm = sampler_norm(&reference, 10, &mut rng);
    println!("estimated operator norm: {:.4e}", norm);

    // Reconstruct the matrix from samples alone, at two tolerances.
    for &trunc_eps in [1E-4, 1E-8].iter() {
        let mut reconstructed = build_hmatrix_structure::<f64, _>(&tree, &adm, true);
        let options = HaraOptions::new(trunc_eps * norm);
        let stats = hara(&reference, &mut reconstructed, &options, &backend, &mut rng).unwrap();
        let error = sampler_difference(&reference, &reconstructed, 40, &mut rng).unwrap() / norm;
        println!(
            "eps {:.0e}: relative error {:.4e}, total rank {}, {} samples, converged: {}",
            trunc_eps, error, reconstructed.total_rank(), stats.samples, stats.converged
        );
    }

    // The square of the operator, sampled without ever forming it.
    let square = SquareSampler::new(&reference).unwrap();
    let square_norm = sampler_norm(&square, 10, &mut rng);
    let mut squared = build_hmatrix_structure::<f64, _>(&tree, &adm, true);
    let options = HaraOptions::new(1E-6 * square_norm);
    hara(&square, &mut squared, &options, &backend, &mut rng).unwrap();
    let error = sampler_difference(&square, &squared, 40, &mut rng).unwrap() / square_norm;
    println!(
        "squared operator: relative error {:.4e}, total rank {}",
        error,
        squared.total_rank()
    );

    // Global symmetric low-rank update followed by recompression.
    let u = f64::draw_gaussian((n, 16), &mut rng);
    let mut updated = reference.clone();
    hlru_sym_global(&mut updated, u.view(), 1.0, &backend).unwrap();

    let outer = LowRankSampler::new(u, 1.0);
    let x = f64::draw_gaussian((n, 1), &mut rng);
    let x = x.index_axis(Axis(1), 0).to_owned();
    let expected = reference.matvec(x.view()) + outer.matvec(x.view());
    println!(
        "update: matvec error {:.4e}, total rank {} (was {})",
        f64::rel_diff_l2(updated.matvec(x.view()).view(), expected.view()),
        updated.total_rank(),
        reference.total_rank()
    );

    let rank_before = updated.total_rank();
    hcompress(&mut updated, 1E-6, &backend).unwrap();
    println!(
        "recompression: total rank {} -> {}",
        rank_before,
        updated.total_rank()
    );
}
