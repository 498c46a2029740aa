#![allow(dead_code)]
use mesh_gmg::algs::communicator::RayonComm;
use mesh_gmg::prelude::*;

/// Run `f` once per rank of a fresh `size`-rank world, one thread per rank.
/// Results come back in rank order.
pub fn run_ranks<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(RayonComm) -> T + Sync,
{
    let comms = RayonComm::world(size);
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = comms.into_iter().map(|c| s.spawn(move || f(c))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Prolongator inputs borrowed from a generated structured level.
pub fn inputs_of(level: &StructuredLevel) -> ProlongatorInputs<'_, CrsMatrix> {
    ProlongatorInputs {
        fine_operator: &level.fine_operator,
        pattern: &level.pattern,
        fine_coordinates: Some(&level.fine_coordinates),
        fine_nullspace: Some(&level.fine_nullspace),
        coarse_coordinates_fine_map: Some(&level.coarse_coordinates_fine_map),
        coarse_coordinates_map: Some(&level.coarse_coordinates_map),
        num_dimensions: level.dimension.get(),
        coarse_nodes_per_dim: Some(level.coarse_nodes_per_dim),
    }
}

/// Sum of the values of every local row of `p`.
pub fn row_sums(p: &CrsMatrix) -> Vec<f64> {
    (0..p.graph().num_local_rows())
        .map(|r| p.local_row_view(r).unwrap().1.iter().sum())
        .collect()
}

/// `(gid, values...)` pairs of a multivector, for comparisons across ranks.
pub fn rows_by_gid(mv: &MultiVector) -> Vec<(u64, Vec<f64>)> {
    mv.map()
        .gids()
        .iter()
        .enumerate()
        .map(|(lid, &g)| (g, (0..mv.num_vectors()).map(|k| mv.get(lid, k)).collect()))
        .collect()
}

pub fn assert_close(a: f64, b: f64, tol: f64) {
    assert!((a - b).abs() <= tol, "{a} != {b} (tol {tol})");
}
