//! Example: linear prolongator on a warped 3D grid.
//! cargo run --example structured_prolongator
//! cargo mpirun -n 4 --features mpi-support --example structured_prolongator
//!
//! Builds one coarse level of a 9x9x9 grid with two dofs per node and prints
//! per-rank stencil statistics. Without MPI the ranks run as threads.

use mesh_gmg::prelude::*;

fn grid() -> StructuredGrid {
    StructuredGrid {
        dimension: 3,
        nodes_per_dim: [9, 9, 9],
        coarsen_rate: 3,
        dofs_per_node: 2,
        warp: 0.15,
        ..Default::default()
    }
}

fn build<C: Communicator>(comm: &C) -> Result<(), MeshGmgError> {
    let level = grid().build_level(comm)?;
    let inputs = ProlongatorInputs {
        fine_operator: &level.fine_operator,
        pattern: &level.pattern,
        fine_coordinates: Some(&level.fine_coordinates),
        fine_nullspace: Some(&level.fine_nullspace),
        coarse_coordinates_fine_map: Some(&level.coarse_coordinates_fine_map),
        coarse_coordinates_map: Some(&level.coarse_coordinates_map),
        num_dimensions: 3,
        coarse_nodes_per_dim: Some(level.coarse_nodes_per_dim),
    };
    let coarse = GeometricInterpolation::default().build(&inputs, comm)?;
    let s = coarse.stats;
    println!(
        "[rank {}] {} rows, {} coincident, {} interpolated, max {} Newton iterations, max residual {:.2e}",
        comm.rank(),
        coarse.prolongator.graph().num_local_rows(),
        s.coincident,
        s.interpolated,
        s.max_iterations,
        s.max_residual_norm
    );
    Ok(())
}

#[cfg(feature = "mpi-support")]
fn main() {
    use mesh_gmg::algs::communicator::MpiComm;
    let comm = MpiComm::new().expect("MPI initialization failed");
    if let Err(e) = build(&comm) {
        eprintln!("[rank {}] {e}", comm.rank());
        std::process::exit(1);
    }
}

#[cfg(not(feature = "mpi-support"))]
fn main() {
    let comms = RayonComm::world(3);
    std::thread::scope(|s| {
        for comm in comms {
            s.spawn(move || {
                if let Err(e) = build(&comm) {
                    eprintln!("[rank {}] {e}", comm.rank());
                }
            });
        }
    });
}
