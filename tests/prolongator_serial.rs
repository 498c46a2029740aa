use std::sync::Arc;

use mesh_gmg::prelude::*;

mod util;
use util::{assert_close, inputs_of, row_sums};

#[test]
fn linear_quad_prolongator_is_a_partition_of_unity() {
    let grid = StructuredGrid {
        nodes_per_dim: [7, 5, 1],
        coarsen_rate: 3,
        warp: 0.1,
        ..Default::default()
    };
    let level = grid.build_level(&NoComm).unwrap();
    let coarse = GeometricInterpolation::default()
        .build(&inputs_of(&level), &NoComm)
        .unwrap();
    for s in row_sums(&coarse.prolongator) {
        assert_close(s, 1.0, 1e-10);
    }
    assert_eq!(coarse.stats.not_converged, 0);
    assert_eq!(coarse.stats.coincident, 9);
    assert_eq!(coarse.stats.interpolated, 35 - 9);
    assert_eq!(coarse.num_dimensions, 2);
    assert_eq!(coarse.coarse_nodes_per_dim, Some([3, 3, 1]));
}

#[test]
fn coincident_nodes_copy_their_coarse_parent() {
    let grid = StructuredGrid {
        dimension: 3,
        nodes_per_dim: [4, 4, 3],
        coarsen_rate: 2,
        warp: 0.05,
        ..Default::default()
    };
    let level = grid.build_level(&NoComm).unwrap();
    let p = GeometricInterpolation::default()
        .build(&inputs_of(&level), &NoComm)
        .unwrap()
        .prolongator;
    let fine_indexed = &level.coarse_coordinates_fine_map;
    for (c, &fine_gid) in fine_indexed.gids().iter().enumerate() {
        let row = level.fine_node_map.lid(fine_gid).unwrap();
        let (cols, vals) = p.local_row_view(row).unwrap();
        assert_eq!(vals, &[1.0]);
        let col_gid = p.col_map().gid(cols[0]).unwrap();
        assert_eq!(col_gid, level.coarse_coordinates_map.gid(c).unwrap());
    }
}

#[test]
fn coarse_coordinates_follow_the_coarse_map() {
    let grid = StructuredGrid {
        dimension: 1,
        nodes_per_dim: [6, 1, 1],
        max: [5.0, 1.0, 1.0],
        coarsen_rate: 2,
        ..Default::default()
    };
    let level = grid.build_level(&NoComm).unwrap();
    let coarse = GeometricInterpolation::default()
        .build(&inputs_of(&level), &NoComm)
        .unwrap();
    let cc = coarse.coarse_coordinates.unwrap();
    assert!(Arc::ptr_eq(cc.map(), &level.coarse_coordinates_map));
    assert_eq!(cc.column(0), &[0.0, 2.0, 4.0, 5.0]);
    // fine node 3 sits between coarse x = 2 and x = 4
    let (_, w) = coarse.prolongator.local_row_view(3).unwrap();
    assert_close(w[0], 0.5, 1e-12);
    assert_close(w[1], 0.5, 1e-12);
}

#[test]
fn blocked_dofs_replicate_the_node_stencil() {
    let grid = StructuredGrid {
        nodes_per_dim: [5, 5, 1],
        coarsen_rate: 2,
        dofs_per_node: 3,
        warp: 0.08,
        ..Default::default()
    };
    let level = grid.build_level(&NoComm).unwrap();
    let coarse = GeometricInterpolation::default()
        .build(&inputs_of(&level), &NoComm)
        .unwrap();
    let p = &coarse.prolongator;
    assert_eq!(p.fixed_block_size(), 3);
    let view = p.strided_view().unwrap();
    assert_eq!(view.domain_map.stride_info(), &[3]);
    assert!(view.row_map.map().is_same_as(level.fine_operator.row_map()));

    for node in 0..level.fine_node_map.local_len() {
        let (_, first) = p.local_row_view(3 * node).unwrap();
        for dof in 1..3 {
            let (_, vals) = p.local_row_view(3 * node + dof).unwrap();
            assert_eq!(vals, first);
        }
    }
}

#[test]
fn coarse_nullspace_is_transpose_applied() {
    let grid = StructuredGrid {
        nodes_per_dim: [5, 4, 1],
        coarsen_rate: 2,
        dofs_per_node: 2,
        warp: 0.1,
        ..Default::default()
    };
    let level = grid.build_level(&NoComm).unwrap();
    let coarse = GeometricInterpolation::default()
        .build(&inputs_of(&level), &NoComm)
        .unwrap();
    let ns = coarse.coarse_nullspace.unwrap();
    assert_eq!(ns.num_vectors(), 2);
    // Column sums of P per component, computed from the triplets.
    let mut expect = vec![[0.0; 2]; ns.local_len()];
    for (row, col, v) in coarse.prolongator.global_triplets() {
        let comp = (row % 2) as usize;
        let lid = ns.map().lid(col).unwrap();
        expect[lid][comp] += v;
    }
    for (lid, e) in expect.iter().enumerate() {
        for comp in 0..2 {
            assert_close(ns.get(lid, comp), e[comp], 1e-12);
        }
    }
    // Total mass is preserved by a partition of unity.
    let total: f64 = ns.column(0).iter().sum();
    assert_close(total, level.fine_node_map.local_len() as f64, 1e-9);
}

#[test]
fn constant_order_sets_unit_values() {
    // rate 1 makes every fine node coarse, so every row has one entry.
    let grid = StructuredGrid {
        nodes_per_dim: [3, 3, 1],
        coarsen_rate: 1,
        ..Default::default()
    };
    let level = grid.build_level(&NoComm).unwrap();
    let params = InterpolationParams {
        order: InterpolationOrder::Constant,
        build_coarse_coordinates: false,
        ..Default::default()
    };
    let coarse = GeometricInterpolation::new(params)
        .build(&inputs_of(&level), &NoComm)
        .unwrap();
    assert!(coarse.coarse_coordinates.is_none());
    assert!(coarse.prolongator.is_fill_complete());
    for (_, _, v) in coarse.prolongator.global_triplets() {
        assert_eq!(v, 1.0);
    }
    assert_eq!(coarse.coarse_nullspace.unwrap().column(0), &[1.0; 9]);
}

#[test]
fn constant_order_rejects_interpolated_rows() {
    let level = StructuredGrid::default().build_level(&NoComm).unwrap();
    let params = InterpolationParams {
        order: InterpolationOrder::Constant,
        ..Default::default()
    };
    let err = GeometricInterpolation::new(params)
        .build(&inputs_of(&level), &NoComm)
        .unwrap_err();
    assert!(matches!(err, MeshGmgError::PatternRowLength { .. }));
}

#[test]
fn error_policy_rejects_unconverged_stencils() {
    let grid = StructuredGrid {
        nodes_per_dim: [7, 7, 1],
        coarsen_rate: 3,
        warp: 0.3,
        ..Default::default()
    };
    let level = grid.build_level(&NoComm).unwrap();
    let params = InterpolationParams {
        newton: NewtonOptions {
            max_iterations: 1,
            tolerance: 1e-14,
        },
        non_convergence: NonConvergencePolicy::Error,
        ..Default::default()
    };
    let err = GeometricInterpolation::new(params)
        .build(&inputs_of(&level), &NoComm)
        .unwrap_err();
    assert!(matches!(err, MeshGmgError::StencilNotConverged { iterations: 1, .. }));

    let accept = InterpolationParams {
        non_convergence: NonConvergencePolicy::Accept,
        ..params
    };
    let coarse = GeometricInterpolation::new(accept)
        .build(&inputs_of(&level), &NoComm)
        .unwrap();
    assert!(coarse.stats.not_converged > 0);
    for s in row_sums(&coarse.prolongator) {
        assert_close(s, 1.0, 1e-10);
    }
}

#[test]
fn missing_coordinates_fail_before_any_work() {
    let level = StructuredGrid::default().build_level(&NoComm).unwrap();
    let inputs = ProlongatorInputs {
        fine_coordinates: None,
        ..inputs_of(&level)
    };
    let err = GeometricInterpolation::default().build(&inputs, &NoComm).unwrap_err();
    assert_eq!(err, MeshGmgError::MissingInput("fine_coordinates"));
}

#[test]
fn strict_policy_accepts_cell_centres_on_inexact_grid() {
    // Fine nodes at the centres of coarse cells; spacing not exact in binary.
    let grid = StructuredGrid {
        nodes_per_dim: [9, 9, 1],
        coarsen_rate: 2,
        min: [0.1, 0.3, 0.0],
        max: [0.7, 1.9, 1.0],
        ..Default::default()
    };
    let level = grid.build_level(&NoComm).unwrap();
    let params = InterpolationParams {
        non_convergence: NonConvergencePolicy::Error,
        ..Default::default()
    };
    let coarse = GeometricInterpolation::new(params)
        .build(&inputs_of(&level), &NoComm)
        .unwrap();
    assert_eq!(coarse.stats.not_converged, 0);
    assert_eq!(coarse.stats.coincident, 25);
    assert_eq!(coarse.stats.interpolated, 81 - 25);
    assert!(coarse.stats.max_residual_norm < 1e-12);
    for s in row_sums(&coarse.prolongator) {
        assert_close(s, 1.0, 1e-10);
    }
}
