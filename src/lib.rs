#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-gmg
//!
//! mesh-gmg builds the transfer operators of a geometric multigrid hierarchy on
//! distributed meshes. Given a fine-level operator, a prolongator sparsity
//! pattern from a structured coarsening and the fine node coordinates, it
//! computes interpolation weights by inverting the multilinear map of each
//! coarse cell, then derives the coarse coordinates and the coarse null-space.
//!
//! ## Features
//! - Piecewise-constant and multilinear (segment, quad, hex) prolongators
//! - Newton stencil solver with fixed-size local solves and configurable
//!   non-convergence handling
//! - A small distributed linear-algebra layer: maps, directories, importers,
//!   multivectors, CRS graphs and matrices
//! - Pluggable communication backends (serial, threads, MPI)
//! - Structured-grid generator for two-level test problems
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! mesh-gmg = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! ```
//! use mesh_gmg::prelude::*;
//!
//! let grid = StructuredGrid { warp: 0.1, ..Default::default() };
//! let level = grid.build_level(&NoComm)?;
//! let inputs = ProlongatorInputs {
//!     fine_operator: &level.fine_operator,
//!     pattern: &level.pattern,
//!     fine_coordinates: Some(&level.fine_coordinates),
//!     fine_nullspace: Some(&level.fine_nullspace),
//!     coarse_coordinates_fine_map: Some(&level.coarse_coordinates_fine_map),
//!     coarse_coordinates_map: Some(&level.coarse_coordinates_map),
//!     num_dimensions: 2,
//!     coarse_nodes_per_dim: Some(level.coarse_nodes_per_dim),
//! };
//! let coarse = GeometricInterpolation::default().build(&inputs, &NoComm)?;
//! assert_eq!(coarse.prolongator.domain_map().global_len(), 9);
//! # Ok::<(), MeshGmgError>(())
//! ```
//!
//! ## Debug trace
//! Set `MESH_GMG_INTERP_DEBUG=1` to log the phases of every level build at the
//! `debug` level.

pub mod algs;
pub mod data;
pub mod debug_invariants;
pub mod interp;
pub mod mesh_error;
pub mod mesh_generation;
pub mod sparse;

pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, NoComm, RayonComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::data::{CombineMode, DistMap, Importer, MultiVector, StridedMap};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::interp::{
        CoarseLevel, Dimension, GeometricInterpolation, InterpolationOrder, InterpolationParams,
        NewtonOptions, NonConvergencePolicy, ProlongatorInputs, Stencil, compute_linear_stencil,
    };
    pub use crate::mesh_error::MeshGmgError;
    pub use crate::mesh_generation::{StructuredGrid, StructuredLevel};
    pub use crate::sparse::{ApplyMode, BlockedOperator, CrsGraph, CrsGraphBuilder, CrsMatrix};
}
