//! Geometric interpolation between multigrid levels.
//!
//! - [`shape`]: multilinear basis functions on the reference segment, quad and hex.
//! - [`local_solve`]: fixed-size dense solve for the Newton systems.
//! - [`stencil`]: Newton inversion of the isoparametric map for one fine node.
//! - [`ghost`]: coarse coordinates staged onto the prolongator's column space.
//! - [`prolongator`]: the level build.

pub mod ghost;
pub mod local_solve;
pub mod params;
pub mod prolongator;
pub mod shape;
pub mod stencil;
pub mod trace;

pub use params::{InterpolationOrder, InterpolationParams, NewtonOptions, NonConvergencePolicy};
pub use prolongator::{CoarseLevel, GeometricInterpolation, ProlongatorInputs, StencilStats};
pub use shape::Dimension;
pub use stencil::{Stencil, compute_linear_stencil};
