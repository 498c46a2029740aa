//! Input generators for prolongator builds.

pub mod structured;

pub use structured::{StructuredGrid, StructuredLevel, coarse_indices};
