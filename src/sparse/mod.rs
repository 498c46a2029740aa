//! Row-distributed sparse structures: graphs and matrices on static graphs.

pub mod crs_graph;
pub mod crs_matrix;

pub use crs_graph::{CrsGraph, CrsGraphBuilder};
pub use crs_matrix::{ApplyMode, BlockedOperator, CrsMatrix, StridedView};
