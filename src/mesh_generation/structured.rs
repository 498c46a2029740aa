//! Structured tensor-product grids and their two-level transfer inputs.
//!
//! Fine nodes are numbered lexicographically (`x` fastest) and split into
//! slabs along the slowest active dimension. Coarse nodes sit at every
//! `coarsen_rate`-th index of each dimension plus the last index, are
//! numbered lexicographically on the coarse lattice and live on the rank that
//! owns the coincident fine node.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::algs::communicator::Communicator;
use crate::data::dist_map::DistMap;
use crate::data::multi_vector::MultiVector;
use crate::data::strided_map::StridedMap;
use crate::interp::shape::{Dimension, MAX_DIM};
use crate::mesh_error::MeshGmgError;
use crate::sparse::crs_graph::{CrsGraph, CrsGraphBuilder};
use crate::sparse::crs_matrix::{CrsMatrix, StridedView};

fn invalid_grid(message: impl Into<String>) -> MeshGmgError {
    MeshGmgError::InvalidGrid(message.into())
}

/// Description of a structured grid and its coarsening.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredGrid {
    pub dimension: usize,
    /// Fine nodes per dimension; entries past `dimension` are ignored.
    pub nodes_per_dim: [usize; MAX_DIM],
    pub min: [f64; MAX_DIM],
    pub max: [f64; MAX_DIM],
    pub coarsen_rate: usize,
    pub dofs_per_node: usize,
    /// Smooth displacement of every node, as a fraction of the fine spacing.
    pub warp: f64,
}

impl Default for StructuredGrid {
    fn default() -> Self {
        Self {
            dimension: 2,
            nodes_per_dim: [7, 7, 1],
            min: [0.0; MAX_DIM],
            max: [1.0; MAX_DIM],
            coarsen_rate: 3,
            dofs_per_node: 1,
            warp: 0.0,
        }
    }
}

/// Inputs of one prolongator build on a [`StructuredGrid`], for one rank.
#[derive(Clone, Debug)]
pub struct StructuredLevel {
    pub dimension: Dimension,
    pub fine_node_map: Arc<DistMap>,
    pub fine_coordinates: MultiVector,
    /// Diagonal operator on the fine dof map with the grid's block size.
    pub fine_operator: CrsMatrix,
    /// One constant vector per dof component, on the fine dof map.
    pub fine_nullspace: MultiVector,
    pub coarse_coordinates_fine_map: Arc<DistMap>,
    pub coarse_coordinates_map: Arc<DistMap>,
    pub pattern: Arc<CrsGraph>,
    pub coarse_nodes_per_dim: [usize; MAX_DIM],
}

/// Coarse positions along one dimension with `n` fine nodes.
pub fn coarse_indices(n: usize, rate: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..n).step_by(rate.max(1)).collect();
    if n > 0 && idx.last() != Some(&(n - 1)) {
        idx.push(n - 1);
    }
    idx
}

struct Lattice {
    dim: usize,
    fine: [usize; MAX_DIM],
    coarse_idx: Vec<Vec<usize>>,
}

impl Lattice {
    fn fine_multi(&self, gid: usize) -> [usize; MAX_DIM] {
        let mut ijk = [0; MAX_DIM];
        let mut rest = gid;
        for k in 0..self.dim {
            ijk[k] = rest % self.fine[k];
            rest /= self.fine[k];
        }
        ijk
    }

    fn coarse_gid(&self, cijk: &[usize; MAX_DIM]) -> u64 {
        (0..self.dim)
            .rev()
            .fold(0u64, |acc, k| acc * self.coarse_idx[k].len() as u64 + cijk[k] as u64)
    }

    /// Coarse multi-index of a fine node that coincides with a coarse node.
    fn coincident(&self, ijk: &[usize; MAX_DIM]) -> Option<[usize; MAX_DIM]> {
        let mut c = [0; MAX_DIM];
        for k in 0..self.dim {
            c[k] = self.coarse_idx[k].binary_search(&ijk[k]).ok()?;
        }
        Some(c)
    }

    /// Low and high coarse index of the coarse cell holding `ijk` in dimension `k`.
    fn bracket(&self, ijk: &[usize; MAX_DIM], k: usize) -> (usize, usize) {
        let idx = &self.coarse_idx[k];
        let lo = match idx.binary_search(&ijk[k]) {
            Ok(pos) => pos.min(idx.len() - 2),
            Err(pos) => pos - 1,
        };
        (lo, lo + 1)
    }
}

impl StructuredGrid {
    fn validate(&self) -> Result<Dimension, MeshGmgError> {
        let dimension = Dimension::try_from(self.dimension)?;
        for k in 0..self.dimension {
            if self.nodes_per_dim[k] < 2 {
                return Err(invalid_grid(format!("dimension {k} needs at least 2 nodes")));
            }
            if self.max[k] <= self.min[k] {
                return Err(invalid_grid(format!("empty extent in dimension {k}")));
            }
        }
        if self.coarsen_rate < 1 {
            return Err(invalid_grid("coarsen_rate must be positive"));
        }
        if self.dofs_per_node < 1 {
            return Err(invalid_grid("dofs_per_node must be positive"));
        }
        Ok(dimension)
    }

    /// Total number of fine nodes.
    pub fn num_fine_nodes(&self) -> usize {
        self.nodes_per_dim[..self.dimension.min(MAX_DIM)].iter().product()
    }

    /// Coarse nodes per dimension (1 past `dimension`).
    pub fn coarse_nodes_per_dim(&self) -> [usize; MAX_DIM] {
        let mut out = [1; MAX_DIM];
        for (k, o) in out.iter_mut().enumerate().take(self.dimension.min(MAX_DIM)) {
            *o = coarse_indices(self.nodes_per_dim[k], self.coarsen_rate).len();
        }
        out
    }

    /// Physical coordinates of the fine node at lattice index `ijk`.
    pub fn node_coordinates(&self, ijk: &[usize; MAX_DIM]) -> [f64; MAX_DIM] {
        let d = self.dimension;
        let mut t = [0.0; MAX_DIM];
        for k in 0..d {
            t[k] = ijk[k] as f64 / (self.nodes_per_dim[k] - 1) as f64;
        }
        let mut x = [0.0; MAX_DIM];
        for k in 0..d {
            let h = (self.max[k] - self.min[k]) / (self.nodes_per_dim[k] - 1) as f64;
            x[k] = self.min[k] + t[k] * (self.max[k] - self.min[k]);
            if d > 1 {
                let other = t[(k + 1) % d];
                x[k] += self.warp * h * (2.0 * std::f64::consts::PI * other).sin();
            }
        }
        x
    }

    /// Build this rank's share of the level. Collective over `comm`.
    pub fn build_level<C: Communicator>(&self, comm: &C) -> Result<StructuredLevel, MeshGmgError> {
        let dimension = self.validate()?;
        let d = dimension.get();
        let bs = self.dofs_per_node;
        let lattice = Lattice {
            dim: d,
            fine: self.nodes_per_dim,
            coarse_idx: (0..d)
                .map(|k| coarse_indices(self.nodes_per_dim[k], self.coarsen_rate))
                .collect(),
        };

        // Slab of the slowest dimension owned by this rank.
        let slow = self.nodes_per_dim[d - 1];
        let slab = DistMap::contiguous(slow as u64, comm);
        let per_slab: usize = self.nodes_per_dim[..d - 1].iter().product();
        let fine_gids: Vec<u64> = slab
            .gids()
            .iter()
            .flat_map(|&s| (0..per_slab as u64).map(move |i| s * per_slab as u64 + i))
            .collect();
        let fine_node_map =
            DistMap::with_global_len(fine_gids, self.num_fine_nodes() as u64)?.into_shared();
        let fine_dof_map = fine_node_map.blocked(bs).into_shared();

        let mut coord_cols = vec![Vec::with_capacity(fine_node_map.local_len()); d];
        let mut coarse_fine_gids = Vec::new();
        let mut coarse_gids = Vec::new();
        for &gid in fine_node_map.gids() {
            let ijk = lattice.fine_multi(gid as usize);
            let x = self.node_coordinates(&ijk);
            for (k, col) in coord_cols.iter_mut().enumerate() {
                col.push(x[k]);
            }
            if let Some(c) = lattice.coincident(&ijk) {
                coarse_fine_gids.push(gid);
                coarse_gids.push(lattice.coarse_gid(&c));
            }
        }
        let fine_coordinates = MultiVector::from_columns(Arc::clone(&fine_node_map), coord_cols)?;
        let num_coarse: usize = self.coarse_nodes_per_dim().iter().product();
        let coarse_coordinates_fine_map =
            DistMap::with_global_len(coarse_fine_gids, num_coarse as u64)?.into_shared();
        let coarse_coordinates_map = DistMap::with_global_len(coarse_gids, num_coarse as u64)?.into_shared();
        let coarse_dof_map = coarse_coordinates_map.blocked(bs).into_shared();

        let mut builder = CrsGraphBuilder::new(Arc::clone(&fine_dof_map));
        for (node, &gid) in fine_node_map.gids().iter().enumerate() {
            let ijk = lattice.fine_multi(gid as usize);
            let coarse_nodes: Vec<u64> = match lattice.coincident(&ijk) {
                Some(c) => vec![lattice.coarse_gid(&c)],
                None => {
                    let brackets: Vec<(usize, usize)> = (0..d).map(|k| lattice.bracket(&ijk, k)).collect();
                    (0..dimension.num_corners())
                        .map(|corner| {
                            let mut c = [0; MAX_DIM];
                            for (k, &(lo, hi)) in brackets.iter().enumerate() {
                                c[k] = if (corner >> k) & 1 == 1 { hi } else { lo };
                            }
                            lattice.coarse_gid(&c)
                        })
                        .collect()
                }
            };
            for dof in 0..bs {
                let cols: Vec<u64> = coarse_nodes.iter().map(|&c| c * bs as u64 + dof as u64).collect();
                builder.insert_global_indices(node * bs + dof, &cols)?;
            }
        }
        let pattern = Arc::new(builder.fill_complete(coarse_dof_map, Arc::clone(&fine_dof_map), comm)?);

        let fine_operator = diagonal_operator(&fine_dof_map, bs, comm)?;

        let rows = fine_dof_map.local_len();
        let nullspace_cols: Vec<Vec<f64>> = (0..bs)
            .map(|comp| (0..rows).map(|r| if r % bs == comp { 1.0 } else { 0.0 }).collect())
            .collect();
        let fine_nullspace = MultiVector::from_columns(Arc::clone(&fine_dof_map), nullspace_cols)?;

        log::debug!(
            "rank {}: structured {}D level with {} fine nodes, {} coarse nodes",
            comm.rank(),
            d,
            fine_node_map.local_len(),
            coarse_coordinates_map.local_len()
        );

        Ok(StructuredLevel {
            dimension,
            fine_node_map,
            fine_coordinates,
            fine_operator,
            fine_nullspace,
            coarse_coordinates_fine_map,
            coarse_coordinates_map,
            pattern,
            coarse_nodes_per_dim: self.coarse_nodes_per_dim(),
        })
    }
}

fn diagonal_operator<C: Communicator>(
    dof_map: &Arc<DistMap>,
    block_size: usize,
    comm: &C,
) -> Result<CrsMatrix, MeshGmgError> {
    let mut builder = CrsGraphBuilder::new(Arc::clone(dof_map));
    for (row, &gid) in dof_map.gids().iter().enumerate() {
        builder.insert_global_indices(row, &[gid])?;
    }
    let graph = Arc::new(builder.fill_complete(Arc::clone(dof_map), Arc::clone(dof_map), comm)?);
    let mut a = CrsMatrix::new(graph);
    a.set_all_to_scalar(2.0)?;
    a.fill_complete()?;
    let strided = StridedMap::new(Arc::clone(dof_map), vec![block_size])?;
    a.create_strided_view(StridedView {
        row_map: strided.clone(),
        domain_map: strided,
    });
    Ok(a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    #[test]
    fn coarse_indices_include_last() {
        assert_eq!(coarse_indices(7, 3), vec![0, 3, 6]);
        assert_eq!(coarse_indices(6, 3), vec![0, 3, 5]);
        assert_eq!(coarse_indices(2, 3), vec![0, 1]);
    }

    #[test]
    fn quad_pattern_rows() {
        let grid = StructuredGrid {
            nodes_per_dim: [4, 3, 1],
            coarsen_rate: 2,
            ..Default::default()
        };
        let level = grid.build_level(&NoComm).unwrap();
        // coarse x: [0, 2, 3], coarse y: [0, 2]
        assert_eq!(level.coarse_nodes_per_dim, [3, 2, 1]);
        assert_eq!(level.coarse_coordinates_map.gids(), &[0, 1, 2, 3, 4, 5]);
        assert_eq!(level.coarse_coordinates_fine_map.gids(), &[0, 2, 3, 8, 10, 11]);
        // fine (1,0): bracket x [0,1], y on a coarse line -> [0,1]
        let row = level.pattern.local_row_view(1).unwrap();
        let gids: Vec<u64> = row.iter().map(|&c| level.pattern.col_map().gid(c).unwrap()).collect();
        assert_eq!(gids, vec![0, 1, 3, 4]);
        assert_eq!(level.pattern.num_entries_in_local_row(0), 1);
    }

    #[test]
    fn blocked_rows_share_corners() {
        let grid = StructuredGrid {
            dimension: 1,
            nodes_per_dim: [3, 1, 1],
            coarsen_rate: 2,
            dofs_per_node: 2,
            ..Default::default()
        };
        let level = grid.build_level(&NoComm).unwrap();
        let col = |row: usize| -> Vec<u64> {
            level
                .pattern
                .local_row_view(row)
                .unwrap()
                .iter()
                .map(|&c| level.pattern.col_map().gid(c).unwrap())
                .collect()
        };
        assert_eq!(col(2), vec![0, 2]);
        assert_eq!(col(3), vec![1, 3]);
        assert_eq!(level.fine_nullspace.num_vectors(), 2);
        assert_eq!(level.fine_nullspace.column(1), &[0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn rejects_degenerate_grids() {
        let grid = StructuredGrid {
            nodes_per_dim: [1, 4, 1],
            ..Default::default()
        };
        assert!(matches!(grid.build_level(&NoComm), Err(MeshGmgError::InvalidGrid(_))));
    }
}
