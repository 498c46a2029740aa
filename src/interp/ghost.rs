//! Ghost coordinates for the prolongator's column space.

use std::sync::Arc;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::agree;
use crate::data::dist_map::DistMap;
use crate::data::import::{CombineMode, Importer};
use crate::data::multi_vector::MultiVector;
use crate::mesh_error::MeshGmgError;
use crate::sparse::crs_graph::CrsGraph;

const GHOST_AGREE_TAG: CommTag = CommTag::new(0x4d41);

/// Node-level column map of a blocked prolongator graph.
pub fn node_column_map(graph: &CrsGraph, dofs_per_node: usize) -> Result<Arc<DistMap>, MeshGmgError> {
    Ok(graph.col_map().node_map(dofs_per_node)?.into_shared())
}

/// Bring the coordinates of every coarse node referenced by a local row onto
/// this rank. Collective over `comm`.
///
/// `coarse_coordinates` lives on the coarse node map. The result lives on the
/// node column map: column `c` of the graph reads row `c / dofs_per_node`.
pub fn import_ghost_coordinates<C: Communicator>(
    coarse_coordinates: &MultiVector,
    graph: &CrsGraph,
    dofs_per_node: usize,
    comm: &C,
) -> Result<MultiVector, MeshGmgError> {
    let col_nodes = agree(
        node_column_map(graph, dofs_per_node),
        "node column map",
        comm,
        GHOST_AGREE_TAG,
    )?;
    let importer = agree(
        Importer::new(coarse_coordinates.map(), &col_nodes, comm),
        "ghost importer",
        comm,
        GHOST_AGREE_TAG,
    )?;
    let mut ghosts = MultiVector::new(col_nodes, coarse_coordinates.num_vectors());
    ghosts.do_import(coarse_coordinates, &importer, CombineMode::Insert, comm)?;
    log::trace!(
        "rank {}: imported {} ghost coordinates ({} remote)",
        comm.rank(),
        ghosts.local_len(),
        importer.num_remote()
    );
    Ok(ghosts)
}
