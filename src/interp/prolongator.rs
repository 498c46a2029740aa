//! Geometric prolongator construction for one multigrid level.
//!
//! [`GeometricInterpolation::build`] takes the fine operator, a prolongator
//! sparsity pattern built by the coarsening stage and the fine coordinates,
//! and returns the populated prolongator together with the coarse
//! coordinates and the coarse null-space.
//!
//! Pattern rows belonging to one fine node (its `dofs_per_node` consecutive
//! rows) carry either a single entry, for a node that coincides with a coarse
//! node, or `2^d` entries listing the corners of the coarse cell around the
//! node in lexicographic order.
//!
//! Every stage that communicates is collective. A rank that fails locally
//! still takes part in the agreement round that follows, so all ranks return
//! an error together instead of leaving peers blocked.

use std::sync::Arc;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange;
use crate::data::dist_map::DistMap;
use crate::data::import::{CombineMode, Importer};
use crate::data::multi_vector::MultiVector;
use crate::data::strided_map::StridedMap;
use crate::interp::ghost::import_ghost_coordinates;
use crate::interp::params::{InterpolationOrder, InterpolationParams, NonConvergencePolicy};
use crate::interp::shape::{Dimension, MAX_CORNERS, MAX_DIM};
use crate::interp::stencil::{Stencil, compute_linear_stencil};
use crate::interp::trace::DebugTrace;
use crate::mesh_error::MeshGmgError;
use crate::sparse::crs_graph::CrsGraph;
use crate::sparse::crs_matrix::{ApplyMode, BlockedOperator, CrsMatrix, StridedView};

const AGREE_TAG: CommTag = CommTag::new(0x4d40);

fn agree<T, C: Communicator>(local: Result<T, MeshGmgError>, stage: &'static str, comm: &C) -> Result<T, MeshGmgError> {
    exchange::agree(local, stage, comm, AGREE_TAG)
}

/// Everything a level build reads. All references are borrowed read-only.
pub struct ProlongatorInputs<'a, A: BlockedOperator> {
    /// Fine-level operator; supplies the block size and optional strided row map.
    pub fine_operator: &'a A,
    /// Sparsity pattern of the prolongator (fine dof rows, coarse dof columns).
    pub pattern: &'a Arc<CrsGraph>,
    /// One column per spatial dimension, on the fine node map.
    pub fine_coordinates: Option<&'a MultiVector>,
    /// Near null-space of the fine operator, on its row map.
    pub fine_nullspace: Option<&'a MultiVector>,
    /// Coarse nodes indexed by their fine-level node gids, on the ranks that
    /// own those fine nodes.
    pub coarse_coordinates_fine_map: Option<&'a Arc<DistMap>>,
    /// Coarse node map (coarse gids, same local order as the fine-indexed map).
    pub coarse_coordinates_map: Option<&'a Arc<DistMap>>,
    pub num_dimensions: usize,
    /// Passed through to the coarse level untouched.
    pub coarse_nodes_per_dim: Option<[usize; MAX_DIM]>,
}

/// Quantities fixed by [`ProlongatorInputs::validate`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ValidatedLayout {
    pub dimension: Dimension,
    pub dofs_per_node: usize,
    pub num_fine_nodes: usize,
}

impl<A: BlockedOperator> ProlongatorInputs<'_, A> {
    /// Check that the inputs can serve `params`. Purely local.
    pub fn validate(&self, params: &InterpolationParams) -> Result<ValidatedLayout, MeshGmgError> {
        let dimension = Dimension::try_from(self.num_dimensions)?;
        let dofs_per_node = self.fine_operator.fixed_block_size();
        let rows = self.pattern.num_local_rows();
        if dofs_per_node == 0 || rows % dofs_per_node != 0 {
            return Err(MeshGmgError::BlockLayoutMismatch {
                block_size: dofs_per_node,
                column: rows,
            });
        }
        let num_fine_nodes = rows / dofs_per_node;

        let linear = params.order == InterpolationOrder::Linear;
        if linear || params.build_coarse_coordinates {
            let coords = self.fine_coordinates.ok_or(MeshGmgError::MissingInput("fine_coordinates"))?;
            if coords.num_vectors() != dimension.get() {
                return Err(MeshGmgError::LengthMismatch {
                    context: "fine coordinate dimensions",
                    expected: dimension.get(),
                    found: coords.num_vectors(),
                });
            }
            if coords.local_len() != num_fine_nodes {
                return Err(MeshGmgError::LengthMismatch {
                    context: "fine coordinates per fine node",
                    expected: num_fine_nodes,
                    found: coords.local_len(),
                });
            }
            let fine_indexed = self
                .coarse_coordinates_fine_map
                .ok_or(MeshGmgError::MissingInput("coarse_coordinates_fine_map"))?;
            let coarse = self
                .coarse_coordinates_map
                .ok_or(MeshGmgError::MissingInput("coarse_coordinates_map"))?;
            if fine_indexed.local_len() != coarse.local_len() {
                return Err(MeshGmgError::LengthMismatch {
                    context: "coarse coordinate maps",
                    expected: fine_indexed.local_len(),
                    found: coarse.local_len(),
                });
            }
        }
        if linear {
            let ns = self.fine_nullspace.ok_or(MeshGmgError::MissingInput("fine_nullspace"))?;
            if ns.local_len() != rows {
                return Err(MeshGmgError::LengthMismatch {
                    context: "fine nullspace rows",
                    expected: rows,
                    found: ns.local_len(),
                });
            }
        }
        Ok(ValidatedLayout {
            dimension,
            dofs_per_node,
            num_fine_nodes,
        })
    }
}

/// Per-build stencil statistics, summed over local nodes.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct StencilStats {
    pub coincident: usize,
    pub interpolated: usize,
    pub not_converged: usize,
    pub max_iterations: usize,
    /// Largest final residual norm among interpolated nodes.
    pub max_residual_norm: f64,
}

impl StencilStats {
    fn record(&mut self, s: &Stencil) {
        if s.len() == 1 {
            self.coincident += 1;
            return;
        }
        self.interpolated += 1;
        if !s.converged {
            self.not_converged += 1;
        }
        self.max_iterations = self.max_iterations.max(s.iterations);
        self.max_residual_norm = self.max_residual_norm.max(s.residual_norm);
    }
}

/// Output of one level build.
#[derive(Clone, Debug)]
pub struct CoarseLevel {
    pub prolongator: CrsMatrix,
    pub coarse_coordinates: Option<MultiVector>,
    pub coarse_nullspace: Option<MultiVector>,
    pub num_dimensions: usize,
    pub coarse_nodes_per_dim: Option<[usize; MAX_DIM]>,
    pub stats: StencilStats,
}

/// Builder for geometric prolongators. Holds only its parameters.
#[derive(Clone, Debug, Default)]
pub struct GeometricInterpolation {
    params: InterpolationParams,
}

impl GeometricInterpolation {
    pub fn new(params: InterpolationParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &InterpolationParams {
        &self.params
    }

    /// Build the prolongator and coarse data for one level. Collective over `comm`.
    pub fn build<A, C>(&self, inputs: &ProlongatorInputs<'_, A>, comm: &C) -> Result<CoarseLevel, MeshGmgError>
    where
        A: BlockedOperator,
        C: Communicator,
    {
        let trace = DebugTrace::new(comm.rank());
        let params = &self.params;
        let layout = agree(inputs.validate(params), "validate inputs", comm)?;
        trace.emit(|| {
            format!(
                "order {:?}, {}D, {} dofs/node, {} fine nodes",
                params.order,
                layout.dimension.get(),
                layout.dofs_per_node,
                layout.num_fine_nodes
            )
        });

        let linear = params.order == InterpolationOrder::Linear;
        let coarse_coordinates = if linear || params.build_coarse_coordinates {
            let (Some(fine), Some(fine_indexed), Some(coarse)) = (
                inputs.fine_coordinates,
                inputs.coarse_coordinates_fine_map,
                inputs.coarse_coordinates_map,
            ) else {
                return Err(MeshGmgError::MissingInput("coarse coordinate inputs"));
            };
            let cc = build_coarse_coordinates(fine, fine_indexed, coarse, comm)?;
            trace.emit(|| format!("{} coarse coordinates", cc.local_len()));
            Some(cc)
        } else {
            None
        };

        let mut stats = StencilStats::default();
        let mut prolongator = match params.order {
            InterpolationOrder::Constant => agree(build_constant_p(inputs.pattern), "constant prolongator", comm)?,
            InterpolationOrder::Linear => {
                let (Some(coarse), Some(fine)) = (coarse_coordinates.as_ref(), inputs.fine_coordinates) else {
                    return Err(MeshGmgError::MissingInput("fine_coordinates"));
                };
                let ghosts = import_ghost_coordinates(coarse, inputs.pattern, layout.dofs_per_node, comm)?;
                trace.emit(|| format!("{} ghost coordinates staged", ghosts.local_len()));
                let built = build_linear_p(inputs.pattern, fine, &ghosts, layout, params, &mut stats);
                agree(built, "linear prolongator", comm)?
            }
        };

        let view = agree(strided_view(inputs, &prolongator, layout.dofs_per_node), "strided view", comm)?;
        prolongator.create_strided_view(view);

        let coarse_nullspace = match inputs.fine_nullspace {
            Some(fine_ns) => {
                let mut coarse_ns = MultiVector::new(Arc::clone(prolongator.domain_map()), fine_ns.num_vectors());
                prolongator.apply(fine_ns, &mut coarse_ns, ApplyMode::Trans, 1.0, 0.0, comm)?;
                Some(coarse_ns)
            }
            None => None,
        };

        trace.emit(|| {
            format!(
                "{} coincident, {} interpolated, {} not converged, max {} iterations",
                stats.coincident, stats.interpolated, stats.not_converged, stats.max_iterations
            )
        });
        log::debug!(
            "rank {}: prolongator with {} local rows and {} entries",
            comm.rank(),
            prolongator.graph().num_local_rows(),
            prolongator.graph().num_local_entries()
        );

        Ok(CoarseLevel {
            prolongator,
            coarse_coordinates: coarse_coordinates.filter(|_| params.build_coarse_coordinates),
            coarse_nullspace,
            num_dimensions: layout.dimension.get(),
            coarse_nodes_per_dim: inputs.coarse_nodes_per_dim,
            stats,
        })
    }
}

fn strided_view<A: BlockedOperator>(
    inputs: &ProlongatorInputs<'_, A>,
    prolongator: &CrsMatrix,
    dofs_per_node: usize,
) -> Result<StridedView, MeshGmgError> {
    let row_map = match inputs.fine_operator.strided_row_map() {
        Some(strided) => strided.clone(),
        None => StridedMap::new(Arc::clone(prolongator.range_map()), vec![dofs_per_node])?,
    };
    let domain_map = StridedMap::new(Arc::clone(inputs.pattern.domain_map()), vec![dofs_per_node])?;
    Ok(StridedView { row_map, domain_map })
}

/// Coarse node coordinates on the coarse node map. Collective over `comm`.
///
/// Fine coordinates are imported onto the fine-indexed coarse map, then the
/// result is relabelled with the coarse map.
pub fn build_coarse_coordinates<C: Communicator>(
    fine_coordinates: &MultiVector,
    coarse_coordinates_fine_map: &Arc<DistMap>,
    coarse_coordinates_map: &Arc<DistMap>,
    comm: &C,
) -> Result<MultiVector, MeshGmgError> {
    let importer = agree(
        Importer::new(fine_coordinates.map(), coarse_coordinates_fine_map, comm),
        "coarse coordinate importer",
        comm,
    )?;
    let mut coarse = MultiVector::new(Arc::clone(coarse_coordinates_fine_map), fine_coordinates.num_vectors());
    coarse.do_import(fine_coordinates, &importer, CombineMode::Insert, comm)?;
    coarse.replace_map(Arc::clone(coarse_coordinates_map))?;
    Ok(coarse)
}

/// Piecewise-constant prolongator: the pattern with every value 1.
pub fn build_constant_p(pattern: &Arc<CrsGraph>) -> Result<CrsMatrix, MeshGmgError> {
    for row in 0..pattern.num_local_rows() {
        let found = pattern.num_entries_in_local_row(row);
        if found != 1 {
            return Err(MeshGmgError::PatternRowLength {
                row,
                found,
                expected: "1",
            });
        }
    }
    let mut p = CrsMatrix::new(Arc::clone(pattern));
    p.set_all_to_scalar(1.0)?;
    p.fill_complete()?;
    Ok(p)
}

/// Multilinear prolongator from fine coordinates and ghosted coarse coordinates.
///
/// `ghosts` lives on the node-level column map of `pattern`. The stencil of
/// each node is written into every dof row of its block.
pub fn build_linear_p(
    pattern: &Arc<CrsGraph>,
    fine_coordinates: &MultiVector,
    ghosts: &MultiVector,
    layout: ValidatedLayout,
    params: &InterpolationParams,
    stats: &mut StencilStats,
) -> Result<CrsMatrix, MeshGmgError> {
    let compute = |node: usize| node_stencil(node, pattern, fine_coordinates, ghosts, layout, params);

    #[cfg(feature = "rayon")]
    let stencils: Vec<Result<Stencil, MeshGmgError>> =
        (0..layout.num_fine_nodes).into_par_iter().map(compute).collect();
    #[cfg(not(feature = "rayon"))]
    let stencils: Vec<Result<Stencil, MeshGmgError>> = (0..layout.num_fine_nodes).map(compute).collect();

    let mut p = CrsMatrix::new(Arc::clone(pattern));
    for (node, stencil) in stencils.into_iter().enumerate() {
        let stencil = stencil?;
        if !stencil.converged {
            match params.non_convergence {
                NonConvergencePolicy::Accept => {}
                NonConvergencePolicy::Warn => log::warn!(
                    "interpolation stencil for node {node} not converged after {} iterations (residual {:e}, reference {:e})",
                    stencil.iterations,
                    stencil.residual_norm,
                    stencil.reference_norm
                ),
                NonConvergencePolicy::Error => {
                    return Err(MeshGmgError::StencilNotConverged {
                        node,
                        iterations: stencil.iterations,
                        residual: stencil.residual_norm,
                    });
                }
            }
        }
        stats.record(&stencil);
        for dof in 0..layout.dofs_per_node {
            let row = node * layout.dofs_per_node + dof;
            let cols = pattern.local_row_view(row)?;
            if cols.len() != stencil.len() {
                return Err(MeshGmgError::PatternRowLength {
                    row,
                    found: cols.len(),
                    expected: "the entry count of the first row of its node block",
                });
            }
            p.replace_local_values(row, cols, stencil.weights())?;
        }
    }
    p.fill_complete()?;
    Ok(p)
}

fn node_stencil(
    node: usize,
    pattern: &CrsGraph,
    fine_coordinates: &MultiVector,
    ghosts: &MultiVector,
    layout: ValidatedLayout,
    params: &InterpolationParams,
) -> Result<Stencil, MeshGmgError> {
    let dim = layout.dimension;
    let row = node * layout.dofs_per_node;
    let cols = pattern.local_row_view(row)?;
    if cols.len() == 1 {
        return Ok(Stencil::coincident());
    }
    if cols.len() != dim.num_corners() {
        return Err(MeshGmgError::PatternRowLength {
            row,
            found: cols.len(),
            expected: "1 or 2^d",
        });
    }
    let mut target = [0.0; MAX_DIM];
    let mut corners = [[0.0; MAX_DIM]; MAX_CORNERS];
    for k in 0..dim.get() {
        target[k] = fine_coordinates.get(node, k);
        for (corner, &col) in corners.iter_mut().zip(cols) {
            corner[k] = ghosts.get(col / layout.dofs_per_node, k);
        }
    }
    compute_linear_stencil(dim, &target, &corners, &params.newton)
        .map_err(|_| MeshGmgError::SingularJacobian { node })
}
