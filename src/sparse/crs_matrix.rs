//! Sparse matrices over a fixed (static) [`CrsGraph`].
//!
//! The structure never changes after construction; only values are written.
//! Fill state follows the usual two-phase protocol: values may be modified
//! while fill is active, and `apply` requires a completed fill.

use std::sync::Arc;

use crate::algs::communicator::Communicator;
use crate::data::dist_map::DistMap;
use crate::data::import::CombineMode;
use crate::data::multi_vector::MultiVector;
use crate::data::strided_map::StridedMap;
use crate::mesh_error::MeshGmgError;
use crate::sparse::crs_graph::CrsGraph;

/// Whether `apply` uses the matrix or its transpose.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ApplyMode {
    NoTrans,
    Trans,
}

/// Block layout attached to a matrix: row side and domain side.
#[derive(Clone, Debug)]
pub struct StridedView {
    pub row_map: StridedMap,
    pub domain_map: StridedMap,
}

/// What a multigrid transfer builder needs to know about a fine operator.
pub trait BlockedOperator {
    /// Number of matrix rows per mesh node.
    fn fixed_block_size(&self) -> usize;
    /// Block-annotated row map, if the operator carries one.
    fn strided_row_map(&self) -> Option<&StridedMap>;
}

/// Compressed sparse row matrix on a static graph.
#[derive(Clone, Debug)]
pub struct CrsMatrix {
    graph: Arc<CrsGraph>,
    values: Vec<f64>,
    fill_active: bool,
    fixed_block_size: usize,
    strided: Option<StridedView>,
}

impl CrsMatrix {
    /// Zero-valued matrix on `graph`, fill active.
    pub fn new(graph: Arc<CrsGraph>) -> Self {
        let values = vec![0.0; graph.num_local_entries()];
        Self {
            graph,
            values,
            fill_active: true,
            fixed_block_size: 1,
            strided: None,
        }
    }

    pub fn graph(&self) -> &Arc<CrsGraph> {
        &self.graph
    }

    pub fn row_map(&self) -> &Arc<DistMap> {
        self.graph.row_map()
    }

    pub fn col_map(&self) -> &Arc<DistMap> {
        self.graph.col_map()
    }

    pub fn domain_map(&self) -> &Arc<DistMap> {
        self.graph.domain_map()
    }

    pub fn range_map(&self) -> &Arc<DistMap> {
        self.graph.range_map()
    }

    #[inline]
    pub fn is_fill_active(&self) -> bool {
        self.fill_active
    }

    #[inline]
    pub fn is_fill_complete(&self) -> bool {
        !self.fill_active
    }

    pub fn resume_fill(&mut self) {
        self.fill_active = true;
    }

    /// End the fill phase. The structure is static, so no communication is needed.
    pub fn fill_complete(&mut self) -> Result<(), MeshGmgError> {
        if !self.fill_active {
            return Err(MeshGmgError::FillState("fill_complete called twice"));
        }
        self.fill_active = false;
        Ok(())
    }

    pub fn set_all_to_scalar(&mut self, value: f64) -> Result<(), MeshGmgError> {
        self.require_fill_active()?;
        self.values.fill(value);
        Ok(())
    }

    #[inline]
    pub fn num_entries_in_local_row(&self, row: usize) -> usize {
        self.graph.num_entries_in_local_row(row)
    }

    /// Column indices and values of a local row.
    pub fn local_row_view(&self, row: usize) -> Result<(&[usize], &[f64]), MeshGmgError> {
        let cols = self.graph.local_row_view(row)?;
        let range = self
            .graph
            .row_range(row)
            .ok_or(MeshGmgError::LocalIndexOutOfRange {
                index: row,
                len: self.graph.num_local_rows(),
            })?;
        Ok((cols, &self.values[range]))
    }

    /// Overwrite the values at local columns `cols` of local row `row`.
    ///
    /// Returns the number of entries replaced. Every column must already be
    /// part of the row.
    pub fn replace_local_values(
        &mut self,
        row: usize,
        cols: &[usize],
        vals: &[f64],
    ) -> Result<usize, MeshGmgError> {
        self.require_fill_active()?;
        if cols.len() != vals.len() {
            return Err(MeshGmgError::LengthMismatch {
                context: "replace_local_values",
                expected: cols.len(),
                found: vals.len(),
            });
        }
        let range = self
            .graph
            .row_range(row)
            .ok_or(MeshGmgError::LocalIndexOutOfRange {
                index: row,
                len: self.graph.num_local_rows(),
            })?;
        let row_cols = self.graph.local_row_view(row)?;
        for (&col, &val) in cols.iter().zip(vals) {
            let pos = row_cols
                .iter()
                .position(|&c| c == col)
                .ok_or(MeshGmgError::ColumnNotInRow { row, col })?;
            self.values[range.start + pos] = val;
        }
        Ok(cols.len())
    }

    /// Attach the block layout of the row and domain spaces.
    pub fn create_strided_view(&mut self, view: StridedView) {
        self.fixed_block_size = view.row_map.block_size();
        self.strided = Some(view);
    }

    pub fn strided_view(&self) -> Option<&StridedView> {
        self.strided.as_ref()
    }

    /// `y = beta * y + alpha * op(A) * x`. Collective over `comm`.
    ///
    /// `NoTrans` reads `x` on the domain map and writes `y` on the range map;
    /// `Trans` reads `x` on the range map and writes `y` on the domain map.
    /// The range map must coincide with the row map.
    pub fn apply<C: Communicator>(
        &self,
        x: &MultiVector,
        y: &mut MultiVector,
        mode: ApplyMode,
        alpha: f64,
        beta: f64,
        comm: &C,
    ) -> Result<(), MeshGmgError> {
        if self.fill_active {
            return Err(MeshGmgError::FillState("apply requires a fill-complete matrix"));
        }
        if !self.graph.range_map().is_same_as(self.graph.row_map()) {
            return Err(MeshGmgError::LengthMismatch {
                context: "apply: range map differs from row map",
                expected: self.graph.row_map().local_len(),
                found: self.graph.range_map().local_len(),
            });
        }
        if x.num_vectors() != y.num_vectors() {
            return Err(MeshGmgError::LengthMismatch {
                context: "apply num_vectors",
                expected: x.num_vectors(),
                found: y.num_vectors(),
            });
        }
        let nv = x.num_vectors();
        let importer = self.graph.importer();
        match mode {
            ApplyMode::NoTrans => {
                let mut x_col = MultiVector::new(Arc::clone(self.graph.col_map()), nv);
                x_col.do_import(x, importer, CombineMode::Insert, comm)?;
                expect_len(y.local_len(), self.graph.num_local_rows(), "apply output")?;
                for k in 0..nv {
                    let xc = x_col.column(k);
                    let yc = y.column_mut(k);
                    for (row, yv) in yc.iter_mut().enumerate() {
                        let (cols, vals) = self.local_row_view(row)?;
                        let dot: f64 = cols.iter().zip(vals).map(|(&c, &v)| v * xc[c]).sum();
                        *yv = beta * *yv + alpha * dot;
                    }
                }
            }
            ApplyMode::Trans => {
                expect_len(x.local_len(), self.graph.num_local_rows(), "transpose apply input")?;
                let mut z_col = MultiVector::new(Arc::clone(self.graph.col_map()), nv);
                for k in 0..nv {
                    let xc = x.column(k);
                    let zc = z_col.column_mut(k);
                    for (row, &xv) in xc.iter().enumerate() {
                        let (cols, vals) = self.local_row_view(row)?;
                        for (&c, &v) in cols.iter().zip(vals) {
                            zc[c] += v * xv;
                        }
                    }
                }
                let mut z = MultiVector::new(Arc::clone(self.graph.domain_map()), nv);
                z.do_export(&z_col, importer, CombineMode::Add, comm)?;
                expect_len(y.local_len(), z.local_len(), "transpose apply output")?;
                for k in 0..nv {
                    let zc = z.column(k);
                    for (yv, &zv) in y.column_mut(k).iter_mut().zip(zc) {
                        *yv = beta * *yv + alpha * zv;
                    }
                }
            }
        }
        Ok(())
    }

    /// `(row gid, column gid, value)` for every local entry, in storage order.
    pub fn global_triplets(&self) -> Vec<(u64, u64, f64)> {
        let rows = self.graph.row_map();
        let cols = self.graph.col_map();
        let mut out = Vec::with_capacity(self.values.len());
        for row in 0..self.graph.num_local_rows() {
            let Ok((lcols, vals)) = self.local_row_view(row) else {
                continue;
            };
            let Some(rg) = rows.gid(row) else { continue };
            for (&c, &v) in lcols.iter().zip(vals) {
                if let Some(cg) = cols.gid(c) {
                    out.push((rg, cg, v));
                }
            }
        }
        out
    }

    fn require_fill_active(&self) -> Result<(), MeshGmgError> {
        if self.fill_active {
            Ok(())
        } else {
            Err(MeshGmgError::FillState("matrix values are frozen; call resume_fill first"))
        }
    }
}

impl BlockedOperator for CrsMatrix {
    fn fixed_block_size(&self) -> usize {
        self.fixed_block_size
    }

    fn strided_row_map(&self) -> Option<&StridedMap> {
        self.strided.as_ref().map(|v| &v.row_map)
    }
}

fn expect_len(found: usize, expected: usize, context: &'static str) -> Result<(), MeshGmgError> {
    if found == expected {
        Ok(())
    } else {
        Err(MeshGmgError::LengthMismatch {
            context,
            expected,
            found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::sparse::crs_graph::CrsGraphBuilder;

    fn small_graph() -> Arc<CrsGraph> {
        // 3x2 pattern: rows {0: [0], 1: [0, 1], 2: [1]}
        let rows = DistMap::with_global_len(vec![0, 1, 2], 3).unwrap().into_shared();
        let domain = DistMap::with_global_len(vec![0, 1], 2).unwrap().into_shared();
        let mut b = CrsGraphBuilder::new(Arc::clone(&rows));
        b.insert_global_indices(0, &[0]).unwrap();
        b.insert_global_indices(1, &[0, 1]).unwrap();
        b.insert_global_indices(2, &[1]).unwrap();
        Arc::new(b.fill_complete(domain, rows, &NoComm).unwrap())
    }

    #[test]
    fn replace_requires_active_fill_and_known_columns() {
        let mut m = CrsMatrix::new(small_graph());
        assert_eq!(m.replace_local_values(1, &[1, 0], &[0.25, 0.75]).unwrap(), 2);
        assert_eq!(m.local_row_view(1).unwrap().1, &[0.75, 0.25]);
        assert!(matches!(
            m.replace_local_values(0, &[1], &[1.0]),
            Err(MeshGmgError::ColumnNotInRow { row: 0, col: 1 })
        ));
        m.fill_complete().unwrap();
        assert!(m.set_all_to_scalar(1.0).is_err());
        m.resume_fill();
        m.set_all_to_scalar(1.0).unwrap();
    }

    #[test]
    fn apply_and_transpose_apply() {
        let g = small_graph();
        let mut m = CrsMatrix::new(Arc::clone(&g));
        m.replace_local_values(0, &[0], &[1.0]).unwrap();
        m.replace_local_values(1, &[0, 1], &[0.5, 0.5]).unwrap();
        m.replace_local_values(2, &[1], &[1.0]).unwrap();
        m.fill_complete().unwrap();

        let x = MultiVector::from_columns(Arc::clone(g.domain_map()), vec![vec![2.0, 4.0]]).unwrap();
        let mut y = MultiVector::new(Arc::clone(g.range_map()), 1);
        m.apply(&x, &mut y, ApplyMode::NoTrans, 1.0, 0.0, &NoComm).unwrap();
        assert_eq!(y.column(0), &[2.0, 3.0, 4.0]);

        let ones = MultiVector::from_columns(Arc::clone(g.range_map()), vec![vec![1.0; 3]]).unwrap();
        let mut r = MultiVector::new(Arc::clone(g.domain_map()), 1);
        m.apply(&ones, &mut r, ApplyMode::Trans, 1.0, 0.0, &NoComm).unwrap();
        assert_eq!(r.column(0), &[1.5, 1.5]);

        let triplets = m.global_triplets();
        assert_eq!(triplets.len(), 4);
        assert_eq!(triplets[1], (1, 0, 0.5));
    }
}
