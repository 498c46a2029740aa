//! Row-distributed compressed sparse row graphs.
//!
//! A graph is assembled in global column ids with a [`CrsGraphBuilder`] and
//! frozen by [`CrsGraphBuilder::fill_complete`], which builds the column map,
//! converts every row to local column indices and prepares the importer from
//! the domain map to the column map.
//!
//! Column order inside a row is the order of insertion. It is never sorted:
//! callers such as the prolongator rely on positional meaning of entries.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use itertools::Itertools;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::agree;
use crate::data::directory::Directory;
use crate::data::dist_map::DistMap;
use crate::data::import::Importer;
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshGmgError;

const COLUMN_AGREE_TAG: CommTag = CommTag::new(0x4d50);

/// Graph under construction, rows indexed by local row, columns by gid.
#[derive(Clone, Debug)]
pub struct CrsGraphBuilder {
    row_map: Arc<DistMap>,
    rows: Vec<Vec<u64>>,
}

impl CrsGraphBuilder {
    pub fn new(row_map: Arc<DistMap>) -> Self {
        let rows = vec![Vec::new(); row_map.local_len()];
        Self { row_map, rows }
    }

    pub fn row_map(&self) -> &Arc<DistMap> {
        &self.row_map
    }

    /// Append global column ids to a local row, skipping ids already present.
    pub fn insert_global_indices(&mut self, local_row: usize, cols: &[u64]) -> Result<(), MeshGmgError> {
        let len = self.rows.len();
        let row = self
            .rows
            .get_mut(local_row)
            .ok_or(MeshGmgError::LocalIndexOutOfRange { index: local_row, len })?;
        for &c in cols {
            if !row.contains(&c) {
                row.push(c);
            }
        }
        Ok(())
    }

    /// Freeze the graph. Collective over `comm`.
    ///
    /// The column map lists the referenced gids owned by this rank in the
    /// domain map first (in domain-map order), then the remaining gids grouped
    /// by owning rank (ascending) and sorted within each group.
    pub fn fill_complete<C: Communicator>(
        self,
        domain_map: Arc<DistMap>,
        range_map: Arc<DistMap>,
        comm: &C,
    ) -> Result<CrsGraph, MeshGmgError> {
        let referenced: HashSet<u64> = self.rows.iter().flatten().copied().collect();

        let mut col_gids: Vec<u64> = domain_map
            .gids()
            .iter()
            .copied()
            .filter(|g| referenced.contains(g))
            .collect();
        let remote: Vec<u64> = referenced
            .iter()
            .copied()
            .filter(|&g| !domain_map.contains_gid(g))
            .sorted_unstable()
            .collect();

        let directory = Directory::new(&domain_map, comm)?;
        let owners = directory.owners(&remote, comm)?;
        let mut by_owner: BTreeMap<usize, Vec<u64>> = BTreeMap::new();
        let mut missing = None;
        for (gid, owner) in remote.iter().zip(owners) {
            match owner {
                Some(rank) => by_owner.entry(rank).or_default().push(*gid),
                None => {
                    missing.get_or_insert(MeshGmgError::MissingOwner { gid: *gid });
                }
            }
        }
        // Remote gids were sorted before grouping, so each group stays sorted.
        col_gids.extend(by_owner.into_values().flatten());

        let col_map = DistMap::from_gids(col_gids, comm)?.into_shared();
        let importer = Importer::new(&domain_map, &col_map, comm)?;
        agree(missing.map_or(Ok(()), Err), "column map", comm, COLUMN_AGREE_TAG)?;

        let mut row_ptr = Vec::with_capacity(self.rows.len() + 1);
        let mut col_ind = Vec::with_capacity(self.rows.iter().map(Vec::len).sum());
        row_ptr.push(0);
        for row in &self.rows {
            for &gid in row {
                col_ind.push(col_map.try_lid(gid)?);
            }
            row_ptr.push(col_ind.len());
        }

        let graph = CrsGraph {
            row_map: self.row_map,
            col_map,
            domain_map,
            range_map,
            row_ptr,
            col_ind,
            importer: Arc::new(importer),
        };
        graph.debug_assert_invariants();
        Ok(graph)
    }
}

/// Fill-complete sparse graph with local column indices.
#[derive(Clone, Debug)]
pub struct CrsGraph {
    row_map: Arc<DistMap>,
    col_map: Arc<DistMap>,
    domain_map: Arc<DistMap>,
    range_map: Arc<DistMap>,
    row_ptr: Vec<usize>,
    col_ind: Vec<usize>,
    importer: Arc<Importer>,
}

impl CrsGraph {
    pub fn row_map(&self) -> &Arc<DistMap> {
        &self.row_map
    }

    pub fn col_map(&self) -> &Arc<DistMap> {
        &self.col_map
    }

    pub fn domain_map(&self) -> &Arc<DistMap> {
        &self.domain_map
    }

    pub fn range_map(&self) -> &Arc<DistMap> {
        &self.range_map
    }

    /// Importer from the domain map to the column map.
    pub fn importer(&self) -> &Arc<Importer> {
        &self.importer
    }

    #[inline]
    pub fn num_local_rows(&self) -> usize {
        self.row_ptr.len() - 1
    }

    #[inline]
    pub fn num_local_entries(&self) -> usize {
        self.col_ind.len()
    }

    /// Number of entries in a local row (0 for out-of-range rows).
    #[inline]
    pub fn num_entries_in_local_row(&self, row: usize) -> usize {
        self.row_range(row).map_or(0, |r| r.len())
    }

    /// Local column indices of a local row, in insertion order.
    pub fn local_row_view(&self, row: usize) -> Result<&[usize], MeshGmgError> {
        let range = self.row_range(row).ok_or(MeshGmgError::LocalIndexOutOfRange {
            index: row,
            len: self.num_local_rows(),
        })?;
        Ok(&self.col_ind[range])
    }

    /// Offset range of a local row inside the value array.
    #[inline]
    pub(crate) fn row_range(&self, row: usize) -> Option<std::ops::Range<usize>> {
        if row + 1 < self.row_ptr.len() {
            Some(self.row_ptr[row]..self.row_ptr[row + 1])
        } else {
            None
        }
    }
}

impl DebugInvariants for CrsGraph {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "CrsGraph");
    }

    fn validate_invariants(&self) -> Result<(), MeshGmgError> {
        if self.row_ptr.len() != self.row_map.local_len() + 1 {
            return Err(MeshGmgError::LengthMismatch {
                context: "CrsGraph row pointers",
                expected: self.row_map.local_len() + 1,
                found: self.row_ptr.len(),
            });
        }
        if self.row_ptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(MeshGmgError::FillState("row pointers are not monotone"));
        }
        let ncols = self.col_map.local_len();
        if let Some(&bad) = self.col_ind.iter().find(|&&c| c >= ncols) {
            return Err(MeshGmgError::LocalIndexOutOfRange {
                index: bad,
                len: ncols,
            });
        }
        Ok(())
    }
}
