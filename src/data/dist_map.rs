//! Distributed index maps.
//!
//! A [`DistMap`] lists, in local order, the global ids (gids) present on this
//! rank. One-to-one maps (row, domain and range maps) give each gid exactly one
//! owner; overlapping maps (column maps, ghost maps) may repeat gids across
//! ranks. Local index (lid) `i` always refers to `gids()[i]`.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::{agree, all_reduce_sum};
use crate::debug_invariants::DebugInvariants;
use crate::mesh_error::MeshGmgError;

const GLOBAL_LEN_TAG: CommTag = CommTag::new(0x4d00);
const LOOKUP_AGREE_TAG: CommTag = CommTag::new(0x4d01);

/// Ordered set of global ids present on one rank.
#[derive(Clone, Debug)]
pub struct DistMap {
    gids: Vec<u64>,
    lookup: HashMap<u64, usize>,
    global_len: u64,
}

impl DistMap {
    /// Build a map from local gids, computing the global length collectively.
    ///
    /// For overlapping maps the global length is the sum of local lengths.
    /// A gid repeated on one rank fails the construction on every rank.
    pub fn from_gids<C: Communicator>(gids: Vec<u64>, comm: &C) -> Result<Self, MeshGmgError> {
        let lookup = build_lookup(&gids, comm.rank());
        let global_len = all_reduce_sum(gids.len() as u64, comm, GLOBAL_LEN_TAG)?;
        let lookup = agree(lookup, "map construction", comm, LOOKUP_AGREE_TAG)?;
        Ok(Self {
            gids,
            lookup,
            global_len,
        })
    }

    /// Build a map when the global length is already known (no communication).
    pub fn with_global_len(gids: Vec<u64>, global_len: u64) -> Result<Self, MeshGmgError> {
        let lookup = build_lookup(&gids, 0)?;
        Ok(Self {
            gids,
            lookup,
            global_len,
        })
    }

    /// Uniform contiguous partition of `0..global_len` over all ranks.
    ///
    /// The first `global_len % size` ranks receive one extra entry.
    pub fn contiguous<C: Communicator>(global_len: u64, comm: &C) -> Self {
        let size = comm.size() as u64;
        let rank = comm.rank() as u64;
        let base = global_len / size;
        let extra = global_len % size;
        let start = rank * base + rank.min(extra);
        let len = base + u64::from(rank < extra);
        let gids: Vec<u64> = (start..start + len).collect();
        let lookup = gids.iter().enumerate().map(|(lid, &g)| (g, lid)).collect();
        Self {
            gids,
            lookup,
            global_len,
        }
    }

    #[inline]
    pub fn local_len(&self) -> usize {
        self.gids.len()
    }

    #[inline]
    pub fn global_len(&self) -> u64 {
        self.global_len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.gids.is_empty()
    }

    #[inline]
    pub fn gids(&self) -> &[u64] {
        &self.gids
    }

    #[inline]
    pub fn gid(&self, lid: usize) -> Option<u64> {
        self.gids.get(lid).copied()
    }

    #[inline]
    pub fn lid(&self, gid: u64) -> Option<usize> {
        self.lookup.get(&gid).copied()
    }

    /// Like [`lid`](Self::lid) but reports a missing gid as an error.
    pub fn try_lid(&self, gid: u64) -> Result<usize, MeshGmgError> {
        self.lid(gid).ok_or(MeshGmgError::GlobalIdNotFound { gid })
    }

    #[inline]
    pub fn contains_gid(&self, gid: u64) -> bool {
        self.lookup.contains_key(&gid)
    }

    /// `true` if both maps hold the same gids in the same local order.
    pub fn is_same_as(&self, other: &DistMap) -> bool {
        self.global_len == other.global_len && self.gids == other.gids
    }

    /// Node-level map of a map laid out in blocks of `block_size` dofs.
    ///
    /// Every block must be contiguous and aligned: lid `b * block_size + d`
    /// holds gid `node * block_size + d`. The node map keeps one gid per block.
    pub fn node_map(&self, block_size: usize) -> Result<DistMap, MeshGmgError> {
        if block_size == 0 {
            return Err(MeshGmgError::BlockLayoutMismatch {
                block_size,
                column: 0,
            });
        }
        if block_size == 1 {
            return Ok(self.clone());
        }
        if self.gids.len() % block_size != 0 {
            return Err(MeshGmgError::BlockLayoutMismatch {
                block_size,
                column: self.gids.len(),
            });
        }
        let bs = block_size as u64;
        let mut nodes = Vec::with_capacity(self.gids.len() / block_size);
        for (block, chunk) in self.gids.chunks_exact(block_size).enumerate() {
            let node = chunk[0] / bs;
            for (dof, &gid) in chunk.iter().enumerate() {
                if gid != node * bs + dof as u64 {
                    return Err(MeshGmgError::BlockLayoutMismatch {
                        block_size,
                        column: block * block_size + dof,
                    });
                }
            }
            nodes.push(node);
        }
        DistMap::with_global_len(nodes, self.global_len / bs)
    }

    /// Dof-level map with `block_size` consecutive gids per entry of this map.
    pub fn blocked(&self, block_size: usize) -> DistMap {
        let bs = block_size as u64;
        let gids: Vec<u64> = self
            .gids
            .iter()
            .flat_map(|&node| (0..bs).map(move |dof| node * bs + dof))
            .collect();
        let lookup = gids.iter().enumerate().map(|(lid, &g)| (g, lid)).collect();
        DistMap {
            gids,
            lookup,
            global_len: self.global_len * bs,
        }
    }

    /// Convenience for the common `Arc<DistMap>` handle.
    pub fn into_shared(self) -> Arc<DistMap> {
        Arc::new(self)
    }
}

fn build_lookup(gids: &[u64], rank: usize) -> Result<HashMap<u64, usize>, MeshGmgError> {
    let mut lookup = HashMap::with_capacity(gids.len());
    for (lid, &gid) in gids.iter().enumerate() {
        if lookup.insert(gid, lid).is_some() {
            return Err(MeshGmgError::DuplicateOwner {
                gid,
                first: rank,
                second: rank,
            });
        }
    }
    Ok(lookup)
}

impl DebugInvariants for DistMap {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "DistMap");
    }

    fn validate_invariants(&self) -> Result<(), MeshGmgError> {
        if self.lookup.len() != self.gids.len() {
            return Err(MeshGmgError::LengthMismatch {
                context: "DistMap lookup",
                expected: self.gids.len(),
                found: self.lookup.len(),
            });
        }
        for (lid, &gid) in self.gids.iter().enumerate() {
            if self.lookup.get(&gid) != Some(&lid) {
                return Err(MeshGmgError::GlobalIdNotFound { gid });
            }
        }
        Ok(())
    }
}
