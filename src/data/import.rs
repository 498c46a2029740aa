//! Import plans between two distributed maps.
//!
//! An [`Importer`] describes how to fill every entry of a *target* map from a
//! one-to-one *source* map: entries present in both maps on this rank are
//! copied locally ("permutes"), the rest are requested from their owning
//! rank ("remotes"), and this rank in turn ships the entries other ranks
//! asked for ("exports"). The same plan run backwards is an export.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::algs::communicator::{CommTag, Communicator, ExchangeTags};
use crate::algs::exchange::{agree, sparse_all_to_all};
use crate::algs::wire::WireGid;
use crate::data::directory::Directory;
use crate::data::dist_map::DistMap;
use crate::mesh_error::MeshGmgError;

const REQUEST_TAGS: ExchangeTags = ExchangeTags::from_base(CommTag::new(0x4d20));
const PLAN_AGREE_TAG: CommTag = CommTag::new(0x4d22);

/// How incoming values are merged into the destination.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineMode {
    /// Overwrite the destination.
    #[default]
    Insert,
    /// Add into the destination.
    Add,
}

impl CombineMode {
    #[inline]
    pub fn combine(self, dst: &mut f64, incoming: f64) {
        match self {
            CombineMode::Insert => *dst = incoming,
            CombineMode::Add => *dst += incoming,
        }
    }
}

/// Communication plan from `source` to `target`.
#[derive(Clone, Debug)]
pub struct Importer {
    source: Arc<DistMap>,
    target: Arc<DistMap>,
    permutes: Vec<(usize, usize)>,
    remotes: BTreeMap<usize, Vec<usize>>,
    exports: BTreeMap<usize, Vec<usize>>,
}

impl Importer {
    /// Build the plan. Collective over `comm`.
    ///
    /// Fails with [`MeshGmgError::MissingOwner`] if a target gid is not owned
    /// by any rank of the source map. The failing rank still completes every
    /// collective stage, and the other ranks return
    /// [`MeshGmgError::RemoteFailure`].
    pub fn new<C: Communicator>(
        source: &Arc<DistMap>,
        target: &Arc<DistMap>,
        comm: &C,
    ) -> Result<Self, MeshGmgError> {
        let mut permutes = Vec::new();
        let mut remote_gids = Vec::new();
        let mut remote_lids = Vec::new();
        for (tgt_lid, &gid) in target.gids().iter().enumerate() {
            match source.lid(gid) {
                Some(src_lid) => permutes.push((src_lid, tgt_lid)),
                None => {
                    remote_gids.push(gid);
                    remote_lids.push(tgt_lid);
                }
            }
        }

        let directory = Directory::new(source, comm)?;
        let owners = directory.owners(&remote_gids, comm)?;

        let mut first_err = None;
        let mut remotes: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut requests: HashMap<usize, Vec<WireGid>> = HashMap::new();
        for ((gid, tgt_lid), owner) in remote_gids.iter().zip(&remote_lids).zip(owners) {
            match owner {
                Some(rank) => {
                    remotes.entry(rank).or_default().push(*tgt_lid);
                    requests.entry(rank).or_default().push(WireGid::of(*gid));
                }
                None => {
                    first_err.get_or_insert(MeshGmgError::MissingOwner { gid: *gid });
                }
            }
        }

        let incoming = sparse_all_to_all(requests, comm, REQUEST_TAGS)?;
        let mut exports = BTreeMap::new();
        for (asker, gids) in incoming {
            let mut lids = Vec::with_capacity(gids.len());
            for g in gids {
                match source.lid(g.get()) {
                    Some(lid) => lids.push(lid),
                    None => {
                        first_err.get_or_insert(MeshGmgError::GlobalIdNotFound { gid: g.get() });
                    }
                }
            }
            exports.insert(asker, lids);
        }

        agree(first_err.map_or(Ok(()), Err), "import plan", comm, PLAN_AGREE_TAG)?;
        log::trace!(
            "importer on rank {}: {} permutes, {} remote, {} exported",
            comm.rank(),
            permutes.len(),
            remotes.values().map(Vec::len).sum::<usize>(),
            exports.values().map(Vec::len).sum::<usize>()
        );
        Ok(Self {
            source: Arc::clone(source),
            target: Arc::clone(target),
            permutes,
            remotes,
            exports,
        })
    }

    pub fn source_map(&self) -> &Arc<DistMap> {
        &self.source
    }

    pub fn target_map(&self) -> &Arc<DistMap> {
        &self.target
    }

    /// `(source lid, target lid)` pairs satisfied locally.
    pub fn permutes(&self) -> &[(usize, usize)] {
        &self.permutes
    }

    /// Target lids received from each owning rank, in message order.
    pub fn remotes(&self) -> &BTreeMap<usize, Vec<usize>> {
        &self.remotes
    }

    /// Source lids sent to each requesting rank, in message order.
    pub fn exports(&self) -> &BTreeMap<usize, Vec<usize>> {
        &self.exports
    }

    pub fn num_remote(&self) -> usize {
        self.remotes.values().map(Vec::len).sum()
    }

    pub fn num_export(&self) -> usize {
        self.exports.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, RayonComm};

    #[test]
    fn serial_import_is_pure_permutation() {
        let src = DistMap::with_global_len(vec![0, 1, 2, 3], 4).unwrap().into_shared();
        let tgt = DistMap::with_global_len(vec![3, 1], 2).unwrap().into_shared();
        let imp = Importer::new(&src, &tgt, &NoComm).unwrap();
        assert_eq!(imp.permutes(), &[(3, 0), (1, 1)]);
        assert_eq!(imp.num_remote(), 0);
        assert_eq!(imp.num_export(), 0);
    }

    #[test]
    fn unknown_target_gid_is_reported() {
        let src = DistMap::with_global_len(vec![0, 1], 2).unwrap().into_shared();
        let tgt = DistMap::with_global_len(vec![1, 5], 2).unwrap().into_shared();
        let err = Importer::new(&src, &tgt, &NoComm).unwrap_err();
        assert_eq!(err, MeshGmgError::MissingOwner { gid: 5 });
    }

    #[test]
    fn two_rank_plan_pairs_remotes_with_exports() {
        let comms = RayonComm::world(2);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let (owned, ghost) = if comm.rank() == 0 {
                        (vec![0, 1], vec![0, 1, 2])
                    } else {
                        (vec![2, 3], vec![2, 3, 0, 1])
                    };
                    let src = DistMap::from_gids(owned, &comm).unwrap().into_shared();
                    let tgt = DistMap::from_gids(ghost, &comm).unwrap().into_shared();
                    let imp = Importer::new(&src, &tgt, &comm).unwrap();
                    (comm.rank(), imp.remotes().clone(), imp.exports().clone())
                })
            })
            .collect();
        for h in handles {
            let (rank, remotes, exports) = h.join().unwrap();
            if rank == 0 {
                assert_eq!(remotes.get(&1), Some(&vec![2]));
                assert_eq!(exports.get(&1), Some(&vec![0, 1]));
            } else {
                assert_eq!(remotes.get(&0), Some(&vec![2, 3]));
                assert_eq!(exports.get(&0), Some(&vec![0]));
            }
        }
    }

    #[test]
    fn missing_owner_on_one_rank_fails_both() {
        let handles: Vec<_> = RayonComm::world(2)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let me = comm.rank() as u64;
                    let src = DistMap::from_gids(vec![me], &comm).unwrap().into_shared();
                    let ghost = if me == 0 { vec![0, 1] } else { vec![1, 9] };
                    let tgt = DistMap::from_gids(ghost, &comm).unwrap().into_shared();
                    (me, Importer::new(&src, &tgt, &comm).unwrap_err())
                })
            })
            .collect();
        for h in handles {
            match h.join().unwrap() {
                (1, err) => assert_eq!(err, MeshGmgError::MissingOwner { gid: 9 }),
                (_, err) => assert!(matches!(err, MeshGmgError::RemoteFailure { failed_ranks: 1, .. })),
            }
        }
    }
}
