//! Hashed distributed directory: resolves the owning rank of any gid.
//!
//! Ownership records of a one-to-one map are scattered to directory rank
//! `gid % size`. Lookups send each queried gid to its directory rank, which
//! answers with the owner (or "unknown"). Both construction and lookup are
//! collective.

use std::collections::HashMap;

use crate::algs::communicator::{CommTag, Communicator, ExchangeTags};
use crate::algs::exchange::{agree, sparse_all_to_all};
use crate::algs::wire::{WireGid, WireOwner};
use crate::data::dist_map::DistMap;
use crate::mesh_error::MeshGmgError;

const REGISTER_TAGS: ExchangeTags = ExchangeTags::from_base(CommTag::new(0x4d10));
const QUERY_TAGS: ExchangeTags = ExchangeTags::from_base(CommTag::new(0x4d12));
const REPLY_TAGS: ExchangeTags = ExchangeTags::from_base(CommTag::new(0x4d14));
const REGISTER_AGREE_TAG: CommTag = CommTag::new(0x4d16);
const LOOKUP_AGREE_TAG: CommTag = CommTag::new(0x4d17);

/// The slice of the distributed directory held by this rank.
#[derive(Clone, Debug, Default)]
pub struct Directory {
    entries: HashMap<u64, usize>,
}

#[inline]
fn directory_rank(gid: u64, size: usize) -> usize {
    (gid % size as u64) as usize
}

impl Directory {
    /// Register every gid of `map` with its owner (this rank). Collective.
    ///
    /// A gid registered by two ranks fails the construction on every rank:
    /// the directory rank that sees it reports [`MeshGmgError::DuplicateOwner`],
    /// the others [`MeshGmgError::RemoteFailure`].
    pub fn new<C: Communicator>(map: &DistMap, comm: &C) -> Result<Self, MeshGmgError> {
        let me = comm.rank();
        let size = comm.size();
        let mut outgoing: HashMap<usize, Vec<WireOwner>> = HashMap::new();
        for &gid in map.gids() {
            outgoing
                .entry(directory_rank(gid, size))
                .or_default()
                .push(WireOwner::new(gid, Some(me)));
        }
        let registered = sparse_all_to_all(outgoing, comm, REGISTER_TAGS).and_then(|incoming| {
            let mut entries = HashMap::new();
            let mut senders: Vec<_> = incoming.into_iter().collect();
            senders.sort_unstable_by_key(|(rank, _)| *rank);
            for (sender, records) in senders {
                for rec in records {
                    let owner = rec.rank().ok_or_else(|| {
                        MeshGmgError::comm(sender, "directory registration without owner")
                    })?;
                    if let Some(first) = entries.insert(rec.gid(), owner) {
                        return Err(MeshGmgError::DuplicateOwner {
                            gid: rec.gid(),
                            first,
                            second: owner,
                        });
                    }
                }
            }
            Ok(entries)
        });
        let entries = agree(registered, "directory registration", comm, REGISTER_AGREE_TAG)?;
        Ok(Self { entries })
    }

    /// Number of gids this rank answers for.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Owner rank of each gid in `gids`, `None` for unknown gids. Collective.
    pub fn owners<C: Communicator>(
        &self,
        gids: &[u64],
        comm: &C,
    ) -> Result<Vec<Option<usize>>, MeshGmgError> {
        let size = comm.size();

        // Queries grouped by directory rank; remember where each answer goes.
        let mut queries: HashMap<usize, Vec<WireGid>> = HashMap::new();
        let mut slots: HashMap<usize, Vec<usize>> = HashMap::new();
        for (pos, &gid) in gids.iter().enumerate() {
            let dir = directory_rank(gid, size);
            queries.entry(dir).or_default().push(WireGid::of(gid));
            slots.entry(dir).or_default().push(pos);
        }
        let incoming = sparse_all_to_all(queries, comm, QUERY_TAGS)?;

        let replies: HashMap<usize, Vec<WireOwner>> = incoming
            .into_iter()
            .map(|(asker, gids)| {
                let answers = gids
                    .iter()
                    .map(|g| WireOwner::new(g.get(), self.entries.get(&g.get()).copied()))
                    .collect();
                (asker, answers)
            })
            .collect();
        let answered = sparse_all_to_all(replies, comm, REPLY_TAGS)
            .and_then(|answers| collect_owners(gids, slots, &answers));
        agree(answered, "directory lookup", comm, LOOKUP_AGREE_TAG)
    }
}

fn collect_owners(
    gids: &[u64],
    slots: HashMap<usize, Vec<usize>>,
    answers: &HashMap<usize, Vec<WireOwner>>,
) -> Result<Vec<Option<usize>>, MeshGmgError> {
    let mut owners = vec![None; gids.len()];
    for (dir, positions) in slots {
        let recs = answers
            .get(&dir)
            .ok_or_else(|| MeshGmgError::comm(dir, "missing directory reply"))?;
        if recs.len() != positions.len() {
            return Err(MeshGmgError::comm(
                dir,
                format!(
                    "directory replied with {} records for {} queries",
                    recs.len(),
                    positions.len()
                ),
            ));
        }
        for (pos, rec) in positions.into_iter().zip(recs) {
            if rec.gid() != gids[pos] {
                return Err(MeshGmgError::comm(dir, "directory reply out of order"));
            }
            owners[pos] = rec.rank();
        }
    }
    Ok(owners)
}
