//! Distributed multivectors: `num_vectors` real columns over one map.
//!
//! Storage is column-major with one contiguous slice per column, so a
//! coordinate set with one column per spatial dimension reads as
//! `coords.column(dim)[node]`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::exchange_payloads;
use crate::algs::wire::{WireScalar, cast_slice, decode_records};
use crate::data::dist_map::DistMap;
use crate::data::import::{CombineMode, Importer};
use crate::mesh_error::MeshGmgError;

const IMPORT_TAG: CommTag = CommTag::new(0x4d30);
const EXPORT_TAG: CommTag = CommTag::new(0x4d31);

/// Dense block of column vectors distributed by a [`DistMap`].
#[derive(Clone, Debug)]
pub struct MultiVector {
    map: Arc<DistMap>,
    num_vectors: usize,
    data: Vec<f64>,
}

impl MultiVector {
    /// Zero-initialised multivector.
    pub fn new(map: Arc<DistMap>, num_vectors: usize) -> Self {
        let data = vec![0.0; map.local_len() * num_vectors];
        Self {
            map,
            num_vectors,
            data,
        }
    }

    /// Build from per-column local data; every column must match the map.
    pub fn from_columns(map: Arc<DistMap>, columns: Vec<Vec<f64>>) -> Result<Self, MeshGmgError> {
        let len = map.local_len();
        let num_vectors = columns.len();
        let mut data = Vec::with_capacity(len * num_vectors);
        for col in columns {
            if col.len() != len {
                return Err(MeshGmgError::LengthMismatch {
                    context: "MultiVector column",
                    expected: len,
                    found: col.len(),
                });
            }
            data.extend_from_slice(&col);
        }
        Ok(Self {
            map,
            num_vectors,
            data,
        })
    }

    #[inline]
    pub fn map(&self) -> &Arc<DistMap> {
        &self.map
    }

    #[inline]
    pub fn num_vectors(&self) -> usize {
        self.num_vectors
    }

    #[inline]
    pub fn local_len(&self) -> usize {
        self.map.local_len()
    }

    /// Read-only view of column `k`.
    #[inline]
    pub fn column(&self, k: usize) -> &[f64] {
        let len = self.local_len();
        &self.data[k * len..(k + 1) * len]
    }

    /// Mutable view of column `k`.
    #[inline]
    pub fn column_mut(&mut self, k: usize) -> &mut [f64] {
        let len = self.local_len();
        &mut self.data[k * len..(k + 1) * len]
    }

    #[inline]
    pub fn get(&self, lid: usize, k: usize) -> f64 {
        self.data[k * self.local_len() + lid]
    }

    pub fn put_scalar(&mut self, value: f64) {
        self.data.fill(value);
    }

    /// Swap in a different map with the same local length.
    ///
    /// Values are kept in local order; only their global labels change.
    pub fn replace_map(&mut self, map: Arc<DistMap>) -> Result<(), MeshGmgError> {
        if map.local_len() != self.local_len() {
            return Err(MeshGmgError::LengthMismatch {
                context: "MultiVector::replace_map",
                expected: self.local_len(),
                found: map.local_len(),
            });
        }
        self.map = map;
        Ok(())
    }

    /// Fill `self` (on the importer's target map) from `source` (on its source map).
    pub fn do_import<C: Communicator>(
        &mut self,
        source: &MultiVector,
        importer: &Importer,
        mode: CombineMode,
        comm: &C,
    ) -> Result<(), MeshGmgError> {
        check_map(source, importer.source_map(), "import source")?;
        check_map(self, importer.target_map(), "import target")?;
        self.check_vectors(source)?;

        for &(src, tgt) in importer.permutes() {
            for k in 0..self.num_vectors {
                let v = source.get(src, k);
                mode.combine(self.at_mut(tgt, k), v);
            }
        }

        let sends = pack(source, importer.exports());
        let recv_lens = byte_lens(importer.remotes(), self.num_vectors);
        let received = exchange_payloads(sends, &recv_lens, comm, IMPORT_TAG)?;
        self.unpack(received, importer.remotes(), mode)
    }

    /// Reverse of [`do_import`](Self::do_import): push `source` (on the
    /// importer's target map) back into `self` (on its source map).
    pub fn do_export<C: Communicator>(
        &mut self,
        source: &MultiVector,
        importer: &Importer,
        mode: CombineMode,
        comm: &C,
    ) -> Result<(), MeshGmgError> {
        check_map(source, importer.target_map(), "export source")?;
        check_map(self, importer.source_map(), "export target")?;
        self.check_vectors(source)?;

        for &(src, tgt) in importer.permutes() {
            for k in 0..self.num_vectors {
                let v = source.get(tgt, k);
                mode.combine(self.at_mut(src, k), v);
            }
        }

        let sends = pack(source, importer.remotes());
        let recv_lens = byte_lens(importer.exports(), self.num_vectors);
        let received = exchange_payloads(sends, &recv_lens, comm, EXPORT_TAG)?;
        self.unpack(received, importer.exports(), mode)
    }

    #[inline]
    fn at_mut(&mut self, lid: usize, k: usize) -> &mut f64 {
        let len = self.local_len();
        &mut self.data[k * len + lid]
    }

    fn check_vectors(&self, other: &MultiVector) -> Result<(), MeshGmgError> {
        if self.num_vectors != other.num_vectors {
            return Err(MeshGmgError::LengthMismatch {
                context: "MultiVector num_vectors",
                expected: self.num_vectors,
                found: other.num_vectors,
            });
        }
        Ok(())
    }

    fn unpack(
        &mut self,
        received: HashMap<usize, Vec<u8>>,
        lids_by_rank: &BTreeMap<usize, Vec<usize>>,
        mode: CombineMode,
    ) -> Result<(), MeshGmgError> {
        let nv = self.num_vectors;
        for (&rank, lids) in lids_by_rank {
            if lids.is_empty() || nv == 0 {
                continue;
            }
            let bytes = received
                .get(&rank)
                .ok_or_else(|| MeshGmgError::comm(rank, "missing vector payload"))?;
            let values = decode_records::<WireScalar>(bytes).map_err(|e| MeshGmgError::comm(rank, e))?;
            if values.len() != lids.len() * nv {
                return Err(MeshGmgError::comm(
                    rank,
                    format!("expected {} values, got {}", lids.len() * nv, values.len()),
                ));
            }
            for (i, &lid) in lids.iter().enumerate() {
                for k in 0..nv {
                    mode.combine(self.at_mut(lid, k), values[i * nv + k].get());
                }
            }
        }
        Ok(())
    }
}

fn check_map(mv: &MultiVector, map: &Arc<DistMap>, context: &'static str) -> Result<(), MeshGmgError> {
    if Arc::ptr_eq(mv.map(), map) || mv.map().is_same_as(map) {
        Ok(())
    } else {
        Err(MeshGmgError::LengthMismatch {
            context,
            expected: map.local_len(),
            found: mv.local_len(),
        })
    }
}

/// Point-major packing: all vectors of one lid are adjacent on the wire.
fn pack(
    source: &MultiVector,
    lids_by_rank: &BTreeMap<usize, Vec<usize>>,
) -> HashMap<usize, Vec<u8>> {
    let nv = source.num_vectors();
    lids_by_rank
        .iter()
        .map(|(&rank, lids)| {
            let mut scratch = Vec::with_capacity(lids.len() * nv);
            for &lid in lids {
                for k in 0..nv {
                    scratch.push(WireScalar::of(source.get(lid, k)));
                }
            }
            (rank, cast_slice(&scratch).to_vec())
        })
        .collect()
}

fn byte_lens(
    lids_by_rank: &BTreeMap<usize, Vec<usize>>,
    num_vectors: usize,
) -> HashMap<usize, usize> {
    lids_by_rank
        .iter()
        .map(|(&rank, lids)| (rank, lids.len() * num_vectors * std::mem::size_of::<WireScalar>()))
        .collect()
}
