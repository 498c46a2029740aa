//! Fixed, little-endian wire types for the exchange paths.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

/// Decode a byte buffer into owned records.
///
/// The receive buffers handed back by a communicator carry no alignment
/// guarantee, so records are copied out instead of reinterpreted in place.
pub fn decode_records<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, String> {
    let width = size_of::<T>();
    if bytes.len() % width != 0 {
        return Err(format!(
            "buffer of {} bytes is not a whole number of {width}-byte records",
            bytes.len()
        ));
    }
    Ok(bytes
        .chunks_exact(width)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// Number of records following in a payload message.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u64,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// A global id carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireGid {
    pub gid_le: u64,
}

impl WireGid {
    pub fn of(gid: u64) -> Self {
        Self { gid_le: gid.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
}

/// Directory record: a global id and the rank owning it.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireOwner {
    pub gid_le: u64,
    pub rank_le: u64,
}

/// Sentinel rank for gids unknown to the directory.
pub const NO_OWNER: u64 = u64::MAX;

impl WireOwner {
    pub fn new(gid: u64, rank: Option<usize>) -> Self {
        let rank = rank.map_or(NO_OWNER, |r| r as u64);
        Self {
            gid_le: gid.to_le(),
            rank_le: rank.to_le(),
        }
    }
    pub fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
    pub fn rank(&self) -> Option<usize> {
        match u64::from_le(self.rank_le) {
            NO_OWNER => None,
            r => Some(r as usize),
        }
    }
}

/// A scalar value (`f64` bit pattern, little-endian).
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireScalar {
    pub bits_le: u64,
}

impl WireScalar {
    pub fn of(v: f64) -> Self {
        Self {
            bits_le: v.to_bits().to_le(),
        }
    }
    pub fn get(&self) -> f64 {
        f64::from_bits(u64::from_le(self.bits_le))
    }
}

const_assert_eq!(size_of::<WireCount>(), 8);
const_assert_eq!(size_of::<WireGid>(), 8);
const_assert_eq!(size_of::<WireOwner>(), 16);
const_assert_eq!(size_of::<WireScalar>(), 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_sentinel_roundtrips_to_none() {
        let rec = WireOwner::new(17, None);
        assert_eq!(rec.gid(), 17);
        assert_eq!(rec.rank(), None);
        assert_eq!(WireOwner::new(17, Some(4)).rank(), Some(4));
    }

    #[test]
    fn decode_rejects_partial_records() {
        let bytes = [0u8; 12];
        assert!(decode_records::<WireGid>(&bytes).is_err());
        let ok = decode_records::<WireGid>(&bytes[..8]).unwrap();
        assert_eq!(ok.len(), 1);
    }

    #[test]
    fn scalar_bits_survive_unaligned_decode() {
        let vals = [WireScalar::of(-0.25), WireScalar::of(3.5)];
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(cast_slice(&vals));
        let decoded = decode_records::<WireScalar>(&bytes[1..]).unwrap();
        assert_eq!(decoded[0].get(), -0.25);
        assert_eq!(decoded[1].get(), 3.5);
    }
}
