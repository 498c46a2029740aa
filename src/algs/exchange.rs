//! Collective exchange helpers built on [`Communicator`] point-to-point calls.
//!
//! Every helper follows the same discipline: post all receives, post all
//! sends, then wait on every receive *without* early return and drain every
//! send handle before reporting the first error. A rank therefore never leaves
//! a peer blocked on a message it decided not to read.
//!
//! Messages to self never touch the communicator.

use std::collections::{BTreeMap, HashMap};

use bytemuck::Pod;

use crate::algs::communicator::{CommTag, Communicator, ExchangeTags, Wait};
use crate::algs::wire::{WireCount, cast_slice, decode_records, expect_exact_len};
use crate::mesh_error::MeshGmgError;

/// Send one count to every other rank and receive one from each.
///
/// Returns the counts received, keyed by source rank, including `send_counts[me]`
/// for this rank. Zero counts are omitted.
pub fn exchange_counts<C>(
    send_counts: &HashMap<usize, usize>,
    comm: &C,
    tag: CommTag,
) -> Result<HashMap<usize, usize>, MeshGmgError>
where
    C: Communicator,
{
    let me = comm.rank();
    let peers: Vec<usize> = (0..comm.size()).filter(|&r| r != me).collect();

    // 1) post all receives
    let mut pending_recv = Vec::with_capacity(peers.len());
    for &nbr in &peers {
        let mut cnt = [0u8; std::mem::size_of::<WireCount>()];
        pending_recv.push((nbr, comm.irecv(nbr, tag.as_u16(), &mut cnt)));
    }

    // 2) post all sends
    let mut pending_send = Vec::with_capacity(peers.len());
    for &nbr in &peers {
        let count = WireCount::new(send_counts.get(&nbr).copied().unwrap_or(0));
        pending_send.push(comm.isend(nbr, tag.as_u16(), cast_slice(std::slice::from_ref(&count))));
    }

    // 3) wait for all receives, remembering only the first error
    let mut counts = HashMap::new();
    let mut maybe_err = None;
    for (nbr, h) in pending_recv {
        let data = h.wait();
        if maybe_err.is_some() {
            continue;
        }
        match data {
            Some(raw) => match expect_exact_len(raw.len(), std::mem::size_of::<WireCount>())
                .and_then(|_| decode_records::<WireCount>(&raw))
            {
                Ok(rec) => {
                    let n = rec[0].get();
                    if n > 0 {
                        counts.insert(nbr, n);
                    }
                }
                Err(e) => maybe_err = Some(MeshGmgError::comm(nbr, format!("size header: {e}"))),
            },
            None => {
                maybe_err = Some(MeshGmgError::comm(
                    nbr,
                    format!("failed to receive size from rank {nbr}"),
                ))
            }
        }
    }

    // 4) always drain all send handles
    for send in pending_send {
        let _ = send.wait();
    }

    if let Some(err) = maybe_err {
        return Err(err);
    }
    if let Some(&n) = send_counts.get(&me) {
        if n > 0 {
            counts.insert(me, n);
        }
    }
    Ok(counts)
}

/// Exchange byte payloads whose lengths are already known on both sides.
///
/// `recv_lens[r]` must equal the length rank `r` sends here; empty payloads
/// are neither sent nor received. The entry for this rank is moved across
/// locally.
pub fn exchange_payloads<C>(
    mut sends: HashMap<usize, Vec<u8>>,
    recv_lens: &HashMap<usize, usize>,
    comm: &C,
    tag: CommTag,
) -> Result<HashMap<usize, Vec<u8>>, MeshGmgError>
where
    C: Communicator,
{
    let me = comm.rank();
    let mut received = HashMap::new();
    if let Some(own) = sends.remove(&me) {
        received.insert(me, own);
    }

    // Deterministic posting order.
    let recv_order: BTreeMap<usize, usize> = recv_lens
        .iter()
        .filter(|&(&r, &len)| r != me && len > 0)
        .map(|(&r, &len)| (r, len))
        .collect();
    let send_order: BTreeMap<usize, Vec<u8>> =
        sends.into_iter().filter(|(_, buf)| !buf.is_empty()).collect();

    let mut pending_recv = Vec::with_capacity(recv_order.len());
    for (&nbr, &len) in &recv_order {
        let mut buffer = vec![0u8; len];
        pending_recv.push((nbr, len, comm.irecv(nbr, tag.as_u16(), &mut buffer)));
    }

    let mut pending_send = Vec::with_capacity(send_order.len());
    for (nbr, buf) in &send_order {
        pending_send.push(comm.isend(*nbr, tag.as_u16(), buf));
    }

    let mut maybe_err = None;
    for (nbr, len, h) in pending_recv {
        let data = h.wait();
        if maybe_err.is_some() {
            continue;
        }
        match data {
            Some(raw) if raw.len() == len => {
                received.insert(nbr, raw);
            }
            Some(raw) => {
                maybe_err = Some(MeshGmgError::comm(
                    nbr,
                    format!("expected {len} payload bytes, got {}", raw.len()),
                ))
            }
            None => {
                maybe_err = Some(MeshGmgError::comm(
                    nbr,
                    format!("failed to receive payload from rank {nbr}"),
                ))
            }
        }
    }

    for send in pending_send {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(received),
    }
}

/// Two-stage personalised all-to-all of `Pod` records: counts, then payload.
pub fn sparse_all_to_all<T, C>(
    sends: HashMap<usize, Vec<T>>,
    comm: &C,
    tags: ExchangeTags,
) -> Result<HashMap<usize, Vec<T>>, MeshGmgError>
where
    T: Pod,
    C: Communicator,
{
    let width = std::mem::size_of::<T>();
    let send_counts: HashMap<usize, usize> = sends.iter().map(|(&r, v)| (r, v.len())).collect();
    let recv_counts = exchange_counts(&send_counts, comm, tags.sizes)?;
    let recv_lens: HashMap<usize, usize> =
        recv_counts.iter().map(|(&r, &n)| (r, n * width)).collect();

    let byte_sends: HashMap<usize, Vec<u8>> = sends
        .into_iter()
        .map(|(r, v)| (r, cast_slice(&v).to_vec()))
        .collect();
    let raw = exchange_payloads(byte_sends, &recv_lens, comm, tags.data)?;

    let mut out = HashMap::with_capacity(raw.len());
    for (nbr, bytes) in raw {
        let records = decode_records::<T>(&bytes).map_err(|e| MeshGmgError::comm(nbr, e))?;
        out.insert(nbr, records);
    }
    Ok(out)
}

/// Global sum of one `u64` per rank. Every rank receives the same result.
pub fn all_reduce_sum<C>(value: u64, comm: &C, tag: CommTag) -> Result<u64, MeshGmgError>
where
    C: Communicator,
{
    if comm.is_serial() {
        return Ok(value);
    }
    let me = comm.rank();
    let sends: HashMap<usize, Vec<u8>> = (0..comm.size())
        .filter(|&r| r != me)
        .map(|r| (r, value.to_le_bytes().to_vec()))
        .collect();
    let recv_lens: HashMap<usize, usize> = (0..comm.size())
        .filter(|&r| r != me)
        .map(|r| (r, std::mem::size_of::<u64>()))
        .collect();
    let received = exchange_payloads(sends, &recv_lens, comm, tag)?;

    // Sum in rank order so every rank sees the same total.
    let mut total = 0u64;
    for r in 0..comm.size() {
        if r == me {
            total += value;
            continue;
        }
        let bytes = received
            .get(&r)
            .ok_or_else(|| MeshGmgError::comm(r, "missing all-reduce contribution"))?;
        let mut le = [0u8; 8];
        le.copy_from_slice(bytes);
        total += u64::from_le_bytes(le);
    }
    Ok(total)
}

/// Make a local outcome global. Collective over `comm`.
///
/// Every rank learns how many ranks failed; a rank that succeeded locally
/// returns [`MeshGmgError::RemoteFailure`] when any other rank failed.
pub fn agree<T, C>(
    local: Result<T, MeshGmgError>,
    stage: &'static str,
    comm: &C,
    tag: CommTag,
) -> Result<T, MeshGmgError>
where
    C: Communicator,
{
    let failed = all_reduce_sum(u64::from(local.is_err()), comm, tag)?;
    match local {
        Err(e) => Err(e),
        Ok(_) if failed > 0 => Err(MeshGmgError::RemoteFailure {
            stage,
            failed_ranks: failed,
        }),
        Ok(v) => Ok(v),
    }
}
