use std::collections::HashMap;

use mesh_gmg::algs::communicator::{CommTag, Communicator, ExchangeTags, RayonComm, Wait};
use mesh_gmg::algs::exchange::{all_reduce_sum, sparse_all_to_all};
use mesh_gmg::algs::wire::WireGid;

mod util;
use util::run_ranks;

#[test]
fn rayon_fifo_order() {
    let tag = CommTag::new(0x1001);
    let w = RayonComm::world(2);

    for i in 0..10u8 {
        w[0].isend(1, tag.as_u16(), &[i]);
    }
    let mut out = Vec::new();
    for _ in 0..10 {
        let mut b = [0u8; 1];
        let h = w[1].irecv(0, tag.as_u16(), &mut b);
        out.push(h.wait().unwrap()[0]);
    }
    assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
}

#[test]
fn truncation_is_ok() {
    let tag = CommTag::new(0x1002);
    let w = RayonComm::world(2);

    w[0].isend(1, tag.as_u16(), &[1, 2, 3, 4, 5, 6]);
    let mut b = [0u8; 4];
    let got = w[1].irecv(0, tag.as_u16(), &mut b).wait().unwrap();
    assert_eq!(got, vec![1, 2, 3, 4]);
}

#[test]
fn sparse_all_to_all_ring() {
    let tags = ExchangeTags::from_base(CommTag::new(0x2000));
    let got = run_ranks(3, |comm| {
        let me = comm.rank();
        let next = (me + 1) % comm.size();
        let mut sends = HashMap::new();
        sends.insert(next, vec![WireGid::of(me as u64 * 10), WireGid::of(me as u64 * 10 + 1)]);
        let recv = sparse_all_to_all(sends, &comm, tags).unwrap();
        let mut keys: Vec<_> = recv.keys().copied().collect();
        keys.sort_unstable();
        let prev = (me + comm.size() - 1) % comm.size();
        let vals: Vec<u64> = recv[&prev].iter().map(WireGid::get).collect();
        (keys, prev, vals)
    });
    for (keys, prev, vals) in got {
        assert_eq!(keys, vec![prev]);
        assert_eq!(vals, vec![prev as u64 * 10, prev as u64 * 10 + 1]);
    }
}

#[test]
fn all_reduce_agrees_on_every_rank() {
    let sums = run_ranks(4, |comm| all_reduce_sum(comm.rank() as u64 + 1, &comm, CommTag::new(0x2100)).unwrap());
    assert_eq!(sums, vec![10; 4]);
}
