// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Chaotic single-source shortest paths over relaxation parcels. There is no
//! global coordination: each improvement spawns relaxations of the
//! neighbors, and quiescence is detected by credit recovery through a
//! process, whose termination future releases the driver thread.

use parallax::{Action, Addr, Attributes, Config, Runtime, Status, lco, process, thread};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// `0→1(1), 1→2(2), 2→3(3), 0→3(10)`
const EDGES: [&[(usize, u64)]; 4] = [&[(1, 1), (3, 10)], &[(2, 2)], &[(3, 3)], &[]];

static DIST: [AtomicU64; 4] = [
    AtomicU64::new(u64::MAX),
    AtomicU64::new(u64::MAX),
    AtomicU64::new(u64::MAX),
    AtomicU64::new(u64::MAX),
];
static RELAX: OnceLock<Action> = OnceLock::new();

fn encode(vertex: u64, dist: u64) -> [u8; 16] {
    let mut buf = [0; 16];
    buf[..8].copy_from_slice(&vertex.to_le_bytes());
    buf[8..].copy_from_slice(&dist.to_le_bytes());
    buf
}

fn relax(args: &mut [u8]) -> Status {
    let vertex = u64::from_le_bytes(args[..8].try_into().unwrap()) as usize;
    let dist = u64::from_le_bytes(args[8..16].try_into().unwrap());

    if DIST[vertex].fetch_min(dist, Ordering::SeqCst) <= dist {
        return Status::Success;
    }
    let act = *RELAX.get().unwrap();
    for &(next, weight) in EDGES[vertex] {
        // children inherit our pid and borrow fresh credit
        parallax::call(Addr::NULL, act, &encode(next as u64, dist + weight), Addr::NULL);
    }
    Status::Success
}

fn sssp_main(_args: &mut [u8]) -> Status {
    let term = lco::new_future(0);
    let pid = process::new(term);

    parallax::call_in(pid, Addr::NULL, *RELAX.get().unwrap(), &encode(0, 0), Addr::NULL);
    lco::wait(term).unwrap();
    lco::delete(term);

    let mut out = [0u8; 32];
    for (i, d) in DIST.iter().enumerate() {
        out[i * 8..][..8].copy_from_slice(&d.load(Ordering::SeqCst).to_le_bytes());
    }
    thread::exit(0, &out)
}

#[test]
fn four_vertex_single_source() {
    let mut rt = Runtime::new(Config {
        threads: 2,
        ..Config::default()
    })
    .unwrap();
    RELAX
        .set(rt.register("relax", Attributes::MARSHALLED, relax).unwrap())
        .unwrap();
    let main_act = rt
        .register("sssp_main", Attributes::MARSHALLED, sssp_main)
        .unwrap();

    let (code, out) = rt.run_with_output(main_act, &[], 32).unwrap();
    assert_eq!(code, 0);

    let dist: Vec<u64> = out
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect();
    assert_eq!(dist, [0, 1, 3, 6]);
    assert_eq!(dist.iter().sum::<u64>(), 10);
}
