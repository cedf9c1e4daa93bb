// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Two worker-pinned threads bouncing a counter through futures.
//!
//! ```text
//! cargo run --release --example pingpong -- <iterations>
//! ```

use parallax::{Action, Addr, Attributes, Config, Runtime, Status, lco, thread};
use std::sync::OnceLock;
use std::time::Instant;

struct Channels {
    ping: Vec<Addr>,
    pong: Vec<Addr>,
    done: Addr,
}

static CHANNELS: OnceLock<Channels> = OnceLock::new();
static ACTIONS: OnceLock<(Action, Action)> = OnceLock::new();

fn ping(_args: &mut [u8]) -> Status {
    thread::set_affinity(0).unwrap();
    let ch = CHANNELS.get().unwrap();
    for (i, (&out, &back)) in ch.ping.iter().zip(&ch.pong).enumerate() {
        lco::set(out, &(i as u64).to_le_bytes());
        lco::get(back, 8).unwrap();
    }
    lco::set(ch.done, &[]);
    Status::Success
}

fn pong(_args: &mut [u8]) -> Status {
    thread::set_affinity(1).unwrap();
    let ch = CHANNELS.get().unwrap();
    for (&incoming, &back) in ch.ping.iter().zip(&ch.pong) {
        let value = lco::get(incoming, 8).unwrap();
        lco::set(back, &value);
    }
    lco::set(ch.done, &[]);
    Status::Success
}

fn pingpong_main(_args: &mut [u8]) -> Status {
    let (ping_act, pong_act) = *ACTIONS.get().unwrap();
    parallax::call(Addr::NULL, ping_act, &[], Addr::NULL);
    parallax::call(Addr::NULL, pong_act, &[], Addr::NULL);
    lco::wait(CHANNELS.get().unwrap().done).unwrap();
    thread::exit(0, &[])
}

fn main() {
    let iters: usize = std::env::args()
        .nth(1)
        .and_then(|a| a.parse().ok())
        .unwrap_or(1000);
    println!("running with options: {{iter limit: {iters}}}");

    CHANNELS
        .set(Channels {
            ping: (0..iters).map(|_| lco::new_future(8)).collect(),
            pong: (0..iters).map(|_| lco::new_future(8)).collect(),
            done: lco::new_and(2),
        })
        .unwrap_or_else(|_| unreachable!());

    let mut rt = Runtime::new(Config {
        threads: 2,
        ..Config::default()
    })
    .expect("runtime");
    let ping_act = rt.register("ping", Attributes::MARSHALLED, ping).unwrap();
    let pong_act = rt.register("pong", Attributes::MARSHALLED, pong).unwrap();
    ACTIONS.set((ping_act, pong_act)).unwrap();
    let main_act = rt
        .register("pingpong_main", Attributes::MARSHALLED, pingpong_main)
        .unwrap();

    let clock = Instant::now();
    rt.run(main_act, &[]).expect("epoch");
    let elapsed = clock.elapsed();

    let oneway = elapsed.as_nanos() as f64 / (2 * iters) as f64;
    println!("average oneway latency:   {:.3} us", oneway / 1000.0);
    println!("mail delivered:           {}", rt.stats().mail);
}
