// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

use std::thread;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use paxos::kvpaxos::LocalCluster;
use paxos::{start_replicas, Backoff, Config, Status};

fn agree_on_instances(c: &mut Criterion) {
    for &size in &[3, 5] {
        let (_net, peers) = start_replicas::<u64>(size, Config::default());
        let mut seq = 0;
        c.bench_function(&format!("agreement {} peers", size), |b| {
            b.iter(|| {
                peers[0].start(seq, black_box(seq));
                while peers[0].status(seq) == Status::Pending {
                    thread::sleep(Duration::from_micros(50));
                }
                peers[0].done(seq);
                seq += 1;
            })
        });
    }
}

fn kv_put_get(c: &mut Criterion) {
    let backoff = Backoff {
        initial: Duration::from_micros(100),
        ..Backoff::default()
    };
    let cluster = LocalCluster::start(3, Config::default(), backoff);
    let mut clerk = cluster.clerk();
    let mut i = 0;
    c.bench_function("kv put+get 3 servers", |b| {
        b.iter(|| {
            clerk.put("bench", i).ok();
            black_box(clerk.get("bench").ok());
            i += 1;
        })
    });
}

criterion_group!(benches, agree_on_instances, kv_put_get);
criterion_main!(benches);
