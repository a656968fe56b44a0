// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Boots a group of key-value servers and runs a few client operations
//! against it.

use std::sync::Arc;
use std::time::Duration;

use clap::{value_t, App, Arg};
use tracing::{info, warn, Level};

use paxos::kvpaxos::{Clerk, KvServer, LocalCluster, Op, OpRequest, OpResponse};
use paxos::udp_network::bind_local;
use paxos::{Backoff, Config, Paxos, Transport, UdpNetworkNode};

type UdpPaxosNode = UdpNetworkNode<paxos::PaxosMsg<Op>, paxos::PaxosReply<Op>>;

/// Puts `ops` keys, reads them back and reports mismatches.
fn run_workload<T: Transport<OpRequest, OpResponse>>(clerk: &mut Clerk<T>, ops: usize) -> paxos::Result<usize> {
    let mut mismatches = 0;
    for i in 0..ops {
        let key = format!("key-{}", i);
        clerk.put(&key, i as i64)?;
        let value = clerk.get(&key)?;
        if value == Some(i as i64) {
            info!("Get({}) -> {:?}", key, value);
        } else {
            warn!("Get({}) -> {:?}, expected {}", key, value, i);
            mismatches += 1;
        }
    }
    Ok(mismatches)
}

fn start_udp_cluster(
    size: usize,
    config: Config,
    backoff: Backoff,
    unreliable: bool,
) -> paxos::Result<(Vec<Arc<KvServer<UdpPaxosNode>>>, Clerk<UdpNetworkNode<OpRequest, OpResponse>>)> {
    let paxos_sockets = bind_local(size)?;
    let kv_sockets = bind_local(size)?;
    let paxos_addrs = paxos_sockets.iter().map(|s| s.local_addr()).collect::<Result<Vec<_>, _>>()?;
    let kv_addrs = kv_sockets.iter().map(|s| s.local_addr()).collect::<Result<Vec<_>, _>>()?;

    let mut servers = Vec::new();
    for (me, (paxos_socket, kv_socket)) in paxos_sockets.into_iter().zip(kv_sockets).enumerate() {
        let px: Arc<Paxos<Op, UdpPaxosNode>> = Paxos::new(me, UdpNetworkNode::new(Some(me), paxos_addrs.clone(), &config), config);
        px.transport().serve(paxos_socket, &px)?;
        if unreliable {
            px.set_unreliable();
        }
        let server = KvServer::new(px, backoff);
        UdpNetworkNode::<OpRequest, OpResponse>::new(Some(me), kv_addrs.clone(), &config).serve(kv_socket, &server)?;
        servers.push(server);
    }

    // a commit may take the whole backoff schedule
    let client_config = Config {
        rpc_timeout: backoff.intervals().sum::<Duration>() + config.rpc_timeout,
        ..config
    };
    let clerk = Clerk::new(UdpNetworkNode::new(None, kv_addrs, &client_config));
    Ok((servers, clerk))
}

fn main() -> paxos::Result<()> {
    use tracing_subscriber::{fmt::time::ChronoLocal, FmtSubscriber};

    let matches = App::new("kvpaxos")
        .about("Replicated key-value store on multi-instance Paxos")
        .arg(
            Arg::with_name("servers")
                .short("n")
                .long("servers")
                .takes_value(true)
                .default_value("5")
                .help("Number of servers in the group"),
        )
        .arg(
            Arg::with_name("ops")
                .long("ops")
                .takes_value(true)
                .default_value("10")
                .help("Number of put/get pairs to run"),
        )
        .arg(
            Arg::with_name("transport")
                .long("transport")
                .takes_value(true)
                .possible_values(&["udp", "local"])
                .default_value("udp")
                .help("How the servers talk to each other"),
        )
        .arg(
            Arg::with_name("rpc-timeout")
                .long("rpc-timeout")
                .takes_value(true)
                .default_value("500")
                .help("Milliseconds a peer waits for a response"),
        )
        .arg(
            Arg::with_name("unreliable")
                .long("unreliable")
                .help("Randomly drop and delay messages between peers"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("Increase log verbosity"),
        )
        .get_matches();

    let size = value_t!(matches, "servers", usize).unwrap_or_else(|e| e.exit());
    let ops = value_t!(matches, "ops", usize).unwrap_or_else(|e| e.exit());
    let rpc_timeout = value_t!(matches, "rpc-timeout", u64).unwrap_or_else(|e| e.exit());
    let unreliable = matches.is_present("unreliable");
    let level = match matches.occurrences_of("verbose") {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // initialize the tracer
    FmtSubscriber::builder()
        .with_timer(ChronoLocal::with_format("[%Mm %Ss]".to_string()))
        .with_max_level(level)
        .init();

    let config = Config {
        rpc_timeout: Duration::from_millis(rpc_timeout),
        ..Config::default()
    };
    let backoff = Backoff::default();

    let mismatches = match matches.value_of("transport") {
        Some("local") => {
            let cluster = LocalCluster::start(size, config, backoff);
            if unreliable {
                cluster.servers.iter().for_each(|s| s.paxos().set_unreliable());
            }
            let mut clerk = cluster.clerk();
            let mismatches = run_workload(&mut clerk, ops)?;
            for server in &cluster.servers {
                info!("Server {} applied {} operations", server.me(), server.applied_log().len());
            }
            mismatches
        }
        _ => {
            let (servers, mut clerk) = start_udp_cluster(size, config, backoff, unreliable)?;
            let mismatches = run_workload(&mut clerk, ops)?;
            for server in &servers {
                info!("Server {} applied {} operations", server.me(), server.applied_log().len());
            }
            mismatches
        }
    };

    info!("Finished {} operations with {} mismatches", 2 * ops, mismatches);
    Ok(())
}
