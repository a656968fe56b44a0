// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! Request/response over UDP, encoded with bincode.
//!
//! Every call uses a fresh ephemeral socket and waits for a single datagram
//! in reply, so a lost request, a lost reply and a dead peer all look the
//! same to the caller: the read times out.

use std::io;
use std::marker::PhantomData;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use bincode::{deserialize, serialize};
use rand::thread_rng;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, trace, warn};

use crate::config::{Config, NetworkConfig};
use crate::error::{Error, Result};
use crate::network::{Handler, Transport};

const MAX_MSG_SIZE: usize = 64 * 1024;

/// How often a serving thread checks whether its handler is still alive.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A network node that uses UDP and bincode for sending messages.
#[derive(Debug)]
pub struct UdpNetworkNode<Req, Resp> {
    me: Option<usize>,
    peers: Vec<SocketAddr>,
    timeout: Duration,
    faults: NetworkConfig,
    unreliable: Arc<AtomicBool>,
    _marker: PhantomData<fn(Req) -> Resp>,
}

/// Binds `count` sockets on random localhost ports.
pub fn bind_local(count: usize) -> io::Result<Vec<UdpSocket>> {
    (0..count)
        .map(|_| UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)))
        .collect()
}

impl<Req, Resp> UdpNetworkNode<Req, Resp>
where
    Req: Serialize + DeserializeOwned + Send + 'static,
    Resp: Serialize + DeserializeOwned + Send + 'static,
{
    /// Creates the node of peer `me` (`None` for a client) in a group whose
    /// endpoints listen on `peers`.
    pub fn new(me: Option<usize>, peers: Vec<SocketAddr>, config: &Config) -> Self {
        Self {
            me,
            peers,
            timeout: config.rpc_timeout,
            faults: NetworkConfig::default(),
            unreliable: Arc::new(AtomicBool::new(false)),
            _marker: PhantomData,
        }
    }

    pub fn with_faults(mut self, faults: NetworkConfig) -> Self {
        self.faults = faults;
        self
    }

    pub fn id(&self) -> Option<usize> {
        self.me
    }

    /// Answers requests arriving on `socket` with `handler` until the handler
    /// is dropped. Each request is handled on its own thread.
    pub fn serve<H>(&self, socket: UdpSocket, handler: &Arc<H>) -> Result<thread::JoinHandle<()>>
    where
        H: Handler<Req, Resp> + 'static,
    {
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let socket = Arc::new(socket);
        let handler: Weak<H> = Arc::downgrade(handler);
        let unreliable = Arc::clone(&self.unreliable);
        let faults = self.faults;

        let handle = thread::spawn(move || {
            let mut buf = vec![0; MAX_MSG_SIZE];
            loop {
                let (n, from) = match socket.recv_from(&mut buf) {
                    Ok(received) => received,
                    Err(e)
                        if e.kind() == io::ErrorKind::WouldBlock
                            || e.kind() == io::ErrorKind::TimedOut =>
                    {
                        if handler.upgrade().is_none() {
                            break;
                        }
                        continue;
                    }
                    Err(e) => {
                        error!("Receiving failed: {:?}", e);
                        break;
                    }
                };
                let handler = match handler.upgrade() {
                    Some(handler) => handler,
                    None => break,
                };
                let req: Req = match deserialize(&buf[..n]) {
                    Ok(req) => req,
                    Err(e) => {
                        warn!("Dropping undecodable request from {}: {:?}", from, e);
                        continue;
                    }
                };
                let socket = Arc::clone(&socket);
                let unreliable = unreliable.load(Ordering::SeqCst);
                thread::spawn(move || {
                    let mut rng = thread_rng();
                    if unreliable {
                        thread::sleep(faults.delay(&mut rng));
                    }
                    if unreliable && faults.drops_request(&mut rng) {
                        trace!("Dropped request from {}", from);
                        return;
                    }
                    let resp = match handler.handle(req) {
                        Some(resp) => resp,
                        None => return,
                    };
                    if unreliable && faults.drops_reply(&mut rng) {
                        trace!("Dropped reply to {}", from);
                        return;
                    }
                    if let Err(e) = reply(&socket, from, &resp) {
                        warn!("Replying to {} failed: {}", from, e);
                    }
                });
            }
            trace!("Stopped serving on {:?}", socket.local_addr());
        });
        Ok(handle)
    }

    fn exchange(&self, addr: SocketAddr, req: &Req) -> Result<Resp> {
        let serialized = serialize(req)?;
        if serialized.len() > MAX_MSG_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "message exceeds datagram size").into());
        }
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_read_timeout(Some(self.timeout))?;
        socket.send_to(&serialized, addr)?;

        let mut buf = vec![0; MAX_MSG_SIZE];
        let (n, _) = socket.recv_from(&mut buf)?;
        Ok(deserialize(&buf[..n])?)
    }
}

fn reply<Resp: Serialize>(socket: &UdpSocket, to: SocketAddr, resp: &Resp) -> Result<()> {
    let serialized = serialize(resp)?;
    if serialized.len() > MAX_MSG_SIZE {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            "reply exceeds datagram size",
        )));
    }
    socket.send_to(&serialized, to)?;
    Ok(())
}

impl<Req, Resp> Transport<Req, Resp> for UdpNetworkNode<Req, Resp>
where
    Req: Serialize + DeserializeOwned + Send + 'static,
    Resp: Serialize + DeserializeOwned + Send + 'static,
{
    fn call(&self, dst: usize, req: &Req) -> Option<Resp> {
        let addr = *self.peers.get(dst)?;
        match self.exchange(addr, req) {
            Ok(resp) => Some(resp),
            Err(e) => {
                trace!("Call to {} ({}) failed: {}", dst, addr, e);
                None
            }
        }
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn set_unreliable(&self, unreliable: bool) {
        self.unreliable.store(unreliable, Ordering::SeqCst);
    }
}
