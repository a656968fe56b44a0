// Copyright (C) 2020 Quentin M. Kniep <hello@quentinkniep.com>
// Distributed under terms of the MIT license.

//! In-process network connecting endpoints through direct function calls.
//!
//! Links can be severed one direction at a time and endpoints can be made
//! unreliable, which drops requests and replies at random and delays every
//! exchange. Handlers are held weakly so a network never keeps its peers
//! alive.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::RwLock;
use rand::thread_rng;
use tracing::trace;

use crate::config::NetworkConfig;
use crate::network::{Handler, Transport};

struct Hub<Req, Resp> {
    endpoints: RwLock<Vec<Option<Weak<dyn Handler<Req, Resp>>>>>,
    severed: RwLock<HashSet<(usize, usize)>>,
    unreliable: Vec<AtomicBool>,
    config: NetworkConfig,
}

/// Shared handle on an in-process network of `size` endpoints.
pub struct LocalNetwork<Req, Resp> {
    hub: Arc<Hub<Req, Resp>>,
}

impl<Req, Resp> Clone for LocalNetwork<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
        }
    }
}

/// Transport of one endpoint. Clients have no identity of their own and are
/// never affected by severed links.
pub struct LocalEndpoint<Req, Resp> {
    hub: Arc<Hub<Req, Resp>>,
    me: Option<usize>,
}

impl<Req, Resp> LocalNetwork<Req, Resp>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    pub fn new(size: usize) -> Self {
        Self::with_config(size, NetworkConfig::default())
    }

    pub fn with_config(size: usize, config: NetworkConfig) -> Self {
        Self {
            hub: Arc::new(Hub {
                endpoints: RwLock::new(vec![None; size]),
                severed: RwLock::new(HashSet::new()),
                unreliable: (0..size).map(|_| AtomicBool::new(false)).collect(),
                config,
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.hub.unreliable.len()
    }

    /// Makes `handler` reachable as endpoint `id`.
    pub fn register<H: Handler<Req, Resp> + 'static>(&self, id: usize, handler: &Arc<H>) {
        let weak: Weak<dyn Handler<Req, Resp>> = Arc::<H>::downgrade(handler);
        if let Some(slot) = self.hub.endpoints.write().get_mut(id) {
            *slot = Some(weak);
        }
    }

    /// The transport endpoint `id` uses to reach the others.
    pub fn endpoint(&self, id: usize) -> LocalEndpoint<Req, Resp> {
        LocalEndpoint {
            hub: Arc::clone(&self.hub),
            me: Some(id),
        }
    }

    /// A transport for a client outside the group.
    pub fn client(&self) -> LocalEndpoint<Req, Resp> {
        LocalEndpoint {
            hub: Arc::clone(&self.hub),
            me: None,
        }
    }

    /// Drops every request `from` sends to `to`.
    pub fn sever(&self, from: usize, to: usize) {
        self.hub.severed.write().insert((from, to));
    }

    pub fn heal(&self, from: usize, to: usize) {
        self.hub.severed.write().remove(&(from, to));
    }

    pub fn heal_all(&self) {
        self.hub.severed.write().clear();
    }

    pub fn set_unreliable(&self, id: usize, unreliable: bool) {
        if let Some(flag) = self.hub.unreliable.get(id) {
            flag.store(unreliable, Ordering::SeqCst);
        }
    }
}

impl<Req: Clone, Resp> Hub<Req, Resp> {
    fn call(&self, from: Option<usize>, dst: usize, req: &Req) -> Option<Resp> {
        if let Some(from) = from {
            if self.severed.read().contains(&(from, dst)) {
                trace!("Link {}->{} is severed", from, dst);
                return None;
            }
        }
        let handler = {
            let endpoints = self.endpoints.read();
            endpoints.get(dst)?.as_ref()?.upgrade()?
        };

        let unreliable = self.unreliable[dst].load(Ordering::SeqCst);
        if !unreliable {
            return handler.handle(req.clone());
        }

        let mut rng = thread_rng();
        thread::sleep(self.config.delay(&mut rng));
        if self.config.drops_request(&mut rng) {
            trace!("Dropped request to {}", dst);
            return None;
        }
        let resp = handler.handle(req.clone());
        if self.config.drops_reply(&mut rng) {
            trace!("Dropped reply from {}", dst);
            return None;
        }
        resp
    }
}

impl<Req, Resp> Transport<Req, Resp> for LocalEndpoint<Req, Resp>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    fn call(&self, dst: usize, req: &Req) -> Option<Resp> {
        self.hub.call(self.me, dst, req)
    }

    fn size(&self) -> usize {
        self.hub.unreliable.len()
    }

    fn set_unreliable(&self, unreliable: bool) {
        if let Some(flag) = self.me.and_then(|me| self.hub.unreliable.get(me)) {
            flag.store(unreliable, Ordering::SeqCst);
        }
    }
}
