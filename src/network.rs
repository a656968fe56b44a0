//! Contains code for abstracting multiple possible network implementations.
//!
//! A transport is a synchronous request/response primitive. Any failure
//! (timeout, unreachable or dead peer, lost or garbled message) surfaces as a
//! missing response, never as an error.

/// Serves requests arriving from the network.
pub trait Handler<Req, Resp>: Send + Sync {
    /// Processes one request. `None` means the request is ignored, as a dead
    /// peer would.
    fn handle(&self, req: Req) -> Option<Resp>;
}

/// Client side of a transport, bound to the identity of its owner.
pub trait Transport<Req, Resp>: Send + Sync {
    /// Sends `req` to the endpoint with ID `dst` and blocks until its
    /// response arrives or the exchange is given up.
    fn call(&self, dst: usize, req: &Req) -> Option<Resp>;

    /// Number of endpoints reachable through this transport.
    fn size(&self) -> usize;

    /// Toggles random message loss and delay on the owner's endpoint.
    fn set_unreliable(&self, unreliable: bool);
}
