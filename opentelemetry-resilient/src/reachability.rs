//! TCP level reachability of a collector endpoint.
use crate::endpoint::Endpoint;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Default time a single reachability check may take.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Returns `true` if a TCP connection to the endpoint's host and resolved port
/// is established within `timeout`.
///
/// Every failure (name resolution, refusal, timeout) yields `false`. There is
/// no retry in here, retrying is up to the caller. The timeout bounds each
/// connection attempt, name resolution uses the system resolver as is.
pub fn is_reachable(endpoint: &Endpoint, timeout: Duration) -> bool {
    let addrs = match (endpoint.host(), endpoint.port()).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(_) => return false,
    };
    for addr in addrs {
        if TcpStream::connect_timeout(&addr, timeout).is_ok() {
            return true;
        }
    }
    false
}

/// A reachability check the prober polls until it succeeds.
///
/// Implemented for closures so tests and callers can plug in their own.
pub trait Probe: Send + 'static {
    /// Whether the endpoint answers right now.
    fn is_reachable(&self, endpoint: &Endpoint) -> bool;
}

impl<F> Probe for F
where
    F: Fn(&Endpoint) -> bool + Send + 'static,
{
    fn is_reachable(&self, endpoint: &Endpoint) -> bool {
        self(endpoint)
    }
}

/// The default [`Probe`], a timeout bounded TCP connect.
#[derive(Clone, Copy, Debug)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    /// Creates a probe that gives up on each connection after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        TcpProbe { timeout }
    }

    /// The connection timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        TcpProbe::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl Probe for TcpProbe {
    fn is_reachable(&self, endpoint: &Endpoint) -> bool {
        is_reachable(endpoint, self.timeout)
    }
}
