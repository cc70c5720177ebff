//! TCP handshake probes.
//!
//! A completed handshake to port 443 is the reachability test; the time it
//! takes is the latency sample used for ranking. No payload is exchanged.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

/// Default port probed.
pub const HTTPS_PORT: u16 = 443;

/// One connectivity sample.
pub trait Probe {
    /// Returns the round-trip time, or `None` if `addr` did not answer.
    fn probe(&self, addr: Ipv4Addr) -> Option<Duration>;
}

/// Connects to `addr:port` and measures the handshake.
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe {
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    /// Creates a probe for `port` with a connect timeout.
    #[must_use]
    pub const fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    /// The probed port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }
}

impl Probe for TcpProbe {
    fn probe(&self, addr: Ipv4Addr) -> Option<Duration> {
        let target = SocketAddr::new(IpAddr::V4(addr), self.port);
        let started = Instant::now();
        match TcpStream::connect_timeout(&target, self.timeout) {
            Ok(_) => {
                let rtt = started.elapsed();
                tracing::debug!(%target, rtt_ms = rtt.as_millis(), "Handshake completed");
                Some(rtt)
            }
            Err(e) => {
                tracing::debug!(%target, error = %e, "Handshake failed");
                None
            }
        }
    }
}

/// Network-layer verdict for the representative address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    /// The handshake completed.
    Reachable {
        /// The probed address.
        addr: Ipv4Addr,
        /// Handshake time.
        rtt: Duration,
    },
    /// No handshake: traffic to the correct address is blocked, which a
    /// hosts override cannot fix.
    Blocked {
        /// The probed address.
        addr: Ipv4Addr,
    },
}

impl Reachability {
    /// `true` for [`Reachability::Reachable`].
    #[must_use]
    pub const fn is_reachable(&self) -> bool {
        matches!(self, Self::Reachable { .. })
    }

    /// The probed address.
    #[must_use]
    pub const fn addr(&self) -> Ipv4Addr {
        match self {
            Self::Reachable { addr, .. } | Self::Blocked { addr } => *addr,
        }
    }
}

/// Probes `addr` once; there are no retries.
#[must_use]
pub fn check(probe: &dyn Probe, addr: Ipv4Addr) -> Reachability {
    match probe.probe(addr) {
        Some(rtt) => {
            tracing::info!(%addr, rtt_ms = rtt.as_millis(), "Representative address is reachable");
            Reachability::Reachable { addr, rtt }
        }
        None => {
            tracing::warn!(%addr, "Representative address is unreachable");
            Reachability::Blocked { addr }
        }
    }
}
