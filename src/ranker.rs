//! Latency ranking of candidate addresses.

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::probe::Probe;
use crate::resolver::Candidates;

/// Probe results for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyMeasurement {
    /// The measured address.
    pub address: Ipv4Addr,
    /// Probes that got an answer.
    pub successes: u32,
    /// Probes sent.
    pub attempts: u32,
    /// Mean round-trip time over successful probes only.
    pub mean_rtt: Option<Duration>,
}

/// Probes `address` `attempts` times.
#[must_use]
pub fn measure(probe: &dyn Probe, address: Ipv4Addr, attempts: u32) -> LatencyMeasurement {
    let mut successes = 0u32;
    let mut total = Duration::ZERO;
    for _ in 0..attempts {
        if let Some(rtt) = probe.probe(address) {
            successes += 1;
            total += rtt;
        }
    }

    let mean_rtt = (successes > 0).then(|| total / successes);
    tracing::debug!(%address, successes, attempts, ?mean_rtt, "Measured latency");
    LatencyMeasurement {
        address,
        successes,
        attempts,
        mean_rtt,
    }
}

/// Picks the address with the lowest mean latency.
///
/// Ties go to the earlier candidate. If nothing answers, the first candidate
/// is returned. A single candidate is returned without probing.
#[must_use]
pub fn select(candidates: &Candidates, probe: &dyn Probe, attempts: u32) -> Ipv4Addr {
    let addrs = match candidates {
        Candidates::One(addr) => return *addr,
        Candidates::Many(addrs) => addrs,
    };

    let measurements: Vec<LatencyMeasurement> = addrs
        .iter()
        .map(|addr| measure(probe, *addr, attempts))
        .collect();
    fastest(&measurements).unwrap_or_else(|| {
        tracing::warn!(fallback = %candidates.first(), "No candidate answered, keeping the first");
        candidates.first()
    })
}

/// Lowest mean among measurements with at least one success; first wins ties.
#[must_use]
pub fn fastest(measurements: &[LatencyMeasurement]) -> Option<Ipv4Addr> {
    let mut best: Option<(Duration, Ipv4Addr)> = None;
    for m in measurements {
        let Some(rtt) = m.mean_rtt else { continue };
        if best.is_none_or(|(best_rtt, _)| rtt < best_rtt) {
            best = Some((rtt, m.address));
        }
    }
    best.map(|(_, addr)| addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashMap;

    /// Answers with a fixed latency per address and counts calls.
    struct Scripted {
        rtts: HashMap<Ipv4Addr, Option<Duration>>,
        calls: Cell<u32>,
    }

    impl Scripted {
        fn new(rtts: &[(Ipv4Addr, Option<u64>)]) -> Self {
            Self {
                rtts: rtts
                    .iter()
                    .map(|(a, ms)| (*a, ms.map(Duration::from_millis)))
                    .collect(),
                calls: Cell::new(0),
            }
        }
    }

    impl Probe for Scripted {
        fn probe(&self, addr: Ipv4Addr) -> Option<Duration> {
            self.calls.set(self.calls.get() + 1);
            self.rtts.get(&addr).copied().flatten()
        }
    }

    const A: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const B: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
    const C: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 3);

    #[test]
    fn picks_lowest_mean() {
        let probe = Scripted::new(&[(A, Some(50)), (B, Some(20)), (C, None)]);
        let chosen = select(&Candidates::Many(vec![A, B, C]), &probe, 2);
        assert_eq!(chosen, B);
        assert_eq!(probe.calls.get(), 6);
    }

    #[test]
    fn single_candidate_is_not_probed() {
        let probe = Scripted::new(&[]);
        assert_eq!(select(&Candidates::One(A), &probe, 2), A);
        assert_eq!(probe.calls.get(), 0);
    }

    #[test]
    fn all_failed_falls_back_to_first() {
        let probe = Scripted::new(&[(A, None), (B, None)]);
        assert_eq!(select(&Candidates::Many(vec![B, A]), &probe, 2), B);
    }

    #[test]
    fn tie_goes_to_first() {
        let probe = Scripted::new(&[(A, Some(30)), (B, Some(30))]);
        assert_eq!(select(&Candidates::Many(vec![B, A]), &probe, 2), B);
    }

    #[test]
    fn mean_ignores_failed_attempts() {
        struct Flaky(Cell<bool>);
        impl Probe for Flaky {
            fn probe(&self, _: Ipv4Addr) -> Option<Duration> {
                let up = !self.0.get();
                self.0.set(up);
                up.then_some(Duration::from_millis(40))
            }
        }

        let m = measure(&Flaky(Cell::new(false)), A, 4);
        assert_eq!(m.successes, 2);
        assert_eq!(m.attempts, 4);
        assert_eq!(m.mean_rtt, Some(Duration::from_millis(40)));
    }

    #[test]
    fn fastest_of_nothing_is_none() {
        let m = LatencyMeasurement {
            address: A,
            successes: 0,
            attempts: 2,
            mean_rtt: None,
        };
        assert_eq!(fastest(&[m]), None);
        assert_eq!(fastest(&[]), None);
    }
}
