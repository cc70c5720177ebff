//! Resolver comparison: system DNS versus a trusted external resolver.
//!
//! Each configured domain is looked up twice. A disagreement on the first
//! returned address marks the domain as polluted. A failed lookup never
//! marks pollution; the domain's candidates then come from the fallback
//! table instead.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};

use crate::config::Config;
use crate::error::{DoctorError, Result};

/// Maximum DNS message size over UDP.
pub const MAX_UDP_DNS_SIZE: usize = 512;

/// Datagrams read while waiting for the matching transaction id.
const MAX_STRAY_RESPONSES: usize = 8;

/// A-record lookup.
pub trait Resolve {
    /// Returns the IPv4 addresses of `domain`, in answer order.
    ///
    /// # Errors
    ///
    /// Returns an error on timeout, NXDOMAIN or an empty answer.
    fn lookup_a(&self, domain: &str) -> Result<Vec<Ipv4Addr>>;
}

/// The platform's configured resolver (`getaddrinfo`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn lookup_a(&self, domain: &str) -> Result<Vec<Ipv4Addr>> {
        tracing::debug!(domain = %domain, "Resolving via system resolver");
        let addrs = (domain, 0u16)
            .to_socket_addrs()
            .map_err(|e| dns_error(domain, e))?
            .filter_map(|addr| match addr.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            });
        non_empty(domain, dedup(addrs))
    }
}

/// Sends A queries over UDP to an explicit server.
#[derive(Debug, Clone)]
pub struct UpstreamResolver {
    server: SocketAddr,
    timeout: Duration,
}

impl UpstreamResolver {
    /// Creates a resolver for `server` with a per-query read timeout.
    #[must_use]
    pub const fn new(server: SocketAddr, timeout: Duration) -> Self {
        Self { server, timeout }
    }

    /// The server queries are sent to.
    #[must_use]
    pub const fn server(&self) -> SocketAddr {
        self.server
    }

    fn exchange(&self, domain: &str, query: &Message) -> Result<Message> {
        let local: SocketAddr = if self.server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.set_read_timeout(Some(self.timeout))?;
        socket.connect(self.server)?;
        socket.send(&query.to_bytes()?)?;

        let mut buf = [0u8; MAX_UDP_DNS_SIZE];
        for _ in 0..MAX_STRAY_RESPONSES {
            let len = socket.recv(&mut buf).map_err(|e| dns_error(domain, e))?;
            let response = match Message::from_bytes(&buf[..len]) {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(domain = %domain, error = %e, "Ignoring undecodable datagram");
                    continue;
                }
            };
            if response.id() == query.id() {
                return Ok(response);
            }
            tracing::debug!(domain = %domain, id = response.id(), "Ignoring response with foreign id");
        }
        Err(DoctorError::Dns {
            domain: domain.to_string(),
            reason: "no matching response".into(),
        })
    }
}

impl Resolve for UpstreamResolver {
    fn lookup_a(&self, domain: &str) -> Result<Vec<Ipv4Addr>> {
        tracing::debug!(domain = %domain, server = %self.server, "Resolving via upstream resolver");
        let query = build_query(domain, rand::random())?;
        let response = self.exchange(domain, &query)?;
        answers_of(domain, &response)
    }
}

fn build_query(domain: &str, id: u16) -> Result<Message> {
    let name = Name::from_ascii(domain)?;
    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true);
    message.add_query(Query::query(name, RecordType::A));
    Ok(message)
}

fn answers_of(domain: &str, response: &Message) -> Result<Vec<Ipv4Addr>> {
    if response.response_code() != ResponseCode::NoError {
        return Err(DoctorError::Dns {
            domain: domain.to_string(),
            reason: format!("{:?}", response.response_code()),
        });
    }
    let addrs = response
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::A(a)) => Some(a.0),
            _ => None,
        });
    non_empty(domain, dedup(addrs))
}

fn dns_error(domain: &str, e: std::io::Error) -> DoctorError {
    DoctorError::Dns {
        domain: domain.to_string(),
        reason: e.to_string(),
    }
}

fn dedup(addrs: impl Iterator<Item = Ipv4Addr>) -> Vec<Ipv4Addr> {
    let mut out: Vec<Ipv4Addr> = Vec::new();
    for addr in addrs {
        if !out.contains(&addr) {
            out.push(addr);
        }
    }
    out
}

fn non_empty(domain: &str, addrs: Vec<Ipv4Addr>) -> Result<Vec<Ipv4Addr>> {
    if addrs.is_empty() {
        return Err(DoctorError::Dns {
            domain: domain.to_string(),
            reason: "no A record".into(),
        });
    }
    Ok(addrs)
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Candidate addresses for one domain: exactly one, or several to rank.
///
/// Never empty. `Many` can only be built through
/// [`from_addrs`](Self::from_addrs) outside this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidates {
    /// A single address; passed through without measurement.
    One(Ipv4Addr),
    /// Two or more distinct addresses, in input order.
    #[non_exhaustive]
    Many(Vec<Ipv4Addr>),
}

impl Candidates {
    /// Builds a candidate set, dropping duplicates. `None` if `addrs` is empty.
    #[must_use]
    pub fn from_addrs(addrs: impl IntoIterator<Item = Ipv4Addr>) -> Option<Self> {
        let mut addrs = dedup(addrs.into_iter());
        match addrs.len() {
            0 => None,
            1 => Some(Self::One(addrs.remove(0))),
            _ => Some(Self::Many(addrs)),
        }
    }

    /// The first address in input order.
    #[must_use]
    pub fn first(&self) -> Ipv4Addr {
        match self {
            Self::One(addr) => *addr,
            Self::Many(addrs) => addrs.first().copied().unwrap_or(Ipv4Addr::UNSPECIFIED),
        }
    }

    /// All addresses in input order.
    #[must_use]
    pub fn as_slice(&self) -> &[Ipv4Addr] {
        match self {
            Self::One(addr) => std::slice::from_ref(addr),
            Self::Many(addrs) => addrs,
        }
    }
}

/// Where a domain's candidates came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    /// The external resolver's answer.
    Upstream,
    /// The static fallback table.
    Fallback,
}

/// Outcome of the two lookups for one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionResult {
    /// The looked-up domain.
    pub domain: String,
    /// First address from the system resolver.
    pub local: Option<Ipv4Addr>,
    /// First address from the external resolver.
    pub reference: Option<Ipv4Addr>,
    /// Both lookups succeeded and their first addresses differ.
    pub polluted: bool,
}

/// Everything the comparison learned about one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainCheck {
    /// The raw comparison.
    pub resolution: ResolutionResult,
    /// Addresses to choose the mapping from.
    pub candidates: Candidates,
    /// Origin of `candidates`.
    pub source: CandidateSource,
}

/// Per-domain checks, in configured order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    /// One entry per configured domain.
    pub checks: Vec<DomainCheck>,
}

impl Comparison {
    /// `true` if any domain resolved differently.
    #[must_use]
    pub fn polluted(&self) -> bool {
        self.checks.iter().any(|c| c.resolution.polluted)
    }

    /// Candidates for `domain`, if it was checked.
    #[must_use]
    pub fn candidates(&self, domain: &str) -> Option<&Candidates> {
        self.checks
            .iter()
            .find(|c| c.resolution.domain == domain)
            .map(|c| &c.candidates)
    }
}

/// Resolves every configured domain through both resolvers.
///
/// Lookup failures are logged and recovered from the fallback table.
///
/// # Errors
///
/// Returns [`DoctorError::NoCandidates`] if a domain's lookups failed and
/// it has no fallback entry.
pub fn compare(config: &Config, local: &dyn Resolve, upstream: &dyn Resolve) -> Result<Comparison> {
    let mut checks = Vec::with_capacity(config.domains.len());
    for domain in &config.domains {
        checks.push(check_domain(config, domain, local, upstream)?);
    }
    Ok(Comparison { checks })
}

fn check_domain(
    config: &Config,
    domain: &str,
    local: &dyn Resolve,
    upstream: &dyn Resolve,
) -> Result<DomainCheck> {
    let local_answer = lookup_logged(local, domain, "system");
    let upstream_answer = lookup_logged(upstream, domain, "upstream");

    let local_first = local_answer.as_ref().and_then(|a| a.first().copied());
    let reference_first = upstream_answer.as_ref().and_then(|a| a.first().copied());
    let polluted = matches!((local_first, reference_first), (Some(l), Some(r)) if l != r);
    if polluted {
        tracing::info!(domain = %domain, ?local_first, ?reference_first, "Resolvers disagree");
    }

    let (candidates, source) = match upstream_answer.and_then(Candidates::from_addrs) {
        Some(c) => (c, CandidateSource::Upstream),
        None => {
            let fallback = config
                .fallback
                .get(domain)
                .and_then(|addrs| Candidates::from_addrs(addrs.iter().copied()))
                .ok_or_else(|| DoctorError::NoCandidates {
                    domain: domain.to_string(),
                })?;
            tracing::info!(domain = %domain, "Using fallback addresses");
            (fallback, CandidateSource::Fallback)
        }
    };

    Ok(DomainCheck {
        resolution: ResolutionResult {
            domain: domain.to_string(),
            local: local_first,
            reference: reference_first,
            polluted,
        },
        candidates,
        source,
    })
}

fn lookup_logged(resolver: &dyn Resolve, domain: &str, which: &str) -> Option<Vec<Ipv4Addr>> {
    match resolver.lookup_a(domain) {
        Ok(addrs) => Some(addrs),
        Err(e) => {
            tracing::warn!(domain = %domain, resolver = which, error = %e, "Lookup failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::Record;
    use hickory_proto::rr::rdata::A;
    use std::collections::HashMap;

    /// Table-driven resolver; unknown domains fail.
    struct Fixed(HashMap<&'static str, Vec<Ipv4Addr>>);

    impl Resolve for Fixed {
        fn lookup_a(&self, domain: &str) -> Result<Vec<Ipv4Addr>> {
            self.0.get(domain).cloned().ok_or_else(|| DoctorError::Dns {
                domain: domain.to_string(),
                reason: "NXDomain".into(),
            })
        }
    }

    fn ip(d: u8) -> Ipv4Addr {
        Ipv4Addr::new(d, d, d, d)
    }

    fn config_for(domains: &[&str]) -> Config {
        let mut config = Config::default().with_domains(domains.iter().copied());
        for d in domains {
            config.fallback.insert(*d, vec![ip(9)]);
        }
        config
    }

    #[test]
    fn divergent_answers_are_polluted() {
        let config = config_for(&["example.com"]);
        let local = Fixed(HashMap::from([("example.com", vec![ip(1)])]));
        let upstream = Fixed(HashMap::from([("example.com", vec![ip(2)])]));

        let cmp = compare(&config, &local, &upstream).unwrap();
        assert!(cmp.polluted());
        assert_eq!(cmp.checks[0].resolution.local, Some(ip(1)));
        assert_eq!(cmp.checks[0].resolution.reference, Some(ip(2)));
        assert_eq!(cmp.candidates("example.com"), Some(&Candidates::One(ip(2))));
        assert_eq!(cmp.checks[0].source, CandidateSource::Upstream);
    }

    #[test]
    fn matching_answers_are_clean() {
        let config = config_for(&["a.com", "b.com"]);
        let answers = HashMap::from([("a.com", vec![ip(1)]), ("b.com", vec![ip(3), ip(4)])]);
        let cmp = compare(&config, &Fixed(answers.clone()), &Fixed(answers)).unwrap();

        assert!(!cmp.polluted());
        assert_eq!(
            cmp.candidates("b.com"),
            Some(&Candidates::Many(vec![ip(3), ip(4)]))
        );
    }

    #[test]
    fn only_first_address_is_compared() {
        let config = config_for(&["a.com"]);
        let local = Fixed(HashMap::from([("a.com", vec![ip(1), ip(2)])]));
        let upstream = Fixed(HashMap::from([("a.com", vec![ip(1), ip(3)])]));
        assert!(!compare(&config, &local, &upstream).unwrap().polluted());
    }

    #[test]
    fn upstream_failure_uses_fallback_and_is_not_polluted() {
        let config = config_for(&["a.com"]);
        let local = Fixed(HashMap::from([("a.com", vec![ip(1)])]));
        let upstream = Fixed(HashMap::new());

        let cmp = compare(&config, &local, &upstream).unwrap();
        assert!(!cmp.polluted());
        assert_eq!(cmp.candidates("a.com"), Some(&Candidates::One(ip(9))));
        assert_eq!(cmp.checks[0].source, CandidateSource::Fallback);
    }

    #[test]
    fn local_failure_keeps_upstream_answer() {
        let config = config_for(&["a.com"]);
        let upstream = Fixed(HashMap::from([("a.com", vec![ip(2)])]));

        let cmp = compare(&config, &Fixed(HashMap::new()), &upstream).unwrap();
        assert!(!cmp.polluted());
        assert_eq!(cmp.candidates("a.com"), Some(&Candidates::One(ip(2))));
    }

    #[test]
    fn missing_fallback_is_an_error() {
        let config = Config::default().with_domains(["nowhere.invalid"]);
        let none = Fixed(HashMap::new());
        assert!(matches!(
            compare(&config, &none, &none),
            Err(DoctorError::NoCandidates { .. })
        ));
    }

    #[test]
    fn candidates_tagging() {
        assert_eq!(Candidates::from_addrs([]), None);
        assert_eq!(Candidates::from_addrs([ip(1), ip(1)]), Some(Candidates::One(ip(1))));
        let many = Candidates::from_addrs([ip(2), ip(1), ip(2)]).unwrap();
        assert_eq!(many, Candidates::Many(vec![ip(2), ip(1)]));
        assert_eq!(many.first(), ip(2));
    }

    #[test]
    fn query_asks_for_a_record_with_recursion() {
        let query = build_query("github.com", 7).unwrap();
        assert_eq!(query.id(), 7);
        assert!(query.recursion_desired());
        assert_eq!(query.queries()[0].query_type(), RecordType::A);

        let bytes = query.to_bytes().unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();
        assert_eq!(
            decoded.queries()[0].name().to_ascii().trim_end_matches('.'),
            "github.com"
        );
    }

    #[test]
    fn answers_extracts_a_records() {
        let name = Name::from_ascii("github.com").unwrap();
        let mut response = Message::new();
        response
            .set_id(1)
            .set_message_type(MessageType::Response)
            .set_response_code(ResponseCode::NoError);
        response.add_answer(Record::from_rdata(name.clone(), 60, RData::A(A(ip(5)))));
        response.add_answer(Record::from_rdata(name, 60, RData::A(A(ip(6)))));

        assert_eq!(answers_of("github.com", &response).unwrap(), vec![ip(5), ip(6)]);
    }

    #[test]
    fn answers_rejects_nxdomain_and_empty() {
        let mut nx = Message::new();
        nx.set_response_code(ResponseCode::NXDomain);
        assert!(answers_of("x.invalid", &nx).is_err());
        assert!(answers_of("x.invalid", &Message::new()).is_err());
    }

    #[test]
    fn from_addrs_never_builds_a_short_many() {
        for n in 0..4u8 {
            match Candidates::from_addrs((1..=n).map(ip)) {
                None => assert_eq!(n, 0),
                Some(Candidates::One(addr)) => assert_eq!((n, addr), (1, ip(1))),
                Some(many @ Candidates::Many(..)) => {
                    assert!(many.as_slice().len() >= 2);
                    assert_eq!(many.first(), ip(1));
                }
            }
        }
    }

    #[test]
    fn upstream_skips_garbage_and_foreign_ids() {
        let server = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let addr = server.local_addr().unwrap();

        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; MAX_UDP_DNS_SIZE];
            let (len, peer) = server.recv_from(&mut buf).unwrap();
            let query = Message::from_bytes(&buf[..len]).unwrap();

            server.send_to(&[0xff, 0x01, 0x02], peer).unwrap();

            let name = query.queries()[0].name().clone();
            let mut response = Message::new();
            response
                .set_id(query.id().wrapping_add(1))
                .set_message_type(MessageType::Response)
                .set_response_code(ResponseCode::NoError);
            response.add_answer(Record::from_rdata(name.clone(), 60, RData::A(A(ip(7)))));
            server.send_to(&response.to_bytes().unwrap(), peer).unwrap();

            let mut response = Message::new();
            response
                .set_id(query.id())
                .set_message_type(MessageType::Response)
                .set_response_code(ResponseCode::NoError);
            response.add_answer(Record::from_rdata(name, 60, RData::A(A(ip(8)))));
            server.send_to(&response.to_bytes().unwrap(), peer).unwrap();
        });

        let resolver = UpstreamResolver::new(addr, Duration::from_secs(5));
        assert_eq!(resolver.lookup_a("github.com").unwrap(), vec![ip(8)]);
        handle.join().unwrap();
    }

    #[test]
    #[ignore = "depends on the host's resolver configuration"]
    fn system_resolver_resolves_localhost() {
        let addrs = SystemResolver.lookup_a("localhost").unwrap();
        assert!(addrs.contains(&Ipv4Addr::LOCALHOST));
    }

    #[test]
    #[ignore = "requires network access"]
    fn upstream_resolver_resolves_real_domain() {
        let r = UpstreamResolver::new("8.8.8.8:53".parse().unwrap(), Duration::from_secs(5));
        assert!(!r.lookup_a("github.com").unwrap().is_empty());
    }
}
