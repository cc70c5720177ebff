//! Run configuration.
//!
//! A [`Config`] is built once at startup (defaults, optionally overlaid by a
//! TOML file and command-line flags) and passed by reference to every stage.

use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{DoctorError, Result};
use crate::hosts::DEFAULT_HOSTS_PATH;

/// Port used when a resolver is given as a bare IP address.
pub const DNS_PORT: u16 = 53;

/// Domains checked when no list is configured. The first one is primary.
const DEFAULT_DOMAINS: &[&str] = &[
    "github.com",
    "api.github.com",
    "gist.github.com",
    "codeload.github.com",
    "github.githubassets.com",
    "raw.githubusercontent.com",
    "objects.githubusercontent.com",
    "avatars.githubusercontent.com",
];

/// Known-good addresses used when a lookup fails.
const BUILTIN_FALLBACK: &[(&str, &[Ipv4Addr])] = &[
    (
        "github.com",
        &[
            Ipv4Addr::new(140, 82, 112, 3),
            Ipv4Addr::new(140, 82, 113, 3),
            Ipv4Addr::new(140, 82, 114, 4),
            Ipv4Addr::new(140, 82, 121, 4),
        ],
    ),
    (
        "api.github.com",
        &[Ipv4Addr::new(140, 82, 112, 6), Ipv4Addr::new(140, 82, 113, 6)],
    ),
    ("gist.github.com", &[Ipv4Addr::new(140, 82, 112, 3)]),
    (
        "codeload.github.com",
        &[Ipv4Addr::new(140, 82, 112, 9), Ipv4Addr::new(140, 82, 113, 9)],
    ),
    (
        "github.githubassets.com",
        &[
            Ipv4Addr::new(185, 199, 108, 154),
            Ipv4Addr::new(185, 199, 109, 154),
            Ipv4Addr::new(185, 199, 110, 154),
            Ipv4Addr::new(185, 199, 111, 154),
        ],
    ),
    (
        "raw.githubusercontent.com",
        &[
            Ipv4Addr::new(185, 199, 108, 133),
            Ipv4Addr::new(185, 199, 109, 133),
            Ipv4Addr::new(185, 199, 110, 133),
            Ipv4Addr::new(185, 199, 111, 133),
        ],
    ),
    (
        "objects.githubusercontent.com",
        &[
            Ipv4Addr::new(185, 199, 108, 133),
            Ipv4Addr::new(185, 199, 109, 133),
        ],
    ),
    (
        "avatars.githubusercontent.com",
        &[
            Ipv4Addr::new(185, 199, 108, 133),
            Ipv4Addr::new(185, 199, 111, 133),
        ],
    ),
];

/// Static domain -> addresses table consulted when resolution fails.
///
/// # Example
///
/// ```
/// use hosts_doctor::config::FallbackTable;
///
/// let table = FallbackTable::builtin();
/// assert!(table.get("github.com").is_some());
/// assert!(table.get("unknown.invalid").is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct FallbackTable(BTreeMap<String, Vec<Ipv4Addr>>);

impl FallbackTable {
    /// The table shipped with the binary.
    #[must_use]
    pub fn builtin() -> Self {
        Self(
            BUILTIN_FALLBACK
                .iter()
                .map(|(domain, addrs)| ((*domain).to_string(), addrs.to_vec()))
                .collect(),
        )
    }

    /// Returns the fallback addresses for `domain`, if any.
    #[must_use]
    pub fn get(&self, domain: &str) -> Option<&[Ipv4Addr]> {
        self.0
            .get(domain)
            .map(Vec::as_slice)
            .filter(|addrs| !addrs.is_empty())
    }

    /// Adds or replaces the entry for `domain`.
    pub fn insert(&mut self, domain: impl Into<String>, addrs: Vec<Ipv4Addr>) {
        self.0.insert(domain.into(), addrs);
    }
}

/// Configuration for a single run.
///
/// # Example
///
/// ```
/// use hosts_doctor::Config;
///
/// let config = Config::default().with_domains(["example.com"]);
/// assert_eq!(config.primary_domain(), Some("example.com"));
/// assert_eq!(config.probe_port, 443);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Domains to check and pin, in order. The first is the primary domain.
    pub domains: Vec<String>,

    /// Trusted external resolver. A bare IP means port 53.
    #[serde(deserialize_with = "deserialize_resolver")]
    pub upstream_resolver: SocketAddr,

    /// Addresses used for a domain whose lookup failed.
    pub fallback: FallbackTable,

    /// Hosts file to edit.
    pub hosts_path: PathBuf,

    /// Port used by the reachability and latency probes.
    pub probe_port: u16,

    /// Reachability handshake timeout, in seconds.
    pub connect_timeout_secs: u64,

    /// Upstream DNS query timeout, in seconds.
    pub dns_timeout_secs: u64,

    /// Latency probes per candidate address.
    pub latency_attempts: u32,

    /// Timeout of a single latency probe, in milliseconds.
    pub latency_timeout_ms: u64,

    /// Rank multi-address domains by latency instead of taking the first.
    pub rank_candidates: bool,

    /// Flush the OS DNS cache after writing.
    pub flush_dns: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domains: DEFAULT_DOMAINS.iter().map(ToString::to_string).collect(),
            upstream_resolver: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), DNS_PORT),
            fallback: FallbackTable::builtin(),
            hosts_path: PathBuf::from(DEFAULT_HOSTS_PATH),
            probe_port: 443,
            connect_timeout_secs: 5,
            dns_timeout_secs: 5,
            latency_attempts: 2,
            latency_timeout_ms: 2000,
            rank_candidates: true,
            flush_dns: true,
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`DoctorError::Io`] if the file cannot be read,
    /// [`DoctorError::ConfigParse`] on malformed TOML and
    /// [`DoctorError::InvalidConfig`] if validation fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants every stage relies on.
    ///
    /// # Errors
    ///
    /// Returns [`DoctorError::InvalidConfig`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.domains.is_empty() {
            return Err(DoctorError::InvalidConfig("no domains configured".into()));
        }

        let mut seen = HashSet::new();
        for domain in &self.domains {
            if domain.trim().is_empty() {
                return Err(DoctorError::InvalidConfig("empty domain".into()));
            }
            if !seen.insert(domain.as_str()) {
                return Err(DoctorError::InvalidConfig(format!(
                    "duplicate domain: {domain}"
                )));
            }
            if self.fallback.get(domain).is_none() {
                return Err(DoctorError::InvalidConfig(format!(
                    "no fallback address for {domain}"
                )));
            }
        }

        if self.connect_timeout_secs == 0 || self.dns_timeout_secs == 0 {
            return Err(DoctorError::InvalidConfig("timeouts must be > 0".into()));
        }
        if self.latency_attempts == 0 || self.latency_timeout_ms == 0 {
            return Err(DoctorError::InvalidConfig(
                "latency_attempts and latency_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Replaces the domain list.
    #[must_use]
    pub fn with_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the external resolver.
    #[must_use]
    pub const fn with_upstream(mut self, resolver: SocketAddr) -> Self {
        self.upstream_resolver = resolver;
        self
    }

    /// Overrides the hosts file path.
    #[must_use]
    pub fn with_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.hosts_path = path.into();
        self
    }

    /// The domain whose first candidate is used for the reachability probe.
    #[must_use]
    pub fn primary_domain(&self) -> Option<&str> {
        self.domains.first().map(String::as_str)
    }

    /// Reachability handshake timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Upstream DNS query timeout.
    #[must_use]
    pub const fn dns_timeout(&self) -> Duration {
        Duration::from_secs(self.dns_timeout_secs)
    }

    /// Timeout of a single latency probe.
    #[must_use]
    pub const fn latency_timeout(&self) -> Duration {
        Duration::from_millis(self.latency_timeout_ms)
    }
}

/// Parses `"1.1.1.1"` or `"1.1.1.1:5353"` into a resolver socket address.
///
/// # Errors
///
/// Returns [`DoctorError::InvalidConfig`] if `s` is neither form.
pub fn parse_resolver(s: &str) -> Result<SocketAddr> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    s.parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DNS_PORT))
        .map_err(|_| DoctorError::InvalidConfig(format!("invalid resolver address: {s}")))
}

fn deserialize_resolver<'de, D>(deserializer: D) -> std::result::Result<SocketAddr, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_resolver(&s).map_err(serde::de::Error::custom)
}
