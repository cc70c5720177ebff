//! Diagnose, decide, then edit.
//!
//! Stages run strictly in order: resolver comparison, reachability probe,
//! latency ranking, hosts edit. A blocked reachability probe stops the run
//! before anything is written unless the user explicitly confirms.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::config::Config;
use crate::error::{DoctorError, Result};
use crate::flush::FlushDns;
use crate::hosts::{HostsFile, Mapping};
use crate::probe::{self, Probe, Reachability};
use crate::prompt::Confirm;
use crate::ranker;
use crate::resolver::{self, Comparison, Resolve};
use crate::util;

/// External collaborators of a run.
pub struct Toolkit<'a> {
    /// The system's configured resolver.
    pub local: &'a dyn Resolve,
    /// The trusted external resolver.
    pub upstream: &'a dyn Resolve,
    /// Probe for the blocked/passable verdict.
    pub reachability: &'a dyn Probe,
    /// Probe for latency ranking.
    pub latency: &'a dyn Probe,
    /// DNS cache flusher.
    pub flusher: &'a dyn FlushDns,
}

/// Per-invocation switches that are not part of [`Config`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Compute the block but do not back up, write or flush.
    pub dry_run: bool,
}

/// Result of the two diagnostic stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    /// Per-domain resolver comparison.
    pub comparison: Comparison,
    /// Verdict for the primary domain's first candidate.
    pub reachability: Reachability,
}

impl Diagnosis {
    /// `true` if any domain resolved differently through the two resolvers.
    #[must_use]
    pub fn polluted(&self) -> bool {
        self.comparison.polluted()
    }
}

/// What a completed run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// The diagnosis that led here.
    pub diagnosis: Diagnosis,
    /// Selected address per domain, in configured order.
    pub mappings: Vec<Mapping>,
    /// Backup taken before writing.
    pub backup: Option<PathBuf>,
    /// Whether the DNS cache flush succeeded.
    pub flushed: bool,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The hosts file was rewritten.
    Applied(Report),
    /// Nothing was written; `block` is what would have been appended.
    DryRun {
        /// Mappings that would have been written.
        report: Report,
        /// Rendered managed block.
        block: String,
    },
    /// The path was blocked and the user did not confirm. Nothing was written.
    Declined(Diagnosis),
}

/// Runs the resolver comparison and the reachability probe.
///
/// # Errors
///
/// Returns [`DoctorError::InvalidConfig`] if no primary domain is configured
/// and [`DoctorError::NoCandidates`] if a domain has no address at all.
pub fn diagnose(config: &Config, toolkit: &Toolkit<'_>) -> Result<Diagnosis> {
    let comparison = resolver::compare(config, toolkit.local, toolkit.upstream)?;
    let representative = representative(config, &comparison)?;
    let reachability = probe::check(toolkit.reachability, representative);
    Ok(Diagnosis {
        comparison,
        reachability,
    })
}

/// Runs every stage and edits `hosts`.
///
/// # Errors
///
/// Returns the errors of [`diagnose`], and [`DoctorError::HostsRead`] or
/// [`DoctorError::HostsWrite`] from the edit.
pub fn run(
    config: &Config,
    toolkit: &Toolkit<'_>,
    hosts: &HostsFile,
    confirm: &mut dyn Confirm,
    options: RunOptions,
) -> Result<Outcome> {
    let diagnosis = diagnose(config, toolkit)?;

    if let Reachability::Blocked { addr } = diagnosis.reachability {
        if !continue_when_blocked(confirm, addr, config.probe_port) {
            tracing::info!("Aborted without touching the hosts file");
            return Ok(Outcome::Declined(diagnosis));
        }
    }

    let mappings = select_mappings(config, &diagnosis.comparison, toolkit.latency);

    if options.dry_run {
        let block = hosts.preview(&mappings)?;
        return Ok(Outcome::DryRun {
            report: Report {
                diagnosis,
                mappings,
                backup: None,
                flushed: false,
            },
            block,
        });
    }

    if !util::is_elevated() {
        tracing::warn!(
            path = %hosts.path().display(),
            "Not running with administrative privileges, the write will probably fail"
        );
    }
    let applied = hosts.apply(&mappings)?;
    let flushed = config.flush_dns && flush(toolkit.flusher);

    Ok(Outcome::Applied(Report {
        diagnosis,
        mappings,
        backup: applied.backup,
        flushed,
    }))
}

/// Chooses one address per domain.
///
/// Multi-address domains are ranked by latency when enabled; otherwise, and
/// for single-address domains, the first candidate is used.
#[must_use]
pub fn select_mappings(config: &Config, comparison: &Comparison, latency: &dyn Probe) -> Vec<Mapping> {
    comparison
        .checks
        .iter()
        .map(|check| {
            let address = if config.rank_candidates {
                ranker::select(&check.candidates, latency, config.latency_attempts)
            } else {
                check.candidates.first()
            };
            tracing::debug!(domain = %check.resolution.domain, %address, "Selected address");
            Mapping::new(check.resolution.domain.clone(), address)
        })
        .collect()
}

/// Removes the managed block and flushes the cache if anything changed.
///
/// Returns whether a block was (or, on a dry run, would be) removed. A dry
/// run reads the file and changes nothing.
///
/// # Errors
///
/// Returns [`DoctorError::HostsRead`] or [`DoctorError::HostsWrite`].
pub fn remove(
    config: &Config,
    hosts: &HostsFile,
    flusher: &dyn FlushDns,
    options: RunOptions,
) -> Result<bool> {
    if options.dry_run {
        return hosts.has_managed_block();
    }
    let removed = hosts.remove()?;
    if removed && config.flush_dns {
        flush(flusher);
    }
    Ok(removed)
}

fn representative(config: &Config, comparison: &Comparison) -> Result<Ipv4Addr> {
    let primary = config
        .primary_domain()
        .ok_or_else(|| DoctorError::InvalidConfig("no domains configured".into()))?;
    comparison
        .candidates(primary)
        .map(resolver::Candidates::first)
        .ok_or_else(|| DoctorError::NoCandidates {
            domain: primary.to_string(),
        })
}

fn continue_when_blocked(confirm: &mut dyn Confirm, addr: Ipv4Addr, port: u16) -> bool {
    let question = format!(
        "{addr}:{port} is unreachable. This looks like network-level blocking, \
         which a hosts override cannot fix. Continue anyway?"
    );
    confirm.confirm(&question).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Prompt failed, assuming no");
        false
    })
}

fn flush(flusher: &dyn FlushDns) -> bool {
    match flusher.flush() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "DNS cache flush failed, new entries apply once the cache expires");
            false
        }
    }
}
