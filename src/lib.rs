//! # hosts-doctor
//!
//! Diagnose degraded access to a remote service caused by DNS interference,
//! and pin known-good addresses in the system hosts file.
//!
//! The core question is whether the DNS answers are wrong (a hosts override
//! fixes that) or the network path to the correct address is blocked (a
//! hosts override does not). A run goes through four stages in order:
//!
//! 1. [`resolver::compare`] looks every domain up through the system resolver
//!    and a trusted external one, flagging disagreement as pollution.
//! 2. [`probe::check`] attempts a TCP handshake to port 443 of the primary
//!    domain's first candidate.
//! 3. [`ranker::select`] picks the lowest-latency address for domains with
//!    several candidates.
//! 4. [`HostsFile::apply`] backs up the hosts file and replaces the managed
//!    block, then the OS DNS cache is flushed.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use hosts_doctor::{Config, HostsFile, workflow};
//!
//! let config = Config::default();
//! let outcome = workflow::run(&config, &toolkit, &HostsFile::new(), &mut prompt, Default::default())?;
//! ```
//!
//! ## Managed block
//!
//! ```text
//! # GitHub Hosts Start
//! # Updated: 2026-10-18 15:30:12
//! 140.82.112.3	github.com
//! # GitHub Hosts End
//! ```
//!
//! Everything outside the markers is preserved byte for byte. Re-running
//! replaces the block instead of adding another one.
//!
//! ## Permissions
//!
//! Writing the hosts file requires administrator rights. The caller is
//! responsible for privilege elevation (`sudo`, an elevated shell, etc.).

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod flush;
pub mod hosts;
pub mod probe;
pub mod prompt;
pub mod ranker;
pub mod resolver;
pub mod util;
pub mod workflow;

pub use config::Config;
pub use error::{DoctorError, Result};
pub use hosts::{HostsFile, Mapping};
pub use workflow::{Outcome, Toolkit};
