//! Managed-block editing of the system hosts file.
//!
//! The tool owns exactly one region of the hosts file, delimited by the
//! [`BLOCK_START`] and [`BLOCK_END`] sentinel lines. Every edit removes all
//! existing managed regions and appends a fresh one; every other byte of the
//! file is preserved in its original order.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::error::{DoctorError, Result};
use crate::util;

/// First line of the managed block.
pub const BLOCK_START: &str = "# GitHub Hosts Start";

/// Last line of the managed block.
pub const BLOCK_END: &str = "# GitHub Hosts End";

/// Default hosts file location for this platform.
#[cfg(windows)]
pub const DEFAULT_HOSTS_PATH: &str = r"C:\Windows\System32\drivers\etc\hosts";

/// Default hosts file location for this platform.
#[cfg(not(windows))]
pub const DEFAULT_HOSTS_PATH: &str = "/etc/hosts";

/// Inserted between the hosts file name and the backup timestamp.
const BACKUP_SUFFIX: &str = ".bak.";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// One `<address><TAB><domain>` line of the managed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    /// Host name being pinned.
    pub domain: String,
    /// Address it is pinned to.
    pub address: Ipv4Addr,
}

impl Mapping {
    /// Creates a mapping.
    #[must_use]
    pub fn new(domain: impl Into<String>, address: Ipv4Addr) -> Self {
        Self {
            domain: domain.into(),
            address,
        }
    }
}

/// Result of a successful [`HostsFile::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// Backup written before the edit, `None` if the backup failed.
    pub backup: Option<PathBuf>,
    /// Number of managed blocks that were replaced.
    pub replaced_blocks: usize,
}

/// Editor for one hosts file.
///
/// # Lifecycle
///
/// 1. [`apply`](Self::apply) backs up the file, replaces the managed block
///    and writes the result in one overwrite.
/// 2. [`managed_entries`](Self::managed_entries) reads the block back.
/// 3. [`remove`](Self::remove) drops the block, leaving the rest intact.
///
/// # Permissions
///
/// The system hosts file is writable only by an administrator. The caller
/// must handle elevation.
pub struct HostsFile {
    path: PathBuf,
}

impl HostsFile {
    /// Targets the platform hosts file.
    #[must_use]
    pub fn new() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_HOSTS_PATH),
        }
    }

    /// Targets a custom file (useful for testing).
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the hosts file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copies the hosts file to `<name>.bak.<timestamp>` next to it.
    ///
    /// An existing backup is never overwritten: a numeric suffix is added
    /// until the name is free.
    ///
    /// # Errors
    ///
    /// Returns [`DoctorError::Io`] if the copy fails.
    pub fn backup(&self) -> Result<PathBuf> {
        self.backup_at(util::now())
    }

    fn backup_at(&self, at: OffsetDateTime) -> Result<PathBuf> {
        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "hosts".into(), |n| n.to_string_lossy().into_owned());
        let stem = format!("{file_name}{BACKUP_SUFFIX}{}", util::compact_timestamp(at));

        let mut candidate = self.path.with_file_name(&stem);
        let mut n = 0u32;
        while candidate.exists() {
            n += 1;
            candidate = self.path.with_file_name(format!("{stem}.{n}"));
        }

        std::fs::copy(&self.path, &candidate)?;
        tracing::info!(backup = %candidate.display(), "Backed up hosts file");
        Ok(candidate)
    }

    /// Replaces the managed block with `mappings`.
    ///
    /// A backup is taken first; a failed backup is logged and the edit goes
    /// ahead. The new content is written in a single overwrite, without a
    /// byte-order mark.
    ///
    /// # Errors
    ///
    /// Returns [`DoctorError::HostsRead`] if the file cannot be read and
    /// [`DoctorError::HostsWrite`] if it cannot be written.
    pub fn apply(&self, mappings: &[Mapping]) -> Result<Applied> {
        self.apply_at(mappings, util::now())
    }

    /// [`apply`](Self::apply) with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// See [`apply`](Self::apply).
    pub fn apply_at(&self, mappings: &[Mapping], at: OffsetDateTime) -> Result<Applied> {
        let backup = self.try_backup(at);
        let content = self.read()?;
        let edited = rewrite(&content, mappings, at);
        self.write(&edited.bytes)?;

        tracing::info!(
            path = %self.path.display(),
            entries = mappings.len(),
            replaced = edited.replaced_blocks,
            "Wrote managed hosts block"
        );
        Ok(Applied {
            backup,
            replaced_blocks: edited.replaced_blocks,
        })
    }

    /// Returns the text `apply` would append, without touching the disk.
    ///
    /// # Errors
    ///
    /// Returns [`DoctorError::HostsRead`] if the file cannot be read, since
    /// the newline style is taken from it.
    pub fn preview(&self, mappings: &[Mapping]) -> Result<String> {
        let content = self.read()?;
        Ok(render_block(mappings, util::now(), newline_of(&content)))
    }

    /// Removes the managed block.
    ///
    /// Returns `false` (and writes nothing) if there was no block.
    ///
    /// # Errors
    ///
    /// Returns [`DoctorError::HostsRead`] or [`DoctorError::HostsWrite`].
    pub fn remove(&self) -> Result<bool> {
        let content = self.read()?;
        let stripped = strip_managed(body(&content));
        if stripped.blocks == 0 && stripped.stray_markers == 0 {
            tracing::debug!(path = %self.path.display(), "No managed block, skipping");
            return Ok(false);
        }

        self.try_backup(util::now());
        self.write(&stripped.kept.concat())?;
        tracing::info!(path = %self.path.display(), "Removed managed hosts block");
        Ok(true)
    }

    /// `true` if the file holds a managed block or a stray marker, i.e. if
    /// [`remove`](Self::remove) would write.
    ///
    /// # Errors
    ///
    /// Returns [`DoctorError::HostsRead`] if the file cannot be read.
    pub fn has_managed_block(&self) -> Result<bool> {
        let content = self.read()?;
        let stripped = strip_managed(body(&content));
        Ok(stripped.blocks > 0 || stripped.stray_markers > 0)
    }

    /// Lists the mappings inside the managed block(s).
    ///
    /// # Errors
    ///
    /// Returns [`DoctorError::HostsRead`] if the file cannot be read.
    pub fn managed_entries(&self) -> Result<Vec<Mapping>> {
        let content = self.read()?;
        Ok(strip_managed(body(&content)).entries)
    }

    fn try_backup(&self, at: OffsetDateTime) -> Option<PathBuf> {
        match self.backup_at(at) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to back up hosts file, continuing without a backup"
                );
                None
            }
        }
    }

    fn read(&self) -> Result<Vec<u8>> {
        std::fs::read(&self.path).map_err(|source| DoctorError::HostsRead {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        std::fs::write(&self.path, bytes).map_err(|source| DoctorError::HostsWrite {
            path: self.path.clone(),
            source,
        })
    }
}

impl Default for HostsFile {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Content helpers
// ---------------------------------------------------------------------------

struct Edited {
    bytes: Vec<u8>,
    replaced_blocks: usize,
}

/// Lines surviving block removal, plus what was found inside the blocks.
struct Stripped<'a> {
    kept: Vec<&'a [u8]>,
    entries: Vec<Mapping>,
    blocks: usize,
    stray_markers: usize,
}

fn rewrite(content: &[u8], mappings: &[Mapping], at: OffsetDateTime) -> Edited {
    let newline = newline_of(content);
    let stripped = strip_managed(body(content));

    let mut bytes = stripped.kept.concat();
    if bytes.last().is_some_and(|b| *b != b'\n') {
        bytes.extend_from_slice(newline.as_bytes());
    }
    bytes.extend_from_slice(render_block(mappings, at, newline).as_bytes());

    Edited {
        bytes,
        replaced_blocks: stripped.blocks,
    }
}

/// Content without a leading UTF-8 byte-order mark.
fn body(content: &[u8]) -> &[u8] {
    content.strip_prefix(UTF8_BOM).unwrap_or(content)
}

fn newline_of(content: &[u8]) -> &'static str {
    if content.windows(2).any(|w| w == b"\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

fn is_marker(line: &[u8], marker: &str) -> bool {
    line.trim_ascii() == marker.as_bytes()
}

/// Drops every `BLOCK_START`..`BLOCK_END` region.
///
/// A start marker with no matching end, or an end marker with no start, is
/// dropped on its own; the lines around it are kept.
fn strip_managed(content: &[u8]) -> Stripped<'_> {
    let mut kept = Vec::new();
    let mut entries = Vec::new();
    let mut blocks = 0;
    let mut stray_markers = 0;
    let mut open: Option<Vec<&[u8]>> = None;

    for line in content.split_inclusive(|b| *b == b'\n') {
        let start = is_marker(line, BLOCK_START);
        let end = is_marker(line, BLOCK_END);

        match open.take() {
            None if start => open = Some(Vec::new()),
            None if end => {
                tracing::warn!("Dropping end marker without a start marker");
                stray_markers += 1;
            }
            None => kept.push(line),
            Some(inner) if end => {
                entries.extend(inner.into_iter().filter_map(parse_entry));
                blocks += 1;
            }
            Some(inner) if start => {
                tracing::warn!("Dropping start marker without an end marker");
                stray_markers += 1;
                kept.extend(inner);
                open = Some(Vec::new());
            }
            Some(mut inner) => {
                inner.push(line);
                open = Some(inner);
            }
        }
    }

    if let Some(inner) = open {
        tracing::warn!("Dropping start marker without an end marker");
        stray_markers += 1;
        kept.extend(inner);
    }

    Stripped {
        kept,
        entries,
        blocks,
        stray_markers,
    }
}

fn parse_entry(line: &[u8]) -> Option<Mapping> {
    let line = std::str::from_utf8(line).ok()?.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut fields = line.split_whitespace();
    let address = fields.next()?.parse().ok()?;
    let domain = fields.next()?;
    Some(Mapping::new(domain, address))
}

/// Renders the managed block.
///
/// ```text
/// # GitHub Hosts Start
/// # Updated: 2026-10-18 15:30:12
/// 140.82.112.3	github.com
/// # GitHub Hosts End
/// ```
fn render_block(mappings: &[Mapping], at: OffsetDateTime, newline: &str) -> String {
    let mut out = format!(
        "{BLOCK_START}{newline}# Updated: {}{newline}",
        util::display_timestamp(at)
    );
    out.extend(
        mappings
            .iter()
            .map(|m| format!("{}\t{}{newline}", m.address, m.domain)),
    );
    out.push_str(BLOCK_END);
    out.push_str(newline);
    out
}
