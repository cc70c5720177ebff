//! Error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for doctor operations.
pub type Result<T> = std::result::Result<T, DoctorError>;

/// Errors returned by doctor operations.
#[derive(Debug, Error)]
pub enum DoctorError {
    /// Filesystem or socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The hosts file could not be read. Fatal: nothing is written.
    #[error("cannot read hosts file {}: {source}", path.display())]
    HostsRead {
        /// The hosts file path.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// The hosts file could not be written (typically `PermissionDenied`).
    #[error("cannot write hosts file {}: {source}", path.display())]
    HostsWrite {
        /// The hosts file path.
        path: PathBuf,
        /// The underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// A lookup returned no usable A record.
    #[error("DNS lookup for {domain} failed: {reason}")]
    Dns {
        /// The queried domain.
        domain: String,
        /// Human-readable cause (NXDOMAIN, empty answer, ...).
        reason: String,
    },

    /// A DNS message could not be encoded or decoded.
    #[error("DNS protocol error: {0}")]
    Protocol(#[from] hickory_proto::error::ProtoError),

    /// The configuration file is not valid TOML for [`Config`](crate::Config).
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Invalid configuration values.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A domain ended up with no candidate address at all.
    #[error("no candidate address for {domain}")]
    NoCandidates {
        /// The domain left without candidates.
        domain: String,
    },
}

impl DoctorError {
    /// Returns `true` if the underlying I/O error is `PermissionDenied`.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Self::Io(e) | Self::HostsRead { source: e, .. } | Self::HostsWrite { source: e, .. } => {
                e.kind() == std::io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }

    /// Returns `true` for failures of the final hosts-file write.
    #[must_use]
    pub const fn is_write_failure(&self) -> bool {
        matches!(self, Self::HostsWrite { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn permission_denied_is_detected_on_write() {
        let err = DoctorError::HostsWrite {
            path: PathBuf::from("/etc/hosts"),
            source: Error::from(ErrorKind::PermissionDenied),
        };
        assert!(err.is_permission_denied());
        assert!(err.is_write_failure());
        assert!(err.to_string().contains("/etc/hosts"));
    }

    #[test]
    fn other_errors_are_not_permission_denied() {
        let err = DoctorError::Dns {
            domain: "example.com".into(),
            reason: "NXDomain".into(),
        };
        assert!(!err.is_permission_denied());
        assert!(!DoctorError::Io(Error::from(ErrorKind::NotFound)).is_permission_denied());
    }
}
