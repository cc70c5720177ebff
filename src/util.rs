//! Internal utilities.

use time::OffsetDateTime;
use time::macros::format_description;

/// Returns `true` if the process runs with administrative privileges.
///
/// On Unix this is `geteuid() == 0`. Elsewhere the answer is unknown and
/// `true` is returned so callers simply attempt the write.
#[must_use]
pub fn is_elevated() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: `geteuid` has no preconditions and cannot fail.
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Current wall-clock time in the local offset, UTC if that is unknown.
#[must_use]
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// `20261018-153012`, used in backup file names.
#[must_use]
pub fn compact_timestamp(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[year][month][day]-[hour][minute][second]"
    ))
    .unwrap_or_else(|_| at.unix_timestamp().to_string())
}

/// `2026-10-18 15:30:12`, used in the managed block header.
#[must_use]
pub fn display_timestamp(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| at.unix_timestamp().to_string())
}
