//! OS DNS cache flush.

use std::process::Command;

use crate::error::{DoctorError, Result};

/// Makes freshly written hosts entries visible without a reboot.
pub trait FlushDns {
    /// Flushes the resolver cache.
    ///
    /// # Errors
    ///
    /// Returns an error if no flush command succeeded.
    fn flush(&self) -> Result<()>;
}

/// Runs the platform's cache-flush command(s).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemFlusher;

/// Commands tried in order; the first success wins unless `all` is set.
struct FlushPlan {
    commands: &'static [&'static [&'static str]],
    all: bool,
}

#[cfg(windows)]
const PLAN: FlushPlan = FlushPlan {
    commands: &[&["ipconfig", "/flushdns"]],
    all: false,
};

#[cfg(target_os = "macos")]
const PLAN: FlushPlan = FlushPlan {
    commands: &[
        &["dscacheutil", "-flushcache"],
        &["killall", "-HUP", "mDNSResponder"],
    ],
    all: true,
};

#[cfg(not(any(windows, target_os = "macos")))]
const PLAN: FlushPlan = FlushPlan {
    commands: &[
        &["resolvectl", "flush-caches"],
        &["systemd-resolve", "--flush-caches"],
    ],
    all: false,
};

impl FlushDns for SystemFlusher {
    fn flush(&self) -> Result<()> {
        let mut flushed = false;
        for argv in PLAN.commands {
            if run(argv) {
                flushed = true;
                if !PLAN.all {
                    break;
                }
            }
        }

        if flushed {
            tracing::info!("Flushed DNS cache");
            Ok(())
        } else {
            Err(DoctorError::Io(std::io::Error::other(
                "no DNS cache flush command succeeded",
            )))
        }
    }
}

fn run(argv: &[&str]) -> bool {
    let Some((program, args)) = argv.split_first() else {
        return false;
    };
    match Command::new(program).args(args).output() {
        Ok(out) if out.status.success() => true,
        Ok(out) => {
            tracing::debug!(
                program = %program,
                status = %out.status,
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "Flush command failed"
            );
            false
        }
        Err(e) => {
            tracing::debug!(program = %program, error = %e, "Flush command unavailable");
            false
        }
    }
}
