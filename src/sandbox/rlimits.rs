/*!
 * Kernel Resource Limiting
 * Per-OS first line of defense applied before spawn; the polling monitor
 * remains the authoritative, portable enforcement mechanism
 */

use super::types::ExecLimits;
use std::process::Command;

/// Pre-spawn containment seam. Implementations configure the command so the
/// kernel bounds the child even if the user-space monitor lags or dies.
pub trait ResourceLimiter: Send + Sync {
    fn prepare(&self, cmd: &mut Command, limits: &ExecLimits);
}

/// Platform limiter: POSIX rlimits in a pre-exec hook plus a dedicated
/// process group on Unix, a new process group on Windows, no-op elsewhere.
#[derive(Debug, Default, Clone)]
pub struct KernelLimiter;

impl KernelLimiter {
    pub fn new() -> Self {
        Self
    }
}

impl ResourceLimiter for KernelLimiter {
    #[cfg(unix)]
    fn prepare(&self, cmd: &mut Command, limits: &ExecLimits) {
        use std::os::unix::process::CommandExt;

        // Own process group so the monitor can signal the whole tree at once
        cmd.process_group(0);

        if limits.cpu_time.is_some() || limits.max_rss_mb.is_some() {
            let limits = limits.clone();
            // Safety: apply_rlimits only calls setrlimit, which is
            // async-signal-safe
            unsafe {
                cmd.pre_exec(move || apply_rlimits(&limits));
            }
        }
    }

    #[cfg(windows)]
    fn prepare(&self, cmd: &mut Command, _limits: &ExecLimits) {
        use std::os::windows::process::CommandExt;

        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    #[cfg(not(any(unix, windows)))]
    fn prepare(&self, _cmd: &mut Command, _limits: &ExecLimits) {}
}

/// Kernel rlimits get headroom above the configured ceilings: the polling
/// monitor must win the race so kills carry a specific `killed_reason`, with
/// the rlimit as the hard backstop if the monitor dies.
#[cfg(unix)]
fn apply_rlimits(limits: &ExecLimits) -> std::io::Result<()> {
    use nix::sys::resource::{setrlimit, Resource};

    let errno = |e: nix::errno::Errno| std::io::Error::from_raw_os_error(e as i32);

    if let Some(cpu) = limits.cpu_time {
        let secs = cpu.as_secs().max(1).saturating_add(1);
        setrlimit(Resource::RLIMIT_CPU, secs, secs).map_err(errno)?;
    }

    if let Some(mb) = limits.max_rss_mb {
        // Address space is an indirect proxy for RSS; double it so mappings
        // that are never resident do not trip the backstop early
        let bytes = mb
            .saturating_mul(1024 * 1024)
            .saturating_mul(2)
            .saturating_add(64 * 1024 * 1024);
        if setrlimit(Resource::RLIMIT_AS, bytes, bytes).is_err() {
            let _ = setrlimit(Resource::RLIMIT_DATA, bytes, bytes);
        }
    }

    Ok(())
}
