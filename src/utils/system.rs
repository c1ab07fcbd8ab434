//! Process-level resource tuning

use tracing::{debug, warn};

/// Target soft limit for open file descriptors.
///
/// Every proxied request holds two sockets open for its lifetime, so the
/// default soft limit of 1024 drops connections under moderate load.
const TARGET_NOFILE_SOFT_LIMIT: u64 = 65535;

/// Raise the soft `RLIMIT_NOFILE` limit to at least 65535.
///
/// Failure is logged, not fatal; the operator can still raise the limit
/// with `ulimit -n`.
#[cfg(unix)]
pub fn raise_fd_limit() {
    use nix::sys::resource::{Resource, getrlimit, setrlimit};

    match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((soft, hard)) => {
            if soft >= TARGET_NOFILE_SOFT_LIMIT {
                debug!("File descriptor soft limit already at {soft}");
                return;
            }
            let target = TARGET_NOFILE_SOFT_LIMIT.min(hard);
            if let Err(e) = setrlimit(Resource::RLIMIT_NOFILE, target, hard) {
                warn!(
                    "Found fd soft limit {soft} and failed to raise it to {target}: {e}. \
                     This can cause 'Too many open files' errors under load; \
                     consider raising it with ulimit -n"
                );
            } else {
                debug!("Raised file descriptor soft limit from {soft} to {target}");
            }
        }
        Err(e) => warn!("Failed to read fd limits: {e}"),
    }
}

#[cfg(not(unix))]
pub fn raise_fd_limit() {}
