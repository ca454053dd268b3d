//! Process hardening while decrypted keys are held in memory
//!
//! A crash during recovery must not write user or backup private keys to a
//! core file. Disabling core dumps is best effort: failures are logged and
//! recovery continues, since containers and unprivileged users may not be
//! allowed to change resource limits.

use std::sync::atomic::{AtomicBool, Ordering};

static CORE_DUMPS_DISABLED: AtomicBool = AtomicBool::new(false);

/// Disable core dumps for the current process.
///
/// Returns `true` if core dumps are disabled after the call. Only the first
/// call does any work.
pub fn disable_core_dumps() -> bool {
    if CORE_DUMPS_DISABLED.swap(true, Ordering::SeqCst) {
        return true;
    }

    #[cfg(unix)]
    {
        unix::set_core_limit_zero()
    }

    #[cfg(not(unix))]
    {
        log::warn!("Core dump prevention is not supported on this platform");
        false
    }
}

#[cfg(unix)]
mod unix {
    pub fn set_core_limit_zero() -> bool {
        let rlim = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: setrlimit only reads the struct we pass by reference
        let result = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &rlim) };
        if result != 0 {
            log::warn!(
                "Failed to disable core dumps: {}",
                std::io::Error::last_os_error()
            );
            return false;
        }
        true
    }
}
