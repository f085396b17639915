//! eagerfree: make `MADV_FREE` behave like an eager release.
//!
//! `MADV_FREE` lets the kernel reclaim pages whenever it likes, so resident
//! memory stays high until there is pressure. Linking this crate patches the
//! process's `madvise` at load time: every call still reaches the kernel
//! unchanged, and lazy-free calls are followed by revoking and restoring
//! access to the region.
//!
//! Only XNU (macOS) drops lazily-freed pages on that protection change. On
//! Linux the patch installs and runs the same way, but `mprotect` leaves
//! `MADV_FREE` pages resident, so resident memory does not drop. See
//! [`RELEASES_EAGERLY`].
//!
//! The patch is installed from a constructor when the default `auto-install`
//! feature is enabled. Without it, call [`install`].
//!
//! Caveats:
//! - The redirect on x86_64 returns through `ret`, which hardware shadow
//!   stacks reject.
//! - On macOS arm64, system library text may refuse to become writable; the
//!   install then fails like any other protection error.
//! - [`FailurePolicy::Log`] may allocate from inside `madvise`.

pub mod config;
pub mod hook;
pub mod installer;
pub mod reclaimer;

#[cfg(test)]
mod testing;

pub use config::{init_logging, Config, FailurePolicy};
pub use hook::{failure_policy, set_failure_policy, stats, Stats};
pub use installer::{install, state, PatchState, PatchedFunction};
pub use reclaimer::{Reclaimer, SyscallReclaimer};

/// Whether revoking and restoring access releases `MADV_FREE` pages on this
/// platform. False on Linux, where the patch has no effect on resident memory.
pub const RELEASES_EAGERLY: bool = cfg!(target_os = "macos");

/// Serializes tests that patch code or read the global counters.
#[cfg(test)]
pub(crate) fn lock_hook_tests() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}

/// Load-time entry point: logging, configuration, then the patch.
///
/// Runs before `main` on the loading thread. Any install error aborts.
#[cfg(all(
    feature = "auto-install",
    any(target_os = "linux", target_os = "macos"),
    not(test)
))]
extern "C" fn on_load() {
    init_logging();
    let config = Config::from_env();
    set_failure_policy(config.failure_policy);
    let patched = installer::abort_on_error(install());
    log::debug!("eagerfree active: {:?}", patched);
}

#[cfg(all(feature = "auto-install", target_os = "linux", not(test)))]
#[unsafe(link_section = ".init_array")]
#[used]
static INIT: extern "C" fn() = on_load;

#[cfg(all(feature = "auto-install", target_os = "macos", not(test)))]
#[unsafe(link_section = "__DATA,__mod_init_func")]
#[used]
static INIT: extern "C" fn() = on_load;
