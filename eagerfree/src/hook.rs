//! The intercept routine that replaces the process's `madvise`.

use core::ffi::c_void;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use eagerfree_intercept::sys::set_errno;
use eagerfree_intercept::{Protection, Region};

use crate::config::FailurePolicy;
use crate::reclaimer::Reclaimer;

/// The advice value the kernel is free to act on lazily.
pub const LAZY_FREE: libc::c_int = libc::MADV_FREE;

/// C signature shared by `madvise` and [`intercept`].
pub type AdviseFn = unsafe extern "C" fn(*mut c_void, libc::size_t, libc::c_int) -> libc::c_int;

static POLICY: AtomicU8 = AtomicU8::new(FailurePolicy::Count as u8);
static INTERCEPTED: AtomicU64 = AtomicU64::new(0);
static CORRECTED: AtomicU64 = AtomicU64::new(0);
static FAILURES: AtomicU64 = AtomicU64::new(0);

/// Counters maintained by the intercept routine since process start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Calls that entered the routine.
    pub intercepted: u64,
    /// Lazy-free calls whose revoke/restore pair both succeeded.
    pub corrected: u64,
    /// Failed corrective calls (unless the policy is `Ignore`).
    pub failures: u64,
}

pub fn stats() -> Stats {
    Stats {
        intercepted: INTERCEPTED.load(Ordering::Relaxed),
        corrected: CORRECTED.load(Ordering::Relaxed),
        failures: FAILURES.load(Ordering::Relaxed),
    }
}

pub fn set_failure_policy(policy: FailurePolicy) {
    POLICY.store(policy as u8, Ordering::Relaxed);
}

pub fn failure_policy() -> FailurePolicy {
    FailurePolicy::from_u8(POLICY.load(Ordering::Relaxed))
}

fn record_failure(region: Region, prot: Protection, err: &io::Error) {
    match failure_policy() {
        FailurePolicy::Ignore => {}
        FailurePolicy::Count => {
            FAILURES.fetch_add(1, Ordering::Relaxed);
        }
        FailurePolicy::Log => {
            FAILURES.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "mprotect({:#x}, {:#x}, {:?}) after lazy free failed: {}",
                region.addr,
                region.len,
                prot,
                err
            );
        }
    }
}

/// Revoke then restore access to `region`, which makes the kernel drop the
/// pages a lazy free left resident.
///
/// Restore is attempted even when revoke failed so the region never stays
/// inaccessible.
fn force_release<R: Reclaimer>(region: Region) {
    let mut ok = true;
    for prot in [Protection::None, Protection::ReadWrite] {
        if let Err(e) = unsafe { R::protect(region, prot) } {
            record_failure(region, prot, &e);
            ok = false;
        }
    }
    if ok {
        CORRECTED.fetch_add(1, Ordering::Relaxed);
    }
}

/// Drop-in replacement for `madvise`.
///
/// Performs the real advice call with the caller's arguments first. For
/// [`LAZY_FREE`] it then forces the release through [`force_release`]. The
/// result of the advice call is returned with `madvise` semantics: `0`, or
/// `-1` with `errno` set. Corrective failures never reach the caller.
///
/// # Safety
/// Same contract as `madvise(2)`.
pub unsafe extern "C" fn intercept<R: Reclaimer>(
    addr: *mut c_void,
    len: libc::size_t,
    advice: libc::c_int,
) -> libc::c_int {
    INTERCEPTED.fetch_add(1, Ordering::Relaxed);
    let region = Region::new(addr as usize, len);

    let advised = R::advise(region, advice);
    if advice == LAZY_FREE {
        force_release::<R>(region);
    }

    match advised {
        Ok(()) => 0,
        Err(e) => {
            // Set last: the corrective calls may have overwritten errno.
            set_errno(e.raw_os_error().unwrap_or(libc::EINVAL));
            -1
        }
    }
}
