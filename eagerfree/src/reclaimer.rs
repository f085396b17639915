use std::io;

use eagerfree_intercept::sys::{raw_madvise, raw_mprotect};
use eagerfree_intercept::{Protection, Region};

/// The two kernel operations the intercept routine is built from.
///
/// Methods take no receiver so that a monomorphized
/// [`crate::hook::intercept`] is a plain `extern "C"` function with no
/// captured state, suitable as a redirect target.
pub trait Reclaimer {
    /// Advise the kernel about `region`, exactly as `madvise(2)` would.
    ///
    /// # Safety
    /// See `madvise(2)`.
    unsafe fn advise(region: Region, advice: libc::c_int) -> io::Result<()>;

    /// Change the protection of `region`, exactly as `mprotect(2)` would.
    ///
    /// # Safety
    /// See `mprotect(2)`.
    unsafe fn protect(region: Region, prot: Protection) -> io::Result<()>;
}

/// Direct system calls. Never re-enters the patched libc `madvise`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyscallReclaimer;

impl Reclaimer for SyscallReclaimer {
    #[inline]
    unsafe fn advise(region: Region, advice: libc::c_int) -> io::Result<()> {
        raw_madvise(region, advice)
    }

    #[inline]
    unsafe fn protect(region: Region, prot: Protection) -> io::Result<()> {
        raw_mprotect(region, prot)
    }
}
