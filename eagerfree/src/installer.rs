//! One-shot installation of the redirect over `madvise`.
//!
//! Only `madvise` can be patched from outside this crate:
//!
//! ```compile_fail
//! let _ = eagerfree::installer::install_target::<eagerfree::SyscallReclaimer>;
//! ```

use std::sync::{Mutex, OnceLock};

use eagerfree_intercept::module::{resolve_function, strip_code_ptr, symbol_at};
use eagerfree_intercept::page::{page_of, page_size};
use eagerfree_intercept::{patch_code, redirect_to, PatchError, MAX_REDIRECT_LEN};

use crate::hook::{intercept, AdviseFn};
use crate::reclaimer::{Reclaimer, SyscallReclaimer};

/// An exported function to redirect, identified by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PatchTarget {
    pub symbol: &'static str,
}

impl PatchTarget {
    pub const MADVISE: PatchTarget = PatchTarget { symbol: "madvise" };
}

/// Where a redirect was written and where it leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchedFunction {
    pub entry: usize,
    /// First page of the patched range.
    pub page: usize,
    pub routine: usize,
    pub redirect_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchState {
    Unpatched,
    Patched(PatchedFunction),
}

static PATCHED: OnceLock<PatchedFunction> = OnceLock::new();
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

/// Reject a patch site where another symbol begins inside `entry..entry + len`.
///
/// `next` is the start of the nearest symbol at or below the last patched
/// byte. Symbol tables only list exports, so this catches an adjacent exported
/// function but not a local one.
fn check_site(entry: usize, len: usize, next: Option<usize>) -> Result<(), PatchError> {
    match next {
        Some(next) if next > entry && next < entry + len => Err(PatchError::SiteTooSmall {
            addr: entry,
            room: next - entry,
            needed: len,
        }),
        _ => Ok(()),
    }
}

fn check_patch_site(entry: usize, len: usize) -> Result<(), PatchError> {
    let next = symbol_at(entry + len - 1)
        .filter(|info| info.symbol.is_some())
        .map(|info| info.symbol_address);
    check_site(entry, len, next)
}

/// Overwrite the start of the function at `entry` with a redirect to `routine`.
///
/// # Safety
/// `entry` must be the entry point of a function at least as long as the
/// redirect, and no thread may be executing it while it is rewritten.
pub(crate) unsafe fn install_at(
    entry: usize,
    routine: AdviseFn,
) -> Result<PatchedFunction, PatchError> {
    let entry = strip_code_ptr(entry);
    let routine = strip_code_ptr(routine as usize);

    let redirect = redirect_to(routine as u64)?;
    if redirect.len() > MAX_REDIRECT_LEN {
        return Err(PatchError::TooLarge {
            len: redirect.len(),
            max: MAX_REDIRECT_LEN,
        });
    }
    check_patch_site(entry, redirect.len())?;

    patch_code(entry as *mut u8, redirect.as_bytes())?;

    let patched = PatchedFunction {
        entry,
        page: page_of(entry, page_size()),
        routine,
        redirect_len: redirect.len(),
    };
    log::debug!(
        "redirected 0x{:x} to 0x{:x} ({} bytes)",
        patched.entry,
        patched.routine,
        patched.redirect_len
    );
    Ok(patched)
}

/// Resolve `target` in the running process and redirect it to
/// [`intercept::<R>`](intercept).
pub(crate) fn install_target<R: Reclaimer>(target: PatchTarget) -> Result<PatchedFunction, PatchError> {
    let entry = resolve_function(target.symbol)?;
    unsafe { install_at(entry, intercept::<R>) }
}

/// Redirect the process's `madvise` to the intercept routine.
///
/// Runs at most once. Later calls return the recorded patch without touching
/// code again.
pub fn install() -> Result<PatchedFunction, PatchError> {
    if let Some(p) = PATCHED.get() {
        return Ok(*p);
    }
    let _guard = INSTALL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(p) = PATCHED.get() {
        return Ok(*p);
    }

    let patched = install_target::<SyscallReclaimer>(PatchTarget::MADVISE)?;
    let _ = PATCHED.set(patched);
    log::info!("madvise patched at 0x{:x}", patched.entry);
    Ok(patched)
}

pub fn state() -> PatchState {
    match PATCHED.get() {
        Some(p) => PatchState::Patched(*p),
        None => PatchState::Unpatched,
    }
}

/// Unwrap an install result, terminating the process on failure.
///
/// Used from the load-time constructor where there is no caller to return to.
#[cfg_attr(not(feature = "auto-install"), allow(dead_code))]
pub(crate) fn abort_on_error<T>(result: Result<T, PatchError>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            eprintln!("eagerfree: {e}");
            log::error!("install failed: {e}");
            std::process::abort()
        }
    }
}
