//! eagerfree-intercept: in-process code patching primitives for eagerfree.
//!
//! Leaves first: page arithmetic ([`page`]), raw memory syscalls ([`sys`]),
//! instruction writers ([`arch`]) and redirect encoding ([`code::redirect`]),
//! the page-protecting patcher ([`code::patcher`]) and symbol lookup
//! ([`module`]).

pub mod arch;
pub mod code;
pub mod module;
pub mod page;
pub mod sys;
pub mod types;

pub use code::patcher::patch_code;
pub use code::redirect::{redirect_to, Redirect, MAX_REDIRECT_LEN};
pub use types::{PatchError, Protection, Region};

/// Process-global lock for tests that modify executable code.
///
/// Tests that patch or remap code pages must hold this lock so they never
/// race on a shared page.
#[cfg(test)]
pub(crate) fn lock_hook_tests() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
}
