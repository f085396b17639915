//! Raw memory-management system calls.
//!
//! These never go through the libc `madvise`/`mprotect` symbols, so they keep
//! working after those entry points have been patched.

use std::io;

use crate::types::{Protection, Region};

#[cfg(target_os = "linux")]
mod imp {
    use super::*;

    #[inline]
    unsafe fn syscall3(nr: libc::c_long, a0: usize, a1: usize, a2: libc::c_int) -> io::Result<()> {
        let rc = libc::syscall(nr, a0 as libc::c_long, a1 as libc::c_long, a2 as libc::c_long);
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub unsafe fn madvise(region: Region, advice: libc::c_int) -> io::Result<()> {
        syscall3(libc::SYS_madvise, region.addr, region.len, advice)
    }

    pub unsafe fn mprotect(region: Region, prot: libc::c_int) -> io::Result<()> {
        syscall3(libc::SYS_mprotect, region.addr, region.len, prot)
    }

    pub fn set_errno(code: i32) {
        unsafe { *libc::__errno_location() = code };
    }
}

#[cfg(target_os = "macos")]
mod imp {
    use super::*;

    const SYS_MPROTECT: usize = 74;
    const SYS_MADVISE: usize = 75;

    #[cfg(target_arch = "x86_64")]
    unsafe fn syscall3(nr: usize, a0: usize, a1: usize, a2: usize) -> Result<usize, i32> {
        // BSD syscalls live in class 2 on x86_64.
        const SYSCALL_CLASS_UNIX: usize = 0x200_0000;
        let ret: usize;
        let failed: u8;
        core::arch::asm!(
            "syscall",
            "setc {failed}",
            failed = out(reg_byte) failed,
            inlateout("rax") nr | SYSCALL_CLASS_UNIX => ret,
            in("rdi") a0,
            in("rsi") a1,
            inlateout("rdx") a2 => _,
            out("rcx") _,
            out("r11") _,
            options(nostack),
        );
        if failed != 0 {
            Err(ret as i32)
        } else {
            Ok(ret)
        }
    }

    #[cfg(target_arch = "aarch64")]
    unsafe fn syscall3(nr: usize, a0: usize, a1: usize, a2: usize) -> Result<usize, i32> {
        let ret: usize;
        let failed: u64;
        core::arch::asm!(
            "svc 0x80",
            "cset {failed}, cs",
            failed = out(reg) failed,
            inlateout("x0") a0 => ret,
            inlateout("x1") a1 => _,
            in("x2") a2,
            in("x16") nr,
            options(nostack),
        );
        if failed != 0 {
            Err(ret as i32)
        } else {
            Ok(ret)
        }
    }

    #[inline]
    fn check(r: Result<usize, i32>) -> io::Result<()> {
        r.map(|_| ()).map_err(io::Error::from_raw_os_error)
    }

    pub unsafe fn madvise(region: Region, advice: libc::c_int) -> io::Result<()> {
        check(syscall3(SYS_MADVISE, region.addr, region.len, advice as usize))
    }

    pub unsafe fn mprotect(region: Region, prot: libc::c_int) -> io::Result<()> {
        check(syscall3(SYS_MPROTECT, region.addr, region.len, prot as usize))
    }

    pub fn set_errno(code: i32) {
        unsafe { *libc::__error() = code };
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod imp {
    use super::*;

    pub unsafe fn madvise(_region: Region, _advice: libc::c_int) -> io::Result<()> {
        Err(io::ErrorKind::Unsupported.into())
    }

    pub unsafe fn mprotect(_region: Region, _prot: libc::c_int) -> io::Result<()> {
        Err(io::ErrorKind::Unsupported.into())
    }

    pub fn set_errno(_code: i32) {}
}

/// `madvise(2)` issued directly to the kernel.
///
/// # Safety
/// `region` must describe memory the caller is entitled to advise on.
#[inline]
pub unsafe fn raw_madvise(region: Region, advice: libc::c_int) -> io::Result<()> {
    imp::madvise(region, advice)
}

/// `mprotect(2)` issued directly to the kernel.
///
/// # Safety
/// Revoking access to memory that other code is still using will fault it.
#[inline]
pub unsafe fn raw_mprotect(region: Region, prot: Protection) -> io::Result<()> {
    imp::mprotect(region, prot.as_prot())
}

/// Store `code` in the calling thread's `errno`.
#[inline]
pub fn set_errno(code: i32) {
    imp::set_errno(code)
}
