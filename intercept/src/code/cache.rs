use crate::types::Region;

#[cfg(target_os = "macos")]
extern "C" {
    fn sys_icache_invalidate(addr: *mut core::ffi::c_void, size: usize);
    fn sys_dcache_flush(addr: *mut core::ffi::c_void, size: usize);
}

/// Make freshly written instructions in `region` visible to instruction fetch.
///
/// x86_64 keeps its instruction cache coherent with stores, so this only does
/// work on AArch64 (and unconditionally on macOS, where libSystem picks the
/// right primitive).
///
/// # Safety
/// `region` must be mapped.
#[inline]
pub unsafe fn flush_code(region: Region) {
    #[cfg(target_os = "macos")]
    {
        sys_dcache_flush(region.as_mut_ptr(), region.len);
        sys_icache_invalidate(region.as_mut_ptr(), region.len);
    }

    #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
    {
        extern "C" {
            fn __clear_cache(beg: *mut libc::c_void, end: *mut libc::c_void);
        }
        __clear_cache(region.as_mut_ptr(), region.end() as *mut libc::c_void);
    }

    #[cfg(not(any(target_os = "macos", all(target_os = "linux", target_arch = "aarch64"))))]
    {
        let _ = region;
    }
}
