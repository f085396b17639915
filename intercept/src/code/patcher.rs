use crate::code::cache::flush_code;
use crate::page::{page_size, page_span};
use crate::types::{PatchError, Protection, Region};

#[inline]
fn debug_enabled() -> bool {
    std::env::var_os("EAGERFREE_DEBUG").is_some()
}

#[cfg(target_os = "macos")]
mod darwin {
    use super::*;
    use std::io;

    use mach2::boolean::boolean_t;
    use mach2::kern_return::KERN_SUCCESS;
    use mach2::traps::mach_task_self;
    use mach2::vm::mach_vm_protect;
    use mach2::vm_prot::{vm_prot_t, VM_PROT_COPY, VM_PROT_EXECUTE, VM_PROT_READ, VM_PROT_WRITE};
    use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t};

    const FALSE: boolean_t = 0;

    fn vm_prot(prot: Protection) -> vm_prot_t {
        match prot {
            Protection::None => 0,
            Protection::ReadWrite => VM_PROT_READ | VM_PROT_WRITE,
            Protection::ReadExec => VM_PROT_READ | VM_PROT_EXECUTE,
            // Shared-cache text is mapped shared; COPY gives this task a
            // private writable copy instead of failing against max_prot.
            Protection::ReadWriteExec => VM_PROT_READ | VM_PROT_WRITE | VM_PROT_EXECUTE | VM_PROT_COPY,
        }
    }

    pub unsafe fn protect(span: Region, prot: Protection) -> Result<(), PatchError> {
        let kr = mach_vm_protect(
            mach_task_self(),
            span.addr as mach_vm_address_t,
            span.len as mach_vm_size_t,
            FALSE,
            vm_prot(prot),
        );
        if kr != KERN_SUCCESS {
            if debug_enabled() {
                eprintln!(
                    "[eagerfree] patcher: mach_vm_protect {:?} failed kr={} page=0x{:x} size=0x{:x}",
                    prot, kr, span.addr, span.len
                );
            }
            return Err(PatchError::Protect {
                addr: span.addr,
                len: span.len,
                prot,
                source: io::Error::other(format!("mach_vm_protect returned {kr}")),
            });
        }
        Ok(())
    }
}

#[cfg(not(target_os = "macos"))]
mod generic {
    use super::*;
    use crate::sys::raw_mprotect;

    pub unsafe fn protect(span: Region, prot: Protection) -> Result<(), PatchError> {
        raw_mprotect(span, prot).map_err(|source| {
            if debug_enabled() {
                eprintln!(
                    "[eagerfree] patcher: mprotect {:?} failed ({}) page=0x{:x} size=0x{:x}",
                    prot, source, span.addr, span.len
                );
            }
            PatchError::Protect {
                addr: span.addr,
                len: span.len,
                prot,
                source,
            }
        })
    }
}

#[cfg(target_os = "macos")]
use darwin::protect;
#[cfg(not(target_os = "macos"))]
use generic::protect;

/// Overwrite the code at `addr` with `bytes`.
///
/// The pages covering the range are made read+write+execute (so code elsewhere
/// on the same page keeps running), the bytes are stored one at a time in
/// order, the instruction cache is synchronized, and the pages go back to
/// read+execute. A failure to restore is reported even though the new bytes
/// are already live.
///
/// # Safety
/// `addr` must point to at least `bytes.len()` bytes of mapped code that no
/// other thread is executing or patching while this runs.
pub unsafe fn patch_code(addr: *mut u8, bytes: &[u8]) -> Result<(), PatchError> {
    if bytes.is_empty() {
        return Ok(());
    }

    let span = page_span(addr as usize, bytes.len(), page_size());
    log::debug!(
        "patching {} bytes at {:p} (pages 0x{:x}+0x{:x})",
        bytes.len(),
        addr,
        span.addr,
        span.len
    );

    protect(span, Protection::ReadWriteExec)?;

    for (i, b) in bytes.iter().enumerate() {
        core::ptr::write_volatile(addr.add(i), *b);
    }
    flush_code(Region::new(addr as usize, bytes.len()));

    protect(span, Protection::ReadExec)?;

    if debug_enabled() {
        eprintln!("[eagerfree] patcher: wrote {} bytes at {:p}", bytes.len(), addr);
    }
    Ok(())
}

#[cfg(all(test, any(target_os = "linux", target_os = "macos")))]
mod tests {
    use super::*;
    use crate::code::allocator::CodeAllocator;

    #[test]
    #[cfg(target_arch = "x86_64")]
    fn patcher_can_modify_executable_page() {
        let _g = crate::lock_hook_tests();
        let alloc = CodeAllocator::default();
        let slice = alloc.alloc_any().expect("alloc");

        unsafe {
            // mov eax, 1; ret
            slice.data.copy_from_nonoverlapping([0xB8, 0x01, 0x00, 0x00, 0x00, 0xC3].as_ptr(), 6);
            alloc.make_executable(&slice).expect("rx");

            let f: extern "C" fn() -> u32 = core::mem::transmute(slice.pc);
            assert_eq!(f(), 1);

            // mov eax, 2
            patch_code(slice.data.add(1), &[0x02]).expect("patch");
            assert_eq!(f(), 2);
        }
    }

    #[test]
    #[cfg(target_arch = "aarch64")]
    fn patcher_can_modify_executable_page() {
        let _g = crate::lock_hook_tests();
        let alloc = CodeAllocator::default();
        let slice = alloc.alloc_any().expect("alloc");

        unsafe {
            // movz w0, #1; ret
            (slice.data as *mut u32).write(0x5280_0020);
            (slice.data.add(4) as *mut u32).write(0xD65F_03C0);
            alloc.make_executable(&slice).expect("rx");

            let f: extern "C" fn() -> u32 = core::mem::transmute(slice.pc);
            assert_eq!(f(), 1);

            // movz w0, #2
            patch_code(slice.data, &0x5280_0040u32.to_le_bytes()).expect("patch");
            assert_eq!(f(), 2);
        }
    }

    /// Verify patch_code writes are visible when reading back the original address.
    #[test]
    fn patch_code_writes_are_visible_at_original_address() {
        let _g = crate::lock_hook_tests();
        let alloc = CodeAllocator::default();
        let slice = alloc.alloc_any().expect("alloc");

        unsafe {
            core::ptr::write_bytes(slice.data, 0xCC, 32);
            alloc.make_executable(&slice).expect("rx");

            let marker = [0x11u8, 0x22, 0x33, 0x44, 0x55];
            patch_code(slice.data.add(3), &marker).expect("patch");

            let after = core::ptr::read_unaligned(slice.data as *const [u8; 10]);
            assert_eq!(after, [0xCC, 0xCC, 0xCC, 0x11, 0x22, 0x33, 0x44, 0x55, 0xCC, 0xCC]);
        }
    }

    #[test]
    fn patch_across_page_boundary_rewrites_both_pages() {
        let _g = crate::lock_hook_tests();
        let page = page_size();
        let alloc = CodeAllocator::new(2 * page);
        let slice = alloc.alloc_any().expect("alloc");

        unsafe {
            core::ptr::write_bytes(slice.data, 0xCC, slice.size);
            alloc.make_executable(&slice).expect("rx");

            let at = slice.data.add(page - 4);
            let bytes = [0xAAu8; 8];
            patch_code(at, &bytes).expect("patch");
            assert_eq!(core::ptr::read_unaligned(at as *const [u8; 8]), bytes);
        }
    }

    #[test]
    fn empty_patch_is_a_no_op() {
        unsafe {
            patch_code(core::ptr::null_mut(), &[]).expect("nothing to do");
        }
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn protection_failure_is_reported() {
        // The zero page is never mapped, so mprotect fails with ENOMEM.
        unsafe {
            let err = patch_code(8 as *mut u8, &[0xC3]).unwrap_err();
            match err {
                PatchError::Protect { addr, prot, source, .. } => {
                    assert_eq!(addr, 0);
                    assert_eq!(prot, Protection::ReadWriteExec);
                    assert_eq!(source.raw_os_error(), Some(libc::ENOMEM));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }
}
