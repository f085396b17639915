use std::io;

use crate::code::cache::flush_code;
use crate::page::page_size;
use crate::types::{PatchError, Region};

/// A page-aligned block of memory for generated code.
///
/// Slices are never unmapped: code handed out may still be referenced by a
/// redirect after its owner is gone.
#[derive(Debug)]
pub struct CodeSlice {
    pub data: *mut u8,
    pub pc: *const u8,
    pub size: usize,
}

unsafe impl Send for CodeSlice {}
unsafe impl Sync for CodeSlice {}

impl CodeSlice {
    pub fn region(&self) -> Region {
        Region::new(self.data as usize, self.size)
    }
}

#[derive(Debug)]
pub struct CodeAllocator {
    slab_size: usize,
}

impl Default for CodeAllocator {
    fn default() -> Self {
        Self { slab_size: page_size() }
    }
}

impl CodeAllocator {
    pub fn new(slab_size: usize) -> Self {
        let page = page_size();
        Self {
            slab_size: slab_size.max(page).next_multiple_of(page),
        }
    }

    /// Map a fresh read+write slab anywhere in the address space.
    pub fn alloc_any(&self) -> Result<CodeSlice, PatchError> {
        #[cfg(any(target_os = "linux", target_os = "macos"))]
        unsafe {
            let ptr = libc::mmap(
                core::ptr::null_mut(),
                self.slab_size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            );
            if ptr == libc::MAP_FAILED {
                return Err(PatchError::Allocation(io::Error::last_os_error()));
            }
            Ok(CodeSlice {
                data: ptr as *mut u8,
                pc: ptr as *const u8,
                size: self.slab_size,
            })
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            Err(PatchError::Unsupported)
        }
    }

    /// Flip a slab from read+write to read+execute.
    ///
    /// # Safety
    /// No thread may still be writing into `slice`.
    pub unsafe fn make_executable(&self, slice: &CodeSlice) -> Result<(), PatchError> {
        #[cfg(any(target_os = "linux", target_os = "macos"))]
        {
            if libc::mprotect(
                slice.data as *mut libc::c_void,
                slice.size,
                libc::PROT_READ | libc::PROT_EXEC,
            ) != 0
            {
                return Err(PatchError::Allocation(io::Error::last_os_error()));
            }
            flush_code(slice.region());
            Ok(())
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            let _ = slice;
            Err(PatchError::Unsupported)
        }
    }
}
