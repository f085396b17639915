//! Symbol lookup inside the running process.

use core::ffi::c_void;
use std::ffi::{CStr, CString};

use crate::types::PatchError;

/// What `dladdr` knows about an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    /// Basename of the image containing the address.
    pub image: String,
    pub image_base: usize,
    /// Nearest exported symbol at or below the address, if any.
    pub symbol: Option<String>,
    pub symbol_address: usize,
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Resolve a symbol globally (across all loaded modules) using `dlsym(RTLD_DEFAULT, ...)`.
pub fn find_global_export_by_name(symbol: &str) -> Result<usize, PatchError> {
    let cstr = CString::new(symbol).map_err(|_| PatchError::Unresolved(symbol.to_string()))?;
    let p = unsafe { libc::dlsym(libc::RTLD_DEFAULT, cstr.as_ptr()) };
    if p.is_null() {
        return Err(PatchError::Unresolved(symbol.to_string()));
    }
    Ok(strip_code_ptr(p as usize))
}

/// Look up the image and nearest symbol for `address` via `dladdr`.
pub fn symbol_at(address: usize) -> Option<SymbolInfo> {
    unsafe {
        let mut info: libc::Dl_info = core::mem::zeroed();
        if libc::dladdr(address as *const c_void, &mut info) == 0 || info.dli_fbase.is_null() {
            return None;
        }
        let image = if info.dli_fname.is_null() {
            String::from("[unknown]")
        } else {
            basename(&CStr::from_ptr(info.dli_fname).to_string_lossy()).to_string()
        };
        let symbol = (!info.dli_sname.is_null())
            .then(|| CStr::from_ptr(info.dli_sname).to_string_lossy().into_owned());
        Some(SymbolInfo {
            image,
            image_base: info.dli_fbase as usize,
            symbol,
            symbol_address: info.dli_saddr as usize,
        })
    }
}

/// Whether `address` falls inside an executable mapping.
///
/// Returns `None` where the mapping table cannot be read.
#[cfg(target_os = "linux")]
pub fn is_executable(address: usize) -> Option<bool> {
    let maps = std::fs::read_to_string("/proc/self/maps").ok()?;
    for line in maps.lines() {
        let mut fields = line.split_whitespace();
        let Some(range) = fields.next() else { continue };
        let Some(perms) = fields.next() else { continue };
        let Some((start_s, end_s)) = range.split_once('-') else { continue };
        let Ok(start) = usize::from_str_radix(start_s, 16) else { continue };
        let Ok(end) = usize::from_str_radix(end_s, 16) else { continue };
        if (start..end).contains(&address) {
            return Some(perms.as_bytes().get(2) == Some(&b'x'));
        }
    }
    Some(false)
}

#[cfg(not(target_os = "linux"))]
pub fn is_executable(_address: usize) -> Option<bool> {
    None
}

/// Resolve `symbol` to the entry address of a function in a loaded image.
///
/// The address must map back to a loaded image through `dladdr` and, where
/// the platform can tell, lie in executable memory.
pub fn resolve_function(symbol: &str) -> Result<usize, PatchError> {
    let address = find_global_export_by_name(symbol)?;
    let Some(info) = symbol_at(address) else {
        return Err(PatchError::NotCode(address));
    };
    if is_executable(address) == Some(false) {
        return Err(PatchError::NotCode(address));
    }
    log::debug!(
        "resolved {} at 0x{:x} ({} + 0x{:x}, nearest symbol {:?})",
        symbol,
        address,
        info.image,
        address - info.image_base,
        info.symbol
    );
    Ok(address)
}

#[cfg(all(target_arch = "aarch64", target_os = "macos"))]
#[inline]
pub fn strip_code_ptr(ptr: usize) -> usize {
    // On arm64e, function pointers may be signed. Strip PAC bits so we can treat it as an address.
    let mut x = ptr as u64;
    unsafe {
        core::arch::asm!("xpaci {0}", inout(reg) x, options(nostack, preserves_flags));
    }
    x as usize
}

#[cfg(not(all(target_arch = "aarch64", target_os = "macos")))]
#[inline]
pub fn strip_code_ptr(ptr: usize) -> usize {
    ptr
}
