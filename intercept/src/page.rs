use crate::types::Region;

#[inline]
pub fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Page boundary at or below `addr`.
#[inline]
pub fn page_of(addr: usize, page_sz: usize) -> usize {
    debug_assert!(page_sz.is_power_of_two());
    addr & !(page_sz - 1)
}

/// Smallest page-aligned region covering `addr..addr + len`.
///
/// A zero-length range still covers the page that contains `addr`, so the
/// result is never empty.
pub fn page_span(addr: usize, len: usize, page_sz: usize) -> Region {
    let start = page_of(addr, page_sz);
    let end = addr
        .saturating_add(len)
        .saturating_add(page_sz - 1)
        & !(page_sz - 1);
    Region::new(start, (end - start).max(page_sz))
}
