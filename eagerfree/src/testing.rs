//! Test doubles: a recording reclaimer and executable stand-ins for `madvise`.

use core::ffi::c_void;
use std::cell::{Cell, RefCell};
use std::io;

use eagerfree_intercept::code::allocator::{CodeAllocator, CodeSlice};
use eagerfree_intercept::page::page_size;
use eagerfree_intercept::{Protection, Region};

use crate::hook::AdviseFn;
use crate::reclaimer::Reclaimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Advise(Region, libc::c_int),
    Protect(Region, Protection),
}

thread_local! {
    static CALLS: RefCell<Vec<Call>> = const { RefCell::new(Vec::new()) };
    static ADVISE_ERRNO: Cell<Option<i32>> = const { Cell::new(None) };
    static PROTECT_ERRNO: Cell<Option<i32>> = const { Cell::new(None) };
}

/// Clear this thread's call log and injected failures.
pub fn reset() {
    CALLS.with(|c| c.borrow_mut().clear());
    ADVISE_ERRNO.with(|e| e.set(None));
    PROTECT_ERRNO.with(|e| e.set(None));
}

pub fn calls() -> Vec<Call> {
    CALLS.with(|c| c.borrow().clone())
}

pub fn fail_advise_with(errno: i32) {
    ADVISE_ERRNO.with(|e| e.set(Some(errno)));
}

pub fn fail_protect_with(errno: i32) {
    PROTECT_ERRNO.with(|e| e.set(Some(errno)));
}

/// Records every call on the calling thread instead of touching memory.
pub struct Recorder;

impl Reclaimer for Recorder {
    unsafe fn advise(region: Region, advice: libc::c_int) -> io::Result<()> {
        CALLS.with(|c| c.borrow_mut().push(Call::Advise(region, advice)));
        match ADVISE_ERRNO.with(Cell::get) {
            Some(errno) => Err(io::Error::from_raw_os_error(errno)),
            None => Ok(()),
        }
    }

    unsafe fn protect(region: Region, prot: Protection) -> io::Result<()> {
        CALLS.with(|c| c.borrow_mut().push(Call::Protect(region, prot)));
        match PROTECT_ERRNO.with(Cell::get) {
            Some(errno) => Err(io::Error::from_raw_os_error(errno)),
            None => Ok(()),
        }
    }
}

/// Body of an unpatched stand-in: the base advice and nothing else.
pub unsafe extern "C" fn recorded_madvise(
    addr: *mut c_void,
    len: libc::size_t,
    advice: libc::c_int,
) -> libc::c_int {
    match Recorder::advise(Region::new(addr as usize, len), advice) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Size of a stand-in's body; comfortably larger than any redirect.
pub const STAND_IN_LEN: usize = 32;

/// A function with `madvise`'s signature living in its own code page.
///
/// Its body tail-jumps to `body`, followed by trap padding, so it can be
/// patched without clobbering real code in the test binary.
pub struct StandIn {
    slice: CodeSlice,
}

impl StandIn {
    pub fn new(body: AdviseFn) -> StandIn {
        let alloc = CodeAllocator::default();
        let slice = alloc.alloc_any().expect("alloc stand-in");
        let target = body as usize as u64;
        unsafe {
            #[cfg(target_arch = "x86_64")]
            {
                use eagerfree_intercept::arch::x86_64::writer::{Reg, X86_64Writer};
                let mut w = X86_64Writer::new(slice.data, STAND_IN_LEN, slice.data as u64);
                w.put_mov_reg_imm64(Reg::RAX, target);
                w.put_jmp_reg(Reg::RAX);
                w.put_int3_n(STAND_IN_LEN - w.offset());
            }
            #[cfg(target_arch = "aarch64")]
            {
                use eagerfree_intercept::arch::arm64::writer::{Arm64Writer, Reg};
                let mut w = Arm64Writer::new(slice.data, STAND_IN_LEN, slice.data as u64);
                w.put_ldr_br_address(Reg::X17, target);
                w.put_brk_n((STAND_IN_LEN - w.offset()) / 4);
            }
            alloc.make_executable(&slice).expect("rx stand-in");
        }
        StandIn { slice }
    }

    pub fn entry(&self) -> usize {
        self.slice.pc as usize
    }

    pub fn bytes(&self) -> [u8; STAND_IN_LEN] {
        unsafe { core::ptr::read_unaligned(self.slice.pc as *const [u8; STAND_IN_LEN]) }
    }

    pub fn call(&self, region: Region, advice: libc::c_int) -> libc::c_int {
        let f: AdviseFn = unsafe { core::mem::transmute(self.slice.pc) };
        let f = std::hint::black_box(f);
        unsafe { f(region.as_mut_ptr(), region.len, advice) }
    }
}

/// Map `pages` fresh read+write anonymous pages.
pub fn map_anon(pages: usize) -> Region {
    let len = pages * page_size();
    let p = unsafe {
        libc::mmap(
            core::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };
    assert_ne!(p, libc::MAP_FAILED, "mmap: {}", io::Error::last_os_error());
    Region::new(p as usize, len)
}

pub unsafe fn unmap(region: Region) {
    libc::munmap(region.as_mut_ptr(), region.len);
}

/// The `rwx` triple `/proc/self/maps` reports for the mapping holding `addr`.
#[cfg(target_os = "linux")]
pub fn protection_of(addr: usize) -> Option<String> {
    let maps = std::fs::read_to_string("/proc/self/maps").ok()?;
    maps.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let (start, end) = fields.next()?.split_once('-')?;
        let start = usize::from_str_radix(start, 16).ok()?;
        let end = usize::from_str_radix(end, 16).ok()?;
        let perms = fields.next()?;
        (start..end).contains(&addr).then(|| perms[..3].to_string())
    })
}

const CHILD_ENV: &str = "EAGERFREE_TEST_CHILD";

/// Whether this process is the re-executed child running test `name`.
pub fn in_child(name: &str) -> bool {
    std::env::var(CHILD_ENV).is_ok_and(|v| v == name)
}

/// Re-run this test binary restricted to test `name`, with [`in_child`] true.
pub fn run_in_child(name: &str) -> std::process::Output {
    let exe = std::env::current_exe().expect("should get current exe");
    std::process::Command::new(exe)
        .args([name, "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, name)
        .output()
        .expect("spawn child test")
}
