use std::io;

use thiserror::Error;

/// A contiguous range of the process's address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub addr: usize,
    pub len: usize,
}

impl Region {
    pub fn new(addr: usize, len: usize) -> Self {
        Self { addr, len }
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.addr.saturating_add(self.len)
    }

    #[inline]
    pub fn as_mut_ptr(&self) -> *mut libc::c_void {
        self.addr as *mut libc::c_void
    }
}

/// Page protection flags used by the patcher and the corrective calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    None,
    ReadWrite,
    ReadExec,
    ReadWriteExec,
}

impl Protection {
    pub fn as_prot(self) -> libc::c_int {
        match self {
            Protection::None => libc::PROT_NONE,
            Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
            Protection::ReadExec => libc::PROT_READ | libc::PROT_EXEC,
            Protection::ReadWriteExec => libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        }
    }
}

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("symbol '{0}' does not resolve in this process")]
    Unresolved(String),

    #[error("address {0:#x} is not inside any loaded code image")]
    NotCode(usize),

    #[error("changing protection of {addr:#x}+{len:#x} to {prot:?} failed: {source}")]
    Protect {
        addr: usize,
        len: usize,
        prot: Protection,
        #[source]
        source: io::Error,
    },

    #[error("redirect of {len} bytes exceeds the {max}-byte patch budget")]
    TooLarge { len: usize, max: usize },

    #[error("only {room} bytes at {addr:#x} before the next symbol, redirect needs {needed}")]
    SiteTooSmall { addr: usize, room: usize, needed: usize },

    #[error("code page allocation failed: {0}")]
    Allocation(#[source] io::Error),

    #[error("code patching is not supported on this platform")]
    Unsupported,
}
