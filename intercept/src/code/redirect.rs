//! Absolute redirect sequences written over a function's entry point.

use crate::arch::arm64::writer::{Arm64Writer, Reg as Arm64Reg};
use crate::arch::x86_64::writer::X86_64Writer;
use crate::types::PatchError;

/// Bytes that may be overwritten at a patch site without touching the
/// instructions of the next function.
pub const MAX_REDIRECT_LEN: usize = 18;

/// `push 0; mov [rsp], lo32; mov [rsp+4], hi32; ret`.
pub const X86_64_REDIRECT_LEN: usize = 18;

/// `ldr x16, #8; br x16; .quad target`.
pub const ARM64_REDIRECT_LEN: usize = 16;

/// An encoded unconditional transfer of control to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Redirect {
    bytes: [u8; MAX_REDIRECT_LEN],
    len: usize,
    target: u64,
}

impl Redirect {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn target(&self) -> u64 {
        self.target
    }
}

/// x86_64 redirect that builds the target address on the stack as two 32-bit
/// halves and `ret`s into it.
///
/// Argument registers are left alone and the caller's return address stays on
/// top of the stack once `ret` pops the pushed slot, so the target runs as if
/// it had been called directly.
pub fn redirect_x86_64(target: u64) -> Redirect {
    let mut bytes = [0u8; MAX_REDIRECT_LEN];
    let len = unsafe {
        let mut w = X86_64Writer::new(bytes.as_mut_ptr(), bytes.len(), 0);
        w.put_push_imm8(0);
        w.put_mov_rsp_offset_imm32(0, target as u32);
        w.put_mov_rsp_offset_imm32(4, (target >> 32) as u32);
        w.put_ret();
        w.offset()
    };
    debug_assert_eq!(len, X86_64_REDIRECT_LEN);
    Redirect { bytes, len, target }
}

/// AArch64 redirect through the intra-procedure scratch register x16.
pub fn redirect_arm64(target: u64) -> Redirect {
    let mut bytes = [0u8; MAX_REDIRECT_LEN];
    let len = unsafe {
        let mut w = Arm64Writer::new(bytes.as_mut_ptr(), bytes.len(), 0);
        w.put_ldr_br_address(Arm64Reg::X16, target);
        w.offset()
    };
    debug_assert_eq!(len, ARM64_REDIRECT_LEN);
    Redirect { bytes, len, target }
}

/// Redirect for the architecture this process runs on.
pub fn redirect_to(target: u64) -> Result<Redirect, PatchError> {
    #[cfg(target_arch = "x86_64")]
    {
        Ok(redirect_x86_64(target))
    }
    #[cfg(target_arch = "aarch64")]
    {
        Ok(redirect_arm64(target))
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        let _ = target;
        Err(PatchError::Unsupported)
    }
}
