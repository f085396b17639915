#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    X16 = 16,
    X17 = 17,
}

#[derive(Debug)]
pub struct Arm64Writer {
    base: *mut u32,
    code: *mut u32,
    pc: u64,
    size: usize,
}

impl Arm64Writer {
    pub unsafe fn new(buffer: *mut u8, size: usize, pc: u64) -> Self {
        Self {
            base: buffer as *mut u32,
            code: buffer as *mut u32,
            pc,
            size,
        }
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub fn offset(&self) -> usize {
        (self.code as usize).saturating_sub(self.base as usize)
    }

    fn can_write(&self, bytes: usize) -> bool {
        self.offset() + bytes <= self.size
    }

    unsafe fn put_u32(&mut self, insn: u32) {
        debug_assert!(self.can_write(4));
        (self.code as *mut u8).cast::<u32>().write_unaligned(insn);
        self.code = self.code.add(1);
        self.pc = self.pc.wrapping_add(4);
    }

    pub unsafe fn put_br_reg(&mut self, reg: Reg) {
        let n = reg as u32;
        self.put_u32(0xD61F0000 | (n << 5));
    }

    #[cfg(test)]
    pub unsafe fn put_ret(&mut self) {
        self.put_u32(0xD65F03C0);
    }

    /// `brk #0` padding, so anything that runs past a redirect traps.
    pub unsafe fn put_brk_n(&mut self, n: usize) {
        for _ in 0..n {
            self.put_u32(0xD420_0000);
        }
    }

    pub unsafe fn put_ldr_br_address(&mut self, reg: Reg, addr: u64) {
        // Sequence:
        //   LDR Xt, [PC, #8]
        //   BR  Xt
        //   .quad addr
        //
        // LDR (literal, 64-bit): op=01, imm19<<5, Rt.
        let rt = reg as u32;
        let imm19 = 2u32; // 2 * 4 = 8 bytes
        self.put_u32(0x5800_0000 | (imm19 << 5) | rt);
        self.put_br_reg(reg);

        // Inline literal (8 bytes), little-endian.
        debug_assert!(self.can_write(8));
        let p = self.code as *mut u8;
        (p as *mut u64).write_unaligned(addr);
        self.code = (p.add(8)) as *mut u32;
        self.pc = self.pc.wrapping_add(8);
    }
}
