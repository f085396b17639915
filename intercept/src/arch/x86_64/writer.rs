#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    RAX = 0,
    RCX = 1,
    RDX = 2,
    RBX = 3,
    RSP = 4,
    RBP = 5,
    RSI = 6,
    RDI = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// Low 3 bits of the register encoding.
    #[inline]
    fn lo3(self) -> u8 {
        (self as u8) & 7
    }

    /// Whether this register requires the REX.B or REX.R extension bit.
    #[inline]
    fn is_extended(self) -> bool {
        (self as u8) >= 8
    }
}

#[derive(Debug)]
pub struct X86_64Writer {
    base: *mut u8,
    code: *mut u8,
    pc: u64,
    size: usize,
}

impl X86_64Writer {
    pub unsafe fn new(buffer: *mut u8, size: usize, pc: u64) -> Self {
        Self {
            base: buffer,
            code: buffer,
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

    unsafe fn emit(&mut self, byte: u8) {
        debug_assert!(self.can_write(1));
        self.code.write(byte);
        self.code = self.code.add(1);
        self.pc = self.pc.wrapping_add(1);
    }

    unsafe fn emit_u32_le(&mut self, val: u32) {
        debug_assert!(self.can_write(4));
        (self.code as *mut u32).write_unaligned(val);
        self.code = self.code.add(4);
        self.pc = self.pc.wrapping_add(4);
    }

    unsafe fn emit_u64_le(&mut self, val: u64) {
        debug_assert!(self.can_write(8));
        (self.code as *mut u64).write_unaligned(val);
        self.code = self.code.add(8);
        self.pc = self.pc.wrapping_add(8);
    }

    /// REX prefix: 0100 W R X B
    #[inline]
    fn rex(w: bool, r: bool, x: bool, b: bool) -> u8 {
        0x40 | ((w as u8) << 3) | ((r as u8) << 2) | ((x as u8) << 1) | (b as u8)
    }

    /// ModRM byte: mod(2) | reg(3) | rm(3)
    #[inline]
    fn modrm(mod_: u8, reg: u8, rm: u8) -> u8 {
        ((mod_ & 3) << 6) | ((reg & 7) << 3) | (rm & 7)
    }

    // ── Push ─────────────────────────────────────────────────────────

    /// `push imm8`: 6A ib. Sign-extended to a full 8-byte stack slot.
    pub unsafe fn put_push_imm8(&mut self, imm: i8) {
        self.emit(0x6A);
        self.emit(imm as u8);
    }

    // ── MOV ──────────────────────────────────────────────────────────

    /// `mov reg, imm64`: REX.W B8+rd io (10 bytes)
    pub unsafe fn put_mov_reg_imm64(&mut self, reg: Reg, imm: u64) {
        self.emit(Self::rex(true, false, false, reg.is_extended()));
        self.emit(0xB8 + reg.lo3());
        self.emit_u64_le(imm);
    }

    /// `mov dword [rsp + offset], imm32`: C7 /0 with a SIB byte.
    ///
    /// A zero offset uses mod=00 (7 bytes); anything else uses mod=01 with a
    /// disp8 (8 bytes).
    pub unsafe fn put_mov_rsp_offset_imm32(&mut self, offset: u8, imm: u32) {
        self.emit(0xC7);
        if offset == 0 {
            self.emit(Self::modrm(0b00, 0, 0b100));
            self.emit(0x24); // SIB: base=RSP, no index
        } else {
            self.emit(Self::modrm(0b01, 0, 0b100));
            self.emit(0x24);
            self.emit(offset);
        }
        self.emit_u32_le(imm);
    }

    // ── Branches ─────────────────────────────────────────────────────

    /// `jmp reg`: [REX.B?] FF /4
    pub unsafe fn put_jmp_reg(&mut self, reg: Reg) {
        if reg.is_extended() {
            self.emit(Self::rex(false, false, false, true));
        }
        self.emit(0xFF);
        self.emit(Self::modrm(0b11, 4, reg.lo3()));
    }

    /// `ret`: C3
    pub unsafe fn put_ret(&mut self) {
        self.emit(0xC3);
    }

    /// `int3` padding, so anything that runs past a redirect traps.
    pub unsafe fn put_int3_n(&mut self, n: usize) {
        for _ in 0..n {
            self.emit(0xCC);
        }
    }
}
