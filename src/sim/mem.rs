//! Memory handling for the Thumb simulator.
//!
//! This module consists of:
//! - [`RegFile`]: The register file.
//! - [`Flags`]: The N, Z, C, and V condition flags.
//! - [`Memory`]: The memory (the data image followed by the stack region).

use serde::ser::SerializeMap;
use serde::Serialize;

use crate::ast::{Cond, Reg};

/// The register file.
///
/// All 16 registers hold unsigned 32-bit values.
/// `r13` is the stack pointer, `r14` the link register, and `r15` the program counter.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub struct RegFile(pub [u32; 16]);
impl RegFile {
    /// Creates a register file with every register set to zero.
    pub fn new() -> Self {
        Default::default()
    }
}
impl std::ops::Index<Reg> for RegFile {
    type Output = u32;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.0[usize::from(index)]
    }
}
impl std::ops::IndexMut<Reg> for RegFile {
    fn index_mut(&mut self, index: Reg) -> &mut Self::Output {
        &mut self.0[usize::from(index)]
    }
}
impl Serialize for RegFile {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (i, value) in self.0.iter().enumerate() {
            map.serialize_entry(&format!("r{i}"), value)?;
        }
        map.end()
    }
}

/// The condition flags.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default, Serialize)]
pub struct Flags {
    /// Negative: bit 31 of the last result.
    pub n: bool,
    /// Zero: the last result was zero.
    pub z: bool,
    /// Carry: unsigned overflow on addition, no borrow on subtraction, or the last bit shifted out.
    pub c: bool,
    /// Overflow: signed overflow.
    pub v: bool,
}
impl Flags {
    /// Sets the N and Z flags from a result.
    pub fn set_nz(&mut self, result: u32) {
        self.n = result > 0x7FFF_FFFF;
        self.z = result == 0;
    }

    /// Tests a branch condition against these flags.
    pub fn satisfies(&self, cond: Cond) -> bool {
        cond.holds(self.n, self.z, self.c, self.v)
    }
}

/// The memory of the simulator.
///
/// Memory is an array of 32-bit words: the data image (`mem_size` words)
/// followed by the stack region (`stack_size` words).
/// Addresses are byte addresses; the word holding byte address `a` is at index `a / 4`.
///
/// Accesses outside of the array are not errors:
/// loads yield 0 and stores are dropped.
#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// The words of memory.
    pub memory: Vec<u32>,
    /// Number of words in the data region.
    pub mem_size: usize,
    /// Number of words in the stack region.
    pub stack_size: usize,
}
impl Memory {
    /// Creates a zeroed memory with the given region sizes (in words).
    pub fn new(mem_size: usize, stack_size: usize) -> Self {
        Self {
            memory: vec![0; mem_size + stack_size],
            mem_size,
            stack_size
        }
    }

    /// Rebuilds memory from a data image:
    /// the image (padded to the data region), then a zeroed stack region.
    ///
    /// The data region grows if the image is larger than it.
    pub fn load_image(&mut self, image: &[u32]) {
        self.mem_size = self.mem_size.max(image.len());

        self.memory.clear();
        self.memory.extend_from_slice(image);
        self.memory.resize(self.mem_size + self.stack_size, 0);
    }

    /// Zeroes memory, keeping the current region sizes.
    pub fn clear(&mut self) {
        self.memory.clear();
        self.memory.resize(self.mem_size + self.stack_size, 0);
    }

    /// The byte address just past the data region (the initial stack pointer).
    pub fn stack_base(&self) -> u32 {
        (self.mem_size as u32).wrapping_mul(4)
    }

    fn index(addr: u64) -> usize {
        usize::try_from(addr / 4).unwrap_or(usize::MAX)
    }

    /// Reads the word at a word index (0 if out of range).
    pub fn get(&self, index: usize) -> u32 {
        self.memory.get(index).copied().unwrap_or(0)
    }

    /// Writes the word at a word index (dropped if out of range).
    pub fn set(&mut self, index: usize, value: u32) {
        if let Some(word) = self.memory.get_mut(index) {
            *word = value;
        }
    }

    /// Reads the word containing a byte address.
    pub fn load_word(&self, addr: u64) -> u32 {
        self.get(Self::index(addr))
    }

    /// Reads a half-word: the low half if the address is word-aligned, otherwise the high half.
    pub fn load_half(&self, addr: u64) -> u16 {
        let word = self.load_word(addr);
        match addr % 4 {
            0 => word as u16,
            _ => (word >> 16) as u16,
        }
    }

    /// Reads the byte at a byte address.
    pub fn load_byte(&self, addr: u64) -> u8 {
        (self.load_word(addr) >> ((addr % 4) * 8)) as u8
    }

    /// Writes the word containing a byte address.
    pub fn store_word(&mut self, addr: u64, value: u32) {
        self.set(Self::index(addr), value);
    }

    /// Writes a half-word into the half selected the same way as [`Memory::load_half`],
    /// preserving the other half.
    pub fn store_half(&mut self, addr: u64, value: u16) {
        let shift = match addr % 4 {
            0 => 0,
            _ => 16,
        };
        self.merge(addr, 0xFFFF << shift, u32::from(value) << shift);
    }

    /// Writes a byte, preserving the other bytes of its word.
    pub fn store_byte(&mut self, addr: u64, value: u8) {
        let shift = (addr % 4) * 8;
        self.merge(addr, 0xFF << shift, u32::from(value) << shift);
    }

    fn merge(&mut self, addr: u64, mask: u32, bits: u32) {
        let index = Self::index(addr);
        if let Some(word) = self.memory.get_mut(index) {
            *word = (*word & !mask) | (bits & mask);
        }
    }

    /// Pushes a value at the stack pointer, returning the new stack pointer.
    ///
    /// The value is stored at word `sp / 4`, then the stack pointer increases by 4.
    /// If `sp / 4` is past the end of memory, a word is appended instead
    /// and the stack region grows by one word.
    pub fn push(&mut self, sp: u32, value: u32) -> u32 {
        let index = (sp / 4) as usize;
        match self.memory.get_mut(index) {
            Some(word) => *word = value,
            None => {
                self.memory.push(value);
                self.stack_size += 1;
            }
        }
        sp.wrapping_add(4)
    }

    /// Pops a value from below the stack pointer, returning the value and the new stack pointer.
    ///
    /// The value is read from word `sp / 4 - 1` (0 if there is no such word),
    /// then the stack pointer decreases by 4.
    pub fn pop(&self, sp: u32) -> (u32, u32) {
        let value = match (sp / 4).checked_sub(1) {
            Some(index) => self.get(index as usize),
            None => 0,
        };
        (value, sp.wrapping_sub(4))
    }
}
impl Default for Memory {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{Flags, Memory, RegFile};
    use crate::ast::reg_consts::{PC, R0, SP};
    use crate::ast::Cond;

    #[test]
    fn reg_file_indexing() {
        let mut regs = RegFile::new();
        regs[R0] = 5;
        regs[SP] = 0x40;
        regs[PC] = u32::MAX;
        assert_eq!(regs.0[0], 5);
        assert_eq!(regs.0[13], 0x40);
        assert_eq!(regs.0[15], u32::MAX);
    }

    #[test]
    fn reg_file_serializes_as_map() {
        let mut regs = RegFile::new();
        regs[R0] = 7;
        let json = serde_json::to_value(regs).unwrap();
        assert_eq!(json["r0"], 7);
        assert_eq!(json["r15"], 0);
        assert_eq!(json.as_object().unwrap().len(), 16);
    }

    #[test]
    fn nz() {
        let mut flags = Flags::default();
        flags.set_nz(0);
        assert!(flags.z && !flags.n);
        flags.set_nz(0x8000_0000);
        assert!(!flags.z && flags.n);
        flags.set_nz(0x7FFF_FFFF);
        assert!(!flags.z && !flags.n);

        assert!(flags.satisfies(Cond::Ne));
        assert!(!flags.satisfies(Cond::Eq));
    }

    #[test]
    fn sub_word_loads() {
        let mut mem = Memory::new(2, 0);
        mem.set(0, 0x8899_AABB);

        assert_eq!(mem.load_word(0), 0x8899_AABB);
        assert_eq!(mem.load_word(3), 0x8899_AABB);
        assert_eq!(mem.load_half(0), 0xAABB);
        assert_eq!(mem.load_half(2), 0x8899);
        assert_eq!(mem.load_half(1), 0x8899);
        assert_eq!(mem.load_byte(0), 0xBB);
        assert_eq!(mem.load_byte(1), 0xAA);
        assert_eq!(mem.load_byte(2), 0x99);
        assert_eq!(mem.load_byte(3), 0x88);
    }

    #[test]
    fn sub_word_stores() {
        let mut mem = Memory::new(1, 0);
        mem.set(0, 0x1122_3344);

        mem.store_byte(1, 0xFF);
        assert_eq!(mem.get(0), 0x1122_FF44);
        mem.store_byte(3, 0x00);
        assert_eq!(mem.get(0), 0x0022_FF44);
        mem.store_half(0, 0xBEEF);
        assert_eq!(mem.get(0), 0x0022_BEEF);
        mem.store_half(2, 0xCAFE);
        assert_eq!(mem.get(0), 0xCAFE_BEEF);
        mem.store_word(2, 7);
        assert_eq!(mem.get(0), 7);
    }

    #[test]
    fn out_of_range() {
        let mut mem = Memory::new(1, 1);
        assert_eq!(mem.load_word(8), 0);
        assert_eq!(mem.load_byte(u64::from(u32::MAX) + 4), 0);

        mem.store_word(8, 1);
        mem.store_half(100, 1);
        mem.store_byte(1 << 40, 1);
        assert_eq!(mem.memory, [0, 0]);
    }

    #[test]
    fn push_pop() {
        let mut mem = Memory::new(4, 1);
        let sp = mem.stack_base();
        assert_eq!(sp, 16);

        let sp = mem.push(sp, 0x1122_3344);
        assert_eq!(sp, 20);
        assert_eq!(mem.get(4), 0x1122_3344);
        assert_eq!(mem.stack_size, 1);

        // past the end: memory grows by a word
        let sp = mem.push(sp, 0x55);
        assert_eq!(sp, 24);
        assert_eq!(mem.memory.len(), 6);
        assert_eq!(mem.stack_size, 2);

        let (value, sp) = mem.pop(sp);
        assert_eq!((value, sp), (0x55, 20));
        let (value, sp) = mem.pop(sp);
        assert_eq!((value, sp), (0x1122_3344, 16));

        // nothing below address 0
        assert_eq!(mem.pop(0), (0, u32::MAX - 3));
    }

    #[test]
    fn load_image() {
        let mut mem = Memory::new(2, 2);
        mem.load_image(&[1]);
        assert_eq!(mem.memory, [1, 0, 0, 0]);

        mem.load_image(&[1, 2, 3]);
        assert_eq!(mem.mem_size, 3);
        assert_eq!(mem.memory, [1, 2, 3, 0, 0]);
        assert_eq!(mem.stack_base(), 12);

        mem.clear();
        assert_eq!(mem.memory, [0; 5]);
    }
}
