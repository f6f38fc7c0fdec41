//! Location sets
//!
//! A `LocationSet` is the in-memory image of every register and stack word a
//! call can use for arguments. Thunks keep them on their own frame; nothing
//! here allocates. Native stubs address the fields directly, so the layout is
//! `#[repr(C)]` with the three areas back to back.

use sharecall_abi::{
    Area, Location, FLOAT_REG_CELLS, INT_REG_CELLS, RETURN_FLOAT_CELLS, RETURN_INT_CELLS, STACK_CELLS, WORD,
};

/// Integer register cells
pub const MAX_INT_REGS: usize = INT_REG_CELLS;
/// Float register cells
pub const MAX_FLOAT_REGS: usize = FLOAT_REG_CELLS;
/// Stack-argument words, including room for a return value area
pub const MAX_STACK_WORDS: usize = STACK_CELLS;
/// Integer registers that can carry a return value
pub const RETURN_INT_REGS: usize = RETURN_INT_CELLS;
/// Float registers that can carry a return value
pub const RETURN_FLOAT_REGS: usize = RETURN_FLOAT_CELLS;

/// Register and stack image of one side of a call
#[repr(C)]
#[derive(Clone, PartialEq, Eq)]
pub struct LocationSet {
    /// Integer register cells
    pub int_regs: [u64; MAX_INT_REGS],
    /// Float register cells (raw bits)
    pub float_regs: [u64; MAX_FLOAT_REGS],
    /// Outgoing stack-argument words
    pub stack: [u64; MAX_STACK_WORDS],
}

/// Byte offset of `int_regs` inside a [`LocationSet`]
pub const INT_REGS_OFFSET: i32 = 0;
/// Byte offset of `float_regs` inside a [`LocationSet`]
pub const FLOAT_REGS_OFFSET: i32 = (MAX_INT_REGS * 8) as i32;
/// Byte offset of `stack` inside a [`LocationSet`]
pub const STACK_OFFSET: i32 = ((MAX_INT_REGS + MAX_FLOAT_REGS) * 8) as i32;

impl Default for LocationSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocationSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only the cells that hold something
        let used = |cells: &[u64]| -> Vec<(usize, u64)> {
            cells.iter().copied().enumerate().filter(|(_, v)| *v != 0).collect()
        };
        f.debug_struct("LocationSet")
            .field("int_regs", &used(&self.int_regs))
            .field("float_regs", &used(&self.float_regs))
            .field("stack", &used(&self.stack))
            .finish()
    }
}

impl LocationSet {
    /// A zeroed set
    pub const fn new() -> Self {
        LocationSet {
            int_regs: [0; MAX_INT_REGS],
            float_regs: [0; MAX_FLOAT_REGS],
            stack: [0; MAX_STACK_WORDS],
        }
    }

    /// Capacity of an area in bytes
    pub const fn area_len(area: Area) -> usize {
        match area {
            Area::IntRegs => MAX_INT_REGS * 8,
            Area::FloatRegs => MAX_FLOAT_REGS * 8,
            Area::Stack => MAX_STACK_WORDS * 8,
        }
    }

    /// Bytes of one area
    pub fn area(&self, area: Area) -> &[u8] {
        let cells: &[u64] = match area {
            Area::IntRegs => &self.int_regs,
            Area::FloatRegs => &self.float_regs,
            Area::Stack => &self.stack,
        };
        // Safety: u64 cells are plain bytes with stricter alignment
        unsafe { std::slice::from_raw_parts(cells.as_ptr().cast::<u8>(), cells.len() * 8) }
    }

    /// Mutable bytes of one area
    pub fn area_mut(&mut self, area: Area) -> &mut [u8] {
        let cells: &mut [u64] = match area {
            Area::IntRegs => &mut self.int_regs,
            Area::FloatRegs => &mut self.float_regs,
            Area::Stack => &mut self.stack,
        };
        // Safety: as above; the borrow of `self` is held for the slice lifetime
        unsafe { std::slice::from_raw_parts_mut(cells.as_mut_ptr().cast::<u8>(), cells.len() * 8) }
    }

    /// Address of the byte `extra` bytes past `loc`
    pub fn address_of(&mut self, loc: Location, extra: u32) -> *mut u8 {
        let (area, offset) = loc.area_offset();
        let bytes = self.area_mut(area);
        bytes[(offset + extra) as usize..].as_mut_ptr()
    }

    /// Address of the byte `extra` bytes past `loc` in the set at `base`.
    ///
    /// Goes through no reference, so addresses taken from one base stay
    /// usable while later accesses reborrow the set.
    ///
    /// # Safety
    ///
    /// `base` must point to a live set and `loc` plus `extra` must lie inside it.
    pub unsafe fn raw_address(base: *mut LocationSet, loc: Location, extra: u32) -> *mut u8 {
        let (area, offset) = loc.area_offset();
        let start: *mut u8 = match area {
            Area::IntRegs => std::ptr::addr_of_mut!((*base).int_regs).cast(),
            Area::FloatRegs => std::ptr::addr_of_mut!((*base).float_regs).cast(),
            Area::Stack => std::ptr::addr_of_mut!((*base).stack).cast(),
        };
        start.add((offset + extra) as usize)
    }

    /// Read the 8-byte cell at `loc` (always word aligned)
    pub fn read_word(&self, loc: Location) -> u64 {
        let (area, offset) = loc.area_offset();
        debug_assert_eq!(offset % WORD, 0, "unaligned word read at {}", loc);
        let index = (offset / WORD) as usize;
        match area {
            Area::IntRegs => self.int_regs[index],
            Area::FloatRegs => self.float_regs[index],
            Area::Stack => self.stack[index],
        }
    }

    /// Write the 8-byte cell at `loc` (always word aligned)
    pub fn write_word(&mut self, loc: Location, value: u64) {
        let (area, offset) = loc.area_offset();
        debug_assert_eq!(offset % WORD, 0, "unaligned word write at {}", loc);
        let index = (offset / WORD) as usize;
        match area {
            Area::IntRegs => self.int_regs[index] = value,
            Area::FloatRegs => self.float_regs[index] = value,
            Area::Stack => self.stack[index] = value,
        }
    }

    /// Copy `out.len()` bytes starting `extra` bytes past `loc`
    pub fn read_bytes(&self, loc: Location, extra: u32, out: &mut [u8]) {
        let (area, offset) = loc.area_offset();
        let start = (offset + extra) as usize;
        out.copy_from_slice(&self.area(area)[start..start + out.len()]);
    }

    /// Store `bytes` starting `extra` bytes past `loc`
    pub fn write_bytes(&mut self, loc: Location, extra: u32, bytes: &[u8]) {
        let (area, offset) = loc.area_offset();
        let start = (offset + extra) as usize;
        self.area_mut(area)[start..start + bytes.len()].copy_from_slice(bytes);
    }

    /// Copy the return registers of `callee` into this set
    pub fn copy_return_registers_from(&mut self, callee: &LocationSet) {
        self.int_regs[..RETURN_INT_REGS].copy_from_slice(&callee.int_regs[..RETURN_INT_REGS]);
        self.float_regs[..RETURN_FLOAT_REGS].copy_from_slice(&callee.float_regs[..RETURN_FLOAT_REGS]);
    }
}

/// Widen `bytes` (little-endian, at most 8) to a full word
pub(crate) fn extend_le(bytes: &[u8], signed: bool) -> u64 {
    let mut word = [0u8; 8];
    word[..bytes.len()].copy_from_slice(bytes);
    let negative = signed && bytes.last().is_some_and(|b| b & 0x80 != 0);
    if negative {
        for b in &mut word[bytes.len()..] {
            *b = 0xff;
        }
    }
    u64::from_le_bytes(word)
}
