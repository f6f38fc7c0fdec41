//! Physical storage of arguments and return values
//!
//! Locations are always relative (a register number or a byte offset into the
//! outgoing stack-argument area); they never contain addresses, so anything
//! built from them can be reused for every call.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ty::Signedness;

/// Size of one register cell or full stack slot in bytes
pub const WORD: u32 = 8;

/// Integer register cells of a location set
pub const INT_REG_CELLS: usize = 16;
/// Float register cells of a location set
pub const FLOAT_REG_CELLS: usize = 16;
/// Stack-argument words of a location set, including room for a return value area
pub const STACK_CELLS: usize = 64;
/// Integer registers that can carry a return value
pub const RETURN_INT_CELLS: usize = 2;
/// Float registers that can carry a return value
pub const RETURN_FLOAT_CELLS: usize = 4;

/// Round `value` up to a multiple of `align` (a power of two)
#[inline]
pub fn align_to(value: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Register bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegBank {
    /// General-purpose integer registers
    Int,
    /// Floating-point / vector registers
    Float,
}

/// A relative physical location of one 8-byte cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Location {
    /// Argument register `index` of `bank`
    Reg {
        /// Register bank
        bank: RegBank,
        /// Argument register number within the bank
        index: u8,
    },
    /// Byte offset into the outgoing stack-argument area
    Stack {
        /// Byte offset
        offset: u32,
    },
}

impl Location {
    /// Integer argument register `index`
    pub fn int(index: u8) -> Self {
        Location::Reg { bank: RegBank::Int, index }
    }

    /// Float argument register `index`
    pub fn float(index: u8) -> Self {
        Location::Reg { bank: RegBank::Float, index }
    }

    /// Stack-argument byte offset
    pub fn stack(offset: u32) -> Self {
        Location::Stack { offset }
    }

    /// The location `words` cells further along the same area
    pub fn advance(self, words: u32) -> Self {
        match self {
            Location::Reg { bank, index } => Location::Reg { bank, index: index + words as u8 },
            Location::Stack { offset } => Location::Stack { offset: offset + words * WORD },
        }
    }

    /// The area this location belongs to and its byte offset inside it
    pub fn area_offset(self) -> (Area, u32) {
        match self {
            Location::Reg { bank: RegBank::Int, index } => (Area::IntRegs, index as u32 * WORD),
            Location::Reg { bank: RegBank::Float, index } => (Area::FloatRegs, index as u32 * WORD),
            Location::Stack { offset } => (Area::Stack, offset),
        }
    }

    /// Whether the location is a stack slot
    pub fn is_stack(self) -> bool {
        matches!(self, Location::Stack { .. })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Reg { bank: RegBank::Int, index } => write!(f, "r{}", index),
            Location::Reg { bank: RegBank::Float, index } => write!(f, "f{}", index),
            Location::Stack { offset } => write!(f, "[sp+{}]", offset),
        }
    }
}

/// One of the three byte-addressable areas of a location set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Area {
    /// Integer register cells
    IntRegs,
    /// Float register cells
    FloatRegs,
    /// Outgoing stack-argument words
    Stack,
}

/// A byte range inside one area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteSpan {
    /// Area the range lives in
    pub area: Area,
    /// First byte
    pub start: u32,
    /// Length in bytes
    pub len: u32,
}

impl ByteSpan {
    /// Span of `len` bytes starting at `loc`
    pub fn at(loc: Location, len: u32) -> Self {
        let (area, start) = loc.area_offset();
        ByteSpan { area, start, len }
    }

    /// One past the last byte
    pub fn end(&self) -> u32 {
        self.start + self.len
    }

    /// Whether two spans share at least one byte
    pub fn overlaps(&self, other: &ByteSpan) -> bool {
        self.area == other.area && self.start < other.end() && other.start < self.end()
    }
}

/// Where one argument (or the return value) lives under one convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum StorageClass {
    /// No storage (void return)
    None,
    /// One register cell
    Register {
        /// Register bank
        bank: RegBank,
        /// Register number
        index: u8,
    },
    /// A stack slot of `width` bytes at byte `offset`
    StackSlot {
        /// Byte offset of the first byte of the value
        offset: u32,
        /// Bytes occupied
        width: u32,
    },
    /// An aggregate split over `count` consecutive registers
    RegisterGroup {
        /// Register bank
        bank: RegBank,
        /// First register
        first: u8,
        /// Number of registers
        count: u8,
    },
    /// A homogeneous float aggregate, one element per register
    FloatAggregate {
        /// Register bank
        bank: RegBank,
        /// First register
        first: u8,
        /// Number of elements
        count: u8,
        /// Element width in bytes (4 or 8)
        element_width: u8,
    },
    /// An address standing in for the value
    ByReference {
        /// Location holding the address
        at: Location,
    },
}

impl StorageClass {
    /// First location of the storage, if it has one
    pub fn first_location(&self) -> Option<Location> {
        match *self {
            StorageClass::None => None,
            StorageClass::Register { bank, index } => Some(Location::Reg { bank, index }),
            StorageClass::StackSlot { offset, .. } => Some(Location::Stack { offset }),
            StorageClass::RegisterGroup { bank, first, .. }
            | StorageClass::FloatAggregate { bank, first, .. } => Some(Location::Reg { bank, index: first }),
            StorageClass::ByReference { at } => Some(at),
        }
    }

    /// Whether the value travels behind an address
    pub fn is_by_reference(&self) -> bool {
        matches!(self, StorageClass::ByReference { .. })
    }

    /// Bytes of the location set this storage occupies
    pub fn spans(&self) -> Vec<ByteSpan> {
        match *self {
            StorageClass::None => Vec::new(),
            StorageClass::Register { bank, index } => vec![ByteSpan::at(Location::Reg { bank, index }, WORD)],
            StorageClass::StackSlot { offset, width } => vec![ByteSpan::at(Location::stack(offset), width)],
            StorageClass::RegisterGroup { bank, first, count } => {
                vec![ByteSpan::at(Location::Reg { bank, index: first }, count as u32 * WORD)]
            }
            StorageClass::FloatAggregate { bank, first, count, element_width } => (0..count)
                .map(|i| ByteSpan::at(Location::Reg { bank, index: first + i }, element_width as u32))
                .collect(),
            StorageClass::ByReference { at } => vec![ByteSpan::at(at, WORD)],
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            StorageClass::None => write!(f, "none"),
            StorageClass::Register { bank, index } => write!(f, "{}", Location::Reg { bank, index }),
            StorageClass::StackSlot { offset, width } => write!(f, "[sp+{}]:{}", offset, width),
            StorageClass::RegisterGroup { bank, first, count } => {
                write!(f, "{}..+{}", Location::Reg { bank, index: first }, count)
            }
            StorageClass::FloatAggregate { bank, first, count, element_width } => {
                write!(f, "{}..+{} x{}", Location::Reg { bank, index: first }, count, element_width)
            }
            StorageClass::ByReference { at } => write!(f, "&{}", at),
        }
    }
}

/// Placement of one argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArgPlacement {
    /// Storage class
    pub storage: StorageClass,
    /// Size of the logical value in bytes
    pub size: u32,
    /// Extension of a sub-word integer
    pub extension: Option<Signedness>,
}

impl ArgPlacement {
    /// Void placement
    pub fn none() -> Self {
        ArgPlacement { storage: StorageClass::None, size: 0, extension: None }
    }
}

/// Calling convention flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConventionTag {
    /// Fully concrete convention of instantiation-specific code
    Normal,
    /// Convention of generically shared code
    Shared,
}

impl fmt::Display for ConventionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConventionTag::Normal => write!(f, "normal"),
            ConventionTag::Shared => write!(f, "shared"),
        }
    }
}

/// Complete placement of one signature under one convention
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallInfo {
    /// Convention this placement was computed for
    pub convention: ConventionTag,
    /// Whether argument 0 is the implicit receiver
    pub has_this: bool,
    /// Argument placements, receiver first
    pub args: Vec<ArgPlacement>,
    /// Return value placement
    pub ret: ArgPlacement,
    /// Bytes of outgoing stack arguments, frame aligned
    pub stack_usage: u32,
    /// The callee hands an indirect return's buffer address back in integer
    /// return register 0
    #[serde(default)]
    pub echoes_return_buffer: bool,
}

impl CallInfo {
    /// Every byte a caller must fill before calling with this placement.
    ///
    /// Includes the return-buffer address cell of an indirect return.
    pub fn footprint(&self) -> Vec<ByteSpan> {
        let mut spans: Vec<ByteSpan> = self.args.iter().flat_map(|a| a.storage.spans()).collect();
        if let StorageClass::ByReference { at } = self.ret.storage {
            spans.push(ByteSpan::at(at, WORD));
        }
        spans.sort();
        spans
    }

    /// Location of the return-buffer address, for indirect returns
    pub fn return_buffer(&self) -> Option<Location> {
        match self.ret.storage {
            StorageClass::ByReference { at } => Some(at),
            _ => None,
        }
    }
}

impl fmt::Display for CallInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} convention, stack {} bytes", self.convention, self.stack_usage)?;
        for (i, arg) in self.args.iter().enumerate() {
            let label = if self.has_this && i == 0 { "this".to_string() } else { format!("arg{}", i) };
            writeln!(f, "  {:<6} {:>3}B  {}", label, arg.size, arg.storage)?;
        }
        write!(f, "  {:<6} {:>3}B  {}", "ret", self.ret.size, self.ret.storage)
    }
}
