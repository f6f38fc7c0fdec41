//! Adapter program representation
//!
//! An `AdapterProgram` is a flat list of move descriptors plus the return
//! strategy and call target of one convention crossing. Every marshal kind,
//! return strategy and call target is a closed enum, so each consumer matches
//! exhaustively.

use std::collections::BTreeSet;
use std::fmt;

use sharecall_abi::{Area, ByteSpan, CallInfo, ConventionTag, Location, Signedness, WORD};

/// Which way a crossing goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Shared-convention callers reach a normal-convention method.
    /// By-reference type-variable arguments are expanded to values.
    NormalToShared,
    /// Normal-convention callers reach a shared-convention method.
    /// By-value type-variable arguments are collapsed to references.
    SharedToNormal,
}

impl Direction {
    /// Convention of the code making the call
    pub fn caller_convention(self) -> ConventionTag {
        match self {
            Direction::NormalToShared => ConventionTag::Shared,
            Direction::SharedToNormal => ConventionTag::Normal,
        }
    }

    /// Convention of the method being called
    pub fn callee_convention(self) -> ConventionTag {
        match self {
            Direction::NormalToShared => ConventionTag::Normal,
            Direction::SharedToNormal => ConventionTag::Shared,
        }
    }

    /// The crossing that undoes this one
    pub fn reverse(self) -> Self {
        match self {
            Direction::NormalToShared => Direction::SharedToNormal,
            Direction::SharedToNormal => Direction::NormalToShared,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::NormalToShared => write!(f, "normal-to-shared"),
            Direction::SharedToNormal => write!(f, "shared-to-normal"),
        }
    }
}

/// Logical argument a descriptor belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgId {
    /// Formal argument (receiver is 0 when present)
    Arg(u16),
    /// Address of the indirect return buffer
    ReturnBuffer,
}

impl fmt::Display for ArgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgId::Arg(i) => write!(f, "arg{}", i),
            ArgId::ReturnBuffer => write!(f, "retbuf"),
        }
    }
}

/// Width of a sub-word integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubWordWidth {
    /// One byte
    W1,
    /// Two bytes
    W2,
    /// Four bytes
    W4,
}

impl SubWordWidth {
    /// Width for a byte count, if it is a sub-word width
    pub fn from_bytes(bytes: u32) -> Option<Self> {
        match bytes {
            1 => Some(SubWordWidth::W1),
            2 => Some(SubWordWidth::W2),
            4 => Some(SubWordWidth::W4),
            _ => None,
        }
    }

    /// Width in bytes
    pub fn bytes(self) -> u32 {
        match self {
            SubWordWidth::W1 => 1,
            SubWordWidth::W2 => 2,
            SubWordWidth::W4 => 4,
        }
    }
}

/// Width of a float scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatWidth {
    /// Single precision
    F32,
    /// Double precision
    F64,
}

impl FloatWidth {
    /// Width in bytes
    pub fn bytes(self) -> u32 {
        match self {
            FloatWidth::F32 => 4,
            FloatWidth::F64 => 8,
        }
    }
}

/// How one descriptor transforms its source into its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarshalKind {
    /// Copy `width` bytes verbatim
    Direct {
        /// Bytes copied
        width: u32,
    },
    /// Dereference the source pointer, copy `value_size` bytes, fill the rest
    /// of `slot_bytes` by extension or with zeros
    ExpandByRefToByVal {
        /// Bytes of the value behind the pointer
        value_size: u32,
        /// Bytes written at the destination
        slot_bytes: u32,
        /// Extension of a sub-word value, zero fill otherwise
        extension: Option<Signedness>,
    },
    /// Write the address of the source value into the destination
    CollapseByValToByRef {
        /// Bytes of the exposed value
        size: u32,
    },
    /// Dereference the source pointer and spread `count` packed elements over
    /// consecutive float registers
    ExpandByRefToByValFloatAggregate {
        /// Elements
        count: u8,
        /// Element width in bytes
        element_width: u8,
    },
    /// Pack `count` register elements in place and write their address
    CollapseByValToByRefFloatAggregate {
        /// Elements
        count: u8,
        /// Element width in bytes
        element_width: u8,
    },
    /// Convert between a narrow value at `sub_slot_offset` of a word and the
    /// full extended word
    ReinterpretSubWord {
        /// Width of the narrow value
        width: SubWordWidth,
        /// Extension applied when widening
        signedness: Signedness,
        /// True when narrow → full word
        widen: bool,
    },
}

impl MarshalKind {
    /// Whether this kind exposes the source by address
    pub fn is_collapse(&self) -> bool {
        matches!(
            self,
            MarshalKind::CollapseByValToByRef { .. } | MarshalKind::CollapseByValToByRefFloatAggregate { .. }
        )
    }
}

/// One step of an adapter program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MoveDescriptor {
    /// Logical argument this step belongs to
    pub arg: ArgId,
    /// Location in the caller's set
    pub src: Location,
    /// Location in the callee's set
    pub dst: Location,
    /// Transformation
    pub marshal: MarshalKind,
    /// Byte offset of the narrow value inside its word (ReinterpretSubWord only)
    pub sub_slot_offset: u8,
}

impl MoveDescriptor {
    /// Bytes of the callee's set this step writes
    pub fn dst_spans(&self) -> Vec<ByteSpan> {
        match self.marshal {
            MarshalKind::Direct { width } => vec![ByteSpan::at(self.dst, width)],
            MarshalKind::ExpandByRefToByVal { slot_bytes, .. } => vec![ByteSpan::at(self.dst, slot_bytes)],
            MarshalKind::CollapseByValToByRef { .. } | MarshalKind::CollapseByValToByRefFloatAggregate { .. } => {
                vec![ByteSpan::at(self.dst, WORD)]
            }
            MarshalKind::ExpandByRefToByValFloatAggregate { count, element_width } => (0..count as u32)
                .map(|i| ByteSpan::at(self.dst.advance(i), element_width as u32))
                .collect(),
            MarshalKind::ReinterpretSubWord { widen: true, .. } => vec![ByteSpan::at(self.dst, WORD)],
            MarshalKind::ReinterpretSubWord { width, widen: false, .. } => {
                let mut span = ByteSpan::at(self.dst, width.bytes());
                span.start += self.sub_slot_offset as u32;
                vec![span]
            }
        }
    }

    /// Bytes of the caller's set this step reads, exposes, or rewrites
    pub fn src_span(&self) -> ByteSpan {
        match self.marshal {
            MarshalKind::Direct { width } => ByteSpan::at(self.src, width),
            MarshalKind::CollapseByValToByRef { size } => ByteSpan::at(self.src, size),
            MarshalKind::CollapseByValToByRefFloatAggregate { count, .. } => {
                ByteSpan::at(self.src, count as u32 * WORD)
            }
            MarshalKind::ExpandByRefToByVal { .. }
            | MarshalKind::ExpandByRefToByValFloatAggregate { .. }
            | MarshalKind::ReinterpretSubWord { .. } => ByteSpan::at(self.src, WORD),
        }
    }

    /// Bytes of the caller's set rewritten in place (float aggregate packing)
    pub fn src_writes(&self) -> Option<ByteSpan> {
        match self.marshal {
            MarshalKind::CollapseByValToByRefFloatAggregate { count, element_width } => {
                Some(ByteSpan::at(self.src, count as u32 * element_width as u32))
            }
            _ => None,
        }
    }

    /// Bytes of the caller's set whose address a collapse hands to the callee
    pub fn exposed_span(&self) -> Option<ByteSpan> {
        match self.marshal {
            MarshalKind::CollapseByValToByRef { size } => Some(ByteSpan::at(self.src, size)),
            MarshalKind::CollapseByValToByRefFloatAggregate { count, element_width } => {
                Some(ByteSpan::at(self.src, count as u32 * element_width as u32))
            }
            _ => None,
        }
    }
}

/// Shape of a return value held in return registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnShape {
    /// `size` bytes over `count` integer registers
    IntRegs {
        /// Registers used
        count: u8,
        /// Bytes of the value
        size: u32,
    },
    /// A sub-word integer in integer register 0
    SubWord {
        /// Width of the value
        width: SubWordWidth,
        /// Extension into the full register
        signedness: Signedness,
    },
    /// A float scalar in float register 0
    Float {
        /// Precision
        width: FloatWidth,
    },
    /// A float aggregate, one element per float register
    FloatAggregate {
        /// Elements
        count: u8,
        /// Element width in bytes
        element_width: u8,
    },
}

impl ReturnShape {
    /// Bytes of the value
    pub fn size(&self) -> u32 {
        match *self {
            ReturnShape::IntRegs { size, .. } => size,
            ReturnShape::SubWord { width, .. } => width.bytes(),
            ReturnShape::Float { width } => width.bytes(),
            ReturnShape::FloatAggregate { count, element_width } => count as u32 * element_width as u32,
        }
    }
}

/// What happens to the return value after the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnMarshal {
    /// Return registers are passed through
    None,
    /// The callee wrote the value to the return area; load it into the
    /// caller's return registers
    Load(ReturnShape),
    /// The callee returned in registers; store the value to the buffer whose
    /// address the caller passed at `buffer_at`
    Store {
        /// Register shape of the callee's value
        shape: ReturnShape,
        /// Caller location holding the buffer address
        buffer_at: Location,
        /// Hand the buffer address back in integer return register 0
        echo: bool,
    },
}

/// Return value area reserved in the callee's stack image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReturnArea {
    /// Byte offset of the area in the callee's stack area
    pub offset: u32,
    /// Bytes reserved
    pub size: u32,
    /// Callee location receiving the area's address
    pub buffer_at: Location,
}

/// How the real callee is found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallTarget {
    /// A fixed code address
    Direct(usize),
    /// Load the receiver's dispatch table and read the slot at `offset`
    /// (negative offsets address interface slots)
    Virtual {
        /// Byte offset of the slot in the dispatch table
        offset: i32,
    },
    /// Read the code pointer stored in the receiver at `offset`
    DelegateInvoke {
        /// Byte offset of the code pointer in the receiver
        offset: i32,
    },
    /// The address arrives as the generic context of the call
    Indirect,
}

impl CallTarget {
    /// Whether resolution reads the receiver
    pub fn needs_receiver(&self) -> bool {
        matches!(self, CallTarget::Virtual { .. } | CallTarget::DelegateInvoke { .. })
    }
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallTarget::Direct(addr) => write!(f, "direct {:#x}", addr),
            CallTarget::Virtual { offset } => write!(f, "virtual [table{:+}]", offset),
            CallTarget::DelegateInvoke { offset } => write!(f, "delegate [this{:+}]", offset),
            CallTarget::Indirect => write!(f, "indirect (generic context)"),
        }
    }
}

/// A complete, reusable convention crossing
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdapterProgram {
    /// Direction of the crossing
    pub direction: Direction,
    /// Steps, in execution order
    pub moves: Vec<MoveDescriptor>,
    /// Number of logical arguments
    pub arg_count: usize,
    /// Bytes of the callee's stack arguments, frame aligned
    pub callee_stack_usage: u32,
    /// Return strategy
    pub return_marshal: ReturnMarshal,
    /// Return value area, when the callee returns indirectly and the caller does not
    pub return_area: Option<ReturnArea>,
    /// How the callee is found
    pub call_target: CallTarget,
    /// Callee location of the receiver, for receiver-based targets
    pub receiver: Option<Location>,
}

/// A structural defect found by [`AdapterProgram::verify`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// Two moves write the same byte
    #[error("byte {offset} of {area:?} written more than once")]
    DoubleWrite {
        /// Area of the byte
        area: Area,
        /// Byte offset within the area
        offset: u32,
    },

    /// A byte the callee reads is left unset
    #[error("byte {offset} of {area:?} is never written")]
    Uncovered {
        /// Area of the byte
        area: Area,
        /// Byte offset within the area
        offset: u32,
    },

    /// A move writes a byte the callee never reads
    #[error("byte {offset} of {area:?} is written but not part of the callee placement")]
    OutsideFootprint {
        /// Area of the byte
        area: Area,
        /// Byte offset within the area
        offset: u32,
    },

    /// A collapse hands out an address whose contents change afterwards
    #[error("move {collapse} exposes memory that move {writer} writes later")]
    CollapseBeforeWrite {
        /// Index of the collapse move
        collapse: usize,
        /// Index of the later writer
        writer: usize,
    },

    /// A caller argument is never moved
    #[error("argument {0} has no move")]
    UncoveredArgument(u16),

    /// A `Load` return strategy has nowhere to load from
    #[error("return load without a return area")]
    MissingReturnArea,

    /// The invoker would not pass this stack byte to the callee
    #[error("stack argument byte {offset} lies beyond the {usage} byte callee stack")]
    StackBeyondUsage {
        /// Last byte of the argument
        offset: u32,
        /// Stack bytes the invoker passes
        usage: u32,
    },

    /// The return value area shares bytes with stack arguments
    #[error("return area at stack byte {offset} overlaps the callee's stack arguments")]
    ReturnAreaOverlap {
        /// First byte of the return area
        offset: u32,
    },
}

impl AdapterProgram {
    /// Every byte this program writes into the callee's set
    fn written_bytes(&self) -> Result<BTreeSet<(Area, u32)>, VerifyError> {
        let mut written = BTreeSet::new();
        let mut spans: Vec<ByteSpan> = self.moves.iter().flat_map(|m| m.dst_spans()).collect();
        if let Some(area) = self.return_area {
            spans.push(ByteSpan::at(area.buffer_at, WORD));
        }
        for span in spans {
            for offset in span.start..span.end() {
                if !written.insert((span.area, offset)) {
                    return Err(VerifyError::DoubleWrite { area: span.area, offset });
                }
            }
        }
        Ok(written)
    }

    /// Check the program against the callee placement it was built for.
    ///
    /// - every logical argument has at least one move
    /// - the bytes written equal the callee footprint, each written once
    /// - no collapse exposes memory a later move rewrites
    pub fn verify(&self, callee: &CallInfo) -> Result<(), VerifyError> {
        for index in 0..self.arg_count as u16 {
            if !self.moves.iter().any(|m| m.arg == ArgId::Arg(index)) {
                return Err(VerifyError::UncoveredArgument(index));
            }
        }

        let mut written = self.written_bytes()?;
        for span in callee.footprint() {
            for offset in span.start..span.end() {
                if !written.remove(&(span.area, offset)) {
                    return Err(VerifyError::Uncovered { area: span.area, offset });
                }
            }
        }
        if let Some((area, offset)) = written.into_iter().next() {
            return Err(VerifyError::OutsideFootprint { area, offset });
        }

        let footprint = callee.footprint();
        for span in footprint.iter().filter(|s| s.area == Area::Stack) {
            if span.end() > self.callee_stack_usage {
                return Err(VerifyError::StackBeyondUsage { offset: span.end() - 1, usage: self.callee_stack_usage });
            }
        }
        if let Some(area) = self.return_area {
            let span = ByteSpan { area: Area::Stack, start: area.offset, len: area.size };
            if area.offset < self.callee_stack_usage || footprint.iter().any(|s| s.overlaps(&span)) {
                return Err(VerifyError::ReturnAreaOverlap { offset: area.offset });
            }
        }

        for (i, mv) in self.moves.iter().enumerate() {
            let Some(exposed) = mv.exposed_span() else { continue };
            for (j, later) in self.moves.iter().enumerate().skip(i + 1) {
                if later.src_writes().is_some_and(|w| w.overlaps(&exposed)) {
                    return Err(VerifyError::CollapseBeforeWrite { collapse: i, writer: j });
                }
            }
        }

        if matches!(self.return_marshal, ReturnMarshal::Load(_)) && self.return_area.is_none() {
            return Err(VerifyError::MissingReturnArea);
        }
        Ok(())
    }
}

fn sign_suffix(signedness: Signedness) -> &'static str {
    match signedness {
        Signedness::Signed => "s",
        Signedness::Unsigned => "u",
    }
}

impl fmt::Display for MarshalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MarshalKind::Direct { width } => write!(f, "direct {}", width),
            MarshalKind::ExpandByRefToByVal { value_size, slot_bytes, extension } => {
                write!(f, "expand {}->{}", value_size, slot_bytes)?;
                if let Some(s) = extension {
                    write!(f, " {}ext", sign_suffix(s))?;
                }
                Ok(())
            }
            MarshalKind::CollapseByValToByRef { size } => write!(f, "collapse {}", size),
            MarshalKind::ExpandByRefToByValFloatAggregate { count, element_width } => {
                write!(f, "expand-fa {}x{}", count, element_width)
            }
            MarshalKind::CollapseByValToByRefFloatAggregate { count, element_width } => {
                write!(f, "collapse-fa {}x{}", count, element_width)
            }
            MarshalKind::ReinterpretSubWord { width, signedness, widen } => write!(
                f,
                "{} {}{}",
                if widen { "widen" } else { "narrow" },
                sign_suffix(signedness),
                width.bytes() * 8
            ),
        }
    }
}

impl fmt::Display for ReturnShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ReturnShape::IntRegs { count, size } => write!(f, "int x{} ({} bytes)", count, size),
            ReturnShape::SubWord { width, signedness } => {
                write!(f, "sub-word {}{}", sign_suffix(signedness), width.bytes() * 8)
            }
            ReturnShape::Float { width } => write!(f, "f{}", width.bytes() * 8),
            ReturnShape::FloatAggregate { count, element_width } => {
                write!(f, "float aggregate {}x{}", count, element_width)
            }
        }
    }
}

impl fmt::Display for AdapterProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} adapter: caller {}, callee {}, {} args, callee stack {} bytes",
            self.direction,
            self.direction.caller_convention(),
            self.direction.callee_convention(),
            self.arg_count,
            self.callee_stack_usage
        )?;
        for (i, mv) in self.moves.iter().enumerate() {
            write!(f, "  {:>3}  {:<7} {:>8} -> {:<8} {}", i, mv.arg.to_string(), mv.src.to_string(), mv.dst.to_string(), mv.marshal)?;
            if let MarshalKind::ReinterpretSubWord { .. } = mv.marshal {
                write!(f, " @{}", mv.sub_slot_offset)?;
            }
            writeln!(f)?;
        }
        if let Some(area) = self.return_area {
            writeln!(f, "  return area [sp+{}]:{} -> {}", area.offset, area.size, area.buffer_at)?;
        }
        match self.return_marshal {
            ReturnMarshal::None => writeln!(f, "  return: pass through")?,
            ReturnMarshal::Load(shape) => writeln!(f, "  return: load {}", shape)?,
            ReturnMarshal::Store { shape, buffer_at, echo } => {
                write!(f, "  return: store {} to *{}", shape, buffer_at)?;
                if echo {
                    write!(f, ", echo address")?;
                }
                writeln!(f)?;
            }
        }
        write!(f, "  target: {}", self.call_target)?;
        if let Some(receiver) = self.receiver {
            write!(f, " (receiver {})", receiver)?;
        }
        Ok(())
    }
}
