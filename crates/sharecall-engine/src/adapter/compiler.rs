//! Move-program compiler
//!
//! Pairs the caller's and callee's placement of every argument and lowers each
//! pair to move descriptors:
//!
//! - same shape on both sides: one `Direct` per physical slot (per element for
//!   float aggregates)
//! - by-reference source, by-value destination: `ExpandByRefToByVal`
//! - by-value source, by-reference destination: `CollapseByValToByRef`
//! - narrow stack scalar against a full slot: `ReinterpretSubWord`
//!
//! The return value gets one of four strategies, and receiver-based targets
//! get the callee location of argument 0. Anything structurally incompatible
//! is a `BuildError`; the compiler never emits a program it cannot stand behind.

use sharecall_abi::{align_to, ArgPlacement, Area, ByteSpan, CallInfo, ConventionTag, Location, RegBank, Signedness, StorageClass, WORD};

use crate::adapter::program::{
    AdapterProgram, ArgId, CallTarget, Direction, FloatWidth, MarshalKind, MoveDescriptor, ReturnArea,
    ReturnMarshal, ReturnShape, SubWordWidth,
};
use crate::runtime::location::{LocationSet, RETURN_FLOAT_REGS, RETURN_INT_REGS};

/// Alignment of the callee's outgoing stack area
pub const FRAME_ALIGNMENT: u32 = 16;

/// Structurally incompatible caller/callee placements
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// A placement was computed for the wrong side of the boundary
    #[error("{side} placement uses the {found} convention, expected {expected}")]
    ConventionMismatch {
        /// "caller" or "callee"
        side: &'static str,
        /// Convention the direction calls for
        expected: ConventionTag,
        /// Convention of the placement
        found: ConventionTag,
    },

    /// The placements describe different signatures
    #[error("Argument count mismatch: caller has {caller}, callee has {callee}")]
    ArgumentCountMismatch {
        /// Caller argument count
        caller: usize,
        /// Callee argument count
        callee: usize,
    },

    /// Only one side has an implicit receiver
    #[error("Caller and callee disagree on the implicit receiver")]
    ReceiverMismatch,

    /// One argument has different sizes on the two sides
    #[error("{arg}: size mismatch (caller {caller} bytes, callee {callee} bytes)")]
    SizeMismatch {
        /// Argument
        arg: ArgId,
        /// Caller size in bytes
        caller: u32,
        /// Callee size in bytes
        callee: u32,
    },

    /// No move turns one storage class into the other
    #[error("{arg}: cannot move {caller} to {callee}")]
    Unreconcilable {
        /// Argument
        arg: ArgId,
        /// Caller storage
        caller: StorageClass,
        /// Callee storage
        callee: StorageClass,
    },

    /// No return strategy bridges the two return placements
    #[error("Return value: cannot reconcile {caller} with {callee}")]
    ReturnMismatch {
        /// Caller return storage
        caller: StorageClass,
        /// Callee return storage
        callee: StorageClass,
    },

    /// A move or the return area reaches past the location set
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// Virtual and delegate targets dispatch through argument 0
    #[error("{0} call target without a receiver in argument 0")]
    MissingReceiver(CallTarget),
}

/// Build the program that lets code using `caller`'s placement call a method
/// using `callee`'s placement.
pub fn build_adapter(
    caller: &CallInfo,
    callee: &CallInfo,
    direction: Direction,
    call_target: CallTarget,
) -> Result<AdapterProgram, BuildError> {
    check_convention("caller", direction.caller_convention(), caller.convention)?;
    check_convention("callee", direction.callee_convention(), callee.convention)?;
    if caller.args.len() != callee.args.len() {
        return Err(BuildError::ArgumentCountMismatch { caller: caller.args.len(), callee: callee.args.len() });
    }
    if caller.has_this != callee.has_this {
        return Err(BuildError::ReceiverMismatch);
    }

    let mut moves = Vec::new();
    for (index, (src, dst)) in caller.args.iter().zip(&callee.args).enumerate() {
        let arg = ArgId::Arg(index as u16);
        if src.size != dst.size {
            return Err(BuildError::SizeMismatch { arg, caller: src.size, callee: dst.size });
        }
        lower_arg(arg, src, dst, &mut moves)?;
    }

    let callee_stack_usage = align_to(callee.stack_usage, FRAME_ALIGNMENT);
    let (return_marshal, return_area) = lower_return(caller, &callee.ret, callee_stack_usage, &mut moves)?;

    let receiver = if call_target.needs_receiver() {
        Some(receiver_location(callee).ok_or(BuildError::MissingReceiver(call_target))?)
    } else {
        None
    };

    let program = AdapterProgram {
        direction,
        moves,
        arg_count: caller.args.len(),
        callee_stack_usage,
        return_marshal,
        return_area,
        call_target,
        receiver,
    };
    check_capacity(&program)?;
    Ok(program)
}

fn check_convention(side: &'static str, expected: ConventionTag, found: ConventionTag) -> Result<(), BuildError> {
    if expected == found {
        Ok(())
    } else {
        Err(BuildError::ConventionMismatch { side, expected, found })
    }
}

fn receiver_location(callee: &CallInfo) -> Option<Location> {
    if !callee.has_this {
        return None;
    }
    match callee.args.first()?.storage {
        StorageClass::Register { bank: RegBank::Int, index } => Some(Location::int(index)),
        StorageClass::StackSlot { offset, width: 8 } => Some(Location::stack(offset)),
        _ => None,
    }
}

fn push(moves: &mut Vec<MoveDescriptor>, arg: ArgId, src: Location, dst: Location, marshal: MarshalKind) {
    moves.push(MoveDescriptor { arg, src, dst, marshal, sub_slot_offset: 0 });
}

/// Bytes a by-value storage occupies from its first location
fn value_slot_bytes(storage: &StorageClass) -> Option<u32> {
    match *storage {
        StorageClass::Register { .. } => Some(WORD),
        StorageClass::StackSlot { width, .. } => Some(width),
        StorageClass::RegisterGroup { count, .. } => Some(count as u32 * WORD),
        StorageClass::FloatAggregate { count, element_width: 8, .. } => Some(count as u32 * WORD),
        _ => None,
    }
}

fn lower_arg(arg: ArgId, src: &ArgPlacement, dst: &ArgPlacement, moves: &mut Vec<MoveDescriptor>) -> Result<(), BuildError> {
    let unreconcilable = || BuildError::Unreconcilable { arg, caller: src.storage, callee: dst.storage };

    match (src.storage, dst.storage) {
        (StorageClass::None, _) | (_, StorageClass::None) => Err(unreconcilable()),

        (StorageClass::ByReference { at: from }, StorageClass::ByReference { at: to }) => {
            push(moves, arg, from, to, MarshalKind::Direct { width: WORD });
            Ok(())
        }

        (StorageClass::ByReference { at }, StorageClass::FloatAggregate { first, count, element_width: 4, bank }) => {
            let marshal = MarshalKind::ExpandByRefToByValFloatAggregate { count, element_width: 4 };
            push(moves, arg, at, Location::Reg { bank, index: first }, marshal);
            Ok(())
        }

        (StorageClass::ByReference { at }, value) => {
            let slot_bytes = value_slot_bytes(&value).ok_or_else(unreconcilable)?;
            let to = value.first_location().ok_or_else(unreconcilable)?;
            if dst.size > slot_bytes {
                return Err(unreconcilable());
            }
            let marshal = MarshalKind::ExpandByRefToByVal { value_size: dst.size, slot_bytes, extension: dst.extension };
            push(moves, arg, at, to, marshal);
            Ok(())
        }

        (StorageClass::FloatAggregate { first, count, element_width: 4, bank }, StorageClass::ByReference { at }) => {
            let marshal = MarshalKind::CollapseByValToByRefFloatAggregate { count, element_width: 4 };
            push(moves, arg, Location::Reg { bank, index: first }, at, marshal);
            Ok(())
        }

        (value, StorageClass::ByReference { at }) => {
            let slot_bytes = value_slot_bytes(&value).ok_or_else(unreconcilable)?;
            let from = value.first_location().ok_or_else(unreconcilable)?;
            if src.size > slot_bytes {
                return Err(unreconcilable());
            }
            push(moves, arg, from, at, MarshalKind::CollapseByValToByRef { size: src.size });
            Ok(())
        }

        (from, to) => lower_by_value(arg, src, from, to, moves).ok_or_else(unreconcilable),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitKind {
    /// A full 8-byte cell
    Word,
    /// Fewer than 8 bytes of a stack word
    Narrow,
    /// One float aggregate element
    Element,
}

#[derive(Debug, Clone, Copy)]
struct Unit {
    loc: Location,
    bytes: u32,
    kind: UnitKind,
}

/// Split a by-value storage into physical slots. `element_width` splits stack
/// slots into float elements when the other side is a float aggregate.
fn units(storage: StorageClass, element_width: Option<u8>) -> Option<Vec<Unit>> {
    let units = match storage {
        StorageClass::Register { bank, index } => {
            vec![Unit { loc: Location::Reg { bank, index }, bytes: WORD, kind: UnitKind::Word }]
        }
        StorageClass::RegisterGroup { bank, first, count } => (0..count)
            .map(|i| Unit { loc: Location::Reg { bank, index: first + i }, bytes: WORD, kind: UnitKind::Word })
            .collect(),
        StorageClass::FloatAggregate { bank, first, count, element_width } => (0..count)
            .map(|i| Unit {
                loc: Location::Reg { bank, index: first + i },
                bytes: element_width as u32,
                kind: UnitKind::Element,
            })
            .collect(),
        StorageClass::StackSlot { offset, width } => match element_width {
            Some(ew) => {
                let ew = ew as u32;
                if width % ew != 0 {
                    return None;
                }
                (0..width / ew)
                    .map(|i| Unit { loc: Location::stack(offset + i * ew), bytes: ew, kind: UnitKind::Element })
                    .collect()
            }
            None => {
                let mut units: Vec<Unit> = (0..width / WORD)
                    .map(|i| Unit { loc: Location::stack(offset + i * WORD), bytes: WORD, kind: UnitKind::Word })
                    .collect();
                if width % WORD != 0 {
                    let tail = width - width % WORD;
                    units.push(Unit { loc: Location::stack(offset + tail), bytes: width % WORD, kind: UnitKind::Narrow });
                }
                units
            }
        },
        StorageClass::None | StorageClass::ByReference { .. } => return None,
    };
    Some(units)
}

fn float_element_width(storage: &StorageClass) -> Option<u8> {
    match *storage {
        StorageClass::FloatAggregate { element_width, .. } => Some(element_width),
        _ => None,
    }
}

/// Containing word of a stack location, and the offset inside it
fn split_word(loc: Location) -> (Location, u8) {
    match loc {
        Location::Stack { offset } => (Location::stack(offset & !(WORD - 1)), (offset % WORD) as u8),
        reg => (reg, 0),
    }
}

fn lower_by_value(
    arg: ArgId,
    src: &ArgPlacement,
    from: StorageClass,
    to: StorageClass,
    moves: &mut Vec<MoveDescriptor>,
) -> Option<()> {
    let src_units = units(from, float_element_width(&to))?;
    let dst_units = units(to, float_element_width(&from))?;
    if src_units.len() != dst_units.len() {
        return None;
    }

    let signedness = src.extension.unwrap_or(Signedness::Unsigned);
    for (s, d) in src_units.iter().zip(&dst_units) {
        let descriptor = match (s.kind, d.kind) {
            (UnitKind::Word, UnitKind::Word) => {
                MoveDescriptor { arg, src: s.loc, dst: d.loc, marshal: MarshalKind::Direct { width: WORD }, sub_slot_offset: 0 }
            }
            (UnitKind::Element, UnitKind::Element) | (UnitKind::Narrow, UnitKind::Narrow) if s.bytes == d.bytes => {
                MoveDescriptor { arg, src: s.loc, dst: d.loc, marshal: MarshalKind::Direct { width: d.bytes }, sub_slot_offset: 0 }
            }
            (UnitKind::Element, UnitKind::Word) | (UnitKind::Word, UnitKind::Element) if s.bytes == d.bytes => {
                MoveDescriptor { arg, src: s.loc, dst: d.loc, marshal: MarshalKind::Direct { width: WORD }, sub_slot_offset: 0 }
            }
            (UnitKind::Narrow, UnitKind::Word) => {
                let width = SubWordWidth::from_bytes(s.bytes)?;
                let (word, sub_slot_offset) = split_word(s.loc);
                MoveDescriptor {
                    arg,
                    src: word,
                    dst: d.loc,
                    marshal: MarshalKind::ReinterpretSubWord { width, signedness, widen: true },
                    sub_slot_offset,
                }
            }
            (UnitKind::Word, UnitKind::Narrow) => {
                let width = SubWordWidth::from_bytes(d.bytes)?;
                let (word, sub_slot_offset) = split_word(d.loc);
                MoveDescriptor {
                    arg,
                    src: s.loc,
                    dst: word,
                    marshal: MarshalKind::ReinterpretSubWord { width, signedness, widen: false },
                    sub_slot_offset,
                }
            }
            _ => return None,
        };
        moves.push(descriptor);
    }
    Some(())
}

/// Shape of a register-returned value
fn return_shape(ret: &ArgPlacement) -> Option<ReturnShape> {
    match ret.storage {
        StorageClass::Register { bank: RegBank::Int, .. } if ret.size < WORD => Some(ReturnShape::SubWord {
            width: SubWordWidth::from_bytes(ret.size)?,
            signedness: ret.extension.unwrap_or(Signedness::Unsigned),
        }),
        StorageClass::Register { bank: RegBank::Int, .. } => Some(ReturnShape::IntRegs { count: 1, size: ret.size }),
        StorageClass::Register { bank: RegBank::Float, .. } => Some(ReturnShape::Float {
            width: if ret.size == 4 { FloatWidth::F32 } else { FloatWidth::F64 },
        }),
        StorageClass::RegisterGroup { bank: RegBank::Int, count, .. } if count as usize <= RETURN_INT_REGS => {
            Some(ReturnShape::IntRegs { count, size: ret.size })
        }
        StorageClass::FloatAggregate { count, element_width, .. } if count as usize <= RETURN_FLOAT_REGS => {
            Some(ReturnShape::FloatAggregate { count, element_width })
        }
        _ => None,
    }
}

fn lower_return(
    caller_info: &CallInfo,
    callee: &ArgPlacement,
    callee_stack_usage: u32,
    moves: &mut Vec<MoveDescriptor>,
) -> Result<(ReturnMarshal, Option<ReturnArea>), BuildError> {
    let caller = &caller_info.ret;
    let mismatch = || BuildError::ReturnMismatch { caller: caller.storage, callee: callee.storage };
    if caller.size != callee.size {
        return Err(mismatch());
    }

    match (caller.storage, callee.storage) {
        (StorageClass::None, StorageClass::None) => Ok((ReturnMarshal::None, None)),

        (StorageClass::ByReference { at: from }, StorageClass::ByReference { at: to }) => {
            push(moves, ArgId::ReturnBuffer, from, to, MarshalKind::Direct { width: WORD });
            Ok((ReturnMarshal::None, None))
        }

        (_, StorageClass::ByReference { at }) => {
            let shape = return_shape(caller).ok_or_else(mismatch)?;
            let area = ReturnArea { offset: callee_stack_usage, size: align_to(callee.size, WORD), buffer_at: at };
            Ok((ReturnMarshal::Load(shape), Some(area)))
        }

        (StorageClass::ByReference { at }, _) => {
            let shape = return_shape(callee).ok_or_else(mismatch)?;
            let echo = caller_info.echoes_return_buffer;
            Ok((ReturnMarshal::Store { shape, buffer_at: at, echo }, None))
        }

        (a, b) if a == b => Ok((ReturnMarshal::None, None)),

        _ => Err(mismatch()),
    }
}

fn fits(span: ByteSpan) -> bool {
    span.end() as usize <= LocationSet::area_len(span.area)
}

fn check_capacity(program: &AdapterProgram) -> Result<(), BuildError> {
    for mv in &program.moves {
        let src = mv.src_span();
        if !fits(src) {
            return Err(BuildError::CapacityExceeded(format!("{} reads {:?} up to byte {}", mv.arg, src.area, src.end())));
        }
        for dst in mv.dst_spans() {
            if !fits(dst) {
                return Err(BuildError::CapacityExceeded(format!("{} writes {:?} up to byte {}", mv.arg, dst.area, dst.end())));
            }
        }
    }
    if let Some(area) = program.return_area {
        let span = ByteSpan { area: Area::Stack, start: area.offset, len: area.size };
        if !fits(span) || !fits(ByteSpan::at(area.buffer_at, WORD)) {
            return Err(BuildError::CapacityExceeded(format!("return area ends at byte {}", span.end())));
        }
    }
    if let ReturnMarshal::Store { buffer_at, .. } = program.return_marshal {
        if !fits(ByteSpan::at(buffer_at, WORD)) {
            return Err(BuildError::CapacityExceeded(format!("return buffer at {}", buffer_at)));
        }
    }
    if let Some(receiver) = program.receiver {
        if !fits(ByteSpan::at(receiver, WORD)) {
            return Err(BuildError::CapacityExceeded(format!("receiver at {}", receiver)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharecall_abi::{CallPlacement, Classifier, Param, Signature, TargetDesc, ValueType};

    fn infos(target: TargetDesc, sig: &Signature, direction: Direction) -> (CallInfo, CallInfo) {
        let classifier = Classifier::new(target);
        let caller = classifier.compute_call_info(sig, direction.caller_convention()).unwrap();
        let callee = classifier.compute_call_info(sig, direction.callee_convention()).unwrap();
        (caller, callee)
    }

    fn build(target: TargetDesc, sig: &Signature, direction: Direction) -> AdapterProgram {
        let (caller, callee) = infos(target, sig, direction);
        let program = build_adapter(&caller, &callee, direction, CallTarget::Direct(0x1000)).unwrap();
        program.verify(&callee).unwrap();
        program
    }

    #[test]
    fn test_concrete_signature_is_all_direct() {
        let sig = Signature::new(
            Param::concrete(ValueType::int(8)),
            vec![Param::concrete(ValueType::int(8)), Param::concrete(ValueType::Float64)],
        );
        let program = build(TargetDesc::aapcs64(), &sig, Direction::SharedToNormal);
        assert_eq!(program.moves.len(), 2);
        assert!(program.moves.iter().all(|m| m.marshal == MarshalKind::Direct { width: 8 }));
        assert_eq!(program.return_marshal, ReturnMarshal::None);
    }

    #[test]
    fn test_float_aggregate_collapse_and_expand() {
        let sig = Signature::new(Param::concrete(ValueType::Void), vec![Param::variable(ValueType::hfa(4, 3))]);

        let collapse = build(TargetDesc::aapcs64(), &sig, Direction::SharedToNormal);
        assert_eq!(
            collapse.moves[0].marshal,
            MarshalKind::CollapseByValToByRefFloatAggregate { count: 3, element_width: 4 }
        );
        assert_eq!(collapse.moves[0].src, Location::float(0));
        assert_eq!(collapse.moves[0].dst, Location::int(0));

        let expand = build(TargetDesc::aapcs64(), &sig, Direction::NormalToShared);
        assert_eq!(
            expand.moves[0].marshal,
            MarshalKind::ExpandByRefToByValFloatAggregate { count: 3, element_width: 4 }
        );
    }

    #[test]
    fn test_double_aggregate_uses_plain_expand() {
        let sig = Signature::new(Param::concrete(ValueType::Void), vec![Param::variable(ValueType::hfa(8, 2))]);
        let program = build(TargetDesc::aapcs64(), &sig, Direction::NormalToShared);
        assert_eq!(
            program.moves[0].marshal,
            MarshalKind::ExpandByRefToByVal { value_size: 16, slot_bytes: 16, extension: None }
        );
    }

    #[test]
    fn test_natural_stack_scalars_are_reinterpreted() {
        let mut params: Vec<Param> = (0..8).map(|_| Param::concrete(ValueType::int(8))).collect();
        params.push(Param::concrete(ValueType::uint(1)));
        params.push(Param::concrete(ValueType::int(2)));
        let sig = Signature::new(Param::concrete(ValueType::Void), params);

        let program = build(TargetDesc::apple_arm64(), &sig, Direction::NormalToShared);
        // shared full slots → natural packing
        let narrow: Vec<_> = program.moves.iter().filter(|m| matches!(m.marshal, MarshalKind::ReinterpretSubWord { .. })).collect();
        assert_eq!(narrow.len(), 2);
        assert_eq!(
            narrow[1].marshal,
            MarshalKind::ReinterpretSubWord { width: SubWordWidth::W2, signedness: Signedness::Signed, widen: false }
        );
        assert_eq!(narrow[1].dst, Location::stack(0));
        assert_eq!(narrow[1].sub_slot_offset, 2);
    }

    #[test]
    fn test_indirect_return_to_registers_reserves_area() {
        let sig = Signature::new(Param::variable(ValueType::opaque(16, 8)), vec![]);
        let program = build(TargetDesc::aapcs64(), &sig, Direction::SharedToNormal);
        assert_eq!(program.return_marshal, ReturnMarshal::Load(ReturnShape::IntRegs { count: 2, size: 16 }));
        assert_eq!(program.return_area, Some(ReturnArea { offset: 0, size: 16, buffer_at: Location::int(8) }));
    }

    #[test]
    fn test_both_indirect_returns_copy_buffer_pointer() {
        let sig = Signature::new(Param::variable(ValueType::opaque(40, 8)), vec![]);
        let program = build(TargetDesc::aapcs64(), &sig, Direction::SharedToNormal);
        assert_eq!(program.moves.len(), 1);
        assert_eq!(program.moves[0].arg, ArgId::ReturnBuffer);
        assert_eq!(program.return_marshal, ReturnMarshal::None);
    }

    #[test]
    fn test_convention_mismatch_is_rejected() {
        let sig = Signature::new(Param::concrete(ValueType::Void), vec![Param::variable(ValueType::int(4))]);
        let (caller, callee) = infos(TargetDesc::aapcs64(), &sig, Direction::SharedToNormal);
        let err = build_adapter(&callee, &caller, Direction::SharedToNormal, CallTarget::Indirect).unwrap_err();
        assert!(matches!(err, BuildError::ConventionMismatch { side: "caller", .. }));
    }

    #[test]
    fn test_virtual_target_needs_receiver() {
        let sig = Signature::new(Param::concrete(ValueType::Void), vec![Param::concrete(ValueType::Reference)]);
        let (caller, callee) = infos(TargetDesc::aapcs64(), &sig, Direction::SharedToNormal);
        let err = build_adapter(&caller, &callee, Direction::SharedToNormal, CallTarget::Virtual { offset: 8 }).unwrap_err();
        assert_eq!(err, BuildError::MissingReceiver(CallTarget::Virtual { offset: 8 }));

        let sig = Signature { has_this: true, ..sig };
        let (caller, callee) = infos(TargetDesc::aapcs64(), &sig, Direction::SharedToNormal);
        let program = build_adapter(&caller, &callee, Direction::SharedToNormal, CallTarget::Virtual { offset: 8 }).unwrap();
        assert_eq!(program.receiver, Some(Location::int(0)));
    }

    #[test]
    fn test_capacity_is_checked() {
        let params: Vec<Param> = (0..80).map(|_| Param::concrete(ValueType::int(8))).collect();
        let sig = Signature::new(Param::concrete(ValueType::Void), params);
        let (caller, callee) = infos(TargetDesc::aapcs64(), &sig, Direction::SharedToNormal);
        let err = build_adapter(&caller, &callee, Direction::SharedToNormal, CallTarget::Indirect).unwrap_err();
        assert!(matches!(err, BuildError::CapacityExceeded(_)));
    }
}
