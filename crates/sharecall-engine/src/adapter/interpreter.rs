//! Move interpreter
//!
//! Applies an [`AdapterProgram`] to the caller's location set, filling the
//! callee's set, and resolves the address to call. Runs on every crossing:
//! no allocation, no logging, no error channel. Invalid input faults.

use sharecall_abi::{Location, Signedness, WORD};

use crate::adapter::program::{AdapterProgram, ArgId, CallTarget, MarshalKind, MoveDescriptor};
use crate::runtime::fault::{raise, Fault};
use crate::runtime::location::{extend_le, LocationSet};

/// Execute `program`, moving arguments from `src` (caller convention) to
/// `dst` (callee convention), and return the code address to call.
///
/// `generic_context` is the call target for [`CallTarget::Indirect`].
///
/// # Safety
///
/// Every by-reference argument in `src` must be null or point to a readable
/// value of the placed size. For receiver-based targets the receiver in `dst`
/// must be null or point to a live object with the layout the target offset
/// assumes.
pub unsafe fn interpret(
    program: &AdapterProgram,
    src: &mut LocationSet,
    dst: &mut LocationSet,
    generic_context: usize,
) -> usize {
    // Every address exposed into `src` derives from this one pointer
    let base: *mut LocationSet = src;
    for mv in &program.moves {
        apply(mv, base, dst);
    }

    if let Some(area) = program.return_area {
        let address = dst.address_of(Location::stack(area.offset), 0) as u64;
        dst.write_word(area.buffer_at, address);
    }

    resolve_target(program, dst, generic_context)
}

fn arg_index(arg: ArgId) -> u16 {
    match arg {
        ArgId::Arg(i) => i,
        ArgId::ReturnBuffer => u16::MAX,
    }
}

#[inline]
unsafe fn apply(mv: &MoveDescriptor, base: *mut LocationSet, dst: &mut LocationSet) {
    match mv.marshal {
        MarshalKind::Direct { width } => {
            let mut buf = [0u8; WORD as usize];
            let mut remaining = width;
            let mut done = 0;
            while remaining > 0 {
                let n = remaining.min(WORD);
                (*base).read_bytes(mv.src, done, &mut buf[..n as usize]);
                dst.write_bytes(mv.dst, done, &buf[..n as usize]);
                done += n;
                remaining -= n;
            }
        }

        MarshalKind::ExpandByRefToByVal { value_size, slot_bytes, extension } => {
            let from = (*base).read_word(mv.src) as *const u8;
            if from.is_null() {
                raise(Fault::NullReference { arg: arg_index(mv.arg) });
            }
            let to = dst.address_of(mv.dst, 0);
            std::ptr::copy(from, to, value_size as usize);
            if slot_bytes > value_size {
                let fill = match extension {
                    Some(Signedness::Signed) if value_size > 0 && *to.add(value_size as usize - 1) & 0x80 != 0 => 0xff,
                    _ => 0x00,
                };
                std::ptr::write_bytes(to.add(value_size as usize), fill, (slot_bytes - value_size) as usize);
            }
        }

        MarshalKind::CollapseByValToByRef { .. } => {
            let address = LocationSet::raw_address(base, mv.src, 0) as u64;
            dst.write_word(mv.dst, address);
        }

        MarshalKind::ExpandByRefToByValFloatAggregate { count, element_width } => {
            let from = (*base).read_word(mv.src) as *const u8;
            if from.is_null() {
                raise(Fault::NullReference { arg: arg_index(mv.arg) });
            }
            let width = element_width as usize;
            for i in 0..count as u32 {
                let element = std::slice::from_raw_parts(from.add(i as usize * width), width);
                dst.write_bytes(mv.dst.advance(i), 0, element);
            }
        }

        MarshalKind::CollapseByValToByRefFloatAggregate { count, element_width } => {
            // Ascending order never overwrites an element before it moves
            let start = LocationSet::raw_address(base, mv.src, 0);
            let width = element_width as usize;
            for i in 0..count as usize {
                std::ptr::copy(start.add(i * WORD as usize), start.add(i * width), width);
            }
            dst.write_word(mv.dst, start as u64);
        }

        MarshalKind::ReinterpretSubWord { width, signedness, widen } => {
            let n = width.bytes() as usize;
            let mut buf = [0u8; 4];
            if widen {
                (*base).read_bytes(mv.src, mv.sub_slot_offset as u32, &mut buf[..n]);
                dst.write_word(mv.dst, extend_le(&buf[..n], signedness == Signedness::Signed));
            } else {
                let word = (*base).read_word(mv.src).to_le_bytes();
                dst.write_bytes(mv.dst, mv.sub_slot_offset as u32, &word[..n]);
            }
        }
    }
}

unsafe fn receiver(program: &AdapterProgram, dst: &LocationSet) -> usize {
    let recv = program.receiver.map(|loc| dst.read_word(loc) as usize).unwrap_or(0);
    if recv == 0 {
        raise(Fault::NullReceiver);
    }
    recv
}

unsafe fn resolve_target(program: &AdapterProgram, dst: &LocationSet, generic_context: usize) -> usize {
    match program.call_target {
        CallTarget::Direct(address) => address,
        CallTarget::Virtual { offset } => {
            let object = receiver(program, dst) as *const u8;
            let table = std::ptr::read(object as *const *const u8);
            std::ptr::read(table.offset(offset as isize) as *const usize)
        }
        CallTarget::DelegateInvoke { offset } => {
            let object = receiver(program, dst) as *const u8;
            std::ptr::read(object.offset(offset as isize) as *const usize)
        }
        CallTarget::Indirect => {
            if generic_context == 0 {
                raise(Fault::NullTarget);
            }
            generic_context
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::program::{Direction, ReturnArea, ReturnMarshal, SubWordWidth};
    use crate::runtime::fault::catch_fault;

    fn program(moves: Vec<MoveDescriptor>, call_target: CallTarget) -> AdapterProgram {
        AdapterProgram {
            direction: Direction::NormalToShared,
            arg_count: moves.len(),
            moves,
            callee_stack_usage: 0,
            return_marshal: ReturnMarshal::None,
            return_area: None,
            call_target,
            receiver: None,
        }
    }

    fn mv(src: Location, dst: Location, marshal: MarshalKind) -> MoveDescriptor {
        MoveDescriptor { arg: ArgId::Arg(0), src, dst, marshal, sub_slot_offset: 0 }
    }

    #[test]
    fn test_expand_sign_extends() {
        let value: i16 = -3;
        let mut src = LocationSet::new();
        src.write_word(Location::int(0), &value as *const i16 as u64);
        let p = program(
            vec![mv(
                Location::int(0),
                Location::int(2),
                MarshalKind::ExpandByRefToByVal { value_size: 2, slot_bytes: 8, extension: Some(Signedness::Signed) },
            )],
            CallTarget::Direct(0x40),
        );
        let mut dst = LocationSet::new();
        let target = unsafe { interpret(&p, &mut src, &mut dst, 0) };
        assert_eq!(target, 0x40);
        assert_eq!(dst.int_regs[2] as i64, -3);
    }

    #[test]
    fn test_expand_null_reference_faults() {
        let p = program(
            vec![mv(
                Location::int(0),
                Location::int(0),
                MarshalKind::ExpandByRefToByVal { value_size: 8, slot_bytes: 8, extension: None },
            )],
            CallTarget::Direct(0x40),
        );
        let result = catch_fault(|| unsafe {
            let mut src = LocationSet::new();
            let mut dst = LocationSet::new();
            interpret(&p, &mut src, &mut dst, 0)
        });
        assert_eq!(result, Err(Fault::NullReference { arg: 0 }));
    }

    #[test]
    fn test_collapse_exposes_source_cell() {
        let mut src = LocationSet::new();
        src.int_regs[3] = 0xdead_beef;
        let p = program(
            vec![mv(Location::int(3), Location::stack(8), MarshalKind::CollapseByValToByRef { size: 4 })],
            CallTarget::Direct(1),
        );
        let mut dst = LocationSet::new();
        unsafe { interpret(&p, &mut src, &mut dst, 0) };
        let pointer = dst.stack[1] as *const u32;
        assert_eq!(pointer, &src.int_regs[3] as *const u64 as *const u32);
        assert_eq!(unsafe { *pointer }, 0xdead_beef);
    }

    #[test]
    fn test_float_aggregate_packs_in_place() {
        let mut src = LocationSet::new();
        for (i, v) in [1.5f32, 2.5, 3.5].iter().enumerate() {
            src.float_regs[i] = v.to_bits() as u64;
        }
        let p = program(
            vec![mv(
                Location::float(0),
                Location::int(0),
                MarshalKind::CollapseByValToByRefFloatAggregate { count: 3, element_width: 4 },
            )],
            CallTarget::Direct(1),
        );
        let mut dst = LocationSet::new();
        unsafe { interpret(&p, &mut src, &mut dst, 0) };
        let packed = unsafe { std::slice::from_raw_parts(dst.int_regs[0] as *const f32, 3) };
        assert_eq!(packed, &[1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_exposed_addresses_survive_later_moves() {
        let mut src = LocationSet::new();
        src.int_regs[3] = 0xdead_beef;
        src.float_regs[0] = 1.5f32.to_bits() as u64;
        src.float_regs[1] = 2.5f32.to_bits() as u64;
        let p = program(
            vec![
                mv(Location::int(3), Location::stack(8), MarshalKind::CollapseByValToByRef { size: 4 }),
                mv(
                    Location::float(0),
                    Location::int(0),
                    MarshalKind::CollapseByValToByRefFloatAggregate { count: 2, element_width: 4 },
                ),
                mv(Location::int(3), Location::int(1), MarshalKind::Direct { width: 8 }),
            ],
            CallTarget::Direct(1),
        );
        let mut dst = LocationSet::new();
        unsafe { interpret(&p, &mut src, &mut dst, 0) };
        let scalar = dst.stack[1] as *const u32;
        let packed = dst.int_regs[0] as *const f32;
        assert_eq!(unsafe { *scalar }, 0xdead_beef);
        assert_eq!(unsafe { std::slice::from_raw_parts(packed, 2) }, &[1.5, 2.5]);
        assert_eq!(dst.int_regs[1], 0xdead_beef);
    }

    #[test]
    fn test_float_aggregate_expand_spreads_elements() {
        let values = [4.0f32, 5.0];
        let mut src = LocationSet::new();
        src.write_word(Location::int(1), values.as_ptr() as u64);
        let p = program(
            vec![mv(
                Location::int(1),
                Location::float(2),
                MarshalKind::ExpandByRefToByValFloatAggregate { count: 2, element_width: 4 },
            )],
            CallTarget::Direct(1),
        );
        let mut dst = LocationSet::new();
        unsafe { interpret(&p, &mut src, &mut dst, 0) };
        assert_eq!(f32::from_bits(dst.float_regs[2] as u32), 4.0);
        assert_eq!(f32::from_bits(dst.float_regs[3] as u32), 5.0);
    }

    #[test]
    fn test_narrow_leaves_neighbours() {
        let mut src = LocationSet::new();
        src.int_regs[0] = 0xffff_ffff_ffff_ff9c; // -100
        let mut dst = LocationSet::new();
        dst.stack[0] = 0x1111_1111_1111_1111;
        let p = program(
            vec![MoveDescriptor {
                sub_slot_offset: 3,
                ..mv(
                    Location::int(0),
                    Location::stack(0),
                    MarshalKind::ReinterpretSubWord {
                        width: SubWordWidth::W1,
                        signedness: Signedness::Signed,
                        widen: false,
                    },
                )
            }],
            CallTarget::Direct(1),
        );
        unsafe { interpret(&p, &mut src, &mut dst, 0) };
        assert_eq!(dst.stack[0], 0x1111_1111_9c11_1111);
    }

    #[test]
    fn test_return_area_address_is_routed() {
        let mut p = program(vec![], CallTarget::Direct(1));
        p.return_area = Some(ReturnArea { offset: 16, size: 8, buffer_at: Location::int(8) });
        let mut src = LocationSet::new();
        let mut dst = LocationSet::new();
        unsafe { interpret(&p, &mut src, &mut dst, 0) };
        assert_eq!(dst.int_regs[8], &dst.stack[2] as *const u64 as u64);
    }

    #[test]
    fn test_indirect_target_uses_generic_context() {
        let p = program(vec![], CallTarget::Indirect);
        let mut src = LocationSet::new();
        let mut dst = LocationSet::new();
        assert_eq!(unsafe { interpret(&p, &mut src, &mut dst, 0x5000) }, 0x5000);
        let result = catch_fault(|| unsafe { interpret(&p, &mut LocationSet::new(), &mut LocationSet::new(), 0) });
        assert_eq!(result, Err(Fault::NullTarget));
    }

    #[test]
    fn test_delegate_invoke_reads_receiver_field() {
        #[repr(C)]
        struct Delegate {
            header: usize,
            invoke: usize,
        }
        let delegate = Delegate { header: 0, invoke: 0x7777 };
        let mut p = program(vec![], CallTarget::DelegateInvoke { offset: 8 });
        p.receiver = Some(Location::int(0));
        let mut src = LocationSet::new();
        let mut dst = LocationSet::new();
        dst.int_regs[0] = &delegate as *const Delegate as u64;
        assert_eq!(unsafe { interpret(&p, &mut src, &mut dst, 0) }, 0x7777);
        assert_eq!(delegate.header, 0);
    }
}
