//! Return adapter
//!
//! Runs after the wrapped call has returned. The callee's return registers are
//! copied into the caller's set, then the program's return strategy moves the
//! value between registers and memory.

use sharecall_abi::{Location, Signedness, WORD};

use crate::adapter::program::{AdapterProgram, ReturnMarshal, ReturnShape};
use crate::runtime::fault::{raise, Fault};
use crate::runtime::location::{extend_le, LocationSet};

/// Deliver the callee's return value to the caller.
///
/// # Safety
///
/// For a `Store` strategy the caller's buffer location must hold null or the
/// address of a writable buffer of the return value's size.
pub unsafe fn adapt_return(program: &AdapterProgram, caller: &mut LocationSet, callee: &LocationSet) {
    // Read before the return registers overwrite it (first-argument buffers)
    let buffer = match program.return_marshal {
        ReturnMarshal::Store { buffer_at, .. } => caller.read_word(buffer_at) as *mut u8,
        _ => std::ptr::null_mut(),
    };

    caller.copy_return_registers_from(callee);

    match program.return_marshal {
        ReturnMarshal::None => {}
        ReturnMarshal::Load(shape) => {
            if let Some(area) = program.return_area {
                load(shape, callee, area.offset, caller);
            }
        }
        ReturnMarshal::Store { shape, echo, .. } => {
            if buffer.is_null() {
                raise(Fault::NullReturnBuffer);
            }
            store(shape, callee, buffer);
            if echo {
                caller.write_word(Location::int(0), buffer as u64);
            }
        }
    }
}

/// Value area → caller return registers
fn load(shape: ReturnShape, callee: &LocationSet, offset: u32, caller: &mut LocationSet) {
    let area = Location::stack(offset);
    match shape {
        ReturnShape::IntRegs { count, size } => {
            for i in 0..count as u32 {
                caller.write_word(Location::int(i as u8), 0);
            }
            let mut buf = [0u8; WORD as usize];
            let mut done = 0;
            while done < size {
                let n = (size - done).min(WORD);
                callee.read_bytes(area, done, &mut buf[..n as usize]);
                caller.write_bytes(Location::int(0), done, &buf[..n as usize]);
                done += n;
            }
        }
        ReturnShape::SubWord { width, signedness } => {
            let n = width.bytes() as usize;
            let mut buf = [0u8; 4];
            callee.read_bytes(area, 0, &mut buf[..n]);
            caller.write_word(Location::int(0), extend_le(&buf[..n], signedness == Signedness::Signed));
        }
        ReturnShape::Float { width } => {
            let n = width.bytes() as usize;
            let mut buf = [0u8; 8];
            callee.read_bytes(area, 0, &mut buf[..n]);
            caller.write_word(Location::float(0), u64::from_le_bytes(buf));
        }
        ReturnShape::FloatAggregate { count, element_width } => {
            let n = element_width as usize;
            for i in 0..count as u32 {
                let mut buf = [0u8; 8];
                callee.read_bytes(area, i * element_width as u32, &mut buf[..n]);
                caller.write_word(Location::float(i as u8), u64::from_le_bytes(buf));
            }
        }
    }
}

/// Callee return registers → caller's buffer
unsafe fn store(shape: ReturnShape, callee: &LocationSet, buffer: *mut u8) {
    match shape {
        ReturnShape::IntRegs { size, .. } => {
            let regs = callee.int_regs.as_ptr().cast::<u8>();
            std::ptr::copy_nonoverlapping(regs, buffer, size as usize);
        }
        ReturnShape::SubWord { width, .. } => {
            let bytes = callee.int_regs[0].to_le_bytes();
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer, width.bytes() as usize);
        }
        ReturnShape::Float { width } => {
            let bytes = callee.float_regs[0].to_le_bytes();
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer, width.bytes() as usize);
        }
        ReturnShape::FloatAggregate { count, element_width } => {
            let n = element_width as usize;
            for i in 0..count as usize {
                let bytes = callee.float_regs[i].to_le_bytes();
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer.add(i * n), n);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::program::{CallTarget, Direction, FloatWidth, ReturnArea, SubWordWidth};
    use crate::runtime::fault::catch_fault;

    fn program(return_marshal: ReturnMarshal, return_area: Option<ReturnArea>) -> AdapterProgram {
        AdapterProgram {
            direction: Direction::SharedToNormal,
            moves: vec![],
            arg_count: 0,
            callee_stack_usage: 0,
            return_marshal,
            return_area,
            call_target: CallTarget::Direct(1),
            receiver: None,
        }
    }

    #[test]
    fn test_load_sub_word_zero_extends() {
        let p = program(
            ReturnMarshal::Load(ReturnShape::SubWord { width: SubWordWidth::W1, signedness: Signedness::Unsigned }),
            Some(ReturnArea { offset: 16, size: 8, buffer_at: Location::int(8) }),
        );
        let mut callee = LocationSet::new();
        callee.stack[2] = 0xffff_ffff_ffff_ffe7;
        callee.int_regs[0] = 0x1234; // garbage the callee left behind
        let mut caller = LocationSet::new();
        unsafe { adapt_return(&p, &mut caller, &callee) };
        assert_eq!(caller.int_regs[0], 0xe7);
    }

    #[test]
    fn test_load_float_aggregate() {
        let p = program(
            ReturnMarshal::Load(ReturnShape::FloatAggregate { count: 2, element_width: 4 }),
            Some(ReturnArea { offset: 0, size: 8, buffer_at: Location::int(8) }),
        );
        let mut callee = LocationSet::new();
        callee.stack[0] = (2.0f32.to_bits() as u64) << 32 | 1.0f32.to_bits() as u64;
        let mut caller = LocationSet::new();
        unsafe { adapt_return(&p, &mut caller, &callee) };
        assert_eq!(f32::from_bits(caller.float_regs[0] as u32), 1.0);
        assert_eq!(f32::from_bits(caller.float_regs[1] as u32), 2.0);
    }

    #[test]
    fn test_store_writes_exact_size() {
        let mut buffer = [0xaau8; 16];
        let mut caller = LocationSet::new();
        caller.int_regs[0] = buffer.as_mut_ptr() as u64;
        let p = program(
            ReturnMarshal::Store {
                shape: ReturnShape::IntRegs { count: 2, size: 12 },
                buffer_at: Location::int(0),
                echo: false,
            },
            None,
        );
        let mut callee = LocationSet::new();
        callee.int_regs[0] = 0x0807_0605_0403_0201;
        callee.int_regs[1] = 0x0c0b_0a09;
        unsafe { adapt_return(&p, &mut caller, &callee) };
        assert_eq!(&buffer[..12], &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(&buffer[12..], &[0xaa; 4]);
        // the return registers now mirror the callee's
        assert_eq!(caller.int_regs[0], callee.int_regs[0]);
    }

    #[test]
    fn test_store_echoes_buffer_address() {
        let mut out = 0u32;
        let mut caller = LocationSet::new();
        caller.int_regs[0] = &mut out as *mut u32 as u64;
        let p = program(
            ReturnMarshal::Store {
                shape: ReturnShape::IntRegs { count: 1, size: 4 },
                buffer_at: Location::int(0),
                echo: true,
            },
            None,
        );
        let mut callee = LocationSet::new();
        callee.int_regs[0] = 0xdead_beef;
        unsafe { adapt_return(&p, &mut caller, &callee) };
        assert_eq!(out, 0xdead_beef);
        assert_eq!(caller.int_regs[0], &out as *const u32 as u64);
    }

    #[test]
    fn test_store_float() {
        let mut out = 0f64;
        let mut caller = LocationSet::new();
        caller.int_regs[8] = &mut out as *mut f64 as u64;
        let p = program(
            ReturnMarshal::Store {
                shape: ReturnShape::Float { width: FloatWidth::F64 },
                buffer_at: Location::int(8),
                echo: false,
            },
            None,
        );
        let mut callee = LocationSet::new();
        callee.float_regs[0] = 6.25f64.to_bits();
        unsafe { adapt_return(&p, &mut caller, &callee) };
        assert_eq!(out, 6.25);
    }

    #[test]
    fn test_store_to_null_buffer_faults() {
        let p = program(
            ReturnMarshal::Store {
                shape: ReturnShape::SubWord { width: SubWordWidth::W2, signedness: Signedness::Signed },
                buffer_at: Location::int(8),
                echo: false,
            },
            None,
        );
        let result = catch_fault(|| unsafe { adapt_return(&p, &mut LocationSet::new(), &LocationSet::new()) });
        assert_eq!(result, Err(Fault::NullReturnBuffer));
    }
}
