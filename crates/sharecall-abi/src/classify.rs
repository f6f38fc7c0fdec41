//! Reference classifier
//!
//! Assigns registers and stack slots left to right, the way an AAPCS64-style
//! target does. Each convention walks the same signature with its own
//! argument state:
//!
//! - **Normal**: scalars take the next register of their bank, float
//!   aggregates take consecutive float registers, small aggregates take
//!   consecutive integer registers, large aggregates travel by reference.
//!   Stack scalars follow the target's packing and sub-slot placement.
//! - **Shared**: a type-variable parameter always travels by reference and a
//!   type-variable return is always indirect. Every stack scalar takes a full
//!   slot, extended to 8 bytes.

use crate::error::PlacementError;
use crate::storage::{align_to, ArgPlacement, CallInfo, ConventionTag, Location, RegBank, StorageClass, STACK_CELLS, WORD};
use crate::target::{ReturnBufferPlacement, StackPacking, SubSlotPlacement, TargetDesc};
use crate::ty::{Param, Signature, ValueType};

/// Computes the physical placement of a signature under a convention
pub trait CallPlacement: Send + Sync {
    /// Target this placement model describes
    fn target(&self) -> &TargetDesc;

    /// Place every argument and the return value of `sig`
    fn compute_call_info(&self, sig: &Signature, convention: ConventionTag) -> Result<CallInfo, PlacementError>;
}

/// Placement model driven by a [`TargetDesc`]
#[derive(Debug, Clone)]
pub struct Classifier {
    target: TargetDesc,
    /// Set when `target` failed validation; every placement reports it
    invalid: Option<PlacementError>,
}

impl Classifier {
    /// Create a classifier for `target`.
    ///
    /// An invalid target is accepted here and rejected by every
    /// `compute_call_info`.
    pub fn new(target: TargetDesc) -> Self {
        let invalid = target.validate().err();
        Classifier { target, invalid }
    }
}

impl CallPlacement for Classifier {
    fn target(&self) -> &TargetDesc {
        &self.target
    }

    fn compute_call_info(&self, sig: &Signature, convention: ConventionTag) -> Result<CallInfo, PlacementError> {
        if let Some(err) = &self.invalid {
            return Err(err.clone());
        }
        sig.validate()?;

        let mut state = ArgState::new(&self.target, convention);
        let ret = state.place_return(&sig.ret);

        let mut args = Vec::with_capacity(sig.arg_count());
        if sig.has_this {
            args.push(state.place_param(&Param::concrete(ValueType::Reference)));
        }
        let max = STACK_CELLS as u32 * WORD;
        for param in &sig.params {
            args.push(state.place_param(param));
            // bail out before the running offset can grow without bound
            if state.stack > max {
                return Err(PlacementError::StackOverflow { bytes: state.stack, max });
            }
        }

        let stack_usage = align_to(state.stack, self.target.frame_alignment);
        if stack_usage > max {
            return Err(PlacementError::StackOverflow { bytes: stack_usage, max });
        }

        let echoes_return_buffer = matches!(ret.storage, StorageClass::ByReference { .. })
            && self.target.return_buffer == ReturnBufferPlacement::FirstArgument;

        Ok(CallInfo { convention, has_this: sig.has_this, args, ret, stack_usage, echoes_return_buffer })
    }
}

/// Running register and stack allocation state
struct ArgState<'t> {
    target: &'t TargetDesc,
    convention: ConventionTag,
    /// Next integer argument register
    gr: u8,
    /// Next float argument register
    fr: u8,
    /// Bytes of stack arguments used so far
    stack: u32,
}

impl<'t> ArgState<'t> {
    fn new(target: &'t TargetDesc, convention: ConventionTag) -> Self {
        ArgState { target, convention, gr: 0, fr: 0, stack: 0 }
    }

    fn packing(&self) -> (StackPacking, SubSlotPlacement) {
        match self.convention {
            ConventionTag::Normal => (self.target.stack_packing, self.target.sub_slot),
            ConventionTag::Shared => (StackPacking::FullSlots, SubSlotPlacement::LowAddress),
        }
    }

    fn place_return(&mut self, ret: &Param) -> ArgPlacement {
        let ty = ret.ty;
        let size = ty.size();
        let extension = ty.extension();
        let storage = match ty {
            ValueType::Void => return ArgPlacement::none(),
            _ if ret.variable && self.convention == ConventionTag::Shared => self.return_buffer(),
            ValueType::Int { .. } | ValueType::Reference => StorageClass::Register { bank: RegBank::Int, index: 0 },
            ValueType::Float32 | ValueType::Float64 => StorageClass::Register { bank: RegBank::Float, index: 0 },
            ValueType::Struct { hfa: Some(shape), .. }
                if shape.count <= self.target.max_hfa_elements && shape.count <= self.target.float_ret_regs =>
            {
                StorageClass::FloatAggregate {
                    bank: RegBank::Float,
                    first: 0,
                    count: shape.count,
                    element_width: shape.element_width,
                }
            }
            ValueType::Struct { size, .. }
                if size <= self.target.max_register_return
                    && align_to(size, WORD) / WORD <= self.target.int_ret_regs as u32 =>
            {
                StorageClass::RegisterGroup {
                    bank: RegBank::Int,
                    first: 0,
                    count: (align_to(size, WORD) / WORD) as u8,
                }
            }
            ValueType::Struct { .. } => self.return_buffer(),
        };
        ArgPlacement { storage, size, extension }
    }

    fn return_buffer(&mut self) -> StorageClass {
        match self.target.return_buffer {
            ReturnBufferPlacement::DedicatedRegister { index } => StorageClass::ByReference { at: Location::int(index) },
            ReturnBufferPlacement::FirstArgument => {
                let index = self.gr;
                self.gr += 1;
                StorageClass::ByReference { at: Location::int(index) }
            }
        }
    }

    fn place_param(&mut self, param: &Param) -> ArgPlacement {
        let ty = param.ty;
        let size = ty.size();
        let extension = ty.extension();
        let storage = if param.variable && self.convention == ConventionTag::Shared {
            self.add_reference()
        } else {
            match ty {
                ValueType::Int { .. } | ValueType::Reference => self.add_general(size),
                ValueType::Float32 | ValueType::Float64 => self.add_fp(size),
                ValueType::Struct { size, align, hfa } => self.add_valuetype(size, align, hfa.map(|h| (h.element_width, h.count))),
                // rejected by Signature::validate
                ValueType::Void => StorageClass::None,
            }
        };
        ArgPlacement { storage, size, extension }
    }

    fn add_general(&mut self, size: u32) -> StorageClass {
        if self.gr < self.target.int_arg_regs {
            let index = self.gr;
            self.gr += 1;
            StorageClass::Register { bank: RegBank::Int, index }
        } else {
            self.stack_scalar(size)
        }
    }

    fn add_fp(&mut self, size: u32) -> StorageClass {
        if self.fr < self.target.float_arg_regs {
            let index = self.fr;
            self.fr += 1;
            StorageClass::Register { bank: RegBank::Float, index }
        } else {
            self.stack_scalar(size)
        }
    }

    /// An address in the next integer register, or a full stack slot
    fn add_reference(&mut self) -> StorageClass {
        let at = if self.gr < self.target.int_arg_regs {
            let index = self.gr;
            self.gr += 1;
            Location::int(index)
        } else {
            let offset = align_to(self.stack, WORD);
            self.stack = offset + WORD;
            Location::stack(offset)
        };
        StorageClass::ByReference { at }
    }

    fn stack_scalar(&mut self, size: u32) -> StorageClass {
        match self.packing() {
            (StackPacking::Natural, _) => {
                let offset = align_to(self.stack, size);
                self.stack = offset + size;
                StorageClass::StackSlot { offset, width: size }
            }
            (StackPacking::FullSlots, SubSlotPlacement::LowAddress) => {
                let offset = align_to(self.stack, WORD);
                self.stack = offset + WORD;
                StorageClass::StackSlot { offset, width: WORD }
            }
            (StackPacking::FullSlots, placement @ SubSlotPlacement::HighAddress) => {
                let slot = align_to(self.stack, WORD);
                self.stack = slot + WORD;
                StorageClass::StackSlot { offset: slot + placement.offset_in_slot(size), width: size }
            }
        }
    }

    fn stack_aggregate(&mut self, size: u32, align: u32, width: u32) -> StorageClass {
        let align = match self.packing().0 {
            StackPacking::Natural => align.max(WORD),
            StackPacking::FullSlots => WORD,
        };
        let offset = align_to(self.stack, align);
        self.stack = offset + align_to(size, WORD);
        StorageClass::StackSlot { offset, width }
    }

    fn add_valuetype(&mut self, size: u32, align: u32, hfa: Option<(u8, u8)>) -> StorageClass {
        if let Some((element_width, count)) = hfa {
            if count <= self.target.max_hfa_elements {
                if self.fr as u32 + count as u32 <= self.target.float_arg_regs as u32 {
                    let first = self.fr;
                    self.fr += count;
                    return StorageClass::FloatAggregate { bank: RegBank::Float, first, count, element_width };
                }
                // an aggregate that does not fit closes the float registers
                self.fr = self.target.float_arg_regs;
                return self.stack_aggregate(size, align, size);
            }
        }

        if size > self.target.max_register_aggregate {
            return self.add_reference();
        }

        let words = align_to(size, WORD) / WORD;
        if self.gr as u32 + words <= self.target.int_arg_regs as u32 {
            let first = self.gr;
            self.gr += words as u8;
            StorageClass::RegisterGroup { bank: RegBank::Int, first, count: words as u8 }
        } else {
            self.gr = self.target.int_arg_regs;
            self.stack_aggregate(size, align, align_to(size, WORD))
        }
    }
}
