//! Target descriptions
//!
//! Everything the classifier needs to know about a platform ABI. Presets are
//! provided for the common 64-bit targets; custom descriptions can be
//! deserialized from TOML or JSON.

use serde::{Deserialize, Serialize};

use crate::error::PlacementError;
use crate::storage::{FLOAT_REG_CELLS, INT_REG_CELLS, RETURN_FLOAT_CELLS, RETURN_INT_CELLS, WORD};

/// Where the address of an indirect return buffer is passed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReturnBufferPlacement {
    /// A dedicated integer register outside the argument registers (AArch64 x8)
    DedicatedRegister {
        /// Integer register number
        index: u8,
    },
    /// The first integer argument register, shifting every other argument
    FirstArgument,
}

/// How scalars are laid out in the outgoing stack-argument area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackPacking {
    /// Every scalar takes a full 8-byte slot
    FullSlots,
    /// Scalars are packed at their natural size and alignment
    Natural,
}

/// Which bytes of a full 8-byte slot a narrower value occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubSlotPlacement {
    /// Lowest addresses of the slot (little-endian targets)
    LowAddress,
    /// Highest addresses of the slot (big-endian targets)
    HighAddress,
}

impl SubSlotPlacement {
    /// Byte offset inside an 8-byte slot of a value `width` bytes wide
    pub fn offset_in_slot(self, width: u32) -> u32 {
        match self {
            SubSlotPlacement::LowAddress => 0,
            SubSlotPlacement::HighAddress => 8 - width.min(8),
        }
    }
}

/// ABI parameters of one target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetDesc {
    /// Display name
    pub name: String,
    /// Integer argument registers
    pub int_arg_regs: u8,
    /// Float argument registers
    pub float_arg_regs: u8,
    /// Integer return registers
    pub int_ret_regs: u8,
    /// Float return registers
    pub float_ret_regs: u8,
    /// Largest aggregate passed in integer registers, in bytes
    pub max_register_aggregate: u32,
    /// Largest aggregate returned in integer registers, in bytes
    pub max_register_return: u32,
    /// Most elements a float aggregate may have to use float registers (0 disables)
    pub max_hfa_elements: u8,
    /// Where an indirect return buffer address goes
    pub return_buffer: ReturnBufferPlacement,
    /// Stack packing of the normal convention
    pub stack_packing: StackPacking,
    /// Sub-slot placement of narrow values in full slots
    pub sub_slot: SubSlotPlacement,
    /// Alignment of the stack-argument area, in bytes
    pub frame_alignment: u32,
}

impl TargetDesc {
    /// Standard AAPCS64 (Linux, Windows on Arm)
    pub fn aapcs64() -> Self {
        TargetDesc {
            name: "aapcs64".to_string(),
            int_arg_regs: 8,
            float_arg_regs: 8,
            int_ret_regs: 2,
            float_ret_regs: 4,
            max_register_aggregate: 16,
            max_register_return: 16,
            max_hfa_elements: 4,
            return_buffer: ReturnBufferPlacement::DedicatedRegister { index: 8 },
            stack_packing: StackPacking::FullSlots,
            sub_slot: SubSlotPlacement::LowAddress,
            frame_alignment: 16,
        }
    }

    /// Apple arm64: AAPCS64 with naturally packed stack arguments
    pub fn apple_arm64() -> Self {
        TargetDesc {
            name: "apple-arm64".to_string(),
            stack_packing: StackPacking::Natural,
            ..Self::aapcs64()
        }
    }

    /// Big-endian AAPCS64: narrow values sit in the high bytes of their slot
    pub fn big_endian_64() -> Self {
        TargetDesc {
            name: "big-endian-64".to_string(),
            sub_slot: SubSlotPlacement::HighAddress,
            ..Self::aapcs64()
        }
    }

    /// A register-rich target that passes aggregates up to 64 bytes in registers
    pub fn generic64() -> Self {
        TargetDesc {
            name: "generic64".to_string(),
            max_register_aggregate: 64,
            ..Self::aapcs64()
        }
    }

    /// System V x86-64, scalar subset (aggregates are treated as opaque)
    pub fn sysv_x86_64() -> Self {
        TargetDesc {
            name: "sysv-x86-64".to_string(),
            int_arg_regs: 6,
            float_arg_regs: 8,
            int_ret_regs: 2,
            float_ret_regs: 2,
            max_register_aggregate: 16,
            max_register_return: 16,
            max_hfa_elements: 0,
            return_buffer: ReturnBufferPlacement::FirstArgument,
            stack_packing: StackPacking::FullSlots,
            sub_slot: SubSlotPlacement::LowAddress,
            frame_alignment: 16,
        }
    }

    /// Every built-in preset
    pub fn presets() -> Vec<TargetDesc> {
        vec![
            Self::aapcs64(),
            Self::apple_arm64(),
            Self::big_endian_64(),
            Self::generic64(),
            Self::sysv_x86_64(),
        ]
    }

    /// Look up a preset by name
    pub fn preset(name: &str) -> Option<TargetDesc> {
        Self::presets().into_iter().find(|t| t.name == name)
    }

    /// Preset matching the machine this process runs on
    pub fn host() -> Self {
        if cfg!(all(target_arch = "aarch64", target_vendor = "apple")) {
            Self::apple_arm64()
        } else if cfg!(target_arch = "x86_64") {
            Self::sysv_x86_64()
        } else {
            Self::aapcs64()
        }
    }

    /// Check that the description fits a location set and is self-consistent
    pub fn validate(&self) -> Result<(), PlacementError> {
        let fail = |reason: String| Err(PlacementError::InvalidTarget { name: self.name.clone(), reason });

        if self.int_arg_regs as usize > INT_REG_CELLS {
            return fail(format!("{} integer argument registers, at most {}", self.int_arg_regs, INT_REG_CELLS));
        }
        if self.float_arg_regs as usize > FLOAT_REG_CELLS {
            return fail(format!("{} float argument registers, at most {}", self.float_arg_regs, FLOAT_REG_CELLS));
        }
        if !(1..=RETURN_INT_CELLS).contains(&(self.int_ret_regs as usize)) {
            return fail(format!("{} integer return registers, expected 1 to {}", self.int_ret_regs, RETURN_INT_CELLS));
        }
        if !(1..=RETURN_FLOAT_CELLS).contains(&(self.float_ret_regs as usize)) {
            return fail(format!("{} float return registers, expected 1 to {}", self.float_ret_regs, RETURN_FLOAT_CELLS));
        }
        if self.max_register_aggregate > self.int_arg_regs as u32 * WORD {
            return fail(format!(
                "register aggregates up to {} bytes do not fit {} integer registers",
                self.max_register_aggregate, self.int_arg_regs
            ));
        }
        if self.max_register_return > self.int_ret_regs as u32 * WORD {
            return fail(format!(
                "register returns up to {} bytes do not fit {} return registers",
                self.max_register_return, self.int_ret_regs
            ));
        }
        if self.max_hfa_elements > self.float_arg_regs {
            return fail(format!(
                "float aggregates of {} elements do not fit {} float registers",
                self.max_hfa_elements, self.float_arg_regs
            ));
        }
        match self.return_buffer {
            ReturnBufferPlacement::DedicatedRegister { index } => {
                if index < self.int_arg_regs || index as usize >= INT_REG_CELLS {
                    return fail(format!("return buffer register r{} must be outside the argument registers", index));
                }
            }
            ReturnBufferPlacement::FirstArgument => {
                if self.int_arg_regs == 0 {
                    return fail("first-argument return buffer needs an integer argument register".to_string());
                }
            }
        }
        if !self.frame_alignment.is_power_of_two() || self.frame_alignment < WORD {
            return fail(format!("frame alignment {} is not a power of two of at least {}", self.frame_alignment, WORD));
        }
        Ok(())
    }
}

impl Default for TargetDesc {
    fn default() -> Self {
        Self::aapcs64()
    }
}
