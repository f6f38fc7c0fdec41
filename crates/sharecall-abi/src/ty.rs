//! Signature and value type representation
//!
//! A [`Signature`] describes one logical method signature. Parameters marked
//! `variable` are generic type variables: the normal convention sees their
//! concrete instantiation, the shared convention passes them by reference.

use serde::{Deserialize, Serialize};

use crate::error::PlacementError;

/// Largest aggregate the placement model accepts, in bytes
pub const MAX_VALUE_SIZE: u32 = 1 << 20;
/// Largest aggregate alignment the placement model accepts, in bytes
pub const MAX_VALUE_ALIGN: u32 = 4096;

/// Sign of a sub-word integer, used when widening it to a full slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signedness {
    /// Sign-extend when widening
    Signed,
    /// Zero-extend when widening
    Unsigned,
}

/// Shape of a homogeneous float aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HfaShape {
    /// Width of each float element in bytes (4 or 8)
    pub element_width: u8,
    /// Number of elements
    pub count: u8,
}

/// Value type of a parameter or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueType {
    /// No value (return only)
    Void,
    /// Integer of 1, 2, 4 or 8 bytes
    Int {
        /// Width in bytes
        width: u8,
        /// Extension applied when widened
        signedness: Signedness,
    },
    /// Single-precision float
    Float32,
    /// Double-precision float
    Float64,
    /// Managed object reference or raw pointer
    Reference,
    /// Value-type aggregate
    Struct {
        /// Size in bytes
        size: u32,
        /// Alignment in bytes
        align: u32,
        /// Set when every field is a float of the same width
        #[serde(default)]
        hfa: Option<HfaShape>,
    },
}

impl ValueType {
    /// Signed integer of `width` bytes
    pub fn int(width: u8) -> Self {
        ValueType::Int { width, signedness: Signedness::Signed }
    }

    /// Unsigned integer of `width` bytes
    pub fn uint(width: u8) -> Self {
        ValueType::Int { width, signedness: Signedness::Unsigned }
    }

    /// Opaque aggregate
    pub fn opaque(size: u32, align: u32) -> Self {
        ValueType::Struct { size, align, hfa: None }
    }

    /// Homogeneous float aggregate of `count` elements of `element_width` bytes
    pub fn hfa(element_width: u8, count: u8) -> Self {
        let size = element_width as u32 * count as u32;
        ValueType::Struct {
            size,
            align: element_width as u32,
            hfa: Some(HfaShape { element_width, count }),
        }
    }

    /// Size of the value in bytes
    pub fn size(&self) -> u32 {
        match self {
            ValueType::Void => 0,
            ValueType::Int { width, .. } => *width as u32,
            ValueType::Float32 => 4,
            ValueType::Float64 | ValueType::Reference => 8,
            ValueType::Struct { size, .. } => *size,
        }
    }

    /// Extension to apply when the value is narrower than a word
    pub fn extension(&self) -> Option<Signedness> {
        match self {
            ValueType::Int { width, signedness } if *width < 8 => Some(*signedness),
            _ => None,
        }
    }

    /// Check that the type is well formed
    pub fn validate(&self) -> Result<(), PlacementError> {
        match *self {
            ValueType::Int { width, .. } => match width {
                1 | 2 | 4 | 8 => Ok(()),
                other => Err(PlacementError::InvalidIntWidth(other)),
            },
            ValueType::Struct { size, align, hfa } => {
                if size == 0 {
                    return Err(PlacementError::InvalidStruct("zero-sized aggregate".to_string()));
                }
                if size > MAX_VALUE_SIZE {
                    return Err(PlacementError::InvalidStruct(format!(
                        "{} bytes exceeds the {} byte limit",
                        size, MAX_VALUE_SIZE
                    )));
                }
                if !align.is_power_of_two() || align > MAX_VALUE_ALIGN {
                    return Err(PlacementError::InvalidStruct(format!(
                        "alignment {} is not a power of two up to 4096",
                        align
                    )));
                }
                if let Some(shape) = hfa {
                    if !matches!(shape.element_width, 4 | 8) || shape.count == 0 {
                        return Err(PlacementError::InvalidStruct(format!(
                            "bad float aggregate shape {}x{}",
                            shape.count, shape.element_width
                        )));
                    }
                    if shape.element_width as u32 * shape.count as u32 != size {
                        return Err(PlacementError::InvalidStruct(format!(
                            "float aggregate {}x{} does not fill {} bytes",
                            shape.count, shape.element_width, size
                        )));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// One parameter (or the return value) of a signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
    /// Concrete type under the current instantiation
    pub ty: ValueType,
    /// True when the declared type is a generic type variable
    #[serde(default)]
    pub variable: bool,
}

impl Param {
    /// A parameter whose declared type is concrete
    pub fn concrete(ty: ValueType) -> Self {
        Param { ty, variable: false }
    }

    /// A parameter whose declared type is a type variable instantiated with `ty`
    pub fn variable(ty: ValueType) -> Self {
        Param { ty, variable: true }
    }
}

/// A logical method signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    /// Whether an implicit receiver is passed before the parameters
    #[serde(default)]
    pub has_this: bool,
    /// Formal parameters, in order
    pub params: Vec<Param>,
    /// Return value
    pub ret: Param,
}

impl Signature {
    /// Static signature
    pub fn new(ret: Param, params: Vec<Param>) -> Self {
        Signature { has_this: false, params, ret }
    }

    /// Instance signature (receiver passed as argument 0)
    pub fn instance(ret: Param, params: Vec<Param>) -> Self {
        Signature { has_this: true, params, ret }
    }

    /// Number of physical arguments, including the receiver
    pub fn arg_count(&self) -> usize {
        self.params.len() + self.has_this as usize
    }

    /// Validate every parameter and the return type
    pub fn validate(&self) -> Result<(), PlacementError> {
        for (index, param) in self.params.iter().enumerate() {
            if param.ty == ValueType::Void {
                return Err(PlacementError::VoidParameter(index));
            }
            param.ty.validate()?;
        }
        if self.ret.variable && self.ret.ty == ValueType::Void {
            return Err(PlacementError::VoidVariable);
        }
        self.ret.ty.validate()
    }
}
