//! Placement errors

/// A signature the classifier cannot place
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    /// Integers are 1, 2, 4 or 8 bytes wide
    #[error("Invalid integer width: {0} bytes")]
    InvalidIntWidth(u8),

    /// Aggregate size, alignment or float shape is unusable
    #[error("Invalid aggregate: {0}")]
    InvalidStruct(String),

    /// Only a return value may be void
    #[error("Parameter {0} has void type")]
    VoidParameter(usize),

    /// A type-variable slot was instantiated with void
    #[error("A type variable cannot be instantiated with void")]
    VoidVariable,

    /// The target description does not fit a location set
    #[error("Invalid target '{name}': {reason}")]
    InvalidTarget {
        /// Target name
        name: String,
        /// First failed check
        reason: String,
    },

    /// The arguments spill past the location set's stack area
    #[error("Stack arguments need {bytes} bytes, at most {max} fit")]
    StackOverflow {
        /// Stack bytes the signature needs
        bytes: u32,
        /// Stack bytes a location set holds
        max: u32,
    },
}
