//! Scalar element types understood by tensors and kernel dispatch.

use std::fmt;

/// Logical dtype identifier shared by tensor storage and dispatch keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DType {
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 32-bit signed integer.
    I32,
}

impl DType {
    /// Produces a stable tag used when hashing stack signatures.
    pub fn tag(self) -> u8 {
        match self {
            DType::F32 => 0,
            DType::I32 => 1,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => f.write_str("f32"),
            DType::I32 => f.write_str("i32"),
        }
    }
}
