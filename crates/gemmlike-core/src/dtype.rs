use std::fmt;

use serde::{Deserialize, Serialize};

/// Element types carried by gemmlike tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit IEEE 754 single-precision float
    F32,
    /// 16-bit IEEE 754 half-precision float
    F16,
    /// 8-bit signed integer (symmetric quantization, zero point 0)
    I8,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn element_size(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 => 2,
            DType::I8 => 1,
        }
    }

    /// Number of bytes needed to store `n` elements of this dtype.
    pub fn storage_bytes(&self, n: usize) -> usize {
        self.element_size() * n
    }

    /// Whether this dtype is a floating-point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F16)
    }

    /// Whether this dtype holds quantized integers.
    pub fn is_quantized(&self) -> bool {
        matches!(self, DType::I8)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F16 => write!(f, "f16"),
            DType::I8 => write!(f, "i8"),
        }
    }
}
