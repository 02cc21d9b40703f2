//! Precision variants a GEMM-like convolution can be instantiated for.

use std::fmt;

use serde::{Deserialize, Serialize};

use gemmlike_core::DType;

/// Input/output element combination of one convolution kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// f32 in, f32 out.
    FullPrecision,
    /// i8 in, f32 out.
    Int8ToFloat,
    /// i8 in, i8 out.
    Int8ToInt8,
    /// f16 in, f16 out.
    HalfPrecision,
}

impl Precision {
    pub const ALL: [Precision; 4] = [
        Precision::FullPrecision,
        Precision::Int8ToFloat,
        Precision::Int8ToInt8,
        Precision::HalfPrecision,
    ];

    /// Element type of the input activation and the filter.
    pub fn input_dtype(&self) -> DType {
        match self {
            Precision::FullPrecision => DType::F32,
            Precision::Int8ToFloat | Precision::Int8ToInt8 => DType::I8,
            Precision::HalfPrecision => DType::F16,
        }
    }

    pub fn output_dtype(&self) -> DType {
        match self {
            Precision::FullPrecision | Precision::Int8ToFloat => DType::F32,
            Precision::Int8ToInt8 => DType::I8,
            Precision::HalfPrecision => DType::F16,
        }
    }

    /// Bias is kept in f32 for the quantized variants; it is added after
    /// dequantization.
    pub fn bias_dtype(&self) -> DType {
        match self {
            Precision::HalfPrecision => DType::F16,
            _ => DType::F32,
        }
    }

    pub fn is_quantized(&self) -> bool {
        matches!(self, Precision::Int8ToFloat | Precision::Int8ToInt8)
    }

    /// Whether this build carries a backend for the variant.
    pub fn is_available(&self) -> bool {
        match self {
            Precision::HalfPrecision => cfg!(feature = "fp16"),
            _ => true,
        }
    }

    /// Byte width of one im2col workspace element.
    pub fn workspace_element_size(&self) -> usize {
        self.input_dtype().element_size()
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Precision::FullPrecision => "fp32",
            Precision::Int8ToFloat => "int8-fp32",
            Precision::Int8ToInt8 => "int8-int8",
            Precision::HalfPrecision => "fp16",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fp32" | "f32" => Ok(Precision::FullPrecision),
            "int8-fp32" | "int8_fp32" | "int8-f32" => Ok(Precision::Int8ToFloat),
            "int8-int8" | "int8_int8" | "int8" => Ok(Precision::Int8ToInt8),
            "fp16" | "f16" => Ok(Precision::HalfPrecision),
            other => Err(format!(
                "unknown precision '{other}' (expected fp32, int8-fp32, int8-int8 or fp16)"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtypes() {
        assert_eq!(Precision::Int8ToFloat.input_dtype(), DType::I8);
        assert_eq!(Precision::Int8ToFloat.output_dtype(), DType::F32);
        assert_eq!(Precision::Int8ToInt8.output_dtype(), DType::I8);
        assert_eq!(Precision::HalfPrecision.bias_dtype(), DType::F16);
        assert_eq!(Precision::Int8ToInt8.bias_dtype(), DType::F32);
    }

    #[test]
    fn test_workspace_element_size() {
        assert_eq!(Precision::FullPrecision.workspace_element_size(), 4);
        assert_eq!(Precision::Int8ToInt8.workspace_element_size(), 1);
        assert_eq!(Precision::HalfPrecision.workspace_element_size(), 2);
    }

    #[test]
    fn test_parse_display_agree() {
        for p in Precision::ALL {
            assert_eq!(p.to_string().parse::<Precision>().unwrap(), p);
        }
        assert!("bf16".parse::<Precision>().is_err());
    }

    #[test]
    fn test_half_availability_follows_feature() {
        assert_eq!(Precision::HalfPrecision.is_available(), cfg!(feature = "fp16"));
        assert!(Precision::Int8ToInt8.is_available());
    }
}
