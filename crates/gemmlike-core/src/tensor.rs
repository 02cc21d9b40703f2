use std::fmt;

use half::f16;

use crate::dtype::DType;
use crate::error::GemmlikeError;
use crate::shape::Shape;
use crate::Result;

/// Typed, contiguous element buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    F16(Vec<f16>),
    I8(Vec<i8>),
}

impl TensorData {
    /// Zero-filled buffer of `n` elements.
    pub fn zeros(dtype: DType, n: usize) -> Self {
        match dtype {
            DType::F32 => TensorData::F32(vec![0.0; n]),
            DType::F16 => TensorData::F16(vec![f16::ZERO; n]),
            DType::I8 => TensorData::I8(vec![0; n]),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::F32,
            TensorData::F16(_) => DType::F16,
            TensorData::I8(_) => DType::I8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::F16(v) => v.len(),
            TensorData::I8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            TensorData::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f16(&self) -> Option<&[f16]> {
        match self {
            TensorData::F16(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i8(&self) -> Option<&[i8]> {
        match self {
            TensorData::I8(v) => Some(v),
            _ => None,
        }
    }
}

/// A dense, contiguous, row-major tensor.
///
/// Convolution inputs, outputs and filters are 4-D NCHW; bias is 1-D.
/// The buffer is owned, so a tensor handed to a kernel stays valid for
/// as long as the kernel holds it.
///
/// # Examples
///
/// ```
/// use gemmlike_core::{DType, Tensor};
///
/// let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2]);
/// assert_eq!(t.shape().as_nchw().unwrap(), [1, 1, 2, 2]);
/// assert_eq!(t.dtype(), DType::F32);
/// assert!(t.as_i8_slice().is_none());
/// ```
#[derive(Clone, PartialEq)]
pub struct Tensor {
    data: TensorData,
    shape: Shape,
}

impl Tensor {
    /// Wrap an existing buffer. Fails if the element count does not match the shape.
    pub fn from_data(data: TensorData, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if shape.numel() != data.len() {
            return Err(GemmlikeError::StorageError(format!(
                "shape {} requires {} elements, got {}",
                shape,
                shape.numel(),
                data.len()
            )));
        }
        Ok(Self { data, shape })
    }

    /// Create a tensor from f32 data with the given shape.
    pub fn from_f32(data: &[f32], shape: &[usize]) -> Self {
        Self::checked(TensorData::F32(data.to_vec()), shape)
    }

    /// Create a tensor from i8 data with the given shape.
    pub fn from_i8(data: &[i8], shape: &[usize]) -> Self {
        Self::checked(TensorData::I8(data.to_vec()), shape)
    }

    /// Create a tensor from f16 data with the given shape.
    pub fn from_f16(data: &[f16], shape: &[usize]) -> Self {
        Self::checked(TensorData::F16(data.to_vec()), shape)
    }

    fn checked(data: TensorData, shape: &[usize]) -> Self {
        let s = Shape::new(shape);
        assert_eq!(
            s.numel(),
            data.len(),
            "Shape {:?} requires {} elements, got {}",
            shape,
            s.numel(),
            data.len()
        );
        Self { data, shape: s }
    }

    /// Create a tensor of zeros with the given shape and dtype.
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let s = Shape::new(shape);
        Self {
            data: TensorData::zeros(dtype, s.numel()),
            shape: s,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn as_f32_slice(&self) -> Option<&[f32]> {
        self.data.as_f32()
    }

    pub fn as_f32_slice_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.data {
            TensorData::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i8_slice(&self) -> Option<&[i8]> {
        self.data.as_i8()
    }

    pub fn as_i8_slice_mut(&mut self) -> Option<&mut [i8]> {
        match &mut self.data {
            TensorData::I8(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f16_slice(&self) -> Option<&[f16]> {
        self.data.as_f16()
    }

    pub fn as_f16_slice_mut(&mut self) -> Option<&mut [f16]> {
        match &mut self.data {
            TensorData::F16(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor({}, {}, numel={})", self.shape, self.dtype(), self.numel())
    }
}
