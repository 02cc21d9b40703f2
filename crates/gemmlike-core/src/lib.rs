//! # gemmlike-core
//!
//! Foundational types shared by the gemmlike convolution stack.
//!
//! Provides:
//! - `DType` for the three element types the conv kernels understand (F32, F16, I8)
//! - `Shape` with a fixed NCHW view for 4-D convolution tensors
//! - `Tensor`, a typed contiguous buffer plus shape
//! - `ConvGeometry` and `ActivationParam`, the parts of a convolution
//!   configuration that backend primitives consume directly
//! - `GemmlikeError`, the error type for the whole workspace

pub mod dtype;
pub mod shape;
pub mod tensor;
pub mod param;
pub mod error;

pub use dtype::DType;
pub use shape::Shape;
pub use tensor::{Tensor, TensorData};
pub use param::{ActivationKind, ActivationParam, ConvGeometry};
pub use error::GemmlikeError;

pub type Result<T> = std::result::Result<T, GemmlikeError>;
