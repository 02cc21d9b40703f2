//! # gemmlike-kernels
//!
//! Backend math primitives behind the gemmlike convolution dispatcher.
//!
//! Provides:
//! - Runtime SIMD capability detection (AVX2, AVX-512, F16C, NEON, NEON fp16)
//! - `ExecContext`: grow-only workspace arena plus run mode / thread count
//! - Panel packing of GEMM weights
//! - im2col unrolling with padding, stride and dilation
//! - GEMM with fused bias/activation epilogues in f32, int8 (f32 or i8 out) and f16
//! - 1×1 direct and im2col convolution drivers built on the above
//!
//! The kernels are portable reference implementations parallelised over
//! output rows with rayon. They define the numeric contract; they are not
//! tuned microkernels.

pub mod simd;
pub mod context;
pub mod element;
pub mod packing;
pub mod im2col;
pub mod gemm;
pub mod conv;

pub use simd::SimdCapability;
pub use context::{ExecContext, Parallelism, PowerMode};
pub use element::{Element, GemmElement};
pub use gemm::{GemmWeights, Int8Output};
pub use conv::ConvDims;
