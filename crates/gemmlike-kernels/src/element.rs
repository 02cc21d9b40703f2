//! Element types the kernels are generic over.

use bytemuck::Pod;
use half::f16;

use gemmlike_core::DType;

/// A tensor element the kernels can move around (pack, unroll, store).
pub trait Element: Pod + Default + Send + Sync + 'static {
    const DTYPE: DType;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;
}

impl Element for i8 {
    const DTYPE: DType = DType::I8;
}

/// An element that can be multiplied into a GEMM accumulator.
pub trait GemmElement: Element {
    /// Accumulator type: f32 for floats, i32 for int8.
    type Acc: Copy + Default + Send + Sync;

    fn mac(acc: Self::Acc, a: Self, b: Self) -> Self::Acc;
}

impl GemmElement for f32 {
    type Acc = f32;

    #[inline]
    fn mac(acc: f32, a: f32, b: f32) -> f32 {
        acc + a * b
    }
}

impl GemmElement for f16 {
    type Acc = f32;

    #[inline]
    fn mac(acc: f32, a: f16, b: f16) -> f32 {
        acc + a.to_f32() * b.to_f32()
    }
}

impl GemmElement for i8 {
    type Acc = i32;

    #[inline]
    fn mac(acc: i32, a: i8, b: i8) -> i32 {
        acc + a as i32 * b as i32
    }
}
