//! GEMM with fused epilogues: `C[m, n] = epilogue(A[m, k] · B[k, n])`.
//!
//! `A` is the weight matrix, raw row-major or panel-packed (see
//! [`crate::packing`]); `B` is row-major activations; `C` is row-major.
//! Each output row is accumulated A-stationary (iterate `k`, scatter into
//! `n` accumulators) and then passed through the epilogue, which adds the
//! per-row bias, applies the per-row requantization scale if any, and the
//! activation. Rows are independent and run on the context's pool.

use std::iter::{StepBy, Take};
use std::slice::Iter;

use half::f16;

use gemmlike_core::ActivationParam;

use crate::context::Parallelism;
use crate::element::GemmElement;
use crate::packing::{packed_group_len, MR};

/// Minimum output rows before rows are spread over the pool.
const PAR_ROW_THRESHOLD: usize = 8;

/// Weight operand of a GEMM.
#[derive(Debug, Clone, Copy)]
pub enum GemmWeights<'a, T> {
    /// Row-major `[m, k]` per group.
    Raw(&'a [T]),
    /// Output of [`crate::packing::pack_gemm_weights`].
    Packed(&'a [T]),
}

impl<'a, T> GemmWeights<'a, T> {
    /// Weights of group `g` out of a filter with `m × k` matrices per group.
    pub fn group(&self, g: usize, m: usize, k: usize) -> GemmWeights<'a, T> {
        match *self {
            GemmWeights::Raw(w) => GemmWeights::Raw(&w[g * m * k..(g + 1) * m * k]),
            GemmWeights::Packed(w) => {
                let len = packed_group_len(m, k);
                GemmWeights::Packed(&w[g * len..(g + 1) * len])
            }
        }
    }

    /// The `k` weights of row `i`, in order.
    fn row(&self, i: usize, k: usize) -> Take<StepBy<Iter<'a, T>>> {
        match *self {
            GemmWeights::Raw(w) => w[i * k..].iter().step_by(1).take(k),
            GemmWeights::Packed(w) => {
                let base = (i / MR) * MR * k + i % MR;
                w[base..].iter().step_by(MR).take(k)
            }
        }
    }
}

/// Output element of an int8 GEMM.
pub trait Int8Output: Copy + Default + Send + Sync {
    /// Convert a real-valued epilogue result to the stored element.
    fn from_real(v: f32) -> Self;
}

impl Int8Output for f32 {
    #[inline]
    fn from_real(v: f32) -> Self {
        v
    }
}

impl Int8Output for i8 {
    /// Round half away from zero and saturate to the symmetric range `[-127, 127]`.
    #[inline]
    fn from_real(v: f32) -> Self {
        v.round().clamp(-127.0, 127.0) as i8
    }
}

/// Core loop shared by every precision.
#[allow(clippy::too_many_arguments)]
fn gemm_rows<T, O, E>(
    a: GemmWeights<'_, T>,
    b: &[T],
    c: &mut [O],
    m: usize,
    n: usize,
    k: usize,
    par: Parallelism<'_>,
    epilogue: E,
) where
    T: GemmElement,
    O: Send,
    E: Fn(usize, T::Acc) -> O + Sync,
{
    debug_assert!(b.len() >= k * n);
    debug_assert!(c.len() >= m * n);
    if m == 0 || n == 0 {
        return;
    }
    let c = &mut c[..m * n];

    let compute_row = |row: usize, c_row: &mut [O]| {
        let mut acc = vec![T::Acc::default(); n];
        for (p, &w) in a.row(row, k).enumerate() {
            let b_row = &b[p * n..(p + 1) * n];
            for (acc_j, &b_j) in acc.iter_mut().zip(b_row) {
                *acc_j = T::mac(*acc_j, w, b_j);
            }
        }
        for (out, acc_j) in c_row.iter_mut().zip(acc) {
            *out = epilogue(row, acc_j);
        }
    };

    if m >= PAR_ROW_THRESHOLD {
        par.for_each_chunk(c, n, compute_row);
    } else {
        Parallelism::sequential().for_each_chunk(c, n, compute_row);
    }
}

/// f32 GEMM: `C = act(A · B + bias)`.
#[allow(clippy::too_many_arguments)]
pub fn sgemm(
    a: GemmWeights<'_, f32>,
    b: &[f32],
    c: &mut [f32],
    m: usize,
    n: usize,
    k: usize,
    bias: Option<&[f32]>,
    act: &ActivationParam,
    par: Parallelism<'_>,
) {
    gemm_rows(a, b, c, m, n, k, par, |row, acc: f32| {
        let v = acc + bias.map_or(0.0, |bs| bs[row]);
        act.apply(v)
    });
}

/// int8 GEMM: `C = out(act(acc_i32 · scale + bias))` with one scale per row.
///
/// `scale` is the fused per-output-channel multiplier; for an i8 output it
/// already carries the division by the output scale, and so do `bias` and
/// the activation thresholds.
#[allow(clippy::too_many_arguments)]
pub fn gemm_int8<O: Int8Output>(
    a: GemmWeights<'_, i8>,
    b: &[i8],
    c: &mut [O],
    m: usize,
    n: usize,
    k: usize,
    scale: &[f32],
    bias: Option<&[f32]>,
    act: &ActivationParam,
    par: Parallelism<'_>,
) {
    debug_assert!(scale.len() >= m);
    gemm_rows(a, b, c, m, n, k, par, |row, acc: i32| {
        let v = acc as f32 * scale[row] + bias.map_or(0.0, |bs| bs[row]);
        O::from_real(act.apply(v))
    });
}

/// f16 GEMM, accumulated in f32: `C = f16(act(A · B + bias))`.
#[allow(clippy::too_many_arguments)]
pub fn hgemm(
    a: GemmWeights<'_, f16>,
    b: &[f16],
    c: &mut [f16],
    m: usize,
    n: usize,
    k: usize,
    bias: Option<&[f16]>,
    act: &ActivationParam,
    par: Parallelism<'_>,
) {
    gemm_rows(a, b, c, m, n, k, par, |row, acc: f32| {
        let v = acc + bias.map_or(0.0, |bs| bs[row].to_f32());
        f16::from_f32(act.apply(v))
    });
}
