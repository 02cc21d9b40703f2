//! Algorithm selection: direct 1×1 GEMM or im2col + GEMM.

use std::fmt;

use gemmlike_core::ConvGeometry;

use crate::precision::Precision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// The input feature map already is the GEMM `B` operand.
    Direct1x1,
    /// Unroll receptive fields into the workspace, then GEMM.
    Im2colGemm,
}

impl Algorithm {
    /// Name of the backend primitive this algorithm dispatches to.
    pub fn kernel_name(&self, precision: Precision) -> &'static str {
        use Precision::*;
        match (self, precision) {
            (Algorithm::Direct1x1, FullPrecision) => "conv1x1s1_gemm_fp32",
            (Algorithm::Direct1x1, Int8ToFloat | Int8ToInt8) => "conv1x1s1_gemm_int8",
            (Algorithm::Direct1x1, HalfPrecision) => "conv1x1s1_gemm_fp16",
            (Algorithm::Im2colGemm, FullPrecision) => "conv_im2col_gemm_fp32",
            (Algorithm::Im2colGemm, Int8ToFloat | Int8ToInt8) => "conv_im2col_gemm_int8",
            (Algorithm::Im2colGemm, HalfPrecision) => "conv_im2col_gemm_fp16",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::Direct1x1 => f.write_str("direct-1x1"),
            Algorithm::Im2colGemm => f.write_str("im2col-gemm"),
        }
    }
}

/// Outcome of one selection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub algorithm: Algorithm,
    /// Scratch bytes the algorithm needs from the execution context.
    pub workspace_bytes: usize,
}

/// True for a square 1×1 kernel with unit stride and no padding.
///
/// Only the width-side parameters are compared against the literals; the
/// height side is tied to them through the equality checks. Dilation does
/// not enter: with a single tap it has no effect.
pub fn is_direct_1x1(geom: &ConvGeometry) -> bool {
    let kps_equal = geom.pad_left == geom.pad_top
        && geom.kernel_w == geom.kernel_h
        && geom.stride_w == geom.stride_h;
    let pads_equal = geom.pad_top == geom.pad_bottom && geom.pad_left == geom.pad_right;
    geom.kernel_w == 1 && geom.stride_w == 1 && geom.pad_left == 0 && kps_equal && pads_equal
}

/// Pick the algorithm for an input with `in_c` channels producing an
/// `out_hw` feature map.
///
/// The im2col workspace holds one group's unrolled matrix,
/// `k = in_c / groups * kh * kw` rows by `n = oh * ow` columns, in elements
/// of `elem_size` bytes.
pub fn select_algorithm(
    geom: &ConvGeometry,
    in_c: usize,
    out_hw: (usize, usize),
    elem_size: usize,
) -> Selection {
    if is_direct_1x1(geom) {
        return Selection { algorithm: Algorithm::Direct1x1, workspace_bytes: 0 };
    }
    let k = in_c / geom.groups * geom.kernel_h * geom.kernel_w;
    let n = out_hw.0 * out_hw.1;
    Selection {
        algorithm: Algorithm::Im2colGemm,
        workspace_bytes: k * n * elem_size,
    }
}
